use crate::config::GatewayConfig;
use crate::services::storage::S3StorageService;
use aws_sdk_s3::config::{Credentials, Region};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn setup_storage(config: &GatewayConfig) -> Arc<S3StorageService> {
    let mut loader = aws_config::from_env();

    if let Some(endpoint) = &config.s3_endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(region) = &config.aws_region {
        loader = loader.region(Region::new(region.clone()));
    }
    match (&config.aws_access_key, &config.aws_secret_key) {
        (Some(access_key), Some(secret_key)) => {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ));
        }
        (None, None) => {}
        _ => warn!("Only one of AWS_ACCESS_KEY / AWS_SECRET_KEY is set, using the default credential chain"),
    }

    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.s3_endpoint.is_some())
        .accelerate(config.s3_accelerate)
        .build();

    info!(
        "☁️  S3 Storage: {} (Bucket: {}, accelerate: {})",
        config.s3_endpoint.as_deref().unwrap_or("AWS"),
        config.bucket,
        config.s3_accelerate
    );

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Arc::new(S3StorageService::new(s3_client, config.bucket.clone()))
}
