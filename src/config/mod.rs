use crate::multipart::decode::DEFAULT_DECODED_LIMIT;
use crate::multipart::headers::DEFAULT_MAX_FIELD_SIZE;
use crate::services::upload_pipeline::DEFAULT_WORKER_COUNT;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Destination bucket (required)
    pub bucket: String,

    /// Object-key prefix, typically an edge device id (default: "")
    pub prefix: String,

    /// External base URL for retrieval links; links are omitted when unset
    pub wado_url: Option<String>,

    /// Upload worker count (default: 16)
    pub worker_count: usize,

    /// Delay applied to every STOW response (default: 0)
    pub response_delay: Duration,

    /// Staging root (default: ./out)
    pub staging_dir: PathBuf,

    /// Largest accepted part header (default: 8190 bytes)
    pub max_header_field_size: usize,

    /// Request body limit (default: 4 GiB)
    pub max_request_body: usize,

    /// Largest inflated size of one gzip/deflate part (default: 1 GiB)
    pub max_decoded_part: usize,

    /// Upper bound for the shutdown drain (default: 30 s)
    pub shutdown_drain: Duration,

    /// Re-queue staged files found at startup (default: false)
    pub recover_staged: bool,

    /// Custom S3 endpoint, path-style addressing
    pub s3_endpoint: Option<String>,

    /// AWS region; the SDK default chain applies when unset
    pub aws_region: Option<String>,

    /// S3 transfer acceleration (default: false)
    pub s3_accelerate: bool,

    /// Static credentials; the SDK default chain applies when unset
    pub aws_access_key: Option<String>,
    pub aws_secret_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            wado_url: None,
            worker_count: DEFAULT_WORKER_COUNT,
            response_delay: Duration::ZERO,
            staging_dir: PathBuf::from("./out"),
            max_header_field_size: DEFAULT_MAX_FIELD_SIZE,
            max_request_body: 4 * 1024 * 1024 * 1024, // 4 GiB
            max_decoded_part: DEFAULT_DECODED_LIMIT,
            shutdown_drain: Duration::from_secs(30),
            recover_staged: false,
            s3_endpoint: None,
            aws_region: None,
            s3_accelerate: false,
            aws_access_key: None,
            aws_secret_key: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bucket = non_empty("BUCKETNAME").ok_or(ConfigError::Missing("BUCKETNAME"))?;

        Ok(Self {
            bucket,
            prefix: lookup("PREFIX").unwrap_or(default.prefix),
            wado_url: non_empty("WADOURL").map(|url| match url.strip_suffix('/') {
                Some(stripped) => stripped.to_string(),
                None => url,
            }),
            worker_count: parse("THREADCOUNT", non_empty("THREADCOUNT"))?
                .unwrap_or(default.worker_count)
                .max(1),
            response_delay: parse("RESPONSEDELAY", non_empty("RESPONSEDELAY"))?
                .map(Duration::from_secs)
                .unwrap_or(default.response_delay),
            staging_dir: non_empty("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),
            max_header_field_size: parse("MAX_HEADER_FIELD_SIZE", non_empty("MAX_HEADER_FIELD_SIZE"))?
                .unwrap_or(default.max_header_field_size),
            max_request_body: parse("MAX_REQUEST_BODY", non_empty("MAX_REQUEST_BODY"))?
                .unwrap_or(default.max_request_body),
            max_decoded_part: parse("MAX_DECODED_PART", non_empty("MAX_DECODED_PART"))?
                .unwrap_or(default.max_decoded_part),
            shutdown_drain: parse("SHUTDOWN_DRAIN_SECS", non_empty("SHUTDOWN_DRAIN_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(default.shutdown_drain),
            recover_staged: non_empty("RECOVER_STAGED")
                .map(|v| flag(&v))
                .unwrap_or(default.recover_staged),
            s3_endpoint: non_empty("S3_ENDPOINT"),
            aws_region: non_empty("AWS_REGION"),
            s3_accelerate: non_empty("S3_ACCELERATE")
                .map(|v| flag(&v))
                .unwrap_or(default.s3_accelerate),
            aws_access_key: non_empty("AWS_ACCESS_KEY"),
            aws_secret_key: non_empty("AWS_SECRET_KEY"),
        })
    }
}

fn parse<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                value: v.clone(),
            })
        })
        .transpose()
}

fn flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `EnvFilter` directive for a `LOGLEVEL` value, used when `RUST_LOG` is unset.
pub fn log_filter(level: Option<&str>) -> String {
    let level = match level.map(|l| l.trim().to_uppercase()).as_deref() {
        Some("ERROR") | Some("CRITICAL") => "error",
        Some("WARNING") | Some("WARN") => "warn",
        Some("DEBUG") => "debug",
        _ => "info",
    };
    format!("stow_gateway={},tower_http={}", level, level)
}
