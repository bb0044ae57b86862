use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use stow_gateway::config::{GatewayConfig, log_filter};
use stow_gateway::infrastructure::storage;
use stow_gateway::services::reconciler::FilesystemReconciler;
use stow_gateway::services::staging::recover_staged;
use stow_gateway::services::transaction::StowService;
use stow_gateway::services::upload_pipeline::UploadPipeline;
use stow_gateway::{AppState, create_app};
use tokio::signal;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the STOW-RS server
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenv().ok();
    let args = Args::parse();

    let loglevel = std::env::var("LOGLEVEL").ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter(loglevel.as_deref()).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting STOW-RS gateway...");

    let config = GatewayConfig::from_env()?;
    info!(
        "⚙️  Config: bucket={}, prefix={:?}, workers={}, staging={}, wado={}",
        config.bucket,
        config.prefix,
        config.worker_count,
        config.staging_dir.display(),
        config.wado_url.as_deref().unwrap_or("<none>")
    );

    // 2. Upload pipeline and reconciler
    let storage_service = storage::setup_storage(&config).await;
    let (completed_tx, completed_rx) = mpsc::unbounded_channel();
    let (to_delete_tx, to_delete_rx) = mpsc::unbounded_channel();

    let pipeline = UploadPipeline::start(
        storage_service,
        config.prefix.clone(),
        config.worker_count,
        completed_tx,
    );
    let reconciler = tokio::spawn(FilesystemReconciler::new(to_delete_rx, completed_rx).run());

    // 3. Leftovers of a previous run
    recover_staged(&config.staging_dir, &pipeline.queue(), config.recover_staged).await?;

    let state = AppState {
        stow: Arc::new(StowService::new(
            config.staging_dir.clone(),
            config.wado_url.clone(),
            pipeline.queue(),
            to_delete_tx,
        )),
        config: Arc::new(config.clone()),
    };

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    // 4. Serve
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("✅ Server ready at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 5. Drain: the router (and with it every request-side queue handle) is
    // gone, so the workers and the reconciler stop once their queues are empty.
    let pending = pipeline.queue().pending();
    info!("⏳ Draining {} pending uploads...", pending);
    let drain = async {
        pipeline.join().await;
        if let Err(e) = reconciler.await {
            error!("Reconciler task failed: {}", e);
        }
    };
    if tokio::time::timeout(config.shutdown_drain, drain).await.is_err() {
        warn!(
            "Drain did not finish within {:?}, staged files stay on disk",
            config.shutdown_drain
        );
    }

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
