#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use futures::Stream;
use ordermgt_core::proto::{FILE_DESCRIPTOR_SET, order_management_server::OrderManagementServer};
use server::config::{CliArgs, ServerConfig};
use server::service::handler::OrderService;
use server::telemetry::{TelemetryProviders, init_telemetry};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServerConfig::try_from(CliArgs::parse())?;
    let providers = init_telemetry()?;

    if config.uds {
        serve_uds(config, providers).await
    } else {
        serve_tcp(config, providers).await
    }
}

async fn serve_tcp(config: ServerConfig, providers: TelemetryProviders) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "Listening on TCP");

    serve(TcpListenerStream::new(listener), config, providers).await
}

#[cfg(unix)]
async fn serve_uds(config: ServerConfig, providers: TelemetryProviders) -> anyhow::Result<()> {
    use std::os::unix::fs::FileTypeExt;
    use std::path::PathBuf;
    use tokio::net::UnixListener;
    use tokio_stream::wrappers::UnixListenerStream;

    let path = PathBuf::from(&config.server_addr);
    // A socket left behind by an unclean exit would make the bind fail.
    if std::fs::symlink_metadata(&path).is_ok_and(|meta| meta.file_type().is_socket()) {
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("failed to bind {}", path.display()))?;
    tracing::info!(path = %path.display(), "Listening on Unix socket");

    let result = serve(UnixListenerStream::new(listener), config, providers).await;
    if let Err(e) = std::fs::remove_file(&path) {
        tracing::debug!("Socket file not removed: {e}");
    }
    result
}

#[cfg(not(unix))]
async fn serve_uds(_config: ServerConfig, _providers: TelemetryProviders) -> anyhow::Result<()> {
    anyhow::bail!("Unix domain sockets are not supported on this platform")
}

/// Serves the order service plus health and reflection on `incoming` until a
/// shutdown signal arrives.
async fn serve<I, IO, IE>(
    incoming: I,
    config: ServerConfig,
    providers: TelemetryProviders,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    tracing::debug!("Server config: {config:#?}");
    tracing::info!(
        batch_size = config.batch_size.get(),
        stream_buffer = config.stream_buffer_size,
        shutdown_timeout = ?config.shutdown_timeout,
        "Order service ready"
    );

    let service = OrderService::new(config);

    let (health, health_service) = tonic_health::server::health_reporter();
    health
        .set_serving::<OrderManagementServer<OrderService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let web = ServiceBuilder::new()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(GrpcWebLayer::new());

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(web)
        .add_service(health_service)
        .add_service(reflection)
        .add_service(with_compression(OrderManagementServer::new(service.clone())))
        .serve_with_incoming_shutdown(incoming, async move {
            let signal = wait_for_signal().await;
            tracing::info!(signal, "Shutting down");
            shut_down(service, health, providers).await;
        })
        .await?;

    tracing::info!("Order service stopped");
    Ok(())
}

fn with_compression(
    server: OrderManagementServer<OrderService>,
) -> OrderManagementServer<OrderService> {
    [
        CompressionEncoding::Zstd,
        CompressionEncoding::Gzip,
        CompressionEncoding::Deflate,
    ]
    .into_iter()
    .fold(server, |server, encoding| {
        server.send_compressed(encoding).accept_compressed(encoding)
    })
}

/// Resolves with the name of the first termination signal received.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Ctrl+C handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "ctrl-c",
        () = terminate => "sigterm",
    }
}

async fn shut_down(service: OrderService, health: HealthReporter, providers: TelemetryProviders) {
    health
        .set_not_serving::<OrderManagementServer<OrderService>>()
        .await;

    // Refuses new calls, drains, then cancels whatever is still streaming.
    service.shutdown().await;

    providers.shutdown();
}
