use anyhow::bail;
use clap::Parser;
use core::{num::NonZeroUsize, time::Duration};
use ordermgt_core::DEFAULT_BATCH_SIZE;

/// Runtime configuration for the `ordermgt-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults matching the reference deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ordermgt-server",
    version,
    about = "A gRPC order management service with streaming shipment consolidation"
)]
pub struct CliArgs {
    /// Number of processed order identifiers that triggers a shipment flush
    /// on a `ProcessOrders` stream.
    ///
    /// Environment variable: `ORDER_BATCH_SIZE`
    #[arg(long, env = "ORDER_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Capacity of the response buffer between a stream handler and the gRPC
    /// response stream.
    ///
    /// Lower values make a slow client push back on the handler sooner.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds in-flight streams get to finish once shutdown begins. Streams
    /// still running afterwards are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Seed the store with the five sample orders (102-106) on startup.
    ///
    /// Environment variable: `SEED_SAMPLE_DATA`
    #[arg(long, env = "SEED_SAMPLE_DATA", default_value_t = true, action = clap::ArgAction::Set)]
    pub seed_sample_data: bool,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/ordermgt.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub batch_size: NonZeroUsize,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub seed_sample_data: bool,
    pub server_addr: String,
    pub uds: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            stream_buffer_size: 8,
            shutdown_timeout: Duration::from_secs(3),
            seed_sample_data: true,
            server_addr: String::from("0.0.0.0:50051"),
            uds: false,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let Some(batch_size) = NonZeroUsize::new(args.batch_size) else {
            bail!("ORDER_BATCH_SIZE must be greater than 0");
        };

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.server_addr.trim().is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }

        Ok(Self {
            batch_size,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            seed_sample_data: args.seed_sample_data,
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}
