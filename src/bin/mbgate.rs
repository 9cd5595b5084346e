//! Gateway daemon entry point
//!
//! All arguments are positional and optional, so `mbgate` alone runs a
//! TCP-to-RTU gateway on 1502 targeting 127.0.0.1:502.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mbgate::{
    Direction, GatewayConfig, GatewayResult, GatewayServer, DEFAULT_LISTEN_PORT,
    DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT,
};

#[derive(Parser, Debug)]
#[command(name = "mbgate", version, about = "Modbus TCP / RTU over TCP gateway")]
struct Args {
    /// Framing spoken by connecting masters: "tcp" or "rtu"
    #[arg(value_enum, default_value = "tcp")]
    mode: Direction,

    /// Port to listen on for masters
    #[arg(default_value_t = DEFAULT_LISTEN_PORT)]
    listen_port: u16,

    /// Host of the slave target
    #[arg(default_value = DEFAULT_TARGET_HOST)]
    target_host: String,

    /// Port of the slave target
    #[arg(default_value_t = DEFAULT_TARGET_PORT)]
    target_port: u16,
}

#[tokio::main]
async fn main() -> GatewayResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = GatewayConfig {
        direction: args.mode,
        listen_port: args.listen_port,
        target_host: args.target_host,
        target_port: args.target_port,
        ..GatewayConfig::default()
    };

    info!("mbgate v{} starting", mbgate::VERSION);

    let server = GatewayServer::new(config);
    let cancel = server.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(err) => error!("failed to listen for interrupt: {err}"),
        }
        cancel.cancel();
    });

    server.run().await
}
