//! Connection supervisor
//!
//! Accepts master connections, dials the fixed slave target for each, tunes
//! both sockets and hands the pair to a converter task. One task per pair:
//! a failing pair takes only itself down. The accept loop and every
//! converter observe the same cancellation token, so shutdown latency is
//! bounded by roughly one receive-timeout interval.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Direction, GatewayConfig};
use crate::convert::{run_rtu_to_tcp, run_tcp_to_rtu};
use crate::error::{GatewayError, GatewayResult};

/// Idle time before the first keepalive probe. Well below the kernel
/// default of two hours so dead serial bridges are noticed.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Interval between keepalive probes once the idle threshold passed
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// The gateway's listening endpoint and per-connection spawner
pub struct GatewayServer {
    config: GatewayConfig,
    cancel: CancellationToken,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by the accept loop and every connection task.
    /// Cancelling it once shuts the whole process down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bind the configured listen port.
    pub async fn bind(&self) -> GatewayResult<TcpListener> {
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.listen_port))
            .await
            .map_err(|e| {
                GatewayError::Raw(format!(
                    "bind failed on port {}: {e}",
                    self.config.listen_port
                ))
            })
    }

    /// Bind and serve until the cancellation token fires.
    pub async fn run(&self) -> GatewayResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept masters on `listener`, dialing the fixed target for each.
    pub async fn serve(&self, listener: TcpListener) -> GatewayResult<()> {
        match self.config.direction {
            Direction::TcpToRtu => info!("mode: TCP <-> RTU over TCP"),
            Direction::RtuToTcp => info!("mode: RTU over TCP <-> TCP"),
        }
        info!(
            "listening on {}, target {}",
            listener.local_addr().map_err(GatewayError::from)?,
            self.config.target_addr()
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("shutdown requested, accept loop terminating");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((master, peer)) => {
                        let config = self.config.clone();
                        let cancel = self.cancel.clone();
                        tokio::spawn(handle_connection(master, peer, config, cancel));
                    }
                    Err(err) => error!("accept failed: {err}"),
                },
            }
        }
        Ok(())
    }
}

/// Dial the slave target and run one converter to completion.
async fn handle_connection(
    master: TcpStream,
    peer: SocketAddr,
    config: GatewayConfig,
    cancel: CancellationToken,
) {
    info!("new master connected: {peer}");

    if let Err(err) = tune_socket(&master) {
        warn!("socket setup failed on master leg: {err}");
    }

    let slave = match TcpStream::connect(config.target_addr()).await {
        Ok(stream) => stream,
        Err(err) => {
            // No retry at this layer: the master sees the close and decides
            // for itself.
            error!("failed to dial target {}: {err}", config.target_addr());
            return;
        }
    };
    if let Err(err) = tune_socket(&slave) {
        warn!("socket setup failed on slave leg: {err}");
    }

    match config.direction {
        Direction::TcpToRtu => run_tcp_to_rtu(master, slave, config, cancel).await,
        Direction::RtuToTcp => run_rtu_to_tcp(master, slave, config, cancel).await,
    }

    info!("connection closed: {peer}");
}

/// Keepalive with reduced thresholds plus Nagle off; single Modbus frames
/// must not wait for coalescing.
fn tune_socket(stream: &TcpStream) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    stream.set_nodelay(true)
}
