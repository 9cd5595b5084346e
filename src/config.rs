//! Immutable startup configuration
//!
//! One [`GatewayConfig`] value is built at startup and cloned into every
//! connection task. Nothing in it is mutated after startup, so no locking is
//! required anywhere in the process.

use std::time::Duration;

use clap::ValueEnum;

/// Default listen port for incoming masters
pub const DEFAULT_LISTEN_PORT: u16 = 1502;

/// Default target host (the fixed slave endpoint)
pub const DEFAULT_TARGET_HOST: &str = "127.0.0.1";

/// Default target port
pub const DEFAULT_TARGET_PORT: u16 = 502;

/// Receive timeout on the accepted master socket
pub const MASTER_RECV_TIMEOUT: Duration = Duration::from_millis(3000);

/// Receive timeout on the dialed slave socket. Shorter than the master leg:
/// the serial bridge behind it answers within one poll cycle or not at all.
pub const SLAVE_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Idle window for the quiescence heuristic on length-less RTU frames.
/// Long enough to ride out TCP segmentation of one frame, short against
/// the inter-request gap of any realistic master.
pub const RTU_IDLE_WINDOW: Duration = Duration::from_millis(50);

/// Which framing the connecting masters speak.
///
/// Fixed for the process lifetime; the opposite framing is used on the
/// dialed slave leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    /// Masters speak Modbus TCP; the target is an RTU slave behind a TCP
    /// tunnel.
    #[value(name = "tcp")]
    TcpToRtu,
    /// Masters speak RTU over TCP; the target is a Modbus TCP slave.
    #[value(name = "rtu")]
    RtuToTcp,
}

/// Startup configuration shared (by clone) with every connection task
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Direction mode, fixed for the process lifetime
    pub direction: Direction,
    /// Port the supervisor listens on for masters
    pub listen_port: u16,
    /// Host of the single fixed slave target
    pub target_host: String,
    /// Port of the single fixed slave target
    pub target_port: u16,
    /// Receive timeout applied to the master socket
    pub master_timeout: Duration,
    /// Receive timeout applied to the dialed slave socket
    pub slave_timeout: Duration,
    /// Quiescence window for length-less RTU framing
    pub idle_window: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            direction: Direction::TcpToRtu,
            listen_port: DEFAULT_LISTEN_PORT,
            target_host: DEFAULT_TARGET_HOST.to_string(),
            target_port: DEFAULT_TARGET_PORT,
            master_timeout: MASTER_RECV_TIMEOUT,
            slave_timeout: SLAVE_RECV_TIMEOUT,
            idle_window: RTU_IDLE_WINDOW,
        }
    }
}

impl GatewayConfig {
    /// Dial address of the fixed slave target
    pub fn target_addr(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_contract() {
        let config = GatewayConfig::default();
        assert_eq!(config.direction, Direction::TcpToRtu);
        assert_eq!(config.listen_port, 1502);
        assert_eq!(config.target_addr(), "127.0.0.1:502");
    }

    #[test]
    fn test_rtu_leg_timeout_is_shorter() {
        let config = GatewayConfig::default();
        assert!(config.slave_timeout < config.master_timeout);
    }
}
