//! # mbgate - Modbus TCP / RTU Gateway
//!
//! A bidirectional gateway between Modbus TCP masters and Modbus RTU devices
//! reachable over a TCP tunnel (serial device servers, RS485 bridges), built
//! on Tokio.
//!
//! ## Features
//!
//! - **Two directions**: TCP masters to an RTU slave, or RTU-over-TCP
//!   masters to a TCP slave
//! - **Stateless conversion**: MBAP header stripped/rebuilt, CRC-16 trailer
//!   verified/appended, the PDU itself never touched
//! - **Fixed buffers**: stack-allocated 260-byte frame buffers, reused
//!   across cycles, no per-frame allocation
//! - **Bounded shutdown**: every blocking read races a shared cancellation
//!   token, so Ctrl-C drains within one timeout interval
//! - **Memory Safe**: pure Rust, no unsafe code
//!
//! ## Framing conversions
//!
//! | Leg | Framing | Delimiting |
//! |-----|---------|------------|
//! | Modbus TCP | MBAP header + unit id + PDU | length field |
//! | Modbus RTU | unit id + PDU + CRC-16 | length estimate or quiescence |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mbgate::{GatewayConfig, GatewayServer};
//!
//! #[tokio::main]
//! async fn main() -> mbgate::GatewayResult<()> {
//!     // TCP masters on 1502, RTU slave tunnel at 127.0.0.1:502
//!     let server = GatewayServer::new(GatewayConfig::default());
//!
//!     let cancel = server.cancellation_token();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         cancel.cancel();
//!     });
//!
//!     server.run().await
//! }
//! ```

/// Core error types and result handling
pub mod error;

/// Immutable startup configuration and protocol timing defaults
pub mod config;

/// Modbus CRC-16 computation and trailer handling
pub mod checksum;

/// Frame layout constants, MBAP header and the response-length estimator
pub mod frame;

/// Incremental frame receivers over raw TCP sockets
pub mod reader;

/// The two per-connection conversion loops
pub mod convert;

/// Listener, per-connection task spawning and socket tuning
pub mod server;

// === Async runtime (users can use mbgate::tokio) ===
pub use tokio;

// === Core API ===
pub use config::{Direction, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use server::GatewayServer;

// === Frame handling (advanced usage) ===
pub use checksum::{append_crc, crc16, verify_crc, CRC_LEN};
pub use frame::{expected_pdu_len, MbapHeader, MAX_FRAME_SIZE, MAX_PDU_SIZE, MBAP_HEADER_LEN};

// === Protocol defaults ===
pub use config::{DEFAULT_LISTEN_PORT, DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
