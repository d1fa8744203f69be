//! Synchronous Siemens S7 data-block client over ISO-on-TCP (RFC 1006).
//!
//! The crate covers the core of talking to an S7 CPU about its data
//! blocks: the TPKT/COTP transport connection, S7 PDU size negotiation,
//! single-item Read Var / Write Var framing for the DB area, and bounds-
//! checked bit/string accessors over the raw buffers a read returns.
//!
//! Everything blocks the calling thread; one connection serves one PLC
//! and exchanges strictly one request at a time. Callers needing several
//! PLCs open one client each.
//!
//! ```no_run
//! use s7db::{fields, S7Client};
//! use std::time::Duration;
//!
//! # fn main() -> s7db::Result<()> {
//! let mut client =
//!     S7Client::connect_rack_slot("192.168.0.10", 0, 1, Duration::from_secs(3))?;
//! let buffer = client.read_db(1, 0, 32)?;
//! let running = fields::get_bit(&buffer, 0, 0)?;
//! let label = fields::get_fixed_text(&buffer, 2, 8)?;
//! println!("running={} label={:?}", running, fields::trim_field_text(&label));
//!
//! let mut heartbeat = vec![0u8; 31];
//! fields::set_bit(&mut heartbeat, 30, 1, true)?;
//! client.write_db(2, 0, &heartbeat)?;
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod fields;
pub mod frame;
pub mod retry;
pub mod session;
pub mod transport;

pub use client::{ClientConfig, S7Client, TsapConfig};
pub use error::{Error, HeaderError, Result, ReturnCode};
pub use retry::{connect_with_retry, RetryPolicy};
pub use session::MIN_PDU_SIZE;
pub use transport::ConnectionState;
