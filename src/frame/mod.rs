//! Wire frames for ISO-on-TCP transport of S7comm: TPKT headers, the COTP
//! TPDU subset needed for a connection-oriented client, TSAP selectors and
//! the S7 PDU container with its data-block read/write codec.

pub mod cotp;
pub mod data;
pub mod pdu;
pub mod tpkt;
pub mod tsap;

pub use cotp::{ConnectParams, Cotp, DataParams, DisconnectParams, COTP_DATA_HEADER_LEN};
pub use pdu::{build_job, Function, Header, Pdu, PduType};
pub use tpkt::{Tpkt, TPKT_HEADER_LEN};
pub use tsap::{rack_slot_tsap_pair, Tsap, TsapPair};

use crate::error::Result;
use bytes::BufMut;

/// Wire encoding into a growable byte buffer.
pub trait WireEncode {
    fn encoded_len(&self) -> usize;
    fn encode_to<B: BufMut>(&self, dst: &mut B) -> Result<()>;
}

/// Wire decoding from a byte slice. Returns the unconsumed remainder
/// alongside the decoded value.
pub trait WireDecode: Sized {
    fn parse(input: &[u8]) -> Result<(&[u8], Self)>;
}
