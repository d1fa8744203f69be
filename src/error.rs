use std::io;
use std::result::Result as StdResult;
use thiserror::Error as ThisError;

/// Unified crate result type
pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    /// TCP or COTP handshake failure while establishing the connection.
    #[error("connect error: {context}")]
    Connect {
        context: &'static str,
        #[source]
        source: Option<io::Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No response within the socket deadline. The connection is left open
    /// but must be considered unreliable; reconnecting is the caller's call.
    #[error("no response within deadline")]
    Timeout,

    #[error("protocol error: {context}")]
    Protocol { context: &'static str },

    /// Input does not have enough bytes to complete the operation
    #[error("insufficient data: needed {needed} bytes, available {available} bytes")]
    InsufficientData { needed: usize, available: usize },

    #[error("cannot use a closed connection")]
    ClosedConnection,

    /// Negative acknowledgement in the S7 response header.
    ///
    /// Callers can match on the contained `HeaderError` to make
    /// fine-grained decisions; unrecognized codes are preserved exactly.
    #[error("PLC error in response header: {code:?}")]
    PlcHeader { code: HeaderError },

    /// Per-item negative acknowledgement reported by the PLC
    /// (e.g. address out of range, data block missing).
    #[error("PLC rejected item: {code:?}")]
    PlcItem { code: ReturnCode },

    /// Caller-supplied request violates a precondition (zero length,
    /// oversized for the negotiated PDU, mismatched buffer length).
    #[error("validation error: {context}")]
    Validation { context: &'static str },

    /// Field accessor offset outside the buffer.
    #[error("offset out of range: byte {byte}.{bit} in a {len}-byte buffer")]
    OutOfRange { byte: usize, bit: u8, len: usize },

    #[error("rack value {0} is out of range (0..=15)")]
    InvalidRack(u8),

    #[error("slot value {0} is out of range (0..=15)")]
    InvalidSlot(u8),
}

/// Error class/code pair carried in the header of Ack/AckData PDUs.
///
/// Only the codes commonly reported by S7-300/400/1200/1500 CPUs are named;
/// everything else is preserved verbatim in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    NoError,
    /// 0x0110
    InvalidBlockNumber,
    /// 0x0111
    InvalidRequestLength,
    /// 0x0112
    InvalidParams,
    /// 0x0114
    BlockNotFound,
    /// 0x8001
    ServiceNotAllowed,
    /// 0x8104
    ServiceNotImplemented,
    /// 0x8500
    FrameError,
    /// 0x8701
    AddressingError,
    /// 0x8702
    ServiceNotSupported,
    /// 0x8703
    AccessDenied,
    Unknown(u16),
}

impl From<u16> for HeaderError {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => HeaderError::NoError,
            0x0110 => HeaderError::InvalidBlockNumber,
            0x0111 => HeaderError::InvalidRequestLength,
            0x0112 => HeaderError::InvalidParams,
            0x0114 => HeaderError::BlockNotFound,
            0x8001 => HeaderError::ServiceNotAllowed,
            0x8104 => HeaderError::ServiceNotImplemented,
            0x8500 => HeaderError::FrameError,
            0x8701 => HeaderError::AddressingError,
            0x8702 => HeaderError::ServiceNotSupported,
            0x8703 => HeaderError::AccessDenied,
            other => HeaderError::Unknown(other),
        }
    }
}

impl From<HeaderError> for u16 {
    fn from(value: HeaderError) -> Self {
        match value {
            HeaderError::NoError => 0x0000,
            HeaderError::InvalidBlockNumber => 0x0110,
            HeaderError::InvalidRequestLength => 0x0111,
            HeaderError::InvalidParams => 0x0112,
            HeaderError::BlockNotFound => 0x0114,
            HeaderError::ServiceNotAllowed => 0x8001,
            HeaderError::ServiceNotImplemented => 0x8104,
            HeaderError::FrameError => 0x8500,
            HeaderError::AddressingError => 0x8701,
            HeaderError::ServiceNotSupported => 0x8702,
            HeaderError::AccessDenied => 0x8703,
            HeaderError::Unknown(v) => v,
        }
    }
}

/// Return code present in data items of AckData PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Reserved,
    Success,
    HardwareFault,
    AccessDenied,
    AddressOutOfRange,
    DataTypeNotSupported,
    DataTypeInconsistent,
    ObjectDoesNotExist,
    ObjectNotAvailable,
    Unknown(u8),
}

impl From<u8> for ReturnCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ReturnCode::Reserved,
            0xFF => ReturnCode::Success,
            0x01 => ReturnCode::HardwareFault,
            0x03 => ReturnCode::AccessDenied,
            0x05 => ReturnCode::AddressOutOfRange,
            0x06 => ReturnCode::DataTypeNotSupported,
            0x07 => ReturnCode::DataTypeInconsistent,
            0x0A => ReturnCode::ObjectDoesNotExist,
            0x0B => ReturnCode::ObjectNotAvailable,
            other => ReturnCode::Unknown(other),
        }
    }
}

impl From<ReturnCode> for u8 {
    fn from(value: ReturnCode) -> Self {
        match value {
            ReturnCode::Reserved => 0x00,
            ReturnCode::Success => 0xFF,
            ReturnCode::HardwareFault => 0x01,
            ReturnCode::AccessDenied => 0x03,
            ReturnCode::AddressOutOfRange => 0x05,
            ReturnCode::DataTypeNotSupported => 0x06,
            ReturnCode::DataTypeInconsistent => 0x07,
            ReturnCode::ObjectDoesNotExist => 0x0A,
            ReturnCode::ObjectNotAvailable => 0x0B,
            ReturnCode::Unknown(v) => v,
        }
    }
}
