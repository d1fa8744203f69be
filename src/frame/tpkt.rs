use crate::error::{Error, Result};
use bytes::BufMut;

/// TPKT (RFC1006) header length in bytes
pub const TPKT_HEADER_LEN: usize = 4;

const TPKT_VERSION: u8 = 0x03;

/// TPKT (RFC1006) header. On the wire: version, reserved, total length
/// (big-endian, including the 4 header bytes). Version and reserved are
/// fixed for RFC1006 so only the length is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tpkt {
    length: u16,
}

impl Tpkt {
    /// Build a header for a frame carrying `payload_len` bytes after the
    /// TPKT header (COTP TPDU plus any S7 bytes).
    pub fn for_payload(payload_len: usize) -> Result<Self> {
        let total = payload_len + TPKT_HEADER_LEN;
        if total > u16::MAX as usize {
            return Err(Error::Validation {
                context: "frame exceeds TPKT length field",
            });
        }
        Ok(Self {
            length: total as u16,
        })
    }

    /// Parse and validate a TPKT header read off the socket.
    pub fn parse(hdr: &[u8; TPKT_HEADER_LEN]) -> Result<Self> {
        if hdr[0] != TPKT_VERSION || hdr[1] != 0x00 {
            return Err(Error::Protocol {
                context: "invalid TPKT header",
            });
        }
        let length = u16::from_be_bytes([hdr[2], hdr[3]]);
        if (length as usize) < TPKT_HEADER_LEN {
            return Err(Error::Protocol {
                context: "invalid TPKT length",
            });
        }
        Ok(Self { length })
    }

    /// Number of bytes following the header in this frame.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.length as usize - TPKT_HEADER_LEN
    }

    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(TPKT_VERSION);
        dst.put_u8(0x00);
        dst.put_u16(self.length);
    }
}
