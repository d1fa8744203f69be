//! S7 session on top of the transport: Setup Communication negotiation
//! and strictly-alternating request/response exchange matched by PDU
//! reference.

use crate::error::{Error, Result};
use crate::frame::{build_job, data, Function, Pdu, PduType};
use crate::transport::{ConnectionState, Transport};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// Protocol floor for the negotiated PDU size; anything below is rejected.
pub const MIN_PDU_SIZE: u16 = 240;

/// PDU size requested during negotiation when the caller has no preference.
const DEFAULT_REQUESTED_PDU_SIZE: u16 = 480;

/// Responses whose reference does not match the outstanding request are
/// discarded as stale; give up after this many in a row.
const STALE_RESPONSE_BUDGET: u8 = 4;

/// One negotiated S7 session. Stateful only in the negotiated PDU size
/// and the PDU reference counter; request/response is strictly
/// alternating, so the session must not be shared without external
/// serialization.
#[derive(Debug)]
pub struct Session {
    transport: Transport,
    pdu_size: u16,
    next_ref: u16,
}

impl Session {
    /// Send the Setup Communication job and parse the negotiated PDU
    /// size. Sizes below [`MIN_PDU_SIZE`] are rejected as protocol
    /// errors; sizes above our request are clamped to it, since the PLC
    /// cannot grant more than was asked.
    pub fn negotiate(transport: Transport, preferred_pdu_size: Option<u16>) -> Result<Session> {
        let requested = preferred_pdu_size.unwrap_or(DEFAULT_REQUESTED_PDU_SIZE);
        let mut session = Session {
            transport,
            pdu_size: 0,
            next_ref: 0,
        };
        let pdu_ref = session.next_pdu_ref();
        let job = build_setup_request(pdu_ref, requested);
        let resp = session.exchange_raw(&job, pdu_ref)?;
        resp.validate_response()?;
        let negotiated = parse_setup_ack(&resp)?;
        if negotiated < MIN_PDU_SIZE {
            return Err(Error::Protocol {
                context: "negotiated PDU size below protocol floor",
            });
        }
        session.pdu_size = negotiated.min(requested);
        debug!(pdu_size = session.pdu_size, "S7 session negotiated");
        Ok(session)
    }

    /// Run one job built by `build` (handed the fresh PDU reference)
    /// through the connection and return its matching response.
    pub fn exchange(&mut self, build: impl FnOnce(u16) -> Result<Bytes>) -> Result<Pdu> {
        let pdu_ref = self.next_pdu_ref();
        let job = build(pdu_ref)?;
        self.exchange_raw(&job, pdu_ref)
    }

    fn exchange_raw(&mut self, job: &[u8], pdu_ref: u16) -> Result<Pdu> {
        self.transport.send_pdu(job)?;
        // Strict alternation makes a mismatched reference a late reply to
        // an earlier, timed-out request; drop it and keep reading.
        for _ in 0..STALE_RESPONSE_BUDGET {
            let raw = self.transport.recv_pdu()?;
            let pdu = Pdu::parse(&raw)?;
            if pdu.header.pdu_ref == pdu_ref {
                return Ok(pdu);
            }
            debug!(
                expected = pdu_ref,
                received = pdu.header.pdu_ref,
                "discarding stale response"
            );
        }
        Err(Error::Protocol {
            context: "no response matched the request reference",
        })
    }

    /// Next PDU reference, wrapping within [1..=65535].
    fn next_pdu_ref(&mut self) -> u16 {
        self.next_ref = match self.next_ref.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.next_ref
    }

    #[inline]
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    /// Per-request read payload capacity under the negotiated PDU size.
    #[inline]
    pub fn read_capacity(&self) -> u16 {
        data::read_capacity(self.pdu_size)
    }

    /// Per-request write payload capacity under the negotiated PDU size.
    #[inline]
    pub fn write_capacity(&self) -> u16 {
        data::write_capacity(self.pdu_size)
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Best-effort close of the underlying transport; idempotent.
    pub fn close(&mut self) {
        self.transport.close();
    }
}

fn build_setup_request(pdu_ref: u16, pdu_size: u16) -> Bytes {
    let mut param = BytesMut::with_capacity(8);
    param.put_u8(Function::SetupCommunication as u8);
    param.put_u8(0x00);
    // Max AMQ caller/callee of 1: this client never pipelines requests.
    param.put_u16(1);
    param.put_u16(1);
    param.put_u16(pdu_size);
    build_job(pdu_ref, &param, &[])
}

fn parse_setup_ack(pdu: &Pdu) -> Result<u16> {
    if pdu.header.pdu_type != PduType::AckData {
        return Err(Error::Protocol {
            context: "expected AckData for setup communication",
        });
    }
    let param = &pdu.param;
    if param.len() < 8 {
        return Err(Error::InsufficientData {
            needed: 8,
            available: param.len(),
        });
    }
    if param[0] != Function::SetupCommunication as u8 {
        return Err(Error::Protocol {
            context: "unexpected function in setup response",
        });
    }
    let pdu_size = u16::from_be_bytes([param[6], param[7]]);
    if pdu_size == 0 {
        return Err(Error::Protocol {
            context: "PDU size negotiation failed",
        });
    }
    Ok(pdu_size)
}
