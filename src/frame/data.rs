//! Data-block Read Var / Write Var codec.
//!
//! Requests address the DB memory area with byte granularity through a
//! single S7ANY item per PDU. The encoders enforce the request invariants
//! (non-zero length, within the negotiated PDU capacity, addressable
//! offset); splitting an oversized transfer into several requests is the
//! caller's job.

use super::pdu::{build_job, Function, Pdu, PduType};
use crate::error::{Error, Result, ReturnCode};
use bytes::{BufMut, Bytes, BytesMut};
use nom::number::complete::{be_u16, u8 as nom_u8};

/// DB memory area code in S7ANY addressing
const AREA_DB: u8 = 0x84;

/// S7ANY syntax identifier
const SYNTAX_S7ANY: u8 = 0x10;

/// Byte transport size in S7ANY var specifications
const TRANSPORT_BYTE: u8 = 0x02;

/// Encoded length of one S7ANY var specification including its item tag
const VAR_SPEC_LEN: usize = 12;

/// Largest byte offset expressible in the 24-bit S7ANY bit address
const MAX_BYTE_OFFSET: u32 = (1 << 21) - 1;

/// S7 ack header (12) + ReadVar param (2) + data item header (4): wire
/// overhead of a single-item read response within the negotiated PDU.
const READ_RESPONSE_OVERHEAD: u16 = 18;

/// S7 job header (10) + WriteVar param (14) + data item header (4): wire
/// overhead of a single-item write request within the negotiated PDU.
const WRITE_REQUEST_OVERHEAD: u16 = 28;

/// Maximum data payload of a single read request under `pdu_size`.
#[inline]
pub fn read_capacity(pdu_size: u16) -> u16 {
    pdu_size.saturating_sub(READ_RESPONSE_OVERHEAD)
}

/// Maximum data payload of a single write request under `pdu_size`.
#[inline]
pub fn write_capacity(pdu_size: u16) -> u16 {
    pdu_size.saturating_sub(WRITE_REQUEST_OVERHEAD)
}

/// Transport size tag carried by response data items. The length field
/// semantics (bits vs bytes) depend on this tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataTransport {
    /// No data (error items)
    Null = 0x00,
    /// Bit access, length in bytes
    Bit = 0x03,
    /// Byte/Word/DWord access, length in bits
    ByteWordDWord = 0x04,
    /// Integer access, length in bits
    Integer = 0x05,
    /// DInteger access, length in bytes
    DInteger = 0x06,
    /// Real access, length in bytes
    Real = 0x07,
    /// Octet string, length in bytes
    OctetString = 0x09,
}

impl TryFrom<u8> for DataTransport {
    type Error = ();

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match v {
            0x00 => DataTransport::Null,
            0x03 => DataTransport::Bit,
            0x04 => DataTransport::ByteWordDWord,
            0x05 => DataTransport::Integer,
            0x06 => DataTransport::DInteger,
            0x07 => DataTransport::Real,
            0x09 => DataTransport::OctetString,
            _ => return Err(()),
        })
    }
}

impl DataTransport {
    fn len_in_bytes(self, len_field: u16) -> usize {
        match self {
            DataTransport::Null | DataTransport::ByteWordDWord | DataTransport::Integer => {
                len_field as usize / 8
            }
            DataTransport::Bit
            | DataTransport::DInteger
            | DataTransport::Real
            | DataTransport::OctetString => len_field as usize,
        }
    }
}

/// Build a Read Var job for `len` bytes of data block `db` at byte offset
/// `start`. `capacity` is the negotiated per-request payload limit.
pub fn encode_read_request(
    pdu_ref: u16,
    db: u16,
    start: u32,
    len: u16,
    capacity: u16,
) -> Result<Bytes> {
    validate_request(start, len as usize, capacity)?;
    let mut param = BytesMut::with_capacity(2 + VAR_SPEC_LEN);
    param.put_u8(Function::ReadVar as u8);
    param.put_u8(1);
    encode_db_item(&mut param, db, start, len);
    Ok(build_job(pdu_ref, &param, &[]))
}

/// Build a Write Var job carrying `data` for data block `db` at byte
/// offset `start`. The item length equals the buffer length exactly.
pub fn encode_write_request(
    pdu_ref: u16,
    db: u16,
    start: u32,
    data: &[u8],
    capacity: u16,
) -> Result<Bytes> {
    validate_request(start, data.len(), capacity)?;
    let len = data.len() as u16;
    let mut param = BytesMut::with_capacity(2 + VAR_SPEC_LEN);
    param.put_u8(Function::WriteVar as u8);
    param.put_u8(1);
    encode_db_item(&mut param, db, start, len);

    let mut payload = BytesMut::with_capacity(4 + data.len());
    payload.put_u8(0x00);
    payload.put_u8(DataTransport::ByteWordDWord as u8);
    payload.put_u16((data.len() as u32 * 8) as u16);
    payload.put_slice(data);

    Ok(build_job(pdu_ref, &param, &payload))
}

/// Extract the payload of a single-item Read Var response. A non-success
/// item return code surfaces as [`Error::PlcItem`] with the PLC-reported
/// code preserved exactly.
pub fn decode_read_response(pdu: &Pdu) -> Result<Bytes> {
    pdu.validate_response()?;
    expect_single_item(pdu, Function::ReadVar)?;
    let (_rest, item) = parse_data_item(&pdu.data)?;
    match item.return_code {
        ReturnCode::Success => Ok(Bytes::copy_from_slice(item.data)),
        code => Err(Error::PlcItem { code }),
    }
}

/// Check the status item of a Write Var response.
pub fn decode_write_response(pdu: &Pdu) -> Result<()> {
    pdu.validate_response()?;
    expect_single_item(pdu, Function::WriteVar)?;
    let rc = *pdu.data.first().ok_or(Error::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    match ReturnCode::from(rc) {
        ReturnCode::Success => Ok(()),
        code => Err(Error::PlcItem { code }),
    }
}

fn validate_request(start: u32, len: usize, capacity: u16) -> Result<()> {
    if len == 0 {
        return Err(Error::Validation {
            context: "zero-length data block request",
        });
    }
    if len > capacity as usize {
        return Err(Error::Validation {
            context: "request exceeds negotiated PDU capacity",
        });
    }
    if start > MAX_BYTE_OFFSET {
        return Err(Error::Validation {
            context: "start offset exceeds addressable range",
        });
    }
    Ok(())
}

fn encode_db_item<B: BufMut>(dst: &mut B, db: u16, start: u32, len: u16) {
    dst.put_u8(0x12); // variable specification
    dst.put_u8(0x0A); // length of the addressing block
    dst.put_u8(SYNTAX_S7ANY);
    dst.put_u8(TRANSPORT_BYTE);
    dst.put_u16(len);
    dst.put_u16(db);
    dst.put_u8(AREA_DB);
    // 24-bit bit address: byte offset shifted by the 3 bit-index bits
    let bit_addr = start << 3;
    dst.put_u8((bit_addr >> 16) as u8);
    dst.put_u8((bit_addr >> 8) as u8);
    dst.put_u8(bit_addr as u8);
}

fn expect_single_item(pdu: &Pdu, function: Function) -> Result<()> {
    if pdu.header.pdu_type != PduType::AckData {
        return Err(Error::Protocol {
            context: "expected AckData response",
        });
    }
    let param = &pdu.param;
    if param.len() < 2 {
        return Err(Error::InsufficientData {
            needed: 2,
            available: param.len(),
        });
    }
    if param[0] != function as u8 {
        return Err(Error::Protocol {
            context: "response function code mismatch",
        });
    }
    if param[1] != 1 {
        return Err(Error::Protocol {
            context: "unexpected item count in response",
        });
    }
    Ok(())
}

struct DataItem<'a> {
    return_code: ReturnCode,
    data: &'a [u8],
}

fn parse_data_item(input: &[u8]) -> Result<(&[u8], DataItem<'_>)> {
    let (i, rc) = nom_u8::<_, nom::error::Error<&[u8]>>(input).map_err(|_| Error::Protocol {
        context: "truncated data item",
    })?;
    let return_code = ReturnCode::from(rc);
    let (i, ts) = nom_u8::<_, nom::error::Error<&[u8]>>(i).map_err(|_| Error::Protocol {
        context: "truncated data item",
    })?;
    let transport = DataTransport::try_from(ts).map_err(|_| Error::Protocol {
        context: "unknown transport size in data item",
    })?;
    let (i, len_field) = be_u16::<_, nom::error::Error<&[u8]>>(i).map_err(|_| Error::Protocol {
        context: "truncated data item",
    })?;
    let data_len = transport.len_in_bytes(len_field);
    if i.len() < data_len {
        return Err(Error::InsufficientData {
            needed: data_len,
            available: i.len(),
        });
    }
    let (data, rest) = i.split_at(data_len);
    Ok((rest, DataItem { return_code, data }))
}
