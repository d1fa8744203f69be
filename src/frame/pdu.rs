use crate::error::{Error, HeaderError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// S7 protocol identifier, first byte of every S7 PDU
pub const S7_PROTOCOL_ID: u8 = 0x32;

/// Fixed S7 header length for Job PDUs (Ack/AckData carry 2 extra bytes)
const JOB_HEADER_LEN: usize = 10;

/// S7 PDU kinds handled by this client
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    Job = 0x01,
    Ack = 0x02,
    AckData = 0x03,
}

impl TryFrom<u8> for PduType {
    type Error = ();

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0x01 => Ok(PduType::Job),
            0x02 => Ok(PduType::Ack),
            0x03 => Ok(PduType::AckData),
            _ => Err(()),
        }
    }
}

/// S7 function codes used by a data-block client
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    ReadVar = 0x04,
    WriteVar = 0x05,
    SetupCommunication = 0xF0,
}

/// S7 PDU header. The reserved word is always written as zero; Ack and
/// AckData headers additionally carry a 2-byte error class/code pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub pdu_type: PduType,
    /// Reference used to match a response to its request on a connection
    pub pdu_ref: u16,
    pub param_len: u16,
    pub data_len: u16,
    pub error: Option<HeaderError>,
}

impl Header {
    /// Parse an S7 header, returning it with the bytes that follow.
    pub fn parse(input: &[u8]) -> Result<(Header, &[u8])> {
        if input.len() < JOB_HEADER_LEN {
            return Err(Error::InsufficientData {
                needed: JOB_HEADER_LEN,
                available: input.len(),
            });
        }
        if input[0] != S7_PROTOCOL_ID {
            return Err(Error::Protocol {
                context: "not an S7 PDU",
            });
        }
        let pdu_type = PduType::try_from(input[1]).map_err(|_| Error::Protocol {
            context: "unsupported S7 PDU type",
        })?;
        let pdu_ref = u16::from_be_bytes([input[4], input[5]]);
        let param_len = u16::from_be_bytes([input[6], input[7]]);
        let data_len = u16::from_be_bytes([input[8], input[9]]);

        let mut rest = &input[JOB_HEADER_LEN..];
        let error = match pdu_type {
            PduType::Ack | PduType::AckData => {
                if rest.len() < 2 {
                    return Err(Error::InsufficientData {
                        needed: 2,
                        available: rest.len(),
                    });
                }
                let code = u16::from_be_bytes([rest[0], rest[1]]);
                rest = &rest[2..];
                Some(HeaderError::from(code))
            }
            PduType::Job => None,
        };

        Ok((
            Header {
                pdu_type,
                pdu_ref,
                param_len,
                data_len,
                error,
            },
            rest,
        ))
    }

    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(S7_PROTOCOL_ID);
        dst.put_u8(self.pdu_type as u8);
        dst.put_u16(0x0000);
        dst.put_u16(self.pdu_ref);
        dst.put_u16(self.param_len);
        dst.put_u16(self.data_len);
        if matches!(self.pdu_type, PduType::Ack | PduType::AckData) {
            dst.put_u16(self.error.map(u16::from).unwrap_or(0));
        }
    }
}

/// S7 PDU container: header plus raw parameter and data sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub header: Header,
    pub param: Bytes,
    pub data: Bytes,
}

impl Pdu {
    /// Parse a complete S7 PDU from the bytes carried in a COTP Data TPDU.
    /// Trailing bytes beyond the declared section lengths are tolerated.
    pub fn parse(input: &[u8]) -> Result<Pdu> {
        let (header, rest) = Header::parse(input)?;
        let need = header.param_len as usize + header.data_len as usize;
        if rest.len() < need {
            return Err(Error::InsufficientData {
                needed: need,
                available: rest.len(),
            });
        }
        let (param, tail) = rest.split_at(header.param_len as usize);
        let data = &tail[..header.data_len as usize];
        Ok(Pdu {
            header,
            param: Bytes::copy_from_slice(param),
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Check the header-level acknowledgement of an Ack/AckData PDU;
    /// a non-success code surfaces as [`Error::PlcHeader`].
    pub fn validate_response(&self) -> Result<()> {
        if matches!(self.header.pdu_type, PduType::Ack | PduType::AckData) {
            if let Some(code) = self.header.error {
                if code != HeaderError::NoError {
                    return Err(Error::PlcHeader { code });
                }
            }
        }
        Ok(())
    }
}

/// Assemble a Job PDU from raw parameter and data sections.
pub fn build_job(pdu_ref: u16, param: &[u8], data: &[u8]) -> Bytes {
    let header = Header {
        pdu_type: PduType::Job,
        pdu_ref,
        param_len: param.len() as u16,
        data_len: data.len() as u16,
        error: None,
    };
    let mut buf = BytesMut::with_capacity(JOB_HEADER_LEN + param.len() + data.len());
    header.encode_to(&mut buf);
    buf.put_slice(param);
    buf.put_slice(data);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_header_round_trip() {
        let raw = build_job(0x0102, &[0x04, 0x01], &[0xAA]);
        let pdu = Pdu::parse(&raw).unwrap();
        assert_eq!(pdu.header.pdu_type, PduType::Job);
        assert_eq!(pdu.header.pdu_ref, 0x0102);
        assert_eq!(&pdu.param[..], &[0x04, 0x01]);
        assert_eq!(&pdu.data[..], &[0xAA]);
    }

    #[test]
    fn ack_data_header_carries_error_code() {
        let raw = [
            0x32, 0x03, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x81, 0x04,
        ];
        let pdu = Pdu::parse(&raw).unwrap();
        assert_eq!(pdu.header.error, Some(HeaderError::ServiceNotImplemented));
        assert!(matches!(
            pdu.validate_response(),
            Err(Error::PlcHeader {
                code: HeaderError::ServiceNotImplemented
            })
        ));
    }

    #[test]
    fn successful_ack_data_validates() {
        let raw = [
            0x32, 0x03, 0x00, 0x00, 0x00, 0x07, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x05, 0x01,
        ];
        let pdu = Pdu::parse(&raw).unwrap();
        assert_eq!(pdu.header.error, Some(HeaderError::NoError));
        assert!(pdu.validate_response().is_ok());
        assert_eq!(&pdu.param[..], &[0x05, 0x01]);
    }

    #[test]
    fn unknown_header_codes_are_preserved() {
        let raw = [
            0x32, 0x03, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0xBE, 0xEF,
        ];
        let pdu = Pdu::parse(&raw).unwrap();
        assert!(matches!(
            pdu.validate_response(),
            Err(Error::PlcHeader {
                code: HeaderError::Unknown(0xBEEF)
            })
        ));
    }

    #[test]
    fn rejects_foreign_protocol_id() {
        let raw = [0x33, 0x01, 0, 0, 0, 1, 0, 0, 0, 0];
        assert!(matches!(
            Pdu::parse(&raw),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn truncated_sections_are_insufficient_data() {
        // Declares 4 param bytes but carries none.
        let raw = [0x32, 0x01, 0, 0, 0, 1, 0, 4, 0, 0];
        assert!(matches!(
            Pdu::parse(&raw),
            Err(Error::InsufficientData { .. })
        ));
    }
}
