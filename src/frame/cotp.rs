use super::{WireDecode, WireEncode};
use crate::error::{Error, Result};
use bytes::BufMut;

/// Fixed overhead of a COTP Data TPDU: LI(1) + type(1) + EOT/number(1)
pub const COTP_DATA_HEADER_LEN: usize = 3;

/// TPDU size code requested in CR: 2^10 = 1024 bytes
const DEFAULT_TPDU_SIZE_CODE: u8 = 0x0A;

/// COTP TPDU type codes (subset sufficient for ISO-on-TCP + S7)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CotpType {
    /// Connection Request
    Cr = 0xE0,
    /// Connection Confirm
    Cc = 0xD0,
    /// Disconnection Request
    Dr = 0x80,
    /// Disconnection Confirm
    Dc = 0xC0,
    /// Data
    D = 0xF0,
}

impl TryFrom<u8> for CotpType {
    type Error = ();

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0xE0 => Ok(CotpType::Cr),
            0xD0 => Ok(CotpType::Cc),
            0x80 => Ok(CotpType::Dr),
            0xC0 => Ok(CotpType::Dc),
            0xF0 => Ok(CotpType::D),
            _ => Err(()),
        }
    }
}

/// Connection parameters shared by CR and CC TPDUs: references, class
/// octet and the three standard TLVs (TPDU size, source/destination TSAP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub dst_ref: u16,
    pub src_ref: u16,
    /// Class + option flags octet; class 0 without flags for ISO-on-TCP
    pub class_option: u8,
    /// TPDU size as a power-of-two code (0x0A = 1024 bytes)
    pub tpdu_size: u8,
    pub src_tsap: u16,
    pub dst_tsap: u16,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            dst_ref: 0x0000,
            src_ref: 0x0001,
            class_option: 0x00,
            tpdu_size: DEFAULT_TPDU_SIZE_CODE,
            src_tsap: 0x0100,
            dst_tsap: 0x0100,
        }
    }
}

impl ConnectParams {
    /// TPDU size decoded from its 2^n code, None when the code is absurd.
    pub fn tpdu_size_bytes(&self) -> Option<usize> {
        if (self.tpdu_size as u32) < usize::BITS {
            Some(1usize << self.tpdu_size)
        } else {
            None
        }
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 5 {
            return Err(Error::InsufficientData {
                needed: 5,
                available: body.len(),
            });
        }
        let dst_ref = u16::from_be_bytes([body[0], body[1]]);
        let src_ref = u16::from_be_bytes([body[2], body[3]]);
        let class_option = body[4];

        // Parameter TLVs may arrive in any order; unknown codes are skipped.
        let mut tpdu_size = None;
        let mut src_tsap = None;
        let mut dst_tsap = None;
        let mut pos = 5usize;
        while pos + 2 <= body.len() {
            let code = body[pos];
            let len = body[pos + 1] as usize;
            pos += 2;
            if pos + len > body.len() {
                return Err(Error::Protocol {
                    context: "truncated COTP parameter",
                });
            }
            match code {
                0xC0 if len == 1 => tpdu_size = Some(body[pos]),
                0xC1 if len == 2 => {
                    src_tsap = Some(u16::from_be_bytes([body[pos], body[pos + 1]]));
                }
                0xC2 if len == 2 => {
                    dst_tsap = Some(u16::from_be_bytes([body[pos], body[pos + 1]]));
                }
                _ => {}
            }
            pos += len;
        }

        match (tpdu_size, src_tsap, dst_tsap) {
            (Some(tpdu_size), Some(src_tsap), Some(dst_tsap)) => Ok(ConnectParams {
                dst_ref,
                src_ref,
                class_option,
                tpdu_size,
                src_tsap,
                dst_tsap,
            }),
            _ => Err(Error::Protocol {
                context: "missing COTP connection parameter",
            }),
        }
    }

    fn body_len(&self) -> usize {
        // refs(4) + class(1) + three TLVs (3 + 4 + 4)
        5 + 3 + 4 + 4
    }

    fn encode_body<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16(self.dst_ref);
        dst.put_u16(self.src_ref);
        dst.put_u8(self.class_option);
        write_tlv(dst, 0xC0, &[self.tpdu_size]);
        write_tlv(dst, 0xC1, &self.src_tsap.to_be_bytes());
        write_tlv(dst, 0xC2, &self.dst_tsap.to_be_bytes());
    }
}

/// Disconnection Request parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisconnectParams {
    pub dst_ref: u16,
    pub src_ref: u16,
    /// Disconnect reason octet (0x80 = normal disconnect)
    pub reason: u8,
}

impl DisconnectParams {
    fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 5 {
            return Err(Error::InsufficientData {
                needed: 5,
                available: body.len(),
            });
        }
        Ok(DisconnectParams {
            dst_ref: u16::from_be_bytes([body[0], body[1]]),
            src_ref: u16::from_be_bytes([body[2], body[3]]),
            reason: body[4],
        })
    }
}

/// Data TPDU parameters: end-of-transmission flag and TPDU number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataParams {
    pub eot: bool,
    pub tpdu_nr: u8,
}

impl Default for DataParams {
    fn default() -> Self {
        Self {
            eot: true,
            tpdu_nr: 0,
        }
    }
}

impl DataParams {
    fn parse_body(body: &[u8]) -> Result<Self> {
        let eot_nr = *body.first().ok_or(Error::InsufficientData {
            needed: 1,
            available: 0,
        })?;
        Ok(DataParams {
            eot: (eot_nr & 0x80) != 0,
            tpdu_nr: eot_nr & 0x7F,
        })
    }
}

/// COTP TPDU subset for a connection-oriented S7 client.
///
/// For `Data`, the user payload follows the 3-byte header and is returned
/// as the remainder slice by [`WireDecode::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cotp {
    /// Connection Request
    Cr(ConnectParams),
    /// Connection Confirm
    Cc(ConnectParams),
    /// Disconnection Request
    Dr(DisconnectParams),
    /// Disconnection Confirm
    Dc { dst_ref: u16, src_ref: u16 },
    /// Data TPDU
    D(DataParams),
}

impl WireEncode for Cotp {
    fn encoded_len(&self) -> usize {
        // LI byte + type byte + body
        2 + match self {
            Cotp::Cr(p) | Cotp::Cc(p) => p.body_len(),
            Cotp::Dr(_) => 5,
            Cotp::Dc { .. } => 4,
            Cotp::D(_) => 1,
        }
    }

    fn encode_to<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        // LI excludes itself
        let li = (self.encoded_len() - 1) as u8;
        dst.put_u8(li);
        match self {
            Cotp::Cr(p) => {
                dst.put_u8(CotpType::Cr as u8);
                p.encode_body(dst);
            }
            Cotp::Cc(p) => {
                dst.put_u8(CotpType::Cc as u8);
                p.encode_body(dst);
            }
            Cotp::Dr(p) => {
                dst.put_u8(CotpType::Dr as u8);
                dst.put_u16(p.dst_ref);
                dst.put_u16(p.src_ref);
                dst.put_u8(p.reason);
            }
            Cotp::Dc { dst_ref, src_ref } => {
                dst.put_u8(CotpType::Dc as u8);
                dst.put_u16(*dst_ref);
                dst.put_u16(*src_ref);
            }
            Cotp::D(params) => {
                dst.put_u8(CotpType::D as u8);
                let eot_nr = if params.eot {
                    0x80 | params.tpdu_nr
                } else {
                    params.tpdu_nr
                };
                dst.put_u8(eot_nr);
            }
        }
        Ok(())
    }
}

impl WireDecode for Cotp {
    /// Consumes exactly the bytes indicated by the LI field plus the LI
    /// byte itself. For Data the remainder is the user payload.
    fn parse(input: &[u8]) -> Result<(&[u8], Self)> {
        if input.len() < 2 {
            return Err(Error::InsufficientData {
                needed: 2,
                available: input.len(),
            });
        }
        let li = input[0] as usize;
        let total = 1 + li;
        if li < 1 || total > input.len() {
            return Err(Error::Protocol {
                context: "invalid COTP length indicator",
            });
        }
        let tpdu_type = CotpType::try_from(input[1]).map_err(|_| Error::Protocol {
            context: "unknown COTP TPDU type",
        })?;
        let body = &input[2..total];
        let rest = &input[total..];
        let cotp = match tpdu_type {
            CotpType::Cr => Cotp::Cr(ConnectParams::parse_body(body)?),
            CotpType::Cc => Cotp::Cc(ConnectParams::parse_body(body)?),
            CotpType::Dr => Cotp::Dr(DisconnectParams::parse_body(body)?),
            CotpType::Dc => {
                if body.len() < 4 {
                    return Err(Error::InsufficientData {
                        needed: 4,
                        available: body.len(),
                    });
                }
                Cotp::Dc {
                    dst_ref: u16::from_be_bytes([body[0], body[1]]),
                    src_ref: u16::from_be_bytes([body[2], body[3]]),
                }
            }
            CotpType::D => Cotp::D(DataParams::parse_body(body)?),
        };
        Ok((rest, cotp))
    }
}

#[inline]
fn write_tlv<B: BufMut>(dst: &mut B, code: u8, bytes: &[u8]) {
    dst.put_u8(code);
    dst.put_u8(bytes.len() as u8);
    dst.put_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn connection_request_matches_reference_telegram() {
        // The COTP portion of the CR telegram as Snap7-family clients send
        // it for local TSAP 01:00, remote TSAP 03:01 (rack 0, slot 1).
        let cr = Cotp::Cr(ConnectParams {
            src_tsap: 0x0100,
            dst_tsap: 0x0301,
            ..Default::default()
        });
        let mut buf = BytesMut::new();
        cr.encode_to(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[
                0x11, 0xE0, 0x00, 0x00, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A, 0xC1, 0x02, 0x01,
                0x00, 0xC2, 0x02, 0x03, 0x01,
            ]
        );
    }

    #[test]
    fn parses_connection_confirm() {
        let cc = [
            0x11, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A, 0xC1, 0x02, 0x01, 0x00,
            0xC2, 0x02, 0x03, 0x01,
        ];
        let (rest, cotp) = Cotp::parse(&cc).unwrap();
        assert!(rest.is_empty());
        match cotp {
            Cotp::Cc(p) => {
                assert_eq!(p.src_tsap, 0x0100);
                assert_eq!(p.dst_tsap, 0x0301);
                assert_eq!(p.tpdu_size_bytes(), Some(1024));
            }
            other => panic!("expected CC, got {other:?}"),
        }
    }

    #[test]
    fn parses_tlvs_in_any_order_and_skips_unknown() {
        let cc = [
            0x14, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC2, 0x02, 0x03, 0x01, 0xC5, 0x01, 0x42,
            0xC0, 0x01, 0x0A, 0xC1, 0x02, 0x01, 0x00,
        ];
        let (_, cotp) = Cotp::parse(&cc).unwrap();
        assert!(matches!(cotp, Cotp::Cc(p) if p.dst_tsap == 0x0301));
    }

    #[test]
    fn missing_tsap_parameter_is_a_protocol_error() {
        let cc = [0x09, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A];
        assert!(matches!(
            Cotp::parse(&cc),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn data_tpdu_round_trip() {
        let d = Cotp::D(DataParams::default());
        let mut buf = BytesMut::new();
        d.encode_to(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x02, 0xF0, 0x80]);

        let payload = [0x02u8, 0xF0, 0x80, 0xAA, 0xBB];
        let (rest, parsed) = Cotp::parse(&payload).unwrap();
        assert_eq!(rest, &[0xAA, 0xBB]);
        assert!(matches!(parsed, Cotp::D(p) if p.eot && p.tpdu_nr == 0));
    }

    #[test]
    fn non_final_data_tpdu_clears_eot() {
        let (_, parsed) = Cotp::parse(&[0x02, 0xF0, 0x03]).unwrap();
        assert!(matches!(parsed, Cotp::D(p) if !p.eot && p.tpdu_nr == 3));
    }

    #[test]
    fn disconnect_request_round_trip() {
        let dr = Cotp::Dr(DisconnectParams {
            dst_ref: 0x0001,
            src_ref: 0x0002,
            reason: 0x80,
        });
        let mut buf = BytesMut::new();
        dr.encode_to(&mut buf).unwrap();
        let (rest, parsed) = Cotp::parse(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, dr);
    }

    #[test]
    fn disconnect_confirm_round_trip() {
        let dc = Cotp::Dc {
            dst_ref: 0x0001,
            src_ref: 0x0002,
        };
        let mut buf = BytesMut::new();
        dc.encode_to(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x05, 0xC0, 0x00, 0x01, 0x00, 0x02]);
        let (rest, parsed) = Cotp::parse(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, dc);
    }

    #[test]
    fn rejects_unknown_tpdu_type() {
        assert!(matches!(
            Cotp::parse(&[0x02, 0x55, 0x00]),
            Err(Error::Protocol { .. })
        ));
    }
}
