use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// TSAP selector as a (high, low) byte pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tsap(pub u8, pub u8);

impl Tsap {
    #[inline]
    pub fn high(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn low(&self) -> u8 {
        self.1
    }
}

impl From<Tsap> for u16 {
    #[inline]
    fn from(tsap: Tsap) -> Self {
        ((tsap.0 as u16) << 8) | (tsap.1 as u16)
    }
}

impl From<u16> for Tsap {
    #[inline]
    fn from(value: u16) -> Self {
        Tsap((value >> 8) as u8, (value & 0xFF) as u8)
    }
}

impl From<(u8, u8)> for Tsap {
    #[inline]
    fn from(value: (u8, u8)) -> Self {
        Tsap(value.0, value.1)
    }
}

impl fmt::Display for Tsap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:02X}", self.0, self.1)
    }
}

impl FromStr for Tsap {
    type Err = Error;

    /// Parse a TSAP from "HH:LL" hex bytes, "0xHHLL" 16-bit hex, or a
    /// decimal u16.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((h, l)) = s.split_once(':') {
            let high = parse_hex_byte(h)?;
            let low = parse_hex_byte(l)?;
            return Ok(Tsap(high, low));
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let v = u16::from_str_radix(hex, 16).map_err(|_| Error::Validation {
                context: "malformed hex TSAP",
            })?;
            return Ok(Tsap::from(v));
        }
        s.parse::<u16>().map(Tsap::from).map_err(|_| Error::Validation {
            context: "malformed TSAP",
        })
    }
}

fn parse_hex_byte(s: &str) -> Result<u8> {
    let s = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(s, 16).map_err(|_| Error::Validation {
        context: "malformed TSAP byte",
    })
}

/// Local/remote TSAP pair used during the COTP handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsapPair {
    pub local: Tsap,
    pub remote: Tsap,
}

impl FromStr for TsapPair {
    type Err = Error;

    /// Parse "local/remote", e.g. "01:00/03:01" or "0x0100/0x0301".
    fn from_str(s: &str) -> Result<Self> {
        let (l, r) = s.split_once('/').ok_or(Error::Validation {
            context: "TSAP pair must be written as local/remote",
        })?;
        Ok(TsapPair {
            local: l.parse()?,
            remote: r.parse()?,
        })
    }
}

/// TSAP pair for the mainstream S7 families (300/400/1200/1500) derived
/// from rack and slot per vendor convention: the local selector is fixed
/// at 01:00 and the remote low byte packs rack into bits 5..=7 and slot
/// into bits 0..=4.
pub fn rack_slot_tsap_pair(rack: u8, slot: u8) -> Result<TsapPair> {
    if rack > 0x0F {
        return Err(Error::InvalidRack(rack));
    }
    if slot > 0x0F {
        return Err(Error::InvalidSlot(slot));
    }
    Ok(TsapPair {
        local: Tsap(0x01, 0x00),
        remote: Tsap(0x03, (rack << 5) | slot),
    })
}
