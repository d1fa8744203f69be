//! Caller-facing data-block client: configuration, connect, chunked
//! read/write and disconnect.

use crate::error::{Error, Result};
use crate::frame::{data, rack_slot_tsap_pair, TsapPair};
use crate::session::Session;
use crate::transport::{ConnectionState, Timeouts, Transport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// TSAP selection: either the conventional rack/slot pair or explicit
/// selector words for hardware that does not follow the convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TsapConfig {
    RackSlot { rack: u8, slot: u8 },
    Tsap { src: u16, dst: u16 },
}

impl TsapConfig {
    fn pair(&self) -> Result<TsapPair> {
        match *self {
            TsapConfig::RackSlot { rack, slot } => rack_slot_tsap_pair(rack, slot),
            TsapConfig::Tsap { src, dst } => Ok(TsapPair {
                local: src.into(),
                remote: dst.into(),
            }),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Remote host
    pub host: String,
    /// Remote port (default 102)
    #[serde(default = "ClientConfig::default_port")]
    pub port: u16,
    /// TSAP configuration
    pub tsap: TsapConfig,
    #[serde(default = "ClientConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "ClientConfig::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "ClientConfig::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Preferred S7 PDU size in bytes; None requests the default (480)
    #[serde(default)]
    pub preferred_pdu_size: Option<u16>,
}

impl ClientConfig {
    fn default_port() -> u16 {
        102
    }

    fn default_connect_timeout_ms() -> u64 {
        3000
    }

    fn default_read_timeout_ms() -> u64 {
        1000
    }

    fn default_write_timeout_ms() -> u64 {
        500
    }

    /// Conventional settings for `host` with the given rack/slot and a
    /// single connect deadline.
    pub fn rack_slot(host: impl Into<String>, rack: u8, slot: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port: Self::default_port(),
            tsap: TsapConfig::RackSlot { rack, slot },
            connect_timeout_ms: timeout.as_millis() as u64,
            read_timeout_ms: Self::default_read_timeout_ms(),
            write_timeout_ms: Self::default_write_timeout_ms(),
            preferred_pdu_size: None,
        }
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms.max(1)),
            read: Duration::from_millis(self.read_timeout_ms.max(1)),
            write: Duration::from_millis(self.write_timeout_ms.max(1)),
        }
    }
}

/// Synchronous S7 data-block client over one connection.
///
/// Not safe for concurrent use: the S7 exchange is strictly alternating
/// per connection. Open one client per PLC and serialize access
/// externally if several threads need it.
#[derive(Debug)]
pub struct S7Client {
    session: Option<Session>,
}

impl S7Client {
    /// Single deterministic connection attempt: TCP, COTP handshake and
    /// S7 PDU negotiation. Retry policy belongs to the caller; see
    /// [`crate::retry::connect_with_retry`].
    #[instrument(level = "debug", skip_all, fields(host = %config.host, port = config.port))]
    pub fn connect(config: &ClientConfig) -> Result<S7Client> {
        let tsap = config.tsap.pair()?;
        let transport = Transport::open(&config.host, config.port, &tsap, config.timeouts())?;
        let session = Session::negotiate(transport, config.preferred_pdu_size)?;
        debug!(pdu_size = session.pdu_size(), "connected");
        Ok(S7Client {
            session: Some(session),
        })
    }

    /// Connect to `host` using the conventional rack/slot TSAP mapping.
    pub fn connect_rack_slot(
        host: &str,
        rack: u8,
        slot: u8,
        timeout: Duration,
    ) -> Result<S7Client> {
        Self::connect(&ClientConfig::rack_slot(host, rack, slot, timeout))
    }

    /// Read `len` bytes from data block `db` starting at byte `start`.
    ///
    /// Transfers larger than the negotiated per-request capacity are
    /// split into sequential requests transparently.
    pub fn read_db(&mut self, db: u16, start: u32, len: u16) -> Result<Vec<u8>> {
        if len == 0 {
            return Err(Error::Validation {
                context: "zero-length data block read",
            });
        }
        let session = self.session.as_mut().ok_or(Error::ClosedConnection)?;
        let capacity = session.read_capacity();
        let mut out = Vec::with_capacity(len as usize);
        let mut offset: u16 = 0;
        while offset < len {
            let chunk = (len - offset).min(capacity);
            let chunk_start = start + offset as u32;
            let pdu = session
                .exchange(|r| data::encode_read_request(r, db, chunk_start, chunk, capacity))?;
            let payload = data::decode_read_response(&pdu)?;
            if payload.len() != chunk as usize {
                return Err(Error::Protocol {
                    context: "read payload length mismatch",
                });
            }
            out.extend_from_slice(&payload);
            offset += chunk;
        }
        Ok(out)
    }

    /// Write `bytes` into data block `db` starting at byte `start`,
    /// splitting into capacity-sized requests as needed.
    pub fn write_db(&mut self, db: u16, start: u32, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::Validation {
                context: "zero-length data block write",
            });
        }
        let session = self.session.as_mut().ok_or(Error::ClosedConnection)?;
        let capacity = session.write_capacity() as usize;
        let mut offset: usize = 0;
        while offset < bytes.len() {
            let chunk = &bytes[offset..(offset + capacity).min(bytes.len())];
            let chunk_start = start + offset as u32;
            let pdu = session.exchange(|r| {
                data::encode_write_request(r, db, chunk_start, chunk, capacity as u16)
            })?;
            data::decode_write_response(&pdu)?;
            offset += chunk.len();
        }
        Ok(())
    }

    /// Negotiated PDU size, if connected.
    pub fn pdu_size(&self) -> Option<u16> {
        self.session.as_ref().map(Session::pdu_size)
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.state() == ConnectionState::Connected)
            .unwrap_or(false)
    }

    /// Best-effort disconnect; idempotent and never fails the caller.
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

impl Drop for S7Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReturnCode;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    fn init_logs() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    }

    /// Scripted PLC double speaking just enough ISO-on-TCP and S7 for the
    /// client under test.
    struct MockPlc {
        sock: TcpStream,
    }

    impl MockPlc {
        /// Accept one client and answer the COTP handshake.
        fn accept(listener: &TcpListener) -> Self {
            let (mut sock, _) = listener.accept().unwrap();
            let mut cr = [0u8; 22];
            sock.read_exact(&mut cr).unwrap();
            assert_eq!(cr[5], 0xE0);
            let cc = [
                0x11, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A, 0xC1, 0x02, 0x01,
                0x00, 0xC2, 0x02, 0x03, 0x01,
            ];
            let mut plc = MockPlc { sock };
            plc.send_frame(&cc);
            plc
        }

        /// Read one TPKT frame and return the S7 bytes after the COTP
        /// Data header.
        fn recv_s7(&mut self) -> Vec<u8> {
            let mut hdr = [0u8; 4];
            self.sock.read_exact(&mut hdr).unwrap();
            let total = u16::from_be_bytes([hdr[2], hdr[3]]) as usize;
            let mut body = vec![0u8; total - 4];
            self.sock.read_exact(&mut body).unwrap();
            assert_eq!(&body[..3], &[0x02, 0xF0, 0x80]);
            body.split_off(3)
        }

        fn send_frame(&mut self, payload: &[u8]) {
            let mut out = vec![0x03, 0x00];
            out.extend_from_slice(&((payload.len() + 4) as u16).to_be_bytes());
            out.extend_from_slice(payload);
            self.sock.write_all(&out).unwrap();
        }

        fn send_s7(&mut self, s7: &[u8]) {
            let mut payload = vec![0x02, 0xF0, 0x80];
            payload.extend_from_slice(s7);
            self.send_frame(&payload);
        }

        /// Answer the Setup Communication job, granting `pdu_size`.
        fn negotiate(&mut self, pdu_size: u16) {
            let job = self.recv_s7();
            assert_eq!(job[1], 0x01);
            assert_eq!(job[10], 0xF0);
            let pdu_ref = [job[4], job[5]];
            let mut ack = vec![
                0x32, 0x03, 0x00, 0x00, pdu_ref[0], pdu_ref[1], 0x00, 0x08, 0x00, 0x00, 0x00,
                0x00, 0xF0, 0x00, 0x00, 0x01, 0x00, 0x01,
            ];
            ack.extend_from_slice(&pdu_size.to_be_bytes());
            self.send_s7(&ack);
        }

        /// Answer one Read Var job with `payload`, echoing its reference
        /// unless `pdu_ref` overrides it.
        fn answer_read(&mut self, payload: &[u8], pdu_ref: Option<u16>) {
            let job = self.recv_s7();
            assert_eq!(job[10], 0x04);
            let r = pdu_ref
                .map(u16::to_be_bytes)
                .unwrap_or([job[4], job[5]]);
            let data_len = (payload.len() + 4) as u16;
            let mut ack = vec![
                0x32,
                0x03,
                0x00,
                0x00,
                r[0],
                r[1],
                0x00,
                0x02,
                (data_len >> 8) as u8,
                data_len as u8,
                0x00,
                0x00,
                0x04,
                0x01,
                0xFF,
                0x04,
                ((payload.len() * 8) >> 8) as u8,
                (payload.len() * 8) as u8,
            ];
            ack.extend_from_slice(payload);
            self.send_s7(&ack);
        }

        /// Answer one Write Var job with the given item status code.
        fn answer_write(&mut self, status: u8) -> Vec<u8> {
            let job = self.recv_s7();
            assert_eq!(job[10], 0x05);
            let ack = vec![
                0x32, 0x03, 0x00, 0x00, job[4], job[5], 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x05,
                0x01, status,
            ];
            self.send_s7(&ack);
            job
        }
    }

    fn spawn_plc(
        script: impl FnOnce(MockPlc) + Send + 'static,
    ) -> (String, u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || script(MockPlc::accept(&listener)));
        (addr.ip().to_string(), addr.port(), handle)
    }

    fn test_config(host: String, port: u16) -> ClientConfig {
        ClientConfig {
            port,
            ..ClientConfig::rack_slot(host, 0, 1, Duration::from_secs(2))
        }
    }

    #[test]
    fn connects_negotiates_and_reads() {
        init_logs();
        let (host, port, plc) = spawn_plc(|mut plc| {
            plc.negotiate(480);
            plc.answer_read(&[0xDE, 0xAD, 0xBE, 0xEF], None);
        });

        let mut client = S7Client::connect(&test_config(host, port)).unwrap();
        assert!(client.is_connected());
        assert_eq!(client.pdu_size(), Some(480));
        assert_eq!(client.read_db(1, 0, 4).unwrap(), &[0xDE, 0xAD, 0xBE, 0xEF]);
        client.disconnect();
        assert!(!client.is_connected());
        plc.join().unwrap();
    }

    #[test]
    fn large_reads_are_chunked_to_capacity() {
        init_logs();
        // PDU 240 -> read capacity 222; 300 bytes need two requests.
        let (host, port, plc) = spawn_plc(|mut plc| {
            plc.negotiate(240);
            plc.answer_read(&[0x11u8; 222], None);
            plc.answer_read(&[0x22u8; 78], None);
        });

        let mut client = S7Client::connect(&test_config(host, port)).unwrap();
        let data = client.read_db(1, 0, 300).unwrap();
        assert_eq!(data.len(), 300);
        assert!(data[..222].iter().all(|&b| b == 0x11));
        assert!(data[222..].iter().all(|&b| b == 0x22));
        plc.join().unwrap();
    }

    #[test]
    fn writes_round_trip_and_address_advances_between_chunks() {
        init_logs();
        let (host, port, plc) = spawn_plc(|mut plc| {
            plc.negotiate(240);
            // 212-byte write capacity; a 250-byte buffer splits 212 + 38.
            let first = plc.answer_write(0xFF);
            // Bit address of byte offset 0.
            assert_eq!(&first[21..24], &[0x00, 0x00, 0x00]);
            let second = plc.answer_write(0xFF);
            // Second chunk starts at byte 212 = bit 1696.
            assert_eq!(&second[21..24], &[0x00, 0x06, 0xA0]);
        });

        let mut client = S7Client::connect(&test_config(host, port)).unwrap();
        client.write_db(2, 0, &[0x55u8; 250]).unwrap();
        plc.join().unwrap();
    }

    #[test]
    fn plc_item_error_is_surfaced_with_its_code() {
        init_logs();
        let (host, port, plc) = spawn_plc(|mut plc| {
            plc.negotiate(480);
            let job = plc.recv_s7();
            // Error item: return code 0x0A, Null transport, no data.
            let ack = vec![
                0x32, 0x03, 0x00, 0x00, job[4], job[5], 0x00, 0x02, 0x00, 0x04, 0x00, 0x00, 0x04,
                0x01, 0x0A, 0x00, 0x00, 0x00,
            ];
            plc.send_s7(&ack);
        });

        let mut client = S7Client::connect(&test_config(host, port)).unwrap();
        assert!(matches!(
            client.read_db(200, 0, 4),
            Err(Error::PlcItem {
                code: ReturnCode::ObjectDoesNotExist
            })
        ));
        plc.join().unwrap();
    }

    #[test]
    fn stale_responses_are_discarded_until_the_match_arrives() {
        init_logs();
        let (host, port, plc) = spawn_plc(|mut plc| {
            plc.negotiate(480);
            let job = plc.recv_s7();
            let real_ref = u16::from_be_bytes([job[4], job[5]]);
            // A late reply with yesterday's reference, then the real one.
            let stale = [
                0x32, 0x03, 0x00, 0x00, 0x7F, 0x7F, 0x00, 0x02, 0x00, 0x05, 0x00, 0x00, 0x04,
                0x01, 0xFF, 0x04, 0x00, 0x08, 0x99,
            ];
            plc.send_s7(&stale);
            let mut good = stale;
            good[4] = (real_ref >> 8) as u8;
            good[5] = real_ref as u8;
            good[18] = 0x42;
            plc.send_s7(&good);
        });

        let mut client = S7Client::connect(&test_config(host, port)).unwrap();
        assert_eq!(client.read_db(1, 0, 1).unwrap(), &[0x42]);
        plc.join().unwrap();
    }

    #[test]
    fn negotiated_size_below_floor_is_a_protocol_error() {
        init_logs();
        let (host, port, plc) = spawn_plc(|mut plc| {
            plc.negotiate(100);
        });

        assert!(matches!(
            S7Client::connect(&test_config(host, port)),
            Err(Error::Protocol { .. })
        ));
        plc.join().unwrap();
    }

    #[test]
    fn zero_length_transfers_are_rejected_without_touching_the_wire() {
        init_logs();
        let (host, port, plc) = spawn_plc(|mut plc| {
            plc.negotiate(480);
        });

        let mut client = S7Client::connect(&test_config(host, port)).unwrap();
        assert!(matches!(
            client.read_db(1, 0, 0),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            client.write_db(1, 0, &[]),
            Err(Error::Validation { .. })
        ));
        plc.join().unwrap();
    }

    #[test]
    fn operations_after_disconnect_report_closed_connection() {
        init_logs();
        let (host, port, plc) = spawn_plc(|mut plc| {
            plc.negotiate(480);
        });

        let mut client = S7Client::connect(&test_config(host, port)).unwrap();
        client.disconnect();
        client.disconnect();
        assert!(matches!(
            client.read_db(1, 0, 4),
            Err(Error::ClosedConnection)
        ));
        plc.join().unwrap();
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{
                "host": "192.168.0.10",
                "tsap": { "kind": "rackSlot", "rack": 0, "slot": 1 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.port, 102);
        assert_eq!(config.connect_timeout_ms, 3000);
        assert_eq!(config.preferred_pdu_size, None);
        assert!(matches!(
            config.tsap,
            TsapConfig::RackSlot { rack: 0, slot: 1 }
        ));
    }

    #[test]
    fn explicit_tsap_config_bypasses_the_rack_slot_convention() {
        let config: ClientConfig = serde_json::from_str(
            r#"{
                "host": "192.168.0.10",
                "port": 1102,
                "tsap": { "kind": "tsap", "src": 256, "dst": 770 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.port, 1102);
        let pair = config.tsap.pair().unwrap();
        assert_eq!(u16::from(pair.local), 0x0100);
        assert_eq!(u16::from(pair.remote), 0x0302);
    }
}
