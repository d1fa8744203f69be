//! Blocking ISO-on-TCP transport: one TCP connection to the PLC, TPKT
//! framing and the COTP connection-oriented handshake.
//!
//! All operations block the calling thread and are bounded by the socket
//! timeouts supplied at open time; expiry surfaces as [`Error::Timeout`]
//! and leaves the connection open but unreliable. There are no internal
//! retries and no background threads. Cancellation is closing the
//! connection: [`Transport::close`] shuts the socket down, which unblocks
//! an in-flight receive.

use crate::error::{Error, Result};
use crate::frame::{
    ConnectParams, Cotp, DataParams, DisconnectParams, Tpkt, TsapPair, WireDecode, WireEncode,
    COTP_DATA_HEADER_LEN, TPKT_HEADER_LEN,
};
use bytes::{BufMut, BytesMut};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// Upper bound on reassembled PDU size, matching the TPKT length field.
const MAX_REASSEMBLED_LEN: usize = u16::MAX as usize;

/// Connection lifecycle as observed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Per-operation socket deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(3000),
            read: Duration::from_millis(1000),
            write: Duration::from_millis(500),
        }
    }
}

/// One blocking TCP connection with COTP transport connection on top.
#[derive(Debug)]
pub struct Transport {
    stream: Option<TcpStream>,
    state: ConnectionState,
}

impl Transport {
    /// Establish TCP, send the COTP Connection Request for `tsap` and
    /// validate the Connection Confirm. A handshake rejection maps to
    /// [`Error::Connect`]; a silent peer maps to [`Error::Timeout`].
    pub fn open(host: &str, port: u16, tsap: &TsapPair, timeouts: Timeouts) -> Result<Transport> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Connect {
                context: "address resolution failed",
                source: Some(e),
            })?
            .next()
            .ok_or(Error::Connect {
                context: "host resolved to no address",
                source: None,
            })?;

        let stream =
            TcpStream::connect_timeout(&addr, timeouts.connect).map_err(|e| Error::Connect {
                context: "tcp connect failed",
                source: Some(e),
            })?;
        stream.set_read_timeout(Some(timeouts.read))?;
        stream.set_write_timeout(Some(timeouts.write))?;
        stream.set_nodelay(true)?;

        let mut transport = Transport {
            stream: Some(stream),
            state: ConnectionState::Connecting,
        };
        transport.cotp_connect(tsap)?;
        transport.state = ConnectionState::Connected;
        trace!(%addr, "transport connected");
        Ok(transport)
    }

    fn cotp_connect(&mut self, tsap: &TsapPair) -> Result<()> {
        let cr = Cotp::Cr(ConnectParams {
            src_tsap: tsap.local.into(),
            dst_tsap: tsap.remote.into(),
            ..Default::default()
        });
        let mut buf = BytesMut::with_capacity(TPKT_HEADER_LEN + cr.encoded_len());
        Tpkt::for_payload(cr.encoded_len())?.encode_to(&mut buf);
        cr.encode_to(&mut buf)?;
        self.stream_mut()?.write_all(&buf).map_err(map_io)?;

        let frame = self.recv_frame()?;
        let (_rest, cotp) = Cotp::parse(&frame)?;
        match cotp {
            Cotp::Cc(_) => Ok(()),
            _ => Err(Error::Connect {
                context: "COTP connection refused",
                source: None,
            }),
        }
    }

    /// Send one S7 PDU wrapped in a final COTP Data TPDU.
    pub fn send_pdu(&mut self, payload: &[u8]) -> Result<()> {
        let cotp = Cotp::D(DataParams::default());
        let mut buf =
            BytesMut::with_capacity(TPKT_HEADER_LEN + COTP_DATA_HEADER_LEN + payload.len());
        Tpkt::for_payload(COTP_DATA_HEADER_LEN + payload.len())?.encode_to(&mut buf);
        cotp.encode_to(&mut buf)?;
        buf.put_slice(payload);
        self.stream_mut()?.write_all(&buf).map_err(map_io)
    }

    /// Receive one S7 PDU, reassembling segmented COTP Data TPDUs until
    /// the end-of-transmission marker.
    pub fn recv_pdu(&mut self) -> Result<Vec<u8>> {
        let mut assembled: Vec<u8> = Vec::new();
        loop {
            let frame = self.recv_frame()?;
            let (payload, cotp) = Cotp::parse(&frame)?;
            match cotp {
                Cotp::D(params) => {
                    if assembled.len() + payload.len() > MAX_REASSEMBLED_LEN {
                        return Err(Error::Protocol {
                            context: "reassembled PDU exceeds frame bounds",
                        });
                    }
                    assembled.extend_from_slice(payload);
                    if params.eot {
                        return Ok(assembled);
                    }
                }
                Cotp::Dr(_) => {
                    return Err(Error::Protocol {
                        context: "peer requested disconnect",
                    })
                }
                _ => {
                    return Err(Error::Protocol {
                        context: "unexpected COTP TPDU",
                    })
                }
            }
        }
    }

    fn recv_frame(&mut self) -> Result<Vec<u8>> {
        let stream = self.stream_mut()?;
        let mut hdr = [0u8; TPKT_HEADER_LEN];
        stream.read_exact(&mut hdr).map_err(map_io)?;
        let tpkt = Tpkt::parse(&hdr)?;
        let mut body = vec![0u8; tpkt.payload_len()];
        stream.read_exact(&mut body).map_err(map_io)?;
        Ok(body)
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Best-effort close: sends a COTP Disconnect Request, shuts the
    /// socket down and releases it. Never fails the caller; delivery and
    /// shutdown failures are reported via tracing. Idempotent, closing an
    /// already-closed transport is a no-op.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if self.state == ConnectionState::Connected {
                if let Err(e) = send_disconnect_request(&stream) {
                    debug!(error = %e, "disconnect request not delivered");
                }
            }
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(error = %e, "socket shutdown failed during close");
            }
        }
        self.state = ConnectionState::Disconnected;
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::ClosedConnection)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn send_disconnect_request(mut stream: &TcpStream) -> Result<()> {
    let dr = Cotp::Dr(DisconnectParams {
        dst_ref: 0x0000,
        src_ref: 0x0001,
        reason: 0x80,
    });
    let mut buf = BytesMut::with_capacity(TPKT_HEADER_LEN + dr.encoded_len());
    Tpkt::for_payload(dr.encoded_len())?.encode_to(&mut buf);
    dr.encode_to(&mut buf)?;
    stream.write_all(&buf).map_err(map_io)
}

fn map_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(e),
    }
}
