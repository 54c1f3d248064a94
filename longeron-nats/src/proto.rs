//! Wire codec for the broker's text protocol.
//!
//! The frame grammar itself (PUB/SUB/MSG and friends) is an externally
//! specified protocol; this module only implements the encoding the writer
//! loop needs and the incremental decoding the read path needs. The
//! engine's contracts live elsewhere.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::headers::HeaderMap;

const CRLF: &[u8] = b"\r\n";

/// Maximum accepted length of a single control line.
const MAX_CONTROL_LINE: usize = 4096;

/// Wire protocol errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Control line exceeds {MAX_CONTROL_LINE} bytes")]
    ControlLineTooLong,

    #[error("Malformed control line: {0}")]
    BadControlLine(String),

    #[error("Malformed header block: {0}")]
    BadHeaders(String),

    #[error("Malformed handshake info: {0}")]
    BadInfo(String),
}

impl From<ProtoError> for longeron_core::error::LongeronError {
    fn from(err: ProtoError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Handshake information announced by the broker in its `INFO` line.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub max_payload: usize,
    #[serde(default)]
    pub headers: bool,
}

/// Handshake information the client sends in its `CONNECT` line.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectInfo {
    pub verbose: bool,
    pub pedantic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub lang: &'static str,
    pub version: &'static str,
    pub headers: bool,
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            name: None,
            lang: "rust",
            version: env!("CARGO_PKG_VERSION"),
            headers: true,
        }
    }
}

/// Serializer for outbound protocol frames.
///
/// Writes directly into the writer loop's shared output buffer; all
/// methods are infallible because every argument is validated or encoded
/// before the command is enqueued.
pub struct ProtocolWriter<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> ProtocolWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// `CONNECT <json>` with the pre-encoded handshake body.
    pub fn write_connect(&mut self, body: &[u8]) {
        self.buf.put_slice(b"CONNECT ");
        self.buf.put_slice(body);
        self.buf.put_slice(CRLF);
    }

    /// `PUB` or `HPUB` depending on the presence of headers.
    pub fn write_publish(
        &mut self,
        subject: &str,
        reply_to: Option<&str>,
        headers: Option<&HeaderMap>,
        payload: &[u8],
    ) {
        match headers {
            None => {
                self.buf.put_slice(b"PUB ");
                self.buf.put_slice(subject.as_bytes());
                if let Some(reply) = reply_to {
                    self.buf.put_u8(b' ');
                    self.buf.put_slice(reply.as_bytes());
                }
                self.write_len(payload.len());
                self.buf.put_slice(CRLF);
            }
            Some(headers) => {
                let header_len = headers.encoded_len();
                self.buf.put_slice(b"HPUB ");
                self.buf.put_slice(subject.as_bytes());
                if let Some(reply) = reply_to {
                    self.buf.put_u8(b' ');
                    self.buf.put_slice(reply.as_bytes());
                }
                self.write_len(header_len);
                self.write_len(header_len + payload.len());
                self.buf.put_slice(CRLF);
                headers.encode(self.buf);
            }
        }
        self.buf.put_slice(payload);
        self.buf.put_slice(CRLF);
    }

    /// `SUB <subject> [queue] <sid>`
    pub fn write_subscribe(&mut self, sid: u64, subject: &str, queue_group: Option<&str>) {
        self.buf.put_slice(b"SUB ");
        self.buf.put_slice(subject.as_bytes());
        if let Some(queue) = queue_group {
            self.buf.put_u8(b' ');
            self.buf.put_slice(queue.as_bytes());
        }
        self.write_len(sid as usize);
        self.buf.put_slice(CRLF);
    }

    /// `UNSUB <sid> [max_msgs]`
    pub fn write_unsubscribe(&mut self, sid: u64, max_msgs: Option<u64>) {
        self.buf.put_slice(b"UNSUB");
        self.write_len(sid as usize);
        if let Some(max) = max_msgs {
            self.write_len(max as usize);
        }
        self.buf.put_slice(CRLF);
    }

    pub fn write_ping(&mut self) {
        self.buf.put_slice(b"PING\r\n");
    }

    pub fn write_pong(&mut self) {
        self.buf.put_slice(b"PONG\r\n");
    }

    /// A space followed by a decimal integer.
    fn write_len(&mut self, len: usize) {
        let mut digits = [0u8; 20];
        let mut i = digits.len();
        let mut v = len;
        loop {
            i -= 1;
            digits[i] = b'0' + (v % 10) as u8;
            v /= 10;
            if v == 0 {
                break;
            }
        }
        self.buf.put_u8(b' ');
        self.buf.put_slice(&digits[i..]);
    }
}

/// One decoded inbound frame.
#[derive(Debug)]
pub enum ServerOp {
    Info(ServerInfo),
    Msg {
        subject: String,
        sid: u64,
        reply_to: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
    },
    Ping,
    Pong,
    Ok,
    Err(String),
    /// A verb this client does not understand; logged and dropped upstream.
    Unknown(String),
}

enum DecodeState {
    /// Waiting for a complete control line.
    Line,
    /// Control line consumed, waiting for `total_len + CRLF` payload bytes.
    Payload {
        subject: String,
        sid: u64,
        reply_to: Option<String>,
        header_len: usize,
        total_len: usize,
    },
}

/// Stateful incremental decoder for inbound frames.
///
/// `decode` consumes from the front of `src` and returns one frame at a
/// time; `Ok(None)` means more bytes are needed.
pub struct Decoder {
    state: DecodeState,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Line,
        }
    }

    /// Decode a single frame from `src`.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream is unrecoverably out of sync
    /// (oversized or malformed control line, bad payload framing).
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ServerOp>, ProtoError> {
        loop {
            // Bytes needed to finish a pending payload, if any.
            let pending = match &self.state {
                DecodeState::Line => None,
                DecodeState::Payload { total_len, .. } => Some(*total_len + 2),
            };

            let Some(needed) = pending else {
                let Some(line_end) = find_crlf(src) else {
                    if src.len() > MAX_CONTROL_LINE {
                        return Err(ProtoError::ControlLineTooLong);
                    }
                    return Ok(None);
                };

                let line = src.split_to(line_end);
                src.advance(2); // CRLF
                let line = std::str::from_utf8(&line)
                    .map_err(|_| ProtoError::BadControlLine("not UTF-8".into()))?;

                if line.is_empty() {
                    continue;
                }

                match self.parse_line(line)? {
                    LineOutcome::Op(op) => return Ok(Some(op)),
                    LineOutcome::NeedPayload => continue,
                }
            };

            if src.len() < needed {
                return Ok(None);
            }

            let DecodeState::Payload {
                subject,
                sid,
                reply_to,
                header_len,
                total_len,
            } = std::mem::replace(&mut self.state, DecodeState::Line)
            else {
                unreachable!("pending is Some only in the Payload state");
            };

            let mut body = src.split_to(total_len).freeze();
            src.advance(2); // trailing CRLF

            let headers = if header_len > 0 {
                let block = body.split_to(header_len);
                Some(HeaderMap::parse(&block)?)
            } else {
                None
            };

            return Ok(Some(ServerOp::Msg {
                subject,
                sid,
                reply_to,
                headers,
                payload: body,
            }));
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<LineOutcome, ProtoError> {
        let (verb, rest) = line
            .split_once(' ')
            .map_or((line, ""), |(v, r)| (v, r.trim_start()));

        match verb {
            "MSG" => {
                let (subject, sid, reply_to, total_len) = parse_msg_args(rest, line)?;
                self.state = DecodeState::Payload {
                    subject,
                    sid,
                    reply_to,
                    header_len: 0,
                    total_len,
                };
                Ok(LineOutcome::NeedPayload)
            }
            "HMSG" => {
                let (subject, sid, reply_to, header_len, total_len) =
                    parse_hmsg_args(rest, line)?;
                self.state = DecodeState::Payload {
                    subject,
                    sid,
                    reply_to,
                    header_len,
                    total_len,
                };
                Ok(LineOutcome::NeedPayload)
            }
            "INFO" => {
                let info: ServerInfo = serde_json::from_str(rest)
                    .map_err(|e| ProtoError::BadInfo(e.to_string()))?;
                Ok(LineOutcome::Op(ServerOp::Info(info)))
            }
            "PING" => Ok(LineOutcome::Op(ServerOp::Ping)),
            "PONG" => Ok(LineOutcome::Op(ServerOp::Pong)),
            "+OK" => Ok(LineOutcome::Op(ServerOp::Ok)),
            "-ERR" => Ok(LineOutcome::Op(ServerOp::Err(
                rest.trim_matches('\'').to_string(),
            ))),
            other => Ok(LineOutcome::Op(ServerOp::Unknown(other.to_string()))),
        }
    }
}

enum LineOutcome {
    Op(ServerOp),
    NeedPayload,
}

fn find_crlf(src: &BytesMut) -> Option<usize> {
    src.windows(2).position(|w| w == CRLF)
}

fn parse_msg_args(
    rest: &str,
    line: &str,
) -> Result<(String, u64, Option<String>, usize), ProtoError> {
    let parts: Vec<&str> = rest.split_ascii_whitespace().collect();
    match parts.as_slice() {
        [subject, sid, len] => Ok((
            (*subject).to_string(),
            parse_u64(sid, line)?,
            None,
            parse_u64(len, line)? as usize,
        )),
        [subject, sid, reply, len] => Ok((
            (*subject).to_string(),
            parse_u64(sid, line)?,
            Some((*reply).to_string()),
            parse_u64(len, line)? as usize,
        )),
        _ => Err(ProtoError::BadControlLine(line.to_string())),
    }
}

fn parse_hmsg_args(
    rest: &str,
    line: &str,
) -> Result<(String, u64, Option<String>, usize, usize), ProtoError> {
    let parts: Vec<&str> = rest.split_ascii_whitespace().collect();
    match parts.as_slice() {
        [subject, sid, hlen, tlen] => Ok((
            (*subject).to_string(),
            parse_u64(sid, line)?,
            None,
            parse_u64(hlen, line)? as usize,
            parse_u64(tlen, line)? as usize,
        )),
        [subject, sid, reply, hlen, tlen] => Ok((
            (*subject).to_string(),
            parse_u64(sid, line)?,
            Some((*reply).to_string()),
            parse_u64(hlen, line)? as usize,
            parse_u64(tlen, line)? as usize,
        )),
        _ => Err(ProtoError::BadControlLine(line.to_string())),
    }
}

fn parse_u64(field: &str, line: &str) -> Result<u64, ProtoError> {
    field
        .parse()
        .map_err(|_| ProtoError::BadControlLine(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<ServerOp> {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::from(input);
        let mut ops = Vec::new();
        while let Some(op) = decoder.decode(&mut buf).unwrap() {
            ops.push(op);
        }
        ops
    }

    #[test]
    fn encodes_pub_with_and_without_reply() {
        let mut buf = BytesMut::new();
        let mut w = ProtocolWriter::new(&mut buf);
        w.write_publish("orders.eu", None, None, b"hi");
        w.write_publish("orders.eu", Some("_INBOX.1"), None, b"yo");
        assert_eq!(
            &buf[..],
            b"PUB orders.eu 2\r\nhi\r\nPUB orders.eu _INBOX.1 2\r\nyo\r\n"
        );
    }

    #[test]
    fn encodes_hpub_with_lengths() {
        let mut headers = HeaderMap::new();
        headers.append("K", "v");

        let mut buf = BytesMut::new();
        ProtocolWriter::new(&mut buf).write_publish("a", None, Some(&headers), b"body");

        let header_len = headers.encoded_len();
        let expected = format!(
            "HPUB a {header_len} {}\r\nNATS/1.0\r\nK: v\r\n\r\nbody\r\n",
            header_len + 4
        );
        assert_eq!(&buf[..], expected.as_bytes());
    }

    #[test]
    fn encodes_sub_unsub_pong() {
        let mut buf = BytesMut::new();
        let mut w = ProtocolWriter::new(&mut buf);
        w.write_subscribe(7, "orders.*", Some("workers"));
        w.write_unsubscribe(7, Some(5));
        w.write_pong();
        assert_eq!(&buf[..], b"SUB orders.* workers 7\r\nUNSUB 7 5\r\nPONG\r\n");
    }

    #[test]
    fn decodes_msg_with_payload() {
        let ops = decode_all(b"MSG orders.eu 3 5\r\nhello\r\n");
        assert_eq!(ops.len(), 1);
        let ServerOp::Msg {
            subject,
            sid,
            reply_to,
            headers,
            payload,
        } = &ops[0]
        else {
            panic!("expected MSG");
        };
        assert_eq!(subject, "orders.eu");
        assert_eq!(*sid, 3);
        assert!(reply_to.is_none());
        assert!(headers.is_none());
        assert_eq!(&payload[..], b"hello");
    }

    #[test]
    fn decodes_hmsg_with_headers() {
        let mut headers = HeaderMap::new();
        headers.append("K", "v");
        let mut block = BytesMut::new();
        headers.encode(&mut block);
        let hlen = block.len();

        let wire = format!("HMSG a 1 _INBOX.9 {hlen} {}\r\n", hlen + 4);
        let mut input = BytesMut::from(wire.as_bytes());
        input.extend_from_slice(&block);
        input.extend_from_slice(b"body\r\n");

        let ops = decode_all(&input);
        let ServerOp::Msg {
            reply_to,
            headers,
            payload,
            ..
        } = &ops[0]
        else {
            panic!("expected HMSG");
        };
        assert_eq!(reply_to.as_deref(), Some("_INBOX.9"));
        assert_eq!(headers.as_ref().unwrap().get("K"), Some("v"));
        assert_eq!(&payload[..], b"body");
    }

    #[test]
    fn decodes_split_delivery_incrementally() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"MSG a 1 ");
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"5\r\nhel");
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"lo\r\nPING\r\n");
        assert!(matches!(
            decoder.decode(&mut buf).unwrap(),
            Some(ServerOp::Msg { .. })
        ));
        assert!(matches!(
            decoder.decode(&mut buf).unwrap(),
            Some(ServerOp::Ping)
        ));
    }

    #[test]
    fn decodes_info_and_err() {
        let ops =
            decode_all(b"INFO {\"server_id\":\"s1\",\"max_payload\":1024}\r\n-ERR 'bad subject'\r\n");
        assert!(
            matches!(&ops[0], ServerOp::Info(info) if info.server_id == "s1" && info.max_payload == 1024)
        );
        assert!(matches!(&ops[1], ServerOp::Err(msg) if msg == "bad subject"));
    }

    #[test]
    fn unknown_verb_is_surfaced_not_fatal() {
        let ops = decode_all(b"WAT nope\r\nPONG\r\n");
        assert!(matches!(&ops[0], ServerOp::Unknown(v) if v == "WAT"));
        assert!(matches!(&ops[1], ServerOp::Pong));
    }

    #[test]
    fn oversized_control_line_is_an_error() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();
        buf.resize(MAX_CONTROL_LINE + 1, b'A');
        assert!(decoder.decode(&mut buf).is_err());
    }
}
