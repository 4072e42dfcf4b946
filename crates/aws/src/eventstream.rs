//! Decoder for the `application/vnd.amazon.eventstream` framing.
//!
//! Each frame is laid out as:
//!
//! ```text
//! total_len:u32 | headers_len:u32 | prelude_crc:u32 | headers | payload | message_crc:u32
//! ```
//!
//! Both CRCs are CRC-32 (IEEE). The decoder is incremental: push whatever
//! bytes the transport hands over and pull complete frames as they appear.

use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::error::PlatformError;

const PRELUDE_LEN: usize = 12;
const MIN_FRAME_LEN: usize = 16;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A typed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(k, v)| match v {
            HeaderValue::String(s) if k == name => Some(s.as_str()),
            _ => None,
        })
    }

    /// `:message-type`, defaulting to `event`.
    pub fn message_type(&self) -> &str {
        self.header_str(":message-type").unwrap_or("event")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header_str(":event-type")
    }

    /// Turn exception and error frames into a [`PlatformError`].
    pub fn into_result(self) -> Result<Frame, PlatformError> {
        match self.message_type() {
            "exception" => {
                let kind = self
                    .header_str(":exception-type")
                    .unwrap_or("UnknownException")
                    .to_string();
                Err(PlatformError::Exception {
                    kind,
                    message: payload_message(&self.payload),
                })
            }
            "error" => Err(PlatformError::Exception {
                kind: self
                    .header_str(":error-code")
                    .unwrap_or("UnknownError")
                    .to_string(),
                message: self
                    .header_str(":error-message")
                    .map(str::to_string)
                    .unwrap_or_else(|| payload_message(&self.payload)),
            }),
            _ => Ok(self),
        }
    }
}

fn payload_message(payload: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("Message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(payload).into_owned())
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buf: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received that do not yet form a complete frame.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, PlatformError> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = read_u32(&self.buf[0..4]) as usize;
        let headers_len = read_u32(&self.buf[4..8]) as usize;
        let prelude_crc = read_u32(&self.buf[8..12]);

        if crc32(&self.buf[0..8]) != prelude_crc {
            return Err(PlatformError::EventStream("prelude checksum mismatch".into()));
        }
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
            return Err(PlatformError::EventStream(format!(
                "frame length {total_len} out of range"
            )));
        }
        if headers_len > total_len - MIN_FRAME_LEN {
            return Err(PlatformError::EventStream(format!(
                "header length {headers_len} exceeds frame"
            )));
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..total_len).collect();
        let message_crc = read_u32(&frame[total_len - 4..]);
        if crc32(&frame[..total_len - 4]) != message_crc {
            return Err(PlatformError::EventStream("message checksum mismatch".into()));
        }

        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = frame[headers_end..total_len - 4].to_vec();
        Ok(Some(Frame { headers, payload }))
    }
}

/// Adapt a streaming HTTP body into a stream of frames.
///
/// Exception frames are passed through untouched; callers decide whether to
/// apply [`Frame::into_result`].
pub fn frames(
    response: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<Frame, PlatformError>> + Send>> {
    let body = response.bytes_stream().boxed();
    futures::stream::unfold(
        (body, EventStreamDecoder::new(), false),
        |(mut body, mut decoder, finished)| async move {
            if finished {
                return None;
            }
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => return Some((Ok(frame), (body, decoder, false))),
                    Ok(None) => {}
                    Err(e) => return Some((Err(e), (body, decoder, true))),
                }
                match body.next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => {
                        return Some((Err(PlatformError::from_reqwest(e)), (body, decoder, true)));
                    }
                    None if decoder.has_partial() => {
                        let err = PlatformError::EventStream("stream ended mid-frame".into());
                        return Some((Err(err), (body, decoder, true)));
                    }
                    None => return None,
                }
            }
        },
    )
    .boxed()
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn parse_headers(mut bytes: &[u8]) -> Result<Vec<(String, HeaderValue)>, PlatformError> {
    let mut headers = Vec::new();
    while !bytes.is_empty() {
        let name_len = take(&mut bytes, 1)?[0] as usize;
        let name = String::from_utf8(take(&mut bytes, name_len)?.to_vec())
            .map_err(|_| PlatformError::EventStream("header name is not UTF-8".into()))?;
        let kind = take(&mut bytes, 1)?[0];
        let value = match kind {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(take(&mut bytes, 1)?[0] as i8),
            3 => {
                let b = take(&mut bytes, 2)?;
                HeaderValue::Short(i16::from_be_bytes([b[0], b[1]]))
            }
            4 => {
                let b = take(&mut bytes, 4)?;
                HeaderValue::Int(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            5 | 8 => {
                let b = take(&mut bytes, 8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                let n = i64::from_be_bytes(raw);
                if kind == 5 {
                    HeaderValue::Long(n)
                } else {
                    HeaderValue::Timestamp(n)
                }
            }
            6 | 7 => {
                let b = take(&mut bytes, 2)?;
                let len = u16::from_be_bytes([b[0], b[1]]) as usize;
                let data = take(&mut bytes, len)?.to_vec();
                if kind == 6 {
                    HeaderValue::Bytes(data)
                } else {
                    HeaderValue::String(String::from_utf8(data).map_err(|_| {
                        PlatformError::EventStream(format!("header {name} is not UTF-8"))
                    })?)
                }
            }
            9 => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(take(&mut bytes, 16)?);
                HeaderValue::Uuid(raw)
            }
            other => {
                return Err(PlatformError::EventStream(format!(
                    "unknown header type {other}"
                )));
            }
        };
        headers.push((name, value));
    }
    Ok(headers)
}

fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8], PlatformError> {
    if bytes.len() < n {
        return Err(PlatformError::EventStream("truncated header block".into()));
    }
    let (head, tail) = bytes.split_at(n);
    *bytes = tail;
    Ok(head)
}

/// CRC-32 (IEEE 802.3, reflected).
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encode a frame with string headers.
    pub(crate) fn encode(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
        let mut header_bytes = Vec::new();
        for (name, value) in headers {
            header_bytes.push(name.len() as u8);
            header_bytes.extend_from_slice(name.as_bytes());
            header_bytes.push(7);
            header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
            header_bytes.extend_from_slice(value.as_bytes());
        }
        let total = (MIN_FRAME_LEN + header_bytes.len() + payload.len()) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        let prelude_crc = crc32(&out);
        out.extend_from_slice(&prelude_crc.to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(payload);
        let crc = crc32(&out);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn decodes_frames_split_across_chunks() {
        let mut bytes = encode(
            &[(":message-type", "event"), (":event-type", "result")],
            br#"{"content":[]}"#,
        );
        bytes.extend(encode(&[(":event-type", "result")], b"{}"));

        let mut decoder = EventStreamDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(7) {
            decoder.push(chunk);
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert!(!decoder.has_partial());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event_type(), Some("result"));
        assert_eq!(frames[0].payload, br#"{"content":[]}"#);
        assert_eq!(frames[1].message_type(), "event");
    }

    #[test]
    fn incomplete_frame_waits_for_more_bytes() {
        let bytes = encode(&[], b"hello");
        let mut decoder = EventStreamDecoder::new();
        decoder.push(&bytes[..bytes.len() - 1]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.push(&bytes[bytes.len() - 1..]);
        assert_eq!(decoder.next_frame().unwrap().unwrap().payload, b"hello");
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut bytes = encode(&[], b"hello");
        bytes[PRELUDE_LEN] ^= 0xFF;
        let mut decoder = EventStreamDecoder::new();
        decoder.push(&bytes);
        let err = decoder.next_frame().unwrap_err();
        assert!(err.to_string().contains("message checksum"));
    }

    #[test]
    fn exception_frame_becomes_error() {
        let bytes = encode(
            &[
                (":message-type", "exception"),
                (":exception-type", "ValidationException"),
            ],
            br#"{"message":"bad code"}"#,
        );
        let mut decoder = EventStreamDecoder::new();
        decoder.push(&bytes);
        let frame = decoder.next_frame().unwrap().unwrap();
        match frame.into_result() {
            Err(PlatformError::Exception { kind, message }) => {
                assert_eq!(kind, "ValidationException");
                assert_eq!(message, "bad code");
            }
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[test]
    fn typed_headers_parse() {
        let mut block = Vec::new();
        block.push(4u8);
        block.extend_from_slice(b"flag");
        block.push(0);
        block.push(3u8);
        block.extend_from_slice(b"num");
        block.push(4);
        block.extend_from_slice(&42i32.to_be_bytes());
        let headers = parse_headers(&block).unwrap();
        assert_eq!(headers[0], ("flag".into(), HeaderValue::Bool(true)));
        assert_eq!(headers[1], ("num".into(), HeaderValue::Int(42)));
    }
}
