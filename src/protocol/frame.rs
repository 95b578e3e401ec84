//! WebSocket handshake and the RFC-6455 frame subset used to carry command
//! payloads (spec.md §4.1).
//!
//! Both client and server need the same header math, so it lives in one
//! place: [`header_len_for_payload`] / [`write_frame_header`] build outbound
//! frames, [`FrameParser`] reassembles inbound ones.

use super::error::FrameError;
use super::types::{MAX_CONTROL_FRAME_PAYLOAD, MAX_PAYLOAD_SIZE};

/// The GUID RFC 6455 mandates be appended to the client's key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

/// The fixed client handshake request. The key is hard-coded: this codebase
/// never validates the server's response, so key randomness buys nothing.
pub const CLIENT_HANDSHAKE_REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

/// Builds the `101 Switching Protocols` response for a given client key.
#[must_use]
pub fn build_handshake_response(client_key: &str) -> String {
    use base64::Engine;
    use sha1::{Digest, Sha1};

    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    let accept = base64::engine::general_purpose::STANDARD.encode(digest);

    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Scans `buf` for the header/body separator (`\r\n\r\n`).
///
/// Returns the byte offset just past the separator, i.e. how many leading
/// bytes may be discarded, once found.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Extracts `Sec-WebSocket-Key` from a raw HTTP upgrade request, parsing
/// headers line by line (spec.md §4.1).
#[must_use]
pub fn parse_websocket_key(request: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(request).ok()?;
    for line in text.split("\r\n") {
        let mut parts = line.splitn(2, ':');
        let name = parts.next()?.trim();
        if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
            return Some(parts.next()?.trim().to_string());
        }
    }
    None
}

/// Number of header bytes a frame carrying `payload_length` bytes needs
/// (no mask key, since outbound frames are never masked).
#[must_use]
pub const fn header_len_for_payload(payload_length: usize) -> usize {
    if payload_length < 126 {
        2
    } else if payload_length <= 0xFFFF {
        4
    } else {
        10
    }
}

/// Writes an outbound frame header for `payload_length` bytes of `opcode`
/// into `buf[..header_len_for_payload(payload_length)]`.
///
/// # Panics
/// Panics if `buf` is shorter than the required header length.
pub fn write_frame_header(buf: &mut [u8], opcode: u8, payload_length: usize) {
    let header_len = header_len_for_payload(payload_length);
    assert!(buf.len() >= header_len, "frame header buffer too small");

    buf[0] = 0x80 | (opcode & 0x0F);

    if payload_length < 126 {
        buf[1] = payload_length as u8;
    } else if payload_length <= 0xFFFF {
        buf[1] = 126;
        buf[2..4].copy_from_slice(&(payload_length as u16).to_be_bytes());
    } else {
        buf[1] = 127;
        buf[2..10].copy_from_slice(&(payload_length as u64).to_be_bytes());
    }
}

/// A fully decoded inbound frame payload, ready for dispatch.
#[derive(Debug)]
pub enum FrameEvent {
    /// A complete binary message payload (reassembled from any
    /// continuation frames).
    Binary(Vec<u8>),
    /// A ping; the caller must reply with a pong carrying the same payload.
    Ping(Vec<u8>),
    /// A pong frame; ignored by both peers other than as keep-alive proof.
    Pong,
    /// A close frame; ignored, the peer will close the TCP stream itself.
    Close,
}

#[derive(Debug, Default)]
struct InProgressMessage {
    opcode: u8,
    data: Vec<u8>,
    frame_count: u32,
}

/// Incremental frame reassembler. Feed it raw bytes as they arrive; it
/// yields [`FrameEvent`]s as complete frames/messages become available.
///
/// Mirrors the original's single fixed read buffer: callers are expected to
/// bound how much unconsumed input they retain (spec.md §3.7's 1024-byte
/// read buffer), this type itself has no such limit baked in — the size
/// cap is enforced on the reassembled *message* per spec.md §4.1 item 4.
#[derive(Debug, Default)]
pub struct FrameParser {
    message: Option<InProgressMessage>,
}

impl FrameParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a message's reassembly is in progress (a binary frame has
    /// started but its `FIN` frame hasn't arrived yet).
    #[must_use]
    pub fn has_partial_message(&self) -> bool {
        self.message.is_some()
    }

    /// Attempts to parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` doesn't yet contain a complete frame.
    /// On success, returns the number of bytes consumed and, if a full
    /// message was completed, the resulting [`FrameEvent`].
    pub fn parse_one(&mut self, buf: &[u8]) -> Result<Option<(usize, Option<FrameEvent>)>, FrameError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let rsv_mask = 0x70;
        if byte0 & rsv_mask != 0 {
            return Err(FrameError::NonZeroRsv);
        }

        let fin = byte0 & 0x80 != 0;
        let opcode = byte0 & 0x0F;

        match opcode {
            OPCODE_CONTINUATION | OPCODE_BINARY | OPCODE_CLOSE | OPCODE_PING | OPCODE_PONG => {}
            // The WebSocket opcode nibble's high bit marks the control-frame
            // range (8-15); an unrecognized opcode in that range is a
            // distinct contract ("Client sent an unknown control frame")
            // from an unrecognized data-frame opcode (spec.md §7).
            other if other & 0x08 != 0 => return Err(FrameError::UnknownControlFrame),
            other => return Err(FrameError::UnknownOpcode(other)),
        }

        let masked = byte1 & 0x80 != 0;
        let len_field = byte1 & 0x7F;

        let (payload_len, mut pos): (usize, usize) = if len_field < 126 {
            (len_field as usize, 2)
        } else if len_field == 126 {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        } else {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(raw) as usize, 10)
        };

        let is_control = matches!(opcode, OPCODE_CLOSE | OPCODE_PING | OPCODE_PONG);

        if is_control && payload_len > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(FrameError::ControlFrameTooLong {
                opcode,
                length: payload_len,
            });
        }
        if is_control && !fin {
            return Err(FrameError::FragmentedControlFrame);
        }

        let mask_key_len = if masked { 4 } else { 0 };
        let header_len = pos + mask_key_len;

        if buf.len() < header_len + payload_len {
            return Ok(None);
        }

        let mut payload = buf[header_len..header_len + payload_len].to_vec();

        if masked {
            let key = [
                buf[pos],
                buf[pos + 1],
                buf[pos + 2],
                buf[pos + 3],
            ];
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }
        pos = header_len + payload_len;

        if is_control {
            let event = match opcode {
                OPCODE_CLOSE => FrameEvent::Close,
                OPCODE_PING => FrameEvent::Ping(payload),
                OPCODE_PONG => FrameEvent::Pong,
                _ => unreachable!(),
            };
            return Ok(Some((pos, Some(event))));
        }

        // Data frame (continuation or binary).
        match (opcode, self.message.is_some()) {
            (OPCODE_BINARY, true) => {
                // A new binary frame starting mid-message is itself a kind
                // of malformed continuation; the original rejects it the
                // same way as a bare continuation frame with no start.
                return Err(FrameError::UnstartedContinuation);
            }
            (OPCODE_BINARY, false) => {
                self.message = Some(InProgressMessage {
                    opcode: OPCODE_BINARY,
                    data: Vec::new(),
                    frame_count: 0,
                });
            }
            (OPCODE_CONTINUATION, false) => {
                return Err(FrameError::UnstartedContinuation);
            }
            (OPCODE_CONTINUATION, true) => {}
            _ => unreachable!(),
        }

        let in_progress = self.message.as_mut().expect("checked above");
        in_progress.data.extend_from_slice(&payload);
        in_progress.frame_count += 1;

        if in_progress.data.len() > MAX_PAYLOAD_SIZE {
            let opcode = in_progress.opcode;
            let length = in_progress.data.len();
            self.message = None;
            return Err(FrameError::MessageTooLong { opcode, length });
        }

        if fin {
            let finished = self.message.take().expect("checked above");
            if finished.data.is_empty() {
                return Err(if finished.frame_count <= 1 {
                    FrameError::EmptyMessage
                } else {
                    FrameError::EmptyFragmentedMessage
                });
            }
            return Ok(Some((pos, Some(FrameEvent::Binary(finished.data)))));
        }

        Ok(Some((pos, None)))
    }
}

/// Builds an outbound control frame (ping/pong/close) with `payload`.
///
/// # Panics
/// Panics if `payload` exceeds [`MAX_CONTROL_FRAME_PAYLOAD`].
#[must_use]
pub fn encode_control_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= MAX_CONTROL_FRAME_PAYLOAD);
    let mut out = vec![0u8; header_len_for_payload(payload.len())];
    write_frame_header(&mut out, opcode, payload.len());
    out.extend_from_slice(payload);
    out
}

/// Builds an outbound binary frame wrapping `payload`.
#[must_use]
pub fn encode_binary_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; header_len_for_payload(payload.len())];
    write_frame_header(&mut out, OPCODE_BINARY, payload.len());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_len_thresholds() {
        assert_eq!(header_len_for_payload(0), 2);
        assert_eq!(header_len_for_payload(125), 2);
        assert_eq!(header_len_for_payload(126), 4);
        assert_eq!(header_len_for_payload(65535), 4);
        assert_eq!(header_len_for_payload(65536), 10);
    }

    #[test]
    fn roundtrip_unmasked_binary_frame() {
        let payload = b"hello world";
        let frame = encode_binary_frame(payload);

        let mut parser = FrameParser::new();
        let (consumed, event) = parser.parse_one(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        match event.unwrap() {
            FrameEvent::Binary(data) => assert_eq!(data, payload),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn masked_frame_is_unmasked_on_ingress() {
        let payload = b"abcd";
        let key = [0x11, 0x22, 0x33, 0x44];
        let mut masked_payload = payload.to_vec();
        for (i, b) in masked_payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }

        let mut frame = vec![0x82, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&key);
        frame.extend_from_slice(&masked_payload);

        let mut parser = FrameParser::new();
        let (consumed, event) = parser.parse_one(&frame).unwrap().unwrap();
        assert_eq!(consumed, frame.len());
        match event.unwrap() {
            FrameEvent::Binary(data) => assert_eq!(data, payload),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn oversize_message_is_rejected() {
        let mut frame = Vec::new();
        frame.push(0x82);
        frame.push(127);
        frame.extend_from_slice(&(0x10000u64).to_be_bytes());
        frame.extend_from_slice(&vec![0u8; 0x10000]);

        let mut parser = FrameParser::new();
        let err = parser.parse_one(&frame).unwrap_err();
        assert_eq!(
            err,
            FrameError::MessageTooLong {
                opcode: OPCODE_BINARY,
                length: 0x10000
            }
        );
    }

    #[test]
    fn nonzero_rsv_bits_rejected() {
        let frame = [0x82 | 0x40, 0x00];
        let mut parser = FrameParser::new();
        assert_eq!(
            parser.parse_one(&frame).unwrap_err(),
            FrameError::NonZeroRsv
        );
    }

    #[test]
    fn oversized_control_frame_rejected() {
        let mut frame = vec![0x89, 126];
        frame.extend_from_slice(&(200u16).to_be_bytes());
        frame.extend_from_slice(&vec![0u8; 200]);
        let mut parser = FrameParser::new();
        assert_eq!(
            parser.parse_one(&frame).unwrap_err(),
            FrameError::ControlFrameTooLong {
                opcode: OPCODE_PING,
                length: 200
            }
        );
    }

    #[test]
    fn handshake_accept_matches_rfc6455_example() {
        let response = build_handshake_response("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn header_end_detection() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nleftover";
        let end = find_header_end(buf).unwrap();
        assert_eq!(&buf[end..], b"leftover");
    }
}
