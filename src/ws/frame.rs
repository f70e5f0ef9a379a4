//! RFC 6455 frame codec.
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |            (16/64)            |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               | Masking-key, if MASK set to 1 |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------+ - - - - - - - - - - - - - - - +
//! ```

use std::fmt;
use std::ops::Range;

use crate::ws::error::WebSocketError;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpCode::Continuation => "continuation",
            OpCode::Text => "text",
            OpCode::Binary => "binary",
            OpCode::Close => "close",
            OpCode::Ping => "ping",
            OpCode::Pong => "pong",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(WebSocketError::Protocol(format!("unknown opcode {:#x}", other))),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    pub const UNSUPPORTED_DATA: CloseCode = CloseCode(1003);
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    pub const ABNORMAL: CloseCode = CloseCode(1006);
    pub const INVALID_PAYLOAD: CloseCode = CloseCode(1007);
    pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
    pub const MESSAGE_TOO_BIG: CloseCode = CloseCode(1009);
    pub const INTERNAL_ERROR: CloseCode = CloseCode(1011);
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode(code)
    }
}

/// A decoded frame header plus the location of its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub fin: bool,
    pub masked: bool,
    /// Payload bytes within the parse buffer, already unmasked.
    pub payload: Range<usize>,
}

/// XOR `data` with `key`, cycling the key. Applying it twice restores `data`.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` until the whole frame is buffered, then the frame and
/// the number of bytes it occupies. A masked payload is unmasked in place.
pub fn parse_frame(buf: &mut [u8], max_payload: u64) -> Result<Option<(Frame, usize)>, WebSocketError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let rsv = buf[0] & 0x70;
    let opcode = OpCode::try_from(buf[0] & 0x0F)?;
    let masked = buf[1] & 0x80 != 0;
    let len7 = buf[1] & 0x7F;

    if rsv != 0 {
        return Err(WebSocketError::Protocol(format!("reserved bits set: {:#x}", rsv)));
    }

    let mut offset = 2usize;
    let length: u64 = match len7 {
        126 => {
            if buf.len() < offset + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
            offset += 2;
            len
        }
        127 => {
            if buf.len() < offset + 8 {
                return Ok(None);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[2..10]);
            offset += 8;
            u64::from_be_bytes(bytes)
        }
        n => n as u64,
    };

    if opcode.is_control() && (!fin || length > 125) {
        return Err(WebSocketError::Protocol(format!(
            "control frame {} must be final and at most 125 bytes",
            opcode
        )));
    }

    if length > max_payload {
        return Err(WebSocketError::FrameTooLarge { size: length, max: max_payload });
    }
    let length = usize::try_from(length).map_err(|_| WebSocketError::FrameTooLarge {
        size: length,
        max: max_payload,
    })?;

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let end = match offset.checked_add(length) {
        Some(end) => end,
        None => return Err(WebSocketError::FrameTooLarge { size: length as u64, max: max_payload }),
    };
    if buf.len() < end {
        return Ok(None);
    }

    if let Some(key) = mask {
        apply_mask(&mut buf[offset..end], key);
    }

    Ok(Some((
        Frame {
            opcode,
            fin,
            masked,
            payload: offset..end,
        },
        end,
    )))
}

/// Serialize a final frame. `mask: None` leaves the payload in the clear.
pub fn build_frame_with_mask(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode as u8);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let len = payload.len();
    if len < 126 {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Serialize a final client frame with a random mask key.
pub fn build_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    build_frame_with_mask(opcode, payload, Some(rand::random::<[u8; 4]>()))
}

/// Close payload: 2-byte big-endian code followed by the UTF-8 reason.
///
/// No code means an empty payload (the reason is dropped).
pub fn close_payload(code: Option<CloseCode>, reason: &str) -> Vec<u8> {
    match code {
        Some(code) => {
            let mut payload = code.0.to_be_bytes().to_vec();
            // Control payloads are limited to 125 bytes.
            let mut end = reason.len().min(123);
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            payload.extend_from_slice(&reason.as_bytes()[..end]);
            payload
        }
        None => Vec::new(),
    }
}

/// Split a received close payload into code and reason.
pub fn parse_close_payload(payload: &[u8]) -> (Option<CloseCode>, String) {
    if payload.len() < 2 {
        return (None, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    (Some(CloseCode(code)), String::from_utf8_lossy(&payload[2..]).into_owned())
}
