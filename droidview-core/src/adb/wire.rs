//! ADB wire framing: the fixed 24-byte header and frame builders.
//!
//! ## Wire format
//!
//! Every ADB frame is a 24-byte header followed by `payload_length`
//! payload bytes. All header integers are little-endian:
//!
//! ```text
//! command:        u32  (4)   four ASCII bytes, e.g. "CNXN"
//! arg0:           u32  (4)
//! arg1:           u32  (4)
//! payload_length: u32  (4)
//! checksum:       u32  (4)   sum of payload bytes mod 2^32
//! magic:          u32  (4)   bitwise NOT of command
//! ```
//!
//! Checksum and magic are computed on send; on receive they are
//! advisory and this implementation does not verify them.

use crate::error::CoreError;

// ── Constants ────────────────────────────────────────────────────

/// Encoded header size on the wire.
pub const HEADER_LENGTH: usize = 24;

/// Protocol version carried in CNXN `arg0`.
pub const CONNECT_VERSION: u32 = 0x0100_0000;

/// Maximum payload this side accepts, advertised in CNXN `arg1`.
/// Some devices only support 16 KiB USB buffers, so stay under that.
pub const CONNECT_MAX_DATA: u32 = 15 * 1024;

/// CNXN system-identity payload: `"host::"` plus a trailing NUL.
pub const CONNECT_PAYLOAD: &[u8] = b"host::\0";

/// AUTH `arg0`: server challenge token.
pub const AUTH_TYPE_TOKEN: u32 = 1;
/// AUTH `arg0`: client's signed response.
pub const AUTH_TYPE_SIGNATURE: u32 = 2;
/// AUTH `arg0`: client's public-key blob.
pub const AUTH_TYPE_RSA_PUBLIC: u32 = 3;

// ── AdbCommand ───────────────────────────────────────────────────

/// The six ADB command tags, as 32-bit little-endian ASCII values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AdbCommand {
    Connect = 0x4e58_4e43,   // "CNXN"
    Auth = 0x4854_5541,      // "AUTH"
    Open = 0x4e45_504f,      // "OPEN"
    Okay = 0x5941_4b4f,      // "OKAY"
    Close = 0x4553_4c43,     // "CLSE"
    Write = 0x4554_5257,     // "WRTE"
}

impl AdbCommand {
    /// Map a raw tag back to a command, if known.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x4e58_4e43 => Some(AdbCommand::Connect),
            0x4854_5541 => Some(AdbCommand::Auth),
            0x4e45_504f => Some(AdbCommand::Open),
            0x5941_4b4f => Some(AdbCommand::Okay),
            0x4553_4c43 => Some(AdbCommand::Close),
            0x4554_5257 => Some(AdbCommand::Write),
            _ => None,
        }
    }
}

// ── AdbHeader ────────────────────────────────────────────────────

/// A parsed 24-byte ADB header.
///
/// `command` is kept as the raw u32 so unknown tags can be logged and
/// skipped instead of failing the receive loop.
#[derive(Debug, Clone, Copy)]
pub struct AdbHeader {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub payload_length: u32,
    pub checksum: u32,
    pub magic: u32,
}

impl AdbHeader {
    /// Deserialize from the 24 raw header bytes.
    pub fn from_bytes(bytes: &[u8; HEADER_LENGTH]) -> Self {
        let u32_at = |off: usize| u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        Self {
            command: u32_at(0),
            arg0: u32_at(4),
            arg1: u32_at(8),
            payload_length: u32_at(12),
            checksum: u32_at(16),
            magic: u32_at(20),
        }
    }

    /// The parsed command tag, if this header carries a known one.
    pub fn command(&self) -> Option<AdbCommand> {
        AdbCommand::from_u32(self.command)
    }
}

// ── AdbMessage ───────────────────────────────────────────────────

/// A complete ADB frame (header fields plus payload), used on the
/// handshake path where payloads are small and copied.
#[derive(Debug, Clone)]
pub struct AdbMessage {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl AdbMessage {
    pub fn command(&self) -> Option<AdbCommand> {
        AdbCommand::from_u32(self.command)
    }
}

// ── Frame builders ───────────────────────────────────────────────

/// Sum of payload bytes modulo 2^32.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// Encode a complete frame: header plus payload in one buffer.
pub fn encode_frame(command: AdbCommand, arg0: u32, arg1: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; HEADER_LENGTH + payload.len()];
    frame[0..4].copy_from_slice(&(command as u32).to_le_bytes());
    frame[4..8].copy_from_slice(&arg0.to_le_bytes());
    frame[8..12].copy_from_slice(&arg1.to_le_bytes());
    frame[12..16].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    frame[16..20].copy_from_slice(&payload_checksum(payload).to_le_bytes());
    frame[20..24].copy_from_slice(&(!(command as u32)).to_le_bytes());
    frame[HEADER_LENGTH..].copy_from_slice(payload);
    frame
}

/// Decode one frame from a contiguous buffer.
///
/// Only used on the test and handshake paths; the receive loop parses
/// headers and payloads separately to avoid the extra copy.
pub fn decode_frame(bytes: &[u8]) -> Result<AdbMessage, CoreError> {
    if bytes.len() < HEADER_LENGTH {
        return Err(CoreError::Protocol(format!(
            "frame shorter than header: {} bytes",
            bytes.len()
        )));
    }
    let header = AdbHeader::from_bytes(bytes[..HEADER_LENGTH].try_into().unwrap());
    let total = HEADER_LENGTH + header.payload_length as usize;
    if bytes.len() < total {
        return Err(CoreError::Protocol(format!(
            "truncated payload: {} < {}",
            bytes.len(),
            total
        )));
    }
    Ok(AdbMessage {
        command: header.command,
        arg0: header.arg0,
        arg1: header.arg1,
        payload: bytes[HEADER_LENGTH..total].to_vec(),
    })
}

/// CNXN frame announcing version and maximum payload.
pub fn connect_frame() -> Vec<u8> {
    encode_frame(
        AdbCommand::Connect,
        CONNECT_VERSION,
        CONNECT_MAX_DATA,
        CONNECT_PAYLOAD,
    )
}

/// AUTH frame of the given type (token / signature / public key).
pub fn auth_frame(auth_type: u32, data: &[u8]) -> Vec<u8> {
    encode_frame(AdbCommand::Auth, auth_type, 0, data)
}

/// OPEN frame with a NUL-terminated destination string.
pub fn open_frame(local_id: i32, destination: &str) -> Vec<u8> {
    let mut dest = Vec::with_capacity(destination.len() + 1);
    dest.extend_from_slice(destination.as_bytes());
    dest.push(0);
    encode_frame(AdbCommand::Open, local_id as u32, 0, &dest)
}

/// WRTE frame carrying stream data.
pub fn write_frame(local_id: i32, remote_id: i32, data: &[u8]) -> Vec<u8> {
    encode_frame(AdbCommand::Write, local_id as u32, remote_id as u32, data)
}

/// OKAY frame; grants the peer one more WRTE on the stream.
pub fn okay_frame(local_id: i32, remote_id: i32) -> Vec<u8> {
    encode_frame(AdbCommand::Okay, local_id as u32, remote_id as u32, &[])
}

/// CLSE frame.
pub fn close_frame(local_id: i32, remote_id: i32) -> Vec<u8> {
    encode_frame(AdbCommand::Close, local_id as u32, remote_id as u32, &[])
}

/// Sync sub-protocol chunk header: 4 ASCII id bytes plus a
/// little-endian u32 argument (a length or an mtime).
pub fn sync_header(id: &[u8; 4], arg: u32) -> [u8; 8] {
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(id);
    header[4..8].copy_from_slice(&arg.to_le_bytes());
    header
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tags_are_ascii() {
        assert_eq!(AdbCommand::Connect as u32, u32::from_le_bytes(*b"CNXN"));
        assert_eq!(AdbCommand::Auth as u32, u32::from_le_bytes(*b"AUTH"));
        assert_eq!(AdbCommand::Open as u32, u32::from_le_bytes(*b"OPEN"));
        assert_eq!(AdbCommand::Okay as u32, u32::from_le_bytes(*b"OKAY"));
        assert_eq!(AdbCommand::Close as u32, u32::from_le_bytes(*b"CLSE"));
        assert_eq!(AdbCommand::Write as u32, u32::from_le_bytes(*b"WRTE"));
    }

    #[test]
    fn frame_roundtrip() {
        let payload = b"shell:ls -la\0";
        let frame = encode_frame(AdbCommand::Open, 7, 0, payload);
        assert_eq!(frame.len(), HEADER_LENGTH + payload.len());

        let msg = decode_frame(&frame).unwrap();
        assert_eq!(msg.command(), Some(AdbCommand::Open));
        assert_eq!(msg.arg0, 7);
        assert_eq!(msg.arg1, 0);
        assert_eq!(msg.payload, payload);
    }

    #[test]
    fn magic_is_inverted_command() {
        let frame = encode_frame(AdbCommand::Okay, 1, 2, &[]);
        let header = AdbHeader::from_bytes(frame[..HEADER_LENGTH].try_into().unwrap());
        assert_eq!(header.magic, !header.command);
    }

    #[test]
    fn checksum_is_byte_sum() {
        assert_eq!(payload_checksum(&[]), 0);
        assert_eq!(payload_checksum(&[1, 2, 3]), 6);
        assert_eq!(payload_checksum(&[0xFF; 1000]), 255 * 1000);

        let frame = encode_frame(AdbCommand::Write, 1, 2, &[0x10, 0x20]);
        let header = AdbHeader::from_bytes(frame[..HEADER_LENGTH].try_into().unwrap());
        assert_eq!(header.checksum, 0x30);
    }

    #[test]
    fn connect_frame_layout() {
        let frame = connect_frame();
        let msg = decode_frame(&frame).unwrap();
        assert_eq!(msg.command(), Some(AdbCommand::Connect));
        assert_eq!(msg.arg0, CONNECT_VERSION);
        assert_eq!(msg.arg1, CONNECT_MAX_DATA);
        assert_eq!(msg.payload, b"host::\0");
    }

    #[test]
    fn open_frame_is_nul_terminated() {
        let frame = open_frame(-3, "tcpip:5555");
        let msg = decode_frame(&frame).unwrap();
        assert_eq!(msg.arg0 as i32, -3);
        assert_eq!(msg.payload.last(), Some(&0u8));
        assert_eq!(&msg.payload[..msg.payload.len() - 1], b"tcpip:5555");
    }

    #[test]
    fn truncated_frames_rejected() {
        let frame = encode_frame(AdbCommand::Write, 1, 2, b"abcdef");
        assert!(decode_frame(&frame[..10]).is_err());
        assert!(decode_frame(&frame[..frame.len() - 1]).is_err());
    }

    #[test]
    fn sync_header_layout() {
        let header = sync_header(b"SEND", 0x11223344);
        assert_eq!(&header[0..4], b"SEND");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 0x11223344);
    }
}
