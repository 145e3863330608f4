//! Telescope server wire protocol.
//!
//! # Wire Format
//!
//! Little-endian, every message starts with its total length and a type:
//!
//! ```text
//! ┌────────┬─────────┬──────────────┬─────────┬─────────┬───────────┐
//! │ Len(2) │ Type(2) │ Time µs (8)  │ RA (4)  │ Dec (4) │ Status(4) │
//! └────────┴─────────┴──────────────┴─────────┴─────────┴───────────┘
//! ```
//!
//! - Goto (client → server): type 0, 20 bytes, no status.
//! - Current position (server → client): type 0, 24 bytes.
//!
//! RA maps `[0h, 24h)` onto the full `u32` range. Dec maps `[-90°, 90°]`
//! onto `[-2^30, 2^30]`. Messages of any other type are skipped using their
//! length field.

use std::f64::consts::PI;

use thiserror::Error;

use super::direction::Direction;

pub const MSG_GOTO: u16 = 0;
pub const MSG_POSITION: u16 = 0;
pub const GOTO_LEN: u16 = 20;
pub const POSITION_LEN: u16 = 24;

/// Smallest legal message: length plus type.
const HEADER_LEN: usize = 4;
/// Largest message a server may send before the stream is considered corrupt.
pub const MAX_MESSAGE_LEN: usize = 120;

/// Radians per wire unit for both angles.
const ANGLE_SCALE: f64 = PI / 2_147_483_648.0;

/// Errors during protocol decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },
    #[error("invalid message length {len} for type {kind}")]
    InvalidLength { kind: u16, len: u16 },
}

/// Goto command sent to the telescope server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GotoFrame {
    pub time_us: i64,
    pub ra: u32,
    pub dec: i32,
}

impl GotoFrame {
    #[must_use]
    pub fn new(time_us: i64, target: &Direction) -> Self {
        let (ra, dec) = encode_angles(target);
        Self { time_us, ra, dec }
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut w = FrameWriter::new(buf);
        w.put_u16(GOTO_LEN);
        w.put_u16(MSG_GOTO);
        w.put_i64(self.time_us);
        w.put_u32(self.ra);
        w.put_i32(self.dec);
    }

    /// Decodes a goto frame; the server side of the protocol.
    ///
    /// # Errors
    ///
    /// Short buffers and wrong length fields.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FrameReader::new(buf);
        let len = r.take_u16()?;
        let kind = r.take_u16()?;
        if kind != MSG_GOTO || len != GOTO_LEN {
            return Err(ProtocolError::InvalidLength { kind, len });
        }
        Ok(Self {
            time_us: r.take_i64()?,
            ra: r.take_u32()?,
            dec: r.take_i32()?,
        })
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        decode_angles(self.ra, self.dec)
    }
}

/// Current pointing reported by the telescope server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionFrame {
    pub time_us: i64,
    pub ra: u32,
    pub dec: i32,
    /// Zero means OK; anything else is a server-specific error code.
    pub status: i32,
}

impl PositionFrame {
    #[must_use]
    pub fn new(time_us: i64, pointing: &Direction, status: i32) -> Self {
        let (ra, dec) = encode_angles(pointing);
        Self {
            time_us,
            ra,
            dec,
            status,
        }
    }

    /// Appends the encoded frame to `buf`. Used by test servers.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut w = FrameWriter::new(buf);
        w.put_u16(POSITION_LEN);
        w.put_u16(MSG_POSITION);
        w.put_i64(self.time_us);
        w.put_u32(self.ra);
        w.put_i32(self.dec);
        w.put_i32(self.status);
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        decode_angles(self.ra, self.dec)
    }
}

fn encode_angles(d: &Direction) -> (u32, i32) {
    let (ra, dec) = d.ra_dec();
    // ra is in [0, 2π); 2π itself wraps to 0
    let ra = ((ra / ANGLE_SCALE).round() as u64 & 0xFFFF_FFFF) as u32;
    let dec = (dec / ANGLE_SCALE).round() as i32;
    (ra, dec)
}

fn decode_angles(ra: u32, dec: i32) -> Direction {
    Direction::from_ra_dec(f64::from(ra) * ANGLE_SCALE, f64::from(dec) * ANGLE_SCALE)
}

/// Reassembles server messages from arbitrary read boundaries.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: Vec<u8>,
    skipped: u64,
}

impl StreamDecoder {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for the rest of a message.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Count of well-formed messages of unknown type dropped so far.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Next complete position message, `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidLength`] when the length field cannot be
    /// right. The stream cannot be resynchronized after that.
    pub fn next_frame(&mut self) -> Result<Option<PositionFrame>, ProtocolError> {
        loop {
            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }
            let mut r = FrameReader::new(&self.buf);
            let len = r.take_u16()?;
            let kind = r.take_u16()?;
            let size = usize::from(len);
            if !(HEADER_LEN..=MAX_MESSAGE_LEN).contains(&size) {
                return Err(ProtocolError::InvalidLength { kind, len });
            }
            if self.buf.len() < size {
                return Ok(None);
            }

            if kind != MSG_POSITION {
                self.buf.drain(..size);
                self.skipped += 1;
                continue;
            }
            if len < POSITION_LEN {
                return Err(ProtocolError::InvalidLength { kind, len });
            }
            let frame = PositionFrame {
                time_us: r.take_i64()?,
                ra: r.take_u32()?,
                dec: r.take_i32()?,
                status: r.take_i32()?,
            };
            // longer position messages carry fields we do not read
            self.buf.drain(..size);
            return Ok(Some(frame));
        }
    }
}

/// Appending writer for protocol frames.
struct FrameWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> FrameWriter<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
}

/// Reader for decoding protocol frames.
struct FrameReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> FrameReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let have = self.buf.len() - self.cursor;
        if have < N {
            return Err(ProtocolError::BufferTooSmall { need: N, have });
        }
        let mut arr = [0u8; N];
        arr.copy_from_slice(&self.buf[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(arr)
    }

    fn take_u16(&mut self) -> Result<u16, ProtocolError> {
        self.take().map(u16::from_le_bytes)
    }

    fn take_u32(&mut self) -> Result<u32, ProtocolError> {
        self.take().map(u32::from_le_bytes)
    }

    fn take_i32(&mut self) -> Result<i32, ProtocolError> {
        self.take().map(i32::from_le_bytes)
    }

    fn take_i64(&mut self) -> Result<i64, ProtocolError> {
        self.take().map(i64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_bytes(frame: &PositionFrame) -> Vec<u8> {
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        buf
    }

    #[test]
    fn goto_layout() {
        let frame = GotoFrame {
            time_us: 0x0102_0304_0506_0708,
            ra: 0x8000_0000,
            dec: -0x4000_0000,
        };
        let mut buf = Vec::new();
        frame.encode(&mut buf);
        assert_eq!(buf.len(), usize::from(GOTO_LEN));
        assert_eq!(&buf[0..2], &[20, 0]);
        assert_eq!(&buf[2..4], &[0, 0]);
        assert_eq!(&buf[4..12], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&buf[12..16], &[0, 0, 0, 0x80]);
        assert_eq!(&buf[16..20], &(-0x4000_0000i32).to_le_bytes());
        assert_eq!(GotoFrame::decode(&buf).unwrap(), frame);
    }

    #[test]
    fn angle_scaling() {
        let (ra, dec) = encode_angles(&Direction::from_hours_degrees(12.0, 45.0));
        assert_eq!(ra, 0x8000_0000);
        assert_eq!(dec, 0x2000_0000);

        let (ra, dec) = encode_angles(&Direction::from_hours_degrees(6.0, -45.0));
        assert_eq!(ra, 0x4000_0000);
        assert_eq!(dec, -0x2000_0000);

        let (_, dec) = encode_angles(&Direction::from_hours_degrees(0.0, 90.0));
        assert_eq!(dec, 0x4000_0000);

        let (ra, _) = encode_angles(&Direction::from_hours_degrees(0.0, 0.0));
        assert_eq!(ra, 0);
    }

    #[test]
    fn decodes_across_split_reads() {
        let frame = PositionFrame::new(42, &Direction::from_hours_degrees(5.5, -5.4), 0);
        let bytes = position_bytes(&frame);

        let mut decoder = StreamDecoder::default();
        decoder.extend(&bytes[..3]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&bytes[3..17]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&bytes[17..]);
        assert_eq!(decoder.next_frame().unwrap(), Some(frame));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn skips_unknown_types() {
        let frame = PositionFrame::new(7, &Direction::from_hours_degrees(1.0, 2.0), 0);
        let mut bytes = vec![6, 0, 9, 0, 0xAA, 0xBB];
        bytes.extend(position_bytes(&frame));

        let mut decoder = StreamDecoder::default();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_frame().unwrap(), Some(frame));
        assert_eq!(decoder.skipped(), 1);
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn rejects_impossible_lengths() {
        let mut decoder = StreamDecoder::default();
        decoder.extend(&[2, 0, 0, 0]);
        assert_eq!(
            decoder.next_frame(),
            Err(ProtocolError::InvalidLength { kind: 0, len: 2 })
        );

        let mut decoder = StreamDecoder::default();
        decoder.extend(&[20, 0, 0, 0]);
        decoder.extend(&[0; 16]);
        assert_eq!(
            decoder.next_frame(),
            Err(ProtocolError::InvalidLength { kind: 0, len: 20 })
        );
    }

    #[test]
    fn longer_position_message_is_accepted() {
        let frame = PositionFrame::new(1, &Direction::from_hours_degrees(3.0, 3.0), 0);
        let mut bytes = position_bytes(&frame);
        bytes[0] = 28;
        bytes.extend([0xEE; 4]);

        let mut decoder = StreamDecoder::default();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_frame().unwrap(), Some(frame));
        assert_eq!(decoder.buffered(), 0);
    }
}
