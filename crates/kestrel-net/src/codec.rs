//! Primitive wire codec: fixed-width integers, length-prefixed blobs and
//! fixed-point vectors.
//!
//! Every integer is little-endian. Variable-length fields are always written
//! as a `u32` length followed by the raw bytes; nothing on the wire is null
//! terminated.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   bytes            |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! Floating values that travel over the network are quantized:
//!
//! | quantity         | stored as                  |
//! |------------------|----------------------------|
//! | position         | `round(value * 32)`  `i32` |
//! | velocity         | `round(value * 128)` `i32` |
//! | angle (degrees)  | `round(value * 32)`  `i32` |

use glam::Vec3;

/// Scale applied to linear positions (1/32 unit resolution).
pub const POSITION_SCALE: f32 = 32.0;

/// Scale applied to linear velocities (1/128 unit resolution).
pub const VELOCITY_SCALE: f32 = 128.0;

/// Scale applied to angles in degrees (1/32 degree resolution).
pub const ANGLE_SCALE: f32 = 32.0;

/// Upper bound on any single length-prefixed field. Anything larger is
/// treated as a corrupt length rather than an allocation request.
pub const MAX_FIELD_LEN: u32 = 64 * 1024;

/// Errors produced while decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before the field was complete.
    #[error("truncated field: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the read.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A length prefix exceeded [`MAX_FIELD_LEN`].
    #[error("field length {0} exceeds limit")]
    LengthTooLarge(u32),

    /// A string field did not contain valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A tagged value carried a kind byte this codec does not know.
    #[error("unknown value kind {0:#04x}")]
    UnknownKind(u8),
}

/// Quantizes `value` by `scale`, rounding to the nearest step.
pub fn quantize(value: f32, scale: f32) -> i32 {
    (value * scale).round() as i32
}

/// Reverses [`quantize`].
pub fn dequantize(raw: i32, scale: f32) -> f32 {
    raw as f32 / scale
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Growable little-endian byte writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Creates an empty writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes the raw IEEE-754 bits of `value`.
    pub fn write_f32_bits(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a `u32` length followed by `bytes`.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    /// Writes three quantized components in x, y, z order.
    pub fn write_fixed_vec3(&mut self, value: Vec3, scale: f32) {
        self.write_i32(quantize(value.x, scale));
        self.write_i32(quantize(value.y, scale));
        self.write_i32(quantize(value.z, scale));
    }

    pub fn write_position(&mut self, value: Vec3) {
        self.write_fixed_vec3(value, POSITION_SCALE);
    }

    pub fn write_velocity(&mut self, value: Vec3) {
        self.write_fixed_vec3(value, VELOCITY_SCALE);
    }

    /// Writes an angle triple given in degrees.
    pub fn write_angle(&mut self, degrees: Vec3) {
        self.write_fixed_vec3(degrees, ANGLE_SCALE);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bounds-checked little-endian reader over a borrowed buffer.
///
/// Reads never panic on malformed input; a short buffer yields
/// [`CodecError::Truncated`] and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a byte as a boolean; any non-zero value is `true`.
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32_bits(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads exactly `N` raw bytes.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.take_array()
    }

    /// Reads a `u32` length and then that many bytes.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let start = self.pos;
        let len = self.read_u32()?;
        if len > MAX_FIELD_LEN {
            self.pos = start;
            return Err(CodecError::LengthTooLarge(len));
        }
        match self.take(len as usize) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    /// Everything after the cursor, consuming it.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    pub fn read_fixed_vec3(&mut self, scale: f32) -> Result<Vec3, CodecError> {
        let x = self.read_i32()?;
        let y = self.read_i32()?;
        let z = self.read_i32()?;
        Ok(Vec3::new(
            dequantize(x, scale),
            dequantize(y, scale),
            dequantize(z, scale),
        ))
    }

    pub fn read_position(&mut self) -> Result<Vec3, CodecError> {
        self.read_fixed_vec3(POSITION_SCALE)
    }

    pub fn read_velocity(&mut self) -> Result<Vec3, CodecError> {
        self.read_fixed_vec3(VELOCITY_SCALE)
    }

    /// Reads an angle triple in degrees.
    pub fn read_angle(&mut self) -> Result<Vec3, CodecError> {
        self.read_fixed_vec3(ANGLE_SCALE)
    }
}
