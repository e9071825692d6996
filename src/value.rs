use core::fmt::Write as _;

use crate::device::DeviceScales;

/// Register address space a channel's transaction targets.
///
/// `None` is carried by long-read channels: they exist to fill the device
/// cache and expose no register of their own. On the wire they behave as
/// holding-register reads, which is where these devices keep their bulk
/// windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSpace {
    Input,
    Holding,
    None,
}

/// Registers a long read fetches unless the channel narrows the span to the
/// device's actual contiguous window.
pub const LONG_READ_REGS: usize = 64;

/// Longest text a string channel can carry, in bytes.
pub const TEXT_CAPACITY: usize = 20;

/// Capacity of a channel's rendered display text.
pub const DISPLAY_CAPACITY: usize = 48;

/// Marker exported in place of a value after a failed read.
///
/// The quote characters are part of the token: downstream telemetry splices
/// these strings into a JSON-like body and parses the marker as a string
/// literal.
pub const NAN_TEXT: &str = "\"NaN\"";

/// How the raw words of a channel become a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// One register, unsigned.
    HalfWord,
    /// One register, bit 15 sign-extended.
    HalfWordSigned,
    /// One register, sign-extended, times the channel scale.
    HalfWordSignedScaled,
    /// Two registers, high word first, as a 32-bit integer.
    FullWord,
    /// Two registers, high word first, as an IEEE-754 float.
    Float32,
    /// One register holding a 16-bit float, widened to f32.
    Float16,
    /// One register, sign-extended, times the device current factor.
    ScaledCurrent,
    /// One register, sign-extended, times the device voltage factor.
    ScaledVoltage,
    /// One register, sign-extended, times both device factors.
    ScaledPower,
    /// One register, unsigned, times the channel scale.
    Scaled,
    /// Packed ASCII text, two bytes per register, high byte first.
    Text { len: u8 },
    /// Bulk fetch into the device cache; owns no value.
    LongRead,
}

impl DataKind {
    /// Registers one transaction of this kind moves.
    pub fn register_count(self) -> u16 {
        match self {
            DataKind::FullWord | DataKind::Float32 => 2,
            DataKind::Text { len } => (len as u16).div_ceil(2),
            DataKind::LongRead => LONG_READ_REGS as u16,
            _ => 1,
        }
    }
}

/// Decoded channel value, tagged by the channel's data kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Text(heapless::String<TEXT_CAPACITY>),
}

impl Value {
    /// Render into `out` exactly as telemetry exports it: integers as plain
    /// decimals, floats with three decimal places, text verbatim.
    pub fn render(&self, out: &mut heapless::String<DISPLAY_CAPACITY>) {
        out.clear();
        let rendered = match self {
            Value::Int(v) => write!(out, "{v}"),
            Value::Float(v) => write!(out, "{v:.3}"),
            Value::Text(s) => write!(out, "{s}"),
        };
        // 48 bytes fit every i32 and every plain-notation f32; should the
        // buffer still overflow, export the failure marker, never a
        // truncated number.
        if rendered.is_err() {
            out.clear();
            let _ = out.push_str(NAN_TEXT);
        }
    }
}

/// Widen a 16-bit float (1 sign, 5 exponent, 10 fraction bits) to f32.
///
/// The sign bit moves to bit 31; adding 112 to the exponent field rebases it
/// from the 15-offset to the 127-offset form before the combined exponent
/// and fraction shift into bits 13..=30.
pub fn f16_bits_to_f32(raw: u16) -> f32 {
    let raw = raw as u32;
    let bits = ((raw & 0x8000) << 16) | (((raw & 0x7fff) + 0x1c000) << 13);
    f32::from_bits(bits)
}

/// Convert a controller's two-register per-unit scale reading into a
/// multiplier: whole part in the high word, fraction in 1/65536ths in the
/// low word.
pub fn per_unit_scale(raw: u32) -> f32 {
    (raw >> 16) as f32 + (raw & 0xFFFF) as f32 / 65536.0
}

fn sign_extend(word: u16) -> i32 {
    word as i16 as i32
}

/// Decode `words` according to `kind`.
///
/// Pure: equal inputs always yield equal values. Returns `None` for
/// [`DataKind::LongRead`] and for a slice shorter than the kind's register
/// count.
pub fn decode(
    kind: DataKind,
    words: &[u16],
    scales: DeviceScales,
    channel_scale: f32,
) -> Option<Value> {
    if words.len() < kind.register_count() as usize {
        return None;
    }
    let value = match kind {
        DataKind::HalfWord => Value::Int(words[0] as i32),
        DataKind::HalfWordSigned => Value::Int(sign_extend(words[0])),
        DataKind::HalfWordSignedScaled => {
            Value::Float(sign_extend(words[0]) as f32 * channel_scale)
        }
        DataKind::FullWord => Value::Int((((words[0] as u32) << 16) | words[1] as u32) as i32),
        DataKind::Float32 => {
            Value::Float(f32::from_bits(((words[0] as u32) << 16) | words[1] as u32))
        }
        DataKind::Float16 => Value::Float(f16_bits_to_f32(words[0])),
        DataKind::ScaledCurrent => {
            Value::Float(sign_extend(words[0]) as f32 * scales.current / 32768.0)
        }
        DataKind::ScaledVoltage => {
            Value::Float(sign_extend(words[0]) as f32 * scales.voltage / 32768.0)
        }
        DataKind::ScaledPower => {
            Value::Float(sign_extend(words[0]) as f32 * scales.voltage * scales.current / 131072.0)
        }
        DataKind::Scaled => Value::Float(words[0] as f32 * channel_scale),
        DataKind::Text { len } => Value::Text(unpack_text(words, len)),
        DataKind::LongRead => return None,
    };
    Some(value)
}

/// Unpack `len` bytes of register text, high byte of each word first.
/// Copying stops at the first NUL. Bytes outside printable ASCII come out
/// as `'.'`; that substitution is this crate's export policy, not part of
/// the register encoding.
fn unpack_text(words: &[u16], len: u8) -> heapless::String<TEXT_CAPACITY> {
    let mut out = heapless::String::new();
    let bytes = words.iter().flat_map(|w| [(w >> 8) as u8, (w & 0xFF) as u8]);
    for b in bytes.take(len as usize) {
        if b == 0 {
            break;
        }
        // Control bytes must not leak into exported strings.
        let c = if b.is_ascii_graphic() || b == b' ' {
            b as char
        } else {
            '.'
        };
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
