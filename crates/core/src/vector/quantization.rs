//! Element-wise vector quantization.
//!
//! Each [`Quantizer`] maps one `f32` component to a compact code at insert
//! time and back to `f32` transiently while scoring. Codes are stored in a
//! contiguous arena by [`FlatIndex`](super::flat::FlatIndex).
//!
//! `F8` is the E4M3 layout: 1 sign bit, 4 exponent bits (bias 7), 3 mantissa
//! bits. Values saturate at ±448, `0x7F` / `0xFF` encode NaN, and there is no
//! infinity.

use half::{bf16, f16};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Quantization applied to a collection's vectors. Fixed at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationKind {
    /// Full-precision `f32`.
    #[default]
    None,
    /// 8-bit E4M3 float.
    F8,
    /// IEEE half precision.
    F16,
    /// bfloat16.
    BF16,
}

impl QuantizationKind {
    /// Bytes used per vector component.
    pub fn bytes_per_component(&self) -> usize {
        match self {
            QuantizationKind::None => 4,
            QuantizationKind::F8 => 1,
            QuantizationKind::F16 | QuantizationKind::BF16 => 2,
        }
    }
}

/// Per-component codec.
pub trait Quantizer: Send + Sync + 'static {
    type Code: Copy + Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    const KIND: QuantizationKind;

    fn encode(value: f32) -> Self::Code;

    fn decode(code: Self::Code) -> f32;

    /// Append the codes of `src` to `dst`.
    fn encode_into(src: &[f32], dst: &mut Vec<Self::Code>) {
        dst.extend(src.iter().map(|&v| Self::encode(v)));
    }

    /// Decode `src` into `dst`; both have the same length.
    fn decode_into(src: &[Self::Code], dst: &mut [f32]) {
        for (d, &c) in dst.iter_mut().zip(src) {
            *d = Self::decode(c);
        }
    }
}

/// Stores components as-is.
#[derive(Debug, Clone, Copy)]
pub struct NoQuantization;

impl Quantizer for NoQuantization {
    type Code = f32;
    const KIND: QuantizationKind = QuantizationKind::None;

    #[inline]
    fn encode(value: f32) -> f32 {
        value
    }

    #[inline]
    fn decode(code: f32) -> f32 {
        code
    }

    fn decode_into(src: &[f32], dst: &mut [f32]) {
        dst.copy_from_slice(src);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct F16;

impl Quantizer for F16 {
    type Code = f16;
    const KIND: QuantizationKind = QuantizationKind::F16;

    #[inline]
    fn encode(value: f32) -> f16 {
        f16::from_f32(value)
    }

    #[inline]
    fn decode(code: f16) -> f32 {
        code.to_f32()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BF16;

impl Quantizer for BF16 {
    type Code = bf16;
    const KIND: QuantizationKind = QuantizationKind::BF16;

    #[inline]
    fn encode(value: f32) -> bf16 {
        bf16::from_f32(value)
    }

    #[inline]
    fn decode(code: bf16) -> f32 {
        code.to_f32()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct F8;

const F8_BIAS: i32 = 7;
const F8_MAX_FINITE: u8 = 0x7E;
const F8_NAN: u8 = 0x7F;
/// Smallest normal magnitude, 2^-6.
const F8_MIN_NORMAL: f32 = 1.0 / 64.0;
/// Subnormal step, 2^-9.
const F8_SUBNORMAL_STEP: f32 = 1.0 / 512.0;

impl Quantizer for F8 {
    type Code = u8;
    const KIND: QuantizationKind = QuantizationKind::F8;

    fn encode(value: f32) -> u8 {
        if value.is_nan() {
            return F8_NAN;
        }
        let sign = if value.is_sign_negative() { 0x80 } else { 0x00 };
        let a = value.abs();
        if a < F8_MIN_NORMAL {
            // subnormal; rounding up to 8 steps lands exactly on the smallest normal
            let m = (a / F8_SUBNORMAL_STEP).round() as u8;
            return sign | m.min(0x08);
        }
        let mut exp = ((a.to_bits() >> 23) & 0xFF) as i32 - 127;
        let fraction = a / 2f32.powi(exp) - 1.0;
        let mut mantissa = (fraction * 8.0).round() as i32;
        if mantissa == 8 {
            mantissa = 0;
            exp += 1;
        }
        let biased = exp + F8_BIAS;
        if biased > 15 {
            return sign | F8_MAX_FINITE;
        }
        let code = ((biased as u8) << 3) | mantissa as u8;
        sign | code.min(F8_MAX_FINITE)
    }

    fn decode(code: u8) -> f32 {
        let sign = if code & 0x80 != 0 { -1.0 } else { 1.0 };
        let bits = code & 0x7F;
        if bits == F8_NAN {
            return f32::NAN;
        }
        let exp = (bits >> 3) as i32;
        let mantissa = (bits & 0x07) as f32;
        if exp == 0 {
            return sign * mantissa * F8_SUBNORMAL_STEP;
        }
        sign * (1.0 + mantissa / 8.0) * 2f32.powi(exp - F8_BIAS)
    }
}
