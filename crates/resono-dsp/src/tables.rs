//! Process-wide dB and exponential lookup tables.
//!
//! All compressor instances share two small tables: `10^(k/20)` for integer
//! `k ∈ [-100, 100]` and `e^k` for integer `k ∈ [-100, 0]`. Lookups
//! interpolate linearly between adjacent entries and saturate at the table
//! edges. The tables are computed once on first use and immutable afterwards,
//! so reads from the audio thread are lock-free.

use std::sync::OnceLock;

use libm::{asinf, exp, log10f, pow, sinf};

/// `10^(-2/20)`, the detector saturation ceiling used by the DRC kernel.
pub const NEG_TWO_DB: f32 = 0.7943282347242815;

const PI_OVER_TWO: f32 = core::f32::consts::FRAC_PI_2;

struct Tables {
    /// `10^(k/20)` for k in -100..=100.
    db_to_linear: [f32; 201],
    /// `e^k` for k in -100..=0.
    exp_to_linear: [f32; 101],
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(|| {
        let mut db_to_linear = [0.0_f32; 201];
        let mut exp_to_linear = [0.0_f32; 101];
        for i in -100..=100_i32 {
            db_to_linear[(i + 100) as usize] = pow(10.0, f64::from(i) / 20.0) as f32;
        }
        for i in -100..=0_i32 {
            exp_to_linear[(i + 100) as usize] = exp(f64::from(i)) as f32;
        }
        Tables {
            db_to_linear,
            exp_to_linear,
        }
    })
}

/// Forces table initialization.
///
/// Idempotent and safe to call from any thread. Accessors initialize on
/// first use anyway; calling this up front keeps the one-time cost off the
/// audio thread.
pub fn init() {
    let _ = tables();
}

/// Converts decibels to linear amplitude via interpolated table lookup.
///
/// Saturates below −100 dB (to the −100 dB entry) and above +100 dB.
#[inline]
pub fn decibels_to_linear(decibels: f32) -> f32 {
    let t = tables();
    let x = decibels + 100.0;
    if x <= 0.0 {
        return t.db_to_linear[0];
    }
    if x >= 200.0 {
        return t.db_to_linear[200];
    }
    let i = x as usize;
    let frac = x - i as f32;
    t.db_to_linear[i] + (t.db_to_linear[i + 1] - t.db_to_linear[i]) * frac
}

/// Converts linear amplitude to decibels.
///
/// Zero and negative inputs return −1000 dB, a floor low enough that any
/// downstream clamp treats it as silence.
#[inline]
pub fn linear_to_decibels(linear: f32) -> f32 {
    if linear <= 0.0 {
        return -1000.0;
    }
    20.0 * log10f(linear)
}

/// `e^x` for the knee curve, via interpolated table lookup.
///
/// The knee exponent is always non-positive in practice; values below −100
/// flush to zero and values above 0 fall back to the exact exponential.
#[inline]
pub fn knee_exp(x: f32) -> f32 {
    let t = tables();
    if x >= 0.0 {
        return libm::expf(x);
    }
    let shifted = x + 100.0;
    if shifted <= 0.0 {
        return 0.0;
    }
    let i = shifted as usize;
    let frac = shifted - i as f32;
    t.exp_to_linear[i] + (t.exp_to_linear[i + 1] - t.exp_to_linear[i]) * frac
}

/// `sin(π/2 · x)` - warps the compressor gain to smooth the sharp corners
/// of the exponential envelope segments.
#[inline]
pub fn warp_sin(x: f32) -> f32 {
    sinf(PI_OVER_TWO * x)
}

/// Inverse of [`warp_sin`]: `asin(x) / (π/2)`.
#[inline]
pub fn warp_asin(x: f32) -> f32 {
    asinf(x) / PI_OVER_TWO
}

/// True for NaN and ±∞ - the "gremlins" clamped out of the envelope math.
#[inline]
pub fn is_bad(x: f32) -> bool {
    !x.is_finite()
}
