//! Single-band lookahead dynamic-range compressor.
//!
//! The kernel buffers input through a fixed circular pre-delay so the
//! envelope detector sees a few milliseconds of "future" relative to the
//! samples the gain is applied to. Processing advances in 32-frame
//! divisions: every time a full division has been buffered, the detector
//! average, envelope rate, and compressor gain are updated and the next
//! output division is compressed in place.
//!
//! # Gain staging
//!
//! The static curve is linear up to the threshold, exponential through the
//! knee (first-derivative matched at the threshold), and constant-ratio
//! above the knee. The knee shape coefficient is found by a 15-iteration
//! geometric-mean search so the slope at `threshold + knee` equals `1/ratio`.
//!
//! Release is adaptive: a 4th-order polynomial over the current compression
//! depth picks the release frame count, so deeper compression releases
//! faster. Attack tracks the largest compression difference seen since the
//! last release.
//!
//! Envelope scalars are tracked in `f64`: the detector one-pole must reach
//! unity on silence, and in `f32` the release tail stalls a few ulps short,
//! leaving a small permanent gain offset.

use crate::tables::{NEG_TWO_DB, decibels_to_linear, knee_exp, linear_to_decibels};
use libm::{asin, expf, log10, pow, powf, sin, sqrtf};

/// Size of the circular pre-delay buffer, per channel. Power of two so
/// index arithmetic is a mask.
pub const MAX_PRE_DELAY_FRAMES: usize = 1024;
const MAX_PRE_DELAY_FRAMES_MASK: usize = MAX_PRE_DELAY_FRAMES - 1;

/// Pre-delay length before the first `set_parameters` call.
pub const DEFAULT_PRE_DELAY_FRAMES: usize = 256;

/// Frames per processing division. The pre-delay length is always a
/// multiple of this, so a division never straddles the ring seam.
pub const DIVISION_FRAMES: usize = 32;
const DIVISION_FRAMES_MASK: usize = DIVISION_FRAMES - 1;

/// Channels processed by one kernel instance.
pub const NUM_CHANNELS: usize = 2;

/// Sentinel marking derived parameters that have never been computed, so
/// the first `set_parameters` always runs the static-curve update.
const UNINITIALIZED: f32 = -1.0;

/// dB spacing of the adaptive release curve's control points.
const SPACING_DB: f64 = 5.0;

const PI_OVER_TWO: f64 = core::f64::consts::FRAC_PI_2;

/// Parameter set for [`DrcKernel::set_parameters`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrcParams {
    /// Level above which compression starts, in dB (≤ 0).
    pub db_threshold: f32,
    /// Width of the soft knee, in dB.
    pub db_knee: f32,
    /// Compression ratio (input dB per output dB above the knee).
    pub ratio: f32,
    /// Attack time in seconds. Clamped to at least 1 ms.
    pub attack_time: f32,
    /// Nominal release time in seconds; scaled by the adaptive curve.
    pub release_time: f32,
    /// Lookahead in seconds. Snapped down to a multiple of 32 frames and
    /// clamped to `[32, 1023]` frames.
    pub pre_delay_time: f32,
    /// Output makeup gain in dB, applied on top of the automatic makeup.
    pub db_post_gain: f32,
    /// Four control points of the adaptive release curve, as fractions of
    /// `release_time`, for compression depths of −15/−10/−5/0 dB.
    pub release_zones: [f32; 4],
}

impl Default for DrcParams {
    fn default() -> Self {
        Self {
            db_threshold: -24.0,
            db_knee: 30.0,
            ratio: 12.0,
            attack_time: 0.003,
            release_time: 0.2,
            pre_delay_time: 0.006,
            db_post_gain: 0.0,
            release_zones: [0.184, 0.293, 0.484, 0.775],
        }
    }
}

/// Single-band stereo compressor with lookahead delay.
///
/// Created with a fixed sample rate; changing the rate requires a new
/// kernel. All processing happens in place on planar channel slices.
#[derive(Debug, Clone)]
pub struct DrcKernel {
    sample_rate: f32,

    /// Shaped-power average tracked by the detector, in gain terms.
    detector_average: f64,
    /// Current slewed gain, before the sin() warp and master gain.
    compressor_gain: f64,
    enabled: bool,
    /// Latch: the first enabled process() primes the envelope once.
    processed: bool,

    // Static curve state, recomputed only when threshold/knee/ratio change.
    ratio: f32,
    slope: f32,
    linear_threshold: f32,
    db_threshold: f32,
    db_knee: f32,
    knee_threshold: f32,
    ratio_base: f32,
    k: f32,
    knee_alpha: f32,
    knee_beta: f32,

    master_linear_gain: f32,
    attack_frames: f32,
    sat_release_frames_inv_neg: f64,

    // Adaptive release polynomial: release_frames = kA + kB·x + kC·x² + kD·x³ + kE·x⁴.
    k_a: f32,
    k_b: f32,
    k_c: f32,
    k_d: f32,
    k_e: f32,

    envelope_rate: f64,
    scaled_desired_gain: f64,
    max_attack_compression_diff_db: f64,

    last_pre_delay_frames: usize,
    pre_delay_read_index: usize,
    pre_delay_write_index: usize,
    pre_delay_buffers: [Box<[f32]>; NUM_CHANNELS],
}

/// `20·log10(x)` with the same −1000 dB floor as the table helpers, in f64.
#[inline]
fn linear_to_decibels64(linear: f64) -> f64 {
    if linear <= 0.0 {
        return -1000.0;
    }
    20.0 * log10(linear)
}

impl DrcKernel {
    /// Creates a kernel for the given sample rate, disabled, with the
    /// default 256-frame pre-delay and no parameters applied.
    pub fn new(sample_rate: f32) -> Self {
        crate::tables::init();
        Self {
            sample_rate,
            detector_average: 0.0,
            compressor_gain: 1.0,
            enabled: false,
            processed: false,
            ratio: UNINITIALIZED,
            slope: UNINITIALIZED,
            linear_threshold: UNINITIALIZED,
            db_threshold: UNINITIALIZED,
            db_knee: UNINITIALIZED,
            knee_threshold: UNINITIALIZED,
            ratio_base: UNINITIALIZED,
            k: UNINITIALIZED,
            knee_alpha: 0.0,
            knee_beta: 0.0,
            master_linear_gain: 1.0,
            attack_frames: 0.0,
            sat_release_frames_inv_neg: 0.0,
            k_a: 0.0,
            k_b: 0.0,
            k_c: 0.0,
            k_d: 0.0,
            k_e: 0.0,
            envelope_rate: 0.0,
            scaled_desired_gain: 0.0,
            max_attack_compression_diff_db: f64::NEG_INFINITY,
            last_pre_delay_frames: DEFAULT_PRE_DELAY_FRAMES,
            pre_delay_read_index: 0,
            pre_delay_write_index: DEFAULT_PRE_DELAY_FRAMES,
            pre_delay_buffers: [
                vec![0.0; MAX_PRE_DELAY_FRAMES].into_boxed_slice(),
                vec![0.0; MAX_PRE_DELAY_FRAMES].into_boxed_slice(),
            ],
        }
    }

    /// Enables or disables gain processing. A disabled kernel still delays
    /// by the configured pre-delay so multi-band latency stays matched.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns whether gain processing is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Current pre-delay (lookahead) length in frames.
    pub fn delay_frames(&self) -> usize {
        self.last_pre_delay_frames
    }

    /// Current slewed compressor gain. Diagnostic; 1.0 means no reduction.
    pub fn compressor_gain(&self) -> f32 {
        self.compressor_gain as f32
    }

    /// The output makeup gain applied after the compressor envelope.
    pub fn master_linear_gain(&self) -> f32 {
        self.master_linear_gain
    }

    /// Applies a full parameter set, recomputing every derived quantity.
    ///
    /// Calling again with identical parameters leaves all derived
    /// coefficients bitwise unchanged. Changing the pre-delay length clears
    /// the delay buffers and resets the ring indices.
    pub fn set_parameters(&mut self, params: &DrcParams) {
        let sample_rate = self.sample_rate;

        self.update_static_curve_parameters(params.db_threshold, params.db_knee, params.ratio);

        // Makeup gain: normalize full-scale input, softened by an empirical
        // perceptual exponent.
        let full_range_gain = self.volume_gain(1.0);
        let full_range_makeup_gain = powf(1.0 / full_range_gain, 0.6);
        self.master_linear_gain = decibels_to_linear(params.db_post_gain) * full_range_makeup_gain;

        let attack_time = params.attack_time.max(0.001);
        self.attack_frames = attack_time * sample_rate;

        let release_frames = sample_rate * params.release_time;

        // Detector release time constant.
        let sat_release_time = 0.0025_f32;
        let sat_release_frames = sat_release_time * sample_rate;
        self.sat_release_frames_inv_neg = f64::from(-1.0 / sat_release_frames);

        // Fit y = a + b·x + c·x² + d·x³ + e·x⁴ through the four release
        // zone points at x = 0, 1, 2, 3 (the constants are the fixed
        // inverse of that Vandermonde system).
        let y1 = release_frames * params.release_zones[0];
        let y2 = release_frames * params.release_zones[1];
        let y3 = release_frames * params.release_zones[2];
        let y4 = release_frames * params.release_zones[3];

        #[allow(clippy::excessive_precision)]
        {
            self.k_a = 0.9999999999999998 * y1 + 1.8432219684323923e-16 * y2
                - 1.9373394351676423e-16 * y3
                + 8.824516011816245e-18 * y4;
            self.k_b = -1.5788320352845888 * y1 + 2.3305837032074286 * y2
                - 0.9141194204840429 * y3
                + 0.1623677525612032 * y4;
            self.k_c = 0.5334142869106424 * y1 - 1.272736789213631 * y2
                + 0.9258856042207512 * y3
                - 0.18656310191776226 * y4;
            self.k_d = 0.08783463138207234 * y1 - 0.1694162967925622 * y2
                + 0.08588057951595272 * y3
                - 0.00429891410546283 * y4;
            self.k_e = -0.042416883008123074 * y1 + 0.1115693827987602 * y2
                - 0.09764676325265872 * y3
                + 0.028494263462021576 * y4;
        }

        self.set_pre_delay_time(params.pre_delay_time);
    }

    /// Processes one block in place. `left` and `right` must be the same
    /// length; blocks may be any size up to the caller's buffer limit.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len());
        let count = left.len();

        if !self.enabled {
            self.process_delay_only(left, right, count);
            return;
        }

        if !self.processed {
            self.update_envelope();
            self.compress_output();
            self.processed = true;
        }

        let mut i = 0;
        let mut offset = self.pre_delay_write_index & DIVISION_FRAMES_MASK;
        while i < count {
            let fragment = (DIVISION_FRAMES - offset).min(count - i);
            self.copy_fragment(left, right, i, fragment);
            i += fragment;
            offset = (offset + fragment) & DIVISION_FRAMES_MASK;

            // A full 32-frame division has been buffered.
            if offset == 0 {
                self.process_one_division();
            }
        }
    }

    // --- static curve ---

    /// Knee curve used while fitting the static parameters: linear up to
    /// the threshold, then first-derivative-matched exponential approach
    /// to `linear_threshold + 1/k`.
    fn knee_curve(&self, x: f32, k: f32) -> f32 {
        if x < self.linear_threshold {
            return x;
        }
        self.linear_threshold + (1.0 - knee_exp(-k * (x - self.linear_threshold))) / k
    }

    /// Approximate dB-domain slope of the knee curve at `x`. Equal to the
    /// inverse of the compression ratio when the fit converges.
    fn slope_at(&self, x: f32, k: f32) -> f32 {
        if x < self.linear_threshold {
            return 1.0;
        }
        let x2 = x * 1.001;

        let x_db = linear_to_decibels(x);
        let x2_db = linear_to_decibels(x2);

        let y_db = linear_to_decibels(self.knee_curve(x, k));
        let y2_db = linear_to_decibels(self.knee_curve(x2, k));

        (y2_db - y_db) / (x2_db - x_db)
    }

    /// Finds the knee coefficient whose slope at the end of the knee
    /// matches `desired_slope`, by geometric-mean bisection on
    /// `[0.1, 10000]`.
    fn k_at_slope(&self, desired_slope: f32) -> f32 {
        let x_db = self.db_threshold + self.db_knee;
        let x = decibels_to_linear(x_db);

        let mut min_k = 0.1_f32;
        let mut max_k = 10000.0_f32;
        let mut k = 5.0_f32;

        for _ in 0..15 {
            // A high k more quickly approaches a slope of 0.
            let slope = self.slope_at(x, k);
            if slope < desired_slope {
                max_k = k;
            } else {
                min_k = k;
            }
            k = sqrtf(min_k * max_k);
        }
        k
    }

    fn update_static_curve_parameters(&mut self, db_threshold: f32, db_knee: f32, ratio: f32) {
        if db_threshold == self.db_threshold && db_knee == self.db_knee && ratio == self.ratio {
            return;
        }
        self.db_threshold = db_threshold;
        self.linear_threshold = decibels_to_linear(db_threshold);
        self.db_knee = db_knee;

        self.ratio = ratio;
        self.slope = 1.0 / ratio;

        let k = self.k_at_slope(1.0 / ratio);
        self.k = k;
        // knee_curve_k() folds the curve into alpha + beta·e^(-k·x).
        self.knee_alpha = self.linear_threshold + 1.0 / k;
        self.knee_beta = -expf(k * self.linear_threshold) / k;

        self.knee_threshold = decibels_to_linear(db_threshold + db_knee);
        // See volume_gain() for the constant-ratio region above the knee.
        let y0 = self.knee_curve(self.knee_threshold, k);
        self.ratio_base = y0 * powf(self.knee_threshold, -self.slope);
    }

    /// Knee region of the compression curve, in the folded alpha/beta form.
    #[inline]
    fn knee_curve_k(&self, x: f32) -> f32 {
        self.knee_alpha + self.knee_beta * knee_exp(-self.k * x)
    }

    /// Full static curve: ratio of output level to input level `x`.
    #[inline]
    fn volume_gain(&self, x: f32) -> f32 {
        if x < self.knee_threshold {
            if x < self.linear_threshold {
                return 1.0;
            }
            self.knee_curve_k(x) / x
        } else {
            // Constant ratio after the knee:
            //   y = ratio_base · x^slope  =>  y/x = ratio_base · x^(slope-1)
            self.ratio_base * powf(x, self.slope - 1.0)
        }
    }

    // --- envelope ---

    /// Updates the envelope rate used for the next division.
    fn update_envelope(&mut self) {
        let desired_gain = self.detector_average;

        // Pre-warp so we get desired_gain after the sin() warp in
        // compress_output.
        let scaled_desired_gain = asin(desired_gain) / PI_OVER_TWO;

        let is_releasing = scaled_desired_gain > self.compressor_gain;

        // Difference between current compression level and the desired one.
        let mut compression_diff_db =
            linear_to_decibels64(self.compressor_gain / scaled_desired_gain);

        let envelope_rate;
        if is_releasing {
            // Release mode - compression_diff_db should be negative.
            self.max_attack_compression_diff_db = f64::NEG_INFINITY;

            if !compression_diff_db.is_finite() {
                compression_diff_db = -1.0;
            }

            // Adaptive release: deeper compression releases faster.
            // Contain within [-12, 0] then rescale to x ∈ [0, 3].
            let x = 0.25 * (compression_diff_db.clamp(-12.0, 0.0) + 12.0);

            let x2 = x * x;
            let x3 = x2 * x;
            let x4 = x2 * x2;
            let release_frames = f64::from(self.k_a)
                + f64::from(self.k_b) * x
                + f64::from(self.k_c) * x2
                + f64::from(self.k_d) * x3
                + f64::from(self.k_e) * x4;

            let db_per_frame = SPACING_DB / release_frames;
            envelope_rate = pow(10.0, db_per_frame / 20.0);
        } else {
            // Attack mode - compression_diff_db should be positive.
            if !compression_diff_db.is_finite() {
                compression_diff_db = 1.0;
            }

            // While still attacking, rate is based on the largest
            // compression difference seen so far.
            self.max_attack_compression_diff_db = self
                .max_attack_compression_diff_db
                .max(compression_diff_db);

            let eff_atten_diff_db = self.max_attack_compression_diff_db.max(0.5);
            let x = 0.25 / eff_atten_diff_db;
            envelope_rate = 1.0 - pow(x, 1.0 / f64::from(self.attack_frames));
        }

        self.envelope_rate = envelope_rate;
        self.scaled_desired_gain = scaled_desired_gain;
    }

    /// Updates `detector_average` from the division just written.
    fn update_detector_average(&mut self) {
        let sat_release_frames_inv_neg = self.sat_release_frames_inv_neg;
        let mut detector_average = self.detector_average;

        // Start of the last input division.
        let div_start = if self.pre_delay_write_index == 0 {
            MAX_PRE_DELAY_FRAMES - DIVISION_FRAMES
        } else {
            self.pre_delay_write_index - DIVISION_FRAMES
        };

        for i in 0..DIVISION_FRAMES {
            // Max abs value across channels on the un-delayed data.
            let mut abs_input = 0.0_f32;
            for buffer in &self.pre_delay_buffers {
                let abs_undelayed = buffer[div_start + i].abs();
                if abs_input < abs_undelayed {
                    abs_input = abs_undelayed;
                }
            }

            // Shaped power on the undelayed input through the static curve.
            let gain = f64::from(self.volume_gain(abs_input));
            let is_release = gain > detector_average;
            if is_release {
                let gain_db = linear_to_decibels64(gain.min(f64::from(NEG_TWO_DB)));
                let db_per_frame = gain_db * sat_release_frames_inv_neg;
                let sat_release_rate = pow(10.0, db_per_frame / 20.0) - 1.0;
                detector_average += (gain - detector_average) * sat_release_rate;
            } else {
                detector_average = gain;
            }

            if !detector_average.is_finite() {
                detector_average = 1.0;
            } else {
                detector_average = detector_average.min(1.0);
            }
        }

        self.detector_average = detector_average;
    }

    /// Slews `compressor_gain` toward the target and applies the total
    /// gain to the next output division in place.
    fn compress_output(&mut self) {
        let master_linear_gain = f64::from(self.master_linear_gain);
        let envelope_rate = self.envelope_rate;
        let scaled_desired_gain = self.scaled_desired_gain;
        let mut compressor_gain = self.compressor_gain;
        let div_start = self.pre_delay_read_index;

        for i in 0..DIVISION_FRAMES {
            // Exponential approach to the desired gain.
            if envelope_rate < 1.0 {
                // Attack - reduce gain toward desired.
                compressor_gain += (scaled_desired_gain - compressor_gain) * envelope_rate;
            } else {
                // Release - exponentially raise gain back to 1.0.
                compressor_gain = (compressor_gain * envelope_rate).min(1.0);
            }

            // Warp smooths the sharp exponential transition points.
            let post_warp_compressor_gain = sin(PI_OVER_TWO * compressor_gain);
            let total_gain = (master_linear_gain * post_warp_compressor_gain) as f32;

            for buffer in &mut self.pre_delay_buffers {
                buffer[div_start + i] *= total_gain;
            }
        }

        self.compressor_gain = compressor_gain;
    }

    /// One full division has been received and one output: update the
    /// detector, refresh the envelope, compress the next output division.
    fn process_one_division(&mut self) {
        self.update_detector_average();
        self.update_envelope();
        self.compress_output();
    }

    // --- ring transfer ---

    /// Copies `frames` input frames into the pre-delay ring at the write
    /// index and the corresponding delayed frames back out at the read
    /// index. Fragments are division-aligned so they never cross the ring
    /// seam.
    fn copy_fragment(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        frame_index: usize,
        frames: usize,
    ) {
        let w = self.pre_delay_write_index;
        let r = self.pre_delay_read_index;

        for (ch, data) in [&mut *left, &mut *right].into_iter().enumerate() {
            let buffer = &mut self.pre_delay_buffers[ch];
            buffer[w..w + frames].copy_from_slice(&data[frame_index..frame_index + frames]);
            data[frame_index..frame_index + frames].copy_from_slice(&buffer[r..r + frames]);
        }

        self.pre_delay_write_index = (w + frames) & MAX_PRE_DELAY_FRAMES_MASK;
        self.pre_delay_read_index = (r + frames) & MAX_PRE_DELAY_FRAMES_MASK;
    }

    /// Delay-only path for a disabled kernel: chunked by ring contiguity,
    /// no gain applied.
    fn process_delay_only(&mut self, left: &mut [f32], right: &mut [f32], count: usize) {
        let mut read_index = self.pre_delay_read_index;
        let mut write_index = self.pre_delay_write_index;
        let mut i = 0;

        while i < count {
            let small = read_index.min(write_index);
            let large = read_index.max(write_index);
            // Minimum of contiguous readable, contiguous writable, and
            // available input.
            let chunk = (large - small)
                .min(MAX_PRE_DELAY_FRAMES - large)
                .min(count - i);
            for (ch, data) in [&mut *left, &mut *right].into_iter().enumerate() {
                let buffer = &mut self.pre_delay_buffers[ch];
                buffer[write_index..write_index + chunk].copy_from_slice(&data[i..i + chunk]);
                data[i..i + chunk].copy_from_slice(&buffer[read_index..read_index + chunk]);
            }
            read_index = (read_index + chunk) & MAX_PRE_DELAY_FRAMES_MASK;
            write_index = (write_index + chunk) & MAX_PRE_DELAY_FRAMES_MASK;
            i += chunk;
        }

        self.pre_delay_read_index = read_index;
        self.pre_delay_write_index = write_index;
    }

    /// Reconfigures the lookahead, snapping down to a multiple of 32
    /// frames within `[32, 1023]`. A length change zeroes the buffers and
    /// resets both ring indices.
    fn set_pre_delay_time(&mut self, pre_delay_time: f32) {
        let mut pre_delay_frames = (pre_delay_time * self.sample_rate) as usize;
        pre_delay_frames = pre_delay_frames.min(MAX_PRE_DELAY_FRAMES - 1);

        // Keep divisions in one contiguous run of the ring; the loss of
        // accuracy versus the requested time is under 1 ms.
        pre_delay_frames &= !DIVISION_FRAMES_MASK;

        // At least one division so incoming data cannot overwrite the
        // frames still waiting to be output.
        pre_delay_frames = pre_delay_frames.max(DIVISION_FRAMES);

        if self.last_pre_delay_frames != pre_delay_frames {
            self.last_pre_delay_frames = pre_delay_frames;
            for buffer in &mut self.pre_delay_buffers {
                buffer.fill(0.0);
            }
            self.pre_delay_read_index = 0;
            self.pre_delay_write_index = pre_delay_frames;
        }
    }
}
