//! Property tests for the DSP kernels.

use proptest::prelude::*;
use resono_dsp::{DIVISION_FRAMES, DrcKernel, DrcParams, SampleFormat, deinterleave, interleave};

proptest! {
    /// A disabled kernel is a pure N-sample delay for arbitrary input and
    /// arbitrary block segmentation.
    #[test]
    fn disabled_kernel_delays_arbitrary_input(
        input in prop::collection::vec(-1.0_f32..1.0, 64..512),
        pre_delay_ms in 1.0_f32..20.0,
    ) {
        let mut dk = DrcKernel::new(48000.0);
        dk.set_parameters(&DrcParams {
            pre_delay_time: pre_delay_ms / 1000.0,
            ..DrcParams::default()
        });
        let delay = dk.delay_frames();
        prop_assert!(delay >= DIVISION_FRAMES);
        prop_assert_eq!(delay % DIVISION_FRAMES, 0);

        let total = input.len() + delay;
        let mut left = input.clone();
        left.resize(total, 0.0);
        let mut right = left.clone();

        // Split processing at an arbitrary point.
        let split = total / 3;
        let (l_head, l_tail) = left.split_at_mut(split);
        let (r_head, r_tail) = right.split_at_mut(split);
        dk.process(l_head, r_head);
        dk.process(l_tail, r_tail);

        for (i, &expected) in input.iter().enumerate() {
            prop_assert_eq!(left[i + delay], expected);
        }
        for i in 0..delay {
            prop_assert_eq!(left[i], 0.0);
        }
    }

    /// s16 interleave/deinterleave round-trips every representable sample.
    #[test]
    fn s16_roundtrip(samples in prop::collection::vec(any::<i16>(), 2..64)) {
        let frames = samples.len() / 2;
        let mut buf = Vec::new();
        for s in &samples[..frames * 2] {
            buf.extend_from_slice(&s.to_le_bytes());
        }

        let mut left = vec![0.0_f32; frames];
        let mut right = vec![0.0_f32; frames];
        {
            let mut channels = [&mut left[..], &mut right[..]];
            deinterleave(&buf, &mut channels, SampleFormat::S16Le, frames);
        }
        let mut out = vec![0_u8; buf.len()];
        interleave(&[&left, &right], &mut out, SampleFormat::S16Le, frames);
        prop_assert_eq!(buf, out);
    }

    /// Enabled processing never produces non-finite output.
    #[test]
    fn enabled_output_is_finite(
        input in prop::collection::vec(-2.0_f32..2.0, 128..384),
    ) {
        let mut dk = DrcKernel::new(48000.0);
        dk.set_parameters(&DrcParams::default());
        dk.set_enabled(true);

        let mut left = input.clone();
        let mut right = input;
        dk.process(&mut left, &mut right);
        for &s in left.iter().chain(right.iter()) {
            prop_assert!(s.is_finite());
        }
    }
}
