//! K-weighting filter (ITU-R BS.1770)
//!
//! Two cascaded biquads: a high-shelf pre-filter followed by the RLB
//! high-pass. 48 kHz uses the published coefficients verbatim; every other
//! rate derives them from the same corner frequencies via the bilinear
//! transform, so both branches stay in place.

use std::f64::consts::PI;

/// Biquad coefficients normalized so that `a0 == 1`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Numerator as `[b0, b1, b2]`
    pub fn b(&self) -> [f64; 3] {
        [self.b0, self.b1, self.b2]
    }

    /// Denominator as `[1, a1, a2]`
    pub fn a(&self) -> [f64; 3] {
        [1.0, self.a1, self.a2]
    }
}

/// Direct form I biquad with state carried across calls
#[derive(Debug, Clone, Default)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            ..Default::default()
        }
    }

    #[inline]
    pub fn process(&mut self, x0: f64) -> f64 {
        let c = &self.coeffs;
        let y0 = c.b0 * x0 + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;
        y0
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COEFFICIENTS
// ═══════════════════════════════════════════════════════════════════════════════

const SHELF_F0: f64 = 1681.974450955533;
const SHELF_GAIN_DB: f64 = 3.999843853973347;
const SHELF_Q: f64 = 0.7071752369554196;
const SHELF_VB_EXP: f64 = 0.4996667741545416;

const RLB_F0: f64 = 38.13547087602444;
const RLB_Q: f64 = 0.5003270373238773;

/// Pre-filter and RLB coefficients for a sample rate
pub fn k_weighting_coeffs(sample_rate: u32) -> (BiquadCoeffs, BiquadCoeffs) {
    if sample_rate == 48_000 {
        let pre = BiquadCoeffs {
            b0: 1.53512485958697,
            b1: -2.69169618940638,
            b2: 1.19839281085285,
            a1: -1.69065929318241,
            a2: 0.73248077421585,
        };
        let rlb = BiquadCoeffs {
            b0: 1.0,
            b1: -2.0,
            b2: 1.0,
            a1: -1.99004745483398,
            a2: 0.99007225036621,
        };
        return (pre, rlb);
    }

    let fs = sample_rate as f64;
    (shelf_coeffs(fs), rlb_coeffs(fs))
}

fn shelf_coeffs(fs: f64) -> BiquadCoeffs {
    let k = (PI * SHELF_F0 / fs).tan();
    let k2 = k * k;
    let vh = 10f64.powf(SHELF_GAIN_DB / 20.0);
    let vb = vh.powf(SHELF_VB_EXP);
    let a0 = 1.0 + k / SHELF_Q + k2;

    BiquadCoeffs {
        b0: (vh + vb * k / SHELF_Q + k2) / a0,
        b1: 2.0 * (k2 - vh) / a0,
        b2: (vh - vb * k / SHELF_Q + k2) / a0,
        a1: 2.0 * (k2 - 1.0) / a0,
        a2: (1.0 - k / SHELF_Q + k2) / a0,
    }
}

fn rlb_coeffs(fs: f64) -> BiquadCoeffs {
    let k = (PI * RLB_F0 / fs).tan();
    let k2 = k * k;
    let denom = 1.0 + k / RLB_Q + k2;

    BiquadCoeffs {
        b0: 1.0,
        b1: -2.0,
        b2: 1.0,
        a1: 2.0 * (k2 - 1.0) / denom,
        a2: (1.0 - k / RLB_Q + k2) / denom,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILTER
// ═══════════════════════════════════════════════════════════════════════════════

/// K-weighting for one channel
#[derive(Debug, Clone)]
pub struct KWeightingFilter {
    pre: Biquad,
    rlb: Biquad,
}

impl KWeightingFilter {
    pub fn new(sample_rate: u32) -> Self {
        let (pre, rlb) = k_weighting_coeffs(sample_rate);
        Self {
            pre: Biquad::new(pre),
            rlb: Biquad::new(rlb),
        }
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let shelved = self.pre.process(input);
        self.rlb.process(shelved)
    }

    /// Filter a mono block, stage by stage
    pub fn process_block(&mut self, input: &[f64]) -> Vec<f64> {
        let shelved: Vec<f64> = input.iter().map(|&x| self.pre.process(x)).collect();
        shelved.into_iter().map(|x| self.rlb.process(x)).collect()
    }

    pub fn reset(&mut self) {
        self.pre.reset();
        self.rlb.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_coeffs(actual: BiquadCoeffs, b: [f64; 3], a: [f64; 3]) {
        for (x, y) in actual.b().iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9);
        }
        for (x, y) in actual.a().iter().zip(a.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_48k_uses_published_values() {
        let (pre, rlb) = k_weighting_coeffs(48_000);
        assert_eq!(pre.b0, 1.53512485958697);
        assert_eq!(pre.a2, 0.73248077421585);
        assert_eq!(rlb.a1, -1.99004745483398);
    }

    #[test]
    fn test_analytic_matches_published_at_48k() {
        let pre = shelf_coeffs(48_000.0);
        let rlb = rlb_coeffs(48_000.0);
        let (ref_pre, ref_rlb) = k_weighting_coeffs(48_000);
        assert_coeffs(pre, ref_pre.b(), ref_pre.a());
        assert_coeffs(rlb, ref_rlb.b(), ref_rlb.a());
    }

    #[test]
    fn test_44k1_coefficients() {
        let (pre, rlb) = k_weighting_coeffs(44_100);
        assert_coeffs(
            pre,
            [1.5308412300503478, -2.6509799951547297, 1.169079079921587],
            [1.0, -1.6636551132560204, 0.7125954280732254],
        );
        assert_coeffs(
            rlb,
            [1.0, -2.0, 1.0],
            [1.0, -1.989169673629796, 0.9891990357870393],
        );
    }

    #[test]
    fn test_96k_coefficients() {
        let (pre, rlb) = k_weighting_coeffs(96_000);
        assert_coeffs(
            pre,
            [1.5597142289757966, -2.9267415782510824, 1.3782612023158187],
            [1.0, -1.8446094698901085, 0.8558433229306412],
        );
        assert_coeffs(
            rlb,
            [1.0, -2.0, 1.0],
            [1.0, -1.9950175447247156, 0.9950237590409233],
        );
    }

    #[test]
    fn test_block_matches_per_sample() {
        let input: Vec<f64> = (0..2048)
            .map(|i| (2.0 * PI * 997.0 * i as f64 / 44_100.0).sin())
            .collect();

        let mut a = KWeightingFilter::new(44_100);
        let block = a.process_block(&input);

        let mut b = KWeightingFilter::new(44_100);
        let per_sample: Vec<f64> = input.iter().map(|&x| b.process(x)).collect();

        assert_eq!(block, per_sample);
    }

    #[test]
    fn test_state_carries_across_blocks() {
        let input: Vec<f64> = (0..1000).map(|i| ((i * 7919) % 101) as f64 / 50.0 - 1.0).collect();

        let mut whole = KWeightingFilter::new(48_000);
        let expected = whole.process_block(&input);

        let mut split = KWeightingFilter::new(48_000);
        let mut got = split.process_block(&input[..333]);
        got.extend(split.process_block(&input[333..]));

        assert_eq!(got, expected);
    }

    #[test]
    fn test_dc_is_blocked() {
        let mut filter = KWeightingFilter::new(48_000);
        let mut last = 0.0;
        for _ in 0..48_000 {
            last = filter.process(1.0);
        }
        assert!(last.abs() < 1e-3);
    }
}
