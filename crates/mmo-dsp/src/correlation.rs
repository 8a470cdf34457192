//! Streaming Pearson correlation
//!
//! Welford-style running moments, so the result is stable over long inputs
//! and never needs the whole signal in memory.

use crate::error::{DspError, DspResult};

/// Online correlation of paired samples
#[derive(Debug, Clone, Default)]
pub struct CorrelationAccumulator {
    n: u64,
    mean_a: f64,
    mean_b: f64,
    /// Sum of squared deviations of `a`
    m2_a: f64,
    /// Sum of squared deviations of `b`
    m2_b: f64,
    /// Sum of co-deviations
    co_ab: f64,
}

impl CorrelationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample pair in
    #[inline]
    pub fn update(&mut self, a: f64, b: f64) {
        self.n += 1;
        let n = self.n as f64;

        let da = a - self.mean_a;
        self.mean_a += da / n;
        let db = b - self.mean_b;
        self.mean_b += db / n;

        let da_post = a - self.mean_a;
        let db_post = b - self.mean_b;
        self.m2_a += da * da_post;
        self.m2_b += db * db_post;
        self.co_ab += da * db_post;
    }

    pub fn update_block(&mut self, a: &[f64], b: &[f64]) {
        for (&x, &y) in a.iter().zip(b.iter()) {
            self.update(x, y);
        }
    }

    /// Pairs seen
    pub fn count(&self) -> u64 {
        self.n
    }

    /// Pearson r in [-1, 1]; 0 when either side has no variance
    pub fn correlation(&self) -> f64 {
        if self.n < 2 || self.m2_a <= 0.0 || self.m2_b <= 0.0 {
            return 0.0;
        }
        (self.co_ab / (self.m2_a * self.m2_b).sqrt()).clamp(-1.0, 1.0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL PAIRS
// ═══════════════════════════════════════════════════════════════════════════════

/// Named channel pair inside an interleaved stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPair {
    pub name: String,
    pub a: usize,
    pub b: usize,
}

impl ChannelPair {
    pub fn new(name: impl Into<String>, a: usize, b: usize) -> Self {
        Self {
            name: name.into(),
            a,
            b,
        }
    }
}

/// Correlation for several channel pairs of one interleaved stream
///
/// Chunks need not be frame-aligned: leftover samples are held until the
/// next push completes the frame.
#[derive(Debug, Clone)]
pub struct PairCorrelationAccumulator {
    channels: usize,
    pairs: Vec<ChannelPair>,
    accumulators: Vec<CorrelationAccumulator>,
    carry: Vec<f64>,
}

impl PairCorrelationAccumulator {
    pub fn new(channels: usize, pairs: Vec<ChannelPair>) -> DspResult<Self> {
        if channels == 0 {
            return Err(DspError::InvalidChannelCount(channels));
        }
        if let Some(bad) = pairs.iter().find(|p| p.a >= channels || p.b >= channels) {
            return Err(DspError::ChannelMismatch {
                expected: channels,
                actual: bad.a.max(bad.b) + 1,
            });
        }

        Ok(Self {
            channels,
            accumulators: vec![CorrelationAccumulator::new(); pairs.len()],
            pairs,
            carry: Vec::new(),
        })
    }

    /// Left/right of a two-channel stream
    pub fn stereo() -> Self {
        Self {
            channels: 2,
            pairs: vec![ChannelPair::new("L,R", 0, 1)],
            accumulators: vec![CorrelationAccumulator::new()],
            carry: Vec::new(),
        }
    }

    pub fn push(&mut self, samples: &[f64]) {
        self.carry.extend_from_slice(samples);
        let whole = self.carry.len() - self.carry.len() % self.channels;

        for frame in self.carry[..whole].chunks_exact(self.channels) {
            for (pair, acc) in self.pairs.iter().zip(self.accumulators.iter_mut()) {
                acc.update(frame[pair.a], frame[pair.b]);
            }
        }
        self.carry.drain(..whole);
    }

    /// Samples held back waiting for the rest of their frame
    pub fn pending_samples(&self) -> usize {
        self.carry.len()
    }

    /// `(pair name, r)` in pair order
    pub fn correlations(&self) -> Vec<(String, f64)> {
        self.pairs
            .iter()
            .zip(self.accumulators.iter())
            .map(|(pair, acc)| (pair.name.clone(), acc.correlation()))
            .collect()
    }

    /// Mean r over all pairs, 0 with no pairs
    pub fn mean_correlation(&self) -> f64 {
        if self.accumulators.is_empty() {
            return 0.0;
        }
        let total: f64 = self.accumulators.iter().map(|a| a.correlation()).sum();
        total / self.accumulators.len() as f64
    }
}

/// Correlation between channels 0 and 1 of an interleaved stereo signal
pub fn stereo_correlation(interleaved: &[f64]) -> f64 {
    let mut acc = CorrelationAccumulator::new();
    for frame in interleaved.chunks_exact(2) {
        acc.update(frame[0], frame[1]);
    }
    acc.correlation()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| ((i * 37) % 97) as f64 / 48.0 - 1.0).collect()
    }

    #[test]
    fn test_identical_is_one() {
        let x = ramp(1000);
        let mut acc = CorrelationAccumulator::new();
        acc.update_block(&x, &x);
        assert_relative_eq!(acc.correlation(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverted_is_minus_one() {
        let x = ramp(1000);
        let y: Vec<f64> = x.iter().map(|v| -v).collect();
        let mut acc = CorrelationAccumulator::new();
        acc.update_block(&x, &y);
        assert_relative_eq!(acc.correlation(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_is_zero() {
        let mut acc = CorrelationAccumulator::new();
        assert_eq!(acc.correlation(), 0.0);
        acc.update(0.5, 0.5);
        assert_eq!(acc.correlation(), 0.0);

        // constant side has no variance
        let mut acc = CorrelationAccumulator::new();
        for v in ramp(100) {
            acc.update(v, 0.25);
        }
        assert_eq!(acc.correlation(), 0.0);
    }

    #[test]
    fn test_offset_does_not_matter() {
        let x = ramp(500);
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 100.0).collect();
        let mut acc = CorrelationAccumulator::new();
        acc.update_block(&x, &y);
        assert_relative_eq!(acc.correlation(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reset() {
        let x = ramp(100);
        let mut acc = CorrelationAccumulator::new();
        acc.update_block(&x, &x);
        acc.reset();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.correlation(), 0.0);
    }

    #[test]
    fn test_pairs_with_unaligned_chunks() {
        let frames = 300;
        let mut interleaved = Vec::with_capacity(frames * 3);
        for (i, v) in ramp(frames).into_iter().enumerate() {
            let other = if i % 2 == 0 { 0.3 } else { -0.3 };
            interleaved.extend_from_slice(&[v, -v, other]);
        }

        let pairs = vec![ChannelPair::new("0,1", 0, 1), ChannelPair::new("0,2", 0, 2)];
        let mut whole = PairCorrelationAccumulator::new(3, pairs.clone()).unwrap();
        whole.push(&interleaved);

        let mut split = PairCorrelationAccumulator::new(3, pairs).unwrap();
        for chunk in interleaved.chunks(7) {
            split.push(chunk);
        }

        assert_eq!(split.pending_samples(), 0);
        assert_eq!(whole.correlations(), split.correlations());
        assert_relative_eq!(whole.correlations()[0].1, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pending_partial_frame() {
        let mut acc = PairCorrelationAccumulator::stereo();
        acc.push(&[0.1, 0.2, 0.3]);
        assert_eq!(acc.pending_samples(), 1);
        acc.push(&[0.4]);
        assert_eq!(acc.pending_samples(), 0);
    }

    #[test]
    fn test_pair_out_of_range() {
        let result = PairCorrelationAccumulator::new(2, vec![ChannelPair::new("bad", 0, 2)]);
        assert!(result.is_err());
        assert!(PairCorrelationAccumulator::new(0, Vec::new()).is_err());
    }

    #[test]
    fn test_stereo_correlation_helper() {
        let frames: Vec<f64> = ramp(200).into_iter().flat_map(|v| [v, v]).collect();
        assert_relative_eq!(stereo_correlation(&frames), 1.0, epsilon = 1e-12);
        assert_eq!(stereo_correlation(&[]), 0.0);
    }
}
