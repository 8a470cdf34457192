//! Loudness measurement (ITU-R BS.1770)
//!
//! K-weighted mean-square energy per block, weighted per channel and summed.
//! Integrated mode gates blocks twice (absolute -70 LUFS, then 10 dB below
//! the mean of the survivors); short-term mode averages every block.
//!
//! [`LoudnessMeter`] is streaming: it keeps per-channel filter state and only
//! the filtered frames needed for the next block, so pushing a signal in any
//! chunking yields the same block energies as pushing it whole.

use crate::channel_layout::ChannelWeights;
use crate::error::{check_aligned, DspError, DspResult};
use crate::kweighting::KWeightingFilter;
use serde::{Deserialize, Serialize};

/// Offset between K-weighted energy and LUFS
pub const LUFS_OFFSET: f64 = -0.691;

/// Absolute gate for integrated loudness
pub const ABSOLUTE_GATE_LUFS: f64 = -70.0;

/// Relative gate below the mean of the blocks above the absolute gate
pub const RELATIVE_GATE_DB: f64 = 10.0;

/// Block/hop parameterization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoudnessMode {
    /// 400 ms blocks, 100 ms hop, two-stage gating
    Integrated,
    /// 3 s blocks, 1 s hop, no gating
    ShortTerm,
}

impl LoudnessMode {
    pub fn block_seconds(self) -> f64 {
        match self {
            LoudnessMode::Integrated => 0.4,
            LoudnessMode::ShortTerm => 3.0,
        }
    }

    pub fn hop_seconds(self) -> f64 {
        match self {
            LoudnessMode::Integrated => 0.1,
            LoudnessMode::ShortTerm => 1.0,
        }
    }

    pub fn is_gated(self) -> bool {
        matches!(self, LoudnessMode::Integrated)
    }
}

/// Convert a mean energy to LUFS, `-inf` for non-positive energy
pub fn energy_to_lufs(energy: f64) -> f64 {
    if energy > 0.0 {
        LUFS_OFFSET + 10.0 * energy.log10()
    } else {
        f64::NEG_INFINITY
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Two-stage gated loudness over block energies
pub fn gated_loudness(energies: &[f64]) -> f64 {
    let abs_threshold = 10f64.powf((ABSOLUTE_GATE_LUFS - LUFS_OFFSET) / 10.0);
    let above_abs: Vec<f64> = energies
        .iter()
        .copied()
        .filter(|&e| e > abs_threshold)
        .collect();
    if above_abs.is_empty() {
        return f64::NEG_INFINITY;
    }

    let rel_threshold = mean(&above_abs) / 10f64.powf(RELATIVE_GATE_DB / 10.0);
    let gated: Vec<f64> = above_abs
        .into_iter()
        .filter(|&e| e > rel_threshold)
        .collect();
    if gated.is_empty() {
        return f64::NEG_INFINITY;
    }

    energy_to_lufs(mean(&gated))
}

/// Ungated loudness over block energies
pub fn ungated_loudness(energies: &[f64]) -> f64 {
    if energies.is_empty() {
        return f64::NEG_INFINITY;
    }
    energy_to_lufs(mean(energies))
}

// ═══════════════════════════════════════════════════════════════════════════════
// STREAMING METER
// ═══════════════════════════════════════════════════════════════════════════════

/// Streaming BS.1770 loudness meter over interleaved frames
pub struct LoudnessMeter {
    mode: LoudnessMode,
    weights: Vec<f64>,
    filters: Vec<KWeightingFilter>,
    block_size: usize,
    hop_size: usize,
    /// Filtered samples per channel, starting at the next block
    pending: Vec<Vec<f64>>,
    energies: Vec<f64>,
    frames_seen: usize,
}

impl LoudnessMeter {
    /// Create a meter for the given channel weights
    pub fn new(sample_rate: u32, weights: &ChannelWeights, mode: LoudnessMode) -> DspResult<Self> {
        Self::with_weights(sample_rate, weights.weights.clone(), mode)
    }

    /// Create a meter from raw per-channel weights
    pub fn with_weights(sample_rate: u32, weights: Vec<f64>, mode: LoudnessMode) -> DspResult<Self> {
        if sample_rate == 0 {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if weights.is_empty() {
            return Err(DspError::InvalidChannelCount(0));
        }

        let fs = sample_rate as f64;
        let block_size = (mode.block_seconds() * fs).round() as usize;
        let hop_size = (mode.hop_seconds() * fs).round() as usize;
        let channels = weights.len();

        Ok(Self {
            mode,
            filters: (0..channels).map(|_| KWeightingFilter::new(sample_rate)).collect(),
            weights,
            block_size,
            hop_size,
            pending: vec![Vec::new(); channels],
            energies: Vec::new(),
            frames_seen: 0,
        })
    }

    /// Integrated meter for a stereo pair
    pub fn stereo_integrated(sample_rate: u32) -> DspResult<Self> {
        Self::new(sample_rate, &ChannelWeights::stereo(), LoudnessMode::Integrated)
    }

    pub fn channels(&self) -> usize {
        self.weights.len()
    }

    pub fn mode(&self) -> LoudnessMode {
        self.mode
    }

    /// Frames pushed so far
    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    /// Push interleaved frames
    pub fn push(&mut self, interleaved: &[f64]) -> DspResult<()> {
        let channels = self.channels();
        check_aligned(interleaved.len(), channels)?;
        if interleaved.is_empty() {
            return Ok(());
        }

        for (ch, (filter, pending)) in self
            .filters
            .iter_mut()
            .zip(self.pending.iter_mut())
            .enumerate()
        {
            pending.extend(
                interleaved
                    .iter()
                    .skip(ch)
                    .step_by(channels)
                    .map(|&x| filter.process(x)),
            );
        }
        self.frames_seen += interleaved.len() / channels;

        self.drain_blocks();
        Ok(())
    }

    /// Push one planar buffer per channel
    pub fn push_planar(&mut self, planes: &[&[f64]]) -> DspResult<()> {
        if planes.len() != self.channels() {
            return Err(DspError::ChannelMismatch {
                expected: self.channels(),
                actual: planes.len(),
            });
        }
        let frames = planes.iter().map(|p| p.len()).min().unwrap_or(0);
        let mut interleaved = Vec::with_capacity(frames * planes.len());
        for i in 0..frames {
            interleaved.extend(planes.iter().map(|p| p[i]));
        }
        self.push(&interleaved)
    }

    fn drain_blocks(&mut self) {
        if self.block_size == 0 || self.hop_size == 0 {
            return;
        }

        let mut start = 0;
        let available = self.pending.first().map(|p| p.len()).unwrap_or(0);
        while start + self.block_size <= available {
            let energy: f64 = self
                .pending
                .iter()
                .zip(self.weights.iter())
                .map(|(samples, &w)| {
                    let block = &samples[start..start + self.block_size];
                    let sum_sq: f64 = block.iter().map(|s| s * s).sum();
                    w * (sum_sq / self.block_size as f64)
                })
                .sum();
            self.energies.push(energy);
            start += self.hop_size;
        }

        if start > 0 {
            for pending in &mut self.pending {
                pending.drain(..start.min(pending.len()));
            }
        }
    }

    /// Weighted block energies computed so far
    pub fn block_energies(&self) -> &[f64] {
        &self.energies
    }

    /// Loudness in LUFS, `-inf` when nothing survives gating
    pub fn loudness(&self) -> f64 {
        if self.mode.is_gated() {
            gated_loudness(&self.energies)
        } else {
            ungated_loudness(&self.energies)
        }
    }

    /// Clear filter state and accumulated blocks
    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
        for pending in &mut self.pending {
            pending.clear();
        }
        self.energies.clear();
        self.frames_seen = 0;
    }
}

/// Integrated loudness of a whole interleaved signal
pub fn integrated_loudness(
    interleaved: &[f64],
    sample_rate: u32,
    weights: &ChannelWeights,
) -> DspResult<f64> {
    let mut meter = LoudnessMeter::new(sample_rate, weights, LoudnessMode::Integrated)?;
    meter.push(interleaved)?;
    Ok(meter.loudness())
}

/// Short-term (3 s / 1 s, ungated) loudness of a whole interleaved signal
pub fn short_term_loudness(
    interleaved: &[f64],
    sample_rate: u32,
    weights: &ChannelWeights,
) -> DspResult<f64> {
    let mut meter = LoudnessMeter::new(sample_rate, weights, LoudnessMode::ShortTerm)?;
    meter.push(interleaved)?;
    Ok(meter.loudness())
}
