//! True-peak estimation (4x oversampling)
//!
//! Two interpolator designs, selected by sample rate:
//! - 48 kHz: the BS.1770 12-tap x 4-phase polyphase table, block processed
//!   with an 11-sample history carried across blocks and pushes
//! - anything else: a 63-tap Hann-windowed sinc with its cutoff at the source
//!   Nyquist, split into 4 polyphase branches and aligned like a centred
//!   convolution of the zero-stuffed signal
//!
//! Samples are attenuated by 0.25 before filtering and the result is
//! compensated by +20·log10(4) dB.

use crate::error::{check_aligned, DspError, DspResult};
use std::f64::consts::PI;

/// Oversampling factor
pub const OVERSAMPLE: usize = 4;

/// Pre-filter attenuation
pub const HEADROOM_GAIN: f64 = 0.25;

/// Block length for the 48 kHz polyphase path
pub const POLYPHASE_BLOCK: usize = 262_144;

/// Taps of the generic windowed-sinc design
pub const SINC_TAPS: usize = 63;

/// Generic cutoff as a fraction of the oversampled Nyquist
pub const SINC_CUTOFF: f64 = 0.25;

/// BS.1770 interpolation table, rows are taps, columns are phases
const ITU_POLYPHASE: [[f64; 4]; 12] = [
    [0.0017089843750, -0.0291748046875, -0.0189208984375, -0.0083007812500],
    [0.0109863281250, 0.0292968750000, 0.0330810546875, 0.0148925781250],
    [-0.0196533203125, -0.0517578125000, -0.0582275390625, -0.0266113281250],
    [0.0332031250000, 0.0891113281250, 0.1015625000000, 0.0476074218750],
    [-0.0594482421875, -0.1665039062500, -0.2003173828125, -0.1022949218750],
    [0.1373291015625, 0.4650878906250, 0.7797851562500, 0.9721679687500],
    [0.9721679687500, 0.7797851562500, 0.4650878906250, 0.1373291015625],
    [-0.1022949218750, -0.2003173828125, -0.1665039062500, -0.0594482421875],
    [0.0476074218750, 0.1015625000000, 0.0891113281250, 0.0332031250000],
    [-0.0266113281250, -0.0582275390625, -0.0517578125000, -0.0196533203125],
    [0.0148925781250, 0.0330810546875, 0.0292968750000, 0.0109863281250],
    [-0.0083007812500, -0.0189208984375, -0.0291748046875, 0.0017089843750],
];

/// Linear amplitude to dB, `-inf` for zero
pub fn linear_to_db(value: f64) -> f64 {
    if value > 0.0 {
        20.0 * value.log10()
    } else {
        f64::NEG_INFINITY
    }
}

/// Largest absolute sample in dBFS
pub fn sample_peak_dbfs(samples: &[f64]) -> f64 {
    linear_to_db(samples.iter().fold(0.0f64, |acc, s| acc.max(s.abs())))
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPOLATOR DESIGNS
// ═══════════════════════════════════════════════════════════════════════════════

/// Phase-major taps: `phases[p][i]` multiplies `x[m - i]` for output `4m + p`
#[derive(Debug, Clone)]
struct PolyphaseBank {
    phases: Vec<Vec<f64>>,
    /// Oversampled outputs to discard at the start (group delay)
    latency: usize,
}

impl PolyphaseBank {
    fn itu_48k() -> Self {
        let phases = (0..OVERSAMPLE)
            .map(|p| ITU_POLYPHASE.iter().map(|row| row[p]).collect())
            .collect();
        Self { phases, latency: 0 }
    }

    fn windowed_sinc() -> Self {
        let kernel = windowed_sinc_kernel(SINC_TAPS, SINC_CUTOFF);
        let phases = (0..OVERSAMPLE)
            .map(|p| kernel.iter().skip(p).step_by(OVERSAMPLE).copied().collect())
            .collect();
        Self {
            phases,
            latency: (SINC_TAPS - 1) / 2,
        }
    }

    fn history_len(&self) -> usize {
        self.phases.iter().map(|p| p.len()).max().unwrap_or(1) - 1
    }
}

/// Hann-windowed sinc low-pass, unit DC gain per polyphase branch on average
///
/// `cutoff` is relative to the oversampled Nyquist.
pub fn windowed_sinc_kernel(taps: usize, cutoff: f64) -> Vec<f64> {
    let fc = cutoff * 0.5;
    let center = (taps - 1) as f64 / 2.0;
    let span = (taps - 1) as f64;

    let raw: Vec<f64> = (0..taps)
        .map(|n| {
            let x = 2.0 * fc * (n as f64 - center);
            let sinc = if x == 0.0 { 1.0 } else { (PI * x).sin() / (PI * x) };
            let window = 0.5 - 0.5 * (2.0 * PI * n as f64 / span).cos();
            2.0 * fc * sinc * window
        })
        .collect();

    let sum: f64 = raw.iter().sum();
    raw.into_iter()
        .map(|h| h / sum * OVERSAMPLE as f64)
        .collect()
}

#[derive(Debug, Clone)]
enum Interpolator {
    /// Fixed table at 48 kHz
    Itu48k(PolyphaseBank),
    /// Designed kernel for other rates
    WindowedSinc(PolyphaseBank),
}

impl Interpolator {
    fn for_sample_rate(sample_rate: u32) -> Self {
        if sample_rate == 48_000 {
            Interpolator::Itu48k(PolyphaseBank::itu_48k())
        } else {
            Interpolator::WindowedSinc(PolyphaseBank::windowed_sinc())
        }
    }

    fn bank(&self) -> &PolyphaseBank {
        match self {
            Interpolator::Itu48k(bank) | Interpolator::WindowedSinc(bank) => bank,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ESTIMATOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct ChannelState {
    /// Last input samples (already attenuated), oldest first
    history: Vec<f64>,
    /// Input samples consumed
    consumed: usize,
}

/// Streaming 4x oversampled true-peak meter over interleaved frames
#[derive(Debug, Clone)]
pub struct TruePeakEstimator {
    channels: usize,
    interpolator: Interpolator,
    states: Vec<ChannelState>,
    peak: f64,
}

impl TruePeakEstimator {
    pub fn new(sample_rate: u32, channels: usize) -> DspResult<Self> {
        if sample_rate == 0 {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if channels == 0 {
            return Err(DspError::InvalidChannelCount(channels));
        }

        let interpolator = Interpolator::for_sample_rate(sample_rate);
        let history_len = interpolator.bank().history_len();

        Ok(Self {
            channels,
            states: vec![
                ChannelState {
                    history: vec![0.0; history_len],
                    consumed: 0,
                };
                channels
            ],
            interpolator,
            peak: 0.0,
        })
    }

    /// True when the fixed 48 kHz table is in use
    pub fn uses_itu_table(&self) -> bool {
        matches!(self.interpolator, Interpolator::Itu48k(_))
    }

    /// Push interleaved frames
    pub fn push(&mut self, interleaved: &[f64]) -> DspResult<()> {
        check_aligned(interleaved.len(), self.channels)?;

        for ch in 0..self.channels {
            let channel: Vec<f64> = interleaved
                .iter()
                .skip(ch)
                .step_by(self.channels)
                .map(|&x| x * HEADROOM_GAIN)
                .collect();

            match &self.interpolator {
                Interpolator::Itu48k(bank) => {
                    for block in channel.chunks(POLYPHASE_BLOCK) {
                        let peak = run_bank(bank, &mut self.states[ch], block, None);
                        self.peak = self.peak.max(peak);
                    }
                }
                Interpolator::WindowedSinc(bank) => {
                    let peak = run_bank(bank, &mut self.states[ch], &channel, None);
                    self.peak = self.peak.max(peak);
                }
            }
        }
        Ok(())
    }

    /// Flush the interpolator tail and return the true peak in dBTP
    pub fn finalize(mut self) -> f64 {
        if let Interpolator::WindowedSinc(bank) = &self.interpolator {
            // The last `latency` oversampled outputs sit beyond the input end.
            let tail_inputs = bank.latency.div_ceil(OVERSAMPLE) + 1;
            let zeros = vec![0.0; tail_inputs];
            for state in &mut self.states {
                let limit = state.consumed * OVERSAMPLE + bank.latency;
                let peak = run_bank(bank, state, &zeros, Some(limit));
                self.peak = self.peak.max(peak);
            }
        }

        linear_to_db(self.peak) + linear_to_db(OVERSAMPLE as f64)
    }
}

/// Run one channel block through a bank; returns the block peak
///
/// Oversampled output `g = 4m + p` counts when `latency <= g < limit`.
fn run_bank(
    bank: &PolyphaseBank,
    state: &mut ChannelState,
    block: &[f64],
    limit: Option<usize>,
) -> f64 {
    let history_len = state.history.len();
    let mut work = Vec::with_capacity(history_len + block.len());
    work.extend_from_slice(&state.history);
    work.extend_from_slice(block);

    let mut peak = 0.0f64;
    for (offset, m) in (state.consumed..state.consumed + block.len()).enumerate() {
        let newest = history_len + offset;
        for (p, taps) in bank.phases.iter().enumerate() {
            let g = m * OVERSAMPLE + p;
            if g < bank.latency || limit.is_some_and(|limit| g >= limit) {
                continue;
            }
            let acc: f64 = taps
                .iter()
                .enumerate()
                .map(|(i, &h)| h * work[newest - i])
                .sum();
            peak = peak.max(acc.abs());
        }
    }

    state.consumed += block.len();
    let keep_from = work.len() - history_len;
    state.history.copy_from_slice(&work[keep_from..]);
    peak
}

/// True peak of a whole interleaved signal, in dBTP
pub fn true_peak_dbtp(interleaved: &[f64], channels: usize, sample_rate: u32) -> DspResult<f64> {
    let mut estimator = TruePeakEstimator::new(sample_rate, channels)?;
    estimator.push(interleaved)?;
    Ok(estimator.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, amplitude: f64, phase: f64, sample_rate: u32, frames: usize) -> Vec<f64> {
        (0..frames)
            .map(|i| {
                amplitude * (2.0 * PI * freq * i as f64 / sample_rate as f64 + phase).sin()
            })
            .collect()
    }

    #[test]
    fn test_silence_is_neg_inf() {
        let silence = vec![0.0; 4800 * 2];
        assert_eq!(true_peak_dbtp(&silence, 2, 48_000).unwrap(), f64::NEG_INFINITY);
        assert_eq!(true_peak_dbtp(&silence, 2, 44_100).unwrap(), f64::NEG_INFINITY);
        assert_eq!(true_peak_dbtp(&[], 2, 48_000).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_itu_phases_near_unity() {
        let bank = PolyphaseBank::itu_48k();
        for taps in &bank.phases {
            assert_eq!(taps.len(), 12);
            let sum: f64 = taps.iter().sum();
            assert!((sum - 1.0).abs() < 0.03, "phase sum {sum}");
        }
        assert_eq!(bank.history_len(), 11);
    }

    #[test]
    fn test_sinc_kernel_shape() {
        let kernel = windowed_sinc_kernel(SINC_TAPS, SINC_CUTOFF);
        assert_eq!(kernel.len(), 63);
        let sum: f64 = kernel.iter().sum();
        assert!((sum - 4.0).abs() < 1e-12);
        // symmetric, endpoints windowed to zero
        for n in 0..63 {
            assert!((kernel[n] - kernel[62 - n]).abs() < 1e-15);
        }
        assert!(kernel[0].abs() < 1e-15);

        let bank = PolyphaseBank::windowed_sinc();
        assert_eq!(bank.history_len(), 15);
        assert_eq!(bank.latency, 31);
    }

    #[test]
    fn test_full_scale_sine_48k() {
        let signal = sine(997.0, 1.0, 0.0, 48_000, 48_000);
        let tp = true_peak_dbtp(&signal, 1, 48_000).unwrap();
        assert!(tp.abs() < 0.2, "tp = {tp}");
    }

    #[test]
    fn test_full_scale_sine_44k1() {
        let signal = sine(997.0, 1.0, 0.0, 44_100, 8820);
        let tp = true_peak_dbtp(&signal, 1, 44_100).unwrap();
        assert!(tp.abs() < 0.2, "tp = {tp}");
    }

    #[test]
    fn test_inter_sample_peak_48k() {
        // 12 kHz at 45 degrees never hits a sample at the crest
        let signal = sine(12_000.0, 1.0, PI / 4.0, 48_000, 48_000);
        let sp = sample_peak_dbfs(&signal);
        let tp = true_peak_dbtp(&signal, 1, 48_000).unwrap();
        assert!((sp - (-3.0103)).abs() < 0.01, "sp = {sp}");
        assert!(tp > -0.5 && tp < 0.5, "tp = {tp}");
        assert!(tp - sp > 2.5);
    }

    #[test]
    fn test_inter_sample_peak_44k1() {
        let signal = sine(11_025.0, 0.5, PI / 4.0, 44_100, 4410);
        let sp = sample_peak_dbfs(&signal);
        let tp = true_peak_dbtp(&signal, 1, 44_100).unwrap();
        assert!(tp - sp > 2.5, "sp = {sp}, tp = {tp}");
    }

    #[test]
    fn test_chunking_does_not_change_result() {
        for rate in [48_000u32, 44_100] {
            let left = sine(3000.0, 0.8, 0.3, rate, 9000);
            let right = sine(7000.0, 0.6, 1.1, rate, 9000);
            let interleaved: Vec<f64> = left
                .iter()
                .zip(right.iter())
                .flat_map(|(&l, &r)| [l, r])
                .collect();

            let whole = true_peak_dbtp(&interleaved, 2, rate).unwrap();

            let mut est = TruePeakEstimator::new(rate, 2).unwrap();
            for chunk in interleaved.chunks(2 * 311) {
                est.push(chunk).unwrap();
            }
            assert_eq!(est.finalize(), whole, "rate {rate}");
        }
    }

    #[test]
    fn test_rate_selects_design() {
        assert!(TruePeakEstimator::new(48_000, 1).unwrap().uses_itu_table());
        assert!(!TruePeakEstimator::new(96_000, 1).unwrap().uses_itu_table());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(TruePeakEstimator::new(0, 2).is_err());
        assert!(TruePeakEstimator::new(48_000, 0).is_err());
        let mut est = TruePeakEstimator::new(48_000, 2).unwrap();
        assert!(est.push(&[1.0]).is_err());
    }

    #[test]
    fn test_linear_to_db() {
        assert_eq!(linear_to_db(1.0), 0.0);
        assert_eq!(linear_to_db(0.0), f64::NEG_INFINITY);
        assert!((linear_to_db(0.5) + 6.0206).abs() < 1e-4);
    }
}
