//! mmo-dsp: measurement DSP for downmix QA
//!
//! Deterministic, streaming meters over interleaved `f64` frames.
//!
//! ## Modules
//! - `channel_layout` - speaker positions, layout/mask inference, BS.1770 channel weights
//! - `kweighting` - pre-filter + RLB biquads (48 kHz table, analytic elsewhere)
//! - `loudness` - block energies with integrated (gated) and short-term modes
//! - `true_peak` - 4x oversampled true-peak estimation
//! - `correlation` - online Pearson correlation, single and per channel pair
//!
//! Every meter is chunk-invariant: pushing a signal in pieces gives the same
//! result as pushing it whole.

pub mod channel_layout;
pub mod correlation;
pub mod error;
pub mod kweighting;
pub mod loudness;
pub mod true_peak;

pub use channel_layout::{ChannelWeightResolver, ChannelWeights, SpeakerPosition};
pub use correlation::{ChannelPair, CorrelationAccumulator, PairCorrelationAccumulator};
pub use error::{DspError, DspResult};
pub use kweighting::{Biquad, BiquadCoeffs, KWeightingFilter};
pub use loudness::{integrated_loudness, short_term_loudness, LoudnessMeter, LoudnessMode};
pub use true_peak::{linear_to_db, sample_peak_dbfs, true_peak_dbtp, TruePeakEstimator};

/// RMS of a sample slice in dBFS, `-inf` for silence or empty input
pub fn rms_dbfs(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NEG_INFINITY;
    }
    let mean_sq = samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64;
    if mean_sq > 0.0 {
        10.0 * mean_sq.log10()
    } else {
        f64::NEG_INFINITY
    }
}
