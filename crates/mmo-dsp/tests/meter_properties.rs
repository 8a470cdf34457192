// ============================================================================
// Meter property tests
// Seeded noise and synthetic programs through the public meter API
// ============================================================================

//! Meter Property Tests
//!
//! Properties that must hold for any input: silence handling, gating,
//! correlation bounds, and invariance to how the stream is chunked.

use approx::assert_relative_eq;
use mmo_dsp::loudness::{energy_to_lufs, gated_loudness};
use mmo_dsp::{
    ChannelWeightResolver, ChannelWeights, CorrelationAccumulator, LoudnessMeter, LoudnessMode,
    TruePeakEstimator, integrated_loudness, sample_peak_dbfs, true_peak_dbtp,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;

// ============================================================================
// TEST UTILITIES
// ============================================================================

/// Seeded white noise in [-amplitude, amplitude)
fn generate_noise(num_samples: usize, amplitude: f64, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..num_samples)
        .map(|_| rng.random_range(-amplitude..amplitude))
        .collect()
}

fn interleave(left: &[f64], right: &[f64]) -> Vec<f64> {
    left.iter()
        .zip(right.iter())
        .flat_map(|(&l, &r)| [l, r])
        .collect()
}

fn generate_sine(frequency: f64, amplitude: f64, sample_rate: u32, num_samples: usize) -> Vec<f64> {
    (0..num_samples)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f64 / sample_rate as f64).sin())
        .collect()
}

/// Deterministic irregular chunk sizes
fn chunk_sizes(seed: u64, count: usize, max: usize) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count).map(|_| rng.random_range(1..=max)).collect()
}

// ============================================================================
// SILENCE
// ============================================================================

#[test]
fn test_silence_everywhere() {
    for rate in [44_100u32, 48_000, 96_000] {
        let silence = vec![0.0; rate as usize * 2];
        let lufs = integrated_loudness(&silence, rate, &ChannelWeights::stereo()).unwrap();
        let tp = true_peak_dbtp(&silence, 2, rate).unwrap();
        assert_eq!(lufs, f64::NEG_INFINITY, "rate {rate}");
        assert_eq!(tp, f64::NEG_INFINITY, "rate {rate}");
    }
}

// ============================================================================
// GATING
// ============================================================================

#[test]
fn test_quiet_block_is_gated_out() {
    let loud = 0.1;
    let quiet = loud / 20.0; // 13 dB below
    let with_quiet = gated_loudness(&[loud, loud, quiet]);
    let without = gated_loudness(&[loud, loud]);
    assert_relative_eq!(with_quiet, without, epsilon = 1e-12);
    assert_relative_eq!(without, energy_to_lufs(loud), epsilon = 1e-12);
}

#[test]
fn test_block_just_above_relative_gate_survives() {
    let loud = 0.1;
    let near = loud / 5.0; // 7 dB below, above the relative gate
    let gated = gated_loudness(&[loud, near]);
    assert_relative_eq!(gated, energy_to_lufs((loud + near) / 2.0), epsilon = 1e-12);
}

#[test]
fn test_program_with_silent_tail() {
    let rate = 48_000;
    let mut program = generate_sine(997.0, 0.5, rate, rate as usize * 3);
    let tone_only = integrated_loudness(&program, rate, &ChannelWeights::uniform(1, "mono"))
        .unwrap();
    program.extend(vec![0.0; rate as usize * 3]);
    let with_tail = integrated_loudness(&program, rate, &ChannelWeights::uniform(1, "mono"))
        .unwrap();
    // silence falls under the absolute gate; only edge blocks differ
    assert!((tone_only - with_tail).abs() < 0.5, "{tone_only} vs {with_tail}");
}

// ============================================================================
// CORRELATION
// ============================================================================

#[test]
fn test_independent_noise_is_uncorrelated() {
    let left = generate_noise(200_000, 1.0, 7);
    let right = generate_noise(200_000, 1.0, 8);
    let mut acc = CorrelationAccumulator::new();
    acc.update_block(&left, &right);
    assert!(acc.correlation().abs() < 0.05, "r = {}", acc.correlation());
}

#[test]
fn test_identical_and_inverted_noise() {
    let left = generate_noise(50_000, 0.8, 11);
    let inverted: Vec<f64> = left.iter().map(|v| -v).collect();

    let mut same = CorrelationAccumulator::new();
    same.update_block(&left, &left);
    assert_relative_eq!(same.correlation(), 1.0, epsilon = 1e-9);

    let mut opposite = CorrelationAccumulator::new();
    opposite.update_block(&left, &inverted);
    assert_relative_eq!(opposite.correlation(), -1.0, epsilon = 1e-9);
}

// ============================================================================
// CHUNK INVARIANCE
// ============================================================================

#[test]
fn test_loudness_chunk_invariance_with_noise() {
    let rate = 44_100;
    let frames = rate as usize * 2;
    let signal = interleave(
        &generate_noise(frames, 0.5, 21),
        &generate_noise(frames, 0.25, 22),
    );

    let whole = integrated_loudness(&signal, rate, &ChannelWeights::stereo()).unwrap();

    let mut meter = LoudnessMeter::stereo_integrated(rate).unwrap();
    let mut offset = 0;
    for frames in chunk_sizes(3, 10_000, 4096) {
        if offset >= signal.len() {
            break;
        }
        let end = (offset + frames * 2).min(signal.len());
        meter.push(&signal[offset..end]).unwrap();
        offset = end;
    }
    assert_eq!(offset, signal.len());
    assert_eq!(meter.loudness(), whole);
}

#[test]
fn test_true_peak_chunk_invariance_with_noise() {
    for rate in [48_000u32, 32_000] {
        let signal = generate_noise(30_000, 0.9, 31);
        let whole = true_peak_dbtp(&signal, 1, rate).unwrap();

        let mut est = TruePeakEstimator::new(rate, 1).unwrap();
        let mut offset = 0;
        for size in chunk_sizes(4, 10_000, 3000) {
            if offset >= signal.len() {
                break;
            }
            let end = (offset + size).min(signal.len());
            est.push(&signal[offset..end]).unwrap();
            offset = end;
        }
        assert_eq!(est.finalize(), whole, "rate {rate}");
    }
}

#[test]
fn test_true_peak_not_below_sample_peak_for_noise() {
    let signal = generate_noise(48_000, 0.7, 41);
    let sp = sample_peak_dbfs(&signal);
    let tp = true_peak_dbtp(&signal, 1, 48_000).unwrap();
    assert!(tp > sp - 0.1, "tp {tp} sp {sp}");
}

// ============================================================================
// WEIGHTS
// ============================================================================

#[test]
fn test_surround_weights_raise_loudness() {
    let rate = 48_000;
    let frames = rate as usize;
    let tone = generate_sine(997.0, 0.25, rate, frames);

    // energy only in the surround pair of a 5.1 stream
    let mut interleaved = Vec::with_capacity(frames * 6);
    for &s in &tone {
        interleaved.extend_from_slice(&[0.0, 0.0, 0.0, 0.0, s, s]);
    }

    let weighted = ChannelWeightResolver::resolve(6, None, Some("5.1"));
    let flat = ChannelWeights::uniform(6, "flat");

    let mut a = LoudnessMeter::new(rate, &weighted, LoudnessMode::Integrated).unwrap();
    a.push(&interleaved).unwrap();
    let mut b = LoudnessMeter::new(rate, &flat, LoudnessMode::Integrated).unwrap();
    b.push(&interleaved).unwrap();

    assert_relative_eq!(a.loudness() - b.loudness(), 10.0 * 1.41f64.log10(), epsilon = 1e-9);
}
