//! Stereo meter packs for the fold/reference comparison
//!
//! - `basic` - streaming sample peak, RMS and correlation, bounded memory
//! - `truth` - materialises the signal, then integrated LUFS (stereo
//!   weights), 4x true peak and correlation
//!
//! The two are separate algorithms; their numbers are not expected to agree.

use crate::error::QaError;
use mmo_dsp::{
    integrated_loudness, true_peak_dbtp, ChannelWeightResolver, CorrelationAccumulator, DspResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Results of one meter pass; fields a pack does not measure stay `None`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MeterReading {
    pub correlation: f64,
    pub lufs: Option<f64>,
    pub true_peak_dbtp: Option<f64>,
    /// Linear sample peak
    pub peak: Option<f64>,
    pub rms_dbfs: Option<f64>,
}

/// Streaming stereo meter
pub trait MeterBackend {
    fn name(&self) -> &'static str;

    /// Feed one interleaved stereo block
    fn push(&mut self, block: &[f64]) -> DspResult<()>;

    fn finish(self: Box<Self>) -> DspResult<MeterReading>;
}

/// Which meter pack to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterPack {
    Basic,
    #[default]
    Truth,
}

impl MeterPack {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeterPack::Basic => "basic",
            MeterPack::Truth => "truth",
        }
    }

    pub fn meter(&self, sample_rate: u32) -> Box<dyn MeterBackend> {
        match self {
            MeterPack::Basic => Box::new(BasicMeter::new()),
            MeterPack::Truth => Box::new(PreciseMeter::new(sample_rate)),
        }
    }
}

impl fmt::Display for MeterPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeterPack {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(MeterPack::Basic),
            "truth" => Ok(MeterPack::Truth),
            other => Err(QaError::UnknownMeterPack(other.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASIC
// ═══════════════════════════════════════════════════════════════════════════════

/// Streaming peak / RMS / correlation
#[derive(Debug, Clone, Default)]
pub struct BasicMeter {
    peak: f64,
    sum_sq: f64,
    count: u64,
    correlation: CorrelationAccumulator,
}

impl BasicMeter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MeterBackend for BasicMeter {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn push(&mut self, block: &[f64]) -> DspResult<()> {
        for frame in block.chunks_exact(2) {
            let (left, right) = (frame[0], frame[1]);
            self.peak = self.peak.max(left.abs()).max(right.abs());
            self.sum_sq += left * left + right * right;
            self.count += 2;
            self.correlation.update(left, right);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> DspResult<MeterReading> {
        let rms = if self.count == 0 {
            0.0
        } else {
            (self.sum_sq / self.count as f64).sqrt()
        };
        let rms_dbfs = if rms > 0.0 {
            20.0 * rms.log10()
        } else {
            f64::NEG_INFINITY
        };

        Ok(MeterReading {
            correlation: self.correlation.correlation(),
            peak: Some(self.peak),
            rms_dbfs: Some(rms_dbfs),
            ..MeterReading::default()
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRUTH
// ═══════════════════════════════════════════════════════════════════════════════

/// Whole-signal BS.1770 loudness, true peak and correlation
#[derive(Debug, Clone)]
pub struct PreciseMeter {
    sample_rate: u32,
    samples: Vec<f64>,
}

impl PreciseMeter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Vec::new(),
        }
    }
}

impl MeterBackend for PreciseMeter {
    fn name(&self) -> &'static str {
        "truth"
    }

    fn push(&mut self, block: &[f64]) -> DspResult<()> {
        self.samples.extend_from_slice(block);
        Ok(())
    }

    fn finish(self: Box<Self>) -> DspResult<MeterReading> {
        let mut samples = self.samples;
        samples.truncate(samples.len() - samples.len() % 2);

        if samples.is_empty() {
            return Ok(MeterReading {
                correlation: 0.0,
                lufs: Some(f64::NEG_INFINITY),
                true_peak_dbtp: Some(f64::NEG_INFINITY),
                ..MeterReading::default()
            });
        }

        let weights = ChannelWeightResolver::resolve(2, None, Some("stereo"));
        let lufs = integrated_loudness(&samples, self.sample_rate, &weights)?;
        let true_peak = true_peak_dbtp(&samples, 2, self.sample_rate)?;
        let correlation = mmo_dsp::correlation::stereo_correlation(&samples);

        Ok(MeterReading {
            correlation,
            lufs: Some(lufs),
            true_peak_dbtp: Some(true_peak),
            ..MeterReading::default()
        })
    }
}

/// Run a fallible block stream through a meter
pub fn measure<I, E>(mut meter: Box<dyn MeterBackend>, blocks: I) -> Result<MeterReading, E>
where
    I: IntoIterator<Item = Result<Vec<f64>, E>>,
    E: From<mmo_dsp::DspError>,
{
    for block in blocks {
        meter.push(&block?)?;
    }
    Ok(meter.finish()?)
}
