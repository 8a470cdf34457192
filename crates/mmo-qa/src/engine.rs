//! Downmix-fold QA engine
//!
//! Folds a multichannel source to stereo through a policy matrix and compares
//! the result against a stereo reference:
//!
//! ```text
//! INIT -> TOOLCHAIN_CHECK -> MATRIX_RESOLVED -> METADATA_VALIDATED
//!      -> DECODING -> METRICS_COMPUTED -> COMPARED -> REPORT
//! ```
//!
//! Every stage may jump straight to REPORT. Expected failures (missing tools,
//! unresolvable matrices, mismatched inputs, decode errors) become issues in
//! the returned [`DownmixQaReport`]; the engine has no error return.

use crate::align::StreamAligner;
use crate::config::{QaConfig, Tolerances};
use crate::decode::{DecodeBackend, MissingTool};
use crate::error::MeasureError;
use crate::meters::{measure, MeterPack, MeterReading};
use crate::metadata::AudioStreamDescriptor;
use crate::report::{ids, DownmixQaReport, Evidence, QaIssue, SEVERITY_FATAL, SEVERITY_MISMATCH};

use mmo_downmix::{DownmixMatrix, DownmixMatrixService, DownmixResult, Fold, OntologySource};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Channel count every reference must have
const REFERENCE_CHANNELS: usize = 2;

// ═══════════════════════════════════════════════════════════════════════════════
// STAGES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QaStage {
    Init,
    ToolchainCheck,
    MatrixResolved,
    MetadataValidated,
    Decoding,
    MetricsComputed,
    Compared,
    Report,
}

impl fmt::Display for QaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QaStage::Init => "INIT",
            QaStage::ToolchainCheck => "TOOLCHAIN_CHECK",
            QaStage::MatrixResolved => "MATRIX_RESOLVED",
            QaStage::MetadataValidated => "METADATA_VALIDATED",
            QaStage::Decoding => "DECODING",
            QaStage::MetricsComputed => "METRICS_COMPUTED",
            QaStage::Compared => "COMPARED",
            QaStage::Report => "REPORT",
        };
        f.write_str(name)
    }
}

/// Serialised run parameters; fields are alphabetical so the JSON is key-sorted
#[derive(Serialize)]
struct RunLog<'a> {
    decode_backend: &'a str,
    matrix_id: Option<&'a str>,
    max_seconds: f64,
    policy_id: Option<&'a str>,
    ref_channels: Option<usize>,
    remainder_samples_dropped: usize,
    sample_rate_hz: Option<u32>,
    seconds_available: f64,
    seconds_compared: f64,
    source_layout_id: &'a str,
    src_channels: Option<usize>,
    target_layout_id: &'a str,
    tolerances: Tolerances,
}

/// Mutable state of one run, turned into the report at the end
struct Run<'a> {
    src_path: String,
    ref_path: String,
    source_layout_id: &'a str,
    target_layout_id: &'a str,
    decode_backend: &'static str,
    config: &'a QaConfig,
    stage: QaStage,
    policy_id: Option<String>,
    matrix_id: Option<String>,
    src_channels: Option<usize>,
    ref_channels: Option<usize>,
    sample_rate_hz: Option<u32>,
    seconds_available: f64,
    seconds_compared: f64,
    remainder_samples_dropped: usize,
    issues: Vec<QaIssue>,
    measurements: Vec<Evidence>,
}

impl<'a> Run<'a> {
    fn advance(&mut self, next: QaStage) {
        log::debug!("downmix qa: {} -> {}", self.stage, next);
        self.stage = next;
    }

    fn path_evidence(&self) -> Vec<Evidence> {
        vec![
            Evidence::text(ids::EVID_SRC_PATH, &self.src_path),
            Evidence::text(ids::EVID_REF_PATH, &self.ref_path),
        ]
    }

    /// QA paths plus the generic file-path pair
    fn file_evidence(&self) -> Vec<Evidence> {
        let mut evidence = self.path_evidence();
        evidence.push(Evidence::text(ids::EVID_FILE_PATH, &self.src_path));
        evidence.push(Evidence::text(ids::EVID_FILE_PATH, &self.ref_path));
        evidence
    }

    /// File evidence plus policy and matrix when known
    fn base_evidence(&self) -> Vec<Evidence> {
        let mut evidence = self.file_evidence();
        if let Some(policy_id) = self.policy_id.as_deref().filter(|p| !p.is_empty()) {
            evidence.push(Evidence::text(ids::EVID_POLICY_ID, policy_id));
        }
        if let Some(matrix_id) = self.matrix_id.as_deref().filter(|m| !m.is_empty()) {
            evidence.push(Evidence::text(ids::EVID_MATRIX_ID, matrix_id));
        }
        evidence
    }

    fn fatal(&mut self, issue_id: &str, message: String, evidence: Vec<Evidence>) {
        log::warn!("downmix qa {}: {message}", self.stage);
        self.issues.push(QaIssue::new(issue_id, SEVERITY_FATAL, message, evidence));
    }

    fn missing_tool(&mut self, tool: MissingTool) {
        let mut evidence = self.path_evidence();
        evidence.push(Evidence::text(ids::EVID_MISSING_DEP, tool.name));
        evidence.push(Evidence::text(ids::EVID_MISSING_DEP_HINT, tool.hint));
        self.fatal(
            ids::ISSUE_DECODE_FAILED,
            format!("Missing dependency for downmix QA: {}", tool.name),
            evidence,
        );
    }

    fn record(&mut self, fold_id: &str, ref_id: &str, delta_id: &str, unit: &str, fold: f64, reference: f64) -> [Evidence; 3] {
        let triple = [
            Evidence::number(fold_id, fold, unit),
            Evidence::number(ref_id, reference, unit),
            Evidence::number(delta_id, fold - reference, unit),
        ];
        self.measurements.extend(triple.iter().cloned());
        triple
    }

    fn compare(&mut self, triple: [Evidence; 3], tolerance: f64, issue_id: &str, what: &str) {
        let delta = triple[2].value.as_f64().unwrap_or(0.0);
        // NaN deltas (both sides -inf) never exceed a tolerance
        if delta.abs() > tolerance {
            let mut evidence = self.base_evidence();
            evidence.extend(triple);
            self.issues.push(QaIssue::new(
                issue_id,
                SEVERITY_MISMATCH,
                format!("Folded downmix {what} differs from reference beyond tolerance."),
                evidence,
            ));
        }
    }

    fn finish(mut self) -> DownmixQaReport {
        self.advance(QaStage::Report);

        let run_log = RunLog {
            decode_backend: self.decode_backend,
            matrix_id: self.matrix_id.as_deref(),
            max_seconds: self.config.max_seconds,
            policy_id: self.policy_id.as_deref(),
            ref_channels: self.ref_channels,
            remainder_samples_dropped: self.remainder_samples_dropped,
            sample_rate_hz: self.sample_rate_hz,
            seconds_available: self.seconds_available,
            seconds_compared: self.seconds_compared,
            source_layout_id: self.source_layout_id,
            src_channels: self.src_channels,
            target_layout_id: self.target_layout_id,
            tolerances: self.config.tolerances,
        };
        // plain data, serialisation cannot fail
        let log = serde_json::to_string(&run_log).unwrap_or_default();

        self.measurements.push(Evidence {
            unit_id: Some(ids::UNIT_NONE.to_string()),
            ..Evidence::text(ids::EVID_LOG, log.clone())
        });

        log::info!(
            "downmix qa {} vs {}: {} issue(s), {} measurement(s)",
            self.src_path,
            self.ref_path,
            self.issues.len(),
            self.measurements.len()
        );

        DownmixQaReport {
            src_path: self.src_path,
            ref_path: self.ref_path,
            policy_id: self.policy_id,
            matrix_id: self.matrix_id,
            sample_rate_hz: self.sample_rate_hz,
            issues: self.issues,
            measurements: self.measurements,
            log,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// decode -> align -> fold -> meter -> compare -> report
pub struct DownmixQaEngine {
    config: QaConfig,
    ontology: OntologySource,
    decoder: Box<dyn DecodeBackend>,
}

impl DownmixQaEngine {
    /// Engine with the decoder and ontology named in `config`
    pub fn new(config: QaConfig) -> Self {
        let ontology = config
            .ontology_dir
            .clone()
            .map_or(OntologySource::Builtin, OntologySource::Directory);
        let decoder = config.decoder.backend();
        Self::with_parts(config, ontology, decoder)
    }

    pub fn with_parts(config: QaConfig, ontology: OntologySource, decoder: Box<dyn DecodeBackend>) -> Self {
        Self {
            config,
            ontology,
            decoder,
        }
    }

    pub fn config(&self) -> &QaConfig {
        &self.config
    }

    pub fn decoder(&self) -> &dyn DecodeBackend {
        self.decoder.as_ref()
    }

    fn resolve(&self, source_layout_id: &str) -> DownmixResult<(DownmixMatrix, Option<String>)> {
        let service = DownmixMatrixService::from_source(self.ontology.clone())?;
        let matrix = service.resolve_matrix(
            source_layout_id,
            &self.config.target_layout_id,
            self.config.policy_id.as_deref(),
        )?;
        let policy_id = match &self.config.policy_id {
            Some(policy_id) => Some(policy_id.clone()),
            None => service.policy_for_matrix(&matrix.matrix_id)?,
        };
        Ok((matrix, policy_id))
    }

    /// Run the full comparison of `src` (folded) against `reference`
    pub fn run(&self, src: &Path, reference: &Path, source_layout_id: &str) -> DownmixQaReport {
        let config = &self.config;
        let mut run = Run {
            src_path: src.display().to_string(),
            ref_path: reference.display().to_string(),
            source_layout_id,
            target_layout_id: &config.target_layout_id,
            decode_backend: self.decoder.tag(),
            config,
            stage: QaStage::Init,
            policy_id: config.policy_id.clone(),
            matrix_id: None,
            src_channels: None,
            ref_channels: None,
            sample_rate_hz: None,
            seconds_available: 0.0,
            seconds_compared: 0.0,
            remainder_samples_dropped: 0,
            issues: Vec::new(),
            measurements: Vec::new(),
        };

        run.advance(QaStage::ToolchainCheck);
        if let Some(tool) = self.decoder.missing_decoder() {
            run.missing_tool(tool);
            return run.finish();
        }

        run.advance(QaStage::MatrixResolved);
        let matrix = match self.resolve(source_layout_id) {
            Ok((matrix, policy_id)) => {
                run.matrix_id = Some(matrix.matrix_id.clone());
                run.policy_id = policy_id;
                matrix
            }
            Err(e) => {
                let mut evidence = run.path_evidence();
                evidence.push(Evidence::text(ids::EVID_SOURCE_LAYOUT_ID, source_layout_id));
                evidence.push(Evidence::text(ids::EVID_TARGET_LAYOUT_ID, &config.target_layout_id));
                if let Some(policy_id) = &config.policy_id {
                    evidence.push(Evidence::text(ids::EVID_POLICY_ID, policy_id));
                }
                run.fatal(ids::ISSUE_MATRIX_UNRESOLVED, e.to_string(), evidence);
                return run.finish();
            }
        };

        if let Some(tool) = self.decoder.missing_metadata_reader(&[src, reference]) {
            run.missing_tool(tool);
            return run.finish();
        }

        let metadata = self
            .decoder
            .read_metadata(src)
            .and_then(|s| Ok((s, self.decoder.read_metadata(reference)?)));
        let (src_meta, ref_meta) = match metadata {
            Ok(pair) => pair,
            Err(e) => {
                let evidence = run.file_evidence();
                run.fatal(
                    ids::ISSUE_DECODE_FAILED,
                    format!("Metadata decode failed for downmix QA: {e}"),
                    evidence,
                );
                return run.finish();
            }
        };

        run.src_channels = Some(src_meta.channels);
        run.ref_channels = Some(ref_meta.channels);
        run.seconds_available = src_meta.duration_s.min(ref_meta.duration_s);
        run.seconds_compared = if config.max_seconds <= 0.0 {
            run.seconds_available
        } else {
            run.seconds_available.min(config.max_seconds)
        };

        if let Some((issue_id, message, evidence)) = validate(&src_meta, &ref_meta, &matrix) {
            let mut all = run.path_evidence();
            all.push(evidence);
            run.fatal(issue_id, message, all);
            return run.finish();
        }
        run.advance(QaStage::MetadataValidated);

        let sample_rate = src_meta.sample_rate_hz;
        run.sample_rate_hz = Some(sample_rate);
        let max_frames = (run.seconds_compared * f64::from(sample_rate)).floor().max(0.0) as usize;
        log::debug!(
            "comparing {:.3}s ({max_frames} frames at {sample_rate} Hz) through {}",
            run.seconds_compared,
            matrix.matrix_id
        );

        run.advance(QaStage::Decoding);
        let mut remainder = 0;
        let readings = self.measure_pair(
            src,
            reference,
            &matrix,
            src_meta.channels,
            max_frames,
            sample_rate,
            &mut remainder,
        );
        run.remainder_samples_dropped = remainder;

        let (fold, reference_reading) = match readings {
            Ok(pair) => pair,
            Err(e) => {
                let evidence = run.path_evidence();
                run.fatal(
                    ids::ISSUE_DECODE_FAILED,
                    format!("Downmix QA decode failed: {e}"),
                    evidence,
                );
                return run.finish();
            }
        };
        run.advance(QaStage::MetricsComputed);

        compare_readings(&mut run, config.meters, &fold, &reference_reading);
        run.advance(QaStage::Compared);

        run.finish()
    }

    /// Fold + meter the source, then meter the reference
    ///
    /// `remainder` receives the source aligner's dropped-sample count even
    /// when measurement fails part way.
    #[allow(clippy::too_many_arguments)]
    fn measure_pair(
        &self,
        src: &Path,
        reference: &Path,
        matrix: &DownmixMatrix,
        src_channels: usize,
        max_frames: usize,
        sample_rate: u32,
        remainder: &mut usize,
    ) -> Result<(MeterReading, MeterReading), MeasureError> {
        let chunk_frames = self.config.chunk_frames.max(1);
        let meters = self.config.meters;

        let src_chunks = self.decoder.decode_f64(src, chunk_frames)?;
        let aligned = StreamAligner::new(src_chunks, src_channels, chunk_frames, Some(max_frames));
        let mut folded = Fold::new(
            aligned,
            matrix.coeffs.clone(),
            src_channels,
            matrix.target_channels(),
            chunk_frames,
        )?;
        let fold_reading = measure(
            meters.meter(sample_rate),
            folded.by_ref().map(|block| block.map_err(MeasureError::from)),
        );
        *remainder = folded.get_ref().stats().remainder_samples_dropped;
        let fold_reading = fold_reading?;

        let ref_chunks = self.decoder.decode_f64(reference, chunk_frames)?;
        let ref_aligned = StreamAligner::new(ref_chunks, REFERENCE_CHANNELS, chunk_frames, Some(max_frames));
        let ref_reading = measure(
            meters.meter(sample_rate),
            ref_aligned.map(|block| block.map_err(MeasureError::from)),
        )?;

        Ok((fold_reading, ref_reading))
    }
}

/// First failed input check, if any
fn validate(
    src: &AudioStreamDescriptor,
    reference: &AudioStreamDescriptor,
    matrix: &DownmixMatrix,
) -> Option<(&'static str, String, Evidence)> {
    if reference.channels != REFERENCE_CHANNELS {
        return Some((
            ids::ISSUE_CHANNELS_INVALID,
            format!("Reference must be stereo; got {} channels.", reference.channels),
            Evidence::int(ids::EVID_CHANNEL_COUNT, reference.channels as i64, ids::UNIT_COUNT),
        ));
    }

    let expected = matrix.source_channels();
    if expected > 0 && src.channels != expected {
        return Some((
            ids::ISSUE_CHANNELS_INVALID,
            format!("Source channels ({}) do not match matrix ({expected}).", src.channels),
            Evidence::int(ids::EVID_CHANNEL_COUNT, src.channels as i64, ids::UNIT_COUNT),
        ));
    }

    if matrix.target_channels() != REFERENCE_CHANNELS {
        return Some((
            ids::ISSUE_CHANNELS_INVALID,
            format!(
                "Folded target must be stereo; matrix {} yields {} channels.",
                matrix.matrix_id,
                matrix.target_channels()
            ),
            Evidence::int(ids::EVID_CHANNEL_COUNT, matrix.target_channels() as i64, ids::UNIT_COUNT),
        ));
    }

    if src.sample_rate_hz != reference.sample_rate_hz {
        return Some((
            ids::ISSUE_SAMPLE_RATE_MISMATCH,
            format!(
                "Source and reference sample rates do not match; src={} Hz, ref={} Hz.",
                src.sample_rate_hz, reference.sample_rate_hz
            ),
            Evidence::int(ids::EVID_SAMPLE_RATE_HZ, i64::from(src.sample_rate_hz), ids::UNIT_HZ),
        ));
    }

    None
}

fn compare_readings(run: &mut Run<'_>, meters: MeterPack, fold: &MeterReading, reference: &MeterReading) {
    let tolerances = run.config.tolerances;

    if meters == MeterPack::Truth {
        let lufs = run.record(
            ids::EVID_LUFS_FOLD,
            ids::EVID_LUFS_REF,
            ids::EVID_LUFS_DELTA,
            ids::UNIT_LUFS,
            fold.lufs.unwrap_or(f64::NEG_INFINITY),
            reference.lufs.unwrap_or(f64::NEG_INFINITY),
        );
        let true_peak = run.record(
            ids::EVID_TRUE_PEAK_FOLD,
            ids::EVID_TRUE_PEAK_REF,
            ids::EVID_TRUE_PEAK_DELTA,
            ids::UNIT_DBTP,
            fold.true_peak_dbtp.unwrap_or(f64::NEG_INFINITY),
            reference.true_peak_dbtp.unwrap_or(f64::NEG_INFINITY),
        );
        let correlation = run.record(
            ids::EVID_CORR_FOLD,
            ids::EVID_CORR_REF,
            ids::EVID_CORR_DELTA,
            ids::UNIT_CORRELATION,
            fold.correlation,
            reference.correlation,
        );

        run.compare(lufs, tolerances.lufs, ids::ISSUE_LUFS_MISMATCH, "LUFS");
        run.compare(true_peak, tolerances.true_peak_db, ids::ISSUE_TRUE_PEAK_MISMATCH, "true peak");
        run.compare(correlation, tolerances.correlation, ids::ISSUE_CORRELATION_MISMATCH, "correlation");
    } else {
        let correlation = run.record(
            ids::EVID_CORR_FOLD,
            ids::EVID_CORR_REF,
            ids::EVID_CORR_DELTA,
            ids::UNIT_CORRELATION,
            fold.correlation,
            reference.correlation,
        );
        run.compare(correlation, tolerances.correlation, ids::ISSUE_CORRELATION_MISMATCH, "correlation");
    }
}

/// One-shot QA run with the decoder and ontology named in `config`
pub fn run_downmix_qa(src: &Path, reference: &Path, source_layout_id: &str, config: &QaConfig) -> DownmixQaReport {
    DownmixQaEngine::new(config.clone()).run(src, reference, source_layout_id)
}
