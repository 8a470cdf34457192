//! # mmo-qa
//!
//! Downmix-fold QA: folds a multichannel render to stereo through a policy
//! matrix and compares it against a stereo reference render.
//!
//! ## Features
//!
//! - **Decode backends**: native (hound/symphonia) or external `ffmpeg`/`ffprobe`
//! - **Streaming pipeline**: decode -> align -> fold -> meter, bounded chunks
//! - **Meter packs**: `truth` (LUFS, true peak, correlation) or `basic`
//! - **Reports**: evidence-based issues and measurements as JSON, CSV or text
//!
//! ## Example
//!
//! ```rust,ignore
//! use mmo_qa::{run_downmix_qa, QaConfig};
//! use std::path::Path;
//!
//! let config = QaConfig::default();
//! let report = run_downmix_qa(Path::new("mix_5_1.wav"), Path::new("mix_2_0.wav"), "LAYOUT.5_1", &config);
//!
//! if report.has_blocking_issues() {
//!     eprintln!("{}", report.to_text());
//! }
//! ```

pub mod align;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod meters;
pub mod metadata;
pub mod report;
pub mod wav;

pub use align::{AlignStats, StreamAligner};
pub use config::{QaConfig, Tolerances};
pub use decode::{DecodeBackend, DecoderKind, FfmpegBackend, MissingTool, NativeBackend};
pub use engine::{run_downmix_qa, DownmixQaEngine, QaStage};
pub use error::{DecodeError, DecodeResult, MeasureError, QaError, QaResult};
pub use meters::{measure, MeterBackend, MeterPack, MeterReading};
pub use metadata::{AudioStreamDescriptor, ContainerFormat};
pub use report::{ids, DownmixQaReport, Evidence, EvidenceValue, QaIssue, ReportFormat};
