//! mmo-downmix: layouts, downmix policies and fold-down
//!
//! ## Modules
//! - `layout` - layout ids and their speaker channel order
//! - `registry` - policy registry, conversions, composition paths, policy packs
//! - `ontology` - built-in or on-disk ontology loading
//! - `matrix` - dense matrices: build, compose, render (JSON/CSV)
//! - `service` - `DownmixMatrixService`, layout pair -> matrix resolution
//! - `fold` - streaming matrix application over decoded chunks
//!
//! ## Example
//! ```no_run
//! use mmo_downmix::DownmixMatrixService;
//!
//! let service = DownmixMatrixService::builtin()?;
//! let matrix = service.resolve_matrix("LAYOUT.5_1", "LAYOUT.2_0", None)?;
//! assert_eq!(matrix.target_channels(), 2);
//! # Ok::<(), mmo_downmix::DownmixError>(())
//! ```

pub mod error;
pub mod fold;
pub mod layout;
pub mod matrix;
pub mod ontology;
pub mod registry;
pub mod service;

pub use error::{DownmixError, DownmixResult};
pub use fold::{fold, Fold};
pub use layout::{Layout, LayoutRegistry, STEREO_LAYOUT_ID};
pub use matrix::{
    build_matrix, compose_matrices, format_coeff_rows, format_matrix_csv, render_matrix,
    DownmixMatrix, MatrixFormat,
};
pub use ontology::{Ontology, OntologySource};
pub use registry::{
    CompositionPath, CompositionStep, ConversionEntry, ConversionRoute, ConversionSummary,
    DownmixRegistry, MatrixDefinition, PolicyPack,
};
pub use service::DownmixMatrixService;
