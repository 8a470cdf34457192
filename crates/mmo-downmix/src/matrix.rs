//! Dense downmix matrices
//!
//! - `build_matrix` - expand a pack definition against the layout channel orders
//! - `compose_matrices` - chain two matrices (`B · A`)
//! - `render_matrix` - pretty JSON (sorted keys) or CSV

use crate::error::{DownmixError, DownmixResult};
use crate::layout::LayoutRegistry;
use crate::registry::MatrixDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Entries below this magnitude are zeroed after composition
const COMPOSE_EPSILON: f64 = 1e-12;

/// Gain matrix, rows in target order, columns in source order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownmixMatrix {
    pub matrix_id: String,
    pub source_layout_id: String,
    pub target_layout_id: String,
    pub source_speakers: Vec<String>,
    pub target_speakers: Vec<String>,
    pub coeffs: Vec<Vec<f64>>,
    /// Matrix ids chained to produce a composed matrix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
}

impl DownmixMatrix {
    pub fn source_channels(&self) -> usize {
        self.source_speakers.len()
    }

    pub fn target_channels(&self) -> usize {
        self.target_speakers.len()
    }

    pub fn is_composed(&self) -> bool {
        self.steps.is_some()
    }

    /// Check that `coeffs` is `target x source`
    pub fn validate_shape(&self) -> DownmixResult<()> {
        if self.coeffs.len() != self.target_speakers.len() {
            return Err(DownmixError::InvalidMatrix(
                "Matrix coeff row count does not match target speakers".into(),
            ));
        }
        if self.coeffs.iter().any(|row| row.len() != self.source_speakers.len()) {
            return Err(DownmixError::InvalidMatrix(
                "Matrix coeff row width does not match source speakers".into(),
            ));
        }
        Ok(())
    }

    /// Gain from `source` speaker into `target` speaker
    pub fn gain(&self, target: &str, source: &str) -> Option<f64> {
        let t = self.target_speakers.iter().position(|s| s == target)?;
        let s = self.source_speakers.iter().position(|s| s == source)?;
        self.coeffs.get(t)?.get(s).copied()
    }
}

/// Expand a pack definition into a dense matrix
pub fn build_matrix(
    layouts: &LayoutRegistry,
    matrix_id: &str,
    definition: &MatrixDefinition,
) -> DownmixResult<DownmixMatrix> {
    let source = layouts
        .get(&definition.source_layout_id)
        .ok_or_else(|| DownmixError::UnknownSourceLayout(definition.source_layout_id.clone()))?;
    let target = layouts
        .get(&definition.target_layout_id)
        .ok_or_else(|| DownmixError::UnknownTargetLayout(definition.target_layout_id.clone()))?;

    let source_set: BTreeSet<&str> = source.channel_order.iter().map(String::as_str).collect();
    let target_set: BTreeSet<&str> = target.channel_order.iter().map(String::as_str).collect();

    for (target_speaker, source_map) in &definition.coefficients {
        if !target_set.contains(target_speaker.as_str()) {
            return Err(DownmixError::UnknownTargetSpeaker {
                speaker: target_speaker.clone(),
                matrix_id: matrix_id.to_string(),
            });
        }
        if let Some(unknown) = source_map.keys().find(|s| !source_set.contains(s.as_str())) {
            return Err(DownmixError::UnknownSourceSpeaker {
                speaker: unknown.clone(),
                matrix_id: matrix_id.to_string(),
            });
        }
    }

    let coeffs = target
        .channel_order
        .iter()
        .map(|target_speaker| {
            let row = definition.coefficients.get(target_speaker);
            source
                .channel_order
                .iter()
                .map(|source_speaker| {
                    row.and_then(|r| r.get(source_speaker)).copied().unwrap_or(0.0)
                })
                .collect()
        })
        .collect();

    Ok(DownmixMatrix {
        matrix_id: matrix_id.to_string(),
        source_layout_id: definition.source_layout_id.clone(),
        target_layout_id: definition.target_layout_id.clone(),
        source_speakers: source.channel_order.clone(),
        target_speakers: target.channel_order.clone(),
        coeffs,
        steps: None,
    })
}

/// `B · A`: apply `a` first, then `b`
///
/// The result keeps `a`'s source side and `b`'s target side. Its id joins
/// both ids with `+`; callers naming a composed conversion overwrite it.
pub fn compose_matrices(a: &DownmixMatrix, b: &DownmixMatrix) -> DownmixResult<DownmixMatrix> {
    if a.target_speakers != b.source_speakers {
        return Err(DownmixError::MidSpeakerMismatch);
    }
    if a.source_speakers.is_empty() || b.target_speakers.is_empty() || a.target_speakers.is_empty()
    {
        return Err(DownmixError::EmptySpeakerList);
    }
    a.validate_shape()?;
    b.validate_shape()?;

    let mid_count = a.target_speakers.len();
    let coeffs = b
        .coeffs
        .iter()
        .map(|b_row| {
            (0..a.source_speakers.len())
                .map(|s| {
                    let total: f64 = (0..mid_count).map(|m| b_row[m] * a.coeffs[m][s]).sum();
                    if total.abs() < COMPOSE_EPSILON { 0.0 } else { total }
                })
                .collect()
        })
        .collect();

    Ok(DownmixMatrix {
        matrix_id: format!("{}+{}", a.matrix_id, b.matrix_id),
        source_layout_id: a.source_layout_id.clone(),
        target_layout_id: b.target_layout_id.clone(),
        source_speakers: a.source_speakers.clone(),
        target_speakers: b.target_speakers.clone(),
        coeffs,
        steps: None,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Output format for `render_matrix`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for MatrixFormat {
    type Err = DownmixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(MatrixFormat::Json),
            "csv" => Ok(MatrixFormat::Csv),
            other => Err(DownmixError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for MatrixFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixFormat::Json => f.write_str("json"),
            MatrixFormat::Csv => f.write_str("csv"),
        }
    }
}

/// Coefficients as fixed-point strings
pub fn format_coeff_rows(coeffs: &[Vec<f64>], decimals: usize) -> Vec<Vec<String>> {
    coeffs
        .iter()
        .map(|row| row.iter().map(|v| format!("{v:.decimals$}")).collect())
        .collect()
}

/// `target_speaker,<source...>` header, one row per target speaker
pub fn format_matrix_csv(matrix: &DownmixMatrix, decimals: usize) -> DownmixResult<String> {
    matrix.validate_shape()?;

    let mut out = String::new();
    out.push_str("target_speaker");
    for speaker in &matrix.source_speakers {
        out.push(',');
        out.push_str(speaker);
    }
    out.push('\n');

    for (speaker, row) in matrix
        .target_speakers
        .iter()
        .zip(format_coeff_rows(&matrix.coeffs, decimals))
    {
        out.push_str(speaker);
        for value in row {
            out.push(',');
            out.push_str(&value);
        }
        out.push('\n');
    }
    Ok(out)
}

/// Render a matrix; both formats end with a newline
pub fn render_matrix(matrix: &DownmixMatrix, format: MatrixFormat) -> DownmixResult<String> {
    match format {
        MatrixFormat::Json => {
            // through Value so object keys come out sorted
            let value = serde_json::to_value(matrix)?;
            let mut text = serde_json::to_string_pretty(&value)?;
            text.push('\n');
            Ok(text)
        }
        MatrixFormat::Csv => format_matrix_csv(matrix, 6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const LAYOUTS: &str = r#"
layouts:
  LAYOUT.1_0:
    channel_order: [SPK.C]
  LAYOUT.2_0:
    channel_order: [SPK.L, SPK.R]
  LAYOUT.3_0:
    channel_order: [SPK.L, SPK.R, SPK.C]
"#;

    fn layouts() -> LayoutRegistry {
        LayoutRegistry::from_yaml(LAYOUTS, "layouts.yaml").unwrap()
    }

    fn definition(source: &str, target: &str, entries: &[(&str, &str, f64)]) -> MatrixDefinition {
        let mut coefficients: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for &(t, s, v) in entries {
            coefficients
                .entry(t.to_string())
                .or_default()
                .insert(s.to_string(), v);
        }
        MatrixDefinition {
            source_layout_id: source.into(),
            target_layout_id: target.into(),
            notes: None,
            coefficients,
        }
    }

    #[test]
    fn test_build_fills_zeros_in_layout_order() {
        let def = definition(
            "LAYOUT.3_0",
            "LAYOUT.2_0",
            &[("SPK.L", "SPK.L", 1.0), ("SPK.L", "SPK.C", 0.5), ("SPK.R", "SPK.R", 1.0)],
        );
        let m = build_matrix(&layouts(), "DMX.T", &def).unwrap();
        assert_eq!(m.coeffs, vec![vec![1.0, 0.0, 0.5], vec![0.0, 1.0, 0.0]]);
        assert_eq!(m.source_channels(), 3);
        assert_eq!(m.target_channels(), 2);
        assert_eq!(m.gain("SPK.L", "SPK.C"), Some(0.5));
        assert!(!m.is_composed());
    }

    #[test]
    fn test_build_rejects_unknown_speakers_and_layouts() {
        let bad_target = definition("LAYOUT.3_0", "LAYOUT.2_0", &[("SPK.C", "SPK.L", 1.0)]);
        assert_eq!(
            build_matrix(&layouts(), "DMX.T", &bad_target).unwrap_err().to_string(),
            "Unknown target speaker SPK.C in DMX.T"
        );

        let bad_source = definition("LAYOUT.2_0", "LAYOUT.1_0", &[("SPK.C", "SPK.LFE", 1.0)]);
        assert_eq!(
            build_matrix(&layouts(), "DMX.T", &bad_source).unwrap_err().to_string(),
            "Unknown source speaker SPK.LFE in DMX.T"
        );

        let bad_layout = definition("LAYOUT.9_9", "LAYOUT.2_0", &[]);
        assert_eq!(
            build_matrix(&layouts(), "DMX.T", &bad_layout).unwrap_err().to_string(),
            "Unknown source layout: LAYOUT.9_9"
        );
    }

    #[test]
    fn test_compose() {
        let lay = layouts();
        let a = build_matrix(
            &lay,
            "A",
            &definition(
                "LAYOUT.3_0",
                "LAYOUT.2_0",
                &[("SPK.L", "SPK.L", 1.0), ("SPK.L", "SPK.C", 0.5), ("SPK.R", "SPK.R", 1.0), ("SPK.R", "SPK.C", 0.5)],
            ),
        )
        .unwrap();
        let b = build_matrix(
            &lay,
            "B",
            &definition("LAYOUT.2_0", "LAYOUT.1_0", &[("SPK.C", "SPK.L", 0.5), ("SPK.C", "SPK.R", 0.5)]),
        )
        .unwrap();

        let c = compose_matrices(&a, &b).unwrap();
        assert_eq!(c.coeffs, vec![vec![0.5, 0.5, 0.5]]);
        assert_eq!(c.source_layout_id, "LAYOUT.3_0");
        assert_eq!(c.target_layout_id, "LAYOUT.1_0");

        assert_eq!(
            compose_matrices(&b, &a).unwrap_err().to_string(),
            "Matrix composition requires matching mid speaker order"
        );
    }

    #[test]
    fn test_compose_zeroes_tiny_values() {
        let a = DownmixMatrix {
            matrix_id: "A".into(),
            source_layout_id: "S".into(),
            target_layout_id: "M".into(),
            source_speakers: vec!["X".into()],
            target_speakers: vec!["Y".into()],
            coeffs: vec![vec![1e-7]],
            steps: None,
        };
        let b = DownmixMatrix {
            matrix_id: "B".into(),
            source_layout_id: "M".into(),
            target_layout_id: "T".into(),
            source_speakers: vec!["Y".into()],
            target_speakers: vec!["Z".into()],
            coeffs: vec![vec![1e-7]],
            steps: None,
        };
        assert_eq!(compose_matrices(&a, &b).unwrap().coeffs, vec![vec![0.0]]);
    }

    #[test]
    fn test_csv_render() {
        let def = definition("LAYOUT.2_0", "LAYOUT.1_0", &[("SPK.C", "SPK.L", 0.7071), ("SPK.C", "SPK.R", 0.7071)]);
        let m = build_matrix(&layouts(), "DMX.M", &def).unwrap();
        let csv = render_matrix(&m, MatrixFormat::Csv).unwrap();
        assert_eq!(csv, "target_speaker,SPK.L,SPK.R\nSPK.C,0.707100,0.707100\n");
    }

    #[test]
    fn test_json_render_sorted_and_terminated() {
        let def = definition("LAYOUT.2_0", "LAYOUT.1_0", &[("SPK.C", "SPK.L", 1.0)]);
        let m = build_matrix(&layouts(), "DMX.M", &def).unwrap();
        let json = render_matrix(&m, MatrixFormat::Json).unwrap();
        assert!(json.ends_with("}\n"));
        let coeffs_at = json.find("\"coeffs\"").unwrap();
        let matrix_id_at = json.find("\"matrix_id\"").unwrap();
        let target_at = json.find("\"target_speakers\"").unwrap();
        assert!(coeffs_at < matrix_id_at && matrix_id_at < target_at);
        assert!(!json.contains("\"steps\""));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("csv".parse::<MatrixFormat>().unwrap(), MatrixFormat::Csv);
        assert_eq!(
            "xml".parse::<MatrixFormat>().unwrap_err().to_string(),
            "Unsupported output format: xml"
        );
    }

    #[test]
    fn test_csv_rejects_bad_shape() {
        let m = DownmixMatrix {
            matrix_id: "X".into(),
            source_layout_id: "S".into(),
            target_layout_id: "T".into(),
            source_speakers: vec!["A".into(), "B".into()],
            target_speakers: vec!["C".into()],
            coeffs: vec![vec![1.0]],
            steps: None,
        };
        assert!(format_matrix_csv(&m, 6).is_err());
    }
}
