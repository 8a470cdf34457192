//! Downmix policy registry (`policies/downmix.yaml`) and policy packs
//!
//! The registry names the policies, the default policy per source layout,
//! direct conversions, and multi-step composition paths. Each policy points
//! at a pack file holding the actual coefficient maps.

use crate::error::{DownmixError, DownmixResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry entry for one policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Pack path, relative to the `policies/` directory
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Direct layout-to-layout conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionEntry {
    pub source_layout_id: String,
    pub target_layout_id: String,
    #[serde(default)]
    pub policy_id: Option<String>,
    pub matrix_id: String,
}

/// One matrix inside a composition path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionStep {
    pub matrix_id: String,
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub source_layout_id: Option<String>,
    #[serde(default)]
    pub target_layout_id: Option<String>,
}

/// Conversion built by chaining matrices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionPath {
    pub source_layout_id: String,
    pub target_layout_id: String,
    #[serde(default)]
    pub steps: Vec<CompositionStep>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    downmix: DownmixRegistry,
}

/// Parsed `downmix:` mapping
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownmixRegistry {
    #[serde(rename = "_meta", default)]
    meta: Option<serde_yml::Value>,
    policies: BTreeMap<String, PolicyEntry>,
    #[serde(default)]
    default_policy_by_source_layout: BTreeMap<String, String>,
    #[serde(default)]
    conversions: Vec<ConversionEntry>,
    #[serde(default)]
    composition_paths: Vec<CompositionPath>,
}

impl DownmixRegistry {
    pub fn from_yaml(text: &str, origin: &str) -> DownmixResult<Self> {
        let file: RegistryFile = serde_yml::from_str(text).map_err(|error| DownmixError::Yaml {
            path: origin.to_string(),
            error,
        })?;
        Ok(file.downmix)
    }

    pub fn meta(&self) -> Option<&serde_yml::Value> {
        self.meta.as_ref()
    }

    /// Policy ids in sorted order
    pub fn list_policy_ids(&self) -> Vec<String> {
        self.policies.keys().cloned().collect()
    }

    pub fn get_policy(&self, policy_id: &str) -> DownmixResult<&PolicyEntry> {
        self.policies
            .get(policy_id.trim())
            .ok_or_else(|| DownmixError::UnknownPolicy(policy_id.trim().to_string()))
    }

    pub fn default_policy_for_source(&self, source_layout_id: &str) -> Option<&str> {
        self.default_policy_by_source_layout
            .get(source_layout_id)
            .map(String::as_str)
    }

    pub fn conversions(&self) -> &[ConversionEntry] {
        &self.conversions
    }

    pub fn composition_paths(&self) -> &[CompositionPath] {
        &self.composition_paths
    }

    /// First direct conversion for the pair whose policy is unset or matches
    pub fn find_direct(&self, source: &str, target: &str, policy_id: &str) -> Option<&ConversionEntry> {
        self.conversions.iter().find(|entry| {
            entry.source_layout_id == source
                && entry.target_layout_id == target
                && entry
                    .policy_id
                    .as_deref()
                    .is_none_or(|p| p.is_empty() || p == policy_id)
        })
    }

    /// First composition path for the pair
    pub fn find_composition(&self, source: &str, target: &str) -> Option<&CompositionPath> {
        self.composition_paths
            .iter()
            .find(|path| path.source_layout_id == source && path.target_layout_id == target)
    }

    /// Every registered conversion, direct entries first, as display rows
    pub fn list_conversions(&self) -> Vec<ConversionSummary> {
        let direct = self.conversions.iter().map(|entry| ConversionSummary {
            source_layout_id: entry.source_layout_id.clone(),
            target_layout_id: entry.target_layout_id.clone(),
            policy_id: entry.policy_id.clone(),
            route: ConversionRoute::Direct {
                matrix_id: entry.matrix_id.clone(),
            },
        });
        let composed = self.composition_paths.iter().map(|path| ConversionSummary {
            source_layout_id: path.source_layout_id.clone(),
            target_layout_id: path.target_layout_id.clone(),
            policy_id: None,
            route: ConversionRoute::Composed {
                steps: path.steps.iter().map(|s| s.matrix_id.clone()).collect(),
            },
        });

        let mut rows: Vec<ConversionSummary> = direct.chain(composed).collect();
        rows.sort_by(|a, b| {
            (&a.source_layout_id, &a.target_layout_id, a.route.rank())
                .cmp(&(&b.source_layout_id, &b.target_layout_id, b.route.rank()))
        });
        rows
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// How a conversion is realised
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionRoute {
    Direct { matrix_id: String },
    Composed { steps: Vec<String> },
}

impl ConversionRoute {
    fn rank(&self) -> u8 {
        match self {
            ConversionRoute::Direct { .. } => 0,
            ConversionRoute::Composed { .. } => 1,
        }
    }
}

/// Row of `list_conversions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionSummary {
    pub source_layout_id: String,
    pub target_layout_id: String,
    pub policy_id: Option<String>,
    #[serde(flatten)]
    pub route: ConversionRoute,
}

// ═══════════════════════════════════════════════════════════════════════════════
// POLICY PACKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Matrix definition as written in a pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixDefinition {
    pub source_layout_id: String,
    pub target_layout_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// target speaker -> source speaker -> gain; missing entries are 0.0
    #[serde(default)]
    pub coefficients: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Deserialize)]
struct PackFile {
    downmix_policy_pack: PolicyPack,
}

/// Parsed policy pack
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyPack {
    pub policy_id: String,
    #[serde(default)]
    pub version: Option<serde_yml::Value>,
    #[serde(default)]
    pub matrices: BTreeMap<String, MatrixDefinition>,
}

impl PolicyPack {
    /// Parse a pack and check it declares `expected_policy`
    pub fn from_yaml(text: &str, origin: &str, expected_policy: &str) -> DownmixResult<Self> {
        let file: PackFile = serde_yml::from_str(text).map_err(|error| DownmixError::Yaml {
            path: origin.to_string(),
            error,
        })?;
        let pack = file.downmix_policy_pack;
        if pack.policy_id != expected_policy {
            return Err(DownmixError::PolicyMismatch {
                path: origin.to_string(),
                found: pack.policy_id,
                expected: expected_policy.to_string(),
            });
        }
        Ok(pack)
    }

    pub fn matrix(&self, matrix_id: &str) -> DownmixResult<&MatrixDefinition> {
        self.matrices
            .get(matrix_id)
            .ok_or_else(|| DownmixError::MatrixNotFound(matrix_id.to_string()))
    }

    pub fn contains(&self, matrix_id: &str) -> bool {
        self.matrices.contains_key(matrix_id)
    }

    /// Matrix ids in sorted order
    pub fn matrix_ids(&self) -> impl Iterator<Item = &str> {
        self.matrices.keys().map(String::as_str)
    }
}
