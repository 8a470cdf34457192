//! Ontology loading
//!
//! The built-in ontology is compiled into the crate. A directory with the same
//! shape (`layouts.yaml`, `policies/downmix.yaml`, `policies/<pack files>`)
//! can replace it at runtime.

use crate::error::{DownmixError, DownmixResult};
use crate::layout::LayoutRegistry;
use crate::registry::{DownmixRegistry, PolicyPack};
use std::path::{Path, PathBuf};

const BUILTIN_LAYOUTS: &str = include_str!("../ontology/layouts.yaml");
const BUILTIN_REGISTRY: &str = include_str!("../ontology/policies/downmix.yaml");
const BUILTIN_PACKS: &[(&str, &str)] = &[
    (
        "downmix/standard_foldown_v0.yaml",
        include_str!("../ontology/policies/downmix/standard_foldown_v0.yaml"),
    ),
    (
        "downmix/immersive_foldown_v0.yaml",
        include_str!("../ontology/policies/downmix/immersive_foldown_v0.yaml"),
    ),
];

/// Where ontology files come from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OntologySource {
    #[default]
    Builtin,
    Directory(PathBuf),
}

impl OntologySource {
    /// Read a file relative to the ontology root
    fn read(&self, relative: &str) -> DownmixResult<(String, String)> {
        match self {
            OntologySource::Builtin => {
                let text = match relative {
                    "layouts.yaml" => Some(BUILTIN_LAYOUTS),
                    "policies/downmix.yaml" => Some(BUILTIN_REGISTRY),
                    other => other
                        .strip_prefix("policies/")
                        .and_then(|pack| BUILTIN_PACKS.iter().find(|(name, _)| *name == pack))
                        .map(|(_, text)| *text),
                };
                let origin = format!("builtin:{relative}");
                text.map(|t| (t.to_string(), origin))
                    .ok_or_else(|| DownmixError::Read {
                        path: PathBuf::from(relative),
                        error: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "not part of the built-in ontology",
                        ),
                    })
            }
            OntologySource::Directory(root) => {
                let path = root.join(relative);
                let text = std::fs::read_to_string(&path).map_err(|error| DownmixError::Read {
                    path: path.clone(),
                    error,
                })?;
                Ok((text, path.display().to_string()))
            }
        }
    }
}

/// Layouts plus the downmix registry, with lazy policy-pack loading
#[derive(Debug, Clone)]
pub struct Ontology {
    source: OntologySource,
    layouts: LayoutRegistry,
    registry: DownmixRegistry,
}

impl Ontology {
    pub fn load(source: OntologySource) -> DownmixResult<Self> {
        let (layouts_text, layouts_origin) = source.read("layouts.yaml")?;
        let layouts = LayoutRegistry::from_yaml(&layouts_text, &layouts_origin)?;

        let (registry_text, registry_origin) = source.read("policies/downmix.yaml")?;
        let registry = DownmixRegistry::from_yaml(&registry_text, &registry_origin)?;

        log::debug!(
            "ontology loaded from {:?}: {} layouts, {} policies",
            source,
            layouts.len(),
            registry.len()
        );

        Ok(Self {
            source,
            layouts,
            registry,
        })
    }

    pub fn builtin() -> DownmixResult<Self> {
        Self::load(OntologySource::Builtin)
    }

    pub fn from_dir(root: impl AsRef<Path>) -> DownmixResult<Self> {
        Self::load(OntologySource::Directory(root.as_ref().to_path_buf()))
    }

    pub fn source(&self) -> &OntologySource {
        &self.source
    }

    pub fn layouts(&self) -> &LayoutRegistry {
        &self.layouts
    }

    pub fn registry(&self) -> &DownmixRegistry {
        &self.registry
    }

    /// Load and check the pack for a policy
    pub fn load_policy_pack(&self, policy_id: &str) -> DownmixResult<PolicyPack> {
        let entry = self.registry.get_policy(policy_id)?;
        let file = entry
            .file
            .as_deref()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| DownmixError::MissingPolicyFile(policy_id.to_string()))?;

        let (text, origin) = self.source.read(&format!("policies/{file}"))?;
        PolicyPack::from_yaml(&text, &origin, policy_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_builtin_loads_everything() {
        let ontology = Ontology::builtin().unwrap();
        assert_eq!(ontology.layouts().len(), 6);
        assert_eq!(ontology.layouts().get("LAYOUT.7_1_4").unwrap().channel_count(), 12);
        for policy_id in ontology.registry().list_policy_ids() {
            let pack = ontology.load_policy_pack(&policy_id).unwrap();
            assert_eq!(pack.policy_id, policy_id);
            assert!(pack.matrix_ids().count() > 0);
        }
    }

    #[test]
    fn test_unknown_policy() {
        let ontology = Ontology::builtin().unwrap();
        let err = ontology.load_policy_pack("POLICY.DOWNMIX.NOPE").unwrap_err();
        assert_eq!(err.to_string(), "Unknown policy_id: POLICY.DOWNMIX.NOPE");
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("policies/packs")).unwrap();
        fs::write(
            root.join("layouts.yaml"),
            "layouts:\n  LAYOUT.2_0:\n    channel_order: [SPK.L, SPK.R]\n  LAYOUT.1_0:\n    channel_order: [SPK.C]\n",
        )
        .unwrap();
        fs::write(
            root.join("policies/downmix.yaml"),
            "downmix:\n  policies:\n    POLICY.MONO:\n      file: packs/mono.yaml\n    POLICY.BROKEN: {}\n",
        )
        .unwrap();
        fs::write(
            root.join("policies/packs/mono.yaml"),
            "downmix_policy_pack:\n  policy_id: POLICY.MONO\n  matrices: {}\n",
        )
        .unwrap();

        let ontology = Ontology::from_dir(root).unwrap();
        assert_eq!(ontology.layouts().len(), 2);
        assert!(ontology.load_policy_pack("POLICY.MONO").is_ok());
        assert_eq!(
            ontology.load_policy_pack("POLICY.BROKEN").unwrap_err().to_string(),
            "Policy POLICY.BROKEN missing file path"
        );
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Ontology::from_dir(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, DownmixError::Read { .. }));
    }
}
