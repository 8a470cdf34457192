//! Matrix resolution for a source/target layout pair

use crate::error::{DownmixError, DownmixResult};
use crate::matrix::{build_matrix, compose_matrices, DownmixMatrix};
use crate::ontology::{Ontology, OntologySource};
use crate::registry::PolicyPack;
use std::collections::BTreeMap;

/// Suffix marking a direct conversion that should be built by composition
const COMPOSED_SUFFIX: &str = ".COMPOSED";

/// Resolves layout pairs to dense matrices against one ontology
#[derive(Debug, Clone)]
pub struct DownmixMatrixService {
    ontology: Ontology,
}

impl DownmixMatrixService {
    pub fn new(ontology: Ontology) -> Self {
        Self { ontology }
    }

    pub fn builtin() -> DownmixResult<Self> {
        Ok(Self::new(Ontology::builtin()?))
    }

    pub fn from_source(source: OntologySource) -> DownmixResult<Self> {
        Ok(Self::new(Ontology::load(source)?))
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    /// Policy used when the caller gives none
    pub fn effective_policy(&self, source_layout_id: &str, policy_id: Option<&str>) -> DownmixResult<String> {
        policy_id
            .filter(|p| !p.is_empty())
            .or_else(|| self.ontology.registry().default_policy_for_source(source_layout_id))
            .map(str::to_string)
            .ok_or_else(|| DownmixError::NoDefaultPolicy(source_layout_id.to_string()))
    }

    /// Build one matrix from one policy's pack
    pub fn build(&self, policy_id: &str, matrix_id: &str) -> DownmixResult<DownmixMatrix> {
        let pack = self.ontology.load_policy_pack(policy_id)?;
        build_matrix(self.ontology.layouts(), matrix_id, pack.matrix(matrix_id)?)
    }

    /// Resolve `source -> target` under a policy (or the source's default)
    ///
    /// A direct conversion wins unless its matrix id ends in `.COMPOSED` and a
    /// composition path exists. Composed results get the id
    /// `DMX.COMPOSED.{source}_TO_{target}` and list their steps.
    pub fn resolve_matrix(
        &self,
        source_layout_id: &str,
        target_layout_id: &str,
        policy_id: Option<&str>,
    ) -> DownmixResult<DownmixMatrix> {
        let policy_id = self.effective_policy(source_layout_id, policy_id)?;
        let registry = self.ontology.registry();

        let direct = registry.find_direct(source_layout_id, target_layout_id, &policy_id);
        let composition = registry.find_composition(source_layout_id, target_layout_id);

        let prefer_composition = composition.is_some()
            && direct.is_some_and(|entry| entry.matrix_id.ends_with(COMPOSED_SUFFIX));

        if let Some(entry) = direct.filter(|_| !prefer_composition) {
            let entry_policy = entry
                .policy_id
                .as_deref()
                .filter(|p| !p.is_empty())
                .unwrap_or(&policy_id);
            log::debug!(
                "direct conversion {source_layout_id} -> {target_layout_id}: {} ({entry_policy})",
                entry.matrix_id
            );
            return self.build(entry_policy, &entry.matrix_id);
        }

        let Some(path) = composition else {
            return Err(DownmixError::NoConversionPath {
                from: source_layout_id.to_string(),
                to: target_layout_id.to_string(),
            });
        };
        if path.steps.is_empty() {
            return Err(DownmixError::EmptyComposition);
        }

        let mut packs: BTreeMap<String, PolicyPack> = BTreeMap::new();
        let mut composed: Option<DownmixMatrix> = None;
        let mut used_steps = Vec::with_capacity(path.steps.len());

        for step in &path.steps {
            let step_policy = step
                .policy_id
                .as_deref()
                .filter(|p| !p.is_empty())
                .unwrap_or(&policy_id);

            if !packs.contains_key(step_policy) {
                let pack = self.ontology.load_policy_pack(step_policy)?;
                packs.insert(step_policy.to_string(), pack);
            }
            let holder = if packs.get(step_policy).is_some_and(|p| p.contains(&step.matrix_id)) {
                step_policy.to_string()
            } else {
                self.find_pack_for_matrix(&step.matrix_id, &mut packs)?
                    .ok_or_else(|| DownmixError::StepMatrixNotFound(step.matrix_id.clone()))?
            };
            let definition = packs
                .get(&holder)
                .ok_or_else(|| DownmixError::StepMatrixNotFound(step.matrix_id.clone()))?
                .matrix(&step.matrix_id)?;
            let matrix = build_matrix(self.ontology.layouts(), &step.matrix_id, definition)?;

            if step
                .source_layout_id
                .as_deref()
                .is_some_and(|s| !s.is_empty() && s != matrix.source_layout_id)
            {
                return Err(DownmixError::StepLayoutMismatch {
                    matrix_id: step.matrix_id.clone(),
                    side: "source",
                });
            }
            if step
                .target_layout_id
                .as_deref()
                .is_some_and(|t| !t.is_empty() && t != matrix.target_layout_id)
            {
                return Err(DownmixError::StepLayoutMismatch {
                    matrix_id: step.matrix_id.clone(),
                    side: "target",
                });
            }

            composed = Some(match composed {
                None => matrix,
                Some(previous) => compose_matrices(&previous, &matrix)?,
            });
            used_steps.push(step.matrix_id.clone());
        }

        let composed = composed.ok_or(DownmixError::EmptyComposition)?;
        log::debug!(
            "composed conversion {source_layout_id} -> {target_layout_id} via {}",
            used_steps.join(" > ")
        );

        Ok(DownmixMatrix {
            matrix_id: format!("DMX.COMPOSED.{source_layout_id}_TO_{target_layout_id}"),
            source_layout_id: source_layout_id.to_string(),
            target_layout_id: target_layout_id.to_string(),
            steps: Some(used_steps),
            ..composed
        })
    }

    /// First policy, in sorted id order, whose pack holds `matrix_id`
    pub fn policy_for_matrix(&self, matrix_id: &str) -> DownmixResult<Option<String>> {
        let mut packs = BTreeMap::new();
        self.find_pack_for_matrix(matrix_id, &mut packs)
    }

    fn find_pack_for_matrix(
        &self,
        matrix_id: &str,
        cache: &mut BTreeMap<String, PolicyPack>,
    ) -> DownmixResult<Option<String>> {
        for policy_id in self.ontology.registry().list_policy_ids() {
            if !cache.contains_key(&policy_id) {
                let pack = self.ontology.load_policy_pack(&policy_id)?;
                cache.insert(policy_id.clone(), pack);
            }
            if cache.get(&policy_id).is_some_and(|p| p.contains(matrix_id)) {
                return Ok(Some(policy_id));
            }
        }
        Ok(None)
    }
}
