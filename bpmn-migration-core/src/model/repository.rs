use super::build::{build_model, checksum_of, ModelError};
use super::dto::ProcessDefinitionDto;
use super::ProcessModel;
use crate::keys::KeyGenerator;
use crate::types::Key;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Resolves deployed process models. Shared read-only by all partitions.
pub trait ProcessModelProvider: Send + Sync {
    fn model_by_key(&self, process_definition_key: Key) -> Option<Arc<ProcessModel>>;
    fn latest_by_id(&self, bpmn_process_id: &str) -> Option<Arc<ProcessModel>>;
    fn model_by_version(&self, bpmn_process_id: &str, version: u32) -> Option<Arc<ProcessModel>>;
}

struct RepositoryState {
    by_key: BTreeMap<Key, Arc<ProcessModel>>,
    /// bpmn_process_id → definition keys ordered by version.
    versions: HashMap<String, Vec<Key>>,
    keys: KeyGenerator,
}

/// In-memory deployment registry. Versions increase per `bpmn_process_id`;
/// redeploying an unchanged source returns the existing version.
pub struct ProcessRepository {
    inner: RwLock<RepositoryState>,
}

impl ProcessRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RepositoryState {
                by_key: BTreeMap::new(),
                versions: HashMap::new(),
                keys: KeyGenerator::new(KeyGenerator::DEPLOYMENT_PARTITION),
            }),
        }
    }

    /// Parse, build and register a YAML definition.
    pub fn deploy_yaml(&self, yaml: &str) -> Result<Arc<ProcessModel>, ModelError> {
        let dto: ProcessDefinitionDto = serde_yaml::from_str(yaml)?;
        self.deploy(&dto, checksum_of(yaml))
    }

    pub fn deploy(
        &self,
        dto: &ProcessDefinitionDto,
        checksum: [u8; 32],
    ) -> Result<Arc<ProcessModel>, ModelError> {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let latest = state
            .versions
            .get(&dto.id)
            .and_then(|keys| keys.last())
            .and_then(|key| state.by_key.get(key))
            .cloned();
        if let Some(latest) = &latest {
            if latest.checksum() == &checksum {
                return Ok(latest.clone());
            }
        }

        let version = latest.map_or(1, |m| m.version() + 1);
        let key = state.keys.next_key();
        let model = Arc::new(build_model(dto, key, version, checksum)?);
        state.by_key.insert(key, model.clone());
        state.versions.entry(dto.id.clone()).or_default().push(key);

        info!(
            bpmn_process_id = %dto.id,
            version,
            process_definition_key = key,
            "process definition deployed"
        );
        Ok(model)
    }
}

impl Default for ProcessRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessModelProvider for ProcessRepository {
    fn model_by_key(&self, process_definition_key: Key) -> Option<Arc<ProcessModel>> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        state.by_key.get(&process_definition_key).cloned()
    }

    fn latest_by_id(&self, bpmn_process_id: &str) -> Option<Arc<ProcessModel>> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        state
            .versions
            .get(bpmn_process_id)
            .and_then(|keys| keys.last())
            .and_then(|key| state.by_key.get(key))
            .cloned()
    }

    fn model_by_version(&self, bpmn_process_id: &str, version: u32) -> Option<Arc<ProcessModel>> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        state
            .versions
            .get(bpmn_process_id)?
            .iter()
            .filter_map(|key| state.by_key.get(key))
            .find(|m| m.version() == version)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"
id: p
elements:
  - { id: start, type: START_EVENT }
  - { id: A, type: SERVICE_TASK, job_type: a }
flows:
  - { id: f1, from: start, to: A }
"#;

    const V2: &str = r#"
id: p
elements:
  - { id: start, type: START_EVENT }
  - { id: B, type: SERVICE_TASK, job_type: b }
flows:
  - { id: f1, from: start, to: B }
"#;

    #[test]
    fn test_versions_increase_per_process_id() {
        let repository = ProcessRepository::new();
        let v1 = repository.deploy_yaml(V1).unwrap();
        let v2 = repository.deploy_yaml(V2).unwrap();
        assert_eq!(v1.version(), 1);
        assert_eq!(v2.version(), 2);
        assert_ne!(v1.key(), v2.key());
        assert_eq!(repository.latest_by_id("p").unwrap().key(), v2.key());
        assert_eq!(repository.model_by_key(v1.key()).unwrap().version(), 1);
        assert_eq!(repository.model_by_version("p", 1).unwrap().key(), v1.key());
        assert!(repository.model_by_version("p", 3).is_none());
    }

    #[test]
    fn test_redeploy_of_same_source_is_idempotent() {
        let repository = ProcessRepository::new();
        let first = repository.deploy_yaml(V1).unwrap();
        let again = repository.deploy_yaml(V1).unwrap();
        assert_eq!(first.key(), again.key());
        assert_eq!(again.version(), 1);
    }

    #[test]
    fn test_failed_build_does_not_register() {
        let repository = ProcessRepository::new();
        let broken = "id: p\nelements:\n  - { id: A, type: SERVICE_TASK }\n";
        assert!(repository.deploy_yaml(broken).is_err());
        assert!(repository.latest_by_id("p").is_none());
    }
}
