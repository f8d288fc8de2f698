use anyhow::{bail, Result};

use crate::config::AppConfig;
use crate::instance::{InstanceRecord, NewInstance, DEFAULT_INSTANCE_ID};

/// Outcome of removing an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Remaining(usize),
    /// The last instance is gone; the process should exit.
    Terminate,
    NotFound,
}

/// Owns every live instance record, in creation order.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    records: Vec<InstanceRecord>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|record| record.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&InstanceRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn insert(&mut self, record: InstanceRecord) -> Result<&InstanceRecord> {
        if self.contains(&record.id) {
            bail!("Instance {} already exists", record.id);
        }
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    /// Applies `change` to the record and returns the updated copy.
    pub fn update<F>(&mut self, id: &str, change: F) -> Option<InstanceRecord>
    where
        F: FnOnce(&mut InstanceRecord),
    {
        let index = self.position(id)?;
        let record = &mut self.records[index];
        change(record);
        Some(record.clone())
    }

    pub fn close(&mut self, id: &str) -> CloseOutcome {
        let Some(index) = self.position(id) else {
            return CloseOutcome::NotFound;
        };
        self.records.remove(index);
        if self.records.is_empty() {
            CloseOutcome::Terminate
        } else {
            CloseOutcome::Remaining(self.records.len())
        }
    }

    pub fn snapshot(&self) -> Vec<InstanceRecord> {
        self.records.clone()
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|record| record.id.clone()).collect()
    }
}

/// What startup should create from the persisted records: either the saved
/// set or a single default instance.
pub fn startup_instances(saved: Vec<InstanceRecord>, config: &AppConfig) -> Vec<InstanceRecord> {
    if saved.is_empty() {
        vec![InstanceRecord::build(
            NewInstance::with_id(DEFAULT_INSTANCE_ID),
            config,
        )]
    } else {
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PreferencesStore, INSTANCES_KEY};
    use serde_json::json;

    fn registry_with(ids: &[&str]) -> InstanceRegistry {
        let config = AppConfig::default();
        let mut registry = InstanceRegistry::new();
        for id in ids {
            registry
                .insert(InstanceRecord::build(NewInstance::with_id(*id), &config))
                .unwrap();
        }
        registry
    }

    #[test]
    fn empty_store_starts_with_default_instance() {
        let config = AppConfig::default();
        let records = startup_instances(Vec::new(), &config);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "default");
        assert_eq!(records[0].target_url, "https://home.i.smith.bz/");
        assert_eq!((records[0].window_width, records[0].window_height), (375, 667));
    }

    #[test]
    fn invalid_saved_record_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());
        store
            .set(
                INSTANCES_KEY,
                json!([
                    { "id": "broken", "width": 300 },
                    { "id": "valid", "url": "https://valid.example/" },
                ]),
            )
            .unwrap();
        let config = AppConfig::default();

        let mut registry = InstanceRegistry::new();
        for record in startup_instances(store.load(&config), &config) {
            registry.insert(record).unwrap();
        }

        assert_eq!(registry.ids(), vec!["valid".to_string()]);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let mut registry = registry_with(&["a"]);
        assert!(registry
            .insert(InstanceRecord::build(NewInstance::with_id("a"), &AppConfig::default()))
            .is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn closing_last_instance_terminates() {
        let mut registry = registry_with(&["a", "b"]);
        assert_eq!(registry.close("a"), CloseOutcome::Remaining(1));
        assert_eq!(registry.close("a"), CloseOutcome::NotFound);
        assert_eq!(registry.close("b"), CloseOutcome::Terminate);
        assert!(registry.is_empty());
    }

    #[test]
    fn update_mutates_in_place_and_keeps_order() {
        let mut registry = registry_with(&["a", "b", "c"]);
        let updated = registry
            .update("b", |record| record.open_links_externally = true)
            .unwrap();
        assert!(updated.open_links_externally);
        assert!(registry.get("b").unwrap().open_links_externally);
        assert!(registry.update("missing", |_| {}).is_none());
        assert_eq!(registry.ids(), vec!["a", "b", "c"]);
    }
}
