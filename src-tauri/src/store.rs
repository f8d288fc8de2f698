use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::AppConfig;
use crate::instance::{InstanceRecord, NewInstance};

const PREFERENCES_FILE_NAME: &str = "preferences.json";
pub const INSTANCES_KEY: &str = "webViewerInstances";

/// A flat JSON key-value file standing in for the platform defaults
/// database. Unrelated keys are preserved on write.
pub struct PreferencesStore {
    path: PathBuf,
}

/// On-disk shape of one instance. Icon preferences are deliberately absent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedInstance<'a> {
    id: &'a str,
    url: &'a str,
    external_links: bool,
    width: u32,
    height: u32,
}

impl PreferencesStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(PREFERENCES_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read preferences at {}", self.path.display()))?;
        match serde_json::from_str::<Value>(&contents)
            .with_context(|| "Malformed preferences JSON")?
        {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("Preferences root is not an object"),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all()?.remove(key))
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut all = self.read_all().unwrap_or_else(|err| {
            log::warn!("Replacing unreadable preferences file: {err:#}");
            Map::new()
        });
        all.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create preferences directory at {}",
                    parent.display()
                )
            })?;
        }
        let data = serde_json::to_string_pretty(&Value::Object(all))?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, data)
            .with_context(|| format!("Failed to write preferences at {}", staging.display()))?;
        fs::rename(&staging, &self.path).with_context(|| {
            format!("Failed to replace preferences at {}", self.path.display())
        })?;
        Ok(())
    }

    /// Reads the persisted instance list. Entries without a string `id` and
    /// `url` are skipped, as are repeated ids.
    pub fn load(&self, config: &AppConfig) -> Vec<InstanceRecord> {
        let raw = match self.get(INSTANCES_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(err) => {
                log::warn!("Could not read saved instances: {err:#}");
                return Vec::new();
            }
        };
        let Value::Array(entries) = raw else {
            log::warn!("Saved instances are not a list, ignoring");
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let Some(spec) = decode_entry(entry) else {
                log::warn!("Skipping saved instance #{index}: missing id or url");
                continue;
            };
            if !seen.insert(spec.id.clone()) {
                log::warn!("Skipping saved instance #{index}: duplicate id {}", spec.id);
                continue;
            }
            records.push(InstanceRecord::build(spec, config));
        }
        records
    }

    pub fn save(&self, records: &[InstanceRecord]) -> Result<()> {
        let persisted: Vec<PersistedInstance<'_>> = records
            .iter()
            .map(|record| PersistedInstance {
                id: &record.id,
                url: &record.target_url,
                external_links: record.open_links_externally,
                width: record.window_width,
                height: record.window_height,
            })
            .collect();
        self.set(INSTANCES_KEY, serde_json::to_value(persisted)?)
    }
}

fn decode_entry(entry: &Value) -> Option<NewInstance> {
    let object = entry.as_object()?;
    let id = object.get("id")?.as_str()?;
    let url = object.get("url")?.as_str()?;
    Some(NewInstance {
        id: id.to_string(),
        url: Some(url.to_string()),
        external_links: object.get("externalLinks").and_then(coerce_bool),
        width: object.get("width").and_then(coerce_dimension),
        height: object.get("height").and_then(coerce_dimension),
    })
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

/// Integers (or integral floats) greater than zero; anything else is unset.
fn coerce_dimension(value: &Value) -> Option<u32> {
    let n = value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))?;
    u32::try_from(n).ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(value: Value) -> (tempfile::TempDir, PreferencesStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());
        store.set(INSTANCES_KEY, value).unwrap();
        (dir, store)
    }

    fn record(id: &str, url: &str, external: bool, width: u32, height: u32) -> InstanceRecord {
        let mut record = InstanceRecord::build(NewInstance::with_id(id), &AppConfig::default());
        record.target_url = url.into();
        record.open_links_externally = external;
        record.window_width = width;
        record.window_height = height;
        record
    }

    #[test]
    fn round_trip_preserves_persisted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());
        let mut first = record("a", "https://a.example/", true, 400, 800);
        first.use_favicon = false;
        first.custom_icon_path = Some("/tmp/a.png".into());
        let saved = vec![
            first,
            record("b", "https://b.example/", false, 375, 667),
            record("c", "https://c.example/path?q=1", true, 1, 2),
        ];

        store.save(&saved).unwrap();
        let loaded = store.load(&AppConfig::default());

        assert_eq!(loaded.len(), 3);
        for (before, after) in saved.iter().zip(&loaded) {
            assert_eq!(before.id, after.id);
            assert_eq!(before.target_url, after.target_url);
            assert_eq!(before.open_links_externally, after.open_links_externally);
            assert_eq!(before.window_width, after.window_width);
            assert_eq!(before.window_height, after.window_height);
        }
        // Icon settings are session-only.
        assert!(loaded[0].use_favicon);
        assert_eq!(loaded[0].custom_icon_path, None);
    }

    #[test]
    fn missing_store_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());
        assert!(store.load(&AppConfig::default()).is_empty());
    }

    #[test]
    fn skips_entries_without_url_or_id() {
        let (_dir, store) = store_with(json!([
            { "id": "no-url", "externalLinks": true },
            { "url": "https://no-id.example/" },
            { "id": "ok", "url": "https://ok.example/" },
            "not an object",
        ]));

        let loaded = store.load(&AppConfig::default());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "ok");
    }

    #[test]
    fn missing_and_mistyped_fields_default() {
        let (_dir, store) = store_with(json!([
            { "id": "a", "url": "https://a.example/" },
            { "id": "b", "url": "https://b.example/", "externalLinks": "yes", "width": -5, "height": "tall" },
            { "id": "c", "url": "https://c.example/", "externalLinks": 1, "width": 500.0, "height": 700 },
        ]));

        let loaded = store.load(&AppConfig::default());
        assert_eq!(loaded.len(), 3);
        assert!(!loaded[0].open_links_externally);
        assert_eq!((loaded[0].window_width, loaded[0].window_height), (375, 667));
        assert!(!loaded[1].open_links_externally);
        assert_eq!((loaded[1].window_width, loaded[1].window_height), (375, 667));
        assert!(loaded[2].open_links_externally);
        assert_eq!((loaded[2].window_width, loaded[2].window_height), (500, 700));
    }

    #[test]
    fn duplicate_ids_keep_the_first() {
        let (_dir, store) = store_with(json!([
            { "id": "a", "url": "https://first.example/" },
            { "id": "a", "url": "https://second.example/" },
        ]));

        let loaded = store.load(&AppConfig::default());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].target_url, "https://first.example/");
    }

    #[test]
    fn save_preserves_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());
        store.set("somethingElse", json!({ "keep": true })).unwrap();

        store
            .save(&[record("a", "https://a.example/", false, 375, 667)])
            .unwrap();

        assert_eq!(store.get("somethingElse").unwrap(), Some(json!({ "keep": true })));
        let persisted = store.get(INSTANCES_KEY).unwrap().unwrap();
        assert_eq!(
            persisted,
            json!([{ "id": "a", "url": "https://a.example/", "externalLinks": false, "width": 375, "height": 667 }])
        );
    }

    #[test]
    fn malformed_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::in_dir(dir.path());
        fs::write(store.path(), "[oops").unwrap();
        assert!(store.load(&AppConfig::default()).is_empty());

        store
            .save(&[record("a", "https://a.example/", false, 375, 667)])
            .unwrap();
        assert_eq!(store.load(&AppConfig::default()).len(), 1);
    }
}
