/// Authoritative in-memory scenario list mirrored to a durable medium
use assets::CompactionSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::compaction::compact_scenarios;
use crate::error::{ImportError, MediumError, StoreError};
use crate::import::parse_import;
use crate::medium::{DurableMedium, DEFAULT_CAPACITY_BYTES};
use crate::model::{Scenario, ScenarioPatch};

/// File name used when the whole list is exported
pub const EXPORT_FILENAME: &str = "corkbrick-scenarios.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix of the durable storage key
    pub app_name: String,
    /// Longest edge of persisted images, in pixels
    pub max_dimension: u32,
    /// JPEG quality of persisted images
    pub jpeg_quality: u8,
    /// Capacity ceiling of the on-disk medium
    pub capacity_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let compaction = CompactionSettings::default();
        Self {
            app_name: "corkbrick".to_string(),
            max_dimension: compaction.max_dimension,
            jpeg_quality: compaction.quality,
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
        }
    }
}

impl StoreConfig {
    pub fn storage_key(&self) -> String {
        format!("{}-saved-scenarios", self.app_name)
    }

    pub fn compaction(&self) -> CompactionSettings {
        CompactionSettings {
            max_dimension: self.max_dimension,
            quality: self.jpeg_quality,
        }
    }
}

/// Outcome of mirroring the list to the medium. The in-memory list is kept
/// in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Persisted { bytes: usize },
    /// The list is empty and the durable entry was removed
    Cleared,
    /// The medium is full; the user should export to a file instead
    QuotaExceeded { needed: u64, limit: u64 },
    Failed(String),
}

impl SyncStatus {
    pub fn is_persisted(&self) -> bool {
        matches!(self, SyncStatus::Persisted { .. } | SyncStatus::Cleared)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Persisted { bytes } => write!(f, "saved ({bytes} bytes)"),
            SyncStatus::Cleared => f.write_str("saved (empty)"),
            SyncStatus::QuotaExceeded { .. } => f.write_str(
                "Could not save scenarios to storage: Quota exceeded. Please save to file.",
            ),
            SyncStatus::Failed(reason) => write!(f, "Could not save scenarios to storage: {reason}"),
        }
    }
}

/// Decode saved entries one by one, skipping any that no longer parse
fn decode_saved(key: &str, entries: Vec<Value>) -> Vec<Scenario> {
    let total = entries.len();
    let scenarios: Vec<Scenario> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(scenario) => Some(scenario),
            Err(err) => {
                warn!(key, index, error = %err, "skipping malformed saved scenario");
                None
            }
        })
        .collect();
    if scenarios.len() != total {
        warn!(key, kept = scenarios.len(), total, "some saved scenarios could not be read");
    }
    scenarios
}

pub struct ScenarioStore {
    key: String,
    compaction: CompactionSettings,
    medium: Arc<dyn DurableMedium>,
    scenarios: Mutex<Vec<Scenario>>,
}

impl ScenarioStore {
    /// Load the persisted list. A missing or unreadable entry starts empty.
    pub fn open(config: &StoreConfig, medium: Arc<dyn DurableMedium>) -> Self {
        let key = config.storage_key();
        let scenarios = match medium.read(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Value>>(&raw) {
                Ok(entries) => decode_saved(&key, entries),
                Err(err) => {
                    warn!(key = %key, error = %err, "ignoring malformed saved scenarios");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(key = %key, error = %err, "could not read saved scenarios");
                Vec::new()
            }
        };
        debug!(key = %key, count = scenarios.len(), "opened scenario store");

        Self {
            key,
            compaction: config.compaction(),
            medium,
            scenarios: Mutex::new(scenarios),
        }
    }

    pub fn list(&self) -> Vec<Scenario> {
        self.scenarios.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.scenarios.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.lock().is_empty()
    }

    pub fn load_by_id(&self, id: &str) -> Option<Scenario> {
        self.scenarios.lock().iter().find(|s| s.id == id).cloned()
    }

    /// Fresh id: current Unix time in milliseconds, bumped past any taken id
    pub fn next_id(&self) -> String {
        let scenarios = self.scenarios.lock();
        let mut candidate = chrono::Utc::now().timestamp_millis();
        while scenarios.iter().any(|s| s.id == candidate.to_string()) {
            candidate += 1;
        }
        candidate.to_string()
    }

    pub async fn add(&self, scenario: Scenario) -> Result<SyncStatus, StoreError> {
        {
            let mut scenarios = self.scenarios.lock();
            if scenarios.iter().any(|s| s.id == scenario.id) {
                return Err(StoreError::DuplicateId(scenario.id));
            }
            info!(id = %scenario.id, name = %scenario.name, "scenario saved");
            scenarios.push(scenario);
        }
        Ok(self.persist().await)
    }

    pub async fn update(&self, id: &str, patch: ScenarioPatch) -> Result<SyncStatus, StoreError> {
        {
            let mut scenarios = self.scenarios.lock();
            let scenario = scenarios
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            scenario.apply(patch);
        }
        debug!(id, "scenario updated");
        Ok(self.persist().await)
    }

    pub async fn remove(&self, id: &str) -> Result<SyncStatus, StoreError> {
        {
            let mut scenarios = self.scenarios.lock();
            let before = scenarios.len();
            scenarios.retain(|s| s.id != id);
            if scenarios.len() == before {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }
        info!(id, "scenario deleted");
        Ok(self.persist().await)
    }

    /// Merge by id: incoming entries replace existing ones in place, new ids
    /// are appended in incoming order. Re-importing the same list is a no-op.
    pub async fn import_merge(&self, incoming: Vec<Scenario>) -> SyncStatus {
        {
            let mut scenarios = self.scenarios.lock();
            for scenario in incoming {
                match scenarios.iter().position(|s| s.id == scenario.id) {
                    Some(index) => scenarios[index] = scenario,
                    None => scenarios.push(scenario),
                }
            }
        }
        self.persist().await
    }

    /// Validate an import document and merge it. Returns how many scenarios
    /// the document held.
    pub async fn import_json(&self, text: &str) -> Result<(usize, SyncStatus), ImportError> {
        let incoming = parse_import(text)?;
        let count = incoming.len();
        let status = self.import_merge(incoming).await;
        info!(count, "scenario(s) loaded successfully");
        Ok((count, status))
    }

    /// Pretty JSON array of the full in-memory list, uncompacted
    pub fn export(&self) -> Result<String, StoreError> {
        let scenarios = self.scenarios.lock();
        Ok(serde_json::to_string_pretty(&*scenarios)?)
    }

    pub fn export_one(&self, id: &str) -> Result<String, StoreError> {
        let scenario = self
            .load_by_id(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(serde_json::to_string_pretty(&scenario)?)
    }

    /// Mirror the current list to the medium. Images are compacted on the
    /// serialized copy only.
    pub async fn persist(&self) -> SyncStatus {
        let snapshot = self.list();
        if snapshot.is_empty() {
            return match self.medium.remove(&self.key) {
                Ok(()) => SyncStatus::Cleared,
                Err(err) => {
                    warn!(error = %err, "could not clear saved scenarios");
                    SyncStatus::Failed(err.to_string())
                }
            };
        }

        let compacted = compact_scenarios(snapshot, self.compaction).await;
        let json = match serde_json::to_string(&compacted) {
            Ok(json) => json,
            Err(err) => return SyncStatus::Failed(err.to_string()),
        };

        match self.medium.write(&self.key, &json) {
            Ok(()) => {
                debug!(bytes = json.len(), count = compacted.len(), "saved scenarios");
                SyncStatus::Persisted { bytes: json.len() }
            }
            Err(MediumError::QuotaExceeded { needed, limit }) => {
                warn!(needed, limit, "scenario storage quota exceeded");
                SyncStatus::QuotaExceeded { needed, limit }
            }
            Err(err) => {
                warn!(error = %err, "error saving scenarios");
                SyncStatus::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MemoryMedium;
    use assets::ImageAsset;

    fn scenario(id: &str, name: &str) -> Scenario {
        Scenario::new(
            id,
            name,
            format!("prompt {name}"),
            vec![ImageAsset::from_base64("image/png", "AAAA")],
            &ImageAsset::from_base64("image/png", "BBBB"),
            None,
            None,
        )
    }

    fn store() -> (ScenarioStore, Arc<MemoryMedium>) {
        let medium = Arc::new(MemoryMedium::default());
        (ScenarioStore::open(&StoreConfig::default(), medium.clone()), medium)
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_id() {
        let (store, _) = store();
        store.add(scenario("1", "a")).await.unwrap();
        assert!(matches!(
            store.add(scenario("1", "b")).await,
            Err(StoreError::DuplicateId(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let (store, medium) = store();
        store.add(scenario("1", "a")).await.unwrap();
        store
            .update(
                "1",
                ScenarioPatch {
                    prompt: Some("new prompt".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(store.load_by_id("1").unwrap().prompt, "new prompt");
        assert!(matches!(
            store.update("9", ScenarioPatch::default()).await,
            Err(StoreError::NotFound(_))
        ));

        assert_eq!(store.remove("1").await.unwrap(), SyncStatus::Cleared);
        assert!(medium.read("corkbrick-saved-scenarios").unwrap().is_none());
        assert!(matches!(store.remove("1").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_merge_keeps_positions_and_appends_new() {
        let (store, _) = store();
        store
            .import_merge(vec![scenario("a", "A"), scenario("b", "B")])
            .await;
        store
            .import_merge(vec![scenario("c", "C"), scenario("a", "A2")])
            .await;

        let names: Vec<_> = store.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["A2", "B", "C"]);
    }

    #[test]
    fn test_next_id_skips_taken_ids() {
        let medium = Arc::new(MemoryMedium::default());
        let taken = chrono::Utc::now().timestamp_millis();
        let list: Vec<_> = (0..3)
            .map(|i| scenario(&(taken + i).to_string(), "x"))
            .collect();
        medium
            .write("corkbrick-saved-scenarios", &serde_json::to_string(&list).unwrap())
            .unwrap();
        let store = ScenarioStore::open(&StoreConfig::default(), medium);

        let id = store.next_id();
        assert!(id.parse::<i64>().unwrap() >= taken);
        assert!(store.load_by_id(&id).is_none());
    }

    #[test]
    fn test_open_tolerates_malformed_entry() {
        let medium = Arc::new(MemoryMedium::default());
        medium.write("corkbrick-saved-scenarios", "{not json").unwrap();
        let store = ScenarioStore::open(&StoreConfig::default(), medium);
        assert!(store.is_empty());
    }

    #[test]
    fn test_open_skips_only_the_malformed_entries() {
        let medium = Arc::new(MemoryMedium::default());
        let good = [scenario("1", "a"), scenario("3", "c")];
        let raw = serde_json::json!([
            serde_json::to_value(&good[0]).unwrap(),
            {"id": "2", "name": "broken"},
            serde_json::to_value(&good[1]).unwrap(),
        ]);
        medium
            .write("corkbrick-saved-scenarios", &raw.to_string())
            .unwrap();

        let store = ScenarioStore::open(&StoreConfig::default(), medium);
        assert_eq!(store.list(), good.to_vec());
        assert!(store.load_by_id("2").is_none());
    }

    #[tokio::test]
    async fn test_export_one() {
        let (store, _) = store();
        store.add(scenario("1", "a")).await.unwrap();
        let json = store.export_one("1").unwrap();
        let parsed: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, scenario("1", "a"));
        assert!(store.export_one("2").is_err());
    }
}
