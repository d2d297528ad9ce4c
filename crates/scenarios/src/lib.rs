/// Saved scenarios: the in-memory list, its durable mirror and file import/export
pub mod compaction;
pub mod error;
pub mod import;
pub mod medium;
pub mod model;
pub mod store;

pub use error::{ImportError, MediumError, StoreError};
pub use import::parse_import;
pub use medium::{app_data_dir, DurableMedium, MemoryMedium, SqliteMedium, DEFAULT_CAPACITY_BYTES};
pub use model::{Scenario, ScenarioPatch, DEFAULT_SCENARIO_FILENAME};
pub use store::{ScenarioStore, StoreConfig, SyncStatus, EXPORT_FILENAME};
