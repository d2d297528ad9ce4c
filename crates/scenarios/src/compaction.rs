/// Fan-out compaction of every image in a scenario list before a write
use assets::{compact, CompactionSettings, ImageAsset};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::model::Scenario;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Original(usize),
    Edited,
}

/// Compact each original and edited image on the blocking pool and join them
/// back into `scenarios`. An image that fails to decode or encode is kept
/// unchanged.
pub async fn compact_scenarios(
    mut scenarios: Vec<Scenario>,
    settings: CompactionSettings,
) -> Vec<Scenario> {
    let mut tasks = JoinSet::new();
    for (index, scenario) in scenarios.iter().enumerate() {
        for (position, image) in scenario.original_images.iter().enumerate() {
            let image = image.clone();
            tasks.spawn_blocking(move || {
                (index, Slot::Original(position), compact(&image, &settings))
            });
        }
        match ImageAsset::from_data_url(&scenario.edited_image) {
            Ok(edited) => {
                tasks.spawn_blocking(move || (index, Slot::Edited, compact(&edited, &settings)));
            }
            Err(err) => warn!(id = %scenario.id, error = %err, "edited image is not a data URL, keeping it"),
        }
    }

    let mut compacted = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (index, slot, result) = match joined {
            Ok(done) => done,
            Err(err) => {
                warn!(error = %err, "compaction task failed");
                continue;
            }
        };
        let Some(scenario) = scenarios.get_mut(index) else {
            continue;
        };
        match (slot, result) {
            (Slot::Original(position), Ok(image)) => {
                if let Some(original) = scenario.original_images.get_mut(position) {
                    *original = image;
                    compacted += 1;
                }
            }
            (Slot::Edited, Ok(image)) => {
                scenario.edited_image = image.data_url().to_string();
                compacted += 1;
            }
            (slot, Err(err)) => {
                warn!(id = %scenario.id, ?slot, error = %err, "could not compact image, keeping original");
            }
        }
    }
    debug!(scenarios = scenarios.len(), compacted, "compacted scenario images");
    scenarios
}
