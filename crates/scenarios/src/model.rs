use assets::{AssetError, ImageAsset};
use serde::{Deserialize, Serialize};

/// Filename stored when a scenario is saved without a generated one
pub const DEFAULT_SCENARIO_FILENAME: &str = "corkbrick-scenario";

/// A saved generation: reference images, the edited scene and its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub original_images: Vec<ImageAsset>,
    /// Data URL of the edited image
    pub edited_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Scenario {
    /// New scenario from the outputs of a finished run. A missing description
    /// is stored empty and a missing filename falls back to the default name.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        prompt: impl Into<String>,
        original_images: Vec<ImageAsset>,
        edited_image: &ImageAsset,
        description: Option<String>,
        filename: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt: prompt.into(),
            original_images,
            edited_image: edited_image.data_url().to_string(),
            description: Some(description.unwrap_or_default()),
            filename: Some(filename.unwrap_or_else(|| DEFAULT_SCENARIO_FILENAME.to_string())),
        }
    }

    pub fn edited_asset(&self) -> Result<ImageAsset, AssetError> {
        ImageAsset::from_data_url(&self.edited_image)
    }

    /// Apply the editable fields of `patch`
    pub fn apply(&mut self, patch: ScenarioPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(prompt) = patch.prompt {
            self.prompt = prompt;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
    }
}

/// In-place edit of a saved scenario. Only these fields are mutable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioPatch {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub description: Option<String>,
}

impl ScenarioPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.prompt.is_none() && self.description.is_none()
    }
}
