/// Image assets shared by the generation pipeline and the scenario store
///
/// An asset is kept as a self-describing data URL (`data:<mime>;base64,<payload>`)
/// because that is the form both the generative backend and the saved
/// scenario documents exchange.
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub mod compact;

pub use compact::{compact, CompactionSettings};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("unsupported image type: {0}")]
    UnsupportedType(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An immutable image carried as a data URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    data_url: String,
    mime_type: String,
}

impl ImageAsset {
    /// Wrap raw encoded bytes (PNG, JPEG, ...)
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::from_base64(mime_type, &payload)
    }

    /// Wrap an already base64-encoded payload, as returned by the backend
    pub fn from_base64(mime_type: &str, payload: &str) -> Self {
        Self {
            data_url: format!("data:{};base64,{}", mime_type, payload),
            mime_type: mime_type.to_string(),
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` string
    pub fn from_data_url(data_url: &str) -> Result<Self, AssetError> {
        let mime_type = parse_mime(data_url)?;
        Ok(Self {
            data_url: data_url.to_string(),
            mime_type,
        })
    }

    /// Load an image file, guessing its MIME type from the extension
    pub fn load(path: &Path) -> Result<Self, AssetError> {
        let format = image::ImageFormat::from_path(path)
            .map_err(|_| AssetError::UnsupportedType(path.display().to_string()))?;
        let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_bytes(&bytes, format.to_mime_type()))
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The base64 part after the comma
    pub fn base64_payload(&self) -> &str {
        self.data_url
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or_default()
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, AssetError> {
        Ok(base64::engine::general_purpose::STANDARD.decode(self.base64_payload())?)
    }

    /// File extension derived from the MIME subtype (`image/png` -> `png`)
    pub fn extension(&self) -> &str {
        match self.mime_type.split_once('/') {
            Some((_, subtype)) if !subtype.is_empty() => subtype,
            _ => "png",
        }
    }

    /// Pixel dimensions of the encoded image
    pub fn dimensions(&self) -> Result<(u32, u32), AssetError> {
        let bytes = self.decode_bytes()?;
        let reader = image::ImageReader::new(std::io::Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|err| AssetError::Image(err.into()))?;
        Ok(reader.into_dimensions()?)
    }
}

fn parse_mime(data_url: &str) -> Result<String, AssetError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| AssetError::InvalidDataUrl("missing `data:` prefix".to_string()))?;
    let (header, _) = rest
        .split_once(',')
        .ok_or_else(|| AssetError::InvalidDataUrl("missing payload separator".to_string()))?;
    let mime = header.split(';').next().unwrap_or_default();
    if mime.is_empty() {
        return Err(AssetError::InvalidDataUrl("missing MIME type".to_string()));
    }
    Ok(mime.to_string())
}
