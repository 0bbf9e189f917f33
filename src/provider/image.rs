//! Image asset generation through an OpenAI-compatible images endpoint.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{AssetRef, ProviderSettings};
use crate::error::ProviderError;

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

/// Generates one image per call and stores it under the project's assets.
#[derive(Debug, Clone)]
pub struct ImageClient {
    http_client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    size: String,
    storage_dir: PathBuf,
}

impl ImageClient {
    pub fn new(http_client: Client, settings: &ProviderSettings) -> Self {
        Self {
            http_client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.image_model.clone(),
            size: settings.image_size.clone(),
            storage_dir: settings.resolved_storage_dir(),
        }
    }

    /// Directory holding a project's generated assets.
    pub fn assets_dir(&self, project_id: &str) -> PathBuf {
        self.storage_dir.join(project_id).join("assets")
    }

    /// Generates an image for `prompt` and returns its local path.
    pub async fn generate(&self, project_id: &str, prompt: &str) -> Result<AssetRef, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("image API key is not set".to_string()))?;

        debug!(project_id = %project_id, prompt_len = prompt.len(), "Requesting image asset");

        let body = ImageRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: &self.size,
            response_format: "b64_json",
        };

        let response = self
            .http_client
            .post(format!("{}/images/generations", self.api_base))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::request)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "image generation returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: ImageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let bytes = decode_first_image(parsed)?;

        let path = write_asset(&self.assets_dir(project_id), &bytes).await?;
        info!(project_id = %project_id, path = %path.display(), "Stored image asset");
        Ok(AssetRef::new(path.to_string_lossy()))
    }
}

fn decode_first_image(response: ImageResponse) -> Result<Vec<u8>, ProviderError> {
    let encoded = response
        .data
        .into_iter()
        .next()
        .and_then(|d| d.b64_json)
        .ok_or_else(|| ProviderError::InvalidResponse("no image data in response".to_string()))?;

    BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| ProviderError::InvalidResponse(format!("invalid base64 image: {}", e)))
}

async fn write_asset(dir: &Path, bytes: &[u8]) -> Result<PathBuf, ProviderError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.png", Uuid::new_v4()));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}
