//! HTTP client for a txt2img backend.
//!
//! Targets the Stable Diffusion web UI API (`/sdapi/v1/txt2img`), which
//! answers with base64-encoded PNGs.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GeneratorError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// Client for one diffusion backend.
#[derive(Debug, Clone)]
pub struct DiffusionClient {
    base_url: String,
    http_client: Client,
    width: u32,
    height: u32,
    steps: u32,
}

impl DiffusionClient {
    /// # Errors
    ///
    /// Returns `GeneratorError::Provider` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        width: u32,
        height: u32,
        timeout: Duration,
    ) -> Result<Self, GeneratorError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeneratorError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            width,
            height,
            steps: 25,
        })
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when the backend answers its options endpoint.
    pub async fn probe(&self) -> bool {
        let url = format!("{}/sdapi/v1/options", self.base_url);
        match self
            .http_client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %e, "Diffusion backend probe failed");
                false
            }
        }
    }

    /// Renders one image and returns its PNG bytes.
    pub async fn txt2img(&self, prompt: &str, negative: &str) -> Result<Vec<u8>, GeneratorError> {
        let url = format!("{}/sdapi/v1/txt2img", self.base_url);
        let body = Txt2ImgRequest {
            prompt,
            negative_prompt: negative,
            width: self.width,
            height: self.height,
            steps: self.steps,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GeneratorError::Unavailable(e.to_string())
                } else if e.is_timeout() {
                    GeneratorError::Provider(format!("diffusion request timed out: {}", e))
                } else {
                    GeneratorError::Provider(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            warn!(status = status.as_u16(), "Diffusion backend rejected request");
            return Err(classify_status(status, &text));
        }

        let parsed: Txt2ImgResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::MalformedOutput(format!("txt2img response: {}", e)))?;
        let image = parsed.images.first().ok_or_else(|| {
            GeneratorError::MalformedOutput("txt2img response has no images".to_string())
        })?;
        decode_image(image)
    }
}

fn classify_status(status: StatusCode, body: &str) -> GeneratorError {
    let body: String = body.chars().take(200).collect();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        GeneratorError::Unavailable(format!("diffusion backend busy: {}", body))
    } else {
        GeneratorError::Provider(format!(
            "diffusion backend returned {}: {}",
            status.as_u16(),
            body
        ))
    }
}

/// Decodes a base64 image, with or without a `data:` URL prefix.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, GeneratorError> {
    let payload = match encoded.split_once(";base64,") {
        Some((_, data)) => data,
        None => encoded,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| GeneratorError::MalformedOutput(format!("invalid base64 image: {}", e)))?;
    if bytes.is_empty() {
        return Err(GeneratorError::MalformedOutput("empty image".to_string()));
    }
    Ok(bytes)
}
