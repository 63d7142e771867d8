//! Image OCR collaborator
//!
//! Attachments are downloaded and handed to an external OCR service,
//! which returns recognized text regions with confidence. Region text
//! is fed back through the same token extractor; the pipeline discounts
//! match confidence by the region's OCR confidence.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{Error, Result};

/// A recognized text region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRegion {
    pub text: String,
    /// Recognition confidence in [0, 1]
    pub confidence: f64,
    /// Region polygon as (x, y) points
    #[serde(default)]
    pub bbox: Vec<(f64, f64)>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Run OCR over raw image bytes
    async fn extract_text(&self, image: &[u8]) -> Result<Vec<OcrRegion>>;

    /// Fetch an attachment. `Ok(None)` means the URL did not yield an
    /// image (gone, not found); hard transport failures are errors.
    async fn download(&self, url: &str) -> Result<Option<Vec<u8>>>;
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    image_b64: &'a str,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    regions: Vec<OcrRegion>,
}

/// Client for an external HTTP OCR service
pub struct HttpOcr {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOcr {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Ocr(format!("client build failed: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<Vec<OcrRegion>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let request = OcrRequest {
            image_b64: &encoded,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Ocr(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Ocr(format!(
                "OCR service returned {}",
                response.status()
            )));
        }

        let body: OcrResponse = response
            .json()
            .await
            .map_err(|e| Error::Ocr(format!("bad OCR body: {e}")))?;

        debug!(regions = body.regions.len(), "OCR complete");
        Ok(body.regions)
    }

    async fn download(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::ImageDownload(e.to_string()))?;

        if !response.status().is_success() {
            debug!(url, status = %response.status(), "attachment fetch returned non-success");
            return Ok(None);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::ImageDownload(e.to_string()))?;

        Ok(Some(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_deserializes_without_bbox() {
        let region: OcrRegion =
            serde_json::from_str(r#"{"text":"pump.fun/abc","confidence":0.91}"#).unwrap();
        assert_eq!(region.text, "pump.fun/abc");
        assert!(region.bbox.is_empty());
    }

    #[test]
    fn test_response_shape() {
        let body: OcrResponse = serde_json::from_str(
            r#"{"regions":[{"text":"hello","confidence":0.5,"bbox":[[0.0,0.0],[10.0,0.0]]}]}"#,
        )
        .unwrap();
        assert_eq!(body.regions.len(), 1);
        assert_eq!(body.regions[0].bbox.len(), 2);
    }
}
