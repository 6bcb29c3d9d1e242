use crate::capture::CroppedImage;
use crate::config::Config;
use failure::Error;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use url::Url;

/// Client for an OCR.space-compatible `parse/image` endpoint.
#[derive(Clone)]
pub struct OcrClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    language: String,
}

impl OcrClient {
    pub fn new(config: &Config) -> OcrClient {
        OcrClient {
            client: reqwest::Client::new(),
            endpoint: config.ocr_url.clone(),
            api_key: config.ocr_api_key.clone(),
            language: config.ocr_language.clone(),
        }
    }

    /// Uploads the image and returns the recognized text, which may be empty.
    pub async fn recognize(&self, image: &CroppedImage) -> Result<String, Error> {
        info!(
            "Submitting {}x{} capture ({} bytes, quality {}) for OCR",
            image.width,
            image.height,
            image.bytes.len(),
            image.quality
        );
        let file = Part::bytes(image.bytes.clone())
            .file_name("capture.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new()
            .part("file", file)
            .text("language", self.language.clone());
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("apikey", self.api_key.as_str())
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!(
                "OCR service returned {}: {}",
                status,
                response.text().await.unwrap_or_default()
            );
        }
        let json: Value = response.json().await?;
        let text = parsed_text(&json)?;
        debug!("OCR returned {:?}", text);
        Ok(text)
    }
}

/// Pulls the recognized text out of an OCR.space response body.
pub fn parsed_text(json: &Value) -> Result<String, Error> {
    if json["IsErroredOnProcessing"].as_bool() == Some(true) {
        let message = match &json["ErrorMessage"] {
            Value::String(s) => s.clone(),
            Value::Array(lines) => lines
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            _ => "unknown error".to_string(),
        };
        bail!("OCR processing failed: {}", message);
    }
    Ok(json["ParsedResults"][0]["ParsedText"]
        .as_str()
        .unwrap_or("")
        .to_string())
}
