use serde::Deserialize;
use std::time::Duration;

use crate::config::CloudinaryConfig;
use crate::errors::AppError;
use crate::signatures::sha256_hex;

const PRODUCT_FOLDER: &str = "vyapar/products";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Signed uploads to Cloudinary.
#[derive(Clone)]
pub struct MediaClient {
    client: reqwest::Client,
    base_url: String,
    credentials: CloudinaryConfig,
}

impl MediaClient {
    pub fn new(base_url: &str, credentials: CloudinaryConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Cloudinary client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Uploads an image given as a `data:` URI or a remote https URL and
    /// returns its hosted https URL.
    pub async fn upload_image(&self, file: &str) -> Result<String, AppError> {
        if !(file.starts_with("data:image/") || file.starts_with("https://")) {
            return Err(AppError::BadRequest(
                "Image must be a data:image URI or an https URL".to_string(),
            ));
        }

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = upload_signature(PRODUCT_FOLDER, &timestamp, &self.credentials.api_secret);
        let url = format!(
            "{}/v1_1/{}/image/upload",
            self.base_url, self.credentials.cloud_name
        );

        let form = [
            ("file", file),
            ("api_key", self.credentials.api_key.as_str()),
            ("timestamp", timestamp.as_str()),
            ("folder", PRODUCT_FOLDER),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Image upload failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Cloudinary returned {}: {}",
                status, error_text
            )));
        }

        let uploaded: UploadResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Cloudinary response: {}", e))
        })?;

        tracing::info!("✓ Image uploaded: {}", uploaded.secure_url);
        Ok(uploaded.secure_url)
    }
}

/// Parameters sorted by name, joined as a query string, secret appended.
pub fn upload_signature(folder: &str, timestamp: &str, api_secret: &str) -> String {
    let to_sign = format!("folder={}&timestamp={}{}", folder, timestamp, api_secret);
    sha256_hex(to_sign.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_covers_folder_and_timestamp() {
        let a = upload_signature("vyapar/products", "1700000000", "secret");
        assert_eq!(
            a,
            sha256_hex(b"folder=vyapar/products&timestamp=1700000000secret")
        );
        assert_ne!(a, upload_signature("vyapar/products", "1700000001", "secret"));
    }

    #[tokio::test]
    async fn rejects_non_image_payloads() {
        let client = MediaClient::new(
            "https://api.cloudinary.com",
            CloudinaryConfig {
                cloud_name: "demo".to_string(),
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
            },
        )
        .unwrap();
        let err = client.upload_image("ftp://example.com/a.png").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
