//! AI-vision capability: locate an element on a screenshot from a textual
//! description, and describe a cropped element while recording.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::driver::Point;

#[derive(Debug, Error)]
pub enum VisionError {
    /// The backend cannot serve this request at all; skip the strategy
    #[error("vision backend unavailable: {0}")]
    Unavailable(String),
    /// A network or backend hiccup worth retrying
    #[error("vision request failed: {0}")]
    Transient(String),
}

#[async_trait]
pub trait VisionCapability: Send + Sync {
    /// Find the described element on a full-page PNG screenshot
    async fn locate(&self, screenshot: &[u8], description: &str) -> Result<Option<Point>, VisionError>;

    /// Produce a short description of a cropped element PNG
    async fn describe(&self, crop: &[u8]) -> Result<String, VisionError>;
}

#[derive(Debug, Serialize)]
struct LocateRequest<'a> {
    image: String,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct LocateResponse {
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
}

#[derive(Debug, Serialize)]
struct DescribeRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    description: String,
}

/// Vision backend reached over HTTP (`POST {endpoint}/locate`, `POST {endpoint}/describe`)
pub struct HttpVision {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpVision {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post<Req: Serialize + Sync, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, VisionError> {
        let url = format!("{}/{}", self.endpoint, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| VisionError::Transient(e.to_string()))?;

        classify_status(resp.status())?;

        resp.json::<Resp>()
            .await
            .map_err(|e| VisionError::Transient(format!("invalid response from {}: {}", url, e)))
    }
}

fn classify_status(status: reqwest::StatusCode) -> Result<(), VisionError> {
    use reqwest::StatusCode;

    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::NOT_IMPLEMENTED => {
            Err(VisionError::Unavailable(format!("backend answered {}", status)))
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Err(VisionError::Transient(format!("backend answered {}", s)))
        }
        s => Err(VisionError::Unavailable(format!("backend rejected request: {}", s))),
    }
}

#[async_trait]
impl VisionCapability for HttpVision {
    async fn locate(&self, screenshot: &[u8], description: &str) -> Result<Option<Point>, VisionError> {
        let body = LocateRequest {
            image: STANDARD.encode(screenshot),
            description,
        };
        let resp: LocateResponse = self.post("locate", &body).await?;
        Ok(match (resp.x, resp.y) {
            (Some(x), Some(y)) => Some(Point::new(x, y)),
            _ => None,
        })
    }

    async fn describe(&self, crop: &[u8]) -> Result<String, VisionError> {
        let body = DescribeRequest {
            image: STANDARD.encode(crop),
        };
        let resp: DescribeResponse = self.post("describe", &body).await?;
        Ok(resp.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_ok());
        assert!(matches!(
            classify_status(StatusCode::NOT_IMPLEMENTED),
            Err(VisionError::Unavailable(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Err(VisionError::Unavailable(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Err(VisionError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Err(VisionError::Transient(_))
        ));
    }

    #[test]
    fn test_locate_response_without_point() {
        let resp: LocateResponse = serde_json::from_str(r#"{"found": false}"#).unwrap();
        assert!(resp.x.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transient() {
        let vision = HttpVision::new("http://127.0.0.1:9/").unwrap();
        let err = vision.locate(&[0u8; 4], "Login button").await.unwrap_err();
        assert!(matches!(err, VisionError::Transient(_)));
    }
}
