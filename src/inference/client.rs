//! Face detection service client

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use super::emotion::EmotionScores;
use crate::InferenceConfig;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication rejected ({0})")]
    Auth(StatusCode),
    #[error("rate limited by the face service")]
    RateLimited,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FaceRectangle {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFace {
    pub face_rectangle: Option<FaceRectangle>,
    pub face_attributes: FaceAttributes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaceAttributes {
    pub emotion: EmotionScores,
}

/// Anything that turns an encoded still image into per-face emotion scores
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn detect(&self, image: Bytes) -> Result<Vec<DetectedFace>, ClassifierError>;
}

/// Client for the Face API `detect` endpoint
#[derive(Clone)]
pub struct FaceApiClient {
    detect_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl FaceApiClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        Ok(Self {
            detect_url: detect_url(&config.endpoint),
            api_key: config.api_key.clone().unwrap_or_default(),
            client,
        })
    }
}

/// Detection request: no face ID, no landmarks, emotion attributes only
pub fn detect_url(endpoint: &str) -> String {
    format!(
        "{}/face/v1.0/detect?returnFaceId=false&returnFaceLandmarks=false&returnFaceAttributes=emotion",
        endpoint.trim_end_matches('/')
    )
}

/// Map a response status and body to faces or an error
pub fn parse_response(status: StatusCode, body: &[u8]) -> Result<Vec<DetectedFace>, ClassifierError> {
    match status {
        s if s.is_success() => serde_json::from_slice(body)
            .map_err(|e| ClassifierError::MalformedResponse(e.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClassifierError::Auth(status)),
        StatusCode::TOO_MANY_REQUESTS => Err(ClassifierError::RateLimited),
        other => Err(ClassifierError::Network(format!(
            "status={} body={:?}",
            other,
            String::from_utf8_lossy(body)
        ))),
    }
}

#[async_trait]
impl Classifier for FaceApiClient {
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    async fn detect(&self, image: Bytes) -> Result<Vec<DetectedFace>, ClassifierError> {
        let resp = self
            .client
            .post(&self.detect_url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;
        debug!(%status, len = body.len(), "Face service responded");

        parse_response(status, &body)
    }
}
