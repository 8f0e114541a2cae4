use crate::error::{Result, StationError};
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use station_protocol::{response::ResistancePayload, EepromRecord, JudgeResult};
use tracing::{error, trace};

/// Everything the renderer needs to draw the judgment overlay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub capture_id: uuid::Uuid,
    pub judge_result: JudgeResult,
    pub eeprom: Option<EepromRecord>,

    /// Only present for multi-needle parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resistance: Option<ResistancePayload>,
}

/// Produces the annotated camera composite for a judged part.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Returns encoded image bytes (PNG).
    async fn capture_annotated_composite(&self, request: &SnapshotRequest) -> Result<Vec<u8>>;
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SnapshotResponse {
    image: String,
}

#[derive(Deserialize, Debug)]
struct RendererError {
    message: String,
}

/// Asks the display process for the composite over HTTP.
///
/// The renderer answers `{ "image": "<base64 png>" }`.
pub struct HttpSnapshotSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSnapshotSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SnapshotSink for HttpSnapshotSink {
    async fn capture_annotated_composite(&self, request: &SnapshotRequest) -> Result<Vec<u8>> {
        let res = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| StationError::Snapshot(format!("send error: {e}")))?;

        let success = res.status().is_success();
        let status_code = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        trace!("Snapshot response (SC: {status_code}): {} bytes", text.len());

        if !success {
            let message = serde_json::from_str::<RendererError>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            error!("Snapshot renderer error (SC: {status_code}): {message}");
            return Err(StationError::Snapshot(message));
        }

        decode_image(&text)
    }
}

fn decode_image(body: &str) -> Result<Vec<u8>> {
    let resp: SnapshotResponse = serde_json::from_str(body)?;
    base64::prelude::BASE64_STANDARD
        .decode(resp.image.trim())
        .map_err(|e| StationError::Snapshot(format!("invalid image payload: {e}")))
}
