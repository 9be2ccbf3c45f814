use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{JobId, JobStatus, StageStatus};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Client keep-alive sent over an open channel. The server ignores it.
pub const HEARTBEAT_FRAME: &str = r#"{"type":"ping"}"#;

/// Inbound frame as pushed on `/ws/call/{job_id}`. Anything whose `type` is
/// not one of these variants fails to decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressFrame {
    PipelineProgress(ProgressPayload),
    PipelineComplete(CompletePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressPayload {
    #[serde(default, alias = "job_id", skip_serializing_if = "Option::is_none")]
    pub call_id: Option<JobId>,
    pub stages: Vec<StageStatus>,
    pub progress_pct: f64,
    pub call_status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletePayload {
    #[serde(default, alias = "job_id", skip_serializing_if = "Option::is_none")]
    pub call_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_pct: Option<f64>,
    pub call_status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Typed event handed to the pipeline reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// More updates may follow.
    Progress(PipelineUpdate),
    /// No further updates will follow, whatever `job_status` says.
    Complete(PipelineUpdate),
}

/// Full snapshot carried by one event. `None` fields leave the current view
/// value in place; this only happens for complete frames and store snapshots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineUpdate {
    pub stages: Option<Vec<StageStatus>>,
    pub percentage: Option<f64>,
    pub job_status: JobStatus,
    pub error_message: Option<String>,
}

impl ProgressEvent {
    pub fn update(&self) -> &PipelineUpdate {
        match self {
            ProgressEvent::Progress(update) | ProgressEvent::Complete(update) => update,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ProgressEvent::Complete(_))
    }
}

impl ProgressFrame {
    pub fn call_id(&self) -> Option<&JobId> {
        match self {
            ProgressFrame::PipelineProgress(payload) => payload.call_id.as_ref(),
            ProgressFrame::PipelineComplete(payload) => payload.call_id.as_ref(),
        }
    }

    pub fn into_event(self) -> ProgressEvent {
        match self {
            ProgressFrame::PipelineProgress(payload) => ProgressEvent::Progress(PipelineUpdate {
                stages: Some(normalize_stages(payload.stages)),
                percentage: Some(payload.progress_pct),
                job_status: payload.call_status,
                error_message: None,
            }),
            ProgressFrame::PipelineComplete(payload) => ProgressEvent::Complete(PipelineUpdate {
                stages: payload.stages.map(normalize_stages),
                percentage: payload.progress_pct,
                job_status: payload.call_status,
                error_message: payload.error_message,
            }),
        }
    }
}

fn normalize_stages(stages: Vec<StageStatus>) -> Vec<StageStatus> {
    stages.into_iter().map(StageStatus::normalized).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame addressed to job {found}, subscription is for {expected}")]
    ForeignJob { expected: JobId, found: JobId },
}

pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

/// Decodes one push-channel frame for `job_id`. Every failure is a reason to
/// drop the frame; none of them is a channel fault.
pub fn decode_progress_frame(
    raw: &[u8],
    job_id: &JobId,
    max_frame_bytes: usize,
) -> Result<ProgressEvent, FrameError> {
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let frame: ProgressFrame =
        serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))?;
    if let Some(found) = frame.call_id() {
        if found != job_id {
            return Err(FrameError::ForeignJob {
                expected: job_id.clone(),
                found: found.clone(),
            });
        }
    }
    Ok(frame.into_event())
}
