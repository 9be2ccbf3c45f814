use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub mod batch;
pub mod pipeline;
pub mod progress_wire;
pub mod snapshot;

/// Opaque job identifier. The store hands out integers; the client never
/// interprets them, so both JSON strings and numbers are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = serde_json::Value::deserialize(deserializer)?;
        match val {
            serde_json::Value::String(s) => Ok(JobId(s)),
            serde_json::Value::Number(n) => Ok(JobId(n.to_string())),
            _ => Err(serde::de::Error::custom("expected string or number for job id")),
        }
    }
}

/// Job-level status as reported by the job store. Values outside the known
/// vocabulary are preserved verbatim and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Other(String),
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Other(raw) => raw.as_str(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        Ok(match normalized.as_str() {
            "queued" => JobStatus::Queued,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Other(input.trim().to_string()),
        })
    }
}

impl From<&str> for JobStatus {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl Serialize for JobStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(JobStatus::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Completed => "completed",
            StageState::Failed => "failed",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline step as reported by the push server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageStatus {
    #[serde(rename = "stage")]
    pub stage_id: String,
    #[serde(rename = "label", default)]
    pub display_label: String,
    #[serde(rename = "status")]
    pub state: StageState,
    #[serde(rename = "error", default)]
    pub error_detail: Option<String>,
}

impl StageStatus {
    pub fn new(stage_id: impl Into<String>, label: impl Into<String>, state: StageState) -> Self {
        Self {
            stage_id: stage_id.into(),
            display_label: label.into(),
            state,
            error_detail: None,
        }
    }

    /// Drops an error detail that arrived on a stage that did not fail.
    pub fn normalized(mut self) -> Self {
        if self.state != StageState::Failed {
            self.error_detail = None;
        }
        self
    }

    pub fn label(&self) -> &str {
        if self.display_label.is_empty() {
            &self.stage_id
        } else {
            &self.display_label
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_accepts_numbers_and_strings() {
        let numeric: JobId = serde_json::from_str("42").expect("numeric id");
        let text: JobId = serde_json::from_str("\"42\"").expect("string id");
        assert_eq!(numeric, text);
        assert_eq!(numeric.to_string(), "42");
        assert!(serde_json::from_str::<JobId>("true").is_err());
    }

    #[test]
    fn job_status_keeps_unknown_values_non_terminal() {
        let status: JobStatus = serde_json::from_str("\"unknown\"").expect("status");
        assert_eq!(status, JobStatus::Other("unknown".to_string()));
        assert!(!status.is_terminal());
        assert_eq!(status.as_str(), "unknown");

        assert!(JobStatus::from("Completed").is_terminal());
        assert!(JobStatus::from("failed").is_terminal());
        assert!(!JobStatus::from("processing").is_terminal());
    }

    #[test]
    fn stage_status_uses_wire_field_names() {
        let stage: StageStatus = serde_json::from_str(
            r#"{"stage":"vad","label":"Voice Activity Detection","status":"failed","error":"no speech"}"#,
        )
        .expect("stage");
        assert_eq!(stage.stage_id, "vad");
        assert_eq!(stage.label(), "Voice Activity Detection");
        assert_eq!(stage.state, StageState::Failed);
        assert_eq!(stage.error_detail.as_deref(), Some("no speech"));

        let bare: StageStatus =
            serde_json::from_str(r#"{"stage":"vad","status":"running","error":"stale"}"#)
                .expect("bare stage");
        assert_eq!(bare.label(), "vad");
        assert_eq!(bare.normalized().error_detail, None);
    }
}
