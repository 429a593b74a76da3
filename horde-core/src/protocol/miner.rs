//! Miner → executor messages

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::GenericError;

/// Everything a miner may send to its executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum MinerToExecutorMessage {
    #[serde(rename = "V0InitialJobRequest")]
    InitialJobRequest(InitialJobRequest),
    #[serde(rename = "V0JobRequest")]
    JobRequest(JobRequest),
    #[serde(rename = "GenericError")]
    GenericError(GenericError),
}

impl MinerToExecutorMessage {
    pub fn job_uuid(&self) -> Option<Uuid> {
        match self {
            Self::InitialJobRequest(msg) => Some(msg.job_uuid),
            Self::JobRequest(msg) => Some(msg.job_uuid),
            Self::GenericError(_) => None,
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::InitialJobRequest(_) => "V0InitialJobRequest",
            Self::JobRequest(_) => "V0JobRequest",
            Self::GenericError(_) => "GenericError",
        }
    }
}

/// Job specification, sent before the payload so the executor can provision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialJobRequest {
    pub job_uuid: Uuid,
    pub executor_class: String,
    pub docker_image: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Volume known ahead of the payload, fetched while provisioning
    #[serde(default)]
    pub volume: Option<Volume>,
    /// Present when the validator wants a streaming-capable environment
    #[serde(default)]
    pub streaming_details: Option<StreamingDetails>,
}

/// Full executable payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_uuid: Uuid,
    pub docker_image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub volume: Option<Volume>,
    #[serde(default)]
    pub output_upload: Option<OutputUpload>,
    /// Directory inside `/output` whose files are returned as artifacts
    #[serde(default)]
    pub artifacts_dir: Option<String>,
}

/// Client certificate used to authenticate the streaming connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingDetails {
    pub public_key: String,
    #[serde(default)]
    pub executor_ip: Option<String>,
}

/// Input data mounted at `/volume` inside the job container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "volume_type", rename_all = "snake_case")]
pub enum Volume {
    Inline {
        relative_path: String,
        contents: String,
    },
    SingleFile {
        url: String,
        relative_path: String,
    },
}

impl Volume {
    pub fn relative_path(&self) -> &str {
        match self {
            Volume::Inline { relative_path, .. } | Volume::SingleFile { relative_path, .. } => {
                relative_path
            }
        }
    }
}

/// Where the job's output file is shipped once it succeeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "output_upload_type", rename_all = "snake_case")]
pub enum OutputUpload {
    SingleFilePut { url: String, relative_path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_request_discriminator() {
        let job_uuid = Uuid::new_v4();
        let msg = MinerToExecutorMessage::InitialJobRequest(InitialJobRequest {
            job_uuid,
            executor_class: "spin_up-4min.gpu-24gb".to_string(),
            docker_image: "alpine:latest".to_string(),
            timeout_seconds: Some(60),
            volume: None,
            streaming_details: None,
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["message_type"], "V0InitialJobRequest");
        assert_eq!(json["job_uuid"], job_uuid.to_string());
        assert_eq!(msg.message_type(), "V0InitialJobRequest");
        assert_eq!(msg.job_uuid(), Some(job_uuid));
    }

    #[test]
    fn test_job_request_defaults() {
        let job_uuid = Uuid::new_v4();
        let raw = format!(
            r#"{{"message_type":"V0JobRequest","job_uuid":"{job_uuid}","docker_image":"alpine"}}"#
        );
        let msg: MinerToExecutorMessage = serde_json::from_str(&raw).unwrap();
        match msg {
            MinerToExecutorMessage::JobRequest(req) => {
                assert_eq!(req.job_uuid, job_uuid);
                assert!(req.args.is_empty());
                assert!(req.env.is_empty());
                assert!(req.volume.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_volume_tagging() {
        let volume = Volume::SingleFile {
            url: "https://example.com/data.bin".to_string(),
            relative_path: "data.bin".to_string(),
        };
        let json = serde_json::to_value(&volume).unwrap();
        assert_eq!(json["volume_type"], "single_file");
        assert_eq!(volume.relative_path(), "data.bin");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = r#"{"message_type":"V0JobAcceptedReceipt","job_uuid":"x"}"#;
        assert!(serde_json::from_str::<MinerToExecutorMessage>(raw).is_err());
    }
}
