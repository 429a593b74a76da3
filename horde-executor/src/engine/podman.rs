//! Podman execution engine
//!
//! Runs each job as a single `podman run --rm` container:
//! - the job's volume directory is mounted at `/volume`
//! - the job's output directory is mounted at `/output`
//! - the container is force-removed if it outlives its timeout

use async_trait::async_trait;
use horde_core::domain::result::{ErrorType, ExecutionResult, JobError, MachineSpecs};
use horde_core::protocol::{InitialJobRequest, JobRequest, OutputUpload, Volume};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ExecutionEngine;

pub struct PodmanEngine {
    podman_binary: String,
    workspace_base: PathBuf,
    http: reqwest::Client,
}

impl PodmanEngine {
    /// Creates a new podman engine
    ///
    /// # Arguments
    /// * `podman_binary` - Name or path of the podman executable
    /// * `workspace_base` - Directory under which per-job workspaces are created
    pub fn new(podman_binary: String, workspace_base: PathBuf) -> Self {
        Self {
            podman_binary,
            workspace_base,
            http: reqwest::Client::new(),
        }
    }

    fn workspace(&self, job_uuid: Uuid) -> PathBuf {
        self.workspace_base.join(job_uuid.to_string())
    }

    fn volume_dir(&self, job_uuid: Uuid) -> PathBuf {
        self.workspace(job_uuid).join("volume")
    }

    fn output_dir(&self, job_uuid: Uuid) -> PathBuf {
        self.workspace(job_uuid).join("output")
    }

    fn container_name(job_uuid: Uuid) -> String {
        format!("horde-job-{}", job_uuid)
    }

    async fn ensure_workspace(&self, job_uuid: Uuid) -> Result<(), JobError> {
        for dir in [self.volume_dir(job_uuid), self.output_dir(job_uuid)] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                JobError::new("Failed to create job workspace")
                    .with_type(ErrorType::EngineFailure)
                    .with_detail(format!("{}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    async fn write_volume_file(&self, target: &Path, contents: &[u8]) -> Result<(), JobError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(volume_error)?;
        }
        tokio::fs::write(target, contents).await.map_err(volume_error)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Removes a container left behind by a timed out run
    async fn remove_container(&self, name: &str) {
        let removed = Command::new(&self.podman_binary)
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match removed {
            Ok(status) if status.success() => debug!("Removed container {}", name),
            Ok(status) => warn!("Removing container {} exited with {}", name, status),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

#[async_trait]
impl ExecutionEngine for PodmanEngine {
    async fn prepare_streaming(&self, initial: &InitialJobRequest) -> Option<String> {
        warn!(
            "Streaming requested for job {} but this engine has no streaming proxy",
            initial.job_uuid
        );
        None
    }

    async fn prepare_volumes(
        &self,
        initial: &InitialJobRequest,
        job: &JobRequest,
    ) -> Result<(), JobError> {
        self.ensure_workspace(job.job_uuid).await?;

        let Some(volume) = job.volume.as_ref().or(initial.volume.as_ref()) else {
            debug!("Job {} has no volume", job.job_uuid);
            return Ok(());
        };

        let target = resolve_relative(&self.volume_dir(job.job_uuid), volume.relative_path())?;

        match volume {
            Volume::Inline { contents, .. } => {
                self.write_volume_file(&target, contents.as_bytes()).await?;
            }
            Volume::SingleFile { url, .. } => {
                info!("Downloading volume for job {} from {}", job.job_uuid, url);
                let data = self.download(url).await.map_err(|e| {
                    JobError::new("Volume download failed")
                        .with_type(ErrorType::VolumeDownload)
                        .with_detail(e.to_string())
                })?;
                self.write_volume_file(&target, &data).await?;
            }
        }

        Ok(())
    }

    async fn run(&self, job: &JobRequest, timeout: Duration) -> Result<ExecutionResult, JobError> {
        let name = Self::container_name(job.job_uuid);
        let volume_dir = self.volume_dir(job.job_uuid);
        let output_dir = self.output_dir(job.job_uuid);

        let mut command = Command::new(&self.podman_binary);
        command
            .arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&name)
            .arg("-v")
            .arg(format!("{}:/volume", volume_dir.display()))
            .arg("-v")
            .arg(format!("{}:/output", output_dir.display()));

        for (key, value) in &job.env {
            command.arg("-e").arg(format!("{}={}", key, value));
        }

        command
            .arg(&job.docker_image)
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "Starting container {} from image {} (timeout: {:?})",
            name, job.docker_image, timeout
        );

        let mut child = command.spawn().map_err(|e| {
            JobError::new("Failed to start job container")
                .with_type(ErrorType::EngineFailure)
                .with_detail(e.to_string())
        })?;

        let stdout = OutputCapture::spawn(child.stdout.take());
        let stderr = OutputCapture::spawn(child.stderr.take());

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let return_code = status.code().unwrap_or(-1);
                info!("Container {} exited with code {}", name, return_code);
                Ok(ExecutionResult::completed(
                    return_code,
                    stdout.finish(OUTPUT_DRAIN_LIMIT).await,
                    stderr.finish(OUTPUT_DRAIN_LIMIT).await,
                ))
            }
            Ok(Err(e)) => Err(JobError::new("Failed to wait for job container")
                .with_type(ErrorType::EngineFailure)
                .with_detail(e.to_string())),
            Err(_) => {
                warn!("Container {} timed out after {:?}", name, timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill podman process for {}: {}", name, e);
                }
                self.remove_container(&name).await;
                Ok(ExecutionResult::timed_out(
                    stdout.finish(OUTPUT_DRAIN_LIMIT).await,
                    stderr.finish(OUTPUT_DRAIN_LIMIT).await,
                ))
            }
        }
    }

    async fn collect_artifacts(&self, job: &JobRequest) -> Result<HashMap<String, String>, JobError> {
        let mut artifacts = HashMap::new();

        let Some(artifacts_dir) = &job.artifacts_dir else {
            return Ok(artifacts);
        };

        let dir = resolve_relative(&self.output_dir(job.job_uuid), artifacts_dir)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("No artifacts for job {} in {}: {}", job.job_uuid, dir.display(), e);
                return Ok(artifacts);
            }
        };

        while let Some(entry) = entries.next_entry().await.map_err(artifact_error)? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let contents = tokio::fs::read(&path).await.map_err(artifact_error)?;
            artifacts.insert(
                entry.file_name().to_string_lossy().into_owned(),
                String::from_utf8_lossy(&contents).into_owned(),
            );
        }

        debug!("Collected {} artifact(s) for job {}", artifacts.len(), job.job_uuid);
        Ok(artifacts)
    }

    async fn upload_output(&self, job: &JobRequest) -> Result<HashMap<String, String>, JobError> {
        let mut results = HashMap::new();

        let Some(OutputUpload::SingleFilePut { url, relative_path }) = &job.output_upload else {
            return Ok(results);
        };

        let path = resolve_relative(&self.output_dir(job.job_uuid), relative_path)?;
        let body = tokio::fs::read(&path).await.map_err(|e| {
            JobError::new("Output file missing")
                .with_type(ErrorType::UploadFailed)
                .with_detail(format!("{}: {}", relative_path, e))
        })?;

        let response = self.http.put(url).body(body).send().await.map_err(|e| {
            JobError::new("Output upload failed")
                .with_type(ErrorType::UploadFailed)
                .with_detail(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(JobError::new("Output upload failed")
                .with_type(ErrorType::UploadFailed)
                .with_detail(format!("{} returned {}", url, status)));
        }

        results.insert(relative_path.clone(), status.as_u16().to_string());
        Ok(results)
    }

    fn machine_specs(&self) -> Option<MachineSpecs> {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Some(MachineSpecs {
            specs: serde_json::json!({
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "cpu": { "count": cpu_count },
            }),
        })
    }
}

/// How long to keep draining a pipe once the container process is gone
const OUTPUT_DRAIN_LIMIT: Duration = Duration::from_secs(1);

/// Accumulates one output pipe of the container as it is written,
/// so a timed out run still reports what it printed so far
struct OutputCapture {
    buffer: Arc<StdMutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(StdMutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => buffer
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            debug!("Stopped reading container output: {}", e);
                            break;
                        }
                    }
                }
            })
        });

        Self { buffer, reader }
    }

    /// Waits up to `limit` for the pipe to reach EOF, then returns everything read
    async fn finish(mut self, limit: Duration) -> String {
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(limit, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        let bytes = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Joins a peer-supplied relative path onto `base`, refusing anything that escapes it
fn resolve_relative(base: &Path, relative: &str) -> Result<PathBuf, JobError> {
    let relative = Path::new(relative.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

    if escapes {
        return Err(JobError::new("Refusing path outside the job workspace")
            .with_type(ErrorType::SecurityCheck)
            .with_detail(relative.display().to_string()));
    }

    Ok(base.join(relative))
}

fn volume_error(e: std::io::Error) -> JobError {
    JobError::new("Failed to write volume")
        .with_type(ErrorType::VolumeDownload)
        .with_detail(e.to_string())
}

fn artifact_error(e: std::io::Error) -> JobError {
    JobError::new("Failed to read artifacts")
        .with_type(ErrorType::EngineFailure)
        .with_detail(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::tests::{initial_request, job_request};

    fn engine() -> PodmanEngine {
        let base = std::env::temp_dir().join(format!("horde-engine-{}", Uuid::new_v4()));
        PodmanEngine::new("podman".to_string(), base)
    }

    #[test]
    fn test_resolve_relative() {
        let base = Path::new("/work");
        assert_eq!(
            resolve_relative(base, "data/input.txt").unwrap(),
            PathBuf::from("/work/data/input.txt")
        );
        assert_eq!(
            resolve_relative(base, "/input.txt").unwrap(),
            PathBuf::from("/work/input.txt")
        );

        let err = resolve_relative(base, "../etc/passwd").unwrap_err();
        assert_eq!(err.error_type, Some(ErrorType::SecurityCheck));
    }

    #[tokio::test]
    async fn test_inline_volume_written() {
        let engine = engine();
        let job_uuid = Uuid::new_v4();
        let mut job = job_request(job_uuid);
        job.volume = Some(Volume::Inline {
            relative_path: "nested/input.txt".to_string(),
            contents: "payload".to_string(),
        });

        engine
            .prepare_volumes(&initial_request(job_uuid), &job)
            .await
            .unwrap();

        let written = std::fs::read_to_string(
            engine.volume_dir(job_uuid).join("nested/input.txt"),
        )
        .unwrap();
        assert_eq!(written, "payload");
    }

    #[tokio::test]
    async fn test_initial_volume_used_when_payload_has_none() {
        let engine = engine();
        let job_uuid = Uuid::new_v4();
        let mut initial = initial_request(job_uuid);
        initial.volume = Some(Volume::Inline {
            relative_path: "early.txt".to_string(),
            contents: "early".to_string(),
        });

        engine
            .prepare_volumes(&initial, &job_request(job_uuid))
            .await
            .unwrap();

        assert!(engine.volume_dir(job_uuid).join("early.txt").exists());
    }

    #[tokio::test]
    async fn test_collect_artifacts() {
        let engine = engine();
        let job_uuid = Uuid::new_v4();
        let artifacts_dir = engine.output_dir(job_uuid).join("artifacts");
        std::fs::create_dir_all(&artifacts_dir).unwrap();
        std::fs::write(artifacts_dir.join("score.txt"), "0.93").unwrap();

        let mut job = job_request(job_uuid);
        job.artifacts_dir = Some("/artifacts".to_string());

        let artifacts = engine.collect_artifacts(&job).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts["score.txt"], "0.93");

        job.artifacts_dir = None;
        assert!(engine.collect_artifacts(&job).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_target_is_noop() {
        let engine = engine();
        let results = engine
            .upload_output(&job_request(Uuid::new_v4()))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    /// Writes a stand-in podman that prints on `run` and then hangs
    #[cfg(unix)]
    fn hanging_podman(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        std::fs::create_dir_all(dir).unwrap();
        let script = dir.join("podman");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = run ]; then\n  echo started\n  echo warming up >&2\n  sleep 30\nfi\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_run_keeps_partial_output() {
        let base = std::env::temp_dir().join(format!("horde-engine-{}", Uuid::new_v4()));
        let engine = PodmanEngine::new(hanging_podman(&base.join("bin")), base);

        let started = std::time::Instant::now();
        let result = engine
            .run(&job_request(Uuid::new_v4()), Duration::from_millis(500))
            .await
            .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.return_code, None);
        assert_eq!(result.stdout, "started\n");
        assert_eq!(result.stderr, "warming up\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_machine_specs_reported() {
        let specs = engine().machine_specs().unwrap();
        assert!(specs.specs["cpu"]["count"].as_u64().unwrap() >= 1);
    }
}
