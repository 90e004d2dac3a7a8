//! Submission orchestrator
//!
//! Validates a submission locally, turns it into an upload request for the transcription
//! service, and stamps the created job with its owner when a caller identity is known.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::job::{JobId, JobStatus, Speaker};
use crate::store::JobStore;
use crate::utils::{file_extension, file_stem, format_file_size};
use crate::JobError;

pub mod http;

pub use http::HttpTranscriptionService;

/// A file selected for upload
#[derive(Debug, Clone)]
pub struct MediaFile {
    name: String,
    size: u64,
    source: MediaSource,
}

#[derive(Debug, Clone)]
enum MediaSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl MediaFile {
    /// Reference a file on disk; its content is read only when the upload is sent
    pub async fn open(path: &Path) -> Result<Self, JobError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            JobError::Validation(format!("Cannot access file {}: {}", path.display(), e))
        })?;

        if !metadata.is_file() {
            return Err(JobError::Validation(format!(
                "Path is not a file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                JobError::Validation(format!("File name is not valid UTF-8: {}", path.display()))
            })?
            .to_string();

        Ok(Self {
            name,
            size: metadata.len(),
            source: MediaSource::Path(path.to_path_buf()),
        })
    }

    /// In-memory file
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            source: MediaSource::Bytes(bytes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }
}

/// Everything a user hands in for one job
#[derive(Debug, Clone)]
pub struct Submission {
    pub file: MediaFile,
    pub program_name: String,
    pub teach_transcript: Option<MediaFile>,
    pub teach_audio: Option<MediaFile>,
    pub speakers: Vec<Speaker>,
}

impl Submission {
    /// Start a submission; the program name defaults to the file name without extension
    pub fn new(file: MediaFile) -> Self {
        let program_name = file_stem(file.name()).unwrap_or_default();
        Self {
            file,
            program_name,
            teach_transcript: None,
            teach_audio: None,
            speakers: Vec::new(),
        }
    }

    pub fn with_program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    pub fn with_teach_transcript(mut self, file: MediaFile) -> Self {
        self.teach_transcript = Some(file);
        self
    }

    pub fn with_teach_audio(mut self, file: MediaFile) -> Self {
        self.teach_audio = Some(file);
        self
    }

    pub fn with_speakers(mut self, speakers: Vec<Speaker>) -> Self {
        self.speakers = speakers;
        self
    }
}

/// Identity of the signed-in caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub access_token: String,
    pub user_id: Option<String>,
}

/// Limits checked before anything is sent
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_upload_bytes: u64,
    pub media_extensions: Vec<String>,
    pub transcript_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
}

impl From<&ServiceConfig> for UploadLimits {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            media_extensions: config.media_extensions.clone(),
            transcript_extensions: config.transcript_extensions.clone(),
            audio_extensions: config.audio_extensions.clone(),
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

/// The upload as it goes over the wire
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: MediaFile,
    pub program_name: String,
    pub teach_transcript: Option<MediaFile>,
    pub teach_audio: Option<MediaFile>,
    /// JSON array of `{id, name, comment}`; absent when no speaker was given
    pub speakers_json: Option<String>,
    pub bearer: Option<String>,
}

/// Successful answer of the transcription service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    pub job_id: JobId,
    /// Estimated processing time in minutes
    #[serde(default)]
    pub estimated_time: Option<f64>,
}

/// What the caller gets back from a submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub job_id: JobId,
    pub estimated_minutes: Option<f64>,
    /// Status a freshly created job starts in
    pub initial_status: JobStatus,
    pub owner_stamped: bool,
}

/// Remote transcription service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Send one upload; returns the created job's id
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, JobError>;
}

/// Builds and sends submissions
pub struct Submitter {
    service: Arc<dyn TranscriptionService>,
    store: Option<Arc<dyn JobStore>>,
    limits: UploadLimits,
}

impl Submitter {
    pub fn new(service: Arc<dyn TranscriptionService>, limits: UploadLimits) -> Self {
        Self {
            service,
            store: None,
            limits,
        }
    }

    /// Job store used to stamp ownership; submissions work without one
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Check a submission against the upload limits
    pub fn validate(&self, submission: &Submission) -> Result<(), JobError> {
        let file = &submission.file;
        if file.size() == 0 {
            return Err(JobError::Validation(format!("File is empty: {}", file.name())));
        }
        if file.size() > self.limits.max_upload_bytes {
            return Err(JobError::Validation(format!(
                "File {} is {} which exceeds the {} limit",
                file.name(),
                format_file_size(file.size()),
                format_file_size(self.limits.max_upload_bytes)
            )));
        }
        check_extension(file, &self.limits.media_extensions, "media file")?;

        if submission.program_name.trim().is_empty() {
            return Err(JobError::Validation("Program name must not be blank".to_string()));
        }

        if let Some(transcript) = &submission.teach_transcript {
            check_extension(transcript, &self.limits.transcript_extensions, "sample transcript")?;
        }
        if let Some(audio) = &submission.teach_audio {
            check_extension(audio, &self.limits.audio_extensions, "sample audio")?;
        }

        Ok(())
    }

    /// Turn a validated submission into the wire request
    pub fn build_request(
        &self,
        submission: Submission,
        identity: Option<&CallerIdentity>,
    ) -> Result<UploadRequest, JobError> {
        self.validate(&submission)?;

        Ok(UploadRequest {
            speakers_json: speakers_json(&submission.speakers)?,
            program_name: submission.program_name.trim().to_string(),
            file: submission.file,
            teach_transcript: submission.teach_transcript,
            teach_audio: submission.teach_audio,
            bearer: identity.map(|id| id.access_token.clone()),
        })
    }

    /// Send a submission and return the created job's id without waiting for it
    pub async fn submit(
        &self,
        submission: Submission,
        identity: Option<&CallerIdentity>,
    ) -> Result<SubmissionReceipt, JobError> {
        let request = self.build_request(submission, identity)?;

        tracing::info!(
            "Submitting {} ({}) as \"{}\"",
            request.file.name(),
            format_file_size(request.file.size()),
            request.program_name
        );

        let receipt = self.service.upload(&request).await?;
        tracing::info!("Job {} created", receipt.job_id);

        let owner = identity.and_then(|id| id.user_id.as_deref());
        let owner_stamped = match owner {
            Some(owner) => self.stamp_owner(&receipt.job_id, owner).await,
            None => false,
        };

        Ok(SubmissionReceipt {
            job_id: receipt.job_id,
            estimated_minutes: receipt.estimated_time,
            initial_status: JobStatus::Processing,
            owner_stamped,
        })
    }

    /// Best effort: a failure here never fails the submission
    async fn stamp_owner(&self, job_id: &JobId, owner: &str) -> bool {
        let Some(store) = &self.store else {
            tracing::debug!("No job store configured, job {} left without owner", job_id);
            return false;
        };

        match store.set_owner(job_id, owner).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to set owner of job {}: {}", job_id, e);
                false
            }
        }
    }
}

fn check_extension(file: &MediaFile, allowed: &[String], what: &str) -> Result<(), JobError> {
    match file.extension() {
        Some(ext) if allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) => Ok(()),
        _ => Err(JobError::Validation(format!(
            "Unsupported {} {} (accepted: {})",
            what,
            file.name(),
            allowed.join(", ")
        ))),
    }
}

/// Serialize speakers in the given order, skipping ones without id or name.
///
/// Entries sharing an id are all kept.
pub fn speakers_json(speakers: &[Speaker]) -> Result<Option<String>, JobError> {
    let complete: Vec<&Speaker> = speakers.iter().filter(|s| s.is_complete()).collect();
    if complete.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&complete)
        .map(Some)
        .map_err(|e| JobError::Validation(format!("Failed to serialize speakers: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;

    const MB: u64 = 1024 * 1024;

    fn sparse_file(dir: &tempfile::TempDir, name: &str, len: u64) -> PathBuf {
        let path = dir.path().join(name);
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(len).unwrap();
        path
    }

    fn speaker(id: &str, name: &str, comment: &str) -> Speaker {
        Speaker {
            id: id.to_string(),
            name: name.to_string(),
            comment: comment.to_string(),
        }
    }

    fn identity() -> CallerIdentity {
        CallerIdentity {
            access_token: "token-abc".to_string(),
            user_id: Some("user-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_submit_creates_processing_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = sparse_file(&dir, "lecture.mp4", 50 * MB);
        let store = Arc::new(MemoryJobStore::new());

        let backend = store.clone();
        let mut service = MockTranscriptionService::new();
        service
            .expect_upload()
            .withf(|req| {
                req.program_name == "Lecture 1"
                    && req.speakers_json.is_none()
                    && req.teach_transcript.is_none()
                    && req.bearer.is_none()
            })
            .times(1)
            .returning(move |req| {
                let job = backend.create(req.file.name(), &req.program_name, req.file.size());
                Ok(UploadReceipt {
                    job_id: job.id,
                    estimated_time: Some(4.0),
                })
            });

        let submitter =
            Submitter::new(Arc::new(service), UploadLimits::default()).with_store(store.clone());
        let submission = Submission::new(MediaFile::open(&path).await.unwrap())
            .with_program_name("Lecture 1");

        let receipt = submitter.submit(submission, None).await.unwrap();
        assert!(!receipt.job_id.as_str().is_empty());
        assert_eq!(receipt.initial_status, JobStatus::Processing);
        assert_eq!(receipt.estimated_minutes, Some(4.0));
        assert!(!receipt.owner_stamped);

        let job = store.fetch(&receipt.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.file_size, Some(50 * MB));
    }

    #[tokio::test]
    async fn test_oversized_file_never_reaches_service() {
        let dir = tempfile::tempdir().unwrap();
        let path = sparse_file(&dir, "big.mp4", 210 * MB);

        let mut service = MockTranscriptionService::new();
        service.expect_upload().never();

        let submitter = Submitter::new(Arc::new(service), UploadLimits::default());
        let submission = Submission::new(MediaFile::open(&path).await.unwrap());

        let err = submitter.submit(submission, None).await.unwrap_err();
        assert!(matches!(err, JobError::Validation(_)), "{:?}", err);
    }

    #[test]
    fn test_validation_rules() {
        let submitter = Submitter::new(
            Arc::new(MockTranscriptionService::new()),
            UploadLimits::default(),
        );
        let ok = Submission::new(MediaFile::from_bytes("talk.wav", vec![1, 2, 3]));
        assert!(submitter.validate(&ok).is_ok());
        assert_eq!(ok.program_name, "talk");

        let empty = Submission::new(MediaFile::from_bytes("talk.wav", Vec::new()));
        assert!(submitter.validate(&empty).is_err());

        let blank_name = ok.clone().with_program_name("   ");
        assert!(submitter.validate(&blank_name).is_err());

        let wrong_type = Submission::new(MediaFile::from_bytes("slides.pdf", vec![1]));
        assert!(submitter.validate(&wrong_type).is_err());

        let upper_case = Submission::new(MediaFile::from_bytes("TALK.MP3", vec![1]));
        assert!(submitter.validate(&upper_case).is_ok());

        let bad_transcript = ok
            .clone()
            .with_teach_transcript(MediaFile::from_bytes("sample.docx", vec![1]));
        assert!(submitter.validate(&bad_transcript).is_err());

        let video_as_teach_audio = ok
            .clone()
            .with_teach_audio(MediaFile::from_bytes("sample.mp4", vec![1]));
        assert!(submitter.validate(&video_as_teach_audio).is_err());

        let full = ok
            .with_teach_transcript(MediaFile::from_bytes("sample.srt", vec![1]))
            .with_teach_audio(MediaFile::from_bytes("sample.flac", vec![1]));
        assert!(submitter.validate(&full).is_ok());
    }

    #[test]
    fn test_speakers_keep_duplicates_in_order() {
        let speakers = vec![
            speaker("A", "Somchai", "host"),
            speaker("A", "Suda", "guest"),
        ];
        let json = speakers_json(&speakers).unwrap().unwrap();
        let parsed: Vec<Speaker> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, speakers);
    }

    #[test]
    fn test_incomplete_speakers_are_dropped() {
        let speakers = vec![
            speaker("", "Nameless", ""),
            speaker("B", "", ""),
            speaker("  ", "Spaces", ""),
            speaker("D", " ", ""),
            speaker("C", "Chai", "narrator"),
        ];
        let json = speakers_json(&speakers).unwrap().unwrap();
        let parsed: Vec<Speaker> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vec![speaker("C", "Chai", "narrator")]);

        assert_eq!(speakers_json(&speakers[..4]).unwrap(), None);
    }

    #[tokio::test]
    async fn test_identity_sets_bearer_and_owner() {
        let store = Arc::new(MemoryJobStore::new());
        let backend = store.clone();
        let mut service = MockTranscriptionService::new();
        service
            .expect_upload()
            .withf(|req| req.bearer.as_deref() == Some("token-abc"))
            .times(1)
            .returning(move |req| {
                let job = backend.create(req.file.name(), &req.program_name, req.file.size());
                Ok(UploadReceipt {
                    job_id: job.id,
                    estimated_time: None,
                })
            });

        let submitter =
            Submitter::new(Arc::new(service), UploadLimits::default()).with_store(store.clone());
        let submission = Submission::new(MediaFile::from_bytes("talk.wav", vec![0; 16]));
        let receipt = submitter.submit(submission, Some(&identity())).await.unwrap();

        assert!(receipt.owner_stamped);
        let job = store.fetch(&receipt.job_id).await.unwrap();
        assert_eq!(job.owner.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_owner_stamp_failure_does_not_fail_submission() {
        // the service answers with an id the store has never seen
        let mut service = MockTranscriptionService::new();
        service.expect_upload().times(1).returning(|_| {
            Ok(UploadReceipt {
                job_id: JobId::parse("unknown-to-store").unwrap(),
                estimated_time: None,
            })
        });

        let submitter = Submitter::new(Arc::new(service), UploadLimits::default())
            .with_store(Arc::new(MemoryJobStore::new()));
        let submission = Submission::new(MediaFile::from_bytes("talk.wav", vec![0; 16]));
        let receipt = submitter.submit(submission, Some(&identity())).await.unwrap();

        assert_eq!(receipt.job_id.as_str(), "unknown-to-store");
        assert!(!receipt.owner_stamped);
    }

    #[tokio::test]
    async fn test_remote_rejection_is_surfaced() {
        let mut service = MockTranscriptionService::new();
        service.expect_upload().times(1).returning(|_| {
            Err(JobError::RemoteRejection {
                status: 400,
                message: "Unsupported codec".to_string(),
            })
        });

        let submitter = Submitter::new(Arc::new(service), UploadLimits::default());
        let submission = Submission::new(MediaFile::from_bytes("talk.wav", vec![0; 16]));
        let err = submitter.submit(submission, None).await.unwrap_err();

        assert!(err.is_submission_failure());
        assert!(err.to_string().contains("Unsupported codec"));
    }
}
