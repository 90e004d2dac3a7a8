use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{MediaFile, MediaSource, TranscriptionService, UploadReceipt, UploadRequest};
use crate::config::ServiceConfig;
use crate::job::JobId;
use crate::utils::mime_for_extension;
use crate::JobError;

/// Transcription service reached over HTTP (`POST {base_url}/upload`)
pub struct HttpTranscriptionService {
    client: Client,
    upload_url: String,
}

/// Success body; the id is accepted as a string or a number
#[derive(Debug, Deserialize)]
struct RawReceipt {
    job_id: serde_json::Value,
    #[serde(default)]
    estimated_time: Option<f64>,
}

impl HttpTranscriptionService {
    pub fn new(config: &ServiceConfig) -> Result<Self, JobError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| JobError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            upload_url: format!("{}/upload", config.base_url.trim_end_matches('/')),
        })
    }
}

async fn file_part(file: &MediaFile) -> Result<Part, JobError> {
    let mime = file
        .extension()
        .map(|ext| mime_for_extension(&ext))
        .unwrap_or("application/octet-stream");

    let part = match &file.source {
        MediaSource::Bytes(bytes) => Part::bytes(bytes.clone()),
        MediaSource::Path(path) => {
            let handle = tokio::fs::File::open(path).await.map_err(|e| {
                JobError::Validation(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Part::stream_with_length(reqwest::Body::from(handle), file.size())
        }
    };

    part.file_name(file.name().to_string())
        .mime_str(mime)
        .map_err(|e| JobError::Validation(format!("Invalid MIME type {}: {}", mime, e)))
}

/// Diagnostic from an error body: `detail` when present, else a generic message
fn remote_detail(body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned());

    match detail {
        Some(serde_json::Value::String(message)) if !message.trim().is_empty() => message,
        Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {
            "Upload failed".to_string()
        }
        Some(other) => other.to_string(),
    }
}

fn parse_receipt(body: &str) -> Result<UploadReceipt, JobError> {
    let raw: RawReceipt = serde_json::from_str(body)
        .map_err(|e| JobError::Transport(format!("Unexpected upload response: {}", e)))?;

    let id = match raw.job_id {
        serde_json::Value::String(id) => id,
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(JobError::Transport(format!(
                "Unexpected job_id in upload response: {}",
                other
            )))
        }
    };

    let job_id = JobId::parse(&id).map_err(|_| {
        JobError::Transport(format!("Unexpected job_id in upload response: {:?}", id))
    })?;

    Ok(UploadReceipt {
        job_id,
        estimated_time: raw.estimated_time,
    })
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, JobError> {
        let mut form = Form::new()
            .part("file", file_part(&request.file).await?)
            .text("program_name", request.program_name.clone());

        if let Some(transcript) = &request.teach_transcript {
            form = form.part("teach_txt_file", file_part(transcript).await?);
        }
        if let Some(audio) = &request.teach_audio {
            form = form.part("teach_audio_file", file_part(audio).await?);
        }
        if let Some(speakers) = &request.speakers_json {
            form = form.text("speakers_json", speakers.clone());
        }

        let mut builder = self.client.post(&self.upload_url).multipart(form);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!("POST {}", self.upload_url);
        let response = builder
            .send()
            .await
            .map_err(|e| JobError::Transport(format!("Upload failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| JobError::Transport(format!("Failed to read upload response: {}", e)))?;

        if !status.is_success() {
            return Err(JobError::RemoteRejection {
                status: status.as_u16(),
                message: remote_detail(&body),
            });
        }

        parse_receipt(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;

    fn service_at(base_url: String) -> HttpTranscriptionService {
        HttpTranscriptionService::new(&ServiceConfig {
            base_url,
            ..ServiceConfig::default()
        })
        .unwrap()
    }

    fn anonymous_request(file: MediaFile) -> UploadRequest {
        UploadRequest {
            file,
            program_name: "Lecture 1".to_string(),
            teach_transcript: None,
            teach_audio: None,
            speakers_json: None,
            bearer: None,
        }
    }

    #[tokio::test]
    async fn test_upload_sends_form_fields_and_bearer() {
        let (base_url, server) = serve(vec![(
            200,
            r#"{"job_id":"job-9","estimated_time":4.5}"#.to_string(),
        )])
        .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lecture.mp4");
        std::fs::write(&path, b"fake video bytes").unwrap();

        let request = UploadRequest {
            teach_transcript: Some(MediaFile::from_bytes("style.srt", b"1\n".to_vec())),
            speakers_json: Some(r#"[{"id":"A","name":"Somchai","comment":""}]"#.to_string()),
            bearer: Some("tok-1".to_string()),
            ..anonymous_request(MediaFile::open(&path).await.unwrap())
        };

        let receipt = service_at(base_url).upload(&request).await.unwrap();
        assert_eq!(receipt.job_id.as_str(), "job-9");
        assert_eq!(receipt.estimated_time, Some(4.5));

        let requests = server.await.unwrap();
        let sent = &requests[0];
        assert_eq!(sent.request_line, "POST /upload HTTP/1.1");
        assert_eq!(sent.header("authorization"), Some("Bearer tok-1"));
        assert!(sent
            .header("content-type")
            .unwrap()
            .starts_with("multipart/form-data; boundary="));

        let body = sent.body_text();
        assert!(body.contains(r#"name="file"; filename="lecture.mp4""#));
        assert!(body.to_lowercase().contains("content-type: video/mp4"));
        assert!(body.contains("fake video bytes"));
        assert!(body.contains(r#"name="program_name""#));
        assert!(body.contains("Lecture 1"));
        assert!(body.contains(r#"name="teach_txt_file"; filename="style.srt""#));
        assert!(body.contains(r#"name="speakers_json""#));
        assert!(body.contains("Somchai"));
        assert!(!body.contains("teach_audio_file"));
    }

    #[tokio::test]
    async fn test_anonymous_upload_has_no_credential() {
        let (base_url, server) = serve(vec![(200, r#"{"job_id":7}"#.to_string())]).await;
        let request = anonymous_request(MediaFile::from_bytes("talk.wav", vec![1, 2, 3]));

        let receipt = service_at(base_url).upload(&request).await.unwrap();
        assert_eq!(receipt.job_id.as_str(), "7");
        assert_eq!(receipt.estimated_time, None);

        let requests = server.await.unwrap();
        assert!(requests[0].header("authorization").is_none());
        assert!(!requests[0].body_text().contains("speakers_json"));
    }

    #[tokio::test]
    async fn test_rejection_carries_remote_detail() {
        let (base_url, _server) =
            serve(vec![(422, r#"{"detail":"Unsupported codec"}"#.to_string())]).await;
        let request = anonymous_request(MediaFile::from_bytes("talk.wav", vec![0; 16]));

        match service_at(base_url).upload(&request).await.unwrap_err() {
            JobError::RemoteRejection { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Unsupported codec");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let request = anonymous_request(MediaFile::from_bytes("talk.wav", vec![0; 16]));
        let err = service_at(base_url).upload(&request).await.unwrap_err();
        assert!(matches!(err, JobError::Transport(_)));
    }

    #[test]
    fn test_upload_url() {
        let config = ServiceConfig {
            base_url: "http://localhost:7860/".to_string(),
            ..ServiceConfig::default()
        };
        let service = HttpTranscriptionService::new(&config).unwrap();
        assert_eq!(service.upload_url, "http://localhost:7860/upload");
    }

    #[test]
    fn test_remote_detail() {
        assert_eq!(remote_detail(r#"{"detail":"File too large"}"#), "File too large");
        assert_eq!(remote_detail(r#"{"detail":null}"#), "Upload failed");
        assert_eq!(remote_detail(r#"{"detail":""}"#), "Upload failed");
        assert_eq!(remote_detail(r#"{"detail":"  "}"#), "Upload failed");
        assert_eq!(remote_detail("<html>Bad Gateway</html>"), "Upload failed");
        assert_eq!(
            remote_detail(r#"{"detail":[{"loc":["body","file"],"msg":"field required"}]}"#),
            r#"[{"loc":["body","file"],"msg":"field required"}]"#
        );
    }

    #[test]
    fn test_parse_receipt() {
        let receipt = parse_receipt(r#"{"job_id":"9b2e","estimated_time":5}"#).unwrap();
        assert_eq!(receipt.job_id.as_str(), "9b2e");
        assert_eq!(receipt.estimated_time, Some(5.0));

        let numeric = parse_receipt(r#"{"job_id":42}"#).unwrap();
        assert_eq!(numeric.job_id.as_str(), "42");

        assert!(matches!(
            parse_receipt(r#"{"job_id":""}"#),
            Err(JobError::Transport(_))
        ));
        assert!(matches!(
            parse_receipt(r#"{"job_id":null}"#),
            Err(JobError::Transport(_))
        ));
        assert!(parse_receipt("not json").is_err());
    }

    #[tokio::test]
    async fn test_file_part_from_bytes() {
        let file = MediaFile::from_bytes("sample.srt", b"1\n00:00:00,000 --> 00:00:01,000\nhi\n".to_vec());
        assert!(file_part(&file).await.is_ok());
    }
}
