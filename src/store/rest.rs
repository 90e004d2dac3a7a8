use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::Arc;

use super::poll::{spawn_poll_feed, PollSchedule};
use super::{JobFeed, JobStore};
use crate::config::StoreConfig;
use crate::job::{Job, JobId};
use crate::JobError;

/// Job store served over a PostgREST-style HTTP API
#[derive(Clone)]
pub struct RestJobStore {
    client: Client,
    table_url: String,
    api_key: String,
    access_token: Option<String>,
    poll: Option<PollSchedule>,
}

/// Error body returned by the REST API
#[derive(Debug, Deserialize)]
struct RestErrorBody {
    message: Option<String>,
    hint: Option<String>,
}

impl RestJobStore {
    pub fn new(config: &StoreConfig, access_token: Option<String>) -> Result<Self, JobError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| JobError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            table_url: table_url(&config.url, &config.table),
            api_key: config.api_key.clone(),
            access_token,
            poll: config.poll_updates.then(|| config.poll_schedule()),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request.header("apikey", &self.api_key).bearer_auth(bearer)
    }

    fn job_filter(&self, id: &JobId) -> String {
        format!("{}?id=eq.{}", self.table_url, urlencoding::encode(id.as_str()))
    }

    async fn rows(&self, url: &str) -> Result<Vec<Job>, JobError> {
        let response = self.authorize(self.client.get(url)).send().await?;
        read_rows(response).await
    }
}

async fn read_rows(response: Response) -> Result<Vec<Job>, JobError> {
    check_status(response)
        .await?
        .json::<Vec<Job>>()
        .await
        .map_err(|e| JobError::Transport(format!("Failed to parse job rows: {}", e)))
}

/// `{base}/rest/v1/{table}` with any trailing slash on `base` ignored
fn table_url(base: &str, table: &str) -> String {
    format!("{}/rest/v1/{}", base.trim_end_matches('/'), table)
}

async fn check_status(response: Response) -> Result<Response, JobError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(JobError::RemoteRejection {
        status: status.as_u16(),
        message: rest_error_message(&body),
    })
}

fn rest_error_message(body: &str) -> String {
    match serde_json::from_str::<RestErrorBody>(body) {
        Ok(RestErrorBody {
            message: Some(message),
            hint,
        }) => match hint {
            Some(hint) => format!("{} ({})", message, hint),
            None => message,
        },
        _ if body.trim().is_empty() => "Job store request failed".to_string(),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl JobStore for RestJobStore {
    async fn fetch(&self, id: &JobId) -> Result<Job, JobError> {
        let url = format!("{}&select=*", self.job_filter(id));
        self.rows(&url)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    async fn set_owner(&self, id: &JobId, owner: &str) -> Result<(), JobError> {
        // only unowned, running jobs match; the store reports the rows it changed
        let url = format!(
            "{}&user_id=is.null&status=in.(processing,processing_audio)",
            self.job_filter(id)
        );
        let request = self
            .client
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "user_id": owner }));

        let response = self.authorize(request).send().await?;
        if !read_rows(response).await?.is_empty() {
            return Ok(());
        }

        let job = self.fetch(id).await?;
        if job.is_terminal() {
            return Err(JobError::Validation(format!(
                "job {} is {} and can no longer change owner",
                job.id, job.status
            )));
        }
        match job.owner.as_deref() {
            Some(current) if current == owner => Ok(()),
            Some(_) => Err(JobError::Validation(format!(
                "job {} already belongs to another user",
                job.id
            ))),
            None => Err(JobError::Validation(format!(
                "job {} is {} and cannot take an owner",
                job.id, job.status
            ))),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Job>, JobError> {
        let url = format!(
            "{}?select=*&order=created_at.desc&limit={}",
            self.table_url, limit
        );
        self.rows(&url).await
    }

    async fn subscribe(&self, id: &JobId) -> Option<JobFeed> {
        let schedule = self.poll?;
        tracing::debug!("Job store has no push channel, polling job {}", id);
        let store: Arc<dyn JobStore> = Arc::new(self.clone());
        Some(spawn_poll_feed(store, id.clone(), schedule))
    }
}
