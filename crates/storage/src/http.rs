//! REST adapter for the question, attempt and autosave stores.
//!
//! Endpoint base and request nonce come from an explicit [`ApiConfig`] rather than
//! process-wide globals, so several clients can target different backends.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use quiz_core::model::{
    AttemptId, AttemptRef, AttemptResult, AutosaveSnapshot, Question, QuestionId, QuizId,
    SubmissionRecord, UserId,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::repository::{AttemptStore, AutosaveStore, QuestionStore, Storage, StorageError};

/// Header carrying the per-session request nonce.
pub const NONCE_HEADER: &str = "X-Quiz-Nonce";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiConfigError {
    #[error("QUIZ_API_BASE_URL is not set")]
    MissingBaseUrl,
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Endpoint base and credentials for the REST backend.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    base_url: Url,
    nonce: Option<String>,
}

impl ApiConfig {
    /// Validate and build a config.
    ///
    /// # Errors
    ///
    /// Returns `ApiConfigError::InvalidBaseUrl` if `base_url` does not parse.
    pub fn new(base_url: &str, nonce: Option<String>) -> Result<Self, ApiConfigError> {
        // A trailing slash makes `Url::join` append instead of replacing the last segment.
        let normalized = format!("{}/", base_url.trim().trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|_| ApiConfigError::InvalidBaseUrl(base_url.to_string()))?;
        let nonce = nonce
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Ok(Self { base_url, nonce })
    }

    /// Read `QUIZ_API_BASE_URL` and `QUIZ_API_NONCE`.
    ///
    /// # Errors
    ///
    /// Returns `ApiConfigError` if the base URL is missing or invalid.
    pub fn from_env() -> Result<Self, ApiConfigError> {
        let base_url = env::var("QUIZ_API_BASE_URL").map_err(|_| ApiConfigError::MissingBaseUrl)?;
        Self::new(&base_url, env::var("QUIZ_API_NONCE").ok())
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    fn endpoint(&self, path: &str) -> Result<Url, StorageError> {
        self.base_url
            .join(path)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[derive(Clone)]
pub struct RestApiClient {
    client: Client,
    config: ApiConfig,
}

impl Storage {
    /// Build a `Storage` whose three stores share one REST client.
    #[must_use]
    pub fn rest(config: ApiConfig) -> Self {
        let client = RestApiClient::new(config);
        let questions: Arc<dyn QuestionStore> = Arc::new(client.clone());
        let attempts: Arc<dyn AttemptStore> = Arc::new(client.clone());
        let autosave: Arc<dyn AutosaveStore> = Arc::new(client);
        Self {
            questions,
            attempts,
            autosave,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedAttempt {
    attempt_id: AttemptId,
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    answers: &'a SubmissionRecord,
}

#[derive(Debug, Deserialize)]
struct ScoredAttempt {
    score: u32,
    max_score: u32,
    correct: usize,
    total: usize,
}

impl RestApiClient {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn with_nonce(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.nonce() {
            Some(nonce) => request.header(NONCE_HEADER, nonce),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StorageError> {
        self.with_nonce(request)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn questions_url(&self, ids: &[QuestionId]) -> Result<Url, StorageError> {
        let mut url = self.config.endpoint("questions")?;
        let joined = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        url.query_pairs_mut().append_pair("ids", &joined);
        Ok(url)
    }

    fn autosave_url(&self, user_id: UserId, quiz_id: QuizId) -> Result<Url, StorageError> {
        let mut url = self.config.endpoint(&format!("quizzes/{quiz_id}/autosave"))?;
        url.query_pairs_mut()
            .append_pair("user", &user_id.to_string());
        Ok(url)
    }
}

fn status_error(status: StatusCode) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound,
        StatusCode::CONFLICT => StorageError::Conflict,
        s if s.is_client_error() => StorageError::Rejected(s.to_string()),
        s => StorageError::Connection(format!("unexpected status {s}")),
    }
}

async fn json_body<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, StorageError> {
    response
        .json::<T>()
        .await
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

#[async_trait]
impl QuestionStore for RestApiClient {
    async fn fetch(&self, ids: &[QuestionId]) -> Result<Vec<Question>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.send(self.client.get(self.questions_url(ids)?)).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }
        json_body(response).await
    }
}

#[async_trait]
impl AttemptStore for RestApiClient {
    async fn create(&self, quiz_id: QuizId) -> Result<AttemptId, StorageError> {
        let url = self.config.endpoint(&format!("quizzes/{quiz_id}/attempts"))?;
        let response = self.send(self.client.post(url)).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }
        let created: CreatedAttempt = json_body(response).await?;
        Ok(created.attempt_id)
    }

    async fn submit(
        &self,
        attempt_id: AttemptId,
        record: &SubmissionRecord,
    ) -> Result<AttemptResult, StorageError> {
        let url = self
            .config
            .endpoint(&format!("attempts/{attempt_id}/submit"))?;
        let response = self
            .send(self.client.post(url).json(&SubmitBody { answers: record }))
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }
        let scored: ScoredAttempt = json_body(response).await?;
        Ok(AttemptResult {
            attempt: AttemptRef::Graded(attempt_id),
            score: scored.score,
            max_score: scored.max_score,
            correct: scored.correct,
            total: scored.total,
            duration_secs: None,
        })
    }
}

#[async_trait]
impl AutosaveStore for RestApiClient {
    async fn get(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
    ) -> Result<Option<AutosaveSnapshot>, StorageError> {
        let response = self
            .send(self.client.get(self.autosave_url(user_id, quiz_id)?))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            s if s.is_success() => json_body(response).await.map(Some),
            s => Err(status_error(s)),
        }
    }

    async fn save(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
        snapshot: &AutosaveSnapshot,
    ) -> Result<(), StorageError> {
        let response = self
            .send(
                self.client
                    .put(self.autosave_url(user_id, quiz_id)?)
                    .json(snapshot),
            )
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response.status()));
        }
        Ok(())
    }

    async fn delete(&self, user_id: UserId, quiz_id: QuizId) -> Result<(), StorageError> {
        let response = self
            .send(self.client.delete(self.autosave_url(user_id, quiz_id)?))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            s => Err(status_error(s)),
        }
    }
}
