// src/adapters/http.rs

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::adapters::{AdapterError, GradeResult, GradingAdapter, PlagiarismAdapter};
use crate::models::session::{AnswerRecord, PlagiarismReport, QuestionGrade, SessionId};

/// Wire request shared by both adapters. The session id doubles as the
/// idempotency key on the remote side.
#[derive(Debug, Serialize)]
struct AdapterRequest<'a> {
    session_id: SessionId,
    exam_id: Option<&'a str>,
    answers: &'a [AnswerRecord],
}

#[derive(Debug, Deserialize)]
struct GradeResponse {
    question_scores: HashMap<String, QuestionGrade>,
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    similarity: f64,
    #[serde(default)]
    matched_sources: Vec<String>,
}

fn classify_error(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() || e.is_connect() {
        AdapterError::Transient(e.to_string())
    } else if let Some(status) = e.status() {
        if status.is_server_error() {
            AdapterError::Transient(e.to_string())
        } else {
            AdapterError::Permanent(e.to_string())
        }
    } else {
        AdapterError::Transient(e.to_string())
    }
}

/// Grading over HTTP: POST the frozen answer log, get per-question scores.
pub struct HttpGradingAdapter {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpGradingAdapter {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            endpoint,
        }
    }
}

#[async_trait]
impl GradingAdapter for HttpGradingAdapter {
    async fn grade(
        &self,
        session_id: SessionId,
        exam_id: &str,
        answers: &[AnswerRecord],
    ) -> Result<GradeResult, AdapterError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&AdapterRequest {
                session_id,
                exam_id: Some(exam_id),
                answers,
            })
            .send()
            .await
            .map_err(classify_error)?
            .error_for_status()
            .map_err(classify_error)?;

        let body: GradeResponse = response.json().await.map_err(classify_error)?;
        Ok(GradeResult {
            question_scores: body.question_scores,
        })
    }
}

/// Plagiarism scan over HTTP, same shape as grading.
pub struct HttpPlagiarismAdapter {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPlagiarismAdapter {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            endpoint,
        }
    }
}

#[async_trait]
impl PlagiarismAdapter for HttpPlagiarismAdapter {
    async fn scan(
        &self,
        session_id: SessionId,
        answers: &[AnswerRecord],
    ) -> Result<PlagiarismReport, AdapterError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&AdapterRequest {
                session_id,
                exam_id: None,
                answers,
            })
            .send()
            .await
            .map_err(classify_error)?
            .error_for_status()
            .map_err(classify_error)?;

        let body: ScanResponse = response.json().await.map_err(classify_error)?;
        Ok(PlagiarismReport {
            session_id,
            similarity: body.similarity,
            matched_sources: body.matched_sources,
        })
    }
}
