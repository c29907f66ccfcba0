//! HTTP client for the external vision analysis service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{AnalysisClient, AnalysisError, ImageAnalysis};
use crate::config::AnalysisConfig;

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    url: &'a str,
}

pub struct HttpAnalysisClient {
    client: reqwest::Client,
    config: AnalysisConfig,
    timeout: Duration,
}

impl HttpAnalysisClient {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config,
            timeout,
        })
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, url: &str) -> Result<ImageAnalysis, AnalysisError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&AnalyzeRequest { url });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout(self.timeout)
            } else {
                AnalysisError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Quota(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let analysis: ImageAnalysis = response
            .json()
            .await
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

        analysis.validated()
    }
}
