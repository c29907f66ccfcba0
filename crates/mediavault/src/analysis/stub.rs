//! Scripted analysis client for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AnalysisClient, AnalysisError, ImageAnalysis};

impl ImageAnalysis {
    /// A contract-shaped result for tests and the exhausted-stub fallback.
    pub fn sample() -> Self {
        Self {
            tags: vec![
                "landscape".to_string(),
                "mountain".to_string(),
                "lake".to_string(),
                "forest".to_string(),
                "reflection".to_string(),
            ],
            description: "A mountain lake surrounded by forest, with the peaks \
                          reflected in still water."
                .to_string(),
            dominant_colors: vec![
                "#2F4F4F".to_string(),
                "#87CEEB".to_string(),
                "#556B2F".to_string(),
            ],
        }
    }
}

/// Returns queued responses in order; once the queue is empty, every call
/// succeeds with [`ImageAnalysis::sample`]. Records the URLs it was given.
#[derive(Default)]
pub struct StubAnalysis {
    responses: Mutex<VecDeque<Result<ImageAnalysis, AnalysisError>>>,
    calls: Mutex<Vec<String>>,
}

impl StubAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, analysis: ImageAnalysis) {
        self.responses
            .lock()
            .expect("response lock")
            .push_back(Ok(analysis));
    }

    pub fn push_err(&self, error: AnalysisError) {
        self.responses
            .lock()
            .expect("response lock")
            .push_back(Err(error));
    }

    /// URLs passed to `analyze`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("call lock").clone()
    }
}

#[async_trait]
impl AnalysisClient for StubAnalysis {
    async fn analyze(&self, url: &str) -> Result<ImageAnalysis, AnalysisError> {
        self.calls.lock().expect("call lock").push(url.to_string());

        match self.responses.lock().expect("response lock").pop_front() {
            Some(result) => result,
            None => Ok(ImageAnalysis::sample()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_fallback() {
        let stub = StubAnalysis::new();
        stub.push_err(AnalysisError::Transport("connection refused".into()));

        assert!(stub.analyze("memory://o/a.jpg").await.is_err());
        // Queue drained: falls back to the sample.
        let analysis = stub.analyze("memory://o/a.jpg").await.unwrap();
        assert_eq!(analysis, ImageAnalysis::sample());

        assert_eq!(stub.calls().len(), 2);
    }

    #[test]
    fn test_sample_satisfies_contract() {
        assert!(ImageAnalysis::sample().validated().is_ok());
    }
}
