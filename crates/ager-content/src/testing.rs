//! Scripted generative service for tests.

use crate::error::ServiceError;
use crate::service::{GenerationRequest, GenerativeService};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Replays a fixed queue of replies and records every request it sees.
///
/// Once the queue is drained every call fails with a 503 status.
#[derive(Debug, Default)]
pub struct ScriptedService {
    replies: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedService {
    pub fn new(replies: Vec<Result<String, ServiceError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Service that answers every call with the same text.
    pub fn repeating(reply: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(reply.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.prompt.clone()).collect()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerativeService for ScriptedService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        self.requests.lock().push(request.clone());
        self.replies.lock().pop_front().unwrap_or(Err(ServiceError::Status {
            status: 503,
            body: "script exhausted".to_string(),
        }))
    }
}
