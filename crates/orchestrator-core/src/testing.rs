//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::Error;
use crate::message::{Message, StreamChunk, Usage};
use crate::provider::{CompletionRequest, CompletionResponse, FinishReason, Provider, StreamResult};

type StreamOutcome = Result<Vec<StreamChunk>, Error>;

/// A mock provider that returns pre-configured responses.
pub struct MockProvider {
    responses: Mutex<Vec<CompletionResponse>>,
    stream_outcomes: Mutex<Vec<StreamOutcome>>,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub captured_stream_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            stream_outcomes: Mutex::new(Vec::new()),
            captured_requests: Mutex::new(Vec::new()),
            captured_stream_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Queue a sequence of chunks to be returned by the next `stream()` call
    /// (FIFO across calls).
    pub fn queue_stream(&self, chunks: Vec<StreamChunk>) {
        self.stream_outcomes.lock().unwrap().insert(0, Ok(chunks));
    }

    /// Queue a `stream()` call that fails outright (connection-level error).
    pub fn queue_stream_error(&self, error: Error) {
        self.stream_outcomes.lock().unwrap().insert(0, Err(error));
    }

    /// The most recent request passed to `stream()`.
    pub fn last_stream_request(&self) -> Option<CompletionRequest> {
        self.captured_stream_requests.lock().unwrap().last().cloned()
    }

    /// Queue a response to be returned by the next complete() call.
    /// Responses are returned in FIFO order (first queued = first returned).
    pub fn queue_response(&self, content: &str) {
        let response = CompletionResponse {
            message: Message::assistant(content),
            thinking: None,
            usage: Usage::new(0, 0),
            model: "mock-model".to_string(),
            finish_reason: FinishReason::Stop,
        };
        self.responses.lock().unwrap().insert(0, response);
    }

    /// Queue a raw CompletionResponse.
    pub fn queue_raw_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().insert(0, response);
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    /// Get the last captured request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.captured_requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop() {
            Some(response) => Ok(response),
            None => Err(Error::Unknown("No mock response queued".to_string())),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<StreamResult, Error> {
        self.captured_stream_requests.lock().unwrap().push(request);
        let outcome = self.stream_outcomes.lock().unwrap().pop().unwrap_or(Err(Error::Unknown(
            "No mock stream queued".to_string(),
        )))?;
        Ok(Box::pin(tokio_stream::iter(outcome.into_iter().map(Ok))))
    }
}

/// A mock `Summarizer` (§4.3) for testing the Context Builder's three
/// compression rules without a live LLM call.
pub struct MockSummarizer {
    responses: Mutex<Vec<Result<String, Error>>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response for the next summarize() call (FIFO).
    pub fn queue(&self, response: Result<String, Error>) {
        self.responses.lock().unwrap().insert(0, response);
    }
}

impl Default for MockSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::context_builder::Summarizer for MockSummarizer {
    async fn summarize(&self, _system_prompt: &str, content: &str, _max_chars: usize) -> Result<String, Error> {
        self.calls.lock().unwrap().push(content.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(Err(Error::Unknown("No mock summarize response queued".to_string())))
    }
}
