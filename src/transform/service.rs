//! Transform service contract.
//!
//! The external large-language transform service is consumed through the
//! `TransformService` trait so the pipeline can be exercised against a mock
//! (real HTTP transport lives in `transform::http`).

use crate::error::{LongformError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One request to the transform service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRequest {
    /// Stage prompt with placeholders already resolved.
    pub prompt_template: String,
    /// Structured input for this unit (items, window metadata, …).
    pub structured_input: Value,
    /// Schema the response is expected to parse under.
    pub output_schema: Value,
    /// Safety thresholds forwarded verbatim to the service.
    pub safety_thresholds: Value,
    /// Model identifier to invoke.
    pub model_id: String,
    /// Sampling temperature for this attempt.
    pub temperature: f32,
}

impl TransformRequest {
    pub fn new(prompt_template: &str, structured_input: Value, model_id: &str) -> Self {
        Self {
            prompt_template: prompt_template.to_string(),
            structured_input,
            output_schema: Value::Null,
            safety_thresholds: Value::Null,
            model_id: model_id.to_string(),
            temperature: 0.2,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_model(mut self, model_id: &str) -> Self {
        self.model_id = model_id.to_string();
        self
    }
}

/// Trait for the transform service.
///
/// This trait allows swapping implementations (real HTTP vs mock).
/// `transform` returns the raw response text; structural validation is the
/// resilient decoder's job, not the transport's.
#[async_trait]
pub trait TransformService: Send + Sync {
    /// Sends one request and returns the raw response text.
    async fn transform(&self, request: &TransformRequest) -> Result<String>;

    /// Identifier of the service's default model.
    fn default_model(&self) -> &str;
}

/// Converts a decoded JSON value into a typed stage result.
///
/// A decode success with the wrong shape is a schema mismatch, which the
/// invocation engine treats the same as malformed output.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| LongformError::SchemaMismatch {
        message: e.to_string(),
    })
}

/// Mock transform service for testing.
///
/// Responses are scripted: each call pops the next scripted step, falling
/// back to the default response once the script is exhausted.
type MockHandler = Box<dyn Fn(&TransformRequest) -> Result<String> + Send + Sync>;

pub struct MockTransformService {
    model: String,
    default_response: String,
    script: Mutex<VecDeque<Result<String>>>,
    handler: Option<MockHandler>,
    calls: Mutex<Vec<TransformRequest>>,
}

impl MockTransformService {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            default_response: "{}".to_string(),
            script: Mutex::new(VecDeque::new()),
            handler: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the response returned once the script is exhausted.
    pub fn with_default_response(mut self, response: &str) -> Self {
        self.default_response = response.to_string();
        self
    }

    /// Appends a scripted successful response.
    pub fn then_respond(self, response: &str) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Ok(response.to_string()));
        self
    }

    /// Appends a scripted failure.
    pub fn then_fail(self, error: LongformError) -> Self {
        self.script.lock().expect("script lock").push_back(Err(error));
        self
    }

    /// Answers from a request-inspecting handler once the script is
    /// exhausted, instead of the static default response.
    pub fn with_handler(
        mut self,
        handler: impl Fn(&TransformRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Number of transform calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Requests observed so far, in call order.
    pub fn calls(&self) -> Vec<TransformRequest> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl TransformService for MockTransformService {
    async fn transform(&self, request: &TransformRequest) -> Result<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.clone());
        match self.script.lock().expect("script lock").pop_front() {
            Some(step) => step,
            None => match &self.handler {
                Some(handler) => handler(request),
                None => Ok(self.default_response.clone()),
            },
        }
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
