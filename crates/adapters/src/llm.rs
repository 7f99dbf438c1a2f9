//! OpenAI Responses API adapter. Implemented as a direct REST call over
//! `reqwest::blocking`, the same way the teacher's Google provider arm
//! builds its requests by hand rather than through a vendor SDK.

use flowctl_core::{FlowError, LlmClient, LlmRequest};
use serde_json::{json, Value};
use std::env;
use std::thread;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

pub struct OpenAiAdapter {
    client: reqwest::blocking::Client,
    api_key: String,
    max_retries: u32,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_key,
            max_retries: 3,
        }
    }

    pub fn from_env() -> Result<Self, FlowError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| FlowError::MissingDependency("OPENAI_API_KEY".to_string()))?;
        Ok(Self::new(api_key))
    }
}

impl LlmClient for OpenAiAdapter {
    fn call(&self, request: &LlmRequest) -> Result<Value, FlowError> {
        let mut body = json!({
            "model": request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            "input": request.prompt,
        });
        if let Some(effort) = &request.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }
        if let Some(tier) = &request.service_tier {
            body["service_tier"] = json!(tier);
        }
        if request.web_search {
            body["tools"] = json!([{ "type": "web_search_preview" }]);
        }

        let mut last_err = None;
        for attempt in 0..self.max_retries {
            let attempt_result = self
                .client
                .post(RESPONSES_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .and_then(|resp| resp.error_for_status())
                .and_then(|resp| resp.json::<Value>());

            match attempt_result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 == self.max_retries {
                        break;
                    }
                    thread::sleep(Duration::from_secs(1));
                }
            }
        }

        Err(FlowError::Network(
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}
