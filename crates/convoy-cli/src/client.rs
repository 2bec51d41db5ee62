//! Blocking HTTP client for the convoy command API.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Thin wrapper over the REST endpoints. Every call returns the decoded JSON
/// body, or an error carrying the server's `code` and `message`.
pub struct CommandClient {
    client: Client,
    base_url: String,
}

impl CommandClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - Server root (e.g., "http://localhost:5000")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .with_context(|| format!("GET {path} failed"))?;
        decode(response)
    }

    pub fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .with_context(|| format!("POST {path} failed"))?;
        decode(response)
    }

    pub fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        let response = self
            .client
            .put(self.url(path))
            .json(body)
            .send()
            .with_context(|| format!("PUT {path} failed"))?;
        decode(response)
    }
}

fn decode(response: Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().context("Failed to decode response body")?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(anyhow!(describe_error(status.as_u16(), &body)))
    }
}

/// Render an API error body as a single line, appending any planner notes.
pub fn describe_error(status: u16, body: &Value) -> String {
    let code = body["code"].as_str().unwrap_or("UNKNOWN");
    let message = body["message"].as_str().unwrap_or("request failed");
    let mut line = format!("{status} {code}: {message}");
    if let Some(notes) = body["notes"].as_array() {
        for note in notes.iter().filter_map(Value::as_str) {
            line.push_str("\n  - ");
            line.push_str(note);
        }
    }
    line
}

/// Parse a wire enum (`ALPHA`, `en_route`, `block-road`) through its serde
/// representation so the CLI accepts exactly what the API does.
pub fn parse_enum<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let wire = raw.trim().to_uppercase().replace('-', "_");
    serde_json::from_value(Value::String(wire.clone()))
        .map_err(|_| format!("unrecognised value '{raw}'"))
}
