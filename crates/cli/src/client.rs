//! Thin HTTP client for a running campaign server

use anyhow::{bail, Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub struct CampaignClient {
    http: Client,
    base_url: String,
}

impl CampaignClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        self.send(Method::PUT, path, Some(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            bail!("{} {}: {}", status.as_u16(), url, error_message(status, &text));
        }
        serde_json::from_str(&text).with_context(|| format!("unexpected response from {}", url))
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_server_text() {
        let body = r#"{"status":"error","message":"campaign x is already running"}"#;
        assert_eq!(error_message(StatusCode::CONFLICT, body), "campaign x is already running");
        assert_eq!(error_message(StatusCode::NOT_FOUND, "<html>"), "Not Found");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = CampaignClient::new("http://127.0.0.1:8080/").unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:8080");
    }
}
