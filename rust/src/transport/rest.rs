// REST fallback used while the push channel is down.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use crate::error::SyncError;

#[derive(Clone, Debug)]
pub struct RestClient {
    base_url: String,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> Result<Value, SyncError> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("GET {path}: {e}")))?;
        finish(path, resp).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, SyncError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("POST {path}: {e}")))?;
        finish(path, resp).await
    }
}

async fn finish(path: &str, resp: reqwest::Response) -> Result<Value, SyncError> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| SyncError::Transport(format!("{path}: reading body: {e}")))?;
    classify(path, status, &text)
}

fn classify(path: &str, status: StatusCode, body: &str) -> Result<Value, SyncError> {
    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(body)
            .map_err(|e| SyncError::Rejected(format!("{path}: invalid json: {e}")));
    }
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    };
    if status == StatusCode::NOT_FOUND {
        Err(SyncError::NotFound(path.to_string()))
    } else if status.is_client_error() {
        Err(SyncError::Rejected(detail))
    } else {
        Err(SyncError::Transport(format!("{path}: {detail}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(
            classify("/api/accounts", StatusCode::OK, r#"[{"accountId":"A1"}]"#)
                .unwrap()
                .as_array()
                .map(|a| a.len()),
            Some(1)
        );
        assert_eq!(
            classify("/x", StatusCode::NO_CONTENT, ""),
            Ok(Value::Null)
        );
        assert_eq!(
            classify(
                "/api/accounts/A1/region/restart",
                StatusCode::FORBIDDEN,
                "estate manager required",
            ),
            Err(SyncError::Rejected("estate manager required".to_string()))
        );
        assert_eq!(
            classify("/api/accounts/A9/region", StatusCode::NOT_FOUND, ""),
            Err(SyncError::NotFound("/api/accounts/A9/region".to_string()))
        );
        assert!(classify("/api/accounts", StatusCode::BAD_GATEWAY, "")
            .unwrap_err()
            .is_retryable());
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let client = RestClient::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/api/accounts"), "http://localhost:5000/api/accounts");
    }
}
