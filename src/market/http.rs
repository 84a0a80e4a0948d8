use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::Value;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 12;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 6;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent("Mozilla/5.0 (compatible; top100-index/0.1)")
        .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .build()
        .expect("failed to build HTTP client")
});

async fn get_body(url: &str) -> Result<(reqwest::StatusCode, String)> {
    let response = HTTP_CLIENT
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed GET request: {url}"))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("failed reading response body: {url}"))?;
    Ok((status, body))
}

/// A 404 is an answer ("nothing here") rather than an error.
pub async fn fetch_json_optional(url: &str) -> Result<Option<Value>> {
    let (status, body) = get_body(url).await?;
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let preview: String = body.chars().take(180).collect();
        return Err(anyhow!("GET {url} returned {status}: {preview}"));
    }
    serde_json::from_str(&body)
        .map(Some)
        .with_context(|| format!("invalid JSON response: {url}"))
}

pub async fn fetch_text(url: &str) -> Result<String> {
    let (status, body) = get_body(url).await?;
    if !status.is_success() {
        let preview: String = body.chars().take(180).collect();
        return Err(anyhow!("GET {url} returned {status}: {preview}"));
    }
    Ok(body)
}

pub fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let sanitized = s.trim().replace(',', "").replace('_', "");
            sanitized.parse::<f64>().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::to_f64;

    #[test]
    fn converts_numbers_and_numeric_strings() {
        assert_eq!(to_f64(&json!(12.5)), Some(12.5));
        assert_eq!(to_f64(&json!("1,200")), Some(1200.0));
        assert_eq!(to_f64(&json!(null)), None);
        assert_eq!(to_f64(&json!("n/a")), None);
    }
}
