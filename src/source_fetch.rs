use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::Subscription;
use crate::node_link::{self, CodecError};

pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
/// Largest subscription body read into memory.
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("transport: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("upstream answered {0}")]
  Status(StatusCode),
  #[error("body larger than {0} bytes")]
  TooLarge(usize),
  #[error("body looked like base64 but did not decode: {0}")]
  Decode(#[from] CodecError),
}

pub fn default_user_agent() -> &'static str {
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
}

/// Client for subscription hosts. Certificate checks are off: many of them
/// serve self-signed certificates.
pub fn build_client(timeout: Duration, user_agent: &str) -> reqwest::Result<Client> {
  Client::builder()
    .user_agent(user_agent)
    .danger_accept_invalid_certs(true)
    .redirect(reqwest::redirect::Policy::limited(10))
    .timeout(timeout.max(Duration::from_millis(1)))
    .build()
}

fn looks_like_base64(compact: &str) -> bool {
  compact.len() > 20
    && compact
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
}

/// Decodes a subscription body that is a base64 blob; any other body is
/// returned as-is.
pub fn decode_subscription_body(text: &str) -> Result<String, CodecError> {
  let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
  if !looks_like_base64(&compact) {
    return Ok(text.to_string());
  }
  let bytes = node_link::decode_base64(&compact)?;
  Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn split_node_lines(text: &str) -> Vec<String> {
  text
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .map(str::to_string)
    .collect()
}

/// Reads a response body, giving up as soon as it grows past `limit` bytes.
pub(crate) async fn read_body_capped(
  mut resp: reqwest::Response,
  limit: usize,
) -> Result<String, FetchError> {
  if resp.content_length().is_some_and(|len| len > limit as u64) {
    return Err(FetchError::TooLarge(limit));
  }
  let mut buf = Vec::new();
  while let Some(chunk) = resp.chunk().await? {
    if buf.len() + chunk.len() > limit {
      return Err(FetchError::TooLarge(limit));
    }
    buf.extend_from_slice(&chunk);
  }
  Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[derive(Debug, Clone)]
pub struct SourceFetcher {
  client: Client,
  max_body_bytes: usize,
}

impl SourceFetcher {
  pub fn new(timeout: Duration) -> reqwest::Result<Self> {
    Ok(Self::with_client(build_client(timeout, default_user_agent())?))
  }

  pub fn with_client(client: Client) -> Self {
    Self {
      client,
      max_body_bytes: DEFAULT_MAX_BODY_BYTES,
    }
  }

  pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
    self.max_body_bytes = limit;
    self
  }

  async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
    let resp = self.client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
      return Err(FetchError::Status(status));
    }
    let text = read_body_capped(resp, self.max_body_bytes).await?;
    Ok(decode_subscription_body(&text)?)
  }

  /// Node lines contributed by one source. Manual entries yield themselves;
  /// a failing subscription yields nothing.
  pub async fn fetch(&self, source: &Subscription, prepend_name: bool) -> Vec<String> {
    if source.is_manual() {
      return vec![source.url.clone()];
    }
    let lines = match self.fetch_text(&source.url).await {
      Ok(text) => split_node_lines(&text),
      Err(FetchError::Status(status)) => {
        debug!(url = %source.url, %status, "subscription not available");
        return Vec::new();
      }
      Err(err) => {
        warn!(url = %source.url, %err, "subscription fetch failed");
        return Vec::new();
      }
    };
    debug!(url = %source.url, lines = lines.len(), "subscription fetched");
    let prefix = source.name.trim();
    if !prepend_name || prefix.is_empty() {
      return lines;
    }
    lines
      .iter()
      .map(|line| node_link::rename(line, prefix))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use base64::engine::general_purpose;
  use base64::Engine;

  #[test]
  fn base64_bodies_are_decoded() {
    let plain = "trojan://pw@a.example.com:443#A\nvless://id@b.example.com:443#B\n";
    let wrapped = general_purpose::STANDARD
      .encode(plain)
      .as_bytes()
      .chunks(16)
      .map(|c| String::from_utf8_lossy(c).into_owned())
      .collect::<Vec<_>>()
      .join("\r\n");
    assert_eq!(decode_subscription_body(&wrapped).unwrap(), plain);
  }

  #[test]
  fn plain_and_short_bodies_pass_through() {
    let plain = "trojan://pw@a.example.com:443#A";
    assert_eq!(decode_subscription_body(plain).unwrap(), plain);
    assert_eq!(decode_subscription_body("c2hvcnQ=").unwrap(), "c2hvcnQ=");
  }

  #[test]
  fn corrupt_base64_is_an_error() {
    assert!(decode_subscription_body("QUJDRA=QUJDRA=QUJDRA=QUJDRA=").is_err());
  }

  #[test]
  fn splits_and_trims_lines() {
    assert_eq!(split_node_lines("  a \n\n\tb\r\n \n"), ["a", "b"]);
  }

  #[tokio::test]
  async fn manual_entries_are_returned_verbatim() {
    let fetcher = SourceFetcher::new(Duration::from_secs(1)).unwrap();
    let manual = Subscription::new("m", "Named", "vless://id@h:443?type=ws#MyNode");
    assert_eq!(fetcher.fetch(&manual, true).await, [manual.url.clone()]);
  }

  async fn serve_body(body: String) -> String {
    let app = axum::Router::new().route("/sub", axum::routing::get(move || async move { body }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/sub")
  }

  #[tokio::test]
  async fn oversized_body_contributes_nothing() {
    let line = "trojan://pw@big.example.com:443#Big\n";
    let url = serve_body(line.repeat(100)).await;
    let source = Subscription::new("s", "", url);

    let small = SourceFetcher::new(Duration::from_secs(2))
      .unwrap()
      .with_max_body_bytes(line.len() * 10);
    assert!(small.fetch(&source, false).await.is_empty());

    let roomy = SourceFetcher::new(Duration::from_secs(2)).unwrap();
    assert_eq!(roomy.fetch(&source, false).await.len(), 100);
  }

  #[tokio::test]
  async fn unreachable_source_contributes_nothing() {
    let fetcher = SourceFetcher::new(Duration::from_millis(500)).unwrap();
    let source = Subscription::new("s", "S", "http://127.0.0.1:1/sub");
    assert!(fetcher.fetch(&source, true).await.is_empty());
  }
}
