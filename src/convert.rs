use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::GatewayError;
use crate::fallback;
use crate::negotiate::Target;
use crate::node_link::encode_component;

pub const DEFAULT_CONVERT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONTENT_TYPE: &str = "text/yaml";

/// URL of this service's base64 output for `segments`, which the converter
/// fetches to get the node list.
pub fn callback_url(base: &str, segments: &[&str]) -> String {
  let path = segments
    .iter()
    .map(|s| encode_component(s))
    .collect::<Vec<_>>()
    .join("/");
  format!("{}/{path}?target=base64", base.trim_end_matches('/'))
}

/// `subConverter` is normally a bare host (`https://<host>/sub`), but a full
/// base URL is accepted too.
pub fn converter_endpoint(address: &str) -> Result<Url, GatewayError> {
  let trimmed = address.trim().trim_end_matches('/');
  let base = if trimmed.contains("://") {
    trimmed.to_string()
  } else {
    format!("https://{trimmed}")
  };
  let raw = if base.ends_with("/sub") {
    base
  } else {
    format!("{base}/sub")
  };
  Url::parse(&raw).map_err(|source| GatewayError::ConverterAddress {
    address: address.to_string(),
    source,
  })
}

#[derive(Debug, Clone)]
pub struct ConvertRequest<'a> {
  pub target: &'a Target,
  pub callback_url: &'a str,
  pub converter: &'a str,
  pub config: &'a str,
  pub file_name: &'a str,
}

impl ConvertRequest<'_> {
  pub fn upstream_url(&self) -> Result<Url, GatewayError> {
    let mut url = converter_endpoint(self.converter)?;
    url
      .query_pairs_mut()
      .append_pair("target", self.target.as_str())
      .append_pair("url", self.callback_url)
      .append_pair("config", self.config)
      .append_pair("new_name", "false");
    Ok(url)
  }
}

/// A successful converter response, streamed to the client as it arrives.
#[derive(Debug)]
pub struct Converted {
  pub content_type: String,
  pub file_name: String,
  upstream: reqwest::Response,
}

fn no_store_response(body: Body, content_type: &str, file_name: &str) -> Response {
  let mut resp = Response::new(body);
  let headers = resp.headers_mut();
  headers.insert(
    header::CONTENT_TYPE,
    HeaderValue::from_str(content_type)
      .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
  );
  headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
  let disposition = format!("inline; filename*=utf-8''{}", encode_component(file_name));
  if let Ok(value) = HeaderValue::from_str(&disposition) {
    headers.insert(header::CONTENT_DISPOSITION, value);
  }
  resp
}

impl IntoResponse for Converted {
  fn into_response(self) -> Response {
    let body = Body::from_stream(self.upstream.bytes_stream());
    no_store_response(body, &self.content_type, &self.file_name)
  }
}

/// Static config for targets that have one, used when no converter is set.
pub fn local_fallback(target: &Target, file_name: &str) -> Option<Response> {
  let (content_type, body) = match target {
    Target::Clash => ("text/yaml; charset=utf-8", fallback::CLASH_YAML),
    Target::Singbox => ("application/json; charset=utf-8", fallback::SINGBOX_JSON),
    _ => return None,
  };
  Some(no_store_response(Body::from(body), content_type, file_name))
}

#[derive(Debug, Clone)]
pub struct ConverterBridge {
  client: Client,
}

impl ConverterBridge {
  pub fn new(timeout: Duration) -> reqwest::Result<Self> {
    let client = Client::builder()
      .timeout(timeout.max(Duration::from_millis(1)))
      .build()?;
    Ok(Self { client })
  }

  pub async fn convert(&self, request: &ConvertRequest<'_>) -> Result<Converted, GatewayError> {
    let url = request.upstream_url()?;
    debug!(format = %request.target, %url, "calling converter");
    let upstream = self.client.get(url).send().await?;
    let status = upstream.status();
    if !status.is_success() {
      let body = upstream.text().await.unwrap_or_default();
      return Err(GatewayError::ConverterStatus {
        status: status.as_u16(),
        body,
      });
    }
    let content_type = upstream
      .headers()
      .get(header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .filter(|v| !v.trim().is_empty())
      .unwrap_or(DEFAULT_CONTENT_TYPE)
      .to_string();
    Ok(Converted {
      content_type,
      file_name: request.file_name.to_string(),
      upstream,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn converter_address_forms() {
    assert_eq!(converter_endpoint("url.v1.mk").unwrap().as_str(), "https://url.v1.mk/sub");
    assert_eq!(
      converter_endpoint("http://127.0.0.1:25500/").unwrap().as_str(),
      "http://127.0.0.1:25500/sub"
    );
    assert_eq!(
      converter_endpoint("https://conv.example.com/sub").unwrap().as_str(),
      "https://conv.example.com/sub"
    );
    assert!(matches!(
      converter_endpoint("http://[bad"),
      Err(GatewayError::ConverterAddress { .. })
    ));
  }

  #[test]
  fn callback_points_at_base64_output() {
    assert_eq!(
      callback_url("https://misub.example.com/", &["tok"]),
      "https://misub.example.com/tok?target=base64"
    );
    assert_eq!(
      callback_url("http://h:8787", &["profiles", "my team"]),
      "http://h:8787/profiles/my%20team?target=base64"
    );
  }

  #[test]
  fn upstream_query_carries_callback() {
    let target = Target::Surge;
    let req = ConvertRequest {
      target: &target,
      callback_url: "https://misub.example.com/tok?target=base64",
      converter: "url.v1.mk",
      config: "https://cfg.example.com/a.ini",
      file_name: "MiSub",
    };
    let url = req.upstream_url().unwrap();
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
      pairs,
      [
        ("target".to_string(), "surge".to_string()),
        (
          "url".to_string(),
          "https://misub.example.com/tok?target=base64".to_string()
        ),
        ("config".to_string(), "https://cfg.example.com/a.ini".to_string()),
        ("new_name".to_string(), "false".to_string()),
      ]
    );
  }

  #[test]
  fn local_fallback_only_for_structured_targets() {
    let clash = local_fallback(&Target::Clash, "MiSub").unwrap();
    assert_eq!(clash.headers()[header::CACHE_CONTROL], "no-store");
    assert!(local_fallback(&Target::Singbox, "MiSub").is_some());
    assert!(local_fallback(&Target::Surge, "MiSub").is_none());
    assert!(local_fallback(&Target::Other("x".into()), "MiSub").is_none());
  }

  #[tokio::test]
  async fn unreachable_converter_is_a_transport_error() {
    let bridge = ConverterBridge::new(Duration::from_millis(500)).unwrap();
    let target = Target::Clash;
    let req = ConvertRequest {
      target: &target,
      callback_url: "http://127.0.0.1:8787/tok?target=base64",
      converter: "http://127.0.0.1:1",
      config: "",
      file_name: "MiSub",
    };
    let err = bridge.convert(&req).await.unwrap_err();
    assert!(matches!(err, GatewayError::ConverterTransport(_)));
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
  }
}
