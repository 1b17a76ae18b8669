use base64::engine::general_purpose;
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::trace;
use url::Url;

/// Characters left unescaped by a browser's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

const FALLBACK_NAME_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("invalid base64 payload")]
  Base64,
  #[error("fragment is not valid percent-encoded utf-8")]
  Percent,
  #[error("invalid url: {0}")]
  Url(#[from] url::ParseError),
}

/// Scheme of a node link, as far as naming and counting are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
  Ss,
  Ssr,
  Vmess,
  Vless,
  Trojan,
  Hysteria,
  Hysteria2,
  Http,
  Unknown,
}

impl Scheme {
  pub fn of(uri: &str) -> Self {
    let s = uri.trim_start();
    let Some((scheme, _)) = s.split_once("://") else {
      return Scheme::Unknown;
    };
    match scheme.to_ascii_lowercase().as_str() {
      "ss" => Scheme::Ss,
      "ssr" => Scheme::Ssr,
      "vmess" => Scheme::Vmess,
      "vless" => Scheme::Vless,
      "trojan" => Scheme::Trojan,
      "hysteria" => Scheme::Hysteria,
      "hysteria2" | "hy2" => Scheme::Hysteria2,
      _ if s.starts_with("http") => Scheme::Http,
      _ => Scheme::Unknown,
    }
  }

  pub fn is_proxy(self) -> bool {
    !matches!(self, Scheme::Http | Scheme::Unknown)
  }

  fn name_from(self, uri: &str, body: &str) -> Result<String, CodecError> {
    match self {
      Scheme::Vmess => vmess_name(body),
      Scheme::Trojan | Scheme::Vless => Ok(host_after_at(body)),
      Scheme::Ss => ss_name(body),
      Scheme::Ssr => ssr_name(body),
      Scheme::Hysteria | Scheme::Hysteria2 => Ok(hysteria_name(body)),
      Scheme::Http => Ok(Url::parse(uri)?.host_str().unwrap_or_default().to_string()),
      Scheme::Unknown => Ok(String::new()),
    }
  }
}

pub(crate) fn encode_component(s: &str) -> String {
  utf8_percent_encode(s, URI_COMPONENT).to_string()
}

fn percent_decode_strict(s: &str) -> Result<String, CodecError> {
  percent_decode_str(s)
    .decode_utf8()
    .map(|cow| cow.into_owned())
    .map_err(|_| CodecError::Percent)
}

/// Decodes standard or url-safe base64, tolerating stripped padding and
/// embedded whitespace.
pub(crate) fn decode_base64(s: &str) -> Result<Vec<u8>, CodecError> {
  let mut cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
  let rem = cleaned.len() % 4;
  if rem != 0 {
    cleaned.push_str(&"=".repeat(4 - rem));
  }
  for engine in [&general_purpose::STANDARD, &general_purpose::URL_SAFE] {
    if let Ok(bytes) = engine.decode(&cleaned) {
      return Ok(bytes);
    }
  }
  Err(CodecError::Base64)
}

fn body_of(uri: &str) -> &str {
  uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri)
}

fn host_segment(s: &str) -> String {
  if let Some(inner) = s.strip_prefix('[') {
    return inner.split(']').next().unwrap_or_default().to_string();
  }
  s.split([':', '/', '?']).next().unwrap_or_default().to_string()
}

fn host_after_at(s: &str) -> String {
  match s.split_once('@') {
    Some((_, after)) => host_segment(after),
    None => String::new(),
  }
}

fn vmess_name(body: &str) -> Result<String, CodecError> {
  let payload = body.split('#').next().unwrap_or_default();
  let bytes = decode_base64(payload)?;
  let text = String::from_utf8_lossy(&bytes);
  let name = serde_json::from_str::<JsonValue>(&text)
    .ok()
    .and_then(|obj| obj.get("ps").and_then(|v| v.as_str()).map(str::to_string))
    .unwrap_or_default();
  Ok(name)
}

fn ss_name(body: &str) -> Result<String, CodecError> {
  let main = body.split('#').next().unwrap_or_default();
  if main.contains('@') {
    return Ok(host_after_at(main));
  }
  let payload = main.split('?').next().unwrap_or_default();
  let decoded = decode_base64(payload)?;
  Ok(host_after_at(&String::from_utf8_lossy(&decoded)))
}

// ssr://base64(host:port:protocol:method:obfs:base64pass/?remarks=base64&...)
fn ssr_name(body: &str) -> Result<String, CodecError> {
  let payload = body.split('#').next().unwrap_or_default();
  let decoded = String::from_utf8_lossy(&decode_base64(payload)?).into_owned();
  let (main, params) = decoded.split_once("/?").unwrap_or((decoded.as_str(), ""));
  let remarks = params
    .split('&')
    .find_map(|kv| kv.strip_prefix("remarks="))
    .filter(|r| !r.is_empty());
  if let Some(remarks) = remarks {
    let name = String::from_utf8_lossy(&decode_base64(remarks)?).trim().to_string();
    if !name.is_empty() {
      return Ok(name);
    }
  }
  Ok(host_segment(main))
}

fn hysteria_name(body: &str) -> String {
  let authority = body.split(['#', '?']).next().unwrap_or_default();
  if authority.contains('@') {
    host_after_at(authority)
  } else {
    host_segment(authority)
  }
}

fn try_extract_name(uri: &str) -> Result<String, CodecError> {
  if let Some((_, fragment)) = uri.rsplit_once('#') {
    if !fragment.is_empty() {
      return percent_decode_strict(fragment);
    }
  }
  Scheme::of(uri).name_from(uri, body_of(uri))
}

/// Display name of a node link. Never fails: links that cannot be decoded
/// are named by their first characters.
pub fn extract_name(uri: &str) -> String {
  match try_extract_name(uri) {
    Ok(name) => name,
    Err(err) => {
      trace!(%err, "node name undecodable, using raw prefix");
      uri.chars().take(FALLBACK_NAME_CHARS).collect()
    }
  }
}

/// Prefixes the link's display name with `prefix`. Already-prefixed links
/// are returned unchanged.
pub fn rename(uri: &str, prefix: &str) -> String {
  if prefix.is_empty() {
    return uri.to_string();
  }
  let Some((base, fragment)) = uri.rsplit_once('#') else {
    return format!("{uri}#{}", encode_component(prefix));
  };
  let name = percent_decode_strict(fragment).unwrap_or_else(|_| fragment.to_string());
  if name.starts_with(prefix) {
    return uri.to_string();
  }
  let renamed = if name.is_empty() {
    prefix.to_string()
  } else {
    format!("{prefix} - {name}")
  };
  format!("{base}#{}", encode_component(&renamed))
}

/// Number of lines that are proxy node links.
pub fn count_node_lines(text: &str) -> usize {
  text
    .lines()
    .map(str::trim)
    .filter(|line| Scheme::of(line).is_proxy())
    .count()
}
