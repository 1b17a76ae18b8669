use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_SUB_CONFIG: &str =
  "https://raw.githubusercontent.com/cmliu/ACL4SSR/main/Clash/config/ACL4SSR_Online_MultiCountry.ini";

/// Process-wide settings. Every field falls back to its default, so a
/// partial or missing settings document is always usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  #[serde(rename = "FileName")]
  pub file_name: String,
  #[serde(rename = "mytoken")]
  pub my_token: String,
  #[serde(rename = "profileToken")]
  pub profile_token: String,
  #[serde(rename = "subConverter")]
  pub sub_converter: String,
  #[serde(rename = "subConfig")]
  pub sub_config: String,
  #[serde(rename = "prependSubName")]
  pub prepend_sub_name: bool,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      file_name: "MiSub".to_string(),
      my_token: "auto".to_string(),
      profile_token: "profiles".to_string(),
      sub_converter: "url.v1.mk".to_string(),
      sub_config: DEFAULT_SUB_CONFIG.to_string(),
      prepend_sub_name: true,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
  #[serde(default)]
  pub upload: u64,
  #[serde(default)]
  pub download: u64,
  #[serde(default)]
  pub total: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expire: Option<u64>,
}

impl UserInfo {
  /// Parses a `subscription-userinfo` header value,
  /// e.g. `upload=1; download=2; total=10; expire=1700000000`.
  pub fn parse_header(raw: &str) -> Option<Self> {
    let mut info = UserInfo::default();
    let mut seen = false;
    for pair in raw.split(';') {
      let Some((key, value)) = pair.split_once('=') else {
        continue;
      };
      let Ok(value) = value.trim().parse::<f64>() else {
        continue;
      };
      let value = value.max(0.0) as u64;
      match key.trim().to_ascii_lowercase().as_str() {
        "upload" => info.upload = value,
        "download" => info.download = value,
        "total" => info.total = value,
        "expire" => info.expire = Some(value),
        _ => continue,
      }
      seen = true;
    }
    seen.then_some(info)
  }
}

/// A subscription URL or a manually entered node link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
  pub id: String,
  #[serde(default)]
  pub name: String,
  pub url: String,
  #[serde(default = "enabled_by_default")]
  pub enabled: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_count: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_info: Option<UserInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exclude: Option<String>,
}

fn enabled_by_default() -> bool {
  true
}

impl Subscription {
  pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      url: url.into(),
      enabled: true,
      node_count: None,
      user_info: None,
      exclude: None,
    }
  }

  /// Manual entries hold a node link instead of an http(s) endpoint.
  pub fn is_manual(&self) -> bool {
    !self.url.trim_start().starts_with("http")
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub custom_id: Option<String>,
  #[serde(default = "enabled_by_default")]
  pub enabled: bool,
  #[serde(default)]
  pub subscriptions: Vec<String>,
  #[serde(default)]
  pub manual_nodes: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sub_converter: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sub_config: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<String>,
}

impl Profile {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      custom_id: None,
      enabled: true,
      subscriptions: Vec::new(),
      manual_nodes: Vec::new(),
      sub_converter: None,
      sub_config: None,
      expires_at: None,
    }
  }

  pub fn references(&self, record_id: &str) -> bool {
    self.subscriptions.iter().any(|id| id == record_id)
      || self.manual_nodes.iter().any(|id| id == record_id)
  }

  /// `expiresAt` accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates
  /// (valid through the end of that day, UTC). Unparseable values never expire.
  pub fn expires_at(&self) -> Option<DateTime<Utc>> {
    let raw = self.expires_at.as_deref()?.trim();
    if raw.is_empty() {
      return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
      return Some(ts.with_timezone(&Utc));
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
      Ok(day) => day.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc()),
      Err(_) => {
        warn!(profile = %self.id, expires_at = raw, "ignoring unparseable expiry");
        None
      }
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at().is_some_and(|at| at < now)
  }

  pub fn converter_override(&self) -> Option<&str> {
    self.sub_converter.as_deref().map(str::trim).filter(|s| !s.is_empty())
  }

  pub fn config_override(&self) -> Option<&str> {
    self.sub_config.as_deref().map(str::trim).filter(|s| !s.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn partial_settings_merge_with_defaults() {
    let s: Settings = serde_json::from_str(r#"{"mytoken":"secret","prependSubName":false}"#).unwrap();
    assert_eq!(s.my_token, "secret");
    assert!(!s.prepend_sub_name);
    assert_eq!(s.file_name, "MiSub");
    assert_eq!(s.profile_token, "profiles");
    assert_eq!(s.sub_config, DEFAULT_SUB_CONFIG);
  }

  #[test]
  fn subscription_defaults_to_enabled() {
    let sub: Subscription =
      serde_json::from_str(r#"{"id":"a","url":"https://example.com/sub"}"#).unwrap();
    assert!(sub.enabled);
    assert!(!sub.is_manual());
    assert!(Subscription::new("b", "", "vless://id@h:443").is_manual());
  }

  #[test]
  fn parses_userinfo_header() {
    let info = UserInfo::parse_header("upload=1024; download=2048; total=1073741824; expire=1700000000")
      .unwrap();
    assert_eq!(info.upload, 1024);
    assert_eq!(info.download, 2048);
    assert_eq!(info.total, 1_073_741_824);
    assert_eq!(info.expire, Some(1_700_000_000));
    assert!(UserInfo::parse_header("nonsense").is_none());
  }

  #[test]
  fn profile_expiry_accepts_dates_and_timestamps() {
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let mut p = Profile::new("p", "P");
    assert!(!p.is_expired(now));

    p.expires_at = Some("2025-06-01".to_string());
    assert!(!p.is_expired(now));
    p.expires_at = Some("2025-05-31".to_string());
    assert!(p.is_expired(now));
    p.expires_at = Some("2025-06-01T11:00:00Z".to_string());
    assert!(p.is_expired(now));
    p.expires_at = Some("someday".to_string());
    assert!(!p.is_expired(now));
  }
}
