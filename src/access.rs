use crate::error::GatewayError;
use crate::model::Settings;

/// Path segment reserved for the `/sub?token=` route.
pub const SUB_ROUTE: &str = "sub";

const ANY_TOKEN: &str = "auto";

/// The query token wins; otherwise the first path segment, unless it is the
/// `sub` routing prefix.
pub fn resolve_token<'a>(path_segment: Option<&'a str>, query_token: Option<&'a str>) -> Option<&'a str> {
  if let Some(token) = query_token.filter(|t| !t.is_empty()) {
    return Some(token);
  }
  path_segment.filter(|seg| !seg.is_empty() && *seg != SUB_ROUTE)
}

/// Checks a request token against `mytoken`. With `mytoken = "auto"` any
/// non-empty token unlocks.
pub fn authorize<'a>(token: Option<&'a str>, settings: &Settings) -> Result<&'a str, GatewayError> {
  let token = token.ok_or(GatewayError::InvalidToken)?;
  if settings.my_token == ANY_TOKEN || token == settings.my_token {
    Ok(token)
  } else {
    Err(GatewayError::InvalidToken)
  }
}

pub fn authorize_profile(token: &str, settings: &Settings) -> Result<(), GatewayError> {
  if !token.is_empty() && token == settings.profile_token {
    Ok(())
  } else {
    Err(GatewayError::InvalidToken)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings(token: &str) -> Settings {
    Settings {
      my_token: token.to_string(),
      ..Settings::default()
    }
  }

  #[test]
  fn query_token_overrides_path() {
    assert_eq!(resolve_token(Some("path"), Some("query")), Some("query"));
    assert_eq!(resolve_token(Some("path"), None), Some("path"));
    assert_eq!(resolve_token(Some("path"), Some("")), Some("path"));
    assert_eq!(resolve_token(Some("sub"), None), None);
    assert_eq!(resolve_token(Some("sub"), Some("t")), Some("t"));
    assert_eq!(resolve_token(None, None), None);
  }

  #[test]
  fn exact_match_required() {
    let s = settings("s3cret");
    assert_eq!(authorize(Some("s3cret"), &s).unwrap(), "s3cret");
    assert!(matches!(authorize(Some("S3CRET"), &s), Err(GatewayError::InvalidToken)));
    assert!(matches!(authorize(Some("s3cret "), &s), Err(GatewayError::InvalidToken)));
    assert!(matches!(authorize(None, &s), Err(GatewayError::InvalidToken)));
  }

  #[test]
  fn auto_token_accepts_anything_present() {
    let s = settings("auto");
    assert_eq!(authorize(Some("whatever"), &s).unwrap(), "whatever");
    assert!(authorize(None, &s).is_err());
  }

  #[test]
  fn profile_routes_use_profile_token() {
    let s = Settings {
      profile_token: "share".to_string(),
      ..settings("s3cret")
    };
    assert!(authorize_profile("share", &s).is_ok());
    assert!(authorize_profile("s3cret", &s).is_err());
    assert!(authorize_profile("", &s).is_err());
  }
}
