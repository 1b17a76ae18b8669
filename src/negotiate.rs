use std::fmt;

/// Output format requested by, or inferred for, a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  Base64,
  Clash,
  Singbox,
  Surge,
  /// Anything else; handed to the converter untouched.
  Other(String),
}

impl Target {
  pub fn parse(raw: &str) -> Self {
    match raw {
      "base64" => Target::Base64,
      "clash" => Target::Clash,
      "singbox" => Target::Singbox,
      "surge" => Target::Surge,
      other => Target::Other(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Target::Base64 => "base64",
      Target::Clash => "clash",
      Target::Singbox => "singbox",
      Target::Surge => "surge",
      Target::Other(s) => s,
    }
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// First matching row wins.
const USER_AGENT_RULES: &[(&[&str], Target)] = &[
  (&["clash", "stash"], Target::Clash),
  (&["sing-box", "neko", "qx"], Target::Singbox),
  (&["v2ray", "qv2ray", "nekobox"], Target::Base64),
  (&["surge"], Target::Surge),
];

/// An explicit `target` is used verbatim; otherwise the user agent decides,
/// defaulting to Clash.
pub fn resolve_target(query_target: Option<&str>, user_agent: &str) -> Target {
  if let Some(explicit) = query_target.filter(|t| !t.is_empty()) {
    return Target::parse(explicit);
  }
  let ua = user_agent.to_lowercase();
  USER_AGENT_RULES
    .iter()
    .find(|(needles, _)| needles.iter().any(|n| ua.contains(n)))
    .map(|(_, target)| target.clone())
    .unwrap_or(Target::Clash)
}
