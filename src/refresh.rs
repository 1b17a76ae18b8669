use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use reqwest::Client;
use serde_yaml::Value as YamlValue;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::model::UserInfo;
use crate::node_link::count_node_lines;
use crate::source_fetch::{
  build_client, decode_subscription_body, read_body_capped, FetchError, DEFAULT_FETCH_TIMEOUT_MS,
  DEFAULT_MAX_BODY_BYTES,
};
use crate::store::FileStore;

/// Providers only send `subscription-userinfo` to clients they recognise.
const REFRESH_USER_AGENT: &str = "clash-verge/v1.7.7";
const USERINFO_HEADER: &str = "subscription-userinfo";

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
  /// Directory holding the key-value store files.
  #[arg(long, default_value = "data")]
  pub store_dir: PathBuf,

  /// Per-source request timeout (ms).
  #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_MS)]
  pub fetch_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceStats {
  pub node_count: u64,
  pub user_info: Option<UserInfo>,
}

fn looks_like_clash_yaml(text: &str) -> bool {
  text.lines().any(|line| line.trim_start().starts_with("proxies:"))
}

fn clash_proxy_count(text: &str) -> Option<usize> {
  let doc: YamlValue = serde_yaml::from_str(text).ok()?;
  doc.get("proxies")?.as_sequence().map(Vec::len)
}

/// Proxies in a subscription body: the `proxies` list of a Clash config,
/// otherwise node links in the (possibly base64) body.
pub fn count_nodes(body: &str) -> usize {
  if looks_like_clash_yaml(body) {
    if let Some(n) = clash_proxy_count(body) {
      return n;
    }
  }
  match decode_subscription_body(body) {
    Ok(text) => count_node_lines(&text),
    Err(_) => 0,
  }
}

async fn fetch_stats(client: &Client, url: &str) -> Result<SourceStats, FetchError> {
  let resp = client.get(url).send().await?;
  let status = resp.status();
  if !status.is_success() {
    return Err(FetchError::Status(status));
  }
  let user_info = resp
    .headers()
    .get(USERINFO_HEADER)
    .and_then(|v| v.to_str().ok())
    .and_then(UserInfo::parse_header);
  let body = read_body_capped(resp, DEFAULT_MAX_BODY_BYTES).await?;
  Ok(SourceStats {
    node_count: count_nodes(&body) as u64,
    user_info,
  })
}

/// Refreshes node count and traffic info of every enabled remote
/// subscription. Records whose fetch fails keep their previous values.
/// Returns the number of records updated.
pub async fn refresh_catalog(catalog: &mut Catalog, client: &Client) -> usize {
  let mut handles = Vec::new();
  for (idx, sub) in catalog.misubs.iter().enumerate() {
    if !sub.enabled || sub.is_manual() {
      continue;
    }
    let client = client.clone();
    let url = sub.url.clone();
    handles.push((idx, tokio::spawn(async move { fetch_stats(&client, &url).await })));
  }

  let mut updated = 0;
  for (idx, handle) in handles {
    let sub = &mut catalog.misubs[idx];
    match handle.await {
      Ok(Ok(stats)) => {
        info!(id = %sub.id, nodes = stats.node_count, "subscription refreshed");
        sub.node_count = Some(stats.node_count);
        if stats.user_info.is_some() {
          sub.user_info = stats.user_info;
        }
        updated += 1;
      }
      Ok(Err(err)) => warn!(id = %sub.id, url = %sub.url, %err, "refresh failed"),
      Err(err) => warn!(id = %sub.id, %err, "refresh task aborted"),
    }
  }
  updated
}

pub async fn run(args: Args) -> Result<()> {
  let store = FileStore::new(&args.store_dir);
  let mut catalog = Catalog::load(&store)
    .await
    .with_context(|| format!("load catalog from {}", args.store_dir.display()))?;
  let client = build_client(Duration::from_millis(args.fetch_timeout_ms), REFRESH_USER_AGENT)?;

  let updated = refresh_catalog(&mut catalog, &client).await;
  catalog.save(&store).await.context("save catalog")?;
  info!(updated, total = catalog.misubs.len(), "refresh complete");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use base64::engine::general_purpose;
  use base64::Engine;

  #[test]
  fn counts_clash_proxies() {
    let yaml = "port: 7890\nproxies:\n  - {name: a, type: ss, server: a.example.com, port: 1}\n  - {name: b, type: trojan, server: b.example.com, port: 2}\nproxy-groups: []\n";
    assert_eq!(count_nodes(yaml), 2);
  }

  #[test]
  fn counts_link_lists_plain_and_encoded() {
    let plain = "trojan://pw@a.example.com:443#A\nvless://id@b.example.com:443#B\n# comment\nhttps://not-a-node.example.com\n";
    assert_eq!(count_nodes(plain), 2);
    let wrapped = general_purpose::STANDARD.encode(plain);
    assert_eq!(count_nodes(&wrapped), 2);
  }

  #[test]
  fn broken_yaml_falls_back_to_line_count() {
    assert_eq!(count_nodes("proxies: [unterminated\nss://YWVzOnB3@h:1#x"), 1);
    assert_eq!(count_nodes(""), 0);
  }
}
