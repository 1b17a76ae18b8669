use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose;
use base64::Engine;
use clap::Args as ClapArgs;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::fallback;
use crate::model::{Settings, Subscription};
use crate::source_fetch::{split_node_lines, SourceFetcher, DEFAULT_FETCH_TIMEOUT_MS};
use crate::store::{load_settings, FileStore};

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
  /// Directory holding the key-value store files.
  #[arg(long, default_value = "data")]
  pub store_dir: PathBuf,

  /// Aggregate only the sources of this profile (id or customId).
  #[arg(long)]
  pub profile: Option<String>,

  /// Per-source request timeout (ms).
  #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_MS)]
  pub fetch_timeout_ms: u64,
}

/// Splits every chunk into trimmed non-empty lines and drops repeats,
/// keeping the first occurrence.
pub fn merge_unique<I, S>(chunks: I) -> Vec<String>
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut out: Vec<String> = chunks
    .into_iter()
    .flat_map(|chunk| split_node_lines(chunk.as_ref()))
    .collect();
  let mut seen = HashSet::new();
  out.retain(|line| seen.insert(line.clone()));
  out
}

/// Base64 of the newline-joined node list, or the fallback payload when the
/// list is empty.
pub fn encode_nodes(nodes: &[String]) -> String {
  if nodes.is_empty() {
    info!("no nodes to serve, using fallback payload");
    return fallback::BASE64_NODES.to_string();
  }
  general_purpose::STANDARD.encode(nodes.join("\n"))
}

#[derive(Debug, Clone)]
pub struct Aggregator {
  fetcher: SourceFetcher,
}

impl Aggregator {
  pub fn new(fetcher: SourceFetcher) -> Self {
    Self { fetcher }
  }

  /// Merged, deduplicated node lines of all enabled sources. Subscriptions
  /// are fetched concurrently and all of them are awaited; a failed one
  /// contributes nothing.
  pub async fn collect(&self, sources: &[Subscription], settings: &Settings) -> Vec<String> {
    let (manual, remote): (Vec<&Subscription>, Vec<&Subscription>) = sources
      .iter()
      .filter(|s| s.enabled)
      .partition(|s| s.is_manual());

    let mut handles = Vec::with_capacity(remote.len());
    for source in remote {
      let fetcher = self.fetcher.clone();
      let source = source.clone();
      let prepend = settings.prepend_sub_name;
      handles.push(tokio::spawn(async move {
        fetcher.fetch(&source, prepend).await
      }));
    }

    let mut chunks: Vec<String> = manual.iter().map(|s| s.url.clone()).collect();
    for h in handles {
      match h.await {
        Ok(lines) => chunks.extend(lines),
        Err(err) => warn!(%err, "subscription task did not finish"),
      }
    }

    let nodes = merge_unique(&chunks);
    debug!(lines = chunks.len(), nodes = nodes.len(), "aggregated sources");
    nodes
  }

  pub async fn aggregate(&self, sources: &[Subscription], settings: &Settings) -> String {
    encode_nodes(&self.collect(sources, settings).await)
  }
}

pub async fn run(args: Args) -> Result<()> {
  let store = FileStore::new(&args.store_dir);
  let settings = load_settings(&store).await.context("load settings")?;
  let catalog = Catalog::load(&store).await.context("load catalog")?;

  let sources = match &args.profile {
    Some(key) => {
      let profile = catalog
        .find_profile(key)
        .ok_or_else(|| anyhow!("profile not found: {key}"))?;
      catalog.sources_for(profile)
    }
    None => catalog.misubs.clone(),
  };

  let fetcher = SourceFetcher::new(Duration::from_millis(args.fetch_timeout_ms))?;
  let body = Aggregator::new(fetcher).aggregate(&sources, &settings).await;
  println!("{body}");
  Ok(())
}
