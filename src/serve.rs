use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use clap::Args as ClapArgs;
use serde::Deserialize;
use tracing::{debug, info};

use crate::access;
use crate::aggregate::{encode_nodes, Aggregator};
use crate::catalog::Catalog;
use crate::convert::{
  callback_url, local_fallback, ConvertRequest, ConverterBridge, DEFAULT_CONVERT_TIMEOUT_MS,
};
use crate::error::GatewayError;
use crate::fallback;
use crate::negotiate::{resolve_target, Target};
use crate::source_fetch::{SourceFetcher, DEFAULT_FETCH_TIMEOUT_MS};
use crate::store::{load_settings, FileStore, KvStore};

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
  /// Address to listen on.
  #[arg(long, default_value = "127.0.0.1:8787")]
  pub listen: SocketAddr,

  /// Directory holding the key-value store files.
  #[arg(long, default_value = "data")]
  pub store_dir: PathBuf,

  /// Public base URL of this service, e.g. https://sub.example.com. Used for
  /// converter callbacks; derived from Host / X-Forwarded-Proto when omitted.
  #[arg(long)]
  pub public_url: Option<String>,

  /// Per-source request timeout (ms).
  #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_MS)]
  pub fetch_timeout_ms: u64,

  /// Converter request timeout (ms).
  #[arg(long, default_value_t = DEFAULT_CONVERT_TIMEOUT_MS)]
  pub convert_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
  pub fetch_timeout: Duration,
  pub convert_timeout: Duration,
  pub public_url: Option<String>,
}

impl Default for ServeOptions {
  fn default() -> Self {
    Self {
      fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
      convert_timeout: Duration::from_millis(DEFAULT_CONVERT_TIMEOUT_MS),
      public_url: None,
    }
  }
}

impl From<&Args> for ServeOptions {
  fn from(args: &Args) -> Self {
    Self {
      fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
      convert_timeout: Duration::from_millis(args.convert_timeout_ms),
      public_url: args.public_url.clone(),
    }
  }
}

#[derive(Clone)]
pub struct AppState {
  store: Arc<dyn KvStore>,
  aggregator: Aggregator,
  converter: ConverterBridge,
  public_url: Option<String>,
}

impl AppState {
  pub fn new(store: Arc<dyn KvStore>, options: &ServeOptions) -> reqwest::Result<Self> {
    Ok(Self {
      store,
      aggregator: Aggregator::new(SourceFetcher::new(options.fetch_timeout)?),
      converter: ConverterBridge::new(options.convert_timeout)?,
      public_url: options.public_url.clone(),
    })
  }

  fn base_url(&self, headers: &HeaderMap) -> String {
    if let Some(url) = &self.public_url {
      return url.trim_end_matches('/').to_string();
    }
    let scheme = headers
      .get("x-forwarded-proto")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.split(',').next())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .unwrap_or("http");
    let host = headers
      .get(header::HOST)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("localhost");
    format!("{scheme}://{host}")
  }

  async fn convert(&self, request: &ConvertRequest<'_>) -> Result<Response, GatewayError> {
    if request.converter.trim().is_empty() {
      return local_fallback(request.target, request.file_name)
        .ok_or_else(|| GatewayError::ConverterUnavailable(request.target.to_string()));
    }
    Ok(self.converter.convert(request).await?.into_response())
  }
}

#[derive(Debug, Default, Deserialize)]
struct SubQuery {
  token: Option<String>,
  target: Option<String>,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/healthz", get(healthz))
    .route("/sub", get(sub_by_query))
    .route("/{token}", get(sub_by_path))
    .route("/{token}/{profile}", get(sub_by_profile))
    .with_state(state)
}

fn user_agent(headers: &HeaderMap) -> &str {
  headers
    .get(header::USER_AGENT)
    .and_then(|v| v.to_str().ok())
    .unwrap_or("")
}

fn base64_response(body: String) -> Response {
  (
    [
      (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
      (header::CACHE_CONTROL, "no-store"),
    ],
    body,
  )
    .into_response()
}

async fn healthz() -> &'static str {
  "ok"
}

async fn sub_by_query(
  State(state): State<AppState>,
  headers: HeaderMap,
  Query(q): Query<SubQuery>,
) -> Result<Response, GatewayError> {
  let token = access::resolve_token(None, q.token.as_deref());
  serve_all(&state, &headers, token, q.target.as_deref()).await
}

async fn sub_by_path(
  State(state): State<AppState>,
  Path(segment): Path<String>,
  headers: HeaderMap,
  Query(q): Query<SubQuery>,
) -> Result<Response, GatewayError> {
  let token = access::resolve_token(Some(&segment), q.token.as_deref());
  serve_all(&state, &headers, token, q.target.as_deref()).await
}

async fn serve_all(
  state: &AppState,
  headers: &HeaderMap,
  token: Option<&str>,
  target: Option<&str>,
) -> Result<Response, GatewayError> {
  let settings = load_settings(state.store.as_ref()).await?;
  let token = access::authorize(token, &settings)?;
  let target = resolve_target(target, user_agent(headers));
  debug!(format = %target, "serving all sources");

  if target == Target::Base64 {
    let catalog = Catalog::load(state.store.as_ref()).await?;
    let body = state.aggregator.aggregate(&catalog.misubs, &settings).await;
    return Ok(base64_response(body));
  }

  let callback = callback_url(&state.base_url(headers), &[token]);
  state
    .convert(&ConvertRequest {
      target: &target,
      callback_url: &callback,
      converter: &settings.sub_converter,
      config: &settings.sub_config,
      file_name: &settings.file_name,
    })
    .await
}

async fn sub_by_profile(
  State(state): State<AppState>,
  Path((token, profile_key)): Path<(String, String)>,
  headers: HeaderMap,
  Query(q): Query<SubQuery>,
) -> Result<Response, GatewayError> {
  let settings = load_settings(state.store.as_ref()).await?;
  access::authorize_profile(&token, &settings)?;

  let catalog = Catalog::load(state.store.as_ref()).await?;
  let profile = catalog
    .find_profile(&profile_key)
    .filter(|p| p.enabled)
    .ok_or(GatewayError::ProfileNotFound)?;
  let target = resolve_target(q.target.as_deref(), user_agent(&headers));
  debug!(profile = %profile.id, format = %target, "serving profile");

  if target == Target::Base64 {
    if profile.is_expired(Utc::now()) {
      info!(profile = %profile.id, "profile expired, serving notice");
      return Ok(base64_response(encode_nodes(&[fallback::EXPIRED_NODE.to_string()])));
    }
    let sources = catalog.sources_for(profile);
    let body = state.aggregator.aggregate(&sources, &settings).await;
    return Ok(base64_response(body));
  }

  let callback = callback_url(&state.base_url(&headers), &[token.as_str(), profile_key.as_str()]);
  let file_name = if profile.name.trim().is_empty() {
    settings.file_name.as_str()
  } else {
    profile.name.as_str()
  };
  state
    .convert(&ConvertRequest {
      target: &target,
      callback_url: &callback,
      converter: profile.converter_override().unwrap_or(settings.sub_converter.as_str()),
      config: profile.config_override().unwrap_or(settings.sub_config.as_str()),
      file_name,
    })
    .await
}

async fn shutdown_signal() {
  if tokio::signal::ctrl_c().await.is_err() {
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}

pub async fn run(args: Args) -> Result<()> {
  let store: Arc<dyn KvStore> = Arc::new(FileStore::new(&args.store_dir));
  let state = AppState::new(store, &ServeOptions::from(&args)).context("build http clients")?;

  let listener = tokio::net::TcpListener::bind(args.listen)
    .await
    .with_context(|| format!("bind {}", args.listen))?;
  info!(
    addr = %listener.local_addr()?,
    store = %args.store_dir.display(),
    "serving subscriptions"
  );

  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server")?;
  Ok(())
}
