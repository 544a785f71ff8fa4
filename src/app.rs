use crate::cache::persist::DiskStore;
use crate::cache::{CacheMode, CacheSettings, CacheStore};
use crate::cli::Command;
use crate::config::Config;
use crate::engine::LeagueEngine;
use crate::teamsl::models::{Payload, WamFilters};
use crate::teamsl::transport::{HttpTransport, RetryPolicy, Transport, Upstream};
use crate::teamsl::UpstreamError;
use crate::utils::fmt_duration;
use anyhow::Context;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Engine plus the background work that keeps its cache tidy.
pub struct App {
    config: Config,
    engine: Arc<LeagueEngine>,
    shutdown: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl App {
    /// Build the engine against the real upstream.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let transport = HttpTransport::new(config.request_timeout, config.min_request_interval)
            .context("Failed to create HTTP client")?;
        Self::with_transport(config, Arc::new(transport)).await
    }

    pub async fn with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, anyhow::Error> {
        let base_url = Url::parse(&config.upstream_base_url)
            .with_context(|| format!("Invalid upstream base URL {}", config.upstream_base_url))?;
        let retry = RetryPolicy {
            max_retries: config.retry_attempts,
            base_delay: config.retry_base_delay,
            ..RetryPolicy::default()
        };
        let upstream = Upstream::new(transport, retry, base_url);

        let settings = CacheSettings {
            retention: config.cache_retention(),
            fetch_deadline: config.fetch_deadline,
            inflight_watchdog: config.inflight_watchdog,
        };
        let disk = DiskStore::open(&config.cache_dir)
            .await
            .context("Failed to open cache directory")?;
        let cache = Arc::new(CacheStore::with_disk(settings, disk).await);

        let engine = Arc::new(LeagueEngine::new(upstream, cache, config.max_pages));
        info!(
            upstream = %config.upstream_base_url,
            cache_dir = %config.cache_dir.display(),
            retention = fmt_duration(config.cache_retention()),
            max_pages = config.max_pages,
            "Engine ready"
        );

        Ok(Self {
            config,
            engine,
            shutdown: CancellationToken::new(),
            sweeper: None,
        })
    }

    pub fn engine(&self) -> &Arc<LeagueEngine> {
        &self.engine
    }

    /// Periodically prune expired entries until [`App::shutdown`].
    pub fn spawn_cache_sweeper(&mut self) {
        let cache = self.engine.cache().clone();
        let interval = self.config.cache_sweep_interval;
        let token = self.shutdown.clone();
        self.sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired().await;
                        if removed > 0 {
                            info!(removed, remaining = cache.len(), "Expired cache entries swept");
                        }
                    }
                    _ = token.cancelled() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                }
            }
        }));
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.take()
            && let Err(e) = handle.await
        {
            warn!(error = ?e, "Cache sweeper did not stop cleanly");
        }
    }

    /// Run one CLI command and return its result as JSON.
    pub async fn execute(&self, command: Command, mode: CacheMode) -> Result<Value, UpstreamError> {
        let engine = &self.engine;
        let value = match command {
            Command::Schedule { league_id } => to_json(engine.league_schedule(league_id, mode).await?),
            Command::Actual { league_id } => to_json(engine.league_actual(league_id, mode).await?),
            Command::Match { match_id } => to_json(engine.match_info(match_id, mode).await?),
            Command::Leagues {
                verband_ids,
                gebiet_ids,
                ligatyp_ids,
                akg_geschlecht_ids,
                altersklasse_ids,
                spielklasse_ids,
                sort_by,
            } => {
                let filters = WamFilters {
                    verband_ids,
                    gebiet_ids,
                    ligatyp_ids,
                    akg_geschlecht_ids,
                    altersklasse_ids,
                    spielklasse_ids,
                    sort_by,
                };
                to_json(engine.search_leagues_by_filters(filters, mode).await?)
            }
            Command::Verbaende => to_json(engine.verbaende(mode).await?),
            Command::ClubLeagues {
                club_name,
                verband_id,
            } => to_json(
                engine
                    .search_leagues_by_club(&club_name, verband_id, mode)
                    .await?,
            ),
            Command::ClubMatches {
                club_name,
                bezirk_id,
            } => to_json(
                engine
                    .search_club_matches(&club_name, bezirk_id, mode)
                    .await?,
            ),
        };
        Ok(value)
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Value {
    // Domain types serialize infallibly: plain structs with string keys.
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// The partial result carried by a pagination failure, as JSON.
pub fn partial_payload(err: &UpstreamError) -> Option<Value> {
    match err {
        UpstreamError::PaginationInconsistency { partial, .. } => {
            Some(to_json::<&Payload>(partial))
        }
        _ => None,
    }
}
