//! The call contract: one method per upstream operation, each answered from
//! the cache or, on a miss, by exactly one adapter.

use crate::cache::key::normalize_text;
use crate::cache::{CacheKey, CacheMode, CacheStore};
use crate::teamsl::adapters::{
    Adapter, AdapterKind, AdapterRequest, ClubLeagueSearchAdapter, CompetitionAdapter,
    SpielplanReportAdapter, WamSearchAdapter, legacy::LegacyRunner,
};
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::models::{
    ClubLeagues, ClubMatches, LeagueActual, LeagueSchedule, LeagueSearchResult, MatchDetail,
    Payload, Verband, WamFilters,
};
use crate::teamsl::session::SessionManager;
use crate::teamsl::transport::Upstream;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct LeagueEngine {
    cache: Arc<CacheStore<Payload>>,
    competition: CompetitionAdapter,
    wam: WamSearchAdapter,
    club_leagues: ClubLeagueSearchAdapter,
    spielplan_report: SpielplanReportAdapter,
}

impl LeagueEngine {
    pub fn new(upstream: Upstream, cache: Arc<CacheStore<Payload>>, max_pages: u32) -> Self {
        let runner = LegacyRunner::new(SessionManager::new(upstream.clone()), max_pages);
        Self {
            cache,
            competition: CompetitionAdapter::new(upstream.clone()),
            wam: WamSearchAdapter::new(upstream),
            club_leagues: ClubLeagueSearchAdapter::new(runner.clone()),
            spielplan_report: SpielplanReportAdapter::new(runner),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore<Payload>> {
        &self.cache
    }

    fn adapter(&self, kind: AdapterKind) -> &dyn Adapter {
        match kind {
            AdapterKind::Competition => &self.competition,
            AdapterKind::WamSearch => &self.wam,
            AdapterKind::ClubLeagueSearch => &self.club_leagues,
            AdapterKind::SpielplanReport => &self.spielplan_report,
        }
    }

    /// Answer `request` from the cache, fetching through its adapter on a miss.
    pub async fn fetch(
        &self,
        request: &AdapterRequest,
        mode: CacheMode,
    ) -> Result<Arc<Payload>, UpstreamError> {
        let key = CacheKey::for_request(request);
        let adapter = self.adapter(request.adapter());
        let start = Instant::now();

        let payload = self
            .cache
            .get_or_fetch(&key, mode, || adapter.fetch(request))
            .await?;

        debug!(
            %key,
            records = payload.record_count(),
            duration = crate::utils::fmt_duration(start.elapsed()),
            "Request answered"
        );
        Ok(payload)
    }

    pub async fn league_schedule(
        &self,
        league_id: i64,
        mode: CacheMode,
    ) -> Result<LeagueSchedule, UpstreamError> {
        let request = AdapterRequest::Schedule { league_id };
        match &*self.fetch(&request, mode).await? {
            Payload::Schedule(schedule) => Ok(schedule.clone()),
            other => Err(mismatch(&request, other)),
        }
    }

    pub async fn league_actual(
        &self,
        league_id: i64,
        mode: CacheMode,
    ) -> Result<LeagueActual, UpstreamError> {
        let request = AdapterRequest::Actual { league_id };
        match &*self.fetch(&request, mode).await? {
            Payload::Actual(actual) => Ok(actual.clone()),
            other => Err(mismatch(&request, other)),
        }
    }

    pub async fn match_info(
        &self,
        match_id: i64,
        mode: CacheMode,
    ) -> Result<MatchDetail, UpstreamError> {
        let request = AdapterRequest::MatchInfo { match_id };
        match &*self.fetch(&request, mode).await? {
            Payload::MatchDetail(detail) => Ok(detail.clone()),
            other => Err(mismatch(&request, other)),
        }
    }

    /// League directory search. A capped result is still a success; check
    /// [`LeagueSearchResult::capped`].
    pub async fn search_leagues_by_filters(
        &self,
        filters: WamFilters,
        mode: CacheMode,
    ) -> Result<LeagueSearchResult, UpstreamError> {
        let request = AdapterRequest::LeagueSearch { filters };
        match &*self.fetch(&request, mode).await? {
            Payload::LeagueSearch(result) => Ok(result.clone()),
            other => Err(mismatch(&request, other)),
        }
    }

    pub async fn verbaende(&self, mode: CacheMode) -> Result<Vec<Verband>, UpstreamError> {
        let request = AdapterRequest::Verbaende;
        match &*self.fetch(&request, mode).await? {
            Payload::Verbaende(verbaende) => Ok(verbaende.clone()),
            other => Err(mismatch(&request, other)),
        }
    }

    /// Every league `club_name` plays in within association `verband_id`.
    /// The name is trimmed and NFC-normalized before it is submitted.
    pub async fn search_leagues_by_club(
        &self,
        club_name: &str,
        verband_id: i64,
        mode: CacheMode,
    ) -> Result<ClubLeagues, UpstreamError> {
        let request = AdapterRequest::ClubLeagues {
            club_name: normalize_text(club_name),
            verband_id,
        };
        match &*self.fetch(&request, mode).await? {
            Payload::ClubLeagues(leagues) => Ok(leagues.clone()),
            other => Err(mismatch(&request, other)),
        }
    }

    /// All matches of `club_name` in district `bezirk_id`, ordered by date.
    pub async fn search_club_matches(
        &self,
        club_name: &str,
        bezirk_id: i64,
        mode: CacheMode,
    ) -> Result<ClubMatches, UpstreamError> {
        let request = AdapterRequest::ClubMatches {
            club_name: normalize_text(club_name),
            bezirk_id,
        };
        match &*self.fetch(&request, mode).await? {
            Payload::ClubMatches(matches) => Ok(matches.clone()),
            other => Err(mismatch(&request, other)),
        }
    }
}

fn mismatch(request: &AdapterRequest, payload: &Payload) -> UpstreamError {
    UpstreamError::format(
        request.adapter(),
        format!(
            "{} produced a payload of the wrong shape ({} records)",
            request.operation(),
            payload.record_count()
        ),
    )
}
