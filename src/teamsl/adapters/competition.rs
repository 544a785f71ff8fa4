use super::{Adapter, AdapterKind, AdapterRequest, unsupported};
use crate::teamsl::builder;
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::json::parse_envelope;
use crate::teamsl::models::Payload;
use crate::teamsl::raw::{ActualData, RawBatch, RawMatch, RawRecord, ScheduleData};
use crate::teamsl::transport::{Upstream, UpstreamRequest};
use async_trait::async_trait;
use http::header::ACCEPT;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

const KIND: AdapterKind = AdapterKind::Competition;

/// Versioned JSON endpoints under `/rest/competition` and `/rest/match`.
pub struct CompetitionAdapter {
    upstream: Upstream,
}

impl CompetitionAdapter {
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let url = self.upstream.url(KIND, path)?;
        let request = UpstreamRequest::get(url).header(ACCEPT, "application/json");
        let response = self.upstream.execute(KIND, request).await?;
        parse_envelope(KIND, &response.body)
    }

    pub async fn fetch_schedule(&self, league_id: i64) -> Result<RawBatch, UpstreamError> {
        let data: ScheduleData = self
            .get_data(&format!("/rest/competition/spielplan/id/{league_id}"))
            .await?;

        let mut records = Vec::with_capacity(data.matches.len() + 1);
        records.extend(data.liga_data.map(RawRecord::League));
        records.extend(data.matches.into_iter().map(RawRecord::Match));
        debug!(league_id, records = records.len(), "Fetched schedule");
        Ok(RawBatch::from_records(records))
    }

    pub async fn fetch_actual(&self, league_id: i64) -> Result<RawBatch, UpstreamError> {
        let data: ActualData = self
            .get_data(&format!("/rest/competition/actual/id/{league_id}"))
            .await?;

        let entries = data.tabelle.map(|t| t.entries).unwrap_or_default();
        let mut records = Vec::with_capacity(entries.len() + data.matches.len() + 1);
        records.extend(data.liga_data.map(RawRecord::League));
        records.extend(entries.into_iter().map(RawRecord::Standing));
        records.extend(data.matches.into_iter().map(RawRecord::Match));
        debug!(league_id, records = records.len(), "Fetched actual");
        Ok(RawBatch::from_records(records))
    }

    pub async fn fetch_match_info(&self, match_id: i64) -> Result<RawBatch, UpstreamError> {
        let data: RawMatch = self
            .get_data(&format!("/rest/match/id/{match_id}/matchInfo"))
            .await?;
        Ok(RawBatch::from_records(vec![RawRecord::Match(data)]))
    }
}

#[async_trait]
impl Adapter for CompetitionAdapter {
    fn kind(&self) -> AdapterKind {
        KIND
    }

    async fn fetch(&self, request: &AdapterRequest) -> Result<Payload, UpstreamError> {
        let payload = match request {
            AdapterRequest::Schedule { league_id } => {
                let batch = self.fetch_schedule(*league_id).await?;
                Payload::Schedule(builder::schedule(KIND, *league_id, batch)?)
            }
            AdapterRequest::Actual { league_id } => {
                let batch = self.fetch_actual(*league_id).await?;
                Payload::Actual(builder::actual(KIND, *league_id, batch)?)
            }
            AdapterRequest::MatchInfo { match_id } => {
                let batch = self.fetch_match_info(*match_id).await?;
                Payload::MatchDetail(builder::match_detail(KIND, *match_id, batch)?)
            }
            other => return Err(unsupported(KIND, other)),
        };
        info!(
            operation = request.operation(),
            records = payload.record_count(),
            "Competition data normalized"
        );
        Ok(payload)
    }
}
