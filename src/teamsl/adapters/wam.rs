use super::{Adapter, AdapterKind, AdapterRequest, unsupported};
use crate::teamsl::builder;
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::json::parse_envelope;
use crate::teamsl::models::{Payload, WamFilters};
use crate::teamsl::raw::{RawBatch, RawRecord, WamData};
use crate::teamsl::transport::{Upstream, UpstreamRequest};
use async_trait::async_trait;
use http::header::ACCEPT;
use serde_json::{Value, json};
use tracing::{info, warn};

const KIND: AdapterKind = AdapterKind::WamSearch;
const WAM_PATH: &str = "/rest/wam/data";

/// League directory search (`POST /rest/wam/data`).
///
/// The endpoint accepts no paging parameters and silently truncates large
/// result sets; truncation is reported through `hasMoreData` only.
pub struct WamSearchAdapter {
    upstream: Upstream,
}

impl WamSearchAdapter {
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }

    async fn post(&self, body: Value) -> Result<WamData, UpstreamError> {
        let url = self.upstream.url(KIND, WAM_PATH)?;
        let request = UpstreamRequest::post_json(url, body).header(ACCEPT, "application/json");
        let response = self.upstream.execute(KIND, request).await?;
        parse_envelope(KIND, &response.body)
    }

    pub async fn fetch_leagues(&self, filters: &WamFilters) -> Result<RawBatch, UpstreamError> {
        let mut body = serde_json::to_value(filters)
            .map_err(|e| UpstreamError::format(KIND, format!("unserializable filters: {e}")))?;
        if let Value::Object(map) = &mut body {
            map.insert("token".to_string(), Value::String(String::new()));
        }

        let data = self.post(body).await?;
        let list = data
            .liga_liste
            .ok_or_else(|| UpstreamError::format(KIND, "response has no ligaListe"))?;

        if list.has_more_data {
            warn!(
                returned = list.ligen.len(),
                ?filters,
                "League search was capped by upstream"
            );
        }

        Ok(RawBatch {
            records: list.ligen.into_iter().map(RawRecord::League).collect(),
            has_more_data: list.has_more_data,
            echoed_filters: data.wam,
        })
    }

    pub async fn fetch_verbaende(&self) -> Result<RawBatch, UpstreamError> {
        let data = self.post(json!({})).await?;
        Ok(RawBatch::from_records(
            data.verbaende.into_iter().map(RawRecord::Verband).collect(),
        ))
    }
}

#[async_trait]
impl Adapter for WamSearchAdapter {
    fn kind(&self) -> AdapterKind {
        KIND
    }

    async fn fetch(&self, request: &AdapterRequest) -> Result<Payload, UpstreamError> {
        let payload = match request {
            AdapterRequest::LeagueSearch { filters } => {
                let batch = self.fetch_leagues(filters).await?;
                Payload::LeagueSearch(builder::league_search(filters.clone(), batch))
            }
            AdapterRequest::Verbaende => {
                let batch = self.fetch_verbaende().await?;
                Payload::Verbaende(builder::verbaende(batch))
            }
            other => return Err(unsupported(KIND, other)),
        };
        info!(
            operation = request.operation(),
            records = payload.record_count(),
            "WAM data normalized"
        );
        Ok(payload)
    }
}
