use super::legacy::{LegacyRunner, LegacySearch};
use super::{Adapter, AdapterKind, AdapterRequest, unsupported};
use crate::teamsl::builder;
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::html::TableSpec;
use crate::teamsl::models::Payload;
use crate::teamsl::raw::{RawBatch, RawRecord};
use async_trait::async_trait;
use tracing::info;

const KIND: AdapterKind = AdapterKind::SpielplanReport;

pub const REPORT_TABLE: TableSpec = TableSpec {
    headers: &["Liga", "Nr", "Datum", "Zeit", "Heim", "Gast", "Ergebnis"],
    id_keys: &["liga_id", "spielplan_id"],
    identity_key: "spielplan_id",
    min_cells: 6,
};

/// Club match report (`Action=106`), sorted by date on every page.
pub struct SpielplanReportAdapter {
    runner: LegacyRunner,
}

impl SpielplanReportAdapter {
    pub fn new(runner: LegacyRunner) -> Self {
        Self { runner }
    }

    fn search(club_name: &str, bezirk_id: i64) -> LegacySearch {
        LegacySearch {
            kind: KIND,
            page: format!("/index.jsp?Action=106&Bezirk={bezirk_id}"),
            page_query: "&sortierung=datum".to_string(),
            form: vec![
                ("Action".to_string(), "106".to_string()),
                ("Bezirk".to_string(), bezirk_id.to_string()),
                ("vereinsname".to_string(), club_name.to_string()),
                ("sortierung".to_string(), "datum".to_string()),
            ],
            table: REPORT_TABLE,
        }
    }
}

#[async_trait]
impl Adapter for SpielplanReportAdapter {
    fn kind(&self) -> AdapterKind {
        KIND
    }

    async fn fetch(&self, request: &AdapterRequest) -> Result<Payload, UpstreamError> {
        let AdapterRequest::ClubMatches {
            club_name,
            bezirk_id,
        } = request
        else {
            return Err(unsupported(KIND, request));
        };

        let paged = self.runner.run(&Self::search(club_name, *bezirk_id)).await?;
        let batch = RawBatch::from_records(
            paged.rows.iter().cloned().map(RawRecord::Row).collect(),
        );
        let matches = builder::club_matches(KIND, club_name, *bezirk_id, batch)?;
        info!(
            club = club_name.as_str(),
            bezirk_id,
            matches = matches.matches.len(),
            "Club match report assembled"
        );
        paged.finish(KIND, Payload::ClubMatches(matches))
    }
}
