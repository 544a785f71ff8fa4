use super::legacy::{LegacyRunner, LegacySearch};
use super::{Adapter, AdapterKind, AdapterRequest, unsupported};
use crate::teamsl::builder;
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::html::TableSpec;
use crate::teamsl::models::Payload;
use crate::teamsl::raw::{RawBatch, RawRecord};
use async_trait::async_trait;
use tracing::info;

const KIND: AdapterKind = AdapterKind::ClubLeagueSearch;

pub const LEAGUE_TABLE: TableSpec = TableSpec {
    headers: &["Klasse", "Alter", "m/w", "Bezirk", "Kreis", "Liganame", "Liganr"],
    id_keys: &["liga_id"],
    identity_key: "liga_id",
    min_cells: 6,
};

/// Form fields of the `Action=100` search; every filter other than the club
/// name is left at "all".
pub fn search_form(club_name: &str, verband_id: i64) -> Vec<(String, String)> {
    [
        ("Action", "100".to_string()),
        ("Verband", verband_id.to_string()),
        ("search", club_name.to_string()),
        ("cbSpielklasseFilter", "0".to_string()),
        ("spieltyp_id", "0".to_string()),
        ("cbAltersklasseFilter", "0".to_string()),
        ("cbGeschlechtFilter", "0".to_string()),
        ("cbBezirkFilter", "0".to_string()),
        ("cbKreisFilter", "0".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Leagues a club plays in, from the legacy league search form.
pub struct ClubLeagueSearchAdapter {
    runner: LegacyRunner,
}

impl ClubLeagueSearchAdapter {
    pub fn new(runner: LegacyRunner) -> Self {
        Self { runner }
    }

    fn search(club_name: &str, verband_id: i64) -> LegacySearch {
        LegacySearch {
            kind: KIND,
            page: format!("/index.jsp?Action=100&Verband={verband_id}"),
            page_query: String::new(),
            form: search_form(club_name, verband_id),
            table: LEAGUE_TABLE,
        }
    }
}

#[async_trait]
impl Adapter for ClubLeagueSearchAdapter {
    fn kind(&self) -> AdapterKind {
        KIND
    }

    async fn fetch(&self, request: &AdapterRequest) -> Result<Payload, UpstreamError> {
        let AdapterRequest::ClubLeagues {
            club_name,
            verband_id,
        } = request
        else {
            return Err(unsupported(KIND, request));
        };

        let paged = self.runner.run(&Self::search(club_name, *verband_id)).await?;
        let batch = RawBatch::from_records(
            paged.rows.iter().cloned().map(RawRecord::Row).collect(),
        );
        let leagues = builder::club_leagues(KIND, club_name, *verband_id, batch)?;
        info!(
            club = club_name.as_str(),
            verband_id,
            leagues = leagues.leagues.len(),
            "Club leagues assembled"
        );
        paged.finish(KIND, Payload::ClubLeagues(leagues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_form_fields() {
        let form = search_form("Eisbären Bremerhaven", 7);
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(form.len(), 9);
        assert_eq!(get("Action"), Some("100"));
        assert_eq!(get("Verband"), Some("7"));
        assert_eq!(get("search"), Some("Eisbären Bremerhaven"));
        assert_eq!(get("cbKreisFilter"), Some("0"));
    }
}
