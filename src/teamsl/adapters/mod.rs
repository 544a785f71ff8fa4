//! Protocol adapters, one per upstream access pattern.
//!
//! A request names exactly one adapter through [`AdapterRequest::adapter`];
//! the engine never mixes them.

mod club_leagues;
mod competition;
pub mod legacy;
mod spielplan_report;
mod wam;

pub use club_leagues::ClubLeagueSearchAdapter;
pub use competition::CompetitionAdapter;
pub use spielplan_report::SpielplanReportAdapter;
pub use wam::WamSearchAdapter;

use crate::teamsl::errors::UpstreamError;
use crate::teamsl::models::{Payload, WamFilters};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// Stateless JSON: schedule, actual and match info.
    Competition,
    /// Stateless JSON POST with server-capped results.
    WamSearch,
    /// Cookie-backed HTML form, `Action=100`.
    ClubLeagueSearch,
    /// Cookie-backed HTML form, `Action=106`.
    SpielplanReport,
}

impl AdapterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Competition => "competition",
            Self::WamSearch => "wam-search",
            Self::ClubLeagueSearch => "club-league-search",
            Self::SpielplanReport => "spielplan-report",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a caller can ask the upstream for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterRequest {
    Schedule { league_id: i64 },
    Actual { league_id: i64 },
    MatchInfo { match_id: i64 },
    LeagueSearch { filters: WamFilters },
    Verbaende,
    ClubLeagues { club_name: String, verband_id: i64 },
    ClubMatches { club_name: String, bezirk_id: i64 },
}

fn join_ids<T: ToString>(ids: &[T]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

impl AdapterRequest {
    pub fn adapter(&self) -> AdapterKind {
        match self {
            Self::Schedule { .. } | Self::Actual { .. } | Self::MatchInfo { .. } => {
                AdapterKind::Competition
            }
            Self::LeagueSearch { .. } | Self::Verbaende => AdapterKind::WamSearch,
            Self::ClubLeagues { .. } => AdapterKind::ClubLeagueSearch,
            Self::ClubMatches { .. } => AdapterKind::SpielplanReport,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Schedule { .. } => "schedule",
            Self::Actual { .. } => "actual",
            Self::MatchInfo { .. } => "match-info",
            Self::LeagueSearch { .. } => "league-search",
            Self::Verbaende => "verbaende",
            Self::ClubLeagues { .. } => "club-leagues",
            Self::ClubMatches { .. } => "club-matches",
        }
    }

    /// Parameters that identify the request, by name.
    pub fn params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        match self {
            Self::Schedule { league_id } | Self::Actual { league_id } => {
                params.insert("league_id", league_id.to_string());
            }
            Self::MatchInfo { match_id } => {
                params.insert("match_id", match_id.to_string());
            }
            Self::LeagueSearch { filters } => {
                params.insert("verband_ids", join_ids(&filters.verband_ids));
                params.insert("gebiet_ids", join_ids(&filters.gebiet_ids));
                params.insert("ligatyp_ids", join_ids(&filters.ligatyp_ids));
                params.insert("akg_geschlecht_ids", join_ids(&filters.akg_geschlecht_ids));
                params.insert("altersklasse_ids", join_ids(&filters.altersklasse_ids));
                params.insert("spielklasse_ids", join_ids(&filters.spielklasse_ids));
                params.insert("sort_by", filters.sort_by.to_string());
            }
            Self::Verbaende => {}
            Self::ClubLeagues {
                club_name,
                verband_id,
            } => {
                params.insert("club_name", club_name.clone());
                params.insert("verband_id", verband_id.to_string());
            }
            Self::ClubMatches {
                club_name,
                bezirk_id,
            } => {
                params.insert("club_name", club_name.clone());
                params.insert("bezirk_id", bezirk_id.to_string());
            }
        }
        params
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Fetch and normalize one request. Requests for another adapter are a
    /// format error, never a panic.
    async fn fetch(&self, request: &AdapterRequest) -> Result<Payload, UpstreamError>;
}

pub(crate) fn unsupported(kind: AdapterKind, request: &AdapterRequest) -> UpstreamError {
    UpstreamError::format(
        kind,
        format!("request {} is not handled by this adapter", request.operation()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_is_one_to_one() {
        let cases = [
            (AdapterRequest::Schedule { league_id: 1 }, AdapterKind::Competition),
            (AdapterRequest::Actual { league_id: 1 }, AdapterKind::Competition),
            (AdapterRequest::Verbaende, AdapterKind::WamSearch),
            (
                AdapterRequest::ClubLeagues {
                    club_name: "Eisbären Bremerhaven".into(),
                    verband_id: 7,
                },
                AdapterKind::ClubLeagueSearch,
            ),
            (
                AdapterRequest::ClubMatches {
                    club_name: "Eisbären Bremerhaven".into(),
                    bezirk_id: 3,
                },
                AdapterKind::SpielplanReport,
            ),
        ];
        for (request, kind) in cases {
            assert_eq!(request.adapter(), kind, "{}", request.operation());
        }
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&AdapterKind::ClubLeagueSearch).unwrap();
        assert_eq!(json, "\"club-league-search\"");
        assert_eq!(AdapterKind::WamSearch.to_string(), "wam-search");
    }
}
