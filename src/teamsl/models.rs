//! Normalized domain model produced by the builder and held by the cache.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A league as reported by the JSON endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
    pub id: i64,
    pub name: String,
    pub number: Option<String>,
    pub class: Option<String>,
    pub age_group: Option<String>,
    pub gender: Option<String>,
    pub association_id: Option<i64>,
    pub district_id: Option<i64>,
    pub season_id: Option<i64>,
    pub has_standings: bool,
    pub has_cross_table: bool,
}

/// Identity used to correlate teams across schedule and standings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamKey {
    pub permanent_id: i64,
    pub season_team_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub permanent_id: Option<i64>,
    pub season_team_id: Option<i64>,
    pub club_id: Option<i64>,
    pub name: String,
    pub short_name: Option<String>,
}

impl Team {
    /// A team known only by its display name (HTML report rows).
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            permanent_id: None,
            season_team_id: None,
            club_id: None,
            name: name.into(),
            short_name: None,
        }
    }

    /// `None` for teams without upstream ids; those are never correlated.
    pub fn key(&self) -> Option<TeamKey> {
        Some(TeamKey {
            permanent_id: self.permanent_id?,
            season_team_id: self.season_team_id?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: i64,
    pub league_id: i64,
    pub match_day: u32,
    pub match_number: u32,
    pub kickoff_date: Option<NaiveDate>,
    pub kickoff_time: Option<NaiveTime>,
    pub home: Team,
    pub guest: Team,
    pub result: Option<String>,
    pub score_home: Option<u32>,
    pub score_away: Option<u32>,
    pub finished: bool,
    pub confirmed: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingEntry {
    /// 1-based position in the order upstream returned it.
    pub rank: u32,
    pub team: Team,
    pub games_played: Option<u32>,
    pub wins: u32,
    pub losses: u32,
    pub points_for: Option<i64>,
    pub points_against: Option<i64>,
    pub basket_difference: Option<i64>,
    pub win_points: Option<i64>,
    pub loss_points: Option<i64>,
}

/// One row of the club-league search: a club's participation in a league.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubLeagueMembership {
    pub club_search: String,
    pub league_id: i64,
    pub league_name: String,
    pub league_number: Option<String>,
    pub class: Option<String>,
    pub age_group: Option<String>,
    pub gender: Option<String>,
    pub district: Option<String>,
    pub sub_district: Option<String>,
}

/// A regional association ("Verband") with its league count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verband {
    pub id: i64,
    pub label: String,
    pub hits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub name: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetail {
    #[serde(rename = "match")]
    pub game: Match,
    pub venue: Option<Venue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueSchedule {
    pub league_id: i64,
    pub league: Option<League>,
    pub matches: Vec<Match>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueActual {
    pub league_id: i64,
    pub league: Option<League>,
    pub standings: Vec<StandingEntry>,
    pub matches: Vec<Match>,
    /// Distinct teams seen in standings and matches, keyed by permanent + season id.
    pub teams: Vec<Team>,
}

/// The filters of a WAM league search, as sent and as echoed by upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WamFilters {
    #[serde(default)]
    pub verband_ids: Vec<i64>,
    #[serde(default)]
    pub gebiet_ids: Vec<String>,
    #[serde(default)]
    pub ligatyp_ids: Vec<i64>,
    #[serde(default)]
    pub akg_geschlecht_ids: Vec<String>,
    #[serde(default)]
    pub altersklasse_ids: Vec<i64>,
    #[serde(default)]
    pub spielklasse_ids: Vec<i64>,
    #[serde(default)]
    pub sort_by: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueSearchResult {
    pub filters: WamFilters,
    pub leagues: Vec<League>,
    /// Upstream holds more matches than it returned; parameters cannot page further.
    pub capped: bool,
    pub advice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubLeagues {
    pub club_name: String,
    pub verband_id: i64,
    pub leagues: Vec<ClubLeagueMembership>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubMatches {
    pub club_name: String,
    pub bezirk_id: i64,
    pub matches: Vec<Match>,
}

/// Everything the cache can hold, tagged so persisted files are self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Schedule(LeagueSchedule),
    Actual(LeagueActual),
    LeagueSearch(LeagueSearchResult),
    Verbaende(Vec<Verband>),
    ClubLeagues(ClubLeagues),
    ClubMatches(ClubMatches),
    MatchDetail(MatchDetail),
}

impl Payload {
    /// Number of top-level records, used in logs.
    pub fn record_count(&self) -> usize {
        match self {
            Self::Schedule(s) => s.matches.len(),
            Self::Actual(a) => a.standings.len() + a.matches.len(),
            Self::LeagueSearch(r) => r.leagues.len(),
            Self::Verbaende(v) => v.len(),
            Self::ClubLeagues(c) => c.leagues.len(),
            Self::ClubMatches(c) => c.matches.len(),
            Self::MatchDetail(_) => 1,
        }
    }
}
