//! Pre-normalization records: upstream JSON shapes and parsed HTML rows.
//!
//! Field names follow the upstream camelCase keys. Required fields are plain
//! types, so a missing or mistyped value is a deserialization error with a
//! path instead of a silent default.

use crate::teamsl::json::{lenient_opt_string, lenient_u32};
use crate::teamsl::models::WamFilters;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTeam {
    #[serde(default)]
    pub team_permanent_id: Option<i64>,
    #[serde(default)]
    pub season_team_id: Option<i64>,
    #[serde(default)]
    pub club_id: Option<i64>,
    #[serde(default)]
    pub teamname: Option<String>,
    #[serde(default)]
    pub teamname_small: Option<String>,
    #[serde(default)]
    pub verzicht: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeague {
    pub liga_id: i64,
    pub liganame: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub liganr: Option<String>,
    #[serde(default)]
    pub sk_name: Option<String>,
    #[serde(default)]
    pub ak_name: Option<String>,
    #[serde(default)]
    pub geschlecht: Option<String>,
    #[serde(default)]
    pub verband_id: Option<i64>,
    #[serde(default)]
    pub bezirk_id: Option<i64>,
    #[serde(default)]
    pub season_id: Option<i64>,
    #[serde(default)]
    pub table_exists: Option<bool>,
    #[serde(default)]
    pub cross_table_exists: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVenue {
    #[serde(default)]
    pub bezeichnung: Option<String>,
    #[serde(default)]
    pub strasse: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub plz: Option<String>,
    #[serde(default)]
    pub ort: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMatch {
    pub match_id: i64,
    pub match_day: u32,
    #[serde(default)]
    pub match_no: Option<u32>,
    #[serde(default)]
    pub kickoff_date: Option<String>,
    #[serde(default)]
    pub kickoff_time: Option<String>,
    pub home_team: RawTeam,
    pub guest_team: RawTeam,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub ergebnisbestaetigt: Option<bool>,
    #[serde(default)]
    pub abgesagt: Option<bool>,
    #[serde(default)]
    pub verzicht: Option<bool>,
    #[serde(default)]
    pub spielfeld: Option<RawVenue>,
    #[serde(default)]
    pub liga_data: Option<RawLeagueRef>,
}

/// League reference embedded in a match; only the id is read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeagueRef {
    pub liga_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStanding {
    pub team: RawTeam,
    #[serde(default)]
    pub anzspiele: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub s: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub n: u32,
    #[serde(default)]
    pub koerbe: Option<i64>,
    #[serde(default)]
    pub gegen_koerbe: Option<i64>,
    #[serde(default)]
    pub korbdiff: Option<i64>,
    #[serde(default)]
    pub anz_gewinnpunkte: Option<i64>,
    #[serde(default)]
    pub anz_verlustpunkte: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVerband {
    pub id: i64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub bezirk: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub hits: u32,
}

/// `data` of `/rest/competition/spielplan/id/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleData {
    #[serde(default)]
    pub liga_data: Option<RawLeague>,
    pub matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
pub struct RawTable {
    pub entries: Vec<RawStanding>,
}

/// `data` of `/rest/competition/actual/id/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualData {
    #[serde(default)]
    pub liga_data: Option<RawLeague>,
    #[serde(default)]
    pub tabelle: Option<RawTable>,
    #[serde(default)]
    pub matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeagueList {
    pub ligen: Vec<RawLeague>,
    #[serde(default)]
    pub has_more_data: bool,
}

/// `data` of `POST /rest/wam/data`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WamData {
    #[serde(default)]
    pub wam: Option<WamFilters>,
    #[serde(default)]
    pub liga_liste: Option<RawLeagueList>,
    #[serde(default)]
    pub verbaende: Vec<RawVerband>,
}

/// One data row of a legacy HTML result table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlRow {
    /// Cell text in documented column order; empty string for blank cells.
    pub cells: Vec<String>,
    /// Identifiers pulled from anchor targets, e.g. `("liga_id", 51529)`.
    pub ids: Vec<(String, i64)>,
}

impl HtmlRow {
    /// Non-empty text of the cell at `index`.
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells
            .get(index)
            .map(|c| c.as_str())
            .filter(|c| !c.is_empty())
    }

    /// First identifier extracted under `key`.
    pub fn id(&self, key: &str) -> Option<i64> {
        self.ids.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }
}

/// Adapter-specific unit of parsed data: one JSON array element or one HTML row.
#[derive(Debug, Clone)]
pub enum RawRecord {
    League(RawLeague),
    Match(RawMatch),
    Standing(RawStanding),
    Verband(RawVerband),
    Row(HtmlRow),
}

/// Everything one adapter run produced, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub records: Vec<RawRecord>,
    /// WAM only: upstream signalled it holds more rows than it returned.
    pub has_more_data: bool,
    /// WAM only: the filters as upstream understood them.
    pub echoed_filters: Option<WamFilters>,
}

impl RawBatch {
    pub fn from_records(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }
}
