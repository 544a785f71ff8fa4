//! Turns raw upstream records into domain entities.
//!
//! Everything here is pure: no I/O, no clock, no shared state. Each function
//! either produces entities that satisfy the model invariants or a
//! [`UpstreamError::Format`] naming what was wrong.

use crate::teamsl::adapters::AdapterKind;
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::models::{
    ClubLeagueMembership, ClubLeagues, ClubMatches, League, LeagueActual, LeagueSchedule,
    LeagueSearchResult, Match, MatchDetail, StandingEntry, Team, TeamKey, Venue, Verband,
    WamFilters,
};
use crate::teamsl::raw::{
    HtmlRow, RawBatch, RawLeague, RawMatch, RawRecord, RawStanding, RawTeam, RawVenue, RawVerband,
};
use chrono::{NaiveDate, NaiveTime};
use std::collections::HashMap;
use tracing::warn;

/// Advice attached to a WAM result that upstream truncated.
pub const CAPPED_ADVICE: &str =
    "Upstream returned a truncated league list; narrow the filters (association, age group, class) to see all results.";

/// Records of one batch, grouped by kind.
#[derive(Default)]
struct Grouped {
    leagues: Vec<RawLeague>,
    matches: Vec<RawMatch>,
    standings: Vec<RawStanding>,
    verbaende: Vec<RawVerband>,
    rows: Vec<HtmlRow>,
}

fn group(records: Vec<RawRecord>) -> Grouped {
    let mut grouped = Grouped::default();
    for record in records {
        match record {
            RawRecord::League(l) => grouped.leagues.push(l),
            RawRecord::Match(m) => grouped.matches.push(m),
            RawRecord::Standing(s) => grouped.standings.push(s),
            RawRecord::Verband(v) => grouped.verbaende.push(v),
            RawRecord::Row(r) => grouped.rows.push(r),
        }
    }
    grouped
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn league(raw: &RawLeague) -> League {
    League {
        id: raw.liga_id,
        name: raw.liganame.trim().to_string(),
        number: non_empty(raw.liganr.as_deref()),
        class: non_empty(raw.sk_name.as_deref()),
        age_group: non_empty(raw.ak_name.as_deref()),
        gender: non_empty(raw.geschlecht.as_deref()),
        association_id: raw.verband_id,
        district_id: raw.bezirk_id,
        season_id: raw.season_id,
        has_standings: raw.table_exists.unwrap_or(false),
        has_cross_table: raw.cross_table_exists.unwrap_or(false),
    }
}

pub fn team(adapter: AdapterKind, raw: &RawTeam) -> Result<Team, UpstreamError> {
    let name = non_empty(raw.teamname.as_deref())
        .or_else(|| non_empty(raw.teamname_small.as_deref()))
        .ok_or_else(|| UpstreamError::format(adapter, "team without a name"))?;

    Ok(Team {
        permanent_id: raw.team_permanent_id,
        season_team_id: raw.season_team_id,
        club_id: raw.club_id,
        name,
        short_name: non_empty(raw.teamname_small.as_deref()),
    })
}

/// Split `"76:64"` or `"76-64"` into home and away points.
pub fn parse_score(result: &str) -> Option<(u32, u32)> {
    let (home, away) = result.split_once(':').or_else(|| result.split_once('-'))?;
    Some((home.trim().parse().ok()?, away.trim().parse().ok()?))
}

/// ISO dates from the REST endpoints, `dd.mm.yyyy` from the legacy pages.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d.%m.%Y"))
        .ok()
}

pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

fn kickoff<T>(match_id: i64, field: &str, value: Option<&str>, parse: fn(&str) -> Option<T>) -> Option<T> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    let parsed = parse(value);
    if parsed.is_none() {
        warn!(match_id, field, value, "Unparseable kickoff value, leaving it empty");
    }
    parsed
}

/// Normalize one JSON match belonging to league `league_id`.
///
/// A match that names a different league than its batch is rejected.
pub fn game(adapter: AdapterKind, raw: &RawMatch, league_id: i64) -> Result<Match, UpstreamError> {
    if let Some(embedded) = &raw.liga_data
        && embedded.liga_id != league_id
    {
        return Err(UpstreamError::format(
            adapter,
            format!(
                "match {} belongs to league {} but was returned for league {league_id}",
                raw.match_id, embedded.liga_id
            ),
        ));
    }

    let home = team(adapter, &raw.home_team)?;
    let guest = team(adapter, &raw.guest_team)?;

    let result = non_empty(raw.result.as_deref());
    let (score_home, score_away) = match result.as_deref().and_then(parse_score) {
        Some((h, a)) => (Some(h), Some(a)),
        None => (None, None),
    };

    let cancelled = raw.abgesagt.unwrap_or(false)
        || raw.verzicht.unwrap_or(false)
        || raw.home_team.verzicht.unwrap_or(false)
        || raw.guest_team.verzicht.unwrap_or(false);

    Ok(Match {
        id: raw.match_id,
        league_id,
        match_day: raw.match_day,
        match_number: raw.match_no.unwrap_or(0),
        kickoff_date: kickoff(raw.match_id, "kickoffDate", raw.kickoff_date.as_deref(), parse_date),
        kickoff_time: kickoff(raw.match_id, "kickoffTime", raw.kickoff_time.as_deref(), parse_time),
        home,
        guest,
        finished: result.is_some(),
        result,
        score_home,
        score_away,
        confirmed: !cancelled && raw.ergebnisbestaetigt.unwrap_or(false),
        cancelled,
    })
}

/// Standings in upstream order; ranks are positions, never re-sorted.
pub fn standings(
    adapter: AdapterKind,
    raw: &[RawStanding],
) -> Result<Vec<StandingEntry>, UpstreamError> {
    raw.iter()
        .enumerate()
        .map(|(i, entry)| {
            Ok(StandingEntry {
                rank: u32::try_from(i + 1).unwrap_or(u32::MAX),
                team: team(adapter, &entry.team)?,
                games_played: entry.anzspiele,
                wins: entry.s,
                losses: entry.n,
                points_for: entry.koerbe,
                points_against: entry.gegen_koerbe,
                basket_difference: entry.korbdiff,
                win_points: entry.anz_gewinnpunkte,
                loss_points: entry.anz_verlustpunkte,
            })
        })
        .collect()
}

/// Distinct teams keyed by permanent id + season team id; first seen wins.
#[derive(Debug, Default)]
pub struct TeamIndex {
    teams: Vec<Team>,
    positions: HashMap<TeamKey, usize>,
}

impl TeamIndex {
    /// Record `team` unless its key was already seen. Teams without ids are
    /// never correlated and are skipped.
    pub fn insert(&mut self, team: &Team) {
        let Some(key) = team.key() else {
            return;
        };
        if self.positions.contains_key(&key) {
            return;
        }
        self.positions.insert(key, self.teams.len());
        self.teams.push(team.clone());
    }

    pub fn get(&self, key: &TeamKey) -> Option<&Team> {
        self.positions.get(key).map(|&i| &self.teams[i])
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    pub fn into_teams(self) -> Vec<Team> {
        self.teams
    }
}

/// The batch league must be the one that was asked for.
fn batch_league(
    adapter: AdapterKind,
    leagues: &[RawLeague],
    league_id: i64,
) -> Result<Option<League>, UpstreamError> {
    let Some(raw) = leagues.first() else {
        return Ok(None);
    };
    if raw.liga_id != league_id {
        return Err(UpstreamError::format(
            adapter,
            format!("requested league {league_id} but upstream returned league {}", raw.liga_id),
        ));
    }
    Ok(Some(league(raw)))
}

pub fn schedule(
    adapter: AdapterKind,
    league_id: i64,
    batch: RawBatch,
) -> Result<LeagueSchedule, UpstreamError> {
    let grouped = group(batch.records);
    let league = batch_league(adapter, &grouped.leagues, league_id)?;
    let matches = grouped
        .matches
        .iter()
        .map(|m| game(adapter, m, league_id))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LeagueSchedule {
        league_id,
        league,
        matches,
    })
}

pub fn actual(
    adapter: AdapterKind,
    league_id: i64,
    batch: RawBatch,
) -> Result<LeagueActual, UpstreamError> {
    let grouped = group(batch.records);
    let league = batch_league(adapter, &grouped.leagues, league_id)?;
    let standings = standings(adapter, &grouped.standings)?;
    let matches = grouped
        .matches
        .iter()
        .map(|m| game(adapter, m, league_id))
        .collect::<Result<Vec<_>, _>>()?;

    let mut index = TeamIndex::default();
    for entry in &standings {
        index.insert(&entry.team);
    }
    for m in &matches {
        index.insert(&m.home);
        index.insert(&m.guest);
    }

    Ok(LeagueActual {
        league_id,
        league,
        standings,
        matches,
        teams: index.into_teams(),
    })
}

pub fn league_search(requested: WamFilters, batch: RawBatch) -> LeagueSearchResult {
    let capped = batch.has_more_data;
    let grouped = group(batch.records);
    LeagueSearchResult {
        filters: batch.echoed_filters.unwrap_or(requested),
        leagues: grouped.leagues.iter().map(league).collect(),
        capped,
        advice: capped.then(|| CAPPED_ADVICE.to_string()),
    }
}

pub fn verband(raw: &RawVerband) -> Verband {
    let label = non_empty(raw.label.as_deref())
        .or_else(|| non_empty(raw.bezirk.as_deref()))
        .or_else(|| non_empty(raw.name.as_deref()))
        .unwrap_or_else(|| format!("Verband {}", raw.id));
    Verband {
        id: raw.id,
        label,
        hits: raw.hits,
    }
}

pub fn verbaende(batch: RawBatch) -> Vec<Verband> {
    group(batch.records).verbaende.iter().map(verband).collect()
}

fn venue(raw: &RawVenue) -> Option<Venue> {
    let venue = Venue {
        name: non_empty(raw.bezeichnung.as_deref()),
        street: non_empty(raw.strasse.as_deref()),
        postal_code: non_empty(raw.plz.as_deref()),
        city: non_empty(raw.ort.as_deref()),
    };
    let empty = venue.name.is_none()
        && venue.street.is_none()
        && venue.postal_code.is_none()
        && venue.city.is_none();
    (!empty).then_some(venue)
}

pub fn match_detail(
    adapter: AdapterKind,
    match_id: i64,
    batch: RawBatch,
) -> Result<MatchDetail, UpstreamError> {
    let grouped = group(batch.records);
    let raw = grouped
        .matches
        .first()
        .ok_or_else(|| UpstreamError::format(adapter, "match info without a match"))?;
    if raw.match_id != match_id {
        return Err(UpstreamError::format(
            adapter,
            format!("requested match {match_id} but upstream returned {}", raw.match_id),
        ));
    }
    let league_id = raw
        .liga_data
        .as_ref()
        .map(|l| l.liga_id)
        .ok_or_else(|| UpstreamError::format(adapter, "match info without league reference"))?;

    Ok(MatchDetail {
        game: game(adapter, raw, league_id)?,
        venue: raw.spielfeld.as_ref().and_then(venue),
    })
}

/// Club-league search columns: Klasse, Alter, m/w, Bezirk, Kreis, Liganame, Liganr.
pub fn club_leagues(
    adapter: AdapterKind,
    club_name: &str,
    verband_id: i64,
    batch: RawBatch,
) -> Result<ClubLeagues, UpstreamError> {
    let leagues = group(batch.records)
        .rows
        .iter()
        .map(|row| membership(adapter, club_name, row))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClubLeagues {
        club_name: club_name.to_string(),
        verband_id,
        leagues,
    })
}

fn membership(
    adapter: AdapterKind,
    club_name: &str,
    row: &HtmlRow,
) -> Result<ClubLeagueMembership, UpstreamError> {
    let league_id = row
        .id("liga_id")
        .ok_or_else(|| UpstreamError::format(adapter, format!("league row without liga_id: {:?}", row.cells)))?;
    let league_name = row
        .cell(5)
        .ok_or_else(|| UpstreamError::format(adapter, format!("league row {league_id} without a name")))?;

    Ok(ClubLeagueMembership {
        club_search: club_name.to_string(),
        league_id,
        league_name: league_name.to_string(),
        league_number: row.cell(6).map(str::to_string),
        class: row.cell(0).map(str::to_string),
        age_group: row.cell(1).map(str::to_string),
        gender: row.cell(2).map(str::to_string),
        district: row.cell(3).map(str::to_string),
        sub_district: row.cell(4).map(str::to_string),
    })
}

/// Spielplan report columns: Liga, Nr, Datum, Zeit, Heim, Gast, Ergebnis.
pub fn club_matches(
    adapter: AdapterKind,
    club_name: &str,
    bezirk_id: i64,
    batch: RawBatch,
) -> Result<ClubMatches, UpstreamError> {
    let matches = group(batch.records)
        .rows
        .iter()
        .map(|row| report_match(adapter, row))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClubMatches {
        club_name: club_name.to_string(),
        bezirk_id,
        matches,
    })
}

fn report_match(adapter: AdapterKind, row: &HtmlRow) -> Result<Match, UpstreamError> {
    let id = row
        .id("spielplan_id")
        .ok_or_else(|| UpstreamError::format(adapter, format!("report row without spielplan_id: {:?}", row.cells)))?;
    let league_id = row
        .id("liga_id")
        .ok_or_else(|| UpstreamError::format(adapter, format!("report row {id} without liga_id")))?;
    let home = row
        .cell(4)
        .ok_or_else(|| UpstreamError::format(adapter, format!("report row {id} without home team")))?;
    let guest = row
        .cell(5)
        .ok_or_else(|| UpstreamError::format(adapter, format!("report row {id} without guest team")))?;

    let match_number = match row.cell(1) {
        Some(nr) => nr.parse().map_err(|_| {
            UpstreamError::format(adapter, format!("report row {id} has non-numeric Nr {nr:?}"))
        })?,
        None => 0,
    };

    let outcome = row.cell(6).map(str::trim).filter(|o| !o.is_empty() && *o != "-");
    let cancelled = outcome.is_some_and(|o| {
        let o = o.to_lowercase();
        o.contains("abgesagt") || o.contains("verzicht")
    });
    let result = outcome.filter(|_| !cancelled).map(str::to_string);
    let score = result.as_deref().and_then(parse_score);

    Ok(Match {
        id,
        league_id,
        match_day: 0,
        match_number,
        kickoff_date: kickoff(id, "Datum", row.cell(2), parse_date),
        kickoff_time: kickoff(id, "Zeit", row.cell(3), parse_time),
        home: Team::named(home),
        guest: Team::named(guest),
        finished: result.is_some(),
        result,
        score_home: score.map(|(h, _)| h),
        score_away: score.map(|(_, a)| a),
        confirmed: false,
        cancelled,
    })
}
