#![allow(dead_code)]

use async_trait::async_trait;
use http::HeaderValue;
use http::header::{COOKIE, HeaderMap, SET_COOKIE};
use serde_json::{Value, json};
use slapi::cache::{CacheSettings, CacheStore};
use slapi::engine::LeagueEngine;
use slapi::teamsl::errors::TransportError;
use slapi::teamsl::transport::{
    Body, Method, RetryPolicy, Transport, Upstream, UpstreamRequest, UpstreamResponse,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const BASE_URL: &str = "https://www.basketball-bund.net";
pub const SESSION_COOKIE: &str = "JSESSIONID=4F2A9C0D1B";

/// What the fake upstream saw of one request.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: Url,
    pub cookie: Option<String>,
    pub form: Vec<(String, String)>,
    pub json: Option<Value>,
}

impl Recorded {
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    pub fn form_field(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

type Handler = dyn Fn(&Recorded) -> UpstreamResponse + Send + Sync;

/// Scripted upstream: every request is recorded and answered by `handler`.
pub struct FakeTransport {
    handler: Box<Handler>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Recorded>>,
}

impl FakeTransport {
    pub fn new(handler: impl Fn(&Recorded) -> UpstreamResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let (form, json) = match request.body {
            Body::Empty => (Vec::new(), None),
            Body::Form(fields) => (fields, None),
            Body::Json(value) => (Vec::new(), Some(value)),
        };
        let recorded = Recorded {
            method: request.method,
            url: request.url,
            cookie: request
                .headers
                .get(COOKIE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            form,
            json,
        };
        self.requests.lock().unwrap().push(recorded.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok((self.handler)(&recorded))
    }
}

pub fn respond(status: u16, body: impl Into<String>) -> UpstreamResponse {
    UpstreamResponse {
        status,
        headers: HeaderMap::new(),
        body: body.into(),
    }
}

pub fn ok(body: impl Into<String>) -> UpstreamResponse {
    respond(200, body)
}

pub fn with_session_cookie(mut response: UpstreamResponse) -> UpstreamResponse {
    response.headers.append(
        SET_COOKIE,
        HeaderValue::from_str(&format!("{SESSION_COOKIE}; Path=/; HttpOnly")).unwrap(),
    );
    response
}

pub fn engine_with(transport: Arc<FakeTransport>, settings: CacheSettings, max_pages: u32) -> LeagueEngine {
    let upstream = Upstream::new(transport, RetryPolicy::none(), Url::parse(BASE_URL).unwrap());
    LeagueEngine::new(upstream, Arc::new(CacheStore::new(settings)), max_pages)
}

pub fn engine(transport: Arc<FakeTransport>) -> LeagueEngine {
    engine_with(
        transport,
        CacheSettings {
            retention: Duration::from_secs(30 * 60),
            fetch_deadline: Duration::from_secs(5),
            inflight_watchdog: Duration::from_secs(10),
        },
        50,
    )
}

// Legacy HTML pages

pub fn search_form_page() -> String {
    r#"<html><body><form method="post" action="index.jsp"><input name="search"></form></body></html>"#
        .to_string()
}

pub fn summary_page(total_hits: u32) -> String {
    let pages = total_hits.div_ceil(10).max(1);
    format!(
        r#"<html><body>
        <table width="100%"><tr><td class="sportItemNavigation">Seite 1 / {pages} ({total_hits} Treffer insgesamt)</td></tr></table>
        </body></html>"#
    )
}

pub fn no_results_page() -> String {
    "<html><body><p>Es wurden keine Treffer gefunden.</p></body></html>".to_string()
}

pub fn expired_page() -> String {
    "<html><body><h2>Ihre Sitzung ist abgelaufen.</h2></body></html>".to_string()
}

/// Club league result page with rows `start..end` (0-based hit numbers).
pub fn league_page(start: u32, end: u32) -> String {
    let rows: String = (start..end)
        .map(|i| {
            let liga_id = 51000 + i;
            format!(
                r#"<tr>
                    <td>Oberliga</td><td>Senioren</td><td>m</td><td>Bremen</td><td>-</td>
                    <td><a href="index.jsp?Action=102&amp;liga_id={liga_id}">Liga {i}</a></td>
                    <td>{nr}</td>
                </tr>"#,
                nr = 1000 + i
            )
        })
        .collect();

    format!(
        r#"<html><body>
        <table class="layout"><tr><td>
          <table class="sportView">
            <tr>
              <td class="sportViewHeader">Klasse</td><td class="sportViewHeader">Alter</td>
              <td class="sportViewHeader">m/w</td><td class="sportViewHeader">Bezirk</td>
              <td class="sportViewHeader">Kreis</td><td class="sportViewHeader">Liganame</td>
              <td class="sportViewHeader">Liganr</td>
            </tr>
            {rows}
          </table>
        </td></tr></table>
        </body></html>"#
    )
}

/// Report page with one row per `(spielplan_id, nr, datum, heim, gast, ergebnis)`.
pub fn report_page(rows: &[(i64, u32, &str, &str, &str, &str)]) -> String {
    let rows: String = rows
        .iter()
        .map(|(id, nr, datum, heim, gast, ergebnis)| {
            format!(
                r#"<tr>
                    <td><a href="index.jsp?Action=102&amp;liga_id=48714">Oberliga Herren</a></td>
                    <td>{nr}</td><td>{datum}</td><td>18:00</td>
                    <td>{heim}</td><td>{gast}</td>
                    <td><a href="index.jsp?Action=103&amp;spielplan_id={id}&amp;liga_id=48714">{ergebnis}</a></td>
                </tr>"#
            )
        })
        .collect();

    format!(
        r#"<html><body><table>
            <tr><th>Liga</th><th>Nr</th><th>Datum</th><th>Zeit</th><th>Heim</th><th>Gast</th><th>Ergebnis</th></tr>
            {rows}
        </table></body></html>"#
    )
}

// Competition JSON

pub fn team_json(permanent_id: i64, season_team_id: i64, name: &str) -> Value {
    json!({
        "teamPermanentId": permanent_id,
        "seasonTeamId": season_team_id,
        "clubId": permanent_id / 10,
        "teamname": name,
        "teamnameSmall": name,
    })
}

pub fn schedule_json(league_id: i64) -> String {
    json!({
        "status": "0",
        "message": "",
        "version": "1.0",
        "data": {
            "ligaData": { "ligaId": league_id, "liganame": "Oberliga Herren", "liganr": 4711, "tableExists": true },
            "matches": [
                {
                    "matchId": 2001, "matchDay": 1, "matchNo": 1,
                    "kickoffDate": "2025-09-20", "kickoffTime": "19:30",
                    "homeTeam": team_json(301, 9001, "Eisbären Bremerhaven 2"),
                    "guestTeam": team_json(302, 9002, "BSC Bremen"),
                    "result": "76:64", "ergebnisbestaetigt": true, "abgesagt": false,
                },
                {
                    "matchId": 2002, "matchDay": 2, "matchNo": 2,
                    "kickoffDate": "2025-09-27", "kickoffTime": null,
                    "homeTeam": team_json(302, 9002, "BSC Bremen"),
                    "guestTeam": team_json(301, 9001, "Eisbären Bremerhaven 2"),
                    "result": null, "ergebnisbestaetigt": false, "abgesagt": false,
                },
            ],
        },
    })
    .to_string()
}

pub fn error_envelope(message: &str) -> String {
    json!({ "status": "1", "message": message, "data": null }).to_string()
}
