//! Engine contract over the JSON adapters, with the cache in front.

mod helpers;

use futures::future::join_all;
use helpers::{
    FakeTransport, Recorded, engine, engine_with, error_envelope, ok, respond, schedule_json,
    team_json,
};
use serde_json::json;
use slapi::app::App;
use slapi::cache::{CacheMode, CacheSettings};
use slapi::cli::Command;
use slapi::config::Config;
use slapi::teamsl::models::WamFilters;
use slapi::teamsl::transport::Method;
use slapi::teamsl::{ErrorKind, UpstreamError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn schedule_within_retention_hits_upstream_once() {
    let transport = Arc::new(FakeTransport::new(|_: &Recorded| ok(schedule_json(48714))));
    let engine = engine(transport.clone());

    let first = engine.league_schedule(48714, CacheMode::Use).await.unwrap();
    let second = engine.league_schedule(48714, CacheMode::Use).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.count(), 1);
    assert_eq!(
        transport.requests()[0].url.path(),
        "/rest/competition/spielplan/id/48714"
    );

    assert_eq!(first.league.as_ref().map(|l| l.name.as_str()), Some("Oberliga Herren"));
    assert_eq!(first.league.as_ref().and_then(|l| l.number.as_deref()), Some("4711"));
    assert_eq!(first.matches.len(), 2);
    let played = &first.matches[0];
    assert_eq!(played.result.as_deref(), Some("76:64"));
    assert!(played.confirmed && played.finished);
    let open = &first.matches[1];
    assert!(open.result.is_none() && !open.finished);
    assert!(open.kickoff_time.is_none());
}

#[tokio::test]
async fn failed_envelope_is_surfaced_and_never_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let transport = Arc::new(FakeTransport::new(move |_: &Recorded| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            ok(error_envelope("Liga nicht gefunden"))
        } else {
            ok(schedule_json(48714))
        }
    }));
    let engine = engine(transport.clone());

    let err = engine
        .league_schedule(48714, CacheMode::Use)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains("Liga nicht gefunden"), "{err}");

    let schedule = engine.league_schedule(48714, CacheMode::Use).await.unwrap();
    assert_eq!(schedule.matches.len(), 2);
    assert_eq!(transport.count(), 2);
}

#[tokio::test]
async fn concurrent_callers_share_one_fetch() {
    let transport = Arc::new(
        FakeTransport::new(|_: &Recorded| ok(schedule_json(48714)))
            .with_delay(Duration::from_millis(100)),
    );
    let engine = engine(transport.clone());

    let results = join_all((0..10).map(|_| engine.league_schedule(48714, CacheMode::Use))).await;

    assert_eq!(transport.count(), 1);
    for result in results {
        assert_eq!(result.unwrap().league_id, 48714);
    }
}

#[tokio::test]
async fn different_keys_are_fetched_independently() {
    let transport = Arc::new(FakeTransport::new(|req: &Recorded| {
        let id: i64 = req.url.path().rsplit('/').next().unwrap().parse().unwrap();
        ok(schedule_json(id))
    }));
    let engine = engine(transport.clone());

    let (a, b) = tokio::join!(
        engine.league_schedule(48714, CacheMode::Use),
        engine.league_schedule(48715, CacheMode::Use)
    );
    assert_eq!(a.unwrap().league_id, 48714);
    assert_eq!(b.unwrap().league_id, 48715);
    assert_eq!(transport.count(), 2);
}

#[tokio::test]
async fn bypass_always_fetches() {
    let transport = Arc::new(FakeTransport::new(|_: &Recorded| ok(schedule_json(48714))));
    let engine = engine(transport.clone());

    engine.league_schedule(48714, CacheMode::Use).await.unwrap();
    engine.league_schedule(48714, CacheMode::Bypass).await.unwrap();
    engine.league_schedule(48714, CacheMode::Use).await.unwrap();

    assert_eq!(transport.count(), 2);
}

#[tokio::test]
async fn expired_entry_is_refetched() {
    let transport = Arc::new(FakeTransport::new(|_: &Recorded| ok(schedule_json(48714))));
    let engine = engine_with(
        transport.clone(),
        CacheSettings {
            retention: Duration::ZERO,
            fetch_deadline: Duration::from_secs(5),
            inflight_watchdog: Duration::from_secs(10),
        },
        50,
    );

    engine.league_schedule(48714, CacheMode::Use).await.unwrap();
    engine.league_schedule(48714, CacheMode::Use).await.unwrap();
    assert_eq!(transport.count(), 2);
}

#[tokio::test]
async fn league_id_mismatch_is_a_format_error() {
    let transport = Arc::new(FakeTransport::new(|_: &Recorded| ok(schedule_json(99999))));
    let engine = engine(transport);

    let err = engine
        .league_schedule(48714, CacheMode::Use)
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Format { .. }));
}

#[tokio::test]
async fn actual_correlates_teams_by_id() {
    let body = json!({
        "status": 0,
        "message": "",
        "data": {
            "ligaData": { "ligaId": 48714, "liganame": "Oberliga Herren" },
            "tabelle": { "entries": [
                { "team": team_json(302, 9002, "BSC Bremen"), "anzspiele": 2, "s": 2, "n": 0,
                  "koerbe": 150, "gegenKoerbe": 120, "korbdiff": 30 },
                { "team": team_json(301, 9001, "Eisbären Bremerhaven 2"), "anzspiele": 2, "s": "1", "n": "1",
                  "koerbe": 140, "gegenKoerbe": 140, "korbdiff": 0 },
            ]},
            "matches": [
                { "matchId": 2001, "matchDay": 1,
                  "homeTeam": team_json(301, 9001, "Eisbären Bremerhaven II"),
                  "guestTeam": team_json(302, 9002, "BSC Bremen"),
                  "result": "76:64", "ergebnisbestaetigt": true, "abgesagt": true },
            ],
        },
    })
    .to_string();
    let transport = Arc::new(FakeTransport::new(move |_: &Recorded| ok(body.clone())));
    let engine = engine(transport);

    let actual = engine.league_actual(48714, CacheMode::Use).await.unwrap();

    let ranks: Vec<u32> = actual.standings.iter().map(|s| s.rank).collect();
    assert_eq!(ranks, vec![1, 2]);
    assert_eq!(actual.standings[0].team.name, "BSC Bremen");
    assert_eq!((actual.standings[1].wins, actual.standings[1].losses), (1, 1));

    // Same ids under a different display name are still one team.
    assert_eq!(actual.teams.len(), 2);

    let game = &actual.matches[0];
    assert!(game.cancelled);
    assert!(!game.confirmed);
}

#[tokio::test]
async fn capped_league_search_is_flagged() {
    let transport = Arc::new(FakeTransport::new(|req: &Recorded| {
        assert_eq!(req.method, Method::Post);
        let body = req.json.as_ref().unwrap();
        assert_eq!(body["token"], "");
        assert_eq!(body["verbandIds"], json!([7]));
        ok(json!({
            "status": "0",
            "data": {
                "wam": { "verbandIds": [7], "gebietIds": [], "ligatypIds": [], "akgGeschlechtIds": [],
                         "altersklasseIds": [], "spielklasseIds": [], "sortBy": 0 },
                "ligaListe": {
                    "ligen": [
                        { "ligaId": 48714, "liganame": "Oberliga Herren", "verbandId": 7 },
                        { "ligaId": 48715, "liganame": "Landesliga Herren", "verbandId": 7 },
                    ],
                    "hasMoreData": true,
                },
            },
        })
        .to_string())
    }));
    let engine = engine(transport.clone());

    let filters = WamFilters {
        verband_ids: vec![7],
        ..WamFilters::default()
    };
    let result = engine
        .search_leagues_by_filters(filters.clone(), CacheMode::Use)
        .await
        .unwrap();

    assert!(result.capped);
    assert!(result.advice.is_some());
    assert_eq!(result.leagues.len(), 2);
    assert_eq!(result.filters, filters);
    assert_eq!(transport.requests()[0].url.path(), "/rest/wam/data");
}

#[tokio::test]
async fn rate_limit_is_typed() {
    let transport = Arc::new(FakeTransport::new(|_: &Recorded| {
        let mut response = respond(429, "Too Many Requests");
        response
            .headers
            .insert(http::header::RETRY_AFTER, http::HeaderValue::from_static("30"));
        response
    }));
    let engine = engine(transport);

    let err = engine.verbaende(CacheMode::Use).await.unwrap_err();
    match err {
        UpstreamError::RateLimited {
            status,
            retry_after,
            ..
        } => {
            assert_eq!(status, 429);
            assert_eq!(retry_after, Some(Duration::from_secs(30)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        cache_dir: dir.path().to_path_buf(),
        ..Config::default()
    };

    let transport = Arc::new(FakeTransport::new(|_: &Recorded| ok(schedule_json(48714))));
    let app = App::with_transport(config.clone(), transport.clone())
        .await
        .unwrap();
    app.execute(Command::Schedule { league_id: 48714 }, CacheMode::Use)
        .await
        .unwrap();
    app.shutdown().await;
    assert_eq!(transport.count(), 1);

    let offline = Arc::new(FakeTransport::new(|_: &Recorded| respond(503, "")));
    let app = App::with_transport(config, offline.clone()).await.unwrap();
    let value = app
        .execute(Command::Schedule { league_id: 48714 }, CacheMode::Use)
        .await
        .unwrap();
    assert_eq!(value["league_id"], 48714);
    assert_eq!(offline.count(), 0);
}
