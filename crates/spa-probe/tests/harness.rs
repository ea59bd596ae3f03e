//! Session-level tests against the scripted page driver.
//!
//! Each test drives a whole session (interception, recording, readiness,
//! reporting) without a browser. Timing-sensitive tests run on paused time.

use axum::Router;
use axum::routing::get;
use serde_json::json;
use spa_probe::{
    BackendProbe, EventKind, EventPayload, FailureKind, Interceptor, Lifecycle, MockResponse, PageDriver,
    ProbeError, ReadinessOutcome, ReadinessPolicy, ReadinessStrategy, ScriptedPage, Session, SessionOptions, Strategy,
    DiagnosticReport,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const APP: &str = "http://localhost:8080/admin-next/";

async fn open(page: &ScriptedPage, reports: &TempDir, interceptor: Interceptor) -> Session {
    let driver: Arc<dyn PageDriver> = Arc::new(page.clone());
    Session::open(driver, SessionOptions::new("harness").reports_dir(reports.path()), interceptor)
        .await
        .unwrap()
}

fn statuses(events: &spa_probe::EventLog) -> Vec<(String, u16)> {
    events
        .of_kind(EventKind::RequestSucceeded)
        .into_iter()
        .filter_map(|e| match &e.payload {
            EventPayload::RequestSucceeded { url, status } => Some((url.clone(), *status)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn external_assets_are_mocked_and_never_reach_the_network() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new()
        .with_subresource("https://fonts.googleapis.com/css2?family=Inter")
        .with_subresource("https://fonts.gstatic.com/s/inter/v12/inter.woff2")
        .with_subresource("https://cdn.jsdelivr.net/npm/chart.js/dist/chart.umd.js")
        .with_subresource("https://stats.example.com/analytics/beacon")
        .with_subresource("http://localhost:8080/admin-next/app.js")
        .selector_appears_after("#app", Duration::from_millis(300));
    let interceptor = Interceptor::external_assets()
        .unwrap()
        .with_rule("**/analytics/**", MockResponse::new(204))
        .unwrap();

    let mut session = open(&page, &reports, interceptor).await;
    let outcome = session.navigate(APP, &ReadinessPolicy::shell_mounted("#app")).await.unwrap();
    assert!(outcome.is_ready());
    session.flush_events().await;

    let mut hits = page.network_hits();
    hits.sort();
    assert_eq!(hits, vec![APP.to_string(), format!("{APP}app.js")]);

    let seen = statuses(&session.events());
    for (url, status) in [
        ("https://fonts.googleapis.com/css2?family=Inter", 200),
        ("https://fonts.gstatic.com/s/inter/v12/inter.woff2", 200),
        ("https://cdn.jsdelivr.net/npm/chart.js/dist/chart.umd.js", 200),
        ("https://stats.example.com/analytics/beacon", 204),
    ] {
        assert!(seen.contains(&(url.to_string(), status)), "{url} -> {status} missing from {seen:?}");
    }

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn healthy_page_has_no_errors_or_crashes() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new()
        .with_title("Admin")
        .selector_appears_after("#app", Duration::from_millis(150));
    let mut session = open(&page, &reports, Interceptor::external_assets().unwrap()).await;

    session.navigate(APP, &ReadinessPolicy::shell_mounted("#app")).await.unwrap();
    page.emit_console("log", "app booted");
    page.emit_console("warning", "deprecated API");
    session.flush_events().await;

    let counts = session.counts();
    assert_eq!(counts.page_error, 0);
    assert_eq!(counts.crash, 0);
    assert_eq!(counts.console, 2);
    assert!(session.events().console_errors().is_empty());
    assert_eq!(session.title().await.unwrap(), "Admin");

    session.ensure(counts.page_error == 0, "page errors present").await.unwrap();
    assert_eq!(session.lifecycle(), Lifecycle::Ready);

    let log = session.close().await;
    assert_eq!(log.console_texts(), vec!["app booted", "deprecated API"]);
    assert!(page.is_closed());
}

#[tokio::test(start_paused = true)]
async fn console_levels_are_classified() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new();
    let mut session = open(&page, &reports, Interceptor::new()).await;
    session.navigate(APP, &ReadinessPolicy::committed()).await.unwrap();

    page.emit_console("error", "Failed to load resource");
    page.emit_console("info", "ready");
    page.emit_console_args("log", vec![json!("user"), json!(42), json!(true)]);
    page.emit_page_error("TypeError: x is undefined");
    session.flush_events().await;

    let events = session.events();
    let errors = events.console_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].summary().contains("Failed to load resource"));
    assert!(events.console_texts().contains(&"user 42 true"));
    assert_eq!(session.counts().page_error, 1);

    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn shell_selector_wins_under_background_polling() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new()
        .background_polling(format!("{APP}webapi/entry.cgi?api=SYNO.Core.System"), Duration::from_millis(250))
        .selector_appears_after("#app", Duration::from_secs(2));
    let mut session = open(&page, &reports, Interceptor::new()).await;

    let outcome = session.navigate(APP, &ReadinessPolicy::shell_mounted("#app")).await.unwrap();

    match outcome {
        ReadinessOutcome::Ready { strategy, elapsed } => {
            assert_eq!(strategy, "selector-present(#app)");
            assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
            assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
        }
        other => panic!("expected ready, got {other:?}"),
    }
    assert_eq!(session.lifecycle(), Lifecycle::Ready);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn readiness_timeout_carries_a_report() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new()
        .background_polling(format!("{APP}webapi/poll"), Duration::from_millis(200))
        .selector_appears_after("#app", Duration::from_secs(60));
    let mut session = open(&page, &reports, Interceptor::new()).await;

    let err = session
        .navigate(APP, &ReadinessPolicy::shell_mounted("#app"))
        .await
        .unwrap_err();

    let ProbeError::NavigationTimeout { pending, elapsed, .. } = &err else {
        panic!("expected a navigation timeout, got {err:?}");
    };
    assert!(pending.contains(&"selector-present(#app)".to_string()));
    assert!(*elapsed >= Duration::from_secs(10));
    assert_eq!(session.lifecycle(), Lifecycle::Closed);
    assert!(page.is_closed());

    let path = err.report_path().expect("timeout without report");
    assert!(path.exists());
    let report = DiagnosticReport::load(path).unwrap();
    assert_eq!(report.reason.kind, FailureKind::NavigationTimeout);
    assert_eq!(report.lifecycle, Lifecycle::Reporting);
    assert!(matches!(report.readiness, Some(ReadinessOutcome::TimedOut { .. })));
    assert!(report.screenshot.as_ref().is_some_and(|p| p.exists()));
    let snapshot = report.snapshot.expect("snapshot");
    assert_eq!(snapshot.url.as_deref(), Some(APP));
}

#[tokio::test(start_paused = true)]
async fn hung_navigation_times_out_at_the_policy_deadline() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new().hang_navigation();
    let mut session = open(&page, &reports, Interceptor::new()).await;

    let err = session
        .navigate(APP, &ReadinessPolicy::shell_mounted("#app"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::NavigationTimeout);
    assert!(err.report_path().is_some());
}

#[tokio::test(start_paused = true)]
async fn hung_dom_probes_end_a_fallback_policy_on_its_deadline() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new().hang_dom_probes();
    let mut session = open(&page, &reports, Interceptor::new()).await;

    let policy = ReadinessPolicy::fallback("stuck-renderer@1", Duration::from_secs(2))
        .with(Strategy::SelectorPresent("#app".into()), Duration::from_secs(1))
        .with(Strategy::DomContentLoaded, Duration::from_secs(5));
    let started = tokio::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(60), session.navigate(APP, &policy)).await;

    let err = result.expect("fallback policy ignored its deadline").unwrap_err();
    assert_eq!(err.kind(), FailureKind::NavigationTimeout);
    match &err {
        ProbeError::NavigationTimeout { pending, elapsed, .. } => {
            assert_eq!(pending, &vec!["selector-present(#app)".to_string(), "domcontentloaded".to_string()]);
            assert!(*elapsed >= Duration::from_secs(2) && *elapsed < Duration::from_secs(4), "{elapsed:?}");
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(err.report_path().is_some());
}

#[tokio::test(start_paused = true)]
async fn crash_mid_navigation_is_reported() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new().hang_navigation();
    let mut session = open(&page, &reports, Interceptor::new()).await;

    let killer = page.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        killer.crash("Renderer process crashed (out of memory)");
    });

    let err = session
        .navigate(APP, &ReadinessPolicy::shell_mounted("#app"))
        .await
        .unwrap_err();

    let ProbeError::CrashDetected { reason, .. } = &err else {
        panic!("expected a crash, got {err:?}");
    };
    assert!(reason.contains("out of memory"));
    assert_eq!(session.lifecycle(), Lifecycle::Closed);

    let report = DiagnosticReport::load(err.report_path().expect("crash without report")).unwrap();
    assert_eq!(report.reason.kind, FailureKind::CrashDetected);
    assert!(!report.events.is_empty());
    assert_eq!(report.counts.crash, 1);
    assert!(report.screenshot.is_none());
    assert!(report.is_missing("screenshot"));
}

#[tokio::test(start_paused = true)]
async fn rejected_navigation_is_reported() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new().navigation_error("net::ERR_CONNECTION_REFUSED");
    let mut session = open(&page, &reports, Interceptor::new()).await;

    let err = session.navigate(APP, &ReadinessPolicy::committed()).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::NavigationFailed);
    assert!(err.to_string().contains("ERR_CONNECTION_REFUSED"));
    let report = DiagnosticReport::load(err.report_path().unwrap()).unwrap();
    assert_eq!(report.reason.kind, FailureKind::NavigationFailed);
    assert_eq!(session.lifecycle(), Lifecycle::Closed);
}

#[tokio::test(start_paused = true)]
async fn failed_assertion_reports_and_closes() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new().with_body_text("Sign in");
    let mut session = open(&page, &reports, Interceptor::new()).await;
    session.navigate(APP, &ReadinessPolicy::dom_parsed()).await.unwrap();

    let err = session
        .ensure(false, "dashboard header missing")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::AssertionFailure);
    let report = DiagnosticReport::load(err.report_path().unwrap()).unwrap();
    assert!(report.reason.message.contains("dashboard header missing"));
    assert_eq!(report.snapshot.and_then(|s| s.body_text).as_deref(), Some("Sign in"));
    assert_eq!(session.lifecycle(), Lifecycle::Closed);
    assert!(matches!(session.url().await, Err(ProbeError::AlreadyClosed)));
}

#[tokio::test(start_paused = true)]
async fn repeated_captures_get_distinct_growing_reports() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new();
    let mut session = open(&page, &reports, Interceptor::new()).await;
    session.navigate(APP, &ReadinessPolicy::committed()).await.unwrap();

    page.emit_console("log", "first");
    session.flush_events().await;
    let first = session.capture("checkpoint 1").await.unwrap();

    page.emit_console("log", "second");
    session.flush_events().await;
    let second = session.capture("checkpoint 2").await.unwrap();

    assert_ne!(first, second);
    assert!(first.parent().unwrap() < second.parent().unwrap());
    assert_eq!(session.lifecycle(), Lifecycle::Ready);

    let first = DiagnosticReport::load(&first).unwrap();
    let second = DiagnosticReport::load(&second).unwrap();
    assert_eq!(first.reason.kind, FailureKind::Requested);
    assert!(second.events.len() > first.events.len());
    let prefix: Vec<u64> = first.events.iter().map(|e| e.sequence).collect();
    let extended: Vec<u64> = second.events.iter().take(prefix.len()).map(|e| e.sequence).collect();
    assert_eq!(prefix, extended);
    assert!(second.events.console_texts().contains(&"second"));
    assert!(!first.events.console_texts().contains(&"second"));

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_sessions_do_not_share_rules_or_events() {
    let reports = TempDir::new().unwrap();
    let css = "https://cdn.example.com/site.css";
    let mocked_page = ScriptedPage::new().with_subresource(css);
    let plain_page = ScriptedPage::new().with_subresource(css);

    let mut mocked = open(
        &mocked_page,
        &reports,
        Interceptor::new().with_rule("**/*.css", MockResponse::css("")).unwrap(),
    )
    .await;
    let mut plain = open(&plain_page, &reports, Interceptor::new()).await;
    assert_ne!(mocked.id(), plain.id());

    let policy = ReadinessPolicy::network_idle();
    let (a, b) = tokio::join!(mocked.navigate(APP, &policy), plain.navigate(APP, &policy));
    a.unwrap();
    b.unwrap();

    // both pages log at once, interleaved on the runtime
    let chatter = |page: &ScriptedPage, tag: &'static str| {
        let page = page.clone();
        async move {
            for n in 0..25 {
                page.emit_console("log", format!("{tag}-{n}"));
                tokio::task::yield_now().await;
            }
        }
    };
    tokio::join!(chatter(&mocked_page, "mocked"), chatter(&plain_page, "plain"));
    mocked.flush_events().await;
    plain.flush_events().await;

    let expected = |tag: &str| (0..25).map(|n| format!("{tag}-{n}")).collect::<Vec<_>>();
    let own = |session: &Session| {
        session
            .events()
            .console_texts()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    assert_eq!(own(&mocked), expected("mocked"));
    assert_eq!(own(&plain), expected("plain"));

    assert!(!mocked_page.network_hits().contains(&css.to_string()));
    assert!(plain_page.network_hits().contains(&css.to_string()));
    assert!(plain.interceptor().is_empty());

    mocked.close().await;
    plain.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_mock_fulfillment_is_recorded() {
    let reports = TempDir::new().unwrap();
    let font = "https://fonts.googleapis.com/css2?family=Inter";
    let page = ScriptedPage::new().failing_fulfillment().with_subresource(font);
    let mut session = open(&page, &reports, Interceptor::external_assets().unwrap()).await;

    session.navigate(APP, &ReadinessPolicy::network_idle()).await.unwrap();
    session.flush_events().await;

    let events = session.events();
    let failures = events.of_kind(EventKind::RequestFailed);
    assert_eq!(failures.len(), 1, "{failures:?}");
    assert!(matches!(
        &failures[0].payload,
        EventPayload::RequestFailed { url, reason } if url == font && reason.starts_with("mock fulfillment failed")
    ));
    assert_eq!(session.counts().request_failed, 1);
    assert!(!page.network_hits().contains(&font.to_string()));

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn post_ready_wait_times_out_without_closing() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new()
        .selector_appears_after("#app", Duration::from_millis(500))
        .selector_appears_after("#never", Duration::from_secs(3600));
    let mut session = open(&page, &reports, Interceptor::new()).await;
    session.navigate(APP, &ReadinessPolicy::committed()).await.unwrap();

    let err = session
        .wait_for(ReadinessStrategy::selector("#never", Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProbeError::WaitTimeout { .. }));
    assert_eq!(session.lifecycle(), Lifecycle::Ready);

    session
        .wait_for(ReadinessStrategy::selector("#app", Duration::from_secs(5)))
        .await
        .unwrap();

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn a_session_navigates_once() {
    let reports = TempDir::new().unwrap();
    let page = ScriptedPage::new();
    let mut session = open(&page, &reports, Interceptor::new()).await;

    let empty = ReadinessPolicy::race("empty", Duration::from_secs(1));
    assert!(matches!(
        session.navigate(APP, &empty).await,
        Err(ProbeError::InvalidPolicy { .. })
    ));
    assert_eq!(session.lifecycle(), Lifecycle::Intercepting);

    session.navigate(APP, &ReadinessPolicy::committed()).await.unwrap();
    assert!(matches!(
        session.navigate(APP, &ReadinessPolicy::committed()).await,
        Err(ProbeError::InvalidTransition { .. })
    ));

    session.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn backend_probe_results_land_in_the_report() {
    let app = Router::new().route("/webapi/health", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let reports = TempDir::new().unwrap();
    let backend = BackendProbe::new(&base, Duration::from_secs(2))
        .unwrap()
        .with_endpoints(["/webapi/health", "/webapi/missing"]);
    let page = ScriptedPage::new();
    let driver: Arc<dyn PageDriver> = Arc::new(page.clone());
    let mut session = Session::open(
        driver,
        SessionOptions::new("backend").reports_dir(reports.path()).backend(backend),
        Interceptor::new(),
    )
    .await
    .unwrap();
    session.navigate(APP, &ReadinessPolicy::committed()).await.unwrap();

    let report = DiagnosticReport::load(session.capture("back end check").await.unwrap()).unwrap();
    let backend = report.backend.expect("backend results");
    assert_eq!(backend.len(), 2);
    assert_eq!(backend[0].url, format!("{base}/webapi/health"));
    assert_eq!(backend[0].status, Some(200));
    assert_eq!(backend[0].body_preview.as_deref(), Some("ok"));
    assert_eq!(backend[1].status, Some(404));

    session.close().await;
}
