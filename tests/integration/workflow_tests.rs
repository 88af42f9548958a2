//! End-to-end crawl runs against scripted browser doubles

use crate::support::{controller, fares_config, MockLauncher, PageScript, ScriptedProbe, RESULTS_PAGE};
use std::sync::atomic::Ordering;
use std::time::Duration;
use sumi_harvest::workflow::{SearchParams, WorkflowStep};
use sumi_harvest::{ErrorCategory, HarvestError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SITE_URL: &str = "https://fares.example.com";

fn params() -> SearchParams {
    SearchParams::new()
        .with("origin", "LIS")
        .with("destination", "OPO")
        .with("depart", "2099-06-15")
}

#[tokio::test]
async fn test_full_run_extracts_complete_records() {
    let script = PageScript::new(RESULTS_PAGE, "https://fares.example.com/search");
    let config = fares_config(SITE_URL, "");
    let (controller, resources) =
        controller(&config, MockLauncher::new(script.clone()), ScriptedProbe::new(&[100.0]));

    let records = controller.run(params()).await.unwrap();

    // The Ryanair row has no price and is dropped
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("carrier"), Some("TAP"));
    assert_eq!(records[1].get("price"), Some("89.50"));
    assert_eq!(records[1].index, 1);
    assert_eq!(records[0].site, "fares");
    assert_eq!(records[0].source_url, "https://fares.example.com/search");

    let calls = script.calls();
    assert_eq!(
        calls.iter().find(|c| c.starts_with("navigate:")).unwrap(),
        "navigate:https://fares.example.com/search?from=LIS&to=OPO"
    );
    let expected = ["click:#accept-cookies", "fill:#depart=2099-06-15", "click:#go", "wait:.results"];
    let positions: Vec<_> = expected
        .iter()
        .map(|call| calls.iter().position(|c| c == call).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    let metrics = controller.metrics();
    assert_eq!(metrics.runs_succeeded, 1);
    assert_eq!(metrics.records_extracted, 2);
    assert_eq!(metrics.records_dropped, 1);
    assert_eq!(metrics.navigations, 1);
    assert_eq!(metrics.form_fills, 1);
    for step in WorkflowStep::ALL {
        assert_eq!(metrics.step_successes(step), 1, "step {}", step);
    }

    let usage = resources.get_resource_usage();
    assert!(usage.is_closed);
    assert_eq!(usage.browser_count + usage.context_count + usage.page_count, 0);
    assert_eq!(usage.http_session_count, 0);
    assert!(script.calls().ends_with(&[
        "close_page".to_string(),
        "close_context".to_string(),
        "close_browser".to_string()
    ]));
}

#[tokio::test]
async fn test_validation_failure_runs_once_and_never_navigates() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    let config = fares_config(SITE_URL, "");
    let launcher = MockLauncher::new(script.clone());
    let (controller, resources) = controller(&config, launcher.clone(), ScriptedProbe::new(&[100.0]));

    let params = SearchParams::new().with("origin", "LIS").with("depart", "2099-06-15");
    match controller.run(params).await {
        Err(HarvestError::Validation { parameter, .. }) => assert_eq!(parameter, "destination"),
        other => panic!("expected validation error, got {:?}", other),
    }

    let stats = controller.error_statistics();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.category_count(ErrorCategory::Validation), 1);
    assert_eq!(stats.recovery_attempts, 0);

    assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    assert_eq!(script.count("navigate:"), 0);
    assert_eq!(controller.metrics().step_failures(WorkflowStep::ValidateParams), 1);
    assert!(resources.get_resource_usage().is_closed);
}

#[tokio::test]
async fn test_past_date_is_rejected() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    let config = fares_config(SITE_URL, "");
    let (controller, _) = controller(&config, MockLauncher::new(script), ScriptedProbe::new(&[100.0]));

    let result = controller.run(params().with("depart", "2001-01-01")).await;
    assert!(matches!(
        result,
        Err(HarvestError::Validation { ref parameter, .. }) if parameter == "depart"
    ));
}

#[tokio::test]
async fn test_transient_navigation_failures_are_recovered() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    script.navigate_failures.store(2, Ordering::SeqCst);
    let config = fares_config(SITE_URL, "");
    let (controller, _) =
        controller(&config, MockLauncher::new(script.clone()), ScriptedProbe::new(&[100.0]));

    let records = controller.run(params()).await.unwrap();
    assert_eq!(records.len(), 2);

    assert_eq!(script.count("navigate:"), 3);
    // Timeout recovery stops the page's scripts before each retry
    assert_eq!(script.count("stop_loading"), 2);

    let stats = controller.error_statistics();
    assert_eq!(stats.total_errors, 2);
    assert_eq!(stats.category_count(ErrorCategory::Timeout), 2);
    assert_eq!(stats.operation_count("navigate"), 2);
    assert_eq!(stats.successful_recoveries, 2);

    controller.reset_error_statistics();
    assert_eq!(controller.error_statistics().total_errors, 0);
}

#[tokio::test]
async fn test_exhausted_retries_abort_the_run() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    script.navigate_failures.store(u32::MAX, Ordering::SeqCst);
    let config = fares_config(SITE_URL, "");
    let (controller, resources) =
        controller(&config, MockLauncher::new(script.clone()), ScriptedProbe::new(&[100.0]));

    let result = controller.run(params()).await;
    assert!(matches!(result, Err(HarvestError::Timeout(_))));

    // max_retries + 1 attempts, and nothing after the failing step
    assert_eq!(script.count("navigate:"), 4);
    assert_eq!(script.count("click:"), 0);
    assert_eq!(script.count("wait:"), 0);

    let metrics = controller.metrics();
    assert_eq!(metrics.runs_failed, 1);
    assert_eq!(metrics.step_failures(WorkflowStep::Navigate), 1);
    assert_eq!(metrics.step_successes(WorkflowStep::PageSetup), 0);

    let usage = resources.get_resource_usage();
    assert!(usage.is_closed);
    assert_eq!(usage.page_count, 0);
}

#[tokio::test]
async fn test_memory_breach_is_fatal_and_not_retried() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    let config = fares_config(SITE_URL, "");
    let (controller, resources) = controller(
        &config,
        MockLauncher::new(script.clone()),
        ScriptedProbe::new(&[1500.0, 1300.0]),
    );

    match controller.run(params()).await {
        Err(HarvestError::FatalResource { usage_mb, limit_mb }) => {
            assert_eq!(usage_mb, 1300.0);
            assert!((limit_mb - 1228.8).abs() < 1e-9);
        }
        other => panic!("expected fatal resource error, got {:?}", other),
    }

    assert_eq!(script.count("navigate:"), 0);
    assert!(resources.get_resource_usage().is_closed);
    assert_eq!(resources.get_resource_usage().peak_memory_mb, 1500.0);

    // The breach is counted like any other failure, without recovery
    let stats = controller.error_statistics();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.category_count(ErrorCategory::Resource), 1);
    assert_eq!(stats.operation_count("navigate"), 1);
    assert_eq!(stats.recovery_attempts, 0);
}

#[tokio::test]
async fn test_missing_consent_banner_does_not_fail_run() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    script.missing_elements.lock().push("#accept-cookies".to_string());
    let config = fares_config(SITE_URL, "");
    let (controller, _) =
        controller(&config, MockLauncher::new(script.clone()), ScriptedProbe::new(&[100.0]));

    let records = controller.run(params()).await.unwrap();
    assert_eq!(records.len(), 2);

    assert_eq!(script.count("click:#accept-cookies"), 1);
    assert_eq!(script.count("click:#go"), 1);
    assert_eq!(controller.metrics().step_successes(WorkflowStep::PageSetup), 1);
    assert_eq!(controller.error_statistics().total_errors, 0);
}

#[tokio::test]
async fn test_missing_submit_button_still_fails_form_step() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    script.missing_elements.lock().push("#go".to_string());
    let config = fares_config(SITE_URL, "");
    let (controller, _) =
        controller(&config, MockLauncher::new(script.clone()), ScriptedProbe::new(&[100.0]));

    let result = controller.run(params()).await;
    assert!(matches!(result, Err(HarvestError::Unknown(_))));
    assert_eq!(controller.metrics().step_failures(WorkflowStep::FillForm), 1);
    assert_eq!(script.count("wait:"), 0);
}

#[tokio::test]
async fn test_cancelled_run_still_releases_resources() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    *script.navigate_delay.lock() = Some(Duration::from_secs(60));
    let config = fares_config(SITE_URL, "");
    let (controller, resources) =
        controller(&config, MockLauncher::new(script.clone()), ScriptedProbe::new(&[100.0]));

    let result = controller
        .run_until(params(), tokio::time::sleep(Duration::from_millis(50)))
        .await;

    match result {
        Err(HarvestError::Cancelled { operation }) => assert_eq!(operation, "navigate"),
        other => panic!("expected cancellation, got {:?}", other),
    }

    let usage = resources.get_resource_usage();
    assert!(usage.is_closed);
    assert_eq!(usage.browser_count, 0);
    assert!(script.calls().contains(&"close_browser".to_string()));
}

#[tokio::test]
async fn test_release_is_idempotent_after_run() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    let config = fares_config(SITE_URL, "");
    let (controller, resources) =
        controller(&config, MockLauncher::new(script.clone()), ScriptedProbe::new(&[100.0]));

    controller.run(params()).await.unwrap();
    let once = resources.get_resource_usage();
    resources.release().await;
    resources.release().await;

    assert_eq!(resources.get_resource_usage(), once);
    assert_eq!(script.count("close_browser"), 1);
}

#[tokio::test]
async fn test_detail_pages_fetched_through_batcher() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/offer/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<html><body><dd class="bags">1 x 23kg</dd></body></html>"#)
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/offer/3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let script = PageScript::new(RESULTS_PAGE, &format!("{}/search", server.uri()));
    let config = fares_config(
        &server.uri(),
        r#"
        [site.extraction.detail]
        url-field = "link"
        fields = [{ name = "baggage", selector = "dd.bags" }]
        "#,
    );
    let (controller, _) =
        controller(&config, MockLauncher::new(script), ScriptedProbe::new(&[100.0]));

    let records = controller.run(params()).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("baggage"), Some("1 x 23kg"));
    // The failed detail page leaves its record intact
    assert_eq!(records[1].get("price"), Some("89.50"));
    assert_eq!(records[1].get("baggage"), None);

    let metrics = controller.metrics();
    assert_eq!(metrics.http_requests, 2);
    assert_eq!(metrics.detail_failures, 1);
}

#[tokio::test]
async fn test_controller_from_config() {
    let script = PageScript::new(RESULTS_PAGE, SITE_URL);
    let config = fares_config(SITE_URL, "");

    let controller = sumi_harvest::CrawlWorkflowController::from_config(
        &config,
        "fares",
        MockLauncher::new(script),
        std::sync::Arc::new(sumi_harvest::ResourceRegistry::new()),
        std::sync::Arc::new(sumi_harvest::workflow::SiteRateLimiter::new()),
    )
    .unwrap();
    assert_eq!(controller.site().id, "fares");

    let unknown = sumi_harvest::CrawlWorkflowController::from_config(
        &config,
        "hotels",
        MockLauncher::new(PageScript::new("", SITE_URL)),
        std::sync::Arc::new(sumi_harvest::ResourceRegistry::new()),
        std::sync::Arc::new(sumi_harvest::workflow::SiteRateLimiter::new()),
    );
    assert!(matches!(
        unknown,
        Err(HarvestError::Config(sumi_harvest::ConfigError::UnknownSite(_)))
    ));
}
