use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Instant;

use serde_json::{Value, json};

use super::*;

/// Replays canned responses and records every request it receives.
struct ScriptedTransport {
    responses: RefCell<VecDeque<Result<Value, TransportError>>>,
    calls: Cell<usize>,
    call_times: RefCell<Vec<Instant>>,
    seen_images: RefCell<Vec<Vec<Vec<u8>>>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<Result<Value, TransportError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            calls: Cell::new(0),
            call_times: RefCell::new(Vec::new()),
            seen_images: RefCell::new(Vec::new()),
        }
    }
}

impl Transport for ScriptedTransport {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Value, TransportError> {
        self.calls.set(self.calls.get() + 1);
        self.call_times.borrow_mut().push(Instant::now());
        self.seen_images.borrow_mut().push(request.images.to_vec());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("script exhausted".to_string())))
    }
}

fn text_response(text: &str) -> Result<Value, TransportError> {
    Ok(json!({
        "candidates": [{"content": {"parts": [{"text": text}]}}]
    }))
}

fn test_config(cache_path: Option<PathBuf>) -> OracleConfig {
    OracleConfig {
        api_key: Some("test-key".to_string()),
        min_interval: Duration::ZERO,
        base_delay: Duration::ZERO,
        cache_path,
        ..OracleConfig::default()
    }
}

fn write_crops(dir: &Path, tag: &str) -> EvidenceCrops {
    let mut paths = Vec::new();
    for name in [
        "protocol_master",
        "protocol_sample",
        "report_master",
        "report_sample",
    ] {
        let path = dir.join(format!("{tag}_{name}.png"));
        fs::write(&path, format!("{tag}:{name}")).expect("write crop");
        paths.push(path);
    }
    let mut paths = paths.into_iter();
    EvidenceCrops {
        protocol_master: paths.next(),
        protocol_sample: paths.next(),
        report_master: paths.next(),
        report_sample: paths.next(),
    }
}

#[test]
fn missing_report_crop_degrades_without_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut crops = write_crops(dir.path(), "a");
    crops.report_sample = None;
    let mut client = OracleClient::new(test_config(None), ScriptedTransport::new(Vec::new()));

    let result = client.compare(&crops);
    assert!(!result.matched);
    assert_eq!(result.confidence, Some(0.0));
    assert!(result.reason.contains("missing report crops"));
    assert_eq!(client.transport.calls.get(), 0);
    assert_eq!(client.stats().degraded, 1);
}

#[test]
fn missing_protocol_crop_is_checked_after_report_side() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut crops = write_crops(dir.path(), "a");
    crops.protocol_master = None;
    let mut client = OracleClient::new(test_config(None), ScriptedTransport::new(Vec::new()));

    let result = client.compare(&crops);
    assert!(result.reason.contains("missing protocol crops"));

    crops.report_master = None;
    let result = client.compare(&crops);
    assert!(result.reason.contains("missing report crops"));
}

#[test]
fn blank_credential_means_not_configured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let config = OracleConfig {
        api_key: Some("   ".to_string()),
        ..test_config(None)
    };
    let mut client = OracleClient::new(config, ScriptedTransport::new(Vec::new()));

    let result = client.compare(&crops);
    assert!(result.reason.contains("not configured"));
    assert_eq!(result.confidence, Some(0.0));
    assert_eq!(client.transport.calls.get(), 0);
}

#[test]
fn images_are_sent_in_protocol_then_report_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let transport = ScriptedTransport::new(vec![text_response(
        r#"{"match": true, "reason": "identical", "confidence": 0.97}"#,
    )]);
    let mut client = OracleClient::new(test_config(None), transport);

    let result = client.compare(&crops);
    assert!(result.matched);
    assert_eq!(result.confidence, Some(0.97));

    let seen = client.transport.seen_images.borrow();
    assert_eq!(
        seen[0],
        vec![
            b"a:protocol_master".to_vec(),
            b"a:protocol_sample".to_vec(),
            b"a:report_master".to_vec(),
            b"a:report_sample".to_vec(),
        ]
    );
}

#[test]
fn cache_hit_skips_the_network_across_clients() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let cache_path = dir.path().join("cache.json");

    let transport = ScriptedTransport::new(vec![text_response(
        r#"{"match": false, "reason": "different sample", "confidence": 0.88}"#,
    )]);
    let mut first = OracleClient::new(test_config(Some(cache_path.clone())), transport);
    let original = first.compare(&crops);
    assert_eq!(first.stats().requests, 1);

    let mut second = OracleClient::new(
        test_config(Some(cache_path)),
        ScriptedTransport::new(Vec::new()),
    );
    let replayed = second.compare(&crops);

    assert_eq!(replayed, original);
    assert_eq!(second.transport.calls.get(), 0);
    assert_eq!(second.stats().cache_hits, 1);
    assert_eq!(second.stats().requests, 0);
}

#[test]
fn cache_key_depends_on_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let cache_path = dir.path().join("cache.json");

    let mut first = OracleClient::new(
        test_config(Some(cache_path.clone())),
        ScriptedTransport::new(vec![text_response(r#"{"match": true}"#)]),
    );
    first.compare(&crops);

    let config = OracleConfig {
        model: "another-model".to_string(),
        ..test_config(Some(cache_path))
    };
    let mut second = OracleClient::new(
        config,
        ScriptedTransport::new(vec![text_response(r#"{"match": true}"#)]),
    );
    second.compare(&crops);
    assert_eq!(second.transport.calls.get(), 1);
}

#[test]
fn disabled_cache_always_calls_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let transport = ScriptedTransport::new(vec![
        text_response(r#"{"match": true}"#),
        text_response(r#"{"match": true}"#),
    ]);
    let mut client = OracleClient::new(test_config(None), transport);

    client.compare(&crops);
    client.compare(&crops);
    assert_eq!(client.transport.calls.get(), 2);
}

#[test]
fn consecutive_requests_respect_min_interval_but_cache_hits_do_not_wait() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first_crops = write_crops(dir.path(), "a");
    let second_crops = write_crops(dir.path(), "b");
    let min_interval = Duration::from_millis(200);
    let config = OracleConfig {
        min_interval,
        ..test_config(Some(dir.path().join("cache.json")))
    };
    let transport = ScriptedTransport::new(vec![
        text_response(r#"{"match": true}"#),
        text_response(r#"{"match": false}"#),
    ]);
    let mut client = OracleClient::new(config, transport);

    client.compare(&first_crops);
    client.compare(&second_crops);
    {
        let call_times = client.transport.call_times.borrow();
        assert_eq!(call_times.len(), 2);
        assert!(call_times[1].duration_since(call_times[0]) >= min_interval);
    }

    let started = Instant::now();
    let replayed = client.compare(&first_crops);
    assert!(replayed.matched);
    assert!(started.elapsed() < min_interval / 2);
    assert_eq!(client.transport.calls.get(), 2);
    assert_eq!(client.stats().cache_hits, 1);
}

#[test]
fn rate_limit_retries_then_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::RateLimited { retry_after: None }),
        Err(TransportError::Timeout("slow".to_string())),
        text_response(r#"{"match": true, "reason": "ok", "confidence": 0.9}"#),
    ]);
    let mut client = OracleClient::new(test_config(None), transport);

    let result = client.compare(&crops);
    assert!(result.matched);
    assert_eq!(client.transport.calls.get(), 3);
    assert_eq!(client.stats().requests, 3);
    assert_eq!(client.stats().degraded, 0);
}

#[test]
fn retries_are_bounded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Network("reset".to_string())),
        Err(TransportError::Network("reset".to_string())),
        Err(TransportError::Network("reset".to_string())),
        text_response(r#"{"match": true}"#),
    ]);
    let mut client = OracleClient::new(test_config(None), transport);

    let result = client.compare(&crops);
    assert!(!result.matched);
    assert_eq!(result.confidence, Some(0.0));
    assert!(result.reason.contains("request failed"));
    assert_eq!(client.transport.calls.get(), 3);
}

#[test]
fn server_errors_are_not_retried() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let transport = ScriptedTransport::new(vec![Err(TransportError::Status {
        code: 500,
        message: "internal".to_string(),
    })]);
    let mut client = OracleClient::new(test_config(None), transport);

    let result = client.compare(&crops);
    assert!(result.reason.contains("request failed"));
    assert_eq!(client.transport.calls.get(), 1);
}

#[test]
fn parse_failure_degrades_without_retry_or_caching() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let cache_path = dir.path().join("cache.json");
    let transport = ScriptedTransport::new(vec![
        text_response("no verdict here"),
        text_response(r#"{"match": true}"#),
    ]);
    let mut client = OracleClient::new(test_config(Some(cache_path.clone())), transport);

    let result = client.compare(&crops);
    assert!(!result.matched);
    assert!(result.reason.contains("parsing failed"));
    assert_eq!(client.transport.calls.get(), 1);
    assert!(!cache_path.exists());
}

#[test]
fn undecodable_body_counts_as_parse_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Body("expected value at line 1".to_string())),
        text_response(r#"{"match": true}"#),
    ]);
    let mut client = OracleClient::new(test_config(None), transport);

    let result = client.compare(&crops);
    assert!(!result.matched);
    assert_eq!(result.confidence, Some(0.0));
    assert!(result.reason.contains("parsing failed"));
    assert_eq!(client.transport.calls.get(), 1);
}

#[test]
fn empty_candidate_reports_no_payload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let transport = ScriptedTransport::new(vec![Ok(json!({"candidates": []}))]);
    let mut client = OracleClient::new(test_config(None), transport);

    let result = client.compare(&crops);
    assert!(result.reason.contains("no text payload"));
    assert_eq!(result.confidence, Some(0.0));
}

#[test]
fn structured_part_is_used_directly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let crops = write_crops(dir.path(), "a");
    let transport = ScriptedTransport::new(vec![Ok(json!({
        "candidates": [{"content": {"parts": [
            {"json": {"match": false, "reason": "label mismatch", "confidence": 2.5}}
        ]}}]
    }))]);
    let mut client = OracleClient::new(test_config(None), transport);

    let result = client.compare(&crops);
    assert!(!result.matched);
    assert_eq!(result.reason, "label mismatch");
    assert_eq!(result.confidence, Some(1.0));
}

#[test]
fn unreadable_crop_file_degrades() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut crops = write_crops(dir.path(), "a");
    crops.report_sample = Some(dir.path().join("never_rendered.png"));
    let mut client = OracleClient::new(test_config(None), ScriptedTransport::new(Vec::new()));

    let result = client.compare(&crops);
    assert!(result.reason.contains("failed to read evidence crops"));
    assert_eq!(client.transport.calls.get(), 0);
}
