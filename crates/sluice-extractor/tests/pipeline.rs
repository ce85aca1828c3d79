//! End-to-end pipeline tests against a mock remote store.
//!
//! These exercise the whole path: configuration, source adapter,
//! mapper, batched uploader, cursor persistence, and run reporting.

use serde_json::Value;
use sluice_extractor::config::{
    DestinationSpec, ExtractorConfig, JobConfig, PipelineConfig, SourceSpec, StateConfig,
};
use sluice_extractor::orchestrator::run_pipeline;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sluice_common::types::RetryConfig;

fn write_csv(dir: &TempDir, name: &str, rows: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "station,observed_at,air_temperature").unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    path
}

fn raw_table_job(name: &str, source: SourceSpec, batch_size: usize) -> JobConfig {
    JobConfig {
        name: name.to_string(),
        source,
        destination: DestinationSpec::RawTable {
            database: "weather".into(),
            table: "observations".into(),
            key_column: "station".into(),
        },
        batch_size,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
        },
        incremental: true,
        abort_on_failed_batch: false,
    }
}

fn pipeline_config(
    store_url: &str,
    monitor_url: Option<String>,
    state_path: PathBuf,
    jobs: Vec<JobConfig>,
) -> ExtractorConfig {
    ExtractorConfig {
        pipeline: PipelineConfig {
            id: "weather-pipeline".into(),
            store_url: store_url.to_string(),
            monitor_url,
            heartbeat_interval_secs: 60,
            max_concurrent_jobs: 4,
        },
        state: StateConfig { path: state_path },
        jobs,
    }
}

/// Rows carried by each upsert request, in arrival order
async fn upserted_batches(server: &MockServer) -> Vec<Vec<String>> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().ends_with("/rows"))
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["rows"]
                .as_array()
                .unwrap()
                .iter()
                .map(|row| row["key"].as_str().unwrap().to_string())
                .collect()
        })
        .collect()
}

#[tokio::test]
async fn test_file_job_delivers_in_source_order_batches() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/raw/weather/observations/rows"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    let dir = TempDir::new().unwrap();
    let rows: Vec<String> = (1..=10)
        .map(|i| format!("s-{},2026-08-24T00:00:0{}Z,4.2", i, i % 10))
        .collect();
    let csv = write_csv(&dir, "obs.csv", &rows.iter().map(String::as_str).collect::<Vec<_>>());

    let config = pipeline_config(
        &store.uri(),
        None,
        dir.path().join("state.json"),
        vec![raw_table_job(
            "obs-file",
            SourceSpec::File { path: csv },
            4,
        )],
    );
    let outcome = run_pipeline(config, CancellationToken::new()).await.unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.outcomes[0].summary.records_uploaded, 10);

    let batches = upserted_batches(&store).await;
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].len(), 4);
    assert_eq!(batches[1].len(), 4);
    assert_eq!(batches[2].len(), 2);
    // Source order preserved across batches
    let flattened: Vec<&str> = batches.iter().flatten().map(String::as_str).collect();
    let expected: Vec<String> = (1..=10).map(|i| format!("s-{}", i)).collect();
    assert_eq!(flattened, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_transient_store_failure_retried_without_losing_records() {
    let store = MockServer::start().await;
    // First two upserts time out at the store, then it recovers
    Mock::given(method("POST"))
        .and(path("/raw/weather/observations/rows"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&store)
        .await;
    Mock::given(method("POST"))
        .and(path("/raw/weather/observations/rows"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    let dir = TempDir::new().unwrap();
    let csv = write_csv(
        &dir,
        "obs.csv",
        &["s-1,2026-08-24T00:00:01Z,4.2", "s-2,2026-08-24T00:00:02Z,4.5"],
    );

    let config = pipeline_config(
        &store.uri(),
        None,
        dir.path().join("state.json"),
        vec![raw_table_job("obs-file", SourceSpec::File { path: csv }, 10)],
    );
    let outcome = run_pipeline(config, CancellationToken::new()).await.unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.outcomes[0].summary.records_uploaded, 2);
    assert_eq!(outcome.outcomes[0].summary.batches_failed, 0);
    // Two failed attempts plus the successful one
    assert_eq!(store.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_second_run_resumes_after_saved_cursor() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    let csv_path = dir.path().join("obs.csv");

    write_csv(
        &dir,
        "obs.csv",
        &["s-1,2026-08-24T00:00:01Z,4.2", "s-2,2026-08-24T00:00:02Z,4.5"],
    );
    let config = pipeline_config(
        &store.uri(),
        None,
        state_path.clone(),
        vec![raw_table_job(
            "obs-file",
            SourceSpec::File {
                path: csv_path.clone(),
            },
            10,
        )],
    );
    let first = run_pipeline(config.clone(), CancellationToken::new())
        .await
        .unwrap();
    assert!(first.success());
    assert_eq!(first.outcomes[0].summary.records_uploaded, 2);

    // Two more rows arrive; the second run must skip the first two
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&csv_path)
        .unwrap();
    writeln!(file, "s-3,2026-08-24T00:00:03Z,4.8").unwrap();
    writeln!(file, "s-4,2026-08-24T00:00:04Z,5.1").unwrap();
    drop(file);

    let second = run_pipeline(config, CancellationToken::new()).await.unwrap();
    assert!(second.success());
    assert_eq!(second.outcomes[0].summary.records_uploaded, 2);

    let batches = upserted_batches(&store).await;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1], vec!["s-3".to_string(), "s-4".to_string()]);
}

#[tokio::test]
async fn test_time_series_job_creates_then_fills_series() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/timeseries"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&store)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/timeseries/.+/datapoints$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    let dir = TempDir::new().unwrap();
    let csv = write_csv(
        &dir,
        "obs.csv",
        &["s-1,2026-08-24T00:00:01Z,4.2", "s-1,2026-08-24T00:00:02Z,4.5"],
    );

    let mut job = raw_table_job("obs-series", SourceSpec::File { path: csv }, 10);
    job.destination = DestinationSpec::TimeSeries {
        external_id_prefix: "weather:".into(),
        id_field: "station".into(),
        timestamp_field: Some("observed_at".into()),
        value_fields: vec!["air_temperature".into()],
    };

    let config = pipeline_config(&store.uri(), None, dir.path().join("state.json"), vec![job]);
    let outcome = run_pipeline(config, CancellationToken::new()).await.unwrap();

    assert!(outcome.success());

    let requests = store.received_requests().await.unwrap();
    let creations: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == "/timeseries")
        .collect();
    assert_eq!(creations.len(), 1);
    let body: Value = serde_json::from_slice(&creations[0].body).unwrap();
    assert_eq!(body["external_id"], "weather:s-1_air_temperature");

    let inserts: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path().ends_with("/datapoints"))
        .collect();
    assert_eq!(inserts.len(), 1);
    let body: Value = serde_json::from_slice(&inserts[0].body).unwrap();
    assert_eq!(body["datapoints"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_run_events_reported_to_monitor() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    let monitor = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&monitor)
        .await;

    let dir = TempDir::new().unwrap();
    let good = write_csv(&dir, "good.csv", &["s-1,2026-08-24T00:00:01Z,4.2"]);

    let jobs = vec![
        raw_table_job("obs-good", SourceSpec::File { path: good }, 10),
        raw_table_job(
            "obs-bad",
            SourceSpec::File {
                path: dir.path().join("missing.csv"),
            },
            10,
        ),
    ];
    let config = pipeline_config(
        &store.uri(),
        Some(monitor.uri()),
        dir.path().join("state.json"),
        jobs,
    );
    let outcome = run_pipeline(config, CancellationToken::new()).await.unwrap();

    assert!(!outcome.success());
    assert!(outcome.failure_message().unwrap().contains("obs-bad"));

    let events: Vec<(String, String)> = monitor
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            (
                body["job"].as_str().unwrap().to_string(),
                body["status"].as_str().unwrap().to_string(),
            )
        })
        .collect();

    assert!(events.contains(&("obs-good".to_string(), "started".to_string())));
    assert!(events.contains(&("obs-good".to_string(), "success".to_string())));
    assert!(events.contains(&("obs-bad".to_string(), "failure".to_string())));
    // Exactly one terminal event per job
    let terminals = events
        .iter()
        .filter(|(_, status)| status == "success" || status == "failure")
        .count();
    assert_eq!(terminals, 2);
}

#[tokio::test]
async fn test_stream_record_with_empty_key_fails_run_but_delivers_rest() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    // Record #7 carries an empty key column
    let feed = MockServer::start().await;
    let body: String = (1..=8)
        .map(|i| {
            let station = if i == 7 { String::new() } else { format!("s-{}", i) };
            format!("{{\"seq\":{},\"station\":\"{}\",\"air_temperature\":4.2}}\n", i, station)
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&feed)
        .await;

    let dir = TempDir::new().unwrap();
    let config = pipeline_config(
        &store.uri(),
        None,
        dir.path().join("state.json"),
        vec![raw_table_job(
            "obs-stream",
            SourceSpec::Stream {
                url: format!("{}/feed", feed.uri()),
            },
            4,
        )],
    );
    let outcome = run_pipeline(config, CancellationToken::new()).await.unwrap();

    assert!(!outcome.success());
    let status = &outcome.outcomes[0].status;
    let message = match status {
        sluice_extractor::reporter::RunStatus::Failed(message) => message,
        other => panic!("expected failure, got {:?}", other),
    };
    assert!(message.contains("record #7"), "message was: {message}");

    let summary = &outcome.outcomes[0].summary;
    assert_eq!(summary.mapping_errors, 1);
    assert_eq!(summary.records_uploaded, 7);

    let batches = upserted_batches(&store).await;
    let delivered: Vec<&str> = batches.iter().flatten().map(String::as_str).collect();
    assert_eq!(delivered, vec!["s-1", "s-2", "s-3", "s-4", "s-5", "s-6", "s-8"]);
}

#[tokio::test]
async fn test_permanent_rejection_fails_batch_but_delivers_rest() {
    let store = MockServer::start().await;
    // First batch rejected outright, later batches accepted
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .up_to_n_times(1)
        .mount(&store)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    let dir = TempDir::new().unwrap();
    let csv = write_csv(
        &dir,
        "obs.csv",
        &[
            "s-1,2026-08-24T00:00:01Z,4.2",
            "s-2,2026-08-24T00:00:02Z,4.5",
            "s-3,2026-08-24T00:00:03Z,4.8",
            "s-4,2026-08-24T00:00:04Z,5.1",
        ],
    );

    let config = pipeline_config(
        &store.uri(),
        None,
        dir.path().join("state.json"),
        vec![raw_table_job("obs-file", SourceSpec::File { path: csv }, 2)],
    );
    let outcome = run_pipeline(config, CancellationToken::new()).await.unwrap();

    assert!(!outcome.success());
    let summary = &outcome.outcomes[0].summary;
    assert_eq!(summary.batches_failed, 1);
    assert_eq!(summary.batches_delivered, 1);
    assert_eq!(summary.records_uploaded, 2);

    let batches = upserted_batches(&store).await;
    assert_eq!(batches.len(), 2);
    // The second batch still made it through
    assert_eq!(batches[1], vec!["s-3".to_string(), "s-4".to_string()]);
}
