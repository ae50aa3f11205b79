//! End-to-end tests for the tail -> deliver -> queue pipeline
//!
//! Each test runs a real [`Agent`] with the HTTP [`DeliveryClient`] against a
//! mockito collector and a temporary log directory.

use chrono::NaiveDate;
use mockito::{Matcher, Mock, Server, ServerGuard};
use printwatch_core::config::{Config, DeliveryConfig};
use printwatch_core::ingest::log_file_path;
use printwatch_core::netinfo::{FixedNetworkInfo, HostAddress};
use printwatch_core::{Agent, DeliveryClient, LogTailer, PendingQueue, RecordParser};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const VERIFY_PATH: &str = "/central/verifyimpression";
const INGEST_PATH: &str = "/central/receptprintreq";

const HEADER: &str = "Time,User,Pages,Copies,Printer,Document Name,Client,Paper Size,Language,Height,Width,Duplex,Grayscale,Size\n";
const REFERENCE_ROW: &str =
    "2024-01-05 09:00:00,alice,3,2,HP1,report.pdf,PC1,A4,EN,0,0,0,GRAYSCALE,120KB\n";

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
}

struct TestEnv {
    _temp_dir: TempDir,
    log_dir: PathBuf,
    pending_dir: PathBuf,
    offsets_file: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let log_dir = temp_dir.path().join("logs");
        std::fs::create_dir_all(&log_dir).expect("failed to create log dir");

        Self {
            pending_dir: temp_dir.path().join("pending"),
            offsets_file: temp_dir.path().join("offsets.json"),
            log_dir,
            _temp_dir: temp_dir,
        }
    }

    fn append(&self, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path(&self.log_dir, day()))
            .expect("failed to open log file");
        file.write_all(content.as_bytes())
            .expect("failed to append to log file");
    }

    fn config(&self, api_base_url: &str) -> Config {
        Config {
            sector: "Finance".to_string(),
            company_id: 7,
            log_dir: self.log_dir.clone(),
            api_base_url: api_base_url.to_string(),
            ..Default::default()
        }
    }

    /// Agent with a fixed host address and durable offsets
    fn agent(&self, api_base_url: &str) -> Agent<DeliveryClient> {
        self.agent_with_tailer(
            api_base_url,
            LogTailer::with_state_file(self.offsets_file.clone()).expect("failed to open offsets"),
        )
    }

    fn agent_with_tailer(&self, api_base_url: &str, tailer: LogTailer) -> Agent<DeliveryClient> {
        let config = self.config(api_base_url);
        let parser = RecordParser::new(
            "Finance",
            7,
            Box::new(FixedNetworkInfo(HostAddress {
                ip: "10.0.0.5".to_string(),
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
            })),
        );
        let queue = PendingQueue::open(&self.pending_dir).expect("failed to open queue");
        let client = DeliveryClient::new(api_base_url, &DeliveryConfig::default())
            .expect("failed to create client");
        Agent::new(&config, tailer, parser, queue, client)
    }

    fn pending_count(&self) -> usize {
        PendingQueue::list_at(&self.pending_dir)
            .expect("failed to list pending queue")
            .len()
    }
}

fn row(user: &str, document: &str) -> String {
    format!("2024-01-05 09:00:00,{user},1,1,HP1,{document},PC1,A4,EN,0,0,0,COLOR,1KB\n")
}

/// Collector that remembers what it ingested, keyed by user + document.
async fn stateful_collector(server: &mut ServerGuard) -> (Vec<Mock>, Arc<Mutex<HashSet<String>>>) {
    let stored: Arc<Mutex<HashSet<String>>> = Arc::default();

    let verify_state = stored.clone();
    let verify = server
        .mock("POST", VERIFY_PATH)
        .with_status(200)
        .with_body_from_request(move |request| {
            let exists = verify_state.lock().unwrap().contains(&event_key(request));
            format!(r#"{{"status":"{}"}}"#, exists).into_bytes()
        })
        .create_async()
        .await;

    let ingest_state = stored.clone();
    let ingest = server
        .mock("POST", INGEST_PATH)
        .with_status(201)
        .with_body_from_request(move |request| {
            ingest_state.lock().unwrap().insert(event_key(request));
            b"{}".to_vec()
        })
        .create_async()
        .await;

    (vec![verify, ingest], stored)
}

fn event_key(request: &mockito::Request) -> String {
    let body: serde_json::Value = request
        .body()
        .ok()
        .and_then(|bytes| serde_json::from_slice(bytes).ok())
        .unwrap_or_default();
    format!("{}|{}", body["usuario"], body["nomearquivo"])
}

fn offsets_contain(path: &Path, log_file: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|content| content.contains(&*log_file.to_string_lossy()))
        .unwrap_or(false)
}

// ============================================
// Delivery
// ============================================

#[tokio::test]
async fn reference_row_is_verified_then_ingested() {
    let env = TestEnv::new();
    env.append(HEADER);
    env.append(REFERENCE_ROW);

    let mut server = Server::new_async().await;
    let expected = serde_json::json!({
        "data": "2024-01-05",
        "hora": "09:00:00",
        "usuario": "alice",
        "setor": "Finance",
        "paginas": 3,
        "copias": 2,
        "impressora": "HP1",
        "nomearquivo": "report.pdf",
        "tipo": "pdf",
        "nomepc": "PC1",
        "tipopage": "A4",
        "cor": "GRAYSCALE",
        "tamanho": "120KB",
        "ip": "10.0.0.5",
        "mac": "aa:bb:cc:dd:ee:ff",
        "empresa": 7
    });
    let verify = server
        .mock("POST", VERIFY_PATH)
        .match_body(Matcher::Json(expected.clone()))
        .with_status(200)
        .with_body(r#"{"status":"false"}"#)
        .expect(1)
        .create_async()
        .await;
    let ingest = server
        .mock("POST", INGEST_PATH)
        .match_body(Matcher::Json(expected))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let mut agent = env.agent(&server.url());
    let first = agent.tick_for_day(day()).await;
    assert_eq!(first.tail.delivered, 1);
    assert_eq!(first.tail.skipped, 0);

    // Nothing new on the second tick
    let second = agent.tick_for_day(day()).await;
    assert_eq!(second.tail.rows_read, 0);

    verify.assert_async().await;
    ingest.assert_async().await;
    assert_eq!(env.pending_count(), 0);
    assert!(offsets_contain(
        &env.offsets_file,
        &log_file_path(&env.log_dir, day())
    ));
}

#[tokio::test]
async fn rows_appended_between_ticks_are_picked_up() {
    let env = TestEnv::new();
    env.append(HEADER);
    env.append(&row("alice", "a.pdf"));

    let mut server = Server::new_async().await;
    let (_mocks, stored) = stateful_collector(&mut server).await;
    let mut agent = env.agent(&server.url());

    assert_eq!(agent.tick_for_day(day()).await.tail.delivered, 1);

    env.append(&row("bob", "b.docx"));
    // Partial line: held back until its newline arrives
    env.append("2024-01-05 09:05:00,carol,1,1,HP1,c.xlsx,PC1");

    assert_eq!(agent.tick_for_day(day()).await.tail.delivered, 1);

    env.append(",A4,EN,0,0,0,COLOR,1KB\n");
    assert_eq!(agent.tick_for_day(day()).await.tail.delivered, 1);

    assert_eq!(stored.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn restart_resumes_from_saved_offset() {
    let env = TestEnv::new();
    env.append(HEADER);
    env.append(&row("alice", "a.pdf"));

    let mut server = Server::new_async().await;
    let (_mocks, stored) = stateful_collector(&mut server).await;

    {
        let mut agent = env.agent(&server.url());
        assert_eq!(agent.tick_for_day(day()).await.tail.delivered, 1);
    }

    env.append(&row("bob", "b.pdf"));

    let mut restarted = env.agent(&server.url());
    let report = restarted.tick_for_day(day()).await;
    assert_eq!(report.tail.rows_read, 1);
    assert_eq!(report.tail.delivered, 1);
    assert_eq!(stored.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn replayed_rows_are_not_ingested_twice() {
    let env = TestEnv::new();
    env.append(HEADER);
    env.append(&row("alice", "a.pdf"));
    env.append(&row("bob", "b.pdf"));

    let mut server = Server::new_async().await;
    let (_mocks, stored) = stateful_collector(&mut server).await;

    // No durable offsets: a restart reads the whole file again
    let mut first = env.agent_with_tailer(&server.url(), LogTailer::new());
    assert_eq!(first.tick_for_day(day()).await.tail.delivered, 2);

    let mut replay = env.agent_with_tailer(&server.url(), LogTailer::new());
    let report = replay.tick_for_day(day()).await;
    assert_eq!(report.tail.rows_read, 2);
    assert_eq!(report.tail.delivered, 0);
    assert_eq!(report.tail.already_existing, 2);
    assert_eq!(stored.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_rows_do_not_block_the_batch() {
    let env = TestEnv::new();
    env.append(HEADER);
    for i in 0..10 {
        if i == 6 {
            env.append("not,a,print,row\n");
        } else {
            env.append(&row(&format!("user{i}"), "doc.pdf"));
        }
    }

    let mut server = Server::new_async().await;
    let (_mocks, stored) = stateful_collector(&mut server).await;
    let mut agent = env.agent(&server.url());

    let report = agent.tick_for_day(day()).await;
    assert_eq!(report.tail.rows_read, 10);
    assert_eq!(report.tail.skipped, 1);
    assert_eq!(report.tail.delivered, 9);
    assert_eq!(stored.lock().unwrap().len(), 9);
}

// ============================================
// Pending queue
// ============================================

#[tokio::test]
async fn outage_queues_events_and_recovery_drains_them() {
    let env = TestEnv::new();
    env.append(HEADER);
    env.append(&row("alice", "a.pdf"));
    env.append(&row("bob", "b.pdf"));

    let mut server = Server::new_async().await;
    let outage = server
        .mock("POST", VERIFY_PATH)
        .with_status(503)
        .with_body("maintenance")
        .create_async()
        .await;

    let mut agent = env.agent(&server.url());
    let down = agent.tick_for_day(day()).await;
    assert_eq!(down.tail.rows_read, 2);
    assert_eq!(down.tail.enqueued, 2);
    assert_eq!(env.pending_count(), 2);

    // Still down: records stay put
    let still_down = agent.tick_for_day(day()).await;
    assert_eq!(still_down.drain.kept, 2);
    assert_eq!(env.pending_count(), 2);

    outage.remove_async().await;
    let (_mocks, stored) = stateful_collector(&mut server).await;

    let recovered = agent.tick_for_day(day()).await;
    assert_eq!(recovered.drain.retired, 2);
    assert_eq!(recovered.tail.rows_read, 0);
    assert_eq!(env.pending_count(), 0);
    assert_eq!(stored.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn unreachable_collector_loses_nothing() {
    let env = TestEnv::new();
    env.append(HEADER);
    env.append(REFERENCE_ROW);

    let mut agent = env.agent("http://127.0.0.1:1");
    let report = agent.tick_for_day(day()).await;

    assert_eq!(report.tail.enqueued, 1);
    assert_eq!(report.tail.enqueue_failures, 0);

    let pending = PendingQueue::open(&env.pending_dir).unwrap();
    let ids = pending.list().unwrap();
    assert_eq!(ids.len(), 1);
    let event = pending.load(&ids[0]).unwrap();
    assert_eq!(event.user, "alice");
    assert_eq!(event.document_type, "pdf");
}

#[tokio::test]
async fn corrupt_pending_record_is_purged_and_others_delivered() {
    let env = TestEnv::new();

    let mut server = Server::new_async().await;
    let (_mocks, stored) = stateful_collector(&mut server).await;
    let mut agent = env.agent(&server.url());

    // One deliverable record and one that no longer decodes
    let queue = PendingQueue::open(&env.pending_dir).unwrap();
    let mut event = agent_event();
    event.user = "queued".to_string();
    queue.enqueue(&event).unwrap();
    std::fs::write(env.pending_dir.join("1.json"), b"{not json").unwrap();

    let report = agent.tick_for_day(day()).await;
    assert_eq!(report.drain.found, 2);
    assert_eq!(report.drain.purged, 1);
    assert_eq!(report.drain.retired, 1);
    assert_eq!(env.pending_count(), 0);
    assert_eq!(stored.lock().unwrap().len(), 1);
}

fn agent_event() -> printwatch_core::PrintEvent {
    serde_json::from_value(serde_json::json!({
        "data": "2024-01-05",
        "hora": "09:00:00",
        "usuario": "alice",
        "setor": "Finance",
        "paginas": 3,
        "copias": 2,
        "impressora": "HP1",
        "nomearquivo": "report.pdf",
        "tipo": "pdf",
        "nomepc": "PC1",
        "tipopage": "A4",
        "cor": "GRAYSCALE",
        "tamanho": "120KB",
        "ip": "10.0.0.5",
        "mac": "aa:bb:cc:dd:ee:ff",
        "empresa": 7
    }))
    .expect("valid event json")
}
