//! Scheduler behavior against a live local HTTP fixture: per-endpoint
//! mutual exclusion and graceful-shutdown persistence.

use httpmon_alert::{AlertEngine, AlertEngineConfig};
use httpmon_common::types::{HttpMethod, Plan};
use httpmon_engine::incident::IncidentEngine;
use httpmon_engine::scheduler::Scheduler;
use httpmon_notify::SinkRegistry;
use httpmon_probe::Prober;
use httpmon_secret::SecretStore;
use httpmon_storage::admin::NewEndpoint;
use httpmon_storage::StateStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

struct Fixture {
    store: Arc<StateStore>,
    scheduler: Arc<Scheduler>,
    shutdown_tx: watch::Sender<bool>,
}

fn build(store: Arc<StateStore>, tick_secs: u64, max_concurrent: usize) -> Fixture {
    let secrets = Arc::new(SecretStore::new("scheduler-test-secret-012345").unwrap());
    let alerts = AlertEngine::new(
        store.clone(),
        Arc::new(SinkRegistry::new()),
        AlertEngineConfig::default(),
    );
    let incidents = Arc::new(IncidentEngine::new(store.clone(), alerts));
    let prober = Prober::new(store.clone(), secrets).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        prober,
        incidents,
        tick_secs,
        max_concurrent,
        shutdown_rx,
    ));
    Fixture {
        store,
        scheduler,
        shutdown_tx,
    }
}

/// Serves every connection after `delay`, tracking the peak number of
/// simultaneous connections.
async fn slow_server(delay: Duration, peak: Arc<AtomicUsize>, total: Arc<AtomicUsize>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let live = Arc::new(AtomicUsize::new(0));
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            total.fetch_add(1, Ordering::SeqCst);
            let live = live.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                let now_live = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now_live, Ordering::SeqCst);

                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;

                live.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });
    addr
}

fn register(store: &StateStore, project_id: &str, name: &str, url: String) {
    store
        .register_endpoint(&NewEndpoint {
            project_id: project_id.to_string(),
            name: name.to_string(),
            url,
            method: HttpMethod::Get,
            headers_json: None,
            request_body: None,
            expected_status: 200,
            interval_secs: 60,
            timeout_ms: 10000,
            max_latency_ms: None,
            credential_id: None,
        })
        .unwrap();
}

/// A probe that outlives several ticks must not be started a second time:
/// the in-flight set rejects reentry even though the endpoint stays due
/// until the first probe completes.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_endpoint_never_probed_concurrently() {
    httpmon_common::id::init(1, 1);
    let peak = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let addr = slow_server(Duration::from_millis(2500), peak.clone(), total.clone()).await;

    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let project = store.create_project("demo", Plan::Pro).unwrap();
    register(&store, &project.id, "slow", format!("http://{addr}/"));
    let endpoint_id = store.due_endpoints(chrono::Utc::now()).unwrap()[0].id.clone();

    let fixture = build(store.clone(), 1, 10);
    let handle = tokio::spawn({
        let scheduler = fixture.scheduler.clone();
        async move {
            scheduler.run(Duration::from_secs(10)).await;
        }
    });

    // Three ticks pass while the first probe is still in flight
    tokio::time::sleep(Duration::from_millis(3200)).await;
    fixture.shutdown_tx.send(true).ok();
    handle.await.unwrap();

    assert_eq!(total.load(Ordering::SeqCst), 1, "exactly one probe started");
    assert_eq!(peak.load(Ordering::SeqCst), 1, "no overlapping probes");

    // The completed probe was processed
    let results = fixture.store.recent_results(&endpoint_id, 10).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
}

/// Two distinct endpoints run in parallel up to the concurrency budget.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distinct_endpoints_run_in_parallel() {
    httpmon_common::id::init(1, 1);
    let peak = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let addr = slow_server(Duration::from_millis(600), peak.clone(), total.clone()).await;

    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let project = store.create_project("demo", Plan::Pro).unwrap();
    register(&store, &project.id, "a", format!("http://{addr}/a"));
    register(&store, &project.id, "b", format!("http://{addr}/b"));

    let fixture = build(store.clone(), 1, 10);
    let handle = tokio::spawn({
        let scheduler = fixture.scheduler.clone();
        async move {
            scheduler.run(Duration::from_secs(10)).await;
        }
    });

    tokio::time::sleep(Duration::from_millis(1500)).await;
    fixture.shutdown_tx.send(true).ok();
    handle.await.unwrap();

    assert_eq!(total.load(Ordering::SeqCst), 2);
    assert_eq!(peak.load(Ordering::SeqCst), 2, "both probes overlapped");
}

/// The admission budget defers the overflow to the next tick instead of
/// queueing it.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrency_budget_defers_overflow() {
    httpmon_common::id::init(1, 1);
    let peak = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let addr = slow_server(Duration::from_millis(400), peak.clone(), total.clone()).await;

    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let project = store.create_project("demo", Plan::Pro).unwrap();
    for i in 0..3 {
        register(&store, &project.id, &format!("ep-{i}"), format!("http://{addr}/{i}"));
    }

    // Budget of one: the three due endpoints take three ticks
    let fixture = build(store.clone(), 1, 1);
    let handle = tokio::spawn({
        let scheduler = fixture.scheduler.clone();
        async move {
            scheduler.run(Duration::from_secs(10)).await;
        }
    });

    tokio::time::sleep(Duration::from_millis(3500)).await;
    fixture.shutdown_tx.send(true).ok();
    handle.await.unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 1, "budget of one is respected");
    assert_eq!(total.load(Ordering::SeqCst), 3, "everyone got probed eventually");
}

/// Cancellation mid-probe: the scheduler stops admitting but the in-flight
/// probe finishes inside the grace period and its result is persisted.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_persists_in_flight_results() {
    httpmon_common::id::init(1, 1);
    let peak = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));
    let addr = slow_server(Duration::from_millis(500), peak.clone(), total.clone()).await;

    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let project = store.create_project("demo", Plan::Pro).unwrap();
    register(&store, &project.id, "slow", format!("http://{addr}/"));
    let endpoint_id = store.due_endpoints(chrono::Utc::now()).unwrap()[0].id.clone();

    let fixture = build(store.clone(), 1, 10);
    let handle = tokio::spawn({
        let scheduler = fixture.scheduler.clone();
        async move {
            scheduler.run(Duration::from_secs(5)).await;
        }
    });

    // Shut down while the first probe is mid-flight
    tokio::time::sleep(Duration::from_millis(150)).await;
    fixture.shutdown_tx.send(true).ok();
    handle.await.unwrap();

    let results = store.recent_results(&endpoint_id, 10).unwrap();
    assert_eq!(results.len(), 1, "in-flight result persisted during drain");
    assert!(results[0].success);
}
