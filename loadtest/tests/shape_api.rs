use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use loadtest::Workload;
use loadtest::http::{HttpRemote, RequestError, ShapeRequest};
use reqwest::StatusCode;
use shapesync_test::server::{Behavior, ROWS_PER_SHAPE, TestServer};
use shapesync_types::protocol::{Offset, params};

fn failing(initial_status: u16, live_status: u16) -> Behavior {
    Behavior {
        initial_status: StatusCode::from_u16(initial_status).unwrap(),
        live_status: StatusCode::from_u16(live_status).unwrap(),
    }
}

#[tokio::test]
async fn fetch_follows_shape() {
    shapesync_test::tracing::init();
    let server = TestServer::new().await;
    let remote = HttpRemote::new(server.base_url());

    let response = remote
        .fetch("issue", &ShapeRequest::initial("id>='0' and id<='9'"))
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.messages, ROWS_PER_SHAPE as u64 + 1);
    assert!(response.bytes > 0);

    let handle = response.handle().unwrap();
    assert_eq!(handle.shape_id, "shape-1");
    assert_eq!(handle.offset, Offset::new("0_0"));

    let live = ShapeRequest::live(&handle, "id>='0' and id<='9'");
    let response = remote.fetch("issue", &live).await.unwrap();
    assert_eq!(response.messages, 1);
    assert_eq!(response.last_offset, Some(Offset::new("1_0")));

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].is_initial());
    assert_eq!(requests[0].table, "issue");
    assert_eq!(requests[0].param(params::WHERE), Some("id>='0' and id<='9'"));
    assert!(requests[1].is_live());
    assert_eq!(requests[1].param(params::SHAPE_ID), Some("shape-1"));
    assert_eq!(requests[1].param(params::OFFSET), Some("0_0"));
}

#[tokio::test]
async fn fetch_rejects_error_status() {
    shapesync_test::tracing::init();
    let server = TestServer::with_behavior(failing(500, 200)).await;
    let remote = HttpRemote::new(server.base_url());

    let result = remote
        .fetch("issue", &ShapeRequest::initial("id>='0' and id<='9'"))
        .await;
    assert!(matches!(
        result,
        Err(RequestError::Status(status)) if status == StatusCode::INTERNAL_SERVER_ERROR
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_workload_requests_fresh_shapes() {
    shapesync_test::tracing::init();
    let server = TestServer::new().await;

    let workload = Workload::builder("sync")
        .users(3)
        .spawn_rate(0.0)
        .pacing(Duration::from_millis(100))
        .seed(42)
        .sync(10, 1000)
        .build()
        .unwrap();

    let report = loadtest::run(
        HttpRemote::new(server.base_url()),
        vec![workload],
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert!(!report.stopped_early);
    let sync = &report.workloads[0];
    assert_eq!(sync.users_started, 3);
    assert!(sync.initial.requests >= 3);
    assert_eq!(sync.initial.failures, 0);
    assert_eq!(sync.live.requests, 0);
    assert!(sync.initial.latency.is_some());

    let requests = server.requests();
    assert!(!requests.is_empty());
    for request in &requests {
        assert_eq!(request.table, "issue");
        assert!(request.is_initial());
        assert!(!request.is_live());
        assert_eq!(request.param(params::SHAPE_ID), None);

        let filter = request.param(params::WHERE).unwrap();
        assert!(filter.starts_with("id>='00000000-0000-0000-0000-000000000"));
        assert!(filter.contains("' and id<='"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn users_ramp_up_at_spawn_rate() {
    shapesync_test::tracing::init();
    let server = TestServer::new().await;

    // a long pacing lets every user issue exactly one request
    let workload = Workload::builder("ramp")
        .users(3)
        .spawn_rate(10.0)
        .pacing(Duration::from_secs(10))
        .sync(10, 1000)
        .build()
        .unwrap();

    let report = loadtest::run(
        HttpRemote::new(server.base_url()),
        vec![workload],
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    let ramp = &report.workloads[0];
    assert_eq!(ramp.users_started, 3);
    assert_eq!(ramp.initial.requests, 3);

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    for pair in requests.windows(2) {
        let gap = pair[1].received.duration_since(pair[0].received);
        assert!(gap >= Duration::from_millis(80), "users started {gap:?} apart");
        assert!(gap < Duration::from_millis(500), "users started {gap:?} apart");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn ramp_ends_at_deadline() {
    shapesync_test::tracing::init();
    let server = TestServer::new().await;

    let workload = Workload::builder("slow")
        .users(5)
        .spawn_rate(2.0)
        .pacing(Duration::from_secs(10))
        .sync(10, 1000)
        .build()
        .unwrap();

    let started = Instant::now();
    let report = loadtest::run(
        HttpRemote::new(server.base_url()),
        vec![workload],
        Duration::from_millis(1200),
    )
    .await
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!report.stopped_early);

    let slow = &report.workloads[0];
    assert_eq!(slow.users, 5);
    assert!(slow.users_started >= 2);
    assert!(slow.users_started < slow.users);
    assert!(server.requests().len() <= slow.users_started);
}

#[tokio::test(flavor = "multi_thread")]
async fn live_workload_follows_offsets() {
    shapesync_test::tracing::init();
    let server = TestServer::new().await;

    let workload = Workload::builder("live")
        .table("project")
        .users(2)
        .spawn_rate(0.0)
        .pacing(Duration::from_millis(100))
        .live(10, 100)
        .build()
        .unwrap();

    let report = loadtest::run(
        HttpRemote::new(server.base_url()),
        vec![workload],
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert!(!report.stopped_early);
    let live = &report.workloads[0];
    assert_eq!(live.initial.requests, 2);
    assert!(live.live.requests > 0);
    assert_eq!(live.live.failures, 0);

    let requests = server.requests();
    assert_eq!(requests.iter().filter(|r| r.is_initial()).count(), 2);

    // every user polls its own shape, starting at the offset of the initial load
    let mut offsets: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for request in requests.iter().filter(|r| r.is_live()) {
        assert_eq!(request.table, "project");
        assert!(request.param(params::WHERE).unwrap().contains("' and id<'"));

        let shape_id = request.param(params::SHAPE_ID).unwrap();
        offsets
            .entry(shape_id)
            .or_default()
            .push(request.param(params::OFFSET).unwrap());
    }
    assert!(!offsets.is_empty());
    for offsets in offsets.values() {
        let expected: Vec<_> = (0..offsets.len()).map(|tx| format!("{tx}_0")).collect();
        assert_eq!(offsets, &expected);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_live_load_stops_all_users() {
    shapesync_test::tracing::init();
    let server = TestServer::with_behavior(failing(503, 200)).await;

    let live = Workload::builder("live")
        .users(1)
        .pacing(Duration::from_millis(100))
        .live(10, 100)
        .build()
        .unwrap();
    let sync = Workload::builder("sync")
        .users(5)
        .spawn_rate(0.0)
        .pacing(Duration::from_millis(100))
        .sync(10, 1000)
        .build()
        .unwrap();

    let started = Instant::now();
    let report = loadtest::run(
        HttpRemote::new(server.base_url()),
        vec![live, sync],
        Duration::from_secs(30),
    )
    .await
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.stopped_early);
    assert_eq!(report.workloads[0].initial.failures, 1);
    assert!(server.requests().iter().all(|r| !r.is_live()));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_sync_loads_are_counted() {
    shapesync_test::tracing::init();
    let server = TestServer::with_behavior(failing(500, 500)).await;

    let workload = Workload::builder("sync")
        .users(2)
        .spawn_rate(0.0)
        .pacing(Duration::from_millis(100))
        .sync(5, 50)
        .build()
        .unwrap();

    let report = loadtest::run(
        HttpRemote::new(server.base_url()),
        vec![workload],
        Duration::from_millis(500),
    )
    .await
    .unwrap();

    assert!(!report.stopped_early);
    let sync = &report.workloads[0];
    assert_eq!(sync.initial.requests, 0);
    assert!(sync.initial.failures >= 2);
    assert!(sync.initial.latency.is_none());
}
