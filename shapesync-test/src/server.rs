//! Exposes an in-process shape API server for use in integration tests.
//!
//! ```
//! use shapesync_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/v1/shape/issue");
//!    // use the URL in tests...
//! }
//! ```
//!
//! The server answers `GET /v1/shape/{table}`. Requests starting at offset `-1` receive a fresh
//! shape ID and a few rows, live requests receive an advanced offset and an up-to-date marker.
//! Every request is recorded and can be inspected with [`TestServer::requests`].

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::json;
use shapesync_types::protocol::{self, Offset, params};

/// Number of rows returned when a shape is loaded from the beginning.
pub const ROWS_PER_SHAPE: usize = 3;

/// Status codes the test server responds with.
#[derive(Clone, Copy, Debug)]
pub struct Behavior {
    /// Status of requests at offset `-1`.
    pub initial_status: StatusCode,
    /// Status of all other requests.
    pub live_status: StatusCode,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            initial_status: StatusCode::OK,
            live_status: StatusCode::OK,
        }
    }
}

/// A request received by the [`TestServer`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// The table from the request path.
    pub table: String,
    /// All query parameters, decoded.
    pub params: HashMap<String, String>,
    /// When the server received the request.
    pub received: Instant,
}

impl RecordedRequest {
    /// Returns the value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns `true` if this request long-polls an existing shape.
    pub fn is_live(&self) -> bool {
        self.param(params::LIVE) == Some("true")
    }

    /// Returns `true` if this request loads a shape from the beginning.
    pub fn is_initial(&self) -> bool {
        self.param(params::OFFSET)
            .is_some_and(|offset| Offset::new(offset).is_before_all())
    }
}

#[derive(Debug)]
struct ServerState {
    behavior: Behavior,
    requests: Mutex<Vec<RecordedRequest>>,
    next_shape: AtomicU64,
}

/// An in-process shape API server for use in integration tests.
///
/// It listens on a random available port on localhost and stops when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    /// Starts a server that answers every request successfully.
    pub async fn new() -> Self {
        Self::with_behavior(Behavior::default()).await
    }

    /// Starts a server that responds with the status codes of `behavior`.
    pub async fn with_behavior(behavior: Behavior) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = Arc::new(ServerState {
            behavior,
            requests: Mutex::default(),
            next_shape: AtomicU64::new(1),
        });

        let router = Router::new()
            .route("/v1/shape/{table}", routing::get(get_shape))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// Returns the base URL of the server, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.socket.port())
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url(), path)
    }

    /// Returns all requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn get_shape(
    State(state): State<Arc<ServerState>>,
    Path(table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let request = RecordedRequest {
        table,
        params: query,
        received: Instant::now(),
    };
    let initial = request.is_initial();
    let shape_id = request.param(params::SHAPE_ID).map(str::to_owned);
    let offset = request.param(params::OFFSET).unwrap_or_default().to_owned();
    state.requests.lock().unwrap().push(request);

    let status = if initial {
        state.behavior.initial_status
    } else {
        state.behavior.live_status
    };
    if status != StatusCode::OK {
        return status.into_response();
    }

    let mut headers = HeaderMap::new();
    let body = if initial {
        let shape_id = shape_id.unwrap_or_else(|| {
            let n = state.next_shape.fetch_add(1, Ordering::Relaxed);
            format!("shape-{n}")
        });
        headers.insert(protocol::SHAPE_ID_HEADER, header_value(&shape_id));
        headers.insert(protocol::CHUNK_LAST_OFFSET_HEADER, header_value("0_0"));

        let mut messages: Vec<_> = (0..ROWS_PER_SHAPE)
            .map(|row| {
                json!({
                    "key": format!("\"public\".\"issue\"/\"{row}\""),
                    "value": { "id": row.to_string() },
                    "headers": { "operation": "insert" },
                })
            })
            .collect();
        messages.push(json!({ "headers": { "control": "up-to-date" } }));
        messages
    } else {
        if let Some(shape_id) = shape_id {
            headers.insert(protocol::SHAPE_ID_HEADER, header_value(&shape_id));
        }
        headers.insert(
            protocol::CHUNK_LAST_OFFSET_HEADER,
            header_value(&next_offset(&offset)),
        );
        vec![json!({ "headers": { "control": "up-to-date" } })]
    };

    (StatusCode::OK, headers, Json(body)).into_response()
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap()
}

/// Advances an offset of the form `{tx}_{op}` by one transaction.
fn next_offset(offset: &str) -> String {
    let tx = offset
        .split('_')
        .next()
        .and_then(|tx| tx.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}_0", tx + 1)
}
