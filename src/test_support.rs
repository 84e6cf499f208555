//! In-process HTTP backend for client tests, served by axum on an ephemeral port.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum Reply {
    Json { status: u16, body: Value },
    /// Accept the request and never answer.
    Hang,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self::Json { status, body }
    }
}

/// Canned replies per path, served in order with the last one repeating.
struct Backend {
    routes: HashMap<String, Mutex<VecDeque<Reply>>>,
    fallback: Reply,
    hits: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl Backend {
    fn next_reply(&self, path: &str) -> Reply {
        let Some(queue) = self.routes.get(path) else {
            return self.fallback.clone();
        };
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_else(|| self.fallback.clone())
        }
    }
}

async fn answer(State(backend): State<Arc<Backend>>, uri: Uri) -> Response {
    backend.hits.fetch_add(1, Ordering::SeqCst);
    backend.requests.lock().unwrap().push(uri.to_string());

    match backend.next_reply(uri.path()) {
        Reply::Json { status, body } => {
            let status = StatusCode::from_u16(status).unwrap();
            (status, Json(body)).into_response()
        }
        Reply::Hang => std::future::pending().await,
    }
}

pub struct TestServer {
    pub base_url: String,
    backend: Arc<Backend>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Vec<Reply>)>) -> Self {
        let routes = routes
            .into_iter()
            .map(|(path, replies)| (path.to_string(), Mutex::new(replies.into())))
            .collect();
        Self::spawn(routes, Reply::json(404, json!({"message": "No route"}))).await
    }

    /// Every request hangs.
    pub async fn hanging() -> Self {
        Self::spawn(HashMap::new(), Reply::Hang).await
    }

    async fn spawn(routes: HashMap<String, Mutex<VecDeque<Reply>>>, fallback: Reply) -> Self {
        let backend = Arc::new(Backend {
            routes,
            fallback,
            hits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .fallback(answer)
            .with_state(Arc::clone(&backend));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            backend,
            handle,
        }
    }

    /// Requests received so far.
    pub fn hits(&self) -> usize {
        self.backend.hits.load(Ordering::SeqCst)
    }

    /// Path and raw query of every request received, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.backend.requests.lock().unwrap().clone()
    }
}
