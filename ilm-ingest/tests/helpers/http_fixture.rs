//! Canned loopback HTTP server
//!
//! An axum router on 127.0.0.1 serving fixed responses by request path.
//! Unknown paths get a 404. Every handled request is counted.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub enum CannedResponse {
    Image(Vec<u8>),
    Redirect(String),
    Status(StatusCode),
}

impl CannedResponse {
    pub fn ok(body: &[u8]) -> Self {
        CannedResponse::Image(body.to_vec())
    }

    pub fn redirect(location: &str) -> Self {
        CannedResponse::Redirect(location.to_string())
    }

    pub fn status(status: u16) -> Self {
        CannedResponse::Status(StatusCode::from_u16(status).unwrap())
    }
}

impl IntoResponse for CannedResponse {
    fn into_response(self) -> Response {
        match self {
            CannedResponse::Image(body) => {
                (StatusCode::OK, [(header::CONTENT_TYPE, "image/jpeg")], body).into_response()
            }
            CannedResponse::Redirect(location) => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
            CannedResponse::Status(status) => status.into_response(),
        }
    }
}

pub struct CannedHttpServer {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

impl CannedHttpServer {
    /// Bind an ephemeral port and serve `routes` until dropped
    pub async fn start(routes: Vec<(&str, CannedResponse)>) -> Self {
        let requests = Arc::new(AtomicUsize::new(0));

        let mut router: Router<Arc<AtomicUsize>> = Router::new();
        for (path, response) in routes {
            router = router.route(
                path,
                get(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    response
                }),
            );
        }
        let app = router.fallback(not_found).with_state(requests.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url,
            requests,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for CannedHttpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn not_found(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND
}
