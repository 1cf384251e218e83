//! A minimal emoji feed whose post-creation route is guarded by the
//! admission gate. Identity arrives as an `x-user-id` header, standing in
//! for a verified identity-provider session; everything else about the
//! feed is deliberately boring.
//!
//! ```text
//! POSTS_PER_WINDOW=6 WINDOW_MS=10000 FAIL_POLICY=closed cargo run \
//!     --example feed_server --features axum
//! ```

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;
use tower::BoxError;
use tower::ServiceBuilder;
use tracing_subscriber::EnvFilter;

use gate_limit::Clock;
use gate_limit::LimiterConfig;
use gate_limit::MemoryWindowStore;
use gate_limit::SlidingWindowLimiter;
use gate_limit::SystemClock;
use tower_gate::AdmissionGate;
use tower_gate::AdmissionLayer;
use tower_gate::FailPolicy;
use tower_gate::GateError;

#[derive(Debug, Clone)]
struct Config {
    posts_per_window: NonZeroUsize,
    window: Duration,
    fail_policy: FailPolicy,
    store_timeout: Duration,
    bind_addr: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    fn load() -> Self {
        dotenvy::dotenv().ok();
        let fail_policy = match std::env::var("FAIL_POLICY").as_deref() {
            Ok("open") => FailPolicy::Open,
            _ => FailPolicy::Closed,
        };
        Self {
            posts_per_window: NonZeroUsize::new(env_parse("POSTS_PER_WINDOW", 6))
                .unwrap_or(NonZeroUsize::new(6).unwrap()),
            window: Duration::from_millis(env_parse("WINDOW_MS", 10_000)),
            fail_policy,
            store_timeout: Duration::from_millis(env_parse("STORE_TIMEOUT_MS", 50)),
            bind_addr: env_parse("BIND_ADDR", "127.0.0.1:3000".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Post {
    id: u64,
    author_id: String,
    content: String,
    created_at_ms: u64,
}

#[derive(Debug, Deserialize)]
struct CreatePost {
    content: String,
}

#[derive(Clone)]
struct AppState {
    posts: Arc<RwLock<Vec<Post>>>,
    next_id: Arc<AtomicU64>,
}

/// The API schema owns precise emoji validation; the demo settles for
/// rejecting anything ASCII.
fn looks_like_emoji(content: &str) -> bool {
    let chars = content.chars().count();
    (1..=100).contains(&chars) && content.chars().all(|c| !c.is_ascii() && !c.is_control())
}

fn subject_from_request(req: &Request) -> Option<String> {
    req.headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePost>,
) -> Result<(StatusCode, Json<Post>), (StatusCode, String)> {
    // The admission layer already vouched for this header's presence.
    let author_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or((StatusCode::BAD_REQUEST, "missing identity".to_string()))?
        .to_string();

    if !looks_like_emoji(&body.content) {
        return Err((
            StatusCode::BAD_REQUEST,
            "only emoji posts are allowed".to_string(),
        ));
    }

    let clock = SystemClock;
    let created = Post {
        id: state.next_id.fetch_add(1, Ordering::SeqCst),
        author_id,
        content: body.content,
        created_at_ms: clock.now_ms(),
    };
    state.posts.write().await.push(created.clone());
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_posts(State(state): State<AppState>) -> Json<Vec<Post>> {
    // Newest first; posts are appended in creation order.
    let posts = state.posts.read().await;
    Json(posts.iter().rev().cloned().collect())
}

/// The signature must match BoxError -> IntoResponse
async fn handle_gate_error(err: BoxError) -> impl IntoResponse {
    if let Some(gate_err) = err.downcast_ref::<GateError>() {
        gate_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load();
    tracing::info!(?config, "starting feed server");

    // 1. Shared store, limiter, gate
    let store = Arc::new(MemoryWindowStore::new());
    let limiter = SlidingWindowLimiter::new(
        Arc::clone(&store) as Arc<dyn gate_limit::WindowStore>,
        LimiterConfig::new(config.posts_per_window, config.window),
    );
    let gate = Arc::new(
        AdmissionGate::new(limiter)
            .with_fail_policy(config.fail_policy)
            .with_store_timeout(config.store_timeout),
    );

    // 2. Periodic store sweep; the store spawns no threads of its own
    let sweep_store = Arc::clone(&store);
    tokio::spawn(async move {
        let clock = SystemClock;
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let evicted = sweep_store.sweep(clock.now_ms());
            if evicted > 0 {
                tracing::debug!(evicted, "window store sweep complete");
            }
        }
    });

    // 3. Build the router; only the mutation is gated
    let admission = ServiceBuilder::new()
        // The outermost layer: catches BoxError and returns Response
        .layer(HandleErrorLayer::new(handle_gate_error))
        // The middle layer: introduces BoxError
        .layer(AdmissionLayer::new(gate, subject_from_request))
        // Converts the route's Infallible error to BoxError so the
        // admission service is happy wrapping it
        .map_err(BoxError::from);

    let state = AppState {
        posts: Arc::new(RwLock::new(Vec::new())),
        next_id: Arc::new(AtomicU64::new(1)),
    };
    let app = Router::new()
        .route("/posts", get(list_posts))
        .route("/posts", post(create_post).layer(admission))
        .with_state(state);

    // 4. Serve
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap();
    tracing::info!("listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await.unwrap();
}
