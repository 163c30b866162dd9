//! Per-client request throttling
//!
//! One token bucket per key, where the key comes from a caller-supplied
//! function over the request (source IP by default). Buckets are created
//! lazily and a background sweep evicts the ones that go idle, so memory
//! stays bounded by the set of recently active clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::{self, Instant};
use tracing::debug;

/// How often the sweep wakes up.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Visitors idle for longer than this multiple of the sweep interval are
/// evicted.
const IDLE_MULTIPLIER: u32 = 3;

/// Extracts the throttling key from a request.
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// A single token bucket: allows bursts up to `burst`, refilling one token
/// every `per`.
pub struct TokenBucket {
    per: Duration,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refreshed: Instant,
}

impl TokenBucket {
    fn new(per: Duration, burst: u32) -> Self {
        Self {
            per,
            burst: f64::from(burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                refreshed: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(state.refreshed);
        let refill = elapsed.as_secs_f64() / self.per.as_secs_f64();
        if refill > 0.0 {
            state.tokens = (state.tokens + refill).min(self.burst);
            state.refreshed = now;
        }
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Visitor {
    bucket: Arc<TokenBucket>,
    last_seen: Instant,
}

/// Keyed rate limiter. The visitor map takes a lock on insert and lookup;
/// token consumption happens inside the bucket and never holds the map lock.
pub struct RateLimiter {
    per: Duration,
    burst: u32,
    visitors: Arc<AsyncMutex<HashMap<String, Visitor>>>,
    key_of: KeyFn,
    shutdown: mpsc::Sender<()>,
}

impl RateLimiter {
    /// Create a limiter refilling one token every `per` with the given
    /// burst, and start its sweep task. Must be called from within a tokio
    /// runtime.
    pub fn new(per: Duration, burst: u32, key_of: KeyFn) -> Self {
        let visitors = Arc::new(AsyncMutex::new(HashMap::new()));
        let (shutdown, receiver) = mpsc::channel(1);
        tokio::spawn(sweep(Arc::clone(&visitors), receiver));
        Self {
            per,
            burst,
            visitors,
            key_of,
            shutdown,
        }
    }

    /// Limiter keyed by client IP.
    pub fn by_source_ip(per: Duration, burst: u32) -> Self {
        Self::new(per, burst, Arc::new(source_ip))
    }

    /// The bucket for this request's key, created on first sight.
    pub fn get(&self, request: &Request) -> impl std::future::Future<Output = Arc<TokenBucket>> + '_ {
        // Extract the key synchronously so the `&Request` borrow is not held
        // across the await below; otherwise the returned future would capture
        // the reference and become `!Send`, which axum's middleware rejects.
        let key = (self.key_of)(request);
        self.get_for_key(key)
    }

    async fn get_for_key(&self, key: String) -> Arc<TokenBucket> {
        let mut visitors = self.visitors.lock().await;
        let now = Instant::now();
        let visitor = visitors.entry(key).or_insert_with(|| Visitor {
            bucket: Arc::new(TokenBucket::new(self.per, self.burst)),
            last_seen: now,
        });
        visitor.last_seen = now;
        Arc::clone(&visitor.bucket)
    }

    /// Stop the sweep task. The limiter keeps serving buckets afterwards;
    /// only eviction stops.
    pub fn close(&self) {
        let _ = self.shutdown.try_send(());
    }

    #[cfg(test)]
    async fn visitor_count(&self) -> usize {
        self.visitors.lock().await.len()
    }
}

async fn sweep(
    visitors: Arc<AsyncMutex<HashMap<String, Visitor>>>,
    mut shutdown: mpsc::Receiver<()>,
) {
    let idle_limit = SWEEP_INTERVAL * IDLE_MULTIPLIER;
    let mut ticker = time::interval(SWEEP_INTERVAL);
    // the first tick fires immediately; skip it
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("rate limiter sweep stopped");
                return;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let mut visitors = visitors.lock().await;
                visitors.retain(|_, visitor| now.duration_since(visitor.last_seen) <= idle_limit);
            }
        }
    }
}

/// Client address for keying: forwarding headers first, then the socket
/// peer.
pub fn source_ip(request: &Request) -> String {
    if let Some(ip) = ip_from_headers(request.headers()) {
        return ip;
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// First address in X-Forwarded-For, else X-Real-Ip.
pub fn ip_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
