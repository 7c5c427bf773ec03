/// This module implements the `EndpointPool`, an ordered list of redundant Solana
/// RPC endpoint URLs with a shared current index. The payment path cycles through
/// the pool on transient failures; exhaustion of the retry budget is the caller's
/// concern, the pool itself just rotates and never fails.
use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered set of redundant RPC endpoints with an atomic rotation cursor.
///
/// The index is advanced with an atomic compare-and-swap loop so two purchase
/// flows failing over at the same moment cannot corrupt it; both observe a
/// valid index and the pool advances at most once per call.
pub struct EndpointPool {
    endpoints: Vec<String>,
    current: AtomicUsize,
}

impl EndpointPool {
    /// Creates a pool from a non-empty list of endpoint URLs. The first entry
    /// is the initially active endpoint.
    ///
    /// # Panics
    ///
    /// Panics if `endpoints` is empty; a node without a single RPC endpoint
    /// cannot operate and this is a startup configuration error.
    pub fn new(endpoints: Vec<String>) -> Self {
        assert!(!endpoints.is_empty(), "endpoint pool requires at least one URL");
        info!("Endpoint pool initialized with {} endpoint(s)", endpoints.len());
        Self {
            endpoints,
            current: AtomicUsize::new(0),
        }
    }

    /// Returns the currently active endpoint URL. Never fails.
    pub fn current(&self) -> &str {
        &self.endpoints[self.current.load(Ordering::SeqCst)]
    }

    /// Advances to the next endpoint (wrapping) and returns it. With a single
    /// endpoint this returns the same URL again.
    pub fn advance(&self) -> &str {
        let len = self.endpoints.len();
        let next = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
            .map(|prev| (prev + 1) % len)
            .unwrap_or(0);
        debug!("Endpoint pool advanced to {}", self.endpoints[next]);
        &self.endpoints[next]
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }
}
