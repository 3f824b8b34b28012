//! ID generation utilities for mcprun
//!
//! Provides correlation IDs for tool calls and request IDs for JSON-RPC.

use std::sync::atomic::{AtomicU64, Ordering};

static CALL_SEQ: AtomicU64 = AtomicU64::new(1);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a correlation ID for a tool call the backend did not identify
///
/// Format: `call-{timestamp_ms}-{seq:04x}`
/// Example: `call-1738300800123-002a`
pub fn generate_call_id() -> String {
    let seq = CALL_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("call-{}-{:04x}", now_ms(), seq & 0xffff)
}

/// Monotonic JSON-RPC request ID sequence, one per server connection
#[derive(Debug, Default)]
pub struct RequestSeq(AtomicU64);

impl RequestSeq {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Next request ID, starting at 1
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}
