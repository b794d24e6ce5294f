//! Common test helpers for matrixlink tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A device tree model with the standard five-matrix layout
//! - An in-memory [`ElementTree`](matrixlink_client::ElementTree) with push
//!   injection and command capture
//! - A simulated device on a TCP port, cleaned up on drop

pub mod device;
pub mod model;
pub mod tree;

pub use device::SimulatedDevice;
pub use model::{ConnectCommand, DeviceModel, Handled, LabelSide, MATRIX_NAMES};
pub use tree::InMemoryTree;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for a synchronous condition
pub async fn wait_until<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    wait_for(|| std::future::ready(check()), DEFAULT_CHECK_INTERVAL, max_wait).await
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_until(|| counter.load(Ordering::SeqCst) >= target, max_wait).await
}

