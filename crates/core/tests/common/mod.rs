//! Common test utilities for integration tests.
//!
//! This module provides shared test helpers and configuration for
//! integration testing peer sessions.

use pairchat_core::chat::MemoryStore;
use pairchat_core::{
    login, MemoryHub, SessionContext, SessionEvent, SessionEvents, SessionHandle, SessionStatus,
    SharedStore, StaticRegistry,
};
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for test operations.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shorter timeout for operations expected to fail quickly.
#[allow(dead_code)]
pub const FAIL_TIMEOUT: Duration = Duration::from_secs(2);

/// Initialize test logging with appropriate filters.
///
/// Call this at the start of tests that need debug output.
/// Safe to call multiple times (subsequent calls are no-ops).
#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pairchat_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Run an async operation with a timeout.
///
/// Returns the result if the operation completes within the timeout,
/// or panics with a timeout message if it doesn't.
#[allow(dead_code)]
pub async fn with_timeout<T, F>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .expect("Test operation timed out")
}

/// Wait for the first event matching `pred`, skipping the rest.
#[allow(dead_code)]
pub async fn wait_for<F>(events: &mut SessionEvents, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    with_timeout(async {
        loop {
            let event = events.recv().await.expect("session event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
}

/// Wait until the session reports `status`.
#[allow(dead_code)]
pub async fn wait_for_status(events: &mut SessionEvents, status: SessionStatus) {
    wait_for(
        events,
        |event| matches!(event, SessionEvent::StatusChanged { status: s } if *s == status),
    )
    .await;
}

/// Drain whatever events are already buffered.
#[allow(dead_code)]
pub fn drain(events: &mut SessionEvents) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Let spawned tasks run without moving the clock.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// A hub plus one store per participant.
#[allow(dead_code)]
pub struct TestNet {
    pub hub: MemoryHub,
    pub khusbu_store: SharedStore,
    pub abhijit_store: SharedStore,
}

#[allow(dead_code)]
impl TestNet {
    pub fn new() -> Self {
        Self {
            hub: MemoryHub::new(),
            khusbu_store: Arc::new(MemoryStore::new()),
            abhijit_store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn context(&self, store: &SharedStore) -> SessionContext {
        SessionContext::new(
            Arc::new(StaticRegistry::default()),
            Arc::new(self.hub.transport()),
            store.clone(),
        )
    }

    pub async fn khusbu(&self) -> (SessionHandle, SessionEvents) {
        login(&self.context(&self.khusbu_store), "khusbu", "khusbu123")
            .await
            .expect("khusbu login")
    }

    pub async fn abhijit(&self) -> (SessionHandle, SessionEvents) {
        login(&self.context(&self.abhijit_store), "abhijit", "abhi123")
            .await
            .expect("abhijit login")
    }
}
