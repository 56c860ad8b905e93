//! Session-scoped shared flags.
//!
//! One [`SessionFlags`] exists per watch session and is handed by `Arc` to the
//! watcher, the orchestrator and the remote monitor. Nothing here is global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::types::content_digest;

/// Cooperative cancellation for a running generation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared mutable state for one watch session.
#[derive(Debug, Default)]
pub struct SessionFlags {
    streaming: AtomicBool,
    remote_update: AtomicBool,
    last_written: Mutex<Option<String>>,
    cancel: Mutex<CancellationToken>,
}

impl SessionFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Flip the streaming flag from false to true.
    ///
    /// Returns `false` when another generation already holds it.
    pub fn try_begin_streaming(&self) -> bool {
        self.streaming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_streaming(&self) {
        self.streaming.store(false, Ordering::SeqCst);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Remember the digest of content this session just wrote to the document.
    pub fn record_written(&self, digest: impl Into<String>) {
        if let Ok(mut guard) = self.last_written.lock() {
            *guard = Some(digest.into());
        }
    }

    /// Whether `content` is exactly what this session last wrote.
    pub fn is_own_write(&self, content: &str) -> bool {
        let digest = content_digest(content);
        self.last_written
            .lock()
            .map(|guard| guard.as_deref() == Some(digest.as_str()))
            .unwrap_or(false)
    }

    /// Set after remote content was applied to the local document.
    pub fn mark_remote_update(&self) {
        self.remote_update.store(true, Ordering::SeqCst);
    }

    /// Read and clear the remote-update flag.
    pub fn take_remote_update(&self) -> bool {
        self.remote_update.swap(false, Ordering::SeqCst)
    }

    /// Token for a new generation; replaces any previous one.
    pub fn fresh_cancellation(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.cancel.lock() {
            *guard = token.clone();
        }
        token
    }

    /// Cancel the generation in flight, if any. Returns whether one was running.
    pub fn cancel_generation(&self) -> bool {
        if let Ok(guard) = self.cancel.lock() {
            guard.cancel();
        }
        self.is_streaming()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_streamer_at_a_time() {
        let flags = SessionFlags::new();
        assert!(flags.try_begin_streaming());
        assert!(!flags.try_begin_streaming());
        flags.end_streaming();
        assert!(flags.try_begin_streaming());
    }

    #[test]
    fn own_writes_are_recognised_by_content() {
        let flags = SessionFlags::new();
        assert!(!flags.is_own_write("abc"));
        flags.record_written(content_digest("abc"));
        assert!(flags.is_own_write("abc"));
        assert!(!flags.is_own_write("abcd"));
    }

    #[test]
    fn remote_update_flag_is_consumed_once() {
        let flags = SessionFlags::new();
        flags.mark_remote_update();
        assert!(flags.take_remote_update());
        assert!(!flags.take_remote_update());
    }

    #[test]
    fn cancel_reaches_latest_token() {
        let flags = SessionFlags::new();
        let stale = flags.fresh_cancellation();
        let live = flags.fresh_cancellation();
        flags.cancel_generation();
        assert!(live.is_cancelled());
        assert!(!stale.is_cancelled());
    }
}
