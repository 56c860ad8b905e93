//! Processing state for the generation pass.
//!
//! ```text
//! idle -> start -> streaming -> completed
//!                           \-> error
//! ```
//!
//! `completed` and `error` are reusable: a new `status=start` marker enters
//! the cycle again. Entering `streaming` requires flipping
//! [`SessionFlags::try_begin_streaming`], which is what keeps generations
//! against one document strictly sequential.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::marker::{DocumentMarker, MarkerId, MarkerStatus};
use crate::session::SessionFlags;

/// Process-local view of where the current document is in the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "id", rename_all = "lowercase")]
pub enum ProcessingState {
    Idle,
    Start,
    Streaming(MarkerId),
    Completed(MarkerId),
    Error(MarkerId),
}

/// Outcome of looking at the document's marker.
#[derive(Debug)]
pub enum Decision {
    /// A generation may run; the ticket holds the streaming flag.
    Begin(StreamingTicket),
    /// A generation is already running; nothing changes.
    AlreadyStreaming,
    /// The document says `streaming_<id>` but nothing here is streaming:
    /// a previous run died mid-stream. Needs an operator reset.
    StaleStreaming(MarkerId),
    /// No live marker.
    Nothing,
}

/// Proof of holding the streaming flag. Dropping it releases the flag.
#[derive(Debug)]
pub struct StreamingTicket {
    id: MarkerId,
    flags: Arc<SessionFlags>,
}

impl StreamingTicket {
    pub fn id(&self) -> &MarkerId {
        &self.id
    }

    /// Marker status to write while this ticket streams.
    pub fn status(&self) -> MarkerStatus {
        MarkerStatus::Streaming(self.id.clone())
    }
}

impl Drop for StreamingTicket {
    fn drop(&mut self) {
        self.flags.end_streaming();
    }
}

#[derive(Debug)]
struct Inner {
    state: ProcessingState,
    last_id: Option<MarkerId>,
}

/// Decides when a generation may start and tracks its progress.
#[derive(Debug)]
pub struct EnvironmentStateMachine {
    flags: Arc<SessionFlags>,
    inner: Mutex<Inner>,
}

impl EnvironmentStateMachine {
    pub fn new(flags: Arc<SessionFlags>) -> Self {
        Self {
            flags,
            inner: Mutex::new(Inner {
                state: ProcessingState::Idle,
                last_id: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ProcessingState {
        self.inner().state.clone()
    }

    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    /// Look at the document's live marker (if any) and decide.
    pub fn evaluate(&self, marker: Option<&DocumentMarker>) -> Decision {
        let Some(marker) = marker else {
            return Decision::Nothing;
        };
        match &marker.status {
            MarkerStatus::Start => {
                if !self.flags.try_begin_streaming() {
                    return Decision::AlreadyStreaming;
                }
                let mut inner = self.inner();
                inner.state = ProcessingState::Start;
                let id = MarkerId::next_after(inner.last_id.as_ref());
                inner.last_id = Some(id.clone());
                inner.state = ProcessingState::Streaming(id.clone());
                Decision::Begin(StreamingTicket {
                    id,
                    flags: self.flags.clone(),
                })
            }
            MarkerStatus::Streaming(id) => {
                if self.flags.is_streaming() {
                    Decision::AlreadyStreaming
                } else {
                    Decision::StaleStreaming(id.clone())
                }
            }
            _ => Decision::Nothing,
        }
    }

    /// Finish a generation successfully. Returns the `completed_<id>` status.
    ///
    /// The streaming flag stays set until `ticket` is dropped, so the caller
    /// can write the final marker before anyone sees the flag clear.
    pub fn complete(&self, _ticket: &StreamingTicket) -> MarkerStatus {
        let id = self.finish_id();
        self.inner().state = ProcessingState::Completed(id.clone());
        MarkerStatus::Completed(id)
    }

    /// Finish a generation with a failure. Returns the `error_<id>` status.
    pub fn fail(&self, _ticket: &StreamingTicket) -> MarkerStatus {
        let id = self.finish_id();
        self.inner().state = ProcessingState::Error(id.clone());
        MarkerStatus::Error(id)
    }

    /// Operator reset back to `idle`. Refused while a generation runs.
    pub fn reset(&self) -> bool {
        if self.flags.is_streaming() {
            return false;
        }
        self.inner().state = ProcessingState::Idle;
        true
    }

    fn finish_id(&self) -> MarkerId {
        let mut inner = self.inner();
        let id = MarkerId::next_after(inner.last_id.as_ref());
        inner.last_id = Some(id.clone());
        id
    }
}
