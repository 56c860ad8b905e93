//! Local-change handling: push edits, run generations, reset markers.
//!
//! ## Generation order
//!
//! 1. Marker `start` → `streaming_<id>`, written locally, pushed.
//! 2. Generator output is spliced into the current document as it streams.
//! 3. Marker → `completed_<id>` (or `error_<id>`), written locally.
//! 4. Streaming flag cleared, then the final document is pushed.
//!
//! Step 3 happens before any push, so a failed push that is retried later
//! can never trigger the same prompt again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use texsync_core::marker::{find_markers, rewrite_status, reset_status};
use texsync_core::{content_digest, Decision, MarkerId, MarkerStatus, StreamingTicket};

use crate::collaborators::{GenerationRequest, Prompt};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::file_guard::write_durable;
use crate::monitor::DocumentTrigger;
use crate::notify::Notification;

/// What a push accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Pushed,
    /// The repository already had this content.
    NothingToCommit,
}

/// What handling one local change led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalChange {
    /// The document is exactly what this session last wrote.
    OwnWrite,
    /// A generation is running; its final push carries the edit.
    Deferred,
    /// A generation ran and finished with this marker status.
    Generated(MarkerStatus),
    /// A `streaming_<id>` marker with nothing streaming; needs `texsync reset`.
    StaleMarker(MarkerId),
    /// A `streaming_<id>` marker pulled from a clone that is generating.
    RemoteStreaming(MarkerId),
    Pushed(PushOutcome),
}

pub struct SyncOrchestrator {
    ctx: Arc<SyncContext>,
}

impl SyncOrchestrator {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// React to the local document changing on disk.
    pub fn handle_local_change(&self) -> Result<LocalChange, SyncError> {
        let result = self.handle_local_change_inner();
        if let Err(e) = &result {
            self.ctx.report("Local sync", e);
        }
        result
    }

    fn handle_local_change_inner(&self) -> Result<LocalChange, SyncError> {
        let flags = self.ctx.flags();
        if flags.is_streaming() {
            return Ok(LocalChange::Deferred);
        }
        let content = self.ctx.read_document()?;
        if flags.is_own_write(&content) {
            tracing::debug!("ignoring our own write");
            return Ok(LocalChange::OwnWrite);
        }

        if let Some(change) = self.evaluate(&content)? {
            return Ok(change);
        }
        Ok(LocalChange::Pushed(self.push_document(&content)?))
    }

    /// Generation or stale-marker handling for `content`; `None` when the
    /// document carries no marker that needs action.
    fn evaluate(&self, content: &str) -> Result<Option<LocalChange>, SyncError> {
        let prompt = self.ctx.extractor().extract(content);
        let stale = find_markers(content)
            .into_iter()
            .find(|m| matches!(m.status, MarkerStatus::Streaming(_)));
        let marker = prompt.as_ref().map(|p| &p.marker).or(stale.as_ref());

        match self.ctx.machine().evaluate(marker) {
            Decision::Begin(ticket) => match prompt {
                Some(prompt) => Ok(Some(LocalChange::Generated(
                    self.run_generation(ticket, &prompt, content)?,
                ))),
                None => Ok(None),
            },
            Decision::AlreadyStreaming => Ok(Some(LocalChange::Deferred)),
            Decision::StaleStreaming(id) if self.ctx.is_remote_stream(&id) => {
                tracing::debug!("marker {id} belongs to another clone's generation");
                self.push_document(content)?;
                Ok(Some(LocalChange::RemoteStreaming(id)))
            }
            Decision::StaleStreaming(id) => {
                self.ctx.notify(Notification::error(
                    "Stale marker",
                    format!(
                        "{} says status=streaming_{id} but no generation is running. Run `texsync reset` to clear it.",
                        self.ctx.document().display()
                    ),
                ));
                // Edits around a stale marker still sync.
                self.push_document(content)?;
                Ok(Some(LocalChange::StaleMarker(id)))
            }
            Decision::Nothing => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Copy `content` into the repository and commit + push it under the lease.
    /// Local commits from an earlier rejected push go out too, even when
    /// `content` itself adds nothing.
    pub fn push_document(&self, content: &str) -> Result<PushOutcome, SyncError> {
        let lease = self.ctx.lease()?;
        let git = self.ctx.git();
        let repo_document = self.ctx.repo_document();
        let name = repo_document
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        write_durable(repo_document, content)?;
        git.add(repo_document)?;
        if git.has_staged_changes()? {
            git.commit(&format!("Auto-update: {name}"))?;
        } else if git.local_ahead_count().unwrap_or(0) == 0 {
            // No remote-tracking branch yet counts as nothing unpushed.
            drop(lease);
            self.ctx.mark_synced(content_digest(content));
            return Ok(PushOutcome::NothingToCommit);
        } else {
            tracing::info!("retrying push of unpushed local commits");
        }

        match git.push() {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                self.ctx.notify(Notification::error(
                    "Push rejected",
                    format!(
                        "The remote has changes this clone lacks. The commit stays local; the next remote sync merges and pushes it: {}",
                        e.detail
                    ),
                ));
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }
        if lease.is_expired() {
            tracing::warn!("lease expired during push; exclusivity was not guaranteed");
        }
        drop(lease);

        let digest = content_digest(content);
        self.ctx.update_state(|s| {
            s.last_synced_digest = Some(digest);
            s.last_push_at = Some(Utc::now());
            s.dirty = false;
        });
        tracing::info!("pushed {name}");
        Ok(PushOutcome::Pushed)
    }

    fn push_best_effort(&self, content: &str) {
        if let Err(e) = self.push_document(content) {
            tracing::warn!("push failed: {e}");
            self.ctx.report("Push", &e);
        }
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    fn run_generation(
        &self,
        ticket: StreamingTicket,
        prompt: &Prompt,
        content: &str,
    ) -> Result<MarkerStatus, SyncError> {
        let ctx = &self.ctx;
        let id = ticket.id().clone();
        let streaming = ticket.status();
        let cancel = ctx.flags().fresh_cancellation();
        tracing::info!("generation {id} starting");

        let document = rewrite_status(content, &MarkerStatus::Start, streaming.clone())?;
        ctx.write_document(&document)?;
        self.push_best_effort(&document);

        let flush_every = ctx
            .config
            .generator
            .as_ref()
            .map(|g| Duration::from_millis(g.flush_interval_ms))
            .unwrap_or(Duration::from_millis(500));

        let mut response = String::new();
        let outcome = match ctx.generator() {
            None => Err(SyncError::Generation("no generator configured".into())),
            Some(generator) => {
                let request = GenerationRequest::from_prompt(prompt, id.clone());
                let mut last_flush = Instant::now();
                let mut dirty = false;
                let streamed = generator.generate(&request, &cancel, &mut |chunk| {
                    response.push_str(chunk);
                    dirty = true;
                    if last_flush.elapsed() >= flush_every {
                        self.splice(&streaming, &id, &response)?;
                        last_flush = Instant::now();
                        dirty = false;
                    }
                    Ok(())
                });
                match streamed {
                    Ok(()) if dirty || response.is_empty() => {
                        self.splice(&streaming, &id, &response)
                    }
                    other => other,
                }
            }
        };

        let finished = match &outcome {
            Ok(()) => ctx.machine().complete(&ticket),
            Err(e) => {
                tracing::error!("generation {id} failed: {e}");
                ctx.notify(Notification::error("Generation failed", e.to_string()));
                ctx.machine().fail(&ticket)
            }
        };

        let current = ctx.read_document()?;
        let final_document = match rewrite_status(&current, &streaming, finished.clone()) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("cannot finalize marker for {id}: {e}");
                current
            }
        };
        ctx.write_document(&final_document)?;
        drop(ticket);
        tracing::info!("generation {id} finished as {finished}");

        self.push_best_effort(&final_document);
        Ok(finished)
    }

    /// Re-read the document and put `response` in place for generation `id`.
    fn splice(&self, anchor: &MarkerStatus, id: &MarkerId, response: &str) -> Result<(), SyncError> {
        let current = self.ctx.read_document()?;
        let updated = self
            .ctx
            .extractor()
            .splice(&current, anchor, id, response)
            .ok_or_else(|| texsync_core::MarkerError::NotFound {
                status: anchor.to_string(),
            })?;
        if updated != current {
            self.ctx.write_document(&updated)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Cancel the generation in flight. `true` if one was running.
    pub fn cancel_generation(&self) -> bool {
        self.ctx.flags().cancel_generation()
    }

    /// Force the first stale `streaming_`/`error_` marker to `to` and push.
    ///
    /// `Ok(false)` when there was nothing to reset. Refused while a
    /// generation is running.
    pub fn reset_marker(&self, to: MarkerStatus) -> Result<bool, SyncError> {
        if !self.ctx.machine().reset() {
            return Err(SyncError::Generation(
                "a generation is running; cancel it first".into(),
            ));
        }
        let content = self.ctx.read_document()?;
        let Some(marker) = find_markers(&content).into_iter().find(|m| {
            matches!(
                m.status,
                MarkerStatus::Streaming(_) | MarkerStatus::Error(_)
            )
        }) else {
            return Ok(false);
        };
        let updated = reset_status(&content, &marker.status, to)?;
        self.ctx.write_document(&updated)?;
        self.push_best_effort(&updated);
        Ok(true)
    }
}

impl DocumentTrigger for SyncOrchestrator {
    /// Pulled content may carry a fresh `status=start` from a collaborator.
    fn document_changed(&self) {
        if !self.ctx.flags().take_remote_update() {
            return;
        }
        let content = match self.ctx.read_document() {
            Ok(c) => c,
            Err(e) => {
                self.ctx.report("Remote update", &e);
                return;
            }
        };
        match self.evaluate(&content) {
            Ok(Some(change)) => tracing::info!("remote update: {change:?}"),
            Ok(None) => {}
            Err(e) => self.ctx.report("Remote update", &e),
        }
    }
}
