/// Generation session: the single source of truth for what is on screen.
///
/// A round is split in two so the caller can await the generator without
/// holding the session borrowed:
///
///   submit()   Idle/Displaying/Failed → Generating, hands back a request
///   complete() Generating → Displaying (new snapshot) or Failed
///
/// While a round is in flight every other mutating call is rejected with
/// `Busy`. Nothing touches the turn log or version store until a round
/// succeeds, so a failure leaves history exactly as it was.
use std::sync::Arc;

use crate::actions::UserAction;
use crate::client::{GeneratedUi, Generator};
use crate::document::Document;
use crate::error::{GenerationError, Rejection};
use crate::turns::{Turn, TurnLog};
use crate::versions::{Snapshot, SnapshotId, VersionStore};

// ── State ─────────────────────────────────────────────────────────────────────

/// Identifies one submitted round; completions for any other ticket are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Generating {
        ticket: Ticket,
        prompt: String,
        refine: bool,
        /// Snapshot that was active when the round started
        previous: Option<SnapshotId>,
    },
    Displaying {
        snapshot: SnapshotId,
    },
    Failed {
        prompt: String,
        error: GenerationError,
        previous: Option<SnapshotId>,
    },
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Generating { .. } => "generating",
            SessionState::Displaying { .. } => "displaying",
            SessionState::Failed { .. } => "failed",
        }
    }
}

/// What the generator should be asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub ticket: Ticket,
    pub prompt: String,
    /// Empty unless refining
    pub history: TurnLog,
    pub refine: bool,
}

/// Result of feeding a generator outcome back into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Displayed(Arc<Snapshot>),
    Failed(GenerationError),
    /// Ticket did not match the in-flight round; nothing changed
    Stale,
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    turn_log: TurnLog,
    pub(crate) versions: VersionStore,
    tickets: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            turn_log: TurnLog::new(),
            versions: VersionStore::new(),
            tickets: 0,
        }
    }

    // ── Round lifecycle ───────────────────────────────────────────────────────

    /// Start a generation round.
    ///
    /// With `refine == false` the round starts a new lineage: the request
    /// carries no history and, on success, the old log and store are dropped
    /// and numbering restarts at 1.
    pub fn submit(&mut self, prompt: &str, refine: bool) -> Result<GenerationRequest, Rejection> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            log::debug!("submit ignored: empty prompt");
            return Err(Rejection::EmptyInput);
        }
        if self.is_generating() {
            log::debug!("submit ignored: generation already in flight");
            return Err(Rejection::Busy);
        }

        self.tickets += 1;
        let ticket = Ticket(self.tickets);
        let history = if refine { self.turn_log.clone() } else { TurnLog::new() };
        let previous = self.active_snapshot_id();

        log::debug!(
            "{} → generating (refine={refine}, context turns={})",
            self.state.label(),
            history.len()
        );
        self.state = SessionState::Generating {
            ticket,
            prompt: prompt.to_string(),
            refine,
            previous,
        };

        Ok(GenerationRequest {
            ticket,
            prompt: prompt.to_string(),
            history,
            refine,
        })
    }

    /// Submit an action raised by the rendered UI as a refinement.
    pub fn submit_action(&mut self, action: &UserAction) -> Result<GenerationRequest, Rejection> {
        self.submit(&action.to_prompt(), true)
    }

    /// Finish the in-flight round with the generator's outcome.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        outcome: Result<GeneratedUi, GenerationError>,
    ) -> Completion {
        let (prompt, refine, previous) = match &self.state {
            SessionState::Generating { ticket: t, prompt, refine, previous } if *t == ticket => {
                (prompt.clone(), *refine, *previous)
            }
            _ => {
                log::warn!("dropping stale generation result for ticket {}", ticket.0);
                return Completion::Stale;
            }
        };

        match outcome {
            Ok(generated) => {
                if !refine {
                    self.turn_log.clear();
                    self.versions.clear();
                }
                let assistant = Turn::assistant(generated.explanation.as_deref(), &generated.document);
                self.turn_log.push_round(Turn::user(prompt.as_str()), assistant);
                let snapshot = self.versions.push(prompt, generated.document, self.turn_log.clone());
                log::debug!(
                    "generating → displaying snapshot {} ({} fragments)",
                    snapshot.id(),
                    snapshot.document().len()
                );
                self.state = SessionState::Displaying { snapshot: snapshot.id() };
                Completion::Displayed(snapshot)
            }
            Err(error) => {
                log::warn!("generation failed: {error}");
                self.state = SessionState::Failed {
                    prompt,
                    error: error.clone(),
                    previous,
                };
                Completion::Failed(error)
            }
        }
    }

    /// Run one full round against `generator`: submit, await, complete.
    pub async fn generate<G: Generator + ?Sized>(
        &mut self,
        generator: &G,
        prompt: &str,
        refine: bool,
    ) -> Result<Completion, Rejection> {
        let request = self.submit(prompt, refine)?;
        let outcome = generator.generate(&request.prompt, &request.history).await;
        Ok(self.complete(request.ticket, outcome))
    }

    /// Start over: empty log, empty store, counter back to zero.
    pub fn reset(&mut self) -> Result<(), Rejection> {
        if self.is_generating() {
            return Err(Rejection::Busy);
        }
        log::debug!("{} → idle (start over)", self.state.label());
        self.turn_log.clear();
        self.versions.clear();
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Used by restore: adopt a snapshot's log and display it.
    pub(crate) fn rebase_onto(&mut self, snapshot: &Snapshot) {
        self.turn_log = snapshot.turn_log().clone();
        self.state = SessionState::Displaying { snapshot: snapshot.id() };
    }

    // ── Read accessors ────────────────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_generating(&self) -> bool {
        matches!(self.state, SessionState::Generating { .. })
    }

    /// Snapshot considered current. Survives a round in flight and a failed
    /// round unchanged.
    pub fn active_snapshot_id(&self) -> Option<SnapshotId> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Displaying { snapshot } => Some(*snapshot),
            SessionState::Generating { previous, .. } | SessionState::Failed { previous, .. } => {
                *previous
            }
        }
    }

    pub fn active_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.active_snapshot_id().and_then(|id| self.versions.get(id))
    }

    /// Document on screen. Only `Displaying` shows one; a failed round does
    /// not fall back to the previous snapshot.
    pub fn current_document(&self) -> Option<Document> {
        match &self.state {
            SessionState::Displaying { snapshot } => {
                self.versions.get(*snapshot).map(|s| s.document().clone())
            }
            _ => None,
        }
    }

    pub fn turn_log(&self) -> &TurnLog {
        &self.turn_log
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn last_prompt(&self) -> Option<&str> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Generating { prompt, .. } | SessionState::Failed { prompt, .. } => {
                Some(prompt)
            }
            SessionState::Displaying { snapshot } => {
                self.versions.iter().find(|s| s.id() == *snapshot).map(|s| s.prompt())
            }
        }
    }

    pub fn last_error(&self) -> Option<&GenerationError> {
        match &self.state {
            SessionState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether a plain prompt should refine rather than start fresh.
    pub fn has_context(&self) -> bool {
        !self.turn_log.is_empty()
    }
}
