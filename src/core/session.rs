//! Cooperative event loop for one document view.
//!
//! The session owns the document and its reconciler and processes
//! commands one batch at a time. Commands already queued when a batch is
//! drained are coalesced: reloads collapse into one pass and only the
//! last reveal target and view mode are kept. A pass always runs to
//! completion before the next batch is read.

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use crate::adapters::SpanStore;
use crate::config::RevealSettings;
use crate::document::{Document, NodeId, RenderReport};
use crate::domain::{Span, SpanId, ViewMode};

use super::reconciler::{PassReport, Reconciler};
use super::reveal::RevealTask;

/// Inbound requests from the authoring UI and the store
#[derive(Debug, Clone)]
pub enum ViewCommand {
    /// Reload spans from the store and run a full pass
    Reload,
    /// Merge freshly created spans (no healing)
    SpansUpdated(Vec<Span>),
    /// Scroll a span into view, retrying until it is rendered
    Reveal(SpanId),
    SetMode(ViewMode),
    Hover { span_id: SpanId, active: bool },
    /// A node inside a marker was clicked
    Activate(NodeId),
    Shutdown,
}

/// Outbound notifications
#[derive(Debug, Clone)]
pub enum ViewEvent {
    PassCompleted(PassReport),
    Rendered(RenderReport),
    SpanActivated(SpanId),
    SpanRevealed { span_id: SpanId, node: NodeId },
}

/// Interaction commands keep their order within a batch
#[derive(Debug)]
enum Interaction {
    Hover { span_id: SpanId, active: bool },
    Activate(NodeId),
}

/// One drained batch of commands, coalesced
#[derive(Debug, Default)]
struct Batch {
    reload: bool,
    new_spans: Vec<Span>,
    mode: Option<ViewMode>,
    reveal: Option<SpanId>,
    interactions: Vec<Interaction>,
    shutdown: bool,
}

impl Batch {
    fn push(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::Reload => self.reload = true,
            ViewCommand::SpansUpdated(spans) => self.new_spans.extend(spans),
            ViewCommand::Reveal(id) => self.reveal = Some(id),
            ViewCommand::SetMode(mode) => self.mode = Some(mode),
            ViewCommand::Hover { span_id, active } => {
                self.interactions.push(Interaction::Hover { span_id, active })
            }
            ViewCommand::Activate(node) => self.interactions.push(Interaction::Activate(node)),
            ViewCommand::Shutdown => self.shutdown = true,
        }
    }
}

/// Handles for talking to a running session
pub struct SessionChannels {
    pub commands: mpsc::Sender<ViewCommand>,
    pub events: mpsc::UnboundedReceiver<ViewEvent>,
}

pub struct ViewSession<S: SpanStore> {
    reconciler: Reconciler<S>,
    document: Document,
    reveal: RevealTask,
    commands: mpsc::Receiver<ViewCommand>,
    events: mpsc::UnboundedSender<ViewEvent>,
}

impl<S: SpanStore> ViewSession<S> {
    pub fn new(
        reconciler: Reconciler<S>,
        document: Document,
        reveal: RevealSettings,
    ) -> (Self, SessionChannels) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = Self {
            reconciler,
            document,
            reveal: RevealTask::new(reveal),
            commands: command_rx,
            events: event_tx,
        };
        let channels = SessionChannels {
            commands: command_tx,
            events: event_rx,
        };
        (session, channels)
    }

    /// Process commands until `Shutdown` or until every sender is dropped
    ///
    /// Returns the document in its final (rendered) state.
    #[instrument(skip(self), fields(key = %self.reconciler.key()))]
    pub async fn run(mut self) -> Document {
        info!("View session started");

        loop {
            let deadline = self.reveal.deadline();
            let first = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.reveal.take_due();
                    self.try_reveal();
                    continue;
                }
            };

            let mut batch = Batch::default();
            batch.push(first);
            while let Ok(command) = self.commands.try_recv() {
                batch.push(command);
            }

            if self.execute(batch).await {
                break;
            }
        }

        info!("View session stopped");
        self.document
    }

    /// Returns true when the session should stop
    async fn execute(&mut self, batch: Batch) -> bool {
        if self.reconciler.is_hibernating() {
            debug!("Hibernating, ignoring commands");
            return batch.shutdown;
        }

        let mut needs_render = false;

        if batch.reload {
            match self.reconciler.load().await {
                Ok(_) => {
                    let report = self.reconciler.reconcile(&self.document).await;
                    self.emit(ViewEvent::PassCompleted(report));
                    needs_render = true;
                }
                Err(e) => warn!(error = %e, "Failed to load spans"),
            }
        }

        if !batch.new_spans.is_empty() {
            self.reconciler.apply_new_spans(batch.new_spans);
            needs_render = true;
        }

        if let Some(mode) = batch.mode {
            let report = self.reconciler.set_mode(mode, &mut self.document);
            self.emit(ViewEvent::Rendered(report));
        } else if needs_render {
            let report = self.reconciler.render(&mut self.document);
            self.emit(ViewEvent::Rendered(report));
        }
        let rendered = needs_render || batch.mode.is_some();

        for interaction in batch.interactions {
            match interaction {
                Interaction::Hover { span_id, active } => {
                    self.reconciler.hover(&mut self.document, &span_id, active);
                }
                Interaction::Activate(node) => {
                    if let Some(span_id) = self.reconciler.activate(&self.document, node) {
                        self.emit(ViewEvent::SpanActivated(span_id));
                    }
                }
            }
        }

        if let Some(target) = batch.reveal {
            self.reveal.request(target);
            self.try_reveal();
        } else if rendered && self.reveal.target().is_some() {
            self.reveal.take_due();
            self.try_reveal();
        }

        batch.shutdown
    }

    fn try_reveal(&mut self) {
        let Some(target) = self.reveal.target().cloned() else {
            return;
        };

        match self.reconciler.reveal(&self.document, &target) {
            Some(node) => {
                self.reveal.hit();
                self.emit(ViewEvent::SpanRevealed {
                    span_id: target,
                    node,
                });
            }
            None => {
                if !self.reveal.miss(Instant::now()) {
                    debug!(span_id = %target, "Reveal target never rendered, giving up");
                }
            }
        }
    }

    fn emit(&self, event: ViewEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}
