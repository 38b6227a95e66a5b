//! Host-side wiring around the aggregator core.
//!
//! The runtime owns the router and the per-session state, consumes inbound
//! envelopes from the transport over an async channel, and issues outward
//! commands (history fetch, cancellation, takeover responses, outgoing
//! messages) over a plain channel for the IPC layer to drain. All state
//! mutation happens on `process`, on the host event loop; there is no
//! parallel mutation and no locking, only ordering and idempotence.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, info};

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::events::{EventEnvelope, Topic};
use crate::exploration::{ExplorationSession, TakeoverResolution};
use crate::router::{EventRouter, SubscriptionId};
use crate::timeline::{StoredRow, TimelineBuilder};
use crate::window::TimelineWindow;

/// Commands issued outward to external collaborators. Fire-and-forget from
/// the core's point of view; results come back as events or as a
/// `history_loaded` call.
#[derive(Debug)]
pub enum Command {
    FetchHistory { conversation_id: String },
    SendMessage { conversation_id: String, content: String },
    CancelExecution { execution_id: String },
    SubmitTakeover { execution_id: String, values: HashMap<String, String> },
    SkipTakeover { execution_id: String },
    CompleteTakeover { execution_id: String },
}

/// Cloneable sender half for issuing commands from anywhere in the host.
#[derive(Clone)]
pub struct CoreHandle {
    command_tx: Sender<Command>,
}

impl CoreHandle {
    pub(crate) fn new(command_tx: Sender<Command>) -> Self {
        Self { command_tx }
    }

    pub fn send(&self, command: Command) -> Result<(), CoreError> {
        self.command_tx
            .send(command)
            .map_err(|_| CoreError::CommandChannelClosed)
    }
}

/// Per-conversation view state: the timeline under construction plus the
/// render window over it.
pub struct ChatSession {
    conversation_id: String,
    builder: Rc<RefCell<TimelineBuilder>>,
    window: TimelineWindow,
    subscription: SubscriptionId,
}

impl ChatSession {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn builder(&self) -> Ref<'_, TimelineBuilder> {
        self.builder.borrow()
    }

    pub fn window(&self) -> &TimelineWindow {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut TimelineWindow {
        &mut self.window
    }
}

struct ExplorationHandle {
    execution_id: String,
    session: Rc<RefCell<ExplorationSession>>,
    subscriptions: Vec<SubscriptionId>,
}

/// Owns the router and the currently open sessions. Exactly one
/// conversation and one exploration execution can be active; switching
/// discards the old state wholesale instead of mutating it.
pub struct SessionRuntime {
    config: CoreConfig,
    router: EventRouter,
    handle: CoreHandle,
    command_rx: Option<Receiver<Command>>,
    event_tx: tokio::sync::mpsc::Sender<EventEnvelope>,
    event_rx: tokio::sync::mpsc::Receiver<EventEnvelope>,
    chat: Option<ChatSession>,
    exploration: Option<ExplorationHandle>,
    /// Explicit change notification: handlers set it, `process` drains it.
    dirty: Rc<Cell<bool>>,
}

impl SessionRuntime {
    pub fn new(config: CoreConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = tokio::sync::mpsc::channel(256);
        Self {
            config,
            router: EventRouter::new(),
            handle: CoreHandle::new(command_tx),
            command_rx: Some(command_rx),
            event_tx,
            event_rx,
            chat: None,
            exploration: None,
            dirty: Rc::new(Cell::new(false)),
        }
    }

    pub fn handle(&self) -> CoreHandle {
        self.handle.clone()
    }

    /// The IPC layer drains this to execute commands.
    pub fn take_command_rx(&mut self) -> Option<Receiver<Command>> {
        self.command_rx.take()
    }

    /// The transport pushes inbound envelopes through this sender.
    pub fn event_sender(&self) -> tokio::sync::mpsc::Sender<EventEnvelope> {
        self.event_tx.clone()
    }

    pub fn chat(&self) -> Option<&ChatSession> {
        self.chat.as_ref()
    }

    pub fn chat_mut(&mut self) -> Option<&mut ChatSession> {
        self.chat.as_mut()
    }

    pub fn exploration(&self) -> Option<Ref<'_, ExplorationSession>> {
        self.exploration.as_ref().map(|h| h.session.borrow())
    }

    /// Open a conversation. The live handler is registered before the
    /// history fetch is issued, so events racing the fetch are buffered by
    /// the builder and replayed once the rows arrive - the authoritative
    /// fetch always runs before incremental events are trusted.
    pub fn open_conversation(&mut self, conversation_id: impl Into<String>) -> Result<(), CoreError> {
        let conversation_id = conversation_id.into();
        self.close_conversation();

        let builder = Rc::new(RefCell::new(TimelineBuilder::new()));
        let handler_builder = builder.clone();
        let handler_dirty = self.dirty.clone();
        let subscription =
            self.router
                .subscribe(Topic::Chat, conversation_id.clone(), move |envelope| {
                    if let Some(event) = envelope.chat_event() {
                        handler_builder.borrow_mut().apply_live(event);
                        handler_dirty.set(true);
                    }
                    Ok(())
                });

        info!("opened conversation {}", conversation_id);
        self.handle.send(Command::FetchHistory {
            conversation_id: conversation_id.clone(),
        })?;

        self.chat = Some(ChatSession {
            conversation_id,
            builder,
            window: TimelineWindow::new(&self.config),
            subscription,
        });
        Ok(())
    }

    /// Tear down the active conversation. Unsubscribing here is what stops
    /// a stale handler from mutating a discarded timeline.
    pub fn close_conversation(&mut self) {
        if let Some(chat) = self.chat.take() {
            self.router.unsubscribe(chat.subscription);
            debug!("closed conversation {}", chat.conversation_id);
        }
    }

    /// Deliver the resolved history fetch. A result for a conversation that
    /// is no longer active is a teardown race and is discarded.
    pub fn history_loaded(
        &mut self,
        conversation_id: &str,
        rows: &[StoredRow],
    ) -> Result<(), CoreError> {
        let Some(chat) = self.chat.as_mut() else {
            debug!("history for {} arrived after close, discarded", conversation_id);
            return Ok(());
        };
        if chat.conversation_id != conversation_id {
            debug!(
                "stale history for {} (active: {}), discarded",
                conversation_id, chat.conversation_id
            );
            return Ok(());
        }

        chat.builder.borrow_mut().load_history(rows)?;
        let len = chat.builder.borrow().timeline().len();
        chat.window.on_timeline_grow(len);
        Ok(())
    }

    /// Open an exploration execution, subscribing both its event streams.
    pub fn open_exploration(&mut self, execution_id: impl Into<String>) {
        let execution_id = execution_id.into();
        self.close_exploration();

        let session = Rc::new(RefCell::new(ExplorationSession::new(execution_id.clone())));

        let s = session.clone();
        let d = self.dirty.clone();
        let exploration_sub =
            self.router
                .subscribe(Topic::Exploration, execution_id.clone(), move |envelope| {
                    if let Some(event) = envelope.exploration_event() {
                        s.borrow_mut().apply(event, Utc::now());
                        d.set(true);
                    }
                    Ok(())
                });

        let s = session.clone();
        let d = self.dirty.clone();
        let multi_agent_sub =
            self.router
                .subscribe(Topic::MultiAgent, execution_id.clone(), move |envelope| {
                    if let Some(event) = envelope.multi_agent_event() {
                        s.borrow_mut().apply_multi_agent(event);
                        d.set(true);
                    }
                    Ok(())
                });

        info!("tracking exploration {}", execution_id);
        self.exploration = Some(ExplorationHandle {
            execution_id,
            session,
            subscriptions: vec![exploration_sub, multi_agent_sub],
        });
    }

    pub fn close_exploration(&mut self) {
        if let Some(handle) = self.exploration.take() {
            for sub in handle.subscriptions {
                self.router.unsubscribe(sub);
            }
            debug!("stopped tracking exploration {}", handle.execution_id);
        }
    }

    /// Await the next inbound envelope.
    pub async fn next_event(&mut self) -> Option<EventEnvelope> {
        self.event_rx.recv().await
    }

    /// Non-blocking variant for hosts that poll inside a render loop.
    pub fn poll_event(&mut self) -> Option<EventEnvelope> {
        self.event_rx.recv().now_or_never().flatten()
    }

    /// Route one envelope into the active sessions. Returns true when this
    /// envelope changed any state, which is the host's cue to re-render.
    pub fn process(&mut self, envelope: &EventEnvelope) -> bool {
        // The flag only measures this dispatch; direct mutations between
        // calls (history loads, takeover resolutions) report synchronously
        // and must not leak into the next envelope's verdict.
        self.dirty.set(false);
        self.router.dispatch(envelope);
        if !self.dirty.replace(false) {
            return false;
        }
        if let Some(chat) = self.chat.as_mut() {
            let len = chat.builder.borrow().timeline().len();
            chat.window.on_timeline_grow(len);
        }
        true
    }

    /// Submit takeover credentials for the active exploration.
    pub fn submit_takeover(&mut self, values: HashMap<String, String>) -> Result<(), CoreError> {
        self.finish_takeover(TakeoverResolution::Submitted, |execution_id| {
            Command::SubmitTakeover { execution_id, values }
        })
    }

    pub fn skip_takeover(&mut self) -> Result<(), CoreError> {
        self.finish_takeover(TakeoverResolution::Skipped, |execution_id| {
            Command::SkipTakeover { execution_id }
        })
    }

    /// The user logged in by hand; tell the engine to resume.
    pub fn complete_takeover(&mut self) -> Result<(), CoreError> {
        self.finish_takeover(TakeoverResolution::ManualComplete, |execution_id| {
            Command::CompleteTakeover { execution_id }
        })
    }

    fn finish_takeover(
        &mut self,
        resolution: TakeoverResolution,
        command: impl FnOnce(String) -> Command,
    ) -> Result<(), CoreError> {
        let Some(handle) = self.exploration.as_ref() else {
            return Ok(());
        };
        if handle.session.borrow_mut().resolve_takeover(resolution) {
            self.handle.send(command(handle.execution_id.clone()))?;
        }
        Ok(())
    }

    pub fn cancel_exploration(&self) -> Result<(), CoreError> {
        if let Some(handle) = self.exploration.as_ref() {
            self.handle.send(Command::CancelExecution {
                execution_id: handle.execution_id.clone(),
            })?;
        }
        Ok(())
    }

    pub fn send_user_message(&self, content: impl Into<String>) -> Result<(), CoreError> {
        if let Some(chat) = self.chat.as_ref() {
            self.handle.send(Command::SendMessage {
                conversation_id: chat.conversation_id.clone(),
                content: content.into(),
            })?;
        }
        Ok(())
    }
}
