//! Connection hub: owns the live session set and fans events out to it.
//!
//! Registration, removal and fan-out all run on one task, so the registry is never mutated
//! concurrently. Callers talk to it through [`Hub`], whose `broadcast` never waits.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::extract::ws::{Message, Utf8Bytes};
use time::OffsetDateTime;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{HubConfig, OverflowPolicy},
    dao::festival_store::FestivalStore,
    dto::ws::ServerMessage,
    services::room_events,
    state::session::{Channel, DisconnectCause, SessionHandle},
};

/// The hub task has stopped; no session can be registered any more.
#[derive(Debug, thiserror::Error)]
#[error("connection hub is not running")]
pub struct HubClosed;

enum Control {
    Register {
        session: SessionHandle,
        ack: oneshot::Sender<usize>,
    },
    Unregister {
        id: Uuid,
        cause: DisconnectCause,
    },
    Count(oneshot::Sender<usize>),
}

enum Fanout {
    Event { target: Channel, payload: Utf8Bytes },
    /// Answered once every event queued before it has been fanned out.
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the hub task.
#[derive(Clone)]
pub struct Hub {
    control: mpsc::UnboundedSender<Control>,
    events: mpsc::Sender<Fanout>,
    config: Arc<HubConfig>,
}

impl Hub {
    /// Spawn the hub task. It stops when `shutdown` is cancelled, closing every live session.
    pub fn spawn(
        config: HubConfig,
        store: Arc<dyn FestivalStore>,
        operation_timeout: Duration,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(config.broadcast_buffer.max(1));
        let hub = Self {
            control: control_tx,
            events: events_tx,
            config: Arc::new(config),
        };
        let registry = Registry {
            sessions: HashMap::new(),
            hub: hub.clone(),
            store,
            operation_timeout,
        };
        let handle = tokio::spawn(registry.run(control_rx, events_rx, shutdown));
        (hub, handle)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add a session. Resolves with the number of live sessions once it is registered.
    pub async fn register(&self, session: SessionHandle) -> Result<usize, HubClosed> {
        let (ack, rx) = oneshot::channel();
        self.control
            .send(Control::Register { session, ack })
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }

    /// Remove a session. Safe to call from several paths; side effects run once.
    pub fn unregister(&self, id: Uuid, cause: DisconnectCause) {
        if self.control.send(Control::Unregister { id, cause }).is_err() {
            debug!(session = %id, "hub already stopped; unregister ignored");
        }
    }

    /// Queue an event for every session `target` reaches. Never waits: when the hub buffer is
    /// full the event is dropped with a warning.
    pub fn broadcast(&self, target: Channel, message: &ServerMessage) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(kind = message.kind(), error = %err, "failed to encode event");
                return;
            }
        };
        match self.events.try_send(Fanout::Event { target, payload }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(kind = message.kind(), "hub buffer full; event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(kind = message.kind(), "hub stopped; event dropped");
            }
        }
    }

    /// Wait until every event broadcast before this call has been handed to the sessions.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.events.send(Fanout::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Count(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct Registry {
    sessions: HashMap<Uuid, SessionHandle>,
    hub: Hub,
    store: Arc<dyn FestivalStore>,
    operation_timeout: Duration,
}

impl Registry {
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut events: mpsc::Receiver<Fanout>,
        shutdown: CancellationToken,
    ) {
        info!("connection hub started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(command) = control.recv() => self.handle_control(command),
                Some(item) = events.recv() => self.handle_fanout(item),
                else => break,
            }
        }
        let live = self.sessions.len();
        for (_, session) in self.sessions.drain() {
            session.tear_down();
        }
        info!(closed = live, "connection hub stopped");
    }

    fn handle_control(&mut self, command: Control) {
        match command {
            Control::Register { session, ack } => {
                let id = session.id();
                let channel = session.channel().clone();
                let player_id = session.player_id();
                self.sessions.insert(id, session);
                let live = self.sessions.len();
                info!(session = %id, channel = %channel, player_id, live, "session registered");
                let _ = ack.send(live);
            }
            Control::Unregister { id, cause } => self.remove(id, cause),
            Control::Count(reply) => {
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    fn handle_fanout(&mut self, item: Fanout) {
        match item {
            Fanout::Event { target, payload } => self.fan_out(&target, payload),
            Fanout::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn fan_out(&mut self, target: &Channel, payload: Utf8Bytes) {
        let overflow = self.hub.config.overflow;
        let mut evicted = Vec::new();
        for session in self.sessions.values() {
            if !target.reaches(session.channel()) {
                continue;
            }
            match session.try_send(Message::Text(payload.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => match overflow {
                    OverflowPolicy::Evict => {
                        evicted.push((session.id(), DisconnectCause::SlowConsumer))
                    }
                    OverflowPolicy::Drop => {
                        debug!(session = %session.id(), "outbound queue full; payload dropped")
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    evicted.push((session.id(), DisconnectCause::QueueClosed))
                }
            }
        }
        for (id, cause) in evicted {
            if cause == DisconnectCause::SlowConsumer {
                warn!(session = %id, "outbound queue full; evicting session");
            }
            self.remove(id, cause);
        }
    }

    fn remove(&mut self, id: Uuid, cause: DisconnectCause) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        if !session.tear_down() {
            return;
        }
        info!(
            session = %id,
            channel = %session.channel(),
            player_id = session.player_id(),
            cause = ?cause,
            live = self.sessions.len(),
            "session unregistered"
        );

        if session.is_anonymous() || !cause.persists_presence() {
            return;
        }
        let Some(code) = session.channel().room_code() else {
            return;
        };
        let superseded = self.sessions.values().any(|other| {
            other.player_id() == session.player_id() && other.channel() == session.channel()
        });
        if superseded {
            debug!(session = %id, player_id = session.player_id(), "player has another live session");
            return;
        }

        // A session attaching for this player after this instant refreshes its liveness past
        // it, which keeps the offline write below from landing.
        tokio::spawn(room_events::announce_disconnect(
            self.store.clone(),
            self.hub.clone(),
            code.to_string(),
            session.player_id(),
            OffsetDateTime::now_utc(),
            self.operation_timeout,
        ));
    }
}
