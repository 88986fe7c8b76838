use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::extract::ws::Message;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dao::models::{ANONYMOUS_PLAYER, PlayerId};

/// Literal name of the lobby channel.
pub const GLOBAL_CHANNEL: &str = "global";

/// Channel a session subscribes to, also used as the target of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Lobby listeners. As a target, reaches every session.
    Global,
    /// Sessions attached to one room.
    Room(String),
}

impl Channel {
    /// Build a channel from a path segment, mapping the literal `global` to the lobby.
    pub fn from_path(segment: &str) -> Self {
        if segment == GLOBAL_CHANNEL {
            Channel::Global
        } else {
            Channel::Room(segment.to_string())
        }
    }

    /// Whether a broadcast aimed at `self` is delivered to a session subscribed to `subscribed`.
    pub fn reaches(&self, subscribed: &Channel) -> bool {
        match self {
            Channel::Global => true,
            Channel::Room(_) => self == subscribed,
        }
    }

    pub fn room_code(&self) -> Option<&str> {
        match self {
            Channel::Global => None,
            Channel::Room(code) => Some(code),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Global => f.write_str(GLOBAL_CHANNEL),
            Channel::Room(code) => f.write_str(code),
        }
    }
}

/// Why a session left the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// Inbound loop ended: close frame, read error or read deadline.
    ReadFailed,
    /// Outbound loop could not write within the deadline.
    WriteFailed,
    /// Outbound queue was full during fan-out.
    SlowConsumer,
    /// Outbound queue receiver was gone during fan-out.
    QueueClosed,
    /// Process shutdown.
    Shutdown,
}

impl DisconnectCause {
    /// Shutdown teardown leaves persisted presence untouched; the next boot repairs it.
    pub fn persists_presence(&self) -> bool {
        !matches!(self, DisconnectCause::Shutdown)
    }
}

/// Hub-side handle of one live connection.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    channel: Channel,
    player_id: PlayerId,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
    torn_down: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Create a handle and the receiving end of its bounded outbound queue.
    pub fn new(
        channel: Channel,
        player_id: PlayerId,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            channel,
            player_id,
            outbound,
            cancel,
            torn_down: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn is_anonymous(&self) -> bool {
        self.player_id == ANONYMOUS_PLAYER
    }

    /// Token cancelled when the session is torn down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Enqueue without waiting.
    pub fn try_send(&self, message: Message) -> Result<(), TrySendError<Message>> {
        self.outbound.try_send(message)
    }

    /// Claim the teardown of this session. Only the first caller gets `true`.
    pub fn claim_teardown(&self) -> bool {
        self.torn_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Claim the teardown and stop both session loops. Returns whether this call did it.
    pub fn tear_down(&self) -> bool {
        let claimed = self.claim_teardown();
        if claimed {
            self.cancel.cancel();
        }
        claimed
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("player_id", &self.player_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_target_reaches_everyone_room_target_only_its_room() {
        let room = Channel::Room("ABC123".into());
        let other = Channel::Room("ZZZ999".into());
        assert!(Channel::Global.reaches(&room));
        assert!(Channel::Global.reaches(&Channel::Global));
        assert!(room.reaches(&room));
        assert!(!room.reaches(&other));
        assert!(!room.reaches(&Channel::Global));
    }

    #[test]
    fn teardown_is_claimed_once() {
        let (session, _rx) = SessionHandle::new(
            Channel::from_path("ABC123"),
            7,
            4,
            CancellationToken::new(),
        );
        let clone = session.clone();
        assert!(session.tear_down());
        assert!(!clone.tear_down());
        assert!(!session.claim_teardown());
        assert!(clone.cancel_token().is_cancelled());
    }

    #[test]
    fn global_path_segment() {
        assert_eq!(Channel::from_path("global"), Channel::Global);
        assert_eq!(
            Channel::from_path("ABC123").room_code(),
            Some("ABC123")
        );
    }
}
