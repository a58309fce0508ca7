//! Event channel: the engine's only output sink, doubling as its logger.
//!
//! Informational, warning and error messages are not routed through a
//! separate logging facade — they are emitted on the same bounded queue as
//! `CHAT_MODIFIED`/`MSGS_CHANGED`/… so a host only ever has to drain one
//! channel to get both logs and UI-relevant notifications.

use async_channel::{Receiver, Sender, TrySendError};

use crate::chat::ChatId;
use crate::message::MsgId;

/// Capacity of the bounded event queue. Once full, the oldest event is
/// dropped to make room — a slow consumer loses history, not liveness.
const EVENT_QUEUE_LEN: usize = 2_000;

#[derive(Debug, Clone)]
pub enum Event {
    /// Informational log line.
    Info(String),
    /// Recoverable problem, worth surfacing but not actionable.
    Warning(String),
    /// A recoverable failure occurred; an operation did not complete.
    Error(String),

    /// New messages arrived, or message state changed, in `chat_id`.
    /// `msg_id` is `None` when the event is not about one specific message
    /// (e.g. a bulk fetch).
    MsgsChanged {
        chat_id: ChatId,
        msg_id: Option<MsgId>,
    },
    /// An outgoing message was confirmed delivered to the SMTP server.
    MsgDelivered { chat_id: ChatId, msg_id: MsgId },
    /// An outgoing message permanently failed.
    MsgFailed { chat_id: ChatId, msg_id: MsgId },
    /// An MDN (read receipt) was received for one of our outgoing messages.
    MsgRead { chat_id: ChatId, msg_id: MsgId },
    /// Chat metadata (name, membership, archive state, …) changed.
    ChatModified(ChatId),

    /// Progress of a `CONFIGURE_IMAP` job, 0..=1000.
    ConfigureProgress(u16),
    /// Progress of an import/export job, 0..=1000.
    ImexProgress(u16),
    /// A file was written during import/export (e.g. a backup archive).
    ImexFileWritten(std::path::PathBuf),

    /// The engine wants to know if the host believes the device is
    /// currently offline. The host is expected to answer out of band
    /// (see [`crate::context::Context::is_offline`]); this event is a
    /// notification only, no reply channel is carried on the enum itself.
    IsOffline,

    /// The engine wants `url` fetched over plain HTTP(S) (autoconfig
    /// probing). The host answers out of band (see
    /// [`crate::context::Context::http_get`]); like `IsOffline`, this is a
    /// notification, not a request/response pair on the enum itself.
    HttpGet(String),
}

#[derive(Debug)]
pub struct Events {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
}

impl Default for Events {
    fn default() -> Self {
        let (sender, receiver) = async_channel::bounded(EVENT_QUEUE_LEN);
        Self { sender, receiver }
    }
}

impl Events {
    /// Emits one event, dropping the oldest queued event if the channel is
    /// full rather than blocking the caller.
    pub fn emit(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let _ = self.receiver.try_recv();
                let _ = self.sender.try_send(event);
            }
            Err(TrySendError::Closed(_)) => {
                // No subscriber has ever been created; safe to ignore.
            }
        }
    }

    pub fn emitter(&self) -> EventEmitter {
        EventEmitter(self.receiver.clone())
    }
}

/// A cloneable handle a host can poll or await on for new events.
#[derive(Debug, Clone)]
pub struct EventEmitter(Receiver<Event>);

impl EventEmitter {
    pub async fn recv(&self) -> Option<Event> {
        self.0.recv().await.ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.0.try_recv().ok()
    }
}

#[macro_export]
macro_rules! info {
    ($ctx:expr, $($arg:tt)*) => {
        $ctx.emit_event($crate::events::Event::Info(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! warn {
    ($ctx:expr, $($arg:tt)*) => {
        $ctx.emit_event($crate::events::Event::Warning(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! error {
    ($ctx:expr, $($arg:tt)*) => {
        $ctx.emit_event($crate::events::Event::Error(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_drain_in_order() {
        let events = Events::default();
        events.emit(Event::Info("one".into()));
        events.emit(Event::Info("two".into()));
        let emitter = events.emitter();
        assert!(matches!(emitter.try_recv(), Some(Event::Info(s)) if s == "one"));
        assert!(matches!(emitter.try_recv(), Some(Event::Info(s)) if s == "two"));
        assert!(emitter.try_recv().is_none());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let events = Events::default();
        for i in 0..EVENT_QUEUE_LEN + 10 {
            events.emit(Event::Info(i.to_string()));
        }
        let emitter = events.emitter();
        // The first 10 events should have been evicted.
        let Some(Event::Info(first)) = emitter.try_recv() else {
            panic!("expected an event")
        };
        assert_eq!(first, "10");
    }
}
