use std::time::{Duration, Instant};

use crate::matrix::RoomEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    Running,
    Restarting,
    Stopped,
}

/// Mutable state of the one room/emulator pairing this process serves.
#[derive(Debug)]
pub struct Session {
    pub room_id: String,
    pub room_alias: String,
    pub user_id: String,
    pub debug: bool,
    /// Last successful screenshot publish. `None` forces the next one.
    pub last_screenshot: Option<Instant>,
    pub last_autosave: Instant,
    pub state: State,
}

impl Session {
    pub fn new(
        room_id: String,
        room_alias: String,
        user_id: String,
        debug: bool,
        now: Instant,
    ) -> Session {
        Session {
            room_id,
            room_alias,
            user_id,
            debug,
            last_screenshot: None,
            last_autosave: now,
            state: State::Starting,
        }
    }

    /// The text body of `event` if it is a text message in this room.
    pub fn command_text<'a>(&self, event: &'a RoomEvent) -> Option<&'a str> {
        if event.room_id != self.room_id || event.kind != "m.room.message" {
            return None;
        }
        if event.msgtype.as_deref() != Some("m.text") {
            return None;
        }
        event.body.as_deref()
    }

    /// Whether the bot account itself sent `event`.
    pub fn is_own(&self, event: &RoomEvent) -> bool {
        event.sender == self.user_id
    }

    pub fn since_autosave(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_autosave)
    }
}
