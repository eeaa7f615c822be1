use crate::input::Key;

/// Directives recognized in room messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Command {
    A,
    B,
    L,
    R,
    Up,
    Down,
    Left,
    Right,
    Start,
    Select,
    // Debug only
    Dump,
    Save,
    Load,
}

impl Command {
    /// Maps a message body to a command. Matching ignores case but nothing
    /// else, so `" up"` is not a command.
    pub fn parse(body: &str) -> Option<Command> {
        let command = match body.to_lowercase().as_str() {
            "a" => Command::A,
            "b" => Command::B,
            "l" => Command::L,
            "r" => Command::R,
            "up" => Command::Up,
            "down" => Command::Down,
            "left" => Command::Left,
            "right" => Command::Right,
            "start" => Command::Start,
            "select" => Command::Select,
            "dump" => Command::Dump,
            "save" => Command::Save,
            "load" => Command::Load,
            _ => return None,
        };
        Some(command)
    }

    pub fn is_debug(self) -> bool {
        matches!(self, Command::Dump | Command::Save | Command::Load)
    }

    /// The physical key a button command presses. `None` for debug commands.
    pub fn key(self) -> Option<Key> {
        let key = match self {
            Command::A => Key::X,
            Command::B => Key::Z,
            Command::L => Key::A,
            Command::R => Key::S,
            Command::Up => Key::Up,
            Command::Down => Key::Down,
            Command::Left => Key::Left,
            Command::Right => Key::Right,
            Command::Start => Key::Enter,
            Command::Select => Key::Backspace,
            Command::Dump | Command::Save | Command::Load => return None,
        };
        Some(key)
    }
}
