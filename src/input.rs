use std::process::{Command, Stdio};
use std::time::Duration;

use log::{debug, warn};

use crate::context;

pub trait Context: context::Keyboard + context::Clock {}
impl<T: context::Keyboard + context::Clock> Context for T {}

/// Long enough for mgba to see the key on its next input poll.
pub const DWELL: Duration = Duration::from_millis(50);

const STATE_SLOT: Key = Key::F1;
const STATE_MODIFIER: Key = Key::Shift;

/// Physical keys on the virtual keyboard the emulator listens to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Key {
    X,
    Z,
    A,
    S,
    Up,
    Down,
    Left,
    Right,
    Enter,
    Backspace,
    F1,
    Shift,
}

impl Key {
    /// X keysym name.
    pub fn keysym(self) -> &'static str {
        match self {
            Key::X => "x",
            Key::Z => "z",
            Key::A => "a",
            Key::S => "s",
            Key::Up => "Up",
            Key::Down => "Down",
            Key::Left => "Left",
            Key::Right => "Right",
            Key::Enter => "Return",
            Key::Backspace => "BackSpace",
            Key::F1 => "F1",
            Key::Shift => "Shift_L",
        }
    }
}

/// Key-down, hold for [`DWELL`], key-up.
pub fn press(ctx: &mut impl Context, key: Key) {
    ctx.key_down(key);
    ctx.sleep(DWELL);
    ctx.key_up(key);
}

/// Holds `modifier` down while `f` runs. The modifier is released on every
/// exit path, unwinding included.
pub fn hold<C: Context, R>(ctx: &mut C, modifier: Key, f: impl FnOnce(&mut C) -> R) -> R {
    let held = Held::new(ctx, modifier);
    f(&mut *held.ctx)
}

struct Held<'a, C: Context> {
    ctx: &'a mut C,
    key: Key,
}

impl<'a, C: Context> Held<'a, C> {
    fn new(ctx: &'a mut C, key: Key) -> Held<'a, C> {
        ctx.key_down(key);
        Held { ctx, key }
    }
}

impl<C: Context> Drop for Held<'_, C> {
    fn drop(&mut self) {
        self.ctx.key_up(self.key);
    }
}

pub fn save_state(ctx: &mut impl Context) {
    debug!("Saving state");
    hold(ctx, STATE_MODIFIER, |ctx| press(ctx, STATE_SLOT));
}

pub fn load_state(ctx: &mut impl Context) {
    debug!("Loading state");
    press(ctx, STATE_SLOT);
}

/// Synthesizes key events on an X display with `xdotool`.
pub struct Xdotool {
    display: String,
}

impl Xdotool {
    pub fn new(display: impl Into<String>) -> Xdotool {
        Xdotool {
            display: display.into(),
        }
    }

    pub fn key_down(&mut self, key: Key) {
        self.run("keydown", key);
    }

    pub fn key_up(&mut self, key: Key) {
        self.run("keyup", key);
    }

    fn run(&self, action: &str, key: Key) {
        let status = Command::new("xdotool")
            .arg(action)
            .arg(key.keysym())
            .env("DISPLAY", &self.display)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("xdotool {} {:?} exited with {}", action, key, status),
            Err(e) => warn!("xdotool {} {:?} failed: {}", action, key, e),
        }
    }
}
