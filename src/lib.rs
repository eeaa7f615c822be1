pub use command::Command;
pub use config::Config;
pub use context::{Context, Host};
pub use controller::{Controller, RoomResult};
pub use input::Key;
pub use session::{Session, State};

mod command;
mod config;
pub mod context;
pub mod controller;
pub mod display;
pub mod emulator;
pub mod error;
pub mod input;
pub mod matrix;
pub mod publisher;
mod session;
#[cfg(test)]
mod testing;
