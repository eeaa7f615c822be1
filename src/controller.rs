use std::path::PathBuf;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::command::Command;
use crate::config::Config;
use crate::context::{self, Context};
use crate::emulator::EmulatorConfig;
use crate::error::{StartupError, TransportError};
use crate::input;
use crate::matrix::{Handler, RoomEvent};
use crate::publisher;
use crate::session::{Session, State};

/// Time mgba needs to boot before it reacts to keys.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(100);

const RESTART_NOTICE: &str = "Failed to restart the emulator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomResult {
    Created(String),
    AlreadyExists(String),
}

impl RoomResult {
    pub fn room_id(&self) -> &str {
        match self {
            RoomResult::Created(id) | RoomResult::AlreadyExists(id) => id,
        }
    }
}

/// Creates the public room for `alias`, or finds it if the alias is taken.
pub fn acquire_room(
    ctx: &mut impl context::Transport,
    local_alias: &str,
    alias: &str,
) -> Result<RoomResult, TransportError> {
    match ctx.create_room(local_alias, true) {
        Ok(room_id) => Ok(RoomResult::Created(room_id)),
        Err(TransportError::AliasTaken) => {
            info!("{} already exists, reusing it", alias);
            ctx.get_room_id(alias).map(RoomResult::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

/// Drives one session from startup to shutdown.
pub struct Controller<C: Context> {
    session: Session,
    emulator: EmulatorConfig,
    dump_dir: Option<PathBuf>,
    ctx: C,
}

impl<C: Context> Controller<C> {
    /// Acquires the room, boots the emulator and posts the first screenshot.
    pub fn start(config: &Config, mut ctx: C) -> Result<Controller<C>, StartupError> {
        let alias = config.room_alias();
        let room = acquire_room(&mut ctx, &config.local_room_alias, &alias)
            .map_err(StartupError::Room)?;
        info!("Using room {} ({:?})", alias, room);

        let now = ctx.now();
        let mut controller = Controller {
            session: Session::new(
                room.room_id().to_string(),
                alias,
                config.user_id(),
                config.debug,
                now,
            ),
            emulator: EmulatorConfig::from_config(config),
            dump_dir: config.data_dir().ok().map(|dir| dir.join("dumps")),
            ctx,
        };
        controller.boot()?;
        controller.session.state = State::Running;
        Ok(controller)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> State {
        self.session.state
    }

    pub fn ctx(&self) -> &C {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    fn boot(&mut self) -> Result<(), StartupError> {
        self.ctx.display_start()?;
        self.ctx.emulator_start(&self.emulator)?;
        self.ctx.sleep(SETTLE_DELAY);
        input::load_state(&mut self.ctx);
        publisher::publish_now(&mut self.session, &mut self.ctx);
        self.session.last_autosave = self.ctx.now();
        Ok(())
    }

    /// Handles a batch of events in order. Always asks for more.
    pub fn handle_transaction(&mut self, events: &[RoomEvent]) -> bool {
        for event in events {
            self.handle_event(event);
        }
        true
    }

    fn handle_event(&mut self, event: &RoomEvent) {
        if self.session.is_own(event) {
            return;
        }
        if let Some(command) = self.session.command_text(event).and_then(Command::parse) {
            self.dispatch(command);
        }
        publisher::publish(&mut self.session, &mut self.ctx);
        self.autosave();
    }

    fn dispatch(&mut self, command: Command) {
        if command.is_debug() && !self.session.debug {
            debug!("Ignoring {:?} outside debug mode", command);
            return;
        }
        debug!("Command {:?}", command);
        match command {
            Command::Dump => self.restart(),
            Command::Save => input::save_state(&mut self.ctx),
            Command::Load => input::load_state(&mut self.ctx),
            button => {
                if let Some(key) = button.key() {
                    input::press(&mut self.ctx, key);
                }
            }
        }
    }

    fn autosave(&mut self) {
        let now = self.ctx.now();
        if self.session.since_autosave(now) < AUTOSAVE_INTERVAL {
            return;
        }
        info!("Autosaving");
        input::save_state(&mut self.ctx);
        self.session.last_autosave = now;
    }

    fn restart(&mut self) {
        self.session.state = State::Restarting;
        if !self.ctx.emulator_running() {
            warn!("Emulator had already exited before the restart");
        }
        if !self.ctx.display_running() {
            warn!("Virtual display is gone, it will be started again");
        }
        match self.ctx.emulator_dump() {
            Ok(dump) => {
                info!("Emulator stdout:\n{}", dump.stdout);
                info!("Emulator stderr:\n{}", dump.stderr);
                if let Some(dir) = &self.dump_dir {
                    match dump.save(dir, self.ctx.unix_time()) {
                        Ok(path) => info!("Saved dump to {:?}", path),
                        Err(e) => warn!("{:#}", e),
                    }
                }
            }
            Err(e) => warn!("Failed to dump emulator: {:#}", e),
        }

        if let Err(e) = self.boot() {
            error!("Failed to restart emulator: {}", e);
            if let Err(e) = self.ctx.send_notice(&self.session.room_id, RESTART_NOTICE) {
                warn!("Failed to send notice: {}", e);
            }
        }
        self.session.state = State::Running;
    }

    /// Stops the emulator and the display. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.session.state == State::Stopped {
            return;
        }
        info!("Shutting down");
        self.ctx.emulator_stop();
        self.ctx.display_stop();
        self.session.state = State::Stopped;
    }
}

impl<C: Context> Handler for Controller<C> {
    fn room_query(&mut self, alias: &str) -> bool {
        let accepted = alias == self.session.room_alias;
        if !accepted {
            debug!("Rejecting room alias {}", alias);
        }
        accepted
    }

    fn user_query(&mut self, user_id: &str) -> bool {
        let accepted = user_id == self.session.user_id;
        if !accepted {
            debug!("Rejecting account {}", user_id);
        }
        accepted
    }

    fn transaction(&mut self, events: &[RoomEvent]) -> bool {
        self.handle_transaction(events)
    }
}

impl<C: Context> Drop for Controller<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
