use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use image::RgbImage;

use crate::display::VirtualDisplay;
use crate::emulator::{Dump, EmulatorConfig, Supervisor};
use crate::error::{CaptureError, StartupError, TransportError};
use crate::input::{Key, Xdotool};
use crate::matrix::MatrixClient;

pub struct Host {
    pub transport: MatrixClient,
    pub emulator: Supervisor,
    pub display: VirtualDisplay,
    pub keyboard: Xdotool,
    pub clock: SystemClock,
}

impl Host {
    pub fn new(
        transport: MatrixClient,
        emulator: Supervisor,
        display: VirtualDisplay,
        keyboard: Xdotool,
    ) -> Host {
        Host {
            transport,
            emulator,
            display,
            keyboard,
            clock: SystemClock,
        }
    }
}

impl Transport for Host {
    fn create_room(&mut self, local_alias: &str, public: bool) -> Result<String, TransportError> {
        self.transport.create_room(local_alias, public)
    }

    fn get_room_id(&mut self, alias: &str) -> Result<String, TransportError> {
        self.transport.get_room_id(alias)
    }

    fn media_upload(&mut self, data: Vec<u8>, mime: &str) -> Result<String, TransportError> {
        self.transport.media_upload(data, mime)
    }

    fn send_content(
        &mut self,
        room_id: &str,
        uri: &str,
        file_name: &str,
        msgtype: &str,
    ) -> Result<(), TransportError> {
        self.transport.send_content(room_id, uri, file_name, msgtype)
    }

    fn send_notice(&mut self, room_id: &str, text: &str) -> Result<(), TransportError> {
        self.transport.send_notice(room_id, text)
    }
}

impl Emulator for Host {
    fn emulator_start(&mut self, config: &EmulatorConfig) -> Result<(), StartupError> {
        self.emulator.start(config)
    }

    fn emulator_stop(&mut self) {
        self.emulator.stop()
    }

    fn emulator_dump(&mut self) -> anyhow::Result<Dump> {
        self.emulator.dump()
    }

    fn emulator_running(&mut self) -> bool {
        self.emulator.is_running()
    }
}

impl Display for Host {
    fn display_start(&mut self) -> Result<(), StartupError> {
        self.display.start()
    }

    fn display_grab(&mut self) -> Result<RgbImage, CaptureError> {
        self.display.grab()
    }

    fn display_stop(&mut self) {
        self.display.stop()
    }

    fn display_running(&mut self) -> bool {
        self.display.is_running()
    }
}

impl Keyboard for Host {
    fn key_down(&mut self, key: Key) {
        self.keyboard.key_down(key)
    }

    fn key_up(&mut self, key: Key) {
        self.keyboard.key_up(key)
    }
}

impl Clock for Host {
    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn unix_time(&self) -> u64 {
        self.clock.unix_time()
    }

    fn sleep(&mut self, duration: Duration) {
        self.clock.sleep(duration)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Outbound half of the chat transport.
pub trait Transport {
    /// Creates a room with the local part of an alias.
    fn create_room(&mut self, local_alias: &str, public: bool) -> Result<String, TransportError>;
    fn get_room_id(&mut self, alias: &str) -> Result<String, TransportError>;
    /// Uploads media and returns its content uri.
    fn media_upload(&mut self, data: Vec<u8>, mime: &str) -> Result<String, TransportError>;
    fn send_content(
        &mut self,
        room_id: &str,
        uri: &str,
        file_name: &str,
        msgtype: &str,
    ) -> Result<(), TransportError>;
    fn send_notice(&mut self, room_id: &str, text: &str) -> Result<(), TransportError>;
}

pub trait Emulator {
    /// Launches the emulator, stopping any previous instance first.
    fn emulator_start(&mut self, config: &EmulatorConfig) -> Result<(), StartupError>;
    fn emulator_stop(&mut self);
    /// Stops the emulator and returns what it wrote to stdout and stderr.
    fn emulator_dump(&mut self) -> anyhow::Result<Dump>;
    fn emulator_running(&mut self) -> bool;
}

pub trait Display {
    /// Starts the off-screen surface. Does nothing if it is already live.
    fn display_start(&mut self) -> Result<(), StartupError>;
    fn display_grab(&mut self) -> Result<RgbImage, CaptureError>;
    fn display_stop(&mut self);
    fn display_running(&mut self) -> bool;
}

pub trait Keyboard {
    fn key_down(&mut self, key: Key);
    fn key_up(&mut self, key: Key);
}

pub trait Clock {
    fn now(&self) -> Instant;
    fn unix_time(&self) -> u64;
    fn sleep(&mut self, duration: Duration);
}

pub trait Context: Transport + Emulator + Display + Keyboard + Clock {}
impl<T: Transport + Emulator + Display + Keyboard + Clock> Context for T {}
