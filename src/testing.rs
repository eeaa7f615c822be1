//! In-memory stand-ins for every collaborator, driven by a manual clock.

use std::time::{Duration, Instant};

use anyhow::bail;
use image::{Rgb, RgbImage};

use crate::context::{Clock, Display, Emulator, Keyboard, Transport};
use crate::display::{HEIGHT, WIDTH};
use crate::emulator::{Dump, EmulatorConfig};
use crate::error::{CaptureError, StartupError, TransportError};
use crate::input::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Down(Key, Instant),
    Up(Key, Instant),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Content {
        room_id: String,
        uri: String,
        file_name: String,
        msgtype: String,
    },
    Notice {
        room_id: String,
        text: String,
    },
}

pub struct FakeHost {
    base: Instant,
    elapsed: Duration,
    pub unix_time: u64,
    pub sleeps: Vec<Duration>,

    pub inputs: Vec<Input>,

    /// Room id already bound to any alias we try to create.
    pub existing_room: Option<String>,
    pub create_fails: bool,
    pub created: Vec<String>,
    pub lookups: Vec<String>,
    pub uploads: Vec<String>,
    pub upload_fails: bool,
    pub sent: Vec<Sent>,

    /// Starts out live, as the bridge binary brings it up first.
    pub display_running: bool,
    pub display_starts: usize,
    pub display_stops: usize,
    pub grab_fails: bool,
    pub grabs: usize,

    pub emulator_running: bool,
    pub emulator_starts: Vec<EmulatorConfig>,
    pub emulator_stops: usize,
    pub emulator_fails: bool,
    pub dumps: usize,
}

impl FakeHost {
    pub fn new() -> FakeHost {
        FakeHost {
            base: Instant::now(),
            elapsed: Duration::ZERO,
            unix_time: 1_500_000_000,
            sleeps: Vec::new(),
            inputs: Vec::new(),
            existing_room: None,
            create_fails: false,
            created: Vec::new(),
            lookups: Vec::new(),
            uploads: Vec::new(),
            upload_fails: false,
            sent: Vec::new(),
            display_running: true,
            display_starts: 0,
            display_stops: 0,
            grab_fails: false,
            grabs: 0,
            emulator_running: false,
            emulator_starts: Vec::new(),
            emulator_stops: 0,
            emulator_fails: false,
            dumps: 0,
        }
    }

    pub fn advance(&mut self, duration: Duration) {
        self.elapsed += duration;
        self.unix_time += duration.as_secs();
    }

    /// Key transitions without timestamps; `true` is key-down.
    pub fn keys(&self) -> Vec<(bool, Key)> {
        self.inputs
            .iter()
            .map(|input| match input {
                Input::Down(key, _) => (true, *key),
                Input::Up(key, _) => (false, *key),
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter_map(|sent| match sent {
                Sent::Notice { text, .. } => Some(text.clone()),
                Sent::Content { .. } => None,
            })
            .collect()
    }

    pub fn images(&self) -> usize {
        self.sent
            .iter()
            .filter(|sent| matches!(sent, Sent::Content { .. }))
            .count()
    }
}

impl Transport for FakeHost {
    fn create_room(&mut self, local_alias: &str, _public: bool) -> Result<String, TransportError> {
        if self.create_fails {
            return Err(TransportError::Api {
                status: 403,
                errcode: "M_FORBIDDEN".to_string(),
                message: "not allowed".to_string(),
            });
        }
        if self.existing_room.is_some() {
            return Err(TransportError::AliasTaken);
        }
        self.created.push(local_alias.to_string());
        Ok("!created:example.org".to_string())
    }

    fn get_room_id(&mut self, alias: &str) -> Result<String, TransportError> {
        self.lookups.push(alias.to_string());
        self.existing_room.clone().ok_or_else(|| TransportError::Api {
            status: 404,
            errcode: "M_NOT_FOUND".to_string(),
            message: "Room alias not found".to_string(),
        })
    }

    fn media_upload(&mut self, _data: Vec<u8>, mime: &str) -> Result<String, TransportError> {
        if self.upload_fails {
            return Err(TransportError::Malformed("upload refused".to_string()));
        }
        let uri = format!("mxc://example.org/{}", self.uploads.len());
        self.uploads.push(mime.to_string());
        Ok(uri)
    }

    fn send_content(
        &mut self,
        room_id: &str,
        uri: &str,
        file_name: &str,
        msgtype: &str,
    ) -> Result<(), TransportError> {
        self.sent.push(Sent::Content {
            room_id: room_id.to_string(),
            uri: uri.to_string(),
            file_name: file_name.to_string(),
            msgtype: msgtype.to_string(),
        });
        Ok(())
    }

    fn send_notice(&mut self, room_id: &str, text: &str) -> Result<(), TransportError> {
        self.sent.push(Sent::Notice {
            room_id: room_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

impl Emulator for FakeHost {
    fn emulator_start(&mut self, config: &EmulatorConfig) -> Result<(), StartupError> {
        if self.emulator_fails {
            return Err(StartupError::Spawn {
                program: config.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        if self.emulator_running {
            self.emulator_stop();
        }
        self.emulator_starts.push(config.clone());
        self.emulator_running = true;
        Ok(())
    }

    fn emulator_stop(&mut self) {
        if self.emulator_running {
            self.emulator_stops += 1;
            self.emulator_running = false;
        }
    }

    /// Works on a crashed emulator too, its logs are still on disk.
    fn emulator_dump(&mut self) -> anyhow::Result<Dump> {
        if self.emulator_starts.is_empty() {
            bail!("emulator was never started");
        }
        self.emulator_stop();
        self.dumps += 1;
        Ok(Dump {
            stdout: "GBA BIOS loaded".to_string(),
            stderr: "Unimplemented opcode".to_string(),
        })
    }

    fn emulator_running(&mut self) -> bool {
        self.emulator_running
    }
}

impl Display for FakeHost {
    fn display_start(&mut self) -> Result<(), StartupError> {
        if !self.display_running {
            self.display_starts += 1;
            self.display_running = true;
        }
        Ok(())
    }

    fn display_grab(&mut self) -> Result<RgbImage, CaptureError> {
        self.grabs += 1;
        if self.grab_fails || !self.display_running {
            return Err(CaptureError::NotRunning);
        }
        Ok(RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([0, 128, 0])))
    }

    fn display_stop(&mut self) {
        if self.display_running {
            self.display_stops += 1;
            self.display_running = false;
        }
    }

    fn display_running(&mut self) -> bool {
        self.display_running
    }
}

impl Keyboard for FakeHost {
    fn key_down(&mut self, key: Key) {
        let now = self.now();
        self.inputs.push(Input::Down(key, now));
    }

    fn key_up(&mut self, key: Key) {
        let now = self.now();
        self.inputs.push(Input::Up(key, now));
    }
}

impl Clock for FakeHost {
    fn now(&self) -> Instant {
        self.base + self.elapsed
    }

    fn unix_time(&self) -> u64 {
        self.unix_time
    }

    fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
        self.advance(duration);
    }
}
