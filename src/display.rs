use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use image::RgbImage;
use log::{info, warn};

use crate::error::{CaptureError, StartupError};

/// The emulated GBA screen.
pub const WIDTH: u32 = 240;
pub const HEIGHT: u32 = 160;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET_DIR: &str = "/tmp/.X11-unix";

/// An off-screen X server sized to the emulated screen.
pub struct VirtualDisplay {
    number: u32,
    program: String,
    socket_dir: PathBuf,
    server: Option<Child>,
}

impl VirtualDisplay {
    pub fn new(number: u32) -> VirtualDisplay {
        VirtualDisplay {
            number,
            program: "Xvfb".to_string(),
            socket_dir: PathBuf::from(SOCKET_DIR),
            server: None,
        }
    }

    #[cfg(test)]
    fn with_server(number: u32, program: &str, socket_dir: &std::path::Path) -> VirtualDisplay {
        VirtualDisplay {
            number,
            program: program.to_string(),
            socket_dir: socket_dir.to_path_buf(),
            server: None,
        }
    }

    /// Value for `DISPLAY` of processes drawing on this screen.
    pub fn name(&self) -> String {
        format!(":{}", self.number)
    }

    fn socket(&self) -> PathBuf {
        self.socket_dir.join(format!("X{}", self.number))
    }

    /// Brings the server up and waits until it accepts connections. Fails if
    /// another server already owns the display number.
    pub fn start(&mut self) -> Result<(), StartupError> {
        if self.is_running() {
            return Ok(());
        }
        if self.socket().exists() {
            return Err(StartupError::Display(format!(
                "{} is already in use ({:?} exists)",
                self.name(),
                self.socket()
            )));
        }

        let server = Command::new(&self.program)
            .arg(self.name())
            .args(["-screen", "0"])
            .arg(format!("{}x{}x24", WIDTH, HEIGHT))
            .args(["-nolisten", "tcp"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| StartupError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        self.server = Some(server);

        // Key injection needs the server to accept connections.
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        while !self.socket().exists() {
            if !self.is_running() {
                self.stop();
                return Err(StartupError::Display(format!(
                    "{} exited before {} came up",
                    self.program,
                    self.name()
                )));
            }
            if Instant::now() > deadline {
                self.stop();
                return Err(StartupError::Display(format!(
                    "timed out waiting for {}",
                    self.name()
                )));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        if !self.is_running() {
            self.stop();
            return Err(StartupError::Display(format!(
                "{} exited right after {} came up",
                self.program,
                self.name()
            )));
        }

        info!("Virtual display {} is up", self.name());
        Ok(())
    }

    pub fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        if !self.is_running() {
            return Err(CaptureError::NotRunning);
        }

        let output = Command::new("import")
            .arg("-display")
            .arg(self.name())
            .args(["-window", "root", "png:-"])
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(CaptureError::Grab(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        decode(&output.stdout)
    }

    pub fn stop(&mut self) {
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.kill() {
                warn!("Failed to stop Xvfb: {}", e);
            }
            match server.wait() {
                Ok(status) => info!("Virtual display {} stopped ({})", self.name(), status),
                Err(e) => warn!("Failed to reap {}: {}", self.program, e),
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        match self.server.as_mut() {
            Some(server) => matches!(server.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for VirtualDisplay {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode(bytes: &[u8]) -> Result<RgbImage, CaptureError> {
    if bytes.is_empty() {
        return Err(CaptureError::Grab("screen grab was empty".to_string()));
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
