use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::config::Config;
use crate::error::StartupError;

const NATIVE_FPS: f32 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EmulatorConfig {
    pub program: String,
    pub bios: PathBuf,
    pub rom: PathBuf,
    pub speed: Option<f32>,
}

impl EmulatorConfig {
    pub fn from_config(config: &Config) -> EmulatorConfig {
        EmulatorConfig {
            program: config.emulator.clone(),
            bios: config.bios_location.clone(),
            rom: config.rom_location.clone(),
            speed: config.speed,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(speed) = self.speed {
            args.push("-C".to_string());
            args.push(format!("fpsTarget={}", NATIVE_FPS * speed));
        }
        args.push("-b".to_string());
        args.push(self.bios.display().to_string());
        args.push(self.rom.display().to_string());
        args
    }
}

/// Captured output of a stopped emulator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dump {
    pub stdout: String,
    pub stderr: String,
}

impl Dump {
    /// Writes the dump to `<dir>/<unix_time>.log`.
    pub fn save(&self, dir: &Path, unix_time: u64) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))?;
        let path = dir.join(format!("{}.log", unix_time));
        let text = format!("--- stdout ---\n{}\n--- stderr ---\n{}\n", self.stdout, self.stderr);
        fs::write(&path, text).with_context(|| format!("Failed to save dump: {:?}", path))?;
        Ok(path)
    }
}

/// Owns the single emulator child process.
pub struct Supervisor {
    display: String,
    log_dir: PathBuf,
    child: Option<Child>,
}

impl Supervisor {
    pub fn new(display: impl Into<String>, log_dir: impl Into<PathBuf>) -> Supervisor {
        Supervisor {
            display: display.into(),
            log_dir: log_dir.into(),
            child: None,
        }
    }

    fn stdout_path(&self) -> PathBuf {
        self.log_dir.join("emulator.stdout.log")
    }

    fn stderr_path(&self) -> PathBuf {
        self.log_dir.join("emulator.stderr.log")
    }

    pub fn start(&mut self, config: &EmulatorConfig) -> Result<(), StartupError> {
        self.stop();

        fs::create_dir_all(&self.log_dir).map_err(io_error(&self.log_dir))?;
        let stdout_path = self.stdout_path();
        let stdout = File::create(&stdout_path).map_err(io_error(&stdout_path))?;
        let stderr_path = self.stderr_path();
        let stderr = File::create(&stderr_path).map_err(io_error(&stderr_path))?;

        let child = Command::new(&config.program)
            .args(config.args())
            .env("DISPLAY", &self.display)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|source| StartupError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        info!(
            "Started {} (pid {}) with {:?}",
            config.program,
            child.id(),
            config.rom
        );
        self.child = Some(child);
        Ok(())
    }

    /// Kills the child. Nothing happens if it already exited or never started.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => debug!("Emulator had already exited with {}", status),
            _ => {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill emulator: {}", e);
                }
                match child.wait() {
                    Ok(status) => info!("Emulator stopped ({})", status),
                    Err(e) => warn!("Failed to reap emulator: {}", e),
                }
            }
        }
    }

    pub fn dump(&mut self) -> Result<Dump> {
        self.stop();
        Ok(Dump {
            stdout: read_log(&self.stdout_path())?,
            stderr: read_log(&self.stderr_path())?,
        })
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StartupError {
    let path = path.display().to_string();
    move |source| StartupError::Io { path, source }
}

fn read_log(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read log: {:?}", path))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
