use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use log::{info, warn};
use rust_mpp::display::VirtualDisplay;
use rust_mpp::emulator::Supervisor;
use rust_mpp::input::Xdotool;
use rust_mpp::matrix::{MatrixClient, Poller};
use rust_mpp::{Config, Controller, Host};

fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = Config::load(&config_path)?;
    let data_dir = config.data_dir()?;

    // xdotool talks to this server, so it has to be up before anything else
    let mut display = VirtualDisplay::new(config.display);
    display.start().context("Failed to start virtual display")?;

    // mgba wants an audio sink
    let mut audio = start_audio();

    let client = MatrixClient::new(&config.hs_address, &config.token)
        .context("Failed to create Matrix client")?;
    let mut poller = Poller::new(client.clone());
    let stop = poller.stop_flag();
    ctrlc::set_handler(move || {
        info!("Termination requested, stopping after the current sync");
        stop.store(true, Ordering::SeqCst);
    })
    .context("Failed to install termination handler")?;

    let display_name = display.name();
    let host = Host::new(
        client,
        Supervisor::new(display_name.clone(), data_dir.join("logs")),
        display,
        Xdotool::new(display_name),
    );

    let mut controller = Controller::start(&config, host).context("Failed to start session")?;
    info!(
        "Playing in {} ({})",
        controller.session().room_alias,
        controller.session().room_id
    );

    let result = poller.run(&mut controller);

    controller.shutdown();
    if let Some(audio) = audio.as_mut() {
        stop_audio(audio);
    }
    result
}

fn start_audio() -> Option<Child> {
    let spawned = Command::new("pulseaudio")
        .arg("--exit-idle-time=-1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(child) => {
            info!("Started pulseaudio (pid {})", child.id());
            Some(child)
        }
        Err(e) => {
            warn!("Failed to start pulseaudio, continuing without sound: {}", e);
            None
        }
    }
}

fn stop_audio(audio: &mut Child) {
    if let Err(e) = audio.kill() {
        warn!("Failed to stop pulseaudio: {}", e);
    }
    match audio.wait() {
        Ok(status) => info!("pulseaudio stopped ({})", status),
        Err(e) => warn!("Failed to reap pulseaudio: {}", e),
    }
}
