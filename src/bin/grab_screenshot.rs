use std::fs;

use anyhow::{Context, Result};
use rust_mpp::display::VirtualDisplay;
use rust_mpp::publisher;

fn main() -> Result<()> {
    env_logger::init();

    let output = std::env::args()
        .nth(1)
        .context("Usage: --bin grab_screenshot -- <output.jpg> [display-number]")?;
    let number = std::env::args()
        .nth(2)
        .map(|n| n.parse::<u32>())
        .transpose()
        .context("Display number must be an integer")?
        .unwrap_or(99);

    let mut display = VirtualDisplay::new(number);
    display.start()?;
    let frame = display.grab()?;
    let data = publisher::encode(&frame)?;
    fs::write(&output, &data).with_context(|| format!("Failed to write {}", output))?;

    println!(
        "{}x{} frame from {} -> {} ({} bytes)",
        frame.width(),
        frame.height(),
        display.name(),
        output,
        data.len()
    );
    Ok(())
}
