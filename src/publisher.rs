use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::{debug, info, warn};

use crate::context;
use crate::error::CaptureError;
use crate::session::Session;

pub trait Context: context::Display + context::Transport + context::Clock {}
impl<T: context::Display + context::Transport + context::Clock> Context for T {}

/// Minimum spacing between two screenshots in the room.
pub const INTERVAL: Duration = Duration::from_secs(2);
pub const QUALITY: u8 = 50;
pub const MIME: &str = "image/jpeg";
pub const CAPTURE_NOTICE: &str = "Error in capturing screenshot";

/// An encoded frame, named after the second it was taken.
#[derive(Debug)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub timestamp: u64,
}

impl Snapshot {
    pub fn capture(ctx: &mut impl Context) -> Result<Snapshot, CaptureError> {
        let frame = ctx.display_grab()?;
        Ok(Snapshot {
            data: encode(&frame)?,
            timestamp: ctx.unix_time(),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.timestamp)
    }
}

pub fn encode(frame: &RgbImage) -> Result<Vec<u8>, CaptureError> {
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, QUALITY).encode_image(frame)?;
    Ok(data)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Published {
    Sent,
    Throttled,
    CaptureFailed,
    UploadFailed,
}

/// Posts the current screen unless the last one went out less than
/// [`INTERVAL`] ago.
pub fn publish(session: &mut Session, ctx: &mut impl Context) -> Published {
    if let Some(last) = session.last_screenshot {
        let elapsed = ctx.now().saturating_duration_since(last);
        if elapsed < INTERVAL {
            debug!("Screenshot throttled ({:?} since last)", elapsed);
            return Published::Throttled;
        }
    }

    let snapshot = match Snapshot::capture(ctx) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Failed to capture screenshot: {}", e);
            if let Err(e) = ctx.send_notice(&session.room_id, CAPTURE_NOTICE) {
                warn!("Failed to send notice: {}", e);
            }
            return Published::CaptureFailed;
        }
    };

    let file_name = snapshot.file_name();
    let sent = ctx
        .media_upload(snapshot.data, MIME)
        .and_then(|uri| ctx.send_content(&session.room_id, &uri, &file_name, "m.image"));
    if let Err(e) = sent {
        warn!("Failed to post screenshot {}: {}", file_name, e);
        return Published::UploadFailed;
    }

    debug!("Posted screenshot {}", file_name);
    session.last_screenshot = Some(ctx.now());
    Published::Sent
}

/// Posts the current screen regardless of when the last one went out.
pub fn publish_now(session: &mut Session, ctx: &mut impl Context) -> Published {
    session.last_screenshot = None;
    let published = publish(session, ctx);
    if published != Published::Sent {
        info!("Initial screenshot not posted: {:?}", published);
    }
    published
}
