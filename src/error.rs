use thiserror::Error;

/// Failure talking to the homeserver.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("room alias is already in use")]
    AliasTaken,

    #[error("homeserver returned {status} ({errcode}): {message}")]
    Api {
        status: u16,
        errcode: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error("invalid homeserver url: {0}")]
    Url(String),

    #[error("failed to create runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Failure grabbing the framebuffer of the virtual display.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("display is not running")]
    NotRunning,

    #[error("screen grab failed: {0}")]
    Grab(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to run screen grabber: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal conditions while bringing a session up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to acquire room: {0}")]
    Room(#[source] TransportError),

    #[error("display failed to start: {0}")]
    Display(String),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
