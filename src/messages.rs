use crate::error::{CallError, Error};
use crate::store::{Blob, SoundId};
use tokio::sync::oneshot;

/// Commands for the Recorder service
pub enum RecorderCommand {
    Start(oneshot::Sender<Result<(), Error>>),
    Pause(oneshot::Sender<Result<(), Error>>),
    Resume(oneshot::Sender<Result<(), Error>>),
    Stop(oneshot::Sender<Result<Capture, Error>>),
}

/// Capture session state (observable via watch channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Paused,
    Finalizing,
}

impl CaptureState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Recording | Self::Paused)
    }
}

/// Result of a finished capture session.
///
/// The blob is returned even when saving it failed.
#[derive(Debug)]
pub struct Capture {
    pub name: String,
    pub blob: Blob,
    pub saved: Result<SoundId, CallError>,
}

/// Commands for the Mixer service
pub enum MixCommand {
    Mix {
        a: Blob,
        b: Blob,
        reply: oneshot::Sender<Result<Blob, Error>>,
    },
}
