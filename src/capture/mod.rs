//! Sensor-side collaborators.
//!
//! The session only talks to these traits; camera access, face models and
//! speech recognition live behind them. Both traits own a shared device, so
//! `release` must be safe to call repeatedly and on a device that was never
//! opened.

pub mod console_speech;
pub mod file_provider;

use crate::common::Result;
use crate::core::descriptor::FaceSample;
use crate::core::phrase::Transcript;

pub use console_speech::ConsoleSpeechEngine;
pub use file_provider::DescriptorFileProvider;

pub trait FaceSampleProvider: Send + Sync {
    /// Capture a frame and extract the single face in it.
    ///
    /// `Ok(None)` means the frame had no detectable face. Device and model
    /// failures are `Err(VerifyError::Detection(_))`.
    fn detect(&self) -> Result<Option<FaceSample>>;

    /// Stop the camera stream.
    fn release(&self) {}
}

pub trait SpeechEngine: Send + Sync {
    /// Listen for one utterance (non-continuous).
    fn listen(&self) -> Result<Transcript>;

    /// Stop recognition and the microphone stream.
    fn release(&self) {}
}
