// Core modules
pub mod core;
pub mod capture;
pub mod storage;
pub mod checkin;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, RecognitionErrorCode, VerifyError, Result};
pub use core::{
    FaceDescriptor, FaceSample, FaceMatcher, VerificationResult, euclidean_distance,
    PhraseChallenge, ChallengePhrase, SpeechMatchResult, Transcript, WordLattice,
    VerificationSession, DetectionHandle, FaceCapture, CaptureGuard, CaptureKind, SessionState,
};
pub use capture::{FaceSampleProvider, SpeechEngine, DescriptorFileProvider, ConsoleSpeechEngine};
pub use storage::{StudentStore, StudentRecord, AttendanceBook, AttendanceRecord, CheckIn};
pub use checkin::{run_check_in, CheckInRequest, CheckInReport};
