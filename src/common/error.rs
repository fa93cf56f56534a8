use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("No face detected")]
    NoFaceDetected,

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Recognition error: {0}")]
    Recognition(RecognitionErrorCode),

    #[error("No challenge phrase is active")]
    NoChallengeActive,

    #[error("Descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Descriptor value {index} is not a finite number")]
    NonFiniteDescriptor { index: usize },

    #[error("A face capture is already in progress")]
    CaptureInProgress,

    #[error("Already listening for a phrase")]
    ListenInProgress,

    #[error("Verification session is closed")]
    SessionClosed,

    #[error("No face has been enrolled in this session")]
    NotEnrolled,

    #[error("Student not found: {0}")]
    StudentNotFound(String),

    #[error("Invalid or expired session token")]
    InvalidSessionToken,

    #[error("Face verification required before check-in")]
    FaceVerificationRequired,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Failure codes reported by a speech engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorCode {
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    LanguageNotSupported,
    Engine(String),
}

impl fmt::Display for RecognitionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpeech => write!(f, "no-speech"),
            Self::Aborted => write!(f, "aborted"),
            Self::AudioCapture => write!(f, "audio-capture"),
            Self::Network => write!(f, "network"),
            Self::NotAllowed => write!(f, "not-allowed"),
            Self::ServiceNotAllowed => write!(f, "service-not-allowed"),
            Self::LanguageNotSupported => write!(f, "language-not-supported"),
            Self::Engine(msg) => write!(f, "engine: {}", msg),
        }
    }
}

impl VerifyError {
    /// True for hardware, engine and permission failures that a user can
    /// retry, as opposed to usage errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerifyError::NoFaceDetected
                | VerifyError::Detection(_)
                | VerifyError::Recognition(_)
                | VerifyError::CaptureInProgress
                | VerifyError::ListenInProgress
        )
    }
}

pub type Result<T> = std::result::Result<T, VerifyError>;
