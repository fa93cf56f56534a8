pub mod descriptor;
pub mod face_matcher;
pub mod guard;
pub mod phrase;
pub mod session;

pub use descriptor::{FaceDescriptor, FaceSample, euclidean_distance};
pub use face_matcher::{FaceMatcher, VerificationResult, confidence_from_distance};
pub use guard::{CaptureGuard, CaptureKind, SessionState};
pub use phrase::{ChallengePhrase, PhraseChallenge, SpeechMatchResult, Transcript, WordLattice};
pub use session::{DetectionHandle, FaceCapture, VerificationSession};
