use crate::common::config::{Config, FACE_DISTANCE_THRESHOLD};
use crate::common::{VerifyError, Result};
use crate::core::descriptor::{FaceDescriptor, FaceSample};
use serde::{Deserialize, Serialize};

pub const NO_FACE_MESSAGE: &str = "No face detected";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub distance: Option<f32>,
    pub threshold: f32,
    /// Presentation score in [0, 100] with one decimal, not a probability.
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    fn no_face(threshold: f32) -> Self {
        Self {
            verified: false,
            distance: None,
            threshold,
            confidence: 0.0,
            error: Some(NO_FACE_MESSAGE.to_string()),
        }
    }

    /// Confidence as shown to users, e.g. "87.5".
    pub fn confidence_display(&self) -> String {
        format!("{:.1}", self.confidence)
    }
}

/// Distance-based face comparison with a fixed operating threshold.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    threshold: f32,
    expected_len: Option<usize>,
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self {
            threshold: FACE_DISTANCE_THRESHOLD,
            expected_len: None,
        }
    }
}

impl FaceMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.face.distance_threshold,
            expected_len: config.expected_descriptor_length(),
        }
    }

    pub fn with_expected_len(mut self, len: usize) -> Self {
        self.expected_len = Some(len);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Turn a live capture into the identity record.
    pub fn enroll(&self, sample: Option<FaceSample>) -> Result<FaceDescriptor> {
        let sample = sample.ok_or(VerifyError::NoFaceDetected)?;
        sample.descriptor.ensure_finite()?;

        if let Some(expected) = self.expected_len {
            if sample.descriptor.len() != expected {
                return Err(VerifyError::DimensionMismatch {
                    expected,
                    actual: sample.descriptor.len(),
                });
            }
        }

        tracing::debug!("Enrolled descriptor of length {}", sample.descriptor.len());
        Ok(sample.descriptor)
    }

    /// Compare a stored descriptor with a live capture.
    ///
    /// A missing face is a denial, returned as data. Only a dimensionality
    /// mismatch is an error.
    pub fn verify(&self, stored: &FaceDescriptor, sample: Option<&FaceSample>) -> Result<VerificationResult> {
        let Some(sample) = sample else {
            tracing::debug!("Verification attempted without a detected face");
            return Ok(VerificationResult::no_face(self.threshold));
        };

        let distance = stored.distance_to(&sample.descriptor)?;
        let verified = distance < self.threshold;
        let confidence = confidence_from_distance(distance);

        tracing::debug!("Face distance {:.4} (threshold {}) -> verified={}",
                        distance, self.threshold, verified);

        Ok(VerificationResult {
            verified,
            distance: Some(distance),
            threshold: self.threshold,
            confidence,
            error: None,
        })
    }
}

/// max(0, (1 - distance) * 100), rounded to one decimal. NaN maps to 0.
pub fn confidence_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    let raw = ((1.0 - distance) * 100.0).clamp(0.0, 100.0);
    (raw * 10.0).round() / 10.0
}
