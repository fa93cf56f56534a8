use crate::common::{VerifyError, Result};
use serde::{Deserialize, Serialize};

/// Face embedding produced by the upstream recognition model.
///
/// The raw vector is the identity record: it is never normalized or resized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Reject NaN and infinities, which would poison every distance.
    pub fn ensure_finite(&self) -> Result<()> {
        ensure_finite(&self.0)
    }

    pub fn distance_to(&self, other: &FaceDescriptor) -> Result<f32> {
        euclidean_distance(&self.0, &other.0)
    }
}

impl From<Vec<f32>> for FaceDescriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// A live capture: one detected face and its descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    pub descriptor: FaceDescriptor,
    /// Detector score for the face box, when the model reports one.
    #[serde(default)]
    pub detection_score: Option<f32>,
}

impl FaceSample {
    pub fn new(descriptor: FaceDescriptor) -> Self {
        Self { descriptor, detection_score: None }
    }
}

/// sqrt(sum((a_i - b_i)^2)); slices of different length or with non-finite
/// values are rejected.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(VerifyError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    ensure_finite(a)?;
    ensure_finite(b)?;

    let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    Ok(sum.sqrt())
}

fn ensure_finite(values: &[f32]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(VerifyError::NonFiniteDescriptor { index }),
        None => Ok(()),
    }
}
