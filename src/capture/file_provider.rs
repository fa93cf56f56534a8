use crate::capture::FaceSampleProvider;
use crate::common::{VerifyError, Result};
use crate::core::descriptor::{FaceDescriptor, FaceSample};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Reads descriptors exported by an external face model.
///
/// Accepted file contents: a bare JSON array (face-api's `descriptor`), an
/// object with a `descriptor` field, or `null` when no face was found. An
/// object with an `error` string, or any other shape, is a detection error.
/// The file is re-read on every `detect`, so a watcher can keep overwriting it.
pub struct DescriptorFileProvider {
    path: PathBuf,
    released: AtomicBool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorFile {
    Bare(Vec<f32>),
    Failed {
        error: String,
    },
    Wrapped {
        // Required key; only an explicit `null` means no face
        #[serde(deserialize_with = "Option::deserialize")]
        descriptor: Option<Vec<f32>>,
        #[serde(default)]
        score: Option<f32>,
    },
}

impl DescriptorFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn parse(contents: &str) -> Result<Option<FaceSample>> {
        let parsed: Option<DescriptorFile> = serde_json::from_str(contents)
            .map_err(|e| VerifyError::Detection(format!("Malformed descriptor file: {}", e)))?;

        let sample = match parsed {
            None => None,
            Some(DescriptorFile::Failed { error }) => {
                return Err(VerifyError::Detection(format!("Face model reported: {}", error)));
            }
            Some(DescriptorFile::Bare(values)) if values.is_empty() => None,
            Some(DescriptorFile::Bare(values)) => Some(FaceSample::new(FaceDescriptor::new(values))),
            Some(DescriptorFile::Wrapped { descriptor: None, .. }) => None,
            Some(DescriptorFile::Wrapped { descriptor: Some(values), .. }) if values.is_empty() => None,
            Some(DescriptorFile::Wrapped { descriptor: Some(values), score }) => Some(FaceSample {
                descriptor: FaceDescriptor::new(values),
                detection_score: score,
            }),
        };

        if let Some(sample) = &sample {
            sample
                .descriptor
                .ensure_finite()
                .map_err(|e| VerifyError::Detection(format!("Malformed descriptor file: {}", e)))?;
        }
        Ok(sample)
    }
}

impl FaceSampleProvider for DescriptorFileProvider {
    fn detect(&self) -> Result<Option<FaceSample>> {
        if self.is_released() {
            return Err(VerifyError::Detection("Camera stream has been released".into()));
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            VerifyError::Detection(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        let sample = Self::parse(&contents)?;
        if sample.is_none() {
            tracing::debug!("No face in {}", self.path.display());
        }
        Ok(sample)
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            tracing::debug!("Released descriptor source {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn provider_with(contents: &str) -> (tempfile::NamedTempFile, DescriptorFileProvider) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let provider = DescriptorFileProvider::new(file.path());
        (file, provider)
    }

    #[test]
    fn reads_bare_array() {
        let (_file, provider) = provider_with("[0.25, -0.5, 1.0]");
        let sample = provider.detect().unwrap().unwrap();
        assert_eq!(sample.descriptor.as_slice(), &[0.25, -0.5, 1.0]);
        assert_eq!(sample.detection_score, None);
    }

    #[test]
    fn reads_wrapped_object() {
        let (_file, provider) = provider_with(r#"{"descriptor": [0.5, 0.5], "score": 0.93}"#);
        let sample = provider.detect().unwrap().unwrap();
        assert_eq!(sample.descriptor.len(), 2);
        assert_eq!(sample.detection_score, Some(0.93));
    }

    #[test]
    fn null_means_no_face() {
        let (_file, provider) = provider_with("null");
        assert!(provider.detect().unwrap().is_none());

        let (_file, provider) = provider_with(r#"{"descriptor": null}"#);
        assert!(provider.detect().unwrap().is_none());
    }

    #[test]
    fn garbage_is_a_detection_error() {
        let (_file, provider) = provider_with("not json");
        assert!(matches!(provider.detect(), Err(VerifyError::Detection(_))));

        let missing = DescriptorFileProvider::new("/nonexistent/descriptor.json");
        assert!(matches!(missing.detect(), Err(VerifyError::Detection(_))));
    }

    #[test]
    fn model_error_is_not_a_missing_face() {
        let (_file, provider) = provider_with(r#"{"error": "camera permission denied"}"#);
        match provider.detect() {
            Err(VerifyError::Detection(msg)) => assert!(msg.contains("camera permission denied")),
            other => panic!("expected detection error, got {:?}", other),
        }

        for contents in ["{}", r#"{"descriptr": [0.1]}"#, r#"{"descriptor": null, "error": "gpu lost"}"#] {
            let (_file, provider) = provider_with(contents);
            assert!(
                matches!(provider.detect(), Err(VerifyError::Detection(_))),
                "{} should not read as no face",
                contents
            );
        }
    }

    #[test]
    fn overflowing_values_are_rejected() {
        let (_file, provider) = provider_with("[1e39, 0.0]");
        assert!(matches!(provider.detect(), Err(VerifyError::Detection(_))));

        let (_file, provider) = provider_with(r#"{"descriptor": [0.0, -1e39]}"#);
        assert!(matches!(provider.detect(), Err(VerifyError::Detection(_))));
    }

    #[test]
    fn release_is_idempotent() {
        let (_file, provider) = provider_with("[1.0]");
        provider.release();
        provider.release();
        assert!(provider.is_released());
        assert!(matches!(provider.detect(), Err(VerifyError::Detection(_))));
    }
}
