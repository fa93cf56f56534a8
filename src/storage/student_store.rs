use crate::common::{VerifyError, Result};
use crate::core::descriptor::FaceDescriptor;
use crate::storage::write_atomic;
use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::fs;

const STORAGE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub version: u32,
    pub student_id: String,
    pub name: String,
    pub descriptor: FaceDescriptor,
    #[serde(default)]
    pub speech_verified: bool,
    pub enrolled_at: String,
    pub updated_at: String,
}

/// One bincode file per enrolled student.
pub struct StudentStore {
    data_dir: PathBuf,
}

impl StudentStore {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        tracing::debug!("StudentStore using {:?}", data_dir);
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Insert or refresh a student's enrollment. Returns true for a new student.
    pub fn add_or_update(
        &self,
        name: &str,
        student_id: &str,
        descriptor: FaceDescriptor,
        speech_verified: bool,
    ) -> Result<bool> {
        let name = name.trim();
        let student_id = student_id.trim();
        if name.is_empty() {
            return Err(VerifyError::InvalidInput("student name is required".into()));
        }
        validate_student_id(student_id)?;
        if descriptor.is_empty() {
            return Err(VerifyError::InvalidInput("face descriptor is empty".into()));
        }

        let now = timestamp();
        let (record, is_new) = match self.get_student(student_id) {
            Ok(existing) => (
                StudentRecord {
                    version: STORAGE_VERSION,
                    student_id: student_id.to_string(),
                    name: name.to_string(),
                    descriptor,
                    speech_verified: speech_verified || existing.speech_verified,
                    enrolled_at: existing.enrolled_at,
                    updated_at: now,
                },
                false,
            ),
            Err(VerifyError::StudentNotFound(_)) => (
                StudentRecord {
                    version: STORAGE_VERSION,
                    student_id: student_id.to_string(),
                    name: name.to_string(),
                    descriptor,
                    speech_verified,
                    enrolled_at: now.clone(),
                    updated_at: now,
                },
                true,
            ),
            Err(e) => return Err(e),
        };

        self.save(&record)?;
        tracing::info!("{} student {}", if is_new { "Enrolled" } else { "Updated" }, student_id);
        Ok(is_new)
    }

    pub fn get_student(&self, student_id: &str) -> Result<StudentRecord> {
        validate_student_id(student_id)?;
        let file = self.record_path(student_id);

        if !file.exists() {
            return Err(VerifyError::StudentNotFound(student_id.to_string()));
        }

        let data = fs::read(file)?;
        let record: StudentRecord = bincode::deserialize(&data)
            .map_err(|e| VerifyError::Storage(format!("Failed to deserialize: {}", e)))?;

        if record.version > STORAGE_VERSION {
            return Err(VerifyError::Storage(format!(
                "Record for {} has format version {}, this build reads up to {}",
                student_id, record.version, STORAGE_VERSION
            )));
        }

        Ok(record)
    }

    /// Mark an enrolled student's voice as verified without touching the
    /// face enrollment. Fails with `StudentNotFound` for unknown ids.
    pub fn set_speech_verified(&self, student_id: &str) -> Result<StudentRecord> {
        let mut record = self.get_student(student_id.trim())?;
        record.speech_verified = true;
        record.updated_at = timestamp();
        self.save(&record)?;
        tracing::info!("Voice verified for student {}", record.student_id);
        Ok(record)
    }

    /// All students, ordered by id.
    pub fn list_students(&self) -> Result<Vec<StudentRecord>> {
        let mut students = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bincode") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            match self.get_student(id) {
                Ok(record) => students.push(record),
                Err(e) => tracing::warn!("Skipping unreadable record {:?}: {}", path, e),
            }
        }
        students.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        Ok(students)
    }

    fn save(&self, record: &StudentRecord) -> Result<()> {
        let encoded = bincode::serialize(record)
            .map_err(|e| VerifyError::Storage(format!("Failed to serialize: {}", e)))?;
        write_atomic(&self.record_path(&record.student_id), &encoded)
    }

    fn record_path(&self, student_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.bincode", student_id))
    }
}

fn validate_student_id(student_id: &str) -> Result<()> {
    let valid = !student_id.is_empty()
        && student_id.len() <= 64
        && student_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(VerifyError::InvalidInput(format!(
            "student id must be 1-64 letters, digits, '-' or '_', got {:?}", student_id
        )));
    }
    Ok(())
}

pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StudentStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = StudentStore::open(tmp.path().join("students")).unwrap();
        (tmp, store)
    }

    #[test]
    fn add_then_update_keeps_enrollment_time() {
        let (_tmp, store) = store();
        let descriptor = FaceDescriptor::new(vec![0.1, 0.2]);

        assert!(store.add_or_update("Ada", "s-001", descriptor.clone(), true).unwrap());
        let first = store.get_student("s-001").unwrap();

        assert!(!store.add_or_update("Ada L.", "s-001", FaceDescriptor::new(vec![0.3, 0.4]), false).unwrap());
        let second = store.get_student("s-001").unwrap();

        assert_eq!(second.name, "Ada L.");
        assert_eq!(second.descriptor.as_slice(), &[0.3, 0.4]);
        assert_eq!(second.enrolled_at, first.enrolled_at);
        assert!(second.speech_verified, "earlier speech verification is kept");
    }

    #[test]
    fn unknown_student() {
        let (_tmp, store) = store();
        assert!(matches!(store.get_student("nobody"), Err(VerifyError::StudentNotFound(_))));
    }

    #[test]
    fn rejects_unsafe_ids_and_blank_names() {
        let (_tmp, store) = store();
        let d = FaceDescriptor::new(vec![1.0]);
        assert!(matches!(store.add_or_update("Bo", "../etc", d.clone(), false), Err(VerifyError::InvalidInput(_))));
        assert!(matches!(store.add_or_update("  ", "s-2", d.clone(), false), Err(VerifyError::InvalidInput(_))));
        assert!(matches!(store.add_or_update("Bo", "s-2", FaceDescriptor::new(vec![]), false), Err(VerifyError::InvalidInput(_))));
    }

    #[test]
    fn voice_only_enrollment_needs_a_face_first() {
        let (_tmp, store) = store();
        assert!(matches!(store.set_speech_verified("s-9"), Err(VerifyError::StudentNotFound(_))));

        store.add_or_update("Kay", "s-9", FaceDescriptor::new(vec![0.7, 0.1]), false).unwrap();
        let updated = store.set_speech_verified("s-9").unwrap();
        assert!(updated.speech_verified);
        assert_eq!(updated.descriptor.as_slice(), &[0.7, 0.1]);
        assert!(store.get_student("s-9").unwrap().speech_verified);
    }

    #[test]
    fn records_from_a_newer_format_are_refused() {
        let (_tmp, store) = store();
        store.add_or_update("Kay", "s-9", FaceDescriptor::new(vec![0.7]), false).unwrap();
        let mut record = store.get_student("s-9").unwrap();
        record.version = STORAGE_VERSION + 1;
        store.save(&record).unwrap();

        assert!(matches!(store.get_student("s-9"), Err(VerifyError::Storage(_))));
    }

    #[test]
    fn saves_leave_no_temp_files() {
        let (_tmp, store) = store();
        store.add_or_update("Kay", "s-9", FaceDescriptor::new(vec![0.7]), false).unwrap();
        store.add_or_update("Kay", "s-9", FaceDescriptor::new(vec![0.8]), false).unwrap();

        let names: Vec<String> = fs::read_dir(store.data_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["s-9.bincode"]);
    }

    #[test]
    fn lists_students_sorted() {
        let (_tmp, store) = store();
        store.add_or_update("Zed", "b", FaceDescriptor::new(vec![1.0]), false).unwrap();
        store.add_or_update("Amy", "a", FaceDescriptor::new(vec![2.0]), false).unwrap();

        let ids: Vec<String> = store.list_students().unwrap().into_iter().map(|s| s.student_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
