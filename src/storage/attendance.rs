use crate::common::{VerifyError, Result};
use crate::storage::student_store::timestamp;
use crate::storage::write_atomic;
use rand::RngCore;
use serde::{Serialize, Deserialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The check-in session students are currently allowed to join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub token: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub student_id: String,
    pub timestamp: String,
    pub session_id: String,
    pub face_verified: bool,
    pub voice_verified: bool,
    /// Serialized verification results, kept for audit.
    #[serde(default)]
    pub verification_data: String,
}

/// A check-in request as submitted by the student-facing flow.
#[derive(Debug, Clone)]
pub struct CheckIn {
    pub session_token: String,
    pub name: String,
    pub student_id: String,
    pub face_verified: bool,
    pub voice_verified: bool,
    pub verification_data: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AttendanceFile {
    active: Option<ActiveSession>,
    records: Vec<AttendanceRecord>,
}

/// Attendance log plus the active session token, persisted as one file.
pub struct AttendanceBook {
    path: PathBuf,
    data: AttendanceFile,
}

impl AttendanceBook {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            bincode::deserialize(&bytes)
                .map_err(|e| VerifyError::Storage(format!("Failed to deserialize attendance: {}", e)))?
        } else {
            AttendanceFile::default()
        };

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn active_session(&self) -> Option<&ActiveSession> {
        self.data.active.as_ref()
    }

    pub fn start_session(&mut self) -> Result<ActiveSession> {
        let session = ActiveSession {
            token: generate_token(),
            created_at: timestamp(),
        };
        self.data.active = Some(session.clone());
        self.save()?;
        tracing::info!("Started check-in session created at {}", session.created_at);
        Ok(session)
    }

    /// Replace the token; links handed out for the old one stop working.
    pub fn rotate_session(&mut self) -> Result<ActiveSession> {
        if self.data.active.is_none() {
            tracing::debug!("Rotating with no active session, starting a new one");
        }
        self.start_session()
    }

    pub fn check_in(&mut self, request: CheckIn) -> Result<AttendanceRecord> {
        let active = self
            .data
            .active
            .as_ref()
            .filter(|s| s.token == request.session_token)
            .ok_or(VerifyError::InvalidSessionToken)?;

        let name = request.name.trim();
        let student_id = request.student_id.trim();
        if name.is_empty() {
            return Err(VerifyError::InvalidInput("please enter your name".into()));
        }
        if student_id.is_empty() {
            return Err(VerifyError::InvalidInput("please enter your student id".into()));
        }
        if !request.face_verified {
            return Err(VerifyError::FaceVerificationRequired);
        }

        let record = AttendanceRecord {
            name: name.to_string(),
            student_id: student_id.to_string(),
            timestamp: timestamp(),
            session_id: active.token.clone(),
            face_verified: request.face_verified,
            voice_verified: request.voice_verified,
            verification_data: request.verification_data,
        };

        self.data.records.push(record.clone());
        self.save()?;
        tracing::info!("Checked in {} (voice_verified={})", record.student_id, record.voice_verified);
        Ok(record)
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<&AttendanceRecord> {
        self.data.records.iter().rev().take(limit).collect()
    }

    pub fn total(&self) -> usize {
        self.data.records.len()
    }

    pub fn export_csv<W: Write>(&self, mut out: W) -> Result<()> {
        writeln!(out, "name,student_id,timestamp_utc,session_id,face_verified,voice_verified")?;
        for r in &self.data.records {
            writeln!(
                out,
                "{},{},{},{},{},{}",
                csv_field(&r.name),
                csv_field(&r.student_id),
                csv_field(&r.timestamp),
                csv_field(&r.session_id),
                r.face_verified,
                r.voice_verified,
            )?;
        }
        out.flush()?;
        Ok(())
    }

    /// Drop every record. The active session stays valid.
    pub fn clear(&mut self) -> Result<usize> {
        let removed = self.data.records.len();
        self.data.records.clear();
        self.save()?;
        tracing::warn!("Attendance cleared ({} records removed)", removed);
        Ok(removed)
    }

    /// Link students open to check in to the active session.
    pub fn checkin_url(&self, base_url: &str) -> Option<String> {
        self.active_session()
            .map(|active| checkin_url(base_url, &active.token))
    }

    fn save(&self) -> Result<()> {
        let encoded = bincode::serialize(&self.data)
            .map_err(|e| VerifyError::Storage(format!("Failed to serialize attendance: {}", e)))?;
        write_atomic(&self.path, &encoded)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn checkin_url(base_url: &str, token: &str) -> String {
    format!("{}/checkin/{}", base_url.trim_end_matches('/'), token)
}

fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
