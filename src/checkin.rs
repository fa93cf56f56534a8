use crate::capture::{FaceSampleProvider, SpeechEngine};
use crate::common::{VerifyError, Result};
use crate::core::{SpeechMatchResult, VerificationResult, VerificationSession};
use crate::storage::{AttendanceBook, AttendanceRecord, CheckIn, StudentStore};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CheckInRequest {
    pub session_token: String,
    pub student_id: String,
    /// Display name; defaults to the enrolled name.
    pub name: Option<String>,
    pub require_voice: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckInReport {
    pub face: VerificationResult,
    pub voice: Option<SpeechMatchResult>,
    pub record: Option<AttendanceRecord>,
}

impl CheckInReport {
    pub fn checked_in(&self) -> bool {
        self.record.is_some()
    }
}

/// Verify a student's face (and optionally voice) and record attendance.
///
/// A failed face match is reported, not raised; nothing is written to the
/// attendance book in that case. Device and engine errors propagate.
pub fn run_check_in<F, S>(
    session: &VerificationSession<F, S>,
    store: &StudentStore,
    book: &mut AttendanceBook,
    request: &CheckInRequest,
    mut on_challenge: impl FnMut(&str),
) -> Result<CheckInReport>
where
    F: FaceSampleProvider,
    S: SpeechEngine,
{
    // Stale links fail before the camera is touched
    let token_ok = book
        .active_session()
        .is_some_and(|active| active.token == request.session_token);
    if !token_ok {
        return Err(VerifyError::InvalidSessionToken);
    }

    let student = store.get_student(&request.student_id)?;
    session.set_enrolled(student.descriptor.clone());

    let face = session.verify_enrolled()?;
    if !face.verified {
        tracing::info!("Check-in refused for {}: face not verified", student.student_id);
        return Ok(CheckInReport { face, voice: None, record: None });
    }

    let voice = if request.require_voice {
        session.reset();
        let phrase = session.new_challenge();
        on_challenge(&phrase);
        Some(session.listen_for_phrase()?)
    } else {
        None
    };

    let voice_verified = voice.as_ref().map(|v| v.matched).unwrap_or(false);
    if request.require_voice && !voice_verified {
        tracing::info!("Check-in refused for {}: phrase not matched", student.student_id);
        return Ok(CheckInReport { face, voice, record: None });
    }

    let verification_data = serde_json::to_string(&serde_json::json!({
        "face": &face,
        "voice": &voice,
    }))?;

    let record = book.check_in(CheckIn {
        session_token: request.session_token.clone(),
        name: request.name.clone().unwrap_or_else(|| student.name.clone()),
        student_id: student.student_id.clone(),
        face_verified: face.verified,
        voice_verified,
        verification_data,
    })?;

    Ok(CheckInReport { face, voice, record: Some(record) })
}
