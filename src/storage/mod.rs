pub mod attendance;
pub mod student_store;

pub use attendance::{checkin_url, ActiveSession, AttendanceBook, AttendanceRecord, CheckIn};
pub use student_store::{StudentRecord, StudentStore};

use crate::common::Result;
use std::fs;
use std::path::Path;

/// Write through a sibling temp file and rename, so readers never see a
/// half-written record.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
