use directories::ProjectDirs;
use std::path::PathBuf;
use crate::common::error::{VerifyError, Result};

// Installed locations; DevMode swaps the data dir for ./dev_data

pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("checkin-verify").join("config.toml"))
}

pub fn user_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "checkin", "CheckinVerify")
        .ok_or_else(|| VerifyError::Storage("Failed to get project dirs".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn students_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("students")
}

pub fn attendance_file(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("attendance.bincode")
}
