use std::path::PathBuf;
use std::fs;
use crate::common::error::Result;
use crate::common::paths;

#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(&base_dir)?;
            fs::create_dir_all(base_dir.join("students"))?;
            fs::create_dir_all(base_dir.join("exports"))?;

            tracing::info!("Development mode enabled - data will be saved to: {}",
                           base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Root of all persisted data: the local dev tree or the user data dir.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if self.enabled {
            Ok(self.base_dir.clone())
        } else {
            paths::user_data_dir()
        }
    }

    pub fn export_path(&self, prefix: &str) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        if self.enabled {
            self.base_dir.join("exports").join(format!("{}_{}.csv", prefix, timestamp))
        } else {
            PathBuf::from(format!("{}_{}.csv", prefix, timestamp))
        }
    }
}
