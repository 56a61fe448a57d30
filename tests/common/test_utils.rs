use std::{fs, path::PathBuf};
use term_bloom_rs::{FilterConfig, FilterConfigBuilder};

/// Temporary file named after the test, removed when dropped
pub struct TestDb {
    path: PathBuf,
}

impl TestDb {
    /// redb database file for `test_name`
    pub fn new(test_name: &str) -> Self {
        Self::with_extension(test_name, "redb")
    }

    #[allow(dead_code)]
    pub fn with_extension(test_name: &str, extension: &str) -> Self {
        let path = format!("test_db_{test_name}.{extension}").into();
        let db = Self { path };
        // leftovers from an aborted run
        let _ = fs::remove_file(&db.path);
        db
    }

    #[allow(dead_code)]
    pub fn path(&self) -> PathBuf {
        self.path.clone()
    }

    #[allow(dead_code)]
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[allow(dead_code)]
pub fn test_config(capacity: u64, fpr: f64, retention: u64) -> FilterConfig {
    FilterConfigBuilder::default()
        .capacity(capacity)
        .false_positive_rate(fpr)
        .retention(retention)
        .build()
        .expect("Failed to build test config")
}
