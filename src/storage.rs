use crate::error::{FilterError, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Destination for terms that rotate out of the in-memory window.
///
/// Each entry is the output of [`crate::snapshot::encode_term`]. Archiving is
/// a side effect of rotation: in-memory answers never depend on it.
pub trait TermArchive: Send + Sync {
    /// Stores an encoded term. Returns `false` if the term was already
    /// archived, in which case the stored bytes are left untouched.
    fn save_term(&self, term: u64, bytes: &[u8]) -> Result<bool>;
    /// Loads the encoded bytes of a term, if archived
    fn load_term(&self, term: u64) -> Result<Option<Vec<u8>>>;
    fn contains(&self, term: u64) -> Result<bool>;
    /// All archived term numbers in ascending order
    fn terms(&self) -> Result<Vec<u64>>;
}

// In-memory archive implementation
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    terms: RwLock<BTreeMap<u64, Vec<u8>>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TermArchive for InMemoryArchive {
    fn save_term(&self, term: u64, bytes: &[u8]) -> Result<bool> {
        let mut terms = self.terms.write().map_err(|_| {
            FilterError::LockError("Failed to write archive".to_string())
        })?;
        if terms.contains_key(&term) {
            return Ok(false);
        }
        terms.insert(term, bytes.to_vec());
        Ok(true)
    }

    fn load_term(&self, term: u64) -> Result<Option<Vec<u8>>> {
        let terms = self.terms.read().map_err(|_| {
            FilterError::LockError("Failed to read archive".to_string())
        })?;
        Ok(terms.get(&term).cloned())
    }

    fn contains(&self, term: u64) -> Result<bool> {
        let terms = self.terms.read().map_err(|_| {
            FilterError::LockError("Failed to read archive".to_string())
        })?;
        Ok(terms.contains_key(&term))
    }

    fn terms(&self) -> Result<Vec<u64>> {
        let terms = self.terms.read().map_err(|_| {
            FilterError::LockError("Failed to read archive".to_string())
        })?;
        Ok(terms.keys().copied().collect())
    }
}
