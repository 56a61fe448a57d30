use crate::error::{FilterError, Result};
use crate::storage::TermArchive;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

// term number -> output of `snapshot::encode_term`
const TERMS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("terms");

impl From<redb::Error> for FilterError {
    fn from(err: redb::Error) -> Self {
        FilterError::RedbError(Box::new(err))
    }
}

/// Term archive persisted in a redb database file.
pub struct RedbArchive {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbArchive {
    /// Opens the database at `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Arc::new(Database::create(&path).map_err(redb::Error::from)?);

        // make sure readers never see a missing table
        let write_txn = db.begin_write().map_err(redb::Error::from)?;
        write_txn
            .open_table(TERMS_TABLE)
            .map_err(redb::Error::from)?;
        write_txn.commit().map_err(redb::Error::from)?;

        debug!(path = %path.display(), "Opened term archive");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TermArchive for RedbArchive {
    fn save_term(&self, term: u64, bytes: &[u8]) -> Result<bool> {
        let write_txn = self.db.begin_write().map_err(redb::Error::from)?;
        let inserted = {
            let mut table = write_txn
                .open_table(TERMS_TABLE)
                .map_err(redb::Error::from)?;
            let exists =
                table.get(term).map_err(redb::Error::from)?.is_some();
            if !exists {
                table.insert(term, bytes).map_err(redb::Error::from)?;
            }
            !exists
        };
        write_txn.commit().map_err(redb::Error::from)?;
        Ok(inserted)
    }

    fn load_term(&self, term: u64) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = read_txn
            .open_table(TERMS_TABLE)
            .map_err(redb::Error::from)?;
        let bytes = table
            .get(term)
            .map_err(redb::Error::from)?
            .map(|guard| guard.value().to_vec());
        Ok(bytes)
    }

    fn contains(&self, term: u64) -> Result<bool> {
        let read_txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = read_txn
            .open_table(TERMS_TABLE)
            .map_err(redb::Error::from)?;
        let exists = table.get(term).map_err(redb::Error::from)?.is_some();
        Ok(exists)
    }

    fn terms(&self) -> Result<Vec<u64>> {
        let read_txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = read_txn
            .open_table(TERMS_TABLE)
            .map_err(redb::Error::from)?;

        let mut terms = Vec::new();
        for entry in table.iter().map_err(redb::Error::from)? {
            let (term, _) = entry.map_err(redb::Error::from)?;
            terms.push(term.value());
        }
        Ok(terms)
    }
}

impl std::fmt::Debug for RedbArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbArchive")
            .field("path", &self.path)
            .finish()
    }
}
