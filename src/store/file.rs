use super::{Row, RowId, RowSelection, Store, StoreError, Table};
use crate::Message;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A store kept in a JSON file.
///
/// The whole table is held in memory and the file is rewritten after every change. Writes go to
/// a temporary file which then replaces the original, so a crash never leaves a torn file
/// behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    table: Mutex<Table>,
}

impl FileStore {
    /// Open the store at `path`, creating it on first write if it doesn't exist yet.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        let table = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("no store at {:?}, starting empty", path);
                Table::default()
            }
            Err(e) => return Err(e.into()),
        };
        log::info!("opened store {:?} with {} rows", path, table.rows.len());

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> Result<MutexGuard<'_, Table>, StoreError> {
        self.table
            .lock()
            .map_err(|_| StoreError::Unavailable(format!("{:?} poisoned", self.path)))
    }

    /// Apply a change to a copy of the table, and keep it only once it's on disk.
    fn update<T, F: FnOnce(&mut Table) -> T>(&self, change: F) -> Result<T, StoreError> {
        let mut table = self.table()?;
        let mut updated = table.clone();
        let result = change(&mut updated);
        self.write(&updated)?;
        *table = updated;
        Ok(result)
    }

    fn write(&self, table: &Table) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, serde_json::to_vec(table)?)?;
        std::fs::rename(&tmp, &self.path)?;
        log::trace!("wrote {} rows to {:?}", table.rows.len(), self.path);
        Ok(())
    }
}

impl Store for FileStore {
    fn insert(&self, message: &Message) -> Result<RowId, StoreError> {
        self.update(|table| table.insert(message))
    }

    fn delivered_after(&self, time: i64) -> Result<Vec<Row>, StoreError> {
        Ok(self.table()?.delivered_after(time))
    }

    fn live_rows(&self) -> Result<Vec<Row>, StoreError> {
        Ok(self.table()?.live_rows())
    }

    fn mark_deleted(&self, selection: RowSelection) -> Result<usize, StoreError> {
        self.update(|table| table.mark_deleted(selection))
    }

    fn purge_marked_before(&self, time: i64) -> Result<usize, StoreError> {
        self.update(|table| table.purge_marked_before(time))
    }
}
