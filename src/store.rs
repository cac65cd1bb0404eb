//! Persistent storage of received broadcasts.

use crate::Message;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

mod file;
pub use file::FileStore;

pub type RowId = u64;

/// A stored broadcast.
///
/// Columns are nullable: rows written by older versions, or by other writers, may lack any of
/// them.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: RowId,
    #[serde(default)]
    pub plmn: Option<String>,
    #[serde(default)]
    pub lac: Option<i32>,
    #[serde(default)]
    pub cid: Option<i32>,
    #[serde(default)]
    pub delivery_time: Option<i64>,
    #[serde(default)]
    pub service_category: Option<i32>,
    #[serde(default)]
    pub serial_number: Option<i32>,
    #[serde(default)]
    pub message_body: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl Row {
    fn new(id: RowId, m: &Message) -> Self {
        Self {
            id,
            plmn: m.location.plmn.clone(),
            lac: Some(m.location.lac),
            cid: Some(m.location.cid),
            delivery_time: Some(m.delivery_time),
            service_category: Some(m.service_category),
            serial_number: Some(m.serial_number),
            message_body: m.message_body.clone(),
            deleted: false,
        }
    }

    /// A missing delivery time reads as -1, like the other sentinels.
    fn delivered(&self) -> i64 {
        self.delivery_time.unwrap_or(-1)
    }
}

/// Which rows a [`Store::mark_deleted`] call applies to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RowSelection {
    One(RowId),
    AllLive,
}

/// A place to keep received broadcasts.
///
/// Every method may block on I/O, so async callers should run them on a blocking thread.
pub trait Store: Send + Sync {
    /// Store a new broadcast, returning its row ID.
    fn insert(&self, message: &Message) -> Result<RowId, StoreError>;

    /// Every row delivered strictly after `time`, deleted or not, newest first.
    fn delivered_after(&self, time: i64) -> Result<Vec<Row>, StoreError>;

    /// Every row not marked deleted, newest first.
    fn live_rows(&self) -> Result<Vec<Row>, StoreError>;

    /// Flag rows as deleted without removing them, returning how many rows changed.
    fn mark_deleted(&self, selection: RowSelection) -> Result<usize, StoreError>;

    /// Remove rows which are flagged deleted and were delivered before `time`, returning how
    /// many were removed.
    fn purge_marked_before(&self, time: i64) -> Result<usize, StoreError>;
}

impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    fn insert(&self, message: &Message) -> Result<RowId, StoreError> {
        (**self).insert(message)
    }

    fn delivered_after(&self, time: i64) -> Result<Vec<Row>, StoreError> {
        (**self).delivered_after(time)
    }

    fn live_rows(&self) -> Result<Vec<Row>, StoreError> {
        (**self).live_rows()
    }

    fn mark_deleted(&self, selection: RowSelection) -> Result<usize, StoreError> {
        (**self).mark_deleted(selection)
    }

    fn purge_marked_before(&self, time: i64) -> Result<usize, StoreError> {
        (**self).purge_marked_before(time)
    }
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Format(serde_json::Error),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store I/O failed: {}", e),
            StoreError::Format(e) => write!(f, "store contents are malformed: {}", e),
            StoreError::Unavailable(why) => write!(f, "store unavailable: {}", why),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Format(e) => Some(e),
            StoreError::Unavailable(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Format(e)
    }
}

/// The rows themselves, shared by [`MemoryStore`] and [`FileStore`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct Table {
    next_id: RowId,
    rows: Vec<Row>,
}

impl Table {
    fn insert(&mut self, message: &Message) -> RowId {
        self.next_id = self.next_id.max(self.rows.iter().map(|r| r.id).max().unwrap_or(0)) + 1;
        let id = self.next_id;
        self.rows.push(Row::new(id, message));
        id
    }

    fn newest_first<F: Fn(&Row) -> bool>(&self, predicate: F) -> Vec<Row> {
        let mut rows: Vec<Row> = self.rows.iter().filter(|r| predicate(r)).cloned().collect();
        rows.sort_by(|a, b| b.delivered().cmp(&a.delivered()).then(b.id.cmp(&a.id)));
        rows
    }

    fn delivered_after(&self, time: i64) -> Vec<Row> {
        self.newest_first(|r| r.delivered() > time)
    }

    fn live_rows(&self) -> Vec<Row> {
        self.newest_first(|r| !r.deleted)
    }

    fn mark_deleted(&mut self, selection: RowSelection) -> usize {
        let mut changed = 0;
        for row in self.rows.iter_mut() {
            let selected = match selection {
                RowSelection::One(id) => row.id == id,
                RowSelection::AllLive => !row.deleted,
            };
            if selected {
                row.deleted = true;
                changed += 1;
            }
        }
        changed
    }

    fn purge_marked_before(&mut self, time: i64) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| !(r.deleted && r.delivered() < time));
        before - self.rows.len()
    }
}

/// A store which lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store around existing rows, e.g. ones with missing columns.
    pub fn with_rows<I: IntoIterator<Item = Row>>(rows: I) -> Self {
        let rows: Vec<Row> = rows.into_iter().collect();
        let next_id = rows.iter().map(|r| r.id).max().unwrap_or(0);
        Self {
            table: Mutex::new(Table { next_id, rows }),
        }
    }

    fn table(&self) -> Result<MutexGuard<'_, Table>, StoreError> {
        self.table
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn insert(&self, message: &Message) -> Result<RowId, StoreError> {
        Ok(self.table()?.insert(message))
    }

    fn delivered_after(&self, time: i64) -> Result<Vec<Row>, StoreError> {
        Ok(self.table()?.delivered_after(time))
    }

    fn live_rows(&self) -> Result<Vec<Row>, StoreError> {
        Ok(self.table()?.live_rows())
    }

    fn mark_deleted(&self, selection: RowSelection) -> Result<usize, StoreError> {
        Ok(self.table()?.mark_deleted(selection))
    }

    fn purge_marked_before(&self, time: i64) -> Result<usize, StoreError> {
        Ok(self.table()?.purge_marked_before(time))
    }
}
