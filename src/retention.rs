//! Two-phase deletion of stored broadcasts.
//!
//! Deleting a broadcast only flags its row. Flagged rows are physically removed once they are
//! older than the duplicate window, by a sweep which runs before every deletion. Neither step
//! touches the in-memory [`DuplicateFilter`](crate::DuplicateFilter): a broadcast the user deleted
//! is still a broadcast the device has already seen.

use crate::dedup::WINDOW_MILLIS;
use crate::store::{RowId, RowSelection, Store};

/// Remove every row which is flagged deleted and was delivered more than twelve hours before
/// `now`.
///
/// Returns how many rows were removed. Failures are logged and count as nothing removed.
pub fn delete_all_marked<S: Store + ?Sized>(store: &S, now: i64) -> usize {
    match store.purge_marked_before(now.saturating_sub(WINDOW_MILLIS)) {
        Ok(0) => 0,
        Ok(n) => {
            log::debug!("purged {} deleted broadcasts", n);
            n
        }
        Err(e) => {
            log::error!("failed to purge deleted broadcasts: {}", e);
            0
        }
    }
}

/// Flag one stored broadcast as deleted.
///
/// Returns `false` if no such row exists or the store failed.
pub fn mark_item_deleted<S: Store + ?Sized>(store: &S, row_id: RowId, now: i64) -> bool {
    delete_all_marked(store, now);
    match store.mark_deleted(RowSelection::One(row_id)) {
        Ok(0) => {
            log::error!("failed to delete broadcast at row {}", row_id);
            false
        }
        Ok(_) => true,
        Err(e) => {
            log::error!("failed to delete broadcast at row {}: {}", row_id, e);
            false
        }
    }
}

/// Flag every stored broadcast as deleted.
///
/// Returns `false` if there was nothing left to delete or the store failed.
pub fn mark_all_items_deleted<S: Store + ?Sized>(store: &S, now: i64) -> bool {
    delete_all_marked(store, now);
    match store.mark_deleted(RowSelection::AllLive) {
        Ok(0) => {
            log::error!("failed to delete all broadcasts");
            false
        }
        Ok(n) => {
            log::info!("deleted {} broadcasts", n);
            true
        }
        Err(e) => {
            log::error!("failed to delete all broadcasts: {}", e);
            false
        }
    }
}
