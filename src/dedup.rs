//! Detection of repeated cell broadcasts.
//!
//! Networks repeat broadcasts periodically for as long as an alert is active, and a device moving
//! between cells will usually hear the same alert several times. A broadcast counts as a repeat
//! when one with the same service category, serial number, location and text was received less
//! than twelve hours before it.

use crate::store::{Row, Store};
use crate::{Location, Message};
use std::collections::VecDeque;
use std::sync::Mutex;

/// How long a received broadcast suppresses its repeats, in milliseconds.
pub const WINDOW_MILLIS: i64 = 12 * 60 * 60 * 1000;

/// The part of a broadcast that identifies it for duplicate detection.
///
/// Equality ignores `delivery_time`: two deliveries of the same broadcast are equal no matter
/// when they arrived. The delivery time only decides whether an identity is still inside the
/// window.
#[derive(Debug, Clone)]
pub struct BroadcastIdentity {
    pub service_category: i32,
    pub serial_number: i32,
    pub location: Location,
    pub message_body: Option<String>,
    pub delivery_time: i64,
}

impl PartialEq for BroadcastIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.service_category == other.service_category
            && self.serial_number == other.serial_number
            && self.location == other.location
            && self.message_body == other.message_body
    }
}

impl Eq for BroadcastIdentity {}

impl From<&Message> for BroadcastIdentity {
    fn from(m: &Message) -> Self {
        Self {
            service_category: m.service_category,
            serial_number: m.serial_number,
            location: m.location.clone(),
            message_body: m.message_body.clone(),
            delivery_time: m.delivery_time,
        }
    }
}

impl From<Row> for BroadcastIdentity {
    fn from(row: Row) -> Self {
        Self {
            service_category: row.service_category.unwrap_or(-1),
            serial_number: row.serial_number.unwrap_or(-1),
            location: Location {
                plmn: row.plmn,
                lac: row.lac.unwrap_or(-1),
                cid: row.cid.unwrap_or(-1),
            },
            message_body: row.message_body,
            delivery_time: row.delivery_time.unwrap_or(-1),
        }
    }
}

/// Whether a [`DuplicateFilter`] has been seeded from the store yet.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FilterState {
    Cold,
    Warm,
}

/// Remembers the broadcasts received in the last twelve hours, newest first.
#[derive(Debug)]
pub struct DuplicateFilter {
    window: VecDeque<BroadcastIdentity>,
    state: FilterState,
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(8),
            state: FilterState::Cold,
        }
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    /// The identities currently remembered, newest first.
    pub fn window(&self) -> impl ExactSizeIterator<Item = &BroadcastIdentity> {
        self.window.iter()
    }

    /// Replace the window with every broadcast the store received in the twelve hours before
    /// `now`.
    ///
    /// A store which can't be read leaves the filter with an empty window. Either way the filter
    /// is warm afterwards.
    pub fn load_recent_window<S: Store + ?Sized>(&mut self, store: &S, now: i64) {
        self.window.clear();
        self.state = FilterState::Warm;

        match store.delivered_after(now.saturating_sub(WINDOW_MILLIS)) {
            Ok(rows) => {
                self.window.extend(rows.into_iter().map(BroadcastIdentity::from));
                log::info!(
                    "loaded {} broadcasts from the last 12 hours",
                    self.window.len()
                );
            }
            Err(e) => {
                log::error!("failed to load recent broadcasts, starting empty: {}", e);
            }
        }
    }

    /// Has this broadcast already been received within the window?
    ///
    /// If not, it is added to the front of the window, and every entry twelve hours or more
    /// older than it is forgotten. A duplicate leaves the window as it was.
    ///
    /// A broadcast stamped earlier than the newest entry is treated as delivered at the same time
    /// as that entry, so the window stays ordered newest first.
    pub fn is_duplicate(&mut self, message: &Message) -> bool {
        if self.state == FilterState::Cold {
            log::warn!("duplicate check before the recent window was loaded");
        }

        let mut candidate = BroadcastIdentity::from(message);
        if let Some(newest) = self.window.front() {
            if candidate.delivery_time < newest.delivery_time {
                log::debug!(
                    "broadcast {}/{} stamped {} arrived after one stamped {}",
                    candidate.service_category,
                    candidate.serial_number,
                    candidate.delivery_time,
                    newest.delivery_time
                );
                candidate.delivery_time = newest.delivery_time;
            }
        }

        let mut retained = 0;
        let mut duplicate = false;
        for entry in self.window.iter() {
            if candidate.delivery_time.saturating_sub(entry.delivery_time) >= WINDOW_MILLIS {
                break;
            }
            retained += 1;
            if *entry == candidate {
                duplicate = true;
                break;
            }
        }

        if duplicate {
            return true;
        }

        // everything past the first stale entry is older still
        self.window.truncate(retained);
        self.window.push_front(candidate);
        false
    }
}

/// A [`DuplicateFilter`] that can be shared between threads.
///
/// The scan and the update of the window happen under one lock, so two concurrent deliveries of
/// the same broadcast can't both be accepted.
#[derive(Debug, Default)]
pub struct SharedDuplicateFilter(Mutex<DuplicateFilter>);

impl SharedDuplicateFilter {
    pub fn new(filter: DuplicateFilter) -> Self {
        Self(Mutex::new(filter))
    }

    pub fn load_recent_window<S: Store + ?Sized>(&self, store: &S, now: i64) {
        let mut filter = match self.0.lock() {
            Ok(filter) => filter,
            Err(poisoned) => {
                log::warn!("recovering duplicate filter after a panic");
                poisoned.into_inner()
            }
        };
        filter.load_recent_window(store, now);
        self.0.clear_poison();
    }

    /// Check and record a broadcast.
    ///
    /// If the filter can't be consulted the broadcast is treated as new: showing an alert twice
    /// is better than not showing it.
    pub fn is_duplicate(&self, message: &Message) -> bool {
        match self.0.lock() {
            Ok(mut filter) => filter.is_duplicate(message),
            Err(e) => {
                log::error!(
                    "duplicate filter unavailable ({}), treating broadcast {}/{} as new",
                    e,
                    message.service_category,
                    message.serial_number
                );
                false
            }
        }
    }

    pub fn state(&self) -> Option<FilterState> {
        self.0.lock().ok().map(|f| f.state())
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|f| f.window.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
