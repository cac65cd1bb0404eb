use crate::dedup::{DuplicateFilter, SharedDuplicateFilter};
use crate::store::{RowId, Store};
use crate::{ChannelRanges, Message, Network};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A broadcast which passed duplicate detection, ready for presentation.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// The store row, if storing it succeeded
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<RowId>,

    /// Whether this should be presented as an emergency alert rather than a notification
    pub emergency: bool,

    #[serde(flatten)]
    pub message: Message,
}

/// What became of an incoming broadcast.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Verdict {
    Duplicate,
    Accepted(Alert),
}

/// The path every decoded broadcast takes: duplicate check, then storage.
///
/// All methods block on the store.
pub struct Intake {
    filter: SharedDuplicateFilter,
    store: Arc<dyn Store>,
    emergency_ids: BTreeMap<Network, ChannelRanges>,
}

impl std::fmt::Debug for Intake {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Intake")
            .field("filter", &self.filter)
            .field("emergency_ids", &self.emergency_ids)
            .finish_non_exhaustive()
    }
}

impl Intake {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            filter: SharedDuplicateFilter::new(DuplicateFilter::new()),
            store,
            emergency_ids: BTreeMap::new(),
        }
    }

    /// Treat these operator-configured identifiers as emergency alerts too, for broadcasts
    /// arriving over `network`.
    pub fn with_emergency_ids(mut self, network: Network, ids: ChannelRanges) -> Self {
        self.emergency_ids.insert(network, ids);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn filter(&self) -> &SharedDuplicateFilter {
        &self.filter
    }

    /// Seed duplicate detection from the broadcasts already in the store.
    pub fn warm_up(&self, now: i64) {
        self.filter.load_recent_window(self.store.as_ref(), now);
    }

    /// Run a freshly decoded broadcast through duplicate detection, storing it if it's new.
    ///
    /// A broadcast which can't be stored is still accepted: it's better to show an alert that
    /// will be missing from history than to lose it.
    pub fn accept(&self, message: Message) -> Verdict {
        if self.filter.is_duplicate(&message) {
            log::info!(
                "ignoring duplicate broadcast category={} serial={:#06x}",
                message.service_category,
                message.serial_number
            );
            return Verdict::Duplicate;
        }

        let id = match self.store.insert(&message) {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!(
                    "failed to store broadcast category={} serial={:#06x}: {}",
                    message.service_category,
                    message.serial_number,
                    e
                );
                None
            }
        };

        let emergency = match self.emergency_ids.get(&message.network) {
            Some(ids) => crate::channels::is_emergency_alert(&message, ids),
            None => message.is_emergency_alert(),
        };
        log::info!(
            "accepted {} broadcast category={} serial={:#06x} subscription={} delivered={}",
            if emergency { "emergency" } else { "ordinary" },
            message.service_category,
            message.serial_number,
            message.subscription,
            message
                .delivered_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| message.delivery_time.to_string()),
        );

        Verdict::Accepted(Alert {
            id,
            emergency,
            message,
        })
    }
}
