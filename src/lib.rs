mod message;
pub use message::{now_millis, Location, Message};

mod filters;
pub use filters::{Filter, FilterItem};

pub mod channels;
pub use channels::{ChannelRange, ChannelRanges};

pub mod channel_config;
pub use channel_config::{AlertPreferences, ChannelConfig, Network, PreferenceBook};

pub mod dedup;
pub use dedup::{BroadcastIdentity, DuplicateFilter, SharedDuplicateFilter};

pub mod store;
pub use store::{FileStore, MemoryStore, Store};

pub mod retention;

mod intake;
pub use intake::{Alert, Intake, Verdict};

mod settings;
pub use settings::{Settings, SettingsError};

#[cfg(feature = "client")]
pub mod client;

#[cfg(all(feature = "client", feature = "server"))]
mod source;
#[cfg(all(feature = "client", feature = "server"))]
pub use source::{Source, SourceError};

#[cfg(feature = "server")]
pub mod server;
