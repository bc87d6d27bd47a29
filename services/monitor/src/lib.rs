pub mod case_book;
pub mod channel;
pub mod config;
pub mod control_api;
pub mod devices;
pub mod monitor;
pub mod reads;
pub mod sse;
pub mod store;
pub mod timers;
pub mod ui_events;

pub use case_book::{CaseBook, CaseBookError};
pub use channel::{ChannelEndpoints, EventChannel};
pub use config::{MonitorConfig, load_config_from_path, load_config_from_str};
pub use monitor::{Monitor, MonitorError, MonitorStatus};
pub use reads::ReadAggregator;
pub use store::{KvStore, MemoryStore, SqliteStore, StoreError};
