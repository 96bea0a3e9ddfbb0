//! Padel court availability watcher.
//!
//! Each check cycle expands the configured watches into query points,
//! scrapes them through external scraper commands, diffs the result against
//! the persisted slot state and pushes a notification for every slot that
//! newly became bookable.

pub mod config;
pub mod diff;
pub mod dispatcher;
pub mod error;
pub mod expander;
pub mod notifier;
pub mod report;
pub mod scheduler;
pub mod scrape;
pub mod snapshot;
pub mod source;
pub mod state_store;
pub mod targets;

pub use config::{load_settings, Config, Settings};
pub use error::{WatchError, WatchResult};
pub use notifier::{Notifier, NtfyNotifier};
pub use scheduler::{CheckScheduler, CycleReport, CycleRunner, SchedulerState};
pub use source::{CommandSlotSource, RoutedSlotSource, SlotSource};
pub use state_store::{JsonFileStore, MemoryStore, StateStore};
pub use targets::{TargetDescriptor, TargetRegistry};
