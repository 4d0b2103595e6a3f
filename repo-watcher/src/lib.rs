//! # Repo Watcher
//!
//! This crate notifies a consumer when anything inside a set of tracked
//! repository roots changes. Bursts of raw file system events are coalesced
//! into one notification per root, and noise such as build output,
//! dependency caches and VCS object stores is filtered out.
//!
//! ## Features
//!
//! - **Per-root Debouncing**: one notification per root per burst, carrying
//!   the last path seen
//! - **Noise Filtering**: fragment based ignore rules, or a custom predicate
//! - **Dynamic Growth**: directories created after registration are watched
//! - **Metadata Tracking**: `.git/index` and `.git/HEAD` changes surface
//!   branch switches that leave the work tree alone
//! - **Re-armable Reads**: one-item futures for single-threaded host loops
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Repo Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EventSource ──► classify ──► WatchRegistry ──► Debouncer       │
//! │                                                     │           │
//! │                                                     ▼           │
//! │                      ConsumerAdapter ◄────────── EventBus       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repo_watcher::{Delivery, RepoWatcher, WatchConfig};
//!
//! let watcher = RepoWatcher::new(WatchConfig::default())?;
//! watcher.start();
//! watcher.register("~/src/project").await?;
//!
//! let consumer = watcher.consumer();
//! while let Delivery::Item(change) = consumer.next_notification().await {
//!     println!("{} changed", change.root.display());
//! }
//! ```

pub mod adapter;
pub mod bus;
pub mod classify;
pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod registry;
pub mod source;
pub mod watcher;

pub use adapter::{ConsumerAdapter, Delivery, Refresh, StatusProvider, Subscription};
pub use config::{IgnorePredicate, WatchConfig};
pub use error::{PipelineError, Result, WatcherError};
pub use event::{ChangeNotification, RawEvent, RawEventKind};
pub use source::{EventSource, ManualHandle, ManualSource, NotifySource, RawStreams};
pub use watcher::{RepoWatcher, WatcherStats};
