//! Team progress engine.
//!
//! Caches team progress records for online and pinned members, applies
//! progress updates and completions, moves members between teams and
//! persists everything through a [`teamprog_storage::Backend`].

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
mod loader;
mod mutator;
pub mod observer;
pub mod pin;
mod propagator;
pub mod splitter;
mod writer;

pub use cache::ProgressCache;
pub use config::EngineConfig;
pub use engine::ProgressEngine;
pub use error::{EngineError, Result};
pub use observer::TracingObserver;
pub use pin::{CacheFreeingOption, PinCounts, PinKind, PinTable};
pub use splitter::{distribute, SubProgress};
