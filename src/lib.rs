//! Radar - resource check coordination for CI pipelines
//!
//! Content-addressed resource configs and caches, reference-counted uses,
//! store-mediated checking locks, the version scanner and the garbage
//! collectors that prune what nothing uses any more.

pub mod audit;
pub mod cache;
pub mod checker;
pub mod cli;
pub mod config;
pub mod error;
pub mod gc;
pub mod lock;
pub mod pipeline;
pub mod resource;
pub mod scanner;
pub mod session;
pub mod store;

pub use error::{RadarError, RadarResult};
