//! karaqueue library crate.
//!
//! A shared karaoke queue: users add media URLs, each item is fetched,
//! pitch-shifted and published as an embeddable page, and playback walks the
//! queue in order.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod queue;
pub mod services;
pub mod session;
pub mod source;
pub mod transform;
pub mod utils;

pub use error::{Error, Result};
