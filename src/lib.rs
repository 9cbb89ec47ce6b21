#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod gemtext;
pub mod media;
pub mod nav;
pub mod response;
pub mod session;
pub mod uri;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use nav::{Dispatcher, Notice, Shell};
