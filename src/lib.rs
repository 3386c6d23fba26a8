pub mod cache;
pub mod cli;
pub mod config;
pub mod convert;
pub mod detect;
pub mod dom;
pub mod error;
pub mod extract;
pub mod scan;
pub mod watch;

pub use error::{RepricerError, Result};
