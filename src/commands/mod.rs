//! Command implementations for repricer CLI

mod misc;
mod scan;
mod settings;

pub use misc::*;
pub use scan::*;
pub use settings::*;
