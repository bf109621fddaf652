//! Command implementations

pub mod source;
pub mod watch;
