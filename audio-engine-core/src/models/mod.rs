pub mod buffer;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod format;
pub mod object_id;
pub mod state;
