pub mod audio;
pub mod config;
pub mod error;
pub mod logging;

pub use config::HostConfig;
pub use error::{Error, Result};
