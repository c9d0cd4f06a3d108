pub mod config;
pub mod error;
pub mod file_config;
pub mod merge;
pub mod types;

pub use config::Config;
pub use error::ParseEnumError;
pub use file_config::Settings;
pub use merge::Merge;
pub use types::*;
