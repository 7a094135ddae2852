pub mod config;
pub mod error;
pub mod types;

pub use config::WaterlogConfig;
pub use error::{Result, WaterlogError};
pub use types::*;
