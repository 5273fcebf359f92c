pub mod config;
pub mod error;
pub mod file_config;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::SieveError;
pub use file_config::{FileConfig, ThreadsConfig};
pub use store::{ArticleStore, DigestStore, RunLockStore, ThreadStore};
pub use types::*;
