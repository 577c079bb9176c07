mod adapter;
mod app_config;
mod file_config;
mod loader;

pub use adapter::FileConfigAdapter;
pub use app_config::{ActorConfig, AppConfig, LogConfig, SupabaseConfig, SyncConfig};
pub use loader::load;
