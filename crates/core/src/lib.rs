pub mod config;
pub mod error;
pub mod model;
pub mod resolve;

pub use config::{load_dotenv, resolve_config_path, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};
pub use error::*;
pub use model::*;
pub use resolve::*;
