pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_config, resolve_config_path, CONFIG_PATH_ENV};
pub use models::*;
pub use validation::{is_regex_pattern, validate, ValidationError};
