//! Configuration loading for the tether gateway.
//!
//! Config files are discovered in the working directory first, then in
//! `~/.config/tether/`. `${ENV_VAR}` placeholders are substituted before
//! parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_or_default_config_path,
        load_config, save_config, set_config_dir, try_discover_and_load, update_config,
    },
    schema::{TetherConfig, WebInterfaceConfig},
};
