//! haconf core library — configuration generation model, desired-state file, errors.
//!
//! - [`types`] — desired state and build artifacts
//! - [`config`] — [`Config`], one generation, and its build phases
//! - [`state`] — load / save the desired-state YAML
//! - [`error`] — [`BuildError`], [`StateError`]

pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use config::Config;
pub use error::{BuildError, StateError};
pub use types::{
    Backend, BackendId, BackendMaps, BackendMode, DesiredState, Endpoint, Frontend,
    FrontendGroup, Global, Host, HostPath, HostTls, MapEntry, MapFile,
};
