//! lazyploy core library: domain types, agent configuration, local build store.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`CoreError`]
//! - [`config`]: [`AgentConfig`] load / save
//! - [`store`]: [`BuildLayout`] and [`LocalBuildStore`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::AgentConfig;
pub use error::CoreError;
pub use store::{BuildLayout, LocalBuildStore, COMPLETION_MARKER};
pub use types::{
    BuildDescriptor, BuildId, CompletionMarker, ParseBuildIdError, Platform, PlatformFamily,
    ProjectName,
};
