#![warn(missing_docs)]

//! CloudPool rclone subsystem: per-account remotes, union composition and
//! mount control, all driven through the [`ToolRunner`] capability.

pub mod config;
pub mod error;
pub mod mount;
pub mod remote;
pub mod runner;
pub mod union;

pub use config::ToolConfig;
pub use error::{RcloneError, Result};
pub use mount::{MountController, MountOptions};
pub use remote::{parse_about_json, ProviderType, QuotaInfo, RemoteConnector, RemoteHandle};
pub use runner::{Invocation, MockToolRunner, SubprocessRunner, ToolOutput, ToolRunner};
pub use union::{
    ChunkHandle, ChunkOptions, ComposedUnion, Strategy, UnionComposer, UnionHandle, UnionPolicy,
    UpstreamAccount,
};
