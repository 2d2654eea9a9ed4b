//! TaskPod Control Plane Library
//!
//! This crate drives task runs through their lifecycle: provisioning typed
//! inputs, dispatching to the cluster orchestrator, following pod events and
//! reconciling the results archive into typed outputs.

pub mod archive;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod persistence;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod storage;
pub mod watcher;

pub use config::Config;
pub use error::{AppError, ErrorCode, ProvisioningError};
pub use scheduler::{ChannelScheduler, Schedule, Scheduler};
pub use service::{ProvisioningService, StateAction, TaskRunResponse, TaskService, TypeContext};
pub use state::AppState;
pub use storage::{FileStorageHandler, FileSystemStorage};
pub use watcher::{PodAction, PodEvent, PodWatcher};
