//! CoprHD Block Storage Driver
//!
//! Bridges a cloud block-storage service to a CoprHD storage controller over
//! its REST API. Volumes, snapshots and consistency groups are created by
//! name; host attachment runs through export groups and is handed back to
//! the host as iSCSI, Fibre Channel or ScaleIO connection data.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    Driver Facade (BlockStorageDriver)                 │
//! │        iSCSI            │          FC            │      ScaleIO       │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────────────────┐  │
//! │  │ Name Resolver│  │ Task Waiter  │  │    Export Orchestrator      │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────────┬──────────────┘  │
//! │         └─────────────────┼─────────────────────────┘                 │
//! │                  ┌────────┴────────┐                                  │
//! │                  │ Resource Client │                                  │
//! │                  └────────┬────────┘                                  │
//! ├───────────────────────────┼──────────────────────────────────────────┤
//! │        Auth Gate ── Session (cookie file) ── Transport (HTTPS)        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Driver options and validation
//! - [`transport`]: HTTPS requests, session token and re-authentication
//! - [`client`]: Typed operations per controller resource kind
//! - [`resolver`]: Hierarchical name to id resolution
//! - [`task`]: Polling of asynchronous controller tasks
//! - [`export`]: Host, initiator and export-group reconciliation
//! - [`scaleio`]: ScaleIO gateway lookups
//! - [`driver`]: The block-storage driver facade
//! - [`domain`]: Driver contract and controller wire model
//! - [`error`]: Error types and handling

pub mod client;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod export;
pub mod metrics;
pub mod resolver;
pub mod scaleio;
pub mod task;
pub mod transport;


// Re-export commonly used types
pub use client::ControllerClient;

pub use config::{DriverConfig, ScaleIoGatewayConfig, Scheme};

pub use domain::model::{Itl, Task, TaskState, Volume, VolumeCreateParam};

pub use domain::ports::{
    BlockStorageDriver, BlockStorageDriverRef, CgSnapshotRef, ConnectionInfo, ConsistencyGroupRef,
    Connector, ModelUpdate, Protocol, SnapshotRef, StatusUpdate, TerminationInfo, VolumeRef,
    VolumeStats, VolumeType,
};

pub use driver::{CoprHdDriver, DriverFactory};

pub use error::{Error, Result};

pub use export::{DetachOutcome, ExportOrchestrator, InitiatorSpec};

pub use metrics::DriverMetrics;

pub use resolver::{ResourceKind, ResourcePath, Resolver, TenantRef};

pub use scaleio::ScaleIoGateway;

pub use task::{TaskOutcome, TaskWaiter};

pub use transport::{Session, SessionRef};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
