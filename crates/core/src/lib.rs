pub mod model;
pub mod error;
pub mod config;
pub mod telemetry;
pub mod kv;
pub mod mime;
pub mod enumerate;
pub mod resolver;
pub mod aggregate;
pub mod store;
pub mod remote;
pub mod manifest;
pub mod defaults;
pub mod context;
pub mod sync;
pub mod export;
pub mod search;

pub use model::*;
pub use error::{CoreError, EnumerationError, Result};
pub use config::EngineConfig;
pub use aggregate::{Aggregator, Listing, Page};
pub use context::Context;
pub use resolver::{AddressScheme, DirectoryResolver, PermissionDialog};
pub use store::CategoryStore;
pub use sync::{LoadOutcome, SyncCoordinator, SyncState};
