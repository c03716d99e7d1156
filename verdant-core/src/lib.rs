//! verdant-core: the local persistent data service for the verdant
//! cultivation tracker.
//!
//! One SQLite file holds every tenant's data; [`DataService`] is the single
//! handle over it. Opening the service bootstraps or migrates the schema,
//! then exposes:
//!
//! - per-entity repositories with a TTL read cache and owner-scoped queries
//! - a transactional executor with retry, backoff, and an operation deadline
//! - error classification and a rolling health score
//! - checksummed whole-file backups with retention rotation and safe restore
//! - schema-driven JSON export and import
//!
//! ```no_run
//! use verdant_core::{Config, DataService};
//! use verdant_core::types::Room;
//!
//! # fn main() -> verdant_core::Result<()> {
//! let service = DataService::open(Config::load()?)?;
//! let room = service.rooms.create(Room::new("owner-1", "Veg Tent"))?;
//! let rooms = service.rooms.get_all("owner-1")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod types;

pub use config::Config;
pub use db::backup::OptimizeReport;
pub use db::export::ImportReport;
pub use db::monitor::{HealthReport, HealthStatus};
pub use db::perf::ClassStats;
pub use db::DataService;
pub use error::{Error, Result};
