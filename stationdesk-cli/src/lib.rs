//! Spreadsheet-backed station asset store
//!
//! A directory of Excel workbooks acts as a schema-flexible database for
//! infrastructure stations, lookups and repair logs. The [`repository`] layer
//! puts a backend-agnostic interface in front of the file store and an
//! optional document mirror, and the [`worker`] services the command surface
//! on a dedicated thread.

pub mod config;
pub mod excel;
pub mod repository;
pub mod store;
pub mod worker;

pub use config::{AppConfig, ConfigHandle, Paths};
pub use excel::{HeaderPair, Record};
pub use repository::RepositoryFacade;
pub use store::OperationResult;
