//! SeaORM-backed inventory tables.
//!
//! The same schema serves both sides of replication; primary and replica are simply two connections, usually to two
//! different databases.

pub mod driver;
pub mod entity;
pub mod migrations;
pub mod store;

pub use driver::DatabaseDriver;
pub use store::SeaStore;
