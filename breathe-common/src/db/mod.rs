//! Database initialization and shared schema

pub mod init;

pub use init::init_database;
