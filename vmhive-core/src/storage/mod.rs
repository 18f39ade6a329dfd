//! Node-local persistent storage

pub mod local;

pub use local::LocalDatabase;
