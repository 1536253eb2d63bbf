pub mod config;
pub mod connection;
pub mod context;
pub mod errors;
pub mod traits;
pub mod types;
pub mod wire;
