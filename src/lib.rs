pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod hal;
pub mod reactor;
