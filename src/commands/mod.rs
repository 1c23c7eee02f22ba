pub mod config;
pub mod start;
pub mod token;
pub mod types;
