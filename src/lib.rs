pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod market;
pub mod output;
pub mod server;
pub mod types;
