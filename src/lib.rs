pub mod error;
pub mod config;
pub mod security;
pub mod identity;
pub mod storage;
pub mod risk;
pub mod journey;
pub mod server;
