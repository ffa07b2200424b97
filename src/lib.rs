pub mod command;
pub mod config;
pub mod logging;
pub mod server;
pub mod storage;
pub mod version;
