pub mod agent;
pub mod api;
pub mod cli;
pub mod core;
pub mod mcp;
pub mod tools;
pub mod ui;
pub mod utils;
