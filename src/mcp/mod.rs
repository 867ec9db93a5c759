pub mod client;

pub use client::{connect_servers, McpTool, StdioClient};
