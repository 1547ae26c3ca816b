mod client;

pub use client::{CLIENT_NAME, CLIENT_VERSION, McpClient, client_info, text_from_content};
