mod client;
mod client_config;

pub use client::C3Client;
pub use client_config::C3ClientConfig;
