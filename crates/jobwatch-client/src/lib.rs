pub mod config;
pub mod http;
pub mod ws;

pub use config::ClientConfig;
pub use http::HttpStatusSource;
pub use ws::WsPushTransport;
