pub mod connection;
pub mod manager;
pub mod sse;

pub use connection::{ClientConfig, Connection};
pub use manager::ConnectionManager;
pub use sse::{FrameDecoder, FrameReader};
