pub mod api;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;
pub mod validate;

pub use directory::{CustomerDirectory, InMemoryDirectory};
pub use dispatcher::Dispatcher;
pub use error::{DirectoryError, RegistryError};
pub use registry::{RegisteredTool, ToolRegistry};
pub use server::{start, ServerConfig, ServerHandle};
pub use session::SessionState;
pub use tools::register_builtin_tools;
pub use transport::{FrameStream, OpenedSession, SessionHandle, SessionTransport, TransportConfig};
