//! Hub client: credential exchange, hub transports and the connection
//! manager that drives a [`session::SessionState`] over a live connection.

pub mod auth;
pub mod connection;
pub mod handle;
pub mod memory;
pub mod transport;
pub mod ws;

pub use auth::AuthGate;
pub use connection::{ConnectionManager, ConnectionOptions, ReconnectPolicy};
pub use handle::SessionHandle;
pub use memory::{MemoryHub, MemoryLink, MemoryTransport};
pub use transport::{HubTransport, hub_url};
pub use ws::WebSocketTransport;
