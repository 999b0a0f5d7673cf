//! Connection hub adapters.
//!
//! Live client connection management and fan-out:
//!
//! - `ConnectionHub` - Connection registry, broadcast, heartbeat, eviction
//! - `ServerMessage`/`ClientMessage` - The live connection wire protocol
//! - `ws_handler`/`hub_router` - axum WebSocket glue

mod connections;
mod handler;
mod messages;

pub use connections::{ClientInfo, ConnectionHub, HubStats};
pub use handler::{hub_router, ws_handler, HubSocketState};
pub use messages::{ClientMessage, ServerMessage};
