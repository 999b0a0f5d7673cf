//! Bus adapters.
//!
//! Implementations of the publish/subscribe port for different
//! environments:
//!
//! - `InMemoryBus` - Synchronous, in-process bus for testing
//! - `RedisBusAdapter` - Redis pub/sub with a reconnecting dispatch loop

mod in_memory;
mod redis;

pub use in_memory::InMemoryBus;
pub use redis::RedisBusAdapter;
