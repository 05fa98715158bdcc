pub mod config;
mod index;
mod runtime;

pub use config::RuntimeConfig;
pub use index::{InMemoryIndex, MemoryIndex, MemoryRecord};
pub use runtime::{AgentRuntime, IssuedDelegation, MEMORY_FILENAME, MEMORY_MIME};
