mod backend;
mod name;
mod stream;

pub use backend::{HttpNameBackend, MemoryNameBackend, NameBackend};
pub use name::{Revision, StreamName};
pub use stream::MutableStream;
