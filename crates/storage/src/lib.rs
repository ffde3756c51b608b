mod error;
mod memory;
mod record;
mod traits;

pub use error::StoreError;
pub use memory::{empty_collection, MemoryStore};
pub use record::{PushRequest, PushResponse};
pub use traits::ComponentStore;
