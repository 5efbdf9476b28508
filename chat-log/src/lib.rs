mod file_store;
mod memory_store;
mod metadata;

pub use file_store::FileLogStore;
pub use memory_store::InMemoryLogStore;
pub use metadata::{Metadata, MetadataStore};
