pub mod queue;
pub mod registry;

pub use queue::MemoryQueueStore;
pub use registry::MemoryRegistry;
