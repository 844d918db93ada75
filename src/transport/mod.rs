pub mod memory;
#[cfg(test)]
pub mod testing;
pub mod traits;

pub use memory::MemoryBroker;
pub use traits::{PubSub, Subscription};
