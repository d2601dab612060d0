pub mod engine;
pub mod lifecycle;
pub mod operations;

pub use engine::{StoreContext, StoreEngine};
pub use lifecycle::StoreLifecycle;
pub use operations::StoreOperations;

#[cfg(test)]
mod tests;
