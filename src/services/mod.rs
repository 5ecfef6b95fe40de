pub mod executor;
pub mod gate;
pub mod notifier;
pub mod processor;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker;
