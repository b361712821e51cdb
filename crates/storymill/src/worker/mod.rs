//! Background workers pulling jobs from the persisted queue.

pub mod poller;

pub use poller::WorkerPool;
