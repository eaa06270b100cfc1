//! Concurrency primitives shared by the protocol layers.

mod waiting_queue;

pub use waiting_queue::WaitingQueue;
