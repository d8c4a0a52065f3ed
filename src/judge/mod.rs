//! Distributed task scheduling over remote sandbox servers.

pub mod pool;
pub mod request;
pub mod task;
pub mod worker;

pub use pool::JudgePool;
pub use request::Request;
pub use task::{Callback, FileIdCell, FileSlot, StdinSource, Task, TaskOutcome};
pub use worker::Judge;
