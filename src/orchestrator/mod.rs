pub mod endpoints;
pub mod jobs;
pub mod queues;
pub mod scheduler;
pub mod worker;
