//! Gateway assembly: builds the object graph from configuration and owns
//! the lifecycle of every background task.

pub mod gateway;
