//! Tasks: the data model, typed event stream, task engine, and master-agent
//! delegation routing.

pub mod engine;
pub mod events;
pub mod master;
pub mod models;

pub use engine::{CancellationSignal, ChainSink, TaskEngine};
pub use events::{TaskEvent, TaskEventKind, TaskEventStream};
pub use master::MasterAgent;
pub use models::{Message, MessageRole, Part, Task, TaskState};
