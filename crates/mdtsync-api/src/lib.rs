// mdtsync-api: Async Rust client for the markdown-ticket data API and change stream

pub mod client;
pub mod error;
pub mod models;
pub mod sse;
pub mod transport;

pub use client::DataClient;
pub use error::Error;
pub use models::{FileChange, FileEventKind, ProjectChange, ProjectRecord, StreamMessage, TicketRecord};
pub use sse::{MessageStream, SseClient};
