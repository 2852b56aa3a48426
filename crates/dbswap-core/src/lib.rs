pub mod config;
pub mod logging;

pub mod checksum;
pub mod error;
pub mod lock;
pub mod storage;
pub mod writer;

pub use error::{CleanupFailure, CloseError, WriterError};
pub use storage::commit::Committed;
pub use writer::{DatabaseWriter, VersionMode, WriterOptions};
