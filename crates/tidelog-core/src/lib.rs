pub mod batch;
pub mod error;

pub use batch::{BatchType, RecordBatch};
pub use error::{Error, Result};
