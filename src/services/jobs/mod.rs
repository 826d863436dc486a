mod runner;
mod store;
mod types;

pub use runner::{AnalyzeJobService, SubmitError};
pub use store::{MemoryResultStore, PgResultStore, ResultStore, MAX_PAGE_SIZE};
pub use types::*;
