pub mod types;

pub use types::{AppError, RepositoryError, RepositoryResult};
