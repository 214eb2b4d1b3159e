pub use palmgate_core::errors::{AppError, AppResult};
