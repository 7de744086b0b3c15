pub mod cancel;
pub mod error;

pub use cancel::CancelSignal;
pub use error::{DbError, Result};
