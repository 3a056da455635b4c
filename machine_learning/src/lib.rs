pub mod arch;
pub mod convert;
pub mod error;
pub mod loader;
pub mod partition;
pub mod preprocess;

pub use error::{MlErr, Result};
