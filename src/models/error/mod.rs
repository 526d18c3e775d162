mod repository_error;
pub use repository_error::*;

mod envelope;
pub use envelope::*;
