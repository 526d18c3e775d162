mod message;
pub use message::*;

mod duration_sample;
pub use duration_sample::*;

mod dedup_record;
pub use dedup_record::*;

mod dead_letter;
pub use dead_letter::*;

mod error;
pub use error::*;
