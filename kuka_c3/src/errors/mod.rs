mod c3_error;

pub use c3_error::{C3Error, C3ErrorCode};
