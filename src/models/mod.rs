pub mod result;
pub mod status;

pub use result::{Summary, TestOutcome, TestSuiteReport};
pub use status::TestStatus;
