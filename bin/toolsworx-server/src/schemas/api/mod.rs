pub mod convert;
pub mod job;
