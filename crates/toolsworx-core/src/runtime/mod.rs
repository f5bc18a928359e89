pub mod admission;
pub mod progress;
