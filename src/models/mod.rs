pub mod execution;
pub mod trend;
