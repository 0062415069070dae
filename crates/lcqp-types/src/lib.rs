mod error;
mod status;

pub use error::{LcqpError, Result};
pub use status::{ReturnStatus, StationarityType};

#[cfg(test)]
mod tests;
