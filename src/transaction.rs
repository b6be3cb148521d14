//! Transaction module split into types, validation and construction

pub mod builder;
pub mod types;
pub mod validation;

pub use builder::TransactionBuilder;
pub use types::*;
