// core.rs splits the ledger's responsibilities into submodules.
pub mod block;
pub mod chain;
mod queries;
pub mod reference;
pub mod state;
pub mod validation;

pub use block::*;
pub use chain::*;
pub use reference::*;
pub use state::*;
pub use validation::*;
