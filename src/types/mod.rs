//! Shared Types Module
//!
//! Entity and enum types shared across the custodia backend.

pub mod balance;
pub mod deposit;

// Re-exports for convenience
pub use balance::{Asset, Balance, User};
pub use deposit::{
    unix_now, ChainModel, Deposit, DepositMethod, DepositStatus, Network,
};
