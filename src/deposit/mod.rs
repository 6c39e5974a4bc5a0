//! Deposit Reconciliation Module
//!
//! The crypto deposit pipeline, from address issuance to balance credit:
//!
//! ```text
//! issue address → observe chain activity → verify confirmations → credit exactly once
//! ```
//!
//! ## Components
//!
//! - **address**: generates receive addresses and pending deposit rows
//! - **verifier**: CONFIRMED / PENDING / INVALID per confirmation policy
//! - **reconciler**: the atomic locate-verify-credit engine
//! - **monitor**: scheduled scanner and manual scan trigger
//! - **service**: initiation and card lifecycle for external collaborators
//!
//! Detection converges: the scanner, the signed webhook and the manual
//! trigger all hand observations to the same reconciler entry point.

pub mod address;
pub mod monitor;
pub mod reconciler;
pub mod service;
pub mod verifier;

// Re-exports
pub use address::{generate_address, network_fee, AddressIssuer, IssuedDeposit};
pub use monitor::{DepositMonitor, MonitorConfig, MonitorStatus};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use service::DepositService;
pub use verifier::{ConfirmationPolicy, TxVerifier, Verdict};
