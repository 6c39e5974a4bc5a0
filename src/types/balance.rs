//! Balance, Asset and User Entities
//!
//! `Balance` is the credited aggregate per (user, asset); created lazily on
//! first credit and never deleted. `Asset` and `User` are reference data
//! from the reconciler's perspective.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::deposit::unix_now;

/// Per-(user, asset) balance aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: String,
    pub asset_id: String,
    pub balance: Decimal,
    /// Unix seconds of last credit
    pub updated_at: i64,
}

impl Balance {
    /// Fresh zero balance for a (user, asset) pair
    pub fn new(user_id: String, asset_id: String) -> Self {
        Self {
            user_id,
            asset_id,
            balance: Decimal::ZERO,
            updated_at: unix_now(),
        }
    }
}

/// Static asset reference data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub network: String,
    pub contract_address: Option<String>,
    pub decimals: u32,
}

/// Minimal user reference; registration and auth live elsewhere
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}
