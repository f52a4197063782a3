//! Credit gate consumed by the retry entry point.
//!
//! Billing itself lives elsewhere; this crate only asks whether a workspace
//! can pay for an operation and records the charge.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CreditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditCheck {
    pub available: bool,
    pub balance: i64,
}

#[async_trait]
pub trait CreditGate: Send + Sync {
    async fn check_credits(
        &self,
        workspace_id: &str,
        amount: i64,
        category: &str,
    ) -> Result<CreditCheck, CreditError>;

    async fn debit_credits(
        &self,
        workspace_id: &str,
        amount: i64,
        category: &str,
        description: &str,
    ) -> Result<(), CreditError>;
}

/// Gate for deployments without billing: always available, debits are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unmetered;

#[async_trait]
impl CreditGate for Unmetered {
    async fn check_credits(
        &self,
        _workspace_id: &str,
        _amount: i64,
        _category: &str,
    ) -> Result<CreditCheck, CreditError> {
        Ok(CreditCheck {
            available: true,
            balance: i64::MAX,
        })
    }

    async fn debit_credits(
        &self,
        workspace_id: &str,
        amount: i64,
        category: &str,
        _description: &str,
    ) -> Result<(), CreditError> {
        tracing::debug!(workspace_id, amount, category, "Unmetered debit ignored");
        Ok(())
    }
}

/// Per-workspace balances held in memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<String, i64>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, workspace_id: impl Into<String>, balance: i64) -> Self {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert(workspace_id.into(), balance);
        }
        self
    }

    pub fn balance(&self, workspace_id: &str) -> i64 {
        self.balances
            .lock()
            .map(|b| b.get(workspace_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, i64>>, CreditError> {
        self.balances
            .lock()
            .map_err(|e| CreditError::Unavailable(format!("ledger lock poisoned: {e}")))
    }
}

#[async_trait]
impl CreditGate for InMemoryLedger {
    async fn check_credits(
        &self,
        workspace_id: &str,
        amount: i64,
        _category: &str,
    ) -> Result<CreditCheck, CreditError> {
        let balance = self.lock()?.get(workspace_id).copied().unwrap_or(0);
        Ok(CreditCheck {
            available: balance >= amount,
            balance,
        })
    }

    async fn debit_credits(
        &self,
        workspace_id: &str,
        amount: i64,
        category: &str,
        description: &str,
    ) -> Result<(), CreditError> {
        let mut balances = self.lock()?;
        let balance = balances.entry(workspace_id.to_string()).or_insert(0);
        if *balance < amount {
            return Err(CreditError::Insufficient {
                balance: *balance,
                required: amount,
            });
        }
        *balance -= amount;
        tracing::info!(
            workspace_id,
            amount,
            category,
            description,
            remaining = *balance,
            "Credits debited"
        );
        Ok(())
    }
}
