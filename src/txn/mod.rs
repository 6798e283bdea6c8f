//! Transaction state machine.
//!
//! Sequences `Initiated -> Validated -> Executed -> {Confirmed | Cancelled}`
//! around a durable external ledger. The ledger itself is an external
//! collaborator behind [`TransactionLedger`]; this module never persists
//! anything on its own.
//!
//! A failure during [`Transaction::execute`] triggers a compensating
//! [`Transaction::cancel`] before the original error propagates. Ledger
//! failures during confirm/cancel are logged while local state advances
//! optimistically, which can diverge from the external ledger when the
//! compensating call itself fails.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::error::{Result, SpaError};

/// Parameter set bound to the downstream call.
pub type TxnParams = BTreeMap<String, String>;

/// Lifecycle state of one logical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Context allocated, initial state registered with the ledger.
    Initiated,
    /// Externally-recorded state checked and consistent.
    Validated,
    /// The side-effecting downstream call succeeded.
    Executed,
    /// Finalized durably.
    Confirmed,
    /// Rolled back (or compensated after a failed execute).
    Cancelled,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnState::Initiated => "Initiated",
            TxnState::Validated => "Validated",
            TxnState::Executed => "Executed",
            TxnState::Confirmed => "Confirmed",
            TxnState::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Durable-state interface consumed by the state machine.
///
/// Keyed by transaction code and parameter set; implemented externally
/// (stored-procedure repository in production, mocks in tests).
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Record a lifecycle state transition.
    async fn record_state(&self, code: &str, state: TxnState, params: &TxnParams) -> Result<()>;

    /// Read the currently recorded state, if any.
    async fn current_state(&self, code: &str, params: &TxnParams) -> Result<Option<TxnState>>;

    /// Perform the side-effecting downstream call.
    async fn execute(&self, code: &str, params: &TxnParams) -> Result<()>;
}

/// One in-flight logical transaction.
///
/// One instance per transaction; never shared across concurrent callers.
pub struct Transaction<L: TransactionLedger> {
    code: String,
    params: TxnParams,
    state: TxnState,
    requires_durable_log: bool,
    ledger: Arc<L>,
}

impl<L: TransactionLedger> Transaction<L> {
    /// Allocate the transaction context and register its initial state.
    pub async fn initiate(
        ledger: Arc<L>,
        code: impl Into<String>,
        params: TxnParams,
        requires_durable_log: bool,
    ) -> Result<Self> {
        let code = code.into();
        ledger
            .record_state(&code, TxnState::Initiated, &params)
            .await?;
        info!(code = %code, "transaction initiated");

        Ok(Self {
            code,
            params,
            state: TxnState::Initiated,
            requires_durable_log,
            ledger,
        })
    }

    /// Transaction code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Current local lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Check that the externally-recorded state is consistent with
    /// proceeding, then advance to `Validated`.
    pub async fn validate(&mut self) -> Result<()> {
        if self.state != TxnState::Initiated {
            return Err(SpaError::InvalidState {
                expected: TxnState::Initiated.to_string(),
                found: self.state.to_string(),
            });
        }

        let recorded = self
            .ledger
            .current_state(&self.code, &self.params)
            .await?;

        match recorded {
            Some(TxnState::Initiated) => {
                self.state = TxnState::Validated;
                debug!(code = %self.code, "transaction validated");
                Ok(())
            }
            other => Err(SpaError::InvalidState {
                expected: TxnState::Initiated.to_string(),
                found: other.map_or_else(|| "None".to_string(), |s| s.to_string()),
            }),
        }
    }

    /// Perform the side-effecting ledger call.
    ///
    /// On any failure the compensating [`cancel`](Self::cancel) runs
    /// exactly once before the original error propagates to the caller.
    pub async fn execute(&mut self) -> Result<()> {
        if self.state != TxnState::Validated {
            return Err(SpaError::InvalidState {
                expected: TxnState::Validated.to_string(),
                found: self.state.to_string(),
            });
        }

        if let Err(e) = self.ledger.execute(&self.code, &self.params).await {
            error!(code = %self.code, error = %e, "execute failed, compensating");
            self.cancel().await;
            return Err(e);
        }

        if let Err(e) = self
            .ledger
            .record_state(&self.code, TxnState::Executed, &self.params)
            .await
        {
            error!(code = %self.code, error = %e, "recording Executed failed, compensating");
            self.cancel().await;
            return Err(e);
        }

        self.state = TxnState::Executed;
        info!(code = %self.code, "transaction executed");
        Ok(())
    }

    /// Finalize the transaction.
    ///
    /// A no-op leaving state unchanged unless durable logging is required
    /// for this transaction type and the current state is `Executed`. A
    /// ledger failure is logged; local state still advances.
    pub async fn confirm(&mut self) {
        if !self.requires_durable_log || self.state != TxnState::Executed {
            debug!(
                code = %self.code,
                state = %self.state,
                durable = self.requires_durable_log,
                "confirm is a no-op"
            );
            return;
        }

        if let Err(e) = self
            .ledger
            .record_state(&self.code, TxnState::Confirmed, &self.params)
            .await
        {
            // Optimistic advance: local and ledger state may now diverge.
            error!(code = %self.code, error = %e, "confirm ledger call failed");
        }

        self.state = TxnState::Confirmed;
        info!(code = %self.code, "transaction confirmed");
    }

    /// Mark the transaction cancelled.
    ///
    /// Safe to call from `Executed` or `Confirmed` (and from the execute
    /// failure path); idempotent in effect. A ledger failure is logged;
    /// local state still advances.
    pub async fn cancel(&mut self) {
        if self.state == TxnState::Cancelled {
            return;
        }

        if let Err(e) = self
            .ledger
            .record_state(&self.code, TxnState::Cancelled, &self.params)
            .await
        {
            error!(code = %self.code, error = %e, "cancel ledger call failed");
        }

        self.state = TxnState::Cancelled;
        info!(code = %self.code, "transaction cancelled");
    }
}
