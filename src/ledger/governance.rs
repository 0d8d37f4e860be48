//! Owner-gated controls.

use super::{Ledger, LedgerError, LedgerEvent};
use crate::params::GlobalParams;
use crate::Address;
use tracing::{info, warn};

impl Ledger {
    /// Stops request intake. Batches in flight can still resolve.
    pub fn pause(&mut self, caller: &Address) -> Result<(), LedgerError> {
        self.require_owner(caller)?;
        if self.paused {
            return Err(LedgerError::Paused);
        }
        self.paused = true;
        warn!(owner = %caller, "ledger paused");
        self.emit(LedgerEvent::Paused);
        Ok(())
    }

    /// Resumes request intake.
    pub fn unpause(&mut self, caller: &Address) -> Result<(), LedgerError> {
        self.require_owner(caller)?;
        if !self.paused {
            return Err(LedgerError::NotPaused);
        }
        self.paused = false;
        info!(owner = %caller, "ledger unpaused");
        self.emit(LedgerEvent::Unpaused);
        Ok(())
    }

    /// Replaces the global params. Requires the owner, a paused ledger and
    /// no batch in progress; every violated rule is reported at once.
    pub fn update_global_params(
        &mut self,
        caller: &Address,
        params: GlobalParams,
    ) -> Result<(), LedgerError> {
        self.require_owner(caller)?;
        if !self.paused {
            return Err(LedgerError::NotPaused);
        }
        if let Some(batch) = &self.current_batch {
            return Err(LedgerError::BatchInProgress {
                batch_nonce: batch.nonce,
            });
        }
        params.ensure_valid().map_err(LedgerError::InvalidParams)?;
        self.params = params.clone();
        info!(owner = %caller, "global params updated");
        self.emit(LedgerEvent::GlobalParamsUpdated { params });
        Ok(())
    }
}
