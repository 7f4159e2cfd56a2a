//! Transaction lookup.

use staking_core::{StakingEngine, StakingError};
use staking_types::{truncate_id, TransactionRecord};
use tracing::debug;

/// Returns the stored record for `id`.
pub async fn get_transaction(
	engine: &StakingEngine,
	id: &str,
) -> Result<TransactionRecord, StakingError> {
	debug!(transaction_id = %truncate_id(id), "Retrieving transaction");
	engine.transaction(id).await
}
