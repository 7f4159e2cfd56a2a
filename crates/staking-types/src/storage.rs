//! Storage key types.

use std::str::FromStr;

/// Collections persisted by the gateway.
///
/// Each collection maps to a key prefix; a record with id `x` in
/// [`StorageKey::Transactions`] is stored under `tx-x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Transaction lifecycle records.
	Transactions,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Transactions => "tx",
		}
	}

	/// Full backend key for an item of this collection.
	pub fn key_for(&self, id: &str) -> String {
		format!("{}-{}", self.as_str(), id)
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Transactions].into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"tx" => Ok(Self::Transactions),
			_ => Err(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_key_format() {
		assert_eq!(
			StorageKey::Transactions.key_for("sei-sei-mainnet-1700000000000"),
			"tx-sei-sei-mainnet-1700000000000"
		);
		assert_eq!("tx".parse::<StorageKey>(), Ok(StorageKey::Transactions));
	}
}
