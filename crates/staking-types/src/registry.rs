//! Registry trait for self-registering implementations.
//!
//! Pluggable components (storage backends, chain signers, upstream clients)
//! expose a `Registry` struct implementing this trait so builders can look up
//! factories by their configuration name.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation.
	///
	/// For example `"file"` for `storage.implementations.file`, or
	/// `"substrate"` for the Substrate signer family.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
