//! The process-wide endpoint registry (design note §9: "a registry module with explicit
//! init/teardown owned by the library lifecycle, not hidden mutable module state"), standing in
//! for `pgm_transport_list`/`pgm_transport_list_lock` in the original implementation.

use std::sync::{Arc, RwLock, Weak};

use crate::transport::Transport;

/// Holds weak references so a destroyed endpoint is not kept alive just by being registered;
/// `bind` inserts a strong-to-weak handle and `destroy` removes it (spec §4.1).
pub struct Registry {
	endpoints: RwLock<Vec<Weak<Transport>>>,
}

impl Registry {
	pub fn new() -> Self {
		Self { endpoints: RwLock::new(Vec::new()) }
	}

	pub fn register(&self, endpoint: &Arc<Transport>) {
		self.endpoints.write().unwrap().push(Arc::downgrade(endpoint));
	}

	pub fn unregister(&self, endpoint: &Arc<Transport>) {
		let target = Arc::as_ptr(endpoint);
		self.endpoints.write().unwrap().retain(|weak| weak.as_ptr() != target);
	}

	/// Enumerates currently-live endpoints for admin/introspection purposes. May be called
	/// without holding any endpoint lock (spec §5).
	pub fn enumerate(&self) -> Vec<Arc<Transport>> {
		self.endpoints.read().unwrap().iter().filter_map(Weak::upgrade).collect()
	}

	/// Drops weak references whose endpoint has already been freed.
	pub fn compact(&self) {
		self.endpoints.write().unwrap().retain(|weak| weak.strong_count() > 0);
	}
}

impl Default for Registry {
	fn default() -> Self {
		Self::new()
	}
}
