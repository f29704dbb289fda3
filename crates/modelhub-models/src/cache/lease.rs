//! Borrowed access to a cached model.

use std::ops::Deref;
use std::sync::Arc;

use super::types::ModelId;
use crate::handle::ModelHandle;

/// A borrow of a cached model.
///
/// While a lease is alive the handle's in-use count is positive and sweeps
/// leave its entry alone. Dropping the lease releases the borrow.
#[derive(Debug)]
pub struct ModelLease {
    handle: Arc<ModelHandle>,
}

impl ModelLease {
    pub(crate) fn acquire(handle: Arc<ModelHandle>) -> Self {
        handle.acquire();
        Self { handle }
    }

    /// The borrowed handle.
    ///
    /// Only a reference is handed out: the handle is usable for as long as
    /// this lease holds the borrow.
    #[must_use]
    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<ModelHandle> {
        &self.handle
    }

    /// The record the model was loaded for.
    #[must_use]
    pub fn identity(&self) -> ModelId {
        self.handle.identity()
    }

    /// Give the borrow back. Equivalent to dropping the lease.
    pub fn release(self) {}
}

impl Deref for ModelLease {
    type Target = ModelHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockModel;
    use modelhub_abstraction::Device;
    use std::path::PathBuf;

    #[test]
    fn test_lease_tracks_borrow() {
        let handle = Arc::new(ModelHandle::new(
            ModelId(5),
            PathBuf::from("a.pt"),
            Box::new(MockModel::new("a", Device::Cpu)),
        ));

        let first = ModelLease::acquire(Arc::clone(&handle));
        let second = ModelLease::acquire(Arc::clone(&handle));
        assert_eq!(handle.in_use(), 2);
        assert_eq!(first.identity(), ModelId(5));
        assert!(std::ptr::eq(first.handle(), second.handle()));
        assert!(std::ptr::eq(first.handle(), Arc::as_ptr(&handle)));

        first.release();
        assert_eq!(handle.in_use(), 1);
        drop(second);
        assert_eq!(handle.in_use(), 0);
    }
}
