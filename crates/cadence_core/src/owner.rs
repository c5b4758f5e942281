//! # Owner Registry
//!
//! Every subscription, sequence, interceptor and arbitration request belongs
//! to an owner (a behavioural module). Disabling an owner is the single
//! teardown switch for everything it registered.
//!
//! Ids are dense and handed out in registration order, which gives the
//! scheduler its "owner-registration order" for free.

use cadence_shared::OwnerId;
use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};

struct OwnerRecord {
    name: String,
    enabled: bool,
}

/// Registry of behavioural modules.
pub struct OwnerRegistry {
    owners: RwLock<Vec<OwnerRecord>>,
}

impl OwnerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            owners: RwLock::new(Vec::new()),
        }
    }

    /// Registers a new, enabled owner.
    pub fn register(&self, name: impl Into<String>) -> OwnerId {
        let mut owners = self.owners.write();
        let id = OwnerId(u32::try_from(owners.len()).unwrap_or(u32::MAX));
        owners.push(OwnerRecord {
            name: name.into(),
            enabled: true,
        });
        id
    }

    /// Returns true if the owner exists and is enabled.
    #[must_use]
    pub fn is_enabled(&self, id: OwnerId) -> bool {
        self.owners
            .read()
            .get(id.0 as usize)
            .is_some_and(|record| record.enabled)
    }

    /// Fails unless the owner exists and is enabled.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownOwner`] or [`CoreError::OwnerDisabled`].
    pub fn ensure_enabled(&self, id: OwnerId) -> CoreResult<()> {
        match self.owners.read().get(id.0 as usize) {
            None => Err(CoreError::UnknownOwner(id)),
            Some(record) if !record.enabled => Err(CoreError::OwnerDisabled(id)),
            Some(_) => Ok(()),
        }
    }

    /// Flips the enabled flag. Returns the previous value.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownOwner`] if the id was never registered.
    pub fn set_enabled(&self, id: OwnerId, enabled: bool) -> CoreResult<bool> {
        let mut owners = self.owners.write();
        let record = owners
            .get_mut(id.0 as usize)
            .ok_or(CoreError::UnknownOwner(id))?;
        Ok(std::mem::replace(&mut record.enabled, enabled))
    }

    /// Display name of the owner.
    #[must_use]
    pub fn name(&self, id: OwnerId) -> Option<String> {
        self.owners
            .read()
            .get(id.0 as usize)
            .map(|record| record.name.clone())
    }

    /// Number of registered owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.read().len()
    }

    /// Returns true if no owner was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.read().is_empty()
    }

    /// Number of enabled owners.
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.owners.read().iter().filter(|r| r.enabled).count()
    }
}

impl Default for OwnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
