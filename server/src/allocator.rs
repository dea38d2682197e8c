//! Participant identifier allocation.
//!
//! Identifiers are small positive integers starting at 1. Whether an identifier
//! released by a departed participant may be handed out again is decided once,
//! by the [`IdPolicy`] the allocator is built with:
//! - `Monotonic` never reuses; `release` only retires the identifier.
//! - `Reuse` keeps released identifiers in a pool that `acquire` drains first,
//!   smallest identifier first.

use log::{debug, warn};
use shared::IdPolicy;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocatorError {
    #[error("no participant identifiers left")]
    IdentitiesExhausted,
}

#[derive(Debug)]
pub struct IdentityAllocator {
    policy: IdPolicy,
    /// Next never-issued identifier; `None` once `u16::MAX` has been issued.
    next: Option<u16>,
    /// Identifiers currently held by a participant.
    issued: HashSet<u16>,
    /// Released identifiers available again under `IdPolicy::Reuse`.
    reclaimed: BTreeSet<u16>,
}

impl IdentityAllocator {
    pub fn new(policy: IdPolicy) -> Self {
        Self {
            policy,
            next: Some(1),
            issued: HashSet::new(),
            reclaimed: BTreeSet::new(),
        }
    }

    pub fn policy(&self) -> IdPolicy {
        self.policy
    }

    /// Issues an identifier no current participant holds.
    pub fn acquire(&mut self) -> Result<u16, AllocatorError> {
        let id = match self.reclaimed.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next.ok_or(AllocatorError::IdentitiesExhausted)?;
                self.next = id.checked_add(1);
                id
            }
        };

        self.issued.insert(id);
        debug!("Issued participant id {}", id);
        Ok(id)
    }

    /// Returns an identifier. Releasing one that is not issued is ignored.
    pub fn release(&mut self, id: u16) {
        if !self.issued.remove(&id) {
            warn!("Ignoring release of participant id {} that is not issued", id);
            return;
        }

        if self.policy == IdPolicy::Reuse {
            self.reclaimed.insert(id);
        }
    }

    pub fn is_issued(&self, id: u16) -> bool {
        self.issued.contains(&id)
    }

    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }
}
