// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Thread-safe idempotency log for external reference ids.
//!
//! Upstream systems deliver referral-usage events at least once; the log
//! ensures a reference id maps to exactly one earning while maintaining
//! arrival order.

use crate::base::EarningId;
use crate::error::LedgerError;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A thread-safe reference-id log with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with a [`SegQueue`]
/// to preserve arrival order. All operations are lock-free and safe for
/// concurrent access.
#[derive(Debug)]
pub struct ReferenceLog {
    /// Reference ids mapped to the earning they produced.
    references: DashMap<String, EarningId>,

    /// Queue of reference ids maintaining FIFO arrival order.
    arrival_order: SegQueue<String>,
}

impl ReferenceLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Self {
            references: DashMap::new(),
            arrival_order: SegQueue::new(),
        }
    }

    /// Registers a reference id against the earning it produced.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateReference`] if the reference id was
    /// already registered.
    pub fn register(&self, reference_id: &str, earning_id: EarningId) -> Result<(), LedgerError> {
        // Entry API gives an atomic check-and-insert so two concurrent
        // deliveries of the same event cannot both win.
        match self.references.entry(reference_id.to_owned()) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateReference(reference_id.to_owned())),
            Entry::Vacant(entry) => {
                entry.insert(earning_id);
                self.arrival_order.push(reference_id.to_owned());
                Ok(())
            }
        }
    }

    /// The earning previously recorded for a reference id, if any.
    pub fn lookup(&self, reference_id: &str) -> Option<EarningId> {
        self.references.get(reference_id).map(|entry| *entry)
    }

    /// Removes a registration, freeing the reference id.
    ///
    /// Used to roll back when a balance mutation fails after the reference
    /// was claimed, so a corrected retry is not rejected as a duplicate.
    pub fn unregister(&self, reference_id: &str) {
        self.references.remove(reference_id);
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

impl Default for ReferenceLog {
    fn default() -> Self {
        Self::new()
    }
}
