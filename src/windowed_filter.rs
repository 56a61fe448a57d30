use crate::bit_filter::BitFilter;
use crate::error::{FilterError, Result};
use crate::filter::{FilterConfig, FilterGeometry};
use crate::hash::MembershipHasher;
use crate::snapshot::{self, WindowSnapshot};
use crate::storage::TermArchive;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest term a filter accepts. One below `u64::MAX`, so the active term
/// can always be named by its successor.
pub const MAX_TERM: u64 = u64::MAX - 1;

/// One ring position: the bits of a single term plus its remaining capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermSlot {
    pub(crate) term: u64,
    pub(crate) remaining: u64,
    pub(crate) bits: BitFilter,
}

impl TermSlot {
    pub fn new(term: u64, capacity: u64, num_bits: u64) -> Self {
        Self {
            term,
            remaining: capacity,
            bits: BitFilter::new(num_bits),
        }
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    /// New keys this term can still absorb before it rotates
    pub fn remaining_capacity(&self) -> u64 {
        self.remaining
    }

    pub fn bits(&self) -> &BitFilter {
        &self.bits
    }

    fn reset(&mut self, term: u64, capacity: u64) {
        self.term = term;
        self.remaining = capacity;
        self.bits.clear();
    }
}

/// Point-in-time summary of a filter, cheap to serialize.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct WindowStats {
    pub earliest: u64,
    pub latest: u64,
    pub retention: u64,
    pub capacity: u64,
    pub false_positive_rate: f64,
    pub bits_per_term: u64,
    pub num_hashes: u64,
    pub active_remaining: u64,
    pub terms: Vec<TermStats>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct TermStats {
    pub term: u64,
    pub remaining: u64,
    pub bits_set: usize,
}

/// A ring of `retention` Bloom filters, one per term.
///
/// Keys are recorded in the active term (`latest`) and reported as seen while
/// any live term in `[earliest, latest]` holds them. The active term rotates
/// once it has absorbed `capacity` new keys, or when a caller advances the
/// term explicitly with [`TermWindowedFilter::update_term`]. Rotation reuses
/// the ring slot of the term that falls out of the window.
pub struct TermWindowedFilter {
    config: FilterConfig,
    geometry: FilterGeometry,
    hasher: MembershipHasher,
    slots: Vec<TermSlot>,
    earliest: u64,
    latest: u64,
    archive: Option<Arc<dyn TermArchive>>,
}

impl TermWindowedFilter {
    pub fn new(config: FilterConfig) -> Result<Self> {
        let geometry = FilterGeometry::from_config(&config)?;
        let slots = (0..config.retention)
            .map(|term| TermSlot::new(term, geometry.capacity, geometry.m))
            .collect();

        Ok(Self {
            hasher: geometry.hasher(),
            config,
            geometry,
            slots,
            earliest: 0,
            latest: 0,
            archive: None,
        })
    }

    /// Creates a filter that hands every rotated-out term to `archive`.
    pub fn with_archive(
        config: FilterConfig,
        archive: Arc<dyn TermArchive>,
    ) -> Result<Self> {
        let mut filter = Self::new(config)?;
        filter.archive = Some(archive);
        Ok(filter)
    }

    /// Fresh filter with the same geometry and archive.
    pub fn empty_like(&self) -> Result<Self> {
        let mut filter = Self::new(self.config.clone())?;
        filter.archive = self.archive.clone();
        Ok(filter)
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn geometry(&self) -> &FilterGeometry {
        &self.geometry
    }

    pub fn retention(&self) -> u64 {
        self.config.retention
    }

    /// `(earliest, latest)` terms of the window
    pub fn terms(&self) -> (u64, u64) {
        (self.earliest, self.latest)
    }

    pub fn latest_term(&self) -> u64 {
        self.latest
    }

    pub fn earliest_term(&self) -> u64 {
        self.earliest
    }

    pub fn remaining_capacity(&self) -> u64 {
        self.slots[self.position(self.latest)].remaining
    }

    fn position(&self, term: u64) -> usize {
        (term % self.config.retention) as usize
    }

    /// The slot holding `term`, if that term is inside the window.
    ///
    /// A ring position whose stored term differs (left stale by a multi-term
    /// jump) is treated as absent.
    pub fn slot(&self, term: u64) -> Option<&TermSlot> {
        if term < self.earliest || term > self.latest {
            return None;
        }
        let slot = &self.slots[self.position(term)];
        (slot.term == term).then_some(slot)
    }

    pub(crate) fn slot_at_mut(&mut self, term: u64) -> &mut TermSlot {
        let position = self.position(term);
        &mut self.slots[position]
    }

    /// Records `key` and reports whether it was already seen in the window.
    pub fn set(&mut self, key: &[u8]) -> bool {
        let indices = self.hasher.bit_indices(key);

        // closed terms are only consulted, never written
        if (self.earliest..self.latest).any(|term| {
            self.slot(term).is_some_and(|s| s.bits.test_all(&indices))
        }) {
            return true;
        }

        let latest = self.latest;
        let slot = self.slot_at_mut(latest);
        let existed = slot.bits.set_all(&indices);
        if !existed {
            slot.remaining = slot.remaining.saturating_sub(1);
            if slot.remaining == 0 {
                if latest < MAX_TERM {
                    debug!(term = latest, "Term capacity exhausted");
                    self.rotate_to(latest + 1);
                } else {
                    // the last term keeps absorbing keys past its capacity
                    warn!(term = latest, "Term space exhausted");
                }
            }
        }
        existed
    }

    /// Reports whether `key` was seen in any live term.
    pub fn check(&self, key: &[u8]) -> bool {
        let indices = self.hasher.bit_indices(key);
        (self.earliest..=self.latest).rev().any(|term| {
            self.slot(term).is_some_and(|s| s.bits.test_all(&indices))
        })
    }

    /// Moves the window forward to `term`.
    ///
    /// Equal terms are a no-op; older terms fail with
    /// [`FilterError::ExpiredTerm`] and terms past [`MAX_TERM`] with
    /// [`FilterError::TermOutOfRange`], both leaving the filter untouched.
    pub fn update_term(&mut self, term: u64) -> Result<()> {
        if term > MAX_TERM {
            return Err(FilterError::TermOutOfRange {
                given: term,
                max: MAX_TERM,
            });
        }
        if term == self.latest {
            return Ok(());
        }
        if term < self.latest {
            return Err(FilterError::ExpiredTerm {
                current: self.latest,
                given: term,
            });
        }
        self.rotate_to(term);
        Ok(())
    }

    pub fn set_with_term(&mut self, term: u64, key: &[u8]) -> Result<bool> {
        self.update_term(term)?;
        Ok(self.set(key))
    }

    pub fn check_with_term(&mut self, term: u64, key: &[u8]) -> Result<bool> {
        self.update_term(term)?;
        Ok(self.check(key))
    }

    fn rotate_to(&mut self, term: u64) {
        self.archive_term(self.latest);

        let previous = self.latest;
        self.latest = term;
        let span = self.config.retention - 1;
        if self.latest >= span {
            self.earliest = self.latest - span;
        }

        let capacity = self.geometry.capacity;
        self.slot_at_mut(term).reset(term, capacity);

        info!(
            from = previous,
            to = term,
            earliest = self.earliest,
            "Rotated active term"
        );
    }

    fn archive_term(&self, term: u64) {
        let Some(archive) = &self.archive else {
            return;
        };
        let Some(slot) = self.slot(term) else {
            return;
        };

        let saved = snapshot::encode_term_to_vec(slot)
            .and_then(|bytes| archive.save_term(term, &bytes));
        match saved {
            Ok(true) => debug!(term, "Archived closing term"),
            Ok(false) => debug!(term, "Term already archived"),
            Err(e) => warn!(term, error = %e, "Failed to archive closing term"),
        }
    }

    /// Decodes an archived term for inspection.
    pub fn load_archived_term(&self, term: u64) -> Result<Option<TermSlot>> {
        let Some(archive) = &self.archive else {
            return Ok(None);
        };
        let Some(bytes) = archive.load_term(term)? else {
            return Ok(None);
        };

        let mut slot =
            TermSlot::new(term, self.geometry.capacity, self.geometry.m);
        snapshot::decode_term(&mut bytes.as_slice(), &mut slot)?;
        Ok(Some(slot))
    }

    /// Adopts a parsed window snapshot. Meant for a freshly built filter.
    pub(crate) fn install_window(
        &mut self,
        window: WindowSnapshot,
    ) -> Result<()> {
        window.check_geometry(&self.geometry, self.config.retention)?;

        let (earliest, latest) = (window.header.earliest, window.header.latest);
        if !window.terms.iter().any(|record| record.term == latest) {
            return Err(FilterError::CorruptSnapshot(format!(
                "active term {latest} missing from snapshot"
            )));
        }

        let capacity = self.geometry.capacity;
        for record in &window.terms {
            if record.remaining > capacity {
                return Err(FilterError::CorruptSnapshot(format!(
                    "term {} claims {} remaining of capacity {}",
                    record.term, record.remaining, capacity
                )));
            }
        }

        for record in window.terms {
            let slot = self.slot_at_mut(record.term);
            record.install(slot)?;
        }

        self.earliest = earliest;
        self.latest = latest;
        Ok(())
    }

    pub fn stats(&self) -> WindowStats {
        let terms = (self.earliest..=self.latest)
            .filter_map(|term| self.slot(term))
            .map(|slot| TermStats {
                term: slot.term,
                remaining: slot.remaining,
                bits_set: slot.bits.count_ones(),
            })
            .collect();

        WindowStats {
            earliest: self.earliest,
            latest: self.latest,
            retention: self.config.retention,
            capacity: self.geometry.capacity,
            false_positive_rate: self.geometry.false_positive_rate,
            bits_per_term: self.geometry.m,
            num_hashes: self.geometry.k,
            active_remaining: self.remaining_capacity(),
            terms,
        }
    }
}

impl std::fmt::Debug for TermWindowedFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TermWindowedFilter {{ capacity: {}, false_positive_rate: {}, m: {}, k: {}, retention: {}, earliest: {}, latest: {} }}",
            self.geometry.capacity,
            self.geometry.false_positive_rate,
            self.geometry.m,
            self.geometry.k,
            self.config.retention,
            self.earliest,
            self.latest
        )
    }
}
