//! Binary snapshot format for terms and whole windows.
//!
//! A term is a one-line JSON header `{"Term":..,"M":..,"Cap":..}`, a newline
//! delimiter and then the raw `ceil(M/8)` bytes of its bit storage:
//!
//! ```text
//! {"Term":4,"M":958,"Cap":12}\n\n<120 bytes>
//! ```
//!
//! A window is a one-line JSON header carrying the format version, the
//! `(earliest, latest)` terms and the filter geometry, the same delimiter, and
//! then one term block per live term. Blocks carry their own term number, so
//! the decoder places each one in its ring slot regardless of order.
//!
//! A term block whose payload is missing entirely at the very end of the input
//! decodes as an all-zero filter. Older writers could stop right after the
//! header of the last term; a payload cut short mid-way is still rejected.

use crate::bit_filter::BitFilter;
use crate::error::{FilterError, Result};
use crate::filter::FilterGeometry;
use crate::hash::MembershipHasher;
use crate::windowed_filter::{MAX_TERM, TermSlot, TermWindowedFilter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, Read, Write};

pub const SNAPSHOT_VERSION: u32 = 1;

const DELIMITER: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermHeader {
    #[serde(rename = "Term")]
    pub term: u64,
    #[serde(rename = "M")]
    pub m: u64,
    #[serde(rename = "Cap")]
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowHeader {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "Earliest")]
    pub earliest: u64,
    #[serde(rename = "Latest")]
    pub latest: u64,
    #[serde(rename = "Retention")]
    pub retention: u64,
    #[serde(rename = "M")]
    pub m: u64,
    #[serde(rename = "K")]
    pub k: u64,
}

/// A decoded term: `(term, m, remaining capacity, raw bits)`.
///
/// `bits` is empty when the payload was absent; installing it clears the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRecord {
    pub term: u64,
    pub m: u64,
    pub remaining: u64,
    pub bits: Vec<u8>,
}

impl TermRecord {
    /// Copies the record into `slot`, which must have the same bit count.
    pub fn install(self, slot: &mut TermSlot) -> Result<()> {
        if self.m != slot.bits.num_bits() {
            return Err(FilterError::GeometryMismatch {
                field: "m",
                expected: slot.bits.num_bits(),
                found: self.m,
            });
        }
        slot.term = self.term;
        slot.remaining = self.remaining;
        slot.bits.load_bytes(&self.bits);
        Ok(())
    }

    pub fn bits_set(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Tests `key` against the recorded bits without building a filter.
    ///
    /// False when the payload is absent or `hasher` was built for a different
    /// bit count.
    pub fn contains(&self, hasher: &MembershipHasher, key: &[u8]) -> bool {
        if self.bits.is_empty() || self.m == 0 || hasher.num_bits() != self.m
        {
            return false;
        }
        let mut bits = BitFilter::new(self.m);
        bits.load_bytes(&self.bits);
        bits.test_all(&hasher.bit_indices(key))
    }
}

/// A parsed window snapshot, not yet bound to a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub header: WindowHeader,
    pub terms: Vec<TermRecord>,
}

impl WindowSnapshot {
    pub fn hasher(&self) -> MembershipHasher {
        MembershipHasher::new(self.header.k, self.header.m)
    }

    /// Terms in the snapshot whose bits hold `key`, oldest first.
    pub fn terms_containing(&self, key: &[u8]) -> Vec<u64> {
        let hasher = self.hasher();
        let mut terms: Vec<u64> = self
            .terms
            .iter()
            .filter(|record| record.contains(&hasher, key))
            .map(|record| record.term)
            .collect();
        terms.sort_unstable();
        terms
    }

    pub fn check_geometry(
        &self,
        geometry: &FilterGeometry,
        retention: u64,
    ) -> Result<()> {
        let checks = [
            ("m", geometry.m, self.header.m),
            ("k", geometry.k, self.header.k),
            ("retention", retention, self.header.retention),
        ];
        for (field, expected, found) in checks {
            if expected != found {
                return Err(FilterError::GeometryMismatch {
                    field,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

fn io_error(e: std::io::Error) -> FilterError {
    FilterError::StorageError(format!("Failed to write snapshot: {e}"))
}

fn write_header<W: Write, T: Serialize>(w: &mut W, header: &T) -> Result<()> {
    serde_json::to_writer(&mut *w, header)?;
    w.write_all(&[DELIMITER, DELIMITER]).map_err(io_error)
}

fn read_header<R: BufRead, T: DeserializeOwned>(r: &mut R) -> Result<T> {
    let mut line = Vec::new();
    r.read_until(DELIMITER, &mut line).map_err(|e| {
        FilterError::CorruptSnapshot(format!("Failed to read header: {e}"))
    })?;
    if line.pop() != Some(DELIMITER) {
        return Err(FilterError::CorruptSnapshot(
            "header is not terminated".into(),
        ));
    }

    let header = serde_json::from_slice(&line).map_err(|e| {
        FilterError::CorruptSnapshot(format!("Failed to parse header: {e}"))
    })?;

    let mut delimiter = [0u8; 1];
    match r.read_exact(&mut delimiter) {
        Ok(()) if delimiter[0] == DELIMITER => Ok(header),
        Ok(()) => Err(FilterError::CorruptSnapshot(format!(
            "expected delimiter, found byte {:#04x}",
            delimiter[0]
        ))),
        Err(_) => Err(FilterError::CorruptSnapshot(
            "missing delimiter after header".into(),
        )),
    }
}

fn at_end<R: BufRead>(r: &mut R) -> Result<bool> {
    let buf = r.fill_buf().map_err(|e| {
        FilterError::CorruptSnapshot(format!("Failed to read snapshot: {e}"))
    })?;
    Ok(buf.is_empty())
}

pub fn encode_term<W: Write>(slot: &TermSlot, w: &mut W) -> Result<()> {
    let header = TermHeader {
        term: slot.term,
        m: slot.bits.num_bits(),
        remaining: slot.remaining,
    };
    write_header(w, &header)?;
    w.write_all(slot.bits.as_bytes()).map_err(io_error)
}

pub fn encode_term_to_vec(slot: &TermSlot) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(slot.bits.byte_len() + 64);
    encode_term(slot, &mut buf)?;
    Ok(buf)
}

pub fn read_term<R: BufRead>(r: &mut R) -> Result<TermRecord> {
    let header: TermHeader = read_header(r)?;
    let len = BitFilter::byte_len_for(header.m);
    let mut bits = Vec::new();
    r.by_ref()
        .take(len as u64)
        .read_to_end(&mut bits)
        .map_err(|e| {
            FilterError::CorruptSnapshot(format!("Failed to read payload: {e}"))
        })?;
    if !bits.is_empty() && bits.len() < len {
        return Err(FilterError::CorruptSnapshot(format!(
            "term {} payload truncated: {} of {} bytes",
            header.term,
            bits.len(),
            len
        )));
    }

    Ok(TermRecord {
        term: header.term,
        m: header.m,
        remaining: header.remaining,
        bits,
    })
}

/// Decodes one term block into `slot`. The slot is untouched on failure.
pub fn decode_term<R: BufRead>(r: &mut R, slot: &mut TermSlot) -> Result<()> {
    read_term(r)?.install(slot)
}

pub fn encode_window<W: Write>(
    filter: &TermWindowedFilter,
    w: &mut W,
) -> Result<()> {
    let (earliest, latest) = filter.terms();
    let geometry = filter.geometry();
    let header = WindowHeader {
        version: SNAPSHOT_VERSION,
        earliest,
        latest,
        retention: filter.retention(),
        m: geometry.m,
        k: geometry.k,
    };
    write_header(w, &header)?;

    for term in earliest..=latest {
        if let Some(slot) = filter.slot(term) {
            encode_term(slot, w)?;
        }
    }
    Ok(())
}

pub fn encode_window_to_vec(filter: &TermWindowedFilter) -> Result<Vec<u8>> {
    let live = filter
        .retention()
        .min(filter.latest_term().saturating_add(1)) as usize;
    let mut buf =
        Vec::with_capacity(live * (filter.geometry().term_bytes() + 64));
    encode_window(filter, &mut buf)?;
    Ok(buf)
}

/// Parses a window snapshot and checks its structural invariants.
pub fn read_window<R: BufRead>(r: &mut R) -> Result<WindowSnapshot> {
    let header: WindowHeader = read_header(r)?;
    if header.version != SNAPSHOT_VERSION {
        return Err(FilterError::CorruptSnapshot(format!(
            "unsupported snapshot version {}",
            header.version
        )));
    }
    if header.retention == 0
        || header.earliest > header.latest
        || header.latest > MAX_TERM
        || header.latest - header.earliest >= header.retention
    {
        return Err(FilterError::CorruptSnapshot(format!(
            "invalid window [{}, {}] for retention {}",
            header.earliest, header.latest, header.retention
        )));
    }
    if header.m == 0 || header.k == 0 {
        return Err(FilterError::CorruptSnapshot(format!(
            "invalid geometry m={} k={}",
            header.m, header.k
        )));
    }

    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    while !at_end(r)? {
        let record = read_term(r)?;
        if record.term < header.earliest || record.term > header.latest {
            return Err(FilterError::CorruptSnapshot(format!(
                "term {} outside window [{}, {}]",
                record.term, header.earliest, header.latest
            )));
        }
        if record.m != header.m {
            return Err(FilterError::CorruptSnapshot(format!(
                "term {} has {} bits, window has {}",
                record.term, record.m, header.m
            )));
        }
        if !seen.insert(record.term) {
            return Err(FilterError::CorruptSnapshot(format!(
                "term {} appears twice",
                record.term
            )));
        }
        terms.push(record);
    }

    Ok(WindowSnapshot { header, terms })
}

/// Decodes a window snapshot into a freshly built filter of the same geometry.
pub fn decode_window<R: BufRead>(
    r: &mut R,
    filter: &mut TermWindowedFilter,
) -> Result<()> {
    let window = read_window(r)?;
    filter.install_window(window)
}
