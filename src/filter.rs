use crate::error::{FilterError, Result};
use crate::hash::{
    MembershipHasher, optimal_bit_vector_size, optimal_num_hashes,
};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for a term-windowed filter
#[derive(Clone, Debug, Builder, Serialize, Deserialize, PartialEq)]
#[builder(pattern = "owned")]
pub struct FilterConfig {
    /// Number of new keys a single term absorbs before it rotates
    #[builder(default = "1_000_000")]
    pub capacity: u64,

    /// Desired false positive rate (between 0 and 1)
    #[builder(default = "0.01")]
    pub false_positive_rate: f64,

    /// Number of most recent terms that still answer membership queries
    #[builder(default = "3")]
    pub retention: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            false_positive_rate: 0.01,
            retention: 3,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(FilterError::InvalidConfig(
                "Capacity must be greater than 0".into(),
            ));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0)
        {
            return Err(FilterError::InvalidConfig(format!(
                "False positive rate must be between 0 and 1, got {}",
                self.false_positive_rate
            )));
        }
        if self.retention == 0 {
            return Err(FilterError::InvalidConfig(
                "Retention must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Filter geometry, derived once from a validated [`FilterConfig`].
///
/// Changing `capacity` or `false_positive_rate` means building a new engine;
/// nothing resizes a live filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterGeometry {
    pub capacity: u64,
    pub false_positive_rate: f64,
    /// Bits per term
    pub m: u64,
    /// Hash functions per key
    pub k: u64,
}

impl FilterGeometry {
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        config.validate()?;
        let m = optimal_bit_vector_size(
            config.capacity,
            config.false_positive_rate,
        )
        .max(1);
        let k = optimal_num_hashes(config.capacity, m);
        Ok(Self {
            capacity: config.capacity,
            false_positive_rate: config.false_positive_rate,
            m,
            k,
        })
    }

    pub fn hasher(&self) -> MembershipHasher {
        MembershipHasher::new(self.k, self.m)
    }

    /// Bytes of bit storage per term.
    pub fn term_bytes(&self) -> usize {
        self.m.div_ceil(8) as usize
    }
}
