//! Human-facing order numbers such as `ORD-2024-7KQ2M9XA`.
//!
//! Randomness alone does not guarantee uniqueness; the order service checks each
//! candidate against storage and retries, with a unique index as the backstop.

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use rand::Rng;

use crate::config::OrdersConfig;

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Produces candidate order numbers from a clock reading and a randomness source.
pub trait OrderNumberGenerator: Send + Sync + fmt::Debug {
    fn generate(&self, now: DateTime<Utc>) -> String;
}

/// `<PREFIX>-<YYYY>-<SUFFIX>` with a uniformly random `A-Z0-9` suffix.
#[derive(Debug, Clone)]
pub struct RandomOrderNumberGenerator {
    prefix: String,
    include_year: bool,
    suffix_length: usize,
}

impl RandomOrderNumberGenerator {
    pub fn new(prefix: impl Into<String>, include_year: bool, suffix_length: usize) -> Self {
        Self {
            prefix: prefix.into(),
            include_year,
            suffix_length,
        }
    }

    fn random_suffix(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.suffix_length)
            .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
            .collect()
    }
}

impl From<&OrdersConfig> for RandomOrderNumberGenerator {
    fn from(cfg: &OrdersConfig) -> Self {
        Self::new(cfg.number_prefix.clone(), cfg.include_year, cfg.suffix_length)
    }
}

impl OrderNumberGenerator for RandomOrderNumberGenerator {
    fn generate(&self, now: DateTime<Utc>) -> String {
        let suffix = self.random_suffix();
        if self.include_year {
            format!("{}-{}-{}", self.prefix, now.year(), suffix)
        } else {
            format!("{}-{}", self.prefix, suffix)
        }
    }
}

/// Cheap shape check used before hitting storage on lookups.
pub fn looks_like_order_number(candidate: &str) -> bool {
    let candidate = candidate.trim();
    !candidate.is_empty()
        && candidate.len() <= 40
        && candidate
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}
