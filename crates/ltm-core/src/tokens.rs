//! Token counting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Represents a count of tokens.
///
/// Used for input tokens, output tokens, cache-read tokens and context
/// window estimates. Arithmetic saturates instead of overflowing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TokenCount(u64);

impl TokenCount {
    /// Creates a new TokenCount.
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    /// Creates a zero TokenCount.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the raw count.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true if count is zero.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Formats the token count for display.
    ///
    /// Uses K/M suffixes for large numbers.
    pub fn format(&self) -> String {
        if self.0 < 1_000 {
            format!("{}", self.0)
        } else if self.0 < 10_000 {
            format!("{:.1}K", self.0 as f64 / 1_000.0)
        } else if self.0 < 1_000_000 {
            format!("{}K", self.0 / 1_000)
        } else {
            format!("{:.1}M", self.0 as f64 / 1_000_000.0)
        }
    }

    /// Saturating addition.
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Add for TokenCount {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl AddAssign for TokenCount {
    fn add_assign(&mut self, other: Self) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl Sum for TokenCount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), Add::add)
    }
}

impl From<u64> for TokenCount {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl From<u32> for TokenCount {
    fn from(n: u32) -> Self {
        Self(n as u64)
    }
}

impl fmt::Display for TokenCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.format())
    }
}

/// Percentage of observed input served from cache, rounded to an integer.
///
/// `cache_read / (input + cache_read) * 100`, or 0 when nothing was observed.
pub fn cache_efficiency(input: TokenCount, cache_read: TokenCount) -> u32 {
    let denominator = input.saturating_add(cache_read).as_u64();
    if denominator == 0 {
        return 0;
    }
    let ratio = cache_read.as_u64() as f64 / denominator as f64;
    (ratio * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_suffixes() {
        assert_eq!(TokenCount::new(999).format(), "999");
        assert_eq!(TokenCount::new(1_500).format(), "1.5K");
        assert_eq!(TokenCount::new(45_000).format(), "45K");
        assert_eq!(TokenCount::new(2_500_000).format(), "2.5M");
    }

    #[test]
    fn test_add_saturates() {
        let max = TokenCount::new(u64::MAX);
        assert_eq!(max + TokenCount::new(1), max);
    }

    #[test]
    fn test_sum() {
        let total: TokenCount = [1u64, 2, 3].into_iter().map(TokenCount::new).sum();
        assert_eq!(total.as_u64(), 6);
    }

    #[test]
    fn test_cache_efficiency_rounds() {
        assert_eq!(cache_efficiency(TokenCount::new(100), TokenCount::new(20)), 17);
        assert_eq!(cache_efficiency(TokenCount::new(0), TokenCount::new(50)), 100);
        assert_eq!(cache_efficiency(TokenCount::new(1), TokenCount::new(1)), 50);
    }

    #[test]
    fn test_cache_efficiency_zero_denominator() {
        assert_eq!(cache_efficiency(TokenCount::zero(), TokenCount::zero()), 0);
    }
}
