//! The fixed paid-media channel set and the total-map container keyed by it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four paid-media surfaces the core allocates budget across.
///
/// The set is fixed by design: extending it is a typed refactor, not a
/// runtime concern. `ALL` is the canonical iteration order used everywhere
/// lexicographic tie-breaking matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Google,
    Meta,
    Tiktok,
    Linkedin,
}

impl Channel {
    /// All channels in the fixed, canonical order.
    pub const ALL: [Channel; 4] = [Channel::Google, Channel::Meta, Channel::Tiktok, Channel::Linkedin];

    pub const COUNT: usize = 4;

    fn index(self) -> usize {
        match self {
            Channel::Google => 0,
            Channel::Meta => 1,
            Channel::Tiktok => 2,
            Channel::Linkedin => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Google => "google",
            Channel::Meta => "meta",
            Channel::Tiktok => "tiktok",
            Channel::Linkedin => "linkedin",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A total mapping `Channel -> T`: every channel is present exactly once,
/// by construction, not by convention.
///
/// Keeps the "every channel present exactly once" invariant structural
/// rather than something every call site must remember to check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelMap<T> {
    values: [T; Channel::COUNT],
}

impl<T> ChannelMap<T> {
    pub fn from_fn(mut f: impl FnMut(Channel) -> T) -> Self {
        let mut iter = Channel::ALL.into_iter().map(&mut f);
        // Channel::COUNT is 4; build explicitly to avoid needing T: Default.
        let values = [
            iter.next().unwrap_or_else(|| unreachable!("Channel::ALL has 4 entries")),
            iter.next().unwrap_or_else(|| unreachable!("Channel::ALL has 4 entries")),
            iter.next().unwrap_or_else(|| unreachable!("Channel::ALL has 4 entries")),
            iter.next().unwrap_or_else(|| unreachable!("Channel::ALL has 4 entries")),
        ];
        Self { values }
    }

    pub fn get(&self, c: Channel) -> &T {
        &self.values[c.index()]
    }

    pub fn get_mut(&mut self, c: Channel) -> &mut T {
        &mut self.values[c.index()]
    }

    pub fn set(&mut self, c: Channel, value: T) {
        self.values[c.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &T)> {
        Channel::ALL.into_iter().map(move |c| (c, self.get(c)))
    }

    pub fn map<U>(&self, mut f: impl FnMut(Channel, &T) -> U) -> ChannelMap<U> {
        ChannelMap::from_fn(|c| f(c, self.get(c)))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }
}

impl<T: Copy> ChannelMap<T> {
    pub fn filled(value: T) -> Self {
        Self { values: [value; Channel::COUNT] }
    }
}

impl ChannelMap<f64> {
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn zero() -> Self {
        Self::filled(0.0)
    }
}

impl Default for ChannelMap<f64> {
    fn default() -> Self {
        ChannelMap::zero()
    }
}

impl std::ops::Index<Channel> for ChannelMap<f64> {
    type Output = f64;
    fn index(&self, c: Channel) -> &f64 {
        self.get(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_channels_present_exactly_once() {
        let map = ChannelMap::from_fn(|c| c.as_str().len());
        for c in Channel::ALL {
            assert_eq!(*map.get(c), c.as_str().len());
        }
    }

    #[test]
    fn canonical_order_is_lexicographic_by_name() {
        let names: Vec<&str> = Channel::ALL.iter().map(|c| c.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
