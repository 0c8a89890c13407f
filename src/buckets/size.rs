//! Fixed set of bucket granularities

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BucketSize {
    Min1,
    Min5,
    Min15,
    Min60,
}

impl BucketSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketSize::Min1 => "1m",
            BucketSize::Min5 => "5m",
            BucketSize::Min15 => "15m",
            BucketSize::Min60 => "60m",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            BucketSize::Min1 => 1,
            BucketSize::Min5 => 5,
            BucketSize::Min15 => 15,
            BucketSize::Min60 => 60,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        self.minutes() * 60
    }

    pub fn from_minutes(minutes: i64) -> Option<Self> {
        match minutes {
            1 => Some(BucketSize::Min1),
            5 => Some(BucketSize::Min5),
            15 => Some(BucketSize::Min15),
            60 => Some(BucketSize::Min60),
            _ => None,
        }
    }

    /// All sizes, smallest first
    pub fn all() -> [BucketSize; 4] {
        [
            BucketSize::Min1,
            BucketSize::Min5,
            BucketSize::Min15,
            BucketSize::Min60,
        ]
    }
}

impl std::fmt::Display for BucketSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_round_trip() {
        for size in BucketSize::all() {
            assert_eq!(BucketSize::from_minutes(size.minutes()), Some(size));
        }
        assert_eq!(BucketSize::from_minutes(30), None);
    }

    #[test]
    fn test_larger_sizes_divide_evenly() {
        let sizes = BucketSize::all();
        for (i, small) in sizes.iter().enumerate() {
            for large in &sizes[i..] {
                assert_eq!(large.minutes() % small.minutes(), 0);
            }
        }
    }
}
