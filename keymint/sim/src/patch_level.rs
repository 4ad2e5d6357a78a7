// Copyright (C) Microsoft Corporation. All rights reserved.

//! Patch levels stamped into every key.
//!
//! The text form is the one used by `security_patch.txt`: either a single
//! date that applies to every component, or `key=value` lines for `system`,
//! `vendor`, `boot` with `all` as the fallback. Dates are accepted as
//! `YYYY-MM-DD`, `YYYYMMDD` or `YYYYMM`. The values `no` and `prop` leave a
//! component unset.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Patch level parse error
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatchLevelError {
    /// A component value is not a date
    #[error("invalid patch level date {0:?}")]
    InvalidDate(String),

    /// Unknown component key
    #[error("unknown patch level key {0:?}")]
    UnknownKey(String),
}

/// Patch levels of the system, vendor and boot images.
///
/// `system` is `YYYYMM`; `vendor` and `boot` are `YYYYMMDD`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchLevels {
    /// OS patch level (`YYYYMM`)
    pub system: Option<u32>,

    /// Vendor patch level (`YYYYMMDD`)
    pub vendor: Option<u32>,

    /// Boot patch level (`YYYYMMDD`)
    pub boot: Option<u32>,
}

impl PatchLevels {
    fn components(&self) -> [u32; 3] {
        [
            self.system.unwrap_or(0),
            self.vendor.unwrap_or(0),
            self.boot.unwrap_or(0),
        ]
    }

    /// Compares two sets of levels.
    ///
    /// Returns `None` when some components went up and others went down.
    pub fn compare(&self, other: &PatchLevels) -> Option<Ordering> {
        let mut result = Ordering::Equal;
        for (a, b) in self.components().iter().zip(other.components().iter()) {
            match (result, a.cmp(b)) {
                (_, Ordering::Equal) => {}
                (Ordering::Equal, ord) => result = ord,
                (cur, ord) if cur == ord => {}
                _ => return None,
            }
        }
        Some(result)
    }
}

/// A date normalized to its digits.
struct PatchDate {
    year: u32,
    month: u32,
    day: Option<u32>,
}

impl PatchDate {
    fn parse(value: &str) -> Result<Self, PatchLevelError> {
        let digits: String = value.chars().filter(|c| *c != '-').collect();
        let invalid = || PatchLevelError::InvalidDate(value.to_string());
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let num = |range: std::ops::Range<usize>| -> Result<u32, PatchLevelError> {
            digits
                .get(range)
                .and_then(|s| s.parse().ok())
                .ok_or_else(invalid)
        };
        let date = match digits.len() {
            8 => PatchDate {
                year: num(0..4)?,
                month: num(4..6)?,
                day: Some(num(6..8)?),
            },
            6 => PatchDate {
                year: num(0..4)?,
                month: num(4..6)?,
                day: None,
            },
            _ => return Err(invalid()),
        };
        if !(1..=12).contains(&date.month) || date.day.is_some_and(|d| !(1..=31).contains(&d)) {
            return Err(invalid());
        }
        Ok(date)
    }

    fn short(&self) -> u32 {
        self.year * 100 + self.month
    }

    fn long(&self) -> u32 {
        self.year * 10000 + self.month * 100 + self.day.unwrap_or(0)
    }
}

fn is_unset(value: &str) -> bool {
    value.eq_ignore_ascii_case("no") || value.eq_ignore_ascii_case("prop")
}

fn short_level(value: Option<&str>) -> Result<Option<u32>, PatchLevelError> {
    match value {
        None => Ok(None),
        Some(v) if is_unset(v) => Ok(None),
        Some(v) => Ok(Some(PatchDate::parse(v)?.short())),
    }
}

fn long_level(value: Option<&str>) -> Result<Option<u32>, PatchLevelError> {
    match value {
        None => Ok(None),
        Some(v) if is_unset(v) => Ok(None),
        Some(v) => Ok(Some(PatchDate::parse(v)?.long())),
    }
}

impl FromStr for PatchLevels {
    type Err = PatchLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lines: Vec<&str> = s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();

        let mut map = HashMap::new();
        match lines.as_slice() {
            [] => return Ok(PatchLevels::default()),
            [single] if !single.contains('=') => {
                map.insert("all".to_string(), single.to_string());
            }
            _ => {
                for line in lines {
                    let Some((key, value)) = line.split_once('=') else {
                        continue;
                    };
                    let key = key.trim().to_ascii_lowercase();
                    if !matches!(key.as_str(), "all" | "system" | "vendor" | "boot") {
                        return Err(PatchLevelError::UnknownKey(key));
                    }
                    map.insert(key, value.trim().to_string());
                }
            }
        }

        let all = map.get("all").map(String::as_str);
        let get = |key: &str| map.get(key).map(String::as_str).or(all);
        Ok(PatchLevels {
            system: short_level(get("system"))?,
            vendor: long_level(get("vendor"))?,
            boot: long_level(get("boot"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    #[test]
    fn test_simple_form() {
        let levels: PatchLevels = "2025-03-01\n".parse().expect("parse");
        assert_eq!(levels.system, Some(202503));
        assert_eq!(levels.vendor, Some(20250301));
        assert_eq!(levels.boot, Some(20250301));

        let levels: PatchLevels = "20240905".parse().expect("parse");
        assert_eq!(levels.system, Some(202409));
        assert_eq!(levels.boot, Some(20240905));
    }

    #[test]
    fn test_key_value_form() {
        let text = "# comment\nall=2024-01-05\nvendor=no\nboot = 2024-02-01\n";
        let levels: PatchLevels = text.parse().expect("parse");
        assert_eq!(levels.system, Some(202401));
        assert_eq!(levels.vendor, None);
        assert_eq!(levels.boot, Some(20240201));
    }

    #[test]
    fn test_month_only_long_form() {
        let levels: PatchLevels = "system=202312\nvendor=202312".parse().expect("parse");
        assert_eq!(levels.system, Some(202312));
        assert_eq!(levels.vendor, Some(20231200));
        assert_eq!(levels.boot, None);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            "2024-13-01".parse::<PatchLevels>(),
            Err(PatchLevelError::InvalidDate("2024-13-01".to_string()))
        );
        assert_eq!(
            "radio=2024-01-01".parse::<PatchLevels>(),
            Err(PatchLevelError::UnknownKey("radio".to_string()))
        );
        assert_eq!("".parse::<PatchLevels>(), Ok(PatchLevels::default()));
    }

    #[test]
    fn test_compare() {
        let old: PatchLevels = "2024-01-01".parse().expect("parse");
        let new: PatchLevels = "2024-06-01".parse().expect("parse");
        assert_eq!(old.compare(&new), Some(Ordering::Less));
        assert_eq!(new.compare(&old), Some(Ordering::Greater));
        assert_eq!(new.compare(&new), Some(Ordering::Equal));

        let mixed = PatchLevels {
            system: new.system,
            vendor: old.vendor,
            boot: new.boot,
        };
        assert_eq!(old.compare(&mixed), Some(Ordering::Less));
        let crossed = PatchLevels {
            system: old.system,
            vendor: new.vendor,
            boot: old.boot,
        };
        assert_eq!(mixed.compare(&crossed), None);
    }
}
