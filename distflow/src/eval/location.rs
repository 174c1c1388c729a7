// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Session time zone resolution

use crate::error::{FlowError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static FIXED_OFFSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([+-])?(\d{1,2})(?::?(\d{2}))?$").expect("fixed offset pattern is valid")
});

/// A resolved time zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Location {
    Utc,
    /// IANA time zone such as `America/New_York`
    Named(Tz),
    /// Fixed offset from UTC such as `+05:30`
    Fixed(FixedOffset),
}

impl Location {
    /// Resolve a time zone name the way session settings accept it:
    /// empty or `UTC`, an IANA name, or a fixed offset (`+05:30`, `-8`).
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") {
            return Ok(Location::Utc);
        }
        if let Ok(tz) = trimmed.parse::<Tz>() {
            return Ok(Location::Named(tz));
        }
        if let Some(caps) = FIXED_OFFSET.captures(trimmed) {
            let sign = if caps.get(1).map(|m| m.as_str()) == Some("-") {
                -1
            } else {
                1
            };
            let hours: i32 = caps[2]
                .parse()
                .map_err(|_| FlowError::InvalidTimeZone(name.to_string()))?;
            let minutes: i32 = match caps.get(3) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| FlowError::InvalidTimeZone(name.to_string()))?,
                None => 0,
            };
            if hours > 15 || minutes > 59 {
                return Err(FlowError::InvalidTimeZone(name.to_string()));
            }
            let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
                .ok_or_else(|| FlowError::InvalidTimeZone(name.to_string()))?;
            return Ok(Location::Fixed(offset));
        }
        Err(FlowError::InvalidTimeZone(name.to_string()))
    }

    /// Offset from UTC in seconds at the given instant
    pub fn offset_seconds_at(&self, instant: DateTime<Utc>) -> i32 {
        use chrono::Offset;
        match self {
            Location::Utc => 0,
            Location::Named(tz) => instant.with_timezone(tz).offset().fix().local_minus_utc(),
            Location::Fixed(offset) => offset.local_minus_utc(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Utc => f.write_str("UTC"),
            Location::Named(tz) => f.write_str(tz.name()),
            Location::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_utc_forms() {
        assert_eq!(Location::parse("").unwrap(), Location::Utc);
        assert_eq!(Location::parse("utc").unwrap(), Location::Utc);
        assert_eq!(Location::parse(" UTC ").unwrap(), Location::Utc);
    }

    #[test]
    fn test_named_zone() {
        let loc = Location::parse("America/New_York").unwrap();
        assert_eq!(loc.to_string(), "America/New_York");
        let winter = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(loc.offset_seconds_at(winter), -5 * 3600);
    }

    #[test]
    fn test_fixed_offsets() {
        let loc = Location::parse("+05:30").unwrap();
        assert_eq!(loc.offset_seconds_at(Utc::now()), 5 * 3600 + 30 * 60);
        let loc = Location::parse("-8").unwrap();
        assert_eq!(loc.offset_seconds_at(Utc::now()), -8 * 3600);
    }

    #[test]
    fn test_invalid_zone() {
        for bad in ["Mars/Olympus_Mons", "+25:00", "+05:75", "five"] {
            assert!(
                matches!(Location::parse(bad), Err(FlowError::InvalidTimeZone(_))),
                "{} should be rejected",
                bad
            );
        }
    }
}
