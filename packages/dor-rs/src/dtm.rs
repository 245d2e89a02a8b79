use crate::error::{DorError, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// How many components an HL7 DTM value carried when it was parsed.
///
/// Rendering always reproduces the same precision so a shifted field keeps
/// its original shape on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    /// Seconds plus 1-4 fractional digits
    Fraction(u8),
}

/// HL7 v2 date/time value (`YYYY[MM[DD[HH[MM[SS[.S[S[S[S]]]]]]]]][+/-ZZZZ]`).
///
/// The instant is held in UTC. A value written without an explicit offset is
/// read as UTC and rendered back without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dtm {
    instant: DateTime<Utc>,
    precision: Precision,
    offset: Option<FixedOffset>,
}

impl Dtm {
    pub fn parse(text: &str) -> Result<Self> {
        let raw = text.trim();
        let invalid = || DorError::InvalidTimestamp(raw.to_string());

        // The year may not carry a sign, so only look for the zone after it
        let (body, zone) = match raw
            .char_indices()
            .skip(4)
            .find(|(_, c)| *c == '+' || *c == '-')
        {
            Some((idx, _)) => (&raw[..idx], Some(&raw[idx..])),
            None => (raw, None),
        };

        let (digits, fraction) = match body.split_once('.') {
            Some((d, f)) => (d, Some(f)),
            None => (body, None),
        };

        if !digits.bytes().all(|b| b.is_ascii_digit())
            || !matches!(digits.len(), 4 | 6 | 8 | 10 | 12 | 14)
        {
            return Err(invalid());
        }

        let part = |start: usize, default: u32| -> u32 {
            digits
                .get(start..start + 2)
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let year: i32 = digits[..4].parse().map_err(|_| invalid())?;

        let mut precision = match digits.len() {
            4 => Precision::Year,
            6 => Precision::Month,
            8 => Precision::Day,
            10 => Precision::Hour,
            12 => Precision::Minute,
            _ => Precision::Second,
        };

        let mut nanos = 0u32;
        if let Some(fraction) = fraction {
            if precision != Precision::Second
                || fraction.is_empty()
                || fraction.len() > 4
                || !fraction.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(invalid());
            }
            let value: u32 = fraction.parse().map_err(|_| invalid())?;
            nanos = value * 10u32.pow(9 - fraction.len() as u32);
            precision = Precision::Fraction(fraction.len() as u8);
        }

        let naive = NaiveDate::from_ymd_opt(year, part(4, 1), part(6, 1))
            .and_then(|date| date.and_hms_nano_opt(part(8, 0), part(10, 0), part(12, 0), nanos))
            .ok_or_else(invalid)?;

        let offset = zone.map(|z| parse_offset(z).ok_or_else(invalid)).transpose()?;

        let instant = match offset {
            Some(offset) => offset
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(invalid)?
                .with_timezone(&Utc),
            None => Utc.from_utc_datetime(&naive),
        };

        Ok(Self {
            instant,
            precision,
            offset,
        })
    }

    /// Millisecond-precision value without explicit offset.
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            precision: Precision::Fraction(3),
            offset: None,
        }
    }

    /// The current instant in the zone style of `self`.
    pub fn now_like(&self) -> Self {
        self.stamped(Utc::now())
    }

    /// `instant` in the zone style of `self`, never coarser than milliseconds.
    pub fn stamped(&self, instant: DateTime<Utc>) -> Self {
        let precision = match self.precision {
            Precision::Fraction(digits) if digits >= 3 => self.precision,
            _ => Precision::Fraction(3),
        };
        Self {
            instant,
            precision,
            offset: self.offset,
        }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Shift by a signed duration. Arithmetic happens in UTC.
    pub fn shifted(&self, delta: TimeDelta) -> Self {
        Self {
            instant: self.instant + delta,
            ..self.clone()
        }
    }

    fn local(&self) -> NaiveDateTime {
        match self.offset {
            Some(offset) => self.instant.with_timezone(&offset).naive_local(),
            None => self.instant.naive_utc(),
        }
    }
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let bytes = zone.as_bytes();
    if bytes.len() != 5 || !zone[1..].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = zone[1..3].parse().ok()?;
    let minutes: i32 = zone[3..5].parse().ok()?;
    let seconds = hours * 3600 + minutes * 60;
    match bytes[0] {
        b'+' => FixedOffset::east_opt(seconds),
        b'-' => FixedOffset::west_opt(seconds),
        _ => None,
    }
}

impl fmt::Display for Dtm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self.local();
        let pattern = match self.precision {
            Precision::Year => "%Y",
            Precision::Month => "%Y%m",
            Precision::Day => "%Y%m%d",
            Precision::Hour => "%Y%m%d%H",
            Precision::Minute => "%Y%m%d%H%M",
            Precision::Second | Precision::Fraction(_) => "%Y%m%d%H%M%S",
        };
        write!(f, "{}", local.format(pattern))?;

        if let Precision::Fraction(digits) = self.precision {
            let nanos = format!("{:09}", local.nanosecond() % 1_000_000_000);
            write!(f, ".{}", &nanos[..digits as usize])?;
        }

        if let Some(offset) = self.offset {
            let seconds = offset.local_minus_utc();
            let sign = if seconds < 0 { '-' } else { '+' };
            let seconds = seconds.abs();
            write!(f, "{}{:02}{:02}", sign, seconds / 3600, (seconds % 3600) / 60)?;
        }

        Ok(())
    }
}

impl FromStr for Dtm {
    type Err = DorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
