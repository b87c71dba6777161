use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Source of "now" for reconciliation. Nothing under `mirror` reads the wall
/// clock except through this trait.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Pinned clock for reconciliation tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl FixedClock {
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .map(Self)
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn month_key(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%Y-%m").to_string()
}

pub fn date_key(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%Y-%m-%d").to_string()
}

pub fn utc_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Every `YYYY-MM` key from `start` through `end`, inclusive. Malformed keys
/// produce an empty range.
pub fn month_range(start: &str, end: &str) -> Vec<String> {
    fn split(key: &str) -> Option<(i32, u32)> {
        let (y, m) = key.split_once('-')?;
        let year = y.parse::<i32>().ok()?;
        let month = m.parse::<u32>().ok()?;
        (1..=12).contains(&month).then_some((year, month))
    }

    let (Some((mut year, mut month)), Some((end_year, end_month))) = (split(start), split(end))
    else {
        return Vec::new();
    };
    let mut out = Vec::new();
    while (year, month) <= (end_year, end_month) {
        out.push(format!("{year:04}-{month:02}"));
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    out
}
