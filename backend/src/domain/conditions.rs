//! Flush policy for buffered webhook batches.
//!
//! A [`Conditions`] value holds up to three optional thresholds: buffered row
//! count, age since the last successful export, and buffered byte size. A batch
//! is due for export as soon as any configured threshold is strictly exceeded.
//! When no threshold is configured the [`DEFAULT_COUNT`] row threshold applies
//! at evaluation time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound for the row-count threshold.
pub const MAX_COUNT: u32 = 10_000;
/// Upper bound for the age threshold.
pub const MAX_TIME: Duration = Duration::from_secs(30 * 60);
/// Upper bound for the byte-size threshold (100 MiB).
pub const MAX_SIZE: u64 = 100 * MIB;
/// Row-count threshold used when no threshold is configured.
pub const DEFAULT_COUNT: u32 = 1_000;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;

/// Validation failures raised while setting thresholds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionsError {
    /// Row-count threshold above [`MAX_COUNT`].
    #[error("count is too high: {count} exceeds the maximum of 10000")]
    CountTooHigh { count: u32 },
    /// Age threshold could not be parsed.
    #[error("invalid time value \"{value}\": {reason}")]
    InvalidTime { value: String, reason: String },
    /// Age threshold above [`MAX_TIME`].
    #[error("time is too high: \"{value}\" exceeds the maximum of 30m")]
    TimeTooHigh { value: String },
    /// Size threshold could not be parsed.
    #[error("invalid size value \"{value}\". use format X MB|KB")]
    InvalidSize { value: String },
    /// Size threshold above [`MAX_SIZE`].
    #[error("size is too big: \"{value}\" exceeds the maximum of 100MB")]
    SizeTooBig { value: String },
}

/// Transport-neutral conditions payload as submitted by callers.
///
/// ```
/// use webhook_batcher::domain::{Conditions, ConditionsInput};
///
/// let input = ConditionsInput {
///     count: Some(500),
///     time: Some("20s".to_owned()),
///     size: None,
/// };
/// let conditions = Conditions::from_input(Some(&input)).expect("valid conditions");
/// assert_eq!(conditions.count(), Some(500));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionsInput {
    /// Row-count threshold.
    pub count: Option<u32>,
    /// Age threshold in humantime syntax (`"30s"`, `"5m"`).
    pub time: Option<String>,
    /// Size threshold such as `"10MB"` or `"512 KB"`.
    pub size: Option<String>,
}

/// Rendered view of configured thresholds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionsView {
    /// Row-count threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Age threshold, e.g. `"20s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Size threshold, e.g. `"10MB"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Flush policy attached to every webhook.
///
/// ## Invariants
/// - Every configured threshold is within its maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conditions {
    count: Option<u32>,
    time: Option<Duration>,
    size: Option<u64>,
}

impl Conditions {
    /// Conditions with no configured threshold.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild conditions from already-parsed values, re-checking maxima.
    pub fn from_parts(
        count: Option<u32>,
        time: Option<Duration>,
        size: Option<u64>,
    ) -> Result<Self, ConditionsError> {
        let mut conditions = Self::new();
        conditions.set_count(count)?;
        if let Some(time) = time {
            if time > MAX_TIME {
                return Err(ConditionsError::TimeTooHigh {
                    value: format_time(time),
                });
            }
            conditions.time = Some(time);
        }
        if let Some(size) = size {
            if size > MAX_SIZE {
                return Err(ConditionsError::SizeTooBig {
                    value: format_size(size),
                });
            }
            conditions.size = Some(size);
        }
        Ok(conditions)
    }

    /// Build conditions from a caller payload; an absent payload yields no
    /// thresholds.
    pub fn from_input(input: Option<&ConditionsInput>) -> Result<Self, ConditionsError> {
        let mut conditions = Self::new();
        if let Some(input) = input {
            conditions.set_count(input.count)?;
            conditions.set_time(input.time.as_deref())?;
            conditions.set_size(input.size.as_deref())?;
        }
        Ok(conditions)
    }

    /// Set or clear the row-count threshold.
    pub fn set_count(&mut self, count: Option<u32>) -> Result<(), ConditionsError> {
        if let Some(count) = count
            && count > MAX_COUNT
        {
            return Err(ConditionsError::CountTooHigh { count });
        }
        self.count = count;
        Ok(())
    }

    /// Set or clear the age threshold from humantime syntax.
    ///
    /// ```
    /// use std::time::Duration;
    /// use webhook_batcher::domain::Conditions;
    ///
    /// let mut conditions = Conditions::new();
    /// conditions.set_time(Some("20s")).expect("20s is valid");
    /// assert_eq!(conditions.time(), Some(Duration::from_secs(20)));
    /// assert!(conditions.set_time(Some("50m")).is_err());
    /// ```
    pub fn set_time(&mut self, value: Option<&str>) -> Result<(), ConditionsError> {
        let Some(raw) = value else {
            self.time = None;
            return Ok(());
        };
        let parsed =
            humantime::parse_duration(raw.trim()).map_err(|err| ConditionsError::InvalidTime {
                value: raw.to_owned(),
                reason: err.to_string(),
            })?;
        // Thresholds are persisted in whole milliseconds.
        if parsed.subsec_nanos() % 1_000_000 != 0 {
            return Err(ConditionsError::InvalidTime {
                value: raw.to_owned(),
                reason: "precision finer than one millisecond is not supported".to_owned(),
            });
        }
        if parsed > MAX_TIME {
            return Err(ConditionsError::TimeTooHigh {
                value: raw.to_owned(),
            });
        }
        self.time = Some(parsed);
        Ok(())
    }

    /// Set or clear the size threshold. Units are binary: `"10MB"` is
    /// 10 485 760 bytes.
    ///
    /// ```
    /// use webhook_batcher::domain::Conditions;
    ///
    /// let mut conditions = Conditions::new();
    /// conditions.set_size(Some("10MB")).expect("10MB is valid");
    /// assert_eq!(conditions.size(), Some(10_485_760));
    /// ```
    pub fn set_size(&mut self, value: Option<&str>) -> Result<(), ConditionsError> {
        let Some(raw) = value else {
            self.size = None;
            return Ok(());
        };
        let parsed = parse_byte_size(raw).ok_or_else(|| ConditionsError::InvalidSize {
            value: raw.to_owned(),
        })?;
        if parsed > MAX_SIZE {
            return Err(ConditionsError::SizeTooBig {
                value: raw.to_owned(),
            });
        }
        self.size = Some(parsed);
        Ok(())
    }

    /// Configured row-count threshold.
    pub fn count(&self) -> Option<u32> {
        self.count
    }

    /// Configured age threshold.
    pub fn time(&self) -> Option<Duration> {
        self.time
    }

    /// Configured size threshold in bytes.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Whether no threshold is configured.
    pub fn is_empty(&self) -> bool {
        self.count.is_none() && self.time.is_none() && self.size.is_none()
    }

    /// Decide whether a batch with the given accounting is due for export.
    ///
    /// Returns true iff any configured threshold is strictly exceeded. With no
    /// thresholds configured, [`DEFAULT_COUNT`] stands in for the count.
    ///
    /// ```
    /// use std::time::Duration;
    /// use webhook_batcher::domain::Conditions;
    ///
    /// let conditions = Conditions::new();
    /// assert!(!conditions.should_flush(1_000, Duration::from_secs(3600), u64::MAX));
    /// assert!(conditions.should_flush(1_001, Duration::ZERO, 0));
    /// ```
    pub fn should_flush(&self, count: u64, age: Duration, size_bytes: u64) -> bool {
        let count_threshold = if self.is_empty() {
            Some(DEFAULT_COUNT)
        } else {
            self.count
        };

        count_threshold.is_some_and(|threshold| count > u64::from(threshold))
            || self.size.is_some_and(|threshold| size_bytes > threshold)
            || self.time.is_some_and(|threshold| age > threshold)
    }

    /// Render configured thresholds for callers.
    pub fn view(&self) -> ConditionsView {
        ConditionsView {
            count: self.count,
            time: self.time.map(format_time),
            size: self.size.map(format_size),
        }
    }
}

fn format_time(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Render a byte count with the largest binary unit that divides it exactly.
fn format_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(TIB, "TB"), (GIB, "GB"), (MIB, "MB"), (KIB, "KB")];
    UNITS
        .iter()
        .find(|(unit, _)| bytes >= *unit && bytes % unit == 0)
        .map_or_else(
            || format!("{bytes}B"),
            |(unit, suffix)| format!("{}{suffix}", bytes / unit),
        )
}

/// Parse `"<integer> <unit>"` where unit is one of B, K/KB/KiB, M/MB/MiB,
/// G/GB/GiB, T/TB/TiB (case-insensitive). A bare integer is bytes.
fn parse_byte_size(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let digits_end = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(digits_end);
    if digits.is_empty() {
        return None;
    }
    let value: u64 = digits.parse().ok()?;
    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        "t" | "tb" | "tib" => TIB,
        _ => return None,
    };
    value.checked_mul(multiplier)
}
