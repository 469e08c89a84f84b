//! Five-field cron expressions: `minute hour day-of-month month day-of-week`.
//!
//! Supported syntax per field: `*`, `*/N`, `N`, `N-M`, `N-M/S`, `N/S` and
//! comma-separated lists of those. Day-of-week counts from 0 = Sunday.
//! Fields are matched against the wall clock of the time zone the
//! timestamp carries.

use chrono::{DateTime, Datelike, TimeZone, Timelike};

/// A parsed cron expression. Each field is a bitmask of allowed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", min: 0, max: 59 },
    FieldSpec { name: "hour", min: 0, max: 23 },
    FieldSpec { name: "day-of-month", min: 1, max: 31 },
    FieldSpec { name: "month", min: 1, max: 12 },
    FieldSpec { name: "day-of-week", min: 0, max: 6 },
];

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour dom month dow), got {}",
                fields.len()
            ));
        }

        let mut masks = [0u64; 5];
        for (i, (field, spec)) in fields.iter().zip(FIELDS.iter()).enumerate() {
            masks[i] = parse_field(field, spec)?;
        }

        Ok(Self {
            minutes: masks[0],
            hours: masks[1],
            days_of_month: masks[2],
            months: masks[3],
            days_of_week: masks[4],
        })
    }

    /// Whether the minute containing `at` is selected by this expression.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        let bit = |mask: u64, v: u32| mask & (1u64 << v) != 0;
        bit(self.minutes, at.minute())
            && bit(self.hours, at.hour())
            && bit(self.days_of_month, at.day())
            && bit(self.months, at.month())
            && bit(self.days_of_week, at.weekday().num_days_from_sunday())
    }
}

impl std::str::FromStr for CronExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, String> {
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}' in {} field", spec.name))?;
                if step == 0 {
                    return Err(format!("step cannot be zero in {} field", spec.name));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo = parse_value(lo, spec)?;
            let hi = parse_value(hi, spec)?;
            if lo > hi {
                return Err(format!("range {lo}-{hi} is reversed in {} field", spec.name));
            }
            (lo, hi)
        } else {
            let v = parse_value(range, spec)?;
            // "N/S" runs from N to the end of the field
            if part.contains('/') { (v, spec.max) } else { (v, v) }
        };

        let mut v = start;
        while v <= end {
            mask |= 1u64 << v;
            v += step;
        }
    }

    if mask == 0 {
        return Err(format!("{} field selects nothing", spec.name));
    }
    Ok(mask)
}

fn parse_value(s: &str, spec: &FieldSpec) -> Result<u32, String> {
    let v: u32 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid number '{s}' in {} field", spec.name))?;
    if v < spec.min || v > spec.max {
        return Err(format!(
            "{v} out of range {}-{} for {} field",
            spec.min, spec.max, spec.name
        ));
    }
    Ok(v)
}
