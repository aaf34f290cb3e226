use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unit of a relative deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineUnit {
    Days,
    Weeks,
    Months,
    Years,
}

/// A deadline as stored in compiled IR: a duration token, never a date.
///
/// Dates only appear when a decision is made, via [`DeadlineSpec::materialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineSpec {
    Relative { amount: u32, unit: DeadlineUnit },
    Ongoing,
}

/// A materialized deadline attached to an obligation in a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Due {
    At(DateTime<Utc>),
    Ongoing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid deadline '{0}': expected '<n> days|weeks|months|years' or 'ongoing'")]
pub struct InvalidDeadline(pub String);

impl DeadlineSpec {
    /// Resolve against the evaluation timestamp. Months and years use
    /// calendar arithmetic (Jan 31 + 1 month = Feb 28/29). Returns `None` if
    /// the date would overflow chrono's range.
    #[must_use]
    pub fn materialize(self, evaluated_at: DateTime<Utc>) -> Option<Due> {
        match self {
            DeadlineSpec::Ongoing => Some(Due::Ongoing),
            DeadlineSpec::Relative { amount, unit } => {
                let at = match unit {
                    DeadlineUnit::Days => evaluated_at.checked_add_days(Days::new(amount.into())),
                    DeadlineUnit::Weeks => {
                        evaluated_at.checked_add_days(Days::new(u64::from(amount) * 7))
                    }
                    DeadlineUnit::Months => evaluated_at.checked_add_months(Months::new(amount)),
                    DeadlineUnit::Years => amount
                        .checked_mul(12)
                        .and_then(|m| evaluated_at.checked_add_months(Months::new(m))),
                }?;
                Some(Due::At(at))
            }
        }
    }
}

impl FromStr for DeadlineSpec {
    type Err = InvalidDeadline;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidDeadline(s.to_owned());
        let lowered = s.trim().to_ascii_lowercase();
        if lowered == "ongoing" {
            return Ok(DeadlineSpec::Ongoing);
        }

        let mut parts = lowered.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        let amount: u32 = amount.parse().map_err(|_| invalid())?;
        let unit = match unit {
            "day" | "days" => DeadlineUnit::Days,
            "week" | "weeks" => DeadlineUnit::Weeks,
            "month" | "months" => DeadlineUnit::Months,
            "year" | "years" => DeadlineUnit::Years,
            _ => return Err(invalid()),
        };
        Ok(DeadlineSpec::Relative { amount, unit })
    }
}

impl fmt::Display for DeadlineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadlineSpec::Ongoing => f.write_str("ongoing"),
            DeadlineSpec::Relative { amount, unit } => {
                let unit = match unit {
                    DeadlineUnit::Days => "day",
                    DeadlineUnit::Weeks => "week",
                    DeadlineUnit::Months => "month",
                    DeadlineUnit::Years => "year",
                };
                let plural = if *amount == 1 { "" } else { "s" };
                write!(f, "{amount} {unit}{plural}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn parse_relative() {
        assert_eq!(
            "60 days".parse::<DeadlineSpec>(),
            Ok(DeadlineSpec::Relative { amount: 60, unit: DeadlineUnit::Days })
        );
        assert_eq!(
            " 1 Month ".parse::<DeadlineSpec>(),
            Ok(DeadlineSpec::Relative { amount: 1, unit: DeadlineUnit::Months })
        );
        assert_eq!("ongoing".parse::<DeadlineSpec>(), Ok(DeadlineSpec::Ongoing));
    }

    #[test]
    fn parse_rejects_garbage() {
        for input in ["", "soon", "60", "days 60", "-3 days", "3 fortnights", "1 day extra"] {
            assert!(input.parse::<DeadlineSpec>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn display_round_trips() {
        for input in ["60 days", "1 week", "3 months", "2 years", "ongoing"] {
            let spec: DeadlineSpec = input.parse().unwrap();
            assert_eq!(spec.to_string(), input);
        }
    }

    #[test]
    fn materialize_days_and_weeks() {
        let spec: DeadlineSpec = "60 days".parse().unwrap();
        assert_eq!(spec.materialize(at(2024, 6, 30)), Some(Due::At(at(2024, 8, 29))));
        let spec: DeadlineSpec = "2 weeks".parse().unwrap();
        assert_eq!(spec.materialize(at(2024, 1, 1)), Some(Due::At(at(2024, 1, 15))));
    }

    #[test]
    fn materialize_months_clamps_to_month_end() {
        let spec: DeadlineSpec = "1 month".parse().unwrap();
        assert_eq!(spec.materialize(at(2024, 1, 31)), Some(Due::At(at(2024, 2, 29))));
        let spec: DeadlineSpec = "1 year".parse().unwrap();
        assert_eq!(spec.materialize(at(2024, 2, 29)), Some(Due::At(at(2025, 2, 28))));
    }

    #[test]
    fn materialize_ongoing() {
        assert_eq!(DeadlineSpec::Ongoing.materialize(at(2024, 1, 1)), Some(Due::Ongoing));
    }
}
