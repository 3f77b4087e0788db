//! Age buckets and age validation.
//!
//! Two independent classifiers live here: [`AgeBucket`] steers wellness and
//! chat content, [`DietBucket`] is the coarser split used for diet plans.
//! Their boundaries differ on purpose and must not be merged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const MIN_AGE: f64 = 0.0;
pub const MAX_AGE: f64 = 120.0;

const BAND_WIDTH: u32 = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("age is required")]
    MissingAge,
    #[error("invalid age format")]
    InvalidAge,
    #[error("age must be between 0 and 120, got {0}")]
    AgeOutOfRange(f64),
    #[error("{0}")]
    Invalid(String),
}

/// Content-steering bucket. Closed-open ranges covering [0, 120].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBucket {
    Child,
    Teen,
    Twenties,
    Thirties,
    Forties,
    FiftiesToEarlySeniors,
    Senior,
}

impl AgeBucket {
    /// Callers validate the range first; anything at or above 65 is `Senior`.
    pub fn from_age(age: f64) -> Self {
        if age < 13.0 {
            Self::Child
        } else if age < 18.0 {
            Self::Teen
        } else if age < 30.0 {
            Self::Twenties
        } else if age < 40.0 {
            Self::Thirties
        } else if age < 50.0 {
            Self::Forties
        } else if age < 65.0 {
            Self::FiftiesToEarlySeniors
        } else {
            Self::Senior
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Teen => "teen",
            Self::Twenties => "twenties",
            Self::Thirties => "thirties",
            Self::Forties => "forties",
            Self::FiftiesToEarlySeniors => "fifties_to_early_seniors",
            Self::Senior => "senior",
        }
    }

    pub fn is_minor(&self) -> bool {
        matches!(self, Self::Child | Self::Teen)
    }
}

impl fmt::Display for AgeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diet-plan bucket (<18, <40, <60, else).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DietBucket {
    Teen,
    YoungAdult,
    MiddleAged,
    Senior,
}

impl DietBucket {
    pub fn from_age(age: f64) -> Self {
        if age < 18.0 {
            Self::Teen
        } else if age < 40.0 {
            Self::YoungAdult
        } else if age < 60.0 {
            Self::MiddleAged
        } else {
            Self::Senior
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teen => "teen",
            Self::YoungAdult => "young_adult",
            Self::MiddleAged => "middle_aged",
            Self::Senior => "senior",
        }
    }
}

impl fmt::Display for DietBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-year age band, e.g. `20-25` for an estimated age of 23.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeBand {
    pub lower: u32,
    pub upper: u32,
}

impl AgeBand {
    pub fn from_age(age: f64) -> Self {
        let years = if age.is_finite() && age > 0.0 { age.trunc() as u32 } else { 0 };
        let lower = (years / BAND_WIDTH) * BAND_WIDTH;
        Self {
            lower,
            upper: lower + BAND_WIDTH,
        }
    }
}

impl fmt::Display for AgeBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lower, self.upper)
    }
}

/// Validate a caller-supplied age. Accepts JSON numbers and numeric strings.
pub fn validate_age(value: Option<&Value>) -> Result<f64, ValidationError> {
    let age = match value {
        None | Some(Value::Null) => return Err(ValidationError::MissingAge),
        Some(Value::Number(n)) => n.as_f64().ok_or(ValidationError::InvalidAge)?,
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| ValidationError::InvalidAge)?,
        Some(_) => return Err(ValidationError::InvalidAge),
    };

    if !age.is_finite() {
        return Err(ValidationError::InvalidAge);
    }
    if !(MIN_AGE..=MAX_AGE).contains(&age) {
        return Err(ValidationError::AgeOutOfRange(age));
    }
    Ok(age)
}

fn whole_years(age: f64) -> Option<i64> {
    (age.fract() == 0.0 && age.abs() < 1e15).then_some(age as i64)
}

/// Canonical store key for an age. Integral ages drop the fractional part so
/// that `34` reported by face analysis and `34.0` sent by a client match.
pub fn age_key(age: f64) -> String {
    match whole_years(age) {
        Some(years) => years.to_string(),
        None => age.to_string(),
    }
}

/// An age as a JSON number, integral ages without a fractional part.
pub fn age_json(age: f64) -> Value {
    match whole_years(age) {
        Some(years) => Value::from(years),
        None => Value::from(age),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bucket_boundaries_closed_open() {
        assert_eq!(AgeBucket::from_age(0.0), AgeBucket::Child);
        assert_eq!(AgeBucket::from_age(12.999), AgeBucket::Child);
        assert_eq!(AgeBucket::from_age(13.0), AgeBucket::Teen);
        assert_eq!(AgeBucket::from_age(17.999), AgeBucket::Teen);
        assert_eq!(AgeBucket::from_age(18.0), AgeBucket::Twenties);
        assert_eq!(AgeBucket::from_age(30.0), AgeBucket::Thirties);
        assert_eq!(AgeBucket::from_age(40.0), AgeBucket::Forties);
        assert_eq!(AgeBucket::from_age(50.0), AgeBucket::FiftiesToEarlySeniors);
        assert_eq!(AgeBucket::from_age(64.999), AgeBucket::FiftiesToEarlySeniors);
        assert_eq!(AgeBucket::from_age(65.0), AgeBucket::Senior);
        assert_eq!(AgeBucket::from_age(70.0), AgeBucket::Senior);
        assert_eq!(AgeBucket::from_age(120.0), AgeBucket::Senior);
    }

    #[test]
    fn test_bucket_total_and_monotonic() {
        // Walk [0, 120) in small steps: every age maps somewhere and the
        // bucket index never goes backwards.
        let order = |b: AgeBucket| b as u8;
        let mut prev = order(AgeBucket::from_age(0.0));
        let mut age = 0.0;
        while age < 120.0 {
            let cur = order(AgeBucket::from_age(age));
            assert!(cur >= prev, "bucket regressed at {age}");
            assert!(cur - prev <= 1, "bucket skipped at {age}");
            prev = cur;
            age += 0.25;
        }
    }

    #[test]
    fn test_bucket_serializes_snake_case() {
        let v = serde_json::to_value(AgeBucket::FiftiesToEarlySeniors).unwrap();
        assert_eq!(v, json!("fifties_to_early_seniors"));
        assert_eq!(AgeBucket::Senior.to_string(), "senior");
    }

    #[test]
    fn test_diet_bucket_independent_boundaries() {
        assert_eq!(DietBucket::from_age(17.0), DietBucket::Teen);
        assert_eq!(DietBucket::from_age(18.0), DietBucket::YoungAdult);
        assert_eq!(DietBucket::from_age(39.0), DietBucket::YoungAdult);
        assert_eq!(DietBucket::from_age(40.0), DietBucket::MiddleAged);
        assert_eq!(DietBucket::from_age(60.0), DietBucket::Senior);
        // 13 is a teen in both, but 30 is "twenties"-adjacent only in one.
        assert_eq!(AgeBucket::from_age(30.0).as_str(), "thirties");
        assert_eq!(DietBucket::from_age(30.0).as_str(), "young_adult");
    }

    #[test]
    fn test_five_year_band() {
        assert_eq!(AgeBand::from_age(23.7).to_string(), "20-25");
        assert_eq!(AgeBand::from_age(25.0).to_string(), "25-30");
        assert_eq!(AgeBand::from_age(4.9).to_string(), "0-5");
        assert_eq!(AgeBand::from_age(-3.0).to_string(), "0-5");
    }

    #[test]
    fn test_age_json_matches_key() {
        assert_eq!(age_json(34.0), json!(34));
        assert_eq!(age_json(23.7), json!(23.7));
        assert_eq!(age_json(0.0).to_string(), "0");
        for age in [34.0, 23.7, 120.0] {
            assert_eq!(age_json(age).to_string(), age_key(age));
        }
    }

    #[test]
    fn test_validate_age() {
        assert_eq!(validate_age(Some(&json!(42))), Ok(42.0));
        assert_eq!(validate_age(Some(&json!("18.5"))), Ok(18.5));
        assert_eq!(validate_age(Some(&json!(0))), Ok(0.0));
        assert_eq!(validate_age(Some(&json!(120))), Ok(120.0));
        assert_eq!(validate_age(None), Err(ValidationError::MissingAge));
        assert_eq!(validate_age(Some(&Value::Null)), Err(ValidationError::MissingAge));
        assert_eq!(validate_age(Some(&json!("abc"))), Err(ValidationError::InvalidAge));
        assert_eq!(validate_age(Some(&json!([1]))), Err(ValidationError::InvalidAge));
        assert_eq!(
            validate_age(Some(&json!(121))),
            Err(ValidationError::AgeOutOfRange(121.0))
        );
        assert_eq!(
            validate_age(Some(&json!(-1))),
            Err(ValidationError::AgeOutOfRange(-1.0))
        );
    }

    #[test]
    fn test_age_key_canonical() {
        assert_eq!(age_key(34.0), "34");
        assert_eq!(age_key(34.5), "34.5");
        assert_eq!(age_key(0.0), "0");
    }
}
