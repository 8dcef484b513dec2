use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::EngineError;

/// Inclusive bounds of a numeric grade.
pub const NUMERIC_MIN: f64 = 1.0;
pub const NUMERIC_MAX: f64 = 20.0;

/// Inclusive bounds of a final grade after bonus.
pub const FINAL_MIN: f64 = 0.0;
pub const FINAL_MAX: f64 = 20.0;

/// A grading period. Moment 4 only exists in pending (remediation) sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Moment(u8);

impl Moment {
    pub const ALL: [Moment; 4] = [Moment(1), Moment(2), Moment(3), Moment(4)];

    pub fn new(n: i64) -> Result<Self, EngineError> {
        if (1..=4).contains(&n) {
            Ok(Moment(n as u8))
        } else {
            Err(EngineError::validation(
                "moment must be one of 1, 2, 3, 4",
                Some(serde_json::json!({ "moment": n })),
            ))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_pending(self) -> bool {
        self.0 == 4
    }

    /// Moments that feed a final grade, in chronological order.
    pub fn tracked(pending_section: bool) -> &'static [Moment] {
        if pending_section {
            &Self::ALL
        } else {
            &Self::ALL[..3]
        }
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Moment {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.0)
    }
}

/// Bonus ledger slot: one per moment, plus the synthetic "total" slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BonusSlot {
    Moment(Moment),
    Total,
}

impl BonusSlot {
    pub fn parse(v: &serde_json::Value) -> Result<Self, EngineError> {
        if let Some(n) = v.as_i64() {
            return Ok(BonusSlot::Moment(Moment::new(n)?));
        }
        match v.as_str().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("total") => Ok(BonusSlot::Total),
            Some(s) => match s.parse::<i64>() {
                Ok(n) => Ok(BonusSlot::Moment(Moment::new(n)?)),
                Err(_) => Err(EngineError::validation(
                    "moment must be 1-4 or \"total\"",
                    Some(serde_json::json!({ "moment": s })),
                )),
            },
            None => Err(EngineError::validation(
                "moment must be 1-4 or \"total\"",
                None,
            )),
        }
    }

    pub fn key(self) -> String {
        match self {
            BonusSlot::Moment(m) => m.to_string(),
            BonusSlot::Total => "total".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Letter {
    A,
    B,
    C,
    D,
    E,
}

impl Letter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Letter::A),
            "B" => Some(Letter::B),
            "C" => Some(Letter::C),
            "D" => Some(Letter::D),
            "E" => Some(Letter::E),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Letter::A => "A",
            Letter::B => "B",
            Letter::C => "C",
            Letter::D => "D",
            Letter::E => "E",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingMode {
    Numeric,
    Alphabetic,
    NotPresented,
    Absent,
}

impl GradingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "numeric" => Some(GradingMode::Numeric),
            "alphabetic" => Some(GradingMode::Alphabetic),
            "not_presented" => Some(GradingMode::NotPresented),
            "absent" => Some(GradingMode::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GradingMode::Numeric => "numeric",
            GradingMode::Alphabetic => "alphabetic",
            GradingMode::NotPresented => "not_presented",
            GradingMode::Absent => "absent",
        }
    }
}

/// A stored grade. Arithmetic only ever reads `Numeric`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeValue {
    Numeric(f64),
    Alphabetic(Letter),
    NotPresented,
    Absent,
}

impl GradeValue {
    pub fn mode(&self) -> GradingMode {
        match self {
            GradeValue::Numeric(_) => GradingMode::Numeric,
            GradeValue::Alphabetic(_) => GradingMode::Alphabetic,
            GradeValue::NotPresented => GradingMode::NotPresented,
            GradeValue::Absent => GradingMode::Absent,
        }
    }

    pub fn numeric(&self) -> Option<f64> {
        match self {
            GradeValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn letter(&self) -> Option<Letter> {
        match self {
            GradeValue::Alphabetic(l) => Some(*l),
            _ => None,
        }
    }

    /// Rebuilds a value from its storage columns.
    pub fn from_columns(
        mode: &str,
        numeric_value: Option<f64>,
        letter_value: Option<&str>,
    ) -> Option<Self> {
        match GradingMode::parse(mode)? {
            GradingMode::Numeric => numeric_value.map(GradeValue::Numeric),
            GradingMode::Alphabetic => letter_value
                .and_then(Letter::parse)
                .map(GradeValue::Alphabetic),
            GradingMode::NotPresented => Some(GradeValue::NotPresented),
            GradingMode::Absent => Some(GradeValue::Absent),
        }
    }
}

/// Result of a moment or final computation. `NotAvailable` is the N/A
/// sentinel and is never conflated with a zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    NotAvailable,
    Value(GradeValue),
}

impl Outcome {
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Outcome::Value(v) => v.numeric(),
            Outcome::NotAvailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Outcome::NotAvailable)
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::NotAvailable => s.serialize_str("N/A"),
            Outcome::Value(GradeValue::Numeric(v)) => s.serialize_f64(*v),
            Outcome::Value(GradeValue::Alphabetic(l)) => s.serialize_str(l.as_str()),
            Outcome::Value(GradeValue::NotPresented) => s.serialize_str("NP"),
            Outcome::Value(GradeValue::Absent) => s.serialize_str("ABS"),
        }
    }
}
