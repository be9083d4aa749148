use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Value shape a feature accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Double,
    String,
    File,
    Stream,
    Any,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Integer,
        DataType::Double,
        DataType::String,
        DataType::File,
        DataType::Stream,
        DataType::Any,
    ];

    pub fn code(self) -> i32 {
        match self {
            DataType::Integer => 0,
            DataType::Double => 1,
            DataType::String => 2,
            DataType::File => 3,
            DataType::Stream => 4,
            DataType::Any => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Integer | DataType::Double)
    }

    /// Structural check of a raw value.
    pub fn accepts(self, value: &str) -> bool {
        match self {
            DataType::Integer => value.trim().parse::<i64>().is_ok(),
            DataType::Double => value
                .trim()
                .parse::<f64>()
                .is_ok_and(|number| number.is_finite()),
            DataType::String | DataType::File | DataType::Stream => {
                value.bytes().all(|b| (0x20..=0x7e).contains(&b))
            }
            DataType::Any => true,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "integer",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::File => "file",
            DataType::Stream => "stream",
            DataType::Any => "any",
        };
        f.write_str(name)
    }
}

/// How `allowed_values` constrains a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Limiter {
    /// No constraint beyond the data type.
    Any,
    /// Value must be one of `allowed_values` (case-insensitive).
    Set,
    /// Inclusive `[allowed_values[0], allowed_values[1]]`.
    Range,
    /// Fixed by the device.
    Const,
    /// Reports a size; not settable.
    Size,
}

impl Limiter {
    pub const ALL: [Limiter; 5] = [
        Limiter::Any,
        Limiter::Set,
        Limiter::Range,
        Limiter::Const,
        Limiter::Size,
    ];

    pub fn code(self) -> i32 {
        match self {
            Limiter::Any => 0,
            Limiter::Set => 1,
            Limiter::Range => 2,
            Limiter::Const => 3,
            Limiter::Size => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.code() == code)
    }
}

impl fmt::Display for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Limiter::Any => "any",
            Limiter::Set => "set",
            Limiter::Range => "range",
            Limiter::Const => "const",
            Limiter::Size => "size",
        };
        f.write_str(name)
    }
}

/// One tunable (or reported) property of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub limiter: Limiter,
    #[serde(default, rename = "values")]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub current: String,
}

impl Feature {
    pub fn new(
        name: impl Into<String>,
        data_type: DataType,
        limiter: Limiter,
        allowed_values: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            limiter,
            allowed_values,
            current: String::new(),
        }
    }

    pub fn with_current(mut self, current: impl Into<String>) -> Self {
        self.current = current.into();
        self
    }

    /// Check that `allowed_values` make sense for the limiter.
    pub fn check_limits(&self) -> Result<(), ValidationError> {
        let bad = |detail: String| ValidationError::BadLimits {
            key: self.name.clone(),
            detail,
        };
        match self.limiter {
            Limiter::Range => {
                if !self.data_type.is_numeric() {
                    return Err(bad(format!("range on {} feature", self.data_type)));
                }
                let [min, max] = self.allowed_values.as_slice() else {
                    return Err(bad(format!(
                        "range needs 2 bounds, got {}",
                        self.allowed_values.len()
                    )));
                };
                let (Some(low), Some(high)) = (as_number(min), as_number(max)) else {
                    return Err(bad(format!("non-numeric bounds [{min}, {max}]")));
                };
                if low > high {
                    return Err(bad(format!("min {min} above max {max}")));
                }
                Ok(())
            }
            Limiter::Set if self.allowed_values.is_empty() => Err(bad("empty set".into())),
            _ => Ok(()),
        }
    }

    /// Validate a proposed value and return its canonical form.
    pub fn check(&self, value: &str) -> Result<String, ValidationError> {
        if !self.data_type.accepts(value) {
            return Err(ValidationError::TypeMismatch {
                key: self.name.clone(),
                expected: self.data_type,
                value: value.to_string(),
            });
        }

        match self.limiter {
            Limiter::Any => Ok(value.to_string()),
            Limiter::Range => self.check_range(value),
            Limiter::Set => self
                .allowed_values
                .iter()
                .find(|member| member.eq_ignore_ascii_case(value.trim()))
                .cloned()
                .ok_or_else(|| ValidationError::NotInSet {
                    key: self.name.clone(),
                    value: value.to_string(),
                    allowed: self.allowed_values.clone(),
                }),
            Limiter::Const | Limiter::Size => Err(ValidationError::ReadOnly {
                key: self.name.clone(),
                limiter: self.limiter,
            }),
        }
    }

    fn check_range(&self, value: &str) -> Result<String, ValidationError> {
        self.check_limits()?;
        let (min, max) = (&self.allowed_values[0], &self.allowed_values[1]);
        let out_of_range = || ValidationError::OutOfRange {
            key: self.name.clone(),
            value: value.to_string(),
            min: min.clone(),
            max: max.clone(),
        };

        let trimmed = value.trim();
        let inside = match self.data_type {
            DataType::Integer => {
                let number = trimmed.parse::<i64>().map_err(|_| out_of_range())?;
                let low = as_number(min).unwrap_or(f64::NEG_INFINITY);
                let high = as_number(max).unwrap_or(f64::INFINITY);
                (number as f64) >= low && (number as f64) <= high
            }
            _ => {
                let number = trimmed.parse::<f64>().map_err(|_| out_of_range())?;
                as_number(min).is_some_and(|low| number >= low)
                    && as_number(max).is_some_and(|high| number <= high)
            }
        };

        if inside {
            Ok(trimmed.to_string())
        } else {
            Err(out_of_range())
        }
    }
}

fn as_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}
