use std::fmt;

use serde::Serialize;

/// Scaled or transformed value held by the store, keyed by logical name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogicalValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Enum {
        code: i64,
        label: Option<String>,
    },
    /// Clock time without a date.
    Time { hour: u8, minute: u8 },
    /// Scheduled time that repeats every `interval_days`.
    Schedule {
        hour: u8,
        minute: u8,
        interval_days: u8,
    },
}

impl LogicalValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LogicalValue::Int(v) => Some(*v as f64),
            LogicalValue::Float(v) => Some(*v),
            LogicalValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            LogicalValue::Enum { code, .. } => Some(*code as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            LogicalValue::Int(v) => Some(*v),
            LogicalValue::Bool(b) => Some(i64::from(*b)),
            LogicalValue::Enum { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Enum label, if this is a labelled enum value.
    pub fn label(&self) -> Option<&str> {
        match self {
            LogicalValue::Enum { label, .. } => label.as_deref(),
            _ => None,
        }
    }

    /// Hour and minute of a time or schedule value.
    pub fn clock(&self) -> Option<(u8, u8)> {
        match self {
            LogicalValue::Time { hour, minute } | LogicalValue::Schedule { hour, minute, .. } => {
                Some((*hour, *minute))
            }
            _ => None,
        }
    }
}

impl fmt::Display for LogicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalValue::Int(v) => write!(f, "{v}"),
            LogicalValue::Float(v) => write!(f, "{v}"),
            LogicalValue::Bool(b) => f.write_str(if *b { "on" } else { "off" }),
            LogicalValue::Text(s) => f.write_str(s),
            LogicalValue::Enum {
                label: Some(label), ..
            } => f.write_str(label),
            LogicalValue::Enum { code, label: None } => write!(f, "{code}"),
            LogicalValue::Time { hour, minute } => write!(f, "{hour:02}:{minute:02}"),
            LogicalValue::Schedule {
                hour,
                minute,
                interval_days,
            } => write!(f, "{hour:02}:{minute:02} every {interval_days}d"),
        }
    }
}

/// Advertised numeric range of a writable value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Bounds { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}
