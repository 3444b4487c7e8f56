//! Type coercion ladders
//!
//! Every [`TargetType`] has one pure conversion function. Each tries a
//! fixed sequence of source shapes and takes the first that converts. A
//! value that matches no rung is [`Coerced::Rejected`], which is stored as
//! NULL like a missing value but counted separately.

use crate::catalog::TargetType;
use crate::value::SourceValue;
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use sqlx::types::BigDecimal;
use std::str::FromStr;
use uuid::Uuid;

/// A value holding exactly one destination type
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Int32(i32),
    Int64(i64),
    Decimal(BigDecimal),
    Double(f64),
    Boolean(bool),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Guid(Uuid),
    Binary(Vec<u8>),
}

impl TypedValue {
    pub fn target_type(&self) -> TargetType {
        match self {
            TypedValue::String(_) => TargetType::String,
            TypedValue::Int32(_) => TargetType::Int32,
            TypedValue::Int64(_) => TargetType::Int64,
            TypedValue::Decimal(_) => TargetType::Decimal,
            TypedValue::Double(_) => TargetType::Double,
            TypedValue::Boolean(_) => TargetType::Boolean,
            TypedValue::DateTime(_) => TargetType::DateTime,
            TypedValue::DateTimeOffset(_) => TargetType::DateTimeOffset,
            TypedValue::Guid(_) => TargetType::Guid,
            TypedValue::Binary(_) => TargetType::Binary,
        }
    }
}

/// Outcome of coercing one raw value
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    Value(TypedValue),
    /// Source path missing or explicit null
    Absent,
    /// Present but not convertible
    Rejected,
}

impl Coerced {
    pub fn into_option(self) -> Option<TypedValue> {
        match self {
            Coerced::Value(v) => Some(v),
            Coerced::Absent | Coerced::Rejected => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Coerced::Rejected)
    }
}

type Ladder = fn(&SourceValue) -> Option<TypedValue>;

fn ladder(target: TargetType) -> Ladder {
    match target {
        TargetType::String => to_string,
        TargetType::Int32 => to_int32,
        TargetType::Int64 => to_int64,
        TargetType::Decimal => to_decimal,
        TargetType::Double => to_double,
        TargetType::Boolean => to_boolean,
        TargetType::DateTime => to_datetime,
        TargetType::DateTimeOffset => to_datetime_offset,
        TargetType::Guid => to_guid,
        TargetType::Binary => to_binary,
    }
}

/// Coerce a projected value to `target`. Never panics.
pub fn coerce(raw: Option<&SourceValue>, target: TargetType) -> Coerced {
    match raw {
        None | Some(SourceValue::Null) => Coerced::Absent,
        Some(value) => match ladder(target)(value) {
            Some(typed) => Coerced::Value(typed),
            None => Coerced::Rejected,
        },
    }
}

fn to_string(value: &SourceValue) -> Option<TypedValue> {
    let text = match value {
        SourceValue::String(s) => s.clone(),
        SourceValue::Boolean(b) => b.to_string(),
        SourceValue::Int32(i) => i.to_string(),
        SourceValue::Int64(i) => i.to_string(),
        SourceValue::Double(d) => d.to_string(),
        SourceValue::Decimal(d) => d.to_string(),
        SourceValue::DateTime(dt) => dt.to_rfc3339(),
        SourceValue::Binary(bytes) => base64::engine::general_purpose::STANDARD.encode(bytes),
        SourceValue::Array(_) | SourceValue::Document(_) => value.to_json().to_string(),
        SourceValue::Null => return None,
    };
    Some(TypedValue::String(text))
}

/// Whole-number view shared by both integer ladders
fn integral(value: &SourceValue) -> Option<i64> {
    match value {
        SourceValue::Int32(i) => Some(i64::from(*i)),
        SourceValue::Int64(i) => Some(*i),
        SourceValue::Double(d) => truncate_f64(*d, I64_BOUND),
        SourceValue::String(s) => s.trim_matches(|c: char| c.is_ascii_whitespace()).parse().ok(),
        _ => None,
    }
}

const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
const I32_BOUND: f64 = 2_147_483_648.0;

/// Truncate toward zero, accepting results in `[-bound, bound)`
fn truncate_f64(d: f64, bound: f64) -> Option<i64> {
    if !d.is_finite() {
        return None;
    }
    let t = d.trunc();
    (t >= -bound && t < bound).then_some(t as i64)
}

fn to_int32(value: &SourceValue) -> Option<TypedValue> {
    let wide = match value {
        SourceValue::Double(d) => truncate_f64(*d, I32_BOUND)?,
        other => integral(other)?,
    };
    i32::try_from(wide).ok().map(TypedValue::Int32)
}

fn to_int64(value: &SourceValue) -> Option<TypedValue> {
    integral(value).map(TypedValue::Int64)
}

/// `[+-]digits[.digits]`, optionally with an exponent. No grouping
/// separators and no named values.
fn is_invariant_number(s: &str, allow_exponent: bool) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }

    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return false;
    }

    if allow_exponent && i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }

    i == bytes.len()
}

fn to_decimal(value: &SourceValue) -> Option<TypedValue> {
    let decimal = match value {
        SourceValue::Decimal(d) => d.clone(),
        SourceValue::Double(d) if d.is_finite() => BigDecimal::from_str(&d.to_string()).ok()?,
        SourceValue::Int32(i) => BigDecimal::from(*i),
        SourceValue::Int64(i) => BigDecimal::from(*i),
        SourceValue::String(s) => {
            let s = s.trim();
            if !is_invariant_number(s, false) {
                return None;
            }
            BigDecimal::from_str(s).ok()?
        }
        _ => return None,
    };
    Some(TypedValue::Decimal(decimal))
}

fn to_double(value: &SourceValue) -> Option<TypedValue> {
    let double = match value {
        SourceValue::Double(d) => *d,
        SourceValue::Decimal(d) => d.to_string().parse().ok()?,
        SourceValue::Int32(i) => f64::from(*i),
        SourceValue::Int64(i) => *i as f64,
        SourceValue::String(s) => {
            let s = s.trim();
            if !is_invariant_number(s, true) {
                return None;
            }
            s.parse().ok()?
        }
        _ => return None,
    };
    double.is_finite().then_some(TypedValue::Double(double))
}

fn to_boolean(value: &SourceValue) -> Option<TypedValue> {
    match value {
        SourceValue::Boolean(b) => Some(TypedValue::Boolean(*b)),
        SourceValue::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Some(TypedValue::Boolean(true))
            } else if s.eq_ignore_ascii_case("false") {
                Some(TypedValue::Boolean(false))
            } else {
                None
            }
        }
        _ => None,
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn to_datetime(value: &SourceValue) -> Option<TypedValue> {
    let naive = match value {
        SourceValue::DateTime(dt) => dt.naive_utc(),
        SourceValue::String(s) => {
            let s = s.trim();
            match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => dt.naive_utc(),
                Err(_) => parse_naive(s)?,
            }
        }
        _ => return None,
    };
    Some(TypedValue::DateTime(naive))
}

fn to_datetime_offset(value: &SourceValue) -> Option<TypedValue> {
    let dt = match value {
        SourceValue::DateTime(dt) => *dt,
        SourceValue::String(s) => {
            let s = s.trim();
            match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => dt,
                Err(_) => parse_naive(s)?.and_utc().fixed_offset(),
            }
        }
        _ => return None,
    };
    Some(TypedValue::DateTimeOffset(dt))
}

fn to_guid(value: &SourceValue) -> Option<TypedValue> {
    match value {
        SourceValue::String(s) => Uuid::parse_str(s.trim()).ok().map(TypedValue::Guid),
        _ => None,
    }
}

fn to_binary(value: &SourceValue) -> Option<TypedValue> {
    match value {
        SourceValue::Binary(bytes) => Some(TypedValue::Binary(bytes.clone())),
        SourceValue::String(s) => base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .ok()
            .map(TypedValue::Binary),
        _ => None,
    }
}
