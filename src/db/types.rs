//! Postgres column decoding.
//!
//! This module turns result rows into [`Record`]s of JSON values.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column's Postgres type name
//! 2. A decoder per category extracts the value
//!
//! Rows from parameterless statements arrive in text format (simple query
//! protocol), rows from bound statements in binary format; every decoder
//! here handles both. Binary values are rendered the way the server prints
//! them in text, so a record does not depend on which protocol produced it.
//! A binary value with no decoder is an error rather than a silent NULL.

use crate::models::Record;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::{Oid, PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgRow, PgTypeInfo, PgTypeKind, PgValueFormat};
use sqlx::types::BigDecimal;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use uuid::Uuid;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for Postgres column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    TimeTz,
    Interval,
    Money,
    Network,
    Array,
    Void,
    Unknown,
}

/// Classify a Postgres type name (as reported by the driver) into a category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let upper = type_name.to_ascii_uppercase();

    if upper.ends_with("[]") {
        return TypeCategory::Array;
    }

    match upper.as_str() {
        "INT2" | "INT4" | "INT8" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "SMALLSERIAL"
        | "SERIAL" | "BIGSERIAL" | "OID" => TypeCategory::Integer,
        "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE PRECISION" => TypeCategory::Float,
        "NUMERIC" | "DECIMAL" => TypeCategory::Decimal,
        "BOOL" | "BOOLEAN" => TypeCategory::Boolean,
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => {
            TypeCategory::Text
        }
        "BYTEA" => TypeCategory::Binary,
        "JSON" | "JSONB" => TypeCategory::Json,
        "UUID" => TypeCategory::Uuid,
        "TIMESTAMP" => TypeCategory::Timestamp,
        "TIMESTAMPTZ" => TypeCategory::TimestampTz,
        "DATE" => TypeCategory::Date,
        "TIME" => TypeCategory::Time,
        "TIMETZ" => TypeCategory::TimeTz,
        "INTERVAL" => TypeCategory::Interval,
        "MONEY" => TypeCategory::Money,
        "INET" | "CIDR" => TypeCategory::Network,
        "VOID" => TypeCategory::Void,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode binary data as a base64 JSON string.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

/// Finite floats become JSON numbers; the rest use Postgres' spelling.
fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| {
            let text = if v.is_nan() {
                "NaN"
            } else if v > 0.0 {
                "Infinity"
            } else {
                "-Infinity"
            };
            JsonValue::String(text.to_string())
        })
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting database rows to records.
pub trait RowToJson {
    /// Decode every column, keyed by column name in result order.
    fn to_record(&self) -> Result<Record, sqlx::Error>;
}

impl RowToJson for PgRow {
    fn to_record(&self) -> Result<Record, sqlx::Error> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let value = decode_column(self, idx, col.type_info())?;
                Ok((col.name().to_string(), value))
            })
            .collect()
    }
}

// =============================================================================
// Decoders
// =============================================================================

fn decode_column(
    row: &PgRow,
    idx: usize,
    type_info: &PgTypeInfo,
) -> Result<JsonValue, sqlx::Error> {
    let type_name = type_info.name();
    match categorize_type(type_name) {
        TypeCategory::Integer => decode_integer(row, idx, type_name),
        TypeCategory::Float => decode_float(row, idx, type_name),
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Boolean => Ok(opt(row.try_get::<Option<bool>, _>(idx)?, JsonValue::Bool)),
        TypeCategory::Text => Ok(opt(row.try_get::<Option<String>, _>(idx)?, JsonValue::String)),
        TypeCategory::Binary => Ok(opt(row.try_get::<Option<Vec<u8>>, _>(idx)?, |v| {
            encode_binary_value(&v)
        })),
        TypeCategory::Json => Ok(row
            .try_get::<Option<JsonValue>, _>(idx)?
            .unwrap_or(JsonValue::Null)),
        TypeCategory::Uuid => Ok(opt(row.try_get::<Option<Uuid>, _>(idx)?, |v| {
            JsonValue::String(v.to_string())
        })),
        TypeCategory::Timestamp => Ok(opt(row.try_get::<Option<NaiveDateTime>, _>(idx)?, |v| {
            JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        })),
        TypeCategory::TimestampTz => {
            Ok(opt(row.try_get::<Option<DateTime<Utc>>, _>(idx)?, |v| {
                JsonValue::String(v.to_rfc3339())
            }))
        }
        TypeCategory::Date => Ok(opt(row.try_get::<Option<NaiveDate>, _>(idx)?, |v| {
            JsonValue::String(v.to_string())
        })),
        TypeCategory::Time => Ok(opt(row.try_get::<Option<NaiveTime>, _>(idx)?, |v| {
            JsonValue::String(v.to_string())
        })),
        TypeCategory::TimeTz => decode_time_tz(row, idx),
        TypeCategory::Interval => decode_interval(row, idx),
        TypeCategory::Money => decode_money(row, idx),
        TypeCategory::Network => decode_network(row, idx, type_name),
        TypeCategory::Array => decode_array(row, idx, type_info),
        TypeCategory::Void => Ok(JsonValue::Null),
        TypeCategory::Unknown => decode_unknown(row, idx, type_info),
    }
}

fn column_decode(idx: usize, source: BoxDynError) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source,
    }
}

/// A text-format value as the server printed it. `None` when the value
/// arrived in binary format and needs a typed decoder.
fn server_text(row: &PgRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Some(JsonValue::Null));
    }
    match raw.format() {
        PgValueFormat::Text => {
            let text = raw.as_str().map_err(|e| column_decode(idx, e))?;
            Ok(Some(JsonValue::String(text.to_string())))
        }
        PgValueFormat::Binary => Ok(None),
    }
}

fn opt<T>(value: Option<T>, f: impl FnOnce(T) -> JsonValue) -> JsonValue {
    value.map(f).unwrap_or(JsonValue::Null)
}

fn decode_integer(row: &PgRow, idx: usize, type_name: &str) -> Result<JsonValue, sqlx::Error> {
    let value = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(i64::from),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(i64::from),
        "OID" => row.try_get::<Option<Oid>, _>(idx)?.map(|oid| i64::from(oid.0)),
        _ => row.try_get::<Option<i64>, _>(idx)?,
    };
    Ok(opt(value, JsonValue::from))
}

fn decode_float(row: &PgRow, idx: usize, type_name: &str) -> Result<JsonValue, sqlx::Error> {
    let value = match type_name {
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(f64::from),
        _ => row.try_get::<Option<f64>, _>(idx)?,
    };
    Ok(opt(value, float_value))
}

// Sign words of the binary NUMERIC header
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_POS_INF: u16 = 0xD000;
const NUMERIC_NEG_INF: u16 = 0xF000;

/// NUMERIC is rendered as a string to keep its exact digits. Values outside
/// `Decimal`'s range go through `BigDecimal`, padded to the column's display
/// scale.
fn decode_decimal(row: &PgRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    if let Some(value) = server_text(row, idx)? {
        return Ok(value);
    }

    let raw = row.try_get_raw(idx)?;
    let bytes = raw.as_bytes().map_err(|e| column_decode(idx, e))?;
    let (sign, display_scale) =
        numeric_header(bytes).ok_or_else(|| column_decode(idx, "truncated NUMERIC value".into()))?;
    if let Some(special) = numeric_special(sign) {
        return Ok(JsonValue::String(special.to_string()));
    }

    match row.try_get::<Decimal, _>(idx) {
        Ok(value) => Ok(JsonValue::String(value.to_string())),
        Err(e) => {
            tracing::debug!(column = idx, error = %e, "NUMERIC outside decimal range");
            let wide = row.try_get::<BigDecimal, _>(idx)?;
            Ok(JsonValue::String(plain_decimal(&wide, display_scale)))
        }
    }
}

/// Sign word and display scale from a binary NUMERIC value.
fn numeric_header(bytes: &[u8]) -> Option<(u16, u16)> {
    let sign = u16::from_be_bytes([*bytes.get(4)?, *bytes.get(5)?]);
    let display_scale = u16::from_be_bytes([*bytes.get(6)?, *bytes.get(7)?]);
    Some((sign, display_scale))
}

fn numeric_special(sign: u16) -> Option<&'static str> {
    match sign {
        NUMERIC_NAN => Some("NaN"),
        NUMERIC_POS_INF => Some("Infinity"),
        NUMERIC_NEG_INF => Some("-Infinity"),
        _ => None,
    }
}

/// Positional notation with exactly `scale` fraction digits.
fn plain_decimal(value: &BigDecimal, scale: u16) -> String {
    let (digits, _) = value.with_scale(i64::from(scale)).as_bigint_and_exponent();
    let text = digits.to_string();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };

    let scale = usize::from(scale);
    if scale == 0 {
        return format!("{}{}", sign, digits);
    }
    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (int, frac) = padded.split_at(padded.len() - scale);
    format!("{}{}.{}", sign, int, frac)
}

fn decode_time_tz(row: &PgRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    if let Some(value) = server_text(row, idx)? {
        return Ok(value);
    }
    let value = row.try_get::<PgTimeTz<NaiveTime, FixedOffset>, _>(idx)?;
    Ok(JsonValue::String(format_time_tz(value.time, value.offset)))
}

/// `HH:MM:SS[.ffffff]+HH[:MM[:SS]]`, as the server prints `timetz`.
fn format_time_tz(time: NaiveTime, offset: FixedOffset) -> String {
    let mut out = format!(
        "{:02}:{:02}:{:02}",
        time.hour(),
        time.minute(),
        time.second()
    );
    push_fraction(&mut out, u64::from(time.nanosecond() / 1000));

    let secs = offset.local_minus_utc();
    let abs = secs.unsigned_abs();
    out.push(if secs < 0 { '-' } else { '+' });
    out.push_str(&format!("{:02}", abs / 3600));
    if abs % 3600 != 0 {
        out.push_str(&format!(":{:02}", abs / 60 % 60));
    }
    if abs % 60 != 0 {
        out.push_str(&format!(":{:02}", abs % 60));
    }
    out
}

fn decode_interval(row: &PgRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    if let Some(value) = server_text(row, idx)? {
        return Ok(value);
    }
    let value = row.try_get::<PgInterval, _>(idx)?;
    Ok(JsonValue::String(format_interval(&value)))
}

/// Render an interval in the server's default `postgres` IntervalStyle,
/// e.g. `1 year 2 mons 3 days 04:05:06.5` or `-1 days +02:00:00`.
fn format_interval(interval: &PgInterval) -> String {
    let mut out = String::new();
    // Whether the last printed field was negative; a positive field after it
    // gets an explicit `+`
    let mut after_negative = false;

    let fields = [
        (i64::from(interval.months / 12), "year"),
        (i64::from(interval.months % 12), "mon"),
        (i64::from(interval.days), "day"),
    ];
    for (value, unit) in fields {
        if value == 0 {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        if after_negative && value > 0 {
            out.push('+');
        }
        let plural = if value == 1 { "" } else { "s" };
        out.push_str(&format!("{} {}{}", value, unit, plural));
        after_negative = value < 0;
    }

    let micros = interval.microseconds;
    if out.is_empty() || micros != 0 {
        if !out.is_empty() {
            out.push(' ');
        }
        if micros < 0 {
            out.push('-');
        } else if after_negative {
            out.push('+');
        }
        let abs = micros.unsigned_abs();
        out.push_str(&format!(
            "{:02}:{:02}:{:02}",
            abs / 3_600_000_000,
            abs / 60_000_000 % 60,
            abs / 1_000_000 % 60
        ));
        push_fraction(&mut out, abs % 1_000_000);
    }
    out
}

/// Append `.ffffff` with trailing zeros trimmed, nothing for whole seconds.
fn push_fraction(out: &mut String, micros: u64) {
    if micros != 0 {
        let digits = format!("{:06}", micros);
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
}

/// Binary `money` carries no locale; it is rendered with two fraction digits.
fn decode_money(row: &PgRow, idx: usize) -> Result<JsonValue, sqlx::Error> {
    if let Some(value) = server_text(row, idx)? {
        return Ok(value);
    }
    let value = row.try_get::<PgMoney, _>(idx)?;
    Ok(JsonValue::String(value.to_decimal(2).to_string()))
}

/// `inet` hides a full-length prefix, `cidr` always shows it.
fn decode_network(row: &PgRow, idx: usize, type_name: &str) -> Result<JsonValue, sqlx::Error> {
    if let Some(value) = server_text(row, idx)? {
        return Ok(value);
    }
    let network = row.try_get::<IpNetwork, _>(idx)?;
    let host_prefix = if network.is_ipv4() { 32 } else { 128 };
    let text = if type_name.eq_ignore_ascii_case("INET") && network.prefix() == host_prefix {
        network.ip().to_string()
    } else {
        format!("{}/{}", network.ip(), network.prefix())
    };
    Ok(JsonValue::String(text))
}

fn decode_array(
    row: &PgRow,
    idx: usize,
    type_info: &PgTypeInfo,
) -> Result<JsonValue, sqlx::Error> {
    fn array<T>(values: Option<Vec<Option<T>>>, f: impl Fn(T) -> JsonValue) -> JsonValue {
        opt(values, |values| {
            JsonValue::Array(values.into_iter().map(|v| opt(v, &f)).collect())
        })
    }

    let upper = type_info.name().to_ascii_uppercase();
    let element = upper.trim_end_matches("[]");
    let value = match element {
        "INT2" => array(row.try_get::<Option<Vec<Option<i16>>>, _>(idx)?, JsonValue::from),
        "INT4" => array(row.try_get::<Option<Vec<Option<i32>>>, _>(idx)?, JsonValue::from),
        "INT8" => array(row.try_get::<Option<Vec<Option<i64>>>, _>(idx)?, JsonValue::from),
        "FLOAT4" => array(row.try_get::<Option<Vec<Option<f32>>>, _>(idx)?, |v| {
            float_value(f64::from(v))
        }),
        "FLOAT8" => array(row.try_get::<Option<Vec<Option<f64>>>, _>(idx)?, float_value),
        "NUMERIC" => array(row.try_get::<Option<Vec<Option<Decimal>>>, _>(idx)?, |v| {
            JsonValue::String(v.to_string())
        }),
        "BOOL" => array(row.try_get::<Option<Vec<Option<bool>>>, _>(idx)?, JsonValue::Bool),
        "UUID" => array(row.try_get::<Option<Vec<Option<Uuid>>>, _>(idx)?, |v| {
            JsonValue::String(v.to_string())
        }),
        "JSON" | "JSONB" => array(
            row.try_get::<Option<Vec<Option<JsonValue>>>, _>(idx)?,
            |v| v,
        ),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => array(
            row.try_get::<Option<Vec<Option<String>>>, _>(idx)?,
            JsonValue::String,
        ),
        _ => return decode_unknown(row, idx, type_info),
    };
    Ok(value)
}

/// Types without a dedicated decoder: text-format values are taken as the
/// server printed them and enum labels are read as text. Any other binary
/// value is an error; cast the column to `text` in SQL to read it.
fn decode_unknown(
    row: &PgRow,
    idx: usize,
    type_info: &PgTypeInfo,
) -> Result<JsonValue, sqlx::Error> {
    if let Some(value) = server_text(row, idx)? {
        return Ok(value);
    }

    if matches!(type_info.kind(), PgTypeKind::Enum(_)) {
        let raw = row.try_get_raw(idx)?;
        let label = raw.as_str().map_err(|e| column_decode(idx, e))?;
        return Ok(JsonValue::String(label.to_string()));
    }

    Err(column_decode(
        idx,
        format!(
            "no decoder for binary {} values; cast the column to text",
            type_info.name()
        )
        .into(),
    ))
}
