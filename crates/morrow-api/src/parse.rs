//! Boundary parsing: string ids, RFC 3339 timestamps and enum tokens in,
//! formatted timestamps out. Every failure is a `Validation` error raised
//! before the store is touched.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use morrow_types::models::UnknownToken;

use crate::error::{ApiError, ApiResult};

pub fn id<T>(field: &str, raw: &str) -> ApiResult<T>
where
    T: FromStr,
{
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("invalid {}: '{}'", field, raw)))
}

pub fn optional_id<T>(field: &str, raw: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr,
{
    raw.map(|raw| id(field, raw)).transpose()
}

pub fn timestamp(field: &str, raw: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ApiError::Validation(format!("invalid {} '{}': {}", field, raw, e)))
}

pub fn optional_timestamp(field: &str, raw: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    raw.map(|raw| timestamp(field, raw)).transpose()
}

pub fn token<T>(raw: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr<Err = UnknownToken>,
{
    raw.map(|raw| raw.parse().map_err(|e: UnknownToken| ApiError::Validation(e.to_string())))
        .transpose()
}

/// Wire format for every timestamp the API returns. Fractional seconds are
/// kept (milli, micro or nano as needed) so values read back parse to the
/// stored instant.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
