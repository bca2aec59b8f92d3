//! Quota-usage header parsing
//!
//! The platform reports authoritative rate-limit consumption in JSON-valued
//! response headers. Three header families exist, from most to least
//! specific: per-ad-account usage, per-business-use-case usage, and
//! app-wide usage. The executor feeds whichever reading is found back into
//! the rate limiter so local accounting tracks the platform's.
//!
//! Parsing is best-effort: a missing or malformed header yields no reading
//! rather than an error, since usage data is advisory.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use adbridge_domain::QuotaUsage;

/// App-wide usage header, e.g. `{"call_count":97,"total_time":25,"total_cputime":25}`.
pub const APP_USAGE_HEADER: &str = "x-app-usage";

/// Per-ad-account usage header, e.g. `{"acc_id_util_pct":9.67,"reset_time_duration":100}`.
pub const ACCOUNT_USAGE_HEADER: &str = "x-ad-account-usage";

/// Per-use-case usage header keyed by account id, each entry carrying call
/// counts and an estimated minutes-to-regain-access.
pub const BUSINESS_USAGE_HEADER: &str = "x-business-use-case-usage";

#[derive(Debug, Deserialize)]
struct AppUsage {
    #[serde(default)]
    call_count: f64,
    #[serde(default)]
    total_time: f64,
    #[serde(default)]
    total_cputime: f64,
}

#[derive(Debug, Deserialize)]
struct AccountUsage {
    #[serde(default)]
    acc_id_util_pct: f64,
    /// Seconds until the account window resets
    #[serde(default)]
    reset_time_duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BusinessUsageEntry {
    #[serde(default)]
    call_count: f64,
    #[serde(default)]
    total_time: f64,
    #[serde(default)]
    total_cputime: f64,
    /// Minutes until throttling ends, reported only while throttled
    #[serde(default)]
    estimated_time_to_regain_access: Option<i64>,
}

/// Extract the most specific quota reading present in `headers`.
///
/// Header names are matched case-insensitively; `now` anchors relative reset
/// durations into absolute instants.
pub fn extract_usage(headers: &[(String, String)], now: DateTime<Utc>) -> Option<QuotaUsage> {
    let lookup = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    };

    if let Some(raw) = lookup(ACCOUNT_USAGE_HEADER) {
        if let Some(usage) = parse_account_usage(raw, now) {
            return Some(usage);
        }
    }
    if let Some(raw) = lookup(BUSINESS_USAGE_HEADER) {
        if let Some(usage) = parse_business_usage(raw, now) {
            return Some(usage);
        }
    }
    if let Some(raw) = lookup(APP_USAGE_HEADER) {
        if let Some(usage) = parse_app_usage(raw) {
            return Some(usage);
        }
    }
    None
}

fn parse_account_usage(raw: &str, now: DateTime<Utc>) -> Option<QuotaUsage> {
    let usage: AccountUsage = parse_header(raw, ACCOUNT_USAGE_HEADER)?;
    let reset_at = usage
        .reset_time_duration
        .and_then(|seconds| chrono::Duration::try_seconds(seconds).map(|d| now + d));
    Some(QuotaUsage { used_pct: usage.acc_id_util_pct, reset_at })
}

fn parse_business_usage(raw: &str, now: DateTime<Utc>) -> Option<QuotaUsage> {
    let usage: std::collections::HashMap<String, Vec<BusinessUsageEntry>> =
        parse_header(raw, BUSINESS_USAGE_HEADER)?;

    // The hottest dimension across every account entry governs.
    let mut used_pct: f64 = 0.0;
    let mut regain_minutes: Option<i64> = None;
    for entry in usage.values().flatten() {
        used_pct = used_pct
            .max(entry.call_count)
            .max(entry.total_time)
            .max(entry.total_cputime);
        if let Some(minutes) = entry.estimated_time_to_regain_access {
            regain_minutes = Some(regain_minutes.map_or(minutes, |m: i64| m.max(minutes)));
        }
    }

    let reset_at = regain_minutes
        .filter(|minutes| *minutes > 0)
        .and_then(|minutes| chrono::Duration::try_minutes(minutes).map(|d| now + d));
    Some(QuotaUsage { used_pct, reset_at })
}

fn parse_app_usage(raw: &str) -> Option<QuotaUsage> {
    let usage: AppUsage = parse_header(raw, APP_USAGE_HEADER)?;
    let used_pct = usage.call_count.max(usage.total_time).max(usage.total_cputime);
    Some(QuotaUsage { used_pct, reset_at: None })
}

fn parse_header<T: serde::de::DeserializeOwned>(raw: &str, name: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!(header = name, error = %err, "ignoring unparseable usage header");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(name: &str, value: &str) -> Vec<(String, String)> {
        vec![(name.to_string(), value.to_string())]
    }

    #[test]
    fn parses_app_usage_taking_hottest_dimension() {
        let now = Utc::now();
        let usage = extract_usage(
            &headers(APP_USAGE_HEADER, r#"{"call_count":42,"total_time":61,"total_cputime":12}"#),
            now,
        )
        .unwrap();

        assert_eq!(usage.used_pct, 61.0);
        assert!(usage.reset_at.is_none());
    }

    #[test]
    fn parses_account_usage_with_reset_duration() {
        let now = Utc::now();
        let usage = extract_usage(
            &headers(
                ACCOUNT_USAGE_HEADER,
                r#"{"acc_id_util_pct":88.5,"reset_time_duration":120}"#,
            ),
            now,
        )
        .unwrap();

        assert_eq!(usage.used_pct, 88.5);
        assert_eq!(usage.reset_at, Some(now + chrono::Duration::seconds(120)));
    }

    #[test]
    fn parses_business_usage_across_accounts() {
        let now = Utc::now();
        let raw = r#"{
            "act_1": [{"type":"ads_management","call_count":30,"total_time":10,"total_cputime":5}],
            "act_2": [{"type":"ads_management","call_count":95,"total_time":20,"total_cputime":20,
                       "estimated_time_to_regain_access":10}]
        }"#;
        let usage = extract_usage(&headers(BUSINESS_USAGE_HEADER, raw), now).unwrap();

        assert_eq!(usage.used_pct, 95.0);
        assert_eq!(usage.reset_at, Some(now + chrono::Duration::minutes(10)));
    }

    #[test]
    fn account_header_wins_over_app_header() {
        let now = Utc::now();
        let mut combined = headers(APP_USAGE_HEADER, r#"{"call_count":10}"#);
        combined.extend(headers(ACCOUNT_USAGE_HEADER, r#"{"acc_id_util_pct":75.0}"#));

        let usage = extract_usage(&combined, now).unwrap();
        assert_eq!(usage.used_pct, 75.0);
    }

    #[test]
    fn header_name_matching_is_case_insensitive() {
        let now = Utc::now();
        let usage =
            extract_usage(&headers("X-App-Usage", r#"{"call_count":33}"#), now).unwrap();
        assert_eq!(usage.used_pct, 33.0);
    }

    #[test]
    fn malformed_header_yields_no_reading() {
        let now = Utc::now();
        assert!(extract_usage(&headers(APP_USAGE_HEADER, "not json"), now).is_none());
        assert!(extract_usage(&[], now).is_none());
    }

    #[test]
    fn malformed_specific_header_falls_back_to_app_header() {
        let now = Utc::now();
        let mut combined = headers(ACCOUNT_USAGE_HEADER, "garbage");
        combined.extend(headers(APP_USAGE_HEADER, r#"{"call_count":55}"#));

        let usage = extract_usage(&combined, now).unwrap();
        assert_eq!(usage.used_pct, 55.0);
    }
}
