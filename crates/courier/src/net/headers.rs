//! Derivation of cache metadata from HTTP response headers.

use chrono::{DateTime, TimeZone, Utc};

use crate::cache::{epoch_millis, Entry};
use crate::response::NetworkResponse;

/// Builds the cache entry for a response, or `None` when the response must
/// not be cached (`no-cache` / `no-store`).
///
/// `Cache-Control: max-age` drives both the soft and hard TTL; an `Expires`
/// header is honored relative to the server's `Date` when no `Cache-Control`
/// header is present.
pub fn cache_entry_for(response: &NetworkResponse) -> Option<Entry> {
    let now = epoch_millis();

    let server_date = response
        .header("Date")
        .and_then(parse_date_epoch)
        .unwrap_or(0);

    let mut max_age: u64 = 0;
    let mut has_cache_control = false;
    if let Some(cache_control) = response.header("Cache-Control") {
        has_cache_control = true;
        for token in cache_control.split(',').map(str::trim) {
            if token == "no-cache" || token == "no-store" {
                return None;
            }
            if let Some(value) = token.strip_prefix("max-age=") {
                max_age = value.parse().unwrap_or(0);
            }
        }
    }

    let expiry = if has_cache_control {
        now + max_age * 1000
    } else {
        let server_expires = response
            .header("Expires")
            .and_then(parse_date_epoch)
            .unwrap_or(0);
        if server_date > 0 && server_expires >= server_date {
            // Expires is relative to the server's clock, not ours.
            now + (server_expires - server_date)
        } else {
            0
        }
    };

    Some(Entry {
        data: response.data.clone(),
        etag: response.header("ETag").map(str::to_owned),
        server_date,
        ttl: expiry,
        soft_ttl: expiry,
        response_headers: response.headers.clone(),
    })
}

/// Parses an RFC 1123 HTTP date into epoch milliseconds.
pub fn parse_date_epoch(value: &str) -> Option<u64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.timestamp_millis().max(0) as u64)
}

/// Formats epoch milliseconds as an RFC 1123 HTTP date.
pub fn format_http_date(epoch_ms: u64) -> String {
    Utc.timestamp_millis_opt(epoch_ms as i64)
        .single()
        .map(|date| date.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_default()
}
