//! Mapping of HTTP provider responses onto transient/permanent verdicts.

use courier_core::types::DeliveryResult;
use reqwest::StatusCode;

/// Verdict for a completed HTTP exchange.
///
/// 404 and 410 mean the recipient is gone for good, so the target is reported
/// for pruning. Throttling and server errors are worth retrying.
pub fn classify_status(status: StatusCode, body: &str, target: Option<&str>) -> DeliveryResult {
    if status.is_success() {
        return DeliveryResult::handled();
    }
    let reason = format!("HTTP {status}: {}", truncate(body, 200));
    match status.as_u16() {
        408 | 425 | 429 => DeliveryResult::transient(reason),
        404 | 410 => match target {
            Some(target) => DeliveryResult::invalid_target(target, reason),
            None => DeliveryResult::permanent(reason),
        },
        s if (500..600).contains(&s) => DeliveryResult::transient(reason),
        _ => DeliveryResult::permanent(reason),
    }
}

/// Verdict for a request that never produced a response.
pub fn classify_transport(err: &reqwest::Error) -> DeliveryResult {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        DeliveryResult::transient(format!("transport: {err}"))
    } else {
        DeliveryResult::permanent(format!("transport: {err}"))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
