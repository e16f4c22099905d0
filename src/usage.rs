//! Token usage scanning and rate-limit detection (§4.4), generalizing the
//! teacher's single-purpose `rate_limit.rs` into a scored sample chooser
//! plus accumulator, per §9's "centralize into a scanner" note.

use crate::model::UsageSample;
use std::time::Duration;

/// Default regex-free substring signatures for rate limiting. Kept as plain
/// substrings (matching the teacher's approach) rather than a regex crate,
/// since the signatures are fixed literals, not patterns.
const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "429",
    "usage limit",
    "rate limit",
    "too many requests",
    "overloaded",
];

/// Scan combined stdout+stderr for a rate-limit signature. If found, try to
/// extract an explicit retry delay (`Retry-After: <secs>` or
/// `"resets_in_seconds": <secs>`); otherwise default to 60s.
pub fn detect_rate_limit(output: &str) -> Option<Duration> {
    let lower = output.to_ascii_lowercase();
    if !RATE_LIMIT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return None;
    }

    if let Some(secs) = extract_after(output, "Retry-After: ") {
        return Some(Duration::from_secs(secs));
    }
    if let Some(secs) = extract_after(output, "resets_in_seconds") {
        return Some(Duration::from_secs(secs));
    }

    Some(Duration::from_secs(60))
}

fn extract_after(haystack: &str, marker: &str) -> Option<u64> {
    let idx = haystack.find(marker)?;
    let remaining = &haystack[idx + marker.len()..];
    let start = remaining.find(|c: char| c.is_ascii_digit())?;
    let digits = &remaining[start..];
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse().ok()
}

/// Parse one JSON line into a `UsageSample`, scoring it by how many of the
/// recognized fields are present, and normalizing remaining-context into an
/// absolute percentage.
///
/// The percent/fraction heuristic is explicitly best-effort (§9 open
/// question): a value `<= 1.0` is treated as a fraction (`*100`), otherwise
/// as a whole percent already. This can misinterpret a true `0.5%` as `50%`;
/// callers should normalize upstream when the source format is known.
pub fn scan_line(line: &str) -> Option<(UsageSample, u32)> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;

    let input_tokens = first_u64(obj, &["inputTokens", "prompt_tokens", "input_tokens"]);
    let output_tokens = first_u64(obj, &["outputTokens", "completion_tokens", "output_tokens"]);
    let total_tokens = first_u64(obj, &["totalTokens", "total_tokens"]);
    let context_window_tokens = first_u64(obj, &["contextWindowTokens", "context_window_tokens"])
        .or_else(|| first_u64(obj, &["max_tokens"]).filter(|v| *v > 10_000));
    let remaining_context_tokens =
        first_u64(obj, &["remainingContextTokens", "remaining_context_tokens"]);
    let remaining_context_percent = first_f64(obj, &["remainingContextPercent", "remaining_context_percent"])
        .map(|v| if v <= 1.0 { v * 100.0 } else { v });

    let mut score = 0u32;
    for present in [
        input_tokens.is_some(),
        output_tokens.is_some(),
        total_tokens.is_some(),
        context_window_tokens.is_some(),
        remaining_context_tokens.is_some(),
        remaining_context_percent.is_some(),
    ] {
        if present {
            score += 1;
        }
    }

    if score == 0 {
        return None;
    }

    Some((
        UsageSample {
            input_tokens,
            output_tokens,
            total_tokens,
            context_window_tokens,
            remaining_context_tokens,
            remaining_context_percent,
        },
        score,
    ))
}

/// Among all JSONL lines of an execution's output, pick the sample with the
/// highest field-presence score (last one wins ties, since later samples
/// reflect more up-to-date context usage).
pub fn strongest_sample(lines: impl Iterator<Item = String>) -> Option<UsageSample> {
    let mut best: Option<(UsageSample, u32)> = None;
    for line in lines {
        if let Some((sample, score)) = scan_line(&line) {
            if best.as_ref().map(|(_, s)| score >= *s).unwrap_or(true) {
                best = Some((sample, score));
            }
        }
    }
    best.map(|(sample, _)| sample)
}

fn first_u64(obj: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(|v| v.as_u64()))
}

fn first_f64(obj: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(|v| v.as_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_429_with_no_explicit_duration() {
        let output = "Error: HTTP 429 received from upstream";
        assert_eq!(detect_rate_limit(output), Some(Duration::from_secs(60)));
    }

    #[test]
    fn detects_retry_after_header() {
        let output = "rate limit hit\nRetry-After: 120\n";
        assert_eq!(detect_rate_limit(output), Some(Duration::from_secs(120)));
    }

    #[test]
    fn detects_resets_in_seconds_field() {
        let output = r#"{"error":"usage limit","resets_in_seconds": 45}"#;
        assert_eq!(detect_rate_limit(output), Some(Duration::from_secs(45)));
    }

    #[test]
    fn no_signature_returns_none() {
        assert_eq!(detect_rate_limit("all good, proceeding"), None);
    }

    #[test]
    fn scan_line_picks_highest_scoring_fields() {
        let (sample, score) =
            scan_line(r#"{"inputTokens": 100, "outputTokens": 50, "totalTokens": 150}"#).unwrap();
        assert_eq!(sample.input_tokens, Some(100));
        assert_eq!(sample.output_tokens, Some(50));
        assert_eq!(score, 3);
    }

    #[test]
    fn percent_fraction_heuristic_misinterprets_true_half_percent() {
        // 0.5 is ambiguous: could mean "0.5%" remaining or "50% as a fraction".
        // The documented best-effort heuristic treats <=1.0 as a fraction,
        // so a genuine 0.5% reading is misread as 50%.
        let (sample, _) = scan_line(r#"{"remainingContextPercent": 0.5}"#).unwrap();
        assert_eq!(sample.remaining_context_percent, Some(50.0));
    }

    #[test]
    fn percent_above_one_treated_as_whole_percent() {
        let (sample, _) = scan_line(r#"{"remainingContextPercent": 12.5}"#).unwrap();
        assert_eq!(sample.remaining_context_percent, Some(12.5));
    }

    #[test]
    fn strongest_sample_prefers_higher_score_among_multiple_lines() {
        let lines = vec![
            r#"{"inputTokens": 10}"#.to_string(),
            r#"{"inputTokens": 20, "outputTokens": 5, "totalTokens": 25}"#.to_string(),
        ];
        let sample = strongest_sample(lines.into_iter()).unwrap();
        assert_eq!(sample.input_tokens, Some(20));
    }
}
