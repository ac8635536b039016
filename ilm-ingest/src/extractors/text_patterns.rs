//! Free-text BPM and key extraction
//!
//! Pure functions over platform tags, descriptions, titles and comment
//! fields. Each returns the first match in the text, or `None`.

use once_cell::sync::Lazy;
use regex::Regex;

/// `bpm`, optional `:`/whitespace, then digits (`BPM: 128`, `bpm128`)
static BPM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bpm[:\s]*(\d+)").expect("valid BPM regex"));

/// Note name followed by `key`/`tonality` (`Am key`, `C# tonality`)
static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-G][#b]?m?)\s*(?i:key|tonality)\b").expect("valid key regex")
});

/// `Key: Am` as written into comment fields
static LABELLED_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:key)\s*[:=]?\s*([A-G][#b]?m?)(?:$|[^A-Za-z0-9#])")
        .expect("valid labelled key regex")
});

/// A note name standing alone between non-word characters
static BARE_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9#])([A-G][#b]?m?)(?:$|[^A-Za-z0-9#])")
        .expect("valid bare key regex")
});

/// First BPM in `text`
///
/// Values are not range-checked here; the chain accepts what the text says.
pub fn extract_bpm(text: &str) -> Option<u32> {
    BPM_PATTERN
        .captures_iter(text)
        .find_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
}

/// First key announced as `<note> key` / `<note> tonality`
pub fn extract_key(text: &str) -> Option<String> {
    KEY_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Key from a comment field: `Key: <note>` first, then a standalone note name
pub fn extract_bare_key(text: &str) -> Option<String> {
    LABELLED_KEY_PATTERN
        .captures(text)
        .or_else(|| BARE_KEY_PATTERN.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
