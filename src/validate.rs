//! Lenient parsing of CLI enum values.
//!
//! Save kinds and conflict resolutions accept their canonical spelling in
//! any case, a handful of synonyms, and otherwise fail with the closest
//! valid value as a suggestion. Three-tier resolution: exact match →
//! synonym lookup → error with suggestion.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::error::Error;
use crate::model::SaveKind;
use crate::sync::ConflictResolution;

// ── Valid value sets ─────────────────────────────────────────

pub static VALID_SAVE_KINDS: LazyLock<HashSet<&str>> =
    LazyLock::new(|| ["auto", "manual", "quicksave"].into_iter().collect());

pub static VALID_RESOLUTIONS: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    ["use_cloud", "use_local", "use_newest", "merge", "keep_both"]
        .into_iter()
        .collect()
});

// ── Synonym maps ─────────────────────────────────────────────

pub static SAVE_KIND_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("autosave", "auto"),
        ("automatic", "auto"),
        ("quick", "quicksave"),
        ("quick_save", "quicksave"),
        ("user", "manual"),
        ("hard", "manual"),
    ]
    .into_iter()
    .collect()
});

pub static RESOLUTION_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("cloud", "use_cloud"),
        ("remote", "use_cloud"),
        ("server", "use_cloud"),
        ("theirs", "use_cloud"),
        ("local", "use_local"),
        ("mine", "use_local"),
        ("ours", "use_local"),
        ("newest", "use_newest"),
        ("latest", "use_newest"),
        ("both", "keep_both"),
        ("copy", "keep_both"),
        ("merged", "merge"),
    ]
    .into_iter()
    .collect()
});

/// Canonical lowercase key: case-folded, dashes and spaces become underscores.
fn canonical_key(input: &str) -> String {
    input.trim().to_lowercase().replace(['-', ' '], "_")
}

/// Normalize a save kind via exact match or synonym lookup.
///
/// Returns the kind, or the original input and an optional suggestion.
pub fn normalize_save_kind(input: &str) -> Result<SaveKind, (String, Option<String>)> {
    let key = canonical_key(input);

    let canonical = if VALID_SAVE_KINDS.contains(key.as_str()) {
        key.as_str()
    } else if let Some(&mapped) = SAVE_KIND_SYNONYMS.get(key.as_str()) {
        mapped
    } else {
        let suggestion = find_closest_match(&key, &VALID_SAVE_KINDS, &SAVE_KIND_SYNONYMS);
        return Err((input.to_string(), suggestion));
    };

    Ok(SaveKind::from_db(canonical))
}

/// Normalize a conflict resolution (`USE_CLOUD`, `keep-both`, `mine`, ...).
pub fn normalize_resolution(input: &str) -> Result<ConflictResolution, (String, Option<String>)> {
    let key = canonical_key(input);

    let canonical = if VALID_RESOLUTIONS.contains(key.as_str()) {
        key.as_str()
    } else if let Some(&mapped) = RESOLUTION_SYNONYMS.get(key.as_str()) {
        mapped
    } else {
        let suggestion = find_closest_match(&key, &VALID_RESOLUTIONS, &RESOLUTION_SYNONYMS);
        return Err((input.to_string(), suggestion.map(|s| s.to_uppercase())));
    };

    Ok(match canonical {
        "use_local" => ConflictResolution::UseLocal,
        "use_newest" => ConflictResolution::UseNewest,
        "merge" => ConflictResolution::Merge,
        "keep_both" => ConflictResolution::KeepBoth,
        _ => ConflictResolution::UseCloud,
    })
}

/// Turn a normalization failure into an `InvalidArgument` error.
#[must_use]
pub fn invalid_value(what: &str, (input, suggestion): (String, Option<String>)) -> Error {
    match suggestion {
        Some(s) => Error::InvalidArgument(format!("unknown {what} '{input}' (did you mean '{s}'?)")),
        None => Error::InvalidArgument(format!("unknown {what} '{input}'")),
    }
}

/// Find the closest matching value across valid set and synonyms.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;

    for &v in valid.iter().chain(synonyms.keys()) {
        let dist = levenshtein_distance(input, v);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            // For synonyms, show what it maps to
            best = Some((synonyms.get(v).copied().unwrap_or(v), dist));
        }
    }

    best.map(|(v, _)| v.to_string())
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let a_len = a.len();
    let b_len = b.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    // Single-row optimization (O(min(m,n)) space)
    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_save_kind() {
        assert_eq!(normalize_save_kind("auto"), Ok(SaveKind::Auto));
        assert_eq!(normalize_save_kind("MANUAL"), Ok(SaveKind::Manual));
        assert_eq!(normalize_save_kind("quick-save"), Ok(SaveKind::Quicksave));
        assert_eq!(normalize_save_kind("autosave"), Ok(SaveKind::Auto));
        assert!(normalize_save_kind("nonsense").is_err());
    }

    #[test]
    fn test_normalize_resolution() {
        assert_eq!(normalize_resolution("USE_CLOUD"), Ok(ConflictResolution::UseCloud));
        assert_eq!(normalize_resolution("keep-both"), Ok(ConflictResolution::KeepBoth));
        assert_eq!(normalize_resolution("mine"), Ok(ConflictResolution::UseLocal));
        assert_eq!(normalize_resolution("latest"), Ok(ConflictResolution::UseNewest));
        assert_eq!(normalize_resolution("Merge"), Ok(ConflictResolution::Merge));
    }

    #[test]
    fn test_typo_gets_suggestion() {
        let (input, suggestion) = normalize_resolution("use_clod").unwrap_err();
        assert_eq!(input, "use_clod");
        assert_eq!(suggestion.as_deref(), Some("USE_CLOUD"));

        let (_, suggestion) = normalize_save_kind("manul").unwrap_err();
        assert_eq!(suggestion.as_deref(), Some("manual"));
    }

    #[test]
    fn test_invalid_value_message() {
        let err = invalid_value("resolution", ("xx".to_string(), None));
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(err.to_string(), "Invalid argument: unknown resolution 'xx'");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }
}
