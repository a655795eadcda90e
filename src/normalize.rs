// 🔤 Name Normalization - fold company names before comparing them
//
// "Deutsche Börse AG", "DEUTSCHE BOERSE AG" and "Deutsche Borse A.G." must
// compare equal once normalized. Umlauts are transliterated first so that
// "ö" becomes "oe" (the German convention) rather than a bare "o".

use strsim::normalized_levenshtein;
use unicode_normalization::UnicodeNormalization;

/// Characters treated as word separators during normalization
const SEPARATORS: &[char] = &['.', '&', ',', '\'', '’', '`', '-', '(', ')', '/'];

/// Transliterate German umlauts and sharp s
fn transliterate(c: char, out: &mut String) {
    match c {
        'Ä' => out.push_str("Ae"),
        'Ö' => out.push_str("Oe"),
        'Ü' => out.push_str("Ue"),
        'ä' => out.push_str("ae"),
        'ö' => out.push_str("oe"),
        'ü' => out.push_str("ue"),
        'ß' => out.push_str("ss"),
        other => out.push(other),
    }
}

/// Normalize a company name for matching
///
/// - Umlauts → `ae`/`oe`/`ue`, `ß` → `ss`
/// - Other diacritics stripped (NFKD, combining marks removed)
/// - Lowercase
/// - Punctuation (`.&,'’`-()/`) → space
/// - Whitespace collapsed and trimmed
///
/// # Examples:
/// ```
/// use index_history::normalize_name;
/// assert_eq!(normalize_name("Deutsche Börse"), "deutsche boerse");
/// assert_eq!(normalize_name("Rolls-Royce Holdings"), "rolls royce holdings");
/// ```
pub fn normalize_name(name: &str) -> String {
    let mut transliterated = String::with_capacity(name.len());
    for c in name.chars() {
        transliterate(c, &mut transliterated);
    }

    let folded: String = transliterated
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .map(|c| if SEPARATORS.contains(&c) { ' ' } else { c })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity ratio (0.0 - 1.0) between two names, after normalization
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&normalize_name(a), &normalize_name(b))
}

// Combining Diacritical Marks blocks (enough for Latin scripts)
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

// ============================================================================
// TESTS
// ============================================================================
