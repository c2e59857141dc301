//! Subject label normalization.
//!
//! Catalog labels are free text ("Computer Science, B.S."). File names and
//! log fields need a short code instead ("CS"). Codes are built from the
//! leading letter of each significant word; repeated letters get an
//! occurrence counter so "Computer Chemistry" becomes "CC2".

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use articulator_shared::{ArticulatorError, Result};

/// Words that carry no subject information. Compared case-insensitively.
const STOP_WORDS: &[&str] = &["major", "minor", "b.s.", "b.a.", "studies", "and", "&"];

/// Normalize a subject label into a short code.
///
/// Empty or whitespace-only labels are rejected with
/// [`ArticulatorError::InvalidLabel`].
pub fn normalize(label: &str) -> Result<String> {
    let tokens: Vec<&str> = label
        .split_whitespace()
        .map(trim_token)
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return Err(ArticulatorError::invalid_label(label));
    }

    let significant: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| !is_stop_word(t))
        .collect();

    // A label made only of stop-words still needs a code.
    let words = if significant.is_empty() {
        tokens
    } else {
        significant
    };

    if let [only] = words.as_slice() {
        return Ok(only.chars().take(4).collect::<String>().to_uppercase());
    }

    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut code = String::new();

    for word in words {
        let letter = leading_letter(word);
        let count = occurrences.entry(letter.clone()).or_insert(0);
        *count += 1;

        code.push_str(&letter);
        if *count > 1 {
            code.push_str(&count.to_string());
        }
    }

    Ok(code)
}

/// Normalize a batch of labels, keeping codes unique across the batch.
///
/// Returns `(label, code)` pairs in input order. When two labels produce the
/// same code, the later one gets the lowest free numeric suffix (`CS`, `CS2`).
pub fn normalize_all<S: AsRef<str>>(labels: &[S]) -> Result<Vec<(String, String)>> {
    let mut used: HashSet<String> = HashSet::new();
    let mut pairs = Vec::with_capacity(labels.len());

    for label in labels {
        let label = label.as_ref();
        let base = normalize(label)?;

        let mut code = base.clone();
        let mut n = 2;
        while used.contains(&code) {
            code = format!("{base}{n}");
            n += 1;
        }

        used.insert(code.clone());
        pairs.push((label.to_string(), code));
    }

    Ok(pairs)
}

/// Strip list punctuation so "Studies," compares equal to "studies".
fn trim_token(token: &str) -> &str {
    token.trim_end_matches([',', ';', ':'])
}

fn is_stop_word(token: &str) -> bool {
    let lower = token.to_lowercase();
    STOP_WORDS.contains(&lower.as_str())
}

/// Upper-cased first letter of a word, or of its leading `(ACRONYM)`.
fn leading_letter(word: &str) -> String {
    static ACRONYM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\(([^)]+)\)").expect("valid regex"));

    let source = ACRONYM_RE
        .captures(word)
        .and_then(|caps| caps.get(1))
        .map_or(word, |m| m.as_str());

    source
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_default()
}
