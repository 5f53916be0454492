//! Best-effort pairing of a free-text address with a registered
//! municipality. This is a keyword heuristic, not geocoding: unrelated
//! municipalities sharing a generic word can match, and nearby ones with no
//! shared word will not.

use crate::models::municipality::Municipality;

const ROADWAY_SUFFIXES: [&str; 6] = ["street", "avenue", "road", "lane", "drive", "boulevard"];

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

/// Lowercased words longer than three characters that are not roadway
/// suffixes.
pub fn significant_words(address: &str) -> Vec<String> {
    words(address)
        .filter(|word| word.chars().count() > 3 && !ROADWAY_SUFFIXES.contains(&word.as_str()))
        .collect()
}

/// First municipality whose registered address has a word containing, or
/// contained in, a significant word of `address`.
pub fn match_municipality<'a>(
    address: &str,
    municipalities: &'a [Municipality],
) -> Option<&'a Municipality> {
    let significant = significant_words(address);
    if significant.is_empty() {
        return None;
    }

    municipalities.iter().find(|municipality| {
        let Some(registered) = municipality.address.as_deref() else {
            return false;
        };

        words(registered).any(|candidate| {
            significant
                .iter()
                .any(|word| candidate.contains(word.as_str()) || word.contains(candidate.as_str()))
        })
    })
}
