//! Entity name normalization
//!
//! Every catalog key and every candidate phrase goes through
//! [`normalize_name`] so lookups compare like with like.

/// Corporate suffixes removed from the end of a name
pub const COMPANY_SUFFIXES: &[&str] = &[
    "llc",
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "company",
    "co",
    "ltd",
    "limited",
    "lp",
    "llp",
    "plc",
    "gmbh",
];

/// Normalize an entity name to its catalog key.
///
/// Lowercases, turns punctuation into separators, joins tokens with `_`,
/// strips trailing corporate suffixes and a leading `the`. A name is never
/// stripped down to nothing: the last remaining token is kept.
///
/// Idempotent: `normalize_name(&normalize_name(x)) == normalize_name(x)`.
pub fn normalize_name(name: &str) -> String {
    let spaced: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = spaced.split_whitespace().collect();

    // Suffix and article stripping can expose each other ("the acme co inc"),
    // so repeat until nothing changes.
    loop {
        let before = tokens.len();

        while tokens.len() > 1
            && tokens
                .last()
                .map_or(false, |last| COMPANY_SUFFIXES.contains(last))
        {
            tokens.pop();
        }

        if tokens.len() > 1 && tokens[0] == "the" {
            tokens.remove(0);
        }

        if tokens.len() == before {
            break;
        }
    }

    tokens.join("_")
}

/// Tokens of a normalized name
pub fn name_tokens(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split('_').filter(|t| !t.is_empty())
}
