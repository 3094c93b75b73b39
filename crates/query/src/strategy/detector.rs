//! Rule-based entity detection
//!
//! Extracts positive and negated entity mentions from question text using
//! the entity catalogs. Negation templates run first; the spans they consume
//! never produce positive matches.

use caig_common::catalog::{normalize_name, EntityCatalog, EntityKind};
use caig_common::config::MatchingConfig;
use caig_common::errors::{AppError, Result};
use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use std::str::FromStr;
use tracing::debug;

const EXACT_CONFIDENCE: f64 = 0.95;
const BOUND_NEGATION_KNOWN: f64 = 0.9;
const BOUND_NEGATION_UNKNOWN: f64 = 0.75;
const RESOLVED_NEGATION: f64 = 0.85;

/// Shortest n-gram (in characters) considered for fuzzy matching
const MIN_FUZZY_CHARS: usize = 4;

static NOT_GOVERNED_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\bnot\s+governed\s+by\s+(?:the\s+)?(?:laws?\s+of\s+)?(?:the\s+)?(?:state\s+of\s+)?([a-z0-9][a-z0-9 &'-]*)",
    )
    .expect("valid governed-by template")
});

static EXCLUSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:excluding|except\s+for|except|other\s+than|without|not\s+with|not\s+from|not\s+by)\s+(?:the\s+)?(?:(contractors?|vendors?|suppliers?|clients?|customers?|states?|types?|clauses?)\s+)?([a-z0-9][a-z0-9 &'-]*)",
    )
    .expect("valid exclusion template")
});

/// Words skipped at the start of a negated phrase
const LEADING_FILLER: &[&str] = &[
    "the", "of", "law", "laws", "state", "any", "all", "contract", "contracts", "agreement",
    "agreements", "those", "ones", "with", "from", "by", "signed",
];

/// Words that end a negated phrase
const PHRASE_STOP: &[&str] = &[
    "and", "or", "in", "with", "that", "which", "contract", "contracts", "agreement",
    "agreements", "where", "for", "but", "from", "by", "governed", "who", "whose", "under",
    "signed", "dated", "between", "since", "before", "after",
];

/// Words an n-gram may not start or end with when fuzzy matching
const FUZZY_STOP: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "by", "contract", "contracts", "for", "from", "how",
    "in", "is", "list", "many", "me", "of", "or", "show", "the", "to", "what", "which", "with",
];

/// How a match was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Fuzzy,
    NegationPattern,
}

/// One detected entity mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub normalized_name: String,
    pub display_name: String,
    pub confidence: f64,
    pub match_type: MatchType,
}

/// How catalog-less negated phrases are bound to catalogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegationPolicy {
    /// Only negations whose trigger names a catalog count
    RequireHint,
    /// Bind when the phrase resolves to exactly one catalog
    #[default]
    ResolveUnique,
    /// Bind in every catalog containing the phrase
    ApplyToAll,
}

impl FromStr for NegationPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "require_hint" => Ok(NegationPolicy::RequireHint),
            "resolve_unique" => Ok(NegationPolicy::ResolveUnique),
            "apply_to_all" => Ok(NegationPolicy::ApplyToAll),
            other => Err(AppError::Configuration {
                message: format!("Unknown negation policy '{}'", other),
            }),
        }
    }
}

/// Entity mentions found in one text, grouped by catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Detection {
    pub positives: BTreeMap<EntityKind, Vec<EntityMatch>>,
    pub negations: BTreeMap<EntityKind, Vec<EntityMatch>>,
    /// Negated phrases the policy could not bind to a catalog
    pub unresolved_negations: Vec<String>,
}

impl Detection {
    /// Number of positive matches across catalogs
    pub fn positive_count(&self) -> usize {
        self.positives.values().map(Vec::len).sum()
    }

    pub fn negation_count(&self) -> usize {
        self.negations.values().map(Vec::len).sum()
    }

    pub fn has_negation(&self) -> bool {
        self.negation_count() > 0
    }

    pub fn is_empty(&self) -> bool {
        self.positive_count() == 0 && self.negation_count() == 0
    }

    /// First positive match in catalog order
    pub fn first_positive(&self) -> Option<(EntityKind, &EntityMatch)> {
        self.positives
            .iter()
            .find_map(|(kind, matches)| matches.first().map(|m| (*kind, m)))
    }

    fn push(map: &mut BTreeMap<EntityKind, Vec<EntityMatch>>, kind: EntityKind, m: EntityMatch) {
        let matches = map.entry(kind).or_default();
        if !matches.iter().any(|existing| existing.normalized_name == m.normalized_name) {
            matches.push(m);
        }
    }
}

/// Extracts entity mentions from text
pub trait EntityDetector: Send + Sync {
    fn detect(&self, text: &str, catalog: &EntityCatalog) -> Detection;
}

/// Catalog-driven detector with negation templates
#[derive(Debug, Clone)]
pub struct RuleBasedDetector {
    policy: NegationPolicy,
    fuzzy_threshold: f64,
    max_ngram: usize,
}

impl Default for RuleBasedDetector {
    fn default() -> Self {
        Self::new(NegationPolicy::default(), 0.85, 5)
    }
}

impl RuleBasedDetector {
    pub fn new(policy: NegationPolicy, fuzzy_threshold: f64, max_ngram: usize) -> Self {
        Self {
            policy,
            fuzzy_threshold,
            max_ngram: max_ngram.max(1),
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Result<Self> {
        Ok(Self::new(
            config.negation_policy.parse()?,
            config.fuzzy_threshold,
            config.max_ngram,
        ))
    }

    pub fn policy(&self) -> NegationPolicy {
        self.policy
    }

    fn detect_negations(
        &self,
        lower: &str,
        catalog: &EntityCatalog,
        detection: &mut Detection,
    ) -> Vec<Range<usize>> {
        let mut consumed: Vec<Range<usize>> = Vec::new();

        let governed = NOT_GOVERNED_BY
            .captures_iter(lower)
            .map(|caps| (caps, Some(EntityKind::GoverningLawState)));
        let exclusions = EXCLUSION.captures_iter(lower).map(|caps| {
            let hint = caps.get(1).and_then(|h| hint_kind(h.as_str()));
            (caps, hint)
        });

        for (caps, hint) in governed.chain(exclusions).collect::<Vec<(Captures<'_>, _)>>() {
            let (Some(whole), Some(phrase_group)) = (caps.get(0), caps.get(caps.len() - 1)) else {
                continue;
            };
            if consumed.iter().any(|r| r.start < whole.end() && whole.start() < r.end) {
                continue;
            }

            let Some((phrase, phrase_end)) = clean_phrase(phrase_group.as_str()) else {
                continue;
            };
            consumed.push(whole.start()..phrase_group.start() + phrase_end);
            self.bind_negation(&phrase, hint, catalog, detection);
        }

        consumed
    }

    fn bind_negation(
        &self,
        phrase: &str,
        hint: Option<EntityKind>,
        catalog: &EntityCatalog,
        detection: &mut Detection,
    ) {
        let normalized = normalize_name(phrase);
        if normalized.is_empty() {
            return;
        }

        if let Some(kind) = hint {
            let m = match catalog.get(kind, phrase) {
                Some(entry) => EntityMatch {
                    normalized_name: entry.normalized_name.clone(),
                    display_name: entry.display_name.clone(),
                    confidence: BOUND_NEGATION_KNOWN,
                    match_type: MatchType::NegationPattern,
                },
                None => EntityMatch {
                    normalized_name: normalized,
                    display_name: phrase.to_string(),
                    confidence: BOUND_NEGATION_UNKNOWN,
                    match_type: MatchType::NegationPattern,
                },
            };
            Detection::push(&mut detection.negations, kind, m);
            return;
        }

        let known = catalog.resolve_all(phrase);
        let bound: Vec<(EntityKind, EntityMatch)> = match self.policy {
            NegationPolicy::RequireHint => Vec::new(),
            NegationPolicy::ResolveUnique if known.len() == 1 => {
                self.negated_entries(catalog, known, phrase)
            }
            NegationPolicy::ResolveUnique if known.is_empty() => {
                // Misspelled party names still bind when exactly one catalog accepts them
                let fuzzy: Vec<_> = EntityKind::ALL
                    .into_iter()
                    .filter(EntityKind::is_party)
                    .filter_map(|kind| {
                        catalog
                            .best_fuzzy_match(kind, phrase)
                            .filter(|(_, score)| *score >= self.fuzzy_threshold)
                            .map(|(entry, score)| (kind, entry, score))
                    })
                    .collect();
                match fuzzy.as_slice() {
                    [(kind, entry, score)] => vec![(
                        *kind,
                        EntityMatch {
                            normalized_name: entry.normalized_name.clone(),
                            display_name: entry.display_name.clone(),
                            confidence: *score,
                            match_type: MatchType::NegationPattern,
                        },
                    )],
                    _ => Vec::new(),
                }
            }
            NegationPolicy::ResolveUnique => Vec::new(),
            NegationPolicy::ApplyToAll => self.negated_entries(catalog, known, phrase),
        };

        if bound.is_empty() {
            debug!(phrase = %phrase, policy = ?self.policy, "Negated phrase left unbound");
            detection.unresolved_negations.push(phrase.to_string());
            return;
        }
        for (kind, m) in bound {
            Detection::push(&mut detection.negations, kind, m);
        }
    }

    fn negated_entries(
        &self,
        catalog: &EntityCatalog,
        kinds: &[EntityKind],
        phrase: &str,
    ) -> Vec<(EntityKind, EntityMatch)> {
        kinds
            .iter()
            .filter_map(|kind| {
                catalog.get(*kind, phrase).map(|entry| {
                    (
                        *kind,
                        EntityMatch {
                            normalized_name: entry.normalized_name.clone(),
                            display_name: entry.display_name.clone(),
                            confidence: RESOLVED_NEGATION,
                            match_type: MatchType::NegationPattern,
                        },
                    )
                })
            })
            .collect()
    }

    fn detect_positives(
        &self,
        lower: &str,
        consumed: &[Range<usize>],
        catalog: &EntityCatalog,
        detection: &mut Detection,
    ) {
        let tokens: Vec<(Range<usize>, &str)> = tokenize(lower)
            .into_iter()
            .filter(|(span, _)| {
                !consumed
                    .iter()
                    .any(|r| r.start < span.end && span.start < r.end)
            })
            .collect();

        let max_n = self.max_ngram.min(catalog.max_tokens().max(1));
        let mut i = 0;
        while i < tokens.len() {
            let longest = max_n.min(tokens.len() - i);
            let mut advanced = false;

            for n in (1..=longest).rev() {
                let window = &tokens[i..i + n];
                if !contiguous(window) {
                    continue;
                }
                let candidate = join(window);
                if let Some(kind) = catalog.resolve(&candidate) {
                    if let Some(entry) = catalog.get(kind, &candidate) {
                        Detection::push(
                            &mut detection.positives,
                            kind,
                            EntityMatch {
                                normalized_name: entry.normalized_name.clone(),
                                display_name: entry.display_name.clone(),
                                confidence: EXACT_CONFIDENCE,
                                match_type: MatchType::Exact,
                            },
                        );
                        i += n;
                        advanced = true;
                        break;
                    }
                }
            }
            if advanced {
                continue;
            }

            if let Some((n, kind, m)) = self.fuzzy_at(&tokens[i..], longest, catalog) {
                Detection::push(&mut detection.positives, kind, m);
                i += n;
            } else {
                i += 1;
            }
        }
    }

    /// Longest fuzzy party match starting at the first token
    fn fuzzy_at(
        &self,
        tokens: &[(Range<usize>, &str)],
        longest: usize,
        catalog: &EntityCatalog,
    ) -> Option<(usize, EntityKind, EntityMatch)> {
        for n in (1..=longest).rev() {
            let window = &tokens[..n];
            let (first, last) = (window[0].1, window[n - 1].1);
            if !contiguous(window) || FUZZY_STOP.contains(&first) || FUZZY_STOP.contains(&last) {
                continue;
            }
            let candidate = join(window);
            if candidate.chars().filter(|c| c.is_alphanumeric()).count() < MIN_FUZZY_CHARS {
                continue;
            }

            let best = EntityKind::ALL
                .into_iter()
                .filter(EntityKind::is_party)
                .filter_map(|kind| {
                    catalog
                        .best_fuzzy_match(kind, &candidate)
                        .map(|(entry, score)| (kind, entry, score))
                })
                .filter(|(_, _, score)| *score >= self.fuzzy_threshold)
                .max_by(|a, b| a.2.total_cmp(&b.2));

            if let Some((kind, entry, score)) = best {
                return Some((
                    n,
                    kind,
                    EntityMatch {
                        normalized_name: entry.normalized_name.clone(),
                        display_name: entry.display_name.clone(),
                        confidence: score,
                        match_type: MatchType::Fuzzy,
                    },
                ));
            }
        }
        None
    }
}

impl EntityDetector for RuleBasedDetector {
    fn detect(&self, text: &str, catalog: &EntityCatalog) -> Detection {
        let lower = text.to_lowercase();
        let mut detection = Detection::default();

        let consumed = self.detect_negations(&lower, catalog, &mut detection);
        self.detect_positives(&lower, &consumed, catalog, &mut detection);

        debug!(
            positives = detection.positive_count(),
            negations = detection.negation_count(),
            unresolved = detection.unresolved_negations.len(),
            "Entity detection complete"
        );
        detection
    }
}

fn hint_kind(hint: &str) -> Option<EntityKind> {
    match hint.trim_end_matches('s') {
        "contractor" | "vendor" | "supplier" => Some(EntityKind::ContractorParty),
        "client" | "customer" => Some(EntityKind::ContractingParty),
        "state" => Some(EntityKind::GoverningLawState),
        "type" => Some(EntityKind::ContractType),
        "clause" => Some(EntityKind::ClauseType),
        _ => None,
    }
}

/// Trim filler words and cut at the first stop word.
///
/// Returns the phrase and the offset (within `raw`) where it ends.
fn clean_phrase(raw: &str) -> Option<(String, usize)> {
    let words = tokenize(raw);
    let start = words
        .iter()
        .position(|(_, word)| !LEADING_FILLER.contains(word))?;

    let kept: Vec<&(Range<usize>, &str)> = words[start..]
        .iter()
        .take_while(|(_, word)| !PHRASE_STOP.contains(word))
        .collect();
    let last = kept.last()?;

    let phrase = kept
        .iter()
        .map(|(_, word)| *word)
        .collect::<Vec<_>>()
        .join(" ");
    Some((phrase, last.0.end))
}

/// Alphanumeric runs with their byte spans
fn tokenize(text: &str) -> Vec<(Range<usize>, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;

    for (i, ch) in text.char_indices() {
        match (ch.is_alphanumeric() || ch == '&', start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                tokens.push((s..i, &text[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push((s..text.len(), &text[s..]));
    }
    tokens
}

/// Tokens were adjacent in the text, with no consumed span between them
fn contiguous(window: &[(Range<usize>, &str)]) -> bool {
    window.windows(2).all(|pair| {
        let gap = pair[1].0.start.saturating_sub(pair[0].0.end);
        gap <= 2
    })
}

fn join(window: &[(Range<usize>, &str)]) -> String {
    window
        .iter()
        .map(|(_, word)| *word)
        .collect::<Vec<_>>()
        .join(" ")
}
