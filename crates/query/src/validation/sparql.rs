//! Read-only guard for graph-store queries

use super::{QueryValidator, ValidationOutcome};
use crate::plan::QueryType;
use caig_common::config::DEFAULT_CAIG_NAMESPACE;

const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "DELETE", "LOAD", "CLEAR", "CREATE", "DROP", "COPY", "MOVE", "ADD",
];

const QUERY_FORMS: &[&str] = &["SELECT", "CONSTRUCT", "ASK", "DESCRIBE"];

/// Validates SPARQL against the `caig:` ontology namespace
#[derive(Debug, Clone)]
pub struct SparqlValidator {
    namespace: String,
}

impl Default for SparqlValidator {
    fn default() -> Self {
        Self::new(DEFAULT_CAIG_NAMESPACE)
    }
}

impl SparqlValidator {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn validate(&self, text: &str) -> ValidationOutcome {
        let query = text.trim();
        if query.is_empty() {
            return ValidationOutcome::invalid("Query is empty");
        }

        let tokens = match tokenize(query) {
            Ok(tokens) => tokens,
            Err(message) => return ValidationOutcome::invalid(message),
        };
        let keywords: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Term(term) if term.chars().all(|c| c.is_ascii_alphabetic()) => {
                    Some(term.to_ascii_uppercase())
                }
                _ => None,
            })
            .collect();
        let has_keyword = |wanted: &str| keywords.iter().any(|k| k == wanted);

        if let Some(keyword) = MUTATING_KEYWORDS.iter().find(|k| has_keyword(k)) {
            return ValidationOutcome::invalid(format!(
                "Mutating SPARQL keyword detected: {}",
                keyword
            ));
        }

        if !QUERY_FORMS.iter().any(|form| has_keyword(form)) {
            return ValidationOutcome::invalid(
                "SPARQL query must be SELECT, CONSTRUCT, ASK or DESCRIBE",
            );
        }

        let bindings = caig_bindings(&tokens);
        if bindings.is_empty() {
            return ValidationOutcome::invalid("Missing PREFIX declaration for caig: namespace");
        }
        if let Some(iri) = bindings.iter().find(|iri| **iri != self.namespace) {
            return ValidationOutcome::invalid(format!(
                "PREFIX caig: is bound to <{}>, expected <{}>",
                iri, self.namespace
            ));
        }

        if has_keyword("SELECT") && !has_keyword("WHERE") {
            return ValidationOutcome::invalid("SELECT query must contain a WHERE clause");
        }

        if let Err(message) = check_balance(&tokens) {
            return ValidationOutcome::invalid(message);
        }

        let body = match tokens.iter().position(|t| *t == Token::Punct('{')) {
            Some(open) => &tokens[open + 1..],
            None => return ValidationOutcome::invalid("Query has no graph pattern"),
        };
        match find_triple(body) {
            TripleScan::Found => ValidationOutcome::valid(),
            TripleScan::LiteralSubject(subject) => ValidationOutcome::invalid(format!(
                "Triple subject cannot be a literal: {}",
                subject
            )),
            TripleScan::Missing => {
                ValidationOutcome::invalid("No valid triple pattern found in WHERE clause")
            }
        }
    }
}

impl QueryValidator for SparqlValidator {
    fn validate(&self, text: &str) -> ValidationOutcome {
        SparqlValidator::validate(self, text)
    }

    fn query_type(&self) -> QueryType {
        QueryType::Sparql
    }
}

/// Escape a value for use inside a double-quoted SPARQL literal
pub fn sanitize_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\0' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// `?name`, `$name` or `name` with an identifier-shaped name
pub fn is_valid_variable_name(name: &str) -> bool {
    let bare = name
        .strip_prefix('?')
        .or_else(|| name.strip_prefix('$'))
        .unwrap_or(name);

    let mut chars = bare.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'a> {
    Punct(char),
    Literal(&'a str),
    Term(&'a str),
}

const PUNCT: &[char] = &['{', '}', '(', ')', '.', ';', ','];

/// Every IRI bound to `caig:`, including redeclarations
fn caig_bindings<'a>(tokens: &[Token<'a>]) -> Vec<&'a str> {
    tokens
        .windows(3)
        .filter_map(|window| match *window {
            [Token::Term(keyword), Token::Term("caig:"), Token::Term(iri)]
                if keyword.eq_ignore_ascii_case("PREFIX") =>
            {
                Some(iri.strip_prefix('<').and_then(|i| i.strip_suffix('>')).unwrap_or(iri))
            }
            _ => None,
        })
        .collect()
}

/// Splits a query into terms, literals and punctuation; `#` comments are dropped
fn tokenize(query: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut chars = query.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch == '#' {
            while chars.next_if(|&(_, c)| c != '\n' && c != '\r').is_some() {}
            continue;
        }

        if PUNCT.contains(&ch) {
            chars.next();
            tokens.push(Token::Punct(ch));
            continue;
        }

        if ch == '"' || ch == '\'' {
            chars.next();
            let mut escaped = false;
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == ch {
                    closed = true;
                    break;
                }
            }
            if !closed {
                return Err("Unterminated string literal".to_string());
            }
            // Language tag or datatype suffix
            let mut end = consume_term(query, &mut chars);
            if query[..end].ends_with("^^") {
                if let Some(len) = iri_len(&query[end..]) {
                    end += len;
                    while chars.next_if(|&(i, _)| i < end).is_some() {}
                }
            }
            tokens.push(Token::Literal(&query[start..end]));
            continue;
        }

        if let Some(len) = iri_len(&query[start..]) {
            let end = start + len;
            while chars.next_if(|&(i, _)| i < end).is_some() {}
            tokens.push(Token::Term(&query[start..end]));
            continue;
        }

        let end = consume_term(query, &mut chars);
        let end = if end == start {
            // Lone character that never starts a term
            chars.next();
            start + ch.len_utf8()
        } else {
            end
        };
        tokens.push(Token::Term(&query[start..end]));
    }

    Ok(tokens)
}

/// Length of the `<...>` IRI at the start of `text`, if there is one
fn iri_len(text: &str) -> Option<usize> {
    if !text.starts_with('<') {
        return None;
    }
    let len = text.find(['>', ' ', '\t', '\n', '\r'])?;
    text[len..].starts_with('>').then_some(len + 1)
}

/// Advance over a term; returns its end offset. A `.` belongs to the term
/// only when another term character follows it.
fn consume_term(
    query: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> usize {
    let mut end = chars.peek().map_or(query.len(), |&(i, _)| i);
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '<') {
            break;
        }
        if c == '.' {
            let next = query[i + 1..].chars().next();
            if !next.is_some_and(|n| !n.is_whitespace() && !PUNCT.contains(&n)) {
                break;
            }
        } else if PUNCT.contains(&c) {
            break;
        }
        chars.next();
        end = i + c.len_utf8();
    }
    end
}

fn check_balance(tokens: &[Token<'_>]) -> Result<(), String> {
    let mut braces: i64 = 0;
    let mut parens: i64 = 0;
    for token in tokens {
        match token {
            Token::Punct('{') => braces += 1,
            Token::Punct('}') => braces -= 1,
            Token::Punct('(') => parens += 1,
            Token::Punct(')') => parens -= 1,
            _ => {}
        }
        if braces < 0 || parens < 0 {
            break;
        }
    }

    if braces != 0 {
        return Err("Unbalanced braces".to_string());
    }
    if parens != 0 {
        return Err("Unbalanced parentheses".to_string());
    }
    Ok(())
}

enum TripleScan {
    Found,
    LiteralSubject(String),
    Missing,
}

fn is_node(term: &str) -> bool {
    term.starts_with('?')
        || term.starts_with('$')
        || term.starts_with("_:")
        || (term.starts_with('<') && term.ends_with('>') && term.len() > 1)
        || term.contains(':')
}

fn is_predicate(term: &str) -> bool {
    term == "a" || (is_node(term) && !term.starts_with("_:"))
}

/// Looks for `subject predicate object` at the start of a statement
fn find_triple(body: &[Token<'_>]) -> TripleScan {
    let mut found = false;

    for i in 0..body.len().saturating_sub(2) {
        let at_statement_start =
            i == 0 || matches!(body[i - 1], Token::Punct('{') | Token::Punct('.') | Token::Punct('}'));
        if !at_statement_start {
            continue;
        }

        if !matches!(body[i + 1], Token::Term(term) if is_predicate(term))
            || matches!(body[i + 2], Token::Punct(_))
        {
            continue;
        }

        match body[i] {
            Token::Literal(subject) => return TripleScan::LiteralSubject(subject.to_string()),
            Token::Term(subject) if is_node(subject) => found = true,
            _ => {}
        }
    }

    if found {
        TripleScan::Found
    } else {
        TripleScan::Missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "PREFIX caig: <http://cosmosdb.com/caig#>\n\
        SELECT DISTINCT ?contract WHERE {\n\
          ?contract a caig:Contract .\n\
          ?contract caig:governing_law_state ?s0 .\n\
          ?s0 caig:normalized_name \"delaware\" .\n\
        }\n\
        LIMIT 50";

    fn validate(text: &str) -> ValidationOutcome {
        SparqlValidator::default().validate(text)
    }

    #[test]
    fn test_accepts_read_only_select() {
        let outcome = validate(VALID);
        assert!(outcome.is_valid, "{}", outcome.message);
    }

    #[test]
    fn test_empty_query() {
        assert!(!validate("").is_valid);
        assert!(!validate(" \n ").is_valid);
    }

    #[test]
    fn test_mutating_keywords() {
        let outcome = validate(
            "PREFIX caig: <http://cosmosdb.com/caig#>\nINSERT DATA { caig:x caig:p caig:y }",
        );
        assert_eq!(outcome.message, "Mutating SPARQL keyword detected: INSERT");

        assert!(!validate("DROP GRAPH <http://cosmosdb.com/g>").is_valid);
        assert!(!validate("CLEAR ALL").is_valid);
    }

    #[test]
    fn test_keywords_inside_literals_and_names_are_ignored() {
        let query = "PREFIX caig: <http://cosmosdb.com/caig#>\n\
            SELECT ?c WHERE { ?c caig:name \"Drop Zone Add-On\" . ?c caig:add ?x }";
        assert!(validate(query).is_valid);
    }

    #[test]
    fn test_requires_exact_namespace() {
        let missing = VALID.replace("PREFIX caig: <http://cosmosdb.com/caig#>\n", "");
        assert_eq!(
            validate(&missing).message,
            "Missing PREFIX declaration for caig: namespace"
        );

        let wrong = VALID.replace("http://cosmosdb.com/caig#", "http://example.com/caig#");
        let outcome = validate(&wrong);
        assert!(!outcome.is_valid);
        assert!(outcome.message.contains("expected <http://cosmosdb.com/caig#>"));

        let custom = SparqlValidator::new("http://example.com/caig#");
        assert!(custom.validate(&wrong).is_valid);
    }

    #[test]
    fn test_every_caig_binding_must_match() {
        let rebound = VALID.replace(
            "PREFIX caig: <http://cosmosdb.com/caig#>\n",
            "PREFIX caig: <http://cosmosdb.com/caig#>\nPREFIX caig: <http://evil.example/x#>\n",
        );
        let outcome = validate(&rebound);
        assert!(!outcome.is_valid);
        assert_eq!(
            outcome.message,
            "PREFIX caig: is bound to <http://evil.example/x#>, expected <http://cosmosdb.com/caig#>"
        );

        let commented = VALID.replace(
            "PREFIX caig: <http://cosmosdb.com/caig#>\n",
            "# PREFIX caig: <http://cosmosdb.com/caig#>\nPREFIX caig: <http://evil.example/x#>\n",
        );
        let outcome = validate(&commented);
        assert!(!outcome.is_valid);
        assert!(outcome.message.contains("<http://evil.example/x#>"));

        let commented_only = VALID.replace(
            "PREFIX caig: <http://cosmosdb.com/caig#>\n",
            "# PREFIX caig: <http://cosmosdb.com/caig#>\n",
        );
        assert_eq!(
            validate(&commented_only).message,
            "Missing PREFIX declaration for caig: namespace"
        );
    }

    #[test]
    fn test_comments_are_ignored() {
        let query = "PREFIX caig: <http://cosmosdb.com/caig#> # DROP GRAPH comment\n\
            SELECT ?c WHERE { ?c a caig:Contract . # INSERT too\n\
            ?c caig:value \"5\"^^<http://www.w3.org/2001/XMLSchema#int> }";
        let outcome = validate(query);
        assert!(outcome.is_valid, "{}", outcome.message);

        let tight = "PREFIX caig:<http://cosmosdb.com/caig#> SELECT ?c WHERE { ?c a caig:Contract }";
        assert!(validate(tight).is_valid);
    }

    #[test]
    fn test_query_form_and_where() {
        assert_eq!(
            validate("PREFIX caig: <http://cosmosdb.com/caig#> caig:x caig:p caig:y").message,
            "SPARQL query must be SELECT, CONSTRUCT, ASK or DESCRIBE"
        );
        assert_eq!(
            validate("PREFIX caig: <http://cosmosdb.com/caig#> SELECT ?c { ?c a caig:Contract }")
                .message,
            "SELECT query must contain a WHERE clause"
        );
        assert!(validate("PREFIX caig: <http://cosmosdb.com/caig#> ASK { ?c a caig:Contract }")
            .is_valid);
    }

    #[test]
    fn test_structure_checks() {
        let unbalanced = "PREFIX caig: <http://cosmosdb.com/caig#>\n\
            SELECT ?c WHERE { ?c a caig:Contract . FILTER(?c != \"}\")";
        assert_eq!(validate(unbalanced).message, "Unbalanced braces");

        let literal_subject = "PREFIX caig: <http://cosmosdb.com/caig#>\n\
            SELECT ?c WHERE { \"Acme\" caig:name ?c }";
        assert!(validate(literal_subject)
            .message
            .starts_with("Triple subject cannot be a literal"));

        let no_triple = "PREFIX caig: <http://cosmosdb.com/caig#>\n\
            SELECT ?c WHERE { FILTER(?c) }";
        assert_eq!(
            validate(no_triple).message,
            "No valid triple pattern found in WHERE clause"
        );

        let unterminated = "PREFIX caig: <http://cosmosdb.com/caig#>\n\
            SELECT ?c WHERE { ?c caig:name \"Acme }";
        assert_eq!(validate(unterminated).message, "Unterminated string literal");
    }

    #[test]
    fn test_negation_filter_is_accepted() {
        let query = "PREFIX caig: <http://cosmosdb.com/caig#>\n\
            SELECT DISTINCT ?contract WHERE {\n\
              ?contract a caig:Contract .\n\
              FILTER NOT EXISTS { ?contract caig:governing_law_state ?x0 . ?x0 caig:normalized_name \"alabama\" }\n\
            }";
        assert!(validate(query).is_valid);
    }

    #[test]
    fn test_sanitize_literal() {
        assert_eq!(sanitize_literal("O'Neil \"Q\" \\ x\0"), "O\\'Neil \\\"Q\\\" \\\\ x");
        assert_eq!(sanitize_literal("plain"), "plain");
    }

    #[test]
    fn test_variable_names() {
        assert!(is_valid_variable_name("?contract"));
        assert!(is_valid_variable_name("$x_1"));
        assert!(is_valid_variable_name("_hidden"));
        assert!(!is_valid_variable_name("?"));
        assert!(!is_valid_variable_name("?1abc"));
        assert!(!is_valid_variable_name("?a-b"));
        assert!(!is_valid_variable_name("??a"));
    }
}
