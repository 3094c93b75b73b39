//! SQL injection guard for document-store queries

use super::{QueryValidator, ValidationOutcome};
use crate::plan::QueryType;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::BTreeSet;

/// Checked in order; the first hit names the rejection.
///
/// Matched against the raw text, string literals included: values belong in
/// `@` parameters, so a literal holding `;` or a keyword is rejected too.
static DANGEROUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("statement terminator followed by comment", r";\s*--"),
        ("stacked statements", r";\s*\S"),
        ("line comment", r"--"),
        ("DROP", r"(?i)\bdrop\b"),
        ("DELETE", r"(?i)\bdelete\b"),
        ("UPDATE", r"(?i)\bupdate\b"),
        ("INSERT", r"(?i)\binsert\b"),
        ("EXEC", r"(?i)\bexec(?:ute)?\b"),
        ("UNION SELECT", r"(?i)\bunion\s+(?:all\s+)?select\b"),
        ("block comment", r"/\*|\*/"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).expect("valid SQL guard pattern")))
    .collect()
});

static LEADING_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^select\b").expect("valid select regex"));

static FROM_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfrom\s+([A-Za-z_][A-Za-z0-9_]*)").expect("valid from regex")
});

/// Validates document-store SQL
#[derive(Debug, Clone)]
pub struct SqlValidator {
    aliases: BTreeSet<String>,
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl SqlValidator {
    /// Recognizes `c`, `root` and the given collection aliases
    pub fn new<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut known: BTreeSet<String> = ["c", "root"].iter().map(|a| a.to_string()).collect();
        known.extend(aliases.into_iter().map(|a| a.into().to_ascii_lowercase()));
        Self { aliases: known }
    }

    pub fn validate(&self, text: &str) -> ValidationOutcome {
        let query = text.trim();
        if query.is_empty() {
            return ValidationOutcome::invalid("Query is empty");
        }

        if let Some((name, _)) = DANGEROUS_PATTERNS.iter().find(|(_, re)| re.is_match(query)) {
            return ValidationOutcome::invalid(format!("Dangerous SQL pattern detected: {}", name));
        }

        if !LEADING_SELECT.is_match(query) {
            return ValidationOutcome::invalid("Query must start with SELECT");
        }

        let alias = match FROM_ALIAS.captures(query) {
            Some(caps) => caps[1].to_string(),
            None => return ValidationOutcome::invalid("Query must contain a FROM clause"),
        };

        if query.matches('\'').count() % 2 != 0 {
            return ValidationOutcome::invalid("Unbalanced single quotes");
        }

        if let Err(message) = scan_literals(query) {
            return ValidationOutcome::invalid(message);
        }

        let mut warnings = Vec::new();
        if !self.aliases.contains(&alias.to_ascii_lowercase()) {
            warnings.push(format!("Unrecognized collection alias '{}'", alias));
        }

        ValidationOutcome::valid().with_warnings(warnings)
    }
}

impl QueryValidator for SqlValidator {
    fn validate(&self, text: &str) -> ValidationOutcome {
        SqlValidator::validate(self, text)
    }

    fn query_type(&self) -> QueryType {
        QueryType::Sql
    }
}

/// Walks the query once, tracking string literals.
///
/// Outside literals: parentheses must balance. Inside literals: quotes are
/// escaped by doubling, a closing quote may not run into an identifier, and
/// `\x` / `\u` escapes are refused.
fn scan_literals(query: &str) -> Result<(), String> {
    let mut depth: i64 = 0;
    let mut in_literal = false;
    let mut chars = query.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_literal {
            match ch {
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                }
                '\'' => {
                    in_literal = false;
                    if chars.peek().is_some_and(|next| next.is_alphanumeric() || *next == '_') {
                        return Err("Unescaped quote inside string literal".to_string());
                    }
                }
                '\\' => {
                    if let Some(next @ ('x' | 'X' | 'u' | 'U')) = chars.peek().copied() {
                        return Err(format!(
                            "Escape sequence \\{} not allowed in string literal",
                            next
                        ));
                    }
                }
                _ => {}
            }
        } else {
            match ch {
                '\'' => in_literal = true,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err("Unbalanced parentheses".to_string());
                    }
                }
                _ => {}
            }
        }
    }

    if in_literal {
        return Err("Unbalanced single quotes".to_string());
    }
    if depth != 0 {
        return Err("Unbalanced parentheses".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(text: &str) -> ValidationOutcome {
        SqlValidator::default().validate(text)
    }

    #[test]
    fn test_empty_query() {
        assert!(!validate("").is_valid);
        assert!(!validate("   \n\t").is_valid);
    }

    #[test]
    fn test_accepts_parameterized_select() {
        let outcome = validate(
            "SELECT * FROM c WHERE c.governing_law_state != @governing_law_state \
             AND ARRAY_CONTAINS(@contract_type, c.contract_type)",
        );
        assert!(outcome.is_valid, "{}", outcome.message);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.message, "OK");
    }

    #[test]
    fn test_dangerous_patterns_are_named() {
        let cases = [
            ("SELECT * FROM c WHERE c.id = 'x'; --", "statement terminator followed by comment"),
            ("SELECT * FROM c; SELECT * FROM root", "stacked statements"),
            ("SELECT * FROM c -- trailing", "line comment"),
            ("DROP TABLE contracts", "DROP"),
            ("SELECT * FROM c WHERE EXISTS (DELETE FROM c)", "DELETE"),
            ("UPDATE c SET x = 1", "UPDATE"),
            ("INSERT INTO c VALUES (1)", "INSERT"),
            ("EXEC sp_who", "EXEC"),
            ("SELECT * FROM c UNION SELECT * FROM secrets", "UNION SELECT"),
            ("SELECT * FROM c /* hidden */", "block comment"),
        ];

        for (query, name) in cases {
            let outcome = validate(query);
            assert!(!outcome.is_valid, "accepted: {}", query);
            assert_eq!(outcome.message, format!("Dangerous SQL pattern detected: {}", name));
        }
    }

    #[test]
    fn test_patterns_apply_inside_literals() {
        let cases = [
            ("SELECT * FROM c WHERE c.title = 'a;b'", "stacked statements"),
            ("SELECT * FROM c WHERE c.title = 'Drop Shipping Agreement'", "DROP"),
        ];
        for (query, name) in cases {
            assert_eq!(
                validate(query).message,
                format!("Dangerous SQL pattern detected: {}", name)
            );
        }
        assert!(validate("SELECT * FROM c WHERE c.title = @title").is_valid);
    }

    #[test]
    fn test_trailing_semicolon_is_allowed() {
        assert!(validate("SELECT * FROM c;").is_valid);
    }

    #[test]
    fn test_shape_requirements() {
        assert_eq!(validate("VALUE c FROM c").message, "Query must start with SELECT");
        assert_eq!(validate("SELECT 1").message, "Query must contain a FROM clause");
        assert_eq!(
            validate("SELECT * FROM c WHERE (c.a = 1").message,
            "Unbalanced parentheses"
        );
        assert_eq!(
            validate("SELECT * FROM c WHERE c.a = 1)").message,
            "Unbalanced parentheses"
        );
        assert_eq!(
            validate("SELECT * FROM c WHERE c.a = 'x").message,
            "Unbalanced single quotes"
        );
    }

    #[test]
    fn test_literal_scanning() {
        assert!(validate("SELECT * FROM c WHERE c.name = 'it''s (fine'").is_valid);
        assert_eq!(
            validate("SELECT * FROM c WHERE c.name = 'O'Brien''").message,
            "Unescaped quote inside string literal"
        );
        assert!(!validate(r"SELECT * FROM c WHERE c.name = '\x27'").is_valid);
        assert!(!validate(r"SELECT * FROM c WHERE c.name = '''").is_valid);
    }

    #[test]
    fn test_unknown_alias_only_warns() {
        let outcome = validate("SELECT * FROM invoices i");
        assert!(outcome.is_valid);
        assert_eq!(outcome.warnings, vec!["Unrecognized collection alias 'invoices'"]);

        let validator = SqlValidator::new(["invoices"]);
        assert!(validator.validate("SELECT * FROM invoices i").warnings.is_empty());
    }
}
