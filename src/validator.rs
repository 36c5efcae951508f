//! SQL safety validator
//!
//! Decides ACCEPT/REJECT for a candidate SQL string produced by the
//! generator. The validator is an ordered pipeline of independent checks
//! over a lightweight tokenization; the first failing check determines the
//! verdict, so check ordering is part of the contract. It is pure and
//! stateless aside from the configured denylists and the optional schema
//! snapshot.
//!
//! The injection heuristics here are best-effort defense-in-depth, not a
//! substitute for the statement-shape and denylist checks or for the
//! read-only transaction the executor opens as the final enforcement layer.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::config::ValidatorConfig;
use crate::schema::SchemaSnapshot;

/// Closed set of rejection reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    NotSelect,
    ForbiddenKeyword,
    ForbiddenFunction,
    SuspiciousPattern,
    UnknownIdentifier,
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotSelect => "NOT_SELECT",
            Self::ForbiddenKeyword => "FORBIDDEN_KEYWORD",
            Self::ForbiddenFunction => "FORBIDDEN_FUNCTION",
            Self::SuspiciousPattern => "SUSPICIOUS_PATTERN",
            Self::UnknownIdentifier => "UNKNOWN_IDENTIFIER",
        };
        f.write_str(name)
    }
}

/// SQL text that has passed validation.
///
/// The field is private and the only constructor lives in this module, so
/// the executor cannot be handed unvalidated text by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of validating one candidate SQL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted(ValidatedSql),
    Rejected { code: ViolationCode, detail: String },
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// One-line summary for the audit trail.
    pub fn summary(&self) -> String {
        match self {
            Self::Accepted(_) => "ACCEPTED".to_string(),
            Self::Rejected { code, detail } => format!("REJECTED {code}: {detail}"),
        }
    }

    /// Convert into the crate error taxonomy for hosts that want `?`.
    pub fn into_result(self) -> crate::error::Result<ValidatedSql> {
        match self {
            Self::Accepted(sql) => Ok(sql),
            Self::Rejected { code, detail } => {
                Err(crate::error::GuardError::Validation { code, detail })
            }
        }
    }
}

/// Ordered pipeline of safety checks.
#[derive(Debug, Clone)]
pub struct Validator {
    forbidden_keywords: HashSet<String>,
    forbidden_functions: HashSet<String>,
    check_identifiers: bool,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            forbidden_keywords: config
                .forbidden_keywords
                .iter()
                .map(|k| k.to_uppercase())
                .collect(),
            forbidden_functions: config
                .forbidden_functions
                .iter()
                .map(|f| f.to_uppercase())
                .collect(),
            check_identifiers: config.check_identifiers,
        }
    }

    /// Validate without schema awareness (the identifier check is skipped).
    pub fn validate(&self, candidate: &str) -> ValidationVerdict {
        self.validate_with_schema(candidate, None)
    }

    /// Run the full check pipeline. The first failing check short-circuits.
    pub fn validate_with_schema(
        &self,
        candidate: &str,
        snapshot: Option<&SchemaSnapshot>,
    ) -> ValidationVerdict {
        let normalized = normalize(candidate);
        let scan = tokenize(&normalized);

        if let Some(verdict) = check_statement_shape(&scan) {
            return verdict;
        }
        if let Some(verdict) = check_forbidden_keywords(&scan, &self.forbidden_keywords) {
            return verdict;
        }
        if let Some(verdict) = check_forbidden_functions(&scan, &self.forbidden_functions) {
            return verdict;
        }
        if let Some(verdict) = check_suspicious_patterns(&scan) {
            return verdict;
        }
        if self.check_identifiers {
            // Absence of schema information is never a security failure;
            // the check is skipped, not failed, when no snapshot exists.
            if let Some(snap) = snapshot.filter(|s| !s.is_empty()) {
                if let Some(verdict) = check_identifier_scope(&scan, snap) {
                    return verdict;
                }
            }
        }

        ValidationVerdict::Accepted(ValidatedSql(normalized))
    }
}

/// Strip surrounding whitespace and trailing semicolons. Idempotent, so
/// re-validating an accepted statement yields the identical normalized text.
fn normalize(sql: &str) -> String {
    sql.trim_start()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Keyword, identifier or numeric literal, uppercased.
    Word(String),
    /// String literal content (quotes stripped).
    Str(String),
    /// Single punctuation character.
    Symbol(char),
}

/// Tokenization result plus the comment/quote anomalies the heuristics need.
#[derive(Debug, Default)]
struct Scan {
    tokens: Vec<Token>,
    trailing_line_comment: bool,
    unterminated_block_comment: bool,
    unterminated_string: bool,
}

/// Whitespace-delimited scan that skips comment bodies and keeps string
/// literals as opaque tokens. Deliberately not a SQL grammar.
fn tokenize(sql: &str) -> Scan {
    let mut scan = Scan::default();
    let mut chars = sql.char_indices().peekable();
    let bytes = sql.as_bytes();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '\'' => {
                // Single-quoted literal with '' escaping.
                let mut content = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    if c == '\'' {
                        if matches!(chars.peek(), Some((_, '\''))) {
                            chars.next();
                            content.push('\'');
                        } else {
                            closed = true;
                            break;
                        }
                    } else {
                        content.push(c);
                    }
                }
                if !closed {
                    scan.unterminated_string = true;
                }
                scan.tokens.push(Token::Str(content));
            }
            '"' => {
                // Quoted identifier.
                let mut ident = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    ident.push(c);
                }
                if !closed {
                    scan.unterminated_string = true;
                }
                scan.tokens.push(Token::Word(ident.to_uppercase()));
            }
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                chars.next();
                let mut saw_newline = false;
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        saw_newline = true;
                        break;
                    }
                }
                if !saw_newline {
                    scan.trailing_line_comment = true;
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    if c == '*' && matches!(chars.peek(), Some((_, '/'))) {
                        chars.next();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    scan.unterminated_block_comment = true;
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = i + c.len_utf8();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = std::str::from_utf8(&bytes[i..end])
                    .unwrap_or_default()
                    .to_uppercase();
                scan.tokens.push(Token::Word(word));
            }
            c if c.is_ascii_digit() => {
                let mut end = i + 1;
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = std::str::from_utf8(&bytes[i..end])
                    .unwrap_or_default()
                    .to_string();
                scan.tokens.push(Token::Word(number));
            }
            other => scan.tokens.push(Token::Symbol(other)),
        }
    }

    scan
}

/// Check 1: the statement must start with SELECT or WITH and contain exactly
/// one top-level statement.
fn check_statement_shape(scan: &Scan) -> Option<ValidationVerdict> {
    let first = match scan.tokens.first() {
        Some(Token::Word(w)) => w.as_str(),
        _ => {
            return Some(rejected(
                ViolationCode::NotSelect,
                "no SQL statement found",
            ))
        }
    };

    if first != "SELECT" && first != "WITH" {
        return Some(rejected(
            ViolationCode::NotSelect,
            format!("statement begins with {first}, only SELECT/WITH are allowed"),
        ));
    }

    // Trailing semicolons were stripped by normalization, so any ';' left in
    // the token stream has further content behind it.
    if scan.tokens.iter().any(|t| *t == Token::Symbol(';')) {
        return Some(rejected(
            ViolationCode::NotSelect,
            "multiple statements are not allowed",
        ));
    }

    None
}

/// Check 2: whole-token match against the mutating/DDL keyword denylist.
fn check_forbidden_keywords(
    scan: &Scan,
    keywords: &HashSet<String>,
) -> Option<ValidationVerdict> {
    for token in &scan.tokens {
        if let Token::Word(word) = token {
            if keywords.contains(word) {
                return Some(rejected(
                    ViolationCode::ForbiddenKeyword,
                    format!("keyword {word} is not allowed"),
                ));
            }
        }
    }
    None
}

/// Check 3: denylisted function name immediately followed by `(`.
fn check_forbidden_functions(
    scan: &Scan,
    functions: &HashSet<String>,
) -> Option<ValidationVerdict> {
    for pair in scan.tokens.windows(2) {
        if let [Token::Word(word), Token::Symbol('(')] = pair {
            if functions.contains(word) {
                return Some(rejected(
                    ViolationCode::ForbiddenFunction,
                    format!("function {word}() is not allowed"),
                ));
            }
        }
    }
    None
}

/// Check 4: structural red flags for injection attempts.
fn check_suspicious_patterns(scan: &Scan) -> Option<ValidationVerdict> {
    if scan.unterminated_string {
        return Some(rejected(
            ViolationCode::SuspiciousPattern,
            "unterminated quoted literal",
        ));
    }
    if scan.unterminated_block_comment {
        return Some(rejected(
            ViolationCode::SuspiciousPattern,
            "unterminated block comment",
        ));
    }
    if scan.trailing_line_comment {
        return Some(rejected(
            ViolationCode::SuspiciousPattern,
            "line comment truncates the statement",
        ));
    }

    for pair in scan.tokens.windows(2) {
        if let [Token::Word(a), Token::Word(b)] = pair {
            if a == "UNION" && (b == "SELECT" || b == "ALL") {
                return Some(rejected(
                    ViolationCode::SuspiciousPattern,
                    "UNION-based statement splicing",
                ));
            }
        }
    }

    // Boolean tautologies: OR/AND <literal> = <same literal>, OR TRUE.
    for window in scan.tokens.windows(4) {
        if let [Token::Word(op), lhs, Token::Symbol('='), rhs] = window {
            if (op == "OR" || op == "AND") && is_literal(lhs) && lhs == rhs {
                return Some(rejected(
                    ViolationCode::SuspiciousPattern,
                    "always-true boolean condition",
                ));
            }
        }
    }
    for pair in scan.tokens.windows(2) {
        if let [Token::Word(op), Token::Word(val)] = pair {
            if (op == "OR" || op == "AND") && val == "TRUE" {
                return Some(rejected(
                    ViolationCode::SuspiciousPattern,
                    "always-true boolean condition",
                ));
            }
        }
    }

    None
}

fn is_literal(token: &Token) -> bool {
    match token {
        Token::Str(_) => true,
        Token::Word(w) => w.chars().all(|c| c.is_ascii_digit() || c == '.'),
        Token::Symbol(_) => false,
    }
}

/// Check 5: every table referenced after FROM/JOIN must exist in the
/// snapshot. CTE names introduced by WITH count as known tables.
fn check_identifier_scope(scan: &Scan, snapshot: &SchemaSnapshot) -> Option<ValidationVerdict> {
    let ctes = collect_cte_names(&scan.tokens);

    let mut i = 0;
    while i < scan.tokens.len() {
        if let Token::Word(word) = &scan.tokens[i] {
            if word == "FROM" || word == "JOIN" {
                let mut j = i + 1;
                loop {
                    match scan.tokens.get(j) {
                        // Derived table or lateral subquery: nothing to resolve.
                        Some(Token::Symbol('(')) => break,
                        Some(Token::Word(_)) => {
                            let (name, next) = read_dotted_name(&scan.tokens, j);
                            let bare = name.rsplit('.').next().unwrap_or(&name).to_string();
                            if !ctes.contains(&bare) && !snapshot.contains_table(&name) {
                                return Some(rejected(
                                    ViolationCode::UnknownIdentifier,
                                    format!("table {} is not in the warehouse schema", name.to_lowercase()),
                                ));
                            }
                            j = next;
                            // Skip an alias, then continue through a FROM list.
                            if let Some(Token::Word(w)) = scan.tokens.get(j) {
                                if !is_clause_keyword(w) {
                                    j += 1;
                                }
                            }
                            if scan.tokens.get(j) == Some(&Token::Symbol(',')) {
                                j += 1;
                                continue;
                            }
                            break;
                        }
                        _ => break,
                    }
                }
                i = j;
                continue;
            }
        }
        i += 1;
    }

    None
}

/// `name [ (col, ...) ] AS (` introduces a CTE.
fn collect_cte_names(tokens: &[Token]) -> HashSet<String> {
    let mut names = HashSet::new();
    if tokens.first() != Some(&Token::Word("WITH".to_string())) {
        return names;
    }

    for (i, token) in tokens.iter().enumerate() {
        if let Token::Word(name) = token {
            let mut j = i + 1;
            if tokens.get(j) == Some(&Token::Symbol('(')) {
                j = skip_balanced_parens(tokens, j);
            }
            if tokens.get(j) == Some(&Token::Word("AS".to_string()))
                && tokens.get(j + 1) == Some(&Token::Symbol('('))
            {
                names.insert(name.clone());
            }
        }
    }
    names
}

fn skip_balanced_parens(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < tokens.len() {
        match tokens[i] {
            Token::Symbol('(') => depth += 1,
            Token::Symbol(')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    tokens.len()
}

/// Read `a.b.c` starting at a Word token; returns the joined name and the
/// index just past it.
fn read_dotted_name(tokens: &[Token], start: usize) -> (String, usize) {
    let mut parts = Vec::new();
    let mut i = start;
    while let Some(Token::Word(w)) = tokens.get(i) {
        parts.push(w.clone());
        if tokens.get(i + 1) == Some(&Token::Symbol('.')) {
            i += 2;
        } else {
            i += 1;
            break;
        }
    }
    (parts.join("."), i)
}

fn is_clause_keyword(word: &str) -> bool {
    matches!(
        word,
        "WHERE"
            | "GROUP"
            | "ORDER"
            | "HAVING"
            | "LIMIT"
            | "OFFSET"
            | "JOIN"
            | "INNER"
            | "LEFT"
            | "RIGHT"
            | "FULL"
            | "CROSS"
            | "ON"
            | "UNION"
            | "EXCEPT"
            | "INTERSECT"
            | "WINDOW"
            | "FETCH"
    )
}

fn rejected(code: ViolationCode, detail: impl Into<String>) -> ValidationVerdict {
    ValidationVerdict::Rejected {
        code,
        detail: detail.into(),
    }
}
