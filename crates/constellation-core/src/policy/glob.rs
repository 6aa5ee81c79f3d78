//! Glob matching for policy `when` clauses.
//!
//! Patterns are matched against the full value (anchored, never substring),
//! with `/` as the path separator:
//!
//! | Syntax | Matches |
//! |--------|---------|
//! | `?` | a single character other than `/` |
//! | `*` | any run of characters not containing `/` |
//! | `**` | any run including `/` (zero or more whole path segments) |
//! | `\x` | the literal character `x` |
//!
//! `**` only has its cross-segment meaning when it is a whole path
//! component (`/a/**`, not `/a/x**`); `/a/**` also matches `/a` itself.
//!
//! # Limits
//!
//! Patterns over 1024 bytes or 32 components fail to compile, and values
//! over 4096 bytes never match. These bound the recursive matcher.

use std::fmt;

const MAX_PATTERN_LENGTH: usize = 1024;
const MAX_COMPONENTS: usize = 32;
const MAX_VALUE_LENGTH: usize = 4096;

/// Error returned when a glob pattern is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobError {
    pub pattern: String,
    pub message: String,
}

impl fmt::Display for GlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid glob pattern '{}': {}",
            self.pattern, self.message
        )
    }
}

impl std::error::Error for GlobError {}

/// Check whether a value matches a glob pattern.
///
/// This is the total form used by the policy engine: a malformed pattern
/// matches nothing instead of raising.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    match GlobPattern::new(pattern) {
        Ok(glob) => glob.matches(value),
        Err(_) => false,
    }
}

/// Compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    components: Vec<Component>,
}

#[derive(Debug, Clone)]
enum Component {
    /// `**` as a whole component: spans zero or more path segments
    AnySegments,
    /// One path segment built from literals and wildcards
    Segment(Vec<Token>),
}

#[derive(Debug, Clone)]
enum Token {
    Literal(String),
    /// `*`: any run within the segment
    Star,
    /// `?`: one character within the segment
    Question,
}

impl GlobPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed patterns (trailing backslash) or
    /// patterns exceeding the size limits.
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        if pattern.len() > MAX_PATTERN_LENGTH {
            return Err(GlobError {
                pattern: pattern.chars().take(50).collect::<String>() + "...",
                message: format!(
                    "pattern length {} exceeds maximum {}",
                    pattern.len(),
                    MAX_PATTERN_LENGTH
                ),
            });
        }

        let components = parse_components(pattern)?;

        if components.len() > MAX_COMPONENTS {
            return Err(GlobError {
                pattern: pattern.to_string(),
                message: format!(
                    "pattern has {} components, exceeds maximum {}",
                    components.len(),
                    MAX_COMPONENTS
                ),
            });
        }

        Ok(Self {
            pattern: pattern.to_string(),
            components,
        })
    }

    /// Check whether the pattern matches the full value.
    ///
    /// Returns `false` for values exceeding the length limit.
    pub fn matches(&self, value: &str) -> bool {
        if value.len() > MAX_VALUE_LENGTH {
            return false;
        }
        let segments: Vec<&str> = value.split('/').collect();
        match_components(&self.components, &segments)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Split the pattern on unescaped `/` and tokenize each component.
fn parse_components(pattern: &str) -> Result<Vec<Component>, GlobError> {
    let mut raw_components = Vec::new();
    let mut current = String::new();
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push('\\');
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(GlobError {
                            pattern: pattern.to_string(),
                            message: "trailing backslash".to_string(),
                        })
                    }
                }
            }
            '/' => raw_components.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    raw_components.push(current);

    raw_components
        .into_iter()
        .map(|raw| {
            if raw == "**" {
                Ok(Component::AnySegments)
            } else {
                tokenize(&raw, pattern).map(Component::Segment)
            }
        })
        .collect()
}

fn tokenize(raw: &str, pattern: &str) -> Result<Vec<Token>, GlobError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars();

    let flush = |literal: &mut String, tokens: &mut Vec<Token>| {
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(literal)));
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => literal.push(escaped),
                None => {
                    return Err(GlobError {
                        pattern: pattern.to_string(),
                        message: "trailing backslash".to_string(),
                    })
                }
            },
            '*' => {
                flush(&mut literal, &mut tokens);
                tokens.push(Token::Star);
            }
            '?' => {
                flush(&mut literal, &mut tokens);
                tokens.push(Token::Question);
            }
            _ => literal.push(c),
        }
    }
    flush(&mut literal, &mut tokens);

    Ok(tokens)
}

fn match_components(components: &[Component], segments: &[&str]) -> bool {
    match components.first() {
        None => segments.is_empty(),
        Some(Component::AnySegments) => {
            // `**` consumes zero or more whole segments
            (0..=segments.len()).any(|skip| match_components(&components[1..], &segments[skip..]))
        }
        Some(Component::Segment(tokens)) => match segments.first() {
            None => false,
            Some(segment) => {
                match_tokens(tokens, segment) && match_components(&components[1..], &segments[1..])
            }
        },
    }
}

fn match_tokens(tokens: &[Token], input: &str) -> bool {
    match tokens.first() {
        None => input.is_empty(),
        Some(Token::Literal(lit)) => input
            .strip_prefix(lit.as_str())
            .is_some_and(|rest| match_tokens(&tokens[1..], rest)),
        Some(Token::Question) => {
            let mut chars = input.chars();
            chars.next().is_some() && match_tokens(&tokens[1..], chars.as_str())
        }
        Some(Token::Star) => {
            let mut rest = input;
            loop {
                if match_tokens(&tokens[1..], rest) {
                    return true;
                }
                let mut chars = rest.chars();
                if chars.next().is_none() {
                    return false;
                }
                rest = chars.as_str();
            }
        }
    }
}
