//! Version-range ordering with canary tie-breaking.
//!
//! A version-range string such as `^1.2.3-canary.4f2a9c.1700000000` is parsed
//! into a [`VersionToken`]: an optional range operator, a numeric base
//! version and an optional pre-release tag. Tokens are ordered by base
//! version, then by tag. A release sorts above every pre-release of the same
//! base, and two canary tags are ordered by their embedded build timestamp.
//!
//! The ordering ignores range operators. [`select_latest`] breaks remaining
//! ties in favour of the operator-free string, then the first argument.

use std::cmp::Ordering;
use std::fmt;

/// Characters that may appear in a leading range operator.
const OPERATOR_CHARS: &[char] = &['^', '~', '>', '<', '='];

// ---------------------------------------------------------------------------
// Range operator
// ---------------------------------------------------------------------------

/// Leading range operator of a version-range string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOperator {
    Caret,
    Tilde,
    GreaterEq,
    Greater,
    LessEq,
    Less,
    Exact,
}

impl RangeOperator {
    /// Split a leading operator off `s`.
    fn strip(s: &str) -> (Option<Self>, &str) {
        const TABLE: [(&str, RangeOperator); 7] = [
            (">=", RangeOperator::GreaterEq),
            ("<=", RangeOperator::LessEq),
            (">", RangeOperator::Greater),
            ("<", RangeOperator::Less),
            ("^", RangeOperator::Caret),
            ("~", RangeOperator::Tilde),
            ("=", RangeOperator::Exact),
        ];
        for (prefix, op) in TABLE {
            if let Some(rest) = s.strip_prefix(prefix) {
                return (Some(op), rest);
            }
        }
        (None, s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caret => "^",
            Self::Tilde => "~",
            Self::GreaterEq => ">=",
            Self::Greater => ">",
            Self::LessEq => "<=",
            Self::Less => "<",
            Self::Exact => "=",
        }
    }
}

impl fmt::Display for RangeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parsed token
// ---------------------------------------------------------------------------

/// Numeric base version plus pre-release segments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedVersion {
    /// Major, minor, patch as digit strings; missing components are `"0"`.
    base: [String; 3],
    prerelease: Vec<String>,
}

/// Parsed representation of a version-range string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionToken {
    raw: String,
    operator: Option<RangeOperator>,
    parsed: Option<ParsedVersion>,
}

impl VersionToken {
    /// Parse a version-range string. Never fails: input without a numeric
    /// major version yields an unparseable token that sorts below every
    /// parseable one.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (operator, rest) = RangeOperator::strip(trimmed);
        let rest = rest.trim_start_matches(|c: char| OPERATOR_CHARS.contains(&c) || c.is_whitespace());
        let rest = rest.strip_prefix(['v', 'V']).unwrap_or(rest);

        Self {
            raw: raw.to_string(),
            operator,
            parsed: parse_version(rest),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn operator(&self) -> Option<RangeOperator> {
        self.operator
    }

    pub fn has_operator(&self) -> bool {
        self.operator.is_some()
    }

    pub fn is_parseable(&self) -> bool {
        self.parsed.is_some()
    }

    /// `major.minor.patch` with missing components filled in.
    pub fn base_version(&self) -> Option<String> {
        self.parsed.as_ref().map(|p| p.base.join("."))
    }

    pub fn prerelease(&self) -> &[String] {
        self.parsed
            .as_ref()
            .map(|p| p.prerelease.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the pre-release tag starts with a `canary` segment.
    pub fn is_canary(&self) -> bool {
        is_canary(self.prerelease())
    }

    /// Order two tokens by precedence, ignoring range operators.
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        match (&self.parsed, &other.parsed) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => cmp_base(&a.base, &b.base)
                .then_with(|| cmp_prerelease(&a.prerelease, &b.prerelease)),
        }
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn parse_version(s: &str) -> Option<ParsedVersion> {
    let (major, mut rest) = split_digits(s);
    if major.is_empty() {
        return None;
    }

    let mut components = vec![major];
    while components.len() < 3 {
        let Some(after_dot) = rest.strip_prefix('.') else {
            break;
        };
        let (digits, tail) = split_digits(after_dot);
        if digits.is_empty() {
            break;
        }
        components.push(digits);
        rest = tail;
    }

    // The tag ends at build metadata or at the next range in a compound range.
    let tag_end = rest
        .find(|c: char| c == '+' || c.is_whitespace())
        .unwrap_or(rest.len());
    let tag = &rest[..tag_end];
    let tag = tag.strip_prefix(['-', '.']).unwrap_or(tag);

    let mut base: [String; 3] = Default::default();
    for (slot, value) in base.iter_mut().zip(components.iter().copied().chain(["0", "0"])) {
        *slot = value.to_string();
    }

    Some(ParsedVersion {
        base,
        prerelease: tag
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Compare two digit strings numerically without overflow.
fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn cmp_base(a: &[String; 3], b: &[String; 3]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| cmp_numeric(x, y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn cmp_prerelease(a: &[String], b: &[String]) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        // A release outranks any pre-release of the same base.
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if is_canary(a) && is_canary(b) => {
            CanaryKey::of(a).cmp(&CanaryKey::of(b)).then_with(|| cmp_segments(a, b))
        }
        (false, false) => cmp_segments(a, b),
    }
}

fn is_canary(tag: &[String]) -> bool {
    tag.first()
        .is_some_and(|s| s.eq_ignore_ascii_case("canary"))
}

/// Rank of a well-known pre-release label; unknown labels rank 0.
fn label_rank(label: &str) -> u8 {
    if label.eq_ignore_ascii_case("alpha") {
        1
    } else if label.eq_ignore_ascii_case("beta") {
        2
    } else if label.eq_ignore_ascii_case("rc") {
        3
    } else {
        0
    }
}

fn cmp_segment(a: &str, b: &str) -> Ordering {
    match (is_numeric(a), is_numeric(b)) {
        (true, true) => cmp_numeric(a, b),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => label_rank(a)
            .cmp(&label_rank(b))
            .then_with(|| {
                a.bytes()
                    .map(|c| c.to_ascii_lowercase())
                    .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
            })
            .then_with(|| a.cmp(b)),
    }
}

/// Segment-wise comparison; with a shared prefix, the longer tag wins.
fn cmp_segments(a: &[String], b: &[String]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| cmp_segment(x, y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

/// Digit string ordered numerically.
#[derive(Debug, Clone, Copy)]
struct Numeric<'a>(&'a str);

impl Ord for Numeric<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_numeric(self.0, other.0)
    }
}

impl PartialOrd for Numeric<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Numeric<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Numeric<'_> {}

/// Ordering key of a canary tag: build timestamp, then commit hash.
///
/// A tag without a timestamp sorts below one that has it.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CanaryKey<'a> {
    timestamp: Option<Numeric<'a>>,
    hash: Option<&'a str>,
}

impl<'a> CanaryKey<'a> {
    fn of(tag: &'a [String]) -> Self {
        let rest = tag.get(1..).unwrap_or(&[]);

        // Longest all-digit segment; the first one wins a length tie.
        let timestamp = rest
            .iter()
            .filter(|s| is_numeric(s))
            .fold(None::<&String>, |best, s| match best {
                Some(b) if b.len() >= s.len() => Some(b),
                _ => Some(s),
            })
            .map(|s| Numeric(s.as_str()));

        let hash = rest.iter().find(|s| !is_numeric(s)).map(String::as_str);

        Self { timestamp, hash }
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Order two version-range strings, ignoring range operators.
pub fn compare(a: &str, b: &str) -> Ordering {
    VersionToken::parse(a).cmp_precedence(&VersionToken::parse(b))
}

/// Pick the newer of two version-range strings.
///
/// On equal precedence the operator-free string is preferred; if both or
/// neither carry an operator, `a` wins.
pub fn select_latest<'a>(a: &'a str, b: &'a str) -> &'a str {
    let ta = VersionToken::parse(a);
    let tb = VersionToken::parse(b);
    match ta.cmp_precedence(&tb) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal if ta.has_operator() && !tb.has_operator() => b,
        Ordering::Equal => a,
    }
}
