//! OSC addresses and the glob-style pattern language OSC 1.1 uses for
//! wildcard dispatch: `?`, `*`, `[...]`, `[!...]`, `{a,b,c}`, and the `//`
//! "any number of intervening parts" wildcard.

use crate::error::{OscError, Result};
use regex::Regex;
use std::fmt;

const SPECIAL_CHARS: &[char] = &['?', '*', '[', ']', '{', '}', '!'];

/// One `/`-delimited segment of an address, either a literal name or a
/// compiled glob pattern.
#[derive(Debug, Clone)]
pub enum AddressPart {
    /// A literal, pattern-free segment such as `synth1`.
    Literal(String),
    /// A segment containing one or more glob metacharacters, along with
    /// the regex it compiles to.
    Pattern { raw: String, regex: Regex },
}

impl PartialEq for AddressPart {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Pattern { raw: a, .. }, Self::Pattern { raw: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl AddressPart {
    /// Parses one non-empty path segment, compiling it as a glob pattern
    /// if it contains any metacharacters.
    pub fn new(raw: &str) -> Result<Self> {
        if raw.contains(SPECIAL_CHARS) {
            let pattern = format!("^{}$", glob_to_regex(raw)?);
            let regex = Regex::new(&pattern)
                .map_err(|e| OscError::ValueError { detail: format!("bad pattern \"{raw}\": {e}") })?;
            Ok(Self::Pattern { raw: raw.to_string(), regex })
        } else {
            Ok(Self::Literal(raw.to_string()))
        }
    }

    pub fn is_concrete(&self) -> bool {
        !matches!(self, Self::Pattern { .. })
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Literal(s) => s,
            Self::Pattern { raw, .. } => raw,
        }
    }
}

impl fmt::Display for AddressPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

/// Translates one glob segment into an anchored regex body. `?` matches
/// exactly one word character, `*` matches any run of word characters (or
/// `+`), `[...]`/`[!...]` become character classes, and `{a,b,c}` becomes
/// an alternation group.
fn glob_to_regex(raw: &str) -> Result<String> {
    let mut out = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '?' => out.push_str(r"\w?"),
            '*' => out.push_str(r"[\w|\+]*"),
            '[' => {
                let mut class = String::new();
                let mut negate = false;
                if chars.peek() == Some(&'!') {
                    negate = true;
                    chars.next();
                }
                let mut closed = false;
                for c2 in chars.by_ref() {
                    if c2 == ']' {
                        closed = true;
                        break;
                    }
                    class.push(c2);
                }
                if !closed {
                    return Err(OscError::ValueError { detail: format!("unterminated '[' in \"{raw}\"") });
                }
                if negate {
                    out.push_str(&format!("[^{class}]"));
                } else {
                    out.push_str(&format!("[{class}]"));
                }
            }
            '{' => {
                let mut body = String::new();
                let mut closed = false;
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c2);
                }
                if !closed {
                    return Err(OscError::ValueError { detail: format!("unterminated '{{' in \"{raw}\"") });
                }
                let alts: Vec<&str> = body.split(',').collect();
                out.push('(');
                out.push_str(&alts.join("|"));
                out.push(')');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    Ok(out)
}

/// A full OSC address: an ordered list of [`AddressPart`]s rooted at `/`.
///
/// `has_double_slash` tracks whether the pattern this address was parsed
/// from contained a `//` wildcard. Per §4.4, when it did, `parts` holds
/// only the segments *after* the last `//` — everything before it is
/// discarded at parse time, not retained as a marker, matching the
/// original's `pattern.split("//")[-1]` behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    parts: Vec<AddressPart>,
    has_double_slash: bool,
}

impl Address {
    /// The address of the root node, `/`, with no segments.
    pub fn root() -> Self {
        Self { parts: Vec::new(), has_double_slash: false }
    }

    pub fn parse(s: &str) -> Result<Self> {
        if !s.starts_with('/') {
            return Err(OscError::ValueError { detail: format!("address \"{s}\" must start with '/'") });
        }
        if s == "/" {
            return Ok(Self::root());
        }
        // Only the substring after the *last* "//" is considered; everything
        // before it is dropped rather than kept as an anchored prefix.
        let (tail, has_double_slash) = match s.rfind("//") {
            Some(idx) => (&s[idx + 2..], true),
            None => (&s[1..], false),
        };
        let mut parts = Vec::new();
        for raw in tail.split('/') {
            if raw.is_empty() {
                continue;
            }
            parts.push(AddressPart::new(raw)?);
        }
        Ok(Self { parts, has_double_slash })
    }

    pub fn parts(&self) -> &[AddressPart] {
        &self.parts
    }

    /// True if this address has no glob segments and no `//` wildcard, i.e.
    /// it denotes exactly one node.
    pub fn is_concrete(&self) -> bool {
        !self.has_double_slash && self.parts.iter().all(AddressPart::is_concrete)
    }

    /// Appends `name` as a new literal segment. Fails if `name` contains a
    /// `/`, which would silently introduce a `//` wildcard segment.
    pub fn join(&self, name: &str) -> Result<Self> {
        if name.contains('/') {
            return Err(OscError::ValueError { detail: format!("segment \"{name}\" must not contain '/'") });
        }
        let mut parts = self.parts.clone();
        parts.push(AddressPart::new(name)?);
        Ok(Self { parts, has_double_slash: self.has_double_slash })
    }

    /// Returns the address of the parent node, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.parts.is_empty() {
            None
        } else {
            Some(Self {
                parts: self.parts[..self.parts.len() - 1].to_vec(),
                has_double_slash: self.has_double_slash,
            })
        }
    }

    /// Returns a new address built from the segments in `range`, e.g.
    /// `Address::parse("/a/b/c")?.slice(1..3)` is `/b/c`. Panics under the
    /// same conditions slicing a `Vec` would (an out-of-bounds range).
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        Self { parts: self.parts[range].to_vec(), has_double_slash: self.has_double_slash }
    }

    /// True if `self` and `other` denote the same address, resolving glob
    /// patterns and `//` wildcards, per §4.5:
    ///
    /// 1. Both concrete: pattern-string (parts) equality.
    /// 2. Neither concrete: ambiguous, fails with [`OscError::NeedsConcrete`].
    /// 3. Exactly one concrete, and the other has no `//`: equal-length,
    ///    per-part match.
    /// 4. Exactly one concrete, and the other has `//`: the other's
    ///    (already-truncated) parts must occur as an in-order subsequence
    ///    of the concrete side's parts.
    pub fn matches(&self, other: &Self) -> Result<bool> {
        if self.is_concrete() && other.is_concrete() {
            return Ok(self.parts == other.parts);
        }
        if !self.is_concrete() && !other.is_concrete() {
            return Err(OscError::NeedsConcrete);
        }
        let (concrete, pattern) = if self.is_concrete() { (self, other) } else { (other, self) };
        if pattern.has_double_slash {
            Ok(subsequence_match(&concrete.parts, &pattern.parts))
        } else {
            if concrete.parts.len() != pattern.parts.len() {
                return Ok(false);
            }
            for (c, p) in concrete.parts.iter().zip(pattern.parts.iter()) {
                if !part_matches(c, p) {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parts.is_empty() {
            return write!(f, "/");
        }
        for part in &self.parts {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

fn part_matches(a: &AddressPart, b: &AddressPart) -> bool {
    match (a, b) {
        (AddressPart::Literal(x), AddressPart::Literal(y)) => x == y,
        (AddressPart::Pattern { regex, .. }, _) => regex.is_match(b.raw()),
        (_, AddressPart::Pattern { regex, .. }) => regex.is_match(a.raw()),
    }
}

/// Walks `concrete`'s parts left-to-right, advancing an index into
/// `wildcard` only when the current pair matches. Succeeds iff every part
/// of `wildcard` was consumed by the time `concrete` runs out — a greedy
/// subsequence match, not a backtracking search, matching §4.5 rule 4's
/// "walk left-to-right" wording verbatim.
fn subsequence_match(concrete: &[AddressPart], wildcard: &[AddressPart]) -> bool {
    let mut wi = 0;
    for part in concrete {
        if wi == wildcard.len() {
            break;
        }
        if part_matches(part, &wildcard[wi]) {
            wi += 1;
        }
    }
    wi == wildcard.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_address() {
        let addr = Address::parse("/synth/1/freq").unwrap();
        assert_eq!(addr.parts().len(), 3);
        assert!(addr.is_concrete());
        assert_eq!(addr.to_string(), "/synth/1/freq");
    }

    #[test]
    fn rejects_address_without_leading_slash() {
        assert!(Address::parse("synth/1").is_err());
    }

    #[test]
    fn star_matches_any_single_segment() {
        let pattern = Address::parse("/synth/*/freq").unwrap();
        let concrete = Address::parse("/synth/1/freq").unwrap();
        assert!(pattern.matches(&concrete).unwrap());
    }

    #[test]
    fn brace_alternation_matches_any_listed_option() {
        let pattern = Address::parse("/synth/{1,2,3}/freq").unwrap();
        assert!(pattern.matches(&Address::parse("/synth/2/freq").unwrap()).unwrap());
        assert!(!pattern.matches(&Address::parse("/synth/9/freq").unwrap()).unwrap());
    }

    #[test]
    fn negated_char_class_excludes_listed_chars() {
        let pattern = Address::parse("/synth/[!12]/freq").unwrap();
        assert!(pattern.matches(&Address::parse("/synth/9/freq").unwrap()).unwrap());
        assert!(!pattern.matches(&Address::parse("/synth/1/freq").unwrap()).unwrap());
    }

    #[test]
    fn double_slash_matches_zero_or_more_parts() {
        let pattern = Address::parse("/synth//freq").unwrap();
        assert!(pattern.matches(&Address::parse("/synth/freq").unwrap()).unwrap());
        assert!(pattern.matches(&Address::parse("/synth/1/lfo/freq").unwrap()).unwrap());
        assert!(!pattern.matches(&Address::parse("/synth/1/lfo/phase").unwrap()).unwrap());
    }

    #[test]
    fn double_slash_discards_everything_before_the_last_occurrence() {
        // Per §4.4, "/synth//freq" parses to the single part `freq` — the
        // `synth` segment before the `//` plays no role in matching at all.
        let pattern = Address::parse("/synth//freq").unwrap();
        assert!(pattern.matches(&Address::parse("/other/synth/freq").unwrap()).unwrap());
    }

    #[test]
    fn two_double_slash_patterns_need_a_concrete_side() {
        let a = Address::parse("/synth//freq").unwrap();
        let b = Address::parse("/synth//amp//freq").unwrap();
        assert!(matches!(a.matches(&b), Err(OscError::NeedsConcrete)));
    }

    #[test]
    fn two_plain_glob_patterns_with_no_double_slash_still_need_a_concrete_side() {
        let a = Address::parse("/a/*").unwrap();
        let b = Address::parse("/b/*").unwrap();
        assert!(matches!(a.matches(&b), Err(OscError::NeedsConcrete)));
    }

    #[test]
    fn join_rejects_embedded_slash() {
        let addr = Address::parse("/synth").unwrap();
        assert!(addr.join("a/b").is_err());
    }

    #[test]
    fn slice_drops_leading_and_trailing_segments() {
        let addr = Address::parse("/synth/1/freq").unwrap();
        assert_eq!(addr.slice(1..3).to_string(), "/1/freq");
        assert_eq!(addr.slice(0..1).to_string(), "/synth");
    }

    #[test]
    fn question_mark_matches_exactly_one_word_character() {
        let pattern = Address::parse("/synth/?/freq").unwrap();
        assert!(pattern.matches(&Address::parse("/synth/1/freq").unwrap()).unwrap());
        assert!(!pattern.matches(&Address::parse("/synth/12/freq").unwrap()).unwrap());
    }

    /// A corpus of mutations of one base address, each either a glob that
    /// must still match the base or a concrete variant that must not.
    #[test]
    fn glob_mutations_of_a_base_address_match_or_reject_as_expected() {
        let base = Address::parse("/foo/bar/baz/blah/stuff/and/lotsofthings").unwrap();

        let should_match = [
            "/foo/*/baz/blah/stuff/and/lotsofthings",
            "/foo/{bar,NONE}/baz/blah/stuff/and/lotsofthings",
            "/foo/[b-z]ar/baz/blah/stuff/and/lotsofthings",
            "/foo/[!xyz]ar/baz/blah/stuff/and/lotsofthings",
            "/foo/?ar/baz/blah/stuff/and/lotsofthings",
            "/foo/bar/baz/blah/stuff/and/*",
        ];
        for raw in should_match {
            let pattern = Address::parse(raw).unwrap();
            assert!(pattern.matches(&base).unwrap(), "expected \"{raw}\" to match the base address");
        }

        let should_reject = [
            "/foo/{qux,NONE}/baz/blah/stuff/and/lotsofthings",
            "/foo/bar/baz/blah/stuff/and/LOTSOFTHINGS",
            "/foo/bar/baz/blah/stuff/and/lotsofthings/extra",
            "/foo/bar/baz/blah/stuff/and",
        ];
        for raw in should_reject {
            let pattern = Address::parse(raw).unwrap();
            assert!(!pattern.matches(&base).unwrap(), "expected \"{raw}\" not to match the base address");
        }
    }
}
