//! Match rules applied to probe observations.
//!
//! Exact and tolerant checks are separate variants so the caller states which
//! one it means. A header check written as a substring match will not
//! silently pass against a generation counter that needed equality.

use std::fmt;

use regex::Regex;

use crate::Result;

/// A caller-chosen rule deciding whether an observation means "converged"
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Observation equals the value once surrounding whitespace is trimmed
    Equals(String),
    /// Observation contains the substring
    Contains(String),
    /// Observation does not contain the substring
    NotContains(String),
    /// Observation contains every substring
    ContainsAll(Vec<String>),
    /// Observation matches the regular expression somewhere
    Matches(Regex),
}

impl Predicate {
    /// Exact match on the trimmed observation
    pub fn equals(value: impl Into<String>) -> Self {
        Self::Equals(value.into())
    }

    /// Substring match
    pub fn contains(value: impl Into<String>) -> Self {
        Self::Contains(value.into())
    }

    /// Negated substring match
    pub fn not_contains(value: impl Into<String>) -> Self {
        Self::NotContains(value.into())
    }

    /// Every substring must be present
    pub fn contains_all<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ContainsAll(values.into_iter().map(Into::into).collect())
    }

    /// Regular expression match. Fails on an invalid pattern.
    pub fn matches(pattern: &str) -> Result<Self> {
        Ok(Self::Matches(Regex::new(pattern)?))
    }

    /// Evaluate against one observation
    pub fn evaluate(&self, observation: &str) -> bool {
        match self {
            Predicate::Equals(expected) => observation.trim() == expected,
            Predicate::Contains(needle) => observation.contains(needle.as_str()),
            Predicate::NotContains(needle) => !observation.contains(needle.as_str()),
            Predicate::ContainsAll(needles) => {
                needles.iter().all(|n| observation.contains(n.as_str()))
            }
            Predicate::Matches(re) => re.is_match(observation),
        }
    }

    /// Human-readable form used in error messages
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Equals(v) => write!(f, "equals {:?}", v),
            Predicate::Contains(v) => write!(f, "contains {:?}", v),
            Predicate::NotContains(v) => write!(f, "does not contain {:?}", v),
            Predicate::ContainsAll(vs) => write!(f, "contains all of {:?}", vs),
            Predicate::Matches(re) => write!(f, "matches /{}/", re.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::equals_trims(Predicate::equals("3"), "3\n", true)]
    #[case::equals_is_exact(Predicate::equals("3"), "33", false)]
    #[case::contains(Predicate::contains("x-frame-options: DENY"), "HTTP/1.1 200 OK\r\nx-frame-options: DENY\r\n", true)]
    #[case::contains_miss(Predicate::contains("hsts"), "HTTP/1.1 200 OK", false)]
    #[case::not_contains(Predicate::not_contains("server: haproxy"), "HTTP/1.1 200 OK", true)]
    #[case::not_contains_hit(Predicate::not_contains("200"), "HTTP/1.1 200 OK", false)]
    #[case::contains_all(Predicate::contains_all(["timeout server 5s", "balance roundrobin"]), "backend be\n  balance roundrobin\n  timeout server 5s\n", true)]
    #[case::contains_all_partial(Predicate::contains_all(["a", "z"]), "abc", false)]
    #[case::contains_all_empty(Predicate::contains_all(Vec::<String>::new()), "", true)]
    fn evaluates(#[case] predicate: Predicate, #[case] observation: &str, #[case] expected: bool) {
        assert_eq!(predicate.evaluate(observation), expected);
    }

    #[test]
    fn regex_predicate() {
        let p = Predicate::matches(r"server (\S+) \d+\.\d+\.\d+\.\d+:8080").unwrap();
        assert!(p.evaluate("  server pod:web-1:8080 10.128.2.4:8080 cookie abc"));
        assert!(!p.evaluate("server pod:web-1 unresolved"));
        assert_eq!(
            p.to_string(),
            r"matches /server (\S+) \d+\.\d+\.\d+\.\d+:8080/"
        );
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(matches!(
            Predicate::matches("("),
            Err(crate::Error::Regex(_))
        ));
    }

    #[test]
    fn descriptions_name_the_rule() {
        assert_eq!(Predicate::equals("2").description(), "equals \"2\"");
        assert_eq!(Predicate::contains("ok").description(), "contains \"ok\"");
        assert_eq!(
            Predicate::not_contains("x").description(),
            "does not contain \"x\""
        );
    }
}
