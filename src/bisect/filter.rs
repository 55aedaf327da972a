// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Test filter expressions.
//!
//! The harness selects which tests to run in a batch through a filter
//! expression. Stackbisect only ever needs one shape of expression: a logical
//! OR over exact-name matches, e.g.,
//! `FullyQualifiedName=Suite.Alpha|FullyQualifiedName=Suite.Bravo`.
//!
//! # See Also
//!
//! - [Run selective unit tests](https://learn.microsoft.com/en-us/dotnet/core/testing/selective-unit-tests)

use crate::bisect::TestCase;

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Characters with special meaning in the filter grammar.
const RESERVED: [char; 8] = ['\\', '(', ')', '&', '|', '=', '!', '~'];

/// Filter expression matching an exact set of tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterExpr(String);

impl FilterExpr {
    /// Build expression matching any of the given tests by exact name.
    ///
    /// Each test name is escaped, so names carrying parameter lists, e.g.,
    /// `Suite.Charlie(value: 1)`, match literally.
    pub fn any_of<'a>(property: &str, tests: impl IntoIterator<Item = &'a TestCase>) -> Self {
        let terms = tests
            .into_iter()
            .map(|test| format!("{property}={}", escape(test.as_str())))
            .collect::<Vec<_>>();

        Self(terms.join("|"))
    }

    /// Treat filter expression as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Check if filter expression matches nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for FilterExpr {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

fn escape(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for ch in name.chars() {
        if RESERVED.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn any_of_joins_exact_matches() {
        let tests = [
            TestCase::new("Suite.Alpha"),
            TestCase::new("Suite.Bravo"),
            TestCase::new("Suite.Charlie"),
        ];
        let result = FilterExpr::any_of("FullyQualifiedName", tests.iter());
        assert_eq!(
            result.as_str(),
            "FullyQualifiedName=Suite.Alpha|FullyQualifiedName=Suite.Bravo|FullyQualifiedName=Suite.Charlie"
        );
    }

    #[test]
    fn any_of_nothing_is_empty() {
        let result = FilterExpr::any_of("FullyQualifiedName", std::iter::empty());
        assert!(result.is_empty());
    }

    #[test_case("Suite.Alpha", "Suite.Alpha"; "plain name")]
    #[test_case("Suite.Charlie(value: 1)", r"Suite.Charlie\(value: 1\)"; "parameters")]
    #[test_case("Suite.A|B=C", r"Suite.A\|B\=C"; "operators")]
    #[test_case(r"Suite.!~&\", r"Suite.\!\~\&\\"; "everything else")]
    #[test]
    fn escape_reserved_characters(name: &str, expect: &str) {
        pretty_assertions::assert_eq!(escape(name), expect);
    }
}
