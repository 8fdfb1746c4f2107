//! Filter AST and evaluation

use crate::error::FilterError;
use crate::{AttributeValue, Attributes};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a filter item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Equal,
    /// `~=`, case and whitespace insensitive for strings
    Approx,
    /// `>=`
    GreaterEq,
    /// `<=`
    LessEq,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::Approx => "~=",
            Self::GreaterEq => ">=",
            Self::LessEq => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal | Self::Approx => ordering == Ordering::Equal,
            Self::GreaterEq => ordering != Ordering::Less,
            Self::LessEq => ordering != Ordering::Greater,
        }
    }
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// All operands must match
    And(Vec<Filter>),
    /// At least one operand must match
    Or(Vec<Filter>),
    /// Operand must not match
    Not(Box<Filter>),
    /// `(attribute op value)`
    Item {
        attribute: String,
        op: Operator,
        value: String,
    },
    /// `(attribute=*)`
    Present(String),
    /// `(attribute=initial*any*...*last)`
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

impl Filter {
    /// Parse a filter expression
    ///
    /// # Errors
    /// Returns [`FilterError`] describing the first syntax problem.
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        crate::parser::parse(input)
    }

    /// Evaluate the filter against an attribute source.
    ///
    /// Missing attributes never match an item; values that cannot be
    /// coerced to the attribute's type do not match either.
    #[must_use]
    pub fn matches<A: Attributes + ?Sized>(&self, attributes: &A) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(attributes)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(attributes)),
            Self::Not(filter) => !filter.matches(attributes),
            Self::Present(attribute) => attributes.attribute(attribute).is_some(),
            Self::Item {
                attribute,
                op,
                value,
            } => attributes
                .attribute(attribute)
                .is_some_and(|actual| compare(&actual, *op, value)),
            Self::Substring {
                attribute,
                initial,
                any,
                last,
            } => attributes.attribute(attribute).is_some_and(|actual| {
                substring_matches(&actual, initial.as_deref(), any, last.as_deref())
            }),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Not(filter) => write!(f, "(!{filter})"),
            Self::Item {
                attribute,
                op,
                value,
            } => write!(f, "({attribute}{}{})", op.as_str(), escape(value)),
            Self::Present(attribute) => write!(f, "({attribute}=*)"),
            Self::Substring {
                attribute,
                initial,
                any,
                last,
            } => {
                write!(f, "({attribute}=")?;
                if let Some(initial) = initial {
                    f.write_str(&escape(initial))?;
                }
                f.write_str("*")?;
                for part in any {
                    write!(f, "{}*", escape(part))?;
                }
                if let Some(last) = last {
                    f.write_str(&escape(last))?;
                }
                f.write_str(")")
            }
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn compare(actual: &AttributeValue<'_>, op: Operator, expected: &str) -> bool {
    match actual {
        AttributeValue::Str(s) => match op {
            Operator::Equal => *s == expected,
            Operator::Approx => normalize(s) == normalize(expected),
            Operator::GreaterEq => *s >= expected,
            Operator::LessEq => *s <= expected,
        },
        AttributeValue::Int(i) => expected
            .trim()
            .parse::<i64>()
            .is_ok_and(|e| op.accepts(i.cmp(&e))),
        AttributeValue::Float(x) => expected
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|e| x.partial_cmp(&e))
            .is_some_and(|ordering| op.accepts(ordering)),
        AttributeValue::Bool(b) => match op {
            Operator::Equal | Operator::Approx => {
                expected.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" })
            }
            Operator::GreaterEq | Operator::LessEq => false,
        },
        AttributeValue::List(items) => items.iter().any(|item| compare(item, op, expected)),
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring_matches(
    actual: &AttributeValue<'_>,
    initial: Option<&str>,
    any: &[String],
    last: Option<&str>,
) -> bool {
    match actual {
        AttributeValue::Str(s) => {
            let mut rest = *s;
            if let Some(initial) = initial {
                match rest.strip_prefix(initial) {
                    Some(r) => rest = r,
                    None => return false,
                }
            }
            for part in any {
                match rest.find(part.as_str()) {
                    Some(idx) => rest = &rest[idx + part.len()..],
                    None => return false,
                }
            }
            last.map_or(true, |last| rest.ends_with(last))
        }
        AttributeValue::List(items) => items
            .iter()
            .any(|item| substring_matches(item, initial, any, last)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Attrs(HashMap<&'static str, AttributeValue<'static>>);

    impl Attributes for Attrs {
        fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        }
    }

    fn attrs() -> Attrs {
        let mut map = HashMap::new();
        map.insert("service.pid", AttributeValue::Str("svc.A"));
        map.insert("level", AttributeValue::Int(5));
        map.insert("ratio", AttributeValue::Float(0.5));
        map.insert("enabled", AttributeValue::Bool(true));
        map.insert(
            "tags",
            AttributeValue::List(vec![AttributeValue::Str("red"), AttributeValue::Str("blue")]),
        );
        map.insert("title", AttributeValue::Str("Hello Big World"));
        Attrs(map)
    }

    fn check(expr: &str) -> bool {
        Filter::parse(expr).unwrap().matches(&attrs())
    }

    #[test]
    fn string_equality_is_case_sensitive() {
        assert!(check("(service.pid=svc.A)"));
        assert!(!check("(service.pid=SVC.A)"));
        assert!(check("(SERVICE.PID=svc.A)"));
    }

    #[test]
    fn approx_ignores_case_and_whitespace() {
        assert!(check("(title~=hellobigworld)"));
        assert!(check("(service.pid~=SVC.a)"));
    }

    #[test]
    fn integers_compare_numerically() {
        assert!(check("(level=5)"));
        assert!(check("(level>=5)"));
        assert!(check("(level<=10)"));
        assert!(!check("(level>=10)"));
        assert!(!check("(level=five)"));
    }

    #[test]
    fn floats_and_booleans() {
        assert!(check("(ratio<=0.75)"));
        assert!(!check("(ratio>=0.75)"));
        assert!(check("(enabled=true)"));
        assert!(check("(enabled=TRUE)"));
        assert!(!check("(enabled=false)"));
        assert!(!check("(enabled>=true)"));
    }

    #[test]
    fn lists_match_any_element() {
        assert!(check("(tags=blue)"));
        assert!(!check("(tags=green)"));
        assert!(check("(tags=bl*)"));
    }

    #[test]
    fn substrings() {
        assert!(check("(title=Hello*World)"));
        assert!(check("(title=*Big*)"));
        assert!(check("(title=H*l*o*d)"));
        assert!(!check("(title=World*)"));
        assert!(!check("(level=5*)"));
    }

    #[test]
    fn presence_and_composites() {
        assert!(check("(level=*)"));
        assert!(!check("(missing=*)"));
        assert!(check("(&(level>=3)(!(missing=*)))"));
        assert!(check("(|(missing=1)(level=5))"));
        assert!(!check("(&(level=5)(missing=1))"));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for expr in [
            "(&(a=1)(|(b>=2)(!(c=*))))",
            r"(name=a\*b)",
            "(cn=x*y*z)",
            "(cn=*y*)",
            "(v~=text)",
        ] {
            let parsed = Filter::parse(expr).unwrap();
            let reparsed = Filter::parse(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed, "{expr}");
        }
    }
}
