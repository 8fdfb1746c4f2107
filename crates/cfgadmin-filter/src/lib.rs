//! cfgadmin filter expressions
//!
//! LDAP-style (RFC 1960) attribute filters used to select configuration
//! records by their properties.
//!
//! # Grammar
//!
//! - Composites: `(&F1 F2 ...)`, `(|F1 F2 ...)`, `(!F)`
//! - Items: `(attr=value)`, `(attr~=value)`, `(attr>=value)`, `(attr<=value)`
//! - Presence: `(attr=*)`
//! - Substrings: `(attr=ini*any*fin)`
//!
//! `\` escapes the next character, so `(name=a\*b)` matches the literal
//! string `a*b`.
//!
//! # Example
//!
//! ```rust
//! use cfgadmin_filter::{AttributeValue, Attributes, Filter};
//!
//! struct Level(i64);
//!
//! impl Attributes for Level {
//!     fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
//!         name.eq_ignore_ascii_case("level").then(|| AttributeValue::Int(self.0))
//!     }
//! }
//!
//! let filter: Filter = "(&(level>=3)(!(level=7)))".parse().unwrap();
//! assert!(filter.matches(&Level(5)));
//! assert!(!filter.matches(&Level(7)));
//! ```

#![warn(unreachable_pub)]

mod error;
mod filter;
mod parser;

pub use error::FilterError;
pub use filter::{Filter, Operator};

/// A typed view of one attribute value.
///
/// Filter values are written as strings and are coerced to the type of the
/// attribute they are compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue<'a> {
    /// Text, compared lexicographically
    Str(&'a str),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Boolean, only supports equality
    Bool(bool),
    /// Multi-valued attribute, matches if any element matches
    List(Vec<AttributeValue<'a>>),
}

/// Source of attributes a [`Filter`] is evaluated against.
///
/// Implementors decide how names are looked up; configuration properties
/// look names up case-insensitively.
pub trait Attributes {
    /// Look up an attribute by name
    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>>;
}

impl<A: Attributes + ?Sized> Attributes for &A {
    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
        (**self).attribute(name)
    }
}
