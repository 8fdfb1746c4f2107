//! Recursive descent parser for filter expressions

use crate::error::FilterError;
use crate::filter::{Filter, Operator};

pub(crate) fn parse(input: &str) -> Result<Filter, FilterError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    let filter = parser.parse_filter()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(FilterError::TrailingInput { offset: parser.pos });
    }
    Ok(filter)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(FilterError::Expected {
                expected,
                found,
                offset: self.pos,
            }),
            None => Err(FilterError::UnexpectedEnd),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_ws();
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(FilterError::UnexpectedEnd),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let start = self.pos;
        let mut filters = Vec::new();
        self.skip_ws();
        while self.peek() == Some('(') {
            filters.push(self.parse_filter()?);
            self.skip_ws();
        }
        if filters.is_empty() {
            return Err(FilterError::EmptyList { offset: start });
        }
        Ok(filters)
    }

    fn parse_item(&mut self) -> Result<Filter, FilterError> {
        let attribute = self.parse_attribute()?;
        let op_offset = self.pos;
        let op = match (self.peek(), self.chars.get(self.pos + 1).copied()) {
            (Some('='), _) => {
                self.pos += 1;
                Operator::Equal
            }
            (Some('~'), Some('=')) => {
                self.pos += 2;
                Operator::Approx
            }
            (Some('>'), Some('=')) => {
                self.pos += 2;
                Operator::GreaterEq
            }
            (Some('<'), Some('=')) => {
                self.pos += 2;
                Operator::LessEq
            }
            (None, _) => return Err(FilterError::UnexpectedEnd),
            _ => return Err(FilterError::InvalidOperator { offset: op_offset }),
        };

        let segments = self.parse_value(op == Operator::Equal)?;
        if op != Operator::Equal {
            let value = segments.into_iter().next().unwrap_or_default();
            return Ok(Filter::Item {
                attribute,
                op,
                value,
            });
        }

        match segments.len() {
            1 => Ok(Filter::Item {
                attribute,
                op,
                value: segments.into_iter().next().unwrap_or_default(),
            }),
            2 if segments.iter().all(String::is_empty) => Ok(Filter::Present(attribute)),
            _ => Ok(substring(attribute, segments)),
        }
    }

    fn parse_attribute(&mut self) -> Result<String, FilterError> {
        let start = self.pos;
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            name.push(c);
            self.pos += 1;
        }
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(FilterError::MissingAttribute { offset: start });
        }
        Ok(name)
    }

    /// Reads a value up to the closing parenthesis. With `split_stars` the
    /// value is split at unescaped `*`, otherwise `*` is literal.
    fn parse_value(&mut self, split_stars: bool) -> Result<Vec<String>, FilterError> {
        let mut segments = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                None => return Err(FilterError::UnexpectedEnd),
                Some(')') => break,
                Some('(') => return Err(FilterError::UnescapedParen { offset: self.pos }),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or(FilterError::UnexpectedEnd)?;
                    current.push(escaped);
                    self.pos += 1;
                }
                Some('*') if split_stars => {
                    segments.push(std::mem::take(&mut current));
                    self.pos += 1;
                }
                Some(c) => {
                    current.push(c);
                    self.pos += 1;
                }
            }
        }
        segments.push(current);
        Ok(segments)
    }
}

fn substring(attribute: String, mut segments: Vec<String>) -> Filter {
    let last = segments.pop().filter(|s| !s.is_empty());
    let mut rest = segments.into_iter();
    let initial = rest.next().filter(|s| !s.is_empty());
    let any = rest.filter(|s| !s.is_empty()).collect();
    Filter::Substring {
        attribute,
        initial,
        any,
        last,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_equal() {
        let f = parse("(name=value)").unwrap();
        assert_eq!(
            f,
            Filter::Item {
                attribute: "name".into(),
                op: Operator::Equal,
                value: "value".into()
            }
        );
    }

    #[test]
    fn parse_presence() {
        assert_eq!(parse("(service.pid=*)").unwrap(), Filter::Present("service.pid".into()));
    }

    #[test]
    fn parse_substring_segments() {
        let f = parse("(cn=a*b*c)").unwrap();
        assert_eq!(
            f,
            Filter::Substring {
                attribute: "cn".into(),
                initial: Some("a".into()),
                any: vec!["b".into()],
                last: Some("c".into()),
            }
        );

        let f = parse("(cn=*mid*)").unwrap();
        assert_eq!(
            f,
            Filter::Substring {
                attribute: "cn".into(),
                initial: None,
                any: vec!["mid".into()],
                last: None,
            }
        );
    }

    #[test]
    fn parse_escaped_star_is_literal() {
        let f = parse(r"(cn=a\*b)").unwrap();
        assert_eq!(
            f,
            Filter::Item {
                attribute: "cn".into(),
                op: Operator::Equal,
                value: "a*b".into()
            }
        );
    }

    #[test]
    fn parse_nested_composites() {
        let f = parse("(&(a=1)(|(b>=2)(c<=3))(!(d~=x)))").unwrap();
        match f {
            Filter::And(items) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(items[1], Filter::Or(_)));
                assert!(matches!(items[2], Filter::Not(_)));
            }
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn parse_tolerates_whitespace_between_operands() {
        assert!(parse(" ( & (a=1) (b=2) ) ").is_ok());
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse("(a=1"), Err(FilterError::UnexpectedEnd));
        assert_eq!(parse("(=1)"), Err(FilterError::MissingAttribute { offset: 1 }));
        assert_eq!(parse("(&)"), Err(FilterError::EmptyList { offset: 2 }));
        assert_eq!(parse("(a=1)x"), Err(FilterError::TrailingInput { offset: 5 }));
        assert_eq!(parse("(a=()"), Err(FilterError::UnescapedParen { offset: 3 }));
        assert!(matches!(parse("a=1"), Err(FilterError::Expected { expected: '(', .. })));
        assert!(matches!(parse("(a)"), Err(FilterError::InvalidOperator { .. })));
    }
}
