//! Selector Parser
//!
//! Parses stream selectors and label sets into matchers.
//!
//! # Supported Syntax
//!
//! ```text
//! {name op "value" [, name op "value" ...]}
//!
//! op    := = | != | =~ | !~
//! value := "double quoted, with \" \\ \n \t \r escapes" | `raw backtick`
//! ```
//!
//! # Examples
//!
//! ```text
//! {app="api"}
//! {foo="bar", bar=~"baz[2-9]"}
//! {env!="dev", job!~`test-.*`}
//! ```
//!
//! A label set such as `{foo="bar",bar="baz1"}` uses the same grammar but only
//! admits `=` and each name at most once.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, multispace0, none_of},
    combinator::{opt, recognize, value},
    multi::{fold_many0, separated_list0},
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::query::error::{QueryError, QueryResult};
use crate::query::matcher::{MatchType, Matcher};
use crate::storage::LabelSet;
use std::collections::HashSet;

/// Matcher before regex compilation
#[derive(Debug, Clone, PartialEq)]
struct RawMatcher {
    name: String,
    match_type: MatchType,
    value: String,
}

/// Parse a selector string into matchers
///
/// An empty selector `{}` parses to an empty list; callers decide whether
/// that is acceptable.
pub fn parse_selector(input: &str) -> QueryResult<Vec<Matcher>> {
    parse_raw(input)?
        .into_iter()
        .map(|m| Matcher::new(m.match_type, m.name, m.value))
        .collect()
}

/// Parse a label set string such as `{foo="bar",bar="baz1"}`
pub fn parse_labels(input: &str) -> QueryResult<LabelSet> {
    let raw = parse_raw(input)?;
    let mut seen = HashSet::new();

    for m in &raw {
        if m.match_type != MatchType::Equal {
            return Err(QueryError::NotEquality(m.name.clone()));
        }
        if !seen.insert(m.name.as_str()) {
            return Err(QueryError::DuplicateLabel(m.name.clone()));
        }
    }

    Ok(LabelSet::from_pairs(
        raw.into_iter().map(|m| (m.name, m.value)),
    ))
}

fn parse_raw(input: &str) -> QueryResult<Vec<RawMatcher>> {
    match parse_braced(input.trim()) {
        Ok((remaining, matchers)) => {
            if remaining.trim().is_empty() {
                Ok(matchers)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after selector: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Parse(format!(
            "Invalid selector '{}': {:?}",
            input, e
        ))),
    }
}

/// Parse `{ matcher, ... }` with an optional trailing comma
fn parse_braced(input: &str) -> IResult<&str, Vec<RawMatcher>> {
    let (input, _) = char('{')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, matchers) = separated_list0(
        delimited(multispace0, char(','), multispace0),
        parse_matcher,
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(char(','))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('}')(input)?;
    Ok((input, matchers))
}

/// Parse a single matcher like `bar=~"baz[2-9]"`
fn parse_matcher(input: &str) -> IResult<&str, RawMatcher> {
    let (input, name) = parse_label_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, match_type) = parse_match_type(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = parse_string_literal(input)?;

    Ok((
        input,
        RawMatcher {
            name: name.to_string(),
            match_type,
            value,
        },
    ))
}

fn parse_match_type(input: &str) -> IResult<&str, MatchType> {
    alt((
        value(MatchType::RegexMatch, tag("=~")),
        value(MatchType::RegexNoMatch, tag("!~")),
        value(MatchType::NotEqual, tag("!=")),
        value(MatchType::Equal, tag("=")),
    ))(input)
}

fn parse_label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_label_start), take_while(is_label_char)))(input)
}

fn parse_string_literal(input: &str) -> IResult<&str, String> {
    alt((parse_double_quoted, parse_backtick))(input)
}

fn parse_double_quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        fold_many0(
            alt((none_of("\\\""), parse_escaped_char)),
            String::new,
            |mut acc, ch| {
                acc.push(ch);
                acc
            },
        ),
        char('"'),
    )(input)
}

fn parse_backtick(input: &str) -> IResult<&str, String> {
    let (input, raw) = delimited(char('`'), take_until("`"), char('`'))(input)?;
    Ok((input, raw.to_string()))
}

fn parse_escaped_char(input: &str) -> IResult<&str, char> {
    preceded(
        char('\\'),
        alt((
            value('\\', char('\\')),
            value('"', char('"')),
            value('\n', char('n')),
            value('\r', char('r')),
            value('\t', char('t')),
        )),
    )(input)
}

fn is_label_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_label_char(ch: char) -> bool {
    is_label_start(ch) || ch.is_ascii_digit()
}
