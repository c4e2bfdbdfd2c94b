//! Typed literals as they appear in URIs: key predicates, function
//! parameters and expression operands.
//!
//! The grammar is shared by the path parser and the expression tokenizer,
//! so the combinators are generic over the nom error type like the rest of
//! the crate's parsers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1, take_while_m_n},
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map, map_res, not, opt, peek, recognize, value},
    error::ParseError as NomParseError,
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::edm::PrimitiveKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Double(f64),
    String(String),
    Guid(Uuid),
    Date(NaiveDate),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeOfDay(NaiveTime),
    /// ISO 8601 duration text, e.g. `P1DT2H`.
    Duration(String),
    Enum { type_name: String, member: String },
}

impl Literal {
    /// Static kind of the literal before coercion. Integers report the
    /// narrowest of Int32/Int64 that holds them.
    pub fn kind(&self) -> Option<PrimitiveKind> {
        match self {
            Literal::Null | Literal::Enum { .. } => None,
            Literal::Boolean(_) => Some(PrimitiveKind::Boolean),
            Literal::Integer(i) => Some(if i32::try_from(*i).is_ok() {
                PrimitiveKind::Int32
            } else {
                PrimitiveKind::Int64
            }),
            Literal::Decimal(_) => Some(PrimitiveKind::Decimal),
            Literal::Double(_) => Some(PrimitiveKind::Double),
            Literal::String(_) => Some(PrimitiveKind::String),
            Literal::Guid(_) => Some(PrimitiveKind::Guid),
            Literal::Date(_) => Some(PrimitiveKind::Date),
            Literal::DateTimeOffset(_) => Some(PrimitiveKind::DateTimeOffset),
            Literal::TimeOfDay(_) => Some(PrimitiveKind::TimeOfDay),
            Literal::Duration(_) => Some(PrimitiveKind::Duration),
        }
    }

    /// Check (and widen where needed) this literal against a declared
    /// primitive kind and its max-length facet.
    pub fn coerce(self, kind: PrimitiveKind, max_length: Option<u32>) -> Result<Literal, String> {
        let expected = || format!("expected a literal of type {kind}");
        match (self, kind) {
            (Literal::Null, _) => Ok(Literal::Null),
            (Literal::Integer(i), k) if k.is_integral() => {
                let (min, max) = k.integer_range().unwrap_or((i64::MIN, i64::MAX));
                if i < min || i > max {
                    Err(format!("value {i} does not fit {kind}"))
                } else {
                    Ok(Literal::Integer(i))
                }
            }
            (Literal::Integer(i), PrimitiveKind::Decimal) => Ok(Literal::Decimal(Decimal::from(i))),
            (Literal::Integer(i), PrimitiveKind::Single | PrimitiveKind::Double) => {
                Ok(Literal::Double(i as f64))
            }
            (Literal::Decimal(d), PrimitiveKind::Decimal) => Ok(Literal::Decimal(d)),
            (Literal::Decimal(d), PrimitiveKind::Single | PrimitiveKind::Double) => d
                .to_f64()
                .map(Literal::Double)
                .ok_or_else(|| format!("value {d} does not fit {kind}")),
            (Literal::Double(f), PrimitiveKind::Single | PrimitiveKind::Double) => {
                Ok(Literal::Double(f))
            }
            (Literal::String(s), PrimitiveKind::String) => match max_length {
                Some(max) if s.chars().count() > max as usize => Err(format!(
                    "string of length {} exceeds max length {max}",
                    s.chars().count()
                )),
                _ => Ok(Literal::String(s)),
            },
            (lit @ Literal::Boolean(_), PrimitiveKind::Boolean)
            | (lit @ Literal::Guid(_), PrimitiveKind::Guid)
            | (lit @ Literal::Date(_), PrimitiveKind::Date)
            | (lit @ Literal::DateTimeOffset(_), PrimitiveKind::DateTimeOffset)
            | (lit @ Literal::TimeOfDay(_), PrimitiveKind::TimeOfDay)
            | (lit @ Literal::Duration(_), PrimitiveKind::Duration) => Ok(lit),
            _ => Err(expected()),
        }
    }

    /// Literal for a JSON value of a known kind (e.g. a key read back from
    /// an entity body).
    pub fn from_json(kind: PrimitiveKind, json: &JsonValue) -> Option<Literal> {
        if json.is_null() {
            return Some(Literal::Null);
        }
        match kind {
            PrimitiveKind::Boolean => json.as_bool().map(Literal::Boolean),
            k if k.is_integral() => json.as_i64().map(Literal::Integer),
            PrimitiveKind::Decimal => match json {
                JsonValue::String(s) => Decimal::from_str(s).ok().map(Literal::Decimal),
                JsonValue::Number(n) => Decimal::from_str(&n.to_string()).ok().map(Literal::Decimal),
                _ => None,
            },
            PrimitiveKind::Single | PrimitiveKind::Double => json.as_f64().map(Literal::Double),
            PrimitiveKind::String => json.as_str().map(|s| Literal::String(s.to_string())),
            PrimitiveKind::Guid => json.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(Literal::Guid),
            PrimitiveKind::Date => json
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .map(Literal::Date),
            PrimitiveKind::DateTimeOffset => json
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(Literal::DateTimeOffset),
            PrimitiveKind::TimeOfDay => json
                .as_str()
                .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok())
                .map(Literal::TimeOfDay),
            PrimitiveKind::Duration => json.as_str().map(|s| Literal::Duration(s.to_string())),
            _ => None,
        }
    }

    /// JSON representation used in payloads and by data sources.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Literal::Null => JsonValue::Null,
            Literal::Boolean(b) => JsonValue::Bool(*b),
            Literal::Integer(i) => JsonValue::from(*i),
            Literal::Decimal(d) => d
                .to_f64()
                .map(JsonValue::from)
                .unwrap_or_else(|| JsonValue::String(d.to_string())),
            Literal::Double(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(self.to_uri_string())),
            Literal::String(s) => JsonValue::String(s.clone()),
            Literal::Guid(g) => JsonValue::String(g.to_string()),
            Literal::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            Literal::DateTimeOffset(dt) => {
                JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Literal::TimeOfDay(t) => JsonValue::String(t.format("%H:%M:%S%.f").to_string()),
            Literal::Duration(d) => JsonValue::String(d.clone()),
            Literal::Enum { member, .. } => JsonValue::String(member.clone()),
        }
    }

    /// Canonical URI text; parses back to an equal literal.
    pub fn to_uri_string(&self) -> String {
        match self {
            Literal::Null => "null".to_string(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Integer(i) => i.to_string(),
            Literal::Decimal(d) => {
                let text = d.to_string();
                if text.contains('.') {
                    text
                } else {
                    format!("{text}.0")
                }
            }
            Literal::Double(f) if f.is_nan() => "NaN".to_string(),
            Literal::Double(f) if f.is_infinite() => {
                let text = if *f > 0.0 { "INF" } else { "-INF" };
                text.to_string()
            }
            Literal::Double(f) => format!("{f:e}"),
            Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Guid(g) => g.to_string(),
            Literal::Date(d) => d.format("%Y-%m-%d").to_string(),
            Literal::DateTimeOffset(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Literal::TimeOfDay(t) => t.format("%H:%M:%S%.f").to_string(),
            Literal::Duration(d) => format!("duration'{d}'"),
            Literal::Enum { type_name, member } => format!("{type_name}'{member}'"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri_string())
    }
}

/// Parse a complete literal (nothing may follow it).
pub fn parse_literal(input: &str) -> Result<Literal, String> {
    match all_consuming(literal::<nom::error::Error<&str>>)(input.trim()) {
        Ok((_, lit)) => Ok(lit),
        Err(_) => Err(format!("'{input}' is not a valid literal")),
    }
}

// ============================================================================
// Combinators
// ============================================================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A keyword not immediately followed by an identifier character.
pub(crate) fn word<'a, E: NomParseError<&'a str>>(
    w: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    terminated(tag(w), not(peek(take_while_m_n(1, 1, is_ident_char))))
}

/// Any literal form. Order matters: the more specific shapes are tried
/// before the generic number form.
pub fn literal<'a, E: NomParseError<&'a str> + nom::error::FromExternalError<&'a str, uuid::Error> + nom::error::FromExternalError<&'a str, chrono::ParseError>>(input: &'a str) -> IResult<&'a str, Literal, E> {
    alt((
        value(Literal::Null, word("null")),
        value(Literal::Boolean(true), word("true")),
        value(Literal::Boolean(false), word("false")),
        duration_literal,
        enum_literal,
        map(string_literal, Literal::String),
        guid_literal,
        datetimeoffset_literal,
        date_literal,
        time_literal,
        number_literal,
    ))(input)
}

/// `'...'` with `''` as the escaped quote.
pub fn string_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, String, E> {
    map(
        delimited(
            char('\''),
            many0(alt((
                value("'", tag("''")),
                take_while1(|c: char| c != '\''),
            ))),
            char('\''),
        ),
        |parts: Vec<&str>| parts.concat(),
    )(input)
}

fn duration_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Literal, E> {
    map(
        preceded(
            tag("duration"),
            delimited(
                char('\''),
                recognize(pair(
                    opt(char('-')),
                    pair(char('P'), take_while(|c: char| c.is_ascii_alphanumeric() || c == '.')),
                )),
                char('\''),
            ),
        ),
        |d: &str| Literal::Duration(d.to_string()),
    )(input)
}

/// Qualified name segment chain, e.g. `Demo.Model.Color`.
pub fn qualified_name<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        identifier,
        nom::multi::many1(preceded(char('.'), identifier)),
    ))(input)
}

pub fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        take_while_m_n(1, 1, |c: char| c.is_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn enum_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Literal, E> {
    map(
        pair(qualified_name, string_literal),
        |(type_name, member)| Literal::Enum {
            type_name: type_name.to_string(),
            member,
        },
    )(input)
}

fn hex<'a, E: NomParseError<&'a str>>(n: usize) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    take_while_m_n(n, n, |c: char| c.is_ascii_hexdigit())
}

fn guid_literal<'a, E: NomParseError<&'a str> + nom::error::FromExternalError<&'a str, uuid::Error> + nom::error::FromExternalError<&'a str, chrono::ParseError>>(input: &'a str) -> IResult<&'a str, Literal, E> {
    map_res(
        recognize(tuple((
            hex(8),
            char('-'),
            hex(4),
            char('-'),
            hex(4),
            char('-'),
            hex(4),
            char('-'),
            hex(12),
        ))),
        |s: &str| Uuid::parse_str(s).map(Literal::Guid),
    )(input)
}

fn digits<'a, E: NomParseError<&'a str>>(n: usize) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    take_while_m_n(n, n, |c: char| c.is_ascii_digit())
}

fn date_text<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(tuple((
        opt(char('-')),
        digits(4),
        char('-'),
        digits(2),
        char('-'),
        digits(2),
    )))(input)
}

fn time_text<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(tuple((
        digits(2),
        char(':'),
        digits(2),
        opt(pair(char(':'), digits(2))),
        opt(pair(char('.'), digit1)),
    )))(input)
}

fn date_literal<'a, E: NomParseError<&'a str> + nom::error::FromExternalError<&'a str, uuid::Error> + nom::error::FromExternalError<&'a str, chrono::ParseError>>(input: &'a str) -> IResult<&'a str, Literal, E> {
    map_res(date_text, |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Literal::Date)
    })(input)
}

fn time_literal<'a, E: NomParseError<&'a str> + nom::error::FromExternalError<&'a str, uuid::Error> + nom::error::FromExternalError<&'a str, chrono::ParseError>>(input: &'a str) -> IResult<&'a str, Literal, E> {
    map_res(time_text, |s: &str| {
        let with_seconds = if s.len() == 5 { format!("{s}:00") } else { s.to_string() };
        NaiveTime::parse_from_str(&with_seconds, "%H:%M:%S%.f").map(Literal::TimeOfDay)
    })(input)
}

fn datetimeoffset_literal<'a, E: NomParseError<&'a str> + nom::error::FromExternalError<&'a str, uuid::Error> + nom::error::FromExternalError<&'a str, chrono::ParseError>>(
    input: &'a str,
) -> IResult<&'a str, Literal, E> {
    map_res(
        recognize(tuple((
            date_text,
            char('T'),
            time_text,
            alt((
                tag("Z"),
                recognize(tuple((one_of("+-"), digits(2), char(':'), digits(2)))),
            )),
        ))),
        |s: &str| DateTime::parse_from_rfc3339(s).map(Literal::DateTimeOffset),
    )(input)
}

fn number_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Literal, E> {
    if let Ok((rest, neg)) = terminated::<_, _, _, E, _, _>(
        opt(char('-')),
        word("INF"),
    )(input)
    {
        let f = if neg.is_some() { f64::NEG_INFINITY } else { f64::INFINITY };
        return Ok((rest, Literal::Double(f)));
    }
    if let Ok((rest, _)) = word::<E>("NaN")(input) {
        return Ok((rest, Literal::Double(f64::NAN)));
    }

    let (rest, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    let literal = if text.contains(['e', 'E']) {
        text.parse::<f64>().ok().map(Literal::Double)
    } else if text.contains('.') {
        Decimal::from_str(text)
            .ok()
            .map(Literal::Decimal)
            .or_else(|| text.parse::<f64>().ok().map(Literal::Double))
    } else {
        text.parse::<i64>()
            .ok()
            .map(Literal::Integer)
            .or_else(|| Decimal::from_str(text).ok().map(Literal::Decimal))
    };
    match literal {
        Some(lit) => Ok((rest, lit)),
        None => Err(nom::Err::Error(E::from_error_kind(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Literal {
        parse_literal(s).unwrap()
    }

    #[test]
    fn test_keywords() {
        assert_eq!(lit("null"), Literal::Null);
        assert_eq!(lit("true"), Literal::Boolean(true));
        assert_eq!(lit("false"), Literal::Boolean(false));
        assert!(parse_literal("nullable").is_err());
    }

    #[test]
    fn test_strings_unescape_doubled_quotes() {
        assert_eq!(lit("'A1245'"), Literal::String("A1245".into()));
        assert_eq!(lit("'O''Neil'"), Literal::String("O'Neil".into()));
        assert_eq!(lit("''"), Literal::String(String::new()));
        assert!(parse_literal("'open").is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lit("42"), Literal::Integer(42));
        assert_eq!(lit("-7"), Literal::Integer(-7));
        assert_eq!(lit("1.50"), Literal::Decimal(Decimal::from_str("1.50").unwrap()));
        assert_eq!(lit("1e3"), Literal::Double(1000.0));
        assert_eq!(lit("INF"), Literal::Double(f64::INFINITY));
        assert_eq!(lit("-INF"), Literal::Double(f64::NEG_INFINITY));
        assert!(matches!(lit("NaN"), Literal::Double(f) if f.is_nan()));
    }

    #[test]
    fn test_temporal_and_guid() {
        assert_eq!(
            lit("2024-02-29"),
            Literal::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(matches!(lit("2024-02-29T10:30:00Z"), Literal::DateTimeOffset(_)));
        assert!(matches!(lit("2024-02-29T10:30:00+02:00"), Literal::DateTimeOffset(_)));
        assert_eq!(
            lit("10:30:00"),
            Literal::TimeOfDay(NaiveTime::from_hms_opt(10, 30, 0).unwrap())
        );
        assert!(matches!(
            lit("01234567-89ab-cdef-0123-456789abcdef"),
            Literal::Guid(_)
        ));
        assert_eq!(lit("duration'P1DT2H'"), Literal::Duration("P1DT2H".into()));
    }

    #[test]
    fn test_enum_literal() {
        assert_eq!(
            lit("Demo.Color'Red'"),
            Literal::Enum {
                type_name: "Demo.Color".into(),
                member: "Red".into()
            }
        );
    }

    #[test]
    fn test_coerce_checks_integer_width() {
        assert!(Literal::Integer(200).coerce(PrimitiveKind::Byte, None).is_ok());
        assert!(Literal::Integer(300).coerce(PrimitiveKind::Byte, None).is_err());
        assert!(Literal::Integer(40000).coerce(PrimitiveKind::Int16, None).is_err());
        assert_eq!(
            Literal::Integer(5).coerce(PrimitiveKind::Decimal, None).unwrap(),
            Literal::Decimal(Decimal::from(5))
        );
    }

    #[test]
    fn test_coerce_checks_max_length() {
        let s = Literal::String("ABCDEFGHI".into());
        assert!(s.clone().coerce(PrimitiveKind::String, Some(8)).is_err());
        assert!(s.coerce(PrimitiveKind::String, Some(9)).is_ok());
    }

    #[test]
    fn test_coerce_rejects_kind_mismatch() {
        let err = Literal::String("1".into())
            .coerce(PrimitiveKind::Int32, None)
            .unwrap_err();
        assert_eq!(err, "expected a literal of type Edm.Int32");
    }

    #[test]
    fn test_uri_string_round_trip() {
        for text in [
            "null",
            "true",
            "42",
            "1.50",
            "'O''Neil'",
            "2024-02-29",
            "2024-02-29T10:30:00Z",
            "10:30:00",
            "duration'PT5M'",
            "Demo.Color'Red'",
            "01234567-89ab-cdef-0123-456789abcdef",
        ] {
            let parsed = lit(text);
            assert_eq!(lit(&parsed.to_uri_string()), parsed, "{text}");
        }
        let double = lit("2.5e-3");
        assert_eq!(lit(&double.to_uri_string()), double);
    }
}
