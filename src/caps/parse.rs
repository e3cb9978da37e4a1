//! Caps string grammar.
//!
//! ```text
//! caps      := "ANY" | "EMPTY" | "NONE" | "" | structure (";" structure)* ";"?
//! structure := token ("," field)* ","?
//! field     := token "=" value
//! value     := ("(" type ")")? ( "[" value "," value ("," value)? "]"
//!                              | "{" (value ("," value)*)? "}"
//!                              | quoted | token )
//! ```
//!
//! Tokens may contain any character when escaped with a backslash, so
//! `abc\,def` is a single token. Untyped values are inferred in the order
//! int, double, fraction, boolean, string.
//!
//! Integer literals follow C `int` semantics: a `0x` literal of up to 32 bits
//! is read as an unsigned bit pattern and reinterpreted as a signed 32-bit
//! value, so `0xFF000000` is `-16777216`. Decimal literals outside the `i32`
//! range and hexadecimal literals wider than 32 bits are rejected.

use super::structure::Structure;
use super::value::{Fraction, Value, ValueType};
use super::Caps;
use std::fmt::Write;
use winnow::Parser;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, eof, opt, terminated};
use winnow::error::ContextError;
use winnow::token::take_while;

type WResult<T> = std::result::Result<T, ContextError>;

/// Failure to parse a caps string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapsParseError {
    /// The text does not follow the caps grammar.
    #[error("caps syntax error at offset {offset}")]
    Syntax {
        /// Byte offset where parsing stopped.
        offset: usize,
    },
    /// A field value could not be converted to its type.
    #[error("invalid value for field '{field}': {reason}")]
    Value {
        /// Field name.
        field: String,
        /// What went wrong.
        reason: String,
    },
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone)]
enum RawCaps {
    Any,
    Empty,
    Structures(Vec<RawStructure>),
}

#[derive(Debug, Clone)]
struct RawStructure {
    name: String,
    fields: Vec<(String, RawValue)>,
}

#[derive(Debug, Clone)]
struct RawValue {
    ty: Option<String>,
    kind: RawKind,
}

#[derive(Debug, Clone)]
enum RawKind {
    Token(String),
    Quoted(String),
    Range(Vec<RawValue>),
    List(Vec<RawValue>),
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a caps string.
pub(super) fn parse_caps(input: &str) -> Result<Caps, CapsParseError> {
    let raw = raw_caps
        .parse(input)
        .map_err(|e| CapsParseError::Syntax { offset: e.offset() })?;

    match raw {
        RawCaps::Any => Ok(Caps::new_any()),
        RawCaps::Empty => Ok(Caps::new_empty()),
        RawCaps::Structures(structures) => {
            let mut caps = Caps::new_empty();
            for raw in structures {
                let mut structure = Structure::new(raw.name);
                for (field, value) in raw.fields {
                    let value = resolve(value, None)
                        .map_err(|reason| CapsParseError::Value {
                            field: field.clone(),
                            reason,
                        })?;
                    structure.set(field, value);
                }
                caps.append_structure(structure);
            }
            Ok(caps)
        }
    }
}

fn raw_caps(input: &mut &str) -> WResult<RawCaps> {
    multispace0.parse_next(input)?;
    if input.is_empty() {
        return Ok(RawCaps::Empty);
    }

    let special = opt(terminated(
        alt((
            "ANY".value(RawCaps::Any),
            "EMPTY".value(RawCaps::Empty),
            "NONE".value(RawCaps::Empty),
        )),
        (multispace0, eof),
    ))
    .parse_next(input)?;
    if let Some(special) = special {
        return Ok(special);
    }

    let mut structures = vec![raw_structure.parse_next(input)?];
    loop {
        if opt((multispace0, ';', multispace0)).parse_next(input)?.is_none() || input.is_empty() {
            break;
        }
        structures.push(raw_structure.parse_next(input)?);
    }
    multispace0.parse_next(input)?;
    Ok(RawCaps::Structures(structures))
}

fn raw_structure(input: &mut &str) -> WResult<RawStructure> {
    let name = token.parse_next(input)?;
    let mut fields = Vec::new();
    loop {
        if opt((multispace0, ',', multispace0)).parse_next(input)?.is_none() {
            break;
        }
        if input.is_empty() || input.starts_with(';') {
            break;
        }
        fields.push(field.parse_next(input)?);
    }
    Ok(RawStructure { name, fields })
}

fn field(input: &mut &str) -> WResult<(String, RawValue)> {
    let name = token.parse_next(input)?;
    (multispace0, '=', multispace0).parse_next(input)?;
    let value = raw_value.parse_next(input)?;
    Ok((name, value))
}

fn raw_value(input: &mut &str) -> WResult<RawValue> {
    let ty = opt(delimited(
        ('(', multispace0),
        take_while(1.., |c: char| c.is_alphanumeric() || c == '_'),
        (multispace0, ')'),
    ))
    .parse_next(input)?
    .map(str::to_string);
    multispace0.parse_next(input)?;

    let kind = alt((
        range.map(RawKind::Range),
        list.map(RawKind::List),
        quoted.map(RawKind::Quoted),
        token.map(RawKind::Token),
    ))
    .parse_next(input)?;
    Ok(RawValue { ty, kind })
}

fn range(input: &mut &str) -> WResult<Vec<RawValue>> {
    ('[', multispace0).parse_next(input)?;
    let items = comma_separated(input)?;
    (multispace0, ']').parse_next(input)?;
    if !(2..=3).contains(&items.len()) {
        return Err(ContextError::new());
    }
    Ok(items)
}

fn list(input: &mut &str) -> WResult<Vec<RawValue>> {
    ('{', multispace0).parse_next(input)?;
    let items = if input.starts_with('}') {
        Vec::new()
    } else {
        comma_separated(input)?
    };
    (multispace0, '}').parse_next(input)?;
    Ok(items)
}

fn comma_separated(input: &mut &str) -> WResult<Vec<RawValue>> {
    let mut items = vec![raw_value.parse_next(input)?];
    while opt((multispace0, ',', multispace0)).parse_next(input)?.is_some() {
        items.push(raw_value.parse_next(input)?);
    }
    Ok(items)
}

fn quoted(input: &mut &str) -> WResult<String> {
    let src: &str = *input;
    let rest = src.strip_prefix('"').ok_or_else(ContextError::new)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                *input = &rest[i + 1..];
                return Ok(out);
            }
            '\\' => {
                let (_, escaped) = chars.next().ok_or_else(ContextError::new)?;
                out.push(escaped);
            }
            c => out.push(c),
        }
    }
    Err(ContextError::new())
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.' | '+' | ':' | '*')
}

fn token(input: &mut &str) -> WResult<String> {
    let src: &str = *input;
    let mut out = String::new();
    let mut consumed = 0;
    let mut chars = src.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            let (j, escaped) = chars.next().ok_or_else(ContextError::new)?;
            out.push(escaped);
            consumed = j + escaped.len_utf8();
        } else if is_token_char(c) {
            out.push(c);
            consumed = i + c.len_utf8();
        } else {
            break;
        }
    }
    if consumed == 0 {
        return Err(ContextError::new());
    }
    *input = &src[consumed..];
    Ok(out)
}

// ============================================================================
// Type resolution
// ============================================================================

fn resolve(raw: RawValue, inherited: Option<ValueType>) -> Result<Value, String> {
    let ty = match raw.ty.as_deref() {
        Some(name) => {
            Some(ValueType::from_name(name).ok_or_else(|| format!("unknown type '{name}'"))?)
        }
        None => inherited,
    };

    match raw.kind {
        RawKind::Quoted(text) => match ty {
            Some(ty) => parse_typed(ty, &text),
            None => Ok(Value::Str(text)),
        },
        RawKind::Token(text) => match ty {
            Some(ty) => parse_typed(ty, &text),
            None => Ok(infer(&text)),
        },
        RawKind::List(items) => items
            .into_iter()
            .map(|item| resolve(item, ty))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        RawKind::Range(items) => {
            let mut items = items.into_iter();
            let first_raw = items.next().ok_or_else(|| "empty range".to_string())?;
            let first = resolve(first_raw, ty)?;
            let ty = match ty.or_else(|| first.value_type()) {
                Some(ty) => ty,
                None => return Err("range bounds must be scalars".to_string()),
            };
            let mut bounds = vec![first];
            for item in items {
                bounds.push(resolve(item, Some(ty))?);
            }
            build_range(ty, &bounds)
        }
    }
}

fn build_range(ty: ValueType, bounds: &[Value]) -> Result<Value, String> {
    let ordered = |ok: bool| {
        if ok {
            Ok(())
        } else {
            Err("range minimum is larger than its maximum".to_string())
        }
    };

    match (ty, bounds) {
        (ValueType::Int, [Value::Int(min), Value::Int(max), rest @ ..]) => {
            let step = match rest {
                [] => 1,
                [Value::Int(step)] if *step > 0 => *step,
                _ => return Err("range step must be a positive int".to_string()),
            };
            ordered(min <= max)?;
            Ok(Value::IntRange {
                min: *min,
                max: *max,
                step,
            })
        }
        (ValueType::Int64, [Value::Int64(min), Value::Int64(max), rest @ ..]) => {
            let step = match rest {
                [] => 1,
                [Value::Int64(step)] if *step > 0 => *step,
                _ => return Err("range step must be a positive int64".to_string()),
            };
            ordered(min <= max)?;
            Ok(Value::Int64Range {
                min: *min,
                max: *max,
                step,
            })
        }
        (ValueType::Double, [Value::Double(min), Value::Double(max)]) => {
            ordered(min <= max)?;
            Ok(Value::DoubleRange {
                min: *min,
                max: *max,
            })
        }
        (ValueType::Fraction, [Value::Fraction(min), Value::Fraction(max)]) => {
            ordered(min <= max)?;
            Ok(Value::FractionRange {
                min: *min,
                max: *max,
            })
        }
        (ty, _) => Err(format!("invalid {} range", ty.name())),
    }
}

fn infer(text: &str) -> Value {
    if let Ok(v) = parse_int(text) {
        return Value::Int(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return Value::Double(v);
    }
    if let Ok(v) = parse_fraction(text) {
        return Value::Fraction(v);
    }
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" => Value::Bool(true),
        "false" | "no" => Value::Bool(false),
        _ => Value::Str(text.to_string()),
    }
}

fn parse_typed(ty: ValueType, text: &str) -> Result<Value, String> {
    match ty {
        ValueType::Int => parse_int(text).map(Value::Int),
        ValueType::Int64 => parse_int64(text).map(Value::Int64),
        ValueType::Double => text
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| format!("'{text}' is not a double")),
        ValueType::Bool => match text.to_ascii_lowercase().as_str() {
            "true" | "yes" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("'{text}' is not a boolean")),
        },
        ValueType::Str => Ok(Value::Str(text.to_string())),
        ValueType::Fraction => parse_fraction(text).map(Value::Fraction),
    }
}

fn split_sign(text: &str) -> (bool, &str) {
    match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    }
}

fn hex_digits(body: &str) -> Option<&str> {
    body.strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parse an `int` literal with C semantics for 32-bit hexadecimal patterns.
fn parse_int(text: &str) -> Result<i32, String> {
    let (negative, body) = split_sign(text);
    if let Some(digits) = hex_digits(body) {
        let bits = u32::from_str_radix(digits, 16)
            .map_err(|_| format!("hexadecimal literal '{text}' is wider than 32 bits"))?;
        let value = bits as i32;
        return Ok(if negative { value.wrapping_neg() } else { value });
    }
    text.parse::<i32>()
        .map_err(|_| format!("'{text}' is not a 32-bit integer"))
}

fn parse_int64(text: &str) -> Result<i64, String> {
    let (negative, body) = split_sign(text);
    if let Some(digits) = hex_digits(body) {
        let bits = u64::from_str_radix(digits, 16)
            .map_err(|_| format!("hexadecimal literal '{text}' is wider than 64 bits"))?;
        let value = bits as i64;
        return Ok(if negative { value.wrapping_neg() } else { value });
    }
    text.parse::<i64>()
        .map_err(|_| format!("'{text}' is not a 64-bit integer"))
}

fn parse_fraction(text: &str) -> Result<Fraction, String> {
    let invalid = || format!("'{text}' is not a fraction");
    let (numer, denom) = match text.split_once('/') {
        Some((n, d)) => (n.trim(), d.trim()),
        None => (text, "1"),
    };
    let numer = numer.parse::<i32>().map_err(|_| invalid())?;
    let denom = denom.parse::<i32>().map_err(|_| invalid())?;
    Fraction::try_new(numer, denom).ok_or_else(invalid)
}

// ============================================================================
// Serialization
// ============================================================================

/// Serialize a structure; every value carries its type so parsing restores it exactly.
pub(super) fn serialize_structure(structure: &Structure) -> String {
    let mut out = escape_token(structure.name());
    for (name, value) in structure.fields() {
        out.push_str(", ");
        out.push_str(&escape_token(name));
        out.push('=');
        write_value(&mut out, value, true);
    }
    out
}

fn escape_token(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if !is_token_char(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn quote_string(out: &mut String, text: &str) {
    if !text.is_empty() && text.chars().all(is_token_char) {
        out.push_str(text);
        return;
    }
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn write_value(out: &mut String, value: &Value, typed: bool) {
    if typed {
        if let Some(ty) = value.value_type() {
            let _ = write!(out, "({})", ty.name());
        }
    }

    let _ = match value {
        Value::Int(v) => write!(out, "{v}"),
        Value::Int64(v) => write!(out, "{v}"),
        Value::Double(v) => write!(out, "{v}"),
        Value::Bool(v) => write!(out, "{v}"),
        Value::Str(v) => {
            quote_string(out, v);
            Ok(())
        }
        Value::Fraction(v) => write!(out, "{v}"),
        Value::IntRange { min, max, step } if *step != 1 => write!(out, "[ {min}, {max}, {step} ]"),
        Value::IntRange { min, max, .. } => write!(out, "[ {min}, {max} ]"),
        Value::Int64Range { min, max, step } if *step != 1 => {
            write!(out, "[ {min}, {max}, {step} ]")
        }
        Value::Int64Range { min, max, .. } => write!(out, "[ {min}, {max} ]"),
        Value::DoubleRange { min, max } => write!(out, "[ {min}, {max} ]"),
        Value::FractionRange { min, max } => write!(out, "[ {min}, {max} ]"),
        Value::List(items) => {
            let homogeneous = value.value_type().is_some();
            out.push('{');
            for (i, item) in items.iter().enumerate() {
                out.push_str(if i == 0 { " " } else { ", " });
                write_value(out, item, !homogeneous);
            }
            out.push_str(" }");
            Ok(())
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(s: &str) -> Structure {
        let caps: Caps = s.parse().unwrap();
        caps.structure(0).unwrap().clone()
    }

    #[test]
    fn test_parse_decimal_int() {
        let s = structure("video/x-raw-rgb, width=(int)123456");
        assert_eq!(s.name(), "video/x-raw-rgb");
        assert_eq!(s.get_int("width"), Some(123456));
    }

    #[test]
    fn test_parse_hex_wraps_like_c_int() {
        let s = structure("video/x-raw-rgb, red_mask=(int)0xFF000000");
        assert_eq!(s.get_int("red_mask"), Some(0xFF000000_u32 as i32));
        assert_eq!(s.get_int("red_mask"), Some(-16777216));

        let s = structure("x, a=(int)0x80000000, b=(int)0x7fffffff, c=(int)-0x10");
        assert_eq!(s.get_int("a"), Some(i32::MIN));
        assert_eq!(s.get_int("b"), Some(i32::MAX));
        assert_eq!(s.get_int("c"), Some(-16));
    }

    #[test]
    fn test_parse_rejects_out_of_range_ints() {
        assert!(matches!(
            "x, a=(int)0x1FFFFFFFF".parse::<Caps>(),
            Err(CapsParseError::Value { .. })
        ));
        assert!("x, a=(int)2147483648".parse::<Caps>().is_err());
        assert!("x, a=(int)-2147483649".parse::<Caps>().is_err());
        assert_eq!(structure("x, a=(int)-2147483648").get_int("a"), Some(i32::MIN));
    }

    #[test]
    fn test_parse_negative_and_int64() {
        let s = structure("x, a=(int)-5, b=(int64)0xFFFFFFFFFFFFFFFF, c=(gint64)5000000000");
        assert_eq!(s.get_int("a"), Some(-5));
        assert_eq!(s.get_int64("b"), Some(-1));
        assert_eq!(s.get_int64("c"), Some(5_000_000_000));
    }

    #[test]
    fn test_untyped_inference() {
        let s = structure("x, i=42, d=2.5, f=30/1, b=true, s=hello, big=5000000000");
        assert_eq!(s.get("i"), Some(&Value::Int(42)));
        assert_eq!(s.get("d"), Some(&Value::Double(2.5)));
        assert_eq!(s.get_fraction("f"), Some(Fraction::new(30, 1)));
        assert_eq!(s.get_bool("b"), Some(true));
        assert_eq!(s.get_str("s"), Some("hello"));
        assert_eq!(s.get_double("big"), Some(5e9));
    }

    #[test]
    fn test_type_abbreviations() {
        let s = structure("x, a=(i)1, b=(d)1, c=(b)yes, d=(s)1, e=(float)0.5");
        assert_eq!(s.get_int("a"), Some(1));
        assert_eq!(s.get_double("b"), Some(1.0));
        assert_eq!(s.get_bool("c"), Some(true));
        assert_eq!(s.get_str("d"), Some("1"));
        assert_eq!(s.get_double("e"), Some(0.5));
    }

    #[test]
    fn test_ranges_and_lists() {
        let s = structure(
            "video/x-raw, width=(int)[ 16, 4096 ], height=[1,100,2], \
             framerate=(fraction)[ 0/1, 2147483647/1 ], format=(string){ I420, \"NV 12\" }",
        );
        assert_eq!(s.get("width"), Some(&Value::int_range(16, 4096)));
        assert_eq!(
            s.get("height"),
            Some(&Value::IntRange { min: 1, max: 100, step: 2 })
        );
        assert_eq!(
            s.get("framerate"),
            Some(&Value::fraction_range(Fraction::new(0, 1), Fraction::new(i32::MAX, 1)))
        );
        assert_eq!(
            s.get("format"),
            Some(&Value::List(vec![Value::from("I420"), Value::from("NV 12")]))
        );
    }

    #[test]
    fn test_single_element_list_stays_a_list() {
        let s = structure("x, a=(int){ 1 }");
        assert_eq!(s.get("a"), Some(&Value::List(vec![Value::Int(1)])));
        assert_eq!(serialize_structure(&s), "x, a=(int){ 1 }");
        let fixed: Caps = "x, a=(int)1".parse().unwrap();
        assert!(fixed.is_fixed());
    }

    #[test]
    fn test_escaped_comma_in_name() {
        let s = structure("abc\\,def, a=(int)1");
        assert_eq!(s.name(), "abc,def");
        assert_eq!(s.get_int("a"), Some(1));
        assert_eq!(serialize_structure(&s), "abc\\,def, a=(int)1");
    }

    #[test]
    fn test_special_caps() {
        assert!("ANY".parse::<Caps>().unwrap().is_any());
        assert!("EMPTY".parse::<Caps>().unwrap().is_empty());
        assert!("NONE".parse::<Caps>().unwrap().is_empty());
        assert!("".parse::<Caps>().unwrap().is_empty());
        assert!("  ANY  ".parse::<Caps>().unwrap().is_any());
    }

    #[test]
    fn test_trailing_separators() {
        let caps: Caps = "x, a=(int)1,; y;".parse().unwrap();
        assert_eq!(caps.size(), 2);
        assert_eq!(caps.structure(0).unwrap().n_fields(), 1);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!("x, a=".parse::<Caps>(), Err(CapsParseError::Syntax { .. })));
        assert!("x, a=(int)[ 1 ]".parse::<Caps>().is_err());
        assert!("x, a=\"unterminated".parse::<Caps>().is_err());
        assert!("x, a=(int)[ 5, 1 ]".parse::<Caps>().is_err());
        assert!("x, a=(nosuchtype)1".parse::<Caps>().is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let original = Structure::new("audio/x-raw")
            .with_field("rate", 48000)
            .with_field("mask", 0xFF000000_u32 as i32)
            .with_field("volume", 1.0)
            .with_field("ratio", Fraction::new(4, 3))
            .with_field("name", "a \"quoted\" name")
            .with_field("number-like", "42")
            .with_field("flag", false)
            .with_field("big", 1_i64 << 40)
            .with_field("channels", Value::IntRange { min: 1, max: 8, step: 1 })
            .with_field("mixed", Value::List(vec![Value::Int(1), Value::from("two")]));

        let text = serialize_structure(&original);
        let caps: Caps = text.parse().unwrap();
        let parsed = caps.structure(0).unwrap();
        assert_eq!(parsed, &original, "{text}");
    }

    #[test]
    fn test_serialize_format() {
        let s = Structure::new("video/x-raw")
            .with_field("width", 320)
            .with_field("format", vec!["I420", "NV12"])
            .with_field("rate", Value::IntRange { min: 0, max: 10, step: 5 });
        assert_eq!(
            serialize_structure(&s),
            "video/x-raw, width=(int)320, format=(string){ I420, NV12 }, rate=(int)[ 0, 10, 5 ]"
        );
    }
}
