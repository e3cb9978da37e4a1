//! Launch description parser using winnow.
//!
//! Parses GStreamer-like pipeline descriptions:
//!
//! ```text
//! fakesrc num-buffers=10 ! identity name=id0 ! fakesink
//! memsrc ! audio/x-raw,rate=44100 ! fakesink
//! ```
//!
//! # Syntax
//!
//! - Segments are separated by `!`
//! - An element segment is a factory name followed by `name=value` properties
//! - A segment starting with `media/type` is a caps string; the launcher
//!   turns it into a capsfilter
//! - Values can be quoted strings, numbers, booleans or bare words
//! - Whitespace is optional around `!` and `=`

use crate::caps::Caps;
use crate::error::{Error, Result};
use std::str::FromStr;
use winnow::Parser;
use winnow::ascii::{alpha1, digit1, multispace0};
use winnow::combinator::{alt, delimited, opt, repeat, separated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

/// A parsed element with its factory name and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedElement {
    /// The factory name (e.g., "fakesrc", "identity").
    pub factory: String,
    /// Properties as key-value pairs, `name` included.
    pub properties: Vec<(String, PropertyValue)>,
}

impl ParsedElement {
    /// Value of the `name` property, if given.
    pub fn instance_name(&self) -> Option<String> {
        self.properties
            .iter()
            .find(|(key, _)| key == "name")
            .map(|(_, value)| value.as_string())
    }
}

/// One `!`-separated segment of a launch description.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSegment {
    /// An element to create.
    Element(ParsedElement),
    /// Caps restricting the link between its neighbours.
    Caps(Caps),
}

/// A property value in a launch description or set by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value (quoted or unquoted).
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// Get as a string, converting if necessary.
    pub fn as_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }

    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a u64.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    /// Try to get as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            PropertyValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Integer(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

/// A parsed launch description.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPipeline {
    /// The segments in order from source to sink.
    pub segments: Vec<ParsedSegment>,
}

impl ParsedPipeline {
    /// The element segments, skipping caps.
    pub fn elements(&self) -> impl Iterator<Item = &ParsedElement> {
        self.segments.iter().filter_map(|s| match s {
            ParsedSegment::Element(e) => Some(e),
            ParsedSegment::Caps(_) => None,
        })
    }
}

/// Parse a launch description string.
///
/// # Example
///
/// ```rust
/// use padflow::pipeline::parser::parse_pipeline;
///
/// let pipeline = parse_pipeline("fakesrc num-buffers=10 ! identity ! fakesink").unwrap();
/// assert_eq!(pipeline.segments.len(), 3);
/// assert_eq!(pipeline.elements().next().unwrap().factory, "fakesrc");
/// ```
pub fn parse_pipeline(input: &str) -> Result<ParsedPipeline> {
    let raw = pipeline
        .parse(input.trim())
        .map_err(|e| Error::Parse(format!("{e}")))?;
    let segments = raw
        .into_iter()
        .map(|segment| match segment {
            RawSegment::Element(e) => Ok(ParsedSegment::Element(e)),
            RawSegment::Caps(text) => Ok(ParsedSegment::Caps(Caps::from_str(text.trim())?)),
        })
        .collect::<Result<Vec<_>>>()?;
    if !matches!(segments.first(), Some(ParsedSegment::Element(_)))
        || !matches!(segments.last(), Some(ParsedSegment::Element(_)))
    {
        return Err(Error::Parse(
            "caps must sit between two elements".to_string(),
        ));
    }
    Ok(ParsedPipeline { segments })
}

enum RawSegment {
    Element(ParsedElement),
    Caps(String),
}

/// Parse a complete pipeline.
fn pipeline(input: &mut &str) -> WResult<Vec<RawSegment>> {
    let segments = separated(1.., segment, link_separator).parse_next(input)?;

    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }

    Ok(segments)
}

fn segment(input: &mut &str) -> WResult<RawSegment> {
    let _ = multispace0.parse_next(input)?;
    alt((caps_string.map(RawSegment::Caps), element.map(RawSegment::Element))).parse_next(input)
}

/// Parse a caps string: `media/type` up to the next `!`.
fn caps_string(input: &mut &str) -> WResult<String> {
    (
        identifier,
        '/',
        take_till(1.., |c: char| c == '!'),
    )
        .take()
        .map(|s: &str| s.trim_end().to_string())
        .parse_next(input)
}

/// Parse an element (factory name + optional properties).
fn element(input: &mut &str) -> WResult<ParsedElement> {
    let name: &str = identifier.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    let properties: Vec<(String, PropertyValue)> = repeat(0.., property).parse_next(input)?;

    Ok(ParsedElement {
        factory: name.to_string(),
        properties,
    })
}

/// Parse the link separator `!`.
fn link_separator(input: &mut &str) -> WResult<()> {
    let _ = multispace0.parse_next(input)?;
    let _ = '!'.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

/// Parse an identifier (factory name or property name).
fn identifier<'a>(input: &mut &'a str) -> WResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

/// Parse a property (key=value).
fn property(input: &mut &str) -> WResult<(String, PropertyValue)> {
    let _ = multispace0.parse_next(input)?;

    // Not a property unless an identifier is followed by '='
    let checkpoint = *input;

    let key: &str = match identifier.parse_next(input) {
        Ok(k) => k,
        Err(_) => {
            *input = checkpoint;
            return Err(ContextError::new());
        }
    };

    let _ = multispace0.parse_next(input)?;

    if input.starts_with('=') {
        let _ = '='.parse_next(input)?;
    } else {
        *input = checkpoint;
        return Err(ContextError::new());
    }

    let _ = multispace0.parse_next(input)?;
    let value = property_value.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    Ok((key.to_string(), value))
}

/// Parse a property value.
fn property_value(input: &mut &str) -> WResult<PropertyValue> {
    alt((
        quoted_string.map(PropertyValue::String),
        boolean.map(PropertyValue::Bool),
        float.map(PropertyValue::Float),
        integer.map(PropertyValue::Integer),
        bare_string.map(PropertyValue::String),
    ))
    .parse_next(input)
}

/// Parse a quoted string.
fn quoted_string(input: &mut &str) -> WResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(|s: &str| s.to_string())
    .parse_next(input)
}

/// Parse a boolean; it must end the word.
fn boolean(input: &mut &str) -> WResult<bool> {
    let checkpoint = *input;
    let value = alt((
        "true".map(|_| true),
        "false".map(|_| false),
        "yes".map(|_| true),
        "no".map(|_| false),
    ))
    .parse_next(input)?;
    if input.starts_with(|c: char| !c.is_whitespace() && c != '!') {
        *input = checkpoint;
        return Err(ContextError::new());
    }
    Ok(value)
}

/// Parse an integer.
fn integer(input: &mut &str) -> WResult<i64> {
    let negative = opt('-').parse_next(input)?;
    let digits: &str = digit1.parse_next(input)?;

    // A decimal point makes it a float
    if input.starts_with('.') {
        return Err(ContextError::new());
    }

    let value: i64 = digits.parse().map_err(|_| ContextError::new())?;

    Ok(if negative.is_some() { -value } else { value })
}

/// Parse a float.
fn float(input: &mut &str) -> WResult<f64> {
    let negative = opt('-').parse_next(input)?;
    let int_part: &str = digit1.parse_next(input)?;
    let _ = '.'.parse_next(input)?;
    let frac_part: &str = digit1.parse_next(input)?;

    let s = format!(
        "{}{}.{}",
        if negative.is_some() { "-" } else { "" },
        int_part,
        frac_part
    );
    s.parse().map_err(|_| ContextError::new())
}

/// Parse a bare (unquoted) string value. Stops at whitespace or `!`.
fn bare_string(input: &mut &str) -> WResult<String> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '!' && c != '=')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_at(parsed: &ParsedPipeline, index: usize) -> &ParsedElement {
        match &parsed.segments[index] {
            ParsedSegment::Element(e) => e,
            ParsedSegment::Caps(c) => panic!("expected element, got caps {c}"),
        }
    }

    #[test]
    fn test_parse_simple_element() {
        let result = parse_pipeline("fakesink").unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(element_at(&result, 0).factory, "fakesink");
        assert!(element_at(&result, 0).properties.is_empty());
    }

    #[test]
    fn test_parse_element_with_property() {
        let result = parse_pipeline("fakesrc num-buffers=100").unwrap();
        let e = element_at(&result, 0);
        assert_eq!(e.factory, "fakesrc");
        assert_eq!(
            e.properties,
            vec![("num-buffers".to_string(), PropertyValue::Integer(100))]
        );
    }

    #[test]
    fn test_parse_pipeline_chain() {
        let result = parse_pipeline("fakesrc ! identity ! fakesink").unwrap();
        let names: Vec<_> = result.elements().map(|e| e.factory.as_str()).collect();
        assert_eq!(names, vec!["fakesrc", "identity", "fakesink"]);
    }

    #[test]
    fn test_parse_instance_name() {
        let result = parse_pipeline("identity name=id0 drop-every=3").unwrap();
        assert_eq!(element_at(&result, 0).instance_name().as_deref(), Some("id0"));
    }

    #[test]
    fn test_parse_caps_segment() {
        let result =
            parse_pipeline("memsrc ! audio/x-raw,rate=(int)44100,channels=(int)2 ! fakesink")
                .unwrap();
        assert_eq!(result.segments.len(), 3);
        let ParsedSegment::Caps(caps) = &result.segments[1] else {
            panic!("expected caps");
        };
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name(), "audio/x-raw");
        assert_eq!(s.get_int("rate"), Some(44100));
    }

    #[test]
    fn test_parse_caps_at_edge_fails() {
        assert!(parse_pipeline("audio/x-raw ! fakesink").is_err());
        assert!(parse_pipeline("fakesrc ! audio/x-raw").is_err());
    }

    #[test]
    fn test_parse_quoted_string() {
        let result = parse_pipeline(r#"memsrc data="hello world""#).unwrap();
        assert_eq!(
            element_at(&result, 0).properties[0].1,
            PropertyValue::String("hello world".to_string())
        );
    }

    #[test]
    fn test_parse_boolean_property() {
        let result = parse_pipeline("fakesrc is-live=true async=no").unwrap();
        let e = element_at(&result, 0);
        assert_eq!(e.properties[0].1, PropertyValue::Bool(true));
        assert_eq!(e.properties[1].1, PropertyValue::Bool(false));
    }

    #[test]
    fn test_parse_word_starting_like_boolean() {
        let result = parse_pipeline("queue leaky=downstream").unwrap();
        assert_eq!(
            element_at(&result, 0).properties[0].1,
            PropertyValue::String("downstream".to_string())
        );
        let result = parse_pipeline("queue leaky=no").unwrap();
        assert_eq!(
            element_at(&result, 0).properties[0].1,
            PropertyValue::Bool(false)
        );
    }

    #[test]
    fn test_parse_numbers() {
        let result = parse_pipeline("element rate=1.5 offset=-100").unwrap();
        let e = element_at(&result, 0);
        assert_eq!(e.properties[0].1, PropertyValue::Float(1.5));
        assert_eq!(e.properties[1].1, PropertyValue::Integer(-100));
    }

    #[test]
    fn test_parse_spacing() {
        assert_eq!(parse_pipeline("a!b!c").unwrap().segments.len(), 3);
        assert_eq!(parse_pipeline("  a   !   b   !   c  ").unwrap().segments.len(), 3);
    }

    #[test]
    fn test_property_value_conversions() {
        let int_val = PropertyValue::from(42i64);
        assert_eq!(int_val.as_i64(), Some(42));
        assert_eq!(int_val.as_u64(), Some(42));
        assert_eq!(int_val.as_f64(), Some(42.0));
        assert_eq!(int_val.as_string(), "42");

        let float_val = PropertyValue::from(3.5);
        assert_eq!(float_val.as_f64(), Some(3.5));
        assert_eq!(float_val.as_i64(), None);

        assert_eq!(PropertyValue::from(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::from("100").as_i64(), Some(100));
        assert_eq!(PropertyValue::from(-1i64).as_u64(), None);
    }

    #[test]
    fn test_parse_failures() {
        assert!(parse_pipeline("").is_err());
        assert!(parse_pipeline("!").is_err());
        assert!(parse_pipeline("fakesrc ! ").is_err());
    }
}
