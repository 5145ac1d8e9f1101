//! Transport descriptor strings
//!
//! A descriptor names an interface and its parameters in one string:
//!
//! ```text
//! serial:/dev/ttyUSB0:baudrate=115200:parity=E
//! tcp:[2620:0:2d0:200::8]:5025:connect_timeout=2.5
//! usbtmc:vendorid=0x0957:serialnr=MY1234
//! vxi11:scope.lab.local
//! ```
//!
//! Parts are separated by `:`. A part is a bare positional value, a
//! bracketed positional value (`[...]`, for values that contain `:`), or a
//! `key=value` keyword. Positional parts fill the interface's ordered
//! positional parameters; keywords may name any parameter. Caller defaults
//! fill whatever is left, and defaults for parameters the interface does not
//! know are ignored so one table can serve every interface.

use crate::error::DescriptorError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

type ParseResult<T> = std::result::Result<T, DescriptorError>;

// =============================================================================
// Parameter types and values
// =============================================================================

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Caller-supplied default values, keyed by parameter name
///
/// May hold parameters of several interfaces at once.
pub type Defaults = BTreeMap<String, ParamValue>;

/// One declared parameter
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
}

const fn required(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: true,
    }
}

const fn optional(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: false,
    }
}

// =============================================================================
// Interfaces
// =============================================================================

/// Interfaces that can be selected by descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Serial,
    Tcp,
    Usbtmc,
    Vxi11,
}

const SERIAL_POSITIONAL: &[ParamSpec] = &[required("device", ParamType::Str)];
const SERIAL_KEYWORD: &[ParamSpec] = &[
    optional("baudrate", ParamType::Int),
    optional("bytesize", ParamType::Int),
    optional("parity", ParamType::Str),
    optional("stopbits", ParamType::Float),
    optional("rtscts", ParamType::Bool),
];

const TCP_POSITIONAL: &[ParamSpec] = &[
    required("host", ParamType::Str),
    required("port", ParamType::Int),
];
const TCP_KEYWORD: &[ParamSpec] = &[optional("connect_timeout", ParamType::Float)];

const USBTMC_KEYWORD: &[ParamSpec] = &[
    optional("vendorid", ParamType::Int),
    optional("productid", ParamType::Int),
    required("serialnr", ParamType::Str),
];

const VXI11_POSITIONAL: &[ParamSpec] = &[required("host", ParamType::Str)];
const VXI11_KEYWORD: &[ParamSpec] = &[optional("name", ParamType::Str)];

impl Interface {
    pub const ALL: [Interface; 4] = [Self::Serial, Self::Tcp, Self::Usbtmc, Self::Vxi11];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Tcp => "tcp",
            Self::Usbtmc => "usbtmc",
            Self::Vxi11 => "vxi11",
        }
    }

    /// Ordered positional parameters
    pub fn positional(&self) -> &'static [ParamSpec] {
        match self {
            Self::Serial => SERIAL_POSITIONAL,
            Self::Tcp => TCP_POSITIONAL,
            Self::Usbtmc => &[],
            Self::Vxi11 => VXI11_POSITIONAL,
        }
    }

    /// Keyword-only parameters
    pub fn keyword(&self) -> &'static [ParamSpec] {
        match self {
            Self::Serial => SERIAL_KEYWORD,
            Self::Tcp => TCP_KEYWORD,
            Self::Usbtmc => USBTMC_KEYWORD,
            Self::Vxi11 => VXI11_KEYWORD,
        }
    }

    /// Look up any parameter of this interface by name
    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.positional()
            .iter()
            .chain(self.keyword())
            .find(|p| p.name == name)
    }

    fn params(&self) -> impl Iterator<Item = &'static ParamSpec> {
        self.positional().iter().chain(self.keyword())
    }

    /// Find the interface a descriptor names (case-insensitive)
    pub fn detect(descriptor: &str) -> ParseResult<Self> {
        let parts = split_parts(descriptor)?;
        interface_name(descriptor, &parts).and_then(|name| {
            Self::ALL
                .into_iter()
                .find(|i| i.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| DescriptorError::UnknownInterface {
                    name: name.to_string(),
                })
        })
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Resolved parameters
// =============================================================================

/// Parameters resolved from a descriptor and defaults
///
/// Only parameters that were actually given (or defaulted) are present;
/// transports apply their own defaults for the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params {
    values: BTreeMap<&'static str, ParamValue>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(ParamValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(ParamValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Some(*v),
            Some(ParamValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Build validated parameters for `interface` from typed values
    ///
    /// Used by callers that hold settings rather than a string; the same
    /// type and required-parameter checks as [`parse`] apply.
    pub fn build<I, K>(interface: Interface, values: I) -> ParseResult<Self>
    where
        I: IntoIterator<Item = (K, ParamValue)>,
        K: AsRef<str>,
    {
        let mut params = Self::default();
        for (name, value) in values {
            let spec = lookup(interface, name.as_ref())?;
            let value = conform(spec, value)?;
            check_renderable(interface, spec, &value)?;
            params.insert(spec, value)?;
        }
        params.check_required(interface)?;
        Ok(params)
    }

    /// Canonical descriptor string for these parameters
    pub fn to_descriptor(&self, interface: Interface) -> String {
        let mut out = interface.name().to_string();
        for spec in interface.positional() {
            if let Some(value) = self.get(spec.name) {
                let text = value.to_string();
                out.push(':');
                if text.contains([':', '=']) {
                    out.push('[');
                    out.push_str(&text);
                    out.push(']');
                } else {
                    out.push_str(&text);
                }
            }
        }
        for spec in interface.keyword() {
            if let Some(value) = self.get(spec.name) {
                out.push(':');
                out.push_str(spec.name);
                out.push('=');
                out.push_str(&value.to_string());
            }
        }
        out
    }

    fn insert(&mut self, spec: &'static ParamSpec, value: ParamValue) -> ParseResult<()> {
        if self.values.insert(spec.name, value).is_some() {
            return Err(DescriptorError::DuplicateParameter {
                name: spec.name.to_string(),
            });
        }
        Ok(())
    }

    fn check_required(&self, interface: Interface) -> ParseResult<()> {
        match interface
            .params()
            .find(|p| p.required && !self.values.contains_key(p.name))
        {
            Some(missing) => Err(DescriptorError::MissingParameter {
                interface: interface.name(),
                name: missing.name,
            }),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// One `:`-separated part of a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
enum Part<'a> {
    Positional(&'a str),
    Keyword(&'a str, &'a str),
}

/// Parse `descriptor` as `interface`, filling gaps from `defaults`
pub fn parse(
    interface: Interface,
    descriptor: &str,
    defaults: Option<&Defaults>,
) -> ParseResult<Params> {
    let parts = split_parts(descriptor)?;
    let name = interface_name(descriptor, &parts)?;
    if !name.eq_ignore_ascii_case(interface.name()) {
        return Err(DescriptorError::InterfaceMismatch {
            expected: interface.name(),
            found: name.to_string(),
        });
    }

    let mut params = Params::default();
    let mut positional = interface.positional().iter();

    for part in &parts[1..] {
        match *part {
            Part::Positional(raw) => {
                let spec = positional
                    .next()
                    .ok_or(DescriptorError::TooManyPositionals {
                        interface: interface.name(),
                        max: interface.positional().len(),
                    })?;
                params.insert(spec, coerce(spec, raw, false)?)?;
            }
            Part::Keyword(key, raw) => {
                let spec = lookup(interface, key)?;
                params.insert(spec, coerce(spec, raw, true)?)?;
            }
        }
    }

    if let Some(defaults) = defaults {
        for (key, value) in defaults {
            let Some(spec) = interface.param(key) else {
                continue;
            };
            if !params.values.contains_key(spec.name) {
                let value = conform(spec, value.clone())?;
                check_renderable(interface, spec, &value)?;
                params.values.insert(spec.name, value);
            }
        }
    }

    params.check_required(interface)?;
    Ok(params)
}

/// Detect the interface of `descriptor` and parse it
pub fn parse_any(descriptor: &str, defaults: Option<&Defaults>) -> ParseResult<(Interface, Params)> {
    let interface = Interface::detect(descriptor)?;
    Ok((interface, parse(interface, descriptor, defaults)?))
}

fn lookup(interface: Interface, name: &str) -> ParseResult<&'static ParamSpec> {
    interface
        .param(name)
        .ok_or_else(|| DescriptorError::UnknownKeyword {
            interface: interface.name(),
            name: name.to_string(),
        })
}

fn interface_name<'a>(descriptor: &str, parts: &[Part<'a>]) -> ParseResult<&'a str> {
    match parts.first() {
        Some(Part::Positional(name)) => Ok(*name),
        Some(Part::Keyword(key, value)) => Err(DescriptorError::MalformedPart {
            descriptor: descriptor.to_string(),
            part: format!("{}={}", key, value),
        }),
        None => Err(DescriptorError::TooFewParts {
            descriptor: descriptor.to_string(),
        }),
    }
}

/// Split a descriptor into parts, honouring `[...]` brackets
fn split_parts(descriptor: &str) -> ParseResult<Vec<Part<'_>>> {
    let malformed = |part: &str| DescriptorError::MalformedPart {
        descriptor: descriptor.to_string(),
        part: part.to_string(),
    };

    let mut parts = Vec::new();
    let mut rest = descriptor;

    loop {
        let (part, tail) = if let Some(inner) = rest.strip_prefix('[') {
            let close = inner.find(']').ok_or_else(|| malformed(rest))?;
            let value = &inner[..close];
            let after = &inner[close + 1..];
            if value.is_empty() || value.contains('[') {
                return Err(malformed(&rest[..close + 2]));
            }
            if !after.is_empty() && !after.starts_with(':') {
                let end = after.find(':').unwrap_or(after.len());
                return Err(malformed(&rest[..close + 2 + end]));
            }
            (Part::Positional(value), after)
        } else {
            let end = rest.find(':').unwrap_or(rest.len());
            let raw = &rest[..end];
            if raw.is_empty() || raw.contains('[') || raw.contains(']') {
                return Err(malformed(raw));
            }
            let part = match raw.split_once('=') {
                Some((key, value)) => {
                    if !is_identifier(key) || value.is_empty() {
                        return Err(malformed(raw));
                    }
                    Part::Keyword(key, value)
                }
                None => Part::Positional(raw),
            };
            (part, &rest[end..])
        };

        parts.push(part);
        match tail.strip_prefix(':') {
            Some(next) => rest = next,
            None => break,
        }
    }

    if parts.len() < 2 {
        return Err(DescriptorError::TooFewParts {
            descriptor: descriptor.to_string(),
        });
    }
    Ok(parts)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Convert a raw descriptor string to the declared type
///
/// Integer keywords additionally accept `0x`-prefixed hexadecimal.
fn coerce(spec: &ParamSpec, raw: &str, keyword: bool) -> ParseResult<ParamValue> {
    let invalid = || DescriptorError::InvalidValue {
        name: spec.name.to_string(),
        expected: spec.ty.name(),
        raw: raw.to_string(),
    };

    match spec.ty {
        ParamType::Str => Ok(ParamValue::Str(raw.to_string())),
        ParamType::Int => {
            let hex = raw
                .strip_prefix("0x")
                .or_else(|| raw.strip_prefix("0X"))
                .filter(|_| keyword);
            match hex {
                Some(digits) => i64::from_str_radix(digits, 16),
                None => raw.parse::<i64>(),
            }
            .map(ParamValue::Int)
            .map_err(|_| invalid())
        }
        ParamType::Float => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(ParamValue::Float(v)),
            _ => Err(invalid()),
        },
        ParamType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(ParamValue::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(ParamValue::Bool(false)),
            _ => Err(invalid()),
        },
    }
}

/// Reject strings that no descriptor part could carry
///
/// Parts never contain brackets and are never empty. Positional values are
/// bracketed when they hold `:` or `=`, keyword values cannot hold `:`.
fn check_renderable(interface: Interface, spec: &ParamSpec, value: &ParamValue) -> ParseResult<()> {
    let ParamValue::Str(text) = value else {
        return Ok(());
    };
    let positional = interface.positional().iter().any(|p| p.name == spec.name);
    let (renderable, expected) = if positional {
        (!text.is_empty() && !text.contains(['[', ']']), "str without brackets")
    } else {
        (
            !text.is_empty() && !text.contains(['[', ']', ':']),
            "str without ':' or brackets",
        )
    };
    if renderable {
        Ok(())
    } else {
        Err(DescriptorError::InvalidValue {
            name: spec.name.to_string(),
            expected,
            raw: text.clone(),
        })
    }
}

/// Bring an already-typed value (from defaults) to the declared type
fn conform(spec: &ParamSpec, value: ParamValue) -> ParseResult<ParamValue> {
    match (spec.ty, value) {
        (ParamType::Str, v @ ParamValue::Str(_))
        | (ParamType::Int, v @ ParamValue::Int(_))
        | (ParamType::Bool, v @ ParamValue::Bool(_)) => Ok(v),
        (ParamType::Float, ParamValue::Float(v)) if v.is_finite() => Ok(ParamValue::Float(v)),
        (ParamType::Float, ParamValue::Int(v)) => Ok(ParamValue::Float(v as f64)),
        (_, ParamValue::Str(raw)) => coerce(spec, &raw, true),
        (ty, other) => Err(DescriptorError::InvalidValue {
            name: spec.name.to_string(),
            expected: ty.name(),
            raw: other.to_string(),
        }),
    }
}
