//! Directive argument parsing.
//!
//! A directive body is a whitespace-separated list of `key=value` pairs.
//! Bare keys are converted from `snake_case` to `camelCase`; single-quoted
//! keys are kept verbatim.  Values may be double-quoted, single-quoted or
//! bare; only bare values are coerced to booleans and numbers.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Number(f64),
    Bool(bool),
}

impl ArgValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Render the value as text whatever its type (`id=42` is still an id).
    pub fn to_text(&self) -> String {
        match self {
            ArgValue::Str(s) => s.clone(),
            ArgValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            ArgValue::Number(n) => n.to_string(),
            ArgValue::Bool(b) => b.to_string(),
        }
    }
}

pub type ArgMap = BTreeMap<String, ArgValue>;

/// Parse the arguments of a full directive match such as
/// `{{#selector key_one=val1 flag=false}}`.
pub fn parse_args(raw: &str, name: &str) -> ArgMap {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("{{#")
        .and_then(|rest| rest.strip_prefix(name))
        .unwrap_or(trimmed);
    let body = body.strip_suffix("}}").unwrap_or(body);
    parse_arg_body(body)
}

/// Parse a directive body (the text between the name and the closing braces).
pub fn parse_arg_body(body: &str) -> ArgMap {
    let mut args = ArgMap::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let key = if first == '\'' {
            chars.next();
            take_until(&mut chars, '\'')
        } else {
            let mut bare = String::new();
            while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
                bare.push(c);
            }
            snake_to_camel(&bare)
        };

        // Tokens without `=` carry no value and are ignored.
        if chars.next_if_eq(&'=').is_none() {
            continue;
        }

        let value = match chars.peek() {
            Some(&quote @ ('"' | '\'')) => {
                chars.next();
                ArgValue::Str(take_until(&mut chars, quote))
            }
            _ => {
                let mut bare = String::new();
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    bare.push(c);
                }
                coerce(&bare)
            }
        };

        if !key.is_empty() {
            args.insert(key, value);
        }
    }

    args
}

/// Split a comma-separated list.  Quoted items are kept exactly (commas
/// and spaces included); bare items are trimmed and empty ones dropped.
pub fn parse_list(raw: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;

    for c in raw.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '"' | '\'' if !quoted && current.trim().is_empty() => {
                    current.clear();
                    quote = Some(c);
                    quoted = true;
                }
                ',' => {
                    push_item(&mut items, &mut current, quoted);
                    quoted = false;
                }
                // Anything between a closing quote and the next comma.
                _ if quoted => {}
                _ => current.push(c),
            },
        }
    }
    push_item(&mut items, &mut current, quoted);

    items
}

fn push_item(items: &mut Vec<String>, current: &mut String, quoted: bool) {
    let item = std::mem::take(current);
    if quoted {
        items.push(item);
    } else {
        let trimmed = item.trim();
        if !trimmed.is_empty() {
            items.push(trimmed.to_owned());
        }
    }
}

/// Consume characters up to (and including) `end`.  An unterminated quote
/// runs to the end of input.
fn take_until(chars: &mut Peekable<Chars<'_>>, end: char) -> String {
    let mut out = String::new();
    for c in chars.by_ref() {
        if c == end {
            break;
        }
        out.push(c);
    }
    out
}

fn coerce(raw: &str) -> ArgValue {
    match raw {
        "true" => return ArgValue::Bool(true),
        "false" => return ArgValue::Bool(false),
        _ => {}
    }

    let numeric_shape = raw.chars().any(|c| c.is_ascii_digit())
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
    if numeric_shape {
        if let Ok(n) = raw.parse::<f64>() {
            if n.is_finite() {
                return ArgValue::Number(n);
            }
        }
    }

    ArgValue::Str(raw.to_owned())
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        upper_next = false;
    }
    out
}
