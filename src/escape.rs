//! Quoting helpers shared by the exposition codec and the PromQL renderer.
use std::{
    borrow::Cow,
    fmt::{
        Display,
        Write,
    },
};

/// Resolve backslash escapes in a quoted value (without its quotes).
///
/// `\n`, `\t`, `\r`, `\\`, `\"` and `\'` are resolved. Any other escape is kept verbatim.
pub(crate) fn unescape(raw: &str) -> Cow<'_, str> {
    if !raw.contains('\\') {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(ch @ ('\\' | '"' | '\'')) => out.push(ch),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

/// Escape a label value for the exposition format: `\`, `"` and new lines.
pub(crate) fn escape_label_value(value: &str) -> Cow<'_, str> {
    escape_with(value, |ch| matches!(ch, '\\' | '"' | '\n'))
}

/// Escape a HELP text for the exposition format: `\` and new lines.
pub(crate) fn escape_help(text: &str) -> Cow<'_, str> {
    escape_with(text, |ch| matches!(ch, '\\' | '\n'))
}

fn escape_with(value: &str, needs_escape: impl Fn(char) -> bool) -> Cow<'_, str> {
    if !value.chars().any(&needs_escape) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\n' if needs_escape(ch) => out.push_str("\\n"),
            ch if needs_escape(ch) => {
                out.push('\\');
                out.push(ch);
            }
            ch => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// A PromQL string literal: the value wrapped in double quotes with escapes applied.
pub(crate) struct Quoted<'a>(pub &'a str);

impl Display for Quoted<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('"')?;
        for ch in self.0.chars() {
            match ch {
                '"' => f.write_str("\\\"")?,
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\t' => f.write_str("\\t")?,
                '\r' => f.write_str("\\r")?,
                ch => f.write_char(ch)?,
            }
        }
        f.write_char('"')
    }
}
