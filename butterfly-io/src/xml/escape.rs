//! Attribute value escaping

use std::borrow::Cow;

/// How markup characters are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeStyle {
    /// `&#34;` for everything
    Numeric,
    /// `&quot; &amp; &apos; &lt; &gt;`, numeric for the rest
    Mnemonic,
}

fn needs_numeric(c: char) -> bool {
    (c as u32) < 0x20 || matches!(c, '{' | '}' | '\u{7f}')
}

fn mnemonic(c: char) -> Option<&'static str> {
    match c {
        '"' => Some("&quot;"),
        '&' => Some("&amp;"),
        '\'' => Some("&apos;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        _ => None,
    }
}

/// Append `value` to `out`, escaped for use inside a quoted attribute
pub fn escape_into(out: &mut String, value: &str, style: EscapeStyle) {
    for c in value.chars() {
        match (style, mnemonic(c)) {
            (EscapeStyle::Mnemonic, Some(m)) => out.push_str(m),
            (EscapeStyle::Numeric, Some(_)) => push_numeric(out, c),
            (_, None) if needs_numeric(c) => push_numeric(out, c),
            (_, None) => out.push(c),
        }
    }
}

fn push_numeric(out: &mut String, c: char) {
    out.push_str("&#");
    out.push_str(&(c as u32).to_string());
    out.push(';');
}

/// Decode character references and the five predefined entities.
///
/// An `&` that does not start a known reference is kept literally.
pub fn unescape(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match decode_reference(rest) {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// `text` starts with `&`; returns the decoded char and bytes consumed
fn decode_reference(text: &str) -> Option<(char, usize)> {
    let end = text.get(1..)?.find(';')? + 1;
    let body = &text[1..end];
    let c = match body {
        "quot" => '"',
        "apos" => '\'',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        _ => {
            let number = body.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse::<u32>().ok()?,
            };
            char::from_u32(code)?
        }
    };
    Some((c, end + 1))
}
