//! Line-level scanning for the assembler: comment stripping, label
//! detection, string-aware operand splitting and literal parsing. The
//! source language is strictly line oriented, so there is no token stream;
//! each statement is carved out of its own line.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

use crate::isa::{PORT_NAMES, REGISTER_COUNT};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Check a candidate symbol name. Identifiers are ASCII only.
pub fn is_identifier(text: &str) -> bool {
    IDENTIFIER.is_match(text)
}

/// Drop a trailing `;` or `//` comment. Comment characters inside string
/// literals do not count.
pub fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'\\' if in_string => i += 1,
            b';' if !in_string => return &line[..i],
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
        i += 1;
    }
    line
}

/// Split an optional `LABEL:` prefix off a statement. The prefix only
/// counts as a label when it is a valid identifier, so `port:console`
/// operands are left alone.
pub fn split_label(text: &str) -> (Option<&str>, &str) {
    if let Some(colon) = text.find(':') {
        let candidate = text[..colon].trim();
        if is_identifier(candidate) {
            return (Some(candidate), text[colon + 1..].trim());
        }
    }
    (None, text)
}

/// Split a comma separated operand list, keeping commas inside string
/// literals. Each piece comes back trimmed; empty pieces are preserved so
/// the caller can decide whether they are an error.
pub fn split_operands(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for ch in text.chars() {
        match ch {
            '"' => {
                in_string = !in_string;
                current.push(ch);
            }
            ',' if !in_string => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Process the escapes of a string literal body (without its quotes).
/// Unknown escapes emit the escaped character verbatim.
pub fn unescape(s: &str) -> Cow<str> {
    if s.find('\\').is_none() {
        return Cow::Borrowed(s);
    }
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some(c) => result.push(c),
                None => {
                    // Trailing backslash; include it as is
                    result.push('\\');
                }
            }
        } else {
            result.push(c);
        }
    }
    Cow::Owned(result)
}

/// Parse a numeric literal: decimal, `0x`/`0X`/`$` hex, `0b`/`0B` binary,
/// or a `'c'` character literal.
pub fn parse_number(token: &str) -> Option<i32> {
    let text = token.trim();
    if text.is_empty() {
        return None;
    }

    let (body, radix) = if text.len() > 2 && (text.starts_with("0x") || text.starts_with("0X")) {
        (&text[2..], 16)
    } else if text.len() > 2 && (text.starts_with("0b") || text.starts_with("0B")) {
        (&text[2..], 2)
    } else if text.len() > 1 && text.starts_with('$') {
        (&text[1..], 16)
    } else {
        (text, 10)
    };

    if body.len() == 3 && body.starts_with('\'') && body.ends_with('\'') {
        return Some(body.as_bytes()[1] as i32);
    }

    i32::from_str_radix(body, radix).ok()
}

/// Parse a register name: `R0`..`R7`, with `SP` as an alias for `R7`.
/// `PC` is deliberately not a register operand.
pub fn parse_register(token: &str) -> Option<u8> {
    let lower = token.trim().to_lowercase();
    if lower == "sp" {
        return Some((REGISTER_COUNT - 1) as u8);
    }
    if lower == "pc" {
        return None;
    }
    let digits = lower.strip_prefix('r')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: usize = digits.parse().ok()?;
    if index < REGISTER_COUNT {
        Some(index as u8)
    } else {
        None
    }
}

/// Parse a port operand: `port:NAME`, `port.NAME`, `portNAME` or `portN`
/// with N in 0..=255. Names are case insensitive.
pub fn parse_port(token: &str) -> Option<u8> {
    let lower = token.trim().to_lowercase();
    let mut rest = lower.strip_prefix("port")?;
    if let Some(stripped) = rest.strip_prefix([':', '.']) {
        rest = stripped;
    }
    if let Some(&id) = PORT_NAMES.get(rest) {
        return Some(id);
    }
    if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(value) = rest.parse::<u16>() {
            if value <= 255 {
                return Some(value as u8);
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn comments_stripped() {
        assert_eq!(strip_comment("ADD R0, R1 ; sum"), "ADD R0, R1 ");
        assert_eq!(strip_comment("ADD R0, R1 // sum"), "ADD R0, R1 ");
        assert_eq!(strip_comment("; full line"), "");
        assert_eq!(strip_comment(".ascii \"a;b\" ; real"), ".ascii \"a;b\" ");
    }

    #[test]
    fn labels_split() {
        assert_eq!(split_label("loop: ADD R0, R1"), (Some("loop"), "ADD R0, R1"));
        assert_eq!(split_label("loop:"), (Some("loop"), ""));
        assert_eq!(split_label("OUT port:console, R0"), (None, "OUT port:console, R0"));
    }

    #[test]
    fn operands_split_string_aware() {
        assert_eq!(split_operands("R0, R1"), vec!["R0", "R1"]);
        assert_eq!(split_operands("\"a,b\", 0"), vec!["\"a,b\"", "0"]);
        assert_eq!(split_operands(""), Vec::<String>::new());
    }

    #[test]
    fn escapes_processed() {
        assert_eq!(unescape(r"a\nb"), "a\nb");
        assert_eq!(unescape(r#"say \"hi\""#), "say \"hi\"");
        assert_eq!(unescape(r"odd \q"), "odd q");
        assert_eq!(unescape("plain"), "plain");
    }

    #[test]
    fn numbers_in_every_radix() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("-3"), Some(-3));
        assert_eq!(parse_number("0x1F"), Some(31));
        assert_eq!(parse_number("0XFF00"), Some(0xFF00));
        assert_eq!(parse_number("$FF"), Some(255));
        assert_eq!(parse_number("0b101"), Some(5));
        assert_eq!(parse_number("'A'"), Some(65));
        assert_eq!(parse_number("label"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn registers_parsed() {
        assert_eq!(parse_register("R0"), Some(0));
        assert_eq!(parse_register("r5"), Some(5));
        assert_eq!(parse_register("SP"), Some(7));
        assert_eq!(parse_register("R7"), Some(7));
        assert_eq!(parse_register("PC"), None);
        assert_eq!(parse_register("R8"), None);
        assert_eq!(parse_register("rx"), None);
    }

    #[test]
    fn ports_parsed() {
        assert_eq!(parse_port("port:console"), Some(0));
        assert_eq!(parse_port("PORT:LEDS"), Some(4));
        assert_eq!(parse_port("port.timer_control"), Some(2));
        assert_eq!(parse_port("port7"), Some(7));
        assert_eq!(parse_port("port255"), Some(255));
        assert_eq!(parse_port("port256"), None);
        assert_eq!(parse_port("console"), None);
    }

    #[test]
    fn identifiers_ascii_only() {
        assert!(is_identifier("loop_1"));
        assert!(is_identifier("_tmp"));
        assert!(!is_identifier("1st"));
        assert!(!is_identifier("naïve"));
        assert!(!is_identifier(""));
    }
}
