//! Single-pass assembler for the Ember-16 source language. Bytes are
//! emitted as each line is processed; references to symbols that are not
//! known yet leave a zeroed window behind and a patch record, and the
//! patch list is walked once after the last line.
//!
//! Errors never abort an assembly: the offending line is dropped, the
//! diagnostic is recorded with its line number, and the final result
//! reports `ok = false` while still carrying the bytes emitted so far.

use std::fs;

use fxhash::FxHashMap;
use miette::Report;

use crate::error;
use crate::isa::{encode_operand, OperandType, MNEMONICS, RESET_VECTOR};
use crate::lexer::{
    is_identifier, parse_number, parse_port, parse_register, split_label, split_operands,
    strip_comment, unescape,
};

/// What an assembly run produced. `bytes` is populated even when `ok` is
/// false so callers can inspect partial output.
pub struct AsmOutput {
    pub ok: bool,
    pub bytes: Vec<u8>,
    pub errors: Vec<Report>,
}

impl AsmOutput {
    /// Rendered diagnostic messages, in the order they were recorded.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|report| report.to_string()).collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AsmOptions {
    pub origin: u16,
}

impl AsmOptions {
    pub fn with_origin(origin: u16) -> Self {
        AsmOptions { origin }
    }
}

/// A defined name. Labels carry the location counter at their definition;
/// constants carry an explicit value.
#[derive(Clone, Copy, Debug)]
struct SymbolInfo {
    value: u16,
    is_constant: bool,
}

/// A zeroed byte window waiting for a symbol value.
struct Pending {
    /// Byte offset of the window within the emitted image.
    location: usize,
    symbol: String,
    /// Indexed-offset slots apply the sign multiplier before patching.
    is_offset: bool,
    multiplier: i32,
    width: u8,
}

/// A parsed source operand, before encoding.
#[derive(Default)]
struct OperandSpec {
    ty: OperandType,
    reg: u8,
    immediate: i32,
    symbol: Option<String>,
    offset: i32,
    offset_symbol: Option<String>,
    offset_sign: i32,
}

/// The growing byte image plus the location counter that addresses it.
struct Image {
    origin: u16,
    location: u16,
    bytes: Vec<u8>,
}

impl Image {
    fn new(origin: u16) -> Self {
        Image {
            origin,
            location: origin,
            bytes: Vec::new(),
        }
    }

    /// Byte offset the next emission lands at.
    fn offset(&self) -> usize {
        self.location.wrapping_sub(self.origin) as usize
    }

    fn write_byte(&mut self, value: u8) {
        let index = self.offset();
        if self.bytes.len() <= index {
            self.bytes.resize(index + 1, 0);
        }
        self.bytes[index] = value;
        self.location = self.location.wrapping_add(1);
    }

    fn write_word(&mut self, value: u16) {
        self.write_byte((value & 0xFF) as u8);
        self.write_byte((value >> 8) as u8);
    }
}

pub struct Assembler {
    symbols: FxHashMap<String, SymbolInfo>,
    errors: Vec<Report>,
    origin: u16,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            symbols: FxHashMap::default(),
            errors: Vec::new(),
            origin: RESET_VECTOR,
        }
    }

    /// Assemble a source file from disk.
    pub fn assemble_file(&mut self, path: &str, options: AsmOptions) -> AsmOutput {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(_) => {
                return AsmOutput {
                    ok: false,
                    bytes: Vec::new(),
                    errors: vec![error::unable_to_open(path)],
                }
            }
        };
        self.assemble_source(&String::from_utf8_lossy(&raw), options)
    }

    /// Assemble source text. State from previous runs is discarded.
    pub fn assemble_source(&mut self, source: &str, options: AsmOptions) -> AsmOutput {
        self.symbols.clear();
        self.errors.clear();
        self.origin = options.origin;

        // I/O addresses every program gets for free.
        for (name, value) in [
            ("IO_CONSOLE_DATA", 0xFF00),
            ("IO_CONSOLE_STATUS", 0xFF01),
            ("IO_TIMER_COUNTER", 0xFF10),
            ("IO_TIMER_CONTROL", 0xFF12),
            ("IO_LED", 0xFF20),
        ] {
            self.symbols.insert(
                name.to_string(),
                SymbolInfo {
                    value,
                    is_constant: true,
                },
            );
        }

        let mut image = Image::new(self.origin);
        let mut pending: Vec<Pending> = Vec::new();

        for (index, raw_line) in source.lines().enumerate() {
            self.parse_line(index + 1, raw_line, &mut image, &mut pending);
        }

        self.resolve_pending(&mut image, &pending);

        AsmOutput {
            ok: self.errors.is_empty(),
            bytes: image.bytes,
            errors: std::mem::take(&mut self.errors),
        }
    }

    fn parse_line(
        &mut self,
        number: usize,
        raw_line: &str,
        image: &mut Image,
        pending: &mut Vec<Pending>,
    ) {
        let text = strip_comment(raw_line).trim();
        if text.is_empty() {
            return;
        }

        let (label, text) = split_label(text);
        if let Some(label) = label {
            self.symbols.insert(
                label.to_string(),
                SymbolInfo {
                    value: image.location,
                    is_constant: false,
                },
            );
        }
        if text.is_empty() {
            return;
        }

        if let Some(rest) = text.strip_prefix('.') {
            let (directive, remainder) = match rest.find(char::is_whitespace) {
                Some(space) => (&rest[..space], rest[space..].trim()),
                None => (rest, ""),
            };
            self.encode_directive(number, directive, remainder, image, pending);
            return;
        }

        let (mnemonic, operands) = match text.find(char::is_whitespace) {
            Some(space) => (&text[..space], text[space..].trim()),
            None => (text, ""),
        };
        self.encode_instruction(number, mnemonic, operands, image, pending);
    }

    fn encode_directive(
        &mut self,
        line: usize,
        directive: &str,
        remainder: &str,
        image: &mut Image,
        pending: &mut Vec<Pending>,
    ) {
        match directive.to_lowercase().as_str() {
            "org" => match self.parse_value(remainder) {
                Some(value) => {
                    let target = (value & 0xFFFF) as u16;
                    if target < image.location {
                        self.errors.push(error::org_backwards(line));
                        return;
                    }
                    image.location = target;
                }
                None => self.errors.push(error::invalid_org(line)),
            },
            "word" => self.emit_values(line, remainder, image, pending, 2),
            "byte" => self.emit_values(line, remainder, image, pending, 1),
            "ascii" | "asciiz" => {
                let trimmed = remainder.trim();
                if trimmed.len() < 2 || !trimmed.starts_with('"') || !trimmed.ends_with('"') {
                    self.errors.push(error::invalid_string_literal(line));
                    return;
                }
                let text = unescape(&trimmed[1..trimmed.len() - 1]);
                for byte in text.bytes() {
                    image.write_byte(byte);
                }
                if directive.eq_ignore_ascii_case("asciiz") {
                    image.write_byte(0);
                }
            }
            "fill" => {
                let parts = split_operands(remainder);
                if parts.len() != 2 {
                    self.errors.push(error::fill_expects_pair(line));
                    return;
                }
                let (count, value) = match (self.parse_value(&parts[0]), self.parse_value(&parts[1]))
                {
                    (Some(count), Some(value)) => (count, value),
                    _ => {
                        self.errors.push(error::invalid_fill(line));
                        return;
                    }
                };
                for _ in 0..count.max(0) {
                    image.write_byte((value & 0xFF) as u8);
                }
            }
            "const" | "equ" => {
                let mut parts = split_operands(remainder);
                if parts.len() == 1 {
                    // `NAME VALUE` with no comma is accepted too.
                    let pieces: Vec<&str> = parts[0].split_whitespace().collect();
                    if pieces.len() == 2 {
                        parts = pieces.iter().map(|s| s.to_string()).collect();
                    }
                }
                if parts.len() != 2 {
                    self.errors.push(error::const_expects_pair(line));
                    return;
                }
                let value = match self.parse_value(&parts[1]) {
                    Some(value) => value,
                    None => {
                        self.errors.push(error::invalid_const_value(line));
                        return;
                    }
                };
                self.symbols.insert(
                    parts[0].trim().to_string(),
                    SymbolInfo {
                        value: (value & 0xFFFF) as u16,
                        is_constant: true,
                    },
                );
            }
            _ => self
                .errors
                .push(error::unknown_directive(line, &format!(".{directive}"))),
        }
    }

    /// Shared body of `.word` and `.byte`. Unresolved identifiers leave a
    /// zeroed window of the element width behind.
    fn emit_values(
        &mut self,
        line: usize,
        remainder: &str,
        image: &mut Image,
        pending: &mut Vec<Pending>,
        width: u8,
    ) {
        for token in split_operands(remainder) {
            let cleaned = token.trim().trim_start_matches('#');
            if let Some(value) = self.parse_value(cleaned) {
                match width {
                    1 => image.write_byte((value & 0xFF) as u8),
                    _ => image.write_word((value & 0xFFFF) as u16),
                }
            } else if is_identifier(cleaned) {
                pending.push(Pending {
                    location: image.offset(),
                    symbol: cleaned.to_string(),
                    is_offset: false,
                    multiplier: 1,
                    width,
                });
                match width {
                    1 => image.write_byte(0),
                    _ => image.write_word(0),
                }
            } else {
                self.errors.push(error::malformed_operand(line, cleaned));
            }
        }
    }

    fn encode_instruction(
        &mut self,
        line: usize,
        mnemonic: &str,
        operands: &str,
        image: &mut Image,
        pending: &mut Vec<Pending>,
    ) {
        let info = match MNEMONICS.get(mnemonic.to_uppercase().as_str()) {
            Some(info) => *info,
            None => {
                self.errors.push(error::unknown_mnemonic(line, mnemonic));
                return;
            }
        };

        let tokens: Vec<String> = split_operands(operands)
            .into_iter()
            .filter(|token| !token.is_empty())
            .collect();
        if tokens.len() != info.operands {
            self.errors.push(error::operand_count(line, info.operands));
            return;
        }

        let mut specs = [OperandSpec::default(), OperandSpec::default()];
        for (slot, token) in specs.iter_mut().zip(&tokens) {
            match self.parse_operand(token) {
                Some(spec) => *slot = spec,
                None => {
                    self.errors.push(error::malformed_operand(line, token));
                    return;
                }
            }
        }
        let [spec_a, spec_b] = specs;

        image.write_byte(info.opcode.as_byte());
        image.write_byte(encode_operand(spec_a.ty, spec_a.reg));
        image.write_byte(encode_operand(spec_b.ty, spec_b.reg));
        image.write_byte(0); // reserved modifier

        // Extra words follow in operand order, matching the decoder.
        self.emit_extra_word(image, pending, &spec_a);
        self.emit_extra_word(image, pending, &spec_b);
    }

    fn emit_extra_word(&mut self, image: &mut Image, pending: &mut Vec<Pending>, spec: &OperandSpec) {
        if !spec.ty.needs_word() {
            return;
        }
        let (value, symbol, is_offset, multiplier) = match spec.ty {
            OperandType::RegisterIndexed => (
                (spec.offset & 0xFFFF) as u16,
                spec.offset_symbol.clone(),
                true,
                spec.offset_sign,
            ),
            _ => ((spec.immediate & 0xFFFF) as u16, spec.symbol.clone(), false, 1),
        };
        let location = image.offset();
        match symbol {
            Some(symbol) => {
                image.write_word(0);
                pending.push(Pending {
                    location,
                    symbol,
                    is_offset,
                    multiplier,
                    width: 2,
                });
            }
            None => image.write_word(value),
        }
    }

    /// Parse one operand token into its addressing mode. `None` means the
    /// token fits no form at all.
    fn parse_operand(&self, token: &str) -> Option<OperandSpec> {
        let text = token.trim();
        if text.is_empty() {
            return Some(OperandSpec::default());
        }

        if let Some(port) = parse_port(text) {
            return Some(OperandSpec {
                ty: OperandType::Port,
                reg: port,
                immediate: port as i32,
                ..OperandSpec::default()
            });
        }

        if text.starts_with('[') && text.ends_with(']') && text.len() >= 2 {
            let inner = text[1..text.len() - 1].trim();
            let sign_pos = inner.find(['+', '-']);
            let base_token = match sign_pos {
                Some(pos) => inner[..pos].trim(),
                None => inner,
            };
            if let Some(reg) = parse_register(base_token) {
                let Some(pos) = sign_pos else {
                    return Some(OperandSpec {
                        ty: OperandType::RegisterIndirect,
                        reg,
                        ..OperandSpec::default()
                    });
                };
                let sign = if inner.as_bytes()[pos] == b'-' { -1 } else { 1 };
                let value_token = inner[pos + 1..].trim();
                let mut spec = OperandSpec {
                    ty: OperandType::RegisterIndexed,
                    reg,
                    offset_sign: sign,
                    ..OperandSpec::default()
                };
                if let Some(value) = self.parse_value(value_token) {
                    spec.offset = value * sign;
                } else if is_identifier(value_token) {
                    spec.offset_symbol = Some(value_token.to_string());
                } else {
                    return None;
                }
                return Some(spec);
            }
            let mut spec = OperandSpec {
                ty: OperandType::Absolute,
                ..OperandSpec::default()
            };
            if let Some(value) = self.parse_value(inner) {
                spec.immediate = value;
            } else if is_identifier(inner) {
                spec.symbol = Some(inner.to_string());
            } else {
                return None;
            }
            return Some(spec);
        }

        if let Some(body) = text.strip_prefix('#') {
            let mut spec = OperandSpec {
                ty: OperandType::Immediate,
                ..OperandSpec::default()
            };
            if let Some(value) = self.parse_value(body) {
                spec.immediate = value;
            } else if is_identifier(body) {
                spec.symbol = Some(body.to_string());
            } else {
                return None;
            }
            return Some(spec);
        }

        if let Some(reg) = parse_register(text) {
            return Some(OperandSpec {
                ty: OperandType::Register,
                reg,
                ..OperandSpec::default()
            });
        }

        // Bare values and identifiers read as immediates.
        let mut spec = OperandSpec {
            ty: OperandType::Immediate,
            ..OperandSpec::default()
        };
        if let Some(value) = self.parse_value(text) {
            spec.immediate = value;
        } else if is_identifier(text) {
            spec.symbol = Some(text.to_string());
        } else {
            return None;
        }
        Some(spec)
    }

    /// Numbers parse directly; identifiers resolve through the symbol
    /// table at the point of use.
    fn parse_value(&self, token: &str) -> Option<i32> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(number) = parse_number(trimmed) {
            return Some(number);
        }
        self.symbols.get(trimmed).map(|info| info.value as i32)
    }

    fn resolve_pending(&mut self, image: &mut Image, pending: &[Pending]) {
        for entry in pending {
            let info = match self.symbols.get(&entry.symbol) {
                Some(info) => info,
                None => {
                    self.errors.push(error::unresolved_symbol(&entry.symbol));
                    continue;
                }
            };
            let mut value = info.value;
            if entry.is_offset {
                let signed = info.value as i32 * entry.multiplier;
                value = (signed & 0xFFFF) as u16;
            }
            if entry.location + entry.width as usize > image.bytes.len() {
                self.errors.push(error::invalid_patch_location(&entry.symbol));
                continue;
            }
            image.bytes[entry.location] = (value & 0xFF) as u8;
            if entry.width == 2 {
                image.bytes[entry.location + 1] = (value >> 8) as u8;
            }
        }
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Assembler::new()
    }
}
