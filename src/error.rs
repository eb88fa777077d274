use miette::{miette, Report, Severity};

// Assembly errors. Every diagnostic raised while processing source carries
// the line number it originated from; assembly keeps going afterwards.

pub fn unable_to_open(path: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::io",
        "unable to open {path}",
    )
}

pub fn unable_to_write(path: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::io",
        "unable to write {path}",
    )
}

pub fn unknown_directive(line: usize, directive: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::directive",
        help = "available directives: .org .word .byte .ascii .asciiz .fill .const .equ",
        "line {line}: unknown directive {directive}",
    )
}

pub fn invalid_org(line: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::org",
        help = ".org takes a numeric address or an already defined symbol",
        "line {line}: invalid .org argument",
    )
}

pub fn org_backwards(line: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::org",
        help = "emission is strictly forward; reorder sections so addresses only grow",
        "line {line}: .org may not move the location counter backwards",
    )
}

pub fn invalid_string_literal(line: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::str_lit",
        help = "string literals are delimited by double quotes, e.g. .ascii \"text\"",
        "line {line}: invalid string literal",
    )
}

pub fn fill_expects_pair(line: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::fill",
        ".fill expects count, value on line {line}",
    )
}

pub fn invalid_fill(line: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::fill",
        help = "both count and value must resolve immediately; forward references are not allowed here",
        "line {line}: invalid .fill argument",
    )
}

pub fn const_expects_pair(line: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::const",
        ".const expects name, value on line {line}",
    )
}

pub fn invalid_const_value(line: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::const",
        "line {line}: invalid constant value",
    )
}

pub fn unknown_mnemonic(line: usize, mnemonic: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::mnemonic",
        help = "check the instruction list for supported mnemonics",
        "line {line}: unknown mnemonic {mnemonic}",
    )
}

pub fn operand_count(line: usize, expected: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::operands",
        "line {line}: expected {expected} operands",
    )
}

pub fn malformed_operand(line: usize, token: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::operands",
        help = "operands are registers, [indirect], [indexed +/- offset], [absolute], #immediates, port ids or symbols",
        "line {line}: malformed operand {token}",
    )
}

// Symbol resolution errors, reported once the whole source has been seen.

pub fn unresolved_symbol(symbol: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::symbol",
        help = "labels must be defined somewhere in the file; constants before use",
        "unresolved symbol: {symbol}",
    )
}

pub fn invalid_patch_location(symbol: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::symbol",
        "invalid patch location for symbol: {symbol}",
    )
}

// Emulator errors.

pub fn image_out_of_range(origin: u16, len: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "emu::load",
        help = "origin plus image size must stay within the 64 KiB address space",
        "image of {len} bytes does not fit at origin {origin:#06X}",
    )
}

pub fn dump_out_of_range() -> Report {
    miette!(
        severity = Severity::Error,
        code = "emu::dump",
        "dump request outside memory bounds",
    )
}
