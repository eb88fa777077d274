use std::fmt;

use fxhash::FxHashMap;
use lazy_static::lazy_static;

/// Addressable space: 64 KiB behind a 16-bit address bus.
pub const MEMORY_SIZE: usize = 0x10000;
/// General purpose registers R0..R7.
pub const REGISTER_COUNT: usize = 8;
/// Program counter value after reset.
pub const RESET_VECTOR: u16 = 0x0000;
/// Stack pointer value after reset. The stack grows downwards.
pub const STACK_RESET: u16 = 0xFF00;
/// Every instruction starts with opcode + two operand bytes + modifier byte.
pub const HEADER_SIZE: u16 = 4;

/// R7 doubles as the stack pointer.
pub const STACK_REGISTER: u8 = (REGISTER_COUNT - 1) as u8;

/// Individual bits of the status register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StatusFlag {
    Carry = 1 << 0,
    Zero = 1 << 1,
    Negative = 1 << 2,
    Overflow = 1 << 3,
}

/// The 16-bit status register. Only the low four bits are defined.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    bits: u16,
}

impl Flags {
    pub fn set(&mut self, flag: StatusFlag, on: bool) {
        if on {
            self.bits |= flag as u16;
        } else {
            self.bits &= !(flag as u16);
        }
    }

    pub fn test(&self, flag: StatusFlag) -> bool {
        self.bits & flag as u16 != 0
    }

    pub fn bits(&self) -> u16 {
        self.bits
    }

    pub fn clear(&mut self) {
        self.bits = 0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}{}{}{}]",
            if self.test(StatusFlag::Carry) { 'C' } else { '-' },
            if self.test(StatusFlag::Zero) { 'Z' } else { '-' },
            if self.test(StatusFlag::Negative) { 'N' } else { '-' },
            if self.test(StatusFlag::Overflow) { 'V' } else { '-' },
        )
    }
}

/// Operation codes of the Ember-16 instruction set.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    Nop = 0x00,
    Halt = 0x01,
    Ldi = 0x02,
    Mov = 0x03,
    Load = 0x04,
    Store = 0x05,
    Add = 0x06,
    Addi = 0x07,
    Sub = 0x08,
    Subi = 0x09,
    Mul = 0x0A,
    Div = 0x0B,
    And = 0x0C,
    Or = 0x0D,
    Xor = 0x0E,
    Not = 0x0F,
    Shl = 0x10,
    Shr = 0x11,
    Cmp = 0x12,
    Jmp = 0x13,
    Jz = 0x14,
    Jnz = 0x15,
    Jn = 0x16,
    Jc = 0x17,
    Call = 0x18,
    Ret = 0x19,
    Push = 0x1A,
    Pop = 0x1B,
    Out = 0x1C,
    In = 0x1D,
    Adjsp = 0x1E,
    Sys = 0x1F,
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Decode a raw opcode byte. Anything past `SYS` is not an instruction.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => Nop,
            0x01 => Halt,
            0x02 => Ldi,
            0x03 => Mov,
            0x04 => Load,
            0x05 => Store,
            0x06 => Add,
            0x07 => Addi,
            0x08 => Sub,
            0x09 => Subi,
            0x0A => Mul,
            0x0B => Div,
            0x0C => And,
            0x0D => Or,
            0x0E => Xor,
            0x0F => Not,
            0x10 => Shl,
            0x11 => Shr,
            0x12 => Cmp,
            0x13 => Jmp,
            0x14 => Jz,
            0x15 => Jnz,
            0x16 => Jn,
            0x17 => Jc,
            0x18 => Call,
            0x19 => Ret,
            0x1A => Push,
            0x1B => Pop,
            0x1C => Out,
            0x1D => In,
            0x1E => Adjsp,
            0x1F => Sys,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Opcode::*;
        f.write_str(match self {
            Nop => "NOP",
            Halt => "HALT",
            Ldi => "LDI",
            Mov => "MOV",
            Load => "LOAD",
            Store => "STORE",
            Add => "ADD",
            Addi => "ADDI",
            Sub => "SUB",
            Subi => "SUBI",
            Mul => "MUL",
            Div => "DIV",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Not => "NOT",
            Shl => "SHL",
            Shr => "SHR",
            Cmp => "CMP",
            Jmp => "JMP",
            Jz => "JZ",
            Jnz => "JNZ",
            Jn => "JN",
            Jc => "JC",
            Call => "CALL",
            Ret => "RET",
            Push => "PUSH",
            Pop => "POP",
            Out => "OUT",
            In => "IN",
            Adjsp => "ADJSP",
            Sys => "SYS",
        })
    }
}

/// Addressing modes an operand byte can describe.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum OperandType {
    #[default]
    None = 0,
    /// Register direct, e.g. `R3`.
    Register = 1,
    /// Register indirect, e.g. `[R3]`.
    RegisterIndirect = 2,
    /// Register plus signed offset, e.g. `[R3 + 8]`. Carries an extra word.
    RegisterIndexed = 3,
    /// Immediate value, e.g. `#0x1234`. Carries an extra word.
    Immediate = 4,
    /// Absolute address, e.g. `[0x8000]`. Carries an extra word.
    Absolute = 5,
    /// I/O port id, e.g. `port:console`.
    Port = 6,
}

impl OperandType {
    /// Map the 3-bit field of an operand byte back to a type. The two
    /// unassigned encodings decode as `None`.
    pub fn from_bits(bits: u8) -> OperandType {
        use OperandType::*;
        match bits & 0x07 {
            1 => Register,
            2 => RegisterIndirect,
            3 => RegisterIndexed,
            4 => Immediate,
            5 => Absolute,
            6 => Port,
            _ => None,
        }
    }

    /// Whether operands of this type append a 16-bit word after the header.
    pub fn needs_word(self) -> bool {
        matches!(
            self,
            OperandType::Immediate | OperandType::Absolute | OperandType::RegisterIndexed
        )
    }
}

/// Type and payload unpacked from one operand byte of the header.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct OperandDescriptor {
    pub ty: OperandType,
    pub payload: u8,
}

/// Pack an operand type and 5-bit payload into a single header byte.
pub fn encode_operand(ty: OperandType, payload: u8) -> u8 {
    ((ty as u8) << 5) | (payload & 0x1F)
}

/// Unpack a header operand byte.
pub fn decode_operand(raw: u8) -> OperandDescriptor {
    OperandDescriptor {
        ty: OperandType::from_bits(raw >> 5),
        payload: raw & 0x1F,
    }
}

/// A mnemonic's opcode and how many operands it takes in source form.
#[derive(Clone, Copy, Debug)]
pub struct MnemonicInfo {
    pub opcode: Opcode,
    pub operands: usize,
}

lazy_static! {
    /// Mnemonic lookup for the assembler, keyed by uppercase name.
    pub static ref MNEMONICS: FxHashMap<&'static str, MnemonicInfo> = {
        use Opcode::*;
        let table = [
            ("NOP", Nop, 0),
            ("HALT", Halt, 0),
            ("LDI", Ldi, 2),
            ("MOV", Mov, 2),
            ("LOAD", Load, 2),
            ("STORE", Store, 2),
            ("ADD", Add, 2),
            ("ADDI", Addi, 2),
            ("SUB", Sub, 2),
            ("SUBI", Subi, 2),
            ("MUL", Mul, 2),
            ("DIV", Div, 2),
            ("AND", And, 2),
            ("OR", Or, 2),
            ("XOR", Xor, 2),
            ("NOT", Not, 1),
            ("SHL", Shl, 2),
            ("SHR", Shr, 2),
            ("CMP", Cmp, 2),
            ("JMP", Jmp, 1),
            ("JZ", Jz, 1),
            ("JNZ", Jnz, 1),
            ("JN", Jn, 1),
            ("JC", Jc, 1),
            ("CALL", Call, 1),
            ("RET", Ret, 0),
            ("PUSH", Push, 1),
            ("POP", Pop, 1),
            ("OUT", Out, 2),
            ("IN", In, 2),
            ("ADJSP", Adjsp, 1),
            ("SYS", Sys, 1),
        ];
        table
            .into_iter()
            .map(|(name, opcode, operands)| (name, MnemonicInfo { opcode, operands }))
            .collect()
    };

    /// Symbolic port names accepted after the `port` prefix, lowercase.
    pub static ref PORT_NAMES: FxHashMap<&'static str, u8> = [
        ("console", 0),
        ("console_status", 1),
        ("timer_control", 2),
        ("timer_counter", 3),
        ("leds", 4),
    ]
    .into_iter()
    .collect();
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn operand_packing_round_trip() {
        for ty_bits in 0u8..=6 {
            let ty = OperandType::from_bits(ty_bits);
            for payload in 0u8..32 {
                let packed = encode_operand(ty, payload);
                let decoded = decode_operand(packed);
                assert_eq!(decoded.ty, ty);
                assert_eq!(decoded.payload, payload);
            }
        }
    }

    #[test]
    fn operand_payload_masked() {
        let packed = encode_operand(OperandType::Register, 0xFF);
        assert_eq!(decode_operand(packed).payload, 0x1F);
    }

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0u8..=0x1F {
            let opcode = Opcode::from_byte(byte).unwrap();
            assert_eq!(opcode.as_byte(), byte);
        }
        assert_eq!(Opcode::from_byte(0x20), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn flags_set_and_test() {
        let mut flags = Flags::default();
        flags.set(StatusFlag::Carry, true);
        flags.set(StatusFlag::Negative, true);
        assert!(flags.test(StatusFlag::Carry));
        assert!(!flags.test(StatusFlag::Zero));
        assert_eq!(flags.bits(), 0b0101);
        flags.set(StatusFlag::Carry, false);
        assert_eq!(flags.bits(), 0b0100);
    }

    #[test]
    fn mnemonic_table_counts() {
        assert_eq!(MNEMONICS.len(), 32);
        assert_eq!(MNEMONICS["HALT"].operands, 0);
        assert_eq!(MNEMONICS["NOT"].operands, 1);
        assert_eq!(MNEMONICS["STORE"].operands, 2);
    }
}
