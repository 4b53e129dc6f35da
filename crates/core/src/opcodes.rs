//! Bytecode opcode constants and the instruction table.
//!
//! The encoding is shared by three components: the assembly emitter writes
//! mnemonics, the assembler maps mnemonics to opcodes and operand counts,
//! and the VM dispatches on the opcode byte. Each instruction is encoded as
//! a one-byte opcode followed by zero, one, or two little-endian 64-bit
//! operands.

pub const HALT: u8 = 0x00;

// Integer arithmetic
pub const IPUSH: u8 = 0x01;
pub const IPOP: u8 = 0x02;
pub const IADD: u8 = 0x03;
pub const ISUB: u8 = 0x04;
pub const IMUL: u8 = 0x05;
pub const IDIV: u8 = 0x06;

// Misc
pub const DUP: u8 = 0x20;

// Flag-to-value
pub const FEQ: u8 = 0x30;
pub const FLE: u8 = 0x31;
pub const FGE: u8 = 0x32;
pub const FLT: u8 = 0x33;
pub const FGT: u8 = 0x34;

// Local management
pub const LDL: u8 = 0x80;
pub const SVL: u8 = 0x81;
pub const DER: u8 = 0x82;
pub const RESL: u8 = 0x83;
pub const LDMBR: u8 = 0x84;
pub const SVMBR: u8 = 0x85;
pub const ARG: u8 = 0x86;
pub const SVLS: u8 = 0x87;

// Debug
pub const IPRINT: u8 = 0x90;
pub const FPRINT: u8 = 0x91;
pub const PPRINT: u8 = 0x92;
pub const FLAGS: u8 = 0x93;

// Heap and garbage collection
pub const ALLOC: u8 = 0xA0;
pub const FREE: u8 = 0xA1;
pub const TAGL: u8 = 0xA2;
pub const UNTAGL: u8 = 0xA3;
pub const UNTAGLS: u8 = 0xA4;

// Branching
pub const ITEST: u8 = 0xC0;
pub const ICMP: u8 = 0xC1;
pub const FTEST: u8 = 0xC2;
pub const FCMP: u8 = 0xC3;
pub const JMP: u8 = 0xC4;
pub const JZ: u8 = 0xC5;
pub const JNZ: u8 = 0xC6;
pub const JGT: u8 = 0xC7;
pub const JGE: u8 = 0xC8;
pub const JLT: u8 = 0xC9;
pub const JLE: u8 = 0xCA;
pub const JEQ: u8 = 0xCB;
pub const JNEQ: u8 = 0xCC;

// Calls
pub const CALL: u8 = 0xCD;
pub const CCALL: u8 = 0xCE;
pub const IRET: u8 = 0xCF;
pub const RET: u8 = 0xD0;

/// One row of the instruction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionDef {
    pub mnemonic: &'static str,
    pub opcode: u8,
    pub operands: usize,
}

const fn ins(mnemonic: &'static str, opcode: u8, operands: usize) -> InstructionDef {
    InstructionDef {
        mnemonic,
        opcode,
        operands,
    }
}

/// Every assemblable instruction. `DER`, `FPRINT`, `PPRINT`, `FTEST`, and
/// `FCMP` are reserved: the assembler accepts them but the VM reports them
/// as unimplemented.
pub const INSTRUCTIONS: &[InstructionDef] = &[
    ins("HALT", HALT, 0),
    ins("IPUSH", IPUSH, 1),
    ins("IPOP", IPOP, 0),
    ins("IADD", IADD, 0),
    ins("ISUB", ISUB, 0),
    ins("IMUL", IMUL, 0),
    ins("IDIV", IDIV, 0),
    ins("DUP", DUP, 0),
    ins("FEQ", FEQ, 0),
    ins("FLE", FLE, 0),
    ins("FGE", FGE, 0),
    ins("FLT", FLT, 0),
    ins("FGT", FGT, 0),
    ins("LDL", LDL, 1),
    ins("SVL", SVL, 1),
    ins("DER", DER, 0),
    ins("RESL", RESL, 1),
    ins("LDMBR", LDMBR, 1),
    ins("SVMBR", SVMBR, 1),
    ins("ARG", ARG, 1),
    ins("SVLS", SVLS, 0),
    ins("IPRINT", IPRINT, 0),
    ins("FPRINT", FPRINT, 0),
    ins("PPRINT", PPRINT, 0),
    ins("FLAGS", FLAGS, 0),
    ins("ALLOC", ALLOC, 1),
    ins("FREE", FREE, 0),
    ins("TAGL", TAGL, 1),
    ins("UNTAGL", UNTAGL, 1),
    ins("UNTAGLS", UNTAGLS, 1),
    ins("ITEST", ITEST, 0),
    ins("ICMP", ICMP, 0),
    ins("FTEST", FTEST, 0),
    ins("FCMP", FCMP, 0),
    ins("JMP", JMP, 1),
    ins("JZ", JZ, 1),
    ins("JNZ", JNZ, 1),
    ins("JGT", JGT, 1),
    ins("JGE", JGE, 1),
    ins("JLT", JLT, 1),
    ins("JLE", JLE, 1),
    ins("JEQ", JEQ, 1),
    ins("JNEQ", JNEQ, 1),
    ins("CALL", CALL, 2),
    ins("CCALL", CCALL, 2),
    ins("IRET", IRET, 0),
    ins("RET", RET, 0),
];

/// Look up an instruction by mnemonic (assembler direction).
pub fn by_mnemonic(mnemonic: &str) -> Option<&'static InstructionDef> {
    INSTRUCTIONS.iter().find(|i| i.mnemonic == mnemonic)
}

/// Look up an instruction by opcode byte (decoder direction).
pub fn by_opcode(opcode: u8) -> Option<&'static InstructionDef> {
    INSTRUCTIONS.iter().find(|i| i.opcode == opcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_mnemonic() {
        let def = by_mnemonic("CALL").unwrap();
        assert_eq!(def.opcode, CALL);
        assert_eq!(def.operands, 2);
        assert!(by_mnemonic("NOPE").is_none());
    }

    #[test]
    fn test_lookup_by_opcode() {
        assert_eq!(by_opcode(0xA0).unwrap().mnemonic, "ALLOC");
        assert!(by_opcode(0xFF).is_none());
    }

    #[test]
    fn test_no_duplicate_opcodes() {
        for (i, a) in INSTRUCTIONS.iter().enumerate() {
            for b in &INSTRUCTIONS[i + 1..] {
                assert_ne!(a.opcode, b.opcode, "{} and {}", a.mnemonic, b.mnemonic);
                assert_ne!(a.mnemonic, b.mnemonic);
            }
        }
    }
}
