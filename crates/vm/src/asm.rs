//! Assembler: textual Spyre assembly to a bytecode image.
//!
//! The input is tokenized by the shared lexer, so the surface is
//! line-insensitive: an instruction is a mnemonic followed by as many
//! operands as the instruction table declares. `NAME:` defines a label at
//! the current write offset; `label: db "text"` emits the raw bytes of the
//! string plus a terminating zero.
//!
//! Label references are resolved in a single pass with forward patching:
//! a reference to a not-yet-defined label reserves eight zero bytes and is
//! recorded on a pending list; after the whole input is consumed every
//! pending entry is backfilled with the label's final offset. Labels that
//! never get defined are fatal.

use spyre_core::lexer::{self, Token, TokenKind};
use spyre_core::opcodes;
use spyre_core::SpyreMap;
use std::path::Path;

struct Assembler {
    tokens: Vec<Token>,
    pos: usize,
    filename: String,
    out: Vec<u8>,
    labels: SpyreMap<usize>,
    /// (label name, patch offset) for forward references.
    pending: Vec<(String, usize)>,
}

/// Assemble in-memory assembly text into a bytecode image.
pub fn assemble_source(source: &str, filename: &str) -> Result<Vec<u8>, String> {
    let tokens = lexer::lex_source(source, filename)?;
    Assembler::new(tokens, filename).run()
}

/// Assemble `input` and write the image to `output`.
pub fn assemble_file(input: &Path, output: &Path) -> Result<(), String> {
    let tokens = lexer::lex_file(input)?;
    let image = Assembler::new(tokens, &input.display().to_string()).run()?;
    std::fs::write(output, image)
        .map_err(|e| format!("couldn't open '{}' for writing: {}", output.display(), e))
}

impl Assembler {
    fn new(tokens: Vec<Token>, filename: &str) -> Self {
        Assembler {
            tokens,
            pos: 0,
            filename: filename.to_string(),
            out: Vec::new(),
            labels: SpyreMap::new(),
            pending: Vec::new(),
        }
    }

    fn err(&self, message: &str) -> String {
        let line = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(0);
        format!(
            "assembly error: {} (line {}, file {})",
            message, line, self.filename
        )
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn write_u8(&mut self, byte: u8) {
        self.out.push(byte);
    }

    fn write_i64(&mut self, value: i64) {
        self.out.extend_from_slice(&value.to_le_bytes());
    }

    fn write_f64(&mut self, value: f64) {
        self.out.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    fn run(mut self) -> Result<Vec<u8>, String> {
        while self.pos < self.tokens.len() {
            let is_identifier = matches!(self.tokens[self.pos].kind, TokenKind::Identifier);
            let is_db = is_identifier && self.tokens[self.pos].text == "db";
            let next_is_colon = self
                .tokens
                .get(self.pos + 1)
                .is_some_and(|t| t.is_operator(b':'));

            if is_identifier && next_is_colon {
                self.register_label();
            } else if is_db {
                self.read_db()?;
            } else {
                self.read_instruction()?;
            }
        }

        self.patch_pending()?;
        Ok(self.out)
    }

    /// `NAME:` records the current write offset under the label name.
    fn register_label(&mut self) {
        let name = self.tokens[self.pos].text.clone();
        let offset = self.out.len();
        self.labels.insert(&name, offset);
        self.pos += 2;
    }

    /// `db "text"` emits the string bytes plus a terminating zero, tagged
    /// under the preceding label.
    fn read_db(&mut self) -> Result<(), String> {
        self.pos += 1;
        let Some(token) = self.current() else {
            return Err(self.err("expected string to follow 'db'"));
        };
        if !matches!(token.kind, TokenKind::StringLit) {
            return Err(self.err("expected string to follow 'db'"));
        }
        let text = token.text.clone();
        self.out.extend_from_slice(text.as_bytes());
        self.write_u8(0);
        self.pos += 1;
        Ok(())
    }

    fn read_instruction(&mut self) -> Result<(), String> {
        let Some(token) = self.current() else {
            return Ok(());
        };
        if !matches!(token.kind, TokenKind::Identifier) {
            return Err(self.err(&format!("expected instruction, got '{}'", token.text)));
        }

        let Some(def) = opcodes::by_mnemonic(&token.text) else {
            return Err(self.err(&format!("invalid instruction '{}'", token.text)));
        };
        self.pos += 1;
        self.write_u8(def.opcode);

        for _ in 0..def.operands {
            let Some(operand) = self.current().cloned() else {
                return Err(self.err(&format!(
                    "expected operand for instruction '{}'",
                    def.mnemonic
                )));
            };
            match operand.kind {
                TokenKind::Integer(value) | TokenKind::CharLit(value) => self.write_i64(value),
                TokenKind::Float(value) => self.write_f64(value),
                TokenKind::Identifier => {
                    if let Some(offset) = self.labels.get(&operand.text) {
                        self.write_i64(*offset as i64);
                    } else {
                        // Forward reference: reserve the operand and patch
                        // after the input is consumed.
                        self.pending.push((operand.text.clone(), self.out.len()));
                        self.write_i64(0);
                    }
                }
                _ => {
                    return Err(self.err(&format!("invalid operand '{}'", operand.text)));
                }
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn patch_pending(&mut self) -> Result<(), String> {
        for (name, patch_at) in std::mem::take(&mut self.pending) {
            let Some(offset) = self.labels.get(&name) else {
                return Err(format!(
                    "assembly error: unknown label '{}' (file {})",
                    name, self.filename
                ));
            };
            self.out[patch_at..patch_at + 8].copy_from_slice(&(*offset as i64).to_le_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyre_core::opcodes as ins;

    /// Decode an image back into (opcode, operand-count) pairs using the
    /// instruction table; db sections would confuse this, so tests that
    /// use it stick to pure code.
    fn decode_opcodes(image: &[u8]) -> Vec<u8> {
        let mut at = 0;
        let mut decoded = Vec::new();
        while at < image.len() {
            let def = opcodes::by_opcode(image[at]).expect("undecodable opcode");
            decoded.push(def.opcode);
            at += 1 + 8 * def.operands;
        }
        decoded
    }

    #[test]
    fn test_simple_encoding() {
        let image = assemble_source("IPUSH 7 IPUSH 3 IADD HALT", "t").unwrap();
        assert_eq!(image[0], ins::IPUSH);
        assert_eq!(i64::from_le_bytes(image[1..9].try_into().unwrap()), 7);
        assert_eq!(image[9], ins::IPUSH);
        assert_eq!(i64::from_le_bytes(image[10..18].try_into().unwrap()), 3);
        assert_eq!(image[18], ins::IADD);
        assert_eq!(image[19], ins::HALT);
        assert_eq!(image.len(), 20);
    }

    #[test]
    fn test_mnemonic_roundtrip() {
        // Assembling a program with no labels yields bytecode whose decoded
        // opcodes match the source mnemonics in order.
        let source = "IPUSH 1 IPUSH 2 IADD DUP IPOP ITEST HALT";
        let image = assemble_source(source, "t").unwrap();
        let decoded = decode_opcodes(&image);
        assert_eq!(
            decoded,
            vec![
                ins::IPUSH,
                ins::IPUSH,
                ins::IADD,
                ins::DUP,
                ins::IPOP,
                ins::ITEST,
                ins::HALT
            ]
        );
    }

    #[test]
    fn test_backward_label_reference() {
        let image = assemble_source("top: IPUSH 1 JMP top", "t").unwrap();
        // JMP operand holds the label's byte offset (0).
        let operand = i64::from_le_bytes(image[10..18].try_into().unwrap());
        assert_eq!(operand, 0);
    }

    #[test]
    fn test_forward_label_is_backfilled() {
        let image = assemble_source("JMP end IPUSH 1 end: HALT", "t").unwrap();
        // Layout: JMP(1+8) IPUSH(1+8) HALT => 'end' is at offset 18.
        let operand = i64::from_le_bytes(image[1..9].try_into().unwrap());
        assert_eq!(operand, 18);
        assert_eq!(image[18], ins::HALT);
    }

    #[test]
    fn test_branch_operands_equal_label_offsets() {
        let source = "\
JMP start
mid: IPUSH 2 HALT
start: JZ mid JMP mid";
        let image = assemble_source(source, "t").unwrap();
        // mid is at offset 9 (after JMP).
        let jmp0 = i64::from_le_bytes(image[1..9].try_into().unwrap());
        assert_eq!(image[jmp0 as usize], ins::JZ);
        let jz_operand = i64::from_le_bytes(image[jmp0 as usize + 1..jmp0 as usize + 9].try_into().unwrap());
        assert_eq!(jz_operand, 9);
        let jmp_operand = i64::from_le_bytes(
            image[jmp0 as usize + 10..jmp0 as usize + 18].try_into().unwrap(),
        );
        assert_eq!(jmp_operand, 9);
    }

    #[test]
    fn test_db_emits_bytes_with_terminator() {
        let image = assemble_source("Point: db \"Point\" HALT", "t").unwrap();
        assert_eq!(&image[0..5], b"Point");
        assert_eq!(image[5], 0);
        assert_eq!(image[6], ins::HALT);
    }

    #[test]
    fn test_db_label_used_as_operand() {
        let image = assemble_source(
            "JMP go\nPoint: db \"Point\"\ngo: ALLOC Point HALT",
            "t",
        )
        .unwrap();
        // The ALLOC operand points at the db bytes (offset 9).
        let go = 9 + 6; // JMP is 9 bytes, "Point\0" is 6
        assert_eq!(image[go], ins::ALLOC);
        let operand = i64::from_le_bytes(image[go + 1..go + 9].try_into().unwrap());
        assert_eq!(operand, 9);
        assert_eq!(&image[9..14], b"Point");
    }

    #[test]
    fn test_two_operand_instruction() {
        let image = assemble_source("f: IPUSH 1 IRET CALL f 2 HALT", "t").unwrap();
        let call_at = 10;
        assert_eq!(image[call_at], ins::CALL);
        let addr = i64::from_le_bytes(image[call_at + 1..call_at + 9].try_into().unwrap());
        let nargs = i64::from_le_bytes(image[call_at + 9..call_at + 17].try_into().unwrap());
        assert_eq!(addr, 0);
        assert_eq!(nargs, 2);
    }

    #[test]
    fn test_float_operand_encoding() {
        let image = assemble_source("IPUSH 2.5 HALT", "t").unwrap();
        let bits = u64::from_le_bytes(image[1..9].try_into().unwrap());
        assert_eq!(f64::from_bits(bits), 2.5);
    }

    #[test]
    fn test_unknown_instruction() {
        let err = assemble_source("FLY 1", "t").unwrap_err();
        assert!(err.contains("invalid instruction 'FLY'"));
    }

    #[test]
    fn test_missing_operand() {
        let err = assemble_source("IPUSH", "t").unwrap_err();
        assert!(err.contains("expected operand"));
    }

    #[test]
    fn test_invalid_operand() {
        let err = assemble_source("IPUSH \"text\"", "t").unwrap_err();
        assert!(err.contains("invalid operand"));
    }

    #[test]
    fn test_unresolved_label_is_fatal() {
        let err = assemble_source("JMP nowhere HALT", "t").unwrap_err();
        assert!(err.contains("unknown label 'nowhere'"));
    }

    #[test]
    fn test_assemble_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("prog.spys");
        let output = dir.path().join("prog.spyb");
        std::fs::write(&input, "IPUSH 9 HALT").unwrap();

        assemble_file(&input, &output).unwrap();
        let image = std::fs::read(&output).unwrap();
        assert_eq!(image[0], ins::IPUSH);
        assert_eq!(i64::from_le_bytes(image[1..9].try_into().unwrap()), 9);
    }
}
