//! Shared building blocks for the Spyre toolchain.
//!
//! The compiler, assembler, and virtual machine all consume the same token
//! stream and the same instruction encoding, so those pieces live here:
//!
//! - [`table`] - the string-keyed associative container used for every
//!   registry in the toolchain (user types, functions, labels, native
//!   callbacks)
//! - [`lexer`] - source text to token stream, shared by the source compiler
//!   and the textual assembler
//! - [`opcodes`] - opcode constants and the mnemonic/operand-count table

pub mod lexer;
pub mod opcodes;
pub mod table;

pub use lexer::{Token, TokenKind, lex_file, lex_source};
pub use table::SpyreMap;
