//! Lexer shared by the source compiler and the textual assembler.
//!
//! Turns a source file into an ordered token stream. Numbers, identifiers,
//! keywords, string/character literals, and operators are recognized here;
//! everything downstream (statement parsing, the shunting-yard expression
//! parser, the assembler) works purely on tokens.
//!
//! Operators carry a one-byte code: single-character operators use their
//! ASCII value, multi-character operators use the dedicated codes in [`op`].

use std::fs;
use std::path::Path;

/// Maximum character length of a numeric literal.
const MAX_NUMBER_LENGTH: usize = 64;

/// Operator codes for multi-character operators, plus the pseudo-operators
/// the expression parser keys its precedence table on. Single-character
/// operators use their ASCII code, so these start above the ASCII range.
pub mod op {
    pub const NULL: u8 = 0;

    pub const GE: u8 = 0x80;
    pub const LE: u8 = 0x81;
    pub const EQ: u8 = 0x82;
    pub const NEQ: u8 = 0x83;
    pub const SHR_BY: u8 = 0x84;
    pub const SHL_BY: u8 = 0x85;
    pub const ADD_BY: u8 = 0x86;
    pub const SUB_BY: u8 = 0x87;
    pub const MUL_BY: u8 = 0x88;
    pub const DIV_BY: u8 = 0x89;
    pub const MOD_BY: u8 = 0x8A;
    pub const XOR_BY: u8 = 0x8B;
    pub const OR_BY: u8 = 0x8C;
    pub const AND_BY: u8 = 0x8D;
    pub const INC: u8 = 0x8E;
    pub const DEC: u8 = 0x8F;
    pub const SHR: u8 = 0x90;
    pub const SHL: u8 = 0x91;
    pub const LOG_AND: u8 = 0x92;
    pub const LOG_OR: u8 = 0x93;
    pub const ARROW: u8 = 0x94;

    /// Pseudo-operator for function application, pushed by the expression
    /// parser when `(` follows an identifier.
    pub const CALL: u8 = 0x95;
    /// Pseudo-operator for array indexing (`[`).
    pub const INDEX: u8 = 0x96;
}

/// Multi-character operator spellings, longest-prefix first so `>>=` is
/// never split into `>>` `=`.
const MULTI_OPERATORS: &[(&str, u8)] = &[
    (">>=", op::SHR_BY),
    ("<<=", op::SHL_BY),
    (">>", op::SHR),
    ("<<", op::SHL),
    (">=", op::GE),
    ("<=", op::LE),
    ("==", op::EQ),
    ("!=", op::NEQ),
    ("+=", op::ADD_BY),
    ("-=", op::SUB_BY),
    ("*=", op::MUL_BY),
    ("/=", op::DIV_BY),
    ("%=", op::MOD_BY),
    ("^=", op::XOR_BY),
    ("|=", op::OR_BY),
    ("&=", op::AND_BY),
    ("++", op::INC),
    ("--", op::DEC),
    ("&&", op::LOG_AND),
    ("||", op::LOG_OR),
    ("->", op::ARROW),
];

/// Spelling of an operator code, used for token rendering and diagnostics.
pub fn operator_spelling(code: u8) -> String {
    for (spelling, c) in MULTI_OPERATORS {
        if *c == code {
            return (*spelling).to_string();
        }
    }
    (code as char).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier; the spelling is the token's `text`.
    Identifier,
    /// Operator with its one-byte code.
    Operator(u8),
    Integer(i64),
    Float(f64),
    /// String literal; `text` holds the contents without quotes. No escape
    /// processing is performed.
    StringLit,
    /// Character literal, carried as its integer value.
    CharLit(i64),
    If,
    Else,
    While,
    Break,
    Continue,
    Do,
    Return,
}

/// One lexed token: kind, source line, and a printable rendering.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub text: String,
}

impl Token {
    pub fn is_operator(&self, code: u8) -> bool {
        matches!(self.kind, TokenKind::Operator(c) if c == code)
    }

    pub fn operator_code(&self) -> Option<u8> {
        match self.kind {
            TokenKind::Operator(c) => Some(c),
            _ => None,
        }
    }
}

/// Tokens compare against their printable rendering, so parser code can say
/// `tok == "struct"` or `tok == ";"`.
impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

/// Render a float so it always re-lexes as a float (a bare "3" would come
/// back as an integer).
fn render_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

struct Lexer<'a> {
    src: &'a [u8],
    filename: &'a str,
    index: usize,
    line: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, filename: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            filename,
            index: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    fn err(&self, message: &str) -> String {
        format!(
            "lex error: {} (line {}, file {})",
            message, self.line, self.filename
        )
    }

    fn at(&self) -> Option<u8> {
        self.src.get(self.index).copied()
    }

    fn peek(&self, n: usize) -> Option<u8> {
        self.src.get(self.index + n).copied()
    }

    fn push(&mut self, kind: TokenKind, text: String) {
        self.tokens.push(Token {
            kind,
            line: self.line,
            text,
        });
    }

    /// Looks ahead from a digit to decide integer vs. float: a digit run is
    /// a float iff it is immediately followed by `.` and another digit.
    fn number_is_float(&self) -> Result<bool, String> {
        let mut p = 1;
        loop {
            match self.peek(p) {
                Some(b'.') => {
                    if !self.peek(p + 1).is_some_and(|c| c.is_ascii_digit()) {
                        return Err(self.err("malformed floating point literal"));
                    }
                    return Ok(true);
                }
                Some(c) if c.is_ascii_digit() => p += 1,
                _ => return Ok(false),
            }
        }
    }

    fn read_integer(&mut self) -> Result<(), String> {
        let start = self.index;
        while self.at().is_some_and(|c| c.is_ascii_digit()) {
            self.index += 1;
            if self.index - start > MAX_NUMBER_LENGTH {
                return Err(self.err("integer literal is too long"));
            }
        }
        let digits = std::str::from_utf8(&self.src[start..self.index]).unwrap();
        let value: i64 = digits
            .parse()
            .map_err(|_| self.err("malformed integer literal"))?;
        self.push(TokenKind::Integer(value), value.to_string());
        Ok(())
    }

    fn read_float(&mut self) -> Result<(), String> {
        let start = self.index;
        let mut seen_decimal = false;
        while let Some(c) = self.at() {
            if c == b'.' {
                if seen_decimal {
                    break;
                }
                seen_decimal = true;
            } else if !c.is_ascii_digit() {
                break;
            }
            self.index += 1;
            if self.index - start > MAX_NUMBER_LENGTH {
                return Err(self.err("float literal is too long"));
            }
        }
        let digits = std::str::from_utf8(&self.src[start..self.index]).unwrap();
        let value: f64 = digits
            .parse()
            .map_err(|_| self.err("malformed floating point literal"))?;
        self.push(TokenKind::Float(value), render_float(value));
        Ok(())
    }

    fn read_identifier(&mut self) {
        let start = self.index;
        while self
            .at()
            .is_some_and(|c| c == b'_' || c.is_ascii_alphanumeric())
        {
            self.index += 1;
        }
        let word = std::str::from_utf8(&self.src[start..self.index])
            .unwrap()
            .to_string();

        let kind = match word.as_str() {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "do" => TokenKind::Do,
            "return" => TokenKind::Return,
            _ => TokenKind::Identifier,
        };
        self.push(kind, word);
    }

    fn read_operator(&mut self) {
        let rest = &self.src[self.index..];
        for (spelling, code) in MULTI_OPERATORS {
            if rest.starts_with(spelling.as_bytes()) {
                self.index += spelling.len();
                self.push(TokenKind::Operator(*code), (*spelling).to_string());
                return;
            }
        }
        let c = self.src[self.index];
        self.index += 1;
        self.push(TokenKind::Operator(c), (c as char).to_string());
    }

    fn read_string_literal(&mut self) -> Result<(), String> {
        // Jump over the opening quote.
        self.index += 1;
        let start = self.index;
        loop {
            match self.at() {
                None => return Err(self.err("unterminated string literal")),
                Some(b'"') => break,
                Some(_) => self.index += 1,
            }
        }
        let contents = std::str::from_utf8(&self.src[start..self.index])
            .map_err(|_| self.err("string literal is not valid UTF-8"))?
            .to_string();
        self.index += 1;
        self.push(TokenKind::StringLit, contents);
        Ok(())
    }

    fn read_character_literal(&mut self) -> Result<(), String> {
        self.index += 1;
        let value = match self.at() {
            Some(c) => i64::from(c),
            None => return Err(self.err("malformed character literal")),
        };
        self.index += 1;
        if self.at() != Some(b'\'') {
            return Err(self.err("malformed character literal"));
        }
        self.index += 1;
        self.push(TokenKind::CharLit(value), value.to_string());
        Ok(())
    }

    fn run(mut self) -> Result<Vec<Token>, String> {
        while let Some(c) = self.at() {
            if c == b' ' || c == b'\t' || c == b'\r' {
                self.index += 1;
            } else if c == b'\n' {
                self.line += 1;
                self.index += 1;
            } else if c.is_ascii_digit() {
                if self.number_is_float()? {
                    self.read_float()?;
                } else {
                    self.read_integer()?;
                }
            } else if c == b'"' {
                self.read_string_literal()?;
            } else if c == b'\'' {
                self.read_character_literal()?;
            } else if c == b'_' || c.is_ascii_alphabetic() {
                self.read_identifier();
            } else if c.is_ascii_punctuation() {
                self.read_operator();
            } else {
                return Err(self.err(&format!("unexpected character '{}'", c as char)));
            }
        }
        Ok(self.tokens)
    }
}

/// Lex in-memory source text. `filename` appears in diagnostics only.
pub fn lex_source(source: &str, filename: &str) -> Result<Vec<Token>, String> {
    Lexer::new(source, filename).run()
}

/// Lex a file from disk.
pub fn lex_file(path: &Path) -> Result<Vec<Token>, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("couldn't open '{}' for reading: {}", path.display(), e))?;
    lex_source(&contents, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        lex_source(src, "test.spy").unwrap()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = lex("if else while break continue do return iffy _x x9");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::Break,
                TokenKind::Continue,
                TokenKind::Do,
                TokenKind::Return,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
            ]
        );
        // Keyword recognition must respect identifier boundaries.
        assert_eq!(tokens[7].text, "iffy");
    }

    #[test]
    fn test_integer_vs_float() {
        let tokens = lex("42 3.5 10.0 7");
        assert_eq!(tokens[0].kind, TokenKind::Integer(42));
        assert_eq!(tokens[1].kind, TokenKind::Float(3.5));
        assert_eq!(tokens[2].kind, TokenKind::Float(10.0));
        assert_eq!(tokens[3].kind, TokenKind::Integer(7));
    }

    #[test]
    fn test_digit_dot_without_digit_is_error() {
        // `3.` with no following digit is a malformed float, not `3` then `.`.
        assert!(lex_source("3.x", "t").is_err());
    }

    #[test]
    fn test_multi_character_operators() {
        let tokens = lex("a >= b == c -> d >>= e && f");
        assert!(tokens[1].is_operator(op::GE));
        assert!(tokens[3].is_operator(op::EQ));
        assert!(tokens[5].is_operator(op::ARROW));
        assert!(tokens[7].is_operator(op::SHR_BY));
        assert!(tokens[9].is_operator(op::LOG_AND));
    }

    #[test]
    fn test_single_character_operators_use_ascii() {
        let tokens = lex("( ) + ; : . [ ]");
        assert!(tokens[0].is_operator(b'('));
        assert!(tokens[2].is_operator(b'+'));
        assert!(tokens[4].is_operator(b':'));
        assert!(tokens[6].is_operator(b'['));
    }

    #[test]
    fn test_shift_not_split_from_compound() {
        let tokens = lex("a >> b >>= c");
        assert!(tokens[1].is_operator(op::SHR));
        assert!(tokens[3].is_operator(op::SHR_BY));
    }

    #[test]
    fn test_string_and_char_literals() {
        let tokens = lex("\"hello world\" 'a'");
        assert_eq!(tokens[0].kind, TokenKind::StringLit);
        assert_eq!(tokens[0].text, "hello world");
        assert_eq!(tokens[1].kind, TokenKind::CharLit(97));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(lex_source("\"oops", "t").is_err());
    }

    #[test]
    fn test_malformed_char() {
        assert!(lex_source("'ab'", "t").is_err());
    }

    #[test]
    fn test_oversize_integer() {
        let long = "9".repeat(80);
        assert!(lex_source(&long, "t").is_err());
    }

    #[test]
    fn test_integer_overflow() {
        // Fits in 64 characters but not in i64.
        assert!(lex_source("99999999999999999999", "t").is_err());
    }

    #[test]
    fn test_line_numbers() {
        let tokens = lex("a\nb\n\nc");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[2].line, 4);
    }

    #[test]
    fn test_token_text_roundtrip() {
        // Joining every token's rendering with spaces and re-lexing must
        // reproduce the same token sequence.
        let source = "func main ( ) -> int { x : int ; x = 10 ; if ( x >= 3.5 ) return 1 ; }";
        let first = lex(source);
        let printed = first
            .iter()
            .map(|t| t.text.clone())
            .collect::<Vec<_>>()
            .join(" ");
        let second = lex(&printed);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.kind, b.kind);
        }
    }

    #[test]
    fn test_operator_spelling() {
        assert_eq!(operator_spelling(op::GE), ">=");
        assert_eq!(operator_spelling(b'+'), "+");
    }
}
