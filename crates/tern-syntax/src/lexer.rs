//! Byte-stream lexer with 1-based line tracking.
//!
//! Classification is by first byte after skipping spaces/tabs: EOF,
//! newline, alpha (reserved word, type literal, or identifier), digit
//! (integer or real), then punctuation. String and char literals process
//! the escape set `\\ \" \' \n \r \t`; unknown escapes log a recoverable
//! error and keep the literal character. `/* */` comments nest.
//!
//! All lexer errors are recoverable: the lexer logs and continues with a
//! best-effort token.

use tern_core::diag::{ErrorLog, Stage};
use tern_core::source::{SourceBuffer, Span};

use crate::op::Op;
use crate::token::{keyword, Token, TokenKind};

use tern_core::types::PrimKind;

/// Lexes an entire buffer into a token vector ending with an EOF token.
pub fn lex(src: &SourceBuffer, log: &mut ErrorLog) -> Vec<Token> {
    let mut lexer = Lexer {
        bytes: src.text().as_bytes(),
        pos: 0,
        line: 1,
        log,
    };
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token();
        let done = tok.kind == TokenKind::Eof;
        tokens.push(tok);
        if done {
            break;
        }
    }
    tokens
}

struct Lexer<'a, 'log> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    log: &'log mut ErrorLog,
}

impl Lexer<'_, '_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        b.into()
    }

    fn span_from(&self, lo: usize) -> Span {
        Span::new(lo as u32, self.pos as u32)
    }

    fn token(&self, kind: TokenKind, lo: usize, line: u32) -> Token {
        let lexeme = String::from_utf8_lossy(&self.bytes[lo..self.pos]).into_owned();
        Token::new(kind, lexeme, line, self.span_from(lo))
    }

    fn op(&self, op: Op, lo: usize, line: u32) -> Token {
        self.token(TokenKind::Op(op), lo, line)
    }

    fn next_token(&mut self) -> Token {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.bump();
                }
                _ => break,
            }
        }

        let lo = self.pos;
        let line = self.line;
        let first = match self.peek() {
            None => return Token::new(TokenKind::Eof, "", line, Span::point(lo as u32)),
            Some(b) => b,
        };

        if first == b'\n' {
            self.bump();
            return Token::new(TokenKind::Newline, "\n", line, self.span_from(lo));
        }
        // Leading underscores are identifiers too (`__print__` and kin).
        if first.is_ascii_alphabetic() || first == b'_' {
            return self.next_word(lo, line);
        }
        if first.is_ascii_digit() {
            return self.next_number(lo, line);
        }
        if first == b'"' {
            self.bump();
            return self.next_string_literal(lo, line);
        }
        if first == b'\'' {
            self.bump();
            return self.next_char_literal(lo, line);
        }
        if first == b'/' {
            return self.next_given_slash(lo, line);
        }
        if first.is_ascii_punctuation() {
            return self.next_operator(lo, line);
        }

        // A stray control or non-ASCII byte outside a literal.
        self.bump();
        self.log.error(
            Stage::Lex,
            self.span_from(lo),
            format!("stray character 0x{:02x} in source", first),
        );
        self.next_token()
    }

    /// Reserved word, primitive type literal, or identifier.
    fn next_word(&mut self, lo: usize, line: u32) -> Token {
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.bump();
        }
        let word = &self.bytes[lo..self.pos];
        let word = std::str::from_utf8(word).unwrap_or("");
        if let Some(kw) = keyword(word) {
            return self.token(TokenKind::Keyword(kw), lo, line);
        }
        if PrimKind::from_name(word).is_some() {
            return self.token(TokenKind::TypeLit, lo, line);
        }
        self.token(TokenKind::Ident, lo, line)
    }

    /// Integer, or real when a `.` + digits follows the integer part.
    fn next_number(&mut self, lo: usize, line: u32) -> Token {
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.bump();
        }
        // `3..7` is a range over integers, not a malformed real.
        if self.peek() == Some(b'.')
            && self.peek2() != Some(b'.')
            && matches!(self.peek2(), Some(b) if b.is_ascii_digit())
        {
            self.bump();
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.bump();
            }
            return self.token(TokenKind::Real, lo, line);
        }
        self.token(TokenKind::Int, lo, line)
    }

    fn next_operator(&mut self, lo: usize, line: u32) -> Token {
        let first = self.bump().unwrap_or(0);

        // Single-character tokens taken by themselves.
        match first {
            b'@' => return self.op(Op::At, lo, line),
            b',' => return self.op(Op::Comma, lo, line),
            b';' => return self.op(Op::Semicolon, lo, line),
            b'(' => return self.op(Op::LParen, lo, line),
            b')' => return self.op(Op::RParen, lo, line),
            b'{' => return self.op(Op::LBrace, lo, line),
            b'}' => return self.op(Op::RBrace, lo, line),
            b'[' => return self.op(Op::LBracket, lo, line),
            b']' => return self.op(Op::RBracket, lo, line),
            b'`' => return self.op(Op::Tick, lo, line),
            _ => {}
        }

        // Operators extendable with `=` (and the arrow forms).
        let eq_follows = self.peek() == Some(b'=');
        match first {
            b'+' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::AddEq, lo, line);
                }
                return self.op(Op::Add, lo, line);
            }
            b'*' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::MulEq, lo, line);
                }
                return self.op(Op::Mul, lo, line);
            }
            b'%' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::ModEq, lo, line);
                }
                return self.op(Op::Mod, lo, line);
            }
            b'&' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::AndEq, lo, line);
                }
                return self.op(Op::Amp, lo, line);
            }
            b'|' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::OrEq, lo, line);
                }
                self.log.error(
                    Stage::Lex,
                    self.span_from(lo),
                    "`|` is not an operator; did you mean `or` or `|=`?",
                );
                return self.op(Op::Or, lo, line);
            }
            b'^' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::XorEq, lo, line);
                }
                self.log.error(
                    Stage::Lex,
                    self.span_from(lo),
                    "`^` is not an operator; did you mean `xor` or `^=`?",
                );
                return self.op(Op::Xor, lo, line);
            }
            b'<' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::Le, lo, line);
                }
                return self.op(Op::Lt, lo, line);
            }
            b'>' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::Ge, lo, line);
                }
                return self.op(Op::Gt, lo, line);
            }
            b'!' => {
                if eq_follows {
                    self.bump();
                    return self.op(Op::Ne, lo, line);
                }
                return self.op(Op::Not, lo, line);
            }
            _ => {}
        }

        match first {
            b':' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    return self.op(Op::ColonEq, lo, line);
                }
                if self.peek() == Some(b':') && self.peek2() == Some(b'=') {
                    self.bump();
                    self.bump();
                    return self.op(Op::DoubleColonEq, lo, line);
                }
                self.op(Op::Colon, lo, line)
            }
            b'-' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    return self.op(Op::SubEq, lo, line);
                }
                if self.peek() == Some(b'>') {
                    self.bump();
                    return self.op(Op::Arrow, lo, line);
                }
                self.op(Op::Sub, lo, line)
            }
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    return self.op(Op::EqEq, lo, line);
                }
                if self.peek() == Some(b'>') {
                    self.bump();
                    return self.op(Op::Rocket, lo, line);
                }
                self.op(Op::Assign, lo, line)
            }
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.bump();
                    return self.op(Op::DotDot, lo, line);
                }
                self.op(Op::Dot, lo, line)
            }
            other => {
                self.log.error(
                    Stage::Lex,
                    self.span_from(lo),
                    format!("unrecognized operator `{}`", other as char),
                );
                self.next_token()
            }
        }
    }

    /// `//` comments run to end of line; `/* */` comments nest; otherwise
    /// the slash is division (possibly `/=`).
    fn next_given_slash(&mut self, lo: usize, line: u32) -> Token {
        self.bump();
        match self.peek() {
            Some(b'/') => {
                while !matches!(self.peek(), None | Some(b'\n')) {
                    self.bump();
                }
                self.token(TokenKind::Comment, lo, line)
            }
            Some(b'*') => {
                self.bump();
                let mut depth = 1usize;
                let mut prev = 0u8;
                while depth != 0 {
                    let cur = match self.bump() {
                        Some(b) => b,
                        None => {
                            self.log.error(
                                Stage::Lex,
                                self.span_from(lo),
                                "file ended during multi-line comment",
                            );
                            return self.token(TokenKind::Comment, lo, line);
                        }
                    };
                    if prev == b'/' && cur == b'*' {
                        depth += 1;
                        // Don't let the `*` double as a closer's opener.
                        prev = 0;
                    } else if prev == b'*' && cur == b'/' {
                        depth -= 1;
                        prev = 0;
                    } else {
                        prev = cur;
                    }
                }
                self.token(TokenKind::Comment, lo, line)
            }
            Some(b'=') => {
                self.bump();
                self.op(Op::DivEq, lo, line)
            }
            _ => self.op(Op::Div, lo, line),
        }
    }

    fn escape(&mut self, quote: u8) -> char {
        let esc = self.peek();
        let out = match esc {
            Some(b'\\') => '\\',
            Some(b'"') => '"',
            Some(b'\'') => '\'',
            Some(b'n') => '\n',
            Some(b'r') => '\r',
            Some(b't') => '\t',
            Some(other) => {
                self.log.error(
                    Stage::Lex,
                    Span::point(self.pos as u32),
                    format!("`\\{}` is not an escape sequence", other as char),
                );
                other as char
            }
            None => quote as char,
        };
        self.bump();
        out
    }

    /// Called after the opening `"` has been consumed.
    fn next_string_literal(&mut self, lo: usize, line: u32) -> Token {
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.bump();
                    break;
                }
                None | Some(b'\n') => {
                    self.log.error(
                        Stage::Lex,
                        self.span_from(lo),
                        "string literal is not closed before the end of the line",
                    );
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    value.push(self.escape(b'"'));
                }
                Some(_) => {
                    // UTF-8 passes through untouched.
                    let start = self.pos;
                    self.bump();
                    while self.pos < self.bytes.len() && (self.bytes[self.pos] & 0xc0) == 0x80 {
                        self.pos += 1;
                    }
                    value.push_str(&String::from_utf8_lossy(&self.bytes[start..self.pos]));
                }
            }
        }
        Token::new(TokenKind::Str, value, line, self.span_from(lo))
    }

    /// Called after the opening `'` has been consumed. Exactly one
    /// character (after escape processing) followed by `'`; anything else
    /// logs and synthesizes.
    fn next_char_literal(&mut self, lo: usize, line: u32) -> Token {
        let value = match self.peek() {
            None | Some(b'\n') => {
                self.log.error(
                    Stage::Lex,
                    self.span_from(lo),
                    "cannot use a newline inside a character literal",
                );
                return Token::new(TokenKind::Char, "\0", line, self.span_from(lo));
            }
            Some(b'\\') => {
                self.bump();
                self.escape(b'\'')
            }
            Some(_) => {
                let start = self.pos;
                self.bump();
                while self.pos < self.bytes.len() && (self.bytes[self.pos] & 0xc0) == 0x80 {
                    self.pos += 1;
                }
                String::from_utf8_lossy(&self.bytes[start..self.pos])
                    .chars()
                    .next()
                    .unwrap_or('\0')
            }
        };
        if self.peek() == Some(b'\'') {
            self.bump();
        } else {
            self.log.error(
                Stage::Lex,
                self.span_from(lo),
                "character literal must be followed by a single-quote",
            );
        }
        Token::new(TokenKind::Char, value.to_string(), line, self.span_from(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Kw;

    fn lex_kinds(text: &str) -> (Vec<TokenKind>, ErrorLog) {
        let src = SourceBuffer::new("test", text);
        let mut log = ErrorLog::new();
        let kinds = lex(&src, &mut log).into_iter().map(|t| t.kind).collect();
        (kinds, log)
    }

    #[test]
    fn words_numbers_operators() {
        let (kinds, log) = lex_kinds("x := 3 + 4.5 * y");
        assert!(!log.has_errors());
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::Op(Op::ColonEq),
                TokenKind::Int,
                TokenKind::Op(Op::Add),
                TokenKind::Real,
                TokenKind::Op(Op::Mul),
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn special_declaration_names_are_identifiers() {
        let src = SourceBuffer::new("test", "__print__ _x");
        let mut log = ErrorLog::new();
        let toks = lex(&src, &mut log);
        assert!(!log.has_errors());
        assert_eq!(toks[0].kind, TokenKind::Ident);
        assert_eq!(toks[0].lexeme, "__print__");
        assert_eq!(toks[1].kind, TokenKind::Ident);
    }

    #[test]
    fn keywords_and_type_literals() {
        let (kinds, _) = lex_kinds("while int32 foo");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword(Kw::While),
                TokenKind::TypeLit,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lines_are_one_based_and_tracked() {
        let src = SourceBuffer::new("test", "a\nb\n\nc");
        let mut log = ErrorLog::new();
        let toks = lex(&src, &mut log);
        let lines: Vec<(String, u32)> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| (t.lexeme.clone(), t.line))
            .collect();
        assert_eq!(
            lines,
            vec![("a".into(), 1), ("b".into(), 2), ("c".into(), 4)]
        );
    }

    #[test]
    fn compound_operators() {
        let (kinds, log) = lex_kinds("a ::= b -> c => d != e <= f .. g");
        assert!(!log.has_errors());
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::Op(Op::DoubleColonEq),
                TokenKind::Ident,
                TokenKind::Op(Op::Arrow),
                TokenKind::Ident,
                TokenKind::Op(Op::Rocket),
                TokenKind::Ident,
                TokenKind::Op(Op::Ne),
                TokenKind::Ident,
                TokenKind::Op(Op::Le),
                TokenKind::Ident,
                TokenKind::Op(Op::DotDot),
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_range_is_not_a_real() {
        let (kinds, _) = lex_kinds("3..7");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Int,
                TokenKind::Op(Op::DotDot),
                TokenKind::Int,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let src = SourceBuffer::new("test", r#""a\tb\nc\"d""#);
        let mut log = ErrorLog::new();
        let toks = lex(&src, &mut log);
        assert!(!log.has_errors());
        assert_eq!(toks[0].kind, TokenKind::Str);
        assert_eq!(toks[0].lexeme, "a\tb\nc\"d");
    }

    #[test]
    fn unknown_escape_recovers_with_literal_char() {
        let src = SourceBuffer::new("test", r#""a\qb""#);
        let mut log = ErrorLog::new();
        let toks = lex(&src, &mut log);
        assert!(log.has_errors());
        assert_eq!(toks[0].lexeme, "aqb");
    }

    #[test]
    fn unterminated_string_logs() {
        let (_, log) = lex_kinds("\"oops\nnext");
        assert!(log.has_errors());
    }

    #[test]
    fn char_literals() {
        let src = SourceBuffer::new("test", r"'x' '\n' '\\'");
        let mut log = ErrorLog::new();
        let toks = lex(&src, &mut log);
        assert!(!log.has_errors());
        let chars: Vec<&str> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::Char)
            .map(|t| t.lexeme.as_str())
            .collect();
        assert_eq!(chars, vec!["x", "\n", "\\"]);
    }

    #[test]
    fn char_literal_missing_close_quote() {
        let (_, log) = lex_kinds("'ab'");
        assert!(log.has_errors());
    }

    #[test]
    fn comments_nest() {
        let (kinds, log) = lex_kinds("a /* one /* two */ still */ b // trailing\nc");
        assert!(!log.has_errors());
        let idents = kinds
            .iter()
            .filter(|k| **k == TokenKind::Ident)
            .count();
        assert_eq!(idents, 3);
        assert!(kinds.contains(&TokenKind::Comment));
    }

    #[test]
    fn eof_inside_comment_is_an_error() {
        let (_, log) = lex_kinds("/* never closed");
        assert!(log.has_errors());
    }
}
