//! The scanner that produces tokens from source text.

use super::{Token, TokenKind};
use crate::error::{diagnostic, Error, Result};

/// A scanner that tokenizes Ely source code on demand.
///
/// Tokens are produced lazily by [`Scanner::next_token`]; once the end of
/// input is reached the scanner keeps yielding [`TokenKind::Eof`].
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let line = self.line;
        let column = self.column;

        let Some(ch) = self.advance() else {
            return Ok(Token::new(TokenKind::Eof, line, column));
        };

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LSquare,
            ']' => TokenKind::RSquare,
            '{' => TokenKind::LCurly,
            '}' => TokenKind::RCurly,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '>' => TokenKind::Greater,
            '<' => TokenKind::Less,

            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::BangEqual
                } else {
                    return Err(self.unexpected_char('!', line, column));
                }
            }

            '"' => self.scan_string(line, column)?,
            '0'..='9' => self.scan_number(ch),
            _ if ch.is_ascii_alphabetic() => self.scan_identifier(ch),

            _ => return Err(self.unexpected_char(ch, line, column)),
        };

        Ok(Token::new(kind, line, column))
    }

    fn advance(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.advance();
                }
                Some('#') => {
                    // Comment: skip until end of line
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_string(&mut self, line: usize, column: usize) -> Result<TokenKind> {
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(Error::lex(diagnostic(
                        self.source,
                        line,
                        column,
                        "unterminated string",
                    )));
                }
                Some('"') => break,
                Some(ch) => value.push(ch),
            }
        }
        Ok(TokenKind::String(value))
    }

    fn scan_number(&mut self, first: char) -> TokenKind {
        let mut text = String::from(first);
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '.' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Number(text)
    }

    fn scan_identifier(&mut self, first: char) -> TokenKind {
        let mut name = String::from(first);
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphabetic() || ch == '_' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::keyword(&name).unwrap_or(TokenKind::Identifier(name))
    }

    fn unexpected_char(&self, ch: char, line: usize, column: usize) -> Error {
        Error::lex(diagnostic(
            self.source,
            line,
            column,
            &format!("unexpected character '{ch}'"),
        ))
    }
}
