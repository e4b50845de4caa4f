//! Lexical analysis (tokenization) for Ely source code.
//!
//! The lexer transforms source text into a lazy stream of tokens that the
//! compiler consumes on demand.
//!
//! ## Structure
//!
//! - `scanner.rs` - Main `Scanner` struct that produces tokens
//! - `token.rs` - `Token` and `TokenKind` definitions
//!
//! ## Usage
//!
//! ```rust
//! use ely_core::lexer::{Scanner, TokenKind};
//!
//! let mut scanner = Scanner::new("var x = 42");
//!
//! loop {
//!     let token = scanner.next_token().unwrap();
//!     if matches!(token.kind, TokenKind::Eof) {
//!         break;
//!     }
//!     println!("{:?}", token.kind);
//! }
//! ```

mod scanner;
mod token;

pub use scanner::Scanner;
pub use token::{Token, TokenKind};
