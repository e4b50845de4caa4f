// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the Ely engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while lexing, compiling, or running Ely code.
#[derive(Debug, Error)]
pub enum Error {
    /// Lexical error (unexpected character, unterminated string)
    #[error("{0}")]
    Lex(String),

    /// Parse error (unexpected token, missing expected token, invalid operator)
    #[error("{0}")]
    Parse(String),

    /// Internal compiler error
    #[error("compiler bug: {0}")]
    Compile(String),

    /// Runtime error raised by the VM
    #[error("{0}")]
    Runtime(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a lexical error carrying a formatted diagnostic.
    pub fn lex(diagnostic: impl Into<String>) -> Self {
        Self::Lex(diagnostic.into())
    }

    /// Create a parse error carrying a formatted diagnostic.
    pub fn parse(diagnostic: impl Into<String>) -> Self {
        Self::Parse(diagnostic.into())
    }

    /// Create a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

/// Builds the user-visible diagnostic for lexer and compiler fatals:
/// the offending line of source with a caret under the position.
///
/// ```text
/// flagrant error on line 2
/// unexpected token '@'
///     var x = @
///             ^
/// ```
pub fn diagnostic(source: &str, line: usize, column: usize, message: &str) -> String {
    let mut out = format!("flagrant error on line {line}\n{message}");
    if let Some(text) = source.lines().nth(line.saturating_sub(1)) {
        out.push_str("\n    ");
        out.push_str(text);
        out.push_str("\n    ");
        for _ in 1..column {
            out.push(' ');
        }
        out.push('^');
    }
    out
}
