// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Ely - a small dynamically-typed scripting language
//!
//! This is the main entry point for the ely CLI/REPL.

mod repl;

use clap::Parser;
use ely_core::lexer::{Scanner, TokenKind};
use ely_core::Engine;
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ely",
    about = "The Ely scripting language",
    version,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Ely script to execute
    script: Option<PathBuf>,

    /// Evaluate source from the command line
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Print the token stream and exit
    #[arg(long)]
    lex: bool,

    /// Trace compilation and execution to standard error
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "ely=trace,ely_core=trace" } else { "ely_core=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Gather source from -e, a script file, or piped stdin; with none of
    // those and a terminal attached, drop into the REPL.
    let source = if let Some(code) = cli.eval {
        code
    } else if let Some(path) = &cli.script {
        std::fs::read_to_string(path)?
    } else if atty::is(atty::Stream::Stdin) {
        let mut repl = repl::Repl::new()?;
        repl.run()?;
        return Ok(());
    } else {
        let mut code = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut code)?;
        code
    };

    if cli.lex {
        return print_tokens(&source);
    }

    let mut engine = Engine::new();
    match engine.eval(&source) {
        Ok(value) => {
            // Script files speak through print; inline/piped source echoes
            // its result like the REPL does.
            if cli.script.is_none() && !value.is_null() {
                println!("{value}");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            std::process::exit(1);
        }
    }
}

/// Prints one token per line with its source position.
fn print_tokens(source: &str) -> anyhow::Result<()> {
    let mut scanner = Scanner::new(source);
    loop {
        match scanner.next_token() {
            Ok(token) => {
                println!("{:>4}:{:<3} {:?}", token.line, token.column, token.kind);
                if token.kind == TokenKind::Eof {
                    return Ok(());
                }
            }
            Err(e) => {
                eprintln!("{}", e.to_string().red());
                std::process::exit(1);
            }
        }
    }
}
