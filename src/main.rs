// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

use std::process::ExitCode;

use clap::Parser;

use relforge::assembler::cli::{validate_cli, Cli};
use relforge::assembler::{assemble, RunError};
use relforge::core::diag::Diagnostic;

fn print_diagnostics(diags: &[Diagnostic], lines: &[String]) {
    let use_color = std::io::IsTerminal::is_terminal(&std::io::stderr());
    for diag in diags {
        eprintln!("{}", diag.format_with_context(Some(lines), use_color));
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = validate_cli(&cli);

    match assemble(&config) {
        Ok(report) => {
            print_diagnostics(&report.diagnostics, &report.source_lines);
            ExitCode::SUCCESS
        }
        Err(RunError {
            error,
            diagnostics,
            source_lines,
            usage,
        }) => {
            print_diagnostics(&diagnostics, &source_lines);
            eprintln!("error: {error}");
            if usage {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
