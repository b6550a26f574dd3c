// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use super::{Config, DumpTime};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Modular assembler for NASM and GAS syntax.

Reads one assembly source file, resolves variable-length encodings against
symbol values, and writes a relocatable object file (flat binary, COFF,
Win32/Win64 PE-COFF, or ELF32/ELF64). The primary architecture backend is
x86/AMD64.

If -o is omitted, the output name is the input basename with the object
format's extension; if that would collide with the input name, yasm.out is
used.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpWhen {
    Never,
    #[value(name = "after-parse")]
    AfterParse,
    #[value(name = "after-finalize")]
    AfterFinalize,
    #[value(name = "after-optimize")]
    AfterOptimize,
    #[value(name = "after-output")]
    AfterOutput,
}

#[derive(Parser, Debug)]
#[command(
    name = "relForge",
    version = VERSION,
    about = "Modular multi-dialect assembler (NASM/GAS, x86/AMD64, bin/COFF/ELF output)",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        value_name = "INPUT",
        long_help = "Input assembly source file."
    )]
    pub input: PathBuf,
    #[arg(
        short = 'f',
        long = "oformat",
        value_name = "FORMAT",
        default_value = "bin",
        long_help = "Select the object format: bin, coff, win32, win64, elf32, or elf64."
    )]
    pub objfmt: String,
    #[arg(
        short = 'p',
        long = "parser",
        value_name = "PARSER",
        default_value = "nasm",
        long_help = "Select the source dialect parser: nasm or gas."
    )]
    pub parser: String,
    #[arg(
        short = 'a',
        long = "arch",
        value_name = "ARCH",
        default_value = "x86",
        long_help = "Select the architecture backend. Only x86 is built in."
    )]
    pub arch: String,
    #[arg(
        short = 'm',
        long = "machine",
        value_name = "MACHINE",
        long_help = "Select the machine within the architecture (x86 or amd64). Defaults to the format's natural machine."
    )]
    pub machine: Option<String>,
    #[arg(
        short = 'g',
        long = "dformat",
        value_name = "DEBUG",
        default_value = "null",
        long_help = "Select the debug format. Only null is built in."
    )]
    pub dbgfmt: String,
    #[arg(
        short = 'L',
        long = "lformat",
        value_name = "LIST",
        long_help = "Select a list format. Accepted for interface compatibility; list output is not supported."
    )]
    pub listfmt: Option<String>,
    #[arg(
        short = 'o',
        long = "objfile",
        value_name = "FILE",
        long_help = "Write the object file to FILE instead of the derived name."
    )]
    pub output: Option<PathBuf>,
    #[arg(
        short = 'I',
        value_name = "DIR",
        action = ArgAction::Append,
        long_help = "Additional search directory for incbin file references (repeatable)."
    )]
    pub include_paths: Vec<PathBuf>,
    #[arg(
        short = 'D',
        value_name = "NAME[=VAL]",
        action = ArgAction::Append,
        long_help = "Pre-define an absolute symbol (repeatable). VAL must be a decimal constant and defaults to 1."
    )]
    pub defines: Vec<String>,
    #[arg(
        short = 'W',
        value_name = "CLASS",
        action = ArgAction::Append,
        long_help = "Adjust warning classes. `-W error` treats warnings as errors; other classes are accepted and ignored."
    )]
    pub warn_classes: Vec<String>,
    #[arg(
        short = 'w',
        action = ArgAction::SetTrue,
        conflicts_with = "warn_classes",
        long_help = "Suppress all warnings."
    )]
    pub no_warn: bool,
    #[arg(
        long = "dump",
        value_enum,
        default_value_t = DumpWhen::Never,
        long_help = "Dump the object model as JSON to stderr at the selected phase boundary."
    )]
    pub dump: DumpWhen,
}

/// Build a validated run configuration from parsed arguments.
pub fn validate_cli(cli: &Cli) -> Config {
    Config {
        input: cli.input.clone(),
        output: cli.output.clone(),
        arch_keyword: cli.arch.clone(),
        parser_keyword: cli.parser.clone(),
        objfmt_keyword: cli.objfmt.clone(),
        dbgfmt_keyword: cli.dbgfmt.clone(),
        machine: cli.machine.clone(),
        include_paths: cli.include_paths.clone(),
        defines: cli.defines.clone(),
        warning_error: cli
            .warn_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case("error")),
        suppress_warnings: cli.no_warn,
        dump: match cli.dump {
            DumpWhen::Never => DumpTime::Never,
            DumpWhen::AfterParse => DumpTime::AfterParse,
            DumpWhen::AfterFinalize => DumpTime::AfterFinalize,
            DumpWhen::AfterOptimize => DumpTime::AfterOptimize,
            DumpWhen::AfterOutput => DumpTime::AfterOutput,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_bin_nasm_pipeline() {
        let cli = Cli::parse_from(["relforge", "prog.asm"]);
        let config = validate_cli(&cli);
        assert_eq!(config.objfmt_keyword, "bin");
        assert_eq!(config.parser_keyword, "nasm");
        assert_eq!(config.arch_keyword, "x86");
        assert_eq!(config.dbgfmt_keyword, "null");
        assert!(!config.warning_error);
    }

    #[test]
    fn werror_via_warn_class() {
        let cli = Cli::parse_from(["relforge", "-W", "error", "-f", "elf32", "prog.asm"]);
        let config = validate_cli(&cli);
        assert!(config.warning_error);
        assert_eq!(config.objfmt_keyword, "elf32");
    }

    #[test]
    fn dump_selector_parses() {
        let cli = Cli::parse_from(["relforge", "--dump", "after-optimize", "prog.asm"]);
        assert_eq!(cli.dump, DumpWhen::AfterOptimize);
    }
}
