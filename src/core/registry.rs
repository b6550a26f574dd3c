// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Module registry.
//!
//! Maps keywords to factories for architecture, parser, object-format, and
//! debug-format modules. Built once by the driver with the built-in
//! modules and read-only afterwards; keyword lookup uses explicit ASCII
//! case-folding.

use crate::arch::x86::X86Arch;
use crate::arch::Arch;
use crate::dbgfmt::{DebugFormat, NullDebug};
use crate::objfmt::bin::BinFormat;
use crate::objfmt::coff::{CoffFormat, CoffMode};
use crate::objfmt::elf::{ElfClass, ElfFormat};
use crate::objfmt::ObjectFormat;
use crate::parser::gas::GasParser;
use crate::parser::nasm::NasmParser;
use crate::parser::Parser;

pub struct ModuleRegistry {
    arches: Vec<(&'static str, fn() -> Box<dyn Arch>)>,
    parsers: Vec<(&'static str, fn() -> Box<dyn Parser>)>,
    objfmts: Vec<(&'static str, fn() -> Box<dyn ObjectFormat>)>,
    dbgfmts: Vec<(&'static str, fn() -> Box<dyn DebugFormat>)>,
}

impl ModuleRegistry {
    /// Registry with every built-in module registered.
    pub fn with_builtins() -> Self {
        Self {
            arches: vec![("x86", || Box::new(X86Arch::new()) as Box<dyn Arch>)],
            parsers: vec![
                ("nasm", || Box::new(NasmParser::new()) as Box<dyn Parser>),
                ("gas", || Box::new(GasParser::new()) as Box<dyn Parser>),
                ("gnu", || Box::new(GasParser::new()) as Box<dyn Parser>),
            ],
            objfmts: vec![
                ("bin", || Box::new(BinFormat::new()) as Box<dyn ObjectFormat>),
                ("coff", || {
                    Box::new(CoffFormat::new(CoffMode::Standard)) as Box<dyn ObjectFormat>
                }),
                ("win32", || {
                    Box::new(CoffFormat::new(CoffMode::Win32)) as Box<dyn ObjectFormat>
                }),
                ("win64", || {
                    Box::new(CoffFormat::new(CoffMode::Win64)) as Box<dyn ObjectFormat>
                }),
                ("x64", || {
                    Box::new(CoffFormat::new(CoffMode::Win64)) as Box<dyn ObjectFormat>
                }),
                ("elf", || {
                    Box::new(ElfFormat::new(ElfClass::Elf32)) as Box<dyn ObjectFormat>
                }),
                ("elf32", || {
                    Box::new(ElfFormat::new(ElfClass::Elf32)) as Box<dyn ObjectFormat>
                }),
                ("elf64", || {
                    Box::new(ElfFormat::new(ElfClass::Elf64)) as Box<dyn ObjectFormat>
                }),
            ],
            dbgfmts: vec![("null", || Box::new(NullDebug) as Box<dyn DebugFormat>)],
        }
    }

    pub fn create_arch(&self, keyword: &str) -> Option<Box<dyn Arch>> {
        lookup(&self.arches, keyword)
    }

    pub fn create_parser(&self, keyword: &str) -> Option<Box<dyn Parser>> {
        lookup(&self.parsers, keyword)
    }

    pub fn create_objfmt(&self, keyword: &str) -> Option<Box<dyn ObjectFormat>> {
        lookup(&self.objfmts, keyword)
    }

    pub fn create_dbgfmt(&self, keyword: &str) -> Option<Box<dyn DebugFormat>> {
        lookup(&self.dbgfmts, keyword)
    }

    pub fn arch_keywords(&self) -> Vec<&'static str> {
        self.arches.iter().map(|(k, _)| *k).collect()
    }

    pub fn parser_keywords(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|(k, _)| *k).collect()
    }

    pub fn objfmt_keywords(&self) -> Vec<&'static str> {
        self.objfmts.iter().map(|(k, _)| *k).collect()
    }

    pub fn dbgfmt_keywords(&self) -> Vec<&'static str> {
        self.dbgfmts.iter().map(|(k, _)| *k).collect()
    }
}

fn lookup<T: ?Sized>(
    table: &[(&'static str, fn() -> Box<T>)],
    keyword: &str,
) -> Option<Box<T>> {
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
        .map(|(_, f)| f())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_is_case_insensitive() {
        let reg = ModuleRegistry::with_builtins();
        assert!(reg.create_arch("X86").is_some());
        assert!(reg.create_parser("NASM").is_some());
        assert!(reg.create_objfmt("Elf32").is_some());
        assert!(reg.create_objfmt("macho").is_none());
        assert!(reg.create_dbgfmt("null").is_some());
    }

    #[test]
    fn objfmt_keywords_cover_the_supported_formats() {
        let reg = ModuleRegistry::with_builtins();
        let kws = reg.objfmt_keywords();
        for kw in ["bin", "coff", "win32", "win64", "elf32", "elf64"] {
            assert!(kws.contains(&kw), "missing {kw}");
        }
    }
}
