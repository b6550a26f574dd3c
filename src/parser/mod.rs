// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Dialect front-ends.
//!
//! A parser turns source lines into bytecode insertions, symbol
//! definitions/uses, and directive invocations against the object model.
//! Both dialects share the tokenizer; numeric literal grammars and line
//! structure are dialect-local.

pub mod gas;
pub mod nasm;
pub mod tokenizer;

use std::path::Path;

use crate::arch::Arch;
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics};
use crate::core::directive::Directives;
use crate::core::object::Object;
use crate::objfmt::ObjectFormat;

/// Source input with line-based location tracking.
pub struct SourceFile {
    pub name: String,
    pub lines: Vec<String>,
}

impl SourceFile {
    pub fn load(path: &Path) -> Result<Self, AsmError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            AsmError::new(
                AsmErrorKind::Io,
                format!("unable to read `{}`: {err}", path.display()),
            )
        })?;
        Ok(Self::from_text(&path.display().to_string(), &text))
    }

    pub fn from_text(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }
}

/// The contract the driver consumes from a dialect parser.
pub trait Parser {
    fn keyword(&self) -> &'static str;

    /// Register parser-owned directives.
    fn add_directives(&self, _dirs: &mut Directives, _parser: &str) {}

    /// Populate the object from source. Errors are reported through the
    /// diagnostics sink; parsing continues past recoverable ones.
    fn parse(
        &mut self,
        source: &SourceFile,
        object: &mut Object,
        dirs: &Directives,
        arch: &mut dyn Arch,
        objfmt: &mut dyn ObjectFormat,
        diags: &mut Diagnostics,
    );
}
