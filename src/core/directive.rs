// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Directive registration and dispatch.
//!
//! Architecture, parser, and object-format modules register named handlers
//! at startup; the dialect parsers dispatch through the registry. Names are
//! matched with explicit ASCII case-folding, and argument-kind flags are
//! validated before the handler runs.

use std::collections::HashMap;

use crate::arch::Arch;
use crate::core::diag::{AsmError, AsmErrorKind, Span};
use crate::core::expr::Expr;
use crate::core::object::Object;

/// A directive argument: optional `name=` part plus a value.
#[derive(Debug, Clone)]
pub struct NameValue {
    pub name: Option<String>,
    pub value: Nv,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Nv {
    Id(String),
    Str(String),
    Expr(Expr),
}

impl NameValue {
    pub fn id(id: impl Into<String>, span: Span) -> Self {
        Self {
            name: None,
            value: Nv::Id(id.into()),
            span,
        }
    }

    pub fn expr(e: Expr, span: Span) -> Self {
        Self {
            name: None,
            value: Nv::Expr(e),
            span,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match &self.value {
            Nv::Id(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Nv::Id(s) | Nv::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_expr(&self) -> Option<&Expr> {
        match &self.value {
            Nv::Expr(e) => Some(e),
            _ => None,
        }
    }
}

/// Everything a directive handler can touch.
pub struct DirectiveInfo<'a> {
    pub object: &'a mut Object,
    pub arch: &'a mut dyn Arch,
    /// Positional arguments.
    pub namevals: Vec<NameValue>,
    /// Object-format extension arguments (NASM's bracketed tail).
    pub objext_namevals: Vec<NameValue>,
    pub span: Span,
}

/// Pre-handler argument validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirFlags {
    /// Any arguments accepted.
    Any,
    /// At least one argument required.
    ArgRequired,
    /// First argument must be an identifier.
    IdRequired,
}

/// Handler binding: a free function, or delegation to the active object
/// format (which carries per-format state the registry cannot).
#[derive(Clone, Copy)]
pub enum DirHandler {
    Func(fn(&mut DirectiveInfo) -> Result<(), AsmError>),
    Objfmt,
}

/// Name → handler map with pre-validated argument kinds.
#[derive(Default)]
pub struct Directives {
    map: HashMap<String, (DirHandler, DirFlags)>,
}

impl Directives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, handler: DirHandler, flags: DirFlags) {
        self.map
            .insert(name.to_ascii_lowercase(), (handler, flags));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<(DirHandler, DirFlags)> {
        self.map.get(&name.to_ascii_lowercase()).copied()
    }

    /// Validate flags for a lookup result against the assembled arguments.
    pub fn check_args(
        name: &str,
        flags: DirFlags,
        namevals: &[NameValue],
    ) -> Result<(), AsmError> {
        match flags {
            DirFlags::Any => Ok(()),
            DirFlags::ArgRequired => {
                if namevals.is_empty() {
                    Err(AsmError::with_param(
                        AsmErrorKind::Syntax,
                        "directive requires an argument",
                        name,
                    ))
                } else {
                    Ok(())
                }
            }
            DirFlags::IdRequired => {
                if namevals.first().and_then(|nv| nv.as_id()).is_none() {
                    Err(AsmError::with_param(
                        AsmErrorKind::Syntax,
                        "directive requires an identifier argument",
                        name,
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop_handler(_info: &mut DirectiveInfo) -> Result<(), AsmError> {
        Ok(())
    }

    #[test]
    fn lookup_is_ascii_case_insensitive() {
        let mut dirs = Directives::new();
        dirs.add("bits", DirHandler::Func(nop_handler), DirFlags::ArgRequired);
        assert!(dirs.contains("BITS"));
        assert!(dirs.contains("Bits"));
        assert!(!dirs.contains("bit"));
    }

    #[test]
    fn arg_required_is_validated() {
        let err =
            Directives::check_args("bits", DirFlags::ArgRequired, &[]).unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Syntax);

        let nv = vec![NameValue::expr(Expr::int(32), Span::default())];
        assert!(Directives::check_args("bits", DirFlags::ArgRequired, &nv).is_ok());
    }

    #[test]
    fn id_required_rejects_expressions() {
        let nv = vec![NameValue::expr(Expr::int(1), Span::default())];
        assert!(Directives::check_args("global", DirFlags::IdRequired, &nv).is_err());
        let nv = vec![NameValue::id("main", Span::default())];
        assert!(Directives::check_args("global", DirFlags::IdRequired, &nv).is_ok());
    }
}
