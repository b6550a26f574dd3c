// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbols and the per-object symbol table.
//!
//! A symbol is unique by name within an object. The table preserves
//! insertion order so object-format output is deterministic, and owns the
//! distinguished *absolute symbol*: an empty-named EQU that always evaluates
//! to zero and is never emitted to any output format.

use std::collections::HashMap;

use crate::core::bytecode::Location;
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics, Span};
use crate::core::expr::Expr;
use crate::core::intnum::IntNum;

/// Non-owning handle to a symbol; valid for the lifetime of the table.
pub type SymbolRef = usize;

/// Status bits.
pub mod status {
    pub const USED: u8 = 1 << 0;
    pub const DEFINED: u8 = 1 << 1;
    pub const VALUED: u8 = 1 << 2;
}

/// Visibility bits. EXTERN and COMMON are mutually exclusive.
pub mod vis {
    pub const LOCAL: u8 = 0;
    pub const GLOBAL: u8 = 1 << 0;
    pub const COMMON: u8 = 1 << 1;
    pub const EXTERN: u8 = 1 << 2;
    /// Explicitly declared local.
    pub const DLOCAL: u8 = 1 << 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    /// Declared but not yet defined (EXTERN/COMMON end up here).
    Unknown,
    Equ,
    Label,
    /// Reserved for format/arch internals; no expression or location.
    Special,
}

/// A named entity in the object.
#[derive(Debug)]
pub struct Symbol {
    name: String,
    ty: SymbolType,
    status: u8,
    visibility: u8,
    def_span: Span,
    decl_span: Span,
    use_span: Span,
    equ: Option<Expr>,
    equ_value: Option<IntNum>,
    label: Option<Location>,
    common_size: Option<Expr>,
}

impl Symbol {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: SymbolType::Unknown,
            status: 0,
            visibility: vis::LOCAL,
            def_span: Span::default(),
            decl_span: Span::default(),
            use_span: Span::default(),
            equ: None,
            equ_value: None,
            label: None,
            common_size: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol_type(&self) -> SymbolType {
        self.ty
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn visibility(&self) -> u8 {
        self.visibility
    }

    pub fn is_defined(&self) -> bool {
        self.status & status::DEFINED != 0
    }

    pub fn is_used(&self) -> bool {
        self.status & status::USED != 0
    }

    pub fn is_valued(&self) -> bool {
        self.status & status::VALUED != 0
    }

    pub fn is_special(&self) -> bool {
        self.ty == SymbolType::Special
    }

    /// The distinguished zero-valued sentinel created with the table.
    pub fn is_absolute(&self) -> bool {
        self.name.is_empty() && self.ty == SymbolType::Equ && !self.def_span.is_valid()
    }

    pub fn def_span(&self) -> Span {
        self.def_span
    }

    pub fn decl_span(&self) -> Span {
        self.decl_span
    }

    pub fn use_span(&self) -> Span {
        self.use_span
    }

    /// EQU expression, present once defined via `define_equ`.
    pub fn equ(&self) -> Option<&Expr> {
        self.equ.as_ref()
    }

    /// Cached EQU value, present once VALUED.
    pub fn equ_value(&self) -> Option<&IntNum> {
        self.equ_value.as_ref()
    }

    /// Label location. None for EXTERN/COMMON and non-label symbols.
    pub fn label(&self) -> Option<Location> {
        self.label
    }

    pub fn common_size(&self) -> Option<&Expr> {
        self.common_size.as_ref()
    }
}

/// Insertion-ordered, name-indexed symbol table.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolRef>,
}

impl SymbolTable {
    /// Handle of the absolute symbol.
    pub const ABSOLUTE: SymbolRef = 0;

    pub fn new() -> Self {
        let mut table = Self {
            symbols: Vec::new(),
            by_name: HashMap::new(),
        };
        // The absolute symbol: empty name, EQU 0, no definition site.
        let mut abs = Symbol::new("");
        abs.ty = SymbolType::Equ;
        abs.status = status::DEFINED | status::VALUED;
        abs.equ = Some(Expr::int(0));
        abs.equ_value = Some(IntNum::zero());
        table.symbols.push(abs);
        table
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, r: SymbolRef) -> &Symbol {
        &self.symbols[r]
    }

    fn get_mut(&mut self, r: SymbolRef) -> &mut Symbol {
        &mut self.symbols[r]
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolRef> {
        if name.is_empty() {
            return None;
        }
        self.by_name.get(name).copied()
    }

    /// Fetch or create the named symbol without changing its status.
    pub fn get_or_create(&mut self, name: &str) -> SymbolRef {
        if let Some(&r) = self.by_name.get(name) {
            return r;
        }
        let r = self.symbols.len();
        self.symbols.push(Symbol::new(name));
        self.by_name.insert(name.to_string(), r);
        r
    }

    /// Iterate in insertion order, absolute symbol included.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolRef, &Symbol)> {
        self.symbols.iter().enumerate()
    }

    /// Mark a symbol used, recording the first use site.
    pub fn use_at(&mut self, name: &str, span: Span) -> SymbolRef {
        let r = self.get_or_create(name);
        let sym = self.get_mut(r);
        if !sym.use_span.is_valid() {
            sym.use_span = span;
        }
        sym.status |= status::USED;
        r
    }

    /// Define as an EQU expression. VALUED is deferred until the expression
    /// reduces to an integer.
    pub fn define_equ(&mut self, name: &str, expr: Expr, span: Span) -> Result<SymbolRef, AsmError> {
        let r = self.get_or_create(name);
        let sym = self.get_mut(r);
        if sym.is_defined() || sym.visibility & (vis::EXTERN | vis::COMMON) != 0 {
            return Err(AsmError::with_param(
                AsmErrorKind::Redefined,
                "symbol defined more than once",
                name,
            ));
        }
        sym.ty = SymbolType::Equ;
        sym.status |= status::DEFINED;
        if !sym.def_span.is_valid() {
            sym.def_span = span;
        }
        if let Some(v) = expr.get_intnum() {
            sym.equ_value = Some(v.clone());
            sym.status |= status::VALUED;
        }
        sym.equ = Some(expr);
        Ok(r)
    }

    /// Define as a label at the given location.
    pub fn define_label(
        &mut self,
        name: &str,
        loc: Location,
        span: Span,
    ) -> Result<SymbolRef, AsmError> {
        let r = self.get_or_create(name);
        let sym = self.get_mut(r);
        if sym.is_defined() || sym.visibility & (vis::EXTERN | vis::COMMON) != 0 {
            return Err(AsmError::with_param(
                AsmErrorKind::Redefined,
                "symbol defined more than once",
                name,
            ));
        }
        sym.ty = SymbolType::Label;
        sym.status |= status::DEFINED | status::VALUED;
        if !sym.def_span.is_valid() {
            sym.def_span = span;
        }
        sym.label = Some(loc);
        Ok(r)
    }

    /// Define a special symbol for format/arch internals.
    pub fn define_special(&mut self, name: &str, visibility: u8, span: Span) -> SymbolRef {
        let r = self.get_or_create(name);
        let sym = self.get_mut(r);
        sym.ty = SymbolType::Special;
        sym.status |= status::DEFINED | status::VALUED;
        sym.visibility |= visibility;
        if !sym.def_span.is_valid() {
            sym.def_span = span;
        }
        r
    }

    /// Merge visibility bits. EXTERN and COMMON are mutually exclusive, and
    /// re-declaring with a different exclusive visibility is an error.
    pub fn declare(&mut self, name: &str, visibility: u8, span: Span) -> Result<SymbolRef, AsmError> {
        let r = self.get_or_create(name);
        let sym = self.get_mut(r);
        let merged = sym.visibility | visibility;
        if merged & vis::EXTERN != 0 && merged & vis::COMMON != 0 {
            return Err(AsmError::with_param(
                AsmErrorKind::Redefined,
                "symbol declared both EXTERN and COMMON",
                name,
            ));
        }
        if sym.is_defined() && visibility & (vis::EXTERN | vis::COMMON) != 0 {
            return Err(AsmError::with_param(
                AsmErrorKind::Redefined,
                "cannot declare a defined symbol EXTERN or COMMON",
                name,
            ));
        }
        sym.visibility = merged;
        if !sym.decl_span.is_valid() {
            sym.decl_span = span;
        }
        Ok(r)
    }

    /// Attach a size expression to a COMMON symbol.
    pub fn set_common_size(&mut self, r: SymbolRef, size: Expr) {
        self.get_mut(r).common_size = Some(size);
    }

    /// Cache the resolved value of an EQU symbol and mark it VALUED.
    pub fn set_equ_value(&mut self, r: SymbolRef, value: IntNum) {
        let sym = self.get_mut(r);
        sym.equ_value = Some(value);
        sym.status |= status::VALUED;
    }

    /// Post-parse check: every symbol that was used but never defined or
    /// declared EXTERN/COMMON either becomes EXTERN (`undef_extern`) or is
    /// reported undefined.
    pub fn finalize(&mut self, undef_extern: bool, diags: &mut Diagnostics) {
        for sym in &mut self.symbols {
            if sym.is_used()
                && !sym.is_defined()
                && sym.visibility & (vis::EXTERN | vis::COMMON) == 0
            {
                if undef_extern {
                    sym.visibility |= vis::EXTERN;
                    sym.status |= status::DEFINED;
                } else {
                    diags.error(
                        sym.use_span,
                        AsmError::with_param(
                            AsmErrorKind::Undefined,
                            "undefined symbol",
                            &sym.name,
                        ),
                    );
                }
            }
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(bc: usize) -> Location {
        Location {
            section: 0,
            bc,
            off: 0,
        }
    }

    #[test]
    fn absolute_symbol_exists_and_is_zero() {
        let table = SymbolTable::new();
        let abs = table.get(SymbolTable::ABSOLUTE);
        assert!(abs.is_absolute());
        assert_eq!(abs.equ_value(), Some(&IntNum::zero()));
    }

    #[test]
    fn label_definition_and_redefinition() {
        let mut table = SymbolTable::new();
        let r = table
            .define_label("start", loc(1), Span::at_line(1))
            .unwrap();
        assert_eq!(table.get(r).symbol_type(), SymbolType::Label);
        assert!(table.get(r).is_valued());
        let err = table
            .define_label("start", loc(2), Span::at_line(2))
            .unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Redefined);
    }

    #[test]
    fn equ_valued_only_when_constant() {
        let mut table = SymbolTable::new();
        let constant = table
            .define_equ("seven", Expr::int(7), Span::at_line(1))
            .unwrap();
        assert!(table.get(constant).is_valued());

        let forward = table.use_at("later", Span::at_line(2));
        let equ = table
            .define_equ("alias", Expr::sym(forward), Span::at_line(2))
            .unwrap();
        assert!(!table.get(equ).is_valued());
        table.set_equ_value(equ, IntNum::new(3));
        assert!(table.get(equ).is_valued());
    }

    #[test]
    fn extern_common_conflict() {
        let mut table = SymbolTable::new();
        table.declare("x", vis::EXTERN, Span::at_line(1)).unwrap();
        let err = table
            .declare("x", vis::COMMON, Span::at_line(2))
            .unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Redefined);
    }

    #[test]
    fn finalize_reports_undefined() {
        let mut table = SymbolTable::new();
        table.use_at("ghost", Span::at_line(5));
        let mut diags = Diagnostics::new();
        table.finalize(false, &mut diags);
        assert_eq!(diags.num_errors(), 1);
        assert!(diags.diagnostics()[0].error.message().contains("ghost"));
    }

    #[test]
    fn finalize_can_convert_to_extern() {
        let mut table = SymbolTable::new();
        let r = table.use_at("imported", Span::at_line(5));
        let mut diags = Diagnostics::new();
        table.finalize(true, &mut diags);
        assert_eq!(diags.num_errors(), 0);
        assert!(table.get(r).visibility() & vis::EXTERN != 0);
    }

    #[test]
    fn first_use_span_is_preserved() {
        let mut table = SymbolTable::new();
        table.use_at("s", Span::at_line(3));
        let r = table.use_at("s", Span::at_line(9));
        assert_eq!(table.get(r).use_span().line, 3);
    }
}
