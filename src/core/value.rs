// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Relocatable values.
//!
//! A [`Value`] is the unit of relocation: an absolute expression plus at
//! most one relative symbol, at most one subtractive symbol or location,
//! and an optional WRT override. Shapes that cannot be brought into this
//! form are rejected as `TooComplex` — no output format can relocate them.

use crate::core::bytecode::Location;
use crate::core::diag::{AsmError, AsmErrorKind};
use crate::core::expr::{self, Expr, Op, SimplifyCtx, Term};
use crate::core::intnum::IntNum;
use crate::core::symbol::SymbolRef;

/// A sized, relocatable expression.
#[derive(Debug, Clone)]
pub struct Value {
    /// Absolute portion; `None` means zero.
    pub abs: Option<Expr>,
    /// Relocation target.
    pub rel: Option<SymbolRef>,
    /// Relocate-against override.
    pub wrt: Option<SymbolRef>,
    /// Subtractive symbol for composite differences.
    pub sub_sym: Option<SymbolRef>,
    /// Subtractive location (e.g. the end of a PC-relative instruction).
    pub sub_loc: Option<Location>,
    /// Size of the emitted field, in bits.
    pub size: u32,
    /// Right-shift applied before emission.
    pub rshift: u32,
    pub signed: bool,
    pub section_rel: bool,
    pub seg_of: bool,
    pub ip_rel: bool,
    pub jump_target: bool,
    /// Suppress the range warning on truncation.
    pub no_warn: bool,
    /// Bytes between the end of this value field and the end of the owning
    /// instruction; selects the Win64 REL32_N relocation variants.
    pub next_insn: u8,
}

impl Value {
    pub fn new(size: u32) -> Self {
        Self {
            abs: None,
            rel: None,
            wrt: None,
            sub_sym: None,
            sub_loc: None,
            size,
            rshift: 0,
            signed: false,
            section_rel: false,
            seg_of: false,
            ip_rel: false,
            jump_target: false,
            no_warn: false,
            next_insn: 0,
        }
    }

    pub fn from_expr(expr: Expr, size: u32) -> Self {
        let mut v = Self::new(size);
        v.abs = Some(expr);
        v
    }

    pub fn has_sub(&self) -> bool {
        self.sub_sym.is_some() || self.sub_loc.is_some()
    }

    pub fn is_relative(&self) -> bool {
        self.rel.is_some()
    }

    /// Split the absolute expression into (absolute, relative − subtractive,
    /// WRT) form. Fails `TooComplex` when more than one relative or more
    /// than one subtractive candidate remains after simplification.
    pub fn finalize(&mut self, ctx: &dyn SimplifyCtx) -> Result<(), AsmError> {
        let Some(mut expr) = self.abs.take() else {
            return Ok(());
        };

        if expr.extract_seg() {
            self.seg_of = true;
        }
        if let Some(wrt) = expr.extract_wrt() {
            match wrt.get_symbol() {
                Some(s) => self.wrt = Some(s),
                None => {
                    return Err(AsmError::new(
                        AsmErrorKind::TooComplex,
                        "WRT target must be a single symbol",
                    ))
                }
            }
        }
        expr.simplify(ctx, false)?;

        // Lone leaves are the common case.
        if let Some(s) = expr.get_symbol() {
            self.set_rel(s)?;
            return Ok(());
        }
        if expr.get_intnum().is_some() {
            self.abs = Some(expr);
            return Ok(());
        }

        let terms = expr.terms();
        if !matches!(terms.last(), Some(Term::Op(Op::Add, _))) {
            // No addition at the root: relocatable only if it carries no
            // symbol or location references at all.
            if expr.has_references() {
                return Err(AsmError::new(
                    AsmErrorKind::TooComplex,
                    "expression too complex to relocate",
                ));
            }
            self.abs = Some(expr);
            return Ok(());
        }

        let mut abs_pieces: Vec<Vec<Term>> = Vec::new();
        for (start, end) in expr::child_spans(terms) {
            let child = &terms[start..end];
            match child {
                [Term::Sym(s)] => {
                    self.set_rel(*s)?;
                }
                [Term::Sym(s), Term::Op(Op::Neg, 1)] => {
                    if self.has_sub() {
                        return Err(AsmError::new(
                            AsmErrorKind::TooComplex,
                            "more than one subtractive symbol in expression",
                        ));
                    }
                    self.sub_sym = Some(*s);
                }
                [Term::Loc(l), Term::Op(Op::Neg, 1)] => {
                    if self.has_sub() {
                        return Err(AsmError::new(
                            AsmErrorKind::TooComplex,
                            "more than one subtractive symbol in expression",
                        ));
                    }
                    self.sub_loc = Some(*l);
                }
                other => {
                    // Absolute material must carry no references.
                    if other
                        .iter()
                        .any(|t| matches!(t, Term::Sym(_) | Term::Loc(_)))
                    {
                        return Err(AsmError::new(
                            AsmErrorKind::TooComplex,
                            "expression too complex to relocate",
                        ));
                    }
                    abs_pieces.push(other.to_vec());
                }
            }
        }
        if !abs_pieces.is_empty() {
            let exprs: Vec<Expr> = abs_pieces.into_iter().map(Expr::from_terms).collect();
            let mut it = exprs.into_iter();
            let mut acc = it.next().expect("nonempty abs pieces");
            for e in it {
                acc = Expr::binary(Op::Add, acc, e);
            }
            self.abs = Some(acc);
        }
        Ok(())
    }

    fn set_rel(&mut self, sym: SymbolRef) -> Result<(), AsmError> {
        if self.rel.is_some() {
            return Err(AsmError::new(
                AsmErrorKind::TooComplex,
                "more than one relative symbol in expression",
            ));
        }
        self.rel = Some(sym);
        Ok(())
    }

    /// Fold the absolute portion to an integer. The context may fold label
    /// distances; a remaining reference is `NotConstant`.
    pub fn abs_intnum(&self, ctx: &dyn SimplifyCtx) -> Result<IntNum, AsmError> {
        let Some(abs) = &self.abs else {
            return Ok(IntNum::zero());
        };
        let mut abs = abs.clone();
        abs.simplify(ctx, true)?;
        match abs.get_intnum() {
            Some(v) => Ok(v.clone()),
            None => Err(AsmError::new(
                AsmErrorKind::NotConstant,
                "value is not constant",
            )),
        }
    }
}

impl Expr {
    /// Rebuild an expression from raw postfix terms (crate-internal; used
    /// by the value splitter).
    pub(crate) fn from_terms(terms: Vec<Term>) -> Expr {
        let mut e = Expr::int(0);
        e.replace_terms(terms);
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::NullSimplifyCtx;

    #[test]
    fn pure_constant_stays_absolute() {
        let mut v = Value::from_expr(Expr::int(7), 32);
        v.finalize(&NullSimplifyCtx).unwrap();
        assert!(v.rel.is_none());
        assert_eq!(v.abs_intnum(&NullSimplifyCtx).unwrap(), IntNum::new(7));
    }

    #[test]
    fn single_symbol_becomes_relative() {
        let mut v = Value::from_expr(Expr::sym(3), 32);
        v.finalize(&NullSimplifyCtx).unwrap();
        assert_eq!(v.rel, Some(3));
        assert!(v.abs.is_none());
    }

    #[test]
    fn sym_plus_const_splits() {
        let e = Expr::binary(Op::Add, Expr::sym(3), Expr::int(8));
        let mut v = Value::from_expr(e, 32);
        v.finalize(&NullSimplifyCtx).unwrap();
        assert_eq!(v.rel, Some(3));
        assert_eq!(v.abs_intnum(&NullSimplifyCtx).unwrap(), IntNum::new(8));
    }

    #[test]
    fn sym_minus_sym_keeps_subtractive() {
        let e = Expr::binary(Op::Sub, Expr::sym(3), Expr::sym(4));
        let mut v = Value::from_expr(e, 32);
        v.finalize(&NullSimplifyCtx).unwrap();
        assert_eq!(v.rel, Some(3));
        assert_eq!(v.sub_sym, Some(4));
    }

    #[test]
    fn two_positive_symbols_are_too_complex() {
        let e = Expr::binary(Op::Add, Expr::sym(3), Expr::sym(4));
        let mut v = Value::from_expr(e, 32);
        let err = v.finalize(&NullSimplifyCtx).unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::TooComplex);
    }

    #[test]
    fn wrt_is_extracted() {
        let e = Expr::binary(Op::Wrt, Expr::sym(3), Expr::sym(9));
        let mut v = Value::from_expr(e, 32);
        v.finalize(&NullSimplifyCtx).unwrap();
        assert_eq!(v.rel, Some(3));
        assert_eq!(v.wrt, Some(9));
    }

    #[test]
    fn symbol_times_constant_is_too_complex() {
        let e = Expr::binary(Op::Mul, Expr::sym(3), Expr::int(2));
        let mut v = Value::from_expr(e, 32);
        assert!(v.finalize(&NullSimplifyCtx).is_err());
    }
}
