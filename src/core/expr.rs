// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbolic expressions.
//!
//! An [`Expr`] is stored as a flattened postfix vector of terms rather than a
//! heap tree: simplification rewrites in place and the optimiser touches many
//! small expressions, so avoiding per-node allocation pays off.
//!
//! [`Expr::simplify`] folds constant subtrees, strips identities (x+0, x*1),
//! canonicalises subtraction into addition-of-negation, inlines EQU symbols,
//! and — when distance calculation is enabled — reduces differences between
//! two labels of the same section to an integer distance.

use crate::core::bytecode::Location;
use crate::core::diag::{AsmError, AsmErrorKind};
use crate::core::intnum::IntNum;
use crate::core::symbol::SymbolRef;

/// Operators of the fixed expression grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    LAnd,
    LOr,
    LNot,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// Segment of a label (`SEG x`).
    Seg,
    /// Relocate-against override (`a WRT b`).
    Wrt,
    /// Segment-offset pair (`seg:off`).
    SegOff,
}

/// One postfix term: a leaf or an operator with its arity.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Int(IntNum),
    Float(f64),
    Sym(SymbolRef),
    Loc(Location),
    Reg(u32),
    Op(Op, u8),
}

/// Context consulted during simplification.
///
/// EQU inlining and the label-distance law both need the symbol table and
/// (for distances) current bytecode offsets; the core stays decoupled from
/// the object model through this trait.
pub trait SimplifyCtx {
    /// The defining expression of an EQU symbol, if `sym` is one.
    fn equ_expr(&self, sym: SymbolRef) -> Option<Expr>;

    /// The label location of `sym`, if it is a defined label.
    fn sym_location(&self, sym: SymbolRef) -> Option<Location>;

    /// Distance `to − from` when both lie in the same container and every
    /// intervening bytecode has a known length.
    fn calc_dist(&self, from: Location, to: Location) -> Option<IntNum>;
}

/// Context consulted during full evaluation to an integer.
pub trait EvalContext {
    fn resolve_sym(&self, sym: SymbolRef) -> Option<IntNum>;
    fn resolve_loc(&self, loc: Location) -> Option<IntNum>;
}

/// A no-op simplification context: no EQUs, no labels, no distances.
pub struct NullSimplifyCtx;

impl SimplifyCtx for NullSimplifyCtx {
    fn equ_expr(&self, _sym: SymbolRef) -> Option<Expr> {
        None
    }
    fn sym_location(&self, _sym: SymbolRef) -> Option<Location> {
        None
    }
    fn calc_dist(&self, _from: Location, _to: Location) -> Option<IntNum> {
        None
    }
}

const MAX_EQU_DEPTH: u32 = 64;

/// Flattened postfix expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    terms: Vec<Term>,
}

impl Expr {
    pub fn int(v: impl Into<IntNum>) -> Self {
        Expr {
            terms: vec![Term::Int(v.into())],
        }
    }

    pub fn float(v: f64) -> Self {
        Expr {
            terms: vec![Term::Float(v)],
        }
    }

    pub fn sym(sym: SymbolRef) -> Self {
        Expr {
            terms: vec![Term::Sym(sym)],
        }
    }

    pub fn loc(loc: Location) -> Self {
        Expr {
            terms: vec![Term::Loc(loc)],
        }
    }

    pub fn reg(code: u32) -> Self {
        Expr {
            terms: vec![Term::Reg(code)],
        }
    }

    pub fn unary(op: Op, mut operand: Expr) -> Self {
        operand.terms.push(Term::Op(op, 1));
        operand
    }

    pub fn binary(op: Op, mut lhs: Expr, rhs: Expr) -> Self {
        lhs.terms.extend(rhs.terms);
        lhs.terms.push(Term::Op(op, 2));
        lhs
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub(crate) fn replace_terms(&mut self, terms: Vec<Term>) {
        self.terms = terms;
    }

    /// The folded integer, if simplification reduced this to a constant.
    pub fn get_intnum(&self) -> Option<&IntNum> {
        match self.terms.as_slice() {
            [Term::Int(v)] => Some(v),
            _ => None,
        }
    }

    /// The single symbol reference, if that is the whole expression.
    pub fn get_symbol(&self) -> Option<SymbolRef> {
        match self.terms.as_slice() {
            [Term::Sym(s)] => Some(*s),
            _ => None,
        }
    }

    pub fn get_reg(&self) -> Option<u32> {
        match self.terms.as_slice() {
            [Term::Reg(r)] => Some(*r),
            _ => None,
        }
    }

    /// True if any term references the given symbol.
    pub fn references_sym(&self, sym: SymbolRef) -> bool {
        self.terms.iter().any(|t| matches!(t, Term::Sym(s) if *s == sym))
    }

    /// True if any term is a symbol or location reference.
    pub fn has_references(&self) -> bool {
        self.terms
            .iter()
            .any(|t| matches!(t, Term::Sym(_) | Term::Loc(_)))
    }

    /// Split off the right operand of a root `WRT`, leaving the left in
    /// place.
    pub fn extract_wrt(&mut self) -> Option<Expr> {
        self.extract_binary_root(Op::Wrt).map(|(lhs, rhs)| {
            self.terms = lhs;
            Expr { terms: rhs }
        })
    }

    /// Split a root `seg:off` node into (segment, offset), leaving the
    /// offset part in place.
    pub fn extract_seg_off(&mut self) -> Option<Expr> {
        self.extract_binary_root(Op::SegOff).map(|(lhs, rhs)| {
            self.terms = rhs;
            Expr { terms: lhs }
        })
    }

    /// Strip a root `SEG x`, leaving `x` and reporting that SEG was present.
    pub fn extract_seg(&mut self) -> bool {
        if let Some(Term::Op(Op::Seg, 1)) = self.terms.last() {
            self.terms.pop();
            true
        } else {
            false
        }
    }

    fn extract_binary_root(&mut self, op: Op) -> Option<(Vec<Term>, Vec<Term>)> {
        match self.terms.last() {
            Some(Term::Op(o, 2)) if *o == op => {}
            _ => return None,
        }
        let len = self.terms.len();
        let sizes = subtree_sizes(&self.terms);
        let rhs_end = len - 1;
        let rhs_start = rhs_end - sizes[rhs_end - 1];
        let lhs = self.terms[..rhs_start].to_vec();
        let rhs = self.terms[rhs_start..rhs_end].to_vec();
        Some((lhs, rhs))
    }

    /// Simplify in place: constant folding, identity stripping, EQU
    /// inlining, and (with `calc_dist`) the same-section distance law.
    pub fn simplify(&mut self, ctx: &dyn SimplifyCtx, calc_dist: bool) -> Result<(), AsmError> {
        let mut out = Vec::with_capacity(self.terms.len());
        simplify_range(&self.terms, ctx, calc_dist, 0, &mut out)?;
        self.terms = out;
        Ok(())
    }

    /// Fold to a single integer against an evaluation context.
    pub fn evaluate(&self, ctx: &dyn EvalContext) -> Result<IntNum, AsmError> {
        let mut stack: Vec<IntNum> = Vec::new();
        for term in &self.terms {
            match term {
                Term::Int(v) => stack.push(v.clone()),
                Term::Float(_) => {
                    return Err(AsmError::new(
                        AsmErrorKind::NotConstant,
                        "floating-point value in integer expression",
                    ))
                }
                Term::Reg(_) => {
                    return Err(AsmError::new(
                        AsmErrorKind::Type,
                        "register used in integer expression",
                    ))
                }
                Term::Sym(s) => match ctx.resolve_sym(*s) {
                    Some(v) => stack.push(v),
                    None => {
                        return Err(AsmError::new(
                            AsmErrorKind::NotConstant,
                            "expression references an unresolved symbol",
                        ))
                    }
                },
                Term::Loc(l) => match ctx.resolve_loc(*l) {
                    Some(v) => stack.push(v),
                    None => {
                        return Err(AsmError::new(
                            AsmErrorKind::NotConstant,
                            "expression references an unplaced location",
                        ))
                    }
                },
                Term::Op(op, n) => {
                    let n = *n as usize;
                    if stack.len() < n {
                        return Err(AsmError::new(
                            AsmErrorKind::Internal,
                            "malformed postfix expression",
                        ));
                    }
                    let args = stack.split_off(stack.len() - n);
                    stack.push(apply_op(*op, &args)?);
                }
            }
        }
        match stack.len() {
            1 => Ok(stack.pop().expect("nonempty stack")),
            _ => Err(AsmError::new(
                AsmErrorKind::Internal,
                "malformed postfix expression",
            )),
        }
    }
}

fn apply_op(op: Op, args: &[IntNum]) -> Result<IntNum, AsmError> {
    let bool_int = |b: bool| IntNum::new(b as i64);
    Ok(match (op, args) {
        (Op::Neg, [a]) => a.neg(),
        (Op::Not, [a]) => a.not(),
        (Op::LNot, [a]) => bool_int(a.is_zero()),
        (Op::Seg | Op::Wrt | Op::SegOff, _) => {
            return Err(AsmError::new(
                AsmErrorKind::NotConstant,
                "segment expression cannot be evaluated to an integer",
            ))
        }
        (Op::Add, args) => {
            let mut acc = IntNum::zero();
            for a in args {
                acc = acc.add(a);
            }
            acc
        }
        (Op::Mul, args) => {
            let mut acc = IntNum::one();
            for a in args {
                acc = acc.mul(a);
            }
            acc
        }
        (Op::Sub, [a, b]) => a.sub(b),
        (Op::Div, [a, b]) => a.checked_div(b)?,
        (Op::Mod, [a, b]) => a.checked_mod(b)?,
        (Op::And, [a, b]) => a.bitand(b),
        (Op::Or, [a, b]) => a.bitor(b),
        (Op::Xor, [a, b]) => a.bitxor(b),
        (Op::Shl, [a, b]) => a.shl(b.get_uint().0.min(u32::MAX as u64) as u32),
        (Op::Shr, [a, b]) => a.shr(b.get_uint().0.min(u32::MAX as u64) as u32),
        (Op::LAnd, [a, b]) => bool_int(!a.is_zero() && !b.is_zero()),
        (Op::LOr, [a, b]) => bool_int(!a.is_zero() || !b.is_zero()),
        (Op::Eq, [a, b]) => bool_int(a == b),
        (Op::Ne, [a, b]) => bool_int(a != b),
        (Op::Lt, [a, b]) => bool_int(a < b),
        (Op::Gt, [a, b]) => bool_int(a > b),
        (Op::Le, [a, b]) => bool_int(a <= b),
        (Op::Ge, [a, b]) => bool_int(a >= b),
        _ => {
            return Err(AsmError::new(
                AsmErrorKind::Internal,
                "operator arity mismatch",
            ))
        }
    })
}

/// Size of the subtree ending at each index of a postfix slice.
fn subtree_sizes(terms: &[Term]) -> Vec<usize> {
    let mut sizes = vec![0usize; terms.len()];
    let mut stack: Vec<usize> = Vec::new();
    for (i, t) in terms.iter().enumerate() {
        match t {
            Term::Op(_, n) => {
                let mut total = 1;
                for _ in 0..*n {
                    let c = stack.pop().expect("malformed postfix expression");
                    total += sizes[c];
                }
                sizes[i] = total;
                stack.push(i);
            }
            _ => {
                sizes[i] = 1;
                stack.push(i);
            }
        }
    }
    sizes
}

/// Child subtree ranges of the root operator, left to right.
pub(crate) fn child_spans(terms: &[Term]) -> Vec<(usize, usize)> {
    let Some(Term::Op(_, n)) = terms.last() else {
        return Vec::new();
    };
    let sizes = subtree_sizes(terms);
    let mut spans = Vec::with_capacity(*n as usize);
    let mut end = terms.len() - 1;
    for _ in 0..*n {
        let start = end - sizes[end - 1];
        spans.push((start, end));
        end = start;
    }
    spans.reverse();
    spans
}

/// A simplified addend: a child of a (canonicalised) addition node.
struct Addend {
    terms: Vec<Term>,
    negated: bool,
}

impl Addend {
    fn loc_of(&self, ctx: &dyn SimplifyCtx) -> Option<Location> {
        match self.terms.as_slice() {
            [Term::Loc(l)] => Some(*l),
            [Term::Sym(s)] => ctx.sym_location(*s),
            _ => None,
        }
    }

    fn into_terms(mut self) -> Vec<Term> {
        if self.negated {
            self.terms.push(Term::Op(Op::Neg, 1));
        }
        self.terms
    }
}

fn simplify_range(
    terms: &[Term],
    ctx: &dyn SimplifyCtx,
    calc_dist: bool,
    depth: u32,
    out: &mut Vec<Term>,
) -> Result<(), AsmError> {
    match terms.last().expect("empty expression") {
        Term::Sym(s) => {
            if let Some(equ) = ctx.equ_expr(*s) {
                if depth >= MAX_EQU_DEPTH {
                    return Err(AsmError::new(
                        AsmErrorKind::NotConstant,
                        "circular reference in EQU expression",
                    ));
                }
                return simplify_range(equ.terms(), ctx, calc_dist, depth + 1, out);
            }
            out.push(Term::Sym(*s));
            Ok(())
        }
        Term::Int(_) | Term::Float(_) | Term::Loc(_) | Term::Reg(_) => {
            out.push(terms.last().expect("leaf term").clone());
            Ok(())
        }
        Term::Op(op, _) => {
            let op = *op;
            let mut children: Vec<Vec<Term>> = Vec::new();
            for (start, end) in child_spans(terms) {
                let mut child = Vec::with_capacity(end - start);
                simplify_range(&terms[start..end], ctx, calc_dist, depth, &mut child)?;
                children.push(child);
            }
            simplify_node(op, children, ctx, calc_dist, out)
        }
    }
}

fn simplify_node(
    op: Op,
    children: Vec<Vec<Term>>,
    ctx: &dyn SimplifyCtx,
    calc_dist: bool,
    out: &mut Vec<Term>,
) -> Result<(), AsmError> {
    let child_int = |c: &[Term]| match c {
        [Term::Int(v)] => Some(v.clone()),
        _ => None,
    };

    match op {
        Op::Add | Op::Sub => {
            // Canonicalise: a − b becomes a + (−b), then flatten nested
            // additions so the distance law sees all addends at one level.
            let mut addends: Vec<Addend> = Vec::new();
            let mut konst = IntNum::zero();
            let sub = op == Op::Sub;
            let n = children.len();
            for (idx, child) in children.into_iter().enumerate() {
                let negate = sub && idx == n - 1;
                flatten_addend(child, negate, &mut addends, &mut konst);
            }
            if calc_dist {
                fold_distances(&mut addends, &mut konst, ctx);
            }
            let const_is_zero = konst.is_zero();
            let mut pieces: Vec<Vec<Term>> =
                addends.into_iter().map(Addend::into_terms).collect();
            if !const_is_zero || pieces.is_empty() {
                pieces.push(vec![Term::Int(konst)]);
            }
            push_nary(Op::Add, pieces, out);
            Ok(())
        }
        Op::Mul => {
            let mut konst = IntNum::one();
            let mut rest: Vec<Vec<Term>> = Vec::new();
            for child in children {
                match child_int(&child) {
                    Some(v) => konst = konst.mul(&v),
                    None => rest.push(child),
                }
            }
            if konst.is_zero() {
                out.push(Term::Int(IntNum::zero()));
                return Ok(());
            }
            if konst != IntNum::one() || rest.is_empty() {
                rest.push(vec![Term::Int(konst)]);
            }
            push_nary(Op::Mul, rest, out);
            Ok(())
        }
        Op::Neg => {
            let child = children.into_iter().next().expect("neg child");
            match child.as_slice() {
                [Term::Int(v)] => out.push(Term::Int(v.neg())),
                // −(−x) = x
                [inner @ .., Term::Op(Op::Neg, 1)] => out.extend_from_slice(inner),
                _ => {
                    out.extend(child);
                    out.push(Term::Op(Op::Neg, 1));
                }
            }
            Ok(())
        }
        Op::Not | Op::LNot => {
            let child = children.into_iter().next().expect("unary child");
            match child_int(&child) {
                Some(v) => {
                    let folded = apply_op(op, &[v])?;
                    out.push(Term::Int(folded));
                }
                None => {
                    out.extend(child);
                    out.push(Term::Op(op, 1));
                }
            }
            Ok(())
        }
        Op::Seg => {
            let child = children.into_iter().next().expect("seg child");
            out.extend(child);
            out.push(Term::Op(Op::Seg, 1));
            Ok(())
        }
        Op::Wrt | Op::SegOff => {
            for child in children {
                out.extend(child);
            }
            out.push(Term::Op(op, 2));
            Ok(())
        }
        _ => {
            // Remaining binary operators: fold two constants, strip the
            // no-op identities, otherwise emit as-is.
            let mut it = children.into_iter();
            let lhs = it.next().expect("binary lhs");
            let rhs = it.next().expect("binary rhs");
            let li = child_int(&lhs);
            let ri = child_int(&rhs);
            if let (Some(a), Some(b)) = (&li, &ri) {
                out.push(Term::Int(apply_op(op, &[a.clone(), b.clone()])?));
                return Ok(());
            }
            let identity = match (op, &ri) {
                (Op::Shl | Op::Shr | Op::Or | Op::Xor, Some(v)) if v.is_zero() => true,
                (Op::Div, Some(v)) if *v == IntNum::one() => true,
                (Op::And, Some(v)) if *v == IntNum::new(-1) => true,
                _ => false,
            };
            if identity {
                out.extend(lhs);
                return Ok(());
            }
            out.extend(lhs);
            out.extend(rhs);
            out.push(Term::Op(op, 2));
            Ok(())
        }
    }
}

/// Fold one simplified child into an addend list and constant accumulator.
fn flatten_addend(
    child: Vec<Term>,
    negate: bool,
    addends: &mut Vec<Addend>,
    konst: &mut IntNum,
) {
    match child.as_slice() {
        [Term::Int(v)] => {
            *konst = if negate { konst.sub(v) } else { konst.add(v) };
        }
        [inner @ .., Term::Op(Op::Neg, 1)] if inner.len() == 1 => {
            addends.push(Addend {
                terms: inner.to_vec(),
                negated: !negate,
            });
        }
        [.., Term::Op(Op::Add, n)] => {
            let n = *n;
            let spans = child_spans(&child);
            debug_assert_eq!(spans.len(), n as usize);
            for (start, end) in spans {
                flatten_addend(child[start..end].to_vec(), negate, addends, konst);
            }
        }
        _ => {
            addends.push(Addend {
                terms: child,
                negated: negate,
            });
        }
    }
}

/// Pair positive and negative same-section label references and fold each
/// pair into the constant accumulator.
fn fold_distances(addends: &mut Vec<Addend>, konst: &mut IntNum, ctx: &dyn SimplifyCtx) {
    let mut i = 0;
    while i < addends.len() {
        let Some(loc_i) = addends[i].loc_of(ctx) else {
            i += 1;
            continue;
        };
        let mut matched = None;
        for (j, other) in addends.iter().enumerate() {
            if j == i || other.negated == addends[i].negated {
                continue;
            }
            let Some(loc_j) = other.loc_of(ctx) else {
                continue;
            };
            if loc_i.section != loc_j.section {
                continue;
            }
            let (from, to) = if addends[i].negated {
                (loc_i, loc_j)
            } else {
                (loc_j, loc_i)
            };
            if let Some(dist) = ctx.calc_dist(from, to) {
                matched = Some((j, dist));
                break;
            }
        }
        if let Some((j, dist)) = matched {
            *konst = konst.add(&dist);
            let (a, b) = if i < j { (i, j) } else { (j, i) };
            addends.remove(b);
            addends.remove(a);
            // Restart pairing at the shifted position.
            i = a;
        } else {
            i += 1;
        }
    }
}

fn push_nary(op: Op, pieces: Vec<Vec<Term>>, out: &mut Vec<Term>) {
    if pieces.len() == 1 {
        out.extend(pieces.into_iter().next().expect("single piece"));
        return;
    }
    let n = pieces.len();
    for piece in pieces {
        out.extend(piece);
    }
    out.push(Term::Op(op, n as u8));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simplified(mut e: Expr) -> Expr {
        e.simplify(&NullSimplifyCtx, false).unwrap();
        e
    }

    #[test]
    fn constant_folding() {
        let e = Expr::binary(Op::Add, Expr::int(2), Expr::int(3));
        assert_eq!(simplified(e).get_intnum(), Some(&IntNum::new(5)));

        let e = Expr::binary(
            Op::Mul,
            Expr::binary(Op::Sub, Expr::int(10), Expr::int(4)),
            Expr::int(7),
        );
        assert_eq!(simplified(e).get_intnum(), Some(&IntNum::new(42)));
    }

    #[test]
    fn identities_are_stripped() {
        let e = Expr::binary(Op::Add, Expr::sym(3), Expr::int(0));
        assert_eq!(simplified(e).terms(), &[Term::Sym(3)]);

        let e = Expr::binary(Op::Mul, Expr::sym(3), Expr::int(1));
        assert_eq!(simplified(e).terms(), &[Term::Sym(3)]);

        let e = Expr::binary(Op::Shl, Expr::sym(3), Expr::int(0));
        assert_eq!(simplified(e).terms(), &[Term::Sym(3)]);
    }

    #[test]
    fn mul_by_zero_collapses() {
        let e = Expr::binary(Op::Mul, Expr::sym(1), Expr::int(0));
        assert_eq!(simplified(e).get_intnum(), Some(&IntNum::zero()));
    }

    #[test]
    fn double_negation_cancels() {
        let e = Expr::unary(Op::Neg, Expr::unary(Op::Neg, Expr::sym(2)));
        assert_eq!(simplified(e).terms(), &[Term::Sym(2)]);
    }

    #[test]
    fn division_by_zero_reported() {
        let mut e = Expr::binary(Op::Div, Expr::int(1), Expr::int(0));
        let err = e.simplify(&NullSimplifyCtx, false).unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::ZeroDivision);
    }

    #[test]
    fn subtraction_folds_through_addition() {
        // (sym + 5) - 5 leaves just the symbol
        let e = Expr::binary(
            Op::Sub,
            Expr::binary(Op::Add, Expr::sym(7), Expr::int(5)),
            Expr::int(5),
        );
        assert_eq!(simplified(e).terms(), &[Term::Sym(7)]);
    }

    #[test]
    fn extract_wrt_splits_root() {
        let mut e = Expr::binary(Op::Wrt, Expr::sym(1), Expr::sym(2));
        let wrt = e.extract_wrt().unwrap();
        assert_eq!(e.get_symbol(), Some(1));
        assert_eq!(wrt.get_symbol(), Some(2));
    }

    #[test]
    fn evaluate_with_context() {
        struct Ctx;
        impl EvalContext for Ctx {
            fn resolve_sym(&self, sym: SymbolRef) -> Option<IntNum> {
                (sym == 4).then(|| IntNum::new(100))
            }
            fn resolve_loc(&self, _loc: Location) -> Option<IntNum> {
                None
            }
        }
        let e = Expr::binary(Op::Add, Expr::sym(4), Expr::int(-3));
        assert_eq!(e.evaluate(&Ctx).unwrap(), IntNum::new(97));

        let e = Expr::sym(9);
        assert_eq!(e.evaluate(&Ctx).unwrap_err().kind(), AsmErrorKind::NotConstant);
    }

    struct DistCtx;

    impl SimplifyCtx for DistCtx {
        fn equ_expr(&self, sym: SymbolRef) -> Option<Expr> {
            // symbol 10 is an EQU for 7
            (sym == 10).then(|| Expr::int(7))
        }
        fn sym_location(&self, sym: SymbolRef) -> Option<Location> {
            match sym {
                1 => Some(Location {
                    section: 0,
                    bc: 1,
                    off: 0,
                }),
                2 => Some(Location {
                    section: 0,
                    bc: 2,
                    off: 0,
                }),
                _ => None,
            }
        }
        fn calc_dist(&self, from: Location, to: Location) -> Option<IntNum> {
            // pretend each bytecode is 4 bytes long
            let a = from.bc as i64 * 4 + from.off as i64;
            let b = to.bc as i64 * 4 + to.off as i64;
            Some(IntNum::new(b - a))
        }
    }

    #[test]
    fn same_section_label_difference_folds() {
        let mut e = Expr::binary(Op::Sub, Expr::sym(2), Expr::sym(1));
        e.simplify(&DistCtx, true).unwrap();
        assert_eq!(e.get_intnum(), Some(&IntNum::new(4)));
    }

    #[test]
    fn lone_label_is_not_replaced() {
        let mut e = Expr::sym(1);
        e.simplify(&DistCtx, true).unwrap();
        assert_eq!(e.get_symbol(), Some(1));
    }

    #[test]
    fn equ_symbols_inline() {
        let mut e = Expr::binary(Op::Add, Expr::sym(10), Expr::int(1));
        e.simplify(&DistCtx, false).unwrap();
        assert_eq!(e.get_intnum(), Some(&IntNum::new(8)));
    }

    #[test]
    fn circular_equ_is_detected() {
        struct Circular;
        impl SimplifyCtx for Circular {
            fn equ_expr(&self, sym: SymbolRef) -> Option<Expr> {
                (sym == 1).then(|| Expr::sym(1))
            }
            fn sym_location(&self, _sym: SymbolRef) -> Option<Location> {
                None
            }
            fn calc_dist(&self, _from: Location, _to: Location) -> Option<IntNum> {
                None
            }
        }
        let mut e = Expr::sym(1);
        assert!(e.simplify(&Circular, false).is_err());
    }
}
