// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The span optimiser.
//!
//! After parsing, some bytecodes (short-vs-near jumps, LEB128 of forward
//! references, `times` repeats, alignment, org) have lengths that depend on
//! symbol values, which depend on offsets, which depend on lengths. The
//! optimiser finds a consistent assignment or reports that none exists.
//!
//! Pass 1 lays out every section with each variable bytecode at its
//! shortest plausible encoding and collects spans. Pass 2 relaxes to a
//! fixpoint: re-evaluate every span at current offsets, expand the ones out
//! of range, recompute offset-derived lengths, repeat. Expansion is
//! monotone — a grown bytecode never shrinks — so the number of expansions
//! is bounded by the span count and the loop terminates.

use crate::core::bytecode::SpanReq;
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics};
use crate::core::intnum::IntNum;
use crate::core::object::{Layout, Object, Resolver};
use crate::core::symbol::SymbolType;

/// Cap on relaxation sweeps; layouts that oscillate past this (mutually
/// dependent `times` counts and alignment pads) are rejected rather than
/// looped forever.
const MAX_SWEEPS: usize = 256;

struct SpanRec {
    section: usize,
    bc: usize,
    req: SpanReq,
}

/// Resolve every bytecode length and offset in the object.
pub fn optimize(object: &mut Object, diags: &mut Diagnostics) {
    let mut layout = Layout::build(object);
    let mut spans: Vec<SpanRec> = Vec::new();

    // Pass 1: initial layout, shortest encodings, span registration.
    if !sweep(object, &layout, Some(&mut spans), diags) {
        return;
    }
    store_layout(object, &mut layout);

    // Pass 2: relax to fixpoint.
    let mut sweeps = 0;
    loop {
        let layout_changed = {
            if !sweep(object, &layout, None, diags) {
                return;
            }
            update_layout(object, &mut layout)
        };
        let spans_changed = eval_spans(object, &layout, &mut spans, diags);
        if diags.has_errors() {
            return;
        }
        if !layout_changed && !spans_changed {
            break;
        }
        sweeps += 1;
        if sweeps > MAX_SWEEPS + spans.len() {
            diags.error(
                Default::default(),
                AsmError::new(
                    AsmErrorKind::Internal,
                    "section layout failed to converge",
                ),
            );
            return;
        }
    }

    check_unresolved(object, diags);
    check_forced_short_jumps(object, &layout, diags);
    value_equ_symbols(object, &layout);
}

/// Recompute every bytecode length against the previous sweep's layout.
/// Returns false when an error aborted the walk.
fn sweep(
    object: &mut Object,
    layout: &Layout,
    mut add_spans: Option<&mut Vec<SpanRec>>,
    diags: &mut Diagnostics,
) -> bool {
    let (sections, symbols) = object.split_mut();
    let resolver = Resolver::new(layout, symbols);
    for (s, sect) in sections.iter_mut().enumerate() {
        let mut offset = 0u64;
        for (i, bc) in sect.bytecodes_mut().iter_mut().enumerate() {
            let result = match add_spans.as_mut() {
                Some(spans) => {
                    let mut collect = |req: SpanReq| {
                        spans.push(SpanRec {
                            section: s,
                            bc: i,
                            req,
                        })
                    };
                    bc.calc_len(s, i, offset, &resolver, Some(&mut collect))
                }
                None => bc.calc_len(s, i, offset, &resolver, None),
            };
            if let Err(err) = result {
                diags.error(bc.source, err);
                return false;
            }
            offset = bc.next_offset();
        }
    }
    true
}

/// Copy bytecode offsets into the layout; true when anything moved.
fn update_layout(object: &Object, layout: &mut Layout) -> bool {
    let mut changed = false;
    for (s, sect) in object.sections().iter().enumerate() {
        for (i, bc) in sect.bytecodes().iter().enumerate() {
            let old = layout.loc_offset(crate::core::bytecode::Location {
                section: s,
                bc: i,
                off: 0,
            });
            if old != bc.offset {
                changed = true;
            }
            layout.set_offset(s, i, bc.offset);
        }
        let next = sect.size();
        if layout.section_size(s) != next {
            changed = true;
        }
        layout.set_next_offset(s, next);
        layout.set_vma(s, sect.vma);
    }
    changed
}

fn store_layout(object: &Object, layout: &mut Layout) {
    update_layout(object, layout);
}

/// Evaluate every live span; expand the ones whose watched expression fell
/// outside its interval. Expanded spans never re-register — expansion is
/// one-way. Returns true when anything expanded.
fn eval_spans(
    object: &mut Object,
    layout: &Layout,
    spans: &mut Vec<SpanRec>,
    diags: &mut Diagnostics,
) -> bool {
    let mut changed = false;
    let mut keep = Vec::with_capacity(spans.len());
    for rec in spans.drain(..) {
        let satisfied = {
            let resolver = Resolver::restricted(layout, &object.symbols, rec.section);
            match rec.req.expr.evaluate(&resolver) {
                Ok(v) => {
                    v >= IntNum::new(rec.req.low) && v <= IntNum::new(rec.req.high)
                }
                // Unresolvable within the section: the target is external
                // or lives in another section, so the short form can never
                // encode it.
                Err(_) => false,
            }
        };
        if satisfied {
            keep.push(rec);
            continue;
        }
        let sect = object.section_mut(rec.section);
        let bc = &mut sect.bytecodes_mut()[rec.bc];
        match bc.expand(0) {
            Ok(_) => changed = true,
            Err(err) => {
                diags.error(bc.source, err);
            }
        }
    }
    *spans = keep;
    changed
}

/// Bytecodes still pending after relaxation reference symbols that never
/// became resolvable.
fn check_unresolved(object: &Object, diags: &mut Diagnostics) {
    for sect in object.sections() {
        for bc in sect.bytecodes() {
            if bc.is_pending() {
                diags.error(
                    bc.source,
                    AsmError::new(
                        AsmErrorKind::NotConstant,
                        "expression does not resolve to a constant",
                    ),
                );
            }
        }
    }
}

/// A jump the user forced short must actually be encodable short.
fn check_forced_short_jumps(object: &Object, layout: &Layout, diags: &mut Diagnostics) {
    use crate::arch::JumpHint;
    use crate::core::bytecode::{BytecodeKind, JumpForm, Location};
    use crate::core::expr::{Expr, Op};

    for (s, sect) in object.sections().iter().enumerate() {
        for (i, bc) in sect.bytecodes().iter().enumerate() {
            let BytecodeKind::Jump(jump) = &bc.kind else {
                continue;
            };
            if jump.form != JumpForm::Short || jump.hint != JumpHint::Short {
                continue;
            }
            let resolver = Resolver::restricted(layout, &object.symbols, s);
            let expr = Expr::binary(
                Op::Sub,
                jump.target.clone(),
                Expr::loc(Location {
                    section: s,
                    bc: i,
                    off: 0,
                }),
            );
            let short_len = jump.short_op.len() as i64 + 1;
            let ok = match expr.evaluate(&resolver) {
                Ok(v) => {
                    v >= IntNum::new(short_len - 128) && v <= IntNum::new(short_len + 127)
                }
                Err(_) => false,
            };
            if !ok {
                diags.error(
                    bc.source,
                    AsmError::new(AsmErrorKind::Value, "short jump out of range"),
                );
            }
        }
    }
}

/// Give every EQU symbol whose expression now folds a cached value.
fn value_equ_symbols(object: &mut Object, layout: &Layout) {
    let mut resolved = Vec::new();
    {
        let resolver = Resolver::new(layout, &object.symbols);
        for (r, sym) in object.symbols.iter() {
            if sym.symbol_type() != SymbolType::Equ || sym.is_valued() {
                continue;
            }
            if let Some(expr) = sym.equ() {
                if let Ok(v) = expr.evaluate(&resolver) {
                    resolved.push((r, v));
                }
            }
        }
    }
    for (r, v) in resolved {
        object.symbols.set_equ_value(r, v);
    }
}
