// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Bytecodes: the ordered units of content inside a section.
//!
//! A bytecode is a tagged sum over a closed set of variants; each operation
//! (`finalize`, `calc_len`, `expand`, `output`) is a single dispatch
//! function over the tag. Variable-length variants start at their shortest
//! plausible encoding and register *spans* with the optimiser; `expand`
//! moves them monotonically to longer encodings.
//!
//! Lifecycle: **Built** (parser/arch, length may be unknown) → **Finalized**
//! (instructions lowered, value shapes validated) → **Resolved** (length and
//! offset final).

use crate::arch::{Arch, Insn, JumpHint, LoweredInsn};
use crate::core::diag::{AsmError, AsmErrorKind, Span};
use crate::core::expr::{EvalContext, Expr, Op, SimplifyCtx};
use crate::core::intnum::IntNum;
use crate::core::value::Value;

/// A byte position within a section, before final layout: section index,
/// bytecode index, byte offset inside the bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub section: usize,
    pub bc: usize,
    pub off: u64,
}

/// Sink for bytecode output. Object-format backends implement the value
/// conversion (fold to bytes or synthesise a relocation); the no-output
/// variant used for BSS sections counts lengths only.
pub trait BytecodeOutput {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), AsmError>;

    /// Emit a relocatable field at `pos`. The value has been finalized.
    fn write_value(&mut self, value: &mut Value, pos: Location) -> Result<(), AsmError>;

    /// Uninitialised space.
    fn gap(&mut self, len: u64) -> Result<(), AsmError>;

    /// Alignment padding: an explicit fill byte, the architecture nop table
    /// (code sections), or zeros.
    fn align_fill(&mut self, len: u64, code: bool, fill: Option<u8>) -> Result<(), AsmError>;
}

/// One entry of a data bytecode.
#[derive(Debug, Clone)]
pub enum DataItem {
    Raw(Vec<u8>),
    Value(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpForm {
    Short,
    Near,
}

/// A short-or-near branch whose form is decided by the optimiser.
#[derive(Debug)]
pub struct JumpRel {
    pub target: Expr,
    pub hint: JumpHint,
    pub short_op: Vec<u8>,
    pub near_op: Vec<u8>,
    /// Near displacement size in bits.
    pub near_size: u32,
    pub form: JumpForm,
}

impl JumpRel {
    fn unit_len(&self) -> u64 {
        match self.form {
            JumpForm::Short => self.short_op.len() as u64 + 1,
            JumpForm::Near => self.near_op.len() as u64 + (self.near_size / 8) as u64,
        }
    }
}

/// The closed variant set.
#[derive(Debug)]
pub enum BytecodeKind {
    /// Zero-length sentinel heading every container.
    Empty,
    Data {
        items: Vec<DataItem>,
    },
    Leb128 {
        exprs: Vec<Expr>,
        signed: bool,
        /// Current encoding size per expression; grows monotonically.
        sizes: Vec<u64>,
    },
    Reserve {
        count: Expr,
        item_size: u64,
        resolved: Option<u64>,
    },
    Incbin {
        path: String,
        start: Option<Expr>,
        maxlen: Option<Expr>,
        data: Vec<u8>,
    },
    Align {
        boundary: Expr,
        fill: Option<u8>,
        maxskip: Option<Expr>,
        code: bool,
        pad: u64,
    },
    Org {
        target: Expr,
        fill: u8,
        resolved_target: Option<u64>,
        pad: u64,
    },
    /// Unlowered instruction; replaced during finalize.
    Insn(Insn),
    Jump(JumpRel),
}

/// A span request: "while `expr` stays within [low, high], this bytecode
/// keeps its current encoding".
#[derive(Debug)]
pub struct SpanReq {
    pub expr: Expr,
    pub low: i64,
    pub high: i64,
}

/// An ordered unit of emitted content.
#[derive(Debug)]
pub struct Bytecode {
    pub kind: BytecodeKind,
    /// Offset within the container; assigned during layout.
    pub offset: u64,
    unit_len: u64,
    pub times: Option<Expr>,
    times_value: u64,
    /// Some expression could not yet be resolved during the last
    /// `calc_len`; the optimiser re-tries each sweep.
    pending: bool,
    pub source: Span,
}

impl Bytecode {
    pub fn new(kind: BytecodeKind, source: Span) -> Self {
        Self {
            kind,
            offset: 0,
            unit_len: 0,
            times: None,
            times_value: 1,
            pending: false,
            source,
        }
    }

    pub fn with_times(mut self, times: Expr) -> Self {
        self.times = Some(times);
        self
    }

    pub fn unit_len(&self) -> u64 {
        self.unit_len
    }

    pub fn total_len(&self) -> u64 {
        self.unit_len * self.times_value
    }

    pub fn next_offset(&self) -> u64 {
        self.offset + self.total_len()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Validate value shapes and lower instructions through the
    /// architecture.
    pub fn finalize(&mut self, ctx: &dyn SimplifyCtx, arch: &dyn Arch) -> Result<(), AsmError> {
        if let BytecodeKind::Insn(insn) = &self.kind {
            match arch.finalize_insn(insn)? {
                LoweredInsn::Fixed { bytes, fixups } => {
                    self.kind = BytecodeKind::Data {
                        items: assemble_items(bytes, fixups),
                    };
                }
                LoweredInsn::Jump {
                    target,
                    hint,
                    short_op,
                    near_op,
                    near_size,
                } => {
                    let form = match hint {
                        JumpHint::Near => JumpForm::Near,
                        _ => JumpForm::Short,
                    };
                    self.kind = BytecodeKind::Jump(JumpRel {
                        target,
                        hint,
                        short_op,
                        near_op,
                        near_size,
                        form,
                    });
                }
            }
        }

        match &mut self.kind {
            BytecodeKind::Data { items } => {
                for item in items {
                    if let DataItem::Value(v) = item {
                        v.finalize(ctx)?;
                    }
                }
            }
            BytecodeKind::Leb128 { exprs, sizes, .. } => {
                for e in exprs.iter_mut() {
                    e.simplify(ctx, false)?;
                }
                sizes.resize(exprs.len(), 1);
            }
            BytecodeKind::Reserve { count, .. } => {
                count.simplify(ctx, false)?;
            }
            BytecodeKind::Incbin {
                path,
                start,
                maxlen,
                data,
            } => {
                if let Some(e) = start {
                    e.simplify(ctx, false)?;
                }
                if let Some(e) = maxlen {
                    e.simplify(ctx, false)?;
                }
                let raw = std::fs::read(&*path).map_err(|err| {
                    AsmError::new(AsmErrorKind::Io, format!("unable to read `{path}`: {err}"))
                })?;
                let skip = match start {
                    Some(e) => expr_const(e, "incbin start")?.get_uint().0 as usize,
                    None => 0,
                };
                if skip > raw.len() {
                    return Err(AsmError::new(
                        AsmErrorKind::Value,
                        format!("incbin start {skip} beyond end of `{path}`"),
                    ));
                }
                let mut slice = &raw[skip..];
                if let Some(e) = maxlen {
                    let cap = expr_const(e, "incbin length")?.get_uint().0 as usize;
                    if cap < slice.len() {
                        slice = &slice[..cap];
                    }
                }
                *data = slice.to_vec();
            }
            BytecodeKind::Align {
                boundary, maxskip, ..
            } => {
                boundary.simplify(ctx, false)?;
                let b = expr_const(boundary, "alignment boundary")?;
                let (bv, _) = b.get_uint();
                if bv == 0 || !bv.is_power_of_two() {
                    return Err(AsmError::new(
                        AsmErrorKind::Value,
                        "alignment boundary is not a power of two",
                    ));
                }
                if let Some(e) = maxskip {
                    e.simplify(ctx, false)?;
                }
            }
            BytecodeKind::Org { target, .. } => {
                target.simplify(ctx, false)?;
            }
            BytecodeKind::Jump(jump) => {
                jump.target.simplify(ctx, false)?;
            }
            BytecodeKind::Empty | BytecodeKind::Insn(_) => {}
        }

        if let Some(times) = &mut self.times {
            times.simplify(ctx, false)?;
        }
        Ok(())
    }

    /// Compute the length at the given offset. Registers spans through
    /// `add_span` when provided (the optimiser passes it on the first
    /// layout pass only). Expressions that cannot be resolved yet leave the
    /// bytecode pending.
    pub fn calc_len(
        &mut self,
        section: usize,
        index: usize,
        offset: u64,
        ctx: &dyn EvalContext,
        mut add_span: Option<&mut dyn FnMut(SpanReq)>,
    ) -> Result<(), AsmError> {
        let mut pending = false;
        self.offset = offset;

        let unit_len = match &mut self.kind {
            BytecodeKind::Empty => 0,
            BytecodeKind::Data { items } => items
                .iter()
                .map(|item| match item {
                    DataItem::Raw(bytes) => bytes.len() as u64,
                    DataItem::Value(v) => (v.size / 8) as u64,
                })
                .sum(),
            BytecodeKind::Leb128 {
                exprs,
                signed,
                sizes,
            } => {
                let mut total = 0;
                for (e, size) in exprs.iter().zip(sizes.iter_mut()) {
                    match e.evaluate(ctx) {
                        Ok(v) => {
                            let needed = v.size_leb128(*signed) as u64;
                            // Monotone: never shrink below a size already
                            // accounted for in prior layout sweeps.
                            *size = (*size).max(needed);
                        }
                        Err(_) => pending = true,
                    }
                    total += *size;
                }
                total
            }
            BytecodeKind::Reserve {
                count,
                item_size,
                resolved,
            } => match count.evaluate(ctx) {
                Ok(v) => {
                    if v.sign() < 0 {
                        return Err(AsmError::new(
                            AsmErrorKind::Value,
                            "reserved size is negative",
                        ));
                    }
                    let n = v.get_uint().0;
                    *resolved = Some(n);
                    n * *item_size
                }
                Err(_) => {
                    pending = true;
                    0
                }
            },
            BytecodeKind::Incbin { data, .. } => data.len() as u64,
            BytecodeKind::Align {
                boundary,
                maxskip,
                pad,
                ..
            } => {
                let b = boundary
                    .get_intnum()
                    .map(|v| v.get_uint().0)
                    .unwrap_or(1)
                    .max(1);
                let mut p = (b - offset % b) % b;
                if let Some(skip) = maxskip {
                    if let Ok(cap) = skip.evaluate(ctx) {
                        if IntNum::from(p) > cap {
                            p = 0;
                        }
                    }
                }
                *pad = p;
                p
            }
            BytecodeKind::Org {
                target,
                resolved_target,
                pad,
                ..
            } => match target.evaluate(ctx) {
                Ok(v) => {
                    let t = v.get_uint().0;
                    *resolved_target = Some(t);
                    if t < offset {
                        return Err(AsmError::new(
                            AsmErrorKind::Value,
                            format!("org target 0x{t:x} is before current offset 0x{offset:x}"),
                        ));
                    }
                    *pad = t - offset;
                    t - offset
                }
                Err(_) => {
                    pending = true;
                    0
                }
            },
            BytecodeKind::Insn(_) => {
                return Err(AsmError::new(
                    AsmErrorKind::Internal,
                    "instruction bytecode survived finalize",
                ))
            }
            BytecodeKind::Jump(jump) => {
                if jump.form == JumpForm::Short && jump.hint == JumpHint::None {
                    if let Some(add_span) = add_span.as_mut() {
                        let short_len = jump.short_op.len() as i64 + 1;
                        add_span(SpanReq {
                            expr: Expr::binary(
                                Op::Sub,
                                jump.target.clone(),
                                Expr::loc(Location {
                                    section,
                                    bc: index,
                                    off: 0,
                                }),
                            ),
                            low: short_len - 128,
                            high: short_len + 127,
                        });
                    }
                }
                jump.unit_len()
            }
        };
        self.unit_len = unit_len;

        self.times_value = match &self.times {
            Some(expr) => match expr.evaluate(ctx) {
                Ok(v) => {
                    if v.sign() < 0 {
                        return Err(AsmError::new(
                            AsmErrorKind::Value,
                            "repeat count is negative",
                        ));
                    }
                    v.get_uint().0
                }
                Err(_) => {
                    pending = true;
                    0
                }
            },
            None => 1,
        };
        self.pending = pending;
        Ok(())
    }

    /// The watched expression moved outside its span interval: switch to
    /// the next-longer encoding and return the length delta.
    pub fn expand(&mut self, _span_id: usize) -> Result<i64, AsmError> {
        let (delta, new_unit) = match &mut self.kind {
            BytecodeKind::Jump(jump) => {
                if jump.hint == JumpHint::Short {
                    return Err(AsmError::new(
                        AsmErrorKind::Value,
                        "short jump out of range",
                    ));
                }
                let old = jump.unit_len() as i64;
                jump.form = JumpForm::Near;
                let new = jump.unit_len() as i64;
                (new - old, jump.unit_len())
            }
            _ => {
                return Err(AsmError::new(
                    AsmErrorKind::Internal,
                    "expand called on a fixed-length bytecode",
                ))
            }
        };
        self.unit_len = new_unit;
        Ok(delta * self.times_value as i64)
    }

    /// Emit bytes. Values that are not purely absolute flow through the
    /// writer's value conversion, which may synthesise a relocation.
    pub fn output(
        &self,
        section: usize,
        index: usize,
        ctx: &dyn SimplifyCtx,
        out: &mut dyn BytecodeOutput,
    ) -> Result<(), AsmError> {
        for iter in 0..self.times_value {
            let base = iter * self.unit_len;
            match &self.kind {
                BytecodeKind::Empty | BytecodeKind::Insn(_) => {}
                BytecodeKind::Data { items } => {
                    let mut off = base;
                    for item in items {
                        match item {
                            DataItem::Raw(bytes) => {
                                out.write_bytes(bytes)?;
                                off += bytes.len() as u64;
                            }
                            DataItem::Value(v) => {
                                let mut v = v.clone();
                                if v.ip_rel && v.sub_loc.is_none() {
                                    // PC-relative against the end of this
                                    // instruction, adjusted per repetition.
                                    v.sub_loc = Some(Location {
                                        section,
                                        bc: index,
                                        off: off
                                            + (v.size / 8) as u64
                                            + u64::from(v.next_insn),
                                    });
                                }
                                let pos = Location {
                                    section,
                                    bc: index,
                                    off,
                                };
                                off += (v.size / 8) as u64;
                                out.write_value(&mut v, pos)?;
                            }
                        }
                    }
                }
                BytecodeKind::Leb128 {
                    exprs,
                    signed,
                    sizes,
                } => {
                    for (e, size) in exprs.iter().zip(sizes.iter()) {
                        let mut e = e.clone();
                        e.simplify(ctx, true)?;
                        let v = e.get_intnum().ok_or_else(|| {
                            AsmError::new(AsmErrorKind::NotConstant, "LEB128 value is not constant")
                        })?;
                        out.write_bytes(&leb128_fixed(v, *size as usize, *signed))?;
                    }
                }
                BytecodeKind::Reserve { .. } => {
                    out.gap(self.unit_len)?;
                }
                BytecodeKind::Incbin { data, .. } => {
                    out.write_bytes(data)?;
                }
                BytecodeKind::Align {
                    fill, code, pad, ..
                } => {
                    out.align_fill(*pad, *code, *fill)?;
                }
                BytecodeKind::Org { fill, pad, .. } => {
                    out.align_fill(*pad, false, Some(*fill))?;
                }
                BytecodeKind::Jump(jump) => {
                    let (opcode, disp_bits) = match jump.form {
                        JumpForm::Short => (&jump.short_op, 8),
                        JumpForm::Near => (&jump.near_op, jump.near_size),
                    };
                    out.write_bytes(opcode)?;
                    let mut v = Value::from_expr(jump.target.clone(), disp_bits);
                    v.finalize(ctx)?;
                    v.signed = true;
                    v.ip_rel = true;
                    v.jump_target = true;
                    v.next_insn = 0;
                    let disp_off = base + opcode.len() as u64;
                    v.sub_loc = Some(Location {
                        section,
                        bc: index,
                        off: disp_off + (disp_bits / 8) as u64,
                    });
                    out.write_value(
                        &mut v,
                        Location {
                            section,
                            bc: index,
                            off: disp_off,
                        },
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn expr_const<'a>(e: &'a Expr, what: &str) -> Result<&'a IntNum, AsmError> {
    e.get_intnum().ok_or_else(|| {
        AsmError::new(
            AsmErrorKind::NotAbsolute,
            format!("{what} must be a constant"),
        )
    })
}

/// Interleave instruction bytes with fixup values, preserving byte order.
/// PC-relative fixups get their subtractive location lazily at output time,
/// so `times`-repeated instructions reference the right repetition.
fn assemble_items(bytes: Vec<u8>, mut fixups: Vec<crate::arch::Fixup>) -> Vec<DataItem> {
    fixups.sort_by_key(|f| f.offset);
    let mut items = Vec::new();
    let mut pos = 0usize;
    for fixup in fixups {
        if fixup.offset > pos {
            items.push(DataItem::Raw(bytes[pos..fixup.offset].to_vec()));
        }
        let width = (fixup.value.size / 8) as usize;
        pos = fixup.offset + width;
        items.push(DataItem::Value(fixup.value));
    }
    if pos < bytes.len() {
        items.push(DataItem::Raw(bytes[pos..].to_vec()));
    }
    items
}

/// Fixed-width LEB128: canonical when `size` equals the minimal size,
/// continuation-padded otherwise.
fn leb128_fixed(v: &IntNum, size: usize, _signed: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(size);
    let mut cur = v.clone();
    for k in 0..size {
        let mut byte = cur.bitand(&IntNum::new(0x7f)).get_uint().0 as u8;
        cur = cur.shr(7);
        if k + 1 < size {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}

/// The bytecode sequence of a section. The leading zero-length sentinel
/// makes "start of container" a valid [`Location`].
#[derive(Debug)]
pub struct Container {
    bcs: Vec<Bytecode>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            bcs: vec![Bytecode::new(BytecodeKind::Empty, Span::default())],
        }
    }

    /// Append a bytecode, returning its index.
    pub fn append(&mut self, bc: Bytecode) -> usize {
        self.bcs.push(bc);
        self.bcs.len() - 1
    }

    pub fn bytecodes(&self) -> &[Bytecode] {
        &self.bcs
    }

    pub fn bytecodes_mut(&mut self) -> &mut [Bytecode] {
        &mut self.bcs
    }

    pub fn len(&self) -> usize {
        self.bcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bcs.len() <= 1
    }

    /// Offset one past the final bytecode; the section size after layout.
    pub fn next_offset(&self) -> u64 {
        self.bcs.last().map(|bc| bc.next_offset()).unwrap_or(0)
    }

    /// Location of the current end of the container within `section`.
    pub fn end_location(&self, section: usize) -> Location {
        Location {
            section,
            bc: self.bcs.len() - 1,
            off: 0,
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::NullSimplifyCtx;

    struct NoRefs;
    impl EvalContext for NoRefs {
        fn resolve_sym(&self, _sym: usize) -> Option<IntNum> {
            None
        }
        fn resolve_loc(&self, _loc: Location) -> Option<IntNum> {
            None
        }
    }

    #[derive(Default)]
    struct CaptureOutput {
        bytes: Vec<u8>,
    }

    impl BytecodeOutput for CaptureOutput {
        fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), AsmError> {
            self.bytes.extend_from_slice(bytes);
            Ok(())
        }
        fn write_value(&mut self, value: &mut Value, _pos: Location) -> Result<(), AsmError> {
            let v = value.abs_intnum(&NullSimplifyCtx)?;
            self.bytes.extend(v.to_bytes(value.size, false));
            Ok(())
        }
        fn gap(&mut self, len: u64) -> Result<(), AsmError> {
            self.bytes.extend(std::iter::repeat(0).take(len as usize));
            Ok(())
        }
        fn align_fill(&mut self, len: u64, _code: bool, fill: Option<u8>) -> Result<(), AsmError> {
            self.bytes
                .extend(std::iter::repeat(fill.unwrap_or(0)).take(len as usize));
            Ok(())
        }
    }

    fn calc(bc: &mut Bytecode, offset: u64) {
        bc.calc_len(0, 1, offset, &NoRefs, None).unwrap();
    }

    #[test]
    fn data_length_counts_raw_and_values() {
        let mut bc = Bytecode::new(
            BytecodeKind::Data {
                items: vec![
                    DataItem::Raw(vec![0x90]),
                    DataItem::Value(Value::from_expr(Expr::int(2), 32)),
                ],
            },
            Span::default(),
        );
        calc(&mut bc, 0);
        assert_eq!(bc.total_len(), 5);
    }

    #[test]
    fn times_multiplies_unit_length() {
        let mut bc = Bytecode::new(
            BytecodeKind::Data {
                items: vec![DataItem::Raw(vec![0])],
            },
            Span::default(),
        )
        .with_times(Expr::int(200));
        calc(&mut bc, 0);
        assert_eq!(bc.total_len(), 200);
    }

    #[test]
    fn align_pad_follows_offset() {
        let mut bc = Bytecode::new(
            BytecodeKind::Align {
                boundary: Expr::int(8),
                fill: None,
                maxskip: None,
                code: false,
                pad: 0,
            },
            Span::default(),
        );
        calc(&mut bc, 1);
        assert_eq!(bc.total_len(), 7);
        calc(&mut bc, 8);
        assert_eq!(bc.total_len(), 0);
        calc(&mut bc, 13);
        assert_eq!(bc.total_len(), 3);
    }

    #[test]
    fn org_pads_forward_and_rejects_backward() {
        let mut bc = Bytecode::new(
            BytecodeKind::Org {
                target: Expr::int(0x10),
                fill: 0,
                resolved_target: None,
                pad: 0,
            },
            Span::default(),
        );
        calc(&mut bc, 4);
        assert_eq!(bc.total_len(), 12);
        let err = bc.calc_len(0, 1, 0x20, &NoRefs, None).unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Value);
    }

    #[test]
    fn jump_expands_monotonically() {
        let mut bc = Bytecode::new(
            BytecodeKind::Jump(JumpRel {
                target: Expr::int(0),
                hint: JumpHint::None,
                short_op: vec![0xeb],
                near_op: vec![0xe9],
                near_size: 32,
                form: JumpForm::Short,
            }),
            Span::default(),
        );
        calc(&mut bc, 0);
        assert_eq!(bc.total_len(), 2);
        let delta = bc.expand(0).unwrap();
        assert_eq!(delta, 3);
        assert_eq!(bc.unit_len(), 5);
    }

    #[test]
    fn forced_short_jump_fails_to_expand() {
        let mut bc = Bytecode::new(
            BytecodeKind::Jump(JumpRel {
                target: Expr::int(0),
                hint: JumpHint::Short,
                short_op: vec![0xeb],
                near_op: vec![0xe9],
                near_size: 32,
                form: JumpForm::Short,
            }),
            Span::default(),
        );
        calc(&mut bc, 0);
        assert!(bc.expand(0).is_err());
    }

    #[test]
    fn leb128_sizes_grow_monotonically() {
        let mut bc = Bytecode::new(
            BytecodeKind::Leb128 {
                exprs: vec![Expr::int(300)],
                signed: false,
                sizes: vec![1],
            },
            Span::default(),
        );
        calc(&mut bc, 0);
        assert_eq!(bc.total_len(), 2);
        // A later sweep with a smaller value must not shrink the encoding.
        if let BytecodeKind::Leb128 { exprs, .. } = &mut bc.kind {
            exprs[0] = Expr::int(1);
        }
        calc(&mut bc, 0);
        assert_eq!(bc.total_len(), 2);
    }

    #[test]
    fn container_starts_with_sentinel() {
        let c = Container::new();
        assert_eq!(c.len(), 1);
        assert!(c.is_empty());
        assert_eq!(c.next_offset(), 0);
    }

    #[test]
    fn output_repeats_times() {
        let mut bc = Bytecode::new(
            BytecodeKind::Data {
                items: vec![DataItem::Raw(vec![0xab])],
            },
            Span::default(),
        )
        .with_times(Expr::int(3));
        calc(&mut bc, 0);
        let mut out = CaptureOutput::default();
        bc.output(0, 1, &NullSimplifyCtx, &mut out).unwrap();
        assert_eq!(out.bytes, vec![0xab, 0xab, 0xab]);
    }

    #[test]
    fn leb128_fixed_pads_with_continuation() {
        assert_eq!(leb128_fixed(&IntNum::new(0), 2, false), vec![0x80, 0x00]);
        assert_eq!(leb128_fixed(&IntNum::new(127), 1, false), vec![0x7f]);
        assert_eq!(
            leb128_fixed(&IntNum::new(128), 2, false),
            vec![0x80, 0x01]
        );
        assert_eq!(leb128_fixed(&IntNum::new(-64), 1, true), vec![0x40]);
    }
}
