// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Object-format contract and shared output machinery.
//!
//! Formats traverse the resolved object and emit bytes. The shared
//! [`convert_value`] reduces a relocatable value to either plain bytes or a
//! normalised relocation request; each backend maps the request onto its
//! own relocation types and addend conventions.

pub mod bin;
pub mod coff;
pub mod elf;

use std::io::Write;

use crate::arch::Arch;
use crate::core::bytecode::{BytecodeOutput, Location};
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics};
use crate::core::directive::{DirectiveInfo, Directives};
use crate::core::object::{Layout, Object, Resolver};
use crate::core::symbol::{vis, SymbolRef, SymbolTable};
use crate::core::value::Value;

/// The contract between the core and an object-format backend.
pub trait ObjectFormat {
    fn keyword(&self) -> &'static str;

    /// Canonical output filename extension, including the dot.
    fn extension(&self) -> &'static str;

    /// Initial x86 mode bits implied by the format.
    fn default_x86_mode_bits(&self) -> u32;

    /// Machine/mode compatibility check.
    fn is_ok_object(&self, object: &Object, arch: &dyn Arch) -> bool;

    /// Create the format's initial section; returns its index.
    fn add_default_section(&self, object: &mut Object) -> usize;

    fn add_directives(&self, dirs: &mut Directives, parser: &str);

    /// Create any mandatory pre-defined symbols.
    fn init_symbols(&mut self, object: &mut Object, parser: &str);

    /// Handle a directive registered with [`DirHandler::Objfmt`].
    ///
    /// [`DirHandler::Objfmt`]: crate::core::directive::DirHandler::Objfmt
    fn directive(&mut self, name: &str, info: &mut DirectiveInfo) -> Result<(), AsmError>;

    /// Serialise the resolved object.
    fn output(
        &mut self,
        w: &mut dyn Write,
        object: &mut Object,
        all_syms: bool,
        arch: &dyn Arch,
        diags: &mut Diagnostics,
    ) -> Result<(), AsmError>;
}

/// A value reduced to a relocation request, normalised across formats:
/// the addend includes the absolute portion, any WRT distance, and for
/// PC-relative values the (position − subtrahend) delta.
#[derive(Debug)]
pub struct RelocRequest {
    pub sym: SymbolRef,
    pub pc_rel: bool,
    pub addend: i64,
    pub size: u32,
    pub signed: bool,
    pub seg_of: bool,
    pub section_rel: bool,
    /// Bytes between the end of the relocated field and the end of the
    /// instruction (selects Win64 REL32_N variants).
    pub next_insn: u8,
}

pub enum Converted {
    /// Fully absolute: emit these bytes.
    Bytes(Vec<u8>),
    /// Needs a format-specific relocation.
    Reloc(RelocRequest),
}

/// Reduce a finalized value at `pos`. Returns the conversion plus an
/// optional range warning the caller should attach to the bytecode's
/// source location.
pub fn convert_value(
    value: &Value,
    pos: Location,
    layout: &Layout,
    symbols: &SymbolTable,
    arch: &dyn Arch,
) -> Result<(Converted, Option<AsmError>), AsmError> {
    if value.rshift > 0
        || (value.wrt.is_some() && value.has_sub())
        || (value.seg_of && (value.wrt.is_some() || value.has_sub()))
        || (value.section_rel && (value.wrt.is_some() || value.has_sub()))
    {
        return Err(AsmError::new(
            AsmErrorKind::TooComplex,
            "relocation too complex",
        ));
    }

    let resolver = Resolver::new(layout, symbols);
    let mut rel = value.rel;
    let mut sub_sym = value.sub_sym;
    let mut sub_loc = value.sub_loc;
    let mut addend = value
        .abs_intnum(&resolver)
        .map(|v| v.get_int().0)
        .map_err(|err| {
            if err.kind() == AsmErrorKind::ZeroDivision {
                err
            } else {
                AsmError::new(AsmErrorKind::NotConstant, "value is not constant")
            }
        })?;

    // WRT: the value is computed against `rel` but relocated against the
    // WRT symbol; both must be labels in the same section so their distance
    // can fold into the addend.
    if let Some(wrt) = value.wrt {
        let rel_loc = rel.and_then(|r| symbols.get(r).label());
        let (Some(rel_loc), Some(wrt_loc)) = (rel_loc, symbols.get(wrt).label()) else {
            return Err(AsmError::new(
                AsmErrorKind::TooComplex,
                "WRT expression too complex",
            ));
        };
        if rel_loc.section != wrt_loc.section {
            return Err(AsmError::new(
                AsmErrorKind::TooComplex,
                "cannot WRT across sections",
            ));
        }
        addend += layout.loc_offset(rel_loc) as i64 - layout.loc_offset(wrt_loc) as i64;
        rel = Some(wrt);
    }

    // A local-label reference minus a same-section label or location is a
    // plain distance; fold it and drop the relative part.
    if let (Some(r), true) = (rel, sub_sym.is_some() || sub_loc.is_some()) {
        let rel_label = symbols.get(r).label();
        let sub = sub_location(sub_sym, sub_loc, symbols);
        if let (Some(rl), Some(sl)) = (rel_label, sub) {
            if rl.section == sl.section {
                addend +=
                    layout.loc_offset(rl) as i64 - layout.loc_offset(sl) as i64;
                rel = None;
                sub_sym = None;
                sub_loc = None;
            }
        }
    }

    let mut pc_rel = false;
    if sub_sym.is_some() || sub_loc.is_some() {
        let sub = sub_location(sub_sym, sub_loc, symbols);
        match (rel, sub) {
            (Some(_), Some(sl)) if sl.section == pos.section => {
                // PC-relative: fold (position − subtrahend) into the addend.
                pc_rel = true;
                addend += layout.loc_offset(pos) as i64 - layout.loc_offset(sl) as i64;
            }
            (None, Some(sl)) => {
                // No relocation target; the subtrahend folds numerically.
                addend -= layout.loc_addr(sl) as i64;
            }
            _ => {
                return Err(AsmError::new(
                    AsmErrorKind::TooComplex,
                    "relocation too complex",
                ))
            }
        }
    }

    let Some(sym) = rel else {
        // Fully absolute now.
        let folded = crate::core::intnum::IntNum::new(addend);
        let warn = if !value.no_warn && !folded.fits_bits(value.size) {
            Some(AsmError::new(
                AsmErrorKind::Value,
                format!("value does not fit in {} bit field", value.size),
            ))
        } else {
            None
        };
        return Ok((Converted::Bytes(arch.intnum_tobytes(&folded, value.size)), warn));
    };

    // Absolute symbol references never relocate; they are zero.
    if symbols.get(sym).is_absolute() {
        let folded = crate::core::intnum::IntNum::new(addend);
        return Ok((Converted::Bytes(arch.intnum_tobytes(&folded, value.size)), None));
    }

    Ok((
        Converted::Reloc(RelocRequest {
            sym,
            pc_rel,
            addend,
            size: value.size,
            signed: value.signed,
            seg_of: value.seg_of,
            section_rel: value.section_rel,
            next_insn: value.next_insn,
        }),
        None,
    ))
}

fn sub_location(
    sub_sym: Option<SymbolRef>,
    sub_loc: Option<Location>,
    symbols: &SymbolTable,
) -> Option<Location> {
    sub_loc.or_else(|| sub_sym.and_then(|s| symbols.get(s).label()))
}

/// True when the symbol should appear in an object file's symbol table.
/// Hidden assembler-internal names (the `..@` prefix) never surface.
pub fn is_emitted_symbol(symbols: &SymbolTable, r: SymbolRef, all_syms: bool) -> bool {
    let sym = symbols.get(r);
    if sym.is_absolute() || sym.is_special() || sym.name().starts_with("..@") {
        return false;
    }
    if sym.visibility() & (vis::GLOBAL | vis::COMMON | vis::EXTERN) != 0 {
        return true;
    }
    all_syms && sym.is_defined()
}

/// Format-specific relocation conventions: local-symbol rewriting and
/// addend placement.
pub trait RelocModel {
    /// Adjust a normalised request for this format. Returns the relocation
    /// to record plus the value to store in the relocated field itself.
    fn adjust(
        &self,
        req: RelocRequest,
        pos: Location,
        layout: &Layout,
        symbols: &SymbolTable,
    ) -> Result<(RelocRequest, i64), AsmError>;

    /// Resolve every reference to a number instead of relocating (flat
    /// binary output, where all addresses are final).
    fn resolve_absolute(&self) -> bool {
        false
    }
}

/// Byte-buffer writer that renders bytecode output, including arch nop
/// fills for code-section alignment.
pub struct SectionBytes<'a> {
    pub buf: Vec<u8>,
    pub arch: &'a dyn Arch,
    pub layout: &'a Layout,
    pub symbols: &'a SymbolTable,
    pub model: &'a dyn RelocModel,
    /// Relocation requests collected for the owning section.
    pub relocs: Vec<(Location, RelocRequest)>,
    /// Deferred range warnings (attached to bytecode spans by the caller).
    pub warnings: Vec<AsmError>,
}

impl<'a> SectionBytes<'a> {
    pub fn new(
        arch: &'a dyn Arch,
        layout: &'a Layout,
        symbols: &'a SymbolTable,
        model: &'a dyn RelocModel,
    ) -> Self {
        Self {
            buf: Vec::new(),
            arch,
            layout,
            symbols,
            model,
            relocs: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl BytecodeOutput for SectionBytes<'_> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), AsmError> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn write_value(&mut self, value: &mut Value, pos: Location) -> Result<(), AsmError> {
        let (converted, warn) =
            convert_value(value, pos, self.layout, self.symbols, self.arch)?;
        if let Some(warn) = warn {
            self.warnings.push(warn);
        }
        match converted {
            Converted::Bytes(bytes) => self.buf.extend_from_slice(&bytes),
            Converted::Reloc(req) if self.model.resolve_absolute() => {
                // Every address is final; fold the reference numerically.
                let sym = self.symbols.get(req.sym);
                let target = if let Some(loc) = sym.label() {
                    self.layout.loc_addr(loc) as i64
                } else if let Some(v) = sym.equ_value() {
                    v.get_int().0
                } else {
                    return Err(AsmError::with_param(
                        AsmErrorKind::TooComplex,
                        "cannot resolve external reference in binary output",
                        sym.name(),
                    ));
                };
                let pc = if req.pc_rel {
                    self.layout.loc_addr(pos) as i64
                } else {
                    0
                };
                let folded = crate::core::intnum::IntNum::new(target + req.addend - pc);
                if !value.no_warn && !folded.fits_bits(req.size) {
                    self.warnings.push(AsmError::new(
                        AsmErrorKind::Value,
                        format!("value does not fit in {} bit field", req.size),
                    ));
                }
                self.buf
                    .extend_from_slice(&self.arch.intnum_tobytes(&folded, req.size));
            }
            Converted::Reloc(req) => {
                let size = req.size;
                let (req, inplace) =
                    self.model.adjust(req, pos, self.layout, self.symbols)?;
                let filler = crate::core::intnum::IntNum::new(inplace);
                self.buf
                    .extend_from_slice(&self.arch.intnum_tobytes(&filler, size));
                self.relocs.push((pos, req));
            }
        }
        Ok(())
    }

    fn gap(&mut self, len: u64) -> Result<(), AsmError> {
        self.buf.extend(std::iter::repeat(0).take(len as usize));
        Ok(())
    }

    fn align_fill(&mut self, len: u64, code: bool, fill: Option<u8>) -> Result<(), AsmError> {
        if let Some(byte) = fill {
            self.buf.extend(std::iter::repeat(byte).take(len as usize));
            return Ok(());
        }
        if !code {
            return self.gap(len);
        }
        let table = self.arch.get_fill();
        let mut remaining = len as usize;
        while remaining > 15 {
            self.buf.extend_from_slice(table[15]);
            remaining -= 15;
        }
        if remaining > 0 {
            self.buf.extend_from_slice(table[remaining]);
        }
        Ok(())
    }
}

/// Length-accounting writer for BSS sections: relocation and length checks
/// still run, bytes are discarded.
pub struct NoOutput {
    pub len: u64,
}

impl NoOutput {
    pub fn new() -> Self {
        Self { len: 0 }
    }
}

impl Default for NoOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl BytecodeOutput for NoOutput {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), AsmError> {
        self.len += bytes.len() as u64;
        Ok(())
    }

    fn write_value(&mut self, value: &mut Value, _pos: Location) -> Result<(), AsmError> {
        self.len += (value.size / 8) as u64;
        Ok(())
    }

    fn gap(&mut self, len: u64) -> Result<(), AsmError> {
        self.len += len;
        Ok(())
    }

    fn align_fill(&mut self, len: u64, _code: bool, _fill: Option<u8>) -> Result<(), AsmError> {
        self.len += len;
        Ok(())
    }
}

/// Render one section's bytecodes into a byte buffer, capturing per-
/// bytecode errors against their source locations and continuing with the
/// remaining bytecodes.
pub fn render_section(
    object: &Object,
    section: usize,
    layout: &Layout,
    arch: &dyn Arch,
    model: &dyn RelocModel,
    diags: &mut Diagnostics,
) -> (Vec<u8>, Vec<(Location, RelocRequest)>) {
    let sect = object.section(section);
    let resolver = Resolver::new(layout, &object.symbols);
    let mut out = SectionBytes::new(arch, layout, &object.symbols, model);
    for (i, bc) in sect.bytecodes().iter().enumerate() {
        if let Err(err) = bc.output(section, i, &resolver, &mut out) {
            diags.error(bc.source, err);
        }
        for warn in out.warnings.drain(..) {
            diags.warning(bc.source, warn);
        }
    }
    (out.buf, out.relocs)
}

/// BSS traversal: no bytes, but length accounting and error capture run.
pub fn render_section_nobits(
    object: &Object,
    section: usize,
    layout: &Layout,
    diags: &mut Diagnostics,
) -> u64 {
    let sect = object.section(section);
    let resolver = Resolver::new(layout, &object.symbols);
    let mut out = NoOutput::new();
    for (i, bc) in sect.bytecodes().iter().enumerate() {
        if let Err(err) = bc.output(section, i, &resolver, &mut out) {
            diags.error(bc.source, err);
        }
    }
    out.len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86::X86Arch;
    use crate::core::diag::Span;
    use crate::core::expr::Expr;
    use crate::core::section::Section;

    fn fixture() -> (Object, Layout) {
        let mut obj = Object::new("t.asm", "t.o");
        let text = obj.find_or_add_section(Section::new(".text", true, false));
        obj.set_cur_section(text);
        let layout = Layout::build(&obj);
        (obj, layout)
    }

    #[test]
    fn absolute_value_converts_to_bytes() {
        let (obj, layout) = fixture();
        let arch = X86Arch::new();
        let mut v = Value::from_expr(Expr::int(0x1234), 32);
        v.finalize(&crate::core::expr::NullSimplifyCtx).unwrap();
        let pos = Location {
            section: 0,
            bc: 1,
            off: 0,
        };
        let (converted, warn) =
            convert_value(&v, pos, &layout, &obj.symbols, &arch).unwrap();
        assert!(warn.is_none());
        match converted {
            Converted::Bytes(b) => assert_eq!(b, vec![0x34, 0x12, 0, 0]),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn extern_reference_requests_reloc() {
        let (mut obj, layout) = fixture();
        let arch = X86Arch::new();
        let foo = obj
            .symbols
            .declare("foo", vis::EXTERN, Span::at_line(1))
            .unwrap();
        let mut v = Value::from_expr(Expr::sym(foo), 32);
        v.finalize(&crate::core::expr::NullSimplifyCtx).unwrap();
        let pos = Location {
            section: 0,
            bc: 1,
            off: 0,
        };
        let (converted, _) = convert_value(&v, pos, &layout, &obj.symbols, &arch).unwrap();
        match converted {
            Converted::Reloc(req) => {
                assert_eq!(req.sym, foo);
                assert!(!req.pc_rel);
                assert_eq!(req.addend, 0);
            }
            _ => panic!("expected reloc"),
        }
    }

    #[test]
    fn range_overflow_warns_unless_suppressed() {
        let (obj, layout) = fixture();
        let arch = X86Arch::new();
        let mut v = Value::from_expr(Expr::int(0x1ff), 8);
        v.finalize(&crate::core::expr::NullSimplifyCtx).unwrap();
        let pos = Location {
            section: 0,
            bc: 1,
            off: 0,
        };
        let (_, warn) = convert_value(&v, pos, &layout, &obj.symbols, &arch).unwrap();
        assert!(warn.is_some());

        v.no_warn = true;
        let (_, warn) = convert_value(&v, pos, &layout, &obj.symbols, &arch).unwrap();
        assert!(warn.is_none());
    }
}
