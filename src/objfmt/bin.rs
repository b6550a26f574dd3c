// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Flat binary output.
//!
//! Sections are laid out in definition order starting at the program
//! origin (`org` directive); each later section is aligned to its own
//! alignment. There is no relocation machinery — every reference must
//! resolve to a constant, and external references are errors.

use std::io::Write;

use crate::arch::Arch;
use crate::core::bytecode::Location;
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics, Span};
use crate::core::directive::{DirFlags, DirHandler, DirectiveInfo, Directives};
use crate::core::object::{Layout, Object};
use crate::core::section::Section;
use crate::core::symbol::SymbolTable;

use super::{render_section, render_section_nobits, ObjectFormat, RelocModel, RelocRequest};

pub struct BinFormat;

impl BinFormat {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BinFormat {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat output resolves every reference numerically; nothing relocates.
struct FlatModel;

impl RelocModel for FlatModel {
    fn adjust(
        &self,
        req: RelocRequest,
        _pos: Location,
        _layout: &Layout,
        _symbols: &SymbolTable,
    ) -> Result<(RelocRequest, i64), AsmError> {
        let inplace = req.addend;
        Ok((req, inplace))
    }

    fn resolve_absolute(&self) -> bool {
        true
    }
}

/// `org` sets the load address of the program; it applies to the first
/// section and must precede any content that depends on addresses.
fn org_target(info: &DirectiveInfo) -> Result<u64, AsmError> {
    info.namevals
        .first()
        .and_then(|nv| nv.as_expr())
        .and_then(|e| e.get_intnum())
        .map(|v| v.get_uint().0)
        .ok_or_else(|| {
            AsmError::new(AsmErrorKind::NotAbsolute, "org requires a constant address")
        })
}

impl ObjectFormat for BinFormat {
    fn keyword(&self) -> &'static str {
        "bin"
    }

    fn extension(&self) -> &'static str {
        ""
    }

    fn default_x86_mode_bits(&self) -> u32 {
        16
    }

    fn is_ok_object(&self, _object: &Object, _arch: &dyn Arch) -> bool {
        true
    }

    fn add_default_section(&self, object: &mut Object) -> usize {
        let idx = object.find_or_add_section(Section::new(".text", true, false));
        object.set_cur_section(idx);
        idx
    }

    fn add_directives(&self, dirs: &mut Directives, _parser: &str) {
        dirs.add("org", DirHandler::Objfmt, DirFlags::ArgRequired);
        dirs.add("section", DirHandler::Objfmt, DirFlags::IdRequired);
        dirs.add("segment", DirHandler::Objfmt, DirFlags::IdRequired);
    }

    fn init_symbols(&mut self, _object: &mut Object, _parser: &str) {}

    fn directive(&mut self, name: &str, info: &mut DirectiveInfo) -> Result<(), AsmError> {
        match name {
            "org" => {
                let target = org_target(info)?;
                // Address resolution during span optimisation reads the
                // section VMA, so it must be in place before layout runs.
                info.object.section_mut(0).vma = target;
                info.object.section_mut(0).lma = target;
                Ok(())
            }
            "section" | "segment" => {
                let name = info
                    .namevals
                    .first()
                    .and_then(|nv| nv.as_id())
                    .ok_or_else(|| {
                        AsmError::new(
                            AsmErrorKind::Syntax,
                            "section directive requires a name",
                        )
                    })?
                    .to_string();
                let code = name == ".text";
                let bss = name == ".bss";
                let idx = info
                    .object
                    .find_or_add_section(Section::new(&name, code, bss));
                info.object.set_cur_section(idx);
                Ok(())
            }
            _ => Err(AsmError::with_param(
                AsmErrorKind::Syntax,
                "unrecognized directive",
                name,
            )),
        }
    }

    fn output(
        &mut self,
        w: &mut dyn Write,
        object: &mut Object,
        _all_syms: bool,
        arch: &dyn Arch,
        diags: &mut Diagnostics,
    ) -> Result<(), AsmError> {
        // Chain section addresses: later sections follow the first,
        // aligned to their own boundaries.
        let nsects = object.sections().len();
        {
            let mut layout = Layout::build(object);
            let mut addr = object.section(0).vma + layout.section_size(0);
            for s in 1..nsects {
                if object.section(s).vma == 0 {
                    let align = object.section(s).align.max(1);
                    addr = addr.div_ceil(align) * align;
                    object.section_mut(s).vma = addr;
                    object.section_mut(s).lma = addr;
                }
                layout.set_vma(s, object.section(s).vma);
                addr = object.section(s).vma + layout.section_size(s);
            }
        }
        let layout = Layout::build(object);

        let model = FlatModel;
        let mut out = Vec::new();
        let base = object.section(0).lma;
        for s in 0..nsects {
            let sect = object.section(s);
            if sect.is_bss() {
                render_section_nobits(object, s, &layout, diags);
                continue;
            }
            let (data, relocs) = render_section(object, s, &layout, arch, &model, diags);
            if !relocs.is_empty() {
                diags.error(
                    Span::default(),
                    AsmError::new(
                        AsmErrorKind::Internal,
                        "relocation survived binary conversion",
                    ),
                );
            }
            let start = object.section(s).lma;
            if start < base + out.len() as u64 {
                diags.error(
                    Span::default(),
                    AsmError::with_param(
                        AsmErrorKind::Value,
                        "section overlaps previous content",
                        object.section(s).name(),
                    ),
                );
                continue;
            }
            let pad = (start - base) as usize - out.len();
            out.extend(std::iter::repeat(0).take(pad));
            out.extend_from_slice(&data);
        }
        if diags.has_errors() {
            return Ok(());
        }
        w.write_all(&out)
            .map_err(|e| AsmError::new(AsmErrorKind::Io, format!("write failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_and_defaults() {
        let fmt = BinFormat::new();
        assert_eq!(fmt.keyword(), "bin");
        assert_eq!(fmt.extension(), "");
        assert_eq!(fmt.default_x86_mode_bits(), 16);
    }
}
