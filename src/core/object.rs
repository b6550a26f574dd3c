// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The in-progress object: sections, symbols, and the phase entry points.

use std::cell::Cell;
use std::collections::HashMap;

use serde_json::json;

use crate::arch::Arch;
use crate::core::bytecode::{Bytecode, Location};
use crate::core::diag::Diagnostics;
use crate::core::expr::{EvalContext, Expr, SimplifyCtx};
use crate::core::intnum::IntNum;
use crate::core::section::Section;
use crate::core::symbol::{SymbolRef, SymbolTable, SymbolType};

/// Owns sections (insertion-ordered, name-indexed) and the symbol table.
#[derive(Debug)]
pub struct Object {
    pub src_filename: String,
    pub obj_filename: String,
    sections: Vec<Section>,
    by_name: HashMap<String, usize>,
    pub symbols: SymbolTable,
    cur_section: Option<usize>,
}

impl Object {
    pub fn new(src_filename: &str, obj_filename: &str) -> Self {
        Self {
            src_filename: src_filename.to_string(),
            obj_filename: obj_filename.to_string(),
            sections: Vec::new(),
            by_name: HashMap::new(),
            symbols: SymbolTable::new(),
            cur_section: None,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn sections_mut(&mut self) -> &mut [Section] {
        &mut self.sections
    }

    pub fn section(&self, idx: usize) -> &Section {
        &self.sections[idx]
    }

    pub fn section_mut(&mut self, idx: usize) -> &mut Section {
        &mut self.sections[idx]
    }

    pub fn section_by_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Add a section, or return the existing one with the same name.
    pub fn find_or_add_section(&mut self, section: Section) -> usize {
        if let Some(&idx) = self.by_name.get(section.name()) {
            return idx;
        }
        let idx = self.sections.len();
        self.by_name.insert(section.name().to_string(), idx);
        self.sections.push(section);
        idx
    }

    pub fn cur_section(&self) -> Option<usize> {
        self.cur_section
    }

    pub fn set_cur_section(&mut self, idx: usize) {
        self.cur_section = Some(idx);
    }

    /// The location at the current end of the active section: the place the
    /// next bytecode (or a label defined now) will land.
    pub fn current_location(&self) -> Option<Location> {
        let cur = self.cur_section?;
        Some(Location {
            section: cur,
            bc: self.sections[cur].bytecodes().len(),
            off: 0,
        })
    }

    /// Append a bytecode to the active section; returns the location of its
    /// start.
    pub fn append_bytecode(&mut self, bc: Bytecode) -> Option<Location> {
        let cur = self.cur_section?;
        let idx = self.sections[cur].append(bc);
        Some(Location {
            section: cur,
            bc: idx,
            off: 0,
        })
    }

    /// Split borrow used by output passes: mutable sections alongside the
    /// read-only symbol table.
    pub fn split_mut(&mut self) -> (&mut [Section], &SymbolTable) {
        (&mut self.sections, &self.symbols)
    }

    /// Post-parse symbol checks plus bytecode finalization (value shape
    /// validation, instruction lowering).
    pub fn finalize(&mut self, undef_extern: bool, arch: &dyn Arch, diags: &mut Diagnostics) {
        self.symbols.finalize(undef_extern, diags);
        let ctx = FinalizeCtx {
            symbols: &self.symbols,
        };
        for sect in &mut self.sections {
            for bc in sect.bytecodes_mut() {
                if let Err(err) = bc.finalize(&ctx, arch) {
                    diags.error(bc.source, err);
                }
            }
        }
    }

    /// Machine-readable dump for `--dump`.
    pub fn dump_json(&self) -> serde_json::Value {
        let sections: Vec<serde_json::Value> = self
            .sections
            .iter()
            .map(|s| {
                json!({
                    "name": s.name(),
                    "vma": s.vma,
                    "lma": s.lma,
                    "align": s.align,
                    "bss": s.is_bss(),
                    "code": s.is_code(),
                    "size": s.size(),
                    "bytecodes": s.bytecodes().len() - 1,
                })
            })
            .collect();
        let symbols: Vec<serde_json::Value> = self
            .symbols
            .iter()
            .filter(|(_, sym)| !sym.is_absolute())
            .map(|(_, sym)| {
                json!({
                    "name": sym.name(),
                    "type": format!("{:?}", sym.symbol_type()),
                    "status": sym.status(),
                    "visibility": sym.visibility(),
                })
            })
            .collect();
        json!({
            "source": self.src_filename,
            "output": self.obj_filename,
            "sections": sections,
            "symbols": symbols,
        })
    }
}

/// Simplification context for the finalize phase: EQU inlining and label
/// lookup work, distances do not (no layout yet).
pub struct FinalizeCtx<'a> {
    pub symbols: &'a SymbolTable,
}

impl SimplifyCtx for FinalizeCtx<'_> {
    fn equ_expr(&self, sym: SymbolRef) -> Option<Expr> {
        let s = self.symbols.get(sym);
        if s.symbol_type() == SymbolType::Equ {
            s.equ().cloned()
        } else {
            None
        }
    }

    fn sym_location(&self, sym: SymbolRef) -> Option<Location> {
        self.symbols.get(sym).label()
    }

    fn calc_dist(&self, _from: Location, _to: Location) -> Option<IntNum> {
        None
    }
}

/// Offsets and addresses captured from the object's sections.
///
/// The optimiser rebuilds this as lengths move; output passes build it once
/// after optimisation, when every offset is final.
#[derive(Debug, Clone)]
pub struct Layout {
    vma: Vec<u64>,
    offs: Vec<Vec<u64>>,
    next: Vec<u64>,
}

impl Layout {
    pub fn build(object: &Object) -> Self {
        let mut vma = Vec::with_capacity(object.sections.len());
        let mut offs = Vec::with_capacity(object.sections.len());
        let mut next = Vec::with_capacity(object.sections.len());
        for sect in &object.sections {
            vma.push(sect.vma);
            offs.push(sect.bytecodes().iter().map(|bc| bc.offset).collect());
            next.push(sect.size());
        }
        Self { vma, offs, next }
    }

    pub fn set_vma(&mut self, section: usize, vma: u64) {
        self.vma[section] = vma;
    }

    pub fn set_offset(&mut self, section: usize, bc: usize, offset: u64) {
        self.offs[section][bc] = offset;
    }

    pub fn set_next_offset(&mut self, section: usize, next: u64) {
        self.next[section] = next;
    }

    /// Offset of a location within its section. A one-past-end bytecode
    /// index denotes the current end of the section.
    pub fn loc_offset(&self, loc: Location) -> u64 {
        let offs = &self.offs[loc.section];
        let base = if loc.bc < offs.len() {
            offs[loc.bc]
        } else {
            self.next[loc.section]
        };
        base + loc.off
    }

    /// VMA-based address of a location.
    pub fn loc_addr(&self, loc: Location) -> u64 {
        self.vma[loc.section] + self.loc_offset(loc)
    }

    pub fn section_size(&self, section: usize) -> u64 {
        self.next[section]
    }
}

const MAX_EVAL_DEPTH: u32 = 64;

/// Resolves symbols and locations against a layout; both the optimiser's
/// span evaluation and output-phase value folding run through this.
pub struct Resolver<'a> {
    pub layout: &'a Layout,
    pub symbols: &'a SymbolTable,
    /// Restrict label resolution to one section (span evaluation: a
    /// distance to another section's label is meaningless).
    pub same_section: Option<usize>,
    depth: Cell<u32>,
}

impl<'a> Resolver<'a> {
    pub fn new(layout: &'a Layout, symbols: &'a SymbolTable) -> Self {
        Self {
            layout,
            symbols,
            same_section: None,
            depth: Cell::new(0),
        }
    }

    pub fn restricted(layout: &'a Layout, symbols: &'a SymbolTable, section: usize) -> Self {
        Self {
            layout,
            symbols,
            same_section: Some(section),
            depth: Cell::new(0),
        }
    }
}

impl EvalContext for Resolver<'_> {
    fn resolve_sym(&self, sym: SymbolRef) -> Option<IntNum> {
        let s = self.symbols.get(sym);
        if let Some(v) = s.equ_value() {
            return Some(v.clone());
        }
        if let Some(e) = s.equ() {
            // Depth guard against circular EQU chains.
            if self.depth.get() >= MAX_EVAL_DEPTH {
                return None;
            }
            self.depth.set(self.depth.get() + 1);
            let result = e.evaluate(self).ok();
            self.depth.set(self.depth.get() - 1);
            return result;
        }
        if let Some(loc) = s.label() {
            if let Some(only) = self.same_section {
                if loc.section != only {
                    return None;
                }
            }
            return Some(IntNum::from(self.layout.loc_addr(loc)));
        }
        None
    }

    fn resolve_loc(&self, loc: Location) -> Option<IntNum> {
        if let Some(only) = self.same_section {
            if loc.section != only {
                return None;
            }
        }
        Some(IntNum::from(self.layout.loc_addr(loc)))
    }
}

impl SimplifyCtx for Resolver<'_> {
    fn equ_expr(&self, sym: SymbolRef) -> Option<Expr> {
        let s = self.symbols.get(sym);
        if s.symbol_type() != SymbolType::Equ {
            return None;
        }
        if let Some(v) = s.equ_value() {
            return Some(Expr::int(v.clone()));
        }
        s.equ().cloned()
    }

    fn sym_location(&self, sym: SymbolRef) -> Option<Location> {
        self.symbols.get(sym).label()
    }

    fn calc_dist(&self, from: Location, to: Location) -> Option<IntNum> {
        if from.section != to.section {
            return None;
        }
        let a = self.layout.loc_offset(from) as i64;
        let b = self.layout.loc_offset(to) as i64;
        Some(IntNum::new(b - a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bytecode::{BytecodeKind, DataItem};
    use crate::core::diag::Span;

    fn data_bc(n: usize) -> Bytecode {
        Bytecode::new(
            BytecodeKind::Data {
                items: vec![DataItem::Raw(vec![0; n])],
            },
            Span::default(),
        )
    }

    #[test]
    fn sections_are_name_indexed_and_ordered() {
        let mut obj = Object::new("in.asm", "out.o");
        let text = obj.find_or_add_section(Section::new(".text", true, false));
        let data = obj.find_or_add_section(Section::new(".data", false, false));
        assert_eq!(text, 0);
        assert_eq!(data, 1);
        assert_eq!(obj.find_or_add_section(Section::new(".text", true, false)), 0);
        assert_eq!(obj.section_by_name(".data"), Some(1));
    }

    #[test]
    fn current_location_tracks_appends() {
        let mut obj = Object::new("in.asm", "out.o");
        let text = obj.find_or_add_section(Section::new(".text", true, false));
        obj.set_cur_section(text);
        let before = obj.current_location().unwrap();
        assert_eq!(before.bc, 1);
        obj.append_bytecode(data_bc(3)).unwrap();
        let after = obj.current_location().unwrap();
        assert_eq!(after.bc, 2);
    }

    #[test]
    fn layout_resolves_one_past_end() {
        let mut obj = Object::new("in.asm", "out.o");
        let text = obj.find_or_add_section(Section::new(".text", true, false));
        obj.set_cur_section(text);
        obj.append_bytecode(data_bc(3)).unwrap();
        // Pretend layout ran: offsets 0 (sentinel), 0; sizes 0, 3.
        {
            let sect = obj.section_mut(text);
            let bcs = sect.bytecodes_mut();
            bcs[1].offset = 0;
        }
        let mut layout = Layout::build(&obj);
        layout.set_next_offset(text, 3);
        let end = Location {
            section: text,
            bc: 2,
            off: 0,
        };
        assert_eq!(layout.loc_offset(end), 3);
    }
}
