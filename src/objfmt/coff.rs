// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! COFF object output: standard COFF, Win32 PE-COFF, and Win64 PE-COFF.
//!
//! The three modes share the container layout and differ in machine code,
//! address assignment (standard COFF chains section VMAs; the Win variants
//! leave them zero for the linker), PC-relative addend conventions, and
//! relocation types (Win64 uses REL32_N selected by the distance from the
//! end of the relocated field to the end of the instruction).

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::arch::Arch;
use crate::core::bytecode::Location;
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics, Span};
use crate::core::directive::{DirFlags, DirHandler, DirectiveInfo, Directives};
use crate::core::object::{Layout, Object};
use crate::core::section::Section;
use crate::core::symbol::{vis, SymbolTable, SymbolType};

use super::elf::StringTable;
use super::{
    render_section, render_section_nobits, ObjectFormat, RelocModel, RelocRequest,
};

const MACHINE_I386: u16 = 0x014c;
const MACHINE_AMD64: u16 = 0x8664;

const SCN_TEXT: u32 = 0x6000_0020; // code | execute | read
const SCN_DATA: u32 = 0xc000_0040; // initialized | read | write
const SCN_BSS: u32 = 0xc000_0080; // uninitialized | read | write

const SCL_EXTERNAL: u8 = 2;
const SCL_STATIC: u8 = 3;
const SCL_FILE: u8 = 103;

// i386 relocation types.
const I386_DIR32: u16 = 6;
const I386_SECTION: u16 = 10;
const I386_SECREL: u16 = 11;
const I386_REL32: u16 = 20;

// AMD64 relocation types.
const AMD64_ADDR64: u16 = 1;
const AMD64_ADDR32: u16 = 2;
const AMD64_REL32: u16 = 4;
const AMD64_SECTION: u16 = 0xa;
const AMD64_SECREL: u16 = 0xb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoffMode {
    Standard,
    Win32,
    Win64,
}

pub struct CoffFormat {
    mode: CoffMode,
}

impl CoffFormat {
    pub fn new(mode: CoffMode) -> Self {
        Self { mode }
    }

    fn machine(&self) -> u16 {
        match self.mode {
            CoffMode::Win64 => MACHINE_AMD64,
            _ => MACHINE_I386,
        }
    }

    fn sets_vma(&self) -> bool {
        self.mode == CoffMode::Standard
    }

    fn reloc_type(&self, req: &RelocRequest) -> Result<u16, AsmError> {
        match self.mode {
            CoffMode::Win64 => {
                if req.pc_rel {
                    if req.size != 32 {
                        return Err(AsmError::new(
                            AsmErrorKind::Type,
                            "coff: invalid relocation size",
                        ));
                    }
                    if req.next_insn > 5 {
                        return Err(AsmError::new(
                            AsmErrorKind::Type,
                            "coff: invalid PC-relative offset",
                        ));
                    }
                    Ok(AMD64_REL32 + req.next_insn as u16)
                } else if req.seg_of {
                    Ok(AMD64_SECTION)
                } else if req.section_rel {
                    Ok(AMD64_SECREL)
                } else {
                    match req.size {
                        32 => Ok(AMD64_ADDR32),
                        64 => Ok(AMD64_ADDR64),
                        _ => Err(AsmError::new(
                            AsmErrorKind::Type,
                            "coff: invalid relocation size",
                        )),
                    }
                }
            }
            _ => {
                if req.pc_rel {
                    if req.size != 32 {
                        return Err(AsmError::new(
                            AsmErrorKind::Type,
                            "coff: invalid relocation size",
                        ));
                    }
                    Ok(I386_REL32)
                } else if req.seg_of {
                    Ok(I386_SECTION)
                } else if req.section_rel {
                    Ok(I386_SECREL)
                } else if req.size == 32 {
                    Ok(I386_DIR32)
                } else {
                    Err(AsmError::new(
                        AsmErrorKind::Type,
                        "coff: invalid relocation size",
                    ))
                }
            }
        }
    }
}

struct CoffRelocModel {
    mode: CoffMode,
}

impl RelocModel for CoffRelocModel {
    fn adjust(
        &self,
        mut req: RelocRequest,
        pos: Location,
        layout: &Layout,
        symbols: &SymbolTable,
    ) -> Result<(RelocRequest, i64), AsmError> {
        let sym = symbols.get(req.sym);
        let external = sym.visibility() & (vis::GLOBAL | vis::EXTERN | vis::COMMON) != 0;

        if !external {
            // Local symbols relocate against their section's symbol.
            if let Some(loc) = sym.label() {
                req.addend += layout.loc_addr(loc) as i64;
            }
        } else if sym.visibility() & vis::COMMON != 0 && self.mode == CoffMode::Standard {
            // Standard COFF folds COMMON sizes into the addend.
            let size = sym
                .common_size()
                .and_then(|e| e.get_intnum().map(|v| v.get_int().0))
                .unwrap_or(0);
            if size < 0 {
                return Err(AsmError::new(
                    AsmErrorKind::Value,
                    "coff: common size is negative",
                ));
            }
            req.addend += size;
        }

        if req.pc_rel {
            match self.mode {
                // Standard COFF stores the displacement relative to the
                // start of the section.
                CoffMode::Standard => req.addend -= layout.loc_offset(pos) as i64,
                // Win32 measures from the end of the relocated field.
                CoffMode::Win32 => req.addend += (req.size / 8) as i64,
                // Win64 measures from the end of the field too; the tail
                // distance moves into the REL32_N type instead.
                CoffMode::Win64 => {
                    req.addend += (req.size / 8) as i64 + req.next_insn as i64
                }
            }
        }
        if req.seg_of || req.section_rel {
            return Ok((req, 0));
        }
        let inplace = req.addend;
        Ok((req, inplace))
    }
}

fn dir_section(info: &mut DirectiveInfo) -> Result<usize, AsmError> {
    let name = info
        .namevals
        .first()
        .and_then(|nv| nv.as_id())
        .ok_or_else(|| {
            AsmError::new(AsmErrorKind::Syntax, "section directive requires a name")
        })?
        .to_string();

    let mut code = name == ".text";
    let mut bss = name == ".bss";
    let mut align: Option<u64> = None;
    for nv in info.namevals.iter().skip(1) {
        match (nv.name.as_deref(), nv.as_id()) {
            (None, Some("code")) | (None, Some("text")) | (None, Some("exec")) => {
                code = true;
                bss = false;
            }
            (None, Some("data")) => {
                code = false;
                bss = false;
            }
            (None, Some("bss")) => {
                code = false;
                bss = true;
            }
            (Some("align"), _) => {
                align = nv
                    .as_expr()
                    .and_then(|e| e.get_intnum())
                    .map(|v| v.get_uint().0);
            }
            _ => {}
        }
    }

    let idx = info
        .object
        .find_or_add_section(Section::new(&name, code, bss));
    info.object.section_mut(idx).set_code(code);
    info.object.section_mut(idx).set_bss(bss);
    if let Some(a) = align {
        info.object.section_mut(idx).align = a;
    }
    Ok(idx)
}

impl ObjectFormat for CoffFormat {
    fn keyword(&self) -> &'static str {
        match self.mode {
            CoffMode::Standard => "coff",
            CoffMode::Win32 => "win32",
            CoffMode::Win64 => "win64",
        }
    }

    fn extension(&self) -> &'static str {
        match self.mode {
            CoffMode::Standard => ".o",
            _ => ".obj",
        }
    }

    fn default_x86_mode_bits(&self) -> u32 {
        if self.mode == CoffMode::Win64 {
            64
        } else {
            32
        }
    }

    fn is_ok_object(&self, _object: &Object, arch: &dyn Arch) -> bool {
        match self.mode {
            CoffMode::Win64 => arch.machine().eq_ignore_ascii_case("amd64"),
            _ => arch.machine().eq_ignore_ascii_case("x86"),
        }
    }

    fn add_default_section(&self, object: &mut Object) -> usize {
        let idx = object.find_or_add_section(Section::new(".text", true, false));
        object.set_cur_section(idx);
        idx
    }

    fn add_directives(&self, dirs: &mut Directives, parser: &str) {
        dirs.add("section", DirHandler::Objfmt, DirFlags::IdRequired);
        dirs.add("segment", DirHandler::Objfmt, DirFlags::IdRequired);
        if parser.eq_ignore_ascii_case("gas") {
            dirs.add(".section", DirHandler::Objfmt, DirFlags::IdRequired);
            dirs.add(".text", DirHandler::Objfmt, DirFlags::Any);
            dirs.add(".data", DirHandler::Objfmt, DirFlags::Any);
            dirs.add(".bss", DirHandler::Objfmt, DirFlags::Any);
        }
    }

    fn init_symbols(&mut self, _object: &mut Object, _parser: &str) {}

    fn directive(&mut self, name: &str, info: &mut DirectiveInfo) -> Result<(), AsmError> {
        match name {
            "section" | "segment" | ".section" => {
                let idx = dir_section(info)?;
                info.object.set_cur_section(idx);
                Ok(())
            }
            ".text" | ".data" | ".bss" => {
                let code = name == ".text";
                let bss = name == ".bss";
                let idx = info
                    .object
                    .find_or_add_section(Section::new(name, code, bss));
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
        all_syms: bool,
        arch: &dyn Arch,
        diags: &mut Diagnostics,
    ) -> Result<(), AsmError> {
        // Section addresses: standard COFF chains VMAs, the Win variants
        // leave them zero and let the linker place sections.
        let nsects = object.sections().len();
        if self.sets_vma() {
            let mut addr = 0u64;
            let mut layout = Layout::build(object);
            for s in 0..nsects {
                object.section_mut(s).vma = addr;
                object.section_mut(s).lma = addr;
                layout.set_vma(s, addr);
                addr += layout.section_size(s);
            }
        }
        let layout = Layout::build(object);
        let model = CoffRelocModel { mode: self.mode };

        let mut datas: Vec<Vec<u8>> = Vec::with_capacity(nsects);
        let mut relocs: Vec<Vec<(Location, RelocRequest)>> = Vec::with_capacity(nsects);
        for s in 0..nsects {
            if object.section(s).is_bss() {
                render_section_nobits(object, s, &layout, diags);
                datas.push(Vec::new());
                relocs.push(Vec::new());
            } else {
                let (data, rel) = render_section(object, s, &layout, arch, &model, diags);
                datas.push(data);
                relocs.push(rel);
            }
        }

        // COFF reloc counts are 16-bit; the overflow encoding is not
        // produced, oversized sections are rejected.
        for (s, rel) in relocs.iter().enumerate() {
            if rel.len() >= 64 * 1024 {
                diags.warning(
                    Span::default(),
                    AsmError::with_param(
                        AsmErrorKind::Value,
                        "too many relocations in section",
                        object.section(s).name(),
                    ),
                );
            }
        }
        if diags.has_errors() {
            return Ok(());
        }

        let symbols = &object.symbols;
        let mut strtab = StringTable::new();

        // Symbol table: .file + aux, one symbol + aux per section, then
        // user symbols. Indices are entry indices including aux entries.
        let mut symdata: Vec<u8> = Vec::new();
        let mut nsyms: u32 = 0;

        // .file
        put_sym_name(&mut symdata, ".file", &mut strtab);
        put32(&mut symdata, 0);
        put16s(&mut symdata, 0xfffeu16 as i16); // debug pseudo-section
        put16(&mut symdata, 0);
        symdata.push(SCL_FILE);
        symdata.push(1);
        nsyms += 2;
        let mut aux = [0u8; 18];
        let fname = object.src_filename.as_bytes();
        let n = fname.len().min(18);
        aux[..n].copy_from_slice(&fname[..n]);
        symdata.extend_from_slice(&aux);

        let mut section_symidx: Vec<u32> = Vec::with_capacity(nsects);
        for s in 0..nsects {
            let sect = object.section(s);
            section_symidx.push(nsyms);
            put_sym_name(&mut symdata, sect.name(), &mut strtab);
            put32(&mut symdata, 0);
            put16s(&mut symdata, (s + 1) as i16);
            put16(&mut symdata, 0);
            symdata.push(SCL_STATIC);
            symdata.push(1);
            nsyms += 2;
            let mut aux = [0u8; 18];
            aux[..4].copy_from_slice(&(layout.section_size(s) as u32).to_le_bytes());
            aux[4..6].copy_from_slice(&(relocs[s].len() as u16).to_le_bytes());
            symdata.extend_from_slice(&aux);
        }

        let mut sym_index: Vec<Option<u32>> = vec![None; symbols.len()];
        for (r, sym) in symbols.iter() {
            if sym.is_absolute() || sym.is_special() || sym.name().starts_with("..@") {
                continue;
            }
            let external =
                sym.visibility() & (vis::GLOBAL | vis::EXTERN | vis::COMMON) != 0;
            if !external && !all_syms {
                continue;
            }
            let (value, scnum, class): (u32, i16, u8) = if let Some(loc) = sym.label() {
                (
                    layout.loc_addr(loc) as u32,
                    (loc.section + 1) as i16,
                    if external { SCL_EXTERNAL } else { SCL_STATIC },
                )
            } else if sym.visibility() & vis::COMMON != 0 {
                let size = sym
                    .common_size()
                    .and_then(|e| e.get_intnum().map(|v| v.get_uint().0))
                    .unwrap_or(0);
                (size as u32, 0, SCL_EXTERNAL)
            } else if sym.visibility() & vis::EXTERN != 0 {
                (0, 0, SCL_EXTERNAL)
            } else if sym.symbol_type() == SymbolType::Equ {
                let value = sym
                    .equ_value()
                    .map(|v| v.get_uint().0 as u32)
                    .unwrap_or(0);
                (value, -1, if external { SCL_EXTERNAL } else { SCL_STATIC })
            } else {
                continue;
            };
            sym_index[r] = Some(nsyms);
            put_sym_name(&mut symdata, sym.name(), &mut strtab);
            put32(&mut symdata, value);
            put16s(&mut symdata, scnum);
            put16(&mut symdata, 0);
            symdata.push(class);
            symdata.push(0);
            nsyms += 1;
        }

        // Relocation payloads need symbol indices.
        let mut rel_payloads: Vec<Vec<u8>> = Vec::with_capacity(nsects);
        for (s, rels) in relocs.iter().enumerate() {
            let mut payload = Vec::new();
            for (pos, req) in rels {
                let sym = symbols.get(req.sym);
                let external =
                    sym.visibility() & (vis::GLOBAL | vis::EXTERN | vis::COMMON) != 0;
                let index = if external {
                    match sym_index[req.sym] {
                        Some(i) => i,
                        None => {
                            diags.error(
                                Span::default(),
                                AsmError::with_param(
                                    AsmErrorKind::Internal,
                                    "relocation against unemitted symbol",
                                    sym.name(),
                                ),
                            );
                            continue;
                        }
                    }
                } else {
                    match sym.label() {
                        Some(loc) => section_symidx[loc.section],
                        None => {
                            diags.error(
                                Span::default(),
                                AsmError::with_param(
                                    AsmErrorKind::TooComplex,
                                    "cannot relocate against symbol",
                                    sym.name(),
                                ),
                            );
                            continue;
                        }
                    }
                };
                let rtype = self.reloc_type(req)?;
                put32(&mut payload, layout.loc_addr(*pos) as u32);
                put32(&mut payload, index);
                put16(&mut payload, rtype);
            }
            rel_payloads.push(payload);
        }
        if diags.has_errors() {
            return Ok(());
        }

        // Record relocations on their owning sections.
        for (s, rels) in relocs.iter().enumerate() {
            for (pos, req) in rels {
                let rtype = self.reloc_type(req)?;
                object.section_mut(s).add_reloc(crate::core::section::Reloc {
                    addr: layout.loc_addr(*pos),
                    sym: req.sym,
                    rtype: rtype as u32,
                    addend: req.addend,
                });
            }
        }

        // File layout: header, section headers, data + relocs, symbol
        // table, string table.
        let mut offset = 20u64 + 40 * nsects as u64;
        let mut data_ptr: Vec<u64> = Vec::with_capacity(nsects);
        let mut rel_ptr: Vec<u64> = Vec::with_capacity(nsects);
        for s in 0..nsects {
            if datas[s].is_empty() {
                data_ptr.push(0);
            } else {
                data_ptr.push(offset);
                offset += datas[s].len() as u64;
            }
            if rel_payloads[s].is_empty() {
                rel_ptr.push(0);
            } else {
                rel_ptr.push(offset);
                offset += rel_payloads[s].len() as u64;
            }
        }
        for s in 0..nsects {
            object.section_mut(s).filepos = data_ptr[s];
        }
        let symtab_ptr = offset;

        let timestamp = if std::env::var_os("YASM_TEST_SUITE").is_some() {
            0
        } else {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        };

        let mut out = Vec::new();
        put16(&mut out, self.machine());
        put16(&mut out, nsects as u16);
        put32(&mut out, timestamp);
        put32(&mut out, symtab_ptr as u32);
        put32(&mut out, nsyms);
        put16(&mut out, 0); // no optional header
        put16(&mut out, 0); // characteristics

        for s in 0..nsects {
            let sect = object.section(s);
            put_section_name(&mut out, sect.name(), &mut strtab);
            put32(&mut out, 0); // physical address / virtual size
            put32(&mut out, sect.vma as u32);
            put32(&mut out, layout.section_size(s) as u32);
            put32(&mut out, data_ptr[s] as u32);
            put32(&mut out, rel_ptr[s] as u32);
            put32(&mut out, 0); // line numbers
            put16(&mut out, relocs[s].len().min(0xffff) as u16);
            put16(&mut out, 0);
            let mut flags = if sect.is_bss() {
                SCN_BSS
            } else if sect.is_code() {
                SCN_TEXT
            } else {
                SCN_DATA
            };
            if self.mode != CoffMode::Standard {
                flags |= align_flag(sect.align);
            }
            put32(&mut out, flags);
        }

        for s in 0..nsects {
            out.extend_from_slice(&datas[s]);
            out.extend_from_slice(&rel_payloads[s]);
        }
        out.extend_from_slice(&symdata);
        let strtab_bytes = strtab.into_bytes();
        // COFF string table length includes its own 4-byte length field;
        // the deduplicating table's leading NUL is replaced by it.
        put32(&mut out, (strtab_bytes.len() + 3) as u32);
        out.extend_from_slice(&strtab_bytes[1..]);

        w.write_all(&out)
            .map_err(|e| AsmError::new(AsmErrorKind::Io, format!("write failed: {e}")))?;
        Ok(())
    }
}

/// IMAGE_SCN_ALIGN_* flag for a section alignment.
fn align_flag(align: u64) -> u32 {
    let log2 = 64 - align.max(1).leading_zeros() as u64 - 1;
    ((log2.min(13) + 1) as u32) << 20
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put16s(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// 8-byte symbol/section name field: inline when short, string table
/// reference when long.
fn put_sym_name(out: &mut Vec<u8>, name: &str, strtab: &mut StringTable) {
    let bytes = name.as_bytes();
    if bytes.len() <= 8 {
        let mut field = [0u8; 8];
        field[..bytes.len()].copy_from_slice(bytes);
        out.extend_from_slice(&field);
    } else {
        // Offsets are relative to the string table start, which includes
        // its 4-byte length field but not the dedup table's leading NUL.
        let idx = strtab.len() as u32 + 3;
        strtab.index_of(name);
        put32(out, 0);
        put32(out, idx);
    }
}

/// Section header names use the "/offset" form when too long.
fn put_section_name(out: &mut Vec<u8>, name: &str, strtab: &mut StringTable) {
    let bytes = name.as_bytes();
    if bytes.len() <= 8 {
        let mut field = [0u8; 8];
        field[..bytes.len()].copy_from_slice(bytes);
        out.extend_from_slice(&field);
    } else {
        let idx = strtab.len() as u32 + 3;
        strtab.index_of(name);
        let text = format!("/{idx}");
        let mut field = [0u8; 8];
        let n = text.len().min(8);
        field[..n].copy_from_slice(&text.as_bytes()[..n]);
        out.extend_from_slice(&field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_flags_follow_log2() {
        assert_eq!(align_flag(1), 0x0010_0000);
        assert_eq!(align_flag(4), 0x0030_0000);
        assert_eq!(align_flag(16), 0x0050_0000);
    }

    #[test]
    fn reloc_types_per_mode() {
        let std_fmt = CoffFormat::new(CoffMode::Standard);
        let win64 = CoffFormat::new(CoffMode::Win64);
        let req = |pc_rel, size, next_insn| RelocRequest {
            sym: 1,
            pc_rel,
            addend: 0,
            size,
            signed: false,
            seg_of: false,
            section_rel: false,
            next_insn,
        };
        assert_eq!(std_fmt.reloc_type(&req(true, 32, 0)).unwrap(), I386_REL32);
        assert_eq!(std_fmt.reloc_type(&req(false, 32, 0)).unwrap(), I386_DIR32);
        assert!(std_fmt.reloc_type(&req(false, 64, 0)).is_err());
        assert_eq!(win64.reloc_type(&req(true, 32, 0)).unwrap(), AMD64_REL32);
        assert_eq!(win64.reloc_type(&req(true, 32, 3)).unwrap(), AMD64_REL32 + 3);
        assert_eq!(win64.reloc_type(&req(false, 64, 0)).unwrap(), AMD64_ADDR64);
    }
}
