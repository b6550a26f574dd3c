// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! ELF32/ELF64 relocatable object output.
//!
//! ELF32 emits `SHT_REL` relocations with the addend stored in place;
//! ELF64 emits `SHT_RELA` with explicit addends and zeroed fields. Local
//! label references are rewritten to section-symbol relocations with the
//! label's address folded into the addend.

use std::io::Write;

use crate::arch::Arch;
use crate::core::bytecode::Location;
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics, Span};
use crate::core::directive::{DirFlags, DirHandler, DirectiveInfo, Directives};
use crate::core::object::{Layout, Object};
use crate::core::section::Section;
use crate::core::symbol::{vis, SymbolRef, SymbolTable, SymbolType};

use super::{
    is_emitted_symbol, render_section, render_section_nobits, ObjectFormat, RelocModel,
    RelocRequest,
};

const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;
const SHT_REL: u32 = 9;

const SHF_WRITE: u64 = 0x1;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;
const SHF_INFO_LINK: u64 = 0x40;

const SHN_ABS: u16 = 0xfff1;
const SHN_COMMON: u16 = 0xfff2;

const STB_LOCAL: u8 = 0;
const STB_GLOBAL: u8 = 1;
const STT_NOTYPE: u8 = 0;
const STT_OBJECT: u8 = 1;
const STT_SECTION: u8 = 3;
const STT_FILE: u8 = 4;

const R_386_32: u32 = 1;
const R_386_PC32: u32 = 2;
const R_386_16: u32 = 20;
const R_386_8: u32 = 22;

const R_X86_64_64: u32 = 1;
const R_X86_64_PC32: u32 = 2;
const R_X86_64_32: u32 = 10;
const R_X86_64_32S: u32 = 11;
const R_X86_64_16: u32 = 12;
const R_X86_64_8: u32 = 14;

/// ELF class selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

pub struct ElfFormat {
    class: ElfClass,
}

impl ElfFormat {
    pub fn new(class: ElfClass) -> Self {
        Self { class }
    }

    fn is64(&self) -> bool {
        self.class == ElfClass::Elf64
    }

    fn reloc_type(&self, req: &RelocRequest) -> Result<u32, AsmError> {
        if req.seg_of || req.section_rel {
            return Err(AsmError::new(
                AsmErrorKind::TooComplex,
                "elf: segment references are not representable",
            ));
        }
        let t = if self.is64() {
            match (req.pc_rel, req.size) {
                (true, 32) => R_X86_64_PC32,
                (false, 64) => R_X86_64_64,
                (false, 32) if req.signed => R_X86_64_32S,
                (false, 32) => R_X86_64_32,
                (false, 16) => R_X86_64_16,
                (false, 8) => R_X86_64_8,
                _ => {
                    return Err(AsmError::new(
                        AsmErrorKind::TooComplex,
                        "elf: invalid relocation size",
                    ))
                }
            }
        } else {
            match (req.pc_rel, req.size) {
                (true, 32) => R_386_PC32,
                (false, 32) => R_386_32,
                (false, 16) => R_386_16,
                (false, 8) => R_386_8,
                _ => {
                    return Err(AsmError::new(
                        AsmErrorKind::TooComplex,
                        "elf: invalid relocation size",
                    ))
                }
            }
        };
        Ok(t)
    }
}

struct ElfRelocModel {
    rela: bool,
}

impl RelocModel for ElfRelocModel {
    fn adjust(
        &self,
        mut req: RelocRequest,
        _pos: Location,
        layout: &Layout,
        symbols: &SymbolTable,
    ) -> Result<(RelocRequest, i64), AsmError> {
        let sym = symbols.get(req.sym);
        // Local labels relocate against their section symbol, with the
        // label's address folded into the addend.
        if sym.visibility() & (vis::GLOBAL | vis::EXTERN | vis::COMMON) == 0 {
            if let Some(loc) = sym.label() {
                req.addend += layout.loc_addr(loc) as i64;
            }
        }
        let inplace = if self.rela { 0 } else { req.addend };
        Ok((req, inplace))
    }
}

fn dir_section(info: &mut DirectiveInfo) -> Result<(usize, bool), AsmError> {
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
            (None, Some("progbits")) => bss = false,
            (None, Some("nobits")) => bss = true,
            (None, Some("exec")) => code = true,
            (None, Some("noexec")) => code = false,
            (None, Some("write")) | (None, Some("alloc")) | (None, Some("data")) => {}
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
    if let Some(a) = align {
        info.object.section_mut(idx).align = a;
    }
    info.object.section_mut(idx).set_bss(bss);
    info.object.section_mut(idx).set_code(code);
    Ok((idx, bss))
}

impl ObjectFormat for ElfFormat {
    fn keyword(&self) -> &'static str {
        match self.class {
            ElfClass::Elf32 => "elf32",
            ElfClass::Elf64 => "elf64",
        }
    }

    fn extension(&self) -> &'static str {
        ".o"
    }

    fn default_x86_mode_bits(&self) -> u32 {
        if self.is64() {
            64
        } else {
            32
        }
    }

    fn is_ok_object(&self, _object: &Object, arch: &dyn Arch) -> bool {
        if self.is64() {
            arch.machine().eq_ignore_ascii_case("amd64")
        } else {
            arch.machine().eq_ignore_ascii_case("x86")
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
                let (idx, _) = dir_section(info)?;
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
        let is64 = self.is64();
        let layout = Layout::build(object);
        let model = ElfRelocModel { rela: is64 };

        // Render user sections.
        let nsects = object.sections().len();
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
        if diags.has_errors() {
            return Ok(());
        }

        // Build the symbol table: null, FILE, section symbols, local
        // symbols, then globals; record indices for relocation use.
        let symbols = &object.symbols;
        let mut strtab = StringTable::new();
        let mut syms: Vec<ElfSym> = Vec::new();
        syms.push(ElfSym::null());
        syms.push(ElfSym {
            name: strtab.index_of(&object.src_filename),
            value: 0,
            size: 0,
            bind: STB_LOCAL,
            typ: STT_FILE,
            shndx: SHN_ABS,
        });
        let mut section_sym: Vec<u32> = Vec::with_capacity(nsects);
        for s in 0..nsects {
            section_sym.push(syms.len() as u32);
            syms.push(ElfSym {
                name: 0,
                value: 0,
                size: 0,
                bind: STB_LOCAL,
                typ: STT_SECTION,
                shndx: (s + 1) as u16,
            });
        }

        let mut sym_index: Vec<Option<u32>> = vec![None; symbols.len()];
        let emit_symbol = |r: SymbolRef,
                               syms: &mut Vec<ElfSym>,
                               strtab: &mut StringTable,
                               global: bool| {
            let sym = symbols.get(r);
            let bind = if global { STB_GLOBAL } else { STB_LOCAL };
            let entry = if let Some(loc) = sym.label() {
                ElfSym {
                    name: strtab.index_of(sym.name()),
                    value: layout.loc_addr(loc),
                    size: 0,
                    bind,
                    typ: STT_NOTYPE,
                    shndx: (loc.section + 1) as u16,
                }
            } else if sym.visibility() & vis::COMMON != 0 {
                let size = sym
                    .common_size()
                    .and_then(|e| e.get_intnum().map(|v| v.get_uint().0))
                    .unwrap_or(0);
                ElfSym {
                    name: strtab.index_of(sym.name()),
                    value: 4,
                    size,
                    bind: STB_GLOBAL,
                    typ: STT_OBJECT,
                    shndx: SHN_COMMON,
                }
            } else if sym.visibility() & vis::EXTERN != 0 {
                ElfSym {
                    name: strtab.index_of(sym.name()),
                    value: 0,
                    size: 0,
                    bind: STB_GLOBAL,
                    typ: 0,
                    shndx: 0,
                }
            } else if let Some(v) = sym.equ_value() {
                ElfSym {
                    name: strtab.index_of(sym.name()),
                    value: v.get_uint().0,
                    size: 0,
                    bind,
                    typ: 0,
                    shndx: SHN_ABS,
                }
            } else {
                return None;
            };
            let idx = syms.len() as u32;
            syms.push(entry);
            Some(idx)
        };

        // Locals first (required by the ELF gABI), then globals.
        for (r, sym) in symbols.iter() {
            if sym.is_absolute() || sym.is_special() {
                continue;
            }
            let global = sym.visibility() & (vis::GLOBAL | vis::EXTERN | vis::COMMON) != 0;
            if global || !is_emitted_symbol(symbols, r, true) {
                continue;
            }
            if !all_syms && sym.symbol_type() == SymbolType::Equ {
                // EQU constants stay internal unless a full dump is wanted.
                continue;
            }
            sym_index[r] = emit_symbol(r, &mut syms, &mut strtab, false);
        }
        let first_global = syms.len() as u32;
        for (r, sym) in symbols.iter() {
            if sym.is_absolute() || sym.is_special() {
                continue;
            }
            if sym.visibility() & (vis::GLOBAL | vis::EXTERN | vis::COMMON) == 0 {
                continue;
            }
            sym_index[r] = emit_symbol(r, &mut syms, &mut strtab, true);
        }

        // Map relocation symbols to symtab indices.
        let mut rel_payloads: Vec<Vec<u8>> = Vec::with_capacity(nsects);
        for (s, rels) in relocs.iter().enumerate() {
            let mut payload = Vec::new();
            for (pos, req) in rels {
                let sym = symbols.get(req.sym);
                let local =
                    sym.visibility() & (vis::GLOBAL | vis::EXTERN | vis::COMMON) == 0;
                let index = if local {
                    match sym.label() {
                        Some(loc) => section_sym[loc.section],
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
                } else {
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
                };
                let rtype = self.reloc_type(req)?;
                let offset = layout.loc_offset(*pos);
                if is64 {
                    put64(&mut payload, offset);
                    put64(&mut payload, ((index as u64) << 32) | rtype as u64);
                    put64(&mut payload, req.addend as u64);
                } else {
                    put32(&mut payload, offset as u32);
                    put32(&mut payload, (index << 8) | (rtype & 0xff));
                }
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
                    addr: layout.loc_offset(*pos),
                    sym: req.sym,
                    rtype,
                    addend: req.addend,
                });
            }
        }

        // Serialise the symbol table.
        let mut symtab_data = Vec::new();
        for sym in &syms {
            sym.write(&mut symtab_data, is64);
        }

        // Section header string table.
        let mut shstrtab = StringTable::new();
        let rel_prefix = if is64 { ".rela" } else { ".rel" };
        let mut headers: Vec<Shdr> = Vec::new();
        headers.push(Shdr::null());

        let ehsize: u64 = if is64 { 64 } else { 52 };
        let mut offset = ehsize;
        let mut user_shndx: Vec<u16> = Vec::with_capacity(nsects);
        for s in 0..nsects {
            let sect = object.section(s);
            let name_idx = shstrtab.index_of(sect.name());
            let mut flags = SHF_ALLOC;
            if sect.is_code() {
                flags |= SHF_EXECINSTR;
            } else {
                flags |= SHF_WRITE;
            }
            let size = layout.section_size(s);
            let (sh_type, sh_offset, filesz) = if sect.is_bss() {
                (SHT_NOBITS, offset, 0u64)
            } else {
                let o = align_up(offset, sect.align.max(1));
                (SHT_PROGBITS, o, datas[s].len() as u64)
            };
            offset = sh_offset + filesz;
            user_shndx.push(headers.len() as u16);
            headers.push(Shdr {
                name: name_idx,
                sh_type,
                flags,
                addr: sect.vma,
                offset: sh_offset,
                size,
                link: 0,
                info: 0,
                addralign: sect.align.max(1),
                entsize: 0,
            });
        }

        // Relocation sections follow the data they describe. Their symtab
        // link index is patched once the symtab header index is known.
        let mut rel_header_ix: Vec<(usize, usize)> = Vec::new();
        for s in 0..nsects {
            if rel_payloads[s].is_empty() {
                continue;
            }
            let name = format!("{rel_prefix}{}", object.section(s).name());
            let name_idx = shstrtab.index_of(&name);
            let o = align_up(offset, if is64 { 8 } else { 4 });
            offset = o + rel_payloads[s].len() as u64;
            rel_header_ix.push((headers.len(), s));
            headers.push(Shdr {
                name: name_idx,
                sh_type: if is64 { SHT_RELA } else { SHT_REL },
                flags: SHF_INFO_LINK,
                addr: 0,
                offset: o,
                size: rel_payloads[s].len() as u64,
                link: 0, // patched to symtab index below
                info: user_shndx[s] as u32,
                addralign: if is64 { 8 } else { 4 },
                entsize: if is64 { 24 } else { 8 },
            });
        }

        let symtab_ix = headers.len();
        let o = align_up(offset, if is64 { 8 } else { 4 });
        offset = o + symtab_data.len() as u64;
        headers.push(Shdr {
            name: shstrtab.index_of(".symtab"),
            sh_type: SHT_SYMTAB,
            flags: 0,
            addr: 0,
            offset: o,
            size: symtab_data.len() as u64,
            link: (symtab_ix + 1) as u32, // .strtab follows
            info: first_global,
            addralign: if is64 { 8 } else { 4 },
            entsize: if is64 { 24 } else { 16 },
        });
        for (ix, _) in &rel_header_ix {
            headers[*ix].link = symtab_ix as u32;
        }

        let strtab_data = strtab.into_bytes();
        let strtab_off = offset;
        headers.push(Shdr {
            name: shstrtab.index_of(".strtab"),
            sh_type: SHT_STRTAB,
            flags: 0,
            addr: 0,
            offset: strtab_off,
            size: strtab_data.len() as u64,
            link: 0,
            info: 0,
            addralign: 1,
            entsize: 0,
        });
        offset += strtab_data.len() as u64;

        let shstrtab_name = shstrtab.index_of(".shstrtab");
        let shstrtab_ix = headers.len();
        let shstrtab_data = shstrtab.into_bytes();
        headers.push(Shdr {
            name: shstrtab_name,
            sh_type: SHT_STRTAB,
            flags: 0,
            addr: 0,
            offset,
            size: shstrtab_data.len() as u64,
            link: 0,
            info: 0,
            addralign: 1,
            entsize: 0,
        });
        offset += shstrtab_data.len() as u64;

        let shoff = align_up(offset, if is64 { 8 } else { 4 });

        for s in 0..nsects {
            object.section_mut(s).filepos = headers[user_shndx[s] as usize].offset;
        }

        // File header.
        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        out.push(if is64 { 2 } else { 1 });
        out.push(1); // little endian
        out.push(1); // EV_CURRENT
        out.push(0); // SysV ABI
        out.extend_from_slice(&[0; 8]);
        put16(&mut out, 1); // ET_REL
        put16(&mut out, if is64 { 62 } else { 3 });
        put32(&mut out, 1);
        if is64 {
            put64(&mut out, 0); // entry
            put64(&mut out, 0); // phoff
            put64(&mut out, shoff);
        } else {
            put32(&mut out, 0);
            put32(&mut out, 0);
            put32(&mut out, shoff as u32);
        }
        put32(&mut out, 0); // flags
        put16(&mut out, ehsize as u16);
        put16(&mut out, 0); // phentsize
        put16(&mut out, 0); // phnum
        put16(&mut out, if is64 { 64 } else { 40 });
        put16(&mut out, headers.len() as u16);
        put16(&mut out, shstrtab_ix as u16);

        // Section contents, padded to their recorded offsets.
        for s in 0..nsects {
            if object.section(s).is_bss() {
                continue;
            }
            pad_to(&mut out, headers[user_shndx[s] as usize].offset);
            out.extend_from_slice(&datas[s]);
        }
        for (ix, s) in &rel_header_ix {
            pad_to(&mut out, headers[*ix].offset);
            out.extend_from_slice(&rel_payloads[*s]);
        }
        pad_to(&mut out, headers[symtab_ix].offset);
        out.extend_from_slice(&symtab_data);
        pad_to(&mut out, strtab_off);
        out.extend_from_slice(&strtab_data);
        out.extend_from_slice(&shstrtab_data);
        pad_to(&mut out, shoff);
        for h in &headers {
            h.write(&mut out, is64);
        }

        w.write_all(&out)
            .map_err(|e| AsmError::new(AsmErrorKind::Io, format!("write failed: {e}")))?;
        Ok(())
    }
}

struct ElfSym {
    name: u32,
    value: u64,
    size: u64,
    bind: u8,
    typ: u8,
    shndx: u16,
}

impl ElfSym {
    fn null() -> Self {
        Self {
            name: 0,
            value: 0,
            size: 0,
            bind: 0,
            typ: 0,
            shndx: 0,
        }
    }

    fn write(&self, out: &mut Vec<u8>, is64: bool) {
        let info = (self.bind << 4) | (self.typ & 0xf);
        if is64 {
            put32(out, self.name);
            out.push(info);
            out.push(0);
            put16(out, self.shndx);
            put64(out, self.value);
            put64(out, self.size);
        } else {
            put32(out, self.name);
            put32(out, self.value as u32);
            put32(out, self.size as u32);
            out.push(info);
            out.push(0);
            put16(out, self.shndx);
        }
    }
}

struct Shdr {
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
}

impl Shdr {
    fn null() -> Self {
        Self {
            name: 0,
            sh_type: 0,
            flags: 0,
            addr: 0,
            offset: 0,
            size: 0,
            link: 0,
            info: 0,
            addralign: 0,
            entsize: 0,
        }
    }

    fn write(&self, out: &mut Vec<u8>, is64: bool) {
        put32(out, self.name);
        put32(out, self.sh_type);
        if is64 {
            put64(out, self.flags);
            put64(out, self.addr);
            put64(out, self.offset);
            put64(out, self.size);
            put32(out, self.link);
            put32(out, self.info);
            put64(out, self.addralign);
            put64(out, self.entsize);
        } else {
            put32(out, self.flags as u32);
            put32(out, self.addr as u32);
            put32(out, self.offset as u32);
            put32(out, self.size as u32);
            put32(out, self.link);
            put32(out, self.info);
            put32(out, self.addralign as u32);
            put32(out, self.entsize as u32);
        }
    }
}

/// Append-only string table with a leading NUL.
pub struct StringTable {
    data: Vec<u8>,
}

impl StringTable {
    pub fn new() -> Self {
        Self { data: vec![0] }
    }

    pub fn index_of(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        let idx = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        idx
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn align_up(v: u64, align: u64) -> u64 {
    let align = align.max(1);
    v.div_ceil(align) * align
}

fn pad_to(out: &mut Vec<u8>, offset: u64) {
    debug_assert!(out.len() as u64 <= offset, "file layout overran offset");
    while (out.len() as u64) < offset {
        out.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_table_indices() {
        let mut tab = StringTable::new();
        assert_eq!(tab.index_of(""), 0);
        let a = tab.index_of(".text");
        let b = tab.index_of(".data");
        assert_eq!(a, 1);
        assert_eq!(b, 7);
        let bytes = tab.into_bytes();
        assert_eq!(&bytes[1..6], b".text");
        assert_eq!(bytes[6], 0);
    }

    #[test]
    fn align_up_rounds() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(52, 16), 64);
        assert_eq!(align_up(8, 1), 8);
    }
}
