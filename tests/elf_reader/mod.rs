// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Minimal ELF reader for asserting on emitted object files.

pub struct Elf {
    data: Vec<u8>,
    is64: bool,
    sections: Vec<Section>,
    symbols: Vec<Sym>,
}

struct Section {
    name: String,
    sh_type: u32,
    offset: u64,
    size: u64,
}

pub struct Sym {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub is_global: bool,
    pub shndx: u16,
}

pub struct Rel {
    pub offset: u64,
    pub sym: u32,
    pub rtype: u32,
    pub addend: i64,
}

fn u16le(b: &[u8], o: usize) -> u16 {
    u16::from_le_bytes([b[o], b[o + 1]])
}

fn u32le(b: &[u8], o: usize) -> u32 {
    u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
}

fn u64le(b: &[u8], o: usize) -> u64 {
    u64::from_le_bytes([
        b[o],
        b[o + 1],
        b[o + 2],
        b[o + 3],
        b[o + 4],
        b[o + 5],
        b[o + 6],
        b[o + 7],
    ])
}

fn cstr(b: &[u8], o: usize) -> String {
    let end = b[o..].iter().position(|&c| c == 0).map(|p| o + p).unwrap_or(o);
    String::from_utf8_lossy(&b[o..end]).to_string()
}

impl Elf {
    pub fn parse(data: &[u8]) -> Elf {
        assert_eq!(&data[..4], b"\x7fELF", "not an ELF file");
        let is64 = data[4] == 2;
        assert_eq!(data[5], 1, "expected little-endian");
        let (shoff, shentsize, shnum, shstrndx) = if is64 {
            (
                u64le(data, 0x28),
                u16le(data, 0x3a) as usize,
                u16le(data, 0x3c) as usize,
                u16le(data, 0x3e) as usize,
            )
        } else {
            (
                u32le(data, 0x20) as u64,
                u16le(data, 0x2e) as usize,
                u16le(data, 0x30) as usize,
                u16le(data, 0x32) as usize,
            )
        };

        let shdr = |i: usize| -> (u32, u32, u64, u64, u32) {
            let base = shoff as usize + i * shentsize;
            if is64 {
                (
                    u32le(data, base),
                    u32le(data, base + 4),
                    u64le(data, base + 0x18),
                    u64le(data, base + 0x20),
                    u32le(data, base + 0x28),
                )
            } else {
                (
                    u32le(data, base),
                    u32le(data, base + 4),
                    u32le(data, base + 0x10) as u64,
                    u32le(data, base + 0x14) as u64,
                    u32le(data, base + 0x18),
                )
            }
        };

        let (_, _, shstr_off, _, _) = shdr(shstrndx);
        let mut sections = Vec::with_capacity(shnum);
        for i in 0..shnum {
            let (name_off, sh_type, offset, size, _) = shdr(i);
            sections.push(Section {
                name: cstr(data, shstr_off as usize + name_off as usize),
                sh_type,
                offset,
                size,
            });
        }

        // Symbol table plus its string table.
        let mut symbols = Vec::new();
        if let Some(symtab) = sections.iter().position(|s| s.name == ".symtab") {
            let (_, _, sym_off, sym_size, link) = shdr(symtab);
            let (_, _, str_off, _, _) = shdr(link as usize);
            let entsize = if is64 { 24 } else { 16 };
            let count = sym_size as usize / entsize;
            for i in 0..count {
                let base = sym_off as usize + i * entsize;
                let (name_off, value, size, info, shndx) = if is64 {
                    (
                        u32le(data, base),
                        u64le(data, base + 8),
                        u64le(data, base + 16),
                        data[base + 4],
                        u16le(data, base + 6),
                    )
                } else {
                    (
                        u32le(data, base),
                        u32le(data, base + 4) as u64,
                        u32le(data, base + 8) as u64,
                        data[base + 12],
                        u16le(data, base + 14),
                    )
                };
                symbols.push(Sym {
                    name: cstr(data, str_off as usize + name_off as usize),
                    value,
                    size,
                    is_global: info >> 4 == 1,
                    shndx,
                });
            }
        }

        Elf {
            data: data.to_vec(),
            is64,
            sections,
            symbols,
        }
    }

    pub fn section_data(&self, name: &str) -> Vec<u8> {
        let sect = self
            .sections
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no section {name}"));
        // SHT_NOBITS has no file content.
        if sect.sh_type == 8 {
            return Vec::new();
        }
        self.data[sect.offset as usize..(sect.offset + sect.size) as usize].to_vec()
    }

    pub fn rel_entries(&self, name: &str) -> Vec<Rel> {
        let sect = self
            .sections
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no relocation section {name}"));
        let bytes = &self.data[sect.offset as usize..(sect.offset + sect.size) as usize];
        let mut out = Vec::new();
        if self.is64 {
            assert_eq!(sect.sh_type, 4, "expected SHT_RELA");
            for chunk in bytes.chunks_exact(24) {
                let info = u64le(chunk, 8);
                out.push(Rel {
                    offset: u64le(chunk, 0),
                    sym: (info >> 32) as u32,
                    rtype: (info & 0xffff_ffff) as u32,
                    addend: u64le(chunk, 16) as i64,
                });
            }
        } else {
            assert_eq!(sect.sh_type, 9, "expected SHT_REL");
            for chunk in bytes.chunks_exact(8) {
                let info = u32le(chunk, 4);
                out.push(Rel {
                    offset: u32le(chunk, 0) as u64,
                    sym: info >> 8,
                    rtype: info & 0xff,
                    addend: 0,
                });
            }
        }
        out
    }

    pub fn symbol_name(&self, index: u32) -> String {
        self.symbols[index as usize].name.clone()
    }

    pub fn find_symbol(&self, name: &str) -> Option<&Sym> {
        self.symbols.iter().find(|s| s.name == name)
    }
}
