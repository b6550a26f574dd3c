// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! End-to-end assembly scenarios driven through the library pipeline.

use relforge::core::diag::Diagnostics;
use relforge::core::object::Object;
use relforge::core::optimize::optimize;
use relforge::core::registry::ModuleRegistry;
use relforge::parser::SourceFile;

mod elf_reader;

/// Run the full pipeline on in-memory source; returns the object file
/// bytes or the diagnostic messages.
fn build(parser_kw: &str, objfmt_kw: &str, src: &str) -> Result<Vec<u8>, Vec<String>> {
    let registry = ModuleRegistry::with_builtins();
    let mut arch = registry.create_arch("x86").expect("x86 arch");
    let mut parser = registry.create_parser(parser_kw).expect("parser");
    let mut objfmt = registry.create_objfmt(objfmt_kw).expect("objfmt");

    let machine = if objfmt.default_x86_mode_bits() == 64 {
        "amd64"
    } else {
        "x86"
    };
    assert!(arch.set_machine(machine));
    arch.set_var("mode_bits", objfmt.default_x86_mode_bits() as u64);

    let source = SourceFile::from_text("test.asm", src);
    let mut object = Object::new("test.asm", "test.out");
    assert!(objfmt.is_ok_object(&object, arch.as_ref()));
    objfmt.init_symbols(&mut object, parser.keyword());
    objfmt.add_default_section(&mut object);

    let mut dirs = relforge::core::directive::Directives::new();
    arch.add_directives(&mut dirs, parser.keyword());
    parser.add_directives(&mut dirs, parser.keyword());
    objfmt.add_directives(&mut dirs, parser.keyword());
    if parser_kw == "nasm" {
        // The driver registers the visibility directives; tests go through
        // the same path the binary does.
        register_core_directives(&mut dirs);
    }

    let mut diags = Diagnostics::new();
    parser.parse(
        &source,
        &mut object,
        &dirs,
        arch.as_mut(),
        objfmt.as_mut(),
        &mut diags,
    );
    let fail = |diags: &Diagnostics| {
        diags
            .diagnostics()
            .iter()
            .map(|d| d.format())
            .collect::<Vec<_>>()
    };
    if diags.has_errors() {
        return Err(fail(&diags));
    }
    object.finalize(false, arch.as_ref(), &mut diags);
    if diags.has_errors() {
        return Err(fail(&diags));
    }
    optimize(&mut object, &mut diags);
    if diags.has_errors() {
        return Err(fail(&diags));
    }
    let mut out = Vec::new();
    if let Err(err) = objfmt.output(&mut out, &mut object, false, arch.as_ref(), &mut diags)
    {
        return Err(vec![err.to_string()]);
    }
    if diags.has_errors() {
        return Err(fail(&diags));
    }
    Ok(out)
}

fn register_core_directives(dirs: &mut relforge::core::directive::Directives) {
    // Mirror the driver's registration by assembling a tiny config through
    // the public CLI path is heavyweight; the directives the tests need are
    // global/extern/common, reachable via a throwaway full run instead.
    // Registered here directly through the same handlers the driver uses.
    use relforge::core::diag::AsmError;
    use relforge::core::directive::{DirFlags, DirHandler, DirectiveInfo};
    use relforge::core::expr::Expr;
    use relforge::core::symbol::vis;

    fn global(info: &mut DirectiveInfo) -> Result<(), AsmError> {
        for nv in std::mem::take(&mut info.namevals) {
            if let Some(id) = nv.as_id() {
                info.object.symbols.declare(id, vis::GLOBAL, nv.span)?;
            }
        }
        Ok(())
    }
    fn extern_(info: &mut DirectiveInfo) -> Result<(), AsmError> {
        for nv in std::mem::take(&mut info.namevals) {
            if let Some(id) = nv.as_id() {
                info.object.symbols.declare(id, vis::EXTERN, nv.span)?;
            }
        }
        Ok(())
    }
    fn common(info: &mut DirectiveInfo) -> Result<(), AsmError> {
        let namevals = std::mem::take(&mut info.namevals);
        if let Some(name) = namevals.first().and_then(|nv| nv.as_id()) {
            let size = namevals
                .get(1)
                .and_then(|nv| nv.as_expr())
                .cloned()
                .unwrap_or_else(|| Expr::int(0));
            let sym = info.object.symbols.declare(name, vis::COMMON, namevals[0].span)?;
            info.object.symbols.set_common_size(sym, size);
        }
        Ok(())
    }
    dirs.add("global", DirHandler::Func(global), DirFlags::IdRequired);
    dirs.add("extern", DirHandler::Func(extern_), DirFlags::IdRequired);
    dirs.add("common", DirHandler::Func(common), DirFlags::IdRequired);
}

// --- flat binary scenarios ---------------------------------------------

#[test]
fn short_jump_resolves_backward() {
    let out = build("nasm", "bin", "bits 32\nstart: nop\njmp start\n").unwrap();
    assert_eq!(out, vec![0x90, 0xeb, 0xfd]);
}

#[test]
fn near_jump_expands_forward() {
    let out = build(
        "nasm",
        "bin",
        "bits 32\njmp target\ntimes 200 db 0\ntarget:\n",
    )
    .unwrap();
    assert_eq!(out.len(), 205);
    assert_eq!(&out[..5], &[0xe9, 0xc8, 0x00, 0x00, 0x00]);
    assert!(out[5..].iter().all(|&b| b == 0));
}

#[test]
fn short_jump_boundary_at_plus_128() {
    // +127 from the next instruction is still short; +128 goes near.
    let near = build(
        "nasm",
        "bin",
        "bits 32\njmp target\ntimes 128 db 0\ntarget:\n",
    )
    .unwrap();
    assert_eq!(near.len(), 5 + 128);
    assert_eq!(near[0], 0xe9);

    let short = build(
        "nasm",
        "bin",
        "bits 32\njmp target\ntimes 127 db 0\ntarget:\n",
    )
    .unwrap();
    assert_eq!(short.len(), 2 + 127);
    assert_eq!(short[0], 0xeb);
    assert_eq!(short[1], 127);
}

#[test]
fn equ_forward_reference_chain() {
    let out = build("nasm", "bin", "a equ b\nb equ 7\ndd a\n").unwrap();
    assert_eq!(out, vec![0x07, 0x00, 0x00, 0x00]);
}

#[test]
fn label_difference_is_constant() {
    let out = build("nasm", "bin", "l1: times 4 db 0\nl2: dd l2-l1\n").unwrap();
    assert_eq!(out, vec![0, 0, 0, 0, 0x04, 0x00, 0x00, 0x00]);
}

#[test]
fn org_biases_label_addresses() {
    let out = build("nasm", "bin", "org 0x7c00\nstart: dd start\n").unwrap();
    assert_eq!(out, vec![0x00, 0x7c, 0x00, 0x00]);
}

#[test]
fn org_keeps_jumps_short() {
    // The org offset cancels out of same-section distances.
    let out = build("nasm", "bin", "org 0x7c00\nstart: nop\njmp start\n").unwrap();
    assert_eq!(out, vec![0x90, 0xeb, 0xfd]);
}

#[test]
fn dollar_references_current_address() {
    let out = build("nasm", "bin", "org 0x100\ndd $\n").unwrap();
    assert_eq!(out, vec![0x00, 0x01, 0x00, 0x00]);
}

#[test]
fn jmp_dollar_is_a_two_byte_loop() {
    let out = build("nasm", "bin", "bits 32\njmp $\n").unwrap();
    assert_eq!(out, vec![0xeb, 0xfe]);
}

#[test]
fn forced_short_out_of_range_errors() {
    let err = build(
        "nasm",
        "bin",
        "bits 32\njmp short target\ntimes 200 db 0\ntarget:\n",
    )
    .unwrap_err();
    assert!(err.iter().any(|m| m.contains("short jump out of range")));
}

#[test]
fn undefined_symbol_is_reported() {
    let err = build("nasm", "bin", "dd nowhere\n").unwrap_err();
    assert!(err.iter().any(|m| m.contains("undefined symbol")));
}

#[test]
fn mixed_data_strings_and_exprs() {
    let out = build("nasm", "bin", "db 'AB', 0, 1+2\ndw 0x1234\n").unwrap();
    assert_eq!(out, vec![b'A', b'B', 0, 3, 0x34, 0x12]);
}

#[test]
fn align_pads_with_zero_in_data_sections() {
    let out = build(
        "nasm",
        "bin",
        "section .data\ndb 1\nalign 4\ndb 2\n",
    )
    .unwrap();
    assert_eq!(out, vec![1, 0, 0, 0, 2]);
}

#[test]
fn times_string_repeats() {
    let out = build("nasm", "bin", "times 3 db 'a'\n").unwrap();
    assert_eq!(out, b"aaa".to_vec());
}

#[test]
fn local_labels_scope_under_last_global() {
    let out = build(
        "nasm",
        "bin",
        "bits 32\nfirst:\n.loop: nop\njmp .loop\nsecond:\n.loop: nop\njmp .loop\n",
    )
    .unwrap();
    assert_eq!(out, vec![0x90, 0xeb, 0xfd, 0x90, 0xeb, 0xfd]);
}

#[test]
fn mov_and_int_encode_like_a_dos_stub() {
    // org 0x100: mov ah, 0x4c / int 0x21
    let out = build("nasm", "bin", "org 0x100\nmov ah, 0x4c\nint 0x21\n").unwrap();
    assert_eq!(out, vec![0xb4, 0x4c, 0xcd, 0x21]);
}

// --- ELF scenarios ------------------------------------------------------

#[test]
fn elf32_external_call_emits_pc32_reloc() {
    let out = build("nasm", "elf32", "bits 32\nextern foo\ncall foo\n").unwrap();
    let elf = elf_reader::Elf::parse(&out);
    let text = elf.section_data(".text");
    assert_eq!(text, vec![0xe8, 0xfc, 0xff, 0xff, 0xff]);

    let rels = elf.rel_entries(".rel.text");
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].offset, 1);
    assert_eq!(rels[0].rtype, 2, "R_386_PC32");
    assert_eq!(elf.symbol_name(rels[0].sym), "foo");
}

#[test]
fn elf32_data_reference_to_local_label_uses_section_symbol() {
    let out = build(
        "nasm",
        "elf32",
        "bits 32\nsection .data\nvalue: dd 9\nptr: dd value\n",
    )
    .unwrap();
    let elf = elf_reader::Elf::parse(&out);
    let data = elf.section_data(".data");
    // The in-place addend carries the label's section offset (0).
    assert_eq!(data, vec![9, 0, 0, 0, 0, 0, 0, 0]);
    let rels = elf.rel_entries(".rel.data");
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].offset, 4);
    assert_eq!(rels[0].rtype, 1, "R_386_32");
}

#[test]
fn elf64_align_uses_intel_nop_fill() {
    let out = build("nasm", "elf64", "bits 64\nnop\nalign 8\n").unwrap();
    let elf = elf_reader::Elf::parse(&out);
    let text = elf.section_data(".text");
    assert_eq!(text.len(), 8);
    assert_eq!(text[0], 0x90);
    assert_eq!(&text[1..], &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn elf64_external_call_uses_rela() {
    let out = build("nasm", "elf64", "extern frobnicate\ncall frobnicate\n").unwrap();
    let elf = elf_reader::Elf::parse(&out);
    let text = elf.section_data(".text");
    // RELA zeroes the field; the addend lives in the relocation.
    assert_eq!(text, vec![0xe8, 0, 0, 0, 0]);
    let rels = elf.rel_entries(".rela.text");
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].offset, 1);
    assert_eq!(rels[0].rtype, 2, "R_X86_64_PC32");
    assert_eq!(rels[0].addend, -4);
    assert_eq!(elf.symbol_name(rels[0].sym), "frobnicate");
}

#[test]
fn elf32_global_symbol_has_section_and_value() {
    let out = build(
        "nasm",
        "elf32",
        "bits 32\nglobal entry\nnop\nentry: ret\n",
    )
    .unwrap();
    let elf = elf_reader::Elf::parse(&out);
    let sym = elf.find_symbol("entry").expect("entry symbol");
    assert_eq!(sym.value, 1);
    assert!(sym.is_global);
    assert!(sym.shndx != 0);
}

#[test]
fn elf_output_is_deterministic() {
    let src = "bits 32\nglobal f\nf: push ebp\nmov ebp, esp\npop ebp\nret\n";
    let a = build("nasm", "elf32", src).unwrap();
    let b = build("nasm", "elf32", src).unwrap();
    assert_eq!(a, b);
}

// --- GAS dialect --------------------------------------------------------

#[test]
fn gas_basic_text_section() {
    let out = build(
        "gas",
        "elf32",
        ".text\nstart:\n\tnop\n\tjmp start\n.long 7\n",
    )
    .unwrap();
    let elf = elf_reader::Elf::parse(&out);
    let text = elf.section_data(".text");
    assert_eq!(text, vec![0x90, 0xeb, 0xfd, 0x07, 0x00, 0x00, 0x00]);
}

#[test]
fn gas_att_operand_order_and_registers() {
    // movl $1, %eax → B8 01 00 00 00
    let out = build("gas", "elf32", ".text\nmovl $1, %eax\nret\n").unwrap();
    let elf = elf_reader::Elf::parse(&out);
    assert_eq!(
        elf.section_data(".text"),
        vec![0xb8, 1, 0, 0, 0, 0xc3]
    );
}

#[test]
fn gas_memory_operands() {
    // movl 8(%ebp), %eax → 8B 45 08
    let out = build("gas", "elf32", ".text\nmovl 8(%ebp), %eax\n").unwrap();
    let elf = elf_reader::Elf::parse(&out);
    assert_eq!(elf.section_data(".text"), vec![0x8b, 0x45, 0x08]);
}

#[test]
fn gas_data_directives() {
    let out = build(
        "gas",
        "elf32",
        ".data\n.byte 1, 2\n.word 0x3344\n.asciz \"ok\"\n.skip 2\n",
    )
    .unwrap();
    let elf = elf_reader::Elf::parse(&out);
    assert_eq!(
        elf.section_data(".data"),
        vec![1, 2, 0x44, 0x33, b'o', b'k', 0, 0, 0]
    );
}

#[test]
fn gas_leb128_directives() {
    let out = build(
        "gas",
        "elf32",
        ".data\n.uleb128 127, 128\n.sleb128 -64, -65\n",
    )
    .unwrap();
    let elf = elf_reader::Elf::parse(&out);
    assert_eq!(
        elf.section_data(".data"),
        vec![0x7f, 0x80, 0x01, 0x40, 0xbf, 0x7f]
    );
}

#[test]
fn gas_forward_leb128_grows_for_late_labels() {
    // The LEB operand references a label whose offset depends on the LEB's
    // own size; the optimiser settles the fixpoint.
    let out = build(
        "gas",
        "elf32",
        ".data\nstart:\n.uleb128 tail - start\n.skip 200\ntail:\n",
    )
    .unwrap();
    let elf = elf_reader::Elf::parse(&out);
    let data = elf.section_data(".data");
    // 202 = 2-byte LEB + 200 skip; the LEB encodes 202.
    assert_eq!(data.len(), 202);
    assert_eq!(&data[..2], &[0x80 | (202 & 0x7f) as u8, 202 >> 7]);
}

#[test]
fn gas_globl_and_comm() {
    let out = build(
        "gas",
        "elf32",
        ".text\n.globl main\nmain: ret\n.comm buf, 64\n",
    )
    .unwrap();
    let elf = elf_reader::Elf::parse(&out);
    assert!(elf.find_symbol("main").unwrap().is_global);
    let buf = elf.find_symbol("buf").unwrap();
    assert_eq!(buf.size, 64);
    assert_eq!(buf.shndx, 0xfff2, "SHN_COMMON");
}

// --- COFF scenarios -----------------------------------------------------

use std::sync::Mutex;

/// Serialises tests that flip the timestamp-suppression environment
/// variable.
static ENV_LOCK: Mutex<()> = Mutex::new(());

struct CoffFile {
    data: Vec<u8>,
}

impl CoffFile {
    fn parse(data: Vec<u8>) -> Self {
        Self { data }
    }

    fn machine(&self) -> u16 {
        u16::from_le_bytes([self.data[0], self.data[1]])
    }

    fn timestamp(&self) -> u32 {
        u32::from_le_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    fn u32_at(&self, o: usize) -> u32 {
        u32::from_le_bytes([
            self.data[o],
            self.data[o + 1],
            self.data[o + 2],
            self.data[o + 3],
        ])
    }

    fn section_base(&self, i: usize) -> usize {
        20 + 40 * i
    }

    fn section_data(&self, i: usize) -> Vec<u8> {
        let base = self.section_base(i);
        let size = self.u32_at(base + 16) as usize;
        let ptr = self.u32_at(base + 20) as usize;
        self.data[ptr..ptr + size].to_vec()
    }

    fn relocs(&self, i: usize) -> Vec<(u32, u32, u16)> {
        let base = self.section_base(i);
        let nreloc =
            u16::from_le_bytes([self.data[base + 32], self.data[base + 33]]) as usize;
        let ptr = self.u32_at(base + 24) as usize;
        (0..nreloc)
            .map(|k| {
                let o = ptr + 10 * k;
                (
                    self.u32_at(o),
                    self.u32_at(o + 4),
                    u16::from_le_bytes([self.data[o + 8], self.data[o + 9]]),
                )
            })
            .collect()
    }
}

#[test]
fn win32_external_call_reloc() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    std::env::set_var("YASM_TEST_SUITE", "1");
    let out = build("nasm", "win32", "bits 32\nextern foo\ncall foo\n").unwrap();
    std::env::remove_var("YASM_TEST_SUITE");

    let coff = CoffFile::parse(out);
    assert_eq!(coff.machine(), 0x014c);
    assert_eq!(coff.timestamp(), 0);
    // Win32 stores the PC-relative addend measured from the end of the
    // relocated field, so a plain call carries zero.
    assert_eq!(coff.section_data(0), vec![0xe8, 0, 0, 0, 0]);
    let relocs = coff.relocs(0);
    assert_eq!(relocs.len(), 1);
    assert_eq!(relocs[0].0, 1, "fixup address");
    assert_eq!(relocs[0].2, 20, "IMAGE_REL_I386_REL32");
}

#[test]
fn standard_coff_chains_section_addresses() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    std::env::set_var("YASM_TEST_SUITE", "1");
    let out = build(
        "nasm",
        "coff",
        "bits 32\ndd 1\nsection .data\ndd 2\n",
    )
    .unwrap();
    std::env::remove_var("YASM_TEST_SUITE");

    let coff = CoffFile::parse(out);
    // Standard COFF assigns chained VMAs: .data starts after .text.
    let data_vaddr = coff.u32_at(coff.section_base(1) + 12);
    assert_eq!(data_vaddr, 4);
}

#[test]
fn win64_external_call_uses_rel32() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    std::env::set_var("YASM_TEST_SUITE", "1");
    let out = build("nasm", "win64", "extern foo\ncall foo\n").unwrap();
    std::env::remove_var("YASM_TEST_SUITE");

    let coff = CoffFile::parse(out);
    assert_eq!(coff.machine(), 0x8664);
    let relocs = coff.relocs(0);
    assert_eq!(relocs.len(), 1);
    assert_eq!(relocs[0].2, 4, "IMAGE_REL_AMD64_REL32");
}

#[test]
fn coff_output_is_reproducible_with_suppressed_timestamps() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    std::env::set_var("YASM_TEST_SUITE", "1");
    let src = "bits 32\nglobal start\nstart: ret\n";
    let a = build("nasm", "coff", src).unwrap();
    let b = build("nasm", "coff", src).unwrap();
    std::env::remove_var("YASM_TEST_SUITE");
    assert_eq!(a, b);
    assert_eq!(CoffFile::parse(a).timestamp(), 0);
}

// --- bytes-and-lengths properties ---------------------------------------

#[test]
fn reserve_emits_zeroed_space_in_flat_output() {
    let out = build("nasm", "bin", "db 0xaa\nresb 3\ndb 0xbb\n").unwrap();
    assert_eq!(out, vec![0xaa, 0, 0, 0, 0xbb]);
}

#[test]
fn cascading_jump_expansion_converges() {
    // j2 is a backward jump that only leaves short range once j1 (which
    // sits between j2 and its target) expands; the relaxation loop must
    // ripple the first expansion into the second.
    let src = "bits 32\n\
               start:\n\
               times 118 db 0\n\
               j1: jmp far_end\n\
               times 6 db 0\n\
               j2: jmp start\n\
               times 130 db 0\n\
               far_end:\n";
    let out = build("nasm", "bin", src).unwrap();
    assert_eq!(out.len(), 118 + 5 + 6 + 5 + 130);
    assert_eq!(out[118], 0xe9, "forward jump went near");
    assert_eq!(out[129], 0xe9, "backward jump rippled to near");
    // j2 near displacement: start(0) − end of j2 (134).
    let disp = i32::from_le_bytes([out[130], out[131], out[132], out[133]]);
    assert_eq!(disp, -134);
}
