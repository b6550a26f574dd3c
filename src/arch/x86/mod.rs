// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! x86/AMD64 architecture backend.
//!
//! Owns register naming, mode bits (16/32/64), nop-fill tables, and the
//! instruction encoder in [`encode`].

mod encode;
mod fills;

use crate::arch::{Arch, Insn, LoweredInsn};
use crate::core::diag::{AsmError, AsmErrorKind};
use crate::core::directive::{DirFlags, DirHandler, DirectiveInfo, Directives};
use crate::core::intnum::IntNum;

/// Register class encoded in the high byte of the opaque register code.
pub mod reg {
    pub const CLASS_SHIFT: u32 = 8;
    pub const CLASS_MASK: u32 = 0xff00;
    pub const NUM_MASK: u32 = 0x0f;
    /// Register requires a REX prefix (spl/bpl/sil/dil, r8..r15).
    pub const NEEDS_REX: u32 = 0x40;
    /// Register cannot be used with a REX prefix (ah/ch/dh/bh).
    pub const NO_REX: u32 = 0x20;

    pub const REG8: u32 = 1 << CLASS_SHIFT;
    pub const REG16: u32 = 2 << CLASS_SHIFT;
    pub const REG32: u32 = 3 << CLASS_SHIFT;
    pub const REG64: u32 = 4 << CLASS_SHIFT;
    pub const SEGREG: u32 = 5 << CLASS_SHIFT;

    pub fn class(code: u32) -> u32 {
        code & CLASS_MASK
    }

    pub fn num(code: u32) -> u8 {
        (code & NUM_MASK) as u8
    }

    pub fn size_bits(code: u32) -> u32 {
        match class(code) {
            REG8 => 8,
            REG16 => 16,
            REG32 => 32,
            REG64 => 64,
            SEGREG => 16,
            _ => 0,
        }
    }
}

#[rustfmt::skip]
static GP_REGS: &[(&str, u32)] = &[
    ("al", reg::REG8), ("cl", reg::REG8 | 1), ("dl", reg::REG8 | 2), ("bl", reg::REG8 | 3),
    ("ah", reg::REG8 | 4 | reg::NO_REX), ("ch", reg::REG8 | 5 | reg::NO_REX),
    ("dh", reg::REG8 | 6 | reg::NO_REX), ("bh", reg::REG8 | 7 | reg::NO_REX),
    ("spl", reg::REG8 | 4 | reg::NEEDS_REX), ("bpl", reg::REG8 | 5 | reg::NEEDS_REX),
    ("sil", reg::REG8 | 6 | reg::NEEDS_REX), ("dil", reg::REG8 | 7 | reg::NEEDS_REX),
    ("r8b", reg::REG8 | 8 | reg::NEEDS_REX), ("r9b", reg::REG8 | 9 | reg::NEEDS_REX),
    ("r10b", reg::REG8 | 10 | reg::NEEDS_REX), ("r11b", reg::REG8 | 11 | reg::NEEDS_REX),
    ("r12b", reg::REG8 | 12 | reg::NEEDS_REX), ("r13b", reg::REG8 | 13 | reg::NEEDS_REX),
    ("r14b", reg::REG8 | 14 | reg::NEEDS_REX), ("r15b", reg::REG8 | 15 | reg::NEEDS_REX),
    ("ax", reg::REG16), ("cx", reg::REG16 | 1), ("dx", reg::REG16 | 2), ("bx", reg::REG16 | 3),
    ("sp", reg::REG16 | 4), ("bp", reg::REG16 | 5), ("si", reg::REG16 | 6), ("di", reg::REG16 | 7),
    ("r8w", reg::REG16 | 8 | reg::NEEDS_REX), ("r9w", reg::REG16 | 9 | reg::NEEDS_REX),
    ("r10w", reg::REG16 | 10 | reg::NEEDS_REX), ("r11w", reg::REG16 | 11 | reg::NEEDS_REX),
    ("r12w", reg::REG16 | 12 | reg::NEEDS_REX), ("r13w", reg::REG16 | 13 | reg::NEEDS_REX),
    ("r14w", reg::REG16 | 14 | reg::NEEDS_REX), ("r15w", reg::REG16 | 15 | reg::NEEDS_REX),
    ("eax", reg::REG32), ("ecx", reg::REG32 | 1), ("edx", reg::REG32 | 2), ("ebx", reg::REG32 | 3),
    ("esp", reg::REG32 | 4), ("ebp", reg::REG32 | 5), ("esi", reg::REG32 | 6), ("edi", reg::REG32 | 7),
    ("r8d", reg::REG32 | 8 | reg::NEEDS_REX), ("r9d", reg::REG32 | 9 | reg::NEEDS_REX),
    ("r10d", reg::REG32 | 10 | reg::NEEDS_REX), ("r11d", reg::REG32 | 11 | reg::NEEDS_REX),
    ("r12d", reg::REG32 | 12 | reg::NEEDS_REX), ("r13d", reg::REG32 | 13 | reg::NEEDS_REX),
    ("r14d", reg::REG32 | 14 | reg::NEEDS_REX), ("r15d", reg::REG32 | 15 | reg::NEEDS_REX),
    ("rax", reg::REG64), ("rcx", reg::REG64 | 1), ("rdx", reg::REG64 | 2), ("rbx", reg::REG64 | 3),
    ("rsp", reg::REG64 | 4), ("rbp", reg::REG64 | 5), ("rsi", reg::REG64 | 6), ("rdi", reg::REG64 | 7),
    ("r8", reg::REG64 | 8 | reg::NEEDS_REX), ("r9", reg::REG64 | 9 | reg::NEEDS_REX),
    ("r10", reg::REG64 | 10 | reg::NEEDS_REX), ("r11", reg::REG64 | 11 | reg::NEEDS_REX),
    ("r12", reg::REG64 | 12 | reg::NEEDS_REX), ("r13", reg::REG64 | 13 | reg::NEEDS_REX),
    ("r14", reg::REG64 | 14 | reg::NEEDS_REX), ("r15", reg::REG64 | 15 | reg::NEEDS_REX),
];

static SEG_REGS: &[(&str, u32)] = &[
    ("es", reg::SEGREG),
    ("cs", reg::SEGREG | 1),
    ("ss", reg::SEGREG | 2),
    ("ds", reg::SEGREG | 3),
    ("fs", reg::SEGREG | 4),
    ("gs", reg::SEGREG | 5),
];

static PREFIXES: &[&str] = &["lock", "rep", "repe", "repz", "repne", "repnz"];

/// Which long-nop table alignment fills come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NopFormat {
    Basic,
    Intel,
    Amd,
}

pub struct X86Arch {
    machine: String,
    mode_bits: u32,
    nop: NopFormat,
    force_strict: bool,
}

impl X86Arch {
    pub fn new() -> Self {
        Self {
            machine: "x86".to_string(),
            mode_bits: 32,
            nop: NopFormat::Basic,
            force_strict: false,
        }
    }

    pub fn force_strict(&self) -> bool {
        self.force_strict
    }
}

impl Default for X86Arch {
    fn default() -> Self {
        Self::new()
    }
}

fn dir_bits(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    let nv = info.namevals.first().ok_or_else(|| {
        AsmError::new(AsmErrorKind::Syntax, "BITS directive requires an argument")
    })?;
    let bits = nv
        .as_expr()
        .and_then(|e| e.get_intnum())
        .map(|v| v.get_uint().0)
        .ok_or_else(|| {
            AsmError::new(AsmErrorKind::Value, "BITS argument must be a constant")
        })?;
    if !info.arch.set_var("mode_bits", bits) {
        return Err(AsmError::new(
            AsmErrorKind::Value,
            format!("invalid BITS setting {bits} for machine {}", info.arch.machine()),
        ));
    }
    Ok(())
}

fn dir_cpu(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    for nv in &info.namevals {
        let Some(id) = nv.as_id() else { continue };
        match id.to_ascii_lowercase().as_str() {
            "basicnop" => {
                info.arch.set_var("nop", 0);
            }
            "intelnop" => {
                info.arch.set_var("nop", 1);
            }
            "amdnop" => {
                info.arch.set_var("nop", 2);
            }
            // Feature-level names select instruction subsets in a fuller
            // implementation; every subset here is always available.
            _ => {}
        }
    }
    Ok(())
}

fn dir_code16(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    info.arch.set_var("mode_bits", 16);
    Ok(())
}

fn dir_code32(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    info.arch.set_var("mode_bits", 32);
    Ok(())
}

fn dir_code64(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    if !info.arch.set_var("mode_bits", 64) {
        return Err(AsmError::new(
            AsmErrorKind::Value,
            "64-bit mode requires the amd64 machine",
        ));
    }
    Ok(())
}

impl Arch for X86Arch {
    fn keyword(&self) -> &'static str {
        "x86"
    }

    fn machine(&self) -> &str {
        &self.machine
    }

    fn set_machine(&mut self, machine: &str) -> bool {
        let folded = machine.to_ascii_lowercase();
        match folded.as_str() {
            "x86" | "amd64" => {
                self.machine = folded;
                true
            }
            _ => false,
        }
    }

    fn mode_bits(&self) -> u32 {
        self.mode_bits
    }

    fn set_var(&mut self, var: &str, val: u64) -> bool {
        match var {
            "mode_bits" => match val {
                16 | 32 => {
                    self.mode_bits = val as u32;
                    true
                }
                64 if self.machine == "amd64" => {
                    self.mode_bits = 64;
                    true
                }
                _ => false,
            },
            "nop" => {
                self.nop = match val {
                    1 => NopFormat::Intel,
                    2 => NopFormat::Amd,
                    _ => NopFormat::Basic,
                };
                true
            }
            "force_strict" => {
                self.force_strict = val != 0;
                true
            }
            _ => false,
        }
    }

    fn add_directives(&self, dirs: &mut Directives, parser: &str) {
        if parser.eq_ignore_ascii_case("nasm") {
            dirs.add("cpu", DirHandler::Func(dir_cpu), DirFlags::ArgRequired);
            dirs.add("bits", DirHandler::Func(dir_bits), DirFlags::ArgRequired);
        } else if parser.eq_ignore_ascii_case("gas") || parser.eq_ignore_ascii_case("gnu") {
            dirs.add(".code16", DirHandler::Func(dir_code16), DirFlags::Any);
            dirs.add(".code32", DirHandler::Func(dir_code32), DirFlags::Any);
            dirs.add(".code64", DirHandler::Func(dir_code64), DirFlags::Any);
        }
    }

    fn lookup_reg(&self, name: &str) -> Option<u32> {
        let folded = name.to_ascii_lowercase();
        GP_REGS
            .iter()
            .find(|(n, _)| *n == folded)
            .map(|(_, code)| *code)
    }

    fn lookup_seg_reg(&self, name: &str) -> Option<u32> {
        let folded = name.to_ascii_lowercase();
        SEG_REGS
            .iter()
            .find(|(n, _)| *n == folded)
            .map(|(_, code)| *code)
    }

    fn is_prefix(&self, name: &str) -> bool {
        let folded = name.to_ascii_lowercase();
        PREFIXES.contains(&folded.as_str())
    }

    fn is_mnemonic(&self, name: &str) -> bool {
        encode::is_mnemonic(&name.to_ascii_lowercase())
    }

    fn reg_size(&self, code: u32) -> u32 {
        reg::size_bits(code)
    }

    fn finalize_insn(&self, insn: &Insn) -> Result<LoweredInsn, AsmError> {
        encode::encode(insn, self.force_strict)
    }

    fn get_fill(&self) -> &'static [&'static [u8]; 16] {
        fills::fill_table(self.mode_bits, self.nop)
    }

    fn intnum_tobytes(&self, value: &IntNum, bits: u32) -> Vec<u8> {
        value.to_bytes(bits, false)
    }

    fn float_tobytes(&self, value: f64, bits: u32) -> Result<Vec<u8>, AsmError> {
        match bits {
            32 => Ok((value as f32).to_bits().to_le_bytes().to_vec()),
            64 => Ok(value.to_bits().to_le_bytes().to_vec()),
            _ => Err(AsmError::new(
                AsmErrorKind::Value,
                format!("unsupported floating-point constant size {bits}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_is_case_insensitive() {
        let arch = X86Arch::new();
        assert_eq!(arch.lookup_reg("EAX"), Some(reg::REG32));
        assert_eq!(arch.lookup_reg("bl"), Some(reg::REG8 | 3));
        assert_eq!(arch.lookup_reg("xyz"), None);
        assert_eq!(arch.lookup_seg_reg("fs"), Some(reg::SEGREG | 4));
    }

    #[test]
    fn mode_64_requires_amd64() {
        let mut arch = X86Arch::new();
        assert!(!arch.set_var("mode_bits", 64));
        assert!(arch.set_machine("amd64"));
        assert!(arch.set_var("mode_bits", 64));
        assert_eq!(arch.mode_bits(), 64);
    }

    #[test]
    fn sixty_four_bit_fill_defaults_to_intel() {
        let mut arch = X86Arch::new();
        arch.set_machine("amd64");
        arch.set_var("mode_bits", 64);
        let fill = arch.get_fill();
        assert_eq!(fill[7], &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00][..]);
    }
}
