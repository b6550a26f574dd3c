// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! x86/AMD64 instruction encoding.
//!
//! Table-driven over mnemonic groups: single-byte specials, string ops, the
//! ALU group (/digit family), shifts, unary group-3 ops, moves, pushes and
//! pops, and control transfer. Branches with short and near forms come back
//! as relaxable jumps for the optimiser; everything else is fixed bytes
//! plus relocatable immediate/displacement fixups.

use super::reg;
use crate::arch::{EffAddr, Fixup, ImmOperand, Insn, JumpHint, LoweredInsn, Operand};
use crate::core::diag::{AsmError, AsmErrorKind};
use crate::core::expr::{Expr, NullSimplifyCtx};
use crate::core::intnum::IntNum;
use crate::core::value::Value;

/// Zero-operand encodings; the third column is a required operand size
/// (0 = size-neutral).
#[rustfmt::skip]
static SIMPLE: &[(&str, &[u8], u32)] = &[
    ("nop", &[0x90], 0), ("ret", &[0xc3], 0), ("retn", &[0xc3], 0),
    ("leave", &[0xc9], 0), ("hlt", &[0xf4], 0), ("int3", &[0xcc], 0),
    ("syscall", &[0x0f, 0x05], 0), ("sysret", &[0x0f, 0x07], 0),
    ("cpuid", &[0x0f, 0xa2], 0), ("rdtsc", &[0x0f, 0x31], 0),
    ("clc", &[0xf8], 0), ("stc", &[0xf9], 0), ("cmc", &[0xf5], 0),
    ("cld", &[0xfc], 0), ("std", &[0xfd], 0), ("cli", &[0xfa], 0), ("sti", &[0xfb], 0),
    ("sahf", &[0x9e], 0), ("lahf", &[0x9f], 0), ("pause", &[0xf3, 0x90], 0),
    ("xlatb", &[0xd7], 0), ("ud2", &[0x0f, 0x0b], 0), ("iret", &[0xcf], 0),
    ("pushf", &[0x9c], 0), ("popf", &[0x9d], 0),
    ("cbw", &[0x98], 16), ("cwde", &[0x98], 32), ("cdqe", &[0x98], 64),
    ("cwd", &[0x99], 16), ("cdq", &[0x99], 32), ("cqo", &[0x99], 64),
    ("movsb", &[0xa4], 0), ("movsw", &[0xa5], 16), ("movsd", &[0xa5], 32), ("movsq", &[0xa5], 64),
    ("lodsb", &[0xac], 0), ("lodsw", &[0xad], 16), ("lodsd", &[0xad], 32), ("lodsq", &[0xad], 64),
    ("stosb", &[0xaa], 0), ("stosw", &[0xab], 16), ("stosd", &[0xab], 32), ("stosq", &[0xab], 64),
    ("scasb", &[0xae], 0), ("scasw", &[0xaf], 16), ("scasd", &[0xaf], 32), ("scasq", &[0xaf], 64),
    ("cmpsb", &[0xa6], 0), ("cmpsw", &[0xa7], 16), ("cmpsd", &[0xa7], 32), ("cmpsq", &[0xa7], 64),
];

/// Two-operand ALU family: opcode base = digit*8, immediate group 80/81/83.
static ALU_OPS: &[(&str, u8)] = &[
    ("add", 0),
    ("or", 1),
    ("adc", 2),
    ("sbb", 3),
    ("and", 4),
    ("sub", 5),
    ("xor", 6),
    ("cmp", 7),
];

/// Shift/rotate group: C0/C1/D0-D3 with /digit.
static SHIFT_OPS: &[(&str, u8)] = &[
    ("rol", 0),
    ("ror", 1),
    ("rcl", 2),
    ("rcr", 3),
    ("shl", 4),
    ("sal", 4),
    ("shr", 5),
    ("sar", 7),
];

/// Group-3 unary ops: F6/F7 with /digit.
static GROUP3_OPS: &[(&str, u8)] = &[
    ("not", 2),
    ("neg", 3),
    ("mul", 4),
    ("imul1", 5),
    ("div", 6),
    ("idiv", 7),
];

/// Condition codes for Jcc / SETcc.
static CCODES: &[(&str, u8)] = &[
    ("o", 0),
    ("no", 1),
    ("b", 2),
    ("c", 2),
    ("nae", 2),
    ("ae", 3),
    ("nb", 3),
    ("nc", 3),
    ("e", 4),
    ("z", 4),
    ("ne", 5),
    ("nz", 5),
    ("be", 6),
    ("na", 6),
    ("a", 7),
    ("nbe", 7),
    ("s", 8),
    ("ns", 9),
    ("p", 10),
    ("pe", 10),
    ("np", 11),
    ("po", 11),
    ("l", 12),
    ("nge", 12),
    ("ge", 13),
    ("nl", 13),
    ("le", 14),
    ("ng", 14),
    ("g", 15),
    ("nle", 15),
];

/// Short-only branches (no near form).
static SHORT_ONLY: &[(&str, u8)] = &[
    ("loopne", 0xe0),
    ("loopnz", 0xe0),
    ("loope", 0xe1),
    ("loopz", 0xe1),
    ("loop", 0xe2),
    ("jcxz", 0xe3),
    ("jecxz", 0xe3),
    ("jrcxz", 0xe3),
];

fn cc_of(mnemonic: &str, prefix: &str) -> Option<u8> {
    let rest = mnemonic.strip_prefix(prefix)?;
    CCODES.iter().find(|(n, _)| *n == rest).map(|(_, c)| *c)
}

pub fn is_mnemonic(name: &str) -> bool {
    if SIMPLE.iter().any(|(n, _, _)| *n == name)
        || ALU_OPS.iter().any(|(n, _)| *n == name)
        || SHIFT_OPS.iter().any(|(n, _)| *n == name)
        || SHORT_ONLY.iter().any(|(n, _)| *n == name)
    {
        return true;
    }
    if matches!(
        name,
        "mov" | "lea" | "test" | "xchg" | "push" | "pop" | "inc" | "dec" | "not" | "neg"
            | "mul" | "imul" | "div" | "idiv" | "int" | "call" | "jmp" | "movzx" | "movsx"
            | "movsxd"
    ) {
        return true;
    }
    cc_of(name, "j").is_some() || cc_of(name, "set").is_some()
}

struct Enc<'a> {
    insn: &'a Insn,
    mode: u32,
    /// Legacy prefix bytes (lock/rep, segment overrides).
    prefix: Vec<u8>,
    osize_prefix: bool,
    rex: u8,
    rex_needed: bool,
    rex_forbidden: bool,
    opcode: Vec<u8>,
    modrm: Option<u8>,
    sib: Option<u8>,
    disp: Vec<DispImm>,
    imm: Vec<DispImm>,
}

enum DispImm {
    Const(IntNum, u32),
    Value(Value),
}

fn type_error(insn: &Insn) -> AsmError {
    AsmError::with_param(
        AsmErrorKind::Type,
        "invalid combination of opcode and operands",
        &insn.mnemonic,
    )
}

impl<'a> Enc<'a> {
    fn new(insn: &'a Insn) -> Result<Self, AsmError> {
        let mut prefix = Vec::new();
        for p in &insn.prefixes {
            prefix.push(match p.to_ascii_lowercase().as_str() {
                "lock" => 0xf0,
                "rep" | "repe" | "repz" => 0xf3,
                "repne" | "repnz" => 0xf2,
                other => {
                    return Err(AsmError::with_param(
                        AsmErrorKind::Type,
                        "unrecognized instruction prefix",
                        other,
                    ))
                }
            });
        }
        for seg in &insn.seg_prefixes {
            prefix.push(seg_override(*seg)?);
        }
        Ok(Self {
            insn,
            mode: insn.mode_bits,
            prefix,
            osize_prefix: false,
            rex: 0,
            rex_needed: false,
            rex_forbidden: false,
            opcode: Vec::new(),
            modrm: None,
            sib: None,
            disp: Vec::new(),
            imm: Vec::new(),
        })
    }

    /// Apply an operand size, emitting the 66 prefix / REX.W as needed.
    fn set_osize(&mut self, osize: u32) -> Result<(), AsmError> {
        match osize {
            8 => {}
            16 => {
                if self.mode != 16 {
                    self.osize_prefix = true;
                }
            }
            32 => {
                if self.mode == 16 {
                    self.osize_prefix = true;
                }
            }
            64 => {
                if self.mode != 64 {
                    return Err(AsmError::new(
                        AsmErrorKind::Type,
                        "64-bit operand size is only valid in 64-bit mode",
                    ));
                }
                self.rex |= 0x08;
                self.rex_needed = true;
            }
            _ => {
                return Err(AsmError::new(
                    AsmErrorKind::Internal,
                    "unrecognized operand size",
                ))
            }
        }
        Ok(())
    }

    fn check_reg(&mut self, code: u32) -> Result<(), AsmError> {
        if code & reg::NEEDS_REX != 0 || reg::num(code) >= 8 || reg::class(code) == reg::REG64 {
            if self.mode != 64 {
                return Err(AsmError::new(
                    AsmErrorKind::Type,
                    "register is only available in 64-bit mode",
                ));
            }
        }
        if code & reg::NEEDS_REX != 0 {
            self.rex_needed = true;
        }
        if code & reg::NO_REX != 0 {
            self.rex_forbidden = true;
        }
        Ok(())
    }

    /// Place a register in the ModRM reg field.
    fn reg_field(&mut self, code: u32) -> Result<u8, AsmError> {
        self.check_reg(code)?;
        let num = reg::num(code);
        if num >= 8 {
            self.rex |= 0x04; // REX.R
            self.rex_needed = true;
        }
        Ok(num & 7)
    }

    /// Encode the rm side of ModRM from a register or memory operand.
    fn rm_operand(&mut self, regval: u8, rm: &Operand) -> Result<(), AsmError> {
        match rm {
            Operand::Reg(code) => {
                self.check_reg(*code)?;
                let num = reg::num(*code);
                if num >= 8 {
                    self.rex |= 0x01; // REX.B
                    self.rex_needed = true;
                }
                self.modrm = Some(0xc0 | (regval << 3) | (num & 7));
                Ok(())
            }
            Operand::Mem(ea) => self.mem_operand(regval, ea),
            _ => Err(type_error(self.insn)),
        }
    }

    fn mem_operand(&mut self, regval: u8, ea: &EffAddr) -> Result<(), AsmError> {
        if let Some(seg) = ea.seg {
            let ov = seg_override(seg)?;
            if !self.prefix.contains(&ov) {
                self.prefix.push(ov);
            }
        }
        if self.mode == 16 {
            return self.mem_operand_16(regval, ea);
        }

        let addr_class = if self.mode == 64 { reg::REG64 } else { reg::REG32 };
        for code in [ea.base, ea.index].into_iter().flatten() {
            if reg::class(code) != addr_class {
                return Err(AsmError::new(
                    AsmErrorKind::Type,
                    "effective address register does not match address size",
                ));
            }
            self.check_reg(code)?;
        }

        let disp = self.fold_disp(ea)?;

        match (ea.base, ea.index) {
            (None, None) => {
                // Absolute disp32. 64-bit mode needs a SIB so the encoding
                // does not read as RIP-relative.
                if self.mode == 64 {
                    self.modrm = Some((regval << 3) | 0x04);
                    self.sib = Some(0x25);
                } else {
                    self.modrm = Some((regval << 3) | 0x05);
                }
                self.push_disp(disp, 32, true)?;
                Ok(())
            }
            (Some(base), index) => {
                let bnum = reg::num(base);
                if bnum >= 8 {
                    self.rex |= 0x01;
                    self.rex_needed = true;
                }
                let need_sib = index.is_some() || (bnum & 7) == 4;
                let (modbits, dispsize) = self.disp_mode(&disp, bnum);
                if need_sib {
                    let (inum, scale_bits) = match index {
                        Some(idx) => {
                            let num = reg::num(idx);
                            if (num & 7) == 4 && num < 8 {
                                return Err(AsmError::new(
                                    AsmErrorKind::Type,
                                    "cannot use the stack pointer as an index register",
                                ));
                            }
                            if num >= 8 {
                                self.rex |= 0x02; // REX.X
                                self.rex_needed = true;
                            }
                            (num & 7, scale_to_bits(ea.scale)?)
                        }
                        None => (4, 0),
                    };
                    self.modrm = Some((modbits << 6) | (regval << 3) | 0x04);
                    self.sib = Some((scale_bits << 6) | (inum << 3) | (bnum & 7));
                } else {
                    self.modrm = Some((modbits << 6) | (regval << 3) | (bnum & 7));
                }
                match dispsize {
                    0 => {}
                    8 => self.push_disp(disp, 8, false)?,
                    _ => self.push_disp(disp, 32, true)?,
                }
                Ok(())
            }
            (None, Some(idx)) => {
                // Scaled index with no base: SIB with base=101 and disp32.
                let num = reg::num(idx);
                if (num & 7) == 4 && num < 8 {
                    return Err(AsmError::new(
                        AsmErrorKind::Type,
                        "cannot use the stack pointer as an index register",
                    ));
                }
                if num >= 8 {
                    self.rex |= 0x02;
                    self.rex_needed = true;
                }
                let scale_bits = scale_to_bits(ea.scale)?;
                self.modrm = Some((regval << 3) | 0x04);
                self.sib = Some((scale_bits << 6) | ((num & 7) << 3) | 0x05);
                self.push_disp(disp, 32, true)?;
                Ok(())
            }
        }
    }

    fn mem_operand_16(&mut self, regval: u8, ea: &EffAddr) -> Result<(), AsmError> {
        let name = |code: Option<u32>| code.map(|c| (reg::class(c), reg::num(c)));
        let pair = (name(ea.base), name(ea.index));
        let rm = match pair {
            (Some((reg::REG16, 3)), Some((reg::REG16, 6))) => 0, // [bx+si]
            (Some((reg::REG16, 3)), Some((reg::REG16, 7))) => 1, // [bx+di]
            (Some((reg::REG16, 5)), Some((reg::REG16, 6))) => 2, // [bp+si]
            (Some((reg::REG16, 5)), Some((reg::REG16, 7))) => 3, // [bp+di]
            (Some((reg::REG16, 6)), None) => 4,                  // [si]
            (Some((reg::REG16, 7)), None) => 5,                  // [di]
            (Some((reg::REG16, 5)), None) => 6,                  // [bp+disp]
            (Some((reg::REG16, 3)), None) => 7,                  // [bx]
            (None, None) => {
                self.modrm = Some((regval << 3) | 0x06);
                let disp = self.fold_disp(ea)?;
                self.push_disp(disp, 16, true)?;
                return Ok(());
            }
            _ => {
                return Err(AsmError::new(
                    AsmErrorKind::Type,
                    "invalid 16-bit effective address",
                ))
            }
        };
        let disp = self.fold_disp(ea)?;
        let (modbits, dispsize) = match &disp {
            None if rm != 6 => (0u8, 0u32),
            None => (1, 8), // [bp] needs an explicit zero disp8
            Some(DispImm::Const(v, _)) if v.fits_signed(8) => (1, 8),
            Some(_) => (2, 16),
        };
        self.modrm = Some((modbits << 6) | (regval << 3) | rm);
        if let Some(disp) = disp {
            match dispsize {
                8 => self.push_disp(Some(disp), 8, false)?,
                _ => self.push_disp(Some(disp), 16, true)?,
            }
        } else if dispsize == 8 {
            self.disp.push(DispImm::Const(IntNum::zero(), 8));
        }
        Ok(())
    }

    /// Fold a displacement expression; symbolic displacements come back as
    /// values for the fixup machinery.
    fn fold_disp(&self, ea: &EffAddr) -> Result<Option<DispImm>, AsmError> {
        let Some(expr) = &ea.disp else {
            return Ok(None);
        };
        let mut e = expr.clone();
        e.simplify(&NullSimplifyCtx, false)?;
        if let Some(v) = e.get_intnum() {
            if v.is_zero() {
                return Ok(None);
            }
            return Ok(Some(DispImm::Const(v.clone(), 0)));
        }
        let bits = if self.mode == 16 { 16 } else { 32 };
        Ok(Some(DispImm::Value(Value::from_expr(e, bits))))
    }

    fn disp_mode(&self, disp: &Option<DispImm>, base_num: u8) -> (u8, u32) {
        match disp {
            // [bp]/[r13] with mod 00 means disp32-only, so force disp8.
            None if (base_num & 7) == 5 => (1, 8),
            None => (0, 0),
            Some(DispImm::Const(v, _)) if v.fits_signed(8) => (1, 8),
            Some(_) => (2, 32),
        }
    }

    fn push_disp(
        &mut self,
        disp: Option<DispImm>,
        bits: u32,
        _wide: bool,
    ) -> Result<(), AsmError> {
        match disp {
            None => self.disp.push(DispImm::Const(IntNum::zero(), bits)),
            Some(DispImm::Const(v, _)) => self.disp.push(DispImm::Const(v, bits)),
            Some(DispImm::Value(mut v)) => {
                v.size = bits;
                self.disp.push(DispImm::Value(v));
            }
        }
        Ok(())
    }

    fn push_imm(&mut self, imm: &ImmOperand, bits: u32, signed: bool) -> Result<(), AsmError> {
        let mut e = imm.expr.clone();
        e.simplify(&NullSimplifyCtx, false)?;
        if let Some(v) = e.get_intnum() {
            self.imm.push(DispImm::Const(v.clone(), bits));
        } else {
            let mut v = Value::from_expr(e, bits);
            v.signed = signed;
            self.imm.push(DispImm::Value(v));
        }
        Ok(())
    }

    /// Assemble prefix bytes, REX, opcode, ModRM/SIB, disp, imm.
    fn finish(mut self) -> Result<LoweredInsn, AsmError> {
        if self.rex_needed && self.rex_forbidden {
            return Err(AsmError::new(
                AsmErrorKind::Type,
                "high byte register cannot be combined with an extended register",
            ));
        }
        let mut bytes = Vec::with_capacity(16);
        let mut fixups: Vec<Fixup> = Vec::new();
        bytes.extend_from_slice(&self.prefix);
        if self.osize_prefix {
            bytes.push(0x66);
        }
        if self.rex != 0 || self.rex_needed {
            if self.mode != 64 {
                return Err(AsmError::new(
                    AsmErrorKind::Type,
                    "instruction requires 64-bit mode",
                ));
            }
            bytes.push(0x40 | self.rex);
        }
        bytes.extend_from_slice(&self.opcode);
        if let Some(modrm) = self.modrm {
            bytes.push(modrm);
        }
        if let Some(sib) = self.sib {
            bytes.push(sib);
        }
        for piece in self.disp.drain(..).chain(self.imm.drain(..)) {
            match piece {
                DispImm::Const(v, bits) => {
                    bytes.extend(v.to_bytes(bits, false));
                }
                DispImm::Value(v) => {
                    let offset = bytes.len();
                    bytes.extend(std::iter::repeat(0).take(v.size as usize / 8));
                    fixups.push(Fixup { offset, value: v });
                }
            }
        }
        Ok(LoweredInsn::Fixed { bytes, fixups })
    }
}

fn seg_override(code: u32) -> Result<u8, AsmError> {
    match reg::num(code) {
        0 => Ok(0x26), // es
        1 => Ok(0x2e), // cs
        2 => Ok(0x36), // ss
        3 => Ok(0x3e), // ds
        4 => Ok(0x64), // fs
        5 => Ok(0x65), // gs
        _ => Err(AsmError::new(
            AsmErrorKind::Internal,
            "unrecognized segment register",
        )),
    }
}

fn scale_to_bits(scale: u8) -> Result<u8, AsmError> {
    match scale {
        0 | 1 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        _ => Err(AsmError::new(
            AsmErrorKind::Value,
            "index scale must be 1, 2, 4, or 8",
        )),
    }
}

fn operand_size(op: &Operand) -> u32 {
    match op {
        Operand::Reg(code) => reg::size_bits(*code),
        Operand::SegReg(_) => 16,
        Operand::Imm(imm) => imm.size,
        Operand::Mem(ea) => ea.size,
    }
}

/// Determine a common operand size; register sizes win, explicit memory and
/// immediate sizes fill in, the mode default applies last.
fn common_osize(insn: &Insn) -> Result<u32, AsmError> {
    let mut size = 0;
    for op in &insn.operands {
        let s = operand_size(op);
        if s == 0 {
            continue;
        }
        // Immediates may be narrower than the instruction size.
        if matches!(op, Operand::Imm(_)) {
            continue;
        }
        if size == 0 {
            size = s;
        } else if size != s {
            return Err(AsmError::new(
                AsmErrorKind::Type,
                "mismatch in operand sizes",
            ));
        }
    }
    if size == 0 {
        for op in &insn.operands {
            if let Operand::Imm(imm) = op {
                if imm.size != 0 {
                    size = size.max(imm.size);
                }
            }
        }
    }
    if size == 0 {
        size = if insn.mode_bits == 16 { 16 } else { 32 };
    }
    Ok(size)
}

fn imm_const(imm: &ImmOperand) -> Option<IntNum> {
    let mut e = imm.expr.clone();
    e.simplify(&NullSimplifyCtx, false).ok()?;
    e.get_intnum().cloned()
}

/// True when the shorter sign-extended imm8 form may be used.
fn imm8_ok(imm: &ImmOperand, force_strict: bool) -> bool {
    if imm.size == 8 {
        return true;
    }
    if imm.size != 0 && (imm.strict || force_strict) {
        return false;
    }
    match imm_const(imm) {
        Some(v) => v.fits_signed(8),
        None => false,
    }
}

pub fn encode(insn: &Insn, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    let mnemonic = insn.mnemonic.to_ascii_lowercase();
    let ops = &insn.operands;

    // Zero-operand table.
    if let Some((_, opcode, osize)) = SIMPLE
        .iter()
        .find(|(n, _, _)| *n == mnemonic && ops.is_empty())
    {
        let mut enc = Enc::new(insn)?;
        if *osize != 0 {
            enc.set_osize(*osize)?;
        }
        enc.opcode.extend_from_slice(opcode);
        return enc.finish();
    }

    // ret imm16
    if (mnemonic == "ret" || mnemonic == "retn") && ops.len() == 1 {
        if let [Operand::Imm(imm)] = &ops[..] {
            let mut enc = Enc::new(insn)?;
            enc.opcode.push(0xc2);
            enc.push_imm(imm, 16, false)?;
            return enc.finish();
        }
    }

    if mnemonic == "int" {
        if let [Operand::Imm(imm)] = &ops[..] {
            let mut enc = Enc::new(insn)?;
            enc.opcode.push(0xcd);
            enc.push_imm(imm, 8, false)?;
            return enc.finish();
        }
        return Err(type_error(insn));
    }

    // Branches.
    if mnemonic == "jmp" || cc_of(&mnemonic, "j").is_some() {
        if let [Operand::Imm(imm)] = &ops[..] {
            let near_size = if insn.mode_bits == 16 { 16 } else { 32 };
            let (short_op, near_op): (Vec<u8>, Vec<u8>) = if mnemonic == "jmp" {
                (vec![0xeb], vec![0xe9])
            } else {
                let cc = cc_of(&mnemonic, "j").expect("jcc condition");
                (vec![0x70 + cc], vec![0x0f, 0x80 + cc])
            };
            return Ok(LoweredInsn::Jump {
                target: imm.expr.clone(),
                hint: imm.hint,
                short_op,
                near_op,
                near_size,
            });
        }
        if mnemonic == "jmp" {
            if let [rm @ (Operand::Reg(_) | Operand::Mem(_))] = &ops[..] {
                let mut enc = Enc::new(insn)?;
                enc.opcode.push(0xff);
                enc.rm_operand(4, rm)?;
                return enc.finish();
            }
        }
        return Err(type_error(insn));
    }

    if let Some((_, opcode)) = SHORT_ONLY.iter().find(|(n, _)| *n == mnemonic) {
        if let [Operand::Imm(imm)] = &ops[..] {
            if imm.hint == JumpHint::Near {
                return Err(AsmError::with_param(
                    AsmErrorKind::Type,
                    "instruction has no near form",
                    &mnemonic,
                ));
            }
            return Ok(LoweredInsn::Jump {
                target: imm.expr.clone(),
                hint: JumpHint::Short,
                short_op: vec![*opcode],
                near_op: Vec::new(),
                near_size: if insn.mode_bits == 16 { 16 } else { 32 },
            });
        }
        return Err(type_error(insn));
    }

    if mnemonic == "call" {
        match &ops[..] {
            [Operand::Imm(imm)] => {
                let bits = if insn.mode_bits == 16 { 16 } else { 32 };
                let mut enc = Enc::new(insn)?;
                enc.opcode.push(0xe8);
                let mut v = Value::from_expr(imm.expr.clone(), bits);
                v.signed = true;
                v.ip_rel = true;
                v.jump_target = true;
                v.next_insn = 0;
                enc.imm.push(DispImm::Value(v));
                return enc.finish();
            }
            [rm @ (Operand::Reg(_) | Operand::Mem(_))] => {
                let mut enc = Enc::new(insn)?;
                enc.opcode.push(0xff);
                enc.rm_operand(2, rm)?;
                return enc.finish();
            }
            _ => return Err(type_error(insn)),
        }
    }

    // setcc r/m8
    if let Some(cc) = cc_of(&mnemonic, "set") {
        if let [rm @ (Operand::Reg(_) | Operand::Mem(_))] = &ops[..] {
            if let Operand::Reg(code) = rm {
                if reg::size_bits(*code) != 8 {
                    return Err(type_error(insn));
                }
            }
            let mut enc = Enc::new(insn)?;
            enc.opcode.extend_from_slice(&[0x0f, 0x90 + cc]);
            enc.rm_operand(0, rm)?;
            return enc.finish();
        }
        return Err(type_error(insn));
    }

    if let Some((_, digit)) = ALU_OPS.iter().find(|(n, _)| *n == mnemonic) {
        return encode_alu(insn, *digit, force_strict);
    }

    if let Some((_, digit)) = SHIFT_OPS.iter().find(|(n, _)| *n == mnemonic) {
        return encode_shift(insn, *digit, force_strict);
    }

    match mnemonic.as_str() {
        "mov" => encode_mov(insn, force_strict),
        "lea" => {
            if let [Operand::Reg(code), mem @ Operand::Mem(_)] = &ops[..] {
                let osize = reg::size_bits(*code);
                if osize == 8 {
                    return Err(type_error(insn));
                }
                let mut enc = Enc::new(insn)?;
                enc.set_osize(osize)?;
                let r = enc.reg_field(*code)?;
                enc.opcode.push(0x8d);
                enc.rm_operand(r, mem)?;
                enc.finish()
            } else {
                Err(type_error(insn))
            }
        }
        "test" => encode_test(insn, force_strict),
        "xchg" => {
            if let [a, b] = &ops[..] {
                let (regop, rm) = match (a, b) {
                    (Operand::Reg(c), rm) => (c, rm),
                    (rm, Operand::Reg(c)) => (c, rm),
                    _ => return Err(type_error(insn)),
                };
                let osize = common_osize(insn)?;
                let mut enc = Enc::new(insn)?;
                enc.set_osize(osize)?;
                let r = enc.reg_field(*regop)?;
                enc.opcode.push(if osize == 8 { 0x86 } else { 0x87 });
                enc.rm_operand(r, rm)?;
                enc.finish()
            } else {
                Err(type_error(insn))
            }
        }
        "inc" | "dec" => {
            let digit = if mnemonic == "inc" { 0 } else { 1 };
            if let [rm @ (Operand::Reg(_) | Operand::Mem(_))] = &ops[..] {
                let osize = common_osize(insn)?;
                // 40+r / 48+r short forms exist outside 64-bit mode.
                if insn.mode_bits != 64 {
                    if let Operand::Reg(code) = rm {
                        if matches!(reg::size_bits(*code), 16 | 32) {
                            let mut enc = Enc::new(insn)?;
                            enc.set_osize(osize)?;
                            let base = if digit == 0 { 0x40 } else { 0x48 };
                            enc.opcode.push(base + reg::num(*code));
                            return enc.finish();
                        }
                    }
                }
                let mut enc = Enc::new(insn)?;
                enc.set_osize(osize)?;
                enc.opcode.push(if osize == 8 { 0xfe } else { 0xff });
                enc.rm_operand(digit, rm)?;
                enc.finish()
            } else {
                Err(type_error(insn))
            }
        }
        "not" | "neg" | "mul" | "div" | "idiv" => {
            let key = mnemonic.as_str();
            let digit = GROUP3_OPS
                .iter()
                .find(|(n, _)| *n == key)
                .map(|(_, d)| *d)
                .expect("group-3 op");
            encode_group3(insn, digit, force_strict)
        }
        "imul" => encode_imul(insn, force_strict),
        "push" => encode_push(insn, force_strict),
        "pop" => encode_pop(insn, force_strict),
        "movzx" | "movsx" => encode_movx(insn, &mnemonic, force_strict),
        "movsxd" => {
            if let [Operand::Reg(dst), rm @ (Operand::Reg(_) | Operand::Mem(_))] = &ops[..] {
                if reg::size_bits(*dst) != 64 {
                    return Err(type_error(insn));
                }
                let mut enc = Enc::new(insn)?;
                enc.set_osize(64)?;
                let r = enc.reg_field(*dst)?;
                enc.opcode.push(0x63);
                enc.rm_operand(r, rm)?;
                enc.finish()
            } else {
                Err(type_error(insn))
            }
        }
        _ => Err(AsmError::with_param(
            AsmErrorKind::Type,
            "unrecognized instruction",
            &insn.mnemonic,
        )),
    }
}

fn encode_alu(insn: &Insn, digit: u8, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    let base = digit * 8;
    match &insn.operands[..] {
        [rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Imm(imm)] => {
            let osize = common_osize(insn)?;
            let is_acc = matches!(rm, Operand::Reg(code)
                if reg::num(*code) == 0 && *code & reg::NEEDS_REX == 0);
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            if osize == 8 {
                if is_acc {
                    // al, imm8 short form.
                    enc.opcode.push(base + 4);
                } else {
                    enc.opcode.push(0x80);
                    enc.rm_operand(digit, rm)?;
                }
                enc.push_imm(imm, 8, false)?;
            } else if imm8_ok(imm, force_strict) {
                enc.opcode.push(0x83);
                enc.rm_operand(digit, rm)?;
                enc.push_imm(imm, 8, true)?;
            } else if is_acc {
                // acc, imm full form is a byte shorter than 81 /digit.
                enc.opcode.push(base + 5);
                enc.push_imm(imm, osize.min(32), true)?;
            } else {
                enc.opcode.push(0x81);
                enc.rm_operand(digit, rm)?;
                enc.push_imm(imm, osize.min(32), true)?;
            }
            enc.finish()
        }
        [rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(src)] => {
            let osize = common_osize(insn)?;
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            let r = enc.reg_field(*src)?;
            enc.opcode.push(base + if osize == 8 { 0 } else { 1 });
            enc.rm_operand(r, rm)?;
            enc.finish()
        }
        [Operand::Reg(dst), rm @ Operand::Mem(_)] => {
            let osize = common_osize(insn)?;
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            let r = enc.reg_field(*dst)?;
            enc.opcode.push(base + if osize == 8 { 2 } else { 3 });
            enc.rm_operand(r, rm)?;
            enc.finish()
        }
        _ => Err(type_error(insn)),
    }
}

fn encode_shift(insn: &Insn, digit: u8, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    match &insn.operands[..] {
        [rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Imm(imm)] => {
            let osize = common_osize(insn)?;
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            if let Some(v) = imm_const(imm) {
                if v == IntNum::one() {
                    enc.opcode.push(if osize == 8 { 0xd0 } else { 0xd1 });
                    enc.rm_operand(digit, rm)?;
                    return enc.finish();
                }
            }
            enc.opcode.push(if osize == 8 { 0xc0 } else { 0xc1 });
            enc.rm_operand(digit, rm)?;
            enc.push_imm(imm, 8, false)?;
            enc.finish()
        }
        [rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(cl)]
            if reg::class(*cl) == reg::REG8 && reg::num(*cl) == 1 =>
        {
            let osize = common_osize(insn)?;
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            enc.opcode.push(if osize == 8 { 0xd2 } else { 0xd3 });
            enc.rm_operand(digit, rm)?;
            enc.finish()
        }
        _ => Err(type_error(insn)),
    }
}

fn encode_group3(insn: &Insn, digit: u8, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    if let [rm @ (Operand::Reg(_) | Operand::Mem(_))] = &insn.operands[..] {
        let osize = common_osize(insn)?;
        let mut enc = Enc::new(insn)?;
        enc.set_osize(osize)?;
        enc.opcode.push(if osize == 8 { 0xf6 } else { 0xf7 });
        enc.rm_operand(digit, rm)?;
        enc.finish()
    } else {
        Err(type_error(insn))
    }
}

fn encode_imul(insn: &Insn, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    match &insn.operands[..] {
        [Operand::Reg(_) | Operand::Mem(_)] => encode_group3(insn, 5, force_strict),
        [Operand::Reg(dst), rm @ (Operand::Reg(_) | Operand::Mem(_))] => {
            let osize = common_osize(insn)?;
            if osize == 8 {
                return Err(type_error(insn));
            }
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            let r = enc.reg_field(*dst)?;
            enc.opcode.extend_from_slice(&[0x0f, 0xaf]);
            enc.rm_operand(r, rm)?;
            enc.finish()
        }
        [Operand::Reg(dst), rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Imm(imm)] => {
            let osize = common_osize(insn)?;
            if osize == 8 {
                return Err(type_error(insn));
            }
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            let r = enc.reg_field(*dst)?;
            if imm8_ok(imm, force_strict) {
                enc.opcode.push(0x6b);
                enc.rm_operand(r, rm)?;
                enc.push_imm(imm, 8, true)?;
            } else {
                enc.opcode.push(0x69);
                enc.rm_operand(r, rm)?;
                enc.push_imm(imm, osize.min(32), true)?;
            }
            enc.finish()
        }
        _ => Err(type_error(insn)),
    }
}

fn encode_test(insn: &Insn, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    match &insn.operands[..] {
        [rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(src)] => {
            let osize = common_osize(insn)?;
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            let r = enc.reg_field(*src)?;
            enc.opcode.push(if osize == 8 { 0x84 } else { 0x85 });
            enc.rm_operand(r, rm)?;
            enc.finish()
        }
        [rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Imm(imm)] => {
            let osize = common_osize(insn)?;
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            if let Operand::Reg(code) = rm {
                if reg::num(*code) == 0 && (*code & reg::NEEDS_REX) == 0 {
                    enc.opcode
                        .push(if osize == 8 { 0xa8 } else { 0xa9 });
                    enc.push_imm(imm, osize.min(32), false)?;
                    return enc.finish();
                }
            }
            enc.opcode.push(if osize == 8 { 0xf6 } else { 0xf7 });
            enc.rm_operand(0, rm)?;
            enc.push_imm(imm, osize.min(32), false)?;
            enc.finish()
        }
        _ => Err(type_error(insn)),
    }
}

fn encode_mov(insn: &Insn, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    match &insn.operands[..] {
        [Operand::Reg(dst), Operand::Imm(imm)] => {
            let osize = reg::size_bits(*dst);
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            if osize == 64 {
                // mov r64, imm: C7 /0 id when the constant sign-extends
                // from 32 bits, B8+r io otherwise.
                let fits32 = imm_const(imm).map(|v| v.fits_signed(32)).unwrap_or(false);
                if fits32 && !(imm.strict && imm.size == 64) {
                    enc.opcode.push(0xc7);
                    enc.rm_operand(0, &Operand::Reg(*dst))?;
                    enc.push_imm(imm, 32, true)?;
                } else {
                    enc.check_reg(*dst)?;
                    if reg::num(*dst) >= 8 {
                        enc.rex |= 0x01;
                        enc.rex_needed = true;
                    }
                    enc.opcode.push(0xb8 + (reg::num(*dst) & 7));
                    enc.push_imm(imm, 64, false)?;
                }
            } else {
                enc.check_reg(*dst)?;
                if reg::num(*dst) >= 8 {
                    enc.rex |= 0x01;
                    enc.rex_needed = true;
                }
                let base = if osize == 8 { 0xb0 } else { 0xb8 };
                enc.opcode.push(base + (reg::num(*dst) & 7));
                enc.push_imm(imm, osize, false)?;
            }
            enc.finish()
        }
        [mem @ Operand::Mem(_), Operand::Imm(imm)] => {
            let osize = common_osize(insn)?;
            if operand_size(&insn.operands[0]) == 0 && imm.size == 0 {
                return Err(AsmError::new(
                    AsmErrorKind::Type,
                    "operation size not specified",
                ));
            }
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            enc.opcode.push(if osize == 8 { 0xc6 } else { 0xc7 });
            enc.rm_operand(0, mem)?;
            enc.push_imm(imm, osize.min(32), osize == 64)?;
            enc.finish()
        }
        [rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(src)] => {
            let osize = common_osize(insn)?;
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            let r = enc.reg_field(*src)?;
            enc.opcode.push(if osize == 8 { 0x88 } else { 0x89 });
            enc.rm_operand(r, rm)?;
            enc.finish()
        }
        [Operand::Reg(dst), rm @ Operand::Mem(_)] => {
            let osize = common_osize(insn)?;
            let mut enc = Enc::new(insn)?;
            enc.set_osize(osize)?;
            let r = enc.reg_field(*dst)?;
            enc.opcode.push(if osize == 8 { 0x8a } else { 0x8b });
            enc.rm_operand(r, rm)?;
            enc.finish()
        }
        _ => Err(type_error(insn)),
    }
}

fn encode_movx(insn: &Insn, mnemonic: &str, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    if let [Operand::Reg(dst), rm @ (Operand::Reg(_) | Operand::Mem(_))] = &insn.operands[..] {
        let dsize = reg::size_bits(*dst);
        if dsize == 8 {
            return Err(type_error(insn));
        }
        let ssize = match rm {
            Operand::Reg(code) => reg::size_bits(*code),
            Operand::Mem(ea) => ea.size,
            _ => 0,
        };
        let opcode2 = match (mnemonic, ssize) {
            ("movzx", 8) => 0xb6,
            ("movzx", 16) => 0xb7,
            ("movsx", 8) => 0xbe,
            ("movsx", 16) => 0xbf,
            (_, 0) => {
                return Err(AsmError::new(
                    AsmErrorKind::Type,
                    "operation size not specified",
                ))
            }
            _ => return Err(type_error(insn)),
        };
        if ssize >= dsize {
            return Err(type_error(insn));
        }
        let mut enc = Enc::new(insn)?;
        enc.set_osize(dsize)?;
        let r = enc.reg_field(*dst)?;
        enc.opcode.extend_from_slice(&[0x0f, opcode2]);
        // The rm side carries its own (smaller) size; bypass the common
        // size check by encoding it directly.
        match rm {
            Operand::Reg(code) => {
                enc.check_reg(*code)?;
                if reg::num(*code) >= 8 {
                    enc.rex |= 0x01;
                    enc.rex_needed = true;
                }
                enc.modrm = Some(0xc0 | (r << 3) | (reg::num(*code) & 7));
            }
            Operand::Mem(ea) => enc.mem_operand(r, ea)?,
            _ => return Err(type_error(insn)),
        }
        enc.finish()
    } else {
        Err(type_error(insn))
    }
}

fn encode_push(insn: &Insn, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    match &insn.operands[..] {
        [Operand::Reg(code)] => {
            let size = reg::size_bits(*code);
            let mut enc = Enc::new(insn)?;
            match (insn.mode_bits, size) {
                (64, 64) | (64, 16) | (16, 16) | (16, 32) | (32, 32) | (32, 16) => {}
                _ => {
                    return Err(AsmError::new(
                        AsmErrorKind::Type,
                        "push of this register size is not encodable in this mode",
                    ))
                }
            }
            if size == 16 && insn.mode_bits != 16 {
                enc.osize_prefix = true;
            }
            if size == 32 && insn.mode_bits == 16 {
                enc.osize_prefix = true;
            }
            enc.check_reg(*code)?;
            if reg::num(*code) >= 8 {
                enc.rex |= 0x01;
                enc.rex_needed = true;
            }
            enc.opcode.push(0x50 + (reg::num(*code) & 7));
            enc.finish()
        }
        [Operand::Imm(imm)] => {
            let mut enc = Enc::new(insn)?;
            if imm8_ok(imm, force_strict) {
                enc.opcode.push(0x6a);
                enc.push_imm(imm, 8, true)?;
            } else {
                let bits = if insn.mode_bits == 16 { 16 } else { 32 };
                enc.opcode.push(0x68);
                enc.push_imm(imm, bits, true)?;
            }
            enc.finish()
        }
        [mem @ Operand::Mem(_)] => {
            let mut enc = Enc::new(insn)?;
            enc.opcode.push(0xff);
            enc.rm_operand(6, mem)?;
            enc.finish()
        }
        _ => Err(type_error(insn)),
    }
}

fn encode_pop(insn: &Insn, force_strict: bool) -> Result<LoweredInsn, AsmError> {
    match &insn.operands[..] {
        [Operand::Reg(code)] => {
            let size = reg::size_bits(*code);
            let mut enc = Enc::new(insn)?;
            match (insn.mode_bits, size) {
                (64, 64) | (64, 16) | (16, 16) | (16, 32) | (32, 32) | (32, 16) => {}
                _ => {
                    return Err(AsmError::new(
                        AsmErrorKind::Type,
                        "pop of this register size is not encodable in this mode",
                    ))
                }
            }
            if size == 16 && insn.mode_bits != 16 {
                enc.osize_prefix = true;
            }
            if size == 32 && insn.mode_bits == 16 {
                enc.osize_prefix = true;
            }
            enc.check_reg(*code)?;
            if reg::num(*code) >= 8 {
                enc.rex |= 0x01;
                enc.rex_needed = true;
            }
            enc.opcode.push(0x58 + (reg::num(*code) & 7));
            enc.finish()
        }
        [mem @ Operand::Mem(_)] => {
            let mut enc = Enc::new(insn)?;
            enc.opcode.push(0x8f);
            enc.rm_operand(0, mem)?;
            enc.finish()
        }
        _ => Err(type_error(insn)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insn(mnemonic: &str, mode: u32, operands: Vec<Operand>) -> Insn {
        let mut i = Insn::new(mnemonic, mode);
        i.operands = operands;
        i
    }

    fn fixed_bytes(l: LoweredInsn) -> Vec<u8> {
        match l {
            LoweredInsn::Fixed { bytes, fixups } => {
                assert!(fixups.is_empty(), "unexpected fixups");
                bytes
            }
            LoweredInsn::Jump { .. } => panic!("expected fixed encoding"),
        }
    }

    fn imm(v: i64) -> Operand {
        Operand::Imm(ImmOperand::new(Expr::int(v)))
    }

    #[test]
    fn nop_is_90() {
        let out = encode(&insn("nop", 32, vec![]), false).unwrap();
        assert_eq!(fixed_bytes(out), vec![0x90]);
    }

    #[test]
    fn mov_reg_imm32() {
        let out = encode(
            &insn("mov", 32, vec![Operand::Reg(reg::REG32), imm(1)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0xb8, 1, 0, 0, 0]);
    }

    #[test]
    fn mov_reg8_imm() {
        let out = encode(
            &insn("mov", 32, vec![Operand::Reg(reg::REG8 | 3), imm(7)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0xb3, 7]);
    }

    #[test]
    fn mov_rax_small_imm_uses_c7() {
        let out = encode(
            &insn("mov", 64, vec![Operand::Reg(reg::REG64), imm(1)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x48, 0xc7, 0xc0, 1, 0, 0, 0]);
    }

    #[test]
    fn mov_rax_large_imm_uses_b8() {
        let out = encode(
            &insn(
                "mov",
                64,
                vec![Operand::Reg(reg::REG64), imm(0x1_0000_0000)],
            ),
            false,
        )
        .unwrap();
        assert_eq!(
            fixed_bytes(out),
            vec![0x48, 0xb8, 0, 0, 0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn add_eax_small_imm_uses_83() {
        let out = encode(
            &insn("add", 32, vec![Operand::Reg(reg::REG32), imm(5)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x83, 0xc0, 5]);
    }

    #[test]
    fn add_eax_big_imm_uses_acc_form() {
        let out = encode(
            &insn("add", 32, vec![Operand::Reg(reg::REG32), imm(0x1234)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x05, 0x34, 0x12, 0, 0]);
    }

    #[test]
    fn strict_imm_disables_shortening() {
        let mut operand = ImmOperand::new(Expr::int(5));
        operand.size = 32;
        operand.strict = true;
        let out = encode(
            &insn(
                "add",
                32,
                vec![Operand::Reg(reg::REG32 | 3), Operand::Imm(operand)],
            ),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x81, 0xc3, 5, 0, 0, 0]);
    }

    #[test]
    fn mov_between_registers() {
        // mov ecx, edx => 89 D1
        let out = encode(
            &insn(
                "mov",
                32,
                vec![Operand::Reg(reg::REG32 | 1), Operand::Reg(reg::REG32 | 2)],
            ),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x89, 0xd1]);
    }

    #[test]
    fn mov_mem_base_disp8() {
        // mov eax, [ebx+8] => 8B 43 08
        let ea = EffAddr {
            disp: Some(Expr::int(8)),
            base: Some(reg::REG32 | 3),
            index: None,
            scale: 1,
            size: 0,
            seg: None,
        };
        let out = encode(
            &insn("mov", 32, vec![Operand::Reg(reg::REG32), Operand::Mem(ea)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x8b, 0x43, 0x08]);
    }

    #[test]
    fn mov_mem_absolute_in_32bit_mode() {
        // mov eax, [0x1234] => 8B 05 34 12 00 00
        let ea = EffAddr::from_disp(Expr::int(0x1234));
        let out = encode(
            &insn("mov", 32, vec![Operand::Reg(reg::REG32), Operand::Mem(ea)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x8b, 0x05, 0x34, 0x12, 0, 0]);
    }

    #[test]
    fn mem_esp_base_needs_sib() {
        // mov eax, [esp] => 8B 04 24
        let ea = EffAddr {
            disp: None,
            base: Some(reg::REG32 | 4),
            index: None,
            scale: 1,
            size: 0,
            seg: None,
        };
        let out = encode(
            &insn("mov", 32, vec![Operand::Reg(reg::REG32), Operand::Mem(ea)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x8b, 0x04, 0x24]);
    }

    #[test]
    fn mem_ebp_base_needs_disp8() {
        // mov eax, [ebp] => 8B 45 00
        let ea = EffAddr {
            disp: None,
            base: Some(reg::REG32 | 5),
            index: None,
            scale: 1,
            size: 0,
            seg: None,
        };
        let out = encode(
            &insn("mov", 32, vec![Operand::Reg(reg::REG32), Operand::Mem(ea)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x8b, 0x45, 0x00]);
    }

    #[test]
    fn sib_scaled_index() {
        // mov eax, [ebx+esi*4] => 8B 04 B3
        let ea = EffAddr {
            disp: None,
            base: Some(reg::REG32 | 3),
            index: Some(reg::REG32 | 6),
            scale: 4,
            size: 0,
            seg: None,
        };
        let out = encode(
            &insn("mov", 32, vec![Operand::Reg(reg::REG32), Operand::Mem(ea)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x8b, 0x04, 0xb3]);
    }

    #[test]
    fn rex_for_extended_registers() {
        // mov r8, rax => 49 89 C0
        let out = encode(
            &insn(
                "mov",
                64,
                vec![Operand::Reg(reg::REG64 | 8 | reg::NEEDS_REX), Operand::Reg(reg::REG64)],
            ),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x49, 0x89, 0xc0]);
    }

    #[test]
    fn extended_register_outside_64bit_mode_errors() {
        let err = encode(
            &insn(
                "mov",
                32,
                vec![Operand::Reg(reg::REG64 | 8 | reg::NEEDS_REX), imm(1)],
            ),
            false,
        )
        .unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Type);
    }

    #[test]
    fn push_pop_registers() {
        let out = encode(&insn("push", 32, vec![Operand::Reg(reg::REG32)]), false).unwrap();
        assert_eq!(fixed_bytes(out), vec![0x50]);
        let out = encode(&insn("pop", 64, vec![Operand::Reg(reg::REG64 | 5)]), false).unwrap();
        assert_eq!(fixed_bytes(out), vec![0x5d]);
    }

    #[test]
    fn int_imm8() {
        let out = encode(&insn("int", 32, vec![imm(0x80)]), false).unwrap();
        assert_eq!(fixed_bytes(out), vec![0xcd, 0x80]);
    }

    #[test]
    fn inc_uses_short_form_outside_64bit() {
        let out = encode(&insn("inc", 32, vec![Operand::Reg(reg::REG32)]), false).unwrap();
        assert_eq!(fixed_bytes(out), vec![0x40]);
        let out = encode(&insn("inc", 64, vec![Operand::Reg(reg::REG64)]), false).unwrap();
        assert_eq!(fixed_bytes(out), vec![0x48, 0xff, 0xc0]);
    }

    #[test]
    fn jmp_comes_back_relaxable() {
        let out = encode(&insn("jmp", 32, vec![imm(0)]), false).unwrap();
        match out {
            LoweredInsn::Jump {
                short_op, near_op, near_size, ..
            } => {
                assert_eq!(short_op, vec![0xeb]);
                assert_eq!(near_op, vec![0xe9]);
                assert_eq!(near_size, 32);
            }
            _ => panic!("expected jump"),
        }
    }

    #[test]
    fn jcc_opcodes() {
        let out = encode(&insn("jne", 32, vec![imm(0)]), false).unwrap();
        match out {
            LoweredInsn::Jump { short_op, near_op, .. } => {
                assert_eq!(short_op, vec![0x75]);
                assert_eq!(near_op, vec![0x0f, 0x85]);
            }
            _ => panic!("expected jump"),
        }
    }

    #[test]
    fn call_rel32_has_pcrel_fixup() {
        let out = encode(&insn("call", 32, vec![imm(0)]), false).unwrap();
        match out {
            LoweredInsn::Fixed { bytes, fixups } => {
                assert_eq!(bytes, vec![0xe8, 0, 0, 0, 0]);
                assert_eq!(fixups.len(), 1);
                assert_eq!(fixups[0].offset, 1);
                assert!(fixups[0].value.ip_rel);
                assert_eq!(fixups[0].value.next_insn, 0);
            }
            _ => panic!("expected fixed"),
        }
    }

    #[test]
    fn mode16_effective_address() {
        // mov ax, [bx+si] => 8B 00
        let ea = EffAddr {
            disp: None,
            base: Some(reg::REG16 | 3),
            index: Some(reg::REG16 | 6),
            scale: 1,
            size: 0,
            seg: None,
        };
        let out = encode(
            &insn("mov", 16, vec![Operand::Reg(reg::REG16), Operand::Mem(ea)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0x8b, 0x00]);
    }

    #[test]
    fn lock_prefix_is_emitted_first() {
        let mut i = insn(
            "add",
            32,
            vec![
                Operand::Mem(EffAddr {
                    disp: None,
                    base: Some(reg::REG32 | 3),
                    index: None,
                    scale: 1,
                    size: 32,
                    seg: None,
                }),
                Operand::Reg(reg::REG32),
            ],
        );
        i.prefixes.push("lock".to_string());
        let out = encode(&i, false).unwrap();
        assert_eq!(fixed_bytes(out), vec![0xf0, 0x01, 0x03]);
    }

    #[test]
    fn shl_by_one_uses_d1() {
        let out = encode(
            &insn("shl", 32, vec![Operand::Reg(reg::REG32), imm(1)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0xd1, 0xe0]);
        let out = encode(
            &insn("shl", 32, vec![Operand::Reg(reg::REG32), imm(4)]),
            false,
        )
        .unwrap();
        assert_eq!(fixed_bytes(out), vec![0xc1, 0xe0, 4]);
    }
}
