// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! GAS-dialect (AT&T syntax) parser.
//!
//! Covers the common directive set (`.byte`…`.quad`, `.ascii`/`.asciz`,
//! `.skip`, `.align`/`.balign`/`.p2align`, `.org`, `.globl`, `.comm`,
//! `.set`) and AT&T instruction syntax: `$` immediates, `%` registers,
//! `disp(base,index,scale)` memory operands, and source-before-destination
//! operand order.

use crate::arch::{Arch, EffAddr, ImmOperand, Insn, Operand};
use crate::core::bytecode::{Bytecode, BytecodeKind, DataItem};
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics, Span};
use crate::core::directive::{DirHandler, DirectiveInfo, Directives, NameValue, Nv};
use crate::core::expr::{Expr, Op};
use crate::core::intnum::IntNum;
use crate::core::object::Object;
use crate::core::symbol::vis;
use crate::core::value::Value;
use crate::objfmt::ObjectFormat;

use super::tokenizer::{tokenize_line, Tok, Token, TokenizerConfig};
use super::{Parser, SourceFile};

const CONFIG: TokenizerConfig = TokenizerConfig {
    comment_chars: &['#'],
    dollar_hex: false,
    ident_extra: &[],
};

pub struct GasParser;

impl GasParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GasParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for GasParser {
    fn keyword(&self) -> &'static str {
        "gas"
    }

    fn parse(
        &mut self,
        source: &SourceFile,
        object: &mut Object,
        dirs: &Directives,
        arch: &mut dyn Arch,
        objfmt: &mut dyn ObjectFormat,
        diags: &mut Diagnostics,
    ) {
        for (idx, line) in source.lines.iter().enumerate() {
            let line_num = (idx + 1) as u32;
            let toks = match tokenize_line(line, line_num, &CONFIG) {
                Ok(toks) => toks,
                Err((msg, span)) => {
                    diags.error(span, AsmError::new(AsmErrorKind::Syntax, msg));
                    continue;
                }
            };
            if toks.is_empty() {
                continue;
            }
            let mut ctx = GasLine {
                toks: &toks,
                pos: 0,
                line_num,
                object: &mut *object,
                dirs,
                arch: &mut *arch,
                objfmt: &mut *objfmt,
            };
            if let Err(err) = ctx.parse_line() {
                diags.error(err.1, err.0);
            }
        }
    }
}

type ParseResult<T> = Result<T, (AsmError, Span)>;

struct GasLine<'a> {
    toks: &'a [Token],
    pos: usize,
    line_num: u32,
    object: &'a mut Object,
    dirs: &'a Directives,
    arch: &'a mut dyn Arch,
    objfmt: &'a mut dyn ObjectFormat,
}

impl<'a> GasLine<'a> {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn peek2(&self) -> Option<&Token> {
        self.toks.get(self.pos + 1)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn line_span(&self) -> Span {
        Span::at_line(self.line_num)
    }

    fn here_span(&self) -> Span {
        self.peek()
            .map(|t| t.span)
            .unwrap_or_else(|| self.line_span())
    }

    fn err<T>(&self, kind: AsmErrorKind, msg: impl Into<String>) -> ParseResult<T> {
        Err((AsmError::new(kind, msg), self.here_span()))
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if matches!(self.peek(), Some(Token { tok: Tok::Punct(p), .. }) if *p == c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek() {
            Some(Token {
                tok: Tok::Ident(s), ..
            }) => Some(s.as_str()),
            _ => None,
        }
    }

    fn simplified(&self, mut e: Expr) -> ParseResult<Expr> {
        e.simplify(&crate::core::expr::NullSimplifyCtx, false)
            .map_err(|err| (err, self.line_span()))?;
        Ok(e)
    }

    fn append(&mut self, bc: Bytecode) {
        self.object.append_bytecode(bc);
    }

    fn expect_end(&mut self) -> ParseResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            self.err(AsmErrorKind::Syntax, "trailing garbage on line")
        }
    }

    fn parse_line(&mut self) -> ParseResult<()> {
        // Labels: `name:` possibly repeated.
        while matches!(
            (self.peek().map(|t| &t.tok), self.peek2().map(|t| &t.tok)),
            (Some(Tok::Ident(_)), Some(Tok::Punct(':')))
        ) {
            let tok = self.peek().cloned().expect("label token");
            let span = tok.span;
            let Tok::Ident(name) = tok.tok else {
                break;
            };
            self.pos += 2;
            let Some(loc) = self.object.current_location() else {
                return self.err(AsmErrorKind::Syntax, "no active section");
            };
            self.object
                .symbols
                .define_label(&name, loc, span)
                .map_err(|e| (e, span))?;
        }
        if self.at_end() {
            return Ok(());
        }

        let Some(name) = self.peek_ident().map(str::to_string) else {
            return self.err(AsmErrorKind::Syntax, "expected directive or instruction");
        };
        let span = self.here_span();

        if name.starts_with('.') {
            self.pos += 1;
            return self.parse_directive(&name.to_ascii_lowercase(), span);
        }

        let bc = self.parse_instruction(&name, span)?;
        self.append(bc);
        self.expect_end()
    }

    // ----- directives ---------------------------------------------------

    fn parse_directive(&mut self, name: &str, span: Span) -> ParseResult<()> {
        if let Some(size) = match name {
            ".byte" => Some(1u64),
            ".word" | ".short" | ".hword" => Some(2),
            ".long" | ".int" => Some(4),
            ".quad" => Some(8),
            _ => None,
        } {
            let mut items = Vec::new();
            loop {
                let e = self.parse_expr()?;
                items.push(DataItem::Value(Value::from_expr(
                    self.simplified(e)?,
                    size as u32 * 8,
                )));
                if !self.eat_punct(',') {
                    break;
                }
            }
            self.append(Bytecode::new(BytecodeKind::Data { items }, span));
            return self.expect_end();
        }

        match name {
            ".ascii" | ".asciz" | ".string" => {
                let zero_terminate = name != ".ascii";
                let mut bytes = Vec::new();
                loop {
                    let Some(Token { tok: Tok::Str(s), .. }) = self.peek().cloned() else {
                        return self.err(AsmErrorKind::Syntax, "expected string literal");
                    };
                    self.pos += 1;
                    bytes.extend_from_slice(&s);
                    if zero_terminate {
                        bytes.push(0);
                    }
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                self.append(Bytecode::new(
                    BytecodeKind::Data {
                        items: vec![DataItem::Raw(bytes)],
                    },
                    span,
                ));
                self.expect_end()
            }
            ".uleb128" | ".sleb128" => {
                let mut exprs = Vec::new();
                loop {
                    let e = self.parse_expr().and_then(|e| self.simplified(e))?;
                    exprs.push(e);
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                let sizes = vec![1; exprs.len()];
                self.append(Bytecode::new(
                    BytecodeKind::Leb128 {
                        exprs,
                        signed: name == ".sleb128",
                        sizes,
                    },
                    span,
                ));
                self.expect_end()
            }
            ".skip" | ".space" | ".zero" => {
                let count = self.parse_expr().and_then(|e| self.simplified(e))?;
                let mut fill = 0u8;
                if self.eat_punct(',') {
                    let e = self.parse_expr().and_then(|e| self.simplified(e))?;
                    fill = e
                        .get_intnum()
                        .map(|v| v.get_uint().0 as u8)
                        .unwrap_or(0);
                }
                let bc = if fill == 0 {
                    Bytecode::new(
                        BytecodeKind::Reserve {
                            count,
                            item_size: 1,
                            resolved: None,
                        },
                        span,
                    )
                } else {
                    Bytecode::new(
                        BytecodeKind::Data {
                            items: vec![DataItem::Raw(vec![fill])],
                        },
                        span,
                    )
                    .with_times(count)
                };
                self.append(bc);
                self.expect_end()
            }
            ".align" | ".balign" | ".p2align" => {
                let arg = self.parse_expr().and_then(|e| self.simplified(e))?;
                let boundary = if name == ".p2align" {
                    let n = arg.get_intnum().map(|v| v.get_uint().0).unwrap_or(0);
                    Expr::int(1i64 << n.min(31))
                } else {
                    arg
                };
                let mut fill = None;
                if self.eat_punct(',') {
                    let e = self.parse_expr().and_then(|e| self.simplified(e))?;
                    fill = e.get_intnum().map(|v| v.get_uint().0 as u8);
                }
                let code = self
                    .object
                    .cur_section()
                    .map(|s| self.object.section(s).is_code())
                    .unwrap_or(false);
                self.append(Bytecode::new(
                    BytecodeKind::Align {
                        boundary,
                        fill,
                        maxskip: None,
                        code: code && fill.is_none(),
                        pad: 0,
                    },
                    span,
                ));
                self.expect_end()
            }
            ".org" => {
                let target = self.parse_expr().and_then(|e| self.simplified(e))?;
                let mut fill = 0u8;
                if self.eat_punct(',') {
                    let e = self.parse_expr().and_then(|e| self.simplified(e))?;
                    fill = e
                        .get_intnum()
                        .map(|v| v.get_uint().0 as u8)
                        .unwrap_or(0);
                }
                self.append(Bytecode::new(
                    BytecodeKind::Org {
                        target,
                        fill,
                        resolved_target: None,
                        pad: 0,
                    },
                    span,
                ));
                self.expect_end()
            }
            ".globl" | ".global" => {
                loop {
                    let Some(id) = self.peek_ident().map(str::to_string) else {
                        return self.err(AsmErrorKind::Syntax, "expected symbol name");
                    };
                    self.pos += 1;
                    self.object
                        .symbols
                        .declare(&id, vis::GLOBAL, span)
                        .map_err(|e| (e, span))?;
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                self.expect_end()
            }
            ".comm" => {
                let Some(id) = self.peek_ident().map(str::to_string) else {
                    return self.err(AsmErrorKind::Syntax, "expected symbol name");
                };
                self.pos += 1;
                if !self.eat_punct(',') {
                    return self.err(AsmErrorKind::Syntax, "expected `,` after symbol name");
                }
                let size = self.parse_expr().and_then(|e| self.simplified(e))?;
                if self.eat_punct(',') {
                    let _align = self.parse_expr()?;
                }
                let sym = self
                    .object
                    .symbols
                    .declare(&id, vis::COMMON, span)
                    .map_err(|e| (e, span))?;
                self.object.symbols.set_common_size(sym, size);
                self.expect_end()
            }
            ".set" | ".equ" | ".equiv" => {
                let Some(id) = self.peek_ident().map(str::to_string) else {
                    return self.err(AsmErrorKind::Syntax, "expected symbol name");
                };
                self.pos += 1;
                if !self.eat_punct(',') {
                    return self.err(AsmErrorKind::Syntax, "expected `,` after symbol name");
                }
                let e = self.parse_expr().and_then(|e| self.simplified(e))?;
                self.object
                    .symbols
                    .define_equ(&id, e, span)
                    .map_err(|e| (e, span))?;
                self.expect_end()
            }
            // Metadata directives with no object-level effect here.
            ".file" | ".ident" | ".type" | ".size" | ".local" => {
                self.pos = self.toks.len();
                Ok(())
            }
            _ => {
                if self.dirs.contains(name) {
                    return self.dispatch_registered(name, span);
                }
                Err((
                    AsmError::with_param(
                        AsmErrorKind::Syntax,
                        "unrecognized directive",
                        name,
                    ),
                    span,
                ))
            }
        }
    }

    fn dispatch_registered(&mut self, name: &str, span: Span) -> ParseResult<()> {
        let (handler, flags) = self.dirs.get(name).expect("directive presence checked");
        let mut namevals = Vec::new();
        while !self.at_end() {
            let nv_span = self.here_span();
            if let Some(id) = self.peek_ident().map(str::to_string) {
                self.pos += 1;
                namevals.push(NameValue {
                    name: None,
                    value: Nv::Id(id),
                    span: nv_span,
                });
            } else if let Some(Token { tok: Tok::Str(s), .. }) = self.peek().cloned() {
                self.pos += 1;
                namevals.push(NameValue {
                    name: None,
                    value: Nv::Str(String::from_utf8_lossy(&s).to_string()),
                    span: nv_span,
                });
            } else {
                let e = self.parse_expr().and_then(|e| self.simplified(e))?;
                namevals.push(NameValue {
                    name: None,
                    value: Nv::Expr(e),
                    span: nv_span,
                });
            }
            self.eat_punct(',');
        }
        Directives::check_args(name, flags, &namevals).map_err(|e| (e, span))?;
        let mut info = DirectiveInfo {
            object: &mut *self.object,
            arch: &mut *self.arch,
            namevals,
            objext_namevals: Vec::new(),
            span,
        };
        let result = match handler {
            DirHandler::Func(f) => f(&mut info),
            DirHandler::Objfmt => self.objfmt.directive(name, &mut info),
        };
        result.map_err(|e| (e, span))
    }

    // ----- instructions -------------------------------------------------

    fn parse_instruction(&mut self, name: &str, span: Span) -> ParseResult<Bytecode> {
        self.pos += 1;
        let lower = name.to_ascii_lowercase();

        // Resolve the mnemonic, stripping an AT&T size suffix if needed.
        let (mnemonic, suffix_size) = if self.arch.is_mnemonic(&lower) {
            (lower.clone(), 0u32)
        } else {
            let (stem, size) = match lower.as_bytes().last() {
                Some(b'b') => (&lower[..lower.len() - 1], 8),
                Some(b'w') => (&lower[..lower.len() - 1], 16),
                Some(b'l') => (&lower[..lower.len() - 1], 32),
                Some(b'q') => (&lower[..lower.len() - 1], 64),
                _ => (lower.as_str(), 0),
            };
            if size != 0 && self.arch.is_mnemonic(stem) {
                (stem.to_string(), size)
            } else if self.arch.is_prefix(&lower) {
                // Prefix then the real instruction.
                let Some(next) = self.peek_ident().map(str::to_string) else {
                    return self.err(AsmErrorKind::Syntax, "expected instruction after prefix");
                };
                let mut bc = self.parse_instruction(&next, span)?;
                if let BytecodeKind::Insn(insn) = &mut bc.kind {
                    insn.prefixes.insert(0, lower);
                }
                return Ok(bc);
            } else {
                return Err((
                    AsmError::with_param(
                        AsmErrorKind::Syntax,
                        "unrecognized instruction",
                        name,
                    ),
                    span,
                ));
            }
        };

        let mut insn = Insn::new(&mnemonic, self.arch.mode_bits());
        let branch = is_branch(&mnemonic);

        if !self.at_end() {
            loop {
                let op = self.parse_operand(branch, suffix_size)?;
                insn.operands.push(op);
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        // AT&T order is source first; the operand model is destination
        // first.
        insn.operands.reverse();
        Ok(Bytecode::new(BytecodeKind::Insn(insn), span))
    }

    fn parse_operand(&mut self, branch: bool, suffix_size: u32) -> ParseResult<Operand> {
        // $imm
        if self.eat_punct('$') {
            let e = self.parse_expr().and_then(|e| self.simplified(e))?;
            return Ok(Operand::Imm(ImmOperand::new(e)));
        }
        // %reg (or segment override %seg:mem)
        if self.eat_punct('%') {
            let Some(name) = self.peek_ident().map(str::to_string) else {
                return self.err(AsmErrorKind::Syntax, "expected register name after `%`");
            };
            if let Some(code) = self.arch.lookup_seg_reg(&name) {
                if matches!(self.peek2(), Some(Token { tok: Tok::Punct(':'), .. })) {
                    self.pos += 2;
                    let mut op = self.parse_memory(suffix_size)?;
                    if let Operand::Mem(ea) = &mut op {
                        ea.seg = Some(code);
                    }
                    return Ok(op);
                }
                self.pos += 1;
                return Ok(Operand::SegReg(code));
            }
            if let Some(code) = self.arch.lookup_reg(&name) {
                self.pos += 1;
                return Ok(Operand::Reg(code));
            }
            return Err((
                AsmError::with_param(AsmErrorKind::Type, "unrecognized register", &name),
                self.here_span(),
            ));
        }
        // *%reg / *mem — indirect branch target
        if self.eat_punct('*') {
            return self.parse_operand(false, suffix_size);
        }
        if branch {
            // Bare branch target.
            let e = self.parse_expr().and_then(|e| self.simplified(e))?;
            return Ok(Operand::Imm(ImmOperand::new(e)));
        }
        self.parse_memory(suffix_size)
    }

    /// `disp(base,index,scale)` or a bare absolute/symbolic address.
    fn parse_memory(&mut self, suffix_size: u32) -> ParseResult<Operand> {
        let mut ea = EffAddr {
            disp: None,
            base: None,
            index: None,
            scale: 1,
            size: suffix_size,
            seg: None,
        };
        if !matches!(self.peek(), Some(Token { tok: Tok::Punct('('), .. })) {
            let e = self.parse_expr().and_then(|e| self.simplified(e))?;
            ea.disp = Some(e);
        }
        if self.eat_punct('(') {
            if self.eat_punct('%') {
                let Some(name) = self.peek_ident().map(str::to_string) else {
                    return self.err(AsmErrorKind::Syntax, "expected base register");
                };
                let code = self.arch.lookup_reg(&name).ok_or_else(|| {
                    (
                        AsmError::with_param(
                            AsmErrorKind::Type,
                            "unrecognized register",
                            &name,
                        ),
                        self.here_span(),
                    )
                })?;
                self.pos += 1;
                ea.base = Some(code);
            }
            if self.eat_punct(',') {
                if self.eat_punct('%') {
                    let Some(name) = self.peek_ident().map(str::to_string) else {
                        return self.err(AsmErrorKind::Syntax, "expected index register");
                    };
                    let code = self.arch.lookup_reg(&name).ok_or_else(|| {
                        (
                            AsmError::with_param(
                                AsmErrorKind::Type,
                                "unrecognized register",
                                &name,
                            ),
                            self.here_span(),
                        )
                    })?;
                    self.pos += 1;
                    ea.index = Some(code);
                }
                if self.eat_punct(',') {
                    let e = self.parse_expr().and_then(|e| self.simplified(e))?;
                    ea.scale = e
                        .get_intnum()
                        .map(|v| v.get_uint().0 as u8)
                        .unwrap_or(1);
                }
            }
            if !self.eat_punct(')') {
                return self.err(AsmErrorKind::Syntax, "expected `)`");
            }
        }
        Ok(Operand::Mem(ea))
    }

    // ----- expressions --------------------------------------------------

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_expr_prec(1)
    }

    fn parse_expr_prec(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some((prec, op)) = self.peek_binary_op() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr_prec(prec + 1)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<(u8, Op)> {
        match self.peek().map(|t| &t.tok) {
            Some(Tok::Punct('|')) => Some((1, Op::Or)),
            Some(Tok::Punct('^')) => Some((2, Op::Xor)),
            Some(Tok::Punct('&')) => Some((3, Op::And)),
            Some(Tok::Op("<<")) => Some((4, Op::Shl)),
            Some(Tok::Op(">>")) => Some((4, Op::Shr)),
            Some(Tok::Punct('+')) => Some((5, Op::Add)),
            Some(Tok::Punct('-')) => Some((5, Op::Sub)),
            Some(Tok::Punct('*')) => Some((6, Op::Mul)),
            Some(Tok::Punct('/')) => Some((6, Op::Div)),
            Some(Tok::Punct('%')) => Some((6, Op::Mod)),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.eat_punct('-') {
            return Ok(Expr::unary(Op::Neg, self.parse_unary()?));
        }
        if self.eat_punct('~') {
            return Ok(Expr::unary(Op::Not, self.parse_unary()?));
        }
        if self.eat_punct('+') {
            return self.parse_unary();
        }
        let Some(tok) = self.peek().cloned() else {
            return self.err(AsmErrorKind::Syntax, "unexpected end of expression");
        };
        match tok.tok {
            Tok::Num(text) => {
                self.pos += 1;
                match parse_gas_number(&text) {
                    Some(v) => Ok(Expr::int(v)),
                    None => Err((
                        AsmError::with_param(AsmErrorKind::Value, "invalid number", &text),
                        tok.span,
                    )),
                }
            }
            Tok::Str(bytes) if bytes.len() == 1 => {
                self.pos += 1;
                Ok(Expr::int(bytes[0] as i64))
            }
            Tok::Punct('(') => {
                self.pos += 1;
                let e = self.parse_expr()?;
                if !self.eat_punct(')') {
                    return self.err(AsmErrorKind::Syntax, "expected `)`");
                }
                Ok(e)
            }
            Tok::Ident(name) => {
                self.pos += 1;
                let sym = self.object.symbols.use_at(&name, tok.span);
                Ok(Expr::sym(sym))
            }
            _ => self.err(AsmErrorKind::Syntax, "unexpected token in expression"),
        }
    }
}

fn is_branch(mnemonic: &str) -> bool {
    mnemonic == "jmp"
        || mnemonic == "call"
        || mnemonic == "loop"
        || mnemonic == "loope"
        || mnemonic == "loopne"
        || mnemonic == "jcxz"
        || mnemonic == "jecxz"
        || mnemonic == "jrcxz"
        || (mnemonic.starts_with('j') && mnemonic.len() <= 4)
}

/// GAS numeric literals: `0x` hex, `0b` binary, leading-zero octal,
/// decimal.
pub fn parse_gas_number(text: &str) -> Option<IntNum> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return IntNum::from_str_radix(hex, 16);
    }
    if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        return IntNum::from_str_radix(bin, 2);
    }
    if text.len() > 1 && text.starts_with('0') {
        return IntNum::from_str_radix(&text[1..], 8);
    }
    IntNum::from_str_radix(text, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_number_forms() {
        assert_eq!(parse_gas_number("42"), Some(IntNum::new(42)));
        assert_eq!(parse_gas_number("0x2A"), Some(IntNum::new(42)));
        assert_eq!(parse_gas_number("052"), Some(IntNum::new(42)));
        assert_eq!(parse_gas_number("0b101010"), Some(IntNum::new(42)));
        assert_eq!(parse_gas_number("0"), Some(IntNum::new(0)));
    }

    #[test]
    fn branch_detection() {
        assert!(is_branch("jmp"));
        assert!(is_branch("jne"));
        assert!(is_branch("call"));
        assert!(!is_branch("mov"));
        assert!(!is_branch("add"));
    }
}
