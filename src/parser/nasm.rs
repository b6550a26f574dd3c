// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! NASM-dialect parser.
//!
//! Line oriented: optional label, optional `times` prefix, then an
//! instruction, a data/reservation directive, or a registered directive.
//! Local labels (leading `.`) nest under the last non-local label.

use crate::arch::{Arch, EffAddr, ImmOperand, Insn, JumpHint, Operand};
use crate::core::bytecode::{Bytecode, BytecodeKind, DataItem};
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostics, Span};
use crate::core::directive::{DirHandler, DirectiveInfo, Directives, NameValue, Nv};
use crate::core::expr::{Expr, Op};
use crate::core::intnum::IntNum;
use crate::core::object::Object;
use crate::core::value::Value;
use crate::objfmt::ObjectFormat;

use super::tokenizer::{tokenize_line, Tok, Token, TokenizerConfig};
use super::{Parser, SourceFile};

const CONFIG: TokenizerConfig = TokenizerConfig {
    comment_chars: &[';'],
    dollar_hex: true,
    ident_extra: &['$'],
};

pub struct NasmParser {
    last_label: Option<String>,
    /// Counter for the hidden labels behind `$` and `$$`.
    loc_counter: u32,
}

impl NasmParser {
    pub fn new() -> Self {
        Self {
            last_label: None,
            loc_counter: 0,
        }
    }
}

impl Default for NasmParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for NasmParser {
    fn keyword(&self) -> &'static str {
        "nasm"
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
            let mut ctx = LineCtx {
                parser: &mut *self,
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

struct LineCtx<'a> {
    parser: &'a mut NasmParser,
    toks: &'a [Token],
    pos: usize,
    line_num: u32,
    object: &'a mut Object,
    dirs: &'a Directives,
    arch: &'a mut dyn Arch,
    objfmt: &'a mut dyn ObjectFormat,
}

impl<'a> LineCtx<'a> {
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

    /// Qualify a local (leading-dot) name against the last full label.
    fn scoped_name(&self, name: &str) -> String {
        if let Some(stripped) = name.strip_prefix('.') {
            if let Some(last) = &self.parser.last_label {
                return format!("{last}.{stripped}");
            }
        }
        name.to_string()
    }

    fn symbol_use(&mut self, name: &str, span: Span) -> usize {
        let full = self.scoped_name(name);
        self.object.symbols.use_at(&full, span)
    }

    /// Hidden label for `$` / `$$`; never emitted to object symbol tables.
    fn hidden_label(&mut self, section_start: bool) -> ParseResult<Expr> {
        let Some(mut loc) = self.object.current_location() else {
            return self.err(AsmErrorKind::Syntax, "no active section");
        };
        if section_start {
            loc.bc = 0;
            loc.off = 0;
        }
        self.parser.loc_counter += 1;
        let name = format!("..@loc.{}", self.parser.loc_counter);
        let sym = self
            .object
            .symbols
            .define_label(&name, loc, self.line_span())
            .map_err(|e| (e, self.line_span()))?;
        Ok(Expr::sym(sym))
    }

    fn parse_line(&mut self) -> ParseResult<()> {
        // Label?
        let first = self.peek().cloned();
        if let Some(Token {
            tok: Tok::Ident(name),
            span,
        }) = first
        {
            let next_tok = self.peek2().map(|t| t.tok.clone());
            let name_is_keyword = self.is_statement_keyword(&name);
            let followed_by_colon = matches!(next_tok, Some(Tok::Punct(':')));
            let followed_by_equ = matches!(
                &next_tok,
                Some(Tok::Ident(k)) if k.eq_ignore_ascii_case("equ")
            );
            if followed_by_equ {
                self.pos += 2;
                let expr = self.parse_expr()?;
                let expr = self.simplified(expr)?;
                let full = self.scoped_name(&name);
                self.object
                    .symbols
                    .define_equ(&full, expr, span)
                    .map_err(|e| (e, span))?;
                return self.expect_end();
            } else if followed_by_colon && !name_is_keyword {
                self.pos += 2;
                self.define_label(&name, span)?;
            } else if !name_is_keyword {
                // A bare unknown identifier followed by a statement keyword
                // (or nothing) is a colonless label.
                let starts_statement = match &next_tok {
                    Some(Tok::Ident(k)) => self.is_statement_keyword(k),
                    None => true,
                    _ => false,
                };
                if starts_statement {
                    self.pos += 1;
                    self.define_label(&name, span)?;
                }
            }
        }
        if self.at_end() {
            return Ok(());
        }

        // times prefix?
        let mut times: Option<Expr> = None;
        if self
            .peek_ident()
            .map(|s| s.eq_ignore_ascii_case("times"))
            .unwrap_or(false)
        {
            self.pos += 1;
            times = Some(self.parse_expr()?);
        }

        let Some(name) = self.peek_ident().map(str::to_string) else {
            return self.err(AsmErrorKind::Syntax, "expected instruction or directive");
        };
        let span = self.here_span();
        let lower = name.to_ascii_lowercase();

        // Data and reservation directives produce bytecodes directly.
        if let Some(size) = data_size(&lower) {
            self.pos += 1;
            let bc = self.parse_data(size)?;
            self.append(apply_times(bc, times));
            return self.expect_end();
        }
        if let Some(size) = reserve_size(&lower) {
            self.pos += 1;
            let count = self.parse_expr()?;
            let bc = Bytecode::new(
                BytecodeKind::Reserve {
                    count: self.simplified(count)?,
                    item_size: size,
                    resolved: None,
                },
                span,
            );
            self.append(apply_times(bc, times));
            return self.expect_end();
        }
        match lower.as_str() {
            "align" | "alignb" => {
                self.pos += 1;
                return self.parse_align(span);
            }
            "incbin" => {
                self.pos += 1;
                return self.parse_incbin(span, times);
            }
            _ => {}
        }

        // Registered directives (bits, section, global, extern, org, ...).
        if self.dirs.contains(&lower) && !self.arch.is_mnemonic(&lower) {
            if times.is_some() {
                return self.err(
                    AsmErrorKind::Syntax,
                    "times cannot be applied to a directive",
                );
            }
            self.pos += 1;
            return self.dispatch_directive(&lower, span);
        }

        // Instruction.
        if self.arch.is_prefix(&lower) || self.arch.is_mnemonic(&lower) {
            let bc = self.parse_instruction()?;
            self.append(apply_times(bc, times));
            return self.expect_end();
        }

        Err((
            AsmError::with_param(
                AsmErrorKind::Syntax,
                "unrecognized directive or instruction",
                &name,
            ),
            span,
        ))
    }

    fn is_statement_keyword(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        data_size(&lower).is_some()
            || reserve_size(&lower).is_some()
            || matches!(lower.as_str(), "align" | "alignb" | "incbin" | "times" | "equ")
            || self.dirs.contains(&lower)
            || self.arch.is_prefix(&lower)
            || self.arch.is_mnemonic(&lower)
            || self.arch.lookup_reg(&lower).is_some()
            || self.arch.lookup_seg_reg(&lower).is_some()
    }

    fn define_label(&mut self, name: &str, span: Span) -> ParseResult<()> {
        let Some(loc) = self.object.current_location() else {
            return self.err(AsmErrorKind::Syntax, "no active section");
        };
        let full = self.scoped_name(name);
        self.object
            .symbols
            .define_label(&full, loc, span)
            .map_err(|e| (e, span))?;
        if !name.starts_with('.') {
            self.parser.last_label = Some(name.to_string());
        }
        Ok(())
    }

    fn append(&mut self, bc: Bytecode) {
        // A current section always exists once the default section is set.
        self.object.append_bytecode(bc);
    }

    fn expect_end(&mut self) -> ParseResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            self.err(AsmErrorKind::Syntax, "trailing garbage on line")
        }
    }

    fn simplified(&self, mut e: Expr) -> ParseResult<Expr> {
        e.simplify(&crate::core::expr::NullSimplifyCtx, false)
            .map_err(|err| (err, self.line_span()))?;
        Ok(e)
    }

    // ----- directives ---------------------------------------------------

    fn dispatch_directive(&mut self, name: &str, span: Span) -> ParseResult<()> {
        let (handler, flags) = self.dirs.get(name).expect("directive presence checked");
        let mut namevals = Vec::new();
        while !self.at_end() {
            let nv_span = self.here_span();
            if let Some(id) = self.peek_ident().map(str::to_string) {
                // `name=value` or a bare identifier.
                if matches!(self.peek2(), Some(Token { tok: Tok::Punct('='), .. })) {
                    self.pos += 2;
                    let value = if let Some(vid) = self.peek_ident().map(str::to_string) {
                        self.pos += 1;
                        Nv::Id(vid)
                    } else {
                        let e = self.parse_expr()?;
                        Nv::Expr(self.simplified(e)?)
                    };
                    namevals.push(NameValue {
                        name: Some(id),
                        value,
                        span: nv_span,
                    });
                } else if self.arch.lookup_reg(&id).is_none() {
                    self.pos += 1;
                    namevals.push(NameValue {
                        name: None,
                        value: Nv::Id(id),
                        span: nv_span,
                    });
                } else {
                    let e = self.parse_expr()?;
                    namevals.push(NameValue {
                        name: None,
                        value: Nv::Expr(self.simplified(e)?),
                        span: nv_span,
                    });
                }
            } else if let Some(Token { tok: Tok::Str(s), .. }) = self.peek() {
                let s = String::from_utf8_lossy(s).to_string();
                self.pos += 1;
                namevals.push(NameValue {
                    name: None,
                    value: Nv::Str(s),
                    span: nv_span,
                });
            } else {
                let e = self.parse_expr()?;
                namevals.push(NameValue {
                    name: None,
                    value: Nv::Expr(self.simplified(e)?),
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

    fn parse_align(&mut self, span: Span) -> ParseResult<()> {
        let boundary = self.parse_expr()?;
        let mut fill = None;
        if self.eat_punct(',') {
            let e = self.parse_expr()?;
            let e = self.simplified(e)?;
            let v = e.get_intnum().ok_or_else(|| {
                (
                    AsmError::new(AsmErrorKind::NotAbsolute, "fill value must be a constant"),
                    span,
                )
            })?;
            fill = Some(v.get_uint().0 as u8);
        }
        let code = self
            .object
            .cur_section()
            .map(|s| self.object.section(s).is_code())
            .unwrap_or(false);
        let bc = Bytecode::new(
            BytecodeKind::Align {
                boundary: self.simplified(boundary)?,
                fill,
                maxskip: None,
                code: code && fill.is_none(),
                pad: 0,
            },
            span,
        );
        self.append(bc);
        self.expect_end()
    }

    fn parse_incbin(&mut self, span: Span, times: Option<Expr>) -> ParseResult<()> {
        let Some(Token { tok: Tok::Str(path), .. }) = self.peek().cloned() else {
            return self.err(AsmErrorKind::Syntax, "incbin requires a file name string");
        };
        self.pos += 1;
        let mut start = None;
        let mut maxlen = None;
        if self.eat_punct(',') {
            start = Some(self.parse_expr().and_then(|e| self.simplified(e))?);
            if self.eat_punct(',') {
                maxlen = Some(self.parse_expr().and_then(|e| self.simplified(e))?);
            }
        }
        let bc = Bytecode::new(
            BytecodeKind::Incbin {
                path: String::from_utf8_lossy(&path).to_string(),
                start,
                maxlen,
                data: Vec::new(),
            },
            span,
        );
        self.append(apply_times(bc, times));
        self.expect_end()
    }

    fn parse_data(&mut self, size: u64) -> ParseResult<Bytecode> {
        let span = self.here_span();
        let mut items = Vec::new();
        loop {
            match self.peek().cloned() {
                Some(Token { tok: Tok::Str(s), .. }) => {
                    self.pos += 1;
                    let mut bytes = s.clone();
                    // Strings pad to the item size.
                    while bytes.len() % size as usize != 0 {
                        bytes.push(0);
                    }
                    items.push(DataItem::Raw(bytes));
                }
                Some(Token { tok: Tok::Num(text), .. }) if text.contains('.') => {
                    self.pos += 1;
                    let f: f64 = text.parse().map_err(|_| {
                        (
                            AsmError::with_param(
                                AsmErrorKind::Value,
                                "invalid floating-point literal",
                                &text,
                            ),
                            span,
                        )
                    })?;
                    let bytes = self
                        .arch
                        .float_tobytes(f, size as u32 * 8)
                        .map_err(|e| (e, span))?;
                    items.push(DataItem::Raw(bytes));
                }
                _ => {
                    let e = self.parse_expr()?;
                    items.push(DataItem::Value(Value::from_expr(
                        self.simplified(e)?,
                        size as u32 * 8,
                    )));
                }
            }
            if !self.eat_punct(',') {
                break;
            }
        }
        Ok(Bytecode::new(BytecodeKind::Data { items }, span))
    }

    // ----- instructions -------------------------------------------------

    fn parse_instruction(&mut self) -> ParseResult<Bytecode> {
        let span = self.here_span();
        let mut insn = Insn::new("", self.arch.mode_bits());
        while let Some(name) = self.peek_ident().map(str::to_string) {
            if self.arch.is_prefix(&name) {
                self.pos += 1;
                insn.prefixes.push(name);
            } else {
                break;
            }
        }
        let Some(mnemonic) = self.peek_ident().map(str::to_string) else {
            return self.err(AsmErrorKind::Syntax, "expected instruction mnemonic");
        };
        self.pos += 1;
        insn.mnemonic = mnemonic;

        if !self.at_end() {
            loop {
                let op = self.parse_operand()?;
                insn.operands.push(op);
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        Ok(Bytecode::new(BytecodeKind::Insn(insn), span))
    }

    fn parse_operand(&mut self) -> ParseResult<Operand> {
        let mut size = 0u32;
        let mut strict = false;
        let mut hint = JumpHint::None;

        loop {
            let Some(kw) = self.peek_ident().map(|s| s.to_ascii_lowercase()) else {
                break;
            };
            match kw.as_str() {
                "byte" => size = 8,
                "word" => size = 16,
                "dword" => size = 32,
                "qword" => size = 64,
                "strict" => strict = true,
                "short" => hint = JumpHint::Short,
                "near" => hint = JumpHint::Near,
                _ => break,
            }
            self.pos += 1;
        }

        if self.eat_punct('[') {
            let mut ea = self.parse_effaddr()?;
            ea.size = size;
            if !self.eat_punct(']') {
                return self.err(AsmErrorKind::Syntax, "expected `]`");
            }
            return Ok(Operand::Mem(ea));
        }

        if let Some(name) = self.peek_ident().map(str::to_string) {
            if let Some(code) = self.arch.lookup_reg(&name) {
                self.pos += 1;
                return Ok(Operand::Reg(code));
            }
            if let Some(code) = self.arch.lookup_seg_reg(&name) {
                self.pos += 1;
                return Ok(Operand::SegReg(code));
            }
        }

        let expr = self.parse_expr()?;
        let expr = self.simplified(expr)?;
        let mut imm = ImmOperand::new(expr);
        imm.size = size;
        imm.strict = strict;
        imm.hint = hint;
        Ok(Operand::Imm(imm))
    }

    fn parse_effaddr(&mut self) -> ParseResult<EffAddr> {
        let mut ea = EffAddr {
            disp: None,
            base: None,
            index: None,
            scale: 1,
            size: 0,
            seg: None,
        };

        // Optional segment override: `[es:...]`.
        if let Some(name) = self.peek_ident() {
            if let Some(seg) = self.arch.lookup_seg_reg(name) {
                if matches!(self.peek2(), Some(Token { tok: Tok::Punct(':'), .. })) {
                    self.pos += 2;
                    ea.seg = Some(seg);
                }
            }
        }

        let mut disp: Option<Expr> = None;
        let mut negate = false;
        loop {
            let piece = self.parse_ea_piece()?;
            match piece {
                EaPiece::Reg(code) => {
                    if negate {
                        return self.err(
                            AsmErrorKind::Type,
                            "registers cannot be negated in an effective address",
                        );
                    }
                    if ea.base.is_none() {
                        ea.base = Some(code);
                    } else if ea.index.is_none() {
                        ea.index = Some(code);
                    } else {
                        return self.err(
                            AsmErrorKind::Type,
                            "too many registers in effective address",
                        );
                    }
                }
                EaPiece::Scaled(code, scale) => {
                    if negate {
                        return self.err(
                            AsmErrorKind::Type,
                            "registers cannot be negated in an effective address",
                        );
                    }
                    if ea.index.is_some() {
                        return self.err(
                            AsmErrorKind::Type,
                            "too many index registers in effective address",
                        );
                    }
                    // reg*1 can still serve as a plain base.
                    if scale == 1 && ea.base.is_none() {
                        ea.base = Some(code);
                    } else {
                        ea.index = Some(code);
                        ea.scale = scale;
                    }
                }
                EaPiece::Disp(e) => {
                    let e = if negate {
                        Expr::unary(Op::Neg, e)
                    } else {
                        e
                    };
                    disp = Some(match disp {
                        Some(d) => Expr::binary(Op::Add, d, e),
                        None => e,
                    });
                }
            }
            if self.eat_punct('+') {
                negate = false;
            } else if self.eat_punct('-') {
                negate = true;
            } else {
                break;
            }
        }
        if let Some(d) = disp {
            ea.disp = Some(self.simplified(d)?);
        }
        Ok(ea)
    }

    fn parse_ea_piece(&mut self) -> ParseResult<EaPiece> {
        // reg or reg*scale
        if let Some(name) = self.peek_ident().map(str::to_string) {
            if let Some(code) = self.arch.lookup_reg(&name) {
                self.pos += 1;
                if self.eat_punct('*') {
                    let scale = self.expect_const()?;
                    return Ok(EaPiece::Scaled(code, scale.get_uint().0 as u8));
                }
                return Ok(EaPiece::Reg(code));
            }
        }
        // const*reg
        if let (
            Some(Token { tok: Tok::Num(n), .. }),
            Some(Token { tok: Tok::Punct('*'), .. }),
        ) = (self.peek(), self.peek2())
        {
            if let Some(Token { tok: Tok::Ident(name), .. }) = self.toks.get(self.pos + 2)
            {
                if let Some(code) = self.arch.lookup_reg(name) {
                    let scale = parse_nasm_number(n).ok_or_else(|| {
                        (
                            AsmError::with_param(
                                AsmErrorKind::Value,
                                "invalid number",
                                n,
                            ),
                            self.here_span(),
                        )
                    })?;
                    self.pos += 3;
                    return Ok(EaPiece::Scaled(code, scale.get_uint().0 as u8));
                }
            }
        }
        let e = self.parse_expr_prec(10)?;
        Ok(EaPiece::Disp(e))
    }

    fn expect_const(&mut self) -> ParseResult<IntNum> {
        let e = self.parse_expr_prec(10)?;
        let e = self.simplified(e)?;
        match e.get_intnum() {
            Some(v) => Ok(v.clone()),
            None => self.err(AsmErrorKind::NotAbsolute, "expected a constant"),
        }
    }

    // ----- expressions --------------------------------------------------

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_expr_prec(1)?;
        // WRT binds loosest of all.
        if self
            .peek_ident()
            .map(|s| s.eq_ignore_ascii_case("wrt"))
            .unwrap_or(false)
        {
            self.pos += 1;
            let rhs = self.parse_primary()?;
            return Ok(Expr::binary(Op::Wrt, lhs, rhs));
        }
        Ok(lhs)
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
            Some(Tok::Op("||")) => Some((1, Op::LOr)),
            Some(Tok::Op("&&")) => Some((2, Op::LAnd)),
            Some(Tok::Punct('|')) => Some((3, Op::Or)),
            Some(Tok::Punct('^')) => Some((4, Op::Xor)),
            Some(Tok::Punct('&')) => Some((5, Op::And)),
            Some(Tok::Op("==")) => Some((6, Op::Eq)),
            Some(Tok::Op("!=")) => Some((6, Op::Ne)),
            Some(Tok::Op("<=")) => Some((7, Op::Le)),
            Some(Tok::Op(">=")) => Some((7, Op::Ge)),
            Some(Tok::Punct('<')) => Some((7, Op::Lt)),
            Some(Tok::Punct('>')) => Some((7, Op::Gt)),
            Some(Tok::Op("<<")) => Some((8, Op::Shl)),
            Some(Tok::Op(">>")) => Some((8, Op::Shr)),
            Some(Tok::Punct('+')) => Some((9, Op::Add)),
            Some(Tok::Punct('-')) => Some((9, Op::Sub)),
            Some(Tok::Punct('*')) => Some((10, Op::Mul)),
            Some(Tok::Punct('/')) => Some((10, Op::Div)),
            Some(Tok::Op("//")) => Some((10, Op::Div)),
            Some(Tok::Punct('%')) => Some((10, Op::Mod)),
            Some(Tok::Op("%%")) => Some((10, Op::Mod)),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        match self.peek().map(|t| t.tok.clone()) {
            Some(Tok::Punct('-')) => {
                self.pos += 1;
                Ok(Expr::unary(Op::Neg, self.parse_unary()?))
            }
            Some(Tok::Punct('+')) => {
                self.pos += 1;
                self.parse_unary()
            }
            Some(Tok::Punct('~')) => {
                self.pos += 1;
                Ok(Expr::unary(Op::Not, self.parse_unary()?))
            }
            Some(Tok::Punct('!')) => {
                self.pos += 1;
                Ok(Expr::unary(Op::LNot, self.parse_unary()?))
            }
            Some(Tok::Ident(s)) if s.eq_ignore_ascii_case("seg") => {
                self.pos += 1;
                Ok(Expr::unary(Op::Seg, self.parse_unary()?))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let Some(tok) = self.peek().cloned() else {
            return self.err(AsmErrorKind::Syntax, "unexpected end of expression");
        };
        match tok.tok {
            Tok::Num(text) => {
                self.pos += 1;
                match parse_nasm_number(&text) {
                    Some(v) => Ok(Expr::int(v)),
                    None => Err((
                        AsmError::with_param(AsmErrorKind::Value, "invalid number", &text),
                        tok.span,
                    )),
                }
            }
            Tok::Str(bytes) => {
                self.pos += 1;
                if bytes.is_empty() || bytes.len() > 8 {
                    return Err((
                        AsmError::new(
                            AsmErrorKind::Value,
                            "character constant must be 1 to 8 bytes",
                        ),
                        tok.span,
                    ));
                }
                // Little-endian packing, NASM character-constant rules.
                let mut v: i64 = 0;
                for (i, b) in bytes.iter().enumerate() {
                    v |= (*b as i64) << (8 * i);
                }
                Ok(Expr::int(v))
            }
            Tok::Punct('(') => {
                self.pos += 1;
                let e = self.parse_expr_prec(1)?;
                if !self.eat_punct(')') {
                    return self.err(AsmErrorKind::Syntax, "expected `)`");
                }
                Ok(e)
            }
            Tok::Punct('$') => {
                self.pos += 1;
                if self.eat_punct('$') {
                    self.hidden_label(true)
                } else {
                    self.hidden_label(false)
                }
            }
            Tok::Ident(name) => {
                self.pos += 1;
                if let Some(code) = self.arch.lookup_reg(&name) {
                    return Ok(Expr::reg(code));
                }
                let sym = self.symbol_use(&name, tok.span);
                Ok(Expr::sym(sym))
            }
            _ => self.err(AsmErrorKind::Syntax, "unexpected token in expression"),
        }
    }
}

enum EaPiece {
    Reg(u32),
    Scaled(u32, u8),
    Disp(Expr),
}

fn apply_times(bc: Bytecode, times: Option<Expr>) -> Bytecode {
    match times {
        Some(e) => bc.with_times(e),
        None => bc,
    }
}

fn data_size(name: &str) -> Option<u64> {
    match name {
        "db" => Some(1),
        "dw" => Some(2),
        "dd" => Some(4),
        "dq" => Some(8),
        _ => None,
    }
}

fn reserve_size(name: &str) -> Option<u64> {
    match name {
        "resb" => Some(1),
        "resw" => Some(2),
        "resd" => Some(4),
        "resq" => Some(8),
        _ => None,
    }
}

/// NASM numeric literal grammar: `0x`/`$`/`h`-suffix hex, `0b`/`b`/`y`
/// binary, `0o`/`o`/`q` octal, `d` decimal suffix, `_` separators.
pub fn parse_nasm_number(text: &str) -> Option<IntNum> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    let text = cleaned.as_str();

    // Prefix notations take priority so `$0BB` and `0b8h` cannot be
    // misread through the suffix heuristics.
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return IntNum::from_str_radix(hex, 16);
    }
    if let Some(hex) = text.strip_prefix("0h").or_else(|| text.strip_prefix("0H")) {
        return IntNum::from_str_radix(hex, 16);
    }
    if let Some(hex) = text.strip_prefix('$') {
        return IntNum::from_str_radix(hex, 16);
    }
    if let Some(oct) = text.strip_prefix("0o").or_else(|| text.strip_prefix("0O")) {
        return IntNum::from_str_radix(oct, 8);
    }
    if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        if !bin.is_empty() && bin.bytes().all(|b| b == b'0' || b == b'1') {
            return IntNum::from_str_radix(bin, 2);
        }
    }
    if let Some(rest) = text
        .strip_suffix('h')
        .or_else(|| text.strip_suffix('H'))
    {
        return IntNum::from_str_radix(rest, 16);
    }
    if let Some(rest) = text
        .strip_suffix('b')
        .or_else(|| text.strip_suffix('B'))
        .or_else(|| text.strip_suffix('y'))
        .or_else(|| text.strip_suffix('Y'))
    {
        if rest.bytes().all(|b| b == b'0' || b == b'1') && !rest.is_empty() {
            return IntNum::from_str_radix(rest, 2);
        }
    }
    if let Some(rest) = text
        .strip_suffix('o')
        .or_else(|| text.strip_suffix('O'))
        .or_else(|| text.strip_suffix('q'))
        .or_else(|| text.strip_suffix('Q'))
    {
        return IntNum::from_str_radix(rest, 8);
    }
    if let Some(rest) = text.strip_suffix('d').or_else(|| text.strip_suffix('D')) {
        return IntNum::from_str_radix(rest, 10);
    }
    IntNum::from_str_radix(text, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nasm_number_forms() {
        assert_eq!(parse_nasm_number("42"), Some(IntNum::new(42)));
        assert_eq!(parse_nasm_number("0x2A"), Some(IntNum::new(42)));
        assert_eq!(parse_nasm_number("2Ah"), Some(IntNum::new(42)));
        assert_eq!(parse_nasm_number("$2A"), Some(IntNum::new(42)));
        assert_eq!(parse_nasm_number("101010b"), Some(IntNum::new(42)));
        assert_eq!(parse_nasm_number("0b101010"), Some(IntNum::new(42)));
        assert_eq!(parse_nasm_number("52q"), Some(IntNum::new(42)));
        assert_eq!(parse_nasm_number("42d"), Some(IntNum::new(42)));
        assert_eq!(parse_nasm_number("1_000"), Some(IntNum::new(1000)));
        assert_eq!(parse_nasm_number(""), None);
        assert_eq!(parse_nasm_number("zz"), None);
    }

    #[test]
    fn dollar_hex_ending_in_b_is_hex() {
        assert_eq!(parse_nasm_number("$0BB"), Some(IntNum::new(0xbb)));
        assert_eq!(parse_nasm_number("0b8h"), Some(IntNum::new(0xb8)));
    }

    #[test]
    fn big_hex_promotes() {
        let v = parse_nasm_number("0xffff_ffff_ffff_ffff_ff").unwrap();
        assert!(v > IntNum::new(i64::MAX));
    }
}
