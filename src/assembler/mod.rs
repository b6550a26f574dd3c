// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler driver.
//!
//! Wires configuration → module resolution → object construction → parse →
//! finalize → optimize → debug generation → object output, checking the
//! diagnostics sink at every phase boundary. The output file is written
//! only when the error count stays zero.

pub mod cli;

use std::path::{Path, PathBuf};

use crate::core::bytecode::BytecodeKind;
use crate::core::diag::{AsmError, AsmErrorKind, Diagnostic, Diagnostics, Span};
use crate::core::directive::{DirFlags, DirHandler, DirectiveInfo, Directives};
use crate::core::expr::Expr;
use crate::core::object::Object;
use crate::core::optimize::optimize;
use crate::core::registry::ModuleRegistry;
use crate::core::symbol::vis;
use crate::parser::SourceFile;

pub use cli::{Cli, VERSION};

/// When to dump the object model as JSON to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpTime {
    #[default]
    Never,
    AfterParse,
    AfterFinalize,
    AfterOptimize,
    AfterOutput,
}

/// Validated run configuration.
#[derive(Debug)]
pub struct Config {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub arch_keyword: String,
    pub parser_keyword: String,
    pub objfmt_keyword: String,
    pub dbgfmt_keyword: String,
    pub machine: Option<String>,
    pub include_paths: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub warning_error: bool,
    pub suppress_warnings: bool,
    pub dump: DumpTime,
}

/// Result of a successful run (warnings may still be present).
pub struct RunReport {
    pub obj_filename: String,
    pub diagnostics: Vec<Diagnostic>,
    pub source_lines: Vec<String>,
}

/// A failed run with everything needed to render diagnostics.
pub struct RunError {
    pub error: AsmError,
    pub diagnostics: Vec<Diagnostic>,
    pub source_lines: Vec<String>,
    /// True when the failure is a usage problem (unknown module keyword).
    pub usage: bool,
}

impl RunError {
    fn usage(error: AsmError) -> Self {
        Self {
            error,
            diagnostics: Vec::new(),
            source_lines: Vec::new(),
            usage: true,
        }
    }

    fn fatal(error: AsmError) -> Self {
        Self {
            error,
            diagnostics: Vec::new(),
            source_lines: Vec::new(),
            usage: false,
        }
    }
}

/// Derive the output filename: strip the input extension, append the
/// format's canonical extension; fall back to `yasm.out` when that
/// collides with the input or the input has no basename.
pub fn resolve_obj_filename(input: &Path, extension: &str) -> String {
    let base = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if base.is_empty() {
        return "yasm.out".to_string();
    }
    let candidate = format!("{base}{extension}");
    if Some(candidate.as_str()) == input.file_name().and_then(|s| s.to_str()) {
        return "yasm.out".to_string();
    }
    candidate
}

fn dir_global(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    for nv in std::mem::take(&mut info.namevals) {
        let Some(id) = nv.as_id() else {
            return Err(AsmError::new(
                AsmErrorKind::Syntax,
                "global requires symbol names",
            ));
        };
        info.object.symbols.declare(id, vis::GLOBAL, nv.span)?;
    }
    Ok(())
}

fn dir_extern(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    for nv in std::mem::take(&mut info.namevals) {
        let Some(id) = nv.as_id() else {
            return Err(AsmError::new(
                AsmErrorKind::Syntax,
                "extern requires symbol names",
            ));
        };
        info.object.symbols.declare(id, vis::EXTERN, nv.span)?;
    }
    Ok(())
}

fn dir_common(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    let namevals = std::mem::take(&mut info.namevals);
    let name = namevals.first().and_then(|nv| nv.as_id()).ok_or_else(|| {
        AsmError::new(AsmErrorKind::Syntax, "common requires a symbol name")
    })?;
    let size = namevals
        .get(1)
        .and_then(|nv| nv.as_expr())
        .cloned()
        .unwrap_or_else(|| Expr::int(0));
    let span = namevals[0].span;
    let sym = info.object.symbols.declare(name, vis::COMMON, span)?;
    info.object.symbols.set_common_size(sym, size);
    Ok(())
}

fn dir_static(info: &mut DirectiveInfo) -> Result<(), AsmError> {
    for nv in std::mem::take(&mut info.namevals) {
        let Some(id) = nv.as_id() else {
            return Err(AsmError::new(
                AsmErrorKind::Syntax,
                "static requires symbol names",
            ));
        };
        info.object.symbols.declare(id, vis::DLOCAL, nv.span)?;
    }
    Ok(())
}

/// Search include paths for incbin files the bare path cannot find.
fn resolve_incbin_paths(object: &mut Object, input_dir: &Path, include_paths: &[PathBuf]) {
    for sect in object.sections_mut() {
        for bc in sect.bytecodes_mut() {
            if let BytecodeKind::Incbin { path, .. } = &mut bc.kind {
                if Path::new(path.as_str()).exists() {
                    continue;
                }
                let mut candidates = vec![input_dir.join(path.as_str())];
                candidates.extend(include_paths.iter().map(|d| d.join(path.as_str())));
                if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
                    *path = found.display().to_string();
                }
            }
        }
    }
}

/// Run the full pipeline for one input file.
pub fn assemble(config: &Config) -> Result<RunReport, RunError> {
    let registry = ModuleRegistry::with_builtins();

    let mut arch = registry.create_arch(&config.arch_keyword).ok_or_else(|| {
        RunError::usage(AsmError::with_param(
            AsmErrorKind::Value,
            "unrecognized architecture",
            &config.arch_keyword,
        ))
    })?;
    let mut parser = registry
        .create_parser(&config.parser_keyword)
        .ok_or_else(|| {
            RunError::usage(AsmError::with_param(
                AsmErrorKind::Value,
                "unrecognized parser",
                &config.parser_keyword,
            ))
        })?;
    let mut objfmt = registry
        .create_objfmt(&config.objfmt_keyword)
        .ok_or_else(|| {
            RunError::usage(AsmError::with_param(
                AsmErrorKind::Value,
                "unrecognized object format",
                &config.objfmt_keyword,
            ))
        })?;
    let mut dbgfmt = registry
        .create_dbgfmt(&config.dbgfmt_keyword)
        .ok_or_else(|| {
            RunError::usage(AsmError::with_param(
                AsmErrorKind::Value,
                "unrecognized debug format",
                &config.dbgfmt_keyword,
            ))
        })?;

    // Machine selection: explicit, or amd64 when the format implies 64-bit
    // x86 mode.
    let machine = match &config.machine {
        Some(m) => m.clone(),
        None => {
            if arch.keyword().eq_ignore_ascii_case("x86")
                && objfmt.default_x86_mode_bits() == 64
            {
                "amd64".to_string()
            } else {
                "x86".to_string()
            }
        }
    };
    if !arch.set_machine(&machine) {
        return Err(RunError::usage(AsmError::with_param(
            AsmErrorKind::Value,
            "unrecognized machine for architecture",
            &machine,
        )));
    }
    arch.set_var("mode_bits", objfmt.default_x86_mode_bits() as u64);

    let obj_filename = match &config.output {
        Some(path) => path.display().to_string(),
        None => resolve_obj_filename(&config.input, objfmt.extension()),
    };

    let source = SourceFile::load(&config.input).map_err(RunError::fatal)?;
    let source_lines = source.lines.clone();

    let mut diags = Diagnostics::new();
    diags.set_warning_error(config.warning_error);
    diags.set_suppress_warnings(config.suppress_warnings);

    let mut object = Object::new(&source.name, &obj_filename);
    if !objfmt.is_ok_object(&object, arch.as_ref()) {
        return Err(RunError::usage(AsmError::new(
            AsmErrorKind::Value,
            format!(
                "object format `{}` does not support machine `{}`",
                objfmt.keyword(),
                arch.machine()
            ),
        )));
    }

    objfmt.init_symbols(&mut object, parser.keyword());
    objfmt.add_default_section(&mut object);

    // Command-line symbol definitions.
    for def in &config.defines {
        let (name, value) = match def.split_once('=') {
            Some((n, v)) => (n, v.parse::<i64>().unwrap_or(1)),
            None => (def.as_str(), 1),
        };
        if let Err(err) = object
            .symbols
            .define_equ(name, Expr::int(value), Span::default())
        {
            diags.error(Span::default(), err);
        }
    }

    // Directive registration from every module.
    let mut dirs = Directives::new();
    arch.add_directives(&mut dirs, parser.keyword());
    parser.add_directives(&mut dirs, parser.keyword());
    objfmt.add_directives(&mut dirs, parser.keyword());
    dbgfmt.add_directives(&mut dirs, parser.keyword());
    if parser.keyword().eq_ignore_ascii_case("nasm") {
        dirs.add("global", DirHandler::Func(dir_global), DirFlags::IdRequired);
        dirs.add("extern", DirHandler::Func(dir_extern), DirFlags::IdRequired);
        dirs.add("common", DirHandler::Func(dir_common), DirFlags::IdRequired);
        dirs.add("static", DirHandler::Func(dir_static), DirFlags::IdRequired);
    }

    let fail = |diags: Diagnostics, lines: &[String]| RunError {
        error: AsmError::new(AsmErrorKind::Value, "errors were reported; no output written"),
        diagnostics: diags.diagnostics().to_vec(),
        source_lines: lines.to_vec(),
        usage: false,
    };

    // Parse.
    parser.parse(
        &source,
        &mut object,
        &dirs,
        arch.as_mut(),
        objfmt.as_mut(),
        &mut diags,
    );
    if config.dump == DumpTime::AfterParse {
        eprintln!("{}", object.dump_json());
    }
    if diags.has_errors() {
        return Err(fail(diags, &source_lines));
    }

    let input_dir = config
        .input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    resolve_incbin_paths(&mut object, &input_dir, &config.include_paths);

    // Finalize.
    object.finalize(false, arch.as_ref(), &mut diags);
    if config.dump == DumpTime::AfterFinalize {
        eprintln!("{}", object.dump_json());
    }
    if diags.has_errors() {
        return Err(fail(diags, &source_lines));
    }

    // Optimize.
    optimize(&mut object, &mut diags);
    if config.dump == DumpTime::AfterOptimize {
        eprintln!("{}", object.dump_json());
    }
    if diags.has_errors() {
        return Err(fail(diags, &source_lines));
    }

    // Debug info.
    dbgfmt.generate(&mut object, &mut diags);
    if diags.has_errors() {
        return Err(fail(diags, &source_lines));
    }

    // Output into memory; commit to disk only on a clean run.
    let all_syms = !config.dbgfmt_keyword.eq_ignore_ascii_case("null");
    let mut buffer: Vec<u8> = Vec::new();
    if let Err(err) = objfmt.output(
        &mut buffer,
        &mut object,
        all_syms,
        arch.as_ref(),
        &mut diags,
    ) {
        diags.error(Span::default(), err);
    }
    if config.dump == DumpTime::AfterOutput {
        eprintln!("{}", object.dump_json());
    }
    if diags.has_errors() {
        return Err(fail(diags, &source_lines));
    }
    std::fs::write(&obj_filename, &buffer).map_err(|err| {
        RunError::fatal(AsmError::new(
            AsmErrorKind::Io,
            format!("unable to write `{obj_filename}`: {err}"),
        ))
    })?;

    Ok(RunReport {
        obj_filename,
        diagnostics: diags.diagnostics().to_vec(),
        source_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_filename_derivation() {
        assert_eq!(resolve_obj_filename(Path::new("foo.asm"), ".o"), "foo.o");
        assert_eq!(
            resolve_obj_filename(Path::new("dir/foo.asm"), ".obj"),
            "foo.obj"
        );
        // Collision with the input name falls back.
        assert_eq!(resolve_obj_filename(Path::new("foo.o"), ".o"), "yasm.out");
        // Flat binary has no extension; "foo" would collide with "foo".
        assert_eq!(resolve_obj_filename(Path::new("foo"), ""), "yasm.out");
        assert_eq!(resolve_obj_filename(Path::new("foo.asm"), ""), "foo");
    }
}
