// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Driver-level tests: the file-to-file pipeline behind the CLI.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use relforge::assembler::{assemble, Config, DumpTime};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Unique temp path for one test artifact.
fn temp_path(suffix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    std::env::temp_dir().join(format!("relforge-test-{pid}-{nanos}-{counter}{suffix}"))
}

fn config(input: PathBuf, output: PathBuf, objfmt: &str) -> Config {
    Config {
        input,
        output: Some(output),
        arch_keyword: "x86".to_string(),
        parser_keyword: "nasm".to_string(),
        objfmt_keyword: objfmt.to_string(),
        dbgfmt_keyword: "null".to_string(),
        machine: None,
        include_paths: Vec::new(),
        defines: Vec::new(),
        warning_error: false,
        suppress_warnings: false,
        dump: DumpTime::Never,
    }
}

fn run_to_bytes(src: &str, objfmt: &str) -> Vec<u8> {
    let input = temp_path(".asm");
    let output = temp_path(".out");
    std::fs::write(&input, src).expect("write input");
    let report = assemble(&config(input.clone(), output.clone(), objfmt))
        .unwrap_or_else(|e| panic!("assembly failed: {}", e.error));
    let bytes = std::fs::read(&report.obj_filename).expect("read output");
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
    bytes
}

#[test]
fn short_jump_program_through_the_driver() {
    let bytes = run_to_bytes("bits 32\nstart: nop\njmp start\n", "bin");
    assert_eq!(bytes, vec![0x90, 0xeb, 0xfd]);
}

#[test]
fn failed_assembly_writes_no_output() {
    let input = temp_path(".asm");
    let output = temp_path(".out");
    std::fs::write(&input, "dd nowhere\n").expect("write input");
    let err = assemble(&config(input.clone(), output.clone(), "bin"))
        .err()
        .expect("assembly should fail");
    assert!(err
        .diagnostics
        .iter()
        .any(|d| d.error.message().contains("undefined symbol")));
    assert!(!output.exists(), "output file must not be committed");
    let _ = std::fs::remove_file(&input);
}

#[test]
fn coff_runs_are_byte_identical_under_test_suite_env() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    std::env::set_var("YASM_TEST_SUITE", "1");
    let a = run_to_bytes("bits 32\nret\n", "coff");
    let b = run_to_bytes("bits 32\nret\n", "coff");
    std::env::remove_var("YASM_TEST_SUITE");
    assert_eq!(a, b);
}

#[test]
fn incbin_resolves_through_include_paths() {
    let dir = temp_path("-incdir");
    std::fs::create_dir_all(&dir).expect("create include dir");
    std::fs::write(dir.join("blob.bin"), [0xde, 0xad]).expect("write blob");

    let input = temp_path(".asm");
    let output = temp_path(".out");
    std::fs::write(&input, "incbin \"blob.bin\"\ndb 0x99\n").expect("write input");

    let mut cfg = config(input.clone(), output.clone(), "bin");
    cfg.include_paths.push(dir.clone());
    let report = assemble(&cfg).unwrap_or_else(|e| panic!("assembly failed: {}", e.error));
    let bytes = std::fs::read(&report.obj_filename).expect("read output");
    assert_eq!(bytes, vec![0xde, 0xad, 0x99]);

    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn command_line_defines_become_symbols() {
    let input = temp_path(".asm");
    let output = temp_path(".out");
    std::fs::write(&input, "db FOO\n").expect("write input");
    let mut cfg = config(input.clone(), output.clone(), "bin");
    cfg.defines.push("FOO=65".to_string());
    let report = assemble(&cfg).unwrap_or_else(|e| panic!("assembly failed: {}", e.error));
    let bytes = std::fs::read(&report.obj_filename).expect("read output");
    assert_eq!(bytes, vec![65]);
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
}

#[test]
fn unknown_format_is_a_usage_error() {
    let input = temp_path(".asm");
    std::fs::write(&input, "ret\n").expect("write input");
    let err = assemble(&config(input.clone(), temp_path(".out"), "macho64"))
        .err()
        .expect("should fail");
    assert!(err.usage);
    let _ = std::fs::remove_file(&input);
}
