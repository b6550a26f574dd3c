// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Alignment fill patterns.
//!
//! Indexed by pad length 1..=15; entry 0 is empty. Three 32/64-bit tables:
//! the basic table uses short jumps over 0x90 runs past 8 bytes, while the
//! Intel and AMD tables use the multi-byte 0F 1F nop forms those vendors
//! recommend. 64-bit mode defaults to the Intel table.

use super::NopFormat;

static FILL16: [&[u8]; 16] = [
    &[],
    &[0x90],                                                 // nop
    &[0x89, 0xf6],                                           // mov si, si
    &[0x8d, 0x74, 0x00],                                     // lea si, [si+byte 0]
    &[0x8d, 0xb4, 0x00, 0x00],                               // lea si, [si+word 0]
    &[0x90, 0x8d, 0xb4, 0x00, 0x00],
    &[0x89, 0xf6, 0x8d, 0xbd, 0x00, 0x00],
    &[0x8d, 0x74, 0x00, 0x8d, 0xbd, 0x00, 0x00],
    &[0x8d, 0xb4, 0x00, 0x00, 0x8d, 0xbd, 0x00, 0x00],
    &[0xeb, 0x07, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90], // jmp $+9; nop fill
    &[0xeb, 0x08, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x09, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x0a, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x0b, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x0c, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x0d, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
];

static FILL32: [&[u8]; 16] = [
    &[],
    &[0x90],                                           // nop
    &[0x66, 0x90],                                     // xchg ax, ax (o16 nop)
    &[0x8d, 0x76, 0x00],                               // lea esi, [esi+byte 0]
    &[0x8d, 0x74, 0x26, 0x00],                         // lea esi, [esi*1+byte 0]
    &[0x90, 0x8d, 0x74, 0x26, 0x00],
    &[0x8d, 0xb6, 0x00, 0x00, 0x00, 0x00],             // lea esi, [esi+dword 0]
    &[0x8d, 0xb4, 0x26, 0x00, 0x00, 0x00, 0x00],
    &[0x90, 0x8d, 0xb4, 0x26, 0x00, 0x00, 0x00, 0x00],
    &[0xeb, 0x07, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90], // jmp $+9; nop fill
    &[0xeb, 0x08, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x09, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x0a, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x0b, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x0c, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
    &[0xeb, 0x0d, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90],
];

static FILL32_INTEL: [&[u8]; 16] = [
    &[],
    &[0x90],
    &[0x66, 0x90],
    &[0x0f, 0x1f, 0x00],                               // nop(3)
    &[0x0f, 0x1f, 0x40, 0x00],                         // nop(4)
    &[0x0f, 0x1f, 0x44, 0x00, 0x00],                   // nop(5)
    &[0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00],             // nop(6)
    &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00],       // nop(7)
    &[0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00], // nop(8)
    &[0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00], // o16; cs; nop
    &[0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

static FILL32_AMD: [&[u8]; 16] = [
    &[],
    &[0x90],
    &[0x66, 0x90],
    &[0x0f, 0x1f, 0x00],
    &[0x0f, 0x1f, 0x40, 0x00],
    &[0x0f, 0x1f, 0x44, 0x00, 0x00],
    &[0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00],
    &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00], // nop(10)
    &[0x0f, 0x1f, 0x44, 0x00, 0x00, 0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00], // nop(5); nop(6)
    &[0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00, 0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00], // nop(6); nop(6)
    &[0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00, 0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00], // nop(6); nop(7)
    &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00, 0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00], // nop(7); nop(7)
    &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00], // nop(7); nop(8)
];

pub fn fill_table(mode_bits: u32, nop: NopFormat) -> &'static [&'static [u8]; 16] {
    match mode_bits {
        16 => &FILL16,
        32 => match nop {
            NopFormat::Intel => &FILL32_INTEL,
            NopFormat::Amd => &FILL32_AMD,
            NopFormat::Basic => &FILL32,
        },
        // Long nops are always available in 64-bit mode; Intel forms are
        // the default unless AMD is requested.
        _ => match nop {
            NopFormat::Amd => &FILL32_AMD,
            _ => &FILL32_INTEL,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_entry_length_matches_its_index() {
        for table in [&FILL16, &FILL32, &FILL32_INTEL, &FILL32_AMD] {
            for (i, pattern) in table.iter().enumerate() {
                assert_eq!(pattern.len(), i);
            }
        }
    }

    #[test]
    fn mode16_gets_short_form_table() {
        assert_eq!(fill_table(16, NopFormat::Intel)[2], &[0x89, 0xf6][..]);
    }
}
