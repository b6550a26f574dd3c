// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Debug-format seam.
//!
//! Debug information generation runs between optimisation and object
//! output. Only the null format is built in; richer formats plug in
//! through the same trait.

use crate::core::diag::Diagnostics;
use crate::core::directive::Directives;
use crate::core::object::Object;

pub trait DebugFormat {
    fn keyword(&self) -> &'static str;

    fn add_directives(&self, _dirs: &mut Directives, _parser: &str) {}

    /// Generate debugging bytecodes/sections into the object.
    fn generate(&mut self, object: &mut Object, diags: &mut Diagnostics);
}

/// The no-op debug format.
pub struct NullDebug;

impl DebugFormat for NullDebug {
    fn keyword(&self) -> &'static str {
        "null"
    }

    fn generate(&mut self, _object: &mut Object, _diags: &mut Diagnostics) {}
}
