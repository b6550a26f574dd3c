// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Per-backend associated data.
//!
//! Object-format backends attach format-specific state (section flags,
//! symbol table indices, …) to sections and symbols. The side table is
//! keyed by the blob's concrete type, so backends stay decoupled from the
//! core and from each other; the owning entity owns the blob.

use std::any::{Any, TypeId};
use std::collections::HashMap;

#[derive(Default)]
pub struct AssocTable {
    map: HashMap<TypeId, Box<dyn Any>>,
}

impl AssocTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any>(&mut self, data: T) {
        self.map.insert(TypeId::of::<T>(), Box::new(data));
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    pub fn get_or_insert_with<T: Any>(&mut self, default: impl FnOnce() -> T) -> &mut T {
        self.map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(default()))
            .downcast_mut::<T>()
            .expect("assoc table entry has the keyed type")
    }
}

impl std::fmt::Debug for AssocTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssocTable")
            .field("entries", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct SectionFlags(u32);

    #[test]
    fn round_trip_by_type() {
        let mut table = AssocTable::new();
        assert!(table.get::<SectionFlags>().is_none());
        table.insert(SectionFlags(0x60));
        assert_eq!(table.get::<SectionFlags>(), Some(&SectionFlags(0x60)));
        table.get_mut::<SectionFlags>().unwrap().0 |= 0x02;
        assert_eq!(table.get::<SectionFlags>(), Some(&SectionFlags(0x62)));
    }

    #[test]
    fn get_or_insert_with_creates_once() {
        let mut table = AssocTable::new();
        table.get_or_insert_with(|| SectionFlags(1)).0 += 1;
        table.get_or_insert_with(|| SectionFlags(100)).0 += 1;
        assert_eq!(table.get::<SectionFlags>(), Some(&SectionFlags(3)));
    }
}
