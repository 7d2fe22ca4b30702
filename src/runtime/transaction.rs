//! Batches of linked units waiting to be swapped in.

use std::sync::Arc;

use crate::dsl::error::CompileError;
use crate::jit::CompiledUnit;

use super::graph::SchematicKey;

#[derive(Debug)]
pub(crate) struct Entry {
    pub schematic: SchematicKey,
    /// Source generation the unit was built from.
    pub generation: u64,
    pub result: Result<Arc<CompiledUnit>, CompileError>,
}

/// An in-flight compilation.
///
/// Nothing in a transaction is visible to the processor until it is
/// committed. Entries whose schematic was edited in the meantime are
/// discarded at commit.
#[derive(Debug, Default)]
pub struct Transaction {
    pub(crate) entries: Vec<Entry>,
    /// Schematics that received a runtime id while building.
    pub(crate) attached: Vec<SchematicKey>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(
        &mut self,
        schematic: SchematicKey,
        generation: u64,
        result: Result<Arc<CompiledUnit>, CompileError>,
    ) {
        self.entries.retain(|e| e.schematic != schematic);
        self.entries.push(Entry {
            schematic,
            generation,
            result,
        });
    }

    pub fn contains(&self, schematic: SchematicKey) -> bool {
        self.entries.iter().any(|e| e.schematic == schematic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of committing a [`Transaction`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CompileReport {
    pub linked: Vec<SchematicKey>,
    pub failed: Vec<(SchematicKey, CompileError)>,
    /// Edited again after the build; still dirty.
    pub superseded: Vec<SchematicKey>,
}

impl CompileReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}
