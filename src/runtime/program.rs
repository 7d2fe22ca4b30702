//! The immutable snapshot of an attached graph that the processor runs.
//!
//! All persistent state lives in one contiguous block. Every attached
//! schematic owns a region laid out as `[unit state][group slots][child
//! regions]`, so a region can be located from its parent with
//! [`RegionLayout::value_ptr`].

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tracing::warn;

use crate::dsl::ast::ValueKind;
use crate::jit::CompiledUnit;

use super::graph::{ControlKey, Graph, SchematicKey};
use super::value::{align_up, slot_size, ControlValue, SLOT_ALIGN};

#[derive(Debug)]
pub(crate) struct UnitEntry {
    pub runtime_id: u64,
    pub unit: Arc<CompiledUnit>,
    /// Absolute offsets into the state block.
    pub state_offset: usize,
    pub control_offsets: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupSlot {
    pub id: u64,
    pub kind: ValueKind,
    pub offset: usize,
    pub initial: ControlValue,
}

/// Placement of one schematic's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    /// Runtime id of the enclosing schematic; `None` for the root.
    pub parent: Option<u64>,
    /// Relative to the parent region.
    pub offset: usize,
    pub size: usize,
}

impl RegionLayout {
    /// Address of this region given the address of its parent's region.
    pub fn value_ptr(&self, parent: *mut u8) -> *mut u8 {
        parent.wrapping_add(self.offset)
    }
}

#[derive(Debug, Default)]
pub struct Program {
    /// In execution order.
    pub(crate) units: Vec<UnitEntry>,
    pub(crate) groups: Vec<GroupSlot>,
    group_index: HashMap<u64, usize>,
    regions: HashMap<u64, RegionLayout>,
    state_size: usize,
}

impl Program {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Lay out every attached schematic of `graph` and schedule its units.
    pub fn build(graph: &Graph) -> Self {
        let mut layout = Layout {
            graph,
            program: Program::default(),
            slots: HashMap::new(),
        };
        let root = graph.root();
        if graph.schematic(root).is_some_and(|s| s.runtime_id() != 0) {
            layout.program.state_size = layout.region(root, 0, None, 0);
        }
        let mut program = layout.program;
        program.schedule();
        program.group_index = program
            .groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.id, i))
            .collect();
        program
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn region(&self, runtime_id: u64) -> Option<RegionLayout> {
        self.regions.get(&runtime_id).copied()
    }

    /// Offset of a region from the start of the state block.
    pub fn region_offset(&self, runtime_id: u64) -> Option<usize> {
        let mut region = self.region(runtime_id)?;
        let mut offset = region.offset;
        while let Some(parent) = region.parent {
            region = self.region(parent)?;
            offset += region.offset;
        }
        Some(offset)
    }

    /// Runtime ids of the units in execution order.
    pub fn schedule_order(&self) -> Vec<u64> {
        self.units.iter().map(|u| u.runtime_id).collect()
    }

    pub fn group_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.groups.iter().map(|g| g.id)
    }

    pub(crate) fn group(&self, id: u64) -> Option<&GroupSlot> {
        self.group_index.get(&id).map(|i| &self.groups[*i])
    }

    pub(crate) fn group_position(&self, id: u64) -> Option<usize> {
        self.group_index.get(&id).copied()
    }

    /// Order units so that writers of a group run before its readers.
    /// Cycles keep tree order and read last frame's value.
    fn schedule(&mut self) {
        let n = self.units.len();
        let mut reads = Vec::with_capacity(n);
        let mut writes = Vec::with_capacity(n);
        for entry in &self.units {
            let mut r = Vec::new();
            let mut w = Vec::new();
            for (meta, offset) in entry.unit.controls().iter().zip(&entry.control_offsets) {
                if meta.read {
                    r.push(*offset);
                }
                if meta.written {
                    w.push(*offset);
                }
            }
            reads.push(r);
            writes.push(w);
        }

        let mut dag = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..n).map(|i| dag.add_node(i)).collect();
        for i in 0..n {
            for j in 0..n {
                if i != j && writes[i].iter().any(|o| reads[j].contains(o)) {
                    dag.add_edge(nodes[i], nodes[j], ());
                }
            }
        }

        let order: Vec<usize> = match toposort(&dag, None) {
            Ok(order) => order.into_iter().map(|ix| dag[ix]).collect(),
            Err(cycle) => {
                let unit = self.units[dag[cycle.node_id()]].runtime_id;
                warn!(unit, "feedback cycle between units, using tree order");
                (0..n).collect()
            }
        };

        let mut units: Vec<Option<UnitEntry>> = self.units.drain(..).map(Some).collect();
        self.units = order.into_iter().filter_map(|i| units[i].take()).collect();
    }
}

struct Layout<'g> {
    graph: &'g Graph,
    program: Program,
    /// Slot offset of every control placed so far.
    slots: HashMap<ControlKey, usize>,
}

impl Layout<'_> {
    /// Place the region of `key` at absolute offset `base`; returns its size.
    fn region(&mut self, key: SchematicKey, base: usize, parent: Option<u64>, relative: usize) -> usize {
        let graph = self.graph;
        let Some(schematic) = graph.schematic(key) else {
            return 0;
        };
        let mut cursor = 0;

        if let Some(unit) = schematic.unit() {
            let offsets: Option<Vec<usize>> = schematic
                .controls()
                .iter()
                .map(|c| self.slots.get(c).copied())
                .collect();
            match offsets {
                Some(control_offsets) if control_offsets.len() == unit.controls().len() => {
                    self.program.units.push(UnitEntry {
                        runtime_id: schematic.runtime_id(),
                        unit: unit.clone(),
                        state_offset: base,
                        control_offsets,
                    });
                    cursor += align_up(unit.state_size() as usize, SLOT_ALIGN);
                }
                _ => warn!(schematic = schematic.name(), "controls out of sync with unit, skipping"),
            }
        }

        if schematic.kind().is_container() {
            for group in graph.groups(key) {
                let offset = base + cursor;
                cursor += slot_size(group.kind);
                for member in &group.members {
                    self.slots.insert(*member, offset);
                }
                let initial = graph
                    .control(group.members[0])
                    .map_or(ControlValue::default_for(group.kind), |c| c.value());
                self.program.groups.push(GroupSlot {
                    id: group.id,
                    kind: group.kind,
                    offset,
                    initial,
                });
            }
            for child in schematic.children() {
                let attached = graph
                    .schematic(*child)
                    .is_some_and(|s| s.runtime_id() != 0);
                if attached {
                    cursor += self.region(*child, base + cursor, Some(schematic.runtime_id()), cursor);
                }
            }
        }

        self.program.regions.insert(
            schematic.runtime_id(),
            RegionLayout {
                parent,
                offset: relative,
                size: cursor,
            },
        );
        cursor
    }
}
