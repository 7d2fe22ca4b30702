//! The editable schematic tree.
//!
//! A [`Graph`] owns schematics, their controls and the connections between
//! them. Editing code stages a compiled unit immediately; linking and
//! publication are driven by [`crate::runtime::Runtime`].

use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};
use thiserror::Error;
use tracing::debug;

use crate::codegen::{self, ControlMeta, UnitCode};
use crate::dsl::ast::{Block, ValueKind};
use crate::dsl::diff::structurally_equal;
use crate::dsl::error::CompileError;
use crate::dsl::Compiler;
use crate::jit::{CompiledUnit, Linker};
use crate::library::Library;

use super::transaction::Transaction;
use super::value::ControlValue;

new_key_type! { pub struct SchematicKey; }
new_key_type! { pub struct ControlKey; }
new_key_type! { pub struct ConnectionKey; }

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown schematic")]
    UnknownSchematic,
    #[error("unknown control")]
    UnknownControl,
    #[error("unknown connection")]
    UnknownConnection,
    #[error("schematic '{0}' cannot contain other schematics")]
    NotAContainer(String),
    #[error("schematic '{0}' has no code")]
    NoCode(String),
    #[error("the root schematic cannot be removed")]
    RemoveRoot,
    #[error("only controls of sibling schematics can be connected")]
    NotSiblings,
    #[error("cannot connect a {first} control to a {second} control")]
    KindMismatch { first: ValueKind, second: ValueKind },
    #[error("controls are already connected")]
    AlreadyConnected,
    #[error(transparent)]
    Compile(#[from] CompileError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchematicKind {
    Root,
    Group,
    Custom,
}

impl SchematicKind {
    pub fn is_container(self) -> bool {
        matches!(self, SchematicKind::Root | SchematicKind::Group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unattached,
    Compiling,
    Running,
    /// The latest edit failed to compile or link; the previous unit keeps running.
    Stale,
}

#[derive(Debug, Default)]
struct SourceState {
    text: String,
    /// Bumped by every edit that changes the program.
    generation: u64,
    ast: Option<Block>,
    /// Compiled but not yet linked.
    staged: Option<UnitCode>,
    error: Option<CompileError>,
}

#[derive(Debug)]
pub struct Schematic {
    name: String,
    kind: SchematicKind,
    parent: Option<SchematicKey>,
    children: Vec<SchematicKey>,
    runtime_id: u64,
    status: Status,
    unit: Option<Arc<CompiledUnit>>,
    /// In unit control order.
    controls: Vec<ControlKey>,
    source: SourceState,
}

impl Schematic {
    fn new(name: &str, kind: SchematicKind, parent: Option<SchematicKey>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            parent,
            children: Vec::new(),
            runtime_id: 0,
            status: Status::Unattached,
            unit: None,
            controls: Vec::new(),
            source: SourceState::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SchematicKind {
        self.kind
    }

    pub fn parent(&self) -> Option<SchematicKey> {
        self.parent
    }

    pub fn children(&self) -> &[SchematicKey] {
        &self.children
    }

    /// `0` while detached.
    pub fn runtime_id(&self) -> u64 {
        self.runtime_id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn unit(&self) -> Option<&Arc<CompiledUnit>> {
        self.unit.as_ref()
    }

    pub fn controls(&self) -> &[ControlKey] {
        &self.controls
    }

    pub fn source(&self) -> &str {
        &self.source.text
    }

    pub fn generation(&self) -> u64 {
        self.source.generation
    }

    pub fn staged(&self) -> Option<&UnitCode> {
        self.source.staged.as_ref()
    }

    /// Diagnostic from the latest edit, if it failed.
    pub fn error(&self) -> Option<&CompileError> {
        self.source.error.as_ref()
    }

    /// Attached with staged code waiting to be linked.
    pub fn is_dirty(&self) -> bool {
        self.runtime_id != 0 && self.source.staged.is_some()
    }
}

#[derive(Debug)]
pub struct Control {
    /// Stable across renames. Group ids are derived from it.
    id: u64,
    schematic: SchematicKey,
    name: String,
    kind: ValueKind,
    read: bool,
    written: bool,
    value: ControlValue,
}

impl Control {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn schematic(&self) -> SchematicKey {
        self.schematic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Last value seen by the host.
    pub fn value(&self) -> ControlValue {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub a: ControlKey,
    pub b: ControlKey,
}

impl Connection {
    fn touches(&self, control: ControlKey) -> bool {
        self.a == control || self.b == control
    }
}

/// Controls joined by connections. They share one value slot in the
/// enclosing container's region.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlGroup {
    /// The smallest member control id.
    pub id: u64,
    pub kind: ValueKind,
    pub members: Vec<ControlKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    SchematicAdded(SchematicKey),
    SchematicRemoved(SchematicKey),
    ControlAdded(ControlKey),
    ControlRemoved(ControlKey),
    ControlRenamed {
        control: ControlKey,
        from: String,
        to: String,
    },
    ConnectionAdded(ConnectionKey),
    ConnectionRemoved(ConnectionKey),
    CodeCompiled(SchematicKey),
    CodeFailed {
        schematic: SchematicKey,
        error: CompileError,
    },
}

#[derive(Debug)]
pub struct Graph {
    library: Arc<Library>,
    root: SchematicKey,
    schematics: SlotMap<SchematicKey, Schematic>,
    controls: SlotMap<ControlKey, Control>,
    connections: SlotMap<ConnectionKey, Connection>,
    events: Vec<GraphEvent>,
    next_control_id: u64,
    layout_dirty: bool,
}

impl Graph {
    pub fn new(library: Arc<Library>) -> Self {
        let mut schematics = SlotMap::with_key();
        let root = schematics.insert(Schematic::new("root", SchematicKind::Root, None));
        Self {
            library,
            root,
            schematics,
            controls: SlotMap::with_key(),
            connections: SlotMap::with_key(),
            events: Vec::new(),
            next_control_id: 1,
            layout_dirty: true,
        }
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn root(&self) -> SchematicKey {
        self.root
    }

    pub fn schematic(&self, key: SchematicKey) -> Option<&Schematic> {
        self.schematics.get(key)
    }

    pub fn control(&self, key: ControlKey) -> Option<&Control> {
        self.controls.get(key)
    }

    pub fn connection(&self, key: ConnectionKey) -> Option<&Connection> {
        self.connections.get(key)
    }

    pub fn connections(&self) -> impl Iterator<Item = (ConnectionKey, &Connection)> {
        self.connections.iter()
    }

    pub fn is_attached(&self) -> bool {
        self.schematics[self.root].runtime_id != 0
    }

    /// Child of `parent` called `name`.
    pub fn find(&self, parent: SchematicKey, name: &str) -> Option<SchematicKey> {
        let parent = self.schematics.get(parent)?;
        parent
            .children
            .iter()
            .copied()
            .find(|k| self.schematics[*k].name == name)
    }

    pub fn control_named(&self, schematic: SchematicKey, name: &str) -> Option<ControlKey> {
        let schematic = self.schematics.get(schematic)?;
        schematic
            .controls
            .iter()
            .copied()
            .find(|k| self.controls[*k].name == name)
    }

    /// `key` and its descendants, children before parents.
    pub fn post_order(&self, key: SchematicKey) -> Vec<SchematicKey> {
        let mut out = Vec::new();
        self.collect_post_order(key, &mut out);
        out
    }

    fn collect_post_order(&self, key: SchematicKey, out: &mut Vec<SchematicKey>) {
        if let Some(schematic) = self.schematics.get(key) {
            for child in &schematic.children {
                self.collect_post_order(*child, out);
            }
            out.push(key);
        }
    }

    pub fn drain_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether the memory layout changed since the last publication.
    pub fn layout_dirty(&self) -> bool {
        self.layout_dirty
    }

    pub(crate) fn clear_layout_dirty(&mut self) {
        self.layout_dirty = false;
    }

    fn add(
        &mut self,
        parent: SchematicKey,
        name: &str,
        kind: SchematicKind,
    ) -> Result<SchematicKey, GraphError> {
        let container = self
            .schematics
            .get(parent)
            .ok_or(GraphError::UnknownSchematic)?;
        if !container.kind.is_container() {
            return Err(GraphError::NotAContainer(container.name.clone()));
        }
        let key = self.schematics.insert(Schematic::new(name, kind, Some(parent)));
        self.schematics[parent].children.push(key);
        self.events.push(GraphEvent::SchematicAdded(key));
        self.layout_dirty = true;
        Ok(key)
    }

    /// Add a nested container.
    pub fn add_group(&mut self, parent: SchematicKey, name: &str) -> Result<SchematicKey, GraphError> {
        self.add(parent, name, SchematicKind::Group)
    }

    /// Add a node with code. The schematic is created even when its code
    /// fails to compile; the error is returned and kept on the schematic.
    pub fn add_custom(
        &mut self,
        parent: SchematicKey,
        name: &str,
        source: &str,
    ) -> Result<SchematicKey, GraphError> {
        let key = self.add(parent, name, SchematicKind::Custom)?;
        self.set_code(key, source)?;
        Ok(key)
    }

    /// Replace the code of a custom schematic and compile it to IR.
    ///
    /// On failure the running unit is kept and the schematic becomes stale.
    /// Edits that leave the syntax tree unchanged only update the text.
    pub fn set_code(&mut self, key: SchematicKey, source: &str) -> Result<(), GraphError> {
        let schematic = self
            .schematics
            .get_mut(key)
            .ok_or(GraphError::UnknownSchematic)?;
        if schematic.kind != SchematicKind::Custom {
            return Err(GraphError::NoCode(schematic.name.clone()));
        }

        let parsed = Compiler::parse(source);
        if let (Ok(new), Some(old), None) = (&parsed, &schematic.source.ast, &schematic.source.error) {
            if schematic.source.generation > 0 && structurally_equal(new, old) {
                schematic.source.text = source.to_string();
                return Ok(());
            }
        }

        schematic.source.text = source.to_string();
        schematic.source.generation += 1;
        let result = parsed.and_then(|ast| {
            let code = codegen::generate_unit(&ast, &self.library);
            schematic.source.ast = Some(ast);
            code
        });

        match result {
            Ok(code) => {
                debug!(
                    schematic = %schematic.name,
                    generation = schematic.source.generation,
                    "staged unit"
                );
                schematic.source.error = None;
                let metas = code.controls.clone();
                schematic.source.staged = Some(code);
                if schematic.runtime_id == 0 {
                    self.reconcile(key, &metas);
                }
                Ok(())
            }
            Err(error) => {
                debug!(schematic = %schematic.name, %error, "compile failed");
                schematic.source.staged = None;
                schematic.source.error = Some(error.clone());
                if schematic.unit.is_some() {
                    schematic.status = Status::Stale;
                }
                self.events.push(GraphEvent::CodeFailed {
                    schematic: key,
                    error: error.clone(),
                });
                Err(error.into())
            }
        }
    }

    /// Remove a schematic and everything below it.
    pub fn remove(&mut self, key: SchematicKey) -> Result<(), GraphError> {
        if key == self.root {
            return Err(GraphError::RemoveRoot);
        }
        let parent = self
            .schematics
            .get(key)
            .ok_or(GraphError::UnknownSchematic)?
            .parent;
        if let Some(parent) = parent.and_then(|p| self.schematics.get_mut(p)) {
            parent.children.retain(|c| *c != key);
        }
        for k in self.post_order(key) {
            let controls = self.schematics[k].controls.clone();
            for control in controls {
                self.remove_control(control);
            }
            self.schematics.remove(k);
            self.events.push(GraphEvent::SchematicRemoved(k));
        }
        self.layout_dirty = true;
        Ok(())
    }

    /// Join two controls of sibling schematics.
    pub fn connect(&mut self, a: ControlKey, b: ControlKey) -> Result<ConnectionKey, GraphError> {
        let ca = self.controls.get(a).ok_or(GraphError::UnknownControl)?;
        let cb = self.controls.get(b).ok_or(GraphError::UnknownControl)?;
        if ca.kind != cb.kind {
            return Err(GraphError::KindMismatch {
                first: ca.kind,
                second: cb.kind,
            });
        }
        let pa = self.schematics[ca.schematic].parent;
        let pb = self.schematics[cb.schematic].parent;
        if ca.schematic == cb.schematic || pa != pb {
            return Err(GraphError::NotSiblings);
        }
        if self
            .connections
            .values()
            .any(|c| c.touches(a) && c.touches(b))
        {
            return Err(GraphError::AlreadyConnected);
        }
        let key = self.connections.insert(Connection { a, b });
        self.events.push(GraphEvent::ConnectionAdded(key));
        self.layout_dirty = true;
        Ok(key)
    }

    pub fn disconnect(&mut self, key: ConnectionKey) -> Result<(), GraphError> {
        self.connections
            .remove(key)
            .ok_or(GraphError::UnknownConnection)?;
        self.events.push(GraphEvent::ConnectionRemoved(key));
        self.layout_dirty = true;
        Ok(())
    }

    fn remove_control(&mut self, key: ControlKey) {
        let dropped: Vec<ConnectionKey> = self
            .connections
            .iter()
            .filter(|(_, c)| c.touches(key))
            .map(|(k, _)| k)
            .collect();
        for connection in dropped {
            self.connections.remove(connection);
            self.events.push(GraphEvent::ConnectionRemoved(connection));
        }
        if let Some(control) = self.controls.remove(key) {
            if let Some(schematic) = self.schematics.get_mut(control.schematic) {
                schematic.controls.retain(|c| *c != key);
            }
            self.events.push(GraphEvent::ControlRemoved(key));
        }
    }

    /// Bring the controls of `key` in line with `metas`.
    ///
    /// Existing controls are matched by name and kind first. Unmatched new
    /// controls then take over unmatched old controls of the same kind, which
    /// keeps their connections across a rename. Leftovers are removed or
    /// created.
    pub(crate) fn reconcile(&mut self, key: SchematicKey, metas: &[ControlMeta]) {
        let mut unmatched = self.schematics[key].controls.clone();
        let mut slots: Vec<Option<ControlKey>> = vec![None; metas.len()];

        for (slot, meta) in slots.iter_mut().zip(metas) {
            let found = unmatched.iter().position(|k| {
                let c = &self.controls[*k];
                c.name == meta.name && c.kind == meta.kind
            });
            if let Some(pos) = found {
                *slot = Some(unmatched.remove(pos));
            }
        }

        for (slot, meta) in slots.iter_mut().zip(metas) {
            if slot.is_some() {
                continue;
            }
            let found = unmatched
                .iter()
                .position(|k| self.controls[*k].kind == meta.kind);
            if let Some(pos) = found {
                let control = unmatched.remove(pos);
                let from = std::mem::replace(&mut self.controls[control].name, meta.name.clone());
                self.events.push(GraphEvent::ControlRenamed {
                    control,
                    from,
                    to: meta.name.clone(),
                });
                *slot = Some(control);
            }
        }

        for control in unmatched {
            self.remove_control(control);
        }

        let mut controls = Vec::with_capacity(metas.len());
        for (slot, meta) in slots.into_iter().zip(metas) {
            let control = match slot {
                Some(control) => control,
                None => {
                    let id = self.next_control_id;
                    self.next_control_id += 1;
                    let control = self.controls.insert(Control {
                        id,
                        schematic: key,
                        name: meta.name.clone(),
                        kind: meta.kind,
                        read: false,
                        written: false,
                        value: ControlValue::default_for(meta.kind),
                    });
                    self.events.push(GraphEvent::ControlAdded(control));
                    control
                }
            };
            let c = &mut self.controls[control];
            c.read = meta.read;
            c.written = meta.written;
            controls.push(control);
        }

        let schematic = &mut self.schematics[key];
        if schematic.controls != controls {
            self.layout_dirty = true;
        }
        schematic.controls = controls;
    }

    /// The group containing `control`.
    pub fn group_of(&self, control: ControlKey) -> Result<ControlGroup, GraphError> {
        let c = self.controls.get(control).ok_or(GraphError::UnknownControl)?;
        let mut members = vec![control];
        let mut i = 0;
        while i < members.len() {
            let current = members[i];
            for connection in self.connections.values() {
                let other = if connection.a == current {
                    connection.b
                } else if connection.b == current {
                    connection.a
                } else {
                    continue;
                };
                if !members.contains(&other) {
                    members.push(other);
                }
            }
            i += 1;
        }
        members.sort_by_key(|k| self.controls[*k].id);
        Ok(ControlGroup {
            id: self.controls[members[0]].id,
            kind: c.kind,
            members,
        })
    }

    /// Groups formed by the controls of the children of `container`,
    /// ordered by id.
    pub fn groups(&self, container: SchematicKey) -> Vec<ControlGroup> {
        let mut groups: Vec<ControlGroup> = Vec::new();
        let Some(schematic) = self.schematics.get(container) else {
            return groups;
        };
        for child in &schematic.children {
            for control in &self.schematics[*child].controls {
                if groups.iter().any(|g| g.members.contains(control)) {
                    continue;
                }
                if let Ok(group) = self.group_of(*control) {
                    groups.push(group);
                }
            }
        }
        groups.sort_by_key(|g| g.id);
        groups
    }

    /// The group whose id is `id`, if its smallest member still exists.
    pub fn group_by_id(&self, id: u64) -> Option<ControlGroup> {
        let (key, _) = self.controls.iter().find(|(_, c)| c.id == id)?;
        self.group_of(key).ok().filter(|g| g.id == id)
    }

    pub(crate) fn set_cached_value(&mut self, control: ControlKey, value: ControlValue) {
        if let Some(c) = self.controls.get_mut(control) {
            c.value = value;
        }
    }

    /// Bind `key` and its descendants to a runtime. Newly attached custom
    /// schematics with staged code are linked into `tx`.
    pub fn attach_runtime(&mut self, key: SchematicKey, linker: &mut Linker, tx: &mut Transaction) {
        for k in self.post_order(key) {
            let schematic = &mut self.schematics[k];
            if schematic.runtime_id != 0 {
                continue;
            }
            schematic.runtime_id = linker.next_id();
            schematic.status = if schematic.kind.is_container() {
                Status::Running
            } else {
                Status::Unattached
            };
            tx.attached.push(k);
            self.layout_dirty = true;
            if schematic.source.staged.is_some() {
                self.link_into(k, linker, tx);
            }
        }
    }

    /// Link the staged code of `key` and record the result in `tx`.
    pub(crate) fn link_into(&mut self, key: SchematicKey, linker: &Linker, tx: &mut Transaction) {
        let schematic = &mut self.schematics[key];
        let Some(code) = &schematic.source.staged else {
            return;
        };
        let result = linker.link(code).map(Arc::new);
        schematic.status = Status::Compiling;
        tx.push(key, schematic.source.generation, result);
    }

    /// Swap a linked unit into place.
    pub(crate) fn promote(&mut self, key: SchematicKey, unit: Arc<CompiledUnit>) {
        let metas = unit.controls().to_vec();
        let schematic = &mut self.schematics[key];
        schematic.source.staged = None;
        schematic.status = Status::Running;
        schematic.unit = Some(unit);
        self.reconcile(key, &metas);
        self.layout_dirty = true;
        self.events.push(GraphEvent::CodeCompiled(key));
    }

    pub(crate) fn fail(&mut self, key: SchematicKey, error: CompileError) {
        let schematic = &mut self.schematics[key];
        schematic.source.staged = None;
        schematic.source.error = Some(error.clone());
        schematic.status = if schematic.unit.is_some() {
            Status::Stale
        } else {
            Status::Unattached
        };
        self.events.push(GraphEvent::CodeFailed {
            schematic: key,
            error,
        });
    }

    /// Forget all runtime state: ids return to `0`, units are dropped and
    /// code is staged again from source.
    pub(crate) fn reset_runtime(&mut self) {
        let keys: Vec<SchematicKey> = self.schematics.keys().collect();
        for key in keys {
            let schematic = &mut self.schematics[key];
            schematic.runtime_id = 0;
            schematic.status = Status::Unattached;
            schematic.unit = None;
            if schematic.kind == SchematicKind::Custom && schematic.source.error.is_none() {
                if let Some(ast) = &schematic.source.ast {
                    schematic.source.staged = codegen::generate_unit(ast, &self.library).ok();
                }
            }
        }
        self.layout_dirty = true;
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;

    fn graph() -> Graph {
        Graph::new(Arc::new(Library::standard()))
    }

    fn names(graph: &Graph, key: SchematicKey) -> Vec<String> {
        graph.schematic(key).unwrap()
            .controls()
            .iter()
            .map(|c| graph.control(*c).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn detached_code_is_compiled_not_linked() {
        let mut g = graph();
        let node = g.add_custom(g.root(), "amp", "out:num = in:num * 2").unwrap();
        let s = g.schematic(node).unwrap();
        assert_eq!(s.runtime_id(), 0);
        assert!(s.staged().is_some());
        assert!(s.unit().is_none());
        assert!(!s.is_dirty());
        assert_eq!(names(&g, node), vec!["in", "out"]);
    }

    #[test]
    fn failed_edit_keeps_diagnostic() {
        let mut g = graph();
        let node = g.add_custom(g.root(), "n", "out:num = 1").unwrap();
        let err = g.set_code(node, "out:num = bogus(1)").unwrap_err();
        match err {
            GraphError::Compile(e) => {
                assert_eq!(e.kind, ErrorKind::UndefinedFunction { name: "bogus".into() });
                assert_eq!(e.range.start.column, 11);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(g.schematic(node).unwrap().error().is_some());
        assert_eq!(names(&g, node), vec!["out"]);
    }

    #[test]
    fn whitespace_edit_does_not_bump_generation() {
        let mut g = graph();
        let node = g.add_custom(g.root(), "n", "out:num = 1").unwrap();
        let generation = g.schematic(node).unwrap().generation();
        g.set_code(node, "out:num   =   1  # same").unwrap();
        let s = g.schematic(node).unwrap();
        assert_eq!(s.generation(), generation);
        assert_eq!(s.source(), "out:num   =   1  # same");
        g.set_code(node, "out:num = 2").unwrap();
        assert_eq!(g.schematic(node).unwrap().generation(), generation + 1);
    }

    #[test]
    fn rename_keeps_connections() {
        let mut g = graph();
        let root = g.root();
        let a = g.add_custom(root, "a", "out:num = 1").unwrap();
        let b = g.add_custom(root, "b", "y:num = in:num").unwrap();
        let out = g.control_named(a, "out").unwrap();
        let input = g.control_named(b, "in").unwrap();
        let wire = g.connect(out, input).unwrap();
        g.drain_events();

        g.set_code(a, "signal:num = 1").unwrap();
        assert_eq!(g.control_named(a, "signal"), Some(out));
        assert!(g.connection(wire).is_some());
        assert!(g.drain_events().contains(&GraphEvent::ControlRenamed {
            control: out,
            from: "out".into(),
            to: "signal".into(),
        }));
    }

    #[test]
    fn removed_controls_drop_connections() {
        let mut g = graph();
        let root = g.root();
        let a = g.add_custom(root, "a", "out:num = 1").unwrap();
        let b = g.add_custom(root, "b", "y:num = in:num").unwrap();
        let wire = g
            .connect(g.control_named(a, "out").unwrap(), g.control_named(b, "in").unwrap())
            .unwrap();
        g.set_code(a, "k:midi = k:midi").unwrap();
        assert!(g.connection(wire).is_none());
        assert_eq!(names(&g, a), vec!["k"]);
    }

    #[test]
    fn connect_checks_kinds_and_siblings() {
        let mut g = graph();
        let root = g.root();
        let a = g.add_custom(root, "a", "out:num = 1").unwrap();
        let b = g.add_custom(root, "b", "m:midi = m:midi").unwrap();
        let inner = g.add_group(root, "inner").unwrap();
        let c = g.add_custom(inner, "c", "x:num = 0").unwrap();
        let out = g.control_named(a, "out").unwrap();
        assert!(matches!(
            g.connect(out, g.control_named(b, "m").unwrap()),
            Err(GraphError::KindMismatch { .. })
        ));
        assert!(matches!(
            g.connect(out, g.control_named(c, "x").unwrap()),
            Err(GraphError::NotSiblings)
        ));
        assert!(matches!(
            g.add_custom(a, "nested", "1"),
            Err(GraphError::NotAContainer(_))
        ));
    }

    #[test]
    fn groups_take_smallest_member_id() {
        let mut g = graph();
        let root = g.root();
        let a = g.add_custom(root, "a", "out:num = 1").unwrap();
        let b = g.add_custom(root, "b", "y:num = in:num").unwrap();
        let c = g.add_custom(root, "c", "z:num = in:num").unwrap();
        let out = g.control_named(a, "out").unwrap();
        let b_in = g.control_named(b, "in").unwrap();
        let c_in = g.control_named(c, "in").unwrap();
        g.connect(b_in, out).unwrap();
        g.connect(c_in, b_in).unwrap();

        let group = g.group_of(c_in).unwrap();
        assert_eq!(group.id, g.control(out).unwrap().id());
        assert_eq!(group.members, vec![out, b_in, c_in]);
        // out/in chain plus the two unconnected outputs.
        assert_eq!(g.groups(root).len(), 3);
    }

    #[test]
    fn remove_drops_subtree() {
        let mut g = graph();
        let root = g.root();
        let inner = g.add_group(root, "inner").unwrap();
        let node = g.add_custom(inner, "n", "out:num = 1").unwrap();
        let out = g.control_named(node, "out").unwrap();
        g.remove(inner).unwrap();
        assert!(g.schematic(node).is_none());
        assert!(g.control(out).is_none());
        assert!(g.schematic(root).unwrap().children().is_empty());
        assert!(matches!(g.remove(root), Err(GraphError::RemoveRoot)));
    }
}
