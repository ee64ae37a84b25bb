// Graph lookups for validation: classes, members, inheritance, modules

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::index::{EdgeKind, GraphEdge, GraphNode, GraphStore, NameMatch, NodeKind};
use crate::indexer::model::Parameter;

/// Bases that contribute no members worth checking
const TRIVIAL_BASES: &[&str] = &[
    "object",
    "ABC",
    "abc.ABC",
    "Generic",
    "typing.Generic",
    "Protocol",
    "typing.Protocol",
    "typing_extensions.Protocol",
];

/// How deep re-export chains (`from .impl import X` in `__init__`) are followed
const MAX_REEXPORT_DEPTH: usize = 4;

/// A member found on a class or one of its ancestors
#[derive(Debug, Clone)]
pub struct MemberMatch {
    pub member: GraphNode,
    /// Class that defines the member
    pub owner: GraphNode,
    pub inherited: bool,
}

impl MemberMatch {
    pub fn parameters(&self) -> Vec<Parameter> {
        parameters_of(&self.member)
    }

    pub fn is_callable(&self) -> bool {
        self.member.kind == NodeKind::Method
    }
}

/// Ancestors of a class in resolution order
#[derive(Debug, Clone, Default)]
pub struct Ancestry {
    pub classes: Vec<GraphNode>,
    /// Bases that are not present in any selected repository
    pub unresolved: Vec<String>,
    pub cycle: bool,
    pub truncated: bool,
}

impl Ancestry {
    /// Whether every base along the chain is known to the graph
    pub fn is_closed(&self) -> bool {
        self.unresolved.is_empty() && !self.truncated
    }
}

/// Result of a member search along the inheritance chain
#[derive(Debug, Clone)]
pub struct MemberResolution {
    pub found: Option<MemberMatch>,
    pub ancestry: Ancestry,
}

/// What a `from module import symbol` binds
#[derive(Debug, Clone)]
pub enum SymbolMatch {
    Class(GraphNode),
    Function(GraphNode),
    Global(GraphNode),
    Submodule(GraphNode),
    /// Bound in the module through one of its own imports
    ReExport(GraphEdge),
}

/// Read-only query engine over a set of repositories
pub struct QueryEngine {
    store: Arc<dyn GraphStore>,
    repositories: Vec<String>,
    max_inheritance_depth: usize,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn GraphStore>, repositories: Vec<String>, max_inheritance_depth: usize) -> Self {
        Self {
            store,
            repositories,
            max_inheritance_depth,
        }
    }

    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    /// Resolve a dotted or simple class name across the selected repositories
    pub fn resolve_class(&self, name: &str) -> Result<Option<GraphNode>> {
        self.resolve_class_at_depth(name, 0)
    }

    fn resolve_class_at_depth(&self, name: &str, depth: usize) -> Result<Option<GraphNode>> {
        if name.is_empty() {
            return Ok(None);
        }

        let exact = self.find(NodeKind::Class, NameMatch::Qualified(name))?;
        if let Some(class) = exact.into_iter().next() {
            return Ok(Some(class));
        }

        let by_suffix = self.find(NodeKind::Class, NameMatch::Suffix(name))?;
        if let Some(class) = by_suffix.into_iter().next() {
            return Ok(Some(class));
        }

        match name.rsplit_once('.') {
            Some((module, symbol)) => {
                // `from pkg import Cache` where pkg re-exports it
                if depth < MAX_REEXPORT_DEPTH {
                    for edge in self.reexports(module, symbol)? {
                        if let Some(origin) = edge.metadata["origin"].as_str() {
                            if origin != name {
                                if let Some(class) = self.resolve_class_at_depth(origin, depth + 1)? {
                                    return Ok(Some(class));
                                }
                            }
                        }
                    }
                }
                Ok(None)
            }
            None => {
                let by_name = self.find(NodeKind::Class, NameMatch::Simple(name))?;
                Ok(by_name.into_iter().next())
            }
        }
    }

    /// Resolve a type hint written inside `context_module` (an attribute
    /// annotation or an inferred constructor call)
    pub fn resolve_type_hint(&self, hint: &str, context_module: Option<&str>) -> Result<Option<GraphNode>> {
        let Some(name) = normalize_type_hint(hint) else {
            return Ok(None);
        };

        if let Some(module) = context_module {
            let local = format!("{}.{}", module, name);
            if let Some(class) = self.find(NodeKind::Class, NameMatch::Qualified(&local))?.into_iter().next() {
                return Ok(Some(class));
            }

            let head = name.split('.').next().unwrap_or(&name);
            for module_node in self.find(NodeKind::Module, NameMatch::Qualified(module))? {
                for edge in self.store.edges_from(&module_node.id, EdgeKind::Imports)? {
                    if local_name_of(&edge).as_deref() == Some(head) {
                        let origin = edge.metadata["origin"].as_str().unwrap_or_default();
                        let expanded = match name.split_once('.') {
                            Some((_, rest)) => format!("{}.{}", origin, rest),
                            None => origin.to_string(),
                        };
                        if let Some(class) = self.resolve_class(&expanded)? {
                            return Ok(Some(class));
                        }
                    }
                }
            }
        }

        self.resolve_class(&name)
    }

    /// Methods and attributes defined directly on a class
    pub fn own_members(&self, class: &GraphNode) -> Result<Vec<GraphNode>> {
        let mut members = self.store.targets(&class.id, EdgeKind::HasMethod)?;
        members.extend(self.store.targets(&class.id, EdgeKind::HasAttribute)?);
        Ok(members)
    }

    /// Ancestors in depth-first, left-to-right base order. The first
    /// occurrence of a class wins, so a diamond's shared base is visited
    /// through its leftmost path.
    pub fn ancestors(&self, class: &GraphNode) -> Result<Ancestry> {
        let mut ancestry = Ancestry::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut path: Vec<String> = Vec::new();
        visited.insert(class.id.clone());
        self.walk_bases(class, 0, &mut visited, &mut path, &mut ancestry)?;
        Ok(ancestry)
    }

    fn walk_bases(
        &self,
        class: &GraphNode,
        depth: usize,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
        ancestry: &mut Ancestry,
    ) -> Result<()> {
        if depth >= self.max_inheritance_depth {
            debug!("Inheritance walk of {} stopped at depth {}", class.qualified_name, depth);
            ancestry.truncated = true;
            return Ok(());
        }

        path.push(class.id.clone());
        for base in self.store.targets(&class.id, EdgeKind::Inherits)? {
            let resolved = if base.kind == NodeKind::External {
                self.resolve_external(&base, class)?
            } else {
                Some(base.clone())
            };

            let Some(base_class) = resolved else {
                if !is_trivial_base(&base.qualified_name) {
                    ancestry.unresolved.push(base.qualified_name.clone());
                }
                continue;
            };

            if path.contains(&base_class.id) {
                warn!(
                    "Inheritance cycle: {} -> {}",
                    class.qualified_name, base_class.qualified_name
                );
                ancestry.cycle = true;
                continue;
            }
            if !visited.insert(base_class.id.clone()) {
                continue;
            }

            ancestry.classes.push(base_class.clone());
            self.walk_bases(&base_class, depth + 1, visited, path, ancestry)?;
        }
        path.pop();
        Ok(())
    }

    /// Find a placeholder base's definition in the other selected repositories
    fn resolve_external(&self, placeholder: &GraphNode, subclass: &GraphNode) -> Result<Option<GraphNode>> {
        let candidates = self.resolve_class(&placeholder.qualified_name)?;
        Ok(candidates.filter(|c| c.id != subclass.id))
    }

    /// Search a class and then its ancestors for a member
    pub fn find_member(&self, class: &GraphNode, name: &str) -> Result<MemberResolution> {
        let ancestry = self.ancestors(class)?;

        let mut chain = vec![class.clone()];
        chain.extend(ancestry.classes.iter().cloned());

        for (index, owner) in chain.into_iter().enumerate() {
            let found = self.own_members(&owner)?.into_iter().find(|m| m.name == name);
            if let Some(member) = found {
                return Ok(MemberResolution {
                    found: Some(MemberMatch {
                        member,
                        owner,
                        inherited: index > 0,
                    }),
                    ancestry,
                });
            }
        }

        Ok(MemberResolution { found: None, ancestry })
    }

    /// Member names of a class and every ancestor, nearest first
    pub fn member_names(&self, class: &GraphNode) -> Result<Vec<(String, bool)>> {
        let mut names = Vec::new();
        for member in self.own_members(class)? {
            names.push((member.name, true));
        }
        for ancestor in self.ancestors(class)?.classes {
            for member in self.own_members(&ancestor)? {
                names.push((member.name, false));
            }
        }
        Ok(names)
    }

    /// Type of an attribute (or property) reached through a class
    pub fn member_type(&self, class: &GraphNode, name: &str) -> Result<Option<GraphNode>> {
        let Some(found) = self.find_member(class, name)?.found else {
            return Ok(None);
        };

        let hint = match found.member.kind {
            NodeKind::Attribute => found.member.metadata["type_hint"].as_str().map(|s| s.to_string()),
            NodeKind::Method if found.member.metadata["is_property"].as_bool() == Some(true) => found
                .member
                .metadata["return_annotation"]
                .as_str()
                .map(|s| s.to_string()),
            _ => None,
        };

        match hint {
            Some(hint) => {
                let module = self.defining_module(&found.owner)?;
                self.resolve_type_hint(&hint, module.as_ref().map(|m| m.qualified_name.as_str()))
            }
            None => Ok(None),
        }
    }

    /// Module node that defines a class or function
    pub fn defining_module(&self, node: &GraphNode) -> Result<Option<GraphNode>> {
        let modules = self.store.sources(&node.id, EdgeKind::Defines)?;
        Ok(modules.into_iter().find(|m| m.kind == NodeKind::Module))
    }

    /// Other classes defined in the same module
    pub fn sibling_classes(&self, class: &GraphNode) -> Result<Vec<GraphNode>> {
        let Some(module) = self.defining_module(class)? else {
            return Ok(Vec::new());
        };
        let siblings = self
            .store
            .targets(&module.id, EdgeKind::Defines)?
            .into_iter()
            .filter(|n| n.kind == NodeKind::Class && n.id != class.id)
            .collect();
        Ok(siblings)
    }

    /// Subclass plus import count; drives severity escalation
    pub fn class_popularity(&self, class: &GraphNode) -> Result<usize> {
        let subclasses = self.store.sources(&class.id, EdgeKind::Inherits)?.len();
        let imports = self.store.imports_of(&self.repositories, &class.name)?.len();
        Ok(subclasses + imports)
    }

    /// Whether a module or package with this dotted path exists
    pub fn module_exists(&self, module: &str) -> Result<bool> {
        if module.is_empty() {
            return Ok(false);
        }
        Ok(!self.find(NodeKind::Module, NameMatch::Segment(module))?.is_empty())
    }

    /// Look up what `from module import symbol` would bind
    pub fn symbol_in_module(&self, module: &str, symbol: &str) -> Result<Option<SymbolMatch>> {
        self.symbol_in_module_at_depth(module, symbol, 0)
    }

    fn symbol_in_module_at_depth(&self, module: &str, symbol: &str, depth: usize) -> Result<Option<SymbolMatch>> {
        let qualified = format!("{}.{}", module, symbol);

        if let Some(class) = self.find(NodeKind::Class, NameMatch::Suffix(&qualified))?.into_iter().next() {
            return Ok(Some(SymbolMatch::Class(class)));
        }
        if let Some(function) = self.find(NodeKind::Function, NameMatch::Suffix(&qualified))?.into_iter().next() {
            return Ok(Some(SymbolMatch::Function(function)));
        }
        if let Some(global) = self.find(NodeKind::Global, NameMatch::Suffix(&qualified))?.into_iter().next() {
            return Ok(Some(SymbolMatch::Global(global)));
        }
        if let Some(submodule) = self.find(NodeKind::Module, NameMatch::Segment(&qualified))?.into_iter().next() {
            return Ok(Some(SymbolMatch::Submodule(submodule)));
        }

        if let Some(edge) = self.reexports(module, symbol)?.into_iter().next() {
            return Ok(Some(SymbolMatch::ReExport(edge)));
        }

        // `from .impl import *` inside the package
        if depth < MAX_REEXPORT_DEPTH {
            for module_node in self.find(NodeKind::Module, NameMatch::Suffix(module))? {
                for edge in self.store.edges_from(&module_node.id, EdgeKind::Imports)? {
                    if edge.metadata["symbol"].as_str() != Some("*") {
                        continue;
                    }
                    let Some(source) = edge.metadata["module"].as_str() else {
                        continue;
                    };
                    if source.is_empty() || source == module {
                        continue;
                    }
                    if let Some(found) = self.symbol_in_module_at_depth(source, symbol, depth + 1)? {
                        return Ok(Some(found));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Import edges of `module` that bind `symbol` locally
    fn reexports(&self, module: &str, symbol: &str) -> Result<Vec<GraphEdge>> {
        let mut edges = Vec::new();
        for module_node in self.find(NodeKind::Module, NameMatch::Suffix(module))? {
            for edge in self.store.edges_from(&module_node.id, EdgeKind::Imports)? {
                if local_name_of(&edge).as_deref() == Some(symbol) {
                    edges.push(edge);
                }
            }
        }
        Ok(edges)
    }

    /// Module-level functions by name, optionally restricted to one module
    pub fn find_functions(&self, name: &str, module: Option<&str>) -> Result<Vec<GraphNode>> {
        match module {
            Some(module) => {
                let qualified = format!("{}.{}", module, name);
                let mut functions = self.find(NodeKind::Function, NameMatch::Suffix(&qualified))?;
                if functions.is_empty() {
                    for edge in self.reexports(module, name)? {
                        if let Some(origin) = edge.metadata["origin"].as_str() {
                            functions.extend(self.find(NodeKind::Function, NameMatch::Suffix(origin))?);
                        }
                    }
                }
                Ok(functions)
            }
            None => self.find(NodeKind::Function, NameMatch::Simple(name)),
        }
    }

    /// Functions defined in a module (for suggestions)
    pub fn module_functions(&self, module: &str) -> Result<Vec<GraphNode>> {
        let mut functions = Vec::new();
        for module_node in self.find(NodeKind::Module, NameMatch::Suffix(module))? {
            functions.extend(
                self.store
                    .targets(&module_node.id, EdgeKind::Defines)?
                    .into_iter()
                    .filter(|n| n.kind == NodeKind::Function),
            );
        }
        Ok(functions)
    }

    /// Names a module defines at top level (for suggestions)
    pub fn module_symbols(&self, module: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for module_node in self.find(NodeKind::Module, NameMatch::Suffix(module))? {
            names.extend(
                self.store
                    .targets(&module_node.id, EdgeKind::Defines)?
                    .into_iter()
                    .map(|n| n.name),
            );
        }
        Ok(names)
    }

    fn find(&self, kind: NodeKind, name: NameMatch<'_>) -> Result<Vec<GraphNode>> {
        self.store.find_nodes(&self.repositories, kind, name)
    }
}

/// Whether a base class contributes no members worth checking
pub fn is_trivial_base(name: &str) -> bool {
    TRIVIAL_BASES.contains(&name)
}

/// Parameters stored on a function or method node
pub fn parameters_of(node: &GraphNode) -> Vec<Parameter> {
    serde_json::from_value(node.metadata["parameters"].clone()).unwrap_or_default()
}

/// Name an import edge binds in its module
fn local_name_of(edge: &GraphEdge) -> Option<String> {
    if let Some(alias) = edge.metadata["alias"].as_str() {
        return Some(alias.to_string());
    }
    match edge.metadata["symbol"].as_str() {
        Some("*") => None,
        Some(symbol) => Some(symbol.to_string()),
        None => edge.metadata["module"]
            .as_str()
            .and_then(|m| m.split('.').next())
            .map(|s| s.to_string()),
    }
}

/// Reduce an annotation to a class name: `Optional["Engine"]` -> `Engine`
pub fn normalize_type_hint(hint: &str) -> Option<String> {
    let mut hint = hint.trim().trim_matches(|c| c == '"' || c == '\'').to_string();

    for wrapper in ["Optional[", "typing.Optional[", "Final[", "typing.Final[", "ClassVar[", "typing.ClassVar["] {
        if let Some(inner) = hint.strip_prefix(wrapper).and_then(|s| s.strip_suffix(']')) {
            hint = inner.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        }
    }

    // `Engine | None`
    if let Some((left, right)) = hint.split_once('|') {
        let (left, right) = (left.trim(), right.trim());
        hint = if right == "None" { left.to_string() } else if left == "None" { right.to_string() } else { return None };
    }

    let base = hint.split('[').next().unwrap_or(&hint).trim();
    let valid = !base.is_empty()
        && base
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    valid.then(|| base.to_string())
}
