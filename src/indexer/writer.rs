// Structural model to repository graph conversion

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::json;
use tracing::debug;

use super::model::{
    AttributeModel, ClassModel, FunctionModel, ImportModel, Location, ModuleModel, RepositoryModel,
};
use crate::index::{
    EdgeKind, FailedFileRecord, GraphEdge, GraphNode, NodeKind, RepositoryGraph, RepositoryRecord,
};

/// Build the complete staged graph of one repository.
///
/// Nodes come out in dependency order (repository, modules, classes and
/// functions, then methods and attributes); INHERITS edges are appended last
/// because bases may point at classes later in the batch or outside it.
pub fn build_repository_graph(model: &RepositoryModel, fingerprint: &str, ingested_at: i64) -> RepositoryGraph {
    let mut modules: Vec<&ModuleModel> = model.modules.iter().collect();
    modules.sort_by(|a, b| a.path.cmp(&b.path));

    let mut builder = GraphBuilder::new(&model.id);
    let repo_id = builder.add_node(
        NodeKind::Repository,
        &model.id,
        &model.id,
        None,
        Location::default(),
        json!({ "revision": model.revision }),
    );

    for (ordinal, module) in modules.iter().enumerate() {
        if let Some(module_id) = builder.add_module(module) {
            builder.add_edge(&repo_id, &module_id, EdgeKind::Contains, ordinal as u32, json!({}));
        }
    }

    for module in &modules {
        builder.add_module_members(module);
    }

    for module in &modules {
        builder.add_imports(module);
    }

    for module in &modules {
        builder.add_inheritance(module);
    }

    let mut failed: Vec<FailedFileRecord> = model
        .failed
        .iter()
        .map(|f| FailedFileRecord {
            path: f.path.clone(),
            line: f.line,
            column: f.column,
            message: f.message.clone(),
        })
        .collect();
    failed.sort_by(|a, b| a.path.cmp(&b.path));

    RepositoryGraph {
        record: RepositoryRecord {
            id: model.id.clone(),
            revision: model.revision.clone(),
            fingerprint: fingerprint.to_string(),
            modules_parsed: model.modules.len(),
            modules_failed: model.failed.len(),
            modules_skipped: model.skipped.len(),
            ingested_at,
        },
        nodes: builder.nodes,
        edges: builder.edges,
        failed,
    }
}

/// Absolute module path of a relative import, `None` when it climbs above the root
pub fn resolve_relative_module(importer: &ModuleModel, import: &ImportModel) -> Option<String> {
    if !import.is_relative() {
        return Some(import.module.clone());
    }

    let mut package: Vec<&str> = importer.name.split('.').filter(|p| !p.is_empty()).collect();
    let is_package = importer.path.ends_with("__init__.py") || importer.path.ends_with("__init__.pyi");
    if !is_package {
        package.pop();
    }
    for _ in 1..import.level {
        package.pop()?;
    }

    let mut parts: Vec<&str> = package;
    if !import.module.is_empty() {
        parts.extend(import.module.split('.'));
    }
    Some(parts.join("."))
}

/// Metadata stored on function and method nodes
pub fn function_metadata(function: &FunctionModel) -> serde_json::Value {
    json!({
        "parameters": function.parameters,
        "return_annotation": function.return_annotation,
        "decorators": function.decorators,
        "is_static": function.is_static,
        "is_classmethod": function.is_classmethod,
        "is_async": function.is_async,
        "is_property": function.is_property,
        "docstring": function.docstring,
    })
}

struct GraphBuilder<'a> {
    repository: &'a str,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    seen: HashSet<String>,
    module_ids: HashMap<String, String>,
    /// Module name to the file that owns it
    module_paths: HashMap<String, String>,
    class_ids: HashMap<String, String>,
    /// Simple class name to qualified names, for base resolution
    classes_by_name: BTreeMap<String, Vec<String>>,
}

impl<'a> GraphBuilder<'a> {
    fn new(repository: &'a str) -> Self {
        Self {
            repository,
            nodes: Vec::new(),
            edges: Vec::new(),
            seen: HashSet::new(),
            module_ids: HashMap::new(),
            module_paths: HashMap::new(),
            class_ids: HashMap::new(),
            classes_by_name: BTreeMap::new(),
        }
    }

    fn add_node(
        &mut self,
        kind: NodeKind,
        name: &str,
        qualified_name: &str,
        file: Option<&str>,
        location: Location,
        metadata: serde_json::Value,
    ) -> String {
        let id = GraphNode::id_for(self.repository, kind, qualified_name);
        if !self.seen.insert(id.clone()) {
            debug!("Duplicate {} node {} ignored", kind.as_str(), qualified_name);
            return id;
        }

        self.nodes.push(GraphNode {
            id: id.clone(),
            repository: self.repository.to_string(),
            kind,
            name: name.to_string(),
            qualified_name: qualified_name.to_string(),
            file: file.map(|f| f.to_string()),
            line: location.line,
            column: location.column,
            metadata,
        });
        id
    }

    fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind, ordinal: u32, metadata: serde_json::Value) {
        self.edges.push(GraphEdge {
            repository: self.repository.to_string(),
            from_id: from.to_string(),
            to_id: to.to_string(),
            kind,
            ordinal,
            metadata,
        });
    }

    fn add_module(&mut self, module: &ModuleModel) -> Option<String> {
        if self.module_ids.contains_key(&module.name) {
            // `pkg.py` next to `pkg/__init__.py`, or a `.pyi` stub beside its source
            debug!("Module {} already defined, skipping {}", module.name, module.path);
            return None;
        }

        let name = module.name.rsplit('.').next().unwrap_or(&module.name);
        let id = self.add_node(
            NodeKind::Module,
            name,
            &module.name,
            Some(&module.path),
            Location::default(),
            json!({ "path": module.path, "docstring": module.docstring }),
        );
        self.module_ids.insert(module.name.clone(), id.clone());
        self.module_paths.insert(module.name.clone(), module.path.clone());

        for class in &module.classes {
            self.classes_by_name
                .entry(class.name.clone())
                .or_default()
                .push(class.qualified_name.clone());
        }
        Some(id)
    }

    fn owns(&self, module: &ModuleModel) -> Option<String> {
        if self.module_paths.get(&module.name) != Some(&module.path) {
            return None;
        }
        self.module_ids.get(&module.name).cloned()
    }

    fn is_local_package(&self, dotted: &str) -> bool {
        let root = dotted.split('.').next().unwrap_or(dotted);
        self.module_ids
            .keys()
            .any(|m| m == root || m.starts_with(&format!("{}.", root)))
    }

    fn add_module_members(&mut self, module: &ModuleModel) {
        let Some(module_id) = self.owns(module) else {
            return;
        };
        let mut ordinal = 0u32;

        for class in &module.classes {
            let class_id = self.add_class(module, class);
            self.add_edge(&module_id, &class_id, EdgeKind::Defines, ordinal, json!({}));
            ordinal += 1;
        }

        for function in &module.functions {
            let function_id = self.add_node(
                NodeKind::Function,
                &function.name,
                &function.qualified_name,
                Some(&module.path),
                function.location,
                function_metadata(function),
            );
            self.add_edge(&module_id, &function_id, EdgeKind::Defines, ordinal, json!({}));
            ordinal += 1;
        }

        for global in &module.globals {
            let qualified_name = format!("{}.{}", module.name, global);
            let global_id = self.add_node(
                NodeKind::Global,
                global,
                &qualified_name,
                Some(&module.path),
                Location::default(),
                json!({}),
            );
            self.add_edge(&module_id, &global_id, EdgeKind::Defines, ordinal, json!({}));
            ordinal += 1;
        }
    }

    fn add_class(&mut self, module: &ModuleModel, class: &ClassModel) -> String {
        let class_id = self.add_node(
            NodeKind::Class,
            &class.name,
            &class.qualified_name,
            Some(&module.path),
            class.location,
            json!({
                "bases": class.bases,
                "decorators": class.decorators,
                "docstring": class.docstring,
            }),
        );
        self.class_ids.insert(class.qualified_name.clone(), class_id.clone());

        for (ordinal, method) in class.methods.iter().enumerate() {
            let method_id = self.add_node(
                NodeKind::Method,
                &method.name,
                &method.qualified_name,
                Some(&module.path),
                method.location,
                function_metadata(method),
            );
            self.add_edge(&class_id, &method_id, EdgeKind::HasMethod, ordinal as u32, json!({}));
        }

        for (ordinal, attribute) in class.attributes.iter().enumerate() {
            let attribute_id = self.add_attribute(module, class, attribute);
            self.add_edge(&class_id, &attribute_id, EdgeKind::HasAttribute, ordinal as u32, json!({}));
        }

        class_id
    }

    fn add_attribute(&mut self, module: &ModuleModel, class: &ClassModel, attribute: &AttributeModel) -> String {
        let qualified_name = format!("{}.{}", class.qualified_name, attribute.name);
        self.add_node(
            NodeKind::Attribute,
            &attribute.name,
            &qualified_name,
            Some(&module.path),
            attribute.location,
            json!({ "type_hint": attribute.type_hint }),
        )
    }

    fn external(&mut self, qualified_name: &str) -> String {
        let name = qualified_name.rsplit('.').next().unwrap_or(qualified_name);
        self.add_node(
            NodeKind::External,
            name,
            qualified_name,
            None,
            Location::default(),
            json!({}),
        )
    }

    fn add_imports(&mut self, module: &ModuleModel) {
        let Some(module_id) = self.owns(module) else {
            return;
        };

        for (ordinal, import) in module.imports.iter().enumerate() {
            let resolved = resolve_relative_module(module, import);
            let absolute = resolved.clone().unwrap_or_else(|| import.module.clone());
            let origin = match &import.symbol {
                Some(symbol) if symbol != "*" && !absolute.is_empty() => format!("{}.{}", absolute, symbol),
                Some(symbol) if symbol != "*" => symbol.clone(),
                _ => absolute.clone(),
            };

            let known = if absolute.is_empty() {
                None
            } else {
                self.module_ids.get(&absolute).cloned()
            };
            let target = match known {
                Some(id) => id,
                None if absolute.is_empty() => self.external(&origin),
                None => self.external(&absolute),
            };

            self.add_edge(
                &module_id,
                &target,
                EdgeKind::Imports,
                ordinal as u32,
                json!({
                    "module": absolute,
                    "symbol": import.symbol,
                    "alias": import.alias,
                    "level": import.level,
                    "origin": origin,
                    "line": import.location.line,
                    "resolved": resolved.is_some(),
                }),
            );
        }
    }

    fn add_inheritance(&mut self, module: &ModuleModel) {
        if self.owns(module).is_none() {
            return;
        }

        for class in &module.classes {
            let Some(class_id) = self.class_ids.get(&class.qualified_name).cloned() else {
                continue;
            };
            for (ordinal, base) in class.bases.iter().enumerate() {
                let target = match self.resolve_base(module, &class.qualified_name, base) {
                    Ok(id) => id,
                    Err(expanded) => self.external(&expanded),
                };
                self.add_edge(
                    &class_id,
                    &target,
                    EdgeKind::Inherits,
                    ordinal as u32,
                    json!({ "expression": base }),
                );
            }
        }
    }

    /// Resolve a base expression to a class node id, or return the best
    /// dotted name for an external placeholder
    fn resolve_base(&self, module: &ModuleModel, owner: &str, base: &str) -> Result<String, String> {
        let expanded = expand_through_imports(module, base);

        if let Some(name) = &expanded {
            if let Some(id) = self.class_ids.get(name) {
                return Ok(id.clone());
            }
            // Bound by an import of a package this repository does not define
            if !self.is_local_package(name) {
                return Err(name.clone());
            }
        }

        let local = format!("{}.{}", module.name, base);
        if local != owner {
            if let Some(id) = self.class_ids.get(&local) {
                return Ok(id.clone());
            }
        }

        // Re-exported or star-imported classes: accept a unique match by short name
        let simple = base.rsplit('.').next().unwrap_or(base);
        if let Some(candidates) = self.classes_by_name.get(simple) {
            let others: Vec<&String> = candidates.iter().filter(|qn| qn.as_str() != owner).collect();
            if let [only] = others.as_slice() {
                if let Some(id) = self.class_ids.get(only.as_str()) {
                    return Ok(id.clone());
                }
            }
        }

        Err(expanded.unwrap_or_else(|| base.to_string()))
    }
}

/// Rewrite the first segment of a dotted name through the module's imports
fn expand_through_imports(module: &ModuleModel, dotted: &str) -> Option<String> {
    let (head, rest) = match dotted.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (dotted, None),
    };

    // Later imports rebind earlier ones
    let import = module
        .imports
        .iter()
        .rev()
        .find(|i| i.symbol.as_deref() != Some("*") && i.local_name() == head)?;

    let absolute = resolve_relative_module(module, import)?;
    let origin = match (&import.symbol, &import.alias) {
        (Some(symbol), _) if absolute.is_empty() => symbol.clone(),
        (Some(symbol), _) => format!("{}.{}", absolute, symbol),
        // `import a.b` binds `a`; `import a.b as ab` binds the full path
        (None, Some(_)) => absolute,
        (None, None) => head.to_string(),
    };

    Some(match rest {
        Some(rest) => format!("{}.{}", origin, rest),
        None => origin,
    })
}
