// Candidate file analysis: references plus local type propagation

pub mod builtins;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::Node;

use crate::error::{HalgraphError, HalgraphResult};
use crate::indexer::model::{ImportModel, Location, ModuleModel};
use crate::indexer::parser::{
    field_text, first_named_child, flatten_statements, node_text, parse_imports, parse_parameters,
    unwrap_definition, ExtractionFailure, ExtractionLimits, PythonParser,
};
use crate::query::engine::{is_trivial_base, normalize_type_hint};
use builtins::is_builtin;

/// Path the candidate is extracted under; its module name is `candidate`
const CANDIDATE_PATH: &str = "candidate.py";

/// Expression nesting allowed per statement nesting level
const EXPRESSION_DEPTH_FACTOR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Import,
    FunctionCall,
    ConstructorCall,
    MethodCall,
    AttributeAccess,
}

impl ReferenceKind {
    pub fn is_call(&self) -> bool {
        matches!(
            self,
            ReferenceKind::FunctionCall | ReferenceKind::ConstructorCall | ReferenceKind::MethodCall
        )
    }

    /// Report category: `call`, `attribute` or `import`
    pub fn category(&self) -> &'static str {
        match self {
            ReferenceKind::Import => "import",
            ReferenceKind::AttributeAccess => "attribute",
            _ => "call",
        }
    }
}

/// Shape of the arguments at a call site
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArguments {
    pub positional: usize,
    pub keywords: Vec<String>,
    /// `*args` or `**kwargs` at the call site
    pub has_splat: bool,
}

/// What a reference is looked up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Receiver {
    /// Imports and free function calls
    None,
    /// A module bound by an import, by dotted path
    Module { path: String },
    /// An instance of a class known by dotted name
    Type { name: String },
    /// The class object itself, reached through an import
    Class { name: String },
    /// An instance of a class defined in the candidate. Only members the
    /// candidate does not define itself are ever emitted against it.
    LocalClass {
        name: String,
        graph_bases: Vec<String>,
        opaque_bases: Vec<String>,
    },
    /// The value of an attribute of another receiver
    Member { owner: Box<Receiver>, attribute: String },
    Unknown { reason: String },
}

impl Receiver {
    fn unknown(reason: impl Into<String>) -> Self {
        Receiver::Unknown { reason: reason.into() }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Receiver::Unknown { .. })
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Receiver::None => Ok(()),
            Receiver::Module { path } => write!(f, "{}", path),
            Receiver::Type { name } | Receiver::Class { name } => write!(f, "{}", name),
            Receiver::LocalClass { name, .. } => write!(f, "{}", name),
            Receiver::Member { owner, attribute } => write!(f, "{}.{}", owner, attribute),
            Receiver::Unknown { .. } => write!(f, "<unknown>"),
        }
    }
}

/// One checkable claim the candidate makes about an API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReference {
    pub kind: ReferenceKind,
    /// Source text of the referencing expression
    pub expression: String,
    /// Looked-up name: member, function, class or imported symbol
    pub member: String,
    pub receiver: Receiver,
    pub arguments: Option<CallArguments>,
    pub import: Option<ImportModel>,
    pub location: Location,
}

/// Everything the validator needs to know about one candidate file
#[derive(Debug, Clone)]
pub struct CandidateAnalysis {
    pub module: ModuleModel,
    pub references: Vec<CandidateReference>,
    /// A `from x import *` makes unbound names unverifiable
    pub has_star_import: bool,
}

#[derive(Debug, Clone)]
enum Binding {
    Module(String),
    /// Dotted origin of a `from module import symbol`
    Imported(String),
    LocalClass(String),
    LocalFunction,
    Value(Receiver),
    Unknown,
}

type Scope = HashMap<String, Binding>;

#[derive(Debug, Default)]
struct LocalClass {
    members: HashSet<String>,
    bases: Vec<String>,
    attribute_types: HashMap<String, String>,
}

enum BaseRef {
    Local(String),
    Graph(String),
    Trivial,
    Opaque(String),
}

/// Parses a candidate file and emits its references
pub struct CandidateAnalyzer {
    parser: PythonParser,
    limits: ExtractionLimits,
}

impl CandidateAnalyzer {
    pub fn new(limits: ExtractionLimits) -> Self {
        Self {
            parser: PythonParser::with_limits(limits),
            limits,
        }
    }

    pub fn analyze(&self, content: &str, cancel: Option<&AtomicBool>) -> HalgraphResult<CandidateAnalysis> {
        let tree = self
            .parser
            .parse_tree(content)
            .map_err(|e| HalgraphError::InvalidRequest(e.to_string()))?;

        let module = match self.parser.extract_from_tree(CANDIDATE_PATH, content, &tree) {
            Ok(module) => module,
            Err(ExtractionFailure::Syntax { line, column, message }) => {
                return Err(HalgraphError::InvalidRequest(format!(
                    "candidate is not valid Python ({}:{}): {}",
                    line, column, message
                )))
            }
            Err(ExtractionFailure::Budget(reason)) => {
                return Err(HalgraphError::InvalidRequest(format!(
                    "candidate exceeds extraction limits: {}",
                    reason
                )))
            }
        };

        let mut classes = local_classes(&module);
        collect_self_assignments(
            tree.root_node(),
            &module.name,
            None,
            content,
            &mut classes,
            self.limits.max_nesting_depth,
        );

        let (references, has_star_import) = {
            let mut walk = Walk {
                content,
                module_scope: module_bindings(&module),
                rebound: rebound_globals(tree.root_node(), content),
                module_name: &module.name,
                classes,
                references: Vec::new(),
                has_star_import: false,
                cancel,
                max_depth: self.limits.max_nesting_depth.saturating_mul(EXPRESSION_DEPTH_FACTOR),
                steps: 0,
            };
            let mut scope = Scope::new();
            let context = Context {
                prefix: module.name.clone(),
            };
            walk.block(tree.root_node(), &mut scope, &context, 0)?;
            (walk.references, walk.has_star_import)
        };

        debug!("Candidate analysis emitted {} references", references.len());

        Ok(CandidateAnalysis {
            module,
            references,
            has_star_import,
        })
    }
}

impl Default for CandidateAnalyzer {
    fn default() -> Self {
        Self::new(ExtractionLimits::default())
    }
}

/// Members, bases and attribute types of classes defined in the candidate
fn local_classes(module: &ModuleModel) -> HashMap<String, LocalClass> {
    let mut classes: HashMap<String, LocalClass> = HashMap::new();

    for class in &module.classes {
        let entry = classes.entry(class.qualified_name.clone()).or_default();
        entry.bases = class.bases.clone();
        for method in &class.methods {
            entry.members.insert(method.name.clone());
            if method.is_property {
                if let Some(annotation) = &method.return_annotation {
                    entry.attribute_types.insert(method.name.clone(), annotation.clone());
                }
            }
        }
        for attribute in &class.attributes {
            entry.members.insert(attribute.name.clone());
            if let Some(hint) = &attribute.type_hint {
                entry.attribute_types.insert(attribute.name.clone(), hint.clone());
            }
        }
    }

    // Nested classes are reachable as attributes of their parent
    for class in &module.classes {
        if let Some((parent, name)) = class.qualified_name.rsplit_once('.') {
            if let Some(entry) = classes.get_mut(parent) {
                entry.members.insert(name.to_string());
            }
        }
    }

    classes
}

/// Add `self.<name> = ...` assignments from every method, not only constructors
fn collect_self_assignments(
    block: Node,
    prefix: &str,
    owner: Option<&str>,
    content: &str,
    classes: &mut HashMap<String, LocalClass>,
    max_depth: usize,
) {
    let mut statements = Vec::new();
    if flatten_statements(block, &mut statements, 0, max_depth).is_err() {
        return;
    }

    for statement in statements {
        let Some((definition, _)) = unwrap_definition(statement, content) else {
            continue;
        };
        let Some(name) = field_text(definition, "name", content) else {
            continue;
        };
        let qualified = format!("{}.{}", prefix, name);
        let Some(body) = definition.child_by_field_name("body") else {
            continue;
        };

        match definition.kind() {
            "class_definition" => {
                collect_self_assignments(body, &qualified, Some(&qualified), content, classes, max_depth);
            }
            "function_definition" => {
                if let Some(class) = owner {
                    let receiver = definition
                        .child_by_field_name("parameters")
                        .map(|p| parse_parameters(p, content))
                        .and_then(|params| params.first().map(|p| p.name.clone()));
                    if let Some(receiver) = receiver {
                        let names = self_assigned_names(body, &receiver, content);
                        if let Some(entry) = classes.get_mut(class) {
                            entry.members.extend(names);
                        }
                    }
                }
                collect_self_assignments(body, &qualified, None, content, classes, max_depth);
            }
            _ => {}
        }
    }
}

fn self_assigned_names(body: Node, receiver: &str, content: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut stack = vec![body];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "function_definition" | "class_definition" | "lambda" => continue,
            "assignment" | "augmented_assignment" => {
                let target = node.child_by_field_name("left").filter(|l| l.kind() == "attribute");
                if let Some(left) = target {
                    let object = left.child_by_field_name("object");
                    if object.map(|o| node_text(o, content)) == Some(receiver) {
                        if let Some(name) = field_text(left, "attribute", content) {
                            names.push(name.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    names
}

/// Module-level names, used to resolve base classes and attribute hints
fn module_bindings(module: &ModuleModel) -> Scope {
    let mut scope = Scope::new();
    for import in &module.imports {
        bind_import(&mut scope, import);
    }
    for class in &module.classes {
        if class.qualified_name == format!("{}.{}", module.name, class.name) {
            scope.insert(class.name.clone(), Binding::LocalClass(class.qualified_name.clone()));
        }
    }
    for function in &module.functions {
        scope.insert(function.name.clone(), Binding::LocalFunction);
    }
    for global in &module.globals {
        scope.entry(global.clone()).or_insert(Binding::Unknown);
    }
    scope
}

/// Names assigned more than once at module level, top-level blocks included
fn rebound_globals(root: Node, content: &str) -> HashSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    count_module_bindings(root, content, &mut counts);
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name)
        .collect()
}

fn count_module_bindings(node: Node, content: &str, counts: &mut HashMap<String, usize>) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    for child in children {
        match child.kind() {
            "assignment" | "augmented_assignment" => {
                // `a = b = value` nests the second assignment on the right
                let mut current = Some(child);
                while let Some(assignment) =
                    current.filter(|n| matches!(n.kind(), "assignment" | "augmented_assignment"))
                {
                    if let Some(left) = assignment.child_by_field_name("left") {
                        count_targets(left, content, counts);
                    }
                    current = assignment.child_by_field_name("right");
                }
            }
            "for_statement" => {
                if let Some(left) = child.child_by_field_name("left") {
                    count_targets(left, content, counts);
                }
                count_module_bindings(child, content, counts);
            }
            "expression_statement" | "block" | "if_statement" | "elif_clause" | "else_clause"
            | "while_statement" | "try_statement" | "except_clause" | "finally_clause" | "with_statement" => {
                count_module_bindings(child, content, counts);
            }
            _ => {}
        }
    }
}

fn count_targets(node: Node, content: &str, counts: &mut HashMap<String, usize>) {
    match node.kind() {
        "identifier" => *counts.entry(node_text(node, content).to_string()).or_default() += 1,
        "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" | "list_splat_pattern"
        | "parenthesized_expression" => {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            for child in children {
                count_targets(child, content, counts);
            }
        }
        _ => {}
    }
}

/// Bind the name an import introduces; returns true for `import *`
fn bind_import(scope: &mut Scope, import: &ImportModel) -> bool {
    if import.symbol.as_deref() == Some("*") {
        return true;
    }
    let local = import.local_name();
    if import.is_relative() {
        scope.insert(local, Binding::Unknown);
        return false;
    }

    let binding = match (&import.symbol, &import.alias) {
        (Some(symbol), _) => Binding::Imported(format!("{}.{}", import.module, symbol)),
        (None, Some(_)) => Binding::Module(import.module.clone()),
        (None, None) => Binding::Module(local.clone()),
    };
    scope.insert(local, binding);
    false
}

fn is_class_like(name: &str) -> bool {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn call_kind(name: &str) -> ReferenceKind {
    if is_class_like(name) {
        ReferenceKind::ConstructorCall
    } else {
        ReferenceKind::FunctionCall
    }
}

struct Context {
    /// Qualified prefix for classes defined in the current scope
    prefix: String,
}

struct Walk<'a> {
    content: &'a str,
    module_scope: Scope,
    /// Module-level names bound more than once
    rebound: HashSet<String>,
    module_name: &'a str,
    classes: HashMap<String, LocalClass>,
    references: Vec<CandidateReference>,
    has_star_import: bool,
    cancel: Option<&'a AtomicBool>,
    max_depth: usize,
    steps: usize,
}

impl<'a> Walk<'a> {
    fn tick(&mut self, depth: usize) -> HalgraphResult<()> {
        if depth > self.max_depth {
            return Err(HalgraphError::InvalidRequest(format!(
                "candidate nesting exceeds {}",
                self.max_depth
            )));
        }
        self.steps += 1;
        if self.steps % 256 == 0 {
            if let Some(cancel) = self.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Err(HalgraphError::Cancelled);
                }
            }
        }
        Ok(())
    }

    fn text(&self, node: Node) -> String {
        let collapsed: String = node_text(node, self.content)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if collapsed.chars().count() > 120 {
            let truncated: String = collapsed.chars().take(117).collect();
            format!("{}...", truncated)
        } else {
            collapsed
        }
    }

    fn emit(
        &mut self,
        kind: ReferenceKind,
        node: Node,
        member: &str,
        receiver: Receiver,
        arguments: Option<CallArguments>,
    ) {
        if member.is_empty() {
            return;
        }
        let expression = self.text(node);
        self.references.push(CandidateReference {
            kind,
            expression,
            member: member.to_string(),
            receiver,
            arguments,
            import: None,
            location: Location::from_node(node),
        });
    }

    // ---- statements ----

    fn block(&mut self, block: Node, scope: &mut Scope, context: &Context, depth: usize) -> HalgraphResult<()> {
        self.tick(depth)?;
        let mut cursor = block.walk();
        let statements: Vec<Node> = block.named_children(&mut cursor).collect();
        for statement in statements {
            self.statement(statement, scope, context, depth + 1)?;
        }
        Ok(())
    }

    fn statement(&mut self, node: Node, scope: &mut Scope, context: &Context, depth: usize) -> HalgraphResult<()> {
        self.tick(depth)?;
        match node.kind() {
            "comment" | "pass_statement" | "break_statement" | "continue_statement" => Ok(()),
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                self.import(node, scope);
                Ok(())
            }
            "class_definition" | "function_definition" | "decorated_definition" => {
                self.definition(node, scope, context, depth)
            }
            "expression_statement" => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    match child.kind() {
                        "assignment" => self.assignment(child, scope, context, depth + 1)?,
                        "augmented_assignment" => {
                            if let Some(right) = child.child_by_field_name("right") {
                                self.expression(right, scope, context, depth + 1)?;
                            }
                            if let Some(left) = child.child_by_field_name("left") {
                                self.target(left, scope, context, depth + 1)?;
                            }
                        }
                        _ => self.expression(child, scope, context, depth + 1)?,
                    }
                }
                Ok(())
            }
            "for_statement" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.expression(right, scope, context, depth + 1)?;
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.target(left, scope, context, depth + 1)?;
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.block(body, scope, context, depth + 1)?;
                }
                if let Some(alternative) = node.child_by_field_name("alternative") {
                    self.statement(alternative, scope, context, depth + 1)?;
                }
                Ok(())
            }
            "as_pattern" => {
                // `with open(p) as fh`, `except Error as e`
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                if let Some((value, aliases)) = children.split_first() {
                    self.expression(*value, scope, context, depth + 1)?;
                    for alias in aliases {
                        self.target(*alias, scope, context, depth + 1)?;
                    }
                }
                Ok(())
            }
            _ => {
                // Compound statements and clauses: conditions are expressions,
                // bodies are blocks in the same scope
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    let kind = child.kind();
                    if kind == "block" {
                        self.block(child, scope, context, depth + 1)?;
                    } else if kind.ends_with("_clause") || kind.ends_with("_statement") || kind == "with_item" || kind == "as_pattern" {
                        self.statement(child, scope, context, depth + 1)?;
                    } else {
                        self.expression(child, scope, context, depth + 1)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn import(&mut self, node: Node, scope: &mut Scope) {
        for import in parse_imports(node, self.content) {
            if bind_import(scope, &import) {
                self.has_star_import = true;
            }

            let (member, expression) = match &import.symbol {
                Some(symbol) => (
                    symbol.clone(),
                    format!("from {}{} import {}", ".".repeat(import.level as usize), import.module, symbol),
                ),
                None => (import.module.clone(), format!("import {}", import.module)),
            };
            self.references.push(CandidateReference {
                kind: ReferenceKind::Import,
                expression,
                member,
                receiver: Receiver::None,
                arguments: None,
                location: import.location,
                import: Some(import),
            });
        }
    }

    fn definition(&mut self, node: Node, scope: &mut Scope, context: &Context, depth: usize) -> HalgraphResult<()> {
        let Some((definition, _)) = unwrap_definition(node, self.content) else {
            return Ok(());
        };

        // Decorator expressions run in the enclosing scope
        if node.kind() == "decorated_definition" {
            let mut cursor = node.walk();
            let decorators: Vec<Node> = node
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "decorator")
                .collect();
            for decorator in decorators {
                self.expression(decorator, scope, context, depth + 1)?;
            }
        }

        let Some(name) = field_text(definition, "name", self.content).map(|s| s.to_string()) else {
            return Ok(());
        };
        let qualified = format!("{}.{}", context.prefix, name);

        match definition.kind() {
            "class_definition" => {
                if let Some(superclasses) = definition.child_by_field_name("superclasses") {
                    self.expression(superclasses, scope, context, depth + 1)?;
                }
                scope.insert(name, Binding::LocalClass(qualified.clone()));

                // Methods see the enclosing scope, not the class body
                let enclosing = scope.clone();
                let mut class_scope = scope.clone();
                let class_context = Context { prefix: qualified.clone() };
                if let Some(body) = definition.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    let statements: Vec<Node> = body.named_children(&mut cursor).collect();
                    for statement in statements {
                        if unwrap_definition(statement, self.content)
                            .is_some_and(|(d, _)| d.kind() == "function_definition")
                        {
                            self.function(statement, &enclosing, &class_context, Some(&qualified), depth + 1)?;
                        } else {
                            self.statement(statement, &mut class_scope, &class_context, depth + 1)?;
                        }
                    }
                }
                Ok(())
            }
            "function_definition" => {
                self.function(node, scope, context, None, depth)?;
                scope.insert(name, Binding::LocalFunction);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Walk a function body in a fresh scope derived from `enclosing`.
    /// `node` may be the decorated definition.
    fn function(
        &mut self,
        node: Node,
        enclosing: &Scope,
        context: &Context,
        owner: Option<&str>,
        depth: usize,
    ) -> HalgraphResult<()> {
        let Some((definition, decorators)) = unwrap_definition(node, self.content) else {
            return Ok(());
        };
        let name = field_text(definition, "name", self.content).unwrap_or_default();
        let mut scope = enclosing.clone();

        // A body runs after the module has finished binding its globals, so a
        // rebound global has no single type there
        for global in &self.rebound {
            if let Some(binding) = scope.get_mut(global) {
                *binding = Binding::Unknown;
            }
        }

        if owner.is_some() && node.kind() == "decorated_definition" {
            let mut class_scope = enclosing.clone();
            let mut cursor = node.walk();
            let decorator_nodes: Vec<Node> = node
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "decorator")
                .collect();
            for decorator in decorator_nodes {
                self.expression(decorator, &mut class_scope, context, depth + 1)?;
            }
        }

        let is_static = decorators.iter().any(|d| d.rsplit('.').next() == Some("staticmethod"));
        if let Some(class) = owner {
            // `super()` resolves through the candidate class chain
            scope.insert("super".to_string(), Binding::Value(self.local_receiver(class)));
        }

        if let Some(params_node) = definition.child_by_field_name("parameters") {
            // Default values are evaluated in the enclosing scope
            let mut cursor = params_node.walk();
            let defaults: Vec<Node> = params_node
                .named_children(&mut cursor)
                .filter_map(|p| p.child_by_field_name("value"))
                .collect();
            let mut defaults_scope = enclosing.clone();
            for value in defaults {
                self.expression(value, &mut defaults_scope, context, depth + 1)?;
            }

            let parameters = parse_parameters(params_node, self.content);
            for (index, parameter) in parameters.iter().enumerate() {
                let binding = match owner {
                    Some(class) if index == 0 && !is_static => Binding::Value(self.local_receiver(class)),
                    _ if !parameter.is_variadic() => parameter
                        .annotation
                        .as_deref()
                        .and_then(|a| self.resolve_annotation(a, enclosing))
                        .map(Binding::Value)
                        .unwrap_or(Binding::Unknown),
                    _ => Binding::Unknown,
                };
                scope.insert(parameter.name.clone(), binding);
            }
        }

        let function_context = Context {
            prefix: format!("{}.{}", context.prefix, name),
        };
        if let Some(body) = definition.child_by_field_name("body") {
            self.block(body, &mut scope, &function_context, depth + 1)?;
        }
        Ok(())
    }

    fn assignment(&mut self, node: Node, scope: &mut Scope, context: &Context, depth: usize) -> HalgraphResult<()> {
        self.tick(depth)?;
        let right = node.child_by_field_name("right");

        // `a = b = Cls()`
        let value = match right {
            Some(inner) if inner.kind() == "assignment" => {
                self.assignment(inner, scope, context, depth + 1)?;
                innermost_value(inner)
            }
            Some(value) => {
                self.expression(value, scope, context, depth + 1)?;
                Some(value)
            }
            None => None,
        };

        let declared = field_text(node, "type", self.content)
            .and_then(|annotation| self.resolve_annotation(annotation, scope));
        let inferred = declared.or_else(|| value.and_then(|v| self.infer_call_type(v, scope)));

        let Some(left) = node.child_by_field_name("left") else {
            return Ok(());
        };
        if left.kind() == "identifier" {
            let name = node_text(left, self.content).to_string();
            let binding = inferred.map(Binding::Value).unwrap_or(Binding::Unknown);
            scope.insert(name, binding);
            Ok(())
        } else {
            self.target(left, scope, context, depth + 1)
        }
    }

    /// An assignment target: bound names become unknown, nested reads are scanned
    fn target(&mut self, node: Node, scope: &mut Scope, context: &Context, depth: usize) -> HalgraphResult<()> {
        self.tick(depth)?;
        match node.kind() {
            "identifier" => {
                scope.insert(node_text(node, self.content).to_string(), Binding::Unknown);
                Ok(())
            }
            // Writing an attribute defines it; only the object is read
            "attribute" => match node.child_by_field_name("object") {
                Some(object) => self.expression(object, scope, context, depth + 1),
                None => Ok(()),
            },
            "subscript" => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.expression(child, scope, context, depth + 1)?;
                }
                Ok(())
            }
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.target(child, scope, context, depth + 1)?;
                }
                Ok(())
            }
        }
    }

    // ---- expressions ----

    fn expression(&mut self, node: Node, scope: &mut Scope, context: &Context, depth: usize) -> HalgraphResult<()> {
        self.tick(depth)?;
        match node.kind() {
            "call" => self.call(node, scope, context, depth),
            "attribute" => self.attribute(node, scope, context, depth),
            "type" | "comment" | "identifier" | "string_content" | "escape_sequence" => Ok(()),
            "keyword_argument" => match node.child_by_field_name("value") {
                Some(value) => self.expression(value, scope, context, depth + 1),
                None => Ok(()),
            },
            "lambda" => {
                let mut lambda_scope = scope.clone();
                if let Some(params) = node.child_by_field_name("parameters") {
                    for parameter in parse_parameters(params, self.content) {
                        lambda_scope.insert(parameter.name, Binding::Unknown);
                    }
                }
                match node.child_by_field_name("body") {
                    Some(body) => self.expression(body, &mut lambda_scope, context, depth + 1),
                    None => Ok(()),
                }
            }
            "list_comprehension" | "set_comprehension" | "dictionary_comprehension" | "generator_expression" => {
                let mut inner = scope.clone();
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for clause in children.iter().filter(|c| c.kind() == "for_in_clause") {
                    if let Some(right) = clause.child_by_field_name("right") {
                        self.expression(right, &mut inner, context, depth + 1)?;
                    }
                    if let Some(left) = clause.child_by_field_name("left") {
                        self.target(left, &mut inner, context, depth + 1)?;
                    }
                }
                for child in children.iter().filter(|c| c.kind() != "for_in_clause") {
                    self.expression(*child, &mut inner, context, depth + 1)?;
                }
                Ok(())
            }
            "named_expression" => {
                let value = node.child_by_field_name("value");
                if let Some(value) = value {
                    self.expression(value, scope, context, depth + 1)?;
                }
                if let Some(name) = field_text(node, "name", self.content) {
                    let inferred = value.and_then(|v| self.infer_call_type(v, scope));
                    scope.insert(name.to_string(), inferred.map(Binding::Value).unwrap_or(Binding::Unknown));
                }
                Ok(())
            }
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.expression(child, scope, context, depth + 1)?;
                }
                Ok(())
            }
        }
    }

    fn call(&mut self, node: Node, scope: &mut Scope, context: &Context, depth: usize) -> HalgraphResult<()> {
        let arguments = node.child_by_field_name("arguments");
        let shape = arguments.map(|a| self.call_arguments(a));

        if let Some(function) = node.child_by_field_name("function") {
            match function.kind() {
                "identifier" => {
                    let name = node_text(function, self.content).to_string();
                    self.free_call(function, &name, shape.clone(), scope);
                }
                "attribute" => {
                    let member = field_text(function, "attribute", self.content).unwrap_or_default().to_string();
                    if let Some(object) = function.child_by_field_name("object") {
                        let receiver = self.resolve_receiver(object, scope, 0);
                        self.member_reference(function, &member, receiver, shape.clone(), true);
                        self.expression(object, scope, context, depth + 1)?;
                    }
                }
                _ => self.expression(function, scope, context, depth + 1)?,
            }
        }

        if let Some(arguments) = arguments {
            self.expression(arguments, scope, context, depth + 1)?;
        }
        Ok(())
    }

    fn free_call(&mut self, node: Node, name: &str, shape: Option<CallArguments>, scope: &Scope) {
        match scope.get(name).or_else(|| self.module_scope.get(name)) {
            Some(Binding::Imported(origin)) => {
                let (module, symbol) = origin.rsplit_once('.').unwrap_or(("", origin.as_str()));
                let (module, symbol) = (module.to_string(), symbol.to_string());
                self.emit(call_kind(&symbol), node, &symbol, Receiver::Module { path: module }, shape);
            }
            // Defined in the candidate, or a value we cannot see into
            Some(_) => {}
            None if is_builtin(name) => {}
            None => self.emit(call_kind(name), node, name, Receiver::None, shape),
        }
    }

    fn attribute(&mut self, node: Node, scope: &mut Scope, context: &Context, depth: usize) -> HalgraphResult<()> {
        let member = field_text(node, "attribute", self.content).unwrap_or_default().to_string();
        if let Some(object) = node.child_by_field_name("object") {
            let receiver = self.resolve_receiver(object, scope, 0);
            self.member_reference(node, &member, receiver, None, false);
            self.expression(object, scope, context, depth + 1)?;
        }
        Ok(())
    }

    fn member_reference(
        &mut self,
        node: Node,
        member: &str,
        receiver: Receiver,
        shape: Option<CallArguments>,
        is_call: bool,
    ) {
        let kind = match (&receiver, is_call) {
            (Receiver::Module { .. }, true) => call_kind(member),
            (_, true) => ReferenceKind::MethodCall,
            (_, false) => ReferenceKind::AttributeAccess,
        };

        if let Receiver::LocalClass { name, .. } = &receiver {
            if self.local_defines(name, member) {
                return;
            }
        }
        self.emit(kind, node, member, receiver, shape);
    }

    fn call_arguments(&self, arguments: Node) -> CallArguments {
        let mut shape = CallArguments::default();
        if arguments.kind() == "generator_expression" {
            shape.positional = 1;
            return shape;
        }

        let mut cursor = arguments.walk();
        for argument in arguments.named_children(&mut cursor) {
            match argument.kind() {
                "comment" => {}
                "keyword_argument" => {
                    if let Some(name) = field_text(argument, "name", self.content) {
                        shape.keywords.push(name.to_string());
                    }
                }
                "list_splat" | "dictionary_splat" => shape.has_splat = true,
                _ => shape.positional += 1,
            }
        }
        shape
    }

    // ---- type propagation ----

    fn resolve_receiver(&self, node: Node, scope: &Scope, depth: usize) -> Receiver {
        if depth > self.max_depth {
            return Receiver::unknown("expression too deep");
        }
        match node.kind() {
            "identifier" => {
                let name = node_text(node, self.content);
                match scope.get(name).or_else(|| self.module_scope.get(name)) {
                    Some(Binding::Value(receiver)) => receiver.clone(),
                    Some(Binding::LocalClass(qualified)) => self.local_receiver(qualified),
                    Some(Binding::Imported(origin)) => Receiver::Class { name: origin.clone() },
                    Some(Binding::Module(path)) => Receiver::Module { path: path.clone() },
                    Some(Binding::LocalFunction) => Receiver::unknown(format!("`{}` is a function defined in the candidate", name)),
                    Some(Binding::Unknown) => Receiver::unknown(format!("`{}` has no statically known type", name)),
                    None if is_builtin(name) => Receiver::unknown(format!("`{}` is a builtin", name)),
                    None if self.has_star_import => Receiver::unknown(format!("`{}` may come from a star import", name)),
                    None => Receiver::unknown(format!("`{}` is not bound in the candidate", name)),
                }
            }
            "attribute" => {
                let attribute = field_text(node, "attribute", self.content).unwrap_or_default().to_string();
                let Some(object) = node.child_by_field_name("object") else {
                    return Receiver::unknown("attribute without object");
                };
                match self.resolve_receiver(object, scope, depth + 1) {
                    Receiver::Module { path } => Receiver::Module {
                        path: format!("{}.{}", path, attribute),
                    },
                    Receiver::LocalClass { name, .. } if self.local_defines(&name, &attribute) => {
                        match self.local_attribute_type(&name, &attribute) {
                            Some(receiver) => receiver,
                            None => Receiver::unknown(format!("`{}.{}` has no statically known type", name, attribute)),
                        }
                    }
                    unknown @ Receiver::Unknown { .. } => unknown,
                    owner => Receiver::Member {
                        owner: Box::new(owner),
                        attribute,
                    },
                }
            }
            "call" => self
                .infer_call_type(node, scope)
                .unwrap_or_else(|| Receiver::unknown("return type of a call")),
            "parenthesized_expression" => match first_named_child(node) {
                Some(inner) => self.resolve_receiver(inner, scope, depth + 1),
                None => Receiver::unknown("empty expression"),
            },
            "string" | "concatenated_string" => Receiver::unknown("`str` is a builtin"),
            other => Receiver::unknown(format!("{} expression", other.replace('_', " "))),
        }
    }

    /// Type of `Cls(...)`; any other value yields `None`
    fn infer_call_type(&self, node: Node, scope: &Scope) -> Option<Receiver> {
        if node.kind() != "call" {
            return None;
        }
        let function = node.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => {
                let name = node_text(function, self.content);
                match scope.get(name).or_else(|| self.module_scope.get(name)) {
                    Some(Binding::LocalClass(qualified)) => Some(self.local_receiver(qualified)),
                    Some(Binding::Value(receiver)) if name == "super" => Some(receiver.clone()),
                    Some(Binding::Imported(origin)) if is_class_like(origin) => Some(Receiver::Type { name: origin.clone() }),
                    Some(_) => None,
                    None if is_builtin(name) => None,
                    None if is_class_like(name) => Some(Receiver::Type { name: name.to_string() }),
                    None => None,
                }
            }
            "attribute" => {
                let attribute = field_text(function, "attribute", self.content)?;
                let object = function.child_by_field_name("object")?;
                match self.resolve_receiver(object, scope, 0) {
                    Receiver::Module { path } if is_class_like(attribute) => Some(Receiver::Type {
                        name: format!("{}.{}", path, attribute),
                    }),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Receiver for an annotation written in the candidate
    fn resolve_annotation(&self, annotation: &str, scope: &Scope) -> Option<Receiver> {
        let name = normalize_type_hint(annotation)?;
        let (head, rest) = match name.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (name.as_str(), None),
        };
        let joined = |prefix: &str| match rest {
            Some(rest) => format!("{}.{}", prefix, rest),
            None => prefix.to_string(),
        };

        match scope.get(head).or_else(|| self.module_scope.get(head)) {
            Some(Binding::LocalClass(qualified)) if rest.is_none() => Some(self.local_receiver(qualified)),
            Some(Binding::Imported(origin)) => Some(Receiver::Type { name: joined(origin.as_str()) }),
            Some(Binding::Module(path)) if rest.is_some() => Some(Receiver::Type { name: joined(path.as_str()) }),
            Some(_) => None,
            None if is_builtin(head) => None,
            None => {
                let local = format!("{}.{}", self.module_name, name);
                if self.classes.contains_key(&local) {
                    Some(self.local_receiver(&local))
                } else if is_class_like(&name) {
                    Some(Receiver::Type { name })
                } else {
                    None
                }
            }
        }
    }

    // ---- candidate-local classes ----

    fn resolve_base(&self, base: &str) -> BaseRef {
        let (head, rest) = match base.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (base, None),
        };

        match (self.module_scope.get(head), rest) {
            (Some(Binding::LocalClass(qualified)), None) => BaseRef::Local(qualified.clone()),
            (Some(Binding::Imported(origin)), _) => {
                let name = match rest {
                    Some(rest) => format!("{}.{}", origin, rest),
                    None => origin.clone(),
                };
                if is_trivial_base(&name) {
                    BaseRef::Trivial
                } else {
                    BaseRef::Graph(name)
                }
            }
            (Some(Binding::Module(path)), Some(rest)) => {
                let name = format!("{}.{}", path, rest);
                if is_trivial_base(&name) {
                    BaseRef::Trivial
                } else {
                    BaseRef::Graph(name)
                }
            }
            (Some(_), _) => BaseRef::Opaque(base.to_string()),
            (None, _) if is_trivial_base(base) => BaseRef::Trivial,
            (None, _) if is_builtin(head) => BaseRef::Opaque(base.to_string()),
            (None, _) => {
                let local = format!("{}.{}", self.module_name, base);
                if self.classes.contains_key(&local) {
                    BaseRef::Local(local)
                } else {
                    BaseRef::Graph(base.to_string())
                }
            }
        }
    }

    /// Local classes along the candidate inheritance chain, plus the graph
    /// and opaque bases reached from it
    fn local_chain(&self, class: &str) -> (Vec<String>, Vec<String>, Vec<String>) {
        let mut chain = Vec::new();
        let mut graph_bases = Vec::new();
        let mut opaque_bases = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([class.to_string()]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(info) = self.classes.get(&current) else {
                continue;
            };
            chain.push(current.clone());
            for base in &info.bases {
                match self.resolve_base(base) {
                    BaseRef::Local(local) => queue.push_back(local),
                    BaseRef::Graph(name) => {
                        if !graph_bases.contains(&name) {
                            graph_bases.push(name);
                        }
                    }
                    BaseRef::Trivial => {}
                    BaseRef::Opaque(name) => opaque_bases.push(name),
                }
            }
        }

        (chain, graph_bases, opaque_bases)
    }

    fn local_receiver(&self, class: &str) -> Receiver {
        let (_, graph_bases, opaque_bases) = self.local_chain(class);
        Receiver::LocalClass {
            name: class.to_string(),
            graph_bases,
            opaque_bases,
        }
    }

    fn local_defines(&self, class: &str, member: &str) -> bool {
        let (chain, _, _) = self.local_chain(class);
        chain
            .iter()
            .filter_map(|c| self.classes.get(c))
            .any(|info| info.members.contains(member))
    }

    fn local_attribute_type(&self, class: &str, attribute: &str) -> Option<Receiver> {
        let (chain, _, _) = self.local_chain(class);
        let hint = chain
            .iter()
            .filter_map(|c| self.classes.get(c))
            .find_map(|info| info.attribute_types.get(attribute))?;
        self.resolve_annotation(hint, &self.module_scope)
    }
}

/// Right-hand side of a chained assignment
fn innermost_value(assignment: Node) -> Option<Node> {
    let mut current = assignment;
    loop {
        let right = current.child_by_field_name("right")?;
        if right.kind() == "assignment" {
            current = right;
        } else {
            return Some(right);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> Vec<CandidateReference> {
        CandidateAnalyzer::default().analyze(source, None).unwrap().references
    }

    fn find<'r>(references: &'r [CandidateReference], member: &str) -> &'r CandidateReference {
        references
            .iter()
            .find(|r| r.member == member)
            .unwrap_or_else(|| panic!("no reference to {}", member))
    }

    #[test]
    fn test_constructor_assignment_types_receiver() {
        let references = analyze("from cache import Cache\n\nc = Cache()\nc.get(\"x\")\nc.put(\"x\", 1)\n");

        let import = find(&references, "Cache");
        assert_eq!(import.kind, ReferenceKind::Import);

        let constructor = references
            .iter()
            .find(|r| r.kind == ReferenceKind::ConstructorCall)
            .unwrap();
        assert_eq!(constructor.receiver, Receiver::Module { path: "cache".to_string() });

        let get = find(&references, "get");
        assert_eq!(get.kind, ReferenceKind::MethodCall);
        assert_eq!(get.receiver, Receiver::Type { name: "cache.Cache".to_string() });
        assert_eq!(get.arguments.as_ref().unwrap().positional, 1);

        let put = find(&references, "put");
        assert_eq!(put.arguments.as_ref().unwrap().positional, 2);
        assert_eq!(put.location.line, 5);
    }

    #[test]
    fn test_reassignment_resets_type() {
        let references = analyze("from cache import Cache\n\nc = Cache()\nc = load()\nc.get(1)\n");
        let get = find(&references, "get");
        assert!(get.receiver.is_unknown());
    }

    #[test]
    fn test_annotated_parameters_and_variables() {
        let references = analyze(
            r#"
from cache import Cache
import store

def use(c: Cache, raw, s: "store.Backend"):
    c.get(1)
    raw.get(2)
    s.flush()
    x: Cache = make()
    x.clear()
"#,
        );

        let receivers: Vec<(&str, &Receiver)> = references
            .iter()
            .filter(|r| r.kind == ReferenceKind::MethodCall)
            .map(|r| (r.member.as_str(), &r.receiver))
            .collect();
        assert_eq!(receivers[0], ("get", &Receiver::Type { name: "cache.Cache".to_string() }));
        assert_eq!(receivers[1].0, "get");
        assert!(receivers[1].1.is_unknown());
        assert_eq!(receivers[2], ("flush", &Receiver::Type { name: "store.Backend".to_string() }));
        assert_eq!(receivers[3], ("clear", &Receiver::Type { name: "cache.Cache".to_string() }));
    }

    #[test]
    fn test_function_scope_does_not_leak() {
        let references = analyze(
            "from cache import Cache\n\ndef build():\n    c = Cache()\n    return c\n\nc.get(1)\n",
        );
        let get = find(&references, "get");
        assert!(get.receiver.is_unknown());
    }

    #[test]
    fn test_function_sees_module_bindings_unless_rebound() {
        let references = analyze(
            r#"
from cache import Cache, Store

shared = Cache()
backend = Store()

def read():
    shared.get(1)
    backend.flush()

if ready():
    backend = make()
"#,
        );

        let get = find(&references, "get");
        assert_eq!(get.receiver, Receiver::Type { name: "cache.Cache".to_string() });
        let flush = find(&references, "flush");
        assert!(flush.receiver.is_unknown());
    }

    #[test]
    fn test_module_calls_and_builtins() {
        let references = analyze("import requests\nimport os.path\n\nresponse = requests.get(url)\nprint(len(response))\nos.path.join('a', 'b')\n");

        let get = find(&references, "get");
        assert_eq!(get.kind, ReferenceKind::FunctionCall);
        assert_eq!(get.receiver, Receiver::Module { path: "requests".to_string() });

        let join = find(&references, "join");
        assert_eq!(join.receiver, Receiver::Module { path: "os.path".to_string() });

        assert!(references.iter().all(|r| r.member != "print" && r.member != "len"));
    }

    #[test]
    fn test_candidate_local_names_are_not_references() {
        let references = analyze(
            r#"
class Helper:
    def __init__(self):
        self.count = 0

    def bump(self):
        self.count += 1
        self.total = self.count
        return self.total

def run():
    h = Helper()
    h.bump()
    h.missing()
    helper_fn()

def helper_fn():
    pass
"#,
        );

        assert!(references.iter().all(|r| r.member != "count" && r.member != "bump" && r.member != "total"));
        assert!(references.iter().all(|r| r.member != "Helper" && r.member != "helper_fn"));

        let missing = find(&references, "missing");
        assert!(matches!(missing.receiver, Receiver::LocalClass { ref graph_bases, .. } if graph_bases.is_empty()));
    }

    #[test]
    fn test_local_subclass_of_graph_class() {
        let references = analyze(
            r#"
from cache import Cache

class TtlCache(Cache):
    def __init__(self):
        super().__init__()
        self.ttl = 10

    def refresh(self):
        self.get("k")
        self.expire()
"#,
        );

        let get = find(&references, "get");
        match &get.receiver {
            Receiver::LocalClass { name, graph_bases, .. } => {
                assert_eq!(name, "candidate.TtlCache");
                assert_eq!(graph_bases, &vec!["cache.Cache".to_string()]);
            }
            other => panic!("unexpected receiver {:?}", other),
        }
        assert!(references.iter().all(|r| r.member != "ttl"));
    }

    #[test]
    fn test_attribute_chain_through_local_attribute() {
        let references = analyze(
            r#"
from engine import Engine

class Car:
    def __init__(self):
        self.engine = Engine()

    def start(self):
        self.engine.run()
"#,
        );

        let run = find(&references, "run");
        assert_eq!(run.receiver, Receiver::Type { name: "engine.Engine".to_string() });
    }

    #[test]
    fn test_attribute_chain_through_graph_type() {
        let references = analyze("from car import Car\n\ncar = Car()\ncar.engine.run()\n");

        let engine = find(&references, "engine");
        assert_eq!(engine.kind, ReferenceKind::AttributeAccess);

        let run = find(&references, "run");
        assert_eq!(
            run.receiver,
            Receiver::Member {
                owner: Box::new(Receiver::Type { name: "car.Car".to_string() }),
                attribute: "engine".to_string(),
            }
        );
    }

    #[test]
    fn test_comprehension_variables_are_scoped() {
        let references = analyze("from cache import Cache\n\nc = Cache()\nitems = [c.get(k) for c in sources]\n");
        let get = find(&references, "get");
        assert!(get.receiver.is_unknown());
    }

    #[test]
    fn test_call_arguments_shape() {
        let references = analyze("import api\n\napi.fetch(1, 2, timeout=3, *rest)\n");
        let fetch = find(&references, "fetch");
        let arguments = fetch.arguments.as_ref().unwrap();
        assert_eq!(arguments.positional, 2);
        assert_eq!(arguments.keywords, vec!["timeout".to_string()]);
        assert!(arguments.has_splat);
    }

    #[test]
    fn test_unbound_free_function_is_emitted() {
        let references = analyze("result = compute_total(1)\n");
        let compute = find(&references, "compute_total");
        assert_eq!(compute.kind, ReferenceKind::FunctionCall);
        assert_eq!(compute.receiver, Receiver::None);
    }

    #[test]
    fn test_syntax_error_is_rejected() {
        let result = CandidateAnalyzer::default().analyze("def broken(:\n", None);
        assert!(matches!(result, Err(HalgraphError::InvalidRequest(_))));
    }

    #[test]
    fn test_cancellation() {
        let cancel = AtomicBool::new(true);
        let source = "x = 1\n".repeat(400);
        let result = CandidateAnalyzer::default().analyze(&source, Some(&cancel));
        assert!(matches!(result, Err(HalgraphError::Cancelled)));
    }
}
