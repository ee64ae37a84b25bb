// Python source extraction on top of tree-sitter

use std::time::{Duration, Instant};

use tree_sitter::{Node, ParseOptions, ParseState, Parser as TreeParser, Tree};

use super::model::{
    AttributeModel, ClassModel, FunctionModel, ImportModel, Location, ModuleModel, Parameter,
    ParameterKind,
};
use super::SourceParser;

/// Methods whose `self.<name> = ...` assignments define instance attributes
pub const CONSTRUCTOR_METHODS: &[&str] = &["__init__", "__new__", "__post_init__", "setUp", "setup"];

/// Statements whose nested blocks still belong to the enclosing scope
const COMPOUND_STATEMENTS: &[&str] = &[
    "if_statement",
    "for_statement",
    "while_statement",
    "try_statement",
    "with_statement",
];

/// Why a single file produced no module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionFailure {
    /// The file is not valid Python
    Syntax { line: u32, column: u32, message: String },
    /// The file was abandoned (nesting too deep, walk too slow)
    Budget(String),
}

/// Per-file bounds that protect the worker pool from pathological inputs
#[derive(Debug, Clone, Copy)]
pub struct ExtractionLimits {
    pub max_nesting_depth: usize,
    pub file_timeout: Duration,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_nesting_depth: 100,
            file_timeout: Duration::from_millis(5000),
        }
    }
}

/// Python parser using tree-sitter
pub struct PythonParser {
    limits: ExtractionLimits,
}

impl PythonParser {
    pub fn new() -> Self {
        Self::with_limits(ExtractionLimits::default())
    }

    pub fn with_limits(limits: ExtractionLimits) -> Self {
        Self { limits }
    }

    pub fn parse_tree(&self, content: &str) -> anyhow::Result<Tree> {
        self.parse_tree_until(content, Instant::now() + self.limits.file_timeout)
    }

    /// Parse, giving up once `deadline` passes
    fn parse_tree_until(&self, content: &str, deadline: Instant) -> anyhow::Result<Tree> {
        let mut parser = TreeParser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into())?;

        let bytes = content.as_bytes();
        let mut past_deadline = |_: &ParseState| Instant::now() >= deadline;
        let options = ParseOptions::new().progress_callback(&mut past_deadline);

        let tree = parser
            .parse_with_options(&mut |offset, _| bytes.get(offset..).unwrap_or_default(), None, Some(options))
            .ok_or_else(|| anyhow::anyhow!("parsing exceeded {} ms", self.limits.file_timeout.as_millis()))?;

        Ok(tree)
    }

    /// Parse and extract one file into a module model. Parsing and the
    /// walk share one time budget.
    pub fn extract_module(&self, path: &str, content: &str) -> Result<ModuleModel, ExtractionFailure> {
        let deadline = Instant::now() + self.limits.file_timeout;
        let tree = self
            .parse_tree_until(content, deadline)
            .map_err(|e| ExtractionFailure::Budget(e.to_string()))?;
        self.walk_tree(path, content, &tree, deadline)
    }

    /// Extract a module from an already parsed tree
    pub fn extract_from_tree(
        &self,
        path: &str,
        content: &str,
        tree: &Tree,
    ) -> Result<ModuleModel, ExtractionFailure> {
        self.walk_tree(path, content, tree, Instant::now() + self.limits.file_timeout)
    }

    fn walk_tree(
        &self,
        path: &str,
        content: &str,
        tree: &Tree,
        deadline: Instant,
    ) -> Result<ModuleModel, ExtractionFailure> {
        if let Some(failure) = syntax_failure(tree.root_node(), content) {
            return Err(failure);
        }

        let mut walk = ModuleWalk {
            content,
            module: ModuleModel::new(path),
            deadline,
            limits: self.limits,
        };
        walk.visit_module(tree.root_node())?;
        Ok(walk.module)
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceParser for PythonParser {
    fn can_parse(&self, file_path: &str) -> bool {
        file_path.ends_with(".py") || file_path.ends_with(".pyi")
    }

    fn extract(&self, file_path: &str, content: &str) -> Result<ModuleModel, ExtractionFailure> {
        self.extract_module(file_path, content)
    }
}

/// Locate the first ERROR or MISSING node of a tree
pub fn syntax_failure(root: Node, content: &str) -> Option<ExtractionFailure> {
    if !root.has_error() {
        return None;
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let location = Location::from_node(node);
            let message = if node.is_missing() {
                format!("missing '{}'", node.kind())
            } else {
                let snippet: String = node_text(node, content).chars().take(40).collect();
                format!("invalid syntax near '{}'", snippet.trim())
            };
            return Some(ExtractionFailure::Syntax {
                line: location.line,
                column: location.column,
                message,
            });
        }

        // Push in reverse so the leftmost error is reported first
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).filter(|c| c.has_error()).collect();
        stack.extend(children.into_iter().rev());
    }

    let location = Location::from_node(root);
    Some(ExtractionFailure::Syntax {
        line: location.line,
        column: location.column,
        message: "invalid syntax".to_string(),
    })
}

struct ModuleWalk<'a> {
    content: &'a str,
    module: ModuleModel,
    deadline: Instant,
    limits: ExtractionLimits,
}

impl<'a> ModuleWalk<'a> {
    fn check_budget(&self, depth: usize) -> Result<(), ExtractionFailure> {
        if depth > self.limits.max_nesting_depth {
            return Err(ExtractionFailure::Budget(format!(
                "nesting depth exceeds {}",
                self.limits.max_nesting_depth
            )));
        }
        if Instant::now() > self.deadline {
            return Err(ExtractionFailure::Budget(format!(
                "extraction exceeded {} ms",
                self.limits.file_timeout.as_millis()
            )));
        }
        Ok(())
    }

    fn visit_module(&mut self, root: Node) -> Result<(), ExtractionFailure> {
        self.module.docstring = docstring_summary(root, self.content);
        let prefix = self.module.name.clone();

        let mut statements = Vec::new();
        flatten_statements(root, &mut statements, 0, self.limits.max_nesting_depth)?;

        for statement in statements {
            self.check_budget(0)?;
            match statement.kind() {
                "import_statement" | "import_from_statement" | "future_import_statement" => {
                    let imports = parse_imports(statement, self.content);
                    self.module.imports.extend(imports);
                }
                "expression_statement" => {
                    for name in assigned_names(statement, self.content) {
                        if !self.module.globals.contains(&name) {
                            self.module.globals.push(name);
                        }
                    }
                }
                _ => {
                    if let Some((definition, decorators)) = unwrap_definition(statement, self.content) {
                        self.visit_definition(definition, decorators, &prefix, None, 1)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Visit a class or function definition at module scope (`owner` = None)
    /// or nested inside a function body
    fn visit_definition(
        &mut self,
        node: Node,
        decorators: Vec<String>,
        prefix: &str,
        owner: Option<&str>,
        depth: usize,
    ) -> Result<(), ExtractionFailure> {
        self.check_budget(depth)?;
        match node.kind() {
            "class_definition" => {
                self.visit_class(node, decorators, prefix, depth)?;
            }
            "function_definition" => {
                let function = parse_function(node, decorators, prefix, false, self.content);
                let nested_prefix = function.qualified_name.clone();
                if owner.is_none() {
                    upsert_by_name(&mut self.module.functions, function, |f| &f.name);
                }
                self.visit_nested_classes(node, &nested_prefix, depth + 1)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_class(
        &mut self,
        node: Node,
        decorators: Vec<String>,
        prefix: &str,
        depth: usize,
    ) -> Result<(), ExtractionFailure> {
        let Some(name) = field_text(node, "name", self.content) else {
            return Ok(());
        };
        let qualified_name = format!("{}.{}", prefix, name);

        let mut class = ClassModel {
            name: name.to_string(),
            qualified_name: qualified_name.clone(),
            bases: parse_bases(node, self.content),
            decorators,
            docstring: node
                .child_by_field_name("body")
                .and_then(|body| docstring_summary(body, self.content)),
            methods: Vec::new(),
            attributes: Vec::new(),
            location: Location::from_node(node),
        };

        if let Some(body) = node.child_by_field_name("body") {
            let mut statements = Vec::new();
            flatten_statements(body, &mut statements, depth, self.limits.max_nesting_depth)?;

            for statement in statements {
                self.check_budget(depth)?;
                if statement.kind() == "expression_statement" {
                    for attribute in class_level_attributes(statement, self.content) {
                        upsert_by_name(&mut class.attributes, attribute, |a| &a.name);
                    }
                    continue;
                }

                let Some((definition, decorators)) = unwrap_definition(statement, self.content) else {
                    continue;
                };
                match definition.kind() {
                    "function_definition" => {
                        let method = parse_function(definition, decorators, &qualified_name, true, self.content);
                        if CONSTRUCTOR_METHODS.contains(&method.name.as_str()) {
                            for attribute in self.instance_attributes(definition, &method)? {
                                upsert_by_name(&mut class.attributes, attribute, |a| &a.name);
                            }
                        }
                        let nested_prefix = method.qualified_name.clone();
                        upsert_by_name(&mut class.methods, method, |m| &m.name);
                        self.visit_nested_classes(definition, &nested_prefix, depth + 1)?;
                    }
                    "class_definition" => {
                        self.visit_class(definition, decorators, &qualified_name, depth + 1)?;
                    }
                    _ => {}
                }
            }
        }

        upsert_by_name(&mut self.module.classes, class, |c| &c.qualified_name);
        Ok(())
    }

    /// Classes defined inside a function body are flattened with a qualified name
    fn visit_nested_classes(&mut self, function: Node, prefix: &str, depth: usize) -> Result<(), ExtractionFailure> {
        let Some(body) = function.child_by_field_name("body") else {
            return Ok(());
        };
        let mut statements = Vec::new();
        flatten_statements(body, &mut statements, depth, self.limits.max_nesting_depth)?;

        for statement in statements {
            if let Some((definition, decorators)) = unwrap_definition(statement, self.content) {
                self.visit_definition(definition, decorators, prefix, Some(prefix), depth + 1)?;
            }
        }
        Ok(())
    }

    /// Collect `self.<name> = ...` assignments from a constructor-like method
    fn instance_attributes(&self, method_node: Node, method: &FunctionModel) -> Result<Vec<AttributeModel>, ExtractionFailure> {
        let Some(receiver) = method.parameters.first().map(|p| p.name.as_str()) else {
            return Ok(Vec::new());
        };
        let Some(body) = method_node.child_by_field_name("body") else {
            return Ok(Vec::new());
        };

        let mut attributes: Vec<AttributeModel> = Vec::new();
        let mut stack = vec![body];
        while let Some(node) = stack.pop() {
            if Instant::now() > self.deadline {
                return Err(ExtractionFailure::Budget(format!(
                    "extraction exceeded {} ms",
                    self.limits.file_timeout.as_millis()
                )));
            }

            match node.kind() {
                // Nested scopes have their own `self`
                "function_definition" | "class_definition" | "lambda" => continue,
                "assignment" => {
                    if let Some(attribute) = self_assignment(node, receiver, &method.parameters, self.content) {
                        if !attributes.iter().any(|a| a.name == attribute.name) {
                            attributes.push(attribute);
                        }
                    }
                }
                _ => {}
            }

            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }

        attributes.sort_by_key(|a| (a.location.line, a.location.column));
        Ok(attributes)
    }
}

/// Replace an existing entry with the same key (later definitions win)
fn upsert_by_name<T, F>(items: &mut Vec<T>, item: T, key: F)
where
    F: Fn(&T) -> &String,
{
    if let Some(existing) = items.iter_mut().find(|i| key(i) == key(&item)) {
        *existing = item;
    } else {
        items.push(item);
    }
}

/// Statements of a block, descending into if/for/while/try/with bodies
pub fn flatten_statements<'t>(
    block: Node<'t>,
    out: &mut Vec<Node<'t>>,
    depth: usize,
    max_depth: usize,
) -> Result<(), ExtractionFailure> {
    if depth > max_depth {
        return Err(ExtractionFailure::Budget(format!("nesting depth exceeds {}", max_depth)));
    }

    let mut cursor = block.walk();
    for statement in block.named_children(&mut cursor) {
        if COMPOUND_STATEMENTS.contains(&statement.kind()) {
            let mut inner = statement.walk();
            for part in statement.named_children(&mut inner) {
                if part.kind() == "block" {
                    flatten_statements(part, out, depth + 1, max_depth)?;
                } else if part.kind().ends_with("_clause") {
                    flatten_statements(part, out, depth + 1, max_depth)?;
                }
            }
        } else if statement.kind() == "block" {
            flatten_statements(statement, out, depth + 1, max_depth)?;
        } else {
            out.push(statement);
        }
    }
    Ok(())
}

/// Resolve `decorated_definition` into its definition and decorator names
pub fn unwrap_definition<'t>(node: Node<'t>, content: &str) -> Option<(Node<'t>, Vec<String>)> {
    match node.kind() {
        "class_definition" | "function_definition" => Some((node, Vec::new())),
        "decorated_definition" => {
            let definition = node.child_by_field_name("definition")?;
            let mut cursor = node.walk();
            let decorators = node
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "decorator")
                .filter_map(|d| decorator_name(d, content))
                .collect();
            Some((definition, decorators))
        }
        _ => None,
    }
}

fn decorator_name(decorator: Node, content: &str) -> Option<String> {
    let expression = first_named_child(decorator)?;
    let target = if expression.kind() == "call" {
        expression.child_by_field_name("function")?
    } else {
        expression
    };
    Some(node_text(target, content).trim().to_string())
}

/// Parse a function or method definition
pub fn parse_function(
    node: Node,
    decorators: Vec<String>,
    prefix: &str,
    is_method: bool,
    content: &str,
) -> FunctionModel {
    let name = field_text(node, "name", content).unwrap_or_default().to_string();
    let qualified_name = format!("{}.{}", prefix, name);

    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| parse_parameters(p, content))
        .unwrap_or_default();

    let has_decorator = |wanted: &[&str]| {
        decorators.iter().any(|d| {
            let last = d.rsplit('.').next().unwrap_or(d);
            wanted.contains(&last)
        })
    };
    let is_static = is_method && has_decorator(&["staticmethod"]);
    let is_classmethod = is_method && has_decorator(&["classmethod"]);
    let is_property = is_method
        && (has_decorator(&["property", "cached_property"])
            || decorators.iter().any(|d| d.ends_with(".setter") || d.ends_with(".getter")));

    let mut cursor = node.walk();
    let is_async = node.children(&mut cursor).any(|c| c.kind() == "async");

    FunctionModel {
        name,
        qualified_name,
        parameters,
        return_annotation: field_text(node, "return_type", content).map(|s| s.to_string()),
        is_static,
        is_classmethod,
        is_async,
        is_property,
        decorators,
        docstring: node
            .child_by_field_name("body")
            .and_then(|body| docstring_summary(body, content)),
        location: Location::from_node(node),
    }
}

/// Parse a `parameters` node into an ordered parameter list
pub fn parse_parameters(params: Node, content: &str) -> Vec<Parameter> {
    let mut parameters = Vec::new();
    let mut keyword_only = false;

    let positional = |keyword_only: bool| {
        if keyword_only {
            ParameterKind::KeywordOnly
        } else {
            ParameterKind::Positional
        }
    };

    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => parameters.push(Parameter {
                name: node_text(child, content).to_string(),
                annotation: None,
                has_default: false,
                kind: positional(keyword_only),
            }),
            "typed_parameter" => {
                let annotation = field_text(child, "type", content).map(|s| s.to_string());
                let Some(inner) = first_named_child(child) else { continue };
                let (name, kind) = match inner.kind() {
                    "list_splat_pattern" => {
                        keyword_only = true;
                        (splat_name(inner, content), ParameterKind::VarPositional)
                    }
                    "dictionary_splat_pattern" => (splat_name(inner, content), ParameterKind::VarKeyword),
                    _ => (node_text(inner, content).to_string(), positional(keyword_only)),
                };
                parameters.push(Parameter { name, annotation, has_default: false, kind });
            }
            "default_parameter" | "typed_default_parameter" => parameters.push(Parameter {
                name: field_text(child, "name", content).unwrap_or_default().to_string(),
                annotation: field_text(child, "type", content).map(|s| s.to_string()),
                has_default: true,
                kind: positional(keyword_only),
            }),
            "list_splat_pattern" => {
                keyword_only = true;
                parameters.push(Parameter {
                    name: splat_name(child, content),
                    annotation: None,
                    has_default: false,
                    kind: ParameterKind::VarPositional,
                });
            }
            "dictionary_splat_pattern" => parameters.push(Parameter {
                name: splat_name(child, content),
                annotation: None,
                has_default: false,
                kind: ParameterKind::VarKeyword,
            }),
            "keyword_separator" => keyword_only = true,
            "positional_separator" => {
                for parameter in parameters.iter_mut().filter(|p| p.kind == ParameterKind::Positional) {
                    parameter.kind = ParameterKind::PositionalOnly;
                }
            }
            _ => {}
        }
    }

    parameters
}

fn splat_name(node: Node, content: &str) -> String {
    first_named_child(node)
        .map(|n| node_text(n, content).to_string())
        .unwrap_or_else(|| node_text(node, content).trim_start_matches('*').to_string())
}

/// Base-class expressions of a class definition as dotted strings
fn parse_bases(class: Node, content: &str) -> Vec<String> {
    let Some(superclasses) = class.child_by_field_name("superclasses") else {
        return Vec::new();
    };

    let mut bases = Vec::new();
    let mut cursor = superclasses.walk();
    for argument in superclasses.named_children(&mut cursor) {
        let base = match argument.kind() {
            "identifier" | "attribute" => Some(node_text(argument, content)),
            // Generic[T], Base[int]
            "subscript" => argument
                .child_by_field_name("value")
                .map(|v| node_text(v, content)),
            // metaclass=..., **kwargs
            _ => None,
        };
        if let Some(base) = base {
            bases.push(compact_dotted(base));
        }
    }
    bases
}

/// Parse import, from-import and `__future__` import statements
pub fn parse_imports(node: Node, content: &str) -> Vec<ImportModel> {
    let location = Location::from_node(node);
    let mut imports = Vec::new();

    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let (module, alias) = aliased(name, content);
                imports.push(ImportModel { module, symbol: None, alias, level: 0, location });
            }
        }
        "import_from_statement" | "future_import_statement" => {
            let (module, level) = if node.kind() == "future_import_statement" {
                ("__future__".to_string(), 0)
            } else {
                match node.child_by_field_name("module_name") {
                    Some(m) if m.kind() == "relative_import" => relative_module(m, content),
                    Some(m) => (compact_dotted(node_text(m, content)), 0),
                    None => (String::new(), 0),
                }
            };

            let mut cursor = node.walk();
            let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
            if names.is_empty() {
                let mut cursor = node.walk();
                if node.named_children(&mut cursor).any(|c| c.kind() == "wildcard_import") {
                    imports.push(ImportModel {
                        module: module.clone(),
                        symbol: Some("*".to_string()),
                        alias: None,
                        level,
                        location,
                    });
                }
            }
            for name in names {
                let (symbol, alias) = aliased(name, content);
                imports.push(ImportModel {
                    module: module.clone(),
                    symbol: Some(symbol),
                    alias,
                    level,
                    location,
                });
            }
        }
        _ => {}
    }

    imports
}

fn aliased(node: Node, content: &str) -> (String, Option<String>) {
    if node.kind() == "aliased_import" {
        let name = field_text(node, "name", content).map(compact_dotted).unwrap_or_default();
        let alias = field_text(node, "alias", content).map(|s| s.to_string());
        (name, alias)
    } else {
        (compact_dotted(node_text(node, content)), None)
    }
}

fn relative_module(node: Node, content: &str) -> (String, u32) {
    let mut level = 0;
    let mut module = String::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "import_prefix" => level = node_text(child, content).matches('.').count() as u32,
            "dotted_name" => module = compact_dotted(node_text(child, content)),
            _ => {}
        }
    }
    (module, level)
}

/// Names bound by a module-level assignment statement
fn assigned_names(statement: Node, content: &str) -> Vec<String> {
    let Some(assignment) = first_named_child(statement) else {
        return Vec::new();
    };
    if assignment.kind() != "assignment" {
        return Vec::new();
    }
    let Some(left) = assignment.child_by_field_name("left") else {
        return Vec::new();
    };

    match left.kind() {
        "identifier" => vec![node_text(left, content).to_string()],
        "pattern_list" | "tuple_pattern" | "list_pattern" => {
            let mut cursor = left.walk();
            left.named_children(&mut cursor)
                .filter(|c| c.kind() == "identifier")
                .map(|c| node_text(c, content).to_string())
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Class-body assignments and annotated fields (`x = 1`, `name: str`)
fn class_level_attributes(statement: Node, content: &str) -> Vec<AttributeModel> {
    let Some(assignment) = first_named_child(statement) else {
        return Vec::new();
    };
    if assignment.kind() != "assignment" {
        return Vec::new();
    }

    let type_hint = field_text(assignment, "type", content)
        .map(|s| s.to_string())
        .or_else(|| {
            assignment
                .child_by_field_name("right")
                .and_then(|right| infer_value_type(right, &[], content))
        });

    assigned_names(statement, content)
        .into_iter()
        .map(|name| AttributeModel {
            name,
            type_hint: type_hint.clone(),
            location: Location::from_node(assignment),
        })
        .collect()
}

fn self_assignment(
    assignment: Node,
    receiver: &str,
    parameters: &[Parameter],
    content: &str,
) -> Option<AttributeModel> {
    let left = assignment.child_by_field_name("left")?;
    if left.kind() != "attribute" {
        return None;
    }
    let object = left.child_by_field_name("object")?;
    if object.kind() != "identifier" || node_text(object, content) != receiver {
        return None;
    }
    let name = field_text(left, "attribute", content)?.to_string();

    let type_hint = field_text(assignment, "type", content)
        .map(|s| s.to_string())
        .or_else(|| {
            assignment
                .child_by_field_name("right")
                .and_then(|right| infer_value_type(right, parameters, content))
        });

    Some(AttributeModel {
        name,
        type_hint,
        location: Location::from_node(assignment),
    })
}

/// Statically evident type of an expression, if any
pub fn infer_value_type(value: Node, parameters: &[Parameter], content: &str) -> Option<String> {
    match value.kind() {
        "call" => {
            let function = value.child_by_field_name("function")?;
            if !matches!(function.kind(), "identifier" | "attribute") {
                return None;
            }
            let callee = compact_dotted(node_text(function, content));
            let last = callee.rsplit('.').next().unwrap_or(&callee);
            if last.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                Some(callee)
            } else {
                None
            }
        }
        "string" | "concatenated_string" => Some("str".to_string()),
        "integer" => Some("int".to_string()),
        "float" => Some("float".to_string()),
        "true" | "false" => Some("bool".to_string()),
        "list" | "list_comprehension" => Some("list".to_string()),
        "dictionary" | "dictionary_comprehension" => Some("dict".to_string()),
        "set" | "set_comprehension" => Some("set".to_string()),
        "tuple" => Some("tuple".to_string()),
        "identifier" => {
            let name = node_text(value, content);
            parameters
                .iter()
                .find(|p| p.name == name)
                .and_then(|p| p.annotation.clone())
        }
        _ => None,
    }
}

/// First line of a block's leading string literal
pub fn docstring_summary(block: Node, content: &str) -> Option<String> {
    let first = first_named_child_skipping_comments(block)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = first_named_child(first)?;
    if literal.kind() != "string" {
        return None;
    }

    let mut cursor = literal.walk();
    let mut text: String = literal
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "string_content")
        .map(|c| node_text(c, content))
        .collect();
    if text.is_empty() {
        text = node_text(literal, content)
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
    }

    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.to_string())
}

fn first_named_child_skipping_comments(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let first = node.named_children(&mut cursor).find(|c| c.kind() != "comment");
    first
}

pub fn first_named_child(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let first = node.named_children(&mut cursor).next();
    first
}

pub fn node_text<'c>(node: Node, content: &'c str) -> &'c str {
    content.get(node.byte_range()).unwrap_or("")
}

pub fn field_text<'c>(node: Node, field: &str, content: &'c str) -> Option<&'c str> {
    node.child_by_field_name(field).map(|n| node_text(n, content))
}

/// Drop whitespace and line continuations inside a dotted expression
pub fn compact_dotted(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != '\\')
        .collect()
}
