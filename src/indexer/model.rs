// Structural model extracted from Python sources

use serde::{Deserialize, Serialize};

/// Position of a syntax element (1-based line, 0-based column)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn from_node(node: tree_sitter::Node) -> Self {
        let start = node.start_position();
        Self {
            line: start.row as u32 + 1,
            column: start.column as u32,
        }
    }
}

/// How a parameter binds arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Declared before a `/` separator
    PositionalOnly,
    Positional,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<String>,
    pub has_default: bool,
    pub kind: ParameterKind,
}

impl Parameter {
    pub fn is_variadic(&self) -> bool {
        matches!(self.kind, ParameterKind::VarPositional | ParameterKind::VarKeyword)
    }

    /// Can be filled by a positional argument
    pub fn is_positional(&self) -> bool {
        matches!(self.kind, ParameterKind::PositionalOnly | ParameterKind::Positional)
    }

    /// Can be filled by a keyword argument naming it
    pub fn accepts_keyword(&self) -> bool {
        matches!(self.kind, ParameterKind::Positional | ParameterKind::KeywordOnly)
    }
}

/// Module-level function or method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionModel {
    pub name: String,
    pub qualified_name: String,
    pub parameters: Vec<Parameter>,
    pub return_annotation: Option<String>,
    pub decorators: Vec<String>,
    pub is_static: bool,
    pub is_classmethod: bool,
    pub is_async: bool,
    pub is_property: bool,
    pub docstring: Option<String>,
    pub location: Location,
}

/// Instance or class state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeModel {
    pub name: String,
    pub type_hint: Option<String>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassModel {
    pub name: String,
    /// Module path plus enclosing scopes, e.g. `pkg.mod.Outer.Inner`
    pub qualified_name: String,
    /// Dotted base-class expressions, unresolved
    pub bases: Vec<String>,
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
    pub methods: Vec<FunctionModel>,
    pub attributes: Vec<AttributeModel>,
    pub location: Location,
}

impl ClassModel {
    pub fn method(&self, name: &str) -> Option<&FunctionModel> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeModel> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// `import module [as alias]` or `from module import symbol [as alias]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportModel {
    /// Dotted module path, empty for `from . import x`
    pub module: String,
    /// Imported symbol for the `from` form, `*` for wildcard imports
    pub symbol: Option<String>,
    pub alias: Option<String>,
    /// Number of leading dots of a relative import
    pub level: u32,
    pub location: Location,
}

impl ImportModel {
    /// Name the import binds in the importing scope
    pub fn local_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.symbol {
            Some(symbol) => symbol.clone(),
            None => self.module.split('.').next().unwrap_or_default().to_string(),
        }
    }

    pub fn is_relative(&self) -> bool {
        self.level > 0
    }

    /// Full dotted origin of the imported name
    pub fn origin(&self) -> String {
        match &self.symbol {
            Some(symbol) if symbol != "*" && !self.module.is_empty() => {
                format!("{}.{}", self.module, symbol)
            }
            Some(symbol) if symbol != "*" => symbol.clone(),
            _ => self.module.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleModel {
    /// Path relative to the repository root, `/` separated
    pub path: String,
    /// Dotted module name derived from the path
    pub name: String,
    pub docstring: Option<String>,
    pub imports: Vec<ImportModel>,
    pub classes: Vec<ClassModel>,
    pub functions: Vec<FunctionModel>,
    /// Names assigned at module level
    pub globals: Vec<String>,
}

impl ModuleModel {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            name: module_name_from_path(path),
            docstring: None,
            imports: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn class(&self, name: &str) -> Option<&ClassModel> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn method_count(&self) -> usize {
        self.classes.iter().map(|c| c.methods.len()).sum()
    }

    pub fn attribute_count(&self) -> usize {
        self.classes.iter().map(|c| c.attributes.len()).sum()
    }
}

/// A file whose syntax could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// A file abandoned before or during extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Everything extracted from one repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryModel {
    pub id: String,
    pub revision: Option<String>,
    pub modules: Vec<ModuleModel>,
    pub failed: Vec<FailedFile>,
    pub skipped: Vec<SkippedFile>,
}

impl RepositoryModel {
    pub fn class_count(&self) -> usize {
        self.modules.iter().map(|m| m.classes.len()).sum()
    }

    pub fn method_count(&self) -> usize {
        self.modules.iter().map(|m| m.method_count()).sum()
    }

    pub fn function_count(&self) -> usize {
        self.modules.iter().map(|m| m.functions.len()).sum()
    }

    pub fn attribute_count(&self) -> usize {
        self.modules.iter().map(|m| m.attribute_count()).sum()
    }

    pub fn import_count(&self) -> usize {
        self.modules.iter().map(|m| m.imports.len()).sum()
    }
}

/// Convert `pkg/sub/mod.py` into `pkg.sub.mod` and `pkg/__init__.py` into `pkg`
pub fn module_name_from_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let trimmed = normalized.trim_start_matches("./").trim_start_matches('/');
    let without_ext = trimmed
        .strip_suffix(".pyi")
        .or_else(|| trimmed.strip_suffix(".py"))
        .unwrap_or(trimmed);

    let mut parts: Vec<&str> = without_ext.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() > 1 && parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_from_path() {
        assert_eq!(module_name_from_path("pkg/sub/mod.py"), "pkg.sub.mod");
        assert_eq!(module_name_from_path("pkg/__init__.py"), "pkg");
        assert_eq!(module_name_from_path("./setup.py"), "setup");
        assert_eq!(module_name_from_path("src\\app\\main.py"), "src.app.main");
        assert_eq!(module_name_from_path("__init__.py"), "__init__");
    }

    #[test]
    fn test_import_local_name() {
        let plain = ImportModel {
            module: "os.path".to_string(),
            symbol: None,
            alias: None,
            level: 0,
            location: Location::default(),
        };
        assert_eq!(plain.local_name(), "os");
        assert_eq!(plain.origin(), "os.path");

        let from = ImportModel {
            module: "cache.store".to_string(),
            symbol: Some("Cache".to_string()),
            alias: Some("C".to_string()),
            level: 0,
            location: Location::default(),
        };
        assert_eq!(from.local_name(), "C");
        assert_eq!(from.origin(), "cache.store.Cache");
    }
}
