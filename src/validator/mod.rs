// Candidate validation against the loaded repository graphs

pub mod report;
pub mod signature;
pub mod suggest;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::analyzer::{CandidateAnalysis, CandidateAnalyzer, CandidateReference, ReferenceKind, Receiver};
use crate::config::{Config, ValidationConfig};
use crate::error::{HalgraphError, HalgraphResult};
use crate::index::{GraphEdge, GraphNode, GraphStore};
use crate::indexer::normalize_repository_id;
use crate::indexer::parser::ExtractionLimits;
use crate::query::engine::{parameters_of, MemberMatch, QueryEngine, SymbolMatch};
use report::{ReportBuilder, Severity, ValidationReport, Verdict};
use signature::check_call;
use suggest::{nearest, Suggestion};

/// Validates candidate files; cheap to clone into blocking tasks
#[derive(Clone)]
pub struct Validator {
    store: Arc<dyn GraphStore>,
    config: Arc<ValidationConfig>,
    limits: ExtractionLimits,
}

impl Validator {
    pub fn new(store: Arc<dyn GraphStore>, config: &Config) -> Self {
        Self {
            store,
            config: Arc::new(config.validation.clone()),
            limits: config.extraction.limits(),
        }
    }

    /// Repositories to validate against; all ingested ones when none are named
    fn select_repositories(store: &dyn GraphStore, requested: &[String]) -> HalgraphResult<Vec<String>> {
        let known = store.repositories().map_err(HalgraphError::storage)?;
        if requested.is_empty() {
            return Ok(known.into_iter().map(|r| r.id).collect());
        }

        let mut selected = Vec::new();
        for location in requested {
            let id = normalize_repository_id(location);
            if !known.iter().any(|r| r.id == id) {
                return Err(HalgraphError::UnknownRepository(location.clone()));
            }
            if !selected.contains(&id) {
                selected.push(id);
            }
        }
        Ok(selected)
    }

    pub fn validate(&self, content: &str, repositories: &[String]) -> HalgraphResult<ValidationReport> {
        let cancel = AtomicBool::new(false);
        self.validate_cancellable(content, repositories, &cancel)
    }

    /// Validate one candidate. Once `cancel` is raised no report is produced.
    pub fn validate_cancellable(
        &self,
        content: &str,
        repositories: &[String],
        cancel: &AtomicBool,
    ) -> HalgraphResult<ValidationReport> {
        let start = Instant::now();
        let analysis = CandidateAnalyzer::new(self.limits).analyze(content, Some(cancel))?;

        // Selection and every lookup share one snapshot, so a concurrent
        // re-ingest is seen entirely or not at all
        let view = self.store.read_view().map_err(HalgraphError::storage)?;
        let selected = Self::select_repositories(view.as_ref(), repositories)?;

        let engine = QueryEngine::new(
            view,
            selected.clone(),
            self.config.max_inheritance_depth,
        );
        let checker = ReferenceChecker {
            engine: &engine,
            config: &self.config,
            analysis: &analysis,
        };

        let mut builder = ReportBuilder::new(selected);
        for reference in &analysis.references {
            if cancel.load(Ordering::Relaxed) {
                return Err(HalgraphError::Cancelled);
            }
            let verdict = checker.check(reference).map_err(HalgraphError::storage)?;
            debug!("{} ({:?}) -> {:?}", reference.expression, reference.kind, verdict);
            builder.record(reference, verdict);
        }

        let report = builder.finish();
        info!(
            "Validated {} references in {:?}: {} valid, {} hallucinations, {} signature mismatches, {} unverifiable",
            report.checked,
            start.elapsed(),
            report.valid,
            report.hallucinations.len(),
            report.signature_mismatches.len(),
            report.unverifiable_count
        );
        Ok(report)
    }

    /// Validate on the blocking pool under `validation.timeout_ms`
    pub async fn validate_with_timeout(
        &self,
        content: String,
        repositories: Vec<String>,
    ) -> HalgraphResult<ValidationReport> {
        let budget = self.config.timeout();
        let cancel = Arc::new(AtomicBool::new(false));

        let task = {
            let validator = self.clone();
            let cancel = Arc::clone(&cancel);
            tokio::task::spawn_blocking(move || validator.validate_cancellable(&content, &repositories, &cancel))
        };

        match tokio::time::timeout(budget, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(HalgraphError::Task(e.to_string())),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                warn!("Validation exceeded {:?} and was cancelled", budget);
                Err(HalgraphError::ValidationTimeout(budget))
            }
        }
    }

    /// Validate independent candidates concurrently, results in input order
    pub async fn validate_many(
        &self,
        candidates: Vec<String>,
        repositories: &[String],
    ) -> Vec<HalgraphResult<ValidationReport>> {
        let tasks = candidates
            .into_iter()
            .map(|content| self.validate_with_timeout(content, repositories.to_vec()));
        join_all(tasks).await
    }
}

/// Lookups for a single candidate against one engine
struct ReferenceChecker<'a> {
    engine: &'a QueryEngine,
    config: &'a ValidationConfig,
    analysis: &'a CandidateAnalysis,
}

impl<'a> ReferenceChecker<'a> {
    fn check(&self, reference: &CandidateReference) -> Result<Verdict> {
        if reference.kind == ReferenceKind::Import {
            return self.import(reference);
        }

        match &reference.receiver {
            Receiver::None => self.free_name(reference),
            Receiver::Module { path } => self.module_member(path, reference),
            Receiver::Type { name } => self.typed(name, true, reference),
            Receiver::Class { name } => self.typed(name, false, reference),
            Receiver::LocalClass {
                name,
                graph_bases,
                opaque_bases,
            } => self.local_class_member(name, graph_bases, opaque_bases, reference),
            Receiver::Member { owner, attribute } => match self.attribute_type(owner, attribute)? {
                Ok(class) => self.member(&class, true, reference),
                Err(reason) => Ok(Verdict::unverifiable(reason)),
            },
            Receiver::Unknown { reason } => Ok(Verdict::unverifiable(format!("unknown receiver: {}", reason))),
        }
    }

    fn import(&self, reference: &CandidateReference) -> Result<Verdict> {
        let Some(import) = &reference.import else {
            return Ok(Verdict::unverifiable("import without a module path"));
        };
        if import.is_relative() {
            return Ok(Verdict::unverifiable(
                "relative imports depend on the candidate's package location",
            ));
        }

        let module = import.module.as_str();
        if self.config.is_external(module) {
            return Ok(Verdict::unverifiable(format!(
                "`{}` is an allow-listed external package",
                root_of(module)
            )));
        }
        if !self.engine.module_exists(module)? {
            return Ok(Verdict::hallucination(
                format!("module `{}` is not in any loaded repository", module),
                Severity::High,
                None,
            ));
        }

        match import.symbol.as_deref() {
            None | Some("*") => Ok(Verdict::valid(module)),
            Some(symbol) => match self.engine.symbol_in_module(module, symbol)? {
                Some(found) => Ok(Verdict::valid(describe(&found))),
                None => {
                    let suggestion = self.module_suggestion(module, symbol)?;
                    Ok(Verdict::hallucination(
                        format!("module `{}` defines no `{}`", module, symbol),
                        Severity::Critical,
                        suggestion,
                    ))
                }
            },
        }
    }

    /// Calls to names the candidate neither defines nor imports
    fn free_name(&self, reference: &CandidateReference) -> Result<Verdict> {
        let functions = self.engine.find_functions(&reference.member, None)?;
        if !functions.is_empty() {
            let Some(arguments) = &reference.arguments else {
                return Ok(Verdict::valid(functions[0].qualified_name.clone()));
            };

            let mut first_problem = None;
            for function in &functions {
                match check_call(&parameters_of(function), false, arguments) {
                    None => return Ok(Verdict::valid(function.qualified_name.clone())),
                    Some(problem) => {
                        first_problem.get_or_insert_with(|| (function.qualified_name.clone(), problem));
                    }
                }
            }
            if let Some((function, problem)) = first_problem {
                return Ok(Verdict::SignatureMismatch {
                    reason: format!("`{}()` {}", reference.member, problem),
                    supplied_by: Some(function),
                });
            }
        }

        if let Some(class) = self.engine.resolve_class(&reference.member)? {
            return self.constructed(&class, reference);
        }
        if self.analysis.has_star_import {
            return Ok(Verdict::unverifiable(format!(
                "`{}` may come from a star import",
                reference.member
            )));
        }

        Ok(Verdict::hallucination(
            format!(
                "no module-level function or class named `{}` in the loaded repositories",
                reference.member
            ),
            Severity::High,
            None,
        ))
    }

    fn module_member(&self, path: &str, reference: &CandidateReference) -> Result<Verdict> {
        if self.config.is_external(path) {
            return Ok(Verdict::unverifiable(format!(
                "`{}` is an allow-listed external package",
                root_of(path)
            )));
        }

        if !self.engine.module_exists(path)? {
            // `import pkg` then `pkg.Cls.method()`
            if let Some(class) = self.engine.resolve_class(path)? {
                return self.member(&class, false, reference);
            }
            return Ok(Verdict::unverifiable(format!(
                "module `{}` is not in the loaded repositories",
                path
            )));
        }

        match self.engine.symbol_in_module(path, &reference.member)? {
            Some(SymbolMatch::Class(class)) => self.constructed(&class, reference),
            Some(SymbolMatch::Function(function)) => Ok(self.called(&function, reference)),
            Some(SymbolMatch::ReExport(edge)) => self.reexported(&edge, reference),
            Some(SymbolMatch::Global(node)) | Some(SymbolMatch::Submodule(node)) => {
                Ok(Verdict::valid(node.qualified_name))
            }
            // `from pkg import Missing; Missing()` counts once, at the import
            None if self.imports_symbol(path, &reference.member) => Ok(Verdict::unverifiable(format!(
                "`{}.{}` is already reported at its import",
                path, reference.member
            ))),
            None => {
                let suggestion = self.module_suggestion(path, &reference.member)?;
                Ok(Verdict::hallucination(
                    format!("module `{}` defines no `{}`", path, reference.member),
                    Severity::High,
                    suggestion,
                ))
            }
        }
    }

    fn imports_symbol(&self, module: &str, symbol: &str) -> bool {
        self.analysis.references.iter().any(|r| {
            r.kind == ReferenceKind::Import
                && r.import
                    .as_ref()
                    .is_some_and(|i| i.module == module && i.symbol.as_deref() == Some(symbol))
        })
    }

    fn reexported(&self, edge: &GraphEdge, reference: &CandidateReference) -> Result<Verdict> {
        let origin = edge.metadata["origin"].as_str().unwrap_or_default().to_string();
        if reference.kind.is_call() {
            if let Some(class) = self.engine.resolve_class(&origin)? {
                return self.constructed(&class, reference);
            }
            if let Some((module, name)) = origin.rsplit_once('.') {
                if let Some(function) = self.engine.find_functions(name, Some(module))?.first() {
                    return Ok(self.called(function, reference));
                }
            }
        }
        Ok(Verdict::valid(origin))
    }

    /// A receiver typed by class name
    fn typed(&self, name: &str, instance: bool, reference: &CandidateReference) -> Result<Verdict> {
        if let Some(class) = self.engine.resolve_class(name)? {
            return self.member(&class, instance, reference);
        }
        // `from pkg import submodule` used as a receiver
        if self.engine.module_exists(name)? {
            return self.module_member(name, reference);
        }
        if self.config.is_external(name) {
            return Ok(Verdict::unverifiable(format!(
                "`{}` is an allow-listed external package",
                root_of(name)
            )));
        }
        Ok(Verdict::unverifiable(format!(
            "type `{}` is not defined in the loaded repositories",
            name
        )))
    }

    fn member(&self, class: &GraphNode, instance: bool, reference: &CandidateReference) -> Result<Verdict> {
        let resolution = self.engine.find_member(class, &reference.member)?;
        if let Some(found) = resolution.found {
            return Ok(accept_member(&class.name, found, instance, reference));
        }

        if !resolution.ancestry.is_closed() {
            return Ok(Verdict::unverifiable(format!(
                "`{}` inherits from bases outside the loaded repositories ({})",
                class.qualified_name,
                resolution.ancestry.unresolved.join(", ")
            )));
        }

        let severity = self.member_severity(std::slice::from_ref(class))?;
        let suggestion = nearest(
            &reference.member,
            self.member_suggestions(class)?,
            self.config.max_suggestion_distance,
        );
        Ok(Verdict::hallucination(
            format!(
                "`{}` has no member `{}` on the class or its ancestors",
                class.qualified_name, reference.member
            ),
            severity,
            suggestion,
        ))
    }

    /// Members a candidate class does not define itself are looked up on
    /// its graph bases
    fn local_class_member(
        &self,
        name: &str,
        graph_bases: &[String],
        opaque_bases: &[String],
        reference: &CandidateReference,
    ) -> Result<Verdict> {
        let short = name.rsplit('.').next().unwrap_or(name);
        let mut unresolved: Vec<String> = opaque_bases.to_vec();
        let mut resolved = Vec::new();

        for base in graph_bases {
            let Some(class) = self.engine.resolve_class(base)? else {
                unresolved.push(base.clone());
                continue;
            };
            let resolution = self.engine.find_member(&class, &reference.member)?;
            if let Some(found) = resolution.found {
                return Ok(accept_member(short, found, true, reference));
            }
            unresolved.extend(resolution.ancestry.unresolved);
            resolved.push(class);
        }

        if !unresolved.is_empty() {
            return Ok(Verdict::unverifiable(format!(
                "candidate class `{}` inherits from bases outside the loaded repositories ({})",
                short,
                unresolved.join(", ")
            )));
        }

        let severity = if resolved.is_empty() {
            Severity::High
        } else {
            self.member_severity(&resolved)?
        };

        let mut candidates: Vec<Suggestion> = self
            .analysis
            .module
            .classes
            .iter()
            .filter(|c| c.qualified_name == name)
            .flat_map(|c| {
                c.methods
                    .iter()
                    .map(|m| m.name.clone())
                    .chain(c.attributes.iter().map(|a| a.name.clone()))
            })
            .map(|n| Suggestion::new(n, true))
            .collect();
        for class in &resolved {
            candidates.extend(self.member_suggestions(class)?.into_iter().map(|s| Suggestion::new(s.name, false)));
        }

        Ok(Verdict::hallucination(
            format!(
                "`{}` is defined neither on candidate class `{}` nor on its bases",
                reference.member, short
            ),
            severity,
            nearest(&reference.member, candidates, self.config.max_suggestion_distance),
        ))
    }

    /// Class reached through `owner.attribute`, or why it is unknown
    fn attribute_type(&self, owner: &Receiver, attribute: &str) -> Result<std::result::Result<GraphNode, String>> {
        let classes = match owner {
            Receiver::LocalClass { graph_bases, .. } => {
                let mut classes = Vec::new();
                for base in graph_bases {
                    classes.extend(self.engine.resolve_class(base)?);
                }
                classes
            }
            Receiver::Type { name } | Receiver::Class { name } => self.engine.resolve_class(name)?.into_iter().collect(),
            Receiver::Module { path } => self.engine.resolve_class(path)?.into_iter().collect(),
            Receiver::Member { owner, attribute } => match self.attribute_type(owner, attribute)? {
                Ok(class) => vec![class],
                Err(reason) => return Ok(Err(reason)),
            },
            Receiver::Unknown { reason } => return Ok(Err(format!("unknown receiver: {}", reason))),
            Receiver::None => Vec::new(),
        };

        for class in &classes {
            if let Some(found) = self.engine.member_type(class, attribute)? {
                return Ok(Ok(found));
            }
        }
        Ok(Err(format!("type of `{}.{}` is not known", owner, attribute)))
    }

    fn constructed(&self, class: &GraphNode, reference: &CandidateReference) -> Result<Verdict> {
        let Some(arguments) = &reference.arguments else {
            return Ok(Verdict::valid(class.qualified_name.clone()));
        };

        let init = self.engine.find_member(class, "__init__")?;
        if let Some(found) = init.found.filter(MemberMatch::is_callable) {
            if let Some(problem) = check_call(&found.parameters(), true, arguments) {
                return Ok(Verdict::SignatureMismatch {
                    reason: format!("`{}()` {}", class.name, problem),
                    supplied_by: Some(found.owner.qualified_name),
                });
            }
        }
        Ok(Verdict::valid(class.qualified_name.clone()))
    }

    fn called(&self, function: &GraphNode, reference: &CandidateReference) -> Verdict {
        if let Some(arguments) = &reference.arguments {
            if let Some(problem) = check_call(&parameters_of(function), false, arguments) {
                return Verdict::SignatureMismatch {
                    reason: format!("`{}()` {}", function.name, problem),
                    supplied_by: Some(function.qualified_name.clone()),
                };
            }
        }
        Verdict::valid(function.qualified_name.clone())
    }

    /// Critical when any of the classes is well known
    fn member_severity(&self, classes: &[GraphNode]) -> Result<Severity> {
        for class in classes {
            if self.engine.class_popularity(class)? >= self.config.well_known_threshold {
                return Ok(Severity::Critical);
            }
        }
        Ok(Severity::High)
    }

    /// Members of the class and its ancestors, then of its sibling classes
    fn member_suggestions(&self, class: &GraphNode) -> Result<Vec<Suggestion>> {
        let mut candidates: Vec<Suggestion> = self
            .engine
            .member_names(class)?
            .into_iter()
            .map(|(name, own)| Suggestion::new(name, own))
            .collect();
        for sibling in self.engine.sibling_classes(class)? {
            for member in self.engine.own_members(&sibling)? {
                candidates.push(Suggestion::new(member.name, false));
            }
        }
        Ok(candidates)
    }

    fn module_suggestion(&self, module: &str, symbol: &str) -> Result<Option<String>> {
        let candidates = self
            .engine
            .module_symbols(module)?
            .into_iter()
            .map(|name| Suggestion::new(name, true));
        Ok(nearest(symbol, candidates, self.config.max_suggestion_distance))
    }
}

/// Verdict for a member that exists: valid, unless the call does not fit
fn accept_member(class_name: &str, found: MemberMatch, instance: bool, reference: &CandidateReference) -> Verdict {
    let supplied_by = found.owner.qualified_name.clone();

    if let (Some(arguments), true) = (&reference.arguments, found.is_callable()) {
        let bound = binds_receiver(&found.member, instance);
        if let Some(problem) = check_call(&found.parameters(), bound, arguments) {
            return Verdict::SignatureMismatch {
                reason: format!("`{}.{}()` {}", class_name, reference.member, problem),
                supplied_by: Some(supplied_by),
            };
        }
    }

    Verdict::Valid {
        supplied_by: Some(supplied_by),
        inherited: found.inherited,
    }
}

/// Whether the first parameter is filled implicitly at the call site
fn binds_receiver(method: &GraphNode, instance: bool) -> bool {
    if method.metadata["is_static"].as_bool() == Some(true) {
        false
    } else if method.metadata["is_classmethod"].as_bool() == Some(true) {
        true
    } else {
        instance
    }
}

fn describe(found: &SymbolMatch) -> String {
    match found {
        SymbolMatch::Class(node)
        | SymbolMatch::Function(node)
        | SymbolMatch::Global(node)
        | SymbolMatch::Submodule(node) => node.qualified_name.clone(),
        SymbolMatch::ReExport(edge) => edge.metadata["origin"].as_str().unwrap_or_default().to_string(),
    }
}

fn root_of(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::db::GraphDatabase;
    use crate::indexer::{Indexer, SourceFile};
    use tempfile::TempDir;

    const CACHE: &str = r#"
class BaseStore:
    def put(self, key, value, ttl=None):
        pass

class Cache(BaseStore):
    def get(self, key, default=None):
        pass

    @staticmethod
    def build(size):
        pass

class DiskCache(Cache):
    def flush(self):
        pass

def make_cache(size, *, eager=False):
    return Cache()
"#;

    fn setup(files: &[(&str, &str)]) -> (TempDir, Validator) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.db_path = dir.path().join("graph.db");
        let store: Arc<dyn GraphStore> = Arc::new(GraphDatabase::new(&config.storage.db_path).unwrap());

        let indexer = Indexer::new(Arc::clone(&store), &config);
        let sources: Vec<SourceFile> = files.iter().map(|(p, c)| SourceFile::new(*p, *c)).collect();
        indexer.ingest("local/cachelib", None, &sources).unwrap();

        (dir, Validator::new(store, &config))
    }

    fn cache_validator() -> (TempDir, Validator) {
        setup(&[("cachelib/__init__.py", ""), ("cachelib/cache.py", CACHE)])
    }

    #[test]
    fn test_inherited_and_local_members() {
        let (_dir, validator) = cache_validator();
        let report = validator
            .validate(
                "from cachelib.cache import DiskCache\n\nd = DiskCache()\nd.flush()\nd.get('k')\nd.put('k', 1)\n",
                &[],
            )
            .unwrap();

        assert!(report.is_clean(), "{:?}", report.hallucinations);
        let put = report.valid_references.iter().find(|v| v.name.ends_with(".put")).unwrap();
        assert_eq!(put.supplied_by.as_deref(), Some("cachelib.cache.BaseStore"));
        assert!(put.inherited);
        assert_eq!(report.overall_confidence, 1.0);
    }

    #[test]
    fn test_missing_member_is_hallucination_with_suggestion() {
        let (_dir, validator) = cache_validator();
        let report = validator
            .validate("from cachelib.cache import Cache\n\nc = Cache()\nc.gte('k')\n", &[])
            .unwrap();

        assert_eq!(report.hallucinations.len(), 1);
        let finding = &report.hallucinations[0];
        assert_eq!(finding.kind, "call");
        assert_eq!(finding.suggested_fix.as_deref(), Some("get"));
        assert_eq!(finding.location.line, 4);
        assert!(report.overall_confidence < 1.0);
    }

    #[test]
    fn test_signature_mismatches() {
        let (_dir, validator) = cache_validator();
        let report = validator
            .validate(
                "from cachelib.cache import Cache, make_cache\n\nc = Cache()\nc.get()\nc.get('k', None, 3)\nCache.build(10)\nmake_cache(1, eager=True)\nmake_cache(1, lazy=True)\n",
                &[],
            )
            .unwrap();

        let reasons: Vec<&str> = report.signature_mismatches.iter().map(|f| f.reason.as_str()).collect();
        assert_eq!(reasons.len(), 3, "{:?}", reasons);
        assert!(reasons[0].contains("missing required argument `key`"));
        assert!(reasons[1].contains("at most 2"));
        assert!(reasons[2].contains("unexpected keyword argument `lazy`"));
        assert!(report.signature_mismatches.iter().all(|f| f.severity == Severity::Medium));
        assert!(report.hallucinations.is_empty());
    }

    #[test]
    fn test_import_policies() {
        let (_dir, validator) = cache_validator();
        let report = validator
            .validate(
                "import os\nimport requests\nfrom cachelib.cache import Cachee\nfrom . import sibling\n",
                &[],
            )
            .unwrap();

        assert_eq!(report.unverifiable_count, 2);
        assert_eq!(report.hallucinations.len(), 2);

        let requests = report.hallucinations.iter().find(|f| f.name == "requests").unwrap();
        assert_eq!(requests.severity, Severity::High);
        assert_eq!(requests.kind, "import");

        let symbol = report.hallucinations.iter().find(|f| f.name == "cachelib.cache.Cachee").unwrap();
        assert_eq!(symbol.severity, Severity::Critical);
        assert_eq!(symbol.suggested_fix.as_deref(), Some("Cache"));
    }

    #[test]
    fn test_missing_imported_symbol_is_reported_once() {
        let (_dir, validator) = cache_validator();
        let report = validator
            .validate("from cachelib.cache import Cachee\n\nCachee()\nCachee.build(3)\n", &[])
            .unwrap();

        assert_eq!(report.hallucinations.len(), 1, "{:?}", report.hallucinations);
        assert_eq!(report.hallucinations[0].kind, "import");
        assert_eq!(report.hallucinations[0].name, "cachelib.cache.Cachee");
        assert!(report
            .unverifiable
            .iter()
            .any(|u| u.reason.contains("already reported at its import")));
    }

    #[test]
    fn test_unknown_receivers_are_unverifiable() {
        let (_dir, validator) = cache_validator();
        let report = validator.validate("def run(thing):\n    thing.anything()\n", &[]).unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.unverifiable_count, 1);
        assert!(report.hallucinations.is_empty());
        assert_eq!(report.overall_confidence, 1.0);
    }

    #[test]
    fn test_candidate_subclass_members() {
        let (_dir, validator) = cache_validator();
        let report = validator
            .validate(
                r#"
from cachelib.cache import Cache

class Tiered(Cache):
    def warm(self):
        self.get("a")
        self.wram()
"#,
                &[],
            )
            .unwrap();

        assert_eq!(report.valid, 2);
        assert_eq!(report.hallucinations.len(), 1);
        assert_eq!(report.hallucinations[0].suggested_fix.as_deref(), Some("warm"));
    }

    #[test]
    fn test_unknown_repository_is_rejected() {
        let (_dir, validator) = cache_validator();
        let result = validator.validate("x = 1\n", &["github.com/nobody/nothing".to_string()]);
        assert!(matches!(result, Err(HalgraphError::UnknownRepository(_))));
    }

    #[test]
    fn test_cancelled_validation_returns_no_report() {
        let (_dir, validator) = cache_validator();
        let cancel = AtomicBool::new(true);
        let source = "from cachelib.cache import Cache\nc = Cache()\n".to_string() + &"c.get(1)\n".repeat(300);
        let result = validator.validate_cancellable(&source, &[], &cancel);
        assert!(matches!(result, Err(HalgraphError::Cancelled)));
    }

    #[tokio::test]
    async fn test_slow_validation_times_out() {
        let (_dir, validator) = cache_validator();
        let mut config = Config::default();
        config.validation.timeout_ms = 1;
        let validator = Validator::new(Arc::clone(&validator.store), &config);

        let source = "from cachelib.cache import Cache\nc = Cache()\n".to_string() + &"c.get(1)\nc.gte(2)\n".repeat(5000);
        let result = validator.validate_with_timeout(source, vec![]).await;

        match result {
            Err(HalgraphError::ValidationTimeout(budget)) => assert_eq!(budget, std::time::Duration::from_millis(1)),
            other => panic!("expected a timeout, got {:?}", other.map(|r| r.checked)),
        }
    }

    #[tokio::test]
    async fn test_validate_many_keeps_order() {
        let (_dir, validator) = cache_validator();
        let results = validator
            .validate_many(
                vec![
                    "from cachelib.cache import Cache\nCache().get(1)\n".to_string(),
                    "def broken(:\n".to_string(),
                ],
                &[],
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].as_ref().unwrap().is_clean());
        assert!(matches!(results[1], Err(HalgraphError::InvalidRequest(_))));
    }
}
