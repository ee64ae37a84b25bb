use std::sync::Arc;

use halgraph::config::Config;
use halgraph::index::db::GraphDatabase;
use halgraph::index::{GraphStore, NodeKind};
use halgraph::indexer::{Indexer, SourceFile};
use halgraph::query::QueryEngine;
use halgraph::validator::report::Severity;
use halgraph::validator::Validator;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    store: Arc<dyn GraphStore>,
    indexer: Indexer,
    validator: Validator,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.db_path = dir.path().join("graph.db");
        let store: Arc<dyn GraphStore> = Arc::new(GraphDatabase::new(&config.storage.db_path).unwrap());

        Self {
            indexer: Indexer::new(Arc::clone(&store), &config),
            validator: Validator::new(Arc::clone(&store), &config),
            store,
            _dir: dir,
        }
    }

    fn ingest(&self, repository: &str, files: &[(&str, &str)]) -> halgraph::IngestionSummary {
        let sources: Vec<SourceFile> = files.iter().map(|(p, c)| SourceFile::new(*p, *c)).collect();
        self.indexer.ingest(repository, None, &sources).unwrap()
    }
}

#[test]
fn test_cache_scenario() {
    let harness = Harness::new();
    harness.ingest(
        "github.com/example/cache",
        &[("cache.py", "class Cache:\n    def get(self, key):\n        ...\n")],
    );

    let report = harness
        .validator
        .validate("from cache import Cache\n\nc = Cache()\nc.get(\"x\")\nc.put(\"x\", 1)\n", &[])
        .unwrap();

    assert!(report.valid_references.iter().any(|v| v.name == "cache.Cache.get"));
    assert_eq!(report.hallucinations.len(), 1);

    let put = &report.hallucinations[0];
    assert_eq!(put.name, "cache.Cache.put");
    assert_eq!(put.kind, "call");
    assert_eq!(put.location.line, 5);
    // "put" is two edits away from "get"
    assert_eq!(put.suggested_fix.as_deref(), Some("get"));
    assert!(report.overall_confidence < 1.0);
}

#[test]
fn test_unknown_package_import_is_flagged() {
    let harness = Harness::new();
    harness.ingest("github.com/example/cache", &[("cache.py", "class Cache:\n    pass\n")]);

    let report = harness
        .validator
        .validate("import requests\n\nresponse = requests.get(\"https://example.com\")\n", &[])
        .unwrap();

    assert_eq!(report.hallucinations.len(), 1);
    let import = &report.hallucinations[0];
    assert_eq!(import.kind, "import");
    assert_eq!(import.name, "requests");
    assert_eq!(import.severity, Severity::High);
    // The call through the missing module is not counted twice
    assert_eq!(report.unverifiable_count, 1);
}

#[test]
fn test_syntax_error_in_one_of_ten_files() {
    let harness = Harness::new();
    let mut files: Vec<(String, String)> = (0..10)
        .map(|i| {
            (
                format!("pkg/mod_{}.py", i),
                format!("class Model{i}:\n    def run(self):\n        return {i}\n"),
            )
        })
        .collect();
    files[3].1 = "class Broken(:\n    pass\n".to_string();

    let borrowed: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    let summary = harness.ingest("local/ten", &borrowed);

    assert_eq!(summary.modules_parsed, 9);
    assert_eq!(summary.modules_failed, vec!["pkg/mod_3.py".to_string()]);
    assert_eq!(summary.files_seen(), 10);

    let engine = QueryEngine::new(Arc::clone(&harness.store), vec!["local/ten".to_string()], 16);
    for i in (0..10).filter(|i| *i != 3) {
        let class = engine.resolve_class(&format!("pkg.mod_{}.Model{}", i, i)).unwrap();
        assert!(class.is_some(), "Model{} should be queryable", i);
    }

    let failed = harness.store.failed_files("local/ten").unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].path, "pkg/mod_3.py");
}

#[test]
fn test_reingest_is_idempotent() {
    let harness = Harness::new();
    let files = [
        ("shop/__init__.py", "from .models import Order\n"),
        (
            "shop/models.py",
            "from dataclasses import dataclass\n\nclass Base:\n    def save(self):\n        pass\n\nclass Order(Base):\n    def __init__(self, total: float):\n        self.total = total\n",
        ),
    ];

    harness.ingest("github.com/example/shop", &files);
    let first = harness.store.snapshot("github.com/example/shop").unwrap();
    harness.ingest("https://github.com/example/shop.git", &files);
    let second = harness.store.snapshot("github.com/example/shop").unwrap();

    assert!(!first.nodes.is_empty());
    assert_eq!(first, second);
    assert_eq!(harness.indexer.list_repositories().unwrap().len(), 1);
}

#[test]
fn test_reingest_replaces_previous_graph() {
    let harness = Harness::new();
    harness.ingest("local/app", &[("app.py", "class Engine:\n    def start(self):\n        pass\n")]);
    harness.ingest("local/app", &[("app.py", "class Engine:\n    def ignite(self):\n        pass\n")]);

    let report = harness
        .validator
        .validate("from app import Engine\n\ne = Engine()\ne.start()\ne.ignite()\n", &[])
        .unwrap();

    assert_eq!(report.hallucinations.len(), 1);
    assert_eq!(report.hallucinations[0].name, "app.Engine.start");
}

#[test]
fn test_inherited_member_is_attributed_to_base() {
    let harness = Harness::new();
    harness.ingest(
        "local/shapes",
        &[(
            "shapes.py",
            "class Shape:\n    def area(self):\n        return 0\n\nclass Square(Shape):\n    def __init__(self, side):\n        self.side = side\n",
        )],
    );

    let report = harness
        .validator
        .validate("from shapes import Square\n\ns = Square(2)\ns.area()\ns.side\n", &[])
        .unwrap();

    assert!(report.is_clean());
    let area = report.valid_references.iter().find(|v| v.name == "shapes.Square.area").unwrap();
    assert_eq!(area.supplied_by.as_deref(), Some("shapes.Shape"));
    assert!(area.inherited);
    assert_eq!(report.overall_confidence, 1.0);
}

#[test]
fn test_diamond_uses_leftmost_base_first() {
    let harness = Harness::new();
    harness.ingest(
        "local/diamond",
        &[(
            "diamond.py",
            r#"
class Root:
    def describe(self, a):
        pass

class Left(Root):
    def describe(self):
        pass

class Right(Root):
    def describe(self, a, b):
        pass

class Both(Left, Right):
    pass
"#,
        )],
    );

    let report = harness
        .validator
        .validate("from diamond import Both\n\nBoth().describe()\n", &[])
        .unwrap();

    assert!(report.is_clean(), "{:?}", report.signature_mismatches);
    let describe = report.valid_references.iter().find(|v| v.name.ends_with("describe")).unwrap();
    assert_eq!(describe.supplied_by.as_deref(), Some("diamond.Left"));
}

#[test]
fn test_repositories_are_namespaced() {
    let harness = Harness::new();
    harness.ingest("github.com/one/app", &[("models.py", "class User:\n    def save(self):\n        pass\n")]);
    harness.ingest("github.com/two/app", &[("models.py", "class User:\n    def delete(self):\n        pass\n")]);

    let candidate = "from models import User\n\nu = User()\nu.delete()\n";

    let against_one = harness
        .validator
        .validate(candidate, &["github.com/one/app".to_string()])
        .unwrap();
    assert_eq!(against_one.hallucinations.len(), 1);
    assert_eq!(against_one.repositories, vec!["github.com/one/app".to_string()]);

    let against_two = harness
        .validator
        .validate(candidate, &["git@github.com:two/app.git".to_string()])
        .unwrap();
    assert!(against_two.is_clean());
}

#[test]
fn test_sibling_member_is_suggested() {
    let harness = Harness::new();
    harness.ingest(
        "local/io",
        &[(
            "streams.py",
            "class Reader:\n    def read(self):\n        pass\n\nclass Writer:\n    def write_line(self, text):\n        pass\n",
        )],
    );

    let report = harness
        .validator
        .validate("from streams import Reader\n\nr = Reader()\nr.write_lines('x')\n", &[])
        .unwrap();

    assert_eq!(report.hallucinations.len(), 1);
    assert_eq!(report.hallucinations[0].suggested_fix.as_deref(), Some("write_line"));
}

#[test]
fn test_only_unverifiable_references_score_one() {
    let harness = Harness::new();
    harness.ingest("local/empty", &[("empty.py", "VALUE = 1\n")]);

    let report = harness
        .validator
        .validate("import json\n\ndef load(path):\n    return json.loads(path.read_text())\n", &[])
        .unwrap();

    assert!(report.checked > 0);
    assert_eq!(report.checked, report.unverifiable_count);
    assert_eq!(report.overall_confidence, 1.0);
}

#[test]
fn test_removed_repository_is_unknown() {
    let harness = Harness::new();
    harness.ingest("local/gone", &[("gone.py", "def f():\n    pass\n")]);
    assert!(harness.indexer.remove("local/gone").unwrap());
    assert!(harness.store.find_nodes(&["local/gone".to_string()], NodeKind::Function, halgraph::index::NameMatch::Simple("f")).unwrap().is_empty());

    let result = harness.validator.validate("x = 1\n", &["local/gone".to_string()]);
    assert!(matches!(result, Err(halgraph::HalgraphError::UnknownRepository(_))));
}
