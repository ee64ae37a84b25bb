use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use halgraph::analyzer::CandidateAnalyzer;
use halgraph::config::Config;
use halgraph::indexer::parser::PythonParser;
use halgraph::indexer::{Indexer, SourceFile};
use halgraph::index::db::GraphDatabase;
use std::sync::Arc;

fn make_module(index: usize) -> String {
    let mut source = format!("import os\nfrom pkg.base_{} import Base\n\n", index % 4);
    for class in 0..10 {
        source.push_str(&format!(
            "class Service{index}_{class}(Base):\n    \"\"\"Service {class}.\"\"\"\n\n    def __init__(self, name, retries=3):\n        self.name = name\n        self.retries = retries\n\n"
        ));
        for method in 0..8 {
            source.push_str(&format!(
                "    def op_{method}(self, value, *args, **kwargs):\n        return self.name + str(value)\n\n"
            ));
        }
    }
    source.push_str("def helper(a, b=None):\n    return a\n");
    source
}

fn bench_extract_module(c: &mut Criterion) {
    let parser = PythonParser::new();
    let source = make_module(0);

    c.bench_function("extract_module_80_methods", |b| {
        b.iter(|| parser.extract_module(black_box("pkg/service.py"), black_box(&source)))
    });
}

fn bench_extract_repository(c: &mut Criterion) {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.db_path = dir.path().join("graph.db");
    let store = Arc::new(GraphDatabase::new(&config.storage.db_path).unwrap());
    let indexer = Indexer::new(store, &config);

    let files: Vec<SourceFile> = (0..50)
        .map(|i| SourceFile::new(format!("pkg/module_{}.py", i), make_module(i)))
        .collect();

    c.bench_function("extract_repository_50_files", |b| {
        b.iter(|| indexer.extract_repository(black_box("bench/repo"), None, black_box(&files)))
    });
}

fn bench_analyze_candidate(c: &mut Criterion) {
    let analyzer = CandidateAnalyzer::default();
    let candidate = "from pkg.module_0 import Service0_0\n\ns = Service0_0('a')\n".to_string()
        + &"s.op_1(1)\ns.missing(2)\n".repeat(200);

    c.bench_function("analyze_candidate_400_calls", |b| {
        b.iter(|| analyzer.analyze(black_box(&candidate), None))
    });
}

criterion_group!(benches, bench_extract_module, bench_extract_repository, bench_analyze_candidate);
criterion_main!(benches);
