use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use halgraph::config::Config;
use halgraph::validator::report::ValidationReport;
use halgraph::validator::Validator;

use super::{as_store, open_store};

pub async fn validate_files(
    config: &Config,
    files: Vec<PathBuf>,
    repositories: Vec<String>,
    format: String,
) -> Result<()> {
    if format != "json" && format != "text" {
        bail!("Unknown output format: {} (expected json or text)", format);
    }

    let mut candidates = Vec::with_capacity(files.len());
    for file in &files {
        let content = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
        candidates.push(content);
    }

    let db = open_store(config)?;
    let validator = Validator::new(as_store(&db), config);
    let results = validator.validate_many(candidates, &repositories).await;

    let mut failures = 0;
    for (file, result) in files.iter().zip(results) {
        match result {
            Ok(report) if format == "json" => println!("{}", report.to_json()?),
            Ok(report) => print_report(&file.display().to_string(), &report),
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", file.display(), e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} candidates could not be validated", failures, files.len());
    }
    Ok(())
}

fn print_report(name: &str, report: &ValidationReport) {
    println!(
        "{}: confidence {:.2} ({} checked, {} valid, {} hallucinations, {} signature mismatches, {} unverifiable)",
        name,
        report.overall_confidence,
        report.checked,
        report.valid,
        report.hallucinations.len(),
        report.signature_mismatches.len(),
        report.unverifiable_count
    );

    for finding in report.hallucinations.iter().chain(&report.signature_mismatches) {
        let hint = finding
            .suggested_fix
            .as_ref()
            .map(|fix| format!(" (did you mean `{}`?)", fix))
            .unwrap_or_default();
        println!(
            "  [{}] {}:{} {} {}: {}{}",
            finding.severity.as_str(),
            finding.location.line,
            finding.location.column,
            finding.kind,
            finding.name,
            finding.reason,
            hint
        );
    }
}
