use anyhow::Result;
use chrono::{TimeZone, Utc};

use halgraph::config::Config;
use halgraph::indexer::Indexer;

use super::{as_store, open_store};

pub async fn list_repositories(config: &Config) -> Result<()> {
    let db = open_store(config)?;
    let indexer = Indexer::new(as_store(&db), config);
    let repositories = indexer.list_repositories()?;

    if repositories.is_empty() {
        println!("No repositories ingested");
        return Ok(());
    }

    println!("{} repositories:", repositories.len());
    for repository in repositories {
        let ingested = Utc
            .timestamp_opt(repository.ingested_at, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        println!("  {}", repository.id);
        if let Some(revision) = &repository.revision {
            println!("    revision: {}", revision);
        }
        println!(
            "    modules: {} parsed, {} failed, {} skipped",
            repository.modules_parsed, repository.modules_failed, repository.modules_skipped
        );
        println!("    ingested: {}", ingested);
    }
    Ok(())
}

pub async fn remove_repository(config: &Config, repository: String) -> Result<()> {
    let db = open_store(config)?;
    let indexer = Indexer::new(as_store(&db), config);

    if indexer.remove(&repository)? {
        println!("Removed {}", repository);
    } else {
        println!("Repository {} is not ingested", repository);
    }
    Ok(())
}
