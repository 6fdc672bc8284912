//! Rule loading. Rules live in a YAML file and are pushed into the
//! record store at startup and on `update_rules`.

use common::error::PipelineError;
use common::rules::Rule;
use common::store::RecordStore;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<Rule>,
}

pub async fn load_rules_file(path: &Path) -> Result<Vec<Rule>, PipelineError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::RuleLoadError(format!("{}: {}", path.display(), e)))?;
    let file: RuleFile = serde_yaml::from_str(&raw)
        .map_err(|e| PipelineError::RuleLoadError(format!("{}: {}", path.display(), e)))?;
    Ok(file.rules)
}

/// Load the rules file and replace the store's active rule set.
pub async fn reload_rules(
    store: &dyn RecordStore,
    path: &Path,
) -> Result<usize, PipelineError> {
    let rules = load_rules_file(path).await?;
    let count = rules.len();
    store.replace_rules(rules).await?;
    info!(path = %path.display(), count, "rules loaded");
    Ok(count)
}
