//! The `proctor sessions` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use proctor_core::persistence::{RecoveryManager, INDEX_PREFIX};
use proctor_store::config::{create_store, load_config_from};
use proctor_store::FileStore;

pub fn execute(exam_id: Option<String>, incomplete: bool, config_path: Option<PathBuf>) -> Result<()> {
    use comfy_table::{Cell, Table};

    let config = load_config_from(config_path.as_deref())?;
    let store = create_store(&config)?;
    let recovery = RecoveryManager::new(store).with_retention(config.max_sessions_per_target);

    let targets = match exam_id {
        Some(id) => vec![id],
        None => FileStore::open(&config.storage_dir)
            .with_context(|| format!("failed to open {}", config.storage_dir.display()))?
            .keys_with_prefix(INDEX_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(INDEX_PREFIX).map(str::to_string))
            .collect(),
    };

    let mut table = Table::new();
    table.set_header(vec!["Exam", "Session", "Started", "Status", "Answered", "Violations"]);
    let mut rows = 0;

    for target in &targets {
        let mut entries = recovery.read_index(target)?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        for entry in entries.iter().filter(|e| !incomplete || !e.completed) {
            let (answered, violations) = match recovery.load(entry.id) {
                Ok(session) => (
                    session.answers().len().to_string(),
                    session.security_events().len().to_string(),
                ),
                Err(e) => {
                    tracing::warn!(session_id = %entry.id, "could not load session: {e}");
                    ("?".to_string(), "?".to_string())
                }
            };
            table.add_row(vec![
                Cell::new(target),
                Cell::new(entry.id),
                Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M:%S")),
                Cell::new(if entry.completed { "submitted" } else { "in progress" }),
                Cell::new(answered),
                Cell::new(violations),
            ]);
            rows += 1;
        }
    }

    if rows == 0 {
        println!("No sessions found.");
    } else {
        println!("{table}");
    }

    Ok(())
}
