use std::sync::Arc;

use crate::cli::utils::output_table;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::router::StatementRouter;
use crate::statement::StatementStore;

/// Print URL, kind and logical path for every loaded definition
pub async fn handle(config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let store = Arc::new(StatementStore::from_config(&config.directsql));
    {
        let store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || store.scan()).await?;
    }
    let router = StatementRouter::new(config.directsql.prefix.clone(), Arc::clone(&store));

    let rows: Vec<Vec<String>> = store
        .definitions()
        .iter()
        .map(|def| vec![router.url_for(&def.path), def.kind.as_str().to_string(), def.path.clone()])
        .collect();

    output_table(&output_format, "routes", &["url", "kind", "path"], &rows)
}
