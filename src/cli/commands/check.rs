use serde_json::json;

use crate::cli::utils::{output_parse_errors, output_success};
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::statement::StatementStore;

/// Parse every definition under the configured roots; fails if any file is invalid
pub async fn handle(config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let store = StatementStore::from_config(&config.directsql);
    let report = tokio::task::spawn_blocking(move || store.scan()).await?;

    if report.errors.is_empty() {
        return output_success(
            &output_format,
            &format!("{} statement definitions are valid", report.loaded),
            Some(json!({ "loaded": report.loaded })),
        );
    }

    output_parse_errors(&output_format, &report.errors)?;
    anyhow::bail!(
        "{} of {} statement definitions failed to parse",
        report.errors.len(),
        report.loaded + report.errors.len()
    )
}
