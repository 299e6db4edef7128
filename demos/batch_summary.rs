use retryledger_rs::{
    BatchConfig, BatchRunner, LogObserver, OperationError, ProcessingContext, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

/// Pretend to rename a document. Some files are briefly locked, one format is unknown.
fn rename(
    path: &str,
    seen: &Mutex<HashMap<String, u32>>,
) -> std::result::Result<String, OperationError> {
    let attempt = {
        let mut seen = seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = seen.entry(path.to_string()).or_insert(0);
        *count += 1;
        *count
    };

    if path.ends_with(".xyz") {
        return Err(OperationError::new("unsupported file format"));
    }
    if path.contains("locked") && attempt == 1 {
        return Err(OperationError::new(
            "The process cannot access the file because it is being used by another process",
        ));
    }
    Ok(format!("renamed/{}", path.to_uppercase()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = BatchConfig::from_json(
        r#"{
            "retry": { "max_attempts": 3, "base_wait_seconds": 0.2 },
            "workers": 2
        }"#,
    )?;
    let runner = BatchRunner::from_config(&config)?;

    let files: Vec<String> = [
        "invoice.pdf",
        "locked-contract.docx",
        "photo.jpg",
        "archive.xyz",
        "locked-notes.txt",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let ctx = ProcessingContext::new(files.len() as u64, Arc::new(LogObserver));
    let seen = Mutex::new(HashMap::new());
    runner.run_with_targets(&ctx, &files, |path| rename(path, &seen), |target| {
        Some(target.clone())
    });

    let report = ctx.finish()?.with_retry_stats(runner.handler().stats());
    println!("{}", report.summary_line());
    for record in report.failed_items() {
        println!(
            "  failed: {} ({})",
            record.source_id,
            record.reason.as_deref().unwrap_or_default()
        );
    }
    std::process::exit(report.exit_code());
}
