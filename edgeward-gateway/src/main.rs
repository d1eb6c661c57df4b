//! Edgeward stdio entry point.
//!
//! Reads one JSON [`Invocation`] per line from stdin and writes one
//! `{"ok": ...}` or `{"error": ...}` line per invocation to stdout.
//! Invocations run concurrently, so output order follows completion order;
//! callers correlate with the optional `id` field, which is echoed back.

use std::sync::Arc;

use edgeward_core::{EdgewardError, EdgewardResult, ValidationError};
use edgeward_gateway::{
    init_tracing, CredentialStore, ExecutionPipeline, GatewayConfig, Invocation, ReqwestTransport,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> EdgewardResult<()> {
    let config = GatewayConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default())?;
    let config = config?;

    let credentials = CredentialStore::load(&config.credentials_path)?;
    let transport = ReqwestTransport::new(config.upstream_timeout)?;
    let pipeline = Arc::new(ExecutionPipeline::from_config(&config, credentials, Arc::new(transport))?);
    let sweepers = pipeline.spawn_sweepers(config.cache_sweep_interval);

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let pipeline = Arc::clone(&pipeline);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = handle_line(&pipeline, &line).await;
            // The writer only goes away at shutdown.
            let _ = tx.send(response.to_string());
        });
    }

    // In-flight invocations hold their own senders; the writer drains until
    // the last one finishes.
    drop(tx);
    if let Err(e) = writer.await {
        tracing::error!(error = %e, "Output writer failed");
    }
    for handle in sweepers {
        handle.abort();
    }
    Ok(())
}

async fn handle_line(pipeline: &ExecutionPipeline, line: &str) -> Value {
    let invocation: Invocation = match serde_json::from_str(line) {
        Ok(invocation) => invocation,
        Err(e) => {
            let error = EdgewardError::from(ValidationError::InvalidValue {
                field: "invocation".to_string(),
                reason: e.to_string(),
            });
            tracing::warn!(error = %e, "Rejected malformed invocation");
            return json!({ "error": error.to_structured() });
        }
    };

    let id = invocation.id.clone();
    let mut response = match pipeline
        .invoke(&invocation.tool, &invocation.tenant, invocation.params)
        .await
    {
        Ok(result) => json!({ "ok": result }),
        Err(error) => json!({ "error": error }),
    };
    if let (Some(id), Some(map)) = (id, response.as_object_mut()) {
        map.insert("id".to_string(), id);
    }
    response
}

async fn write_lines(mut rx: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            tracing::error!(error = %e, "Failed to write stdout");
            return;
        }
        if let Err(e) = stdout.flush().await {
            tracing::error!(error = %e, "Failed to flush stdout");
            return;
        }
    }
}
