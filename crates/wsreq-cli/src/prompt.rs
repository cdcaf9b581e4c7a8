//! Callbacks answered from the terminal for `wsreq request --interactive`.

use std::io::{BufRead, Write};

use serde_json::{Value, json};
use wsreq_client::{CallbackError, NamedCallbacks};

/// `confirm` asks a yes/no question, `prompt` reads a line of text.
pub fn interactive_callbacks() -> NamedCallbacks {
    NamedCallbacks::new()
        .on("confirm", confirm)
        .on("prompt", prompt)
}

async fn confirm(args: Vec<Value>) -> Result<Value, CallbackError> {
    let line = read_line(format!("{} [y/N] ", question(&args))).await?;
    Ok(json!(is_yes(&line)))
}

async fn prompt(args: Vec<Value>) -> Result<Value, CallbackError> {
    let line = read_line(format!("{} ", question(&args))).await?;
    Ok(json!(line.trim_end_matches(['\r', '\n'])))
}

/// First argument as display text.
fn question(args: &[Value]) -> String {
    match args.first() {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "?".to_owned(),
    }
}

fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Print `prompt` to stderr and read one line from stdin off the runtime.
async fn read_line(prompt: String) -> Result<String, CallbackError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{prompt}")?;
        stderr.flush()?;
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await
    .map_err(|e| CallbackError::msg(format!("prompt task failed: {e}")))?
    .map_err(|e| CallbackError::msg(format!("failed to read answer: {e}")))
}
