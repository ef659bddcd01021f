//! `healthflow ask`: Run one flow from the command line.

use anyhow::{Context, bail};
use base64::Engine;
use healthflow_core::event::EventBus;
use healthflow_core::flow::{BackendChoice, FlowKind, FlowOutcome, FlowRequest, FlowResponse, ImageAttachment};
use healthflow_flows::FlowRunner;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct AskArgs {
    pub flow: FlowKind,
    pub query: String,
    pub locale: Option<String>,
    pub backend: Option<BackendChoice>,
    pub user: Option<String>,
    pub profile: Option<PathBuf>,
    pub image: Option<PathBuf>,
    pub json: bool,
}

pub async fn run(args: AskArgs) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let runner = FlowRunner::assemble(&config, Arc::new(EventBus::default())).await?;

    let mut request = FlowRequest::new(args.query);
    request.locale = args.locale;
    request.backend = args.backend;
    request.user_id = args.user;
    if let Some(path) = &args.profile {
        let raw = std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
        request.profile = Some(serde_json::from_str(&raw).with_context(|| format!("Invalid profile in {}", path.display()))?);
    }
    if let Some(path) = &args.image {
        request.image = Some(read_image(path)?);
    }

    let response = runner.run(args.flow, &request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        let primary = runner
            .contract(args.flow)
            .map(|c| c.primary_field.clone())
            .unwrap_or_else(|| "response".into());
        print!("{}", render(&response, &primary));
    }
    Ok(())
}

fn read_image(path: &Path) -> anyhow::Result<ImageAttachment> {
    let mime_type = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => bail!("Unsupported image type: {} (use png, jpeg or webp)", path.display()),
    };
    let bytes = std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
    Ok(ImageAttachment {
        mime_type: mime_type.to_string(),
        data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Human-readable rendering: the primary text first, the disclaimer last,
/// every other non-empty field in between.
fn render(response: &FlowResponse, primary: &str) -> String {
    let mut out = String::new();
    let Some(fields) = response.output.as_object() else {
        return out;
    };

    if let Some(text) = fields.get(primary).and_then(Value::as_str) {
        out.push_str(text);
        out.push('\n');
    }

    for (name, value) in fields {
        if name == primary || name == "disclaimer" {
            continue;
        }
        match value {
            Value::String(s) if !s.is_empty() => out.push_str(&format!("\n{}: {s}\n", label(name))),
            Value::Bool(true) => out.push_str(&format!("\n{}: yes\n", label(name))),
            Value::Array(items) if !items.is_empty() => {
                out.push_str(&format!("\n{}:\n", label(name)));
                for item in items {
                    out.push_str(&format!("  - {}\n", item_line(item)));
                }
            }
            Value::Object(_) => out.push_str(&format!("\n{}: {}\n", label(name), item_line(value))),
            _ => {}
        }
    }

    if let Some(disclaimer) = fields.get("disclaimer").and_then(Value::as_str) {
        out.push_str(&format!("\n{disclaimer}\n"));
    }
    if response.outcome != FlowOutcome::Answered {
        out.push_str(&format!("\n[{}]\n", response.outcome.as_str()));
    }
    out
}

fn item_line(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let head = ["name", "title", "clinic"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str));
            let tail = ["address", "url", "date", "message"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str));
            match (head, tail) {
                (Some(h), Some(t)) => format!("{h}, {t}"),
                (Some(h), None) => h.to_string(),
                _ => item.to_string(),
            }
        }
        other => other.to_string(),
    }
}

/// `possibleCauses` → `Possible causes`.
fn label(field: &str) -> String {
    let mut out = String::new();
    for (i, c) in field.chars().enumerate() {
        if i == 0 {
            out.extend(c.to_uppercase());
        } else if c.is_uppercase() {
            out.push(' ');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
