use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use schemaform::{FormInput, FormInstance, FormOptions};
use serde_json::Value;

/// What to print.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
enum Emit {
    /// The layout tree.
    #[default]
    Layout,
    /// The root control template and the template library.
    Template,
    /// The data map.
    DataMap,
    /// The formatted data.
    Data,
    /// The validation errors by data pointer.
    Errors,
}

/// Compile a JSON Schema (plus optional layout and data) into a form model.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Schema file (.json or .toml).
    #[arg(short, long)]
    schema: PathBuf,
    /// Layout file holding an array of layout elements.
    #[arg(short, long)]
    layout: Option<PathBuf>,
    /// Initial data.
    #[arg(short, long)]
    data: Option<PathBuf>,
    /// Form options.
    #[arg(short, long)]
    options: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t)]
    emit: Emit,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let input = FormInput::load(&cli.schema, cli.layout.as_deref(), cli.data.as_deref())?;
    let options = match &cli.options {
        Some(path) => FormOptions::load(path)?,
        None => FormOptions::default(),
    };
    let mut form = FormInstance::new(input, options);
    form.initialize().context("Failed to compile form")?;

    let ctx = form.context().context("form is not compiled")?;
    for diagnostic in &ctx.diagnostics {
        warn!("{diagnostic}");
    }
    info!("{} data map entries", ctx.data_map.len());

    let out: Value = match cli.emit {
        Emit::Layout => serde_json::to_value(&ctx.layout)?,
        Emit::Template => serde_json::json!({
            "root": ctx.template,
            "library": ctx.template_library,
        }),
        Emit::DataMap => serde_json::to_value(&ctx.data_map)?,
        Emit::Data => form.data().cloned().unwrap_or(Value::Null),
        Emit::Errors => serde_json::to_value(form.errors())?,
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
