use anyhow::Result;
use clap::Subcommand;
use serde_json::{Value, json};

use reqflow::{
    registry::RequestTypeRegistry,
    request_type::RequestType,
    schema::{Field, FieldKind},
};

#[derive(Subcommand)]
pub enum TypesCommands {
    /// List registered request types
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show statuses, actions and payload fields of a request type
    Show {
        type_id: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

pub fn execute(command: TypesCommands) -> Result<()> {
    let registry = RequestTypeRegistry::with_defaults()?;

    match command {
        TypesCommands::List { json } => {
            let kinds = registry.list();
            if json {
                let listing: Vec<Value> = kinds.iter().map(|kind| describe(kind)).collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else if kinds.is_empty() {
                println!("no request types registered");
            } else {
                for kind in kinds {
                    println!("{}\t{}", kind.type_id(), kind.name());
                }
            }
        }
        TypesCommands::Show { type_id, json } => {
            let kind = registry.resolve(&type_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&describe(&kind))?);
            } else {
                print_text(&kind);
            }
        }
    }

    Ok(())
}

fn describe(kind: &RequestType) -> Value {
    let payload = kind.payload_fields().map(|fields| {
        fields
            .iter()
            .map(|(name, field)| {
                (
                    name.clone(),
                    json!({ "kind": kind_name(field.kind()), "required": field.is_required() }),
                )
            })
            .collect::<serde_json::Map<_, _>>()
    });
    json!({
        "type_id": kind.type_id(),
        "name": kind.name(),
        "statuses": kind.statuses(),
        "actions": kind.action_names().collect::<Vec<_>>(),
        "payload": payload,
    })
}

fn print_text(kind: &RequestType) {
    println!("type_id: {}", kind.type_id());
    println!("name: {}", kind.name());
    println!("statuses:");
    for (status, open) in kind.statuses() {
        let state = if *open { "open" } else { "closed" };
        println!("  {status} ({state})");
    }
    println!("actions: {}", kind.action_names().collect::<Vec<_>>().join(", "));
    match kind.payload_fields() {
        Some(fields) if !fields.is_empty() => {
            println!("payload:");
            for (name, field) in fields {
                println!("  {name}: {}", field_summary(field));
            }
        }
        _ => println!("payload: (free-form)"),
    }
}

fn field_summary(field: &Field) -> String {
    let mut summary = kind_name(field.kind());
    if field.is_required() {
        summary.push_str(", required");
    }
    summary
}

fn kind_name(kind: &FieldKind) -> String {
    match kind {
        FieldKind::String => "string".into(),
        FieldKind::Integer => "integer".into(),
        FieldKind::Float => "float".into(),
        FieldKind::Boolean => "boolean".into(),
        FieldKind::Object => "object".into(),
        FieldKind::DateTime => "datetime".into(),
        FieldKind::Reference => "reference".into(),
        FieldKind::List(item) => format!("list<{}>", kind_name(item)),
        FieldKind::Nested(_) => "nested".into(),
    }
}
