use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mprpc_frame::{Frame, Value};
use serde::Serialize;
use serde_json::json;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResultOutput<'a> {
    id: u32,
    method: &'a str,
    result: serde_json::Value,
}

/// Print the unary result of a call.
pub fn print_result(id: u32, method: &str, result: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResultOutput {
                id,
                method,
                result: to_json(result),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["ID", "METHOD", "RESULT"]);
            table.add_row(vec![id.to_string(), method.to_string(), result.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("id={id} method={method} result={result}"),
        OutputFormat::Raw => print_raw_value(result),
    }
}

/// Prints stream chunks as they arrive; table output is emitted on finish.
pub struct ChunkPrinter {
    format: OutputFormat,
    table: Option<Table>,
    count: usize,
}

impl ChunkPrinter {
    pub fn new(format: OutputFormat) -> Self {
        let table = matches!(format, OutputFormat::Table).then(|| new_table(vec!["#", "CHUNK"]));
        Self {
            format,
            table,
            count: 0,
        }
    }

    pub fn push(&mut self, chunk: &Value) {
        let index = self.count;
        self.count += 1;
        match self.format {
            OutputFormat::Json => println!("{}", json!({ "index": index, "chunk": to_json(chunk) })),
            OutputFormat::Table => {
                if let Some(table) = self.table.as_mut() {
                    table.add_row(vec![index.to_string(), chunk.to_string()]);
                }
            }
            OutputFormat::Pretty => println!("[{index}] {chunk}"),
            OutputFormat::Raw => print_raw_value(chunk),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(self) {
        if let Some(table) = self.table {
            if self.count > 0 {
                println!("{table}");
            }
        }
    }
}

/// Print a decoded frame.
pub fn print_frame(frame: &Frame, format: OutputFormat) {
    let kind = frame.message_type();
    let fields = frame_fields(frame);
    match format {
        OutputFormat::Json => {
            let mut out = serde_json::Map::new();
            out.insert("type".into(), json!(kind.name()));
            out.insert("type_id".into(), json!(u8::from(kind)));
            out.insert("id".into(), json!(frame.id()));
            for (name, value) in &fields {
                out.insert((*name).into(), to_json(value));
            }
            println!("{}", serde_json::Value::Object(out));
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["FIELD", "VALUE"]);
            table.add_row(vec!["type".to_string(), kind.name().to_string()]);
            table.add_row(vec!["id".to_string(), frame.id().to_string()]);
            for (name, value) in &fields {
                table.add_row(vec![(*name).to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("{kind} id={}", frame.id());
            for (name, value) in &fields {
                line.push_str(&format!(" {name}={value}"));
            }
            println!("{line}");
        }
        OutputFormat::Raw => {
            if let Ok(bytes) = frame.encode() {
                print_raw(&bytes);
            }
        }
    }
}

fn frame_fields(frame: &Frame) -> Vec<(&'static str, Value)> {
    match frame {
        Frame::Request { method, params, .. } => vec![
            ("method", Value::from(method.as_str())),
            ("params", Value::Array(params.clone())),
        ],
        Frame::Response { error, result, .. } => vec![
            ("error", error.as_deref().map_or(Value::Nil, Value::from)),
            ("result", result.clone()),
        ],
        Frame::Notify { fields, .. } => vec![("fields", Value::Array(fields.clone()))],
        Frame::RequestStreamChunk { chunk, .. } | Frame::ResponseStreamChunk { chunk, .. } => {
            vec![("chunk", chunk.clone())]
        }
        Frame::RequestStreamEnd { .. }
        | Frame::ResponseStreamEnd { .. }
        | Frame::RequestCancel { .. }
        | Frame::ResponseCancel { .. } => Vec::new(),
    }
}

/// MessagePack values with non-string map keys or ext types have no direct
/// JSON form; those fall back to their display string.
pub fn to_json(value: &Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()))
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_raw_value(value: &Value) {
    match value {
        Value::Binary(bytes) => print_raw(bytes),
        Value::String(text) => print_raw(text.as_bytes()),
        other => println!("{other}"),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}
