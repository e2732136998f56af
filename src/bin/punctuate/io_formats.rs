use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

/// JSON-lines manifest plus the key holding each record's text.
pub struct Manifest {
    pub records: Vec<Record>,
    pub text_key: String,
}

impl Manifest {
    pub fn texts(&self) -> Result<Vec<String>, String> {
        self.records
            .iter()
            .enumerate()
            .map(|(idx, record)| match record.get(&self.text_key) {
                Some(Value::String(text)) => Ok(text.clone()),
                _ => Err(format!(
                    "Manifest record {} has no string '{}' field",
                    idx + 1,
                    self.text_key
                )),
            })
            .collect()
    }
}

/// `pred_text` is used when the first record has it, `text` otherwise.
pub fn read_manifest(path: &Path) -> Result<Manifest, String> {
    let file = File::open(path)
        .map_err(|err| format!("Failed to open manifest '{}': {err}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line
            .map_err(|err| format!("Failed to read manifest '{}': {err}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line).map_err(|err| {
            format!(
                "Invalid JSON on line {} of manifest '{}': {err}",
                idx + 1,
                path.display()
            )
        })?;
        records.push(record);
    }
    let text_key = match records.first() {
        Some(first) if first.contains_key("pred_text") => "pred_text",
        _ => "text",
    };
    Ok(Manifest {
        records,
        text_key: text_key.to_string(),
    })
}

pub fn write_manifest(path: &Path, manifest: Manifest, texts: &[String]) -> Result<(), String> {
    let mut writer = create_writer(path)?;
    for (mut record, text) in manifest.records.into_iter().zip(texts) {
        record.insert(manifest.text_key.clone(), Value::String(text.clone()));
        serde_json::to_writer(&mut writer, &record)
            .map_err(|err| format!("Failed to serialize record '{}': {err}", path.display()))?;
        writer
            .write_all(b"\n")
            .map_err(|err| format!("Failed to write '{}': {err}", path.display()))?;
    }
    writer
        .flush()
        .map_err(|err| format!("Failed to finalize '{}': {err}", path.display()))
}

/// One query per line, surrounding whitespace removed.
pub fn read_lines(path: &Path) -> Result<Vec<String>, String> {
    let data = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read input text '{}': {err}", path.display()))?;
    Ok(data.lines().map(|line| line.trim().to_string()).collect())
}

pub fn write_lines(path: &Path, lines: &[String]) -> Result<(), String> {
    let mut writer = create_writer(path)?;
    for line in lines {
        writeln!(writer, "{line}")
            .map_err(|err| format!("Failed to write '{}': {err}", path.display()))?;
    }
    writer
        .flush()
        .map_err(|err| format!("Failed to finalize '{}': {err}", path.display()))
}

fn create_writer(path: &Path) -> Result<BufWriter<File>, String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create output directory '{}': {err}",
                parent.display()
            )
        })?;
    }
    let file = File::create(path)
        .map_err(|err| format!("Failed to create output file '{}': {err}", path.display()))?;
    Ok(BufWriter::new(file))
}
