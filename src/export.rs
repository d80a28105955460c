use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};
use tracing::info;

use crate::error::{Error, Result};

/// (view name, output file) pairs written by default.
pub const DEFAULT_EXPORTS: &[(&str, &str)] = &[
    ("v_team_rankings", "rankings.json"),
    ("v_team_alltime_summary", "alltime_summary.json"),
    ("v_team_overrated_index", "overrated.json"),
    ("v_team_overrated_index_stats", "overrated_stats.json"),
    ("v_team_collapse_index", "collapse.json"),
    ("v_team_collapse_index_stats", "collapse_stats.json"),
];

pub fn default_out_dir() -> PathBuf {
    PathBuf::from("frontend").join("data")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedView {
    pub view: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// All rows of a view as JSON objects keyed by column name.
pub fn query_view(conn: &Connection, view: &str) -> Result<Vec<Map<String, Value>>> {
    if !is_identifier(view) {
        return Err(Error::InvalidIdentifier(view.to_string()));
    }
    let mut stmt = conn.prepare(&format!("SELECT * FROM {view}"))?;
    let columns = stmt
        .column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            obj.insert(name.clone(), json_value(row.get_ref(idx)?));
        }
        out.push(obj);
    }
    Ok(out)
}

pub fn export_view(conn: &Connection, view: &str, path: &Path) -> Result<ExportedView> {
    let rows = query_view(conn, view)?;
    let json = serde_json::to_string_pretty(&rows)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    info!(view, path = %path.display(), rows = rows.len(), "exported view");
    Ok(ExportedView {
        view: view.to_string(),
        path: path.to_path_buf(),
        rows: rows.len(),
    })
}

pub fn export_views(
    conn: &Connection,
    out_dir: &Path,
    exports: &[(&str, &str)],
) -> Result<Vec<ExportedView>> {
    fs::create_dir_all(out_dir)?;
    exports
        .iter()
        .map(|(view, file)| export_view(conn, view, &out_dir.join(file)))
        .collect()
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
