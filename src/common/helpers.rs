use anyhow::Error;
use serde_json::Value;

const PREVIEW_CHARS: usize = 100;

pub fn print_error_chain(err: &Error) {
    // Concatenate the main context message along with its chain of errors
    let error_message = err
        .chain()
        .enumerate()
        .map(|(index, cause)| {
            if index == 0 {
                cause.to_string()
            } else {
                format!("       └> {}", cause)
            }
        })
        .collect::<Vec<String>>()
        .join("\n");

    error!("{}", error_message);
}

/// Single-line, shortened form of a statement for log output.
pub fn preview(sql: &str) -> String {
    let flattened = sql.split_whitespace().collect::<Vec<_>>().join(" ");

    if flattened.is_empty() {
        return "EMPTY QUERY".to_string();
    }

    if flattened.chars().count() > PREVIEW_CHARS {
        let short: String = flattened.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", short)
    } else {
        flattened
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `schema.table`, each part quoted.
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render a JSON value coming back from a row as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => quote_literal(text),
        other => quote_literal(&other.to_string()),
    }
}

/// Key used to compare JSON values from different queries; `None` for SQL NULL.
pub fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Wrap a row-returning query so the endpoint hands back one JSON array of row objects.
pub fn wrap_rows_query(sql: &str) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!(
        "SELECT coalesce(json_agg(q), '[]'::json) AS rows FROM ({}) q",
        inner
    )
}
