use crate::Row;
use tabled::{builder::Builder, settings};
use types::Value;

/// Render labelled rows into a human-friendly table string.
pub fn render_rows(headers: &[&str], rows: &[Vec<String>]) -> String {
    if headers.is_empty() && rows.is_empty() {
        return "<empty>".into();
    }

    let mut builder = Builder::default();

    if !headers.is_empty() {
        builder.push_record(headers.iter().copied());
    }

    for row in rows {
        builder.push_record(row.clone());
    }

    let mut table = builder.build();
    table.with(settings::Style::modern());
    table.to_string()
}

/// Format a full row into a comma-separated string.
pub fn format_row(row: &Row) -> String {
    row.values
        .iter()
        .map(format_value)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format a single value for display.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Uint(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(text) => format!("'{}'", text),
        Value::Array(vs) => format!(
            "[{}]",
            vs.iter().map(format_value).collect::<Vec<_>>().join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_render_with_headers() {
        let rendered = render_rows(
            &["id", "name"],
            &[vec!["1".into(), "'Ada'".into()]],
        );
        assert!(rendered.contains("id"));
        assert!(rendered.contains("'Ada'"));
    }

    #[test]
    fn empty_render_is_placeholder() {
        assert_eq!(render_rows(&[], &[]), "<empty>");
    }

    #[test]
    fn values_format_like_literals() {
        assert_eq!(format_value(&Value::Null), "null");
        assert_eq!(format_value(&Value::Text("x".into())), "'x'");
        assert_eq!(
            format_row(&Row::new(vec![Value::Int(1), Value::Null])),
            "1, null"
        );
    }
}
