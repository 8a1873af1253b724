//! HTML rendering of digest outcomes.

use serde_json::Value;

use crate::dataset::Dataset;
use crate::pipeline::DigestOutcome;

/// Shown in place of an empty narrative.
pub const EMPTY_NARRATIVE_MESSAGE: &str =
    "No response from model. Try asking a more specific question.";

/// Render an outcome as a standalone HTML page.
///
/// Aggregate outcomes show the final narrative, then the per-chunk narratives
/// when there was more than one, then the dataset. Per-row outcomes show the
/// dataset with its `prompt_result` column.
pub fn render_html(outcome: &DigestOutcome) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<title>Digest</title>\n</head>\n<body>\n");

    match outcome {
        DigestOutcome::Aggregate {
            narrative,
            partials,
            dataset,
        } => {
            out.push_str("<h2>Final Prompt Result</h2>\n");
            push_narrative(&mut out, narrative);

            if partials.len() > 1 {
                out.push_str("<h2>Batch Prompt Result</h2>\n");
                for (i, partial) in partials.iter().enumerate() {
                    out.push_str(&format!("<h3>Batch {}</h3>\n", i + 1));
                    push_narrative(&mut out, partial);
                }
            }

            out.push_str("<h2>Data</h2>\n");
            push_table(&mut out, dataset);
        }
        DigestOutcome::PerRow { dataset } => {
            out.push_str("<h2>Prompt Result</h2>\n");
            push_table(&mut out, dataset);
        }
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn push_narrative(out: &mut String, text: &str) {
    let text = if text.trim().is_empty() {
        EMPTY_NARRATIVE_MESSAGE
    } else {
        text
    };
    out.push_str(&format!(
        "<div style=\"white-space: pre-wrap\">{}</div>\n",
        escape_html(text)
    ));
}

fn push_table(out: &mut String, dataset: &Dataset) {
    let columns = dataset.columns();
    out.push_str("<table border=\"1\">\n<thead>\n<tr>");
    for column in &columns {
        out.push_str(&format!("<th>{}</th>", escape_html(column)));
    }
    out.push_str("</tr>\n</thead>\n<tbody>\n");

    for row in dataset.rows() {
        out.push_str("<tr>");
        for column in &columns {
            let cell = row.get(column).map(cell_text).unwrap_or_default();
            out.push_str(&format!("<td>{}</td>", escape_html(&cell)));
        }
        out.push_str("</tr>\n");
    }

    out.push_str("</tbody>\n</table>\n");
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
