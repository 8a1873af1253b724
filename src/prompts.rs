//! Prompt templates for chunk analysis and summary consolidation.
//!
//! Templates are plain text with `{name}` placeholders. Rendering is a single
//! pass over the template, so braces inside substituted values (row data is
//! JSON) are never mistaken for placeholders.

use crate::dataset::Row;

/// A prompt template with `{name}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub body: &'static str,
}

impl PromptTemplate {
    /// Substitute `vars` into the template. Unknown placeholders are left as-is.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let value = after.find('}').and_then(|close| {
                let name = &after[..close];
                vars.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value, close))
            });
            match value {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

// =============================================================================
// Templates
// =============================================================================

/// Map step: one question over one chunk of rows.
pub const CHUNK_ANALYSIS: PromptTemplate = PromptTemplate {
    slug: "chunk_analysis_v1",
    body: "\
I am an analyst using a business intelligence tool to prompt AI to derive insights on my data.
I will create queries to ask different questions about my first-party data.
This may include sales data, customer data, marketing data, retention data, internal HR data, etc.
I will provide you the results of these queries in the form of a JSON payload.
Responses should be comprehensive with different metrics, insights and inferences made about the data.
Please include insights that would be difficult to capture by the naked eye reading a chart or data table.
Answer my question below based on the JSON payload delimited by triple backquotes:

Question:

```{question}```

JSON payload:

```{data}```

Answer:
",
};

/// Reduce step: consolidate partial narratives.
pub const SUMMARY: PromptTemplate = PromptTemplate {
    slug: "summary_v1",
    body: "\
Write a concise summary of the following text delimited by triple backquotes.
Return your response in bullet points which covers the key points of the text.

```{text}```

BULLET POINT SUMMARY:
",
};

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    [CHUNK_ANALYSIS, SUMMARY].into_iter().find(|t| t.slug == slug)
}

/// Render the map prompt with the chunk's rows embedded as JSON.
pub fn render_chunk_prompt(question: &str, rows: &[Row]) -> String {
    let data = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
    CHUNK_ANALYSIS.render(&[("question", question), ("data", &data)])
}

/// Render the reduce prompt over newline-joined partial narratives.
pub fn render_summary_prompt(partials: &[String]) -> String {
    let text = partials.join("\n");
    SUMMARY.render(&[("text", &text)])
}
