//! HTML report: standalone page with embedded CSS
//!
//! Query text, parameters and stack frames all come from the profiled
//! application and are escaped before they reach the page.

use super::millis;
use crate::aggregate::{QueryGroup, Report};
use crate::record::format_stack;
use std::fmt::Write;

/// HTML formatter
#[derive(Debug)]
pub struct HtmlReport<'a> {
    report: &'a Report,
    title: &'a str,
}

impl<'a> HtmlReport<'a> {
    pub fn new(report: &'a Report, title: &'a str) -> Self {
        Self { report, title }
    }

    /// Escape HTML special characters to prevent XSS
    pub fn escape_html(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
    }

    /// Generate embedded CSS styles
    fn generate_styles() -> &'static str {
        r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            margin: 20px;
            background-color: #f5f5f5;
        }
        h1, h2 {
            color: #333;
        }
        dl.summary {
            display: grid;
            grid-template-columns: max-content auto;
            gap: 4px 16px;
            background-color: white;
            padding: 12px;
            box-shadow: 0 1px 3px rgba(0,0,0,0.1);
        }
        dl.summary dt {
            font-weight: bold;
            color: #555;
        }
        dl.summary dd {
            margin: 0;
            font-family: monospace;
        }
        table {
            border-collapse: collapse;
            width: 100%;
            background-color: white;
            box-shadow: 0 1px 3px rgba(0,0,0,0.1);
            margin-bottom: 20px;
        }
        th, td {
            border: 1px solid #ddd;
            padding: 8px;
            text-align: left;
            vertical-align: top;
        }
        th {
            background-color: #4a90d9;
            color: white;
            font-weight: bold;
        }
        tr:nth-child(even) {
            background-color: #f9f9f9;
        }
        .query {
            color: #0066cc;
            font-family: monospace;
            white-space: pre-wrap;
        }
        .duration {
            font-family: monospace;
            color: #666;
        }
        .params {
            font-family: monospace;
            font-size: 0.9em;
            color: #555;
        }
        .source {
            font-size: 0.85em;
            color: #888;
            white-space: pre;
        }
        .footer {
            margin-top: 20px;
            font-size: 0.8em;
            color: #888;
            text-align: center;
        }
        "#
    }

    fn render_summary(&self) -> String {
        let all = &self.report.all;
        let mut html = String::new();
        html.push_str("    <dl class=\"summary\">\n");
        let rows = [
            ("Queries", all.count().to_string()),
            ("Unique", format!("{} unique", self.report.unique_queries())),
            ("Total time", format!("{:.3} ms", millis(all.sum))),
            ("Mean", format!("{:.3} ms", millis(all.mean))),
            ("Median", format!("{:.3} ms", millis(all.median))),
            ("Rows", all.rowcounts.to_string()),
        ];
        for (label, value) in rows {
            let _ = writeln!(html, "        <dt>{}</dt><dd>{}</dd>", label, value);
        }
        html.push_str("    </dl>\n");
        html
    }

    fn render_group(rank: usize, group: &QueryGroup) -> String {
        let mut html = String::new();
        let _ = writeln!(
            html,
            "    <h2>#{} {}</h2>",
            rank,
            Self::escape_html(&group.first_word)
        );
        html.push_str("    <dl class=\"summary\">\n");
        let rows = [
            ("Calls", group.count().to_string()),
            ("Total time", format!("{:.3} ms", millis(group.sum))),
            ("Mean", format!("{:.3} ms", millis(group.mean))),
            ("Median", format!("{:.3} ms", millis(group.median))),
            ("Min", format!("{:.3} ms", millis(group.min))),
            ("Max", format!("{:.3} ms", millis(group.max))),
            ("Rows", group.rowcounts.to_string()),
            ("Parameter sets", group.unique_params().to_string()),
        ];
        for (label, value) in rows {
            let _ = writeln!(html, "        <dt>{}</dt><dd>{}</dd>", label, value);
        }
        html.push_str("    </dl>\n");
        let _ = writeln!(
            html,
            "    <pre class=\"query\">{}</pre>",
            Self::escape_html(&group.text)
        );

        html.push_str("    <table>\n");
        html.push_str("        <tr><th>Calls</th><th>Caller</th><th>Stack</th></tr>\n");
        for (stack_text, count) in group.stacks_by_count() {
            let caller = group
                .callers
                .get(stack_text)
                .and_then(|c| c.as_ref())
                .map(|f| f.to_string())
                .unwrap_or_default();
            let _ = writeln!(
                html,
                r#"        <tr><td class="duration">{}</td><td class="source">{}</td><td class="source">{}</td></tr>"#,
                count,
                Self::escape_html(&caller),
                Self::escape_html(stack_text)
            );
        }
        html.push_str("    </table>\n");

        html.push_str("    <table>\n");
        html.push_str("        <tr><th>Count</th><th>Parameters</th><th>Key</th><th>First stack</th></tr>\n");
        for entry in group.param_sets() {
            let _ = writeln!(
                html,
                r#"        <tr><td class="duration">{}</td><td class="params">{}</td><td class="params">{}</td><td class="source">{}</td></tr>"#,
                entry.count,
                Self::escape_html(&entry.params.to_string()),
                entry.key.to_hex(),
                Self::escape_html(&format_stack(&entry.stack))
            );
        }
        html.push_str("    </table>\n");
        html
    }

    /// Generate complete HTML document
    pub fn render(&self) -> String {
        let title = Self::escape_html(self.title);
        let mut html = String::new();

        html.push_str("<!DOCTYPE html>\n");
        html.push_str("<html lang=\"en\">\n");

        html.push_str("<head>\n");
        html.push_str("    <meta charset=\"UTF-8\">\n");
        html.push_str(
            "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        let _ = writeln!(html, "    <title>{}</title>", title);
        html.push_str("    <style>");
        html.push_str(Self::generate_styles());
        html.push_str("</style>\n");
        html.push_str("</head>\n");

        html.push_str("<body>\n");
        let _ = writeln!(html, "    <h1>{}</h1>", title);
        html.push_str(&self.render_summary());

        if self.report.groups.is_empty() {
            html.push_str("    <p>No queries captured.</p>\n");
        }
        for (i, group) in self.report.groups.iter().enumerate() {
            html.push_str(&Self::render_group(i + 1, group));
        }

        let _ = writeln!(
            html,
            "    <div class=\"footer\">Generated by querytap {}</div>",
            env!("CARGO_PKG_VERSION")
        );
        html.push_str("</body>\n");
        html.push_str("</html>\n");
        html
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::params::{ParamValue, Params};
    use crate::record::{ExecutionRecord, StackFrame};
    use std::time::Duration;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            HtmlReport::escape_html("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
        assert_eq!(HtmlReport::escape_html("a & b"), "a &amp; b");
    }

    #[test]
    fn test_document_structure() {
        let report = aggregate(Vec::new());
        let html = HtmlReport::new(&report, "Report").render();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Report</title>"));
        assert!(html.contains("No queries captured."));
        assert!(html.ends_with("</html>\n"));
    }

    #[test]
    fn test_params_are_escaped() {
        let record = ExecutionRecord::builder("SELECT * FROM b WHERE id = ?")
            .params(Params::positional([ParamValue::from(
                "<blockquote class='test'>",
            )]))
            .duration(Duration::from_millis(1))
            .build();
        let html = HtmlReport::new(&aggregate(vec![record]), "Report").render();
        assert!(!html.contains("<blockquote class='test'>"));
        assert!(html.contains("&quot;&lt;blockquote class=&#39;test&#39;&gt;&quot;"));
    }

    #[test]
    fn test_param_set_shows_first_stack() {
        let record = ExecutionRecord::builder("SELECT 1")
            .stack(vec![StackFrame::new("app::load<T>", None, None)])
            .build();
        let html = HtmlReport::new(&aggregate(vec![record]), "Report").render();
        assert!(html.contains("<th>First stack</th>"));
        assert!(html.contains(r#"<td class="source">app::load&lt;T&gt;</td>"#));
    }

    #[test]
    fn test_unique_count_and_calls() {
        let mut records = Vec::new();
        for _ in 0..2 {
            records.push(ExecutionRecord::builder("SELECT * FROM a").build());
        }
        for _ in 0..10 {
            records.push(ExecutionRecord::builder("SELECT * FROM a WHERE id = 10").build());
        }
        let html = HtmlReport::new(&aggregate(records), "Report").render();
        assert!(html.contains("2 unique"));
        assert!(html.contains("<dd>10</dd>"));
    }
}
