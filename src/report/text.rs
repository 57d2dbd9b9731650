//! Plain text report: one summary block, then one block per query group

use super::millis;
use crate::aggregate::{QueryGroup, Report};
use std::fmt::Write;

/// Text formatter
#[derive(Debug)]
pub struct TextReport<'a> {
    report: &'a Report,
    title: &'a str,
}

impl<'a> TextReport<'a> {
    pub fn new(report: &'a Report, title: &'a str) -> Self {
        Self { report, title }
    }

    fn summary(&self, out: &mut String) {
        let all = &self.report.all;
        let _ = writeln!(out, "{}", self.title);
        let _ = writeln!(out, "{}", "=".repeat(self.title.chars().count().max(20)));
        let _ = writeln!(
            out,
            "{} queries, {} unique, {:.3} ms total",
            all.count(),
            self.report.unique_queries(),
            millis(all.sum)
        );
        if !all.is_empty() {
            let _ = writeln!(
                out,
                "mean {:.3} ms, median {:.3} ms, min {:.3} ms, max {:.3} ms, {} rows",
                millis(all.mean),
                millis(all.median),
                millis(all.min),
                millis(all.max),
                all.rowcounts
            );
        }
        out.push('\n');
    }

    fn group(&self, out: &mut String, rank: usize, group: &QueryGroup) {
        let _ = writeln!(out, "{}", "─".repeat(88));
        let _ = writeln!(
            out,
            "#{:<4} {:>8} calls {:>12.3} ms total {:>10.3} ms mean {:>10.3} ms median",
            rank,
            group.count(),
            millis(group.sum),
            millis(group.mean),
            millis(group.median)
        );
        let _ = writeln!(
            out,
            "      min {:.3} ms, max {:.3} ms, {} rows, {} distinct parameter sets",
            millis(group.min),
            millis(group.max),
            group.rowcounts,
            group.unique_params()
        );
        out.push('\n');
        for line in group.text.lines() {
            let _ = writeln!(out, "    {}", line.trim_end());
        }
        out.push('\n');

        for (stack_text, count) in group.stacks_by_count() {
            let caller = group
                .callers
                .get(stack_text)
                .and_then(|c| c.as_ref())
                .map_or_else(|| "<no stack captured>".to_string(), |f| f.to_string());
            let _ = writeln!(out, "    {} call(s) from {}", count, caller);
        }

        for entry in group.param_sets() {
            let _ = writeln!(out, "    {:>6} x {}", entry.count, entry.params);
        }
        out.push('\n');
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.summary(&mut out);
        if self.report.groups.is_empty() {
            out.push_str("No queries captured.\n");
            return out;
        }
        for (i, group) in self.report.groups.iter().enumerate() {
            self.group(&mut out, i + 1, group);
        }
        out
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
    fn test_empty_report() {
        let report = aggregate(Vec::new());
        let text = TextReport::new(&report, "Report").render();
        assert!(text.contains("0 queries, 0 unique"));
        assert!(text.contains("No queries captured."));
    }

    #[test]
    fn test_groups_listed_costliest_first() {
        let report = aggregate(vec![
            ExecutionRecord::builder("SELECT cheap")
                .duration(Duration::from_millis(1))
                .build(),
            ExecutionRecord::builder("SELECT costly")
                .duration(Duration::from_millis(9))
                .build(),
        ]);
        let text = TextReport::new(&report, "Report").render();
        let costly = text.find("SELECT costly").unwrap();
        let cheap = text.find("SELECT cheap").unwrap();
        assert!(costly < cheap);
        assert!(text.contains("2 queries, 2 unique, 10.000 ms total"));
    }

    #[test]
    fn test_group_block_details() {
        let record = ExecutionRecord::builder("SELECT * FROM a WHERE id = ?")
            .stack(vec![StackFrame::new("app::load", Some("src/app.rs".into()), Some(7))])
            .duration(Duration::from_millis(2))
            .params(Params::positional([ParamValue::Int(42)]))
            .rowcount(1)
            .build();
        let report = aggregate(vec![record.clone(), record]);
        let text = TextReport::new(&report, "Report").render();
        assert!(text.contains("2 call(s) from app::load (src/app.rs:7)"));
        assert!(text.contains("2 x (42)"));
        assert!(text.contains("2 rows, 1 distinct parameter sets"));
    }
}
