//! Render interface (SPEC_FULL.md §6a, §9 "Render interface").
//!
//! Replaces the source's decorator/proxy-based SQL macro evaluator with a
//! single pure string transform. No SQL parsing: binds the three metrics-time
//! tokens to a batch's window and rewrites dependency name tokens to their
//! resolved table references.

use std::collections::HashMap;

use crate::batch::BatchWindow;

/// Format one instant as a date literal in the given source dialect.
///
/// All dialects this service targets (DuckDB, Trino) accept an ISO date
/// literal in single quotes; dialect is taken for forward compatibility with
/// dialects that don't.
fn date_literal(dt: chrono::DateTime<chrono::Utc>, _dialect: &str) -> String {
    format!("'{}'", dt.format("%Y-%m-%d"))
}

/// Render a batch's query: bind `@metrics_start`/`@metrics_end`/`@metrics_sample_date`
/// to `window`, then rewrite every `@<logical-name>` token present in
/// `resolved_dependent_tables` to its resolved table reference.
pub fn render_batch_query(
    query: &str,
    source_dialect: &str,
    window: &BatchWindow,
    resolved_dependent_tables: &HashMap<String, String>,
) -> String {
    let mut rendered = query
        .replace("@metrics_start", &date_literal(window.start, source_dialect))
        .replace("@metrics_end", &date_literal(window.end, source_dialect))
        .replace(
            "@metrics_sample_date",
            &date_literal(window.sample_date, source_dialect),
        );

    for (logical_name, resolved_reference) in resolved_dependent_tables {
        let token = format!("@{}", logical_name);
        rendered = rendered.replace(&token, resolved_reference);
    }

    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn binds_time_tokens_and_dependency_tokens() {
        let window = BatchWindow {
            start: chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            sample_date: chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let deps = HashMap::from([("dep_a".to_string(), "s3://bucket/actual_a/*".to_string())]);
        let rendered = render_batch_query(
            "select * from @dep_a where ds between @metrics_start and @metrics_end",
            "duckdb",
            &window,
            &deps,
        );
        assert_eq!(
            rendered,
            "select * from s3://bucket/actual_a/* where ds between '2024-01-01' and '2024-01-01'"
        );
    }
}
