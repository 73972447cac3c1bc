//! Batch Generator (§2.C, §4.1 "Batch generation").
//!
//! Turns a submitted job's `[start, end]` window into a lazy, finite,
//! non-restartable stream of `(batch_index, rendered_query)` pairs, walking
//! forward in `batch_size_days`-sized sub-windows (the last one may be
//! shorter). Grounded in `original_source/warehouse/metrics_tools/compute/service.py`'s
//! `generate_query_batches` async generator.

use chrono::{DateTime, Duration, Utc};
use futures_core::Stream;

use crate::render::render_batch_query;
use crate::types::SubmitRequest;

/// The time window one batch covers, bound into the rendered query as
/// `@metrics_start`, `@metrics_end`, `@metrics_sample_date`.
#[derive(Debug, Clone, Copy)]
pub struct BatchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sample_date: DateTime<Utc>,
}

/// One yielded batch: its index, its window, and its fully rendered query
/// string (dependency tokens still unresolved — see `rewrite_dependencies`).
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_index: u32,
    pub window: BatchWindow,
    pub rendered_query: String,
}

/// Computes how many batches `[start, end]` splits into at `batch_size_days`.
///
/// `tasks_total = ceil((end - start + 1 day) / batch_size_days)` per §8's
/// invariant. Returns 0 when `start > end` (§8 "zero batches" boundary case).
pub fn batch_count(request: &SubmitRequest) -> u32 {
    if request.start > request.end {
        return 0;
    }
    let span_days = (request.end.date_naive() - request.start.date_naive()).num_days() + 1;
    let batch_size = request.batch_size_days.max(1) as i64;
    ((span_days + batch_size - 1) / batch_size) as u32
}

/// Builds the lazy batch stream for a submission.
///
/// `dependent_tables_map` here is the job's logical-name map already remapped
/// from actual exported references (§4.2's reverse/forward remap happens
/// before this is called; by the time batches are generated every logical
/// name maps straight to a resolved table-reference string).
pub fn generate_query_batches(
    request: SubmitRequest,
    resolved_dependent_tables: std::collections::HashMap<String, String>,
) -> impl Stream<Item = Batch> {
    async_stream::stream! {
        if request.start > request.end {
            return;
        }
        let batch_size = Duration::days(request.batch_size_days.max(1) as i64);
        let mut cursor = request.start;
        let mut index = 0u32;

        while cursor <= request.end {
            let window_end = std::cmp::min(cursor + batch_size - Duration::days(1), request.end);
            let window = BatchWindow {
                start: cursor,
                end: window_end,
                sample_date: window_end,
            };
            let rendered_query = render_batch_query(
                &request.query_str,
                &request.source_dialect,
                &window,
                &resolved_dependent_tables,
            );
            yield Batch {
                batch_index: index,
                window,
                rendered_query,
            };
            index += 1;
            cursor = window_end + Duration::days(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use tokio_stream::StreamExt;

    fn base_request(start: DateTime<Utc>, end: DateTime<Utc>, batch_size_days: u32) -> SubmitRequest {
        SubmitRequest {
            query_str: "select * from @dep_a where ds between @metrics_start and @metrics_end"
                .to_string(),
            source_dialect: "duckdb".to_string(),
            start,
            end,
            batch_size_days,
            columns: crate::types::ColumnsDefinition::new(vec![], "duckdb"),
            ref_descriptor: crate::types::RefDescriptor {
                entity_type: "artifact".to_string(),
                window: None,
                unit: None,
                time_aggregation: None,
            },
            locals: HashMap::new(),
            dependent_tables_map: HashMap::from([("dep_a".to_string(), "actual_a".to_string())]),
            retries: None,
            execution_time: start,
        }
    }

    #[test]
    fn batch_count_covers_full_days_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap();
        let req = base_request(start, end, 1);
        assert_eq!(batch_count(&req), 7);
    }

    #[test]
    fn batch_count_is_zero_when_start_after_end() {
        let start = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let req = base_request(start, end, 1);
        assert_eq!(batch_count(&req), 0);
    }

    #[tokio::test]
    async fn yields_batches_in_ascending_order() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap();
        let req = base_request(start, end, 1);
        let resolved = HashMap::from([("dep_a".to_string(), "actual_a".to_string())]);
        let stream = generate_query_batches(req, resolved);
        tokio::pin!(stream);

        let mut indices = Vec::new();
        while let Some(batch) = stream.next().await {
            indices.push(batch.batch_index);
            assert!(batch.rendered_query.contains("actual_a"));
        }
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn last_batch_may_be_shorter() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let req = base_request(start, end, 3);
        let resolved = HashMap::new();
        let stream = generate_query_batches(req, resolved);
        tokio::pin!(stream);

        let batches: Vec<Batch> = {
            let mut v = Vec::new();
            while let Some(b) = stream.next().await {
                v.push(b);
            }
            v
        };
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].window.start.date_naive(), batches[1].window.end.date_naive());
    }
}
