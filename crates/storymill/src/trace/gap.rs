//! Gap analysis: idle time between sibling spans.
//!
//! For each group of spans sharing a parent, spans are taken in
//! chronological order and the distance from one span's end to the next
//! span's start is reported. This surfaces where wall-clock time went
//! during asynchronous waits (e.g. between dispatching extraction and the
//! callback-driven template phase).

use std::collections::BTreeMap;

use serde::Serialize;

use super::types::Span;

/// Idle period between two sibling spans.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub after_span: String,
    pub before_span: String,
    pub idle_ms: i64,
}

/// Computes gaps between consecutive sibling spans. Only positive idle
/// periods are reported; overlapping spans produce no gap. Spans that
/// never ended are skipped (their duration is unknowable).
pub fn analyze_gaps(spans: &[Span]) -> Vec<Gap> {
    let mut by_parent: BTreeMap<Option<String>, Vec<&Span>> = BTreeMap::new();
    for span in spans {
        by_parent
            .entry(span.parent_span_id.clone())
            .or_default()
            .push(span);
    }

    let mut gaps = Vec::new();
    for (parent, mut siblings) in by_parent {
        siblings.sort_by_key(|s| s.started_at);
        for pair in siblings.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let Some(prev_end) = prev.ended_at else {
                continue;
            };
            let idle_ms = (next.started_at - prev_end).num_milliseconds();
            if idle_ms > 0 {
                gaps.push(Gap {
                    parent_span_id: parent.clone(),
                    after_span: prev.name.clone(),
                    before_span: next.name.clone(),
                    idle_ms,
                });
            }
        }
    }
    gaps
}
