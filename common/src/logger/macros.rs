use tracing::{Span, field};

use super::TraceId;

/// Root span for a tick / request. `condition_id` and `owner` are filled in
/// later by whoever learns them.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id,
        condition_id = field::Empty,
        owner = field::Empty
    )
}

/// Child span (inherits trace_id from the enclosing root span).
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        condition_id = field::Empty,
        owner = field::Empty
    )
}
