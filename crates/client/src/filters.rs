//! Conversion of a [`TaskFilter`] into HTTP query parameters.

use jobq_core::TaskFilter;

/// Only parameters with a value are emitted; `from`/`to` are unix seconds.
pub(crate) fn query_params(filter: &TaskFilter) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();

    if let Some(queue) = &filter.queue_name {
        params.push(("queue", queue.clone()));
    }
    if let Some(status) = filter.status {
        params.push(("status", status.to_string()));
    }
    if let Some(from) = filter.from {
        params.push(("from", from.timestamp().to_string()));
    }
    if let Some(to) = filter.to {
        params.push(("to", to.timestamp().to_string()));
    }
    if let Some(sort_by) = &filter.sort_by {
        params.push(("sort_by", sort_by.clone()));
    }
    if filter.offset > 0 {
        params.push(("offset", filter.offset.to_string()));
    }
    if filter.limit > 0 {
        params.push(("limit", filter.limit.to_string()));
    }

    params
}
