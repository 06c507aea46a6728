//! Batch refresh of active tracked queries.
//!
//! Invoked by an external scheduler (cron → `newsdesk-cli refresh-active` →
//! `POST /tracked/refresh-active`). Queries are taken least recently updated
//! first and refreshed with bounded concurrency. A failed refresh appends
//! nothing and does not stop the batch.

use futures::stream::{self, StreamExt};
use serde::Serialize;

use newsdesk_core::NewsdeskError;

use crate::engine::Engine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub attempted: usize,
    pub refreshed: usize,
    pub failed: usize,
}

pub async fn refresh_active(
    engine: &Engine,
    limit: u32,
    concurrency: usize,
) -> Result<RefreshReport, NewsdeskError> {
    let queries = engine.tracked_store().list_active(limit).await?;
    let attempted = queries.len();

    let outcomes: Vec<bool> = stream::iter(queries)
        .map(|q| async move {
            match engine.refresh_from_upstream(q.query_id, &q.user_id).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(query_id = %q.query_id, error = %e, "Tracked query refresh failed");
                    false
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let refreshed = outcomes.iter().filter(|ok| **ok).count();
    let report = RefreshReport {
        attempted,
        refreshed,
        failed: attempted - refreshed,
    };
    tracing::info!(
        attempted = report.attempted,
        refreshed = report.refreshed,
        failed = report.failed,
        "Active tracked queries refreshed"
    );
    Ok(report)
}
