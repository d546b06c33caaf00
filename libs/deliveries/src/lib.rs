//! Delivery correlation and search over the append-only event log.
//!
//! A delivery is a read-time join: the origin "message sent" event, its
//! latest status event, and optionally the upstream triggering event. Nothing
//! here is persisted beyond the raw log rows; every page is derived fresh
//! from parameterized queries.

mod cursor;
mod matcher;
mod query;
mod row;
mod store;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use cursor::{decode_cursor, encode_cursor};
pub use matcher::{compile_property_filters, PropertyFilter};
pub use query::{
    build_search_query, QueryBuilder, SearchDeliveriesRequest, SortBy, SortDirection, SqlValue,
    DEFAULT_LIMIT,
};
pub use row::{parse_delivery_row, DeliveryItem, RawDeliveryRow, RowParseError};
pub use store::{EventLog, SqliteEventLog};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDeliveriesResponse {
    pub items: Vec<DeliveryItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_cursor: Option<String>,
}

/// Runs one delivery search page. Malformed rows are logged and dropped
/// individually; the page never fails because of one bad row.
pub async fn search_deliveries(
    log: &dyn EventLog,
    request: &SearchDeliveriesRequest,
    cancel: &CancellationToken,
) -> anyhow::Result<SearchDeliveriesResponse> {
    let limit = request.limit();
    let offset = request
        .cursor
        .as_deref()
        .map(decode_cursor)
        .unwrap_or(0) as usize;

    let (sql, params) = build_search_query(request, offset, limit);
    let rows = log.query_rows(&sql, &params, cancel).await?;

    let mut items = Vec::with_capacity(rows.len());
    for value in rows {
        let raw: RawDeliveryRow = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(workspace_id = %request.workspace_id, error = %err, "dropping unreadable delivery row");
                continue;
            }
        };
        let message_id = raw.origin_message_id.clone();
        match parse_delivery_row(raw) {
            Ok(item) => items.push(item),
            Err(err) => {
                warn!(
                    workspace_id = %request.workspace_id,
                    origin_message_id = %message_id,
                    error = %err,
                    "dropping malformed delivery row"
                );
            }
        }
    }
    peregrine_telemetry::record_search(items.len());

    let next_cursor =
        (items.len() >= limit).then(|| encode_cursor((offset as u64).saturating_add(limit as u64)));
    let previous_cursor = (offset > 0).then(|| encode_cursor(offset.saturating_sub(limit) as u64));

    Ok(SearchDeliveriesResponse {
        items,
        next_cursor,
        previous_cursor,
    })
}
