//! Parameterized search-query assembly. User-supplied values never reach the
//! SQL text; every value is accumulated as a named placeholder and handed to
//! the backend alongside the statement.

use peregrine_core::event::status_event_names;
use peregrine_core::{Channel, InternalEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::matcher::{compile_property_filters, PropertyFilter};

/// A backend-agnostic bound value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// Accumulates named placeholders (`:qv0`, `:qv1`, ...) and their values.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    params: Vec<(String, SqlValue)>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a value, returning the placeholder to splice into the SQL text.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        let name = format!(":qv{}", self.params.len());
        self.params.push((name.clone(), value.into()));
        name
    }

    /// Binds a list, returning a comma-joined placeholder sequence for an
    /// `IN (...)` clause.
    pub fn bind_list<T: Into<SqlValue>>(&mut self, values: impl IntoIterator<Item = T>) -> String {
        let names: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
        names.join(", ")
    }

    pub fn into_params(self) -> Vec<(String, SqlValue)> {
        self.params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    SentAt,
    Status,
    From,
    To,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

pub const DEFAULT_LIMIT: usize = 20;

/// Filters for one delivery search. Everything except `workspace_id` is
/// optional; empty vectors mean "no filter".
#[derive(Debug, Clone)]
pub struct SearchDeliveriesRequest {
    pub workspace_id: Uuid,
    pub journey_id: Option<Uuid>,
    pub broadcast_id: Option<Uuid>,
    pub template_ids: Vec<Uuid>,
    pub channels: Vec<Channel>,
    /// Recipient addresses/identifiers.
    pub to: Vec<String>,
    pub from: Vec<String>,
    /// Latest-status filter; event names such as `EmailOpened`.
    pub statuses: Vec<String>,
    pub user_ids: Vec<String>,
    /// Restrict to members of any of these groups (latest assignment wins).
    pub group_ids: Vec<String>,
    /// Unix ms bounds on `sent_at`.
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub triggering_properties: Vec<PropertyFilter>,
    pub context_properties: Vec<PropertyFilter>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub sort_by: SortBy,
    pub sort_direction: SortDirection,
}

impl SearchDeliveriesRequest {
    pub fn new(workspace_id: Uuid) -> Self {
        Self {
            workspace_id,
            journey_id: None,
            broadcast_id: None,
            template_ids: Vec::new(),
            channels: Vec::new(),
            to: Vec::new(),
            from: Vec::new(),
            statuses: Vec::new(),
            user_ids: Vec::new(),
            group_ids: Vec::new(),
            start_date: None,
            end_date: None,
            triggering_properties: Vec::new(),
            context_properties: Vec::new(),
            limit: None,
            cursor: None,
            sort_by: SortBy::default(),
            sort_direction: SortDirection::default(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).max(1)
    }
}

fn quoted_status_event_list() -> String {
    status_event_names()
        .iter()
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Filters that apply directly to origin send rows (alias `s`).
fn send_filters(qb: &mut QueryBuilder, request: &SearchDeliveriesRequest) -> Vec<String> {
    let mut clauses = Vec::new();

    if let Some(journey_id) = &request.journey_id {
        let p = qb.bind(journey_id.to_string());
        clauses.push(format!("json_extract(s.properties, '$.journeyId') = {p}"));
    }
    if let Some(broadcast_id) = &request.broadcast_id {
        let p = qb.bind(broadcast_id.to_string());
        clauses.push(format!("json_extract(s.properties, '$.broadcastId') = {p}"));
    }
    if !request.template_ids.is_empty() {
        let list = qb.bind_list(request.template_ids.iter().map(Uuid::to_string));
        clauses.push(format!(
            "json_extract(s.properties, '$.templateId') IN ({list})"
        ));
    }
    if !request.channels.is_empty() {
        let list = qb.bind_list(request.channels.iter().map(|c| c.as_str()));
        clauses.push(format!("json_extract(s.properties, '$.channel') IN ({list})"));
    }
    if !request.to.is_empty() {
        // Legacy rows carry the recipient at the payload root.
        let list = qb.bind_list(request.to.iter().map(String::as_str));
        let root = qb.bind_list(request.to.iter().map(String::as_str));
        clauses.push(format!(
            "(json_extract(s.properties, '$.variant.to') IN ({list}) \
             OR json_extract(s.properties, '$.to') IN ({root}))"
        ));
    }
    if !request.from.is_empty() {
        let list = qb.bind_list(request.from.iter().map(String::as_str));
        let root = qb.bind_list(request.from.iter().map(String::as_str));
        clauses.push(format!(
            "(json_extract(s.properties, '$.variant.from') IN ({list}) \
             OR json_extract(s.properties, '$.from') IN ({root}))"
        ));
    }
    if !request.user_ids.is_empty() {
        let list = qb.bind_list(request.user_ids.iter().map(String::as_str));
        clauses.push(format!("s.user_or_anonymous_id IN ({list})"));
    }
    if !request.group_ids.is_empty() {
        let workspace = qb.bind(request.workspace_id.to_string());
        let list = qb.bind_list(request.group_ids.iter().map(String::as_str));
        // Latest assignment wins per (group, user); the bare `assigned` column
        // tracks the max(assigned_at) row.
        clauses.push(format!(
            "s.user_or_anonymous_id IN (\
             SELECT user_id FROM (\
             SELECT user_id, assigned, max(assigned_at) AS latest \
             FROM group_user_assignments \
             WHERE workspace_id = {workspace} AND group_id IN ({list}) \
             GROUP BY group_id, user_id\
             ) WHERE assigned = 1)"
        ));
    }
    if let Some(start) = request.start_date {
        let p = qb.bind(start);
        clauses.push(format!("s.event_time >= {p}"));
    }
    if let Some(end) = request.end_date {
        let p = qb.bind(end);
        clauses.push(format!("s.event_time <= {p}"));
    }
    if !request.context_properties.is_empty() {
        clauses.push(compile_property_filters(
            qb,
            "s.properties",
            &request.context_properties,
        ));
    }
    if !request.triggering_properties.is_empty() {
        let matcher = compile_property_filters(qb, "t.properties", &request.triggering_properties);
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM delivery_events t \
             WHERE t.workspace_id = s.workspace_id \
             AND t.message_id = json_extract(s.properties, '$.triggeringMessageId') \
             AND {matcher})"
        ));
    }

    clauses
}

fn order_by(request: &SearchDeliveriesRequest) -> String {
    let dir = request.sort_direction.as_sql();
    match request.sort_by {
        SortBy::SentAt => format!("sent_at {dir}, origin_message_id ASC"),
        SortBy::Status => format!("status {dir}, sent_at DESC, origin_message_id ASC"),
        // Legacy flat payloads carry the address at the root, as in the
        // to/from filters.
        SortBy::From => format!(
            "coalesce(json_extract(properties, '$.variant.from'), \
             json_extract(properties, '$.from')) {dir}, \
             sent_at DESC, origin_message_id ASC"
        ),
        SortBy::To => format!(
            "coalesce(json_extract(properties, '$.variant.to'), \
             json_extract(properties, '$.to')) {dir}, \
             sent_at DESC, origin_message_id ASC"
        ),
    }
}

/// Whether limit/offset can be pushed into the sends relation. Post-join
/// filters (latest status, triggering/context properties) and join-dependent
/// sort keys force limiting after the join.
fn can_push_down_limit(request: &SearchDeliveriesRequest) -> bool {
    request.statuses.is_empty()
        && request.triggering_properties.is_empty()
        && request.context_properties.is_empty()
        && request.sort_by == SortBy::SentAt
}

/// Builds the full search statement: origin sends filtered and left-joined to
/// the per-send latest status aggregate.
pub fn build_search_query(
    request: &SearchDeliveriesRequest,
    offset: usize,
    limit: usize,
) -> (String, Vec<(String, SqlValue)>) {
    let mut qb = QueryBuilder::new();
    let statuses = quoted_status_event_list();
    let sent = InternalEvent::MessageSent.as_str();

    let workspace = qb.bind(request.workspace_id.to_string());
    let mut send_where = vec![
        format!("s.workspace_id = {workspace}"),
        format!("s.event = '{sent}'"),
        "s.hidden = 0".to_string(),
    ];
    send_where.extend(send_filters(&mut qb, request));

    let status_workspace = qb.bind(request.workspace_id.to_string());
    let status_agg = format!(
        "SELECT workspace_id, user_or_anonymous_id, message_id, \
         event AS last_event, max(event_time) AS last_event_time \
         FROM delivery_events \
         WHERE workspace_id = {status_workspace} AND event IN ({statuses}) \
         GROUP BY workspace_id, user_or_anonymous_id, message_id"
    );

    let projection = format!(
        "s.message_id AS origin_message_id, \
         s.user_or_anonymous_id AS user_id, \
         s.anonymous AS anonymous, \
         s.event_time AS sent_at, \
         coalesce(st.last_event_time, s.event_time) AS updated_at, \
         coalesce(st.last_event, '{sent}') AS status, \
         s.properties AS properties"
    );
    let join = "LEFT JOIN status_agg st \
                ON st.workspace_id = s.workspace_id \
                AND st.user_or_anonymous_id = s.user_or_anonymous_id \
                AND st.message_id = s.message_id";

    let limit_p = qb.bind(limit as i64);
    let offset_p = qb.bind(offset as i64);
    let order = order_by(request);

    let sql = if can_push_down_limit(request) {
        let inner_dir = request.sort_direction.as_sql();
        format!(
            "WITH status_agg AS ({status_agg}) \
             SELECT {projection} FROM (\
             SELECT * FROM delivery_events s WHERE {condition} \
             ORDER BY s.event_time {inner_dir}, s.message_id ASC \
             LIMIT {limit_p} OFFSET {offset_p}\
             ) s {join} ORDER BY {order}",
            condition = send_where.join(" AND "),
        )
    } else {
        let mut all_where = send_where;
        if !request.statuses.is_empty() {
            let list = qb.bind_list(request.statuses.iter().map(String::as_str));
            all_where.push(format!(
                "coalesce(st.last_event, '{sent}') IN ({list})"
            ));
        }
        format!(
            "WITH status_agg AS ({status_agg}) \
             SELECT {projection} FROM delivery_events s {join} \
             WHERE {condition} ORDER BY {order} LIMIT {limit_p} OFFSET {offset_p}",
            condition = all_where.join(" AND "),
        )
    };

    (sql, qb.into_params())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_never_appear_in_sql_text() {
        let mut request = SearchDeliveriesRequest::new(Uuid::new_v4());
        request.to = vec!["victim'; DROP TABLE delivery_events;--".into()];
        request.user_ids = vec!["u-1".into()];
        let (sql, params) = build_search_query(&request, 0, 20);
        assert!(!sql.contains("DROP TABLE"));
        assert!(!sql.contains("u-1"));
        assert!(params
            .iter()
            .any(|(_, v)| *v == SqlValue::Text("u-1".into())));
    }

    #[test]
    fn placeholders_are_sequential_and_unique() {
        let mut qb = QueryBuilder::new();
        let a = qb.bind("x");
        let b = qb.bind(5i64);
        assert_eq!(a, ":qv0");
        assert_eq!(b, ":qv1");
        assert_eq!(qb.into_params().len(), 2);
    }

    #[test]
    fn limit_pushes_down_without_post_join_filters() {
        let request = SearchDeliveriesRequest::new(Uuid::new_v4());
        assert!(can_push_down_limit(&request));

        let mut with_status = SearchDeliveriesRequest::new(Uuid::new_v4());
        with_status.statuses = vec!["EmailOpened".into()];
        assert!(!can_push_down_limit(&with_status));

        let mut with_trigger = SearchDeliveriesRequest::new(Uuid::new_v4());
        with_trigger.triggering_properties = vec![PropertyFilter {
            key: "fooBar".into(),
            value: json!(1),
        }];
        assert!(!can_push_down_limit(&with_trigger));

        let mut by_status = SearchDeliveriesRequest::new(Uuid::new_v4());
        by_status.sort_by = SortBy::Status;
        assert!(!can_push_down_limit(&by_status));
    }

    #[test]
    fn status_filter_applies_after_join() {
        let mut request = SearchDeliveriesRequest::new(Uuid::new_v4());
        request.statuses = vec!["EmailOpened".into()];
        let (sql, _) = build_search_query(&request, 0, 10);
        assert!(sql.contains("coalesce(st.last_event, 'MessageSent') IN"));
        // Limit sits at the very end, not inside the sends relation.
        assert!(sql.trim_end().ends_with(&format!(
            "LIMIT :qv{} OFFSET :qv{}",
            2, 3
        )));
    }
}
