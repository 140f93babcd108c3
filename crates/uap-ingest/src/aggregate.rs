//! Cross-entity activity summary
//!
//! The terminal aggregation step. LEFT-joins the four raw tables from
//! users on the `userId` relation, so users with no carts, posts, or
//! todos still appear with zero aggregates, then groups per user and
//! orders by total cart amount, post count, and todo count (all
//! descending). The result fully replaces the summary table each run;
//! there is no incremental merge.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::warehouse::Warehouse;
use crate::{IngestError, Result};

/// Name of the replaceable summary table.
pub const SUMMARY_TABLE: &str = "user_activity_summary";

/// One row per user in the activity summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub total_products: i64,
    pub total_quantity: i64,
    pub total_amount: f64,
    pub post_count: i64,
    pub total_reactions: i64,
    pub total_todos: i64,
    pub completed_todos: i64,
    pub pending_todos: i64,
}

/// Computes and materializes the summary table.
pub struct Aggregator {
    warehouse: Arc<dyn Warehouse>,
}

impl Aggregator {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Join the four raw tables and replace the summary table.
    ///
    /// Fatal for the run's final step only: raw loads already
    /// committed are never rolled back. Returns the summary row count.
    #[instrument(skip(self))]
    pub async fn summarize(&self) -> Result<usize> {
        let users = self.fetch("raw_users").await?;
        let carts = self.fetch("raw_carts").await?;
        let posts = self.fetch("raw_posts").await?;
        let todos = self.fetch("raw_todos").await?;

        let summary = summarize_rows(&users, &carts, &posts, &todos);
        let row_count = summary.len();

        let rows = summary
            .into_iter()
            .map(|row| serde_json::to_value(row).map_err(IngestError::from))
            .collect::<Result<Vec<Value>>>()
            .map_err(|e| IngestError::Aggregation(e.to_string()))?;

        self.warehouse
            .replace_table(SUMMARY_TABLE, rows)
            .await
            .map_err(|e| IngestError::Aggregation(e.to_string()))?;

        info!(rows = row_count, table = SUMMARY_TABLE, "summary replaced");

        Ok(row_count)
    }

    async fn fetch(&self, table: &str) -> Result<Vec<Value>> {
        self.warehouse
            .fetch_table(table)
            .await
            .map_err(|e| IngestError::Aggregation(format!("fetch {}: {}", table, e)))
    }
}

/// Pure join/aggregate over raw rows.
///
/// Grouping key is the user's `id` joined against each child row's
/// `userId`. Ordering is the fixed tie-break chain: total_amount
/// desc, then post_count desc, then total_todos desc.
pub fn summarize_rows(
    users: &[Value],
    carts: &[Value],
    posts: &[Value],
    todos: &[Value],
) -> Vec<SummaryRow> {
    let carts_by_user = group_by_user(carts);
    let posts_by_user = group_by_user(posts);
    let todos_by_user = group_by_user(todos);

    // The raw tables are at-least-once: reruns re-append, so the same
    // user row appears once per run. Group on the id so the summary
    // stays one row per user regardless.
    let mut seen_users = BTreeSet::new();

    let mut rows: Vec<SummaryRow> = users
        .iter()
        .filter_map(|user| {
            let user_id = user.get("id").and_then(Value::as_i64)?;
            if !seen_users.insert(user_id) {
                return None;
            }

            let mut row = SummaryRow {
                user_id,
                first_name: str_field(user, "firstName"),
                last_name: str_field(user, "lastName"),
                total_products: 0,
                total_quantity: 0,
                total_amount: 0.0,
                post_count: 0,
                total_reactions: 0,
                total_todos: 0,
                completed_todos: 0,
                pending_todos: 0,
            };

            for cart in matching(&carts_by_user, user_id) {
                row.total_products += int_field(cart, "totalProducts");
                row.total_quantity += int_field(cart, "totalQuantity");
                row.total_amount += cart.get("total").and_then(Value::as_f64).unwrap_or(0.0);
            }

            for post in matching(&posts_by_user, user_id) {
                row.post_count += 1;
                row.total_reactions += int_field(post, "reactions");
            }

            for todo in matching(&todos_by_user, user_id) {
                row.total_todos += 1;
                if todo.get("completed").and_then(Value::as_bool).unwrap_or(false) {
                    row.completed_todos += 1;
                } else {
                    row.pending_todos += 1;
                }
            }

            Some(row)
        })
        .collect();

    rows.sort_by(|a, b| {
        b.total_amount
            .total_cmp(&a.total_amount)
            .then(b.post_count.cmp(&a.post_count))
            .then(b.total_todos.cmp(&a.total_todos))
    });

    rows
}

fn group_by_user(rows: &[Value]) -> BTreeMap<i64, Vec<&Value>> {
    let mut grouped: BTreeMap<i64, Vec<&Value>> = BTreeMap::new();
    for row in rows {
        if let Some(user_id) = row.get("userId").and_then(Value::as_i64) {
            grouped.entry(user_id).or_default().push(row);
        }
    }
    grouped
}

fn matching<'a>(grouped: &'a BTreeMap<i64, Vec<&'a Value>>, user_id: i64) -> &'a [&'a Value] {
    grouped.get(&user_id).map(Vec::as_slice).unwrap_or(&[])
}

fn str_field(row: &Value, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_field(row: &Value, key: &str) -> i64 {
    row.get(key).and_then(Value::as_i64).unwrap_or(0)
}
