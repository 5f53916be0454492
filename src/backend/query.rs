use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    NotNull(String),
    In(String, Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A conjunction of column filters plus an optional ordering, evaluated
/// against JSON rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq<T: Serialize>(mut self, column: &str, value: T) -> Self {
        self.filters
            .push(Filter::Eq(column.to_string(), to_value(value)));
        self
    }

    pub fn not_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::NotNull(column.to_string()));
        self
    }

    pub fn in_values<T: Serialize>(mut self, column: &str, values: impl IntoIterator<Item = T>) -> Self {
        let values = values.into_iter().map(to_value).collect();
        self.filters.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn newest_first(self) -> Self {
        self.order("created_at", false)
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Eq(column, value) => column_of(row, column) == value,
            Filter::NotNull(column) => !column_of(row, column).is_null(),
            Filter::In(column, values) => values.contains(column_of(row, column)),
        })
    }

    /// Stable sort; nulls always last.
    pub fn sort(&self, rows: &mut [Value]) {
        let Some(order) = &self.order else {
            return;
        };

        rows.sort_by(|a, b| {
            let left = column_of(a, &order.column);
            let right = column_of(b, &order.column);

            match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ordering = compare_values(left, right);
                    if order.ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                }
            }
        });
    }
}

static NULL: Value = Value::Null;

fn column_of<'a>(row: &'a Value, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Timestamps compare chronologically, numbers numerically, everything else
/// by its text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.to_lowercase().cmp(&y.to_lowercase()),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
