use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

/// Equality predicate on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A parameterized request against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

/// Scalar cell rendered the way it appears in a filter value.
pub(crate) fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Ascending comparison with nulls last. Timestamps compare by instant.
pub(crate) fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (DateTime::<FixedOffset>::parse_from_rfc3339(x), DateTime::<FixedOffset>::parse_from_rfc3339(y)) {
                (Ok(dx), Ok(dy)) => dx.cmp(&dy),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self { column: column.into(), value: value.to_string() }
    }

    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column).and_then(scalar_text).as_deref() == Some(self.value.as_str())
    }
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into(), columns: "*".to_string(), filters: Vec::new(), order: None, limit: None }
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Query-string pairs in the REST dialect. Writes carry filters only.
    pub fn to_params(&self, with_projection: bool) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if with_projection {
            out.push(("select".to_string(), self.columns.clone()));
        }
        for f in &self.filters {
            out.push((f.column.clone(), format!("eq.{}", f.value)));
        }
        if let Some(o) = &self.order {
            let dir = if o.ascending { "asc" } else { "desc" };
            out.push(("order".to_string(), format!("{}.{}", o.column, dir)));
        }
        if let Some(n) = self.limit {
            out.push(("limit".to_string(), n.to_string()));
        }
        out
    }

    pub fn projected_columns(&self) -> Option<Vec<&str>> {
        let cols = self.columns.trim();
        if cols.is_empty() || cols == "*" {
            return None;
        }
        Some(cols.split(',').map(str::trim).filter(|c| !c.is_empty()).collect())
    }

    /// Apply filters, order, limit and projection to a set of rows.
    pub(crate) fn apply(&self, rows: impl Iterator<Item = Value>) -> Vec<Value> {
        let mut out: Vec<Value> = rows.filter(|r| self.matches(r)).collect();
        if let Some(o) = &self.order {
            out.sort_by(|a, b| {
                let ord = compare_cells(a.get(&o.column), b.get(&o.column));
                if o.ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(n) = self.limit {
            out.truncate(n);
        }
        if let Some(cols) = self.projected_columns() {
            out = out
                .into_iter()
                .map(|row| {
                    let mut m = serde_json::Map::new();
                    for c in &cols {
                        m.insert(c.to_string(), row.get(*c).cloned().unwrap_or(Value::Null));
                    }
                    Value::Object(m)
                })
                .collect();
        }
        out
    }
}
