use std::cmp::Ordering;

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    First(usize),
    Last(usize),
}

/// Ordered, bounded view over the children of a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub order_by_child: Option<String>,
    pub start_at: Option<Value>,
    pub limit: Option<Limit>,
}

impl Query {
    pub fn order_by_child(child: impl Into<String>) -> Self {
        Self {
            order_by_child: Some(child.into()),
            ..Self::default()
        }
    }

    pub fn start_at(mut self, value: impl Into<Value>) -> Self {
        self.start_at = Some(value.into());
        self
    }

    pub fn limit_to_first(mut self, n: usize) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    fn sort_key<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match &self.order_by_child {
            Some(child) => value.get(child),
            None => None,
        }
    }

    fn compare(&self, a: (&str, &Value), b: (&str, &Value)) -> Ordering {
        compare_values(self.sort_key(a.1), self.sort_key(b.1)).then_with(|| a.0.cmp(b.0))
    }

    /// Children of `node` selected and ordered by this query
    pub fn apply(&self, node: Option<&Value>) -> Vec<(String, Value)> {
        let Some(Value::Object(children)) = node else {
            return Vec::new();
        };

        let mut selected: Vec<(&String, &Value)> = children
            .iter()
            .filter(|(key, value)| match &self.start_at {
                Some(start) => match &self.order_by_child {
                    Some(_) => compare_values(self.sort_key(value), Some(start)) != Ordering::Less,
                    None => start.as_str().is_none_or(|s| key.as_str() >= s),
                },
                None => true,
            })
            .collect();
        selected.sort_by(|a, b| self.compare((a.0.as_str(), a.1), (b.0.as_str(), b.1)));

        let selected = match self.limit {
            Some(Limit::First(n)) => &selected[..n.min(selected.len())],
            Some(Limit::Last(n)) => &selected[selected.len().saturating_sub(n)..],
            None => &selected[..],
        };

        selected
            .iter()
            .map(|(k, v)| ((*k).clone(), (*v).clone()))
            .collect()
    }

    /// The node reduced to the selected children, as a watcher sees it
    pub fn filter_node(&self, node: Option<&Value>) -> Option<Value> {
        let children: Map<String, Value> = self.apply(node).into_iter().collect();
        (!children.is_empty()).then_some(Value::Object(children))
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 4,
    }
}

/// Missing < booleans < numbers < strings < objects
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
