//! Folding per-client suite results into one run verdict.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Aggregated result of a coordinated run, e.g.
/// `{ "clients": 2, "ok": false, "tests": 15 }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuiteSummary(Map<String, Value>);

impl SuiteSummary {
    /// Reduce per-client `suite:end` payloads field by field.
    ///
    /// The first occurrence of a field is copied. After that numbers add up
    /// and every other value reduces with JavaScript `&&` semantics, so a
    /// single `false` makes a boolean field `false`. `clients` is always the
    /// number of results, whatever the payloads say. Non-object payloads
    /// still count as a client but contribute no fields.
    pub fn aggregate<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut fields = Map::new();
        let mut clients: u64 = 0;

        for result in results {
            clients += 1;
            let Some(object) = result.as_object() else {
                continue;
            };
            for (key, value) in object {
                match fields.get_mut(key) {
                    None => {
                        fields.insert(key.clone(), value.clone());
                    }
                    Some(acc) => *acc = reduce(acc, value),
                }
            }
        }

        fields.insert("clients".to_owned(), Value::from(clients));
        Self(fields)
    }

    pub fn clients(&self) -> u64 {
        self.0.get("clients").and_then(Value::as_u64).unwrap_or(0)
    }

    /// Overall verdict. A run whose results carry no `ok` field is not
    /// considered failed.
    pub fn ok(&self) -> bool {
        self.0.get("ok").is_none_or(is_truthy)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

fn reduce(acc: &Value, value: &Value) -> Value {
    match (acc, value) {
        (Value::Number(a), Value::Number(b)) => Value::Number(add_numbers(a, b)),
        _ if is_truthy(acc) => value.clone(),
        _ => acc.clone(),
    }
}

fn add_numbers(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64())
        && let Some(sum) = x.checked_add(y)
    {
        return Number::from(sum);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64())
        && let Some(sum) = x.checked_add(y)
    {
        return Number::from(sum);
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).unwrap_or_else(|| a.clone())
}

/// JavaScript truthiness.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ─── Tests ───────────────────────────────────────────────────────
