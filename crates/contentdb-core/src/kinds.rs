//! Value kinds: how attribute values are normalized, validated, filtered and
//! compared
//!
//! An AttributeType names its kind by `kind_id`. The kind is looked up in a
//! [`KindRegistry`] populated at startup; a `kind_id` with no registered kind
//! is an error at the point a value must be checked, never a silent skip.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

/// Behaviour shared by all attribute values of one kind
///
/// `properties` are the AttributeType's `kind_properties`; `params` are a
/// FilterInstance's or SorterInstance's `kind_params`. Failures are reported
/// as plain reasons and wrapped into entity errors by the store.
pub trait ValueKind {
    fn id(&self) -> &str;

    /// Normalize a value before it is validated and stored
    fn process(&self, value: JsonValue, _properties: &JsonValue) -> JsonValue {
        value
    }

    fn validate(&self, value: &JsonValue, properties: &JsonValue) -> Result<(), String>;

    /// Whether `value` passes a filter configured with `params`
    fn filter(&self, value: &JsonValue, params: &JsonValue) -> Result<bool, String>;

    /// Order two non-null values
    fn compare(&self, a: &JsonValue, b: &JsonValue) -> Ordering;
}

/// Compiled `match` patterns kept by one [`TextKind`]
const PATTERN_CACHE_SIZE: usize = 64;

/// Compiled patterns, oldest first once full
#[derive(Default)]
struct PatternCache {
    compiled: HashMap<String, Regex>,
    order: VecDeque<String>,
}

impl PatternCache {
    fn insert(&mut self, pattern: &str, re: Regex) {
        if self.compiled.len() >= PATTERN_CACHE_SIZE {
            if let Some(oldest) = self.order.pop_front() {
                self.compiled.remove(&oldest);
            }
        }
        self.order.push_back(pattern.to_string());
        self.compiled.insert(pattern.to_string(), re);
    }
}

/// Free text; filters on `match` (regex search) and `equals`
#[derive(Default)]
pub struct TextKind {
    patterns: RefCell<PatternCache>,
}

impl TextKind {
    fn is_match(&self, pattern: &str, text: &str) -> Result<bool, String> {
        if let Some(re) = self.patterns.borrow().compiled.get(pattern) {
            return Ok(re.is_match(text));
        }
        let re = Regex::new(pattern).map_err(|e| format!("invalid pattern {pattern:?}: {e}"))?;
        let matched = re.is_match(text);
        self.patterns.borrow_mut().insert(pattern, re);
        Ok(matched)
    }
}

impl ValueKind for TextKind {
    fn id(&self) -> &str {
        "text"
    }

    fn process(&self, value: JsonValue, _properties: &JsonValue) -> JsonValue {
        match value {
            JsonValue::String(s) => JsonValue::String(s.trim().to_string()),
            other => other,
        }
    }

    fn validate(&self, value: &JsonValue, properties: &JsonValue) -> Result<(), String> {
        let text = match value {
            JsonValue::Null => return Ok(()),
            JsonValue::String(s) => s,
            other => return Err(format!("expected a string, got {other}")),
        };
        if let Some(max) = properties.get("max_length").and_then(JsonValue::as_u64) {
            let len = text.chars().count() as u64;
            if len > max {
                return Err(format!("length {len} exceeds max_length {max}"));
            }
        }
        Ok(())
    }

    fn filter(&self, value: &JsonValue, params: &JsonValue) -> Result<bool, String> {
        let text = value.as_str();
        if let Some(pattern) = params.get("match") {
            let pattern = pattern
                .as_str()
                .ok_or_else(|| "`match` must be a string".to_string())?;
            match text {
                Some(text) if self.is_match(pattern, text)? => {}
                _ => return Ok(false),
            }
        }
        if let Some(expected) = params.get("equals") {
            if expected.as_str() != text {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compare(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        a.as_str().cmp(&b.as_str())
    }
}

/// Numbers; filters on inclusive `min` / `max`
#[derive(Debug, Default)]
pub struct NumberKind;

fn bound(map: &JsonValue, key: &str) -> Result<Option<f64>, String> {
    match map.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("`{key}` must be a number")),
    }
}

fn within(n: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.is_none_or(|min| n >= min) && max.is_none_or(|max| n <= max)
}

impl ValueKind for NumberKind {
    fn id(&self) -> &str {
        "number"
    }

    fn validate(&self, value: &JsonValue, properties: &JsonValue) -> Result<(), String> {
        let n = match value {
            JsonValue::Null => return Ok(()),
            JsonValue::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            other => return Err(format!("expected a number, got {other}")),
        };
        let (min, max) = (bound(properties, "min")?, bound(properties, "max")?);
        if !within(n, min, max) {
            return Err(format!("{n} is outside the allowed range"));
        }
        Ok(())
    }

    fn filter(&self, value: &JsonValue, params: &JsonValue) -> Result<bool, String> {
        let (min, max) = (bound(params, "min")?, bound(params, "max")?);
        if min.is_none() && max.is_none() {
            return Ok(true);
        }
        Ok(value.as_f64().is_some_and(|n| within(n, min, max)))
    }

    fn compare(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        let a = a.as_f64().unwrap_or(f64::NAN);
        let b = b.as_f64().unwrap_or(f64::NAN);
        a.total_cmp(&b)
    }
}

/// Booleans; filters on `equals`
#[derive(Debug, Default)]
pub struct BooleanKind;

impl ValueKind for BooleanKind {
    fn id(&self) -> &str {
        "boolean"
    }

    fn validate(&self, value: &JsonValue, _properties: &JsonValue) -> Result<(), String> {
        match value {
            JsonValue::Null | JsonValue::Bool(_) => Ok(()),
            other => Err(format!("expected a boolean, got {other}")),
        }
    }

    fn filter(&self, value: &JsonValue, params: &JsonValue) -> Result<bool, String> {
        match params.get("equals") {
            None => Ok(true),
            Some(JsonValue::Bool(expected)) => Ok(value.as_bool() == Some(*expected)),
            Some(_) => Err("`equals` must be a boolean".to_string()),
        }
    }

    fn compare(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        a.as_bool().cmp(&b.as_bool())
    }
}

/// Lookup table from `kind_id` to its [`ValueKind`]
#[derive(Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, Rc<dyn ValueKind>>,
}

impl KindRegistry {
    /// An empty registry; most callers want [`KindRegistry::with_builtins`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `text`, `number` and `boolean`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(TextKind::default());
        registry.register(NumberKind);
        registry.register(BooleanKind);
        registry
    }

    /// Add or replace a kind under its own id
    pub fn register(&mut self, kind: impl ValueKind + 'static) {
        self.kinds.insert(kind.id().to_string(), Rc::new(kind));
    }

    pub fn get(&self, kind_id: &str) -> Option<Rc<dyn ValueKind>> {
        self.kinds.get(kind_id).cloned()
    }

    pub fn contains(&self, kind_id: &str) -> bool {
        self.kinds.contains_key(kind_id)
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.kinds.keys().collect();
        ids.sort();
        f.debug_struct("KindRegistry").field("kinds", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_filter_uses_regex_search() {
        let text = TextKind::default();
        let params = json!({"match": ".*Foo.*"});
        assert!(text.filter(&json!("MyFoo"), &params).unwrap());
        assert!(!text.filter(&json!("Bar"), &params).unwrap());
        assert!(!text.filter(&JsonValue::Null, &params).unwrap());
    }

    #[test]
    fn test_text_filter_reports_bad_pattern() {
        let text = TextKind::default();
        assert!(text.filter(&json!("x"), &json!({"match": "("})).is_err());
    }

    #[test]
    fn test_pattern_cache_evicts_oldest() {
        let text = TextKind::default();
        for n in 0..=PATTERN_CACHE_SIZE {
            let params = json!({ "match": format!("^item{n}$") });
            assert!(text.filter(&json!(format!("item{n}")), &params).unwrap());
        }

        let cache = text.patterns.borrow();
        assert_eq!(cache.compiled.len(), PATTERN_CACHE_SIZE);
        assert!(!cache.compiled.contains_key("^item0$"));
        assert!(cache.compiled.contains_key(&format!("^item{PATTERN_CACHE_SIZE}$")));
        drop(cache);

        // an evicted pattern compiles again on its next use
        assert!(text.filter(&json!("item0"), &json!({"match": "^item0$"})).unwrap());
        assert_eq!(text.patterns.borrow().compiled.len(), PATTERN_CACHE_SIZE);
    }

    #[test]
    fn test_text_process_trims() {
        let text = TextKind::default();
        assert_eq!(text.process(json!("  hi "), &JsonValue::Null), json!("hi"));
    }

    #[test]
    fn test_text_max_length() {
        let text = TextKind::default();
        let props = json!({"max_length": 3});
        assert!(text.validate(&json!("abc"), &props).is_ok());
        assert!(text.validate(&json!("abcd"), &props).is_err());
        assert!(text.validate(&json!(5), &JsonValue::Null).is_err());
    }

    #[test]
    fn test_number_bounds_are_inclusive() {
        let number = NumberKind;
        let params = json!({"min": 1, "max": 3});
        assert!(number.filter(&json!(1), &params).unwrap());
        assert!(number.filter(&json!(3.0), &params).unwrap());
        assert!(!number.filter(&json!(4), &params).unwrap());
        assert!(number.filter(&json!(100), &json!({})).unwrap());
    }

    #[test]
    fn test_number_compare() {
        let number = NumberKind;
        assert_eq!(number.compare(&json!(2), &json!(10)), Ordering::Less);
    }

    #[test]
    fn test_boolean_equals() {
        let boolean = BooleanKind;
        assert!(boolean.filter(&json!(true), &json!({"equals": true})).unwrap());
        assert!(!boolean.filter(&json!(false), &json!({"equals": true})).unwrap());
        assert_eq!(boolean.compare(&json!(false), &json!(true)), Ordering::Less);
    }

    #[test]
    fn test_registry_builtins() {
        let registry = KindRegistry::with_builtins();
        for id in ["text", "number", "boolean"] {
            assert!(registry.contains(id), "missing {id}");
        }
        assert!(registry.get("colour").is_none());
    }
}
