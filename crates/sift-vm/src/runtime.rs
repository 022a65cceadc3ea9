//! Value-level operation helpers shared by the machine and builtins.
//!
//! Every helper returns an unpositioned error; the machine binds the
//! span of the raising instruction before surfacing it.

use std::cmp::Ordering;

use crate::error::RuntimeError;
use crate::program::FieldPath;
use crate::value::Value;

fn invalid_binary(op: &str, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::new(format!(
        "invalid operation: {} {} {}",
        a.kind(),
        op,
        b.kind()
    ))
}

pub fn add(a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_add(y)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::new("integer overflow")),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(x as f64 + y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x + y as f64)),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
        (Value::String(x), Value::String(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(&x);
            s.push_str(&y);
            Ok(Value::string(s))
        }
        (Value::Time(t), Value::Duration(d)) | (Value::Duration(d), Value::Time(t)) => t
            .checked_add_signed(d)
            .map(Value::Time)
            .ok_or_else(|| RuntimeError::new("time overflow")),
        (Value::Duration(x), Value::Duration(y)) => x
            .checked_add(&y)
            .map(Value::Duration)
            .ok_or_else(|| RuntimeError::new("duration overflow")),
        (a, b) => Err(invalid_binary("+", &a, &b)),
    }
}

pub fn subtract(a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_sub(y)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::new("integer overflow")),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(x as f64 - y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x - y as f64)),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x - y)),
        (Value::Time(x), Value::Time(y)) => Ok(Value::Duration(x.signed_duration_since(y))),
        (Value::Time(t), Value::Duration(d)) => t
            .checked_sub_signed(d)
            .map(Value::Time)
            .ok_or_else(|| RuntimeError::new("time overflow")),
        (Value::Duration(x), Value::Duration(y)) => x
            .checked_sub(&y)
            .map(Value::Duration)
            .ok_or_else(|| RuntimeError::new("duration overflow")),
        (a, b) => Err(invalid_binary("-", &a, &b)),
    }
}

pub fn multiply(a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_mul(y)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::new("integer overflow")),
        (Value::Int(x), Value::Float(y)) => Ok(Value::Float(x as f64 * y)),
        (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x * y as f64)),
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x * y)),
        (Value::Duration(d), Value::Int(n)) | (Value::Int(n), Value::Duration(d)) => d
            .num_nanoseconds()
            .and_then(|ns| ns.checked_mul(n))
            .map(|ns| Value::Duration(chrono::TimeDelta::nanoseconds(ns)))
            .ok_or_else(|| RuntimeError::new("duration overflow")),
        (Value::Duration(d), Value::Float(n)) | (Value::Float(n), Value::Duration(d)) => d
            .num_nanoseconds()
            .map(|ns| Value::Duration(chrono::TimeDelta::nanoseconds((ns as f64 * n) as i64)))
            .ok_or_else(|| RuntimeError::new("duration overflow")),
        (a, b) => Err(invalid_binary("*", &a, &b)),
    }
}

/// Division always yields a float for numeric operands.
pub fn divide(a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Duration(d), Value::Int(n)) => {
            if n == 0 {
                return Err(RuntimeError::new("division by zero"));
            }
            let ns = d
                .num_nanoseconds()
                .ok_or_else(|| RuntimeError::new("duration overflow"))?;
            Ok(Value::Duration(chrono::TimeDelta::nanoseconds(ns / n)))
        }
        (a, b) => {
            let x = to_float(&a).map_err(|_| invalid_binary("/", &a, &b))?;
            let y = to_float(&b).map_err(|_| invalid_binary("/", &a, &b))?;
            if y == 0.0 {
                return Err(RuntimeError::new("division by zero"));
            }
            Ok(Value::Float(x / y))
        }
    }
}

pub fn modulo(a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if y == 0 {
                return Err(RuntimeError::new("division by zero"));
            }
            x.checked_rem(y)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::new("integer overflow"))
        }
        (a, b) => Err(invalid_binary("%", &a, &b)),
    }
}

pub fn exponent(a: Value, b: Value) -> Result<Value, RuntimeError> {
    let x = to_float(&a).map_err(|_| invalid_binary("**", &a, &b))?;
    let y = to_float(&b).map_err(|_| invalid_binary("**", &a, &b))?;
    Ok(Value::Float(x.powf(y)))
}

pub fn negate(a: Value) -> Result<Value, RuntimeError> {
    match a {
        Value::Int(x) => x
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::new("integer overflow")),
        Value::Float(x) => Ok(Value::Float(-x)),
        Value::Duration(d) => Ok(Value::Duration(-d)),
        a => Err(RuntimeError::new(format!(
            "invalid operation: - {}",
            a.kind()
        ))),
    }
}

/// Ordering of two comparable values; numeric kinds compare across.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64)
            .partial_cmp(y)
            .ok_or_else(|| RuntimeError::new("values are not comparable")),
        (Value::Float(x), Value::Int(y)) => x
            .partial_cmp(&(*y as f64))
            .ok_or_else(|| RuntimeError::new("values are not comparable")),
        (Value::Float(x), Value::Float(y)) => x
            .partial_cmp(y)
            .ok_or_else(|| RuntimeError::new("values are not comparable")),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Time(x), Value::Time(y)) => Ok(x.cmp(y)),
        (Value::Duration(x), Value::Duration(y)) => Ok(x.cmp(y)),
        _ => Err(invalid_binary("<", a, b)),
    }
}

pub fn less(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(compare(a, b)? == Ordering::Less))
}

pub fn more(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(compare(a, b)? == Ordering::Greater))
}

pub fn less_or_equal(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(compare(a, b)? != Ordering::Greater))
}

pub fn more_or_equal(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(compare(a, b)? != Ordering::Less))
}

/// Membership: element of an array, or key of a map.
pub fn in_op(needle: &Value, haystack: &Value) -> Result<Value, RuntimeError> {
    match haystack {
        Value::Nil => Ok(Value::Bool(false)),
        Value::Array(items) => Ok(Value::Bool(items.iter().any(|v| v == needle))),
        Value::Map(entries) => match needle {
            Value::String(key) => Ok(Value::Bool(entries.contains_key(key.as_ref()))),
            _ => Ok(Value::Bool(false)),
        },
        other => Err(RuntimeError::new(format!(
            "operator \"in\" not defined on {}",
            other.kind()
        ))),
    }
}

/// Member access: `base[key]`.
///
/// Array and string indices may be negative to address from the end; a
/// missing map key yields nil.
pub fn fetch(base: &Value, key: &Value) -> Result<Value, RuntimeError> {
    match base {
        Value::Array(items) => {
            let mut index = to_int(key)?;
            let len = items.len();
            if index < 0 {
                index += len as i64;
            }
            if index < 0 || index as usize >= len {
                return Err(RuntimeError::index_out_of_range(to_int(key)?, len));
            }
            Ok(items[index as usize].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let mut index = to_int(key)?;
            if index < 0 {
                index += chars.len() as i64;
            }
            if index < 0 || index as usize >= chars.len() {
                return Err(RuntimeError::index_out_of_range(to_int(key)?, chars.len()));
            }
            Ok(Value::string(chars[index as usize].to_string()))
        }
        Value::Map(entries) => match key {
            Value::String(name) => Ok(entries.get(name.as_ref()).cloned().unwrap_or(Value::Nil)),
            other => Err(RuntimeError::new(format!(
                "cannot fetch {} key from map",
                other.kind()
            ))),
        },
        other => Err(RuntimeError::new(format!(
            "cannot fetch {} from {}",
            key,
            other.kind()
        ))),
    }
}

/// Resolve a folded static member chain against nested maps.
pub fn fetch_field(base: &Value, field: &FieldPath) -> Result<Value, RuntimeError> {
    let mut current = base.clone();
    for (depth, name) in field.path.iter().enumerate() {
        match &current {
            Value::Map(entries) => {
                current = entries.get(name).cloned().unwrap_or(Value::Nil);
            }
            Value::Nil => {
                let parent = if depth == 0 {
                    "the environment".to_string()
                } else {
                    field.path[depth - 1].clone()
                };
                return Err(RuntimeError::new(format!(
                    "cannot get {} from {} (nil)",
                    name, parent
                )));
            }
            other => {
                return Err(RuntimeError::new(format!(
                    "cannot get {} from {}",
                    name,
                    other.kind()
                )))
            }
        }
    }
    Ok(current)
}

/// Clamped slice `base[from:to]` over arrays and strings.
pub fn slice(base: &Value, from: &Value, to: &Value) -> Result<Value, RuntimeError> {
    match base {
        Value::Array(items) => {
            let (a, b) = clamp_slice(to_int(from)?, to_int(to)?, items.len());
            Ok(Value::array(items[a..b].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (a, b) = clamp_slice(to_int(from)?, to_int(to)?, chars.len());
            Ok(Value::string(chars[a..b].iter().collect::<String>()))
        }
        other => Err(RuntimeError::new(format!(
            "cannot slice {}",
            other.kind()
        ))),
    }
}

fn clamp_slice(from: i64, to: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let mut a = if from < 0 { len + from } else { from };
    let mut b = if to < 0 { len + to } else { to };
    a = a.clamp(0, len);
    b = b.clamp(0, len);
    if a > b {
        a = b;
    }
    (a as usize, b as usize)
}

/// Length of a string (in characters), array or map.
pub fn len(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Array(items) => Ok(Value::Int(items.len() as i64)),
        Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
        other => Err(RuntimeError::new(format!(
            "invalid argument for len (got {})",
            other.kind()
        ))),
    }
}

/// The inclusive integer range `[from, to]`; empty when `from > to`.
pub fn make_range(from: i64, to: i64) -> Vec<Value> {
    if from > to {
        return Vec::new();
    }
    (from..=to).map(Value::Int).collect()
}

pub fn contains(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    string_pair(a, b, "contains", |x, y| x.contains(y))
}

pub fn starts_with(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    string_pair(a, b, "startsWith", |x, y| x.starts_with(y))
}

pub fn ends_with(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    string_pair(a, b, "endsWith", |x, y| x.ends_with(y))
}

fn string_pair(
    a: &Value,
    b: &Value,
    op: &str,
    f: impl Fn(&str, &str) -> bool,
) -> Result<Value, RuntimeError> {
    if a.is_nil() || b.is_nil() {
        return Ok(Value::Bool(false));
    }
    match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) => Ok(Value::Bool(f(x, y))),
        _ => Err(invalid_binary(op, a, b)),
    }
}

/// Regex match with a runtime-compiled pattern; nil operands match nothing.
pub fn matches(subject: &Value, pattern: &Value) -> Result<Value, RuntimeError> {
    if subject.is_nil() || pattern.is_nil() {
        return Ok(Value::Bool(false));
    }
    match (subject.as_str(), pattern.as_str()) {
        (Some(s), Some(p)) => {
            let re = regex::Regex::new(p)
                .map_err(|e| RuntimeError::new(format!("invalid regexp: {}", e)))?;
            Ok(Value::Bool(re.is_match(s)))
        }
        _ => Err(invalid_binary("matches", subject, pattern)),
    }
}

pub fn to_int(v: &Value) -> Result<i64, RuntimeError> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Float(f) => Ok(*f as i64),
        other => Err(RuntimeError::new(format!(
            "invalid operation: int({})",
            other.kind()
        ))),
    }
}

pub fn to_float(v: &Value) -> Result<f64, RuntimeError> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(RuntimeError::new(format!(
            "invalid operation: float({})",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn add_numbers() {
        assert_eq!(add(Value::Int(1), Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(
            add(Value::Int(1), Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            add(Value::Float(1.5), Value::Float(2.5)).unwrap(),
            Value::Float(4.0)
        );
    }

    #[test]
    fn add_strings() {
        assert_eq!(
            add(Value::string("foo"), Value::string("bar")).unwrap(),
            Value::string("foobar")
        );
    }

    #[test]
    fn add_overflow_is_an_error() {
        assert!(add(Value::Int(i64::MAX), Value::Int(1)).is_err());
    }

    #[test]
    fn add_incompatible() {
        let err = add(Value::Int(1), Value::string("x")).unwrap_err();
        assert_eq!(err.to_string(), "invalid operation: int + string");
    }

    #[test]
    fn time_arithmetic() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let d = TimeDelta::hours(2);

        let later = add(Value::Time(t), Value::Duration(d)).unwrap();
        assert_eq!(later, Value::Time(t + d));

        let diff = subtract(later.clone(), Value::Time(t)).unwrap();
        assert_eq!(diff, Value::Duration(d));

        let back = subtract(later, Value::Duration(d)).unwrap();
        assert_eq!(back, Value::Time(t));
    }

    #[test]
    fn duration_scaling() {
        let d = TimeDelta::seconds(10);
        assert_eq!(
            multiply(Value::Duration(d), Value::Int(3)).unwrap(),
            Value::Duration(TimeDelta::seconds(30))
        );
        assert_eq!(
            divide(Value::Duration(d), Value::Int(2)).unwrap(),
            Value::Duration(TimeDelta::seconds(5))
        );
    }

    #[test]
    fn divide_always_floats() {
        assert_eq!(
            divide(Value::Int(5), Value::Int(2)).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(
            divide(Value::Int(4), Value::Int(2)).unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn division_by_zero() {
        assert!(divide(Value::Int(1), Value::Int(0)).is_err());
        assert!(modulo(Value::Int(1), Value::Int(0)).is_err());
    }

    #[test]
    fn modulo_integers_only() {
        assert_eq!(
            modulo(Value::Int(7), Value::Int(3)).unwrap(),
            Value::Int(1)
        );
        assert!(modulo(Value::Float(7.0), Value::Int(3)).is_err());
    }

    #[test]
    fn exponent_yields_float() {
        assert_eq!(
            exponent(Value::Int(2), Value::Int(10)).unwrap(),
            Value::Float(1024.0)
        );
    }

    #[test]
    fn negate_values() {
        assert_eq!(negate(Value::Int(5)).unwrap(), Value::Int(-5));
        assert_eq!(negate(Value::Float(1.5)).unwrap(), Value::Float(-1.5));
        assert!(negate(Value::string("x")).is_err());
    }

    #[test]
    fn comparisons() {
        assert_eq!(less(&Value::Int(1), &Value::Int(2)).unwrap(), Value::Bool(true));
        assert_eq!(
            less(&Value::Int(1), &Value::Float(0.5)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            more_or_equal(&Value::string("b"), &Value::string("a")).unwrap(),
            Value::Bool(true)
        );
        assert!(less(&Value::Bool(true), &Value::Bool(false)).is_err());
    }

    #[test]
    fn in_array_and_map() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(in_op(&Value::Int(2), &arr).unwrap(), Value::Bool(true));
        assert_eq!(in_op(&Value::Int(5), &arr).unwrap(), Value::Bool(false));

        let mut m = BTreeMap::new();
        m.insert("a".to_string(), Value::Int(1));
        let map = Value::map(m);
        assert_eq!(in_op(&Value::string("a"), &map).unwrap(), Value::Bool(true));
        assert_eq!(in_op(&Value::string("b"), &map).unwrap(), Value::Bool(false));

        assert_eq!(in_op(&Value::Int(1), &Value::Nil).unwrap(), Value::Bool(false));
        assert!(in_op(&Value::Int(1), &Value::Int(2)).is_err());
    }

    #[test]
    fn fetch_array_with_negative_index() {
        let arr = Value::array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        assert_eq!(fetch(&arr, &Value::Int(0)).unwrap(), Value::Int(10));
        assert_eq!(fetch(&arr, &Value::Int(-1)).unwrap(), Value::Int(30));
        assert!(fetch(&arr, &Value::Int(3)).is_err());
        assert!(fetch(&arr, &Value::Int(-4)).is_err());
    }

    #[test]
    fn fetch_map_missing_key_is_nil() {
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), Value::Int(1));
        let map = Value::map(m);
        assert_eq!(fetch(&map, &Value::string("a")).unwrap(), Value::Int(1));
        assert_eq!(fetch(&map, &Value::string("b")).unwrap(), Value::Nil);
    }

    #[test]
    fn fetch_string_char() {
        let s = Value::string("héllo");
        assert_eq!(fetch(&s, &Value::Int(1)).unwrap(), Value::string("é"));
        assert_eq!(fetch(&s, &Value::Int(-1)).unwrap(), Value::string("o"));
    }

    #[test]
    fn fetch_field_walks_nested_maps() {
        let mut inner = BTreeMap::new();
        inner.insert("city".to_string(), Value::string("Oslo"));
        let mut outer = BTreeMap::new();
        outer.insert("address".to_string(), Value::map(inner));
        let env = Value::map(outer);

        let field = FieldPath {
            index: vec![0, 0],
            path: vec!["address".to_string(), "city".to_string()],
        };
        assert_eq!(fetch_field(&env, &field).unwrap(), Value::string("Oslo"));
    }

    #[test]
    fn fetch_field_through_nil_errors() {
        let mut outer = BTreeMap::new();
        outer.insert("address".to_string(), Value::Nil);
        let env = Value::map(outer);

        let field = FieldPath {
            index: vec![0, 0],
            path: vec!["address".to_string(), "city".to_string()],
        };
        let err = fetch_field(&env, &field).unwrap_err();
        assert!(err.to_string().contains("cannot get city from address"));
    }

    #[test]
    fn slices_clamp() {
        let arr = Value::array(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Int(4),
        ]);
        assert_eq!(
            slice(&arr, &Value::Int(1), &Value::Int(3)).unwrap(),
            Value::array(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            slice(&arr, &Value::Int(-3), &Value::Int(-1)).unwrap(),
            Value::array(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            slice(&arr, &Value::Int(3), &Value::Int(1)).unwrap(),
            Value::array(vec![])
        );
        assert_eq!(
            slice(&arr, &Value::Int(0), &Value::Int(100)).unwrap(),
            arr
        );
    }

    #[test]
    fn slice_string() {
        let s = Value::string("hello");
        assert_eq!(
            slice(&s, &Value::Int(1), &Value::Int(4)).unwrap(),
            Value::string("ell")
        );
    }

    #[test]
    fn len_counts_chars() {
        assert_eq!(len(&Value::string("héllo")).unwrap(), Value::Int(5));
        assert_eq!(
            len(&Value::array(vec![Value::Int(1)])).unwrap(),
            Value::Int(1)
        );
        assert!(len(&Value::Int(1)).is_err());
    }

    #[test]
    fn ranges_are_inclusive() {
        assert_eq!(
            make_range(1, 3),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        assert_eq!(make_range(3, 3), vec![Value::Int(3)]);
        assert!(make_range(5, 2).is_empty());
    }

    #[test]
    fn string_predicates() {
        let s = Value::string("hello world");
        assert_eq!(
            contains(&s, &Value::string("lo w")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            starts_with(&s, &Value::string("hello")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            ends_with(&s, &Value::string("war")).unwrap(),
            Value::Bool(false)
        );
        // nil on either side is simply false
        assert_eq!(contains(&Value::Nil, &s).unwrap(), Value::Bool(false));
        assert_eq!(contains(&s, &Value::Nil).unwrap(), Value::Bool(false));
    }

    #[test]
    fn matches_regex() {
        assert_eq!(
            matches(&Value::string("abc"), &Value::string("^a")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            matches(&Value::Nil, &Value::string("^a")).unwrap(),
            Value::Bool(false)
        );
        assert!(matches(&Value::string("abc"), &Value::string("(")).is_err());
    }
}
