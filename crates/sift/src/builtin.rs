//! The standard function library.
//!
//! Registered into every configuration unless the host already bound
//! the name (user functions win) or disabled it.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use sift_core::Kind;
use sift_lang::Config;
use sift_vm::{Function, RuntimeError, Value};

/// Register the standard library into a configuration.
pub fn register_standard(config: &mut Config) {
    for function in standard_functions() {
        if !config.functions.contains_key(function.name()) {
            config.functions.insert(
                function.name().to_string(),
                std::sync::Arc::new(function),
            );
        }
    }
}

fn bad_argument(name: &str, v: &Value) -> RuntimeError {
    RuntimeError::new(format!("invalid argument for {} (got {})", name, v.kind()))
}

fn numeric_kind(args: &[Kind], name: &str) -> Result<Kind, String> {
    if args.len() != 1 {
        return Err(format!("{} expects one argument", name));
    }
    match args[0] {
        Kind::Int | Kind::Uint => Ok(Kind::Int),
        Kind::Float => Ok(Kind::Float),
        Kind::Any | Kind::Unknown => Ok(Kind::Any),
        other => Err(format!("invalid argument for {} (got {})", name, other)),
    }
}

/// Flatten numeric arguments (scalars and arrays, recursively).
fn collect_numbers(name: &str, args: &[Value], out: &mut Vec<Value>) -> Result<(), RuntimeError> {
    for arg in args {
        match arg {
            Value::Int(_) | Value::Float(_) => out.push(arg.clone()),
            Value::Array(items) => collect_numbers(name, items, out)?,
            other => return Err(bad_argument(name, other)),
        }
    }
    Ok(())
}

fn standard_functions() -> Vec<Function> {
    vec![
        Function::new("len")
            .signature(&[Kind::String], Kind::Int)
            .signature(&[Kind::Array], Kind::Int)
            .signature(&[Kind::Map], Kind::Int)
            .signature(&[Kind::Any], Kind::Int)
            .callable(|args| sift_vm::runtime::len(&args[0])),
        Function::new("type")
            .signature(&[Kind::Any], Kind::String)
            .fast(|v| Value::string(v.kind().as_str())),
        Function::new("abs")
            .validator(|args| numeric_kind(args, "abs"))
            .callable(|args| match &args[0] {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| RuntimeError::new("integer overflow")),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(bad_argument("abs", other)),
            }),
        Function::new("ceil")
            .validator(|args| numeric_kind(args, "ceil").map(|_| Kind::Float))
            .callable(|args| match &args[0] {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(f.ceil())),
                other => Err(bad_argument("ceil", other)),
            }),
        Function::new("floor")
            .validator(|args| numeric_kind(args, "floor").map(|_| Kind::Float))
            .callable(|args| match &args[0] {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(f.floor())),
                other => Err(bad_argument("floor", other)),
            }),
        Function::new("round")
            .validator(|args| numeric_kind(args, "round").map(|_| Kind::Float))
            .callable(|args| match &args[0] {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(f.round())),
                other => Err(bad_argument("round", other)),
            }),
        Function::new("int")
            .signature(&[Kind::Any], Kind::Int)
            .callable(|args| match &args[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(*f as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| RuntimeError::new(format!("invalid operation: int({})", s))),
                other => Err(RuntimeError::new(format!(
                    "invalid operation: int({})",
                    other.kind()
                ))),
            }),
        Function::new("float")
            .signature(&[Kind::Any], Kind::Float)
            .callable(|args| match &args[0] {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| RuntimeError::new(format!("invalid operation: float({})", s))),
                other => Err(RuntimeError::new(format!(
                    "invalid operation: float({})",
                    other.kind()
                ))),
            }),
        Function::new("string")
            .signature(&[Kind::Any], Kind::String)
            .fast(|v| Value::string(v.to_string())),
        Function::new("trim")
            .signature(&[Kind::String], Kind::String)
            .signature(&[Kind::String, Kind::String], Kind::String)
            .callable(|args| {
                let s = args[0]
                    .as_str()
                    .ok_or_else(|| bad_argument("trim", &args[0]))?;
                match args.get(1) {
                    None => Ok(Value::string(s.trim())),
                    Some(cutset) => {
                        let cutset = cutset
                            .as_str()
                            .ok_or_else(|| bad_argument("trim", &args[1]))?;
                        let set: Vec<char> = cutset.chars().collect();
                        Ok(Value::string(s.trim_matches(|c| set.contains(&c))))
                    }
                }
            }),
        Function::new("upper")
            .signature(&[Kind::String], Kind::String)
            .fast(|v| match v.as_str() {
                Some(s) => Value::string(s.to_uppercase()),
                None => Value::Nil,
            }),
        Function::new("lower")
            .signature(&[Kind::String], Kind::String)
            .fast(|v| match v.as_str() {
                Some(s) => Value::string(s.to_lowercase()),
                None => Value::Nil,
            }),
        Function::new("split")
            .signature(&[Kind::String, Kind::String], Kind::Array)
            .safe(|args| {
                let s = args[0]
                    .as_str()
                    .ok_or_else(|| bad_argument("split", &args[0]))?;
                let sep = args[1]
                    .as_str()
                    .ok_or_else(|| bad_argument("split", &args[1]))?;
                let parts: Vec<Value> = if sep.is_empty() {
                    s.chars().map(|c| Value::string(c.to_string())).collect()
                } else {
                    s.split(sep).map(Value::string).collect()
                };
                let cost = parts.len() as u64;
                Ok((Value::array(parts), cost))
            }),
        Function::new("join")
            .signature(&[Kind::Array], Kind::String)
            .signature(&[Kind::Array, Kind::String], Kind::String)
            .callable(|args| {
                let items = args[0]
                    .as_array()
                    .ok_or_else(|| bad_argument("join", &args[0]))?;
                let sep = match args.get(1) {
                    None => "",
                    Some(v) => v.as_str().ok_or_else(|| bad_argument("join", v))?,
                };
                let mut out = String::new();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(sep);
                    }
                    match item.as_str() {
                        Some(s) => out.push_str(s),
                        None => return Err(bad_argument("join", item)),
                    }
                }
                Ok(Value::string(out))
            }),
        Function::new("replace")
            .signature(&[Kind::String, Kind::String, Kind::String], Kind::String)
            .callable(|args| {
                let s = args[0]
                    .as_str()
                    .ok_or_else(|| bad_argument("replace", &args[0]))?;
                let from = args[1]
                    .as_str()
                    .ok_or_else(|| bad_argument("replace", &args[1]))?;
                let to = args[2]
                    .as_str()
                    .ok_or_else(|| bad_argument("replace", &args[2]))?;
                Ok(Value::string(s.replace(from, to)))
            }),
        Function::new("indexOf")
            .signature(&[Kind::String, Kind::String], Kind::Int)
            .callable(|args| {
                let s = args[0]
                    .as_str()
                    .ok_or_else(|| bad_argument("indexOf", &args[0]))?;
                let needle = args[1]
                    .as_str()
                    .ok_or_else(|| bad_argument("indexOf", &args[1]))?;
                match s.find(needle) {
                    Some(byte_index) => {
                        let char_index = s[..byte_index].chars().count() as i64;
                        Ok(Value::Int(char_index))
                    }
                    None => Ok(Value::Int(-1)),
                }
            }),
        Function::new("min")
            .variadic_signature(&[Kind::Any], Kind::Any)
            .callable(|args| pick("min", args, std::cmp::Ordering::Less)),
        Function::new("max")
            .variadic_signature(&[Kind::Any], Kind::Any)
            .callable(|args| pick("max", args, std::cmp::Ordering::Greater)),
        Function::new("mean")
            .variadic_signature(&[Kind::Any], Kind::Float)
            .callable(|args| {
                let mut numbers = Vec::new();
                collect_numbers("mean", args, &mut numbers)?;
                if numbers.is_empty() {
                    return Ok(Value::Float(0.0));
                }
                let total: f64 = numbers.iter().filter_map(|v| v.as_float()).sum();
                Ok(Value::Float(total / numbers.len() as f64))
            }),
        Function::new("first")
            .signature(&[Kind::Array], Kind::Any)
            .callable(|args| {
                let items = args[0]
                    .as_array()
                    .ok_or_else(|| bad_argument("first", &args[0]))?;
                Ok(items.first().cloned().unwrap_or(Value::Nil))
            }),
        Function::new("last")
            .signature(&[Kind::Array], Kind::Any)
            .callable(|args| {
                let items = args[0]
                    .as_array()
                    .ok_or_else(|| bad_argument("last", &args[0]))?;
                Ok(items.last().cloned().unwrap_or(Value::Nil))
            }),
        Function::new("keys")
            .signature(&[Kind::Map], Kind::Array)
            .callable(|args| {
                let entries = args[0]
                    .as_map()
                    .ok_or_else(|| bad_argument("keys", &args[0]))?;
                Ok(Value::array(
                    entries.keys().map(|k| Value::string(k.as_str())).collect(),
                ))
            }),
        Function::new("values")
            .signature(&[Kind::Map], Kind::Array)
            .callable(|args| {
                let entries = args[0]
                    .as_map()
                    .ok_or_else(|| bad_argument("values", &args[0]))?;
                Ok(Value::array(entries.values().cloned().collect()))
            }),
        // Like member access, but yields nil instead of erroring on a
        // missing key or out-of-range index.
        Function::new("get")
            .signature(&[Kind::Any, Kind::Any], Kind::Any)
            .callable(|args| {
                if args[0].is_nil() {
                    return Ok(Value::Nil);
                }
                Ok(sift_vm::runtime::fetch(&args[0], &args[1]).unwrap_or(Value::Nil))
            }),
        Function::new("flatten")
            .variadic_signature(&[Kind::Any], Kind::Array)
            .safe(|args| {
                fn flatten_into(v: &Value, out: &mut Vec<Value>) {
                    match v {
                        Value::Array(items) => {
                            for item in items.iter() {
                                flatten_into(item, out);
                            }
                        }
                        other => out.push(other.clone()),
                    }
                }
                let mut out = Vec::new();
                for arg in args {
                    flatten_into(arg, &mut out);
                }
                let cost = out.len() as u64;
                Ok((Value::array(out), cost))
            }),
        Function::new("now")
            .signature(&[], Kind::Time)
            .callable(|_| Ok(Value::Time(Utc::now()))),
        Function::new("duration")
            .signature(&[Kind::String], Kind::Duration)
            .callable(|args| {
                let s = args[0]
                    .as_str()
                    .ok_or_else(|| bad_argument("duration", &args[0]))?;
                parse_duration(s).map(Value::Duration)
            }),
        Function::new("date")
            .signature(&[Kind::String], Kind::Time)
            .callable(|args| {
                let s = args[0]
                    .as_str()
                    .ok_or_else(|| bad_argument("date", &args[0]))?;
                parse_date(s).map(Value::Time)
            }),
    ]
}

fn pick(name: &str, args: &[Value], wanted: std::cmp::Ordering) -> Result<Value, RuntimeError> {
    let mut numbers = Vec::new();
    collect_numbers(name, args, &mut numbers)?;
    let mut best: Option<Value> = None;
    for candidate in numbers {
        best = Some(match best {
            None => candidate,
            Some(current) => {
                if sift_vm::runtime::compare(&candidate, &current)? == wanted {
                    candidate
                } else {
                    current
                }
            }
        });
    }
    best.ok_or_else(|| RuntimeError::new(format!("{} of no values", name)))
}

/// Parse `1h30m`, `2.5s`, `150ms`, `-10s` style durations.
fn parse_duration(s: &str) -> Result<TimeDelta, RuntimeError> {
    let err = || RuntimeError::new(format!("invalid duration {:?}", s));
    let mut rest = s.trim();
    if rest.is_empty() {
        return Err(err());
    }
    let negative = rest.starts_with('-');
    if negative || rest.starts_with('+') {
        rest = &rest[1..];
    }
    if rest == "0" {
        return Ok(TimeDelta::zero());
    }

    let mut total_ns: i64 = 0;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        if digits_end == 0 {
            return Err(err());
        }
        let number: f64 = rest[..digits_end].parse().map_err(|_| err())?;
        rest = &rest[digits_end..];

        let (unit_ns, unit_len) = if rest.starts_with("ns") {
            (1.0, 2)
        } else if rest.starts_with("µs") {
            (1e3, "µs".len())
        } else if rest.starts_with("us") {
            (1e3, 2)
        } else if rest.starts_with("ms") {
            (1e6, 2)
        } else if rest.starts_with('s') {
            (1e9, 1)
        } else if rest.starts_with('m') {
            (60e9, 1)
        } else if rest.starts_with('h') {
            (3600e9, 1)
        } else {
            return Err(err());
        };
        rest = &rest[unit_len..];
        total_ns = total_ns
            .checked_add((number * unit_ns) as i64)
            .ok_or_else(err)?;
    }

    if negative {
        total_ns = -total_ns;
    }
    Ok(TimeDelta::nanoseconds(total_ns))
}

/// Parse RFC 3339 timestamps, `2024-05-01 12:30:00` and plain dates.
fn parse_date(s: &str) -> Result<DateTime<Utc>, RuntimeError> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&t));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&t));
        }
    }
    Err(RuntimeError::new(format!("invalid date {:?}", s)))
}

/// A ready-made environment map builder for tests and examples.
pub fn env(entries: Vec<(&str, Value)>) -> Value {
    let map: BTreeMap<String, Value> = entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    Value::map(map)
}
