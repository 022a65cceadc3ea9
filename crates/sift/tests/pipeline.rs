//! End-to-end evaluation tests.
//!
//! These drive the complete source → tokens → tree → bytecode → value
//! path through the public API.

use sift::builtin::env;
use sift::{compile, eval, run, Config, EnvSchema, Expect, Nature, Value};

/// Helper to evaluate with the default configuration and empty env.
fn v(src: &str) -> Value {
    eval(src, &Value::Nil).unwrap_or_else(|e| panic!("eval failed for '{}': {}", src, e))
}

fn v_env(src: &str, environment: &Value, config: Config) -> Value {
    let program =
        compile(src, config).unwrap_or_else(|e| panic!("compile failed for '{}': {}", src, e));
    run(&program, environment).unwrap_or_else(|e| panic!("run failed for '{}': {}", src, e))
}

fn users_env() -> (Value, Config) {
    let user = Nature::map_of(
        sift_lang_fields(vec![("age", Nature::int()), ("name", Nature::string())]),
        true,
    );
    let config = Config::new()
        .with_env(EnvSchema::map().declare("users", Nature::array_of(user)));
    let users = Value::array(vec![
        env(vec![("name", Value::string("b")), ("age", Value::Int(20))]),
        env(vec![("name", Value::string("a")), ("age", Value::Int(17))]),
        env(vec![("name", Value::string("c")), ("age", Value::Int(30))]),
    ]);
    (env(vec![("users", users)]), config)
}

fn sift_lang_fields(
    entries: Vec<(&str, Nature)>,
) -> std::collections::BTreeMap<String, sift_lang::nature::Field> {
    sift_lang::nature::fields_of(entries)
}

#[test]
fn arithmetic() {
    assert_eq!(v("1 + 2 * 3"), Value::Int(7));
    assert_eq!(v("10 / 4"), Value::Float(2.5));
    assert_eq!(v("2 ** 8"), Value::Float(256.0));
    assert_eq!(v("10 % 3"), Value::Int(1));
}

#[test]
fn let_bindings() {
    assert_eq!(v("let x = 10; x * x + x"), Value::Int(110));
}

#[test]
fn filter_map_sort_pipeline() {
    let (environment, config) = users_env();
    assert_eq!(
        v_env(
            "users | filter(.age >= 18) | map(.name) | sortBy(#)",
            &environment,
            config,
        ),
        Value::array(vec![Value::string("b"), Value::string("c")])
    );
}

#[test]
fn optional_chain_with_coalesce() {
    let user = Nature::map_of(
        sift_lang_fields(vec![(
            "profile",
            Nature::map_of(sift_lang_fields(vec![("email", Nature::string())]), true),
        )]),
        true,
    );
    let config = Config::new().with_env(EnvSchema::map().declare("user", user));
    let environment = env(vec![("user", env(vec![("profile", Value::Nil)]))]);
    assert_eq!(
        v_env("user?.profile?.email ?? 'anon'", &environment, config),
        Value::string("anon")
    );
}

#[test]
fn range_and_matches() {
    assert_eq!(v("1 in 1..5 and 'ab' matches '^a'"), Value::Bool(true));
}

#[test]
fn reduce_with_seed() {
    assert_eq!(v("reduce(1..4, #acc + #, 0)"), Value::Int(10));
}

#[test]
fn higher_order_combinations() {
    assert_eq!(v("all(1..5, # > 0) and none(1..5, # > 5)"), Value::Bool(true));
    assert_eq!(v("one(1..5, # == 3)"), Value::Bool(true));
    assert_eq!(v("count(1..10, # % 3 == 0)"), Value::Int(3));
    assert_eq!(v("sum(map(1..4, # * #))"), Value::Int(30));
    assert_eq!(v("findLastIndex(1..9, # < 5)"), Value::Int(3));
    assert_eq!(
        v("groupBy(1..4, # % 2 == 0 ? 'even' : 'odd')"),
        env(vec![
            ("even", Value::array(vec![Value::Int(2), Value::Int(4)])),
            ("odd", Value::array(vec![Value::Int(1), Value::Int(3)])),
        ])
    );
}

#[test]
fn strings() {
    assert_eq!(v("upper('abc') + lower('DEF')"), Value::string("ABCdef"));
    assert_eq!(v("split('a,b', ',')[1]"), Value::string("b"));
    assert_eq!(v("len('héllo')"), Value::Int(5));
    assert_eq!(v("'hello world'[0:5]"), Value::string("hello"));
    assert_eq!(v("trim('  x  ')"), Value::string("x"));
}

#[test]
fn time_arithmetic() {
    assert_eq!(
        v("date('2024-05-02') - date('2024-05-01') == duration('24h')"),
        Value::Bool(true)
    );
    assert_eq!(
        v("date('2024-05-01') + duration('36h') > date('2024-05-02')"),
        Value::Bool(true)
    );
    assert_eq!(v("duration('1h') * 2 == duration('2h')"), Value::Bool(true));
}

#[test]
fn conditionals_and_sequences() {
    assert_eq!(v("if 2 > 1 { 'a' } else { 'b' }"), Value::string("a"));
    assert_eq!(v("nil ?? false ?: 'fallback'"), Value::string("fallback"));
    assert_eq!(v("1; 2; 3"), Value::Int(3));
}

#[test]
fn collections() {
    assert_eq!(v("{a: 1, b: 2}.a + [10, 20][1]"), Value::Int(21));
    assert_eq!(v("keys({x: 1, y: 2})"), Value::array(vec![
        Value::string("x"),
        Value::string("y"),
    ]));
    assert_eq!(v("[1, [2, [3]]] | flatten()"), v("[1, 2, 3]"));
}

#[test]
fn expected_result_kind() {
    let program = compile("1 + 2", Config::new().expect(Expect::Float64)).unwrap();
    assert_eq!(run(&program, &Value::Nil).unwrap(), Value::Float(3.0));

    let err = compile("1 + 2", Config::new().expect(Expect::Bool)).unwrap_err();
    assert!(err.to_string().contains("expected bool"));
}

#[test]
fn disabled_builtins_are_hidden() {
    let err = compile("upper('a')", Config::new().disable("upper")).unwrap_err();
    assert!(err.to_string().contains("unknown name"));
}

#[test]
fn operator_overloading_end_to_end() {
    let config = Config::new()
        .with_function(
            sift::Function::new("mul_str")
                .signature(&[sift::Kind::String, sift::Kind::Int], sift::Kind::String)
                .callable(|args| {
                    let s = args[0].as_str().unwrap_or("");
                    let n = args[1].as_int().unwrap_or(0).max(0) as usize;
                    Ok(Value::string(s.repeat(n)))
                }),
        )
        .overload_operator("*", &["mul_str"]);
    let program = compile("'ab' * 3", config).unwrap();
    assert_eq!(run(&program, &Value::Nil).unwrap(), Value::string("ababab"));
}

#[test]
fn environment_aliases() {
    let config = Config::new().with_env(EnvSchema::map().declare_aliased(
        "user_name",
        "username",
        Nature::string(),
    ));
    let environment = env(vec![("user_name", Value::string("ada"))]);
    assert_eq!(
        v_env("username + '!'", &environment, config),
        Value::string("ada!")
    );
}

#[test]
fn dollar_env() {
    let shape = || Config::new().with_env(EnvSchema::map().declare("x", Nature::int()));
    let environment = env(vec![("x", Value::Int(5))]);
    assert_eq!(v_env("$env.x + 1", &environment, shape()), Value::Int(6));
    assert_eq!(
        v_env("$env?.missing ?? 'none'", &environment, shape()),
        Value::string("none")
    );
}

#[test]
fn memory_budget_is_enforced() {
    let mut config = Config::new();
    config.memory_budget = 1_000;
    let err = compile("len(1..100000)", config)
        .and_then(|p| run(&p, &Value::Nil))
        .unwrap_err();
    assert!(err.to_string().contains("memory budget exceeded"));
}

#[test]
fn node_limit_is_enforced() {
    let mut config = Config::new();
    config.max_nodes = 8;
    let err = compile("1 + 2 + 3 + 4 + 5 + 6", config).unwrap_err();
    assert!(err.to_string().contains("maximum allowed nodes"));
}

#[test]
fn negative_indices() {
    assert_eq!(v("[1, 2, 3][-1]"), Value::Int(3));
    assert_eq!(v("'abc'[-2]"), Value::string("b"));
    assert_eq!(v("get([1, 2, 3], 99) ?? -1"), Value::Int(-1));
}

#[test]
fn pipes_compose() {
    assert_eq!(
        v("1..10 | filter(# % 2 == 0) | map(# * #) | sum()"),
        Value::Int(220)
    );
}
