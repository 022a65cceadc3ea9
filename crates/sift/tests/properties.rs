//! Cross-cutting guarantees of the pipeline: span soundness, bytecode
//! parity, jump closure, determinism and the rewrite laws.

use sift::{compile, eval, run, Config, Value};

fn program(src: &str) -> sift::Program {
    compile(src, Config::new()).unwrap_or_else(|e| panic!("compile failed for '{}': {}", src, e))
}

const SAMPLES: &[&str] = &[
    "1 + 2 * 3",
    "let x = 10; x * x + x",
    "filter(1..20, # % 3 == 0) | map(# * 2) | sum()",
    "'a' + 'b' contains 'ab' ? upper('yes') : 'no'",
    "reduce(1..5, #acc + #, 0) in 1..100",
    "sortBy(map(1..5, 6 - #), #)",
    "{a: [1, 2], b: 'x'}.a[-1]",
];

#[test]
fn bytecode_parity() {
    for src in SAMPLES {
        let p = program(src);
        assert_eq!(p.opcodes().len(), p.arguments().len(), "{}", src);
        assert_eq!(p.opcodes().len(), p.locations().len(), "{}", src);
    }
}

#[test]
fn jump_closure() {
    for src in SAMPLES {
        let p = program(src);
        for (i, op) in p.opcodes().iter().enumerate() {
            let arg = p.arguments()[i];
            if op.is_forward_jump() {
                let target = i as i64 + arg + 1;
                assert!(
                    target >= 0 && target <= p.len() as i64,
                    "{}: jump at {} lands at {}",
                    src,
                    i,
                    target
                );
            }
            if matches!(op, sift_vm::Opcode::JumpBackward) {
                let target = i as i64 + 1 - arg;
                assert!(target >= 0, "{}: backward jump at {} lands at {}", src, i, target);
            }
        }
    }
}

#[test]
fn instruction_spans_are_sound() {
    for src in SAMPLES {
        let p = program(src);
        let len = p.source().len() as u32;
        for span in p.locations() {
            assert!(span.from().offset() <= span.to().offset(), "{}", src);
            assert!(span.to().offset() <= len, "{}", src);
        }
    }
}

#[test]
fn deterministic_evaluation() {
    for src in SAMPLES {
        let p = program(src);
        let first = run(&p, &Value::Nil).unwrap();
        for _ in 0..3 {
            assert_eq!(run(&p, &Value::Nil).unwrap(), first, "{}", src);
        }
    }
}

#[test]
fn chained_comparison_law() {
    let triples: &[(&str, &str, &str)] = &[("1", "2", "3"), ("2", "2", "1"), ("3", "1", "2")];
    let ops = ["<", "<=", ">", ">=", "==", "!="];
    for (a, b, c) in triples {
        for op1 in ops {
            for op2 in ops {
                let chained = format!("{} {} {} {} {}", a, op1, b, op2, c);
                let split = format!("({} {} {}) && ({} {} {})", a, op1, b, b, op2, c);
                assert_eq!(
                    eval(&chained, &Value::Nil).unwrap(),
                    eval(&split, &Value::Nil).unwrap(),
                    "{} vs {}",
                    chained,
                    split
                );
            }
        }
    }
}

#[test]
fn chain_short_circuit_law() {
    // With a nil head, nothing after the `?.` is evaluated: the member
    // accesses on the way would otherwise fail on the int fields.
    let result = eval("let m = {a: nil}; m.a?.b.c", &Value::Nil).unwrap();
    assert_eq!(result, Value::Nil);
}

#[test]
fn sum_fold_law() {
    // The sum-of-literal-array fold and the loop compute the same value.
    assert_eq!(
        eval("sum([1, 2, 3, 4])", &Value::Nil).unwrap(),
        eval("sum(1..4)", &Value::Nil).unwrap(),
    );
}

#[test]
fn range_membership_law() {
    for x in ["0", "1", "3", "5", "6"] {
        let rewritten = format!("let x = {}; x in 1..5", x);
        let manual = format!("let x = {}; x >= 1 && x <= 5", x);
        assert_eq!(
            eval(&rewritten, &Value::Nil).unwrap(),
            eval(&manual, &Value::Nil).unwrap(),
            "{}",
            x
        );
    }
}

#[test]
fn programs_are_shareable_across_threads() {
    let p = std::sync::Arc::new(program("sum(map(1..100, # * #))"));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let p = p.clone();
        handles.push(std::thread::spawn(move || run(&p, &Value::Nil).unwrap()));
    }
    let expected = run(&p, &Value::Nil).unwrap();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
