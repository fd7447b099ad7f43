//! Host service calls: codec round-trips, introspection, and piles.

mod common;

use common::{engine, func, Arg, Ins};
use ember_value::{Table, Value};

fn sample_table() -> Value {
    let mut table = Table::new();
    table.set("a", Value::Number(1.0));
    table.set("b", Value::string("x"));
    Value::Table(table)
}

#[test]
fn dump_load_compare_round_trip() {
    let (mut engine, vm, _reactor) = engine();
    vm.define(
        "a",
        vec![
            Ins::Global {
                table: "util",
                call: "dump",
                args: vec![Arg::Lit(sample_table())],
                out: 0,
            },
            Ins::Global {
                table: "util",
                call: "load",
                args: vec![Arg::Reg(0)],
                out: 1,
            },
            Ins::Global {
                table: "util",
                call: "compare",
                args: vec![Arg::Lit(sample_table()), Arg::Reg(1)],
                out: 2,
            },
            Ins::Done,
        ],
    );

    engine.start(func("a")).unwrap();

    assert!(matches!(vm.register(0), Value::Bytes(_)));
    assert_eq!(vm.register(2), Value::Boolean(true));
    assert!(engine.success());
}

#[test]
fn load_of_garbage_yields_nil() {
    let (mut engine, vm, _reactor) = engine();
    vm.define(
        "a",
        vec![
            Ins::Global {
                table: "util",
                call: "load",
                args: vec![Arg::Lit(Value::Bytes(vec![1, 2, 3]))],
                out: 0,
            },
            Ins::Global {
                table: "util",
                call: "compare",
                args: vec![Arg::Reg(0), Arg::Lit(Value::Nil)],
                out: 1,
            },
            Ins::Done,
        ],
    );

    engine.start(func("a")).unwrap();

    assert_eq!(vm.register(0), Value::Nil);
    assert_eq!(vm.register(1), Value::Boolean(true));
    assert!(engine.success());
}

#[test]
fn info_and_random() {
    let (mut engine, vm, _reactor) = engine();
    vm.define(
        "a",
        vec![
            Ins::Global {
                table: "util",
                call: "info",
                args: vec![],
                out: 0,
            },
            Ins::Global {
                table: "util",
                call: "random",
                args: vec![Arg::Lit(Value::Number(6.0))],
                out: 1,
            },
            Ins::Done,
        ],
    );

    engine.start(func("a")).unwrap();

    let info = vm.register(0);
    let info = info.as_table().expect("info table");
    assert_eq!(info.get_str("worker").and_then(Value::as_number), Some(0.0));
    assert!(info.get_str("pid").and_then(Value::as_number).is_some());
    assert!(info.get_str("version").and_then(Value::as_bytes).is_some());

    let roll = vm.register(1).as_number().expect("random number");
    assert!((1.0..=6.0).contains(&roll));
    assert_eq!(roll.fract(), 0.0);
}

#[test]
fn pile_write_find_length_read() {
    let (mut engine, vm, _reactor) = engine();
    vm.define(
        "a",
        vec![
            Ins::Global {
                table: "make",
                call: "pile",
                args: vec![],
                out: 0,
            },
            Ins::Method {
                recv: 0,
                call: "write",
                args: vec![Arg::Lit(Value::Bytes(b"hello world".to_vec()))],
                out: 1,
            },
            Ins::Method {
                recv: 0,
                call: "find",
                args: vec![Arg::Lit(Value::Bytes(b"world".to_vec()))],
                out: 2,
            },
            Ins::Method {
                recv: 0,
                call: "length",
                args: vec![],
                out: 3,
            },
            Ins::Method {
                recv: 0,
                call: "read",
                args: vec![Arg::Lit(Value::Number(5.0))],
                out: 4,
            },
            Ins::Done,
        ],
    );

    engine.start(func("a")).unwrap();

    assert_eq!(vm.register(2), Value::Number(6.0));
    assert_eq!(vm.register(3), Value::Number(11.0));
    assert_eq!(vm.register(4), Value::Bytes(b"hello".to_vec()));
    assert!(engine.success());
}
