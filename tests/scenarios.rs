mod common;

use std::{collections::BTreeMap, io::Write};

use kiln::{
    frontend,
    middle::passes::Pipeline,
    runner::{self, Backend, Outcome},
    vm::{self, Coverage, Host, Machine, MachineConfig, Value},
};

fn run(tree: &kiln::frontend::ast::Module) -> Outcome {
    let module = runner::compile(tree, &mut Pipeline::runner()).expect("program should compile");
    runner::run(&module, "main", &Backend::default(), None)
        .expect("interpreter should run")
}

fn expect(name: &str, status: u8, stdout: &str, stderr: &str) {
    let (_, tree) = common::corpus()
        .into_iter()
        .find(|(program, _)| *program == name)
        .expect("program is in the corpus");

    let outcome = run(&tree);
    assert_eq!(
        outcome,
        Outcome {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        },
        "{name}"
    );
}

#[test]
fn sum_of_constants() {
    expect("sum", 15, "", "");
}

#[test]
fn nested_range_loops() {
    expect("nested_ranges", 9, "", "");
}

#[test]
fn array_literal_index() {
    expect("array_index", 20, "", "");
}

#[test]
fn negative_results_truncate_to_a_byte() {
    expect("bitwise", 251, "", "");
}

#[test]
fn logical_or_never_calls_the_right_operand() {
    expect("short_circuit", 1, "", "");
}

#[test]
fn classic_for_with_break_and_continue() {
    expect("classic_for", 23, "0\n1\n3\n6\n10\n16\n23\n", "");
}

#[test]
fn while_with_break_and_continue() {
    expect("while_loop", 16, "", "");
}

#[test]
fn for_each_over_a_growing_array() {
    expect("for_each", 8, "3\n", "");
}

#[test]
fn maps_with_missing_keys() {
    expect("maps", 15, "", "");
}

#[test]
fn structs_are_copied_on_assignment() {
    expect("structs", 41, "", "");
}

#[test]
fn string_results_are_printed() {
    expect("strings", 0, "KILN 7\nkiln 7\n", "");
}

#[test]
fn closures_and_function_values() {
    expect("closures", 43, "", "");
}

#[test]
fn recursive_calls() {
    expect("recursion", 98, "", "");
}

#[test]
fn recursion_deeper_than_any_fixed_limit() {
    // 20000 truncated to a byte
    expect("deep_recursion", 32, "", "");
}

#[test]
fn one_hundred_thousand_frames_with_the_default_config() {
    let module = runner::compile(&common::deep_recursion(100_000), &mut Pipeline::runner())
        .expect("program should compile");
    assert_eq!(vm::execute(&module, "main", None), Ok(Value::Int(100_000)));
}

#[test]
fn compound_assignment_evaluates_its_target_once() {
    expect("compound_assignment", 26, "pick\npick\n", "");
}

#[test]
fn runtime_library_functions() {
    expect(
        "runtime_library",
        7,
        "12\n3628800\ntrue\n2.5\n1.25\n1.23457e+06\n2.5e-05\ntrue\n3\n-1\n-17\n\
         \x20 ASSERTION FAILED: math (expected: 2, actual: 3)\n\
         \x20 ASSERTION FAILED: text (expected: a, actual: b)\n\
         \x20 ASSERTION FAILED: flag (expected: true, actual: false)\n\
         Running test: unit\n\u{2713} unit PASSED\n",
        "",
    );
}

#[test]
fn testing_suite_exits_with_its_failure_count() {
    expect(
        "testing_suite",
        2,
        "Running test: add\n\u{2713} add PASSED\n\
         Running test: greet\n\u{2717} greet FAILED\n  expected \"hi\", got \"ho\"\n\
         Running test: pi\n\u{2713} pi PASSED\n\
         Running test: flag\n\u{2717} flag FAILED\n  expected true, got false\n\
         Running test: truthy\n\u{2713} truthy PASSED\n\
         \nTest Summary: 5 total, 3 passed, 2 failed\n",
        "",
    );
}

#[test]
fn exit_ends_the_program_without_a_fault() {
    expect("exit", 3, "before\n", "");
}

/// Records the coverage table each time a line is printed
struct LineSnapshots {
    coverage: Coverage,
    taken: Vec<BTreeMap<String, u64>>,
}

impl Write for LineSnapshots {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf.contains(&b'\n') {
            self.taken.push(self.coverage.snapshot());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn coverage_snapshot_between_runtime_calls() {
    let module = runner::compile(&common::runtime_library(), &mut Pipeline::runner())
        .expect("program should compile");

    let coverage = Coverage::new();
    let mut sink = LineSnapshots {
        coverage: coverage.clone(),
        taken: Vec::new(),
    };
    let mut input = std::io::empty();
    let mut host = Host::new(&mut input, &mut sink);
    let result = Machine::new(&module, MachineConfig::default())
        .with_coverage(coverage.clone())
        .run("main", &[], &mut host);
    drop(host);
    assert_eq!(result, Ok(Value::Int(7)));

    // After the first line only the calls feeding it have happened
    let first = &sink.taken[0];
    assert_eq!(first.get("std.math.lcm"), Some(&1));
    assert_eq!(first.get("std.io.println"), Some(&1));
    assert_eq!(first.get("std.math.factorial"), None);

    // The argument count is read after the last line
    let last = sink.taken.last().expect("program prints");
    assert_eq!(last.get("std.os.args_count"), None);
    assert_eq!(coverage.count("std.os.args_count"), 1);
    assert_eq!(coverage.count("std.assert.eq"), 2);
    assert_eq!(coverage.count("std.io.println"), 11);
}

#[test]
fn out_of_bounds_access_exits_70() {
    expect(
        "out_of_bounds",
        70,
        "before\n",
        "runtime fault in main at bb0: index 3 out of bounds for length 1\n",
    );
}

#[test]
fn division_by_zero_exits_70() {
    expect(
        "division_by_zero",
        70,
        "",
        "runtime fault in divide at bb0: division by zero\n",
    );
}

#[test]
fn trees_survive_a_json_round_trip() {
    for (name, tree) in common::corpus() {
        let json = serde_json::to_string(&tree).unwrap();
        let parsed = frontend::module_from_json(&json).unwrap();
        assert_eq!(parsed, tree, "{name}");
        assert_eq!(run(&parsed), run(&tree), "{name}");
    }
}
