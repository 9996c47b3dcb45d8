//! Runs every corpus program in the interpreter and as a native executable
//! and requires identical stdout, stderr and exit status. Skipped when no C
//! compiler is installed.

mod common;

use kiln::{
    backend::{Codegen, OptLevel, TargetConfig, default_cc, toolchain::cc_available},
    middle::passes::Pipeline,
    runner::{self, Backend, Outcome},
};

fn compiler() -> Option<String> {
    let cc = default_cc();
    if cc_available(&cc) {
        Some(cc)
    } else {
        eprintln!("skipping native parity: `{cc}` is not available");
        None
    }
}

fn check_parity(codegen: Codegen, opt_level: OptLevel, pipeline: fn() -> Pipeline) {
    let Some(cc) = compiler() else {
        return;
    };
    let directory = mktemp::Temp::new_dir().unwrap();

    for (name, tree) in common::corpus() {
        let module = runner::compile(&tree, &mut pipeline()).unwrap();
        let interpreted = runner::run(&module, "main", &Backend::default(), None).unwrap();

        let native = Backend::Native(TargetConfig {
            codegen,
            opt_level,
            cc: cc.clone(),
            output: directory.as_path().join(format!("{name}-{codegen}")),
            ..TargetConfig::default()
        });
        let compiled: Outcome = runner::run(&module, "main", &native, None)
            .unwrap_or_else(|error| panic!("{name} failed natively: {error}"));

        assert_eq!(compiled, interpreted, "{name} with {codegen}");
    }
}

#[test]
fn c_matches_the_interpreter() {
    check_parity(Codegen::C, OptLevel::None, Pipeline::runner);
}

#[test]
fn c_matches_the_interpreter_when_optimized() {
    check_parity(Codegen::C, OptLevel::Speed, Pipeline::optimizing);
}

#[test]
fn cranelift_matches_the_interpreter() {
    check_parity(Codegen::Cranelift, OptLevel::None, Pipeline::runner);
}

#[test]
fn cranelift_matches_the_interpreter_when_optimized() {
    check_parity(Codegen::Cranelift, OptLevel::Speed, Pipeline::optimizing);
}
