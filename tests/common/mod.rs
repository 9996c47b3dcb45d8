#![allow(dead_code)]

use kiln::frontend::ast::{
    AssignmentOperatorKind, BinaryOperatorKind as Op, FunctionDefinition, Module, Statement,
    Type as T, UnaryOperatorKind, build::*,
};

fn program(functions: Vec<FunctionDefinition>) -> Module {
    module("test", functions)
}

fn main_returning(ty: T, body: Vec<Statement>) -> Module {
    program(vec![function("main", &[], ty, body)])
}

/// Programs that every backend must agree on, covering each aggregate kind,
/// each loop form and both fault paths.
pub fn corpus() -> Vec<(&'static str, Module)> {
    vec![
        ("sum", sum()),
        ("nested_ranges", nested_ranges()),
        ("array_index", array_index()),
        ("bitwise", bitwise()),
        ("short_circuit", short_circuit()),
        ("classic_for", classic_for()),
        ("while_loop", while_loop_with_control()),
        ("for_each", for_each_push()),
        ("maps", maps()),
        ("structs", structs()),
        ("strings", strings()),
        ("closures", closures()),
        ("recursion", recursion()),
        ("deep_recursion", deep_recursion(20_000)),
        ("compound_assignment", compound_assignment()),
        ("runtime_library", runtime_library()),
        ("testing_suite", testing_suite()),
        ("exit", exit()),
        ("out_of_bounds", out_of_bounds()),
        ("division_by_zero", division_by_zero()),
    ]
}

pub fn sum() -> Module {
    main_returning(T::Int, vec![ret(binary(Op::Add, int(10), int(5)))])
}

pub fn nested_ranges() -> Module {
    main_returning(
        T::Int,
        vec![
            local("sum", int(0)),
            for_range(
                "i",
                int(0),
                int(3),
                vec![for_range(
                    "j",
                    int(0),
                    int(2),
                    vec![assign(
                        var("sum", T::Int),
                        binary(
                            Op::Add,
                            var("sum", T::Int),
                            binary(Op::Add, var("i", T::Int), var("j", T::Int)),
                        ),
                    )],
                )],
            ),
            ret(var("sum", T::Int)),
        ],
    )
}

pub fn array_index() -> Module {
    main_returning(
        T::Int,
        vec![
            local("xs", array(T::Int, vec![int(10), int(20), int(30)])),
            ret(index(var("xs", array_type(T::Int)), int(1))),
        ],
    )
}

/// `(12 & 10) + ~12` is -5, which leaves the process as 251
pub fn bitwise() -> Module {
    main_returning(
        T::Int,
        vec![ret(binary(
            Op::Add,
            binary(Op::BitwiseAnd, int(12), int(10)),
            unary(UnaryOperatorKind::BitwiseNot, int(12)),
        ))],
    )
}

pub fn short_circuit() -> Module {
    program(vec![
        function(
            "noisy",
            &[],
            T::Bool,
            vec![
                expr(call("std.io.println", T::Void, vec![string("called")])),
                ret(boolean(false)),
            ],
        ),
        function(
            "main",
            &[],
            T::Bool,
            vec![ret(binary(
                Op::LogicalOr,
                boolean(true),
                call("noisy", T::Bool, vec![]),
            ))],
        ),
    ])
}

/// Skips 5 and stops at 8, printing the running total on each pass
pub fn classic_for() -> Module {
    let i = || var("i", T::Int);
    main_returning(
        T::Int,
        vec![
            local("sum", int(0)),
            for_loop(
                Some(local("i", int(0))),
                Some(binary(Op::LessThan, i(), int(10))),
                Some(assign(i(), binary(Op::Add, i(), int(1)))),
                vec![
                    if_else(binary(Op::Equals, i(), int(5)), vec![cont()], None),
                    if_else(binary(Op::Equals, i(), int(8)), vec![brk()], None),
                    operator_assign(AssignmentOperatorKind::Add, var("sum", T::Int), i()),
                    expr(call("std.io.println_int", T::Void, vec![var("sum", T::Int)])),
                ],
            ),
            ret(var("sum", T::Int)),
        ],
    )
}

pub fn while_loop_with_control() -> Module {
    let i = || var("i", T::Int);
    main_returning(
        T::Int,
        vec![
            local("i", int(0)),
            local("sum", int(0)),
            while_loop(
                boolean(true),
                vec![
                    assign(i(), binary(Op::Add, i(), int(1))),
                    if_else(binary(Op::GreaterThan, i(), int(7)), vec![brk()], None),
                    if_else(
                        binary(Op::Equals, binary(Op::Modulus, i(), int(2)), int(0)),
                        vec![cont()],
                        None,
                    ),
                    operator_assign(AssignmentOperatorKind::Add, var("sum", T::Int), i()),
                ],
            ),
            ret(var("sum", T::Int)),
        ],
    )
}

pub fn for_each_push() -> Module {
    let ints = array_type(T::Int);
    main_returning(
        T::Int,
        vec![
            local("xs", array(T::Int, vec![int(1), int(2)])),
            local("total", int(0)),
            for_each(
                "x",
                var("xs", ints.clone()),
                vec![
                    if_else(
                        binary(Op::LessThan, var("x", T::Int), int(2)),
                        vec![expr(call(
                            "std.array.push",
                            T::Void,
                            vec![var("xs", ints.clone()), int(5)],
                        ))],
                        None,
                    ),
                    operator_assign(AssignmentOperatorKind::Add, var("total", T::Int), var("x", T::Int)),
                ],
            ),
            expr(call(
                "std.io.println_int",
                T::Void,
                vec![call("std.array.length", T::Int, vec![var("xs", ints)])],
            )),
            ret(var("total", T::Int)),
        ],
    )
}

/// 11 + 2 + 0 for the missing key, plus the map's size
pub fn maps() -> Module {
    let ints = || var("m", map_type(T::Int));
    main_returning(
        T::Int,
        vec![
            local("m", map(T::Int, vec![(string("a"), int(1))])),
            assign(index(ints(), string("b")), int(2)),
            operator_assign(AssignmentOperatorKind::Add, index(ints(), string("a")), int(10)),
            ret(binary(
                Op::Add,
                binary(
                    Op::Add,
                    index(ints(), string("a")),
                    index(ints(), string("b")),
                ),
                binary(
                    Op::Add,
                    index(ints(), string("missing")),
                    call("std.map.size", T::Int, vec![ints()]),
                ),
            )),
        ],
    )
}

pub fn structs() -> Module {
    let point = T::Struct("Point".into());
    let mut tree = main_returning(
        T::Int,
        vec![
            local(
                "a",
                structure_literal("Point", vec![("x", int(1)), ("y", int(2))]),
            ),
            local("b", var("a", point.clone())),
            assign(field(var("b", point.clone()), "x", T::Int), int(40)),
            ret(binary(
                Op::Add,
                field(var("a", point.clone()), "x", T::Int),
                field(var("b", point), "x", T::Int),
            )),
        ],
    );
    tree.structs.push(structure("Point", &[("x", T::Int), ("y", T::Int)]));
    tree
}

pub fn strings() -> Module {
    main_returning(
        T::String,
        vec![
            local(
                "greeting",
                binary(Op::Add, string("kiln "), cast(int(7), T::String)),
            ),
            expr(call(
                "std.io.println",
                T::Void,
                vec![call("std.string.to_upper", T::String, vec![var("greeting", T::String)])],
            )),
            ret(var("greeting", T::String)),
        ],
    )
}

pub fn closures() -> Module {
    let adder = function_type(vec![T::Int], T::Int);
    let triple = function_type(vec![T::Int], T::Int);
    program(vec![
        function(
            "triple",
            &[("x", T::Int)],
            T::Int,
            vec![ret(binary(Op::Multiply, var("x", T::Int), int(3)))],
        ),
        function(
            "main",
            &[],
            T::Int,
            vec![
                local("base", int(40)),
                local(
                    "add",
                    lambda(
                        &[("x", T::Int)],
                        T::Int,
                        &[("base", T::Int)],
                        vec![ret(binary(Op::Add, var("x", T::Int), var("base", T::Int)))],
                    ),
                ),
                assign(var("base", T::Int), int(1000)),
                local("f", function_ref("triple", triple.clone())),
                ret(call_value(
                    var("add", adder),
                    vec![call_value(var("f", triple), vec![int(1)])],
                )),
            ],
        ),
    ])
}

/// fib(15) is 610, which truncates to 98
pub fn recursion() -> Module {
    let n = || var("n", T::Int);
    program(vec![
        function(
            "fib",
            &[("n", T::Int)],
            T::Int,
            vec![
                if_else(binary(Op::LessThan, n(), int(2)), vec![ret(n())], None),
                ret(binary(
                    Op::Add,
                    call("fib", T::Int, vec![binary(Op::Subtract, n(), int(1))]),
                    call("fib", T::Int, vec![binary(Op::Subtract, n(), int(2))]),
                )),
            ],
        ),
        function("main", &[], T::Int, vec![ret(call("fib", T::Int, vec![int(15)]))]),
    ])
}

/// `count(n)` recurses `n` frames deep and returns `n`
pub fn deep_recursion(depth: i64) -> Module {
    let n = || var("n", T::Int);
    program(vec![
        function(
            "count",
            &[("n", T::Int)],
            T::Int,
            vec![
                if_else(binary(Op::Equals, n(), int(0)), vec![ret(int(0))], None),
                ret(binary(
                    Op::Add,
                    int(1),
                    call("count", T::Int, vec![binary(Op::Subtract, n(), int(1))]),
                )),
            ],
        ),
        function("main", &[], T::Int, vec![ret(call("count", T::Int, vec![int(depth)]))]),
    ])
}

/// Each compound assignment calls `pick` once: `xs[0]` becomes 6 and
/// `ps[0].y` becomes 20
pub fn compound_assignment() -> Module {
    let point = T::Struct("Point".into());
    let points = array_type(point.clone());
    let ints = array_type(T::Int);
    let pick = || call("pick", T::Int, vec![]);

    let mut tree = program(vec![
        function(
            "pick",
            &[],
            T::Int,
            vec![
                expr(call("std.io.println", T::Void, vec![string("pick")])),
                ret(int(0)),
            ],
        ),
        function(
            "main",
            &[],
            T::Int,
            vec![
                local("xs", array(T::Int, vec![int(1), int(2)])),
                local(
                    "ps",
                    array(
                        point.clone(),
                        vec![structure_literal("Point", vec![("x", int(1)), ("y", int(2))])],
                    ),
                ),
                operator_assign(
                    AssignmentOperatorKind::Add,
                    index(var("xs", ints.clone()), pick()),
                    int(5),
                ),
                operator_assign(
                    AssignmentOperatorKind::Multiply,
                    field(index(var("ps", points.clone()), pick()), "y", T::Int),
                    int(10),
                ),
                ret(binary(
                    Op::Add,
                    index(var("xs", ints), int(0)),
                    field(index(var("ps", points), int(0)), "y", T::Int),
                )),
            ],
        ),
    ]);
    tree.structs.push(structure("Point", &[("x", T::Int), ("y", T::Int)]));
    tree
}

fn println(value: kiln::frontend::ast::Expression) -> Statement {
    expr(call("std.io.println", T::Void, vec![value]))
}

/// Conversions, string and math helpers, and assertions. Returns the
/// argument count plus 7.
pub fn runtime_library() -> Module {
    let to_string = |function: &str, value| call(function, T::String, vec![value]);
    main_returning(
        T::Int,
        vec![
            println(to_string(
                "std.int_to_string",
                call("std.math.lcm", T::Int, vec![int(4), int(6)]),
            )),
            println(cast(call("std.math.factorial", T::Int, vec![int(10)]), T::String)),
            println(to_string(
                "std.bool_to_string",
                call("std.math.is_prime", T::Bool, vec![int(97)]),
            )),
            println(to_string(
                "std.float_to_string",
                call("std.math.abs_float", T::Float, vec![float(-2.5)]),
            )),
            println(to_string(
                "std.float_to_string",
                call("std.math.max_float", T::Float, vec![float(1.25), float(0.5)]),
            )),
            println(to_string(
                "std.float_to_string",
                call("std.math.min_float", T::Float, vec![float(1234567.0), float(9e9)]),
            )),
            println(cast(
                call("std.string_to_float", T::Float, vec![string("2.5e-5")]),
                T::String,
            )),
            println(to_string(
                "std.bool_to_string",
                call("std.string_to_bool", T::Bool, vec![string("true")]),
            )),
            println(to_string(
                "std.int_to_string",
                call(
                    "std.string.last_index_of",
                    T::Int,
                    vec![string("banana"), string("an")],
                ),
            )),
            println(to_string(
                "std.int_to_string",
                call("std.string.compare", T::Int, vec![string("apple"), string("banana")]),
            )),
            println(to_string(
                "std.int_to_string",
                call("std.string_to_int", T::Int, vec![string("-17")]),
            )),
            expr(call("std.assert", T::Void, vec![boolean(true), string("never")])),
            expr(call("std.assert.eq", T::Void, vec![int(2), int(3), string("math")])),
            expr(call(
                "std.assert.eq",
                T::Void,
                vec![string("a"), string("b"), string("text")],
            )),
            expr(call("std.assert.true", T::Void, vec![boolean(false), string("flag")])),
            expr(call("std.test.start", T::Void, vec![string("unit")])),
            expr(call("std.test.end", T::Void, vec![string("unit"), boolean(true)])),
            ret(binary(Op::Add, call("std.os.args_count", T::Int, vec![]), int(7))),
        ],
    )
}

/// Five checks, two of them failing, so the program exits with 2
pub fn testing_suite() -> Module {
    let suite = || var("suite", T::Int);
    let check = |function: &str, mut arguments: Vec<kiln::frontend::ast::Expression>| {
        arguments.insert(0, suite());
        expr(call(function, T::Int, arguments))
    };
    main_returning(
        T::Int,
        vec![
            local("suite", call("std.testing.suite", T::Int, vec![])),
            check("std.testing.equal_int", vec![string("add"), int(4), int(4)]),
            check(
                "std.testing.equal_string",
                vec![string("greet"), string("hi"), string("ho")],
            ),
            check(
                "std.testing.equal_float_precision",
                vec![string("pi"), float(3.14159), float(3.14), int(2)],
            ),
            check(
                "std.testing.equal_bool",
                vec![string("flag"), boolean(true), boolean(false)],
            ),
            check("std.testing.expect", vec![string("truthy"), boolean(true)]),
            check("std.testing.summary", vec![]),
            expr(call("std.testing.exit", T::Void, vec![suite()])),
            ret(int(0)),
        ],
    )
}

pub fn exit() -> Module {
    main_returning(
        T::Int,
        vec![
            println(string("before")),
            expr(call("std.os.exit", T::Void, vec![int(3)])),
            println(string("after")),
            ret(int(0)),
        ],
    )
}

pub fn out_of_bounds() -> Module {
    main_returning(
        T::Int,
        vec![
            expr(call("std.io.println", T::Void, vec![string("before")])),
            local("xs", array(T::Int, vec![int(1)])),
            ret(index(var("xs", array_type(T::Int)), int(3))),
        ],
    )
}

pub fn division_by_zero() -> Module {
    program(vec![
        function(
            "divide",
            &[("a", T::Int), ("b", T::Int)],
            T::Int,
            vec![ret(binary(Op::Divide, var("a", T::Int), var("b", T::Int)))],
        ),
        function(
            "main",
            &[],
            T::Int,
            vec![ret(call("divide", T::Int, vec![int(7), int(0)]))],
        ),
    ])
}
