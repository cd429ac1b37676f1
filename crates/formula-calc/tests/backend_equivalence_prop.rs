use formula_calc::registry::{register_default_functions, ConstantRegistry, RandomSource};
use formula_calc::{
    parse_formula, BinaryOp, BytecodeExecutor, Executor, FunctionRegistry, Interpreter, Operation,
    Optimizer, ParseOptions, UnaryOp, Variables,
};
use proptest::prelude::*;

const BINARY_OPS: &[BinaryOp] = &[
    BinaryOp::Add,
    BinaryOp::Subtract,
    BinaryOp::Multiply,
    BinaryOp::Divide,
    BinaryOp::Modulo,
    BinaryOp::Power,
    BinaryOp::And,
    BinaryOp::Or,
    BinaryOp::LessThan,
    BinaryOp::LessOrEqual,
    BinaryOp::GreaterThan,
    BinaryOp::GreaterOrEqual,
    BinaryOp::Equal,
    BinaryOp::NotEqual,
];

fn registries() -> (FunctionRegistry, ConstantRegistry) {
    let functions = FunctionRegistry::new(false);
    register_default_functions(&functions, &RandomSource::from_seed(7)).unwrap();
    (functions, ConstantRegistry::new(false))
}

fn arb_constant() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (-50i64..=50).prop_map(Operation::integer),
        (0u32..400).prop_map(|n| Operation::float(n as f64 / 4.0)),
    ]
}

fn arb_leaf(with_variables: bool) -> BoxedStrategy<Operation> {
    if with_variables {
        prop_oneof![
            arb_constant(),
            prop::sample::select(vec!["x", "y", "z"]).prop_map(Operation::variable),
        ]
        .boxed()
    } else {
        arb_constant().boxed()
    }
}

fn arb_operation(with_variables: bool) -> impl Strategy<Value = Operation> {
    arb_leaf(with_variables).prop_recursive(
        4,  // depth
        32, // size
        4,  // items per collection
        |inner| {
            prop_oneof![
                inner
                    .clone()
                    .prop_map(|e| Operation::unary(UnaryOp::Negate, e)),
                (prop::sample::select(BINARY_OPS), inner.clone(), inner.clone())
                    .prop_map(|(op, l, r)| Operation::binary(op, l, r)),
                inner
                    .clone()
                    .prop_map(|e| Operation::function_call("sqrt", vec![e], true)),
                (inner.clone(), inner.clone(), inner.clone())
                    .prop_map(|(c, t, f)| Operation::function_call("if", vec![c, t, f], true)),
                prop::collection::vec(inner.clone(), 1..4)
                    .prop_map(|args| Operation::function_call("max", args, true)),
                prop::collection::vec(inner, 1..4)
                    .prop_map(|args| Operation::function_call("median", args, true)),
            ]
        },
    )
}

fn arb_variables() -> impl Strategy<Value = Variables> {
    (-20.0f64..20.0, -20.0f64..20.0, -20.0f64..20.0).prop_map(|(x, y, z)| {
        Variables::from([
            ("x".to_string(), x),
            ("y".to_string(), y),
            ("z".to_string(), z),
        ])
    })
}

fn same_value(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

proptest! {
    #[test]
    fn prop_interpreter_matches_bytecode(
        tree in arb_operation(true),
        vars in arb_variables(),
    ) {
        let (functions, constants) = registries();
        let (functions, constants) = (functions.read_only(), constants.read_only());

        let interpreted = Interpreter.execute(&tree, &functions, &constants, &vars).unwrap();
        let compiled = BytecodeExecutor.compile(tree, functions, constants);
        let compiled = compiled(&vars).unwrap();

        prop_assert!(same_value(interpreted, compiled), "{interpreted} != {compiled}");
    }

    #[test]
    fn prop_folding_preserves_value(tree in arb_operation(false)) {
        let (functions, constants) = registries();
        let (functions, constants) = (functions.read_only(), constants.read_only());

        let expected = Interpreter
            .execute(&tree, &functions, &constants, &Variables::new())
            .unwrap();
        let folded = Optimizer::new().optimize(tree, &functions, &constants).unwrap();

        prop_assert!(folded.is_literal(), "not folded: {folded}");
        let actual = folded.literal_value().unwrap();
        prop_assert!(same_value(expected, actual), "{expected} != {actual}");
    }

    #[test]
    fn prop_printed_formula_reparses_to_the_same_value(
        tree in arb_operation(true),
        vars in arb_variables(),
    ) {
        let (functions, constants) = registries();
        let (functions, constants) = (functions.read_only(), constants.read_only());

        let text = tree.to_string();
        let reparsed = parse_formula(&text, &ParseOptions::default(), &functions, &constants)
            .map_err(|err| TestCaseError::fail(format!("{text}: {err}")))?;

        let expected = Interpreter.execute(&tree, &functions, &constants, &vars).unwrap();
        let actual = Interpreter.execute(&reparsed, &functions, &constants, &vars).unwrap();
        prop_assert!(same_value(expected, actual), "{text}: {expected} != {actual}");
    }
}
