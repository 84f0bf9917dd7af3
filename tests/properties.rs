use std::collections::BTreeMap;

use proptest::prelude::*;

use miny18::{
    calltree::{CallTree, Forest},
    ir::{self, Instruction, Op, Ref, Target, Window},
    lower::lower,
    model::{CompareOp, Expr, Function, MathOp, Module, Program, Stmt, Symbol, Type},
    opt::{optimize, optimize_function},
};

/// Grafo acíclico: cada función solo llama a funciones de mayor índice.
fn call_graph() -> impl Strategy<Value = Vec<(Vec<usize>, u32, u32)>> {
    (2usize..7).prop_flat_map(|count| {
        let node = |index: usize| {
            (
                prop::collection::vec(index + 1..count + 1, 0..3),
                0u32..3,
                0u32..2,
            )
        };

        (0..count).map(node).collect::<Vec<_>>()
    })
}

/// Manejadores de interrupción con sus locales `(registros, bits)`.
fn handlers() -> impl Strategy<Value = Vec<(u32, u32)>> {
    prop::collection::vec((0u32..3, 0u32..2), 0..4)
}

fn with_locals(mut function: Function, registers: u32, bits: u32) -> Function {
    for register in 0..registers {
        function = function.local(format!("r{}", register), Symbol::int());
    }

    for bit in 0..bits {
        function = function.local(format!("b{}", bit), Symbol::bool());
    }

    function
}

fn graph_program(graph: &[(Vec<usize>, u32, u32)]) -> Program {
    let count = graph.len();
    let label = |index: usize| format!("demo.f{}", index);

    let mut module = Module::default().symbol("g", Symbol::int());
    for (index, (callees, registers, bits)) in graph.iter().enumerate() {
        let function = with_locals(Function::new(label(index)), *registers, *bits);
        let calls = callees
            .iter()
            .filter(|&&callee| callee < count)
            .map(|&callee| Stmt::call(label(callee), vec![]));

        module = module.function(function.body(calls.collect::<Vec<_>>()));
    }

    let main = Function::new("demo.main").body(vec![Stmt::call(label(0), vec![])]);
    Program::new("demo").module("demo", module.function(main))
}

/// Cada manejador se instala en el nivel `índice + 1`.
fn interrupt_program(graph: &[(Vec<usize>, u32, u32)], handlers: &[(u32, u32)]) -> Program {
    let mut program = graph_program(graph);
    for (index, &(registers, bits)) in handlers.iter().enumerate() {
        let label = format!("demo.h{}", index);
        let handler = with_locals(Function::new(label.clone()).isr(), registers, bits)
            .body(vec![Stmt::Nop]);

        if let Some(module) = program.modules.get_mut("demo") {
            module.functions.insert(label.clone(), handler);
        }

        program.vectors.install(index as u8 + 1, label).unwrap();
    }

    program
}

/// Las ventanas de un árbol de interrupción no tocan las globales, la
/// línea principal ni las de otro manejador.
fn assert_interrupts_isolated(forest: &Forest, functions: &BTreeMap<String, ir::Function>) {
    // Ranuras de trabajo más la global `g`
    let globals = (Window { base: 0, count: 3 }, Window { base: 0, count: 1 });

    let mut placed: Vec<&ir::Function> = Vec::new();
    for tree in forest.trees() {
        let windows: Vec<&ir::Function> = tree.discovery().into_iter().map(|label| &functions[label]).collect();

        for function in &windows {
            assert!(!function.registers.overlaps(&globals.0), "{} {:?}", function.label, function.registers);
            assert!(!function.bits.overlaps(&globals.1), "{} {:?}", function.label, function.bits);

            for other in &placed {
                assert!(
                    !function.registers.overlaps(&other.registers),
                    "{} {:?} overlaps {} {:?}",
                    function.label,
                    function.registers,
                    other.label,
                    other.registers
                );

                assert!(!function.bits.overlaps(&other.bits));
            }
        }

        placed.extend(windows);
    }
}

fn assert_disjoint_paths<'a>(
    tree: &'a CallTree,
    functions: &BTreeMap<String, ir::Function>,
    ancestors: &mut Vec<&'a str>,
) {
    let function = &functions[&tree.name];
    for ancestor in ancestors.iter() {
        let ancestor = &functions[*ancestor];
        assert!(
            !function.registers.overlaps(&ancestor.registers),
            "{} {:?} overlaps {} {:?}",
            function.label,
            function.registers,
            ancestor.label,
            ancestor.registers
        );

        assert!(!function.bits.overlaps(&ancestor.bits));
    }

    ancestors.push(&tree.name);
    for call in &tree.calls {
        assert_disjoint_paths(call, functions, ancestors);
    }

    ancestors.pop();
}

fn flag() -> impl Strategy<Value = Expr> {
    prop_oneof![
        Just(Expr::var("flag")),
        Just(Expr::unary(MathOp::LogicalNot, Expr::var("flag"))),
    ]
}

fn statement() -> impl Strategy<Value = Stmt> {
    let leaf = prop_oneof![
        Just(Stmt::Halt),
        Just(Stmt::Nop),
        Just(Stmt::Break),
        Just(Stmt::Continue),
        Just(Stmt::Return(None)),
        (0..8i32).prop_map(|value| Stmt::assign(Expr::var("x"), Expr::Int(value))),
    ];

    leaf.prop_recursive(4, 48, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Stmt::block),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Stmt::looping),
            (flag(), inner.clone(), prop::option::of(inner))
                .prop_map(|(condition, then, otherwise)| Stmt::if_else(condition, then, otherwise)),
        ]
    })
}

fn control_program(body: Vec<Stmt>) -> Program {
    let main = Function::new("demo.main").body(vec![Stmt::looping(body)]);
    let module = Module::default()
        .symbol("x", Symbol::int())
        .symbol("flag", Symbol::bool())
        .function(main);

    Program::new("demo").module("demo", module)
}

/// Operandos enteros sin subexpresiones propias, salvo el índice.
fn word_leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        (0..10i32).prop_map(Expr::Int),
        Just(Expr::var("a")),
        Just(Expr::var("b")),
        Just(Expr::var("keys")),
        Just(Expr::call("f", vec![])),
        Just(Expr::index("table", Expr::var("b"))),
        (0..4i32).prop_map(|index| Expr::index("table", Expr::Int(index))),
    ]
}

fn word() -> impl Strategy<Value = Expr> {
    word_leaf().prop_recursive(4, 24, 2, |inner| {
        let op = prop_oneof![
            Just(MathOp::Add),
            Just(MathOp::Sub),
            Just(MathOp::Mul),
            Just(MathOp::And),
            Just(MathOp::Or),
            Just(MathOp::Xor),
        ];

        (op, inner.clone(), inner).prop_map(|(op, lhs, rhs)| Expr::binary(op, lhs, rhs))
    })
}

fn bit() -> impl Strategy<Value = Expr> {
    let compare = prop_oneof![
        Just(CompareOp::Eq),
        Just(CompareOp::Lt),
        Just(CompareOp::Gt),
    ];

    let leaf = prop_oneof![
        any::<bool>().prop_map(Expr::Bool),
        Just(Expr::var("p")),
        Just(Expr::var("q")),
        (compare, word_leaf(), word_leaf()).prop_map(|(op, lhs, rhs)| Expr::compare(op, lhs, rhs)),
    ];

    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            inner
                .clone()
                .prop_map(|operand| Expr::unary(MathOp::LogicalNot, operand)),
            (inner.clone(), inner.clone())
                .prop_map(|(lhs, rhs)| Expr::binary(MathOp::LogicalAnd, lhs, rhs)),
            (inner.clone(), inner).prop_map(|(lhs, rhs)| Expr::binary(MathOp::LogicalOr, lhs, rhs)),
        ]
    })
}

fn assignment() -> impl Strategy<Value = Stmt> {
    prop_oneof![
        word().prop_map(|value| Stmt::assign(Expr::var("a"), value)),
        bit().prop_map(|value| Stmt::assign(Expr::var("p"), value)),
    ]
}

/// Intervalos `(definición, último uso)` de los temporales, por dirección.
fn temporaries(function: &ir::Function, bits: bool) -> BTreeMap<u32, Vec<(usize, usize)>> {
    let mut by_address: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();

    for (index, op) in function.body.iter().enumerate() {
        let temporary_bit = match op.instruction {
            Instruction::Math { width, .. } => width == ir::Width::Bit,
            Instruction::Int(_) => false,
            Instruction::Bool(_) | Instruction::Compare { .. } => true,
            Instruction::Element { .. } | Instruction::PortIn(_) => false,
            Instruction::Call {
                result: Some(width), ..
            } => width == ir::Width::Bit,

            _ => continue,
        };

        if let (true, Some(address)) = (temporary_bit == bits, op.offset.absolute()) {
            let last = op.last_use.unwrap_or(index);
            by_address.entry(address).or_default().push((index, last));
        }
    }

    by_address
}

fn live_targets_are_markers(function: &ir::Function) -> bool {
    function.body.iter().all(|op| match op.instruction.target() {
        Some(Target {
            marker,
            index: Some(index),
        }) => matches!(&function.body[*index].instruction, Instruction::Marker(name) if name == marker),

        Some(_) => op.instruction.is_removed(),
        None => true,
    })
}

proptest! {
    #[test]
    fn ancestors_never_share_storage(graph in call_graph(), handlers in handlers()) {
        let program = interrupt_program(&graph, &handlers);
        let compilation = miny18::build(&program).unwrap();
        let functions = &compilation.program.functions;

        for tree in compilation.forest.trees() {
            let mut ancestors = Vec::new();
            assert_disjoint_paths(tree, functions, &mut ancestors);
        }

        assert_interrupts_isolated(&compilation.forest, functions);
        prop_assert_eq!(compilation.forest.interrupts.len(), handlers.len());
    }

    #[test]
    fn optimizing_is_idempotent(body in prop::collection::vec(statement(), 0..6)) {
        let mut program = lower(&control_program(body)).unwrap();
        optimize(&mut program).unwrap();

        let main = &program.functions["demo.main"];
        prop_assert!(live_targets_are_markers(main));

        let mut again = main.clone();
        optimize_function(&mut again).unwrap();
        prop_assert_eq!(&again.body, &main.body);
    }

    #[test]
    fn jump_chains_collapse_to_their_end(length in 1usize..12) {
        let marker = |n: usize| format!("demo.f.{}", n);

        let mut function = ir::Function::new("demo.f", false, None);
        let mut push = |instruction| function.body.push(Op::new(instruction, None));

        push(Instruction::Marker(String::from("demo.f")));
        push(Instruction::Bool(true));
        push(Instruction::Branch {
            when: true,
            condition: Ref(1),
            target: Target::new(marker(1)),
        });

        push(Instruction::Halt);
        for n in 1..=length {
            push(Instruction::Marker(marker(n)));
            push(Instruction::Jump(Target::new(marker(n + 1))));
        }

        push(Instruction::Marker(marker(length + 1)));
        push(Instruction::Nop);
        push(Instruction::Return(None));

        function.liveness();
        optimize_function(&mut function).unwrap();

        match &function.body[2].instruction {
            Instruction::Branch { target, .. } => prop_assert_eq!(&target.marker, &marker(length + 1)),
            other => prop_assert!(false, "unexpected {:?}", other),
        }

        let jumps = function
            .body
            .iter()
            .filter(|op| matches!(op.instruction, Instruction::Jump(_)))
            .count();

        prop_assert_eq!(jumps, 0);
    }

    #[test]
    fn temporaries_never_overlap(body in prop::collection::vec(assignment(), 1..8)) {
        let main = Function::new("demo.main").body(body);
        let f = Function::new("demo.f")
            .returns(Type::Int)
            .body(vec![Stmt::Return(Some(Expr::Int(1)))]);

        let module = Module::default()
            .symbol("a", Symbol::int())
            .symbol("b", Symbol::int())
            .symbol("p", Symbol::bool())
            .symbol("q", Symbol::bool())
            .symbol("table", Symbol::ram(4))
            .symbol("keys", Symbol::port(6))
            .function(main)
            .function(f);

        let compilation = miny18::build(&Program::new("demo").module("demo", module)).unwrap();
        let main = &compilation.program.functions["demo.main"];

        for intervals in temporaries(main, false).values() {
            for pair in intervals.windows(2) {
                let ((_, last), (next, _)) = (pair[0], pair[1]);
                prop_assert!(last < next, "registers {:?}", intervals);
            }
        }

        for intervals in temporaries(main, true).values() {
            for pair in intervals.windows(2) {
                let ((_, last), (next, _)) = (pair[0], pair[1]);
                prop_assert!(last <= next, "bits {:?}", intervals);
            }
        }
    }
}

#[test]
fn windows_of_unrelated_functions_may_coincide() {
    let graph = vec![(vec![], 2, 0), (vec![], 2, 0)];
    let mut program = graph_program(&graph);

    let main = Function::new("demo.main").body(vec![
        Stmt::call("demo.f0", vec![]),
        Stmt::call("demo.f1", vec![]),
    ]);

    if let Some(module) = program.modules.get_mut("demo") {
        module.functions.insert(main.label.clone(), main);
    }

    let compilation = miny18::build(&program).unwrap();
    let functions = &compilation.program.functions;

    assert_eq!(functions["demo.f0"].registers, functions["demo.f1"].registers);
    assert_eq!(functions["demo.f0"].registers, Window { base: 3, count: 2 });
}
