use xilc::{
    backend::interpreter::Fault,
    config::Config,
    demos::Demo,
    frontend::ast::{BinaryOperatorKind, UnaryOperatorKind, build::ParamSpec},
    middle::{
        analysis::AnalysisError,
        xil::Opcode,
    },
    session::{CompileFailure, Session},
};

#[test]
fn multiplication_by_eight_becomes_a_shift() {
    let mut session = Session::default();
    let mut program = Demo::Scale.build(&mut session);
    let module = session.compile(&mut program).unwrap();

    let method = module.method("scale").unwrap();

    assert_eq!(method.opcodes().collect::<Vec<_>>(), [Opcode::ShiftLeft, Opcode::Return]);
    assert_eq!(session.execute(&module, "scale", &[6]), Ok(48));
}

#[test]
fn loop_with_immediate_break_terminates() {
    let mut session = Session::default();
    let i32 = session.types.i32();

    let mut builder = session.builder("spin");
    builder.function("spin", i32, &[], |b| {
        let one = b.int(1);
        let body = b.block(|b| vec![b.break_()]);
        let loop_ = b.while_(one, body);
        let seven = b.int(7);

        vec![loop_, b.ret(Some(seven))]
    });
    let mut program = builder.finish();

    let module = session.compile(&mut program).unwrap();

    assert!(module.method("spin").unwrap().opcodes().any(|opcode| opcode == Opcode::Jump));
    assert_eq!(session.execute(&module, "spin", &[]), Ok(7));
}

#[test]
fn structs_are_copied_when_passed_by_value() {
    let mut session = Session::default();
    let mut program = Demo::Pair.build(&mut session);
    let module = session.compile(&mut program).unwrap();

    let main = module.method("main").unwrap();

    assert!(main.opcodes().any(|opcode| opcode == Opcode::BlockCopy));
    assert_eq!(session.execute(&module, "main", &[]), Ok(42));
}

#[test]
fn lowering_reaches_a_fixpoint() {
    let mut session = Session::default();
    let mut program = Demo::Factorial.build(&mut session);

    session.analyze(&mut program).unwrap();

    let first = session.lower(&mut program);
    let second = session.lower(&mut program);

    assert!(first.control_flow > 0);
    assert_eq!(second.control_flow, 0);
    assert_eq!(second.peephole, 0);
}

#[test]
fn recursion_uses_fresh_register_windows() {
    let mut session = Session::default();
    let i32 = session.types.i32();

    let mut builder = session.builder("fib");
    builder.function("fib", i32, &[ParamSpec::value("n", i32)], |b| {
        let n = b.ident("n");
        let two = b.int(2);
        let small = b.binary(BinaryOperatorKind::LessThan, n, two);
        let n = b.ident("n");
        let early = b.ret(Some(n));
        let base_case = b.if_(small, early, None);

        let n = b.ident("n");
        let one = b.int(1);
        let previous = b.binary(BinaryOperatorKind::Subtract, n, one);
        let left = b.call("fib", vec![previous]);

        let n = b.ident("n");
        let two = b.int(2);
        let before_previous = b.binary(BinaryOperatorKind::Subtract, n, two);
        let right = b.call("fib", vec![before_previous]);

        let sum = b.binary(BinaryOperatorKind::Add, left, right);

        vec![base_case, b.ret(Some(sum))]
    });
    let mut program = builder.finish();

    let module = session.compile(&mut program).unwrap();

    assert_eq!(session.execute(&module, "fib", &[10]), Ok(55));
}

#[test]
fn globals_are_initialized_before_every_run() {
    let mut session = Session::default();
    let i32 = session.types.i32();

    let mut builder = session.builder("counter");
    let five = builder.int(5);
    builder.global("counter", Some(i32), Some(five));
    builder.function("bump", i32, &[], |b| {
        let counter = b.ident("counter");
        let one = b.int(1);
        let add = b.compound_assign(BinaryOperatorKind::Add, counter, one);
        let counter = b.ident("counter");

        vec![b.expr(add), b.ret(Some(counter))]
    });
    let mut program = builder.finish();

    let module = session.compile(&mut program).unwrap();

    assert_eq!(session.execute(&module, "bump", &[]), Ok(6));
    assert_eq!(session.execute(&module, "bump", &[]), Ok(6));
}

#[test]
fn null_dereference_faults() {
    let mut session = Session::default();
    let i32 = session.types.i32();
    let pointer = session.types.pointer_to(i32);

    let mut builder = session.builder("null");
    builder.function("read", i32, &[], |b| {
        let null = b.null();
        let declaration = b.local("p", Some(pointer), Some(null));
        let p = b.ident("p");
        let value = b.unary(UnaryOperatorKind::Deref, p);

        vec![declaration, b.ret(Some(value))]
    });
    let mut program = builder.finish();

    let module = session.compile(&mut program).unwrap();

    assert_eq!(
        session.execute(&module, "read", &[]),
        Err(Fault::InvalidAddress { address: 0 })
    );
    assert!(session.diagnostics.has_errors());
}

#[test]
fn runaway_loops_hit_the_step_limit() {
    let mut session = Session::new(Config {
        max_steps: 1_000,
        ..Config::default()
    });
    let void = session.types.void();

    let mut builder = session.builder("forever");
    builder.function("forever", void, &[], |b| {
        let condition = b.boolean(true);
        let body = b.block(|_| vec![]);

        vec![b.while_(condition, body)]
    });
    let mut program = builder.finish();

    let module = session.compile(&mut program).unwrap();

    assert!(matches!(
        session.execute(&module, "forever", &[]),
        Err(Fault::StepLimitExceeded(_))
    ));
}

#[test]
fn duplicate_globals_stop_the_pipeline() {
    let mut session = Session::default();
    let i32 = session.types.i32();

    let mut builder = session.builder("duplicates");
    builder.global("g", Some(i32), None);
    builder.global("g", Some(i32), None);
    let mut program = builder.finish();

    assert_eq!(
        session.compile(&mut program),
        Err(CompileFailure::Analysis(AnalysisError::InvalidDeclarations { errors: 1 }))
    );
    assert_eq!(session.diagnostics.with_tag("duplicate-declaration").count(), 1);
}

#[test]
fn undeclared_identifiers_are_reported() {
    let mut session = Session::default();
    let i32 = session.types.i32();

    let mut builder = session.builder("undeclared");
    builder.function("f", i32, &[], |b| {
        let missing = b.ident("missing");
        vec![b.ret(Some(missing))]
    });
    let mut program = builder.finish();

    assert!(matches!(session.compile(&mut program), Err(CompileFailure::Analysis(_))));
    assert!(session.diagnostics.has_errors());
}

#[test]
fn early_return_still_runs_the_finally_block() {
    let mut session = Session::default();
    let i32 = session.types.i32();

    let mut builder = session.builder("finally");
    let zero = builder.int(0);
    builder.global("g", Some(i32), Some(zero));
    builder.function("f", i32, &[ParamSpec::value("x", i32)], |b| {
        let cleanup = b.block(|b| {
            let g = b.ident("g");
            let seven = b.int(7);
            let assign = b.assign(g, seven);
            vec![b.expr(assign)]
        });
        let finally = b.finally(cleanup);

        let x = b.ident("x");
        let zero = b.int(0);
        let positive = b.binary(BinaryOperatorKind::GreaterThan, x, zero);
        let one = b.int(1);
        let early = b.ret(Some(one));
        let check = b.if_(positive, early, None);
        let two = b.int(2);

        vec![finally, check, b.ret(Some(two))]
    });
    builder.function("main", i32, &[], |b| {
        let five = b.int(5);
        let call = b.call("f", vec![five]);
        let g = b.ident("g");

        vec![b.expr(call), b.ret(Some(g))]
    });
    let mut program = builder.finish();

    let module = session.compile(&mut program).unwrap();
    let f = module.method("f").unwrap();

    // Emitted once, at `$leave`, however many returns there are
    assert_eq!(f.opcodes().filter(|&opcode| opcode == Opcode::Store).count(), 1);
    assert_eq!(session.execute(&module, "f", &[5]), Ok(1));
    assert_eq!(session.execute(&module, "main", &[]), Ok(7));
}

#[test]
fn negative_index_reads_before_the_pointer() {
    let mut session = Session::default();
    let i32 = session.types.i32();
    let array = session.types.array_of(i32, 2);

    let mut builder = session.builder("previous");
    builder.function("previous", i32, &[], |b| {
        let five = b.int(5);
        let nine = b.int(9);
        let elements = b.collection(vec![five, nine]);
        let declaration = b.local("a", Some(array), Some(elements));

        let a = b.ident("a");
        let one = b.int(1);
        let second = b.subscript(a, one);
        let address = b.unary(UnaryOperatorKind::AddressOf, second);
        let pointer = b.local("p", None, Some(address));

        let p = b.ident("p");
        let minus_one = b.int(-1);
        let first = b.subscript(p, minus_one);

        vec![declaration, pointer, b.ret(Some(first))]
    });
    let mut program = builder.finish();

    let module = session.compile(&mut program).unwrap();

    assert_eq!(session.execute(&module, "previous", &[]), Ok(5));
}
