//! Small built-in programs for driving the pipeline end to end from the
//! command line and from tests.

use strum::{Display, EnumIter};

use crate::{
    frontend::ast::{
        BinaryOperatorKind, Program, Statement, UnaryOperatorKind,
        build::{ParamSpec, ProgramBuilder},
    },
    session::Session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, clap::ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum Demo {
    /// Iterative factorial with a while loop
    Factorial,
    /// Multiplication by a power of two
    Scale,
    /// A struct passed by value
    Pair,
    /// A switch with a default case
    Switch,
}

impl Demo {
    pub fn entry(self) -> &'static str {
        match self {
            Demo::Factorial => "factorial",
            Demo::Scale => "scale",
            Demo::Pair => "main",
            Demo::Switch => "classify",
        }
    }

    pub fn arguments(self) -> Vec<u64> {
        match self {
            Demo::Factorial => vec![5],
            Demo::Scale => vec![5],
            Demo::Pair => vec![],
            Demo::Switch => vec![2],
        }
    }

    /// What `entry(arguments)` evaluates to
    pub fn expected(self) -> i64 {
        match self {
            Demo::Factorial => 120,
            Demo::Scale => 40,
            Demo::Pair => 42,
            Demo::Switch => 20,
        }
    }

    pub fn build(self, session: &mut Session) -> Program {
        match self {
            Demo::Factorial => factorial(session),
            Demo::Scale => scale(session),
            Demo::Pair => pair(session),
            Demo::Switch => switch(session),
        }
    }
}

fn factorial(session: &mut Session) -> Program {
    let i32 = session.types.i32();
    let mut builder = session.builder("factorial");

    builder.function("factorial", i32, &[ParamSpec::value("n", i32)], |b| {
        let one = b.int(1);
        let result = b.local("result", Some(i32), Some(one));
        let one = b.int(1);
        let counter = b.local("i", Some(i32), Some(one));

        let i = b.ident("i");
        let n = b.ident("n");
        let condition = b.binary(BinaryOperatorKind::LessThanOrEqualTo, i, n);

        let body = b.block(|b| {
            let result = b.ident("result");
            let i = b.ident("i");
            let multiply = b.compound_assign(BinaryOperatorKind::Multiply, result, i);

            let i = b.ident("i");
            let increment = b.unary(UnaryOperatorKind::PostIncrement, i);

            vec![b.expr(multiply), b.expr(increment)]
        });
        let loop_ = b.while_(condition, body);

        let result_value = b.ident("result");
        let ret = b.ret(Some(result_value));

        vec![result, counter, loop_, ret]
    });

    builder.finish()
}

fn scale(session: &mut Session) -> Program {
    let i32 = session.types.i32();
    let mut builder = session.builder("scale");

    builder.function("scale", i32, &[ParamSpec::value("x", i32)], |b| {
        let x = b.ident("x");
        let eight = b.int(8);
        let product = b.binary(BinaryOperatorKind::Multiply, x, eight);

        vec![b.ret(Some(product))]
    });

    builder.finish()
}

fn pair(session: &mut Session) -> Program {
    let i32 = session.types.i32();
    let i8 = session.types.i8();
    let mut builder = session.builder("pair");

    let pair = builder.struct_type("Pair", &[("a", i32), ("b", i8)]);

    builder.function("sum", i32, &[ParamSpec::value("p", pair)], |b| {
        let p = b.ident("p");
        let a = b.member(p, "a");
        let p = b.ident("p");
        let second = b.member(p, "b");
        let total = b.binary(BinaryOperatorKind::Add, a, second);

        vec![b.ret(Some(total))]
    });

    builder.function("main", i32, &[], |b| {
        let declaration = b.local("p", Some(pair), None);

        let p = b.ident("p");
        let a = b.member(p, "a");
        let forty = b.int(40);
        let assign_a = b.assign(a, forty);

        let p = b.ident("p");
        let second = b.member(p, "b");
        let two = b.int(2);
        let assign_b = b.assign(second, two);

        let p = b.ident("p");
        let call = b.call("sum", vec![p]);

        vec![declaration, b.expr(assign_a), b.expr(assign_b), b.ret(Some(call))]
    });

    builder.finish()
}

/// `case value: result = outcome; break;`
fn switch_arm(b: &mut ProgramBuilder<'_>, value: i64, outcome: i64) -> Vec<Statement> {
    let value = b.int(value);
    let case = b.case(value);
    let target = b.ident("result");
    let outcome = b.int(outcome);
    let assign = b.assign(target, outcome);

    vec![case, b.expr(assign), b.break_()]
}

fn switch(session: &mut Session) -> Program {
    let i32 = session.types.i32();
    let mut builder = session.builder("switch");

    builder.function("classify", i32, &[ParamSpec::value("x", i32)], |b| {
        let zero = b.int(0);
        let result = b.local("result", Some(i32), Some(zero));

        let body = b.block(|b| {
            let mut statements = switch_arm(b, 1, 10);
            statements.extend(switch_arm(b, 2, 20));

            let default = b.default();
            let target = b.ident("result");
            let negative = b.int(-1);
            let assign = b.assign(target, negative);
            statements.extend([default, b.expr(assign)]);

            statements
        });

        let x = b.ident("x");
        let switch = b.switch(x, body);

        let result_value = b.ident("result");
        let ret = b.ret(Some(result_value));

        vec![result, switch, ret]
    });

    builder.finish()
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn every_demo_computes_its_expected_value() {
        for demo in Demo::iter() {
            let mut session = Session::default();
            let mut program = demo.build(&mut session);

            let module = session.compile(&mut program).unwrap();
            let result = session.execute(&module, demo.entry(), &demo.arguments()).unwrap();

            assert_eq!(result as i64, demo.expected(), "{demo}");
        }
    }
}
