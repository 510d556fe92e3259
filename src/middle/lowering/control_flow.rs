//! Control flow normalization.
//!
//! Structured loops, `break`/`continue`, switch case markers, asserts,
//! compound assignments and array initializers are rewritten into labels,
//! `goto`, `if` and plain assignments. Each call performs one pass and
//! returns the number of rewrites; `do`/`for` loops become `while` loops in
//! one pass and labels and gotos in the next, so callers run this to a
//! fixpoint.

use crate::{
    frontend::{
        Token,
        ast::{
            Expression, ExpressionKind, Literal, Statement, StatementKind, SwitchLabels, UnaryOperatorKind,
            visit::children_mut,
        },
        intern::InternedSymbol,
    },
    middle::{scope::ScopeTree, ty::TypeArena},
};

/// Name of the intrinsic a failed assertion calls
pub const ABORT_INTRINSIC: &str = "abort";

pub fn lower_control_flow(
    statement: &mut Statement,
    next_label_id: &mut u32,
    types: &TypeArena,
    scopes: &ScopeTree,
) -> usize {
    let mut lowering = ControlFlowLowering {
        types,
        scopes,
        next_label_id,
        targets: Vec::new(),
        switches: Vec::new(),
        rewrites: 0,
    };

    lowering.lower_statement(statement);
    lowering.rewrites
}

pub fn loop_label(id: u32, suffix: &str) -> InternedSymbol {
    InternedSymbol::new(&format!("${id}_{suffix}"))
}

/// Where `break` and `continue` go from inside a construct. `None` leaves the
/// statement in place for a later pass, or lets `continue` look further out.
#[derive(Debug, Clone, Copy)]
struct JumpTargets {
    break_label: Option<InternedSymbol>,
    continue_label: Option<InternedSymbol>,
}

struct PendingSwitch {
    id: u32,
    labels: SwitchLabels,
}

struct ControlFlowLowering<'a> {
    types: &'a TypeArena,
    scopes: &'a ScopeTree,
    next_label_id: &'a mut u32,
    targets: Vec<JumpTargets>,
    switches: Vec<PendingSwitch>,
    rewrites: usize,
}

fn is_always_true(condition: &Expression) -> bool {
    condition.as_integer().is_some_and(|value| value != 0)
}

fn label(name: InternedSymbol, token: Token) -> Statement {
    Statement::new(StatementKind::Label(name), token)
}

fn goto(name: InternedSymbol, token: Token) -> Statement {
    Statement::new(StatementKind::Goto(name), token)
}

impl ControlFlowLowering<'_> {
    fn mint(&mut self) -> u32 {
        let id = *self.next_label_id;
        *self.next_label_id += 1;
        id
    }

    fn not(&self, condition: Expression) -> Expression {
        let token = condition.token;

        Expression::typed(
            ExpressionKind::Unary {
                operator: UnaryOperatorKind::LogicalNot,
                operand: Box::new(condition),
            },
            token,
            self.types.bool(),
        )
    }

    fn always(&self, token: Token) -> Expression {
        Expression::literal(Literal::Bool(true), token, self.types.bool())
    }

    fn lower_block(&mut self, body: &mut Statement, targets: JumpTargets) {
        self.targets.push(targets);
        self.lower_statement(body);
        self.targets.pop();
    }

    fn lower_statement(&mut self, statement: &mut Statement) {
        let token = statement.token;

        let replacement = match &mut statement.kind {
            StatementKind::Expression(expression) => match self.expand_array_initializer(expression) {
                Some(statements) => Some(StatementKind::Sequence(statements)),
                None => {
                    self.lower_expression(expression);
                    None
                }
            },
            StatementKind::Compound { statements, .. } | StatementKind::Sequence(statements) => {
                for statement in statements {
                    self.lower_statement(statement);
                }

                None
            }
            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                self.lower_expression(condition);
                self.lower_statement(then);

                if let Some(otherwise) = otherwise {
                    self.lower_statement(otherwise);
                }

                None
            }
            StatementKind::While { condition, body } => {
                let id = self.mint();
                let (head, tail) = (loop_label(id, "head"), loop_label(id, "tail"));

                self.lower_expression(condition);
                self.lower_block(
                    body,
                    JumpTargets {
                        break_label: Some(tail),
                        continue_label: Some(head),
                    },
                );

                let mut statements = vec![label(head, token)];

                if !is_always_true(condition) {
                    statements.push(Statement::new(
                        StatementKind::If {
                            condition: self.not(condition.take()),
                            then: Box::new(goto(tail, token)),
                            otherwise: None,
                        },
                        token,
                    ));
                }

                statements.push(body.take());
                statements.push(goto(head, token));
                statements.push(label(tail, token));

                Some(StatementKind::Sequence(statements))
            }
            StatementKind::DoWhile { body, condition } => {
                let next = loop_label(self.mint(), "next");

                self.lower_expression(condition);
                self.lower_block(
                    body,
                    JumpTargets {
                        break_label: None,
                        continue_label: Some(next),
                    },
                );

                let exit = Statement::new(
                    StatementKind::If {
                        condition: self.not(condition.take()),
                        then: Box::new(Statement::new(StatementKind::Break, token)),
                        otherwise: None,
                    },
                    token,
                );

                Some(StatementKind::While {
                    condition: self.always(token),
                    body: Box::new(Statement::new(
                        StatementKind::Sequence(vec![body.take(), label(next, token), exit]),
                        token,
                    )),
                })
            }
            StatementKind::For {
                initializer,
                condition,
                step,
                body,
            } => {
                let next = loop_label(self.mint(), "next");

                if let Some(initializer) = initializer {
                    self.lower_statement(initializer);
                }

                if let Some(condition) = condition {
                    self.lower_expression(condition);
                }

                if let Some(step) = step {
                    self.lower_expression(step);
                }

                self.lower_block(
                    body,
                    JumpTargets {
                        break_label: None,
                        continue_label: Some(next),
                    },
                );

                let mut loop_body = vec![body.take(), label(next, token)];

                if let Some(step) = step.take() {
                    loop_body.push(Statement::new(StatementKind::Expression(step), token));
                }

                let condition = condition.take().unwrap_or_else(|| self.always(token));
                let mut statements = Vec::new();

                if let Some(initializer) = initializer.take() {
                    statements.push(*initializer);
                }

                statements.push(Statement::new(
                    StatementKind::While {
                        condition,
                        body: Box::new(Statement::new(StatementKind::Sequence(loop_body), token)),
                    },
                    token,
                ));

                Some(StatementKind::Sequence(statements))
            }
            StatementKind::Break => self
                .targets
                .last()
                .and_then(|targets| targets.break_label)
                .map(StatementKind::Goto),
            StatementKind::Continue => self
                .targets
                .iter()
                .rev()
                .find_map(|targets| targets.continue_label)
                .map(StatementKind::Goto),
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    self.lower_expression(value);
                }

                None
            }
            StatementKind::ComputedGoto(target) => {
                self.lower_expression(target);
                None
            }
            StatementKind::Switch(switch) => {
                self.lower_expression(&mut switch.value);

                if let Some(labels) = &switch.labels {
                    let tail = labels.tail;

                    self.lower_block(
                        &mut switch.body,
                        JumpTargets {
                            break_label: Some(tail),
                            continue_label: None,
                        },
                    );
                } else {
                    let id = self.mint();
                    let tail = loop_label(id, "tail");

                    self.switches.push(PendingSwitch {
                        id,
                        labels: SwitchLabels {
                            head: loop_label(id, "head"),
                            tail,
                            cases: Vec::new(),
                            default: None,
                        },
                    });

                    self.lower_block(
                        &mut switch.body,
                        JumpTargets {
                            break_label: Some(tail),
                            continue_label: None,
                        },
                    );

                    switch.labels = self.switches.pop().map(|pending| pending.labels);
                    self.rewrites += 1;
                }

                None
            }
            StatementKind::Case(value) => {
                let constant = value.as_integer();

                match (self.switches.last_mut(), constant) {
                    (Some(pending), Some(constant)) => {
                        let name = loop_label(pending.id, &format!("case_{}", pending.labels.cases.len()));
                        pending.labels.cases.push((name, constant));

                        Some(StatementKind::Label(name))
                    }
                    _ => None,
                }
            }
            StatementKind::Default => self.switches.last_mut().map(|pending| {
                let name = loop_label(pending.id, "default");
                pending.labels.default = Some(name);

                StatementKind::Label(name)
            }),
            StatementKind::Assert { condition, .. } => {
                self.lower_expression(condition);

                let abort = Expression::typed(
                    ExpressionKind::Call {
                        callee: InternedSymbol::new(ABORT_INTRINSIC),
                        symbol: None,
                        arguments: Vec::new(),
                    },
                    token,
                    self.types.void(),
                );

                Some(StatementKind::If {
                    condition: self.not(condition.take()),
                    then: Box::new(Statement::new(StatementKind::Expression(abort), token)),
                    otherwise: None,
                })
            }
            StatementKind::Finally(body) => {
                self.lower_statement(body);
                None
            }
            StatementKind::Goto(_)
            | StatementKind::Label(_)
            | StatementKind::InlineAsm(_)
            | StatementKind::Empty => None,
        };

        if let Some(kind) = replacement {
            statement.kind = kind;
            self.rewrites += 1;
        }
    }

    /// Rewrites `a op= b` into `a = a op b`. The target is duplicated, so side
    /// effects inside it (`a[i++] += 1`) run twice.
    fn lower_expression(&mut self, expression: &mut Expression) {
        for child in children_mut(expression) {
            self.lower_expression(child);
        }

        let ExpressionKind::CompoundAssign {
            operator,
            target,
            value,
        } = &mut expression.kind
        else {
            return;
        };

        let (operator, target, value) = (*operator, target.take(), value.take());
        let combined = Expression {
            kind: ExpressionKind::Binary {
                operator,
                lhs: Box::new(target.clone()),
                rhs: Box::new(value),
            },
            token: expression.token,
            ty: expression.ty,
            is_lvalue: false,
        };

        expression.kind = ExpressionKind::Assign {
            target: Box::new(target),
            value: Box::new(combined),
        };
        self.rewrites += 1;
    }

    /// `a: [T; n] = {x, y, ...}` becomes the bare declaration followed by
    /// `a[0] = x; a[1] = y; ...`
    fn expand_array_initializer(&mut self, expression: &mut Expression) -> Option<Vec<Statement>> {
        let token = expression.token;
        let array = expression.ty.filter(|ty| self.types.is_array(*ty))?;

        let ExpressionKind::VariableInit { symbol, initializer } = &mut expression.kind else {
            return None;
        };

        if !initializer
            .as_deref()
            .is_some_and(|initializer| matches!(initializer.kind, ExpressionKind::CollectionInit(_)))
        {
            return None;
        }

        let symbol = *symbol;
        let elements = match initializer.take().map(|initializer| initializer.kind) {
            Some(ExpressionKind::CollectionInit(elements)) => elements,
            _ => return None,
        };

        let target = Expression {
            kind: ExpressionKind::Identifier {
                name: self.scopes.symbol(symbol).name,
                symbol: Some(symbol),
            },
            token,
            ty: Some(array),
            is_lvalue: true,
        };

        let mut statements = vec![Statement::new(StatementKind::Expression(expression.take()), token)];
        self.expand_collection(target, elements, &mut statements);

        Some(statements)
    }

    fn expand_collection(&mut self, target: Expression, elements: Vec<Expression>, out: &mut Vec<Statement>) {
        let token = target.token;
        let element_type = target.ty.and_then(|ty| self.types.element(ty));
        let i64 = self.types.i64();

        for (index, mut element) in elements.into_iter().enumerate() {
            let slot = Expression {
                kind: ExpressionKind::Subscript {
                    base: Box::new(target.clone()),
                    index: Box::new(Expression::literal(Literal::Integer(index as i64), token, i64)),
                },
                token,
                ty: element_type,
                is_lvalue: true,
            };

            if let ExpressionKind::CollectionInit(inner) = &mut element.kind {
                let inner = std::mem::take(inner);
                self.expand_collection(slot, inner, out);
                continue;
            }

            self.lower_expression(&mut element);

            let assign = Expression {
                kind: ExpressionKind::Assign {
                    target: Box::new(slot),
                    value: Box::new(element),
                },
                token,
                ty: element_type,
                is_lvalue: false,
            };

            out.push(Statement::new(StatementKind::Expression(assign), token));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        diagnostics::DiagnosticSink,
        frontend::ast::{
            BinaryOperatorKind, Item, Program, UnaryOperatorKind,
            build::{ParamSpec, ProgramBuilder},
            visit::{Visitor, walk_expression, walk_statement},
        },
        middle::analysis::analyze_program,
    };

    #[derive(Default)]
    struct Census {
        loops: usize,
        breaks: usize,
        gotos: Vec<InternedSymbol>,
        labels: Vec<InternedSymbol>,
        compound_assignments: usize,
        increments: usize,
    }

    impl<'a> Visitor<'a> for Census {
        fn visit_statement(&mut self, statement: &'a Statement) {
            match &statement.kind {
                StatementKind::While { .. } | StatementKind::DoWhile { .. } | StatementKind::For { .. } => {
                    self.loops += 1
                }
                StatementKind::Break | StatementKind::Continue => self.breaks += 1,
                StatementKind::Goto(label) => self.gotos.push(*label),
                StatementKind::Label(label) => self.labels.push(*label),
                _ => {}
            }

            walk_statement(self, statement)
        }

        fn visit_expression(&mut self, expression: &'a Expression) {
            match &expression.kind {
                ExpressionKind::CompoundAssign { .. } => self.compound_assignments += 1,
                ExpressionKind::Unary { operator, .. } if operator.is_increment_or_decrement() => {
                    self.increments += 1
                }
                _ => {}
            }

            walk_expression(self, expression)
        }
    }

    fn analyzed(build: impl FnOnce(&mut ProgramBuilder<'_>), types: &mut TypeArena) -> Program {
        let mut builder = ProgramBuilder::new(types, "lowering");
        build(&mut builder);

        let mut program = builder.finish();
        let mut diagnostics = DiagnosticSink::new();
        analyze_program(&mut program, types, &mut diagnostics, &Config::default())
            .expect("test programs analyze cleanly");

        program
    }

    fn lower_to_fixpoint(program: &mut Program, types: &TypeArena) -> Census {
        let Program { items, scopes, .. } = program;

        for item in items.iter_mut() {
            if let Item::Function(function) = item {
                while lower_control_flow(&mut function.body, &mut function.next_label_id, types, scopes) > 0 {}
            }
        }

        let mut census = Census::default();

        for function in program.functions() {
            census.visit_statement(&function.body);
        }

        census
    }

    #[test]
    fn infinite_while_becomes_a_label_skeleton() {
        let mut types = TypeArena::default();
        let void = types.void();

        let mut program = analyzed(
            |b| {
                b.function("f", void, &[], |b| {
                    let one = b.int(1);
                    let body = b.block(|b| vec![b.break_()]);

                    vec![b.while_(one, body)]
                });
            },
            &mut types,
        );

        let census = lower_to_fixpoint(&mut program, &types);

        assert_eq!(census.loops, 0);
        assert_eq!(census.breaks, 0);
        assert_eq!(
            census.labels,
            vec![InternedSymbol::new("$0_head"), InternedSymbol::new("$0_tail")]
        );
        assert_eq!(
            census.gotos,
            vec![InternedSymbol::new("$0_tail"), InternedSymbol::new("$0_head")]
        );
    }

    #[test]
    fn compound_assignment_duplicates_its_target() {
        let mut types = TypeArena::default();
        let (void, i32) = (types.void(), types.i32());
        let pointer = types.pointer_to(i32);

        let mut program = analyzed(
            |b| {
                b.function(
                    "f",
                    void,
                    &[ParamSpec::value("a", pointer), ParamSpec::value("i", i32)],
                    |b| {
                        let a = b.ident("a");
                        let i = b.ident("i");
                        let index = b.unary(UnaryOperatorKind::PostIncrement, i);
                        let element = b.subscript(a, index);
                        let one = b.int(1);
                        let bump = b.compound_assign(BinaryOperatorKind::Add, element, one);

                        vec![b.expr(bump)]
                    },
                );
            },
            &mut types,
        );

        let census = lower_to_fixpoint(&mut program, &types);

        assert_eq!(census.compound_assignments, 0);
        // `a[i++] = a[i++] + 1`
        assert_eq!(census.increments, 2);
    }

    #[test]
    fn for_loops_continue_at_the_step() {
        let mut types = TypeArena::default();
        let (void, i32) = (types.void(), types.i32());

        let mut program = analyzed(
            |b| {
                b.function("f", void, &[ParamSpec::value("n", i32)], |b| {
                    let zero = b.int(0);
                    let init = b.local("i", Some(i32), Some(zero));
                    let i = b.ident("i");
                    let n = b.ident("n");
                    let condition = b.binary(BinaryOperatorKind::LessThan, i, n);
                    let i = b.ident("i");
                    let one = b.int(1);
                    let step = b.compound_assign(BinaryOperatorKind::Add, i, one);
                    let body = b.block(|b| vec![b.continue_()]);

                    vec![b.for_(Some(init), Some(condition), Some(step), body)]
                });
            },
            &mut types,
        );

        let census = lower_to_fixpoint(&mut program, &types);

        assert_eq!(census.loops, 0);
        assert_eq!(census.breaks, 0);
        assert_eq!(census.compound_assignments, 0);
        assert!(census.gotos.contains(&InternedSymbol::new("$0_next")));
        assert!(census.labels.contains(&InternedSymbol::new("$0_next")));
    }

    #[test]
    fn lowering_its_own_output_is_a_no_op() {
        let mut types = TypeArena::default();
        let (void, i32) = (types.void(), types.i32());

        let mut program = analyzed(
            |b| {
                b.function("f", void, &[ParamSpec::value("x", i32)], |b| {
                    let body = b.block(|b| {
                        let one = b.int(1);
                        let case = b.case(one);
                        let brk = b.break_();
                        let default = b.default();

                        vec![case, brk, default]
                    });
                    let x = b.ident("x");
                    let switch = b.switch(x, body);
                    let x = b.ident("x");
                    let zero = b.int(0);
                    let condition = b.binary(BinaryOperatorKind::GreaterThan, x, zero);
                    let assert = b.assert(condition, Some("x must be positive"));

                    vec![switch, assert]
                });
            },
            &mut types,
        );

        lower_to_fixpoint(&mut program, &types);

        let Program { items, scopes, .. } = &mut program;
        let Item::Function(function) = &mut items[0] else {
            panic!("the only item is a function");
        };

        let before = function.body.clone();
        assert_eq!(
            lower_control_flow(&mut function.body, &mut function.next_label_id, &types, scopes),
            0
        );
        assert_eq!(function.body, before);
    }

    #[test]
    fn array_initializers_become_indexed_stores() {
        let mut types = TypeArena::default();
        let void = types.void();
        let i32 = types.i32();
        let array = types.array_of(i32, 3);

        let mut program = analyzed(
            |b| {
                b.function("f", void, &[], |b| {
                    let values = vec![b.int(1), b.int(2), b.int(3)];
                    let collection = b.collection(values);

                    vec![b.local("xs", Some(array), Some(collection))]
                });
            },
            &mut types,
        );

        let Program { items, scopes, .. } = &mut program;
        let Item::Function(function) = &mut items[0] else {
            panic!("the only item is a function");
        };

        assert!(lower_control_flow(&mut function.body, &mut function.next_label_id, &types, scopes) > 0);

        let StatementKind::Compound { statements, .. } = &function.body.kind else {
            panic!("function bodies are compound statements");
        };
        let StatementKind::Sequence(expanded) = &statements[0].kind else {
            panic!("the initializer is expanded in place");
        };

        assert_eq!(expanded.len(), 4);
        assert!(expanded[1..].iter().all(|statement| matches!(
            &statement.kind,
            StatementKind::Expression(Expression {
                kind: ExpressionKind::Assign { .. },
                ..
            })
        )));
    }
}
