//! Tree level peephole optimizations on lowered function bodies.
//!
//! Every rewrite keeps the tree typed. A pass returns the number of
//! rewrites it made; running it on its own fixpoint output makes none.

use crate::{
    frontend::ast::{
        BinaryOperatorKind, Expression, ExpressionKind, Literal, Statement, StatementKind, UnaryOperatorKind,
        visit::{Visitor, children_mut, has_side_effects, walk_statement},
    },
    middle::ty::{TypeArena, TypeId},
};

pub fn peephole(statement: &mut Statement, types: &TypeArena) -> usize {
    let mut optimizer = Peephole { types, rewrites: 0 };

    optimizer.statement(statement);
    optimizer.rewrites
}

struct Peephole<'a> {
    types: &'a TypeArena,
    rewrites: usize,
}

fn power_of_two(value: i64) -> Option<u32> {
    (value > 0 && value & (value - 1) == 0).then(|| value.trailing_zeros())
}

/// Whether two expressions name the same storage without evaluating
/// anything observable
fn same_place(a: &Expression, b: &Expression) -> bool {
    match (&a.kind, &b.kind) {
        (
            ExpressionKind::Identifier { symbol: Some(a), .. },
            ExpressionKind::Identifier { symbol: Some(b), .. },
        ) => a == b,
        (
            ExpressionKind::Member {
                object: a_object,
                member: a_member,
                through_pointer: a_pointer,
            },
            ExpressionKind::Member {
                object: b_object,
                member: b_member,
                through_pointer: b_pointer,
            },
        ) => a_member == b_member && a_pointer == b_pointer && same_place(a_object, b_object),
        (
            ExpressionKind::Unary {
                operator: UnaryOperatorKind::Deref,
                operand: a,
            },
            ExpressionKind::Unary {
                operator: UnaryOperatorKind::Deref,
                operand: b,
            },
        ) => same_place(a, b),
        (
            ExpressionKind::Subscript { base: a_base, index: a_index },
            ExpressionKind::Subscript { base: b_base, index: b_index },
        ) => {
            same_place(a_base, b_base)
                && a_index.as_integer().is_some()
                && a_index.as_integer() == b_index.as_integer()
        }
        _ => false,
    }
}

/// Whether any statement nested in `statement` matches `predicate`
fn contains(statement: &Statement, predicate: fn(&StatementKind) -> bool) -> bool {
    struct Search {
        predicate: fn(&StatementKind) -> bool,
        found: bool,
    }

    impl<'a> Visitor<'a> for Search {
        fn visit_statement(&mut self, statement: &'a Statement) {
            if (self.predicate)(&statement.kind) {
                self.found = true;
            } else {
                walk_statement(self, statement)
            }
        }
    }

    let mut search = Search { predicate, found: false };
    search.visit_statement(statement);
    search.found
}

fn is_loop_exit(kind: &StatementKind) -> bool {
    matches!(kind, StatementKind::Break | StatementKind::Continue)
}

/// Dropping a labelled statement would strand its gotos
fn is_label(kind: &StatementKind) -> bool {
    matches!(kind, StatementKind::Label(_) | StatementKind::Case(_) | StatementKind::Default)
}

impl Peephole<'_> {
    fn integer_literal(&self, value: i64, ty: Option<TypeId>, expression: &Expression) -> Expression {
        Expression {
            kind: ExpressionKind::Literal(Literal::Integer(value)),
            token: expression.token,
            ty: ty.or(expression.ty),
            is_lvalue: false,
        }
    }

    fn is_integer(&self, expression: &Expression) -> bool {
        expression.ty.is_some_and(|ty| self.types.is_integer(ty))
    }

    fn is_unsigned(&self, expression: &Expression) -> bool {
        expression
            .ty
            .is_some_and(|ty| self.types.is_integer(ty) && self.types.is_unsigned(ty))
    }

    fn is_float(&self, expression: &Expression) -> bool {
        expression.ty.is_some_and(|ty| self.types.is_float(ty))
    }

    fn statement(&mut self, statement: &mut Statement) {
        let replacement = match &mut statement.kind {
            StatementKind::Expression(expression) => {
                self.expression(expression);

                (!has_side_effects(expression)).then_some(StatementKind::Empty)
            }
            StatementKind::Compound { statements, .. } | StatementKind::Sequence(statements) => {
                for statement in statements.iter_mut() {
                    self.statement(statement);
                }

                let before = statements.len();
                statements.retain(|statement| !matches!(statement.kind, StatementKind::Empty));
                self.rewrites += before - statements.len();

                None
            }
            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                self.expression(condition);
                self.statement(then);

                if let Some(otherwise) = otherwise {
                    self.statement(otherwise);
                }

                match condition.as_integer() {
                    Some(0) if !contains(then, is_label) => Some(
                        otherwise
                            .take()
                            .map_or(StatementKind::Empty, |otherwise| otherwise.kind),
                    ),
                    Some(value)
                        if value != 0
                            && !otherwise
                                .as_deref()
                                .is_some_and(|otherwise| contains(otherwise, is_label)) =>
                    {
                        Some(then.take().kind)
                    }
                    _ => None,
                }
            }
            StatementKind::While { condition, body } => {
                self.expression(condition);
                self.statement(body);

                (condition.as_integer() == Some(0) && !contains(body, is_label)).then_some(StatementKind::Empty)
            }
            StatementKind::DoWhile { body, condition } => {
                self.expression(condition);
                self.statement(body);

                (condition.as_integer() == Some(0) && !contains(body, is_loop_exit)).then(|| body.take().kind)
            }
            StatementKind::For {
                initializer,
                condition,
                step,
                body,
            } => {
                if let Some(initializer) = initializer {
                    self.statement(initializer);
                }

                if let Some(condition) = condition {
                    self.expression(condition);
                }

                if let Some(step) = step {
                    self.expression(step);
                }

                self.statement(body);
                None
            }
            StatementKind::Return(Some(expression))
            | StatementKind::ComputedGoto(expression)
            | StatementKind::Case(expression)
            | StatementKind::Assert {
                condition: expression,
                ..
            } => {
                self.expression(expression);
                None
            }
            StatementKind::Switch(switch) => {
                self.expression(&mut switch.value);
                self.statement(&mut switch.body);
                None
            }
            StatementKind::Finally(body) => {
                self.statement(body);
                None
            }
            StatementKind::Return(None)
            | StatementKind::Break
            | StatementKind::Continue
            | StatementKind::Goto(_)
            | StatementKind::Label(_)
            | StatementKind::Default
            | StatementKind::InlineAsm(_)
            | StatementKind::Empty => None,
        };

        if let Some(kind) = replacement {
            statement.kind = kind;
            self.rewrites += 1;
        }
    }

    fn expression(&mut self, expression: &mut Expression) {
        for child in children_mut(expression) {
            self.expression(child);
        }

        if let Some(replacement) = self.rewrite(expression) {
            *expression = replacement;
            self.rewrites += 1;
        }
    }

    /// One rewrite at the root of `expression`, children already optimized
    fn rewrite(&self, expression: &mut Expression) -> Option<Expression> {
        match &mut expression.kind {
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let operator = *operator;

                // Constants go on the right of commutative integer operators
                if matches!(operator, BinaryOperatorKind::Add | BinaryOperatorKind::Multiply)
                    && self.is_integer(lhs)
                    && lhs.is_literal()
                    && !rhs.is_literal()
                {
                    std::mem::swap(lhs, rhs);
                }

                self.rewrite_binary(operator, lhs, rhs, expression.ty)
            }
            ExpressionKind::Assign { target, value } => self.rewrite_assign(target, value),
            ExpressionKind::Unary {
                operator: UnaryOperatorKind::LogicalNot,
                operand,
            } => {
                let ExpressionKind::Binary { operator, lhs, rhs } = &mut operand.kind else {
                    return None;
                };

                let flipped = operator.negated_comparison()?;
                let ordered = !matches!(operator, BinaryOperatorKind::Equals | BinaryOperatorKind::NotEquals);

                if ordered && (self.is_float(lhs) || self.is_float(rhs)) {
                    return None;
                }

                Some(Expression {
                    kind: ExpressionKind::Binary {
                        operator: flipped,
                        lhs: Box::new(lhs.take()),
                        rhs: Box::new(rhs.take()),
                    },
                    token: expression.token,
                    ty: expression.ty,
                    is_lvalue: false,
                })
            }
            _ => None,
        }
    }

    fn rewrite_binary(
        &self,
        operator: BinaryOperatorKind,
        lhs: &mut Expression,
        rhs: &mut Expression,
        ty: Option<TypeId>,
    ) -> Option<Expression> {
        let token = lhs.token;
        let constant = rhs.as_integer();

        if self.is_integer(lhs) && self.is_integer(rhs) {
            match (operator, constant) {
                (BinaryOperatorKind::Add | BinaryOperatorKind::Subtract, Some(0))
                | (BinaryOperatorKind::Multiply, Some(1)) => return Some(lhs.take()),
                (BinaryOperatorKind::Multiply, Some(0)) if !has_side_effects(lhs) => {
                    return Some(self.integer_literal(0, ty, lhs));
                }
                _ => {}
            }

            let shift = constant.and_then(power_of_two)?;

            let (operator, amount) = match operator {
                BinaryOperatorKind::Multiply => (BinaryOperatorKind::ShiftLeft, shift as i64),
                BinaryOperatorKind::Divide if self.is_unsigned(lhs) => {
                    (BinaryOperatorKind::ShiftRight, shift as i64)
                }
                BinaryOperatorKind::Modulus if self.is_unsigned(lhs) => {
                    (BinaryOperatorKind::BitwiseAnd, constant? - 1)
                }
                _ => return None,
            };

            let amount = self.integer_literal(amount, rhs.ty, rhs);

            return Some(Expression {
                kind: ExpressionKind::Binary {
                    operator,
                    lhs: Box::new(lhs.take()),
                    rhs: Box::new(amount),
                },
                token,
                ty,
                is_lvalue: false,
            });
        }

        if operator == BinaryOperatorKind::Divide && self.is_float(lhs) {
            let Some(Literal::Float(divisor)) = rhs.as_literal().copied() else {
                return None;
            };

            if divisor == 0.0 {
                return None;
            }

            let reciprocal = Expression {
                kind: ExpressionKind::Literal(Literal::Float(1.0 / divisor)),
                token: rhs.token,
                ty: rhs.ty,
                is_lvalue: false,
            };

            return Some(Expression {
                kind: ExpressionKind::Binary {
                    operator: BinaryOperatorKind::Multiply,
                    lhs: Box::new(lhs.take()),
                    rhs: Box::new(reciprocal),
                },
                token,
                ty,
                is_lvalue: false,
            });
        }

        None
    }

    /// `x = x + 1` and `x = x - 1` become `++x` and `--x`; `x = x` becomes `x`
    fn rewrite_assign(&self, target: &mut Expression, value: &mut Expression) -> Option<Expression> {
        if same_place(target, value) {
            return Some(target.take());
        }

        if !self.is_integer(target) {
            return None;
        }

        let ExpressionKind::Binary { operator, lhs, rhs } = &value.kind else {
            return None;
        };

        if !same_place(target, lhs) || rhs.as_integer() != Some(1) {
            return None;
        }

        let operator = match operator {
            BinaryOperatorKind::Add => UnaryOperatorKind::PreIncrement,
            BinaryOperatorKind::Subtract => UnaryOperatorKind::PreDecrement,
            _ => return None,
        };

        let token = target.token;
        let ty = target.ty;

        Some(Expression {
            kind: ExpressionKind::Unary {
                operator,
                operand: Box::new(target.take()),
            },
            token,
            ty,
            is_lvalue: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::{Token, intern::InternedSymbol},
        index::Index,
        middle::scope::SymbolId,
    };

    fn variable(id: usize, ty: TypeId) -> Expression {
        Expression {
            kind: ExpressionKind::Identifier {
                name: InternedSymbol::new("x"),
                symbol: Some(SymbolId::new(id)),
            },
            token: Token::SYNTHESIZED,
            ty: Some(ty),
            is_lvalue: true,
        }
    }

    fn int(value: i64, ty: TypeId) -> Expression {
        Expression::literal(Literal::Integer(value), Token::SYNTHESIZED, ty)
    }

    fn binary(operator: BinaryOperatorKind, lhs: Expression, rhs: Expression, ty: TypeId) -> Expression {
        Expression::typed(
            ExpressionKind::Binary {
                operator,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            Token::SYNTHESIZED,
            ty,
        )
    }

    fn optimize(expression: Expression, types: &TypeArena) -> Expression {
        let mut statement = Statement::new(StatementKind::Return(Some(expression)), Token::SYNTHESIZED);
        while peephole(&mut statement, types) > 0 {}

        let StatementKind::Return(Some(expression)) = statement.kind else {
            panic!("return statements survive the peephole pass");
        };

        expression
    }

    #[test]
    fn multiplication_by_power_of_two_becomes_a_shift() {
        let types = TypeArena::default();
        let i32 = types.i32();

        let optimized = optimize(binary(BinaryOperatorKind::Multiply, variable(0, i32), int(8, i32), i32), &types);

        let ExpressionKind::Binary { operator, rhs, .. } = optimized.kind else {
            panic!("expected a shift");
        };
        assert_eq!(operator, BinaryOperatorKind::ShiftLeft);
        assert_eq!(rhs.as_integer(), Some(3));
    }

    #[test]
    fn unsigned_division_and_modulus_become_bit_operations() {
        let types = TypeArena::default();
        let u64 = types.u64();
        let i32 = types.i32();

        let divided = optimize(binary(BinaryOperatorKind::Divide, variable(0, u64), int(16, u64), u64), &types);
        assert!(matches!(
            divided.kind,
            ExpressionKind::Binary {
                operator: BinaryOperatorKind::ShiftRight,
                ..
            }
        ));

        let remainder = optimize(binary(BinaryOperatorKind::Modulus, variable(0, u64), int(16, u64), u64), &types);
        let ExpressionKind::Binary { operator, rhs, .. } = remainder.kind else {
            panic!("expected a mask");
        };
        assert_eq!(operator, BinaryOperatorKind::BitwiseAnd);
        assert_eq!(rhs.as_integer(), Some(15));

        // Signed division rounds toward zero and keeps the divide
        let signed = optimize(binary(BinaryOperatorKind::Divide, variable(0, i32), int(16, i32), i32), &types);
        assert!(matches!(
            signed.kind,
            ExpressionKind::Binary {
                operator: BinaryOperatorKind::Divide,
                ..
            }
        ));
    }

    #[test]
    fn identities_collapse() {
        let types = TypeArena::default();
        let i32 = types.i32();

        let plus_zero = optimize(binary(BinaryOperatorKind::Add, variable(0, i32), int(0, i32), i32), &types);
        assert!(matches!(plus_zero.kind, ExpressionKind::Identifier { .. }));

        let times_zero = optimize(binary(BinaryOperatorKind::Multiply, variable(0, i32), int(0, i32), i32), &types);
        assert_eq!(times_zero.as_integer(), Some(0));
    }

    #[test]
    fn self_increment_becomes_pre_increment() {
        let types = TypeArena::default();
        let i32 = types.i32();

        let assign = Expression::typed(
            ExpressionKind::Assign {
                target: Box::new(variable(0, i32)),
                value: Box::new(binary(BinaryOperatorKind::Add, variable(0, i32), int(1, i32), i32)),
            },
            Token::SYNTHESIZED,
            i32,
        );

        let optimized = optimize(assign, &types);
        assert!(matches!(
            optimized.kind,
            ExpressionKind::Unary {
                operator: UnaryOperatorKind::PreIncrement,
                ..
            }
        ));
    }

    #[test]
    fn negated_comparisons_flip_except_ordered_floats() {
        let types = TypeArena::default();
        let (i32, f64, bool) = (types.i32(), types.f64(), types.bool());

        let not = |comparison: Expression| {
            Expression::typed(
                ExpressionKind::Unary {
                    operator: UnaryOperatorKind::LogicalNot,
                    operand: Box::new(comparison),
                },
                Token::SYNTHESIZED,
                bool,
            )
        };

        let integer = optimize(
            not(binary(BinaryOperatorKind::LessThan, variable(0, i32), variable(1, i32), bool)),
            &types,
        );
        assert!(matches!(
            integer.kind,
            ExpressionKind::Binary {
                operator: BinaryOperatorKind::GreaterThanOrEqualTo,
                ..
            }
        ));

        let float = optimize(
            not(binary(BinaryOperatorKind::LessThan, variable(0, f64), variable(1, f64), bool)),
            &types,
        );
        assert!(matches!(
            float.kind,
            ExpressionKind::Unary {
                operator: UnaryOperatorKind::LogicalNot,
                ..
            }
        ));
    }

    #[test]
    fn literal_conditions_and_dead_expressions_disappear() {
        let types = TypeArena::default();
        let (i32, bool) = (types.i32(), types.bool());

        let pure = Statement::new(
            StatementKind::Expression(binary(BinaryOperatorKind::Add, variable(0, i32), int(2, i32), i32)),
            Token::SYNTHESIZED,
        );
        let dead_branch = Statement::new(
            StatementKind::If {
                condition: Expression::literal(Literal::Bool(false), Token::SYNTHESIZED, bool),
                then: Box::new(Statement::new(StatementKind::Break, Token::SYNTHESIZED)),
                otherwise: None,
            },
            Token::SYNTHESIZED,
        );
        let ret = Statement::new(StatementKind::Return(None), Token::SYNTHESIZED);

        let mut body = Statement::new(StatementKind::Sequence(vec![pure, dead_branch, ret]), Token::SYNTHESIZED);
        while peephole(&mut body, &types) > 0 {}

        let snapshot = body.clone();
        assert_eq!(peephole(&mut body, &types), 0);
        assert_eq!(body, snapshot);

        let StatementKind::Sequence(statements) = body.kind else {
            panic!("sequences stay sequences");
        };
        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0].kind, StatementKind::Return(None)));
    }
}
