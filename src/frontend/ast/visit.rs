//! Trait definition for a read-only tree visitor which walks statements and
//! expressions in DFS order

use super::{Expression, ExpressionKind, Statement, StatementKind};

pub trait Visitor<'ast>: Sized {
    fn visit_statement(&mut self, statement: &'ast Statement) {
        walk_statement(self, statement)
    }

    fn visit_expression(&mut self, expression: &'ast Expression) {
        walk_expression(self, expression)
    }
}

pub fn walk_statement<'a>(visitor: &mut impl Visitor<'a>, statement: &'a Statement) {
    match &statement.kind {
        StatementKind::Expression(expression)
        | StatementKind::ComputedGoto(expression)
        | StatementKind::Case(expression) => visitor.visit_expression(expression),
        StatementKind::Compound { statements, .. } | StatementKind::Sequence(statements) => {
            for statement in statements {
                visitor.visit_statement(statement);
            }
        }
        StatementKind::If {
            condition,
            then,
            otherwise,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_statement(then);

            if let Some(otherwise) = otherwise {
                visitor.visit_statement(otherwise);
            }
        }
        StatementKind::While { condition, body } | StatementKind::DoWhile { body, condition } => {
            visitor.visit_expression(condition);
            visitor.visit_statement(body);
        }
        StatementKind::For {
            initializer,
            condition,
            step,
            body,
        } => {
            if let Some(initializer) = initializer {
                visitor.visit_statement(initializer);
            }

            if let Some(condition) = condition {
                visitor.visit_expression(condition);
            }

            if let Some(step) = step {
                visitor.visit_expression(step);
            }

            visitor.visit_statement(body);
        }
        StatementKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expression(value);
            }
        }
        StatementKind::Switch(switch) => {
            visitor.visit_expression(&switch.value);
            visitor.visit_statement(&switch.body);
        }
        StatementKind::Assert { condition, .. } => visitor.visit_expression(condition),
        StatementKind::Finally(body) => visitor.visit_statement(body),
        StatementKind::Break
        | StatementKind::Continue
        | StatementKind::Goto(_)
        | StatementKind::Label(_)
        | StatementKind::Default
        | StatementKind::InlineAsm(_)
        | StatementKind::Empty => {}
    }
}

pub fn walk_expression<'a>(visitor: &mut impl Visitor<'a>, expression: &'a Expression) {
    match &expression.kind {
        ExpressionKind::Literal(_)
        | ExpressionKind::Identifier { .. }
        | ExpressionKind::ScopeResolution { .. }
        | ExpressionKind::SizeOf(_) => {}
        ExpressionKind::Binary { lhs, rhs, .. } => {
            visitor.visit_expression(lhs);
            visitor.visit_expression(rhs);
        }
        ExpressionKind::Unary { operand, .. } => visitor.visit_expression(operand),
        ExpressionKind::Ternary {
            condition,
            then,
            otherwise,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_expression(then);
            visitor.visit_expression(otherwise);
        }
        ExpressionKind::Member { object, .. } => visitor.visit_expression(object),
        ExpressionKind::Call { arguments, .. } | ExpressionKind::CollectionInit(arguments) => {
            for argument in arguments {
                visitor.visit_expression(argument);
            }
        }
        ExpressionKind::Subscript { base, index } => {
            visitor.visit_expression(base);
            visitor.visit_expression(index);
        }
        ExpressionKind::Cast { expression, .. } => visitor.visit_expression(expression),
        ExpressionKind::Assign { target, value }
        | ExpressionKind::CompoundAssign { target, value, .. } => {
            visitor.visit_expression(target);
            visitor.visit_expression(value);
        }
        ExpressionKind::VariableInit { initializer, .. } => {
            if let Some(initializer) = initializer {
                visitor.visit_expression(initializer);
            }
        }
    }
}

/// Whether evaluating the expression can be observed: assignments,
/// increments and decrements, declarations and calls
pub fn has_side_effects(expression: &Expression) -> bool {
    struct SideEffects(bool);

    impl<'a> Visitor<'a> for SideEffects {
        fn visit_expression(&mut self, expression: &'a Expression) {
            match &expression.kind {
                ExpressionKind::Assign { .. }
                | ExpressionKind::CompoundAssign { .. }
                | ExpressionKind::VariableInit { .. }
                | ExpressionKind::Call { .. } => self.0 = true,
                ExpressionKind::Unary { operator, .. } if operator.is_increment_or_decrement() => {
                    self.0 = true
                }
                _ => walk_expression(self, expression),
            }
        }
    }

    let mut visitor = SideEffects(false);
    visitor.visit_expression(expression);
    visitor.0
}

/// The direct subexpressions of `expression` in evaluation order. Rewriting
/// passes recurse through this instead of a mutable visitor.
pub fn children_mut(expression: &mut Expression) -> Vec<&mut Expression> {
    match &mut expression.kind {
        ExpressionKind::Literal(_)
        | ExpressionKind::Identifier { .. }
        | ExpressionKind::ScopeResolution { .. }
        | ExpressionKind::SizeOf(_) => vec![],
        ExpressionKind::Binary { lhs, rhs, .. } => vec![lhs.as_mut(), rhs.as_mut()],
        ExpressionKind::Unary { operand, .. } => vec![operand.as_mut()],
        ExpressionKind::Ternary {
            condition,
            then,
            otherwise,
        } => vec![condition.as_mut(), then.as_mut(), otherwise.as_mut()],
        ExpressionKind::Member { object, .. } => vec![object.as_mut()],
        ExpressionKind::Call { arguments, .. } | ExpressionKind::CollectionInit(arguments) => {
            arguments.iter_mut().collect()
        }
        ExpressionKind::Subscript { base, index } => vec![base.as_mut(), index.as_mut()],
        ExpressionKind::Cast { expression, .. } => vec![expression.as_mut()],
        ExpressionKind::Assign { target, value }
        | ExpressionKind::CompoundAssign { target, value, .. } => vec![target.as_mut(), value.as_mut()],
        ExpressionKind::VariableInit { initializer, .. } => initializer.iter_mut().map(|i| i.as_mut()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::{Token, ast::{BinaryOperatorKind, Literal, UnaryOperatorKind}, intern::InternedSymbol},
    };

    fn ident(name: &str) -> Expression {
        Expression::new(
            ExpressionKind::Identifier {
                name: InternedSymbol::new(name),
                symbol: None,
            },
            Token::SYNTHESIZED,
        )
    }

    #[test]
    fn pure_arithmetic_has_no_side_effects() {
        let expression = Expression::new(
            ExpressionKind::Binary {
                operator: BinaryOperatorKind::Add,
                lhs: Box::new(ident("a")),
                rhs: Box::new(Expression::new(
                    ExpressionKind::Literal(Literal::Integer(1)),
                    Token::SYNTHESIZED,
                )),
            },
            Token::SYNTHESIZED,
        );

        assert!(!has_side_effects(&expression));
    }

    #[test]
    fn nested_increment_taints_the_expression() {
        let increment = Expression::new(
            ExpressionKind::Unary {
                operator: UnaryOperatorKind::PostIncrement,
                operand: Box::new(ident("i")),
            },
            Token::SYNTHESIZED,
        );
        let expression = Expression::new(
            ExpressionKind::Binary {
                operator: BinaryOperatorKind::Multiply,
                lhs: Box::new(ident("a")),
                rhs: Box::new(increment),
            },
            Token::SYNTHESIZED,
        );

        assert!(has_side_effects(&expression));
    }
}
