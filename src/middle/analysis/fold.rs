//! Constant folding over typed literals.
//!
//! Integer literals are stored as `i64`, sign- or zero-extended from their
//! type. Every operation is carried out at the type's native width with
//! wrapping semantics, then extended back.

use thiserror::Error;

use crate::{
    frontend::ast::{BinaryOperatorKind, Expression, ExpressionKind, Literal, UnaryOperatorKind},
    middle::ty::{TypeArena, TypeId, TypeKind},
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FoldError {
    #[error("division by constant zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Integer { bits: u32, signed: bool },
    Float { bits: u32 },
}

fn scalar(types: &TypeArena, ty: TypeId) -> Option<Scalar> {
    let ty = types.underlying(ty);

    match types.kind(ty) {
        TypeKind::Bool => Some(Scalar::Integer {
            bits: 8,
            signed: false,
        }),
        TypeKind::Integer(kind) => Some(Scalar::Integer {
            bits: kind.size() as u32 * 8,
            signed: true,
        }),
        TypeKind::UnsignedInteger(kind) => Some(Scalar::Integer {
            bits: kind.size() as u32 * 8,
            signed: false,
        }),
        TypeKind::Float(kind) => Some(Scalar::Float {
            bits: kind.size() as u32 * 8,
        }),
        TypeKind::Void
        | TypeKind::Pointer(_)
        | TypeKind::Array { .. }
        | TypeKind::Function { .. }
        | TypeKind::Struct { .. }
        | TypeKind::Enum { .. }
        | TypeKind::Placeholder { .. } => None,
    }
}

/// Truncates `value` to the integer width of `ty` and extends it back
pub fn normalize_integer(types: &TypeArena, ty: TypeId, value: i64) -> i64 {
    match scalar(types, ty) {
        Some(Scalar::Integer { bits: 8, signed: true }) => value as i8 as i64,
        Some(Scalar::Integer { bits: 16, signed: true }) => value as i16 as i64,
        Some(Scalar::Integer { bits: 32, signed: true }) => value as i32 as i64,
        Some(Scalar::Integer { bits: 8, signed: false }) => value as u8 as i64,
        Some(Scalar::Integer { bits: 16, signed: false }) => value as u16 as i64,
        Some(Scalar::Integer { bits: 32, signed: false }) => value as u32 as i64,
        _ => value,
    }
}

fn integer_of(literal: &Literal) -> Option<i64> {
    match literal {
        Literal::Integer(value) => Some(*value),
        Literal::Bool(value) => Some(*value as i64),
        Literal::Float(value) => Some(*value as i64),
        Literal::Null => Some(0),
        Literal::String(_) => None,
    }
}

fn float_of(literal: &Literal) -> Option<f64> {
    match literal {
        Literal::Float(value) => Some(*value),
        Literal::Integer(value) => Some(*value as f64),
        Literal::Bool(value) => Some(*value as i64 as f64),
        Literal::String(_) | Literal::Null => None,
    }
}

macro_rules! fold_integer_binary {
    ($t:ty, $operator:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a as $t, $b as $t);
        let shift = $b as u32;

        let result = match $operator {
            BinaryOperatorKind::Add => Literal::Integer(a.wrapping_add(b) as i64),
            BinaryOperatorKind::Subtract => Literal::Integer(a.wrapping_sub(b) as i64),
            BinaryOperatorKind::Multiply => Literal::Integer(a.wrapping_mul(b) as i64),
            BinaryOperatorKind::Divide if b == 0 => return Err(FoldError::DivisionByZero),
            BinaryOperatorKind::Modulus if b == 0 => return Err(FoldError::DivisionByZero),
            BinaryOperatorKind::Divide => Literal::Integer(a.wrapping_div(b) as i64),
            BinaryOperatorKind::Modulus => Literal::Integer(a.wrapping_rem(b) as i64),
            BinaryOperatorKind::BitwiseAnd => Literal::Integer((a & b) as i64),
            BinaryOperatorKind::BitwiseOr => Literal::Integer((a | b) as i64),
            BinaryOperatorKind::BitwiseXor => Literal::Integer((a ^ b) as i64),
            BinaryOperatorKind::ShiftLeft => Literal::Integer(a.wrapping_shl(shift) as i64),
            BinaryOperatorKind::ShiftRight => Literal::Integer(a.wrapping_shr(shift) as i64),
            BinaryOperatorKind::Equals => Literal::Bool(a == b),
            BinaryOperatorKind::NotEquals => Literal::Bool(a != b),
            BinaryOperatorKind::LessThan => Literal::Bool(a < b),
            BinaryOperatorKind::LessThanOrEqualTo => Literal::Bool(a <= b),
            BinaryOperatorKind::GreaterThan => Literal::Bool(a > b),
            BinaryOperatorKind::GreaterThanOrEqualTo => Literal::Bool(a >= b),
            BinaryOperatorKind::LogicalAnd => Literal::Bool(a != 0 && b != 0),
            BinaryOperatorKind::LogicalOr => Literal::Bool(a != 0 || b != 0),
        };

        Ok(Some(result))
    }};
}

macro_rules! fold_float_binary {
    ($t:ty, $operator:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a as $t, $b as $t);

        let result = match $operator {
            BinaryOperatorKind::Add => Literal::Float((a + b) as f64),
            BinaryOperatorKind::Subtract => Literal::Float((a - b) as f64),
            BinaryOperatorKind::Multiply => Literal::Float((a * b) as f64),
            BinaryOperatorKind::Divide => Literal::Float((a / b) as f64),
            BinaryOperatorKind::Modulus => Literal::Float((a % b) as f64),
            BinaryOperatorKind::Equals => Literal::Bool(a == b),
            BinaryOperatorKind::NotEquals => Literal::Bool(a != b),
            BinaryOperatorKind::LessThan => Literal::Bool(a < b),
            BinaryOperatorKind::LessThanOrEqualTo => Literal::Bool(a <= b),
            BinaryOperatorKind::GreaterThan => Literal::Bool(a > b),
            BinaryOperatorKind::GreaterThanOrEqualTo => Literal::Bool(a >= b),
            BinaryOperatorKind::LogicalAnd => Literal::Bool(a != 0.0 && b != 0.0),
            BinaryOperatorKind::LogicalOr => Literal::Bool(a != 0.0 || b != 0.0),
            BinaryOperatorKind::BitwiseAnd
            | BinaryOperatorKind::BitwiseOr
            | BinaryOperatorKind::BitwiseXor
            | BinaryOperatorKind::ShiftLeft
            | BinaryOperatorKind::ShiftRight => return Ok(None),
        };

        Ok(Some(result))
    }};
}

/// Folds `lhs operator rhs` where both operands have `operand_type`
pub fn fold_binary(
    types: &TypeArena,
    operator: BinaryOperatorKind,
    operand_type: TypeId,
    lhs: &Literal,
    rhs: &Literal,
) -> Result<Option<Literal>, FoldError> {
    match scalar(types, operand_type) {
        Some(Scalar::Integer { bits, signed }) => {
            let (Some(a), Some(b)) = (integer_of(lhs), integer_of(rhs)) else {
                return Ok(None);
            };

            match (bits, signed) {
                (8, true) => fold_integer_binary!(i8, operator, a, b),
                (16, true) => fold_integer_binary!(i16, operator, a, b),
                (32, true) => fold_integer_binary!(i32, operator, a, b),
                (8, false) => fold_integer_binary!(u8, operator, a, b),
                (16, false) => fold_integer_binary!(u16, operator, a, b),
                (32, false) => fold_integer_binary!(u32, operator, a, b),
                (_, true) => fold_integer_binary!(i64, operator, a, b),
                (_, false) => fold_integer_binary!(u64, operator, a, b),
            }
        }
        Some(Scalar::Float { bits }) => {
            let (Some(a), Some(b)) = (float_of(lhs), float_of(rhs)) else {
                return Ok(None);
            };

            if bits == 32 {
                fold_float_binary!(f32, operator, a, b)
            } else {
                fold_float_binary!(f64, operator, a, b)
            }
        }
        None => Ok(None),
    }
}

pub fn fold_unary(types: &TypeArena, operator: UnaryOperatorKind, ty: TypeId, operand: &Literal) -> Option<Literal> {
    match (operator, scalar(types, ty)?) {
        (UnaryOperatorKind::LogicalNot, _) => {
            let value = match operand {
                Literal::Float(value) => *value != 0.0,
                other => integer_of(other)? != 0,
            };

            Some(Literal::Bool(!value))
        }
        (UnaryOperatorKind::Negate, Scalar::Integer { .. }) => Some(Literal::Integer(normalize_integer(
            types,
            ty,
            integer_of(operand)?.wrapping_neg(),
        ))),
        (UnaryOperatorKind::BitwiseNot, Scalar::Integer { .. }) => {
            Some(Literal::Integer(normalize_integer(types, ty, !integer_of(operand)?)))
        }
        (UnaryOperatorKind::Negate, Scalar::Float { bits: 32 }) => Some(Literal::Float(-(float_of(operand)? as f32) as f64)),
        (UnaryOperatorKind::Negate, Scalar::Float { .. }) => Some(Literal::Float(-float_of(operand)?)),
        _ => None,
    }
}

/// Converts a literal of `source` type to `target`
pub fn fold_cast(types: &TypeArena, literal: &Literal, source: TypeId, target: TypeId) -> Option<Literal> {
    if types.is_void(target) || matches!(literal, Literal::String(_)) {
        return None;
    }

    if types.is_bool(target) {
        let value = match literal {
            Literal::Float(value) => *value != 0.0,
            other => integer_of(other)? != 0,
        };

        return Some(Literal::Bool(value));
    }

    if types.is_pointer(target) {
        return match literal {
            Literal::Null => Some(Literal::Null),
            Literal::Integer(0) => Some(Literal::Null),
            Literal::Integer(value) => Some(Literal::Integer(*value)),
            Literal::Float(_) | Literal::Bool(_) | Literal::String(_) => None,
        };
    }

    match scalar(types, target)? {
        Scalar::Integer { signed, .. } => {
            let value = match (literal, scalar(types, source)) {
                (Literal::Float(value), _) if signed => *value as i64,
                (Literal::Float(value), _) => *value as u64 as i64,
                (other, _) => integer_of(other)?,
            };

            Some(Literal::Integer(normalize_integer(types, target, value)))
        }
        Scalar::Float { bits } => {
            let value = match (literal, scalar(types, source)) {
                (Literal::Integer(value), Some(Scalar::Integer { bits: 64, signed: false })) => *value as u64 as f64,
                (other, _) => float_of(other)?,
            };

            Some(Literal::Float(if bits == 32 { value as f32 as f64 } else { value }))
        }
    }
}

/// Replaces `expression` with a literal when all of its operands are
/// literals. Returns whether anything changed; folding a literal is a no-op.
pub fn fold_expression(types: &TypeArena, expression: &mut Expression) -> Result<bool, FoldError> {
    let Some(ty) = expression.ty else {
        return Ok(false);
    };

    let folded = match &expression.kind {
        ExpressionKind::Binary { operator, lhs, rhs } => {
            let (Some(a), Some(b), Some(operand_type)) = (lhs.as_literal(), rhs.as_literal(), lhs.ty) else {
                return Ok(false);
            };

            if types.is_pointer(operand_type) {
                return Ok(false);
            }

            fold_binary(types, *operator, operand_type, a, b)?
        }
        ExpressionKind::Unary { operator, operand } => {
            let (Some(literal), Some(operand_type)) = (operand.as_literal(), operand.ty) else {
                return Ok(false);
            };

            fold_unary(types, *operator, operand_type, literal)
        }
        ExpressionKind::Ternary {
            condition,
            then,
            otherwise,
        } => {
            let (Some(condition), Some(then), Some(otherwise)) =
                (condition.as_literal(), then.as_literal(), otherwise.as_literal())
            else {
                return Ok(false);
            };

            let taken = match condition {
                Literal::Float(value) => *value != 0.0,
                other => integer_of(other).is_some_and(|value| value != 0),
            };

            Some(if taken { *then } else { *otherwise })
        }
        ExpressionKind::Cast {
            expression: inner,
            target,
            ..
        } => {
            let (Some(literal), Some(source)) = (inner.as_literal(), inner.ty) else {
                return Ok(false);
            };

            fold_cast(types, literal, source, *target)
        }
        ExpressionKind::Literal(_)
        | ExpressionKind::Identifier { .. }
        | ExpressionKind::Member { .. }
        | ExpressionKind::ScopeResolution { .. }
        | ExpressionKind::Call { .. }
        | ExpressionKind::Subscript { .. }
        | ExpressionKind::CollectionInit(_)
        | ExpressionKind::Assign { .. }
        | ExpressionKind::CompoundAssign { .. }
        | ExpressionKind::VariableInit { .. }
        | ExpressionKind::SizeOf(_) => None,
    };

    let Some(mut literal) = folded else {
        return Ok(false);
    };

    // Results of arithmetic on booleans stay booleans
    if types.is_bool(ty) {
        if let Some(value) = integer_of(&literal) {
            literal = Literal::Bool(value != 0);
        }
    }

    *expression = Expression::literal(literal, expression.token, ty);

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Token;

    fn literal(types: &TypeArena, value: i64) -> Box<Expression> {
        Box::new(Expression::literal(Literal::Integer(value), Token::SYNTHESIZED, types.i32()))
    }

    fn binary(types: &TypeArena, operator: BinaryOperatorKind, lhs: Box<Expression>, rhs: Box<Expression>) -> Expression {
        Expression::typed(
            ExpressionKind::Binary { operator, lhs, rhs },
            Token::SYNTHESIZED,
            types.i32(),
        )
    }

    #[test]
    fn nested_arithmetic_folds_to_one_literal() {
        let types = TypeArena::default();

        let mut sum = binary(&types, BinaryOperatorKind::Add, literal(&types, 2), literal(&types, 3));
        assert_eq!(fold_expression(&types, &mut sum), Ok(true));

        let mut product = binary(&types, BinaryOperatorKind::Multiply, Box::new(sum), literal(&types, 4));
        assert_eq!(fold_expression(&types, &mut product), Ok(true));

        assert_eq!(product.kind, ExpressionKind::Literal(Literal::Integer(20)));
        assert_eq!(product.ty, Some(types.i32()));

        let before = product.clone();
        assert_eq!(fold_expression(&types, &mut product), Ok(false));
        assert_eq!(product, before);
    }

    #[test]
    fn arithmetic_wraps_at_the_declared_width() {
        let types = TypeArena::default();

        assert_eq!(
            fold_binary(&types, BinaryOperatorKind::Add, types.i32(), &Literal::Integer(i32::MAX as i64), &Literal::Integer(1)),
            Ok(Some(Literal::Integer(i32::MIN as i64)))
        );
        assert_eq!(
            fold_binary(&types, BinaryOperatorKind::ShiftRight, types.i32(), &Literal::Integer(-8), &Literal::Integer(1)),
            Ok(Some(Literal::Integer(-4)))
        );
        assert_eq!(
            fold_binary(
                &types,
                BinaryOperatorKind::ShiftRight,
                types.primitive(crate::middle::primitive::PrimitiveKind::U8),
                &Literal::Integer(0xf0),
                &Literal::Integer(4)
            ),
            Ok(Some(Literal::Integer(0x0f)))
        );
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let types = TypeArena::default();

        assert_eq!(
            fold_binary(&types, BinaryOperatorKind::Divide, types.i64(), &Literal::Integer(1), &Literal::Integer(0)),
            Err(FoldError::DivisionByZero)
        );
    }

    #[test]
    fn comparisons_and_casts_fold() {
        let types = TypeArena::default();

        assert_eq!(
            fold_binary(&types, BinaryOperatorKind::LessThan, types.f64(), &Literal::Float(1.0), &Literal::Float(2.0)),
            Ok(Some(Literal::Bool(true)))
        );
        assert_eq!(
            fold_cast(&types, &Literal::Float(-2.7), types.f64(), types.i32()),
            Some(Literal::Integer(-2))
        );
        assert_eq!(
            fold_cast(&types, &Literal::Integer(300), types.i32(), types.i8()),
            Some(Literal::Integer(44))
        );
        assert_eq!(
            fold_unary(&types, UnaryOperatorKind::Negate, types.i32(), &Literal::Integer(5)),
            Some(Literal::Integer(-5))
        );
    }
}
