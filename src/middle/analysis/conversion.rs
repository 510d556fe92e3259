//! Implicit conversions and the "most information" operand ranking

use crate::{
    frontend::ast::{Expression, ExpressionKind},
    middle::ty::{TypeArena, TypeId, TypeKind},
};

/// Whether `source` may be converted to `target` without an explicit cast.
/// Identical types need no conversion and are not covered here.
pub fn conversion_available(types: &TypeArena, target: TypeId, source: TypeId) -> bool {
    if types.is_void(target) {
        return true;
    }

    if types.is_bool(target) {
        return types.is_scalar(source);
    }

    if types.is_numeric(target) && types.is_numeric(source) {
        return true;
    }

    match (types.kind(target), types.kind(source)) {
        (TypeKind::Pointer(_), TypeKind::Pointer(_)) => types.is_void_pointer(source),
        (
            TypeKind::Array {
                element: target_element,
                length: target_length,
            },
            TypeKind::Array {
                element: source_element,
                length: source_length,
            },
        ) => source_length > target_length && types.types_equal(*target_element, *source_element),
        _ => false,
    }
}

/// Returns `source` untouched when the types already match, wrapped in an
/// implicit cast when a conversion is available, or handed back as the error
/// so the caller can report a mismatch.
pub fn implicit_conversion(types: &TypeArena, target: TypeId, source: Expression) -> Result<Expression, Expression> {
    let Some(source_type) = source.ty else {
        return Err(source);
    };

    // Reading a value drops its qualifiers
    if types.types_equal(target, types.unqualified(source_type)) {
        return Ok(source);
    }

    if !conversion_available(types, target, source_type) {
        return Err(source);
    }

    let token = source.token;

    Ok(Expression::typed(
        ExpressionKind::Cast {
            expression: Box::new(source),
            target,
            is_implicit: true,
        },
        token,
        target,
    ))
}

/// Ranks how much information a value of `ty` carries. Wider types, pointers,
/// arrays and floats rank higher; unsignedness costs a point so a signed type
/// of the same width wins.
pub fn information_score(types: &TypeArena, ty: TypeId) -> i64 {
    let mut score = types.size_of(ty) as i64 * 4;

    if types.is_pointer(ty) {
        score += 64;
    }

    if types.is_array(ty) {
        score += 64;
    }

    if types.is_float(ty) {
        score += 40;
    }

    if types.is_unsigned(ty) {
        score -= 1;
    }

    score
}

/// Picks the operand type both sides of a binary operator convert to. Ties
/// go to the left operand.
pub fn most_information(types: &TypeArena, lhs: TypeId, rhs: TypeId) -> TypeId {
    if information_score(types, rhs) > information_score(types, lhs) {
        rhs
    } else {
        lhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{Token, ast::Literal};

    fn typed_literal(ty: TypeId, literal: Literal) -> Expression {
        Expression::literal(literal, Token::SYNTHESIZED, ty)
    }

    #[test]
    fn numeric_conversion_is_offered_both_ways() {
        let types = TypeArena::default();

        let widened = implicit_conversion(&types, types.f64(), typed_literal(types.i32(), Literal::Integer(1)))
            .expect("i32 -> f64");
        assert_eq!(widened.ty, Some(types.f64()));
        assert!(matches!(widened.kind, ExpressionKind::Cast { is_implicit: true, .. }));

        let narrowed = implicit_conversion(&types, types.i32(), typed_literal(types.f64(), Literal::Float(1.5)))
            .expect("f64 -> i32");
        assert_eq!(narrowed.ty, Some(types.i32()));
    }

    #[test]
    fn pointer_decay_only_from_void() {
        let mut types = TypeArena::default();
        let void_pointer = types.pointer_to(types.void());
        let int_pointer = types.pointer_to(types.i32());

        assert!(conversion_available(&types, int_pointer, void_pointer));
        assert!(!conversion_available(&types, void_pointer, int_pointer));

        let source = typed_literal(int_pointer, Literal::Null);
        assert!(implicit_conversion(&types, void_pointer, source).is_err());
    }

    #[test]
    fn arrays_may_only_shrink() {
        let mut types = TypeArena::default();
        let small = types.array_of(types.i8(), 4);
        let large = types.array_of(types.i8(), 8);

        assert!(conversion_available(&types, small, large));
        assert!(!conversion_available(&types, large, small));
    }

    #[test]
    fn identical_types_pass_through_unchanged() {
        let types = TypeArena::default();
        let source = typed_literal(types.i32(), Literal::Integer(7));

        assert_eq!(implicit_conversion(&types, types.i32(), source.clone()), Ok(source));
    }

    #[test]
    fn qualifiers_are_dropped_when_reading() {
        let mut types = TypeArena::default();
        let const_i32 = types.immutable(types.i32());
        let source = typed_literal(const_i32, Literal::Integer(7));

        assert_eq!(implicit_conversion(&types, types.i32(), source.clone()), Ok(source));
    }

    #[test]
    fn wider_and_floating_types_win() {
        let types = TypeArena::default();

        assert_eq!(most_information(&types, types.i32(), types.i64()), types.i64());
        assert_eq!(most_information(&types, types.i64(), types.f64()), types.f64());
        assert_eq!(most_information(&types, types.i32(), types.i32()), types.i32());
        assert_eq!(most_information(&types, types.u64(), types.i64()), types.i64());
    }
}
