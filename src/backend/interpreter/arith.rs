//! Type-directed arithmetic on raw 64-bit register contents.
//!
//! Operands narrower than 64 bits are masked (and sign extended when
//! signed) before the operation. Callers merge the result back into the
//! destination with [`merge`] so the bytes above the operand width survive.

use crate::middle::xil::{Opcode, OperandKind, OperandType};

use super::Fault;

pub fn mask(width: u8) -> u64 {
    match width {
        0 | 8.. => u64::MAX,
        width => (1 << (u32::from(width) * 8)) - 1,
    }
}

pub fn sign_extend(value: u64, width: u8) -> i64 {
    match width {
        0 | 8.. => value as i64,
        width => {
            let shift = 64 - u32::from(width) * 8;
            ((value << shift) as i64) >> shift
        }
    }
}

/// The canonical 64-bit form of a `ty` value
pub fn extend(value: u64, ty: OperandType) -> u64 {
    match ty.kind {
        OperandKind::Signed => sign_extend(value, ty.width) as u64,
        OperandKind::Unsigned | OperandKind::Float | OperandKind::Vector => value & mask(ty.width),
    }
}

/// Replaces the low `width` bytes of `previous` with those of `result`
pub fn merge(previous: u64, result: u64, width: u8) -> u64 {
    let mask = mask(width);

    (previous & !mask) | (result & mask)
}

pub fn to_float(value: u64, width: u8) -> f64 {
    if width == 4 {
        f64::from(f32::from_bits(value as u32))
    } else {
        f64::from_bits(value)
    }
}

pub fn from_float(value: f64, width: u8) -> u64 {
    if width == 4 {
        u64::from((value as f32).to_bits())
    } else {
        value.to_bits()
    }
}

pub fn binary(opcode: Opcode, ty: OperandType, lhs: u64, rhs: u64) -> Result<u64, Fault> {
    match ty.kind {
        OperandKind::Signed => signed(opcode, sign_extend(lhs, ty.width), sign_extend(rhs, ty.width)),
        OperandKind::Unsigned => unsigned(opcode, lhs & mask(ty.width), rhs & mask(ty.width)),
        OperandKind::Float => {
            float(opcode, to_float(lhs, ty.width), to_float(rhs, ty.width)).map(|value| from_float(value, ty.width))
        }
        OperandKind::Vector => Err(Fault::Unsupported("vector operands")),
    }
}

fn shift_amount(rhs: u64) -> u32 {
    (rhs & 63) as u32
}

fn signed(opcode: Opcode, lhs: i64, rhs: i64) -> Result<u64, Fault> {
    let result = match opcode {
        Opcode::Add => lhs.wrapping_add(rhs),
        Opcode::Subtract => lhs.wrapping_sub(rhs),
        Opcode::Multiply => lhs.wrapping_mul(rhs),
        Opcode::Divide if rhs == 0 => return Err(Fault::DivisionByZero),
        Opcode::Divide => lhs.wrapping_div(rhs),
        Opcode::Modulus if rhs == 0 => return Err(Fault::DivisionByZero),
        Opcode::Modulus => lhs.wrapping_rem(rhs),
        Opcode::ShiftLeft => lhs.wrapping_shl(shift_amount(rhs as u64)),
        Opcode::ShiftRight => lhs.wrapping_shr(shift_amount(rhs as u64)),
        Opcode::BitwiseAnd => lhs & rhs,
        Opcode::BitwiseOr => lhs | rhs,
        Opcode::BitwiseXor => lhs ^ rhs,
        _ => return Err(Fault::MalformedInstruction { opcode }),
    };

    Ok(result as u64)
}

fn unsigned(opcode: Opcode, lhs: u64, rhs: u64) -> Result<u64, Fault> {
    let result = match opcode {
        Opcode::Add => lhs.wrapping_add(rhs),
        Opcode::Subtract => lhs.wrapping_sub(rhs),
        Opcode::Multiply => lhs.wrapping_mul(rhs),
        Opcode::Divide => lhs.checked_div(rhs).ok_or(Fault::DivisionByZero)?,
        Opcode::Modulus => lhs.checked_rem(rhs).ok_or(Fault::DivisionByZero)?,
        Opcode::ShiftLeft => lhs.wrapping_shl(shift_amount(rhs)),
        Opcode::ShiftRight => lhs.wrapping_shr(shift_amount(rhs)),
        Opcode::BitwiseAnd => lhs & rhs,
        Opcode::BitwiseOr => lhs | rhs,
        Opcode::BitwiseXor => lhs ^ rhs,
        _ => return Err(Fault::MalformedInstruction { opcode }),
    };

    Ok(result)
}

fn float(opcode: Opcode, lhs: f64, rhs: f64) -> Result<f64, Fault> {
    match opcode {
        Opcode::Add => Ok(lhs + rhs),
        Opcode::Subtract => Ok(lhs - rhs),
        Opcode::Multiply => Ok(lhs * rhs),
        Opcode::Divide => Ok(lhs / rhs),
        Opcode::Modulus => Ok(lhs % rhs),
        _ => Err(Fault::MalformedInstruction { opcode }),
    }
}

pub fn unary(opcode: Opcode, ty: OperandType, operand: u64) -> Result<u64, Fault> {
    match (opcode, ty.kind) {
        (_, OperandKind::Vector) => Err(Fault::Unsupported("vector operands")),
        (Opcode::Negate, OperandKind::Float) => Ok(from_float(-to_float(operand, ty.width), ty.width)),
        (Opcode::Negate, _) => Ok(operand.wrapping_neg()),
        (Opcode::BitwiseNot, OperandKind::Signed | OperandKind::Unsigned) => Ok(!operand),
        _ => Err(Fault::MalformedInstruction { opcode }),
    }
}

pub fn is_zero(ty: OperandType, value: u64) -> bool {
    match ty.kind {
        OperandKind::Float => to_float(value, ty.width) == 0.0,
        OperandKind::Signed | OperandKind::Unsigned | OperandKind::Vector => value & mask(ty.width) == 0,
    }
}

pub fn compare(opcode: Opcode, ty: OperandType, lhs: u64, rhs: u64) -> Result<bool, Fault> {
    use std::cmp::Ordering;

    let ordering = match ty.kind {
        OperandKind::Signed => Some(sign_extend(lhs, ty.width).cmp(&sign_extend(rhs, ty.width))),
        OperandKind::Unsigned => Some((lhs & mask(ty.width)).cmp(&(rhs & mask(ty.width)))),
        OperandKind::Float => to_float(lhs, ty.width).partial_cmp(&to_float(rhs, ty.width)),
        OperandKind::Vector => return Err(Fault::Unsupported("vector operands")),
    };

    // Unordered floats compare unequal to everything
    let Some(ordering) = ordering else {
        return Ok(opcode == Opcode::NotEqual);
    };

    Ok(match opcode {
        Opcode::Equal => ordering == Ordering::Equal,
        Opcode::NotEqual => ordering != Ordering::Equal,
        Opcode::LessThan => ordering == Ordering::Less,
        Opcode::LessThanOrEqual => ordering != Ordering::Greater,
        Opcode::GreaterThan => ordering == Ordering::Greater,
        Opcode::GreaterThanOrEqual => ordering != Ordering::Less,
        _ => return Err(Fault::MalformedInstruction { opcode }),
    })
}

/// Converts a `from` value into the canonical form of `to`
pub fn convert(value: u64, from: OperandType, to: OperandType) -> Result<u64, Fault> {
    if from.kind == OperandKind::Vector || to.kind == OperandKind::Vector {
        return Err(Fault::Unsupported("vector operands"));
    }

    let converted = match (from.kind, to.kind) {
        (OperandKind::Float, OperandKind::Float) => from_float(to_float(value, from.width), to.width),
        (OperandKind::Float, OperandKind::Signed) => to_float(value, from.width) as i64 as u64,
        (OperandKind::Float, _) => to_float(value, from.width) as u64,
        (OperandKind::Signed, OperandKind::Float) => from_float(sign_extend(value, from.width) as f64, to.width),
        (_, OperandKind::Float) => from_float((value & mask(from.width)) as f64, to.width),
        (OperandKind::Signed, _) => sign_extend(value, from.width) as u64,
        _ => value & mask(from.width),
    };

    Ok(extend(converted, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    const I8: OperandType = OperandType::signed(1);
    const I32: OperandType = OperandType::signed(4);
    const U8: OperandType = OperandType::unsigned(1);
    const F32: OperandType = OperandType::float(4);
    const F64: OperandType = OperandType::float(8);

    #[test]
    fn narrow_operations_ignore_high_bits() {
        let dirty = 0xDEAD_BEEF_0000_0005;
        let result = binary(Opcode::Add, I32, dirty, 7).unwrap();

        assert_eq!(merge(dirty, result, 4), 0xDEAD_BEEF_0000_000C);
    }

    #[test]
    fn signed_and_unsigned_division_differ() {
        let minus_eight = (-8i64) as u64;

        assert_eq!(sign_extend(binary(Opcode::Divide, I32, minus_eight, 2).unwrap(), 4), -4);
        assert_eq!(binary(Opcode::ShiftRight, I8, 0x80, 1).unwrap() & mask(1), 0xC0);
        assert_eq!(binary(Opcode::ShiftRight, U8, 0x80, 1).unwrap(), 0x40);
        assert_eq!(binary(Opcode::Divide, U8, 1, 0), Err(Fault::DivisionByZero));
    }

    #[test]
    fn comparisons_respect_signedness() {
        let minus_one = u64::MAX;

        assert_eq!(compare(Opcode::LessThan, I32, minus_one, 1), Ok(true));
        assert_eq!(compare(Opcode::LessThan, U8, minus_one, 1), Ok(false));
        assert_eq!(compare(Opcode::Equal, F64, f64::NAN.to_bits(), f64::NAN.to_bits()), Ok(false));
    }

    #[test]
    fn conversions_extend_and_round() {
        assert_eq!(convert(0xFF, I8, I32).map(|value| sign_extend(value, 4)), Ok(-1));
        assert_eq!(convert(0xFF, U8, I32), Ok(255));
        assert_eq!(convert(from_float(2.75, 8), F64, I32), Ok(2));
        assert_eq!(convert(from_float(1.5, 8), F64, F32).map(|bits| to_float(bits, 4)), Ok(1.5));
        assert_eq!(convert((-3i64) as u64, I32, F64).map(|bits| to_float(bits, 8)), Ok(-3.0));
    }
}
