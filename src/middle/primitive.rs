//! Built-in scalar kinds and their widths

use strum::{Display, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PrimitiveKind {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntKind {
    I8,
    I16,
    I32,
    I64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UIntKind {
    U8,
    U16,
    U32,
    U64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FloatKind {
    F32,
    F64,
}

impl IntKind {
    pub fn size(self) -> u64 {
        self.primitive().size()
    }

    pub fn primitive(self) -> PrimitiveKind {
        match self {
            IntKind::I8 => PrimitiveKind::I8,
            IntKind::I16 => PrimitiveKind::I16,
            IntKind::I32 => PrimitiveKind::I32,
            IntKind::I64 => PrimitiveKind::I64,
        }
    }
}

impl UIntKind {
    pub fn size(self) -> u64 {
        self.primitive().size()
    }

    pub fn primitive(self) -> PrimitiveKind {
        match self {
            UIntKind::U8 => PrimitiveKind::U8,
            UIntKind::U16 => PrimitiveKind::U16,
            UIntKind::U32 => PrimitiveKind::U32,
            UIntKind::U64 => PrimitiveKind::U64,
        }
    }
}

impl FloatKind {
    pub fn size(self) -> u64 {
        self.primitive().size()
    }

    pub fn primitive(self) -> PrimitiveKind {
        match self {
            FloatKind::F32 => PrimitiveKind::F32,
            FloatKind::F64 => PrimitiveKind::F64,
        }
    }
}

impl PrimitiveKind {
    /// Byte size of a value of this primitive
    pub fn size(self) -> u64 {
        match self {
            PrimitiveKind::Void => 0,
            PrimitiveKind::Bool | PrimitiveKind::I8 | PrimitiveKind::U8 => 1,
            PrimitiveKind::I16 | PrimitiveKind::U16 => 2,
            PrimitiveKind::I32 | PrimitiveKind::U32 | PrimitiveKind::F32 => 4,
            PrimitiveKind::I64 | PrimitiveKind::U64 | PrimitiveKind::F64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        match self {
            PrimitiveKind::Bool
            | PrimitiveKind::I8
            | PrimitiveKind::I16
            | PrimitiveKind::I32
            | PrimitiveKind::I64
            | PrimitiveKind::U8
            | PrimitiveKind::U16
            | PrimitiveKind::U32
            | PrimitiveKind::U64 => true,
            PrimitiveKind::Void | PrimitiveKind::F32 | PrimitiveKind::F64 => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn primitive_names_round_trip_through_strum() {
        for kind in PrimitiveKind::iter() {
            assert_eq!(PrimitiveKind::from_str(&kind.to_string()), Ok(kind));
        }

        assert_eq!(PrimitiveKind::from_str("u16"), Ok(PrimitiveKind::U16));
        assert!(PrimitiveKind::from_str("usize").is_err());
    }

    #[test]
    fn sizes_match_widths() {
        assert_eq!(PrimitiveKind::Void.size(), 0);
        assert_eq!(PrimitiveKind::Bool.size(), 1);
        assert_eq!(IntKind::I32.size(), 4);
        assert_eq!(UIntKind::U64.size(), 8);
        assert_eq!(FloatKind::F32.size(), 4);
    }
}
