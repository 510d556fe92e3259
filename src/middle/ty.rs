//! Structural type system.
//!
//! All types live in a [`TypeArena`] owned by the compilation session and are
//! referred to by [`TypeId`]. Pointer, array and function types are interned
//! so that building the same shape twice yields the same handle; user types
//! (structs, unions, enums) get a fresh slot per declaration and are compared
//! structurally. Forward references to user types start out as placeholders
//! and are overwritten in place by [`TypeArena::resolve_user_types`], so every
//! holder of the handle observes the resolved type.

use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use thiserror::Error;
use tracing::debug;

use crate::{
    frontend::{SourceId, intern::InternedSymbol},
    index::{Index, IndexVec, simple_index},
    middle::{
        primitive::{FloatKind, IntKind, PrimitiveKind, UIntKind},
        scope::{ScopeId, ScopeTree},
    },
};

simple_index! {
    /// Handle to a slot in the [`TypeArena`]
    pub struct TypeId;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeResolutionError {
    #[error("unresolved classname(s): {}", .0.iter().join(", "))]
    Unresolved(Vec<InternedSymbol>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterType {
    pub ty: TypeId,
    pub is_reference: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Member {
    pub name: InternedSymbol,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Bool,
    /// i8, i16, i32, i64
    Integer(IntKind),
    /// u8, u16, u32, u64
    UnsignedInteger(UIntKind),
    /// f32, f64
    Float(FloatKind),
    /// *T
    Pointer(TypeId),
    /// [T; length]
    Array { element: TypeId, length: u64 },
    Function {
        return_type: TypeId,
        parameters: Rc<[ParameterType]>,
        is_variadic: bool,
    },
    Struct {
        members: Rc<[Member]>,
        is_union: bool,
    },
    Enum { underlying: TypeId },
    /// A user type name that has not been resolved yet
    Placeholder {
        name: InternedSymbol,
        origin: SourceId,
        scope: ScopeId,
    },
}

impl TypeKind {
    /// Whether this shape carries a signature beyond its size and traits
    pub fn has_signature(&self) -> bool {
        match self {
            TypeKind::Void
            | TypeKind::Bool
            | TypeKind::Integer(_)
            | TypeKind::UnsignedInteger(_)
            | TypeKind::Float(_) => false,
            TypeKind::Pointer(_)
            | TypeKind::Array { .. }
            | TypeKind::Function { .. }
            | TypeKind::Struct { .. }
            | TypeKind::Enum { .. }
            | TypeKind::Placeholder { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantValue {
    Literal(i64),
    /// Takes the value of another constant of the same type
    Alias(InternedSymbol),
    /// Previous constant plus one, or zero for the first
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedConstant {
    pub name: InternedSymbol,
    pub value: ConstantValue,
}

#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub kind: TypeKind,
    pub name: Option<InternedSymbol>,
    pub constants: Vec<NamedConstant>,
    /// `None` for built-ins
    pub scope: Option<ScopeId>,
    pub is_immutable: bool,
}

impl TypeDescriptor {
    fn anonymous(kind: TypeKind) -> Self {
        Self {
            kind,
            name: None,
            constants: Vec::new(),
            scope: None,
            is_immutable: false,
        }
    }
}

#[derive(Debug, Clone)]
struct TypeSlot {
    descriptor: TypeDescriptor,
    generation: u32,
}

/// Trait flags derived from a type's shape. The numeric values are stable
/// within one compiler version.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeTraits(u16);

impl TypeTraits {
    pub const NONE: TypeTraits = TypeTraits(0);
    pub const VOID: TypeTraits = TypeTraits(1 << 0);
    pub const ARITHMETIC: TypeTraits = TypeTraits(1 << 1);
    pub const INTEGER: TypeTraits = TypeTraits(1 << 2);
    pub const UNSIGNED: TypeTraits = TypeTraits(1 << 3);
    pub const POINTER: TypeTraits = TypeTraits(1 << 4);
    pub const ARRAY: TypeTraits = TypeTraits(1 << 5);
    pub const MEMBERS: TypeTraits = TypeTraits(1 << 6);
    pub const FUNCTION: TypeTraits = TypeTraits(1 << 7);
    pub const FLOATING: TypeTraits = TypeTraits(1 << 8);
    pub const USER_PLACEHOLDER: TypeTraits = TypeTraits(1 << 9);
    pub const IMMUTABLE: TypeTraits = TypeTraits(1 << 10);

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: TypeTraits) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: TypeTraits) -> bool {
        self.0 & other.0 != 0
    }
}

impl core::ops::BitOr for TypeTraits {
    type Output = TypeTraits;

    fn bitor(self, rhs: Self) -> Self::Output {
        TypeTraits(self.0 | rhs.0)
    }
}

impl core::fmt::Debug for TypeTraits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [(TypeTraits, &str); 11] = [
            (TypeTraits::VOID, "void"),
            (TypeTraits::ARITHMETIC, "arithmetic"),
            (TypeTraits::INTEGER, "integer"),
            (TypeTraits::UNSIGNED, "unsigned"),
            (TypeTraits::POINTER, "pointer"),
            (TypeTraits::ARRAY, "array"),
            (TypeTraits::MEMBERS, "members"),
            (TypeTraits::FUNCTION, "function"),
            (TypeTraits::FLOATING, "floating"),
            (TypeTraits::USER_PLACEHOLDER, "user-placeholder"),
            (TypeTraits::IMMUTABLE, "immutable"),
        ];

        let names = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .join(" | ");

        write!(f, "TypeTraits({names})")
    }
}

#[derive(Debug, Clone)]
pub struct TypeArena {
    slots: IndexVec<TypeId, TypeSlot>,
    interned: HashMap<TypeKind, TypeId>,
    immutable_variants: HashMap<TypeId, TypeId>,
    alignment: u64,
    pointer_size: u64,
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new(8, 8)
    }
}

const BUILTINS: [(PrimitiveKind, TypeKind); 12] = [
    (PrimitiveKind::Void, TypeKind::Void),
    (PrimitiveKind::Bool, TypeKind::Bool),
    (PrimitiveKind::I8, TypeKind::Integer(IntKind::I8)),
    (PrimitiveKind::I16, TypeKind::Integer(IntKind::I16)),
    (PrimitiveKind::I32, TypeKind::Integer(IntKind::I32)),
    (PrimitiveKind::I64, TypeKind::Integer(IntKind::I64)),
    (PrimitiveKind::U8, TypeKind::UnsignedInteger(UIntKind::U8)),
    (PrimitiveKind::U16, TypeKind::UnsignedInteger(UIntKind::U16)),
    (PrimitiveKind::U32, TypeKind::UnsignedInteger(UIntKind::U32)),
    (PrimitiveKind::U64, TypeKind::UnsignedInteger(UIntKind::U64)),
    (PrimitiveKind::F32, TypeKind::Float(FloatKind::F32)),
    (PrimitiveKind::F64, TypeKind::Float(FloatKind::F64)),
];

impl TypeArena {
    pub fn new(alignment: u64, pointer_size: u64) -> Self {
        let mut arena = Self {
            slots: IndexVec::new(),
            interned: HashMap::new(),
            immutable_variants: HashMap::new(),
            alignment: alignment.max(1),
            pointer_size,
        };

        for (primitive, kind) in BUILTINS {
            let mut descriptor = TypeDescriptor::anonymous(kind.clone());
            descriptor.name = Some(InternedSymbol::new(&primitive.to_string()));

            let id = arena.insert(descriptor);
            arena.interned.insert(kind, id);
        }

        arena
    }

    fn insert(&mut self, descriptor: TypeDescriptor) -> TypeId {
        self.slots.push(TypeSlot {
            descriptor,
            generation: 0,
        })
    }

    fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }

        let id = self.insert(TypeDescriptor::anonymous(kind.clone()));
        self.interned.insert(kind, id);

        id
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn pointer_size(&self) -> u64 {
        self.pointer_size
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn primitive(&self, primitive: PrimitiveKind) -> TypeId {
        let position = BUILTINS
            .iter()
            .position(|(p, _)| *p == primitive)
            .unwrap_or_default();

        TypeId::new(position)
    }

    /// Looks a built-in scalar up by its source name, e.g. `u16`
    pub fn builtin_named(&self, name: &str) -> Option<TypeId> {
        name.parse::<PrimitiveKind>()
            .ok()
            .map(|primitive| self.primitive(primitive))
    }

    pub fn void(&self) -> TypeId {
        self.primitive(PrimitiveKind::Void)
    }

    pub fn bool(&self) -> TypeId {
        self.primitive(PrimitiveKind::Bool)
    }

    pub fn i8(&self) -> TypeId {
        self.primitive(PrimitiveKind::I8)
    }

    pub fn i32(&self) -> TypeId {
        self.primitive(PrimitiveKind::I32)
    }

    pub fn i64(&self) -> TypeId {
        self.primitive(PrimitiveKind::I64)
    }

    pub fn u64(&self) -> TypeId {
        self.primitive(PrimitiveKind::U64)
    }

    pub fn f64(&self) -> TypeId {
        self.primitive(PrimitiveKind::F64)
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer(pointee))
    }

    pub fn array_of(&mut self, element: TypeId, length: u64) -> TypeId {
        self.intern(TypeKind::Array { element, length })
    }

    pub fn function(
        &mut self,
        return_type: TypeId,
        parameters: Vec<ParameterType>,
        is_variadic: bool,
    ) -> TypeId {
        self.intern(TypeKind::Function {
            return_type,
            parameters: parameters.into(),
            is_variadic,
        })
    }

    pub fn declare_struct(
        &mut self,
        name: Option<InternedSymbol>,
        members: Vec<Member>,
        is_union: bool,
        scope: Option<ScopeId>,
    ) -> TypeId {
        self.insert(TypeDescriptor {
            kind: TypeKind::Struct {
                members: members.into(),
                is_union,
            },
            name,
            constants: Vec::new(),
            scope,
            is_immutable: false,
        })
    }

    pub fn declare_enum(
        &mut self,
        name: InternedSymbol,
        underlying: TypeId,
        constants: Vec<NamedConstant>,
        scope: Option<ScopeId>,
    ) -> TypeId {
        self.insert(TypeDescriptor {
            kind: TypeKind::Enum { underlying },
            name: Some(name),
            constants,
            scope,
            is_immutable: false,
        })
    }

    pub fn placeholder(&mut self, name: InternedSymbol, origin: SourceId, scope: ScopeId) -> TypeId {
        self.insert(TypeDescriptor {
            kind: TypeKind::Placeholder {
                name,
                origin,
                scope,
            },
            name: Some(name),
            constants: Vec::new(),
            scope: Some(scope),
            is_immutable: false,
        })
    }

    /// Attaches named constants to a user type (`Class::CONSTANT`)
    pub fn add_constant(&mut self, ty: TypeId, constant: NamedConstant) {
        self.slots[ty].descriptor.constants.push(constant);
    }

    /// The immutable-qualified variant of `ty`
    pub fn immutable(&mut self, ty: TypeId) -> TypeId {
        if self.slots[ty].descriptor.is_immutable {
            return ty;
        }

        if let Some(&id) = self.immutable_variants.get(&ty) {
            return id;
        }

        let mut descriptor = self.slots[ty].descriptor.clone();
        descriptor.is_immutable = true;

        let id = self.insert(descriptor);
        self.immutable_variants.insert(ty, id);

        id
    }

    pub fn descriptor(&self, id: TypeId) -> &TypeDescriptor {
        &self.slots[id].descriptor
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.slots[id].descriptor.kind
    }

    /// Bumped every time the slot's contents are replaced
    pub fn generation(&self, id: TypeId) -> u32 {
        self.slots[id].generation
    }

    pub fn traits(&self, id: TypeId) -> TypeTraits {
        let descriptor = &self.slots[id].descriptor;

        let traits = match &descriptor.kind {
            TypeKind::Void => TypeTraits::VOID,
            TypeKind::Bool | TypeKind::UnsignedInteger(_) => {
                TypeTraits::ARITHMETIC | TypeTraits::INTEGER | TypeTraits::UNSIGNED
            }
            TypeKind::Integer(_) => TypeTraits::ARITHMETIC | TypeTraits::INTEGER,
            TypeKind::Float(_) => TypeTraits::ARITHMETIC | TypeTraits::FLOATING,
            TypeKind::Pointer(_) => TypeTraits::ARITHMETIC | TypeTraits::POINTER,
            TypeKind::Array { .. } => TypeTraits::ARRAY,
            TypeKind::Function { .. } => TypeTraits::FUNCTION,
            TypeKind::Struct { .. } => TypeTraits::MEMBERS,
            TypeKind::Enum { underlying } => {
                let base = TypeTraits::ARITHMETIC | TypeTraits::INTEGER;

                if self.traits(*underlying).contains(TypeTraits::UNSIGNED) {
                    base | TypeTraits::UNSIGNED
                } else {
                    base
                }
            }
            TypeKind::Placeholder { .. } => TypeTraits::USER_PLACEHOLDER,
        };

        if descriptor.is_immutable {
            traits | TypeTraits::IMMUTABLE
        } else {
            traits
        }
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Void)
    }

    pub fn is_bool(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Bool)
    }

    pub fn is_arithmetic(&self, id: TypeId) -> bool {
        self.traits(id).contains(TypeTraits::ARITHMETIC)
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        self.traits(id).contains(TypeTraits::INTEGER)
    }

    pub fn is_unsigned(&self, id: TypeId) -> bool {
        self.traits(id).contains(TypeTraits::UNSIGNED)
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        self.traits(id).contains(TypeTraits::FLOATING)
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Pointer(_))
    }

    pub fn is_void_pointer(&self, id: TypeId) -> bool {
        self.pointee(id).is_some_and(|pointee| self.is_void(pointee))
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Array { .. })
    }

    pub fn is_struct(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Struct { .. })
    }

    pub fn is_function(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Function { .. })
    }

    pub fn is_enum(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Enum { .. })
    }

    pub fn is_immutable(&self, id: TypeId) -> bool {
        self.slots[id].descriptor.is_immutable
    }

    /// Arrays, structs and unions: values that live in memory blocks rather
    /// than in registers
    pub fn is_aggregate(&self, id: TypeId) -> bool {
        match self.kind(id) {
            TypeKind::Array { .. } | TypeKind::Struct { .. } => true,
            TypeKind::Void
            | TypeKind::Bool
            | TypeKind::Integer(_)
            | TypeKind::UnsignedInteger(_)
            | TypeKind::Float(_)
            | TypeKind::Pointer(_)
            | TypeKind::Function { .. }
            | TypeKind::Enum { .. }
            | TypeKind::Placeholder { .. } => false,
        }
    }

    /// Integers, booleans, enums and pointers: anything a branch can test
    pub fn is_integer_compatible(&self, id: TypeId) -> bool {
        self.traits(id)
            .intersects(TypeTraits::INTEGER | TypeTraits::POINTER)
    }

    /// Integers, booleans, enums and floats
    pub fn is_numeric(&self, id: TypeId) -> bool {
        self.traits(id)
            .intersects(TypeTraits::INTEGER | TypeTraits::FLOATING)
    }

    pub fn is_scalar(&self, id: TypeId) -> bool {
        self.is_arithmetic(id)
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Pointer(pointee) => Some(*pointee),
            _ => None,
        }
    }

    pub fn element(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Array { element, .. } => Some(*element),
            TypeKind::Pointer(pointee) => Some(*pointee),
            _ => None,
        }
    }

    /// Underlying integer type of an enum, or the type itself
    pub fn underlying(&self, id: TypeId) -> TypeId {
        match self.kind(id) {
            TypeKind::Enum { underlying } => self.underlying(*underlying),
            _ => id,
        }
    }

    /// The mutable variant of an immutable-qualified type
    pub fn unqualified(&self, id: TypeId) -> TypeId {
        if !self.is_immutable(id) {
            return id;
        }

        self.immutable_variants
            .iter()
            .find(|(_, variant)| **variant == id)
            .map_or(id, |(base, _)| *base)
    }

    pub fn align_up(&self, size: u64) -> u64 {
        size.div_ceil(self.alignment) * self.alignment
    }

    pub fn size_of(&self, id: TypeId) -> u64 {
        match self.kind(id) {
            TypeKind::Void | TypeKind::Placeholder { .. } => 0,
            TypeKind::Bool => 1,
            TypeKind::Integer(kind) => kind.size(),
            TypeKind::UnsignedInteger(kind) => kind.size(),
            TypeKind::Float(kind) => kind.size(),
            TypeKind::Pointer(_) | TypeKind::Function { .. } => self.pointer_size,
            TypeKind::Array { element, length } => length * self.size_of(*element),
            TypeKind::Struct {
                members,
                is_union: false,
            } => members
                .iter()
                .map(|member| self.align_up(self.size_of(member.ty)))
                .sum(),
            TypeKind::Struct {
                members,
                is_union: true,
            } => members
                .iter()
                .map(|member| self.align_up(self.size_of(member.ty)))
                .max()
                .unwrap_or(0),
            TypeKind::Enum { underlying } => self.size_of(*underlying),
        }
    }

    pub fn length_of(&self, id: TypeId) -> u64 {
        match self.kind(id) {
            TypeKind::Array { length, .. } => *length,
            _ => 0,
        }
    }

    pub fn members(&self, id: TypeId) -> Option<&[Member]> {
        match self.kind(id) {
            TypeKind::Struct { members, .. } => Some(members),
            _ => None,
        }
    }

    /// Finds a member by name, returning its type and byte offset
    pub fn member(&self, id: TypeId, name: InternedSymbol) -> Option<(TypeId, u64)> {
        let TypeKind::Struct { members, is_union } = self.kind(id) else {
            return None;
        };

        let mut offset = 0;

        for member in members.iter() {
            if member.name == name {
                return Some((member.ty, if *is_union { 0 } else { offset }));
            }

            offset += self.align_up(self.size_of(member.ty));
        }

        None
    }

    /// Structural equality. Placeholders never compare equal, not even to
    /// themselves.
    pub fn types_equal(&self, a: TypeId, b: TypeId) -> bool {
        self.types_equal_inner(a, b, &mut HashSet::new())
    }

    fn types_equal_inner(&self, a: TypeId, b: TypeId, visited: &mut HashSet<(TypeId, TypeId)>) -> bool {
        let (kind_a, kind_b) = (self.kind(a), self.kind(b));

        if matches!(kind_a, TypeKind::Placeholder { .. }) || matches!(kind_b, TypeKind::Placeholder { .. }) {
            return false;
        }

        if a == b {
            return true;
        }

        // A pair already under comparison is assumed equal; recursion through
        // pointers is the only way to get back here.
        if !visited.insert((a, b)) {
            return true;
        }

        if self.traits(a) != self.traits(b) || self.size_of(a) != self.size_of(b) {
            return false;
        }

        if !kind_a.has_signature() && !kind_b.has_signature() {
            return kind_a == kind_b;
        }

        match (kind_a, kind_b) {
            (TypeKind::Pointer(x), TypeKind::Pointer(y)) => self.types_equal_inner(*x, *y, visited),
            (
                TypeKind::Array {
                    element: x,
                    length: length_x,
                },
                TypeKind::Array {
                    element: y,
                    length: length_y,
                },
            ) => length_x == length_y && self.types_equal_inner(*x, *y, visited),
            (
                TypeKind::Function {
                    return_type: return_x,
                    parameters: parameters_x,
                    is_variadic: variadic_x,
                },
                TypeKind::Function {
                    return_type: return_y,
                    parameters: parameters_y,
                    is_variadic: variadic_y,
                },
            ) => {
                variadic_x == variadic_y
                    && parameters_x.len() == parameters_y.len()
                    && self.types_equal_inner(*return_x, *return_y, visited)
                    && parameters_x.iter().zip(parameters_y.iter()).all(|(x, y)| {
                        x.is_reference == y.is_reference && self.types_equal_inner(x.ty, y.ty, visited)
                    })
            }
            (
                TypeKind::Struct {
                    members: members_x,
                    is_union: union_x,
                },
                TypeKind::Struct {
                    members: members_y,
                    is_union: union_y,
                },
            ) => {
                union_x == union_y
                    && members_x.len() == members_y.len()
                    && members_x.iter().zip(members_y.iter()).all(|(x, y)| {
                        x.name == y.name && self.types_equal_inner(x.ty, y.ty, visited)
                    })
            }
            (TypeKind::Enum { underlying: x }, TypeKind::Enum { underlying: y }) => {
                self.types_equal_inner(*x, *y, visited)
            }
            _ => false,
        }
    }

    pub fn constant(&self, id: TypeId, name: InternedSymbol) -> Option<&NamedConstant> {
        self.descriptor(id)
            .constants
            .iter()
            .find(|constant| constant.name == name)
    }

    /// Value of a named constant, following aliases and implicit successors.
    /// Returns `None` for unknown names and alias cycles.
    pub fn constant_value(&self, id: TypeId, name: InternedSymbol) -> Option<i64> {
        self.constant_value_inner(id, name, &mut HashSet::new())
    }

    fn constant_value_inner(
        &self,
        id: TypeId,
        name: InternedSymbol,
        visiting: &mut HashSet<InternedSymbol>,
    ) -> Option<i64> {
        if !visiting.insert(name) {
            return None;
        }

        let constants = &self.descriptor(id).constants;
        let position = constants.iter().position(|constant| constant.name == name)?;

        let value = match constants[position].value {
            ConstantValue::Literal(value) => Some(value),
            ConstantValue::Alias(target) => self.constant_value_inner(id, target, visiting),
            ConstantValue::Implicit if position == 0 => Some(0),
            ConstantValue::Implicit => self
                .constant_value_inner(id, constants[position - 1].name, visiting)
                .map(|previous| previous.wrapping_add(1)),
        };

        visiting.remove(&name);

        value
    }

    /// Human readable rendering used by diagnostics and the IR printer
    pub fn display(&self, id: TypeId) -> String {
        let descriptor = self.descriptor(id);
        let prefix = if descriptor.is_immutable { "const " } else { "" };

        if let Some(name) = descriptor.name {
            return format!("{prefix}{name}");
        }

        let body = match &descriptor.kind {
            TypeKind::Pointer(pointee) => format!("*{}", self.display(*pointee)),
            TypeKind::Array { element, length } => format!("[{}; {length}]", self.display(*element)),
            TypeKind::Function {
                return_type,
                parameters,
                is_variadic,
            } => {
                let mut parameters = parameters
                    .iter()
                    .map(|p| {
                        let reference = if p.is_reference { "&" } else { "" };
                        format!("{reference}{}", self.display(p.ty))
                    })
                    .collect_vec();

                if *is_variadic {
                    parameters.push("...".to_owned());
                }

                format!("fn({}) -> {}", parameters.join(", "), self.display(*return_type))
            }
            TypeKind::Struct { members, is_union } => format!(
                "{} {{ {} }}",
                if *is_union { "union" } else { "struct" },
                members
                    .iter()
                    .map(|m| format!("{}: {}", m.name, self.display(m.ty)))
                    .join(", ")
            ),
            TypeKind::Enum { underlying } => format!("enum({})", self.display(*underlying)),
            TypeKind::Placeholder { name, .. } => name.to_string(),
            TypeKind::Void
            | TypeKind::Bool
            | TypeKind::Integer(_)
            | TypeKind::UnsignedInteger(_)
            | TypeKind::Float(_) => "<builtin>".to_owned(),
        };

        format!("{prefix}{body}")
    }

    /// Whether the type can be laid out, i.e. no unresolved placeholder is
    /// reachable by value. Pointers break the chain.
    fn is_complete(&self, id: TypeId, visiting: &mut HashSet<TypeId>) -> bool {
        if !visiting.insert(id) {
            // By-value cycle
            return false;
        }

        let complete = match self.kind(id) {
            TypeKind::Placeholder { .. } => false,
            TypeKind::Void
            | TypeKind::Bool
            | TypeKind::Integer(_)
            | TypeKind::UnsignedInteger(_)
            | TypeKind::Float(_)
            | TypeKind::Pointer(_)
            | TypeKind::Function { .. } => true,
            TypeKind::Array { element, .. } => self.is_complete(*element, visiting),
            TypeKind::Struct { members, .. } => members
                .iter()
                .all(|member| self.is_complete(member.ty, visiting)),
            TypeKind::Enum { underlying } => self.is_complete(*underlying, visiting),
        };

        visiting.remove(&id);

        complete
    }

    pub fn unresolved(&self) -> Vec<TypeId> {
        self.slots
            .enumerate()
            .filter(|(_, slot)| matches!(slot.descriptor.kind, TypeKind::Placeholder { .. }))
            .map(|(id, _)| id)
            .collect()
    }

    /// Fixpoint resolution of user type placeholders.
    ///
    /// Each pass tries every remaining placeholder. A pass that resolves
    /// nothing ends the loop with every remaining name reported, which is
    /// how genuine by-value cycles terminate. Returns the number of passes.
    pub fn resolve_user_types(&mut self, scopes: &ScopeTree) -> Result<usize, TypeResolutionError> {
        let mut pending = self.unresolved();
        let mut passes = 0;

        while !pending.is_empty() {
            passes += 1;

            let before = pending.len();
            let mut remaining = Vec::new();

            for id in pending {
                let TypeKind::Placeholder {
                    name,
                    origin,
                    scope,
                } = *self.kind(id)
                else {
                    continue;
                };

                let Some(target) = scopes.resolve_type_name(scope, name, origin) else {
                    remaining.push(id);
                    continue;
                };

                if target == id || !self.is_complete(target, &mut HashSet::new()) {
                    remaining.push(id);
                    continue;
                }

                let resolved = self.slots[target].descriptor.clone();
                let slot = &mut self.slots[id];

                slot.descriptor.kind = resolved.kind;
                slot.descriptor.name = resolved.name;
                slot.descriptor.constants = resolved.constants;
                slot.generation += 1;
            }

            debug!(
                pass = passes,
                resolved = before - remaining.len(),
                remaining = remaining.len(),
                "user type resolution pass"
            );

            if remaining.len() == before {
                let names = remaining
                    .iter()
                    .filter_map(|id| match self.kind(*id) {
                        TypeKind::Placeholder { name, .. } => Some(*name),
                        _ => None,
                    })
                    .collect();

                return Err(TypeResolutionError::Unresolved(names));
            }

            pending = remaining;
        }

        Ok(passes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::Token,
        middle::scope::ClassEntry,
    };

    fn sym(name: &str) -> InternedSymbol {
        InternedSymbol::new(name)
    }

    fn declare_class(scopes: &mut ScopeTree, scope: ScopeId, name: &str, ty: TypeId) {
        scopes
            .declare_class(
                scope,
                sym(name),
                ClassEntry {
                    ty,
                    token: Token::SYNTHESIZED,
                    is_internal: false,
                },
            )
            .unwrap();
    }

    #[test]
    fn builtins_are_singletons() {
        let types = TypeArena::default();

        assert_eq!(types.builtin_named("i32"), Some(types.i32()));
        assert_eq!(types.display(types.u64()), "u64");
        assert!(types.builtin_named("string").is_none());
    }

    #[test]
    fn struct_size_rounds_each_member_to_alignment() {
        let mut types = TypeArena::default();
        let pair = types.declare_struct(
            Some(sym("Pair")),
            vec![
                Member {
                    name: sym("a"),
                    ty: types.i32(),
                },
                Member {
                    name: sym("b"),
                    ty: types.i8(),
                },
            ],
            false,
            None,
        );

        assert_eq!(types.size_of(pair), 16);
        assert_eq!(types.member(pair, sym("b")), Some((types.i8(), 8)));

        let union = types.declare_struct(
            None,
            vec![
                Member {
                    name: sym("a"),
                    ty: types.i64(),
                },
                Member {
                    name: sym("b"),
                    ty: types.i8(),
                },
            ],
            true,
            None,
        );

        assert_eq!(types.size_of(union), 8);
        assert_eq!(types.member(union, sym("b")), Some((types.i8(), 0)));
    }

    #[test]
    fn arrays_report_length_and_size() {
        let mut types = TypeArena::default();
        let array = types.array_of(types.i32(), 5);

        assert_eq!(types.size_of(array), 20);
        assert_eq!(types.length_of(array), 5);
        assert_eq!(types.length_of(types.i32()), 0);
    }

    #[test]
    fn equality_is_structural() {
        let mut types = TypeArena::default();
        let members = |types: &TypeArena| {
            vec![Member {
                name: sym("x"),
                ty: types.i32(),
            }]
        };

        let a = types.declare_struct(Some(sym("A")), members(&types), false, None);
        let b = types.declare_struct(Some(sym("B")), members(&types), false, None);

        assert_ne!(a, b);
        assert!(types.types_equal(a, b));
        assert!(!types.types_equal(types.i32(), types.u64()));

        let enum_type = types.declare_enum(sym("E"), types.i32(), vec![], None);
        assert!(!types.types_equal(enum_type, types.i32()));

        // Qualifiers are part of the trait set
        let const_i32 = types.immutable(types.i32());
        assert!(!types.types_equal(const_i32, types.i32()));
        assert!(types.types_equal(types.unqualified(const_i32), types.i32()));
    }

    #[test]
    fn placeholders_are_never_equal() {
        let mut types = TypeArena::default();
        let mut scopes = ScopeTree::new();
        let global = scopes.push_scope(None);

        let p = types.placeholder(sym("P"), SourceId::SYNTHESIZED, global);
        let q = types.placeholder(sym("P"), SourceId::SYNTHESIZED, global);

        assert!(!types.types_equal(p, p));
        assert!(!types.types_equal(p, q));
    }

    #[test]
    fn acyclic_forward_references_resolve() {
        let mut types = TypeArena::default();
        let mut scopes = ScopeTree::new();
        let global = scopes.push_scope(None);

        // struct A { b: B }, struct B { c: C }, struct C { x: i32 }, all
        // referenced before declaration
        let to_b = types.placeholder(sym("B"), SourceId::SYNTHESIZED, global);
        let to_c = types.placeholder(sym("C"), SourceId::SYNTHESIZED, global);

        let a = types.declare_struct(Some(sym("A")), vec![Member { name: sym("b"), ty: to_b }], false, Some(global));
        let b = types.declare_struct(Some(sym("B")), vec![Member { name: sym("c"), ty: to_c }], false, Some(global));
        let c = types.declare_struct(
            Some(sym("C")),
            vec![Member {
                name: sym("x"),
                ty: types.i32(),
            }],
            false,
            Some(global),
        );

        declare_class(&mut scopes, global, "A", a);
        declare_class(&mut scopes, global, "B", b);
        declare_class(&mut scopes, global, "C", c);

        let generation = types.generation(to_b);
        let passes = types.resolve_user_types(&scopes).unwrap();

        assert!(passes <= 2);
        assert!(types.unresolved().is_empty());
        assert!(types.generation(to_b) > generation);
        assert!(types.types_equal(to_b, b));
        assert_eq!(types.size_of(a), 8);
    }

    #[test]
    fn by_value_cycles_terminate_with_every_name() {
        let mut types = TypeArena::default();
        let mut scopes = ScopeTree::new();
        let global = scopes.push_scope(None);

        // struct X { y: Y }, struct Y { x: X }
        let to_x = types.placeholder(sym("X"), SourceId::SYNTHESIZED, global);
        let to_y = types.placeholder(sym("Y"), SourceId::SYNTHESIZED, global);

        let x = types.declare_struct(Some(sym("X")), vec![Member { name: sym("y"), ty: to_y }], false, Some(global));
        let y = types.declare_struct(Some(sym("Y")), vec![Member { name: sym("x"), ty: to_x }], false, Some(global));

        declare_class(&mut scopes, global, "X", x);
        declare_class(&mut scopes, global, "Y", y);

        let Err(TypeResolutionError::Unresolved(mut names)) = types.resolve_user_types(&scopes) else {
            panic!("a by-value cycle must not resolve");
        };

        names.sort_by_key(|name| name.value());
        assert_eq!(names, vec![sym("X"), sym("Y")]);
    }

    #[test]
    fn pointers_break_cycles() {
        let mut types = TypeArena::default();
        let mut scopes = ScopeTree::new();
        let global = scopes.push_scope(None);

        // struct Node { next: *Node }
        let to_node = types.placeholder(sym("Node"), SourceId::SYNTHESIZED, global);
        let next = types.pointer_to(to_node);
        let node = types.declare_struct(Some(sym("Node")), vec![Member { name: sym("next"), ty: next }], false, Some(global));

        declare_class(&mut scopes, global, "Node", node);

        assert_eq!(types.resolve_user_types(&scopes), Ok(1));
        assert_eq!(types.size_of(node), 8);
        assert_eq!(types.member(node, sym("next")), Some((next, 0)));
        assert!(types.types_equal(to_node, node));
    }

    #[test]
    fn enum_constants_follow_aliases_and_implicit_values() {
        let mut types = TypeArena::default();
        let color = types.declare_enum(
            sym("Color"),
            types.i32(),
            vec![
                NamedConstant {
                    name: sym("Red"),
                    value: ConstantValue::Implicit,
                },
                NamedConstant {
                    name: sym("Green"),
                    value: ConstantValue::Literal(5),
                },
                NamedConstant {
                    name: sym("Blue"),
                    value: ConstantValue::Implicit,
                },
                NamedConstant {
                    name: sym("Default"),
                    value: ConstantValue::Alias(sym("Blue")),
                },
                NamedConstant {
                    name: sym("Loop"),
                    value: ConstantValue::Alias(sym("Loop")),
                },
            ],
            None,
        );

        assert_eq!(types.constant_value(color, sym("Red")), Some(0));
        assert_eq!(types.constant_value(color, sym("Blue")), Some(6));
        assert_eq!(types.constant_value(color, sym("Default")), Some(6));
        assert_eq!(types.constant_value(color, sym("Loop")), None);
        assert!(types.traits(color).contains(TypeTraits::INTEGER));
    }
}
