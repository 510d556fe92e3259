//! XIL, a typed register IR. Each method owns a window of 8-byte registers
//! and a list of stack blocks for its aggregates. Control flow uses absolute
//! instruction offsets within the method.

use hashbrown::HashMap;
use strum::{Display, EnumIter};

use crate::{
    frontend::intern::InternedSymbol,
    middle::ty::{TypeArena, TypeId, TypeKind},
};

pub mod compile;
pub mod pretty_print;

/// Name of the label every method body ends at
pub const LEAVE_LABEL: &str = "$leave";

/// Name of the method that initializes module statics before the entry
/// point runs
pub const STATIC_INIT: &str = "$static_init";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    Nop,
    LoadImmediate,
    Move,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    ShiftLeft,
    ShiftRight,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Negate,
    BitwiseNot,
    LogicalNot,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Converts `sources[0]` from `source_types[0]` to `ty`
    Convert,
    /// Reads `ty` from the address in `sources[0]`
    Load,
    /// Writes `sources[1]` as `ty` to the address in `sources[0]`
    Store,
    /// Address of a register slot in the current window
    RegisterAddress,
    /// Address of one of the method's stack blocks
    BlockAddress,
    StaticAddress,
    FunctionAddress,
    /// Copies `immediates[0]` bytes from the address in `sources[1]` to the
    /// address in `sources[0]`
    BlockCopy,
    Jump,
    BranchIfZero,
    BranchIfNotZero,
    JumpIndirect,
    Call,
    Return,
    Abort,
    DebugTrap,
    InlineAsm,
}

impl Opcode {
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::BranchIfZero | Opcode::BranchIfNotZero)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Opcode::Equal
                | Opcode::NotEqual
                | Opcode::LessThan
                | Opcode::LessThanOrEqual
                | Opcode::GreaterThan
                | Opcode::GreaterThanOrEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    Integer(i64),
    Float(f64),
    /// An instruction offset inside the current method
    Offset(usize),
}

impl Immediate {
    pub fn as_integer(self) -> Option<i64> {
        match self {
            Immediate::Integer(value) => Some(value),
            Immediate::Offset(offset) => Some(offset as i64),
            Immediate::Float(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperandKind {
    Signed,
    Unsigned,
    Float,
    Vector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperandType {
    pub kind: OperandKind,
    /// Width in bytes, zero for `void`
    pub width: u8,
}

impl OperandType {
    pub const VOID: Self = Self::unsigned(0);
    pub const BOOL: Self = Self::unsigned(1);
    pub const ADDRESS: Self = Self::unsigned(8);
    pub const I64: Self = Self::signed(8);

    pub const fn signed(width: u8) -> Self {
        Self {
            kind: OperandKind::Signed,
            width,
        }
    }

    pub const fn unsigned(width: u8) -> Self {
        Self {
            kind: OperandKind::Unsigned,
            width,
        }
    }

    pub const fn float(width: u8) -> Self {
        Self {
            kind: OperandKind::Float,
            width,
        }
    }

    /// The register representation of a tree type. Aggregates and functions
    /// are carried as addresses.
    pub fn of(types: &TypeArena, ty: TypeId) -> Self {
        match types.kind(ty) {
            TypeKind::Void | TypeKind::Placeholder { .. } => Self::VOID,
            TypeKind::Bool => Self::BOOL,
            TypeKind::Integer(_) => Self::signed(types.size_of(ty) as u8),
            TypeKind::UnsignedInteger(_) => Self::unsigned(types.size_of(ty) as u8),
            TypeKind::Float(_) => Self::float(types.size_of(ty) as u8),
            TypeKind::Enum { underlying } => Self::of(types, *underlying),
            TypeKind::Pointer(_)
            | TypeKind::Function { .. }
            | TypeKind::Array { .. }
            | TypeKind::Struct { .. } => Self::ADDRESS,
        }
    }

    pub fn is_void(self) -> bool {
        self.width == 0
    }
}

impl core::fmt::Display for OperandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.kind {
            OperandKind::Signed => "i",
            OperandKind::Unsigned => "u",
            OperandKind::Float => "f",
            OperandKind::Vector => "v",
        };

        if self.is_void() {
            write!(f, "void")
        } else {
            write!(f, "{prefix}{}", u32::from(self.width) * 8)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StorageClass {
    /// A declared local kept in a register
    Local,
    /// A local whose register slot has its address taken
    LocalAddressable,
    /// A single-assignment temporary
    Fast,
    Parameter,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub index: u32,
    pub class: StorageClass,
}

impl core::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.class {
            StorageClass::Parameter => "p",
            StorageClass::Static => "s",
            StorageClass::Local | StorageClass::LocalAddressable | StorageClass::Fast => "r",
        };

        write!(f, "{prefix}{}", self.index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// The type the operation is performed in
    pub ty: OperandType,
    pub destination: Option<Register>,
    pub sources: Vec<Register>,
    pub immediates: Vec<Immediate>,
    pub source_types: Vec<OperandType>,
    /// Callee, static or function name, or an inline assembly template
    pub symbol: Option<InternedSymbol>,
}

impl Instruction {
    pub fn new(opcode: Opcode, ty: OperandType) -> Self {
        Self {
            opcode,
            ty,
            destination: None,
            sources: Vec::new(),
            immediates: Vec::new(),
            source_types: Vec::new(),
            symbol: None,
        }
    }

    pub fn with_destination(mut self, destination: Register) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Register>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn with_immediate(mut self, immediate: Immediate) -> Self {
        self.immediates.push(immediate);
        self
    }

    pub fn with_source_type(mut self, ty: OperandType) -> Self {
        self.source_types.push(ty);
        self
    }

    pub fn with_symbol(mut self, symbol: InternedSymbol) -> Self {
        self.symbol = Some(symbol);
        self
    }

    /// The branch target, once labels have been resolved
    pub fn target(&self) -> Option<usize> {
        match self.immediates.first() {
            Some(Immediate::Offset(offset)) if self.opcode.is_branch() => Some(*offset),
            _ => None,
        }
    }
}

/// A named declaration with its register, kept for printing and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSlot {
    pub name: InternedSymbol,
    pub register: Register,
}

/// Stack memory reserved in every frame of the method, after its registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSlot {
    pub size: u64,
    /// Byte offset from the end of the register window
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XilMethod {
    pub name: InternedSymbol,
    /// One per parameter, in register order. A hidden out-pointer for
    /// aggregate returns comes last.
    pub parameters: Vec<OperandType>,
    pub locals: Vec<LocalSlot>,
    pub blocks: Vec<BlockSlot>,
    pub instructions: Vec<Instruction>,
    pub labels: HashMap<InternedSymbol, usize>,
    pub register_count: u32,
    pub return_type: OperandType,
    pub returns_aggregate: bool,
}

impl XilMethod {
    pub fn block_bytes(&self) -> u64 {
        self.blocks
            .last()
            .map_or(0, |block| block.offset + block.size)
    }

    /// Registers followed by blocks
    pub fn frame_size(&self) -> u64 {
        u64::from(self.register_count) * 8 + self.block_bytes()
    }

    pub fn opcodes(&self) -> impl Iterator<Item = Opcode> + '_ {
        self.instructions.iter().map(|instruction| instruction.opcode)
    }
}

/// Module level storage, laid out at the bottom of the interpreter stack
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSlot {
    pub name: InternedSymbol,
    pub offset: u64,
    pub size: u64,
    /// Initial contents, zero-filled past the end
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XilModule {
    pub name: String,
    pub methods: Vec<XilMethod>,
    pub statics: Vec<StaticSlot>,
}

impl XilModule {
    pub fn method(&self, name: &str) -> Option<&XilMethod> {
        self.methods.iter().find(|method| method.name.value() == name)
    }

    pub fn method_index(&self, name: InternedSymbol) -> Option<usize> {
        self.methods.iter().position(|method| method.name == name)
    }

    pub fn static_slot(&self, name: InternedSymbol) -> Option<&StaticSlot> {
        self.statics.iter().find(|slot| slot.name == name)
    }

    pub fn static_size(&self) -> u64 {
        self.statics
            .last()
            .map_or(0, |slot| slot.offset + slot.size)
    }
}
