//! Compilation of lowered programs into XIL.
//!
//! Scalars live in registers and aggregates in per-frame blocks. Every
//! expression compiles to the register holding its value, or holding its
//! address when the caller asked for [`AccessMode::ByPointer`] or the value
//! is an aggregate.

use hashbrown::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    frontend::{
        ast::{
            BinaryOperatorClass, BinaryOperatorKind, Expression, ExpressionKind, Function, Literal, Program,
            Statement, StatementKind, UnaryOperatorKind,
            visit::{Visitor, walk_expression, walk_statement},
        },
        intern::InternedSymbol,
    },
    middle::{
        lowering::control_flow::ABORT_INTRINSIC,
        scope::{SymbolId, SymbolKind},
        ty::{TypeArena, TypeId, TypeKind},
    },
};

use super::{
    BlockSlot, Immediate, Instruction, LEAVE_LABEL, LocalSlot, Opcode, OperandKind, OperandType, Register,
    STATIC_INIT, StaticSlot, StorageClass, XilMethod, XilModule,
};

pub const DEBUG_TRAP_INTRINSIC: &str = "debug_trap";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("`{construct}` must be lowered before IR compilation")]
    UnloweredConstruct { construct: &'static str },
    #[error("label `{label}` is used in `{method}` but never defined")]
    UndefinedLabel {
        method: InternedSymbol,
        label: InternedSymbol,
    },
    #[error("label `{label}` is defined more than once in `{method}`")]
    DuplicateLabel {
        method: InternedSymbol,
        label: InternedSymbol,
    },
    #[error("an expression reached IR compilation without a type")]
    UntypedExpression,
    #[error("`{0}` was never resolved to a declaration")]
    UnresolvedIdentifier(InternedSymbol),
    #[error("no member named `{0}`")]
    UnknownMember(InternedSymbol),
    #[error("a `void` expression was used as a value")]
    VoidValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ByValue,
    ByPointer,
}

/// Where a declared symbol lives for the duration of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Register(Register),
    Block(usize),
    /// The register holds the address of the value: reference parameters
    /// and aggregates passed by value
    Indirect(Register),
    Static(InternedSymbol),
}

/// An assignable location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    Register(Register),
    Memory(Register),
}

#[derive(Debug, Default)]
struct StaticLayout {
    slots: Vec<StaticSlot>,
    symbols: HashMap<SymbolId, InternedSymbol>,
    strings: HashMap<InternedSymbol, InternedSymbol>,
}

impl StaticLayout {
    fn allocate(&mut self, name: InternedSymbol, size: u64, data: Vec<u8>) {
        let end = self.slots.last().map_or(0, |slot| slot.offset + slot.size);

        self.slots.push(StaticSlot {
            name,
            offset: end.next_multiple_of(8),
            size,
            data,
        });
    }

    /// Interns a string literal as a NUL terminated static
    fn string(&mut self, value: InternedSymbol) -> InternedSymbol {
        if let Some(name) = self.strings.get(&value) {
            return *name;
        }

        let name = InternedSymbol::new(&format!("$str{}", self.strings.len()));
        let mut data = value.value().as_bytes().to_vec();
        data.push(0);

        self.allocate(name, data.len() as u64, data);
        self.strings.insert(value, name);

        name
    }
}

pub fn compile_program(name: &str, program: &Program, types: &TypeArena) -> Result<XilModule, CompileError> {
    let mut statics = StaticLayout::default();

    for global in program.globals() {
        let symbol = program.scopes.symbol(global.symbol);
        let ty = symbol.ty.ok_or(CompileError::UntypedExpression)?;

        statics.allocate(symbol.name, types.size_of(ty), Vec::new());
        statics.symbols.insert(global.symbol, symbol.name);
    }

    let mut methods = Vec::new();

    if program.globals().next().is_some() {
        let mut compiler = MethodCompiler::new(InternedSymbol::new(STATIC_INIT), program, types, &mut statics);

        for global in program.globals() {
            compiler.statement(&global.statement, false)?;
        }

        methods.push(compiler.finish()?);
    }

    for function in program.functions() {
        methods.push(compile_function(function, program, types, &mut statics)?);
    }

    debug!(module = name, methods = methods.len(), statics = statics.slots.len(), "compiled module");

    Ok(XilModule {
        name: name.to_owned(),
        methods,
        statics: statics.slots,
    })
}

fn compile_function<'a>(
    function: &'a Function,
    program: &'a Program,
    types: &'a TypeArena,
    statics: &mut StaticLayout,
) -> Result<XilMethod, CompileError> {
    let mut compiler = MethodCompiler::new(function.name, program, types, statics);

    let mut address_taken = AddressTaken::default();
    address_taken.visit_statement(&function.body);
    compiler.address_taken = address_taken.0;

    for &parameter in &function.parameters {
        let symbol = program.scopes.symbol(parameter);
        let ty = symbol.ty.ok_or(CompileError::UntypedExpression)?;
        let register = compiler.register(StorageClass::Parameter);

        let storage = if symbol.is_reference_parameter() || types.is_aggregate(ty) {
            compiler.parameters.push(OperandType::ADDRESS);
            Storage::Indirect(register)
        } else {
            compiler.parameters.push(OperandType::of(types, ty));
            Storage::Register(register)
        };

        compiler.storage.insert(parameter, storage);
        compiler.locals.push(LocalSlot {
            name: symbol.name,
            register,
        });
    }

    compiler.return_type = OperandType::of(types, function.return_type);

    if types.is_aggregate(function.return_type) {
        let out_pointer = compiler.register(StorageClass::Parameter);

        compiler.parameters.push(OperandType::ADDRESS);
        compiler.return_register = Some(out_pointer);
        compiler.return_size = types.size_of(function.return_type);
        compiler.returns_aggregate = true;
    } else if !compiler.return_type.is_void() {
        compiler.return_register = Some(compiler.register(StorageClass::Local));
    }

    let mut finally = FinallyBlock::default();
    finally.visit_statement(&function.body);
    compiler.finally = finally.0;

    compiler.statement(&function.body, true)?;
    compiler.finish()
}

#[derive(Default)]
struct AddressTaken(HashSet<SymbolId>);

impl<'a> Visitor<'a> for AddressTaken {
    fn visit_expression(&mut self, expression: &'a Expression) {
        if let ExpressionKind::Unary {
            operator: UnaryOperatorKind::AddressOf,
            operand,
        } = &expression.kind
        {
            if let ExpressionKind::Identifier {
                symbol: Some(symbol), ..
            } = &operand.kind
            {
                self.0.insert(*symbol);
            }
        }

        walk_expression(self, expression)
    }
}

#[derive(Default)]
struct FinallyBlock<'a>(Option<&'a Statement>);

impl<'a> Visitor<'a> for FinallyBlock<'a> {
    fn visit_statement(&mut self, statement: &'a Statement) {
        match &statement.kind {
            StatementKind::Finally(body) => {
                self.0.get_or_insert(body.as_ref());
            }
            _ => walk_statement(self, statement),
        }
    }
}

struct MethodCompiler<'a, 's> {
    name: InternedSymbol,
    program: &'a Program,
    types: &'a TypeArena,
    statics: &'s mut StaticLayout,

    instructions: Vec<Instruction>,
    labels: HashMap<InternedSymbol, usize>,
    /// Instructions whose first immediate is a label still to be resolved
    fixups: Vec<(usize, InternedSymbol)>,
    next_internal_label: u32,

    storage: HashMap<SymbolId, Storage>,
    address_taken: HashSet<SymbolId>,
    register_count: u32,
    parameters: Vec<OperandType>,
    locals: Vec<LocalSlot>,
    blocks: Vec<BlockSlot>,

    return_type: OperandType,
    return_register: Option<Register>,
    return_size: u64,
    returns_aggregate: bool,
    finally: Option<&'a Statement>,
}

impl<'a, 's> MethodCompiler<'a, 's> {
    fn new(name: InternedSymbol, program: &'a Program, types: &'a TypeArena, statics: &'s mut StaticLayout) -> Self {
        Self {
            name,
            program,
            types,
            statics,
            instructions: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            next_internal_label: 0,
            storage: HashMap::new(),
            address_taken: HashSet::new(),
            register_count: 0,
            parameters: Vec::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
            return_type: OperandType::VOID,
            return_register: None,
            return_size: 0,
            returns_aggregate: false,
            finally: None,
        }
    }

    fn finish(mut self) -> Result<XilMethod, CompileError> {
        self.define_label(InternedSymbol::new(LEAVE_LABEL))?;

        if let Some(finally) = self.finally {
            self.statement(finally, false)?;
        }

        let mut leave = Instruction::new(Opcode::Return, self.return_type);

        if let Some(register) = self.return_register {
            leave = leave.with_sources([register]);
        }

        self.emit(leave);

        for (index, label) in std::mem::take(&mut self.fixups) {
            let offset = *self
                .labels
                .get(&label)
                .ok_or(CompileError::UndefinedLabel {
                    method: self.name,
                    label,
                })?;

            self.instructions[index].immediates[0] = Immediate::Offset(offset);
        }

        debug!(
            method = self.name.value(),
            instructions = self.instructions.len(),
            registers = self.register_count,
            "compiled method"
        );

        Ok(XilMethod {
            name: self.name,
            parameters: self.parameters,
            locals: self.locals,
            blocks: self.blocks,
            instructions: self.instructions,
            labels: self.labels,
            register_count: self.register_count,
            return_type: self.return_type,
            returns_aggregate: self.returns_aggregate,
        })
    }

    // Emission helpers

    fn emit(&mut self, instruction: Instruction) -> usize {
        trace!(offset = self.instructions.len(), %instruction, "emit");

        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    fn register(&mut self, class: StorageClass) -> Register {
        let register = Register {
            index: self.register_count,
            class,
        };
        self.register_count += 1;
        register
    }

    fn temporary(&mut self) -> Register {
        self.register(StorageClass::Fast)
    }

    fn allocate_block(&mut self, size: u64) -> usize {
        let end = self
            .blocks
            .last()
            .map_or(0, |block| block.offset + block.size);

        self.blocks.push(BlockSlot {
            size,
            offset: self.types.align_up(end),
        });

        self.blocks.len() - 1
    }

    fn block_address(&mut self, block: usize) -> Register {
        let destination = self.temporary();

        self.emit(
            Instruction::new(Opcode::BlockAddress, OperandType::ADDRESS)
                .with_destination(destination)
                .with_immediate(Immediate::Integer(block as i64)),
        );

        destination
    }

    fn static_address(&mut self, name: InternedSymbol) -> Register {
        let destination = self.temporary();

        self.emit(
            Instruction::new(Opcode::StaticAddress, OperandType::ADDRESS)
                .with_destination(destination)
                .with_symbol(name),
        );

        destination
    }

    fn internal_label(&mut self) -> InternedSymbol {
        let label = InternedSymbol::new(&format!("$L{}", self.next_internal_label));
        self.next_internal_label += 1;
        label
    }

    fn define_label(&mut self, label: InternedSymbol) -> Result<(), CompileError> {
        if self.labels.insert(label, self.instructions.len()).is_some() {
            return Err(CompileError::DuplicateLabel {
                method: self.name,
                label,
            });
        }

        Ok(())
    }

    /// Emits a branch to `label`. Conditional branches test the low
    /// `ty.width` bytes of the condition.
    fn branch(&mut self, opcode: Opcode, condition: Option<Register>, ty: OperandType, label: InternedSymbol) {
        let mut instruction = Instruction::new(opcode, ty).with_immediate(Immediate::Offset(0));
        instruction.sources.extend(condition);

        let index = self.emit(instruction);
        self.fixups.push((index, label));
    }

    fn jump(&mut self, label: InternedSymbol) {
        self.branch(Opcode::Jump, None, OperandType::VOID, label);
    }

    /// Copies `source` into `destination`. A temporary produced by the
    /// previous instruction is retargeted instead of moved.
    fn move_into(&mut self, destination: Register, source: Register, ty: OperandType) {
        if source == destination {
            return;
        }

        let at_label = self.labels.values().any(|&offset| offset == self.instructions.len());

        if source.class == StorageClass::Fast && !at_label {
            if let Some(last) = self.instructions.last_mut() {
                if last.destination == Some(source) {
                    last.destination = Some(destination);
                    return;
                }
            }
        }

        self.emit(
            Instruction::new(Opcode::Move, ty)
                .with_destination(destination)
                .with_sources([source]),
        );
    }

    /// `base + offset`. Negative offsets are valid through pointers.
    fn offset_address(&mut self, base: Register, offset: i64) -> Register {
        if offset == 0 {
            return base;
        }

        let destination = self.temporary();

        self.emit(
            Instruction::new(Opcode::Add, OperandType::ADDRESS)
                .with_destination(destination)
                .with_sources([base])
                .with_immediate(Immediate::Integer(offset)),
        );

        destination
    }

    fn copy_block(&mut self, destination: Register, source: Register, size: u64) {
        self.emit(
            Instruction::new(Opcode::BlockCopy, OperandType::ADDRESS)
                .with_sources([destination, source])
                .with_immediate(Immediate::Integer(size as i64)),
        );
    }

    /// Copies an aggregate into a fresh block of this frame
    fn copy_to_block(&mut self, source: Register, ty: TypeId) -> Register {
        let size = self.types.size_of(ty);
        let block = self.allocate_block(size);
        let address = self.block_address(block);

        self.copy_block(address, source, size);

        address
    }

    fn load_or_address(&mut self, address: Register, ty: TypeId, mode: AccessMode) -> Register {
        if mode == AccessMode::ByPointer || self.types.is_aggregate(ty) {
            return address;
        }

        let destination = self.temporary();

        self.emit(
            Instruction::new(Opcode::Load, self.operand(ty))
                .with_destination(destination)
                .with_sources([address]),
        );

        destination
    }

    fn read(&mut self, place: Place, ty: TypeId) -> Register {
        match place {
            Place::Register(register) => register,
            Place::Memory(address) => self.load_or_address(address, ty, AccessMode::ByValue),
        }
    }

    /// Stores `value` into `place`, returning the register that now holds
    /// the stored value
    fn write(&mut self, place: Place, ty: TypeId, value: Register) -> Register {
        match place {
            Place::Register(register) => {
                self.move_into(register, value, self.operand(ty));
                register
            }
            Place::Memory(address) if self.types.is_aggregate(ty) => {
                self.copy_block(address, value, self.types.size_of(ty));
                address
            }
            Place::Memory(address) => {
                self.emit(Instruction::new(Opcode::Store, self.operand(ty)).with_sources([address, value]));
                value
            }
        }
    }

    // Type helpers

    fn operand(&self, ty: TypeId) -> OperandType {
        OperandType::of(self.types, ty)
    }

    fn type_of(expression: &Expression) -> Result<TypeId, CompileError> {
        expression.ty.ok_or(CompileError::UntypedExpression)
    }

    // Storage

    fn storage_of(&self, symbol: SymbolId) -> Result<Storage, CompileError> {
        if let Some(storage) = self.storage.get(&symbol) {
            return Ok(*storage);
        }

        self.statics
            .symbols
            .get(&symbol)
            .map(|name| Storage::Static(*name))
            .ok_or_else(|| CompileError::UnresolvedIdentifier(self.program.scopes.symbol(symbol).name))
    }

    fn declare(&mut self, symbol: SymbolId, ty: TypeId) -> Storage {
        if let Ok(storage) = self.storage_of(symbol) {
            return storage;
        }

        let storage = if self.types.is_aggregate(ty) {
            Storage::Block(self.allocate_block(self.types.size_of(ty)))
        } else {
            let class = if self.address_taken.contains(&symbol) {
                StorageClass::LocalAddressable
            } else {
                StorageClass::Local
            };
            let register = self.register(class);

            self.locals.push(LocalSlot {
                name: self.program.scopes.symbol(symbol).name,
                register,
            });

            Storage::Register(register)
        };

        self.storage.insert(symbol, storage);
        storage
    }

    fn place(&mut self, expression: &Expression) -> Result<Place, CompileError> {
        if let ExpressionKind::Identifier {
            symbol: Some(symbol), ..
        } = &expression.kind
        {
            if let Some(Storage::Register(register)) = self.storage.get(symbol) {
                return Ok(Place::Register(*register));
            }
        }

        Ok(Place::Memory(self.address(expression)?))
    }

    // Statements

    fn statement(&mut self, statement: &'a Statement, is_tail: bool) -> Result<(), CompileError> {
        match &statement.kind {
            StatementKind::Expression(expression) => {
                self.expression(expression, AccessMode::ByValue)?;
            }
            StatementKind::Compound { statements, .. } | StatementKind::Sequence(statements) => {
                let last = statements.len().saturating_sub(1);

                for (index, statement) in statements.iter().enumerate() {
                    self.statement(statement, is_tail && index == last)?;
                }
            }
            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                let condition_type = self.operand(Self::type_of(condition)?);
                let condition = self.value(condition)?;
                let end = self.internal_label();

                match otherwise {
                    Some(otherwise) => {
                        let otherwise_label = self.internal_label();

                        self.branch(Opcode::BranchIfZero, Some(condition), condition_type, otherwise_label);
                        self.statement(then, false)?;
                        self.jump(end);
                        self.define_label(otherwise_label)?;
                        self.statement(otherwise, false)?;
                    }
                    None => {
                        self.branch(Opcode::BranchIfZero, Some(condition), condition_type, end);
                        self.statement(then, false)?;
                    }
                }

                self.define_label(end)?;
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    let result = self.expression(value, AccessMode::ByValue)?;

                    if let (Some(result), Some(register)) = (result, self.return_register) {
                        if self.returns_aggregate {
                            self.copy_block(register, result, self.return_size);
                        } else {
                            self.move_into(register, result, self.return_type);
                        }
                    }
                }

                if !is_tail {
                    self.jump(InternedSymbol::new(LEAVE_LABEL));
                }
            }
            StatementKind::Goto(label) => self.jump(*label),
            StatementKind::ComputedGoto(target) => {
                let target = self.value(target)?;

                self.emit(Instruction::new(Opcode::JumpIndirect, OperandType::ADDRESS).with_sources([target]));
            }
            StatementKind::Label(label) => self.define_label(*label)?,
            StatementKind::Switch(switch) => {
                let labels = switch
                    .labels
                    .as_ref()
                    .ok_or(CompileError::UnloweredConstruct { construct: "switch" })?;
                let ty = self.operand(Self::type_of(&switch.value)?);

                self.define_label(labels.head)?;
                let value = self.value(&switch.value)?;

                for (label, case) in &labels.cases {
                    let matches = self.temporary();

                    self.emit(
                        Instruction::new(Opcode::Equal, ty)
                            .with_destination(matches)
                            .with_sources([value])
                            .with_immediate(Immediate::Integer(*case)),
                    );
                    self.branch(Opcode::BranchIfNotZero, Some(matches), OperandType::BOOL, *label);
                }

                self.jump(labels.default.unwrap_or(labels.tail));
                self.statement(&switch.body, false)?;
                self.define_label(labels.tail)?;
            }
            StatementKind::InlineAsm(asm) => {
                self.emit(
                    Instruction::new(Opcode::InlineAsm, OperandType::VOID)
                        .with_symbol(InternedSymbol::new(&asm.template)),
                );
            }
            // Emitted once at `$leave`
            StatementKind::Finally(_) | StatementKind::Empty => {}
            StatementKind::While { .. } => return Err(CompileError::UnloweredConstruct { construct: "while" }),
            StatementKind::DoWhile { .. } => return Err(CompileError::UnloweredConstruct { construct: "do-while" }),
            StatementKind::For { .. } => return Err(CompileError::UnloweredConstruct { construct: "for" }),
            StatementKind::Break => return Err(CompileError::UnloweredConstruct { construct: "break" }),
            StatementKind::Continue => return Err(CompileError::UnloweredConstruct { construct: "continue" }),
            StatementKind::Case(_) => return Err(CompileError::UnloweredConstruct { construct: "case" }),
            StatementKind::Default => return Err(CompileError::UnloweredConstruct { construct: "default" }),
            StatementKind::Assert { .. } => return Err(CompileError::UnloweredConstruct { construct: "assert" }),
        }

        Ok(())
    }

    // Expressions

    fn value(&mut self, expression: &Expression) -> Result<Register, CompileError> {
        self.expression(expression, AccessMode::ByValue)?
            .ok_or(CompileError::VoidValue)
    }

    fn address(&mut self, expression: &Expression) -> Result<Register, CompileError> {
        self.expression(expression, AccessMode::ByPointer)?
            .ok_or(CompileError::VoidValue)
    }

    /// Compiles `expression` to a signed 64-bit index
    fn index(&mut self, expression: &Expression) -> Result<Register, CompileError> {
        let ty = self.operand(Self::type_of(expression)?);
        let value = self.value(expression)?;

        if ty == OperandType::I64 {
            return Ok(value);
        }

        let destination = self.temporary();

        self.emit(
            Instruction::new(Opcode::Convert, OperandType::I64)
                .with_destination(destination)
                .with_sources([value])
                .with_source_type(ty),
        );

        Ok(destination)
    }

    fn scale(&mut self, index: Register, size: u64) -> Register {
        if size == 1 {
            return index;
        }

        let destination = self.temporary();

        self.emit(
            Instruction::new(Opcode::Multiply, OperandType::I64)
                .with_destination(destination)
                .with_sources([index])
                .with_immediate(Immediate::Integer(size as i64)),
        );

        destination
    }

    fn expression(&mut self, expression: &Expression, mode: AccessMode) -> Result<Option<Register>, CompileError> {
        let ty = Self::type_of(expression)?;

        let register = match &expression.kind {
            ExpressionKind::Literal(literal) => self.literal(*literal, ty),
            ExpressionKind::Identifier { name, symbol } => {
                let symbol = symbol.ok_or(CompileError::UnresolvedIdentifier(*name))?;
                self.identifier(symbol, ty, mode)?
            }
            ExpressionKind::Binary { operator, lhs, rhs } => self.binary(*operator, lhs, rhs, ty)?,
            ExpressionKind::Unary { operator, operand } => self.unary(*operator, operand, ty, mode)?,
            ExpressionKind::Ternary {
                condition,
                then,
                otherwise,
            } => return self.ternary(condition, then, otherwise, ty, mode),
            ExpressionKind::Member {
                object,
                member,
                through_pointer,
            } => {
                let object_type = Self::type_of(object)?;

                let (base, aggregate) = if *through_pointer {
                    let pointee = self
                        .types
                        .pointee(object_type)
                        .ok_or(CompileError::UnknownMember(*member))?;

                    (self.value(object)?, pointee)
                } else {
                    (self.address(object)?, object_type)
                };

                let (_, offset) = self
                    .types
                    .member(aggregate, *member)
                    .ok_or(CompileError::UnknownMember(*member))?;
                let address = self.offset_address(base, offset as i64);

                self.load_or_address(address, ty, mode)
            }
            ExpressionKind::Subscript { base, index } => {
                let base_type = Self::type_of(base)?;
                let element_size = self.types.size_of(ty);

                let base = if self.types.is_array(base_type) {
                    self.address(base)?
                } else {
                    self.value(base)?
                };

                let address = match index.as_integer() {
                    Some(constant) => self.offset_address(base, constant.wrapping_mul(element_size as i64)),
                    None => {
                        let index = self.index(index)?;
                        let scaled = self.scale(index, element_size);
                        let destination = self.temporary();

                        self.emit(
                            Instruction::new(Opcode::Add, OperandType::ADDRESS)
                                .with_destination(destination)
                                .with_sources([base, scaled]),
                        );

                        destination
                    }
                };

                self.load_or_address(address, ty, mode)
            }
            ExpressionKind::Call {
                callee,
                symbol,
                arguments,
            } => return self.call(*callee, *symbol, arguments),
            ExpressionKind::CollectionInit(elements) => {
                let element_type = self.types.element(ty).ok_or(CompileError::UntypedExpression)?;
                let element_size = self.types.size_of(element_type);
                let block = self.allocate_block(self.types.size_of(ty));
                let base = self.block_address(block);

                for (index, element) in elements.iter().enumerate() {
                    let address = self.offset_address(base, (index as u64 * element_size) as i64);
                    let value = self.value(element)?;

                    self.write(Place::Memory(address), element_type, value);
                }

                base
            }
            ExpressionKind::Cast {
                expression: inner,
                target,
                ..
            } => {
                let inner_type = Self::type_of(inner)?;
                let value = self.expression(inner, AccessMode::ByValue)?;

                if self.types.is_void(*target) {
                    return Ok(None);
                }

                let value = value.ok_or(CompileError::VoidValue)?;
                let (from, to) = (self.operand(inner_type), self.operand(*target));

                if self.types.is_bool(*target) && !self.types.is_bool(inner_type) {
                    // Any nonzero value of any width is true
                    let destination = self.temporary();

                    self.emit(
                        Instruction::new(Opcode::NotEqual, from)
                            .with_destination(destination)
                            .with_sources([value])
                            .with_immediate(Immediate::Integer(0)),
                    );

                    destination
                } else if from == to {
                    value
                } else {
                    let destination = self.temporary();

                    self.emit(
                        Instruction::new(Opcode::Convert, to)
                            .with_destination(destination)
                            .with_sources([value])
                            .with_source_type(from),
                    );

                    destination
                }
            }
            ExpressionKind::Assign { target, value } => {
                let target_type = Self::type_of(target)?;
                let place = self.place(target)?;
                let value = self.value(value)?;

                self.write(place, target_type, value)
            }
            ExpressionKind::VariableInit { symbol, initializer } => {
                let declared = self
                    .program
                    .scopes
                    .symbol(*symbol)
                    .ty
                    .ok_or(CompileError::UntypedExpression)?;

                let place = match self.declare(*symbol, declared) {
                    Storage::Register(register) => Place::Register(register),
                    Storage::Block(block) => Place::Memory(self.block_address(block)),
                    Storage::Indirect(register) => Place::Memory(register),
                    Storage::Static(name) => Place::Memory(self.static_address(name)),
                };

                let Some(initializer) = initializer else {
                    return Ok(None);
                };

                let value = self.value(initializer)?;
                self.write(place, declared, value)
            }
            ExpressionKind::CompoundAssign { .. } => {
                return Err(CompileError::UnloweredConstruct {
                    construct: "compound assignment",
                });
            }
            ExpressionKind::SizeOf(_) => return Err(CompileError::UnloweredConstruct { construct: "sizeof" }),
            ExpressionKind::ScopeResolution { .. } => {
                return Err(CompileError::UnloweredConstruct {
                    construct: "scope resolution",
                });
            }
        };

        Ok(Some(register))
    }

    fn literal(&mut self, literal: Literal, ty: TypeId) -> Register {
        let operand = self.operand(ty);

        let immediate = match literal {
            Literal::String(value) => {
                let name = self.statics.string(value);
                return self.static_address(name);
            }
            Literal::Float(value) => Immediate::Float(value),
            Literal::Integer(value) if operand.kind == OperandKind::Float => Immediate::Float(value as f64),
            Literal::Integer(value) => Immediate::Integer(value),
            Literal::Bool(value) => Immediate::Integer(value as i64),
            Literal::Null => Immediate::Integer(0),
        };

        let destination = self.temporary();

        self.emit(
            Instruction::new(Opcode::LoadImmediate, operand)
                .with_destination(destination)
                .with_immediate(immediate),
        );

        destination
    }

    fn identifier(&mut self, symbol: SymbolId, ty: TypeId, mode: AccessMode) -> Result<Register, CompileError> {
        let declaration = self.program.scopes.symbol(symbol);
        let (kind, name) = (declaration.kind, declaration.name);

        if kind == SymbolKind::Function {
            let destination = self.temporary();

            self.emit(
                Instruction::new(Opcode::FunctionAddress, OperandType::ADDRESS)
                    .with_destination(destination)
                    .with_symbol(name),
            );

            return Ok(destination);
        }

        let register = match self.storage_of(symbol)? {
            Storage::Register(register) => match mode {
                AccessMode::ByValue => register,
                AccessMode::ByPointer => {
                    let destination = self.temporary();

                    self.emit(
                        Instruction::new(Opcode::RegisterAddress, OperandType::ADDRESS)
                            .with_destination(destination)
                            .with_immediate(Immediate::Integer(i64::from(register.index))),
                    );

                    destination
                }
            },
            Storage::Block(block) => self.block_address(block),
            Storage::Indirect(address) => self.load_or_address(address, ty, mode),
            Storage::Static(name) => {
                let address = self.static_address(name);
                self.load_or_address(address, ty, mode)
            }
        };

        Ok(register)
    }

    fn binary(
        &mut self,
        operator: BinaryOperatorKind,
        lhs: &Expression,
        rhs: &Expression,
        ty: TypeId,
    ) -> Result<Register, CompileError> {
        if operator.class() == BinaryOperatorClass::Logical {
            return self.short_circuit(operator, lhs, rhs);
        }

        let (lhs_type, rhs_type) = (Self::type_of(lhs)?, Self::type_of(rhs)?);
        let types = self.types;

        match (types.is_pointer(lhs_type), types.is_pointer(rhs_type), operator) {
            (true, false, BinaryOperatorKind::Add | BinaryOperatorKind::Subtract) => {
                return self.pointer_offset(operator, lhs, rhs, lhs_type);
            }
            (false, true, BinaryOperatorKind::Add) => {
                return self.pointer_offset(operator, rhs, lhs, rhs_type);
            }
            (true, true, BinaryOperatorKind::Subtract) => {
                let element_size = types.pointee(lhs_type).map_or(1, |pointee| types.size_of(pointee));
                let (lhs, rhs) = (self.value(lhs)?, self.value(rhs)?);
                let difference = self.temporary();

                self.emit(
                    Instruction::new(Opcode::Subtract, OperandType::I64)
                        .with_destination(difference)
                        .with_sources([lhs, rhs]),
                );

                if element_size <= 1 {
                    return Ok(difference);
                }

                let destination = self.temporary();

                self.emit(
                    Instruction::new(Opcode::Divide, OperandType::I64)
                        .with_destination(destination)
                        .with_sources([difference])
                        .with_immediate(Immediate::Integer(element_size as i64)),
                );

                return Ok(destination);
            }
            _ => {}
        }

        let opcode = binary_opcode(operator);
        let operation_type = if operator.is_comparison() {
            self.operand(lhs_type)
        } else {
            self.operand(ty)
        };

        let left = self.value(lhs)?;
        let destination = self.temporary();

        let mut instruction = Instruction::new(opcode, operation_type)
            .with_destination(destination)
            .with_sources([left]);

        match rhs.as_integer() {
            Some(constant) if !types.is_float(rhs_type) => {
                instruction = instruction.with_immediate(Immediate::Integer(constant));
            }
            _ => {
                let right = self.value(rhs)?;
                instruction = instruction.with_sources([right]);
            }
        }

        if operator.class() == BinaryOperatorClass::Shift {
            instruction = instruction.with_source_type(self.operand(rhs_type));
        }

        self.emit(instruction);

        Ok(destination)
    }

    fn pointer_offset(
        &mut self,
        operator: BinaryOperatorKind,
        pointer: &Expression,
        offset: &Expression,
        pointer_type: TypeId,
    ) -> Result<Register, CompileError> {
        let element_size = self
            .types
            .pointee(pointer_type)
            .map_or(1, |pointee| self.types.size_of(pointee).max(1));

        let base = self.value(pointer)?;
        let index = self.index(offset)?;
        let scaled = self.scale(index, element_size);
        let destination = self.temporary();

        let opcode = match operator {
            BinaryOperatorKind::Subtract => Opcode::Subtract,
            _ => Opcode::Add,
        };

        self.emit(
            Instruction::new(opcode, OperandType::ADDRESS)
                .with_destination(destination)
                .with_sources([base, scaled]),
        );

        Ok(destination)
    }

    fn short_circuit(
        &mut self,
        operator: BinaryOperatorKind,
        lhs: &Expression,
        rhs: &Expression,
    ) -> Result<Register, CompileError> {
        let destination = self.register(StorageClass::Local);
        let end = self.internal_label();

        let left = self.value(lhs)?;
        self.move_into(destination, left, OperandType::BOOL);

        let skip = match operator {
            BinaryOperatorKind::LogicalAnd => Opcode::BranchIfZero,
            _ => Opcode::BranchIfNotZero,
        };
        self.branch(skip, Some(destination), OperandType::BOOL, end);

        let right = self.value(rhs)?;
        self.move_into(destination, right, OperandType::BOOL);
        self.define_label(end)?;

        Ok(destination)
    }

    fn ternary(
        &mut self,
        condition: &Expression,
        then: &Expression,
        otherwise: &Expression,
        ty: TypeId,
        mode: AccessMode,
    ) -> Result<Option<Register>, CompileError> {
        let operand = self.operand(ty);
        let destination = (!operand.is_void()).then(|| self.register(StorageClass::Local));
        let otherwise_label = self.internal_label();
        let end = self.internal_label();

        let condition_type = self.operand(Self::type_of(condition)?);
        let condition = self.value(condition)?;
        self.branch(Opcode::BranchIfZero, Some(condition), condition_type, otherwise_label);

        for (index, arm) in [then, otherwise].into_iter().enumerate() {
            if index == 1 {
                self.jump(end);
                self.define_label(otherwise_label)?;
            }

            let value = self.expression(arm, mode)?;

            if let (Some(destination), Some(value)) = (destination, value) {
                self.move_into(destination, value, operand);
            }
        }

        self.define_label(end)?;

        Ok(destination)
    }

    fn unary(
        &mut self,
        operator: UnaryOperatorKind,
        operand: &Expression,
        ty: TypeId,
        mode: AccessMode,
    ) -> Result<Register, CompileError> {
        let opcode = match operator {
            UnaryOperatorKind::AddressOf => return self.address(operand),
            UnaryOperatorKind::Deref => {
                let pointer = self.value(operand)?;
                return Ok(self.load_or_address(pointer, ty, mode));
            }
            UnaryOperatorKind::PreIncrement
            | UnaryOperatorKind::PreDecrement
            | UnaryOperatorKind::PostIncrement
            | UnaryOperatorKind::PostDecrement => return self.increment(operator, operand, ty),
            UnaryOperatorKind::Negate => Opcode::Negate,
            UnaryOperatorKind::BitwiseNot => Opcode::BitwiseNot,
            UnaryOperatorKind::LogicalNot => Opcode::LogicalNot,
        };

        // `!` tests its operand in the operand's own type
        let operation_type = match operator {
            UnaryOperatorKind::LogicalNot => self.operand(Self::type_of(operand)?),
            _ => self.operand(ty),
        };

        let value = self.value(operand)?;
        let destination = self.temporary();

        self.emit(
            Instruction::new(opcode, operation_type)
                .with_destination(destination)
                .with_sources([value]),
        );

        Ok(destination)
    }

    fn increment(
        &mut self,
        operator: UnaryOperatorKind,
        operand: &Expression,
        ty: TypeId,
    ) -> Result<Register, CompileError> {
        let operand_type = self.operand(ty);
        let place = self.place(operand)?;
        let current = self.read(place, ty);

        let is_post = matches!(
            operator,
            UnaryOperatorKind::PostIncrement | UnaryOperatorKind::PostDecrement
        );
        let opcode = match operator {
            UnaryOperatorKind::PreIncrement | UnaryOperatorKind::PostIncrement => Opcode::Add,
            _ => Opcode::Subtract,
        };

        let previous = if is_post {
            let previous = self.temporary();

            self.emit(
                Instruction::new(Opcode::Move, operand_type)
                    .with_destination(previous)
                    .with_sources([current]),
            );

            Some(previous)
        } else {
            None
        };

        let updated = self.temporary();
        let mut instruction = Instruction::new(opcode, operand_type)
            .with_destination(updated)
            .with_sources([current]);

        if operand_type.kind == OperandKind::Float {
            let one = self.temporary();

            self.emit(
                Instruction::new(Opcode::LoadImmediate, operand_type)
                    .with_destination(one)
                    .with_immediate(Immediate::Float(1.0)),
            );
            instruction = instruction.with_sources([one]);
        } else {
            let step = self
                .types
                .pointee(ty)
                .map_or(1, |pointee| self.types.size_of(pointee).max(1));
            instruction = instruction.with_immediate(Immediate::Integer(step as i64));
        }

        self.emit(instruction);
        let stored = self.write(place, ty, updated);

        Ok(previous.unwrap_or(stored))
    }

    fn call(
        &mut self,
        callee: InternedSymbol,
        symbol: Option<SymbolId>,
        arguments: &[Expression],
    ) -> Result<Option<Register>, CompileError> {
        let Some(symbol) = symbol else {
            let opcode = match callee.value() {
                ABORT_INTRINSIC => Opcode::Abort,
                DEBUG_TRAP_INTRINSIC => Opcode::DebugTrap,
                _ => return Err(CompileError::UnresolvedIdentifier(callee)),
            };

            self.emit(Instruction::new(opcode, OperandType::VOID));
            return Ok(None);
        };

        let declaration = self.program.scopes.symbol(symbol);
        let name = declaration.name;
        let function_type = declaration.ty.ok_or(CompileError::UntypedExpression)?;

        let TypeKind::Function {
            return_type,
            parameters,
            ..
        } = self.types.kind(function_type)
        else {
            return Err(CompileError::UnresolvedIdentifier(callee));
        };
        let (return_type, parameters) = (*return_type, parameters.clone());

        let mut sources = Vec::with_capacity(arguments.len() + 1);
        let mut source_types = Vec::with_capacity(arguments.len() + 1);

        for (index, argument) in arguments.iter().enumerate() {
            let argument_type = Self::type_of(argument)?;
            let is_reference = parameters.get(index).is_some_and(|parameter| parameter.is_reference);

            let register = if is_reference {
                self.address(argument)?
            } else if self.types.is_aggregate(argument_type) {
                let source = self.value(argument)?;
                self.copy_to_block(source, argument_type)
            } else {
                self.value(argument)?
            };

            sources.push(register);
            source_types.push(if is_reference {
                OperandType::ADDRESS
            } else {
                self.operand(argument_type)
            });
        }

        let return_operand = self.operand(return_type);

        if self.types.is_aggregate(return_type) {
            let block = self.allocate_block(self.types.size_of(return_type));
            sources.push(self.block_address(block));
            source_types.push(OperandType::ADDRESS);
        }

        let destination = (!return_operand.is_void()).then(|| self.temporary());

        let mut instruction = Instruction::new(Opcode::Call, return_operand)
            .with_symbol(name)
            .with_sources(sources);
        instruction.source_types = source_types;
        instruction.destination = destination;

        self.emit(instruction);

        Ok(destination)
    }
}

fn binary_opcode(operator: BinaryOperatorKind) -> Opcode {
    match operator {
        BinaryOperatorKind::Add => Opcode::Add,
        BinaryOperatorKind::Subtract => Opcode::Subtract,
        BinaryOperatorKind::Multiply => Opcode::Multiply,
        BinaryOperatorKind::Divide => Opcode::Divide,
        BinaryOperatorKind::Modulus => Opcode::Modulus,
        BinaryOperatorKind::Equals => Opcode::Equal,
        BinaryOperatorKind::NotEquals => Opcode::NotEqual,
        BinaryOperatorKind::LessThan => Opcode::LessThan,
        BinaryOperatorKind::LessThanOrEqualTo => Opcode::LessThanOrEqual,
        BinaryOperatorKind::GreaterThan => Opcode::GreaterThan,
        BinaryOperatorKind::GreaterThanOrEqualTo => Opcode::GreaterThanOrEqual,
        BinaryOperatorKind::BitwiseAnd => Opcode::BitwiseAnd,
        BinaryOperatorKind::BitwiseOr => Opcode::BitwiseOr,
        BinaryOperatorKind::BitwiseXor => Opcode::BitwiseXor,
        BinaryOperatorKind::ShiftLeft => Opcode::ShiftLeft,
        BinaryOperatorKind::ShiftRight => Opcode::ShiftRight,
        // Short-circuit operators compile to branches
        BinaryOperatorKind::LogicalAnd | BinaryOperatorKind::LogicalOr => Opcode::Nop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        diagnostics::DiagnosticSink,
        frontend::ast::build::{ParamSpec, ProgramBuilder},
        middle::{analysis::analyze_program, lowering::lower_program},
    };

    fn compile(types: &mut TypeArena, program: &mut Program) -> Result<XilModule, CompileError> {
        let config = Config::default();
        let mut diagnostics = DiagnosticSink::new();

        analyze_program(program, types, &mut diagnostics, &config).unwrap();
        lower_program(program, types, &config);

        compile_program("test", program, types)
    }

    #[test]
    fn tail_return_falls_through_into_leave() {
        let mut types = TypeArena::default();
        let i32 = types.i32();

        let mut b = ProgramBuilder::new(&mut types, "");
        b.function("add", i32, &[ParamSpec::value("a", i32), ParamSpec::value("b", i32)], |b| {
            let (a, c) = (b.ident("a"), b.ident("b"));
            let sum = b.binary(BinaryOperatorKind::Add, a, c);
            vec![b.ret(Some(sum))]
        });
        let mut program = b.finish();

        let module = compile(&mut types, &mut program).unwrap();
        let method = module.method("add").unwrap();

        assert_eq!(method.opcodes().collect::<Vec<_>>(), vec![Opcode::Add, Opcode::Return]);
        assert_eq!(method.labels[&InternedSymbol::new(LEAVE_LABEL)], 1);
        assert_eq!(method.parameters, vec![OperandType::signed(4); 2]);
        // The sum is written straight into the return register
        assert_eq!(method.instructions[0].destination, method.instructions[1].sources.first().copied());
    }

    #[test]
    fn early_return_jumps_to_leave() {
        let mut types = TypeArena::default();
        let (i32, bool) = (types.i32(), types.bool());

        let mut b = ProgramBuilder::new(&mut types, "");
        b.function("pick", i32, &[ParamSpec::value("flag", bool)], |b| {
            let flag = b.ident("flag");
            let one = b.int(1);
            let early = b.ret(Some(one));
            let two = b.int(2);
            vec![b.if_(flag, early, None), b.ret(Some(two))]
        });
        let mut program = b.finish();

        let module = compile(&mut types, &mut program).unwrap();
        let method = module.method("pick").unwrap();
        let leave = method.labels[&InternedSymbol::new(LEAVE_LABEL)];

        let jumps: Vec<_> = method
            .instructions
            .iter()
            .filter(|instruction| instruction.opcode == Opcode::Jump)
            .collect();

        assert_eq!(jumps.len(), 1);
        assert_eq!(jumps[0].target(), Some(leave));
        assert_eq!(method.instructions.last().unwrap().opcode, Opcode::Return);
    }

    #[test]
    fn member_access_uses_aligned_offsets() {
        let mut types = TypeArena::default();
        let (i32, i8) = (types.i32(), types.i8());

        let mut b = ProgramBuilder::new(&mut types, "");
        let pair = b.struct_type("Pair", &[("first", i8), ("second", i32)]);
        let pair_pointer = b.pointer(pair);
        b.function("second", i32, &[ParamSpec::value("p", pair_pointer)], |b| {
            let p = b.ident("p");
            let member = b.arrow(p, "second");
            vec![b.ret(Some(member))]
        });
        let mut program = b.finish();

        let module = compile(&mut types, &mut program).unwrap();
        let method = module.method("second").unwrap();

        assert_eq!(
            method.opcodes().collect::<Vec<_>>(),
            vec![Opcode::Add, Opcode::Load, Opcode::Return]
        );
        assert_eq!(method.instructions[0].immediates, vec![Immediate::Integer(8)]);
    }

    #[test]
    fn negative_pointer_index_steps_backwards() {
        let mut types = TypeArena::default();
        let i32 = types.i32();
        let pointer = types.pointer_to(i32);

        let mut b = ProgramBuilder::new(&mut types, "");
        b.function("previous", i32, &[ParamSpec::value("p", pointer)], |b| {
            let p = b.ident("p");
            let minus_one = b.int(-1);
            let element = b.subscript(p, minus_one);
            vec![b.ret(Some(element))]
        });
        let mut program = b.finish();

        let module = compile(&mut types, &mut program).unwrap();
        let method = module.method("previous").unwrap();

        assert_eq!(
            method.opcodes().collect::<Vec<_>>(),
            vec![Opcode::Add, Opcode::Load, Opcode::Return]
        );
        assert_eq!(method.instructions[0].immediates, vec![Immediate::Integer(-4)]);
    }

    #[test]
    fn aggregate_returns_use_a_hidden_out_pointer() {
        let mut types = TypeArena::default();
        let i32 = types.i32();

        let mut b = ProgramBuilder::new(&mut types, "");
        let pair = b.struct_type("Pair", &[("a", i32), ("b", i32)]);
        b.function("make", pair, &[], |b| {
            let local = b.local("p", Some(pair), None);
            let p = b.ident("p");
            vec![local, b.ret(Some(p))]
        });
        let mut program = b.finish();

        let module = compile(&mut types, &mut program).unwrap();
        let method = module.method("make").unwrap();

        assert!(method.returns_aggregate);
        assert_eq!(method.parameters, vec![OperandType::ADDRESS]);
        assert!(method.opcodes().any(|opcode| opcode == Opcode::BlockCopy));
        assert_eq!(method.blocks.len(), 1);
    }

    #[test]
    fn unlowered_loops_are_rejected() {
        let mut types = TypeArena::default();
        let void = types.void();

        let mut b = ProgramBuilder::new(&mut types, "");
        b.function("spin", void, &[], |b| {
            let condition = b.boolean(true);
            let body = b.block(|_| vec![]);
            vec![b.while_(condition, body)]
        });
        let mut program = b.finish();

        let config = Config::default();
        let mut diagnostics = DiagnosticSink::new();
        analyze_program(&mut program, &mut types, &mut diagnostics, &config).unwrap();

        assert_eq!(
            compile_program("test", &program, &types),
            Err(CompileError::UnloweredConstruct { construct: "while" })
        );
    }

    #[test]
    fn undefined_labels_are_reported() {
        let mut types = TypeArena::default();
        let void = types.void();

        let mut b = ProgramBuilder::new(&mut types, "");
        b.function("lost", void, &[], |b| vec![b.goto("nowhere")]);
        let program = b.finish();

        // Skips analysis, which would reject the goto first
        assert_eq!(
            compile_program("test", &program, &types),
            Err(CompileError::UndefinedLabel {
                method: InternedSymbol::new("lost"),
                label: InternedSymbol::new("nowhere"),
            })
        );
    }

    #[test]
    fn globals_are_initialized_by_static_init() {
        let mut types = TypeArena::default();
        let i32 = types.i32();

        let mut b = ProgramBuilder::new(&mut types, "");
        let seven = b.int(7);
        b.global("seed", Some(i32), Some(seven));
        b.function("read", i32, &[], |b| {
            let seed = b.ident("seed");
            vec![b.ret(Some(seed))]
        });
        let mut program = b.finish();

        let module = compile(&mut types, &mut program).unwrap();
        let init = module.method(STATIC_INIT).unwrap();

        assert_eq!(module.statics.len(), 1);
        assert_eq!(module.statics[0].size, 4);
        assert_eq!(
            init.opcodes().collect::<Vec<_>>(),
            vec![Opcode::StaticAddress, Opcode::LoadImmediate, Opcode::Store, Opcode::Return]
        );
        assert!(module.method("read").unwrap().opcodes().any(|opcode| opcode == Opcode::Load));
    }
}
