//! A register-windowed interpreter for XIL modules.
//!
//! Each call pushes a frame whose window of 8-byte register slots is carved
//! out of the stack region, followed by the method's aggregate blocks.
//! Module statics live below the first frame.

use thiserror::Error;
use tracing::{debug, debug_span, trace, warn};

use crate::{
    config::Config,
    frontend::intern::InternedSymbol,
    middle::xil::{Immediate, Instruction, Opcode, OperandKind, Register, STATIC_INIT, XilModule},
};

use self::memory::{CODE_BASE, STACK_BASE, Stack};

pub mod arith;
pub mod memory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("address {address:#x} is below the lowest valid address")]
    InvalidAddress { address: u64 },
    #[error("address {address:#x} points into code")]
    CodeAccess { address: u64 },
    #[error("offset {offset} is past the end of `{method}`")]
    CodeOutOfRange { method: InternedSymbol, offset: usize },
    #[error("stack address {address:#x} is beyond the current frame")]
    OutOfFrame { address: u64 },
    #[error("address {address:#x} is not mapped")]
    Unmapped { address: u64 },
    #[error("integer division by zero")]
    DivisionByZero,
    #[error("program aborted")]
    Aborted,
    #[error("hit a debug trap")]
    DebugTrap,
    #[error("{0} are not supported by the interpreter")]
    Unsupported(&'static str),
    #[error("no method named `{0}`")]
    UnknownMethod(InternedSymbol),
    #[error("no static named `{0}`")]
    UnknownStatic(InternedSymbol),
    #[error("`{method}` takes {expected} argument(s) but {actual} were given")]
    ArgumentCount {
        method: InternedSymbol,
        expected: usize,
        actual: usize,
    },
    #[error("malformed `{opcode}` instruction")]
    MalformedInstruction { opcode: Opcode },
    #[error("exceeded the limit of {0} steps")]
    StepLimitExceeded(u64),
}

#[derive(Debug)]
struct Frame {
    method: usize,
    pc: usize,
    /// Byte offset of the register window from `STACK_BASE`
    base: usize,
    /// Stack extent to restore when the frame is popped
    caller_extent: usize,
    /// Receives the callee's return value on the first step after it
    /// returns
    pending_return: Option<Register>,
}

pub struct Interpreter<'m> {
    module: &'m XilModule,
    stack: Stack,
    frames: Vec<Frame>,
    /// Code address of each method's first instruction
    code_bases: Vec<u64>,
    last_return: u64,
    steps: u64,
    max_steps: u64,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m XilModule, config: &Config) -> Self {
        let mut code_bases = Vec::with_capacity(module.methods.len());
        let mut next = CODE_BASE;

        for method in &module.methods {
            code_bases.push(next);
            next += method.instructions.len().max(1) as u64;
        }

        Self {
            module,
            stack: Stack::new(config.initial_stack_size),
            frames: Vec::new(),
            code_bases,
            last_return: 0,
            steps: 0,
            max_steps: config.max_steps,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Runs `entry` to completion after initializing statics. Returns the
    /// result in the canonical form of the method's return type.
    pub fn run(&mut self, entry: &str, arguments: &[u64]) -> Result<u64, Fault> {
        let _span = debug_span!("run", entry).entered();

        let module = self.module;
        let name = InternedSymbol::new(entry);
        let index = module.method_index(name).ok_or(Fault::UnknownMethod(name))?;
        let method = &module.methods[index];

        if arguments.len() != method.parameters.len() {
            return Err(Fault::ArgumentCount {
                method: name,
                expected: method.parameters.len(),
                actual: arguments.len(),
            });
        }

        self.reset();

        let outcome = self
            .initialize_statics()
            .and_then(|()| self.execute(index, arguments));

        match outcome {
            Ok(value) => {
                debug!(steps = self.steps, "run finished");
                Ok(arith::extend(value, method.return_type))
            }
            Err(fault) => {
                warn!(%fault, steps = self.steps, depth = self.frames.len(), "run faulted");
                self.frames.clear();
                Err(fault)
            }
        }
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.steps = 0;
        self.last_return = 0;

        let static_size = self.module.static_size() as usize;

        self.stack.set_extent(static_size);
        self.stack.zero(0, static_size);

        for slot in &self.module.statics {
            self.stack.fill(slot.offset as usize, &slot.data);
        }
    }

    fn initialize_statics(&mut self) -> Result<(), Fault> {
        match self.module.method_index(InternedSymbol::new(STATIC_INIT)) {
            Some(index) => self.execute(index, &[]).map(|_| ()),
            None => Ok(()),
        }
    }

    fn execute(&mut self, method: usize, arguments: &[u64]) -> Result<u64, Fault> {
        let depth = self.frames.len();
        self.push_frame(method, arguments);

        while self.frames.len() > depth {
            self.step()?;
        }

        Ok(self.last_return)
    }

    fn push_frame(&mut self, method: usize, arguments: &[u64]) {
        let definition = &self.module.methods[method];
        let caller_extent = self.stack.extent();
        let base = caller_extent.next_multiple_of(8);
        let size = definition.frame_size() as usize;

        self.stack.set_extent(base + size);
        self.stack.zero(base, size);

        for (index, argument) in arguments.iter().enumerate() {
            self.stack.set_slot(base + index * 8, *argument);
        }

        debug!(method = definition.name.value(), depth = self.frames.len(), base, "call");

        self.frames.push(Frame {
            method,
            pc: 0,
            base,
            caller_extent,
            pending_return: None,
        });
    }

    fn frame(&self) -> &Frame {
        // `step` only runs while a frame is live
        &self.frames[self.frames.len() - 1]
    }

    fn read_register(&self, register: Register) -> u64 {
        self.stack.slot(self.frame().base + register.index as usize * 8)
    }

    fn write_register(&mut self, register: Register, value: u64) {
        let offset = self.frame().base + register.index as usize * 8;
        self.stack.set_slot(offset, value);
    }

    fn source(&self, instruction: &Instruction, index: usize) -> Result<u64, Fault> {
        instruction
            .sources
            .get(index)
            .map(|register| self.read_register(*register))
            .ok_or(Fault::MalformedInstruction {
                opcode: instruction.opcode,
            })
    }

    /// The right hand operand: a second source register or the first
    /// immediate
    fn operand(&self, instruction: &Instruction) -> Result<u64, Fault> {
        if instruction.sources.len() > 1 {
            return self.source(instruction, 1);
        }

        let ty = instruction.ty;

        match instruction.immediates.first() {
            Some(Immediate::Integer(value)) if ty.kind == OperandKind::Float => {
                Ok(arith::from_float(*value as f64, ty.width))
            }
            Some(Immediate::Float(value)) => Ok(arith::from_float(*value, ty.width)),
            Some(immediate) => immediate
                .as_integer()
                .map(|value| value as u64)
                .ok_or(Fault::MalformedInstruction {
                    opcode: instruction.opcode,
                }),
            None => Err(Fault::MalformedInstruction {
                opcode: instruction.opcode,
            }),
        }
    }

    fn integer_immediate(instruction: &Instruction) -> Result<i64, Fault> {
        instruction
            .immediates
            .first()
            .and_then(|immediate| immediate.as_integer())
            .ok_or(Fault::MalformedInstruction {
                opcode: instruction.opcode,
            })
    }

    fn destination(instruction: &Instruction) -> Result<Register, Fault> {
        instruction.destination.ok_or(Fault::MalformedInstruction {
            opcode: instruction.opcode,
        })
    }

    fn method_address(&self, name: InternedSymbol) -> Result<u64, Fault> {
        self.module
            .method_index(name)
            .map(|index| self.code_bases[index])
            .ok_or(Fault::UnknownMethod(name))
    }

    fn step(&mut self) -> Result<(), Fault> {
        self.steps += 1;

        if self.steps > self.max_steps {
            return Err(Fault::StepLimitExceeded(self.max_steps));
        }

        let frame_index = self.frames.len() - 1;

        if let Some(destination) = self.frames[frame_index].pending_return.take() {
            self.write_register(destination, self.last_return);
        }

        let module = self.module;
        let method = &module.methods[self.frames[frame_index].method];
        let pc = self.frames[frame_index].pc;
        let instruction = method
            .instructions
            .get(pc)
            .ok_or(Fault::CodeOutOfRange {
                method: method.name,
                offset: pc,
            })?;

        self.frames[frame_index].pc += 1;

        trace!(method = method.name.value(), pc, %instruction, "step");

        let ty = instruction.ty;

        match instruction.opcode {
            Opcode::Nop => {}
            Opcode::LoadImmediate => {
                let value = match instruction.immediates.first() {
                    Some(Immediate::Float(value)) => arith::from_float(*value, ty.width),
                    Some(Immediate::Integer(value)) if ty.kind == OperandKind::Float => {
                        arith::from_float(*value as f64, ty.width)
                    }
                    _ => arith::extend(Self::integer_immediate(instruction)? as u64, ty),
                };

                self.write_register(Self::destination(instruction)?, value);
            }
            Opcode::Move => {
                let value = self.source(instruction, 0)?;
                self.write_register(Self::destination(instruction)?, value);
            }
            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::Modulus
            | Opcode::ShiftLeft
            | Opcode::ShiftRight
            | Opcode::BitwiseAnd
            | Opcode::BitwiseOr
            | Opcode::BitwiseXor => {
                let (lhs, rhs) = (self.source(instruction, 0)?, self.operand(instruction)?);
                let result = arith::binary(instruction.opcode, ty, lhs, rhs)?;

                let destination = Self::destination(instruction)?;
                let previous = self.read_register(destination);
                self.write_register(destination, arith::merge(previous, result, ty.width));
            }
            Opcode::Negate | Opcode::BitwiseNot => {
                let result = arith::unary(instruction.opcode, ty, self.source(instruction, 0)?)?;

                let destination = Self::destination(instruction)?;
                let previous = self.read_register(destination);
                self.write_register(destination, arith::merge(previous, result, ty.width));
            }
            Opcode::LogicalNot => {
                let value = arith::is_zero(ty, self.source(instruction, 0)?);
                self.write_register(Self::destination(instruction)?, u64::from(value));
            }
            Opcode::Equal
            | Opcode::NotEqual
            | Opcode::LessThan
            | Opcode::LessThanOrEqual
            | Opcode::GreaterThan
            | Opcode::GreaterThanOrEqual => {
                let (lhs, rhs) = (self.source(instruction, 0)?, self.operand(instruction)?);
                let result = arith::compare(instruction.opcode, ty, lhs, rhs)?;

                self.write_register(Self::destination(instruction)?, u64::from(result));
            }
            Opcode::Convert => {
                let from = instruction
                    .source_types
                    .first()
                    .copied()
                    .ok_or(Fault::MalformedInstruction {
                        opcode: instruction.opcode,
                    })?;
                let value = arith::convert(self.source(instruction, 0)?, from, ty)?;

                self.write_register(Self::destination(instruction)?, value);
            }
            Opcode::Load => {
                let offset = instruction
                    .immediates
                    .first()
                    .and_then(|immediate| immediate.as_integer())
                    .unwrap_or(0);
                let address = self.source(instruction, 0)?.wrapping_add(offset as u64);
                let value = self.stack.read(address, ty.width)?;

                self.write_register(Self::destination(instruction)?, arith::extend(value, ty));
            }
            Opcode::Store => {
                let (address, value) = (self.source(instruction, 0)?, self.source(instruction, 1)?);
                self.stack.write(address, ty.width, value)?;
            }
            Opcode::RegisterAddress => {
                let index = Self::integer_immediate(instruction)? as usize;
                let address = Stack::address_of(self.frame().base + index * 8);

                self.write_register(Self::destination(instruction)?, address);
            }
            Opcode::BlockAddress => {
                let index = Self::integer_immediate(instruction)? as usize;
                let block = method.blocks.get(index).ok_or(Fault::MalformedInstruction {
                    opcode: instruction.opcode,
                })?;
                let offset = self.frame().base + method.register_count as usize * 8 + block.offset as usize;

                self.write_register(Self::destination(instruction)?, Stack::address_of(offset));
            }
            Opcode::StaticAddress => {
                let name = instruction.symbol.ok_or(Fault::MalformedInstruction {
                    opcode: instruction.opcode,
                })?;
                let slot = module
                    .static_slot(name)
                    .ok_or(Fault::UnknownStatic(name))?;

                self.write_register(Self::destination(instruction)?, STACK_BASE + slot.offset);
            }
            Opcode::FunctionAddress => {
                let name = instruction.symbol.ok_or(Fault::MalformedInstruction {
                    opcode: instruction.opcode,
                })?;
                let address = self.method_address(name)?;

                self.write_register(Self::destination(instruction)?, address);
            }
            Opcode::BlockCopy => {
                let (destination, source) = (self.source(instruction, 0)?, self.source(instruction, 1)?);
                let size = Self::integer_immediate(instruction)? as u64;

                self.stack.copy(destination, source, size)?;
            }
            Opcode::Jump => {
                self.frames[frame_index].pc = Self::integer_immediate(instruction)? as usize;
            }
            Opcode::BranchIfZero | Opcode::BranchIfNotZero => {
                let is_zero = arith::is_zero(ty, self.source(instruction, 0)?);

                if is_zero == (instruction.opcode == Opcode::BranchIfZero) {
                    self.frames[frame_index].pc = Self::integer_immediate(instruction)? as usize;
                }
            }
            Opcode::JumpIndirect => return Err(Fault::Unsupported("indirect jumps")),
            Opcode::Call => {
                let name = instruction.symbol.ok_or(Fault::MalformedInstruction {
                    opcode: instruction.opcode,
                })?;
                let callee = module
                    .method_index(name)
                    .ok_or(Fault::UnknownMethod(name))?;

                let arguments = instruction
                    .sources
                    .iter()
                    .map(|register| self.read_register(*register))
                    .collect::<Vec<_>>();

                let expected = module.methods[callee].parameters.len();

                if arguments.len() != expected {
                    return Err(Fault::ArgumentCount {
                        method: name,
                        expected,
                        actual: arguments.len(),
                    });
                }

                self.frames[frame_index].pending_return = instruction.destination;
                self.push_frame(callee, &arguments);
            }
            Opcode::Return => {
                self.last_return = match instruction.sources.first() {
                    Some(register) => self.read_register(*register),
                    None => 0,
                };

                let frame = self.frames.pop().ok_or(Fault::MalformedInstruction {
                    opcode: instruction.opcode,
                })?;
                self.stack.set_extent(frame.caller_extent);

                debug!(method = method.name.value(), value = self.last_return, "return");
            }
            Opcode::Abort => return Err(Fault::Aborted),
            Opcode::DebugTrap => return Err(Fault::DebugTrap),
            Opcode::InlineAsm => return Err(Fault::Unsupported("inline assembly blocks")),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashMap;

    use super::*;
    use crate::middle::xil::{OperandType, StorageClass, XilMethod};

    fn register(index: u32) -> Register {
        Register {
            index,
            class: StorageClass::Fast,
        }
    }

    fn method(name: &str, parameters: usize, instructions: Vec<Instruction>) -> XilMethod {
        XilMethod {
            name: InternedSymbol::new(name),
            parameters: vec![OperandType::signed(4); parameters],
            locals: vec![],
            blocks: vec![],
            register_count: 4,
            instructions,
            labels: HashMap::new(),
            return_type: OperandType::signed(4),
            returns_aggregate: false,
        }
    }

    fn module(methods: Vec<XilMethod>) -> XilModule {
        XilModule {
            name: "test".to_owned(),
            methods,
            statics: vec![],
        }
    }

    fn load(destination: u32, value: i64) -> Instruction {
        Instruction::new(Opcode::LoadImmediate, OperandType::signed(4))
            .with_destination(register(destination))
            .with_immediate(Immediate::Integer(value))
    }

    fn ret(source: u32) -> Instruction {
        Instruction::new(Opcode::Return, OperandType::signed(4)).with_sources([register(source)])
    }

    #[test]
    fn calls_write_the_result_into_the_caller() {
        let double = method(
            "double",
            1,
            vec![
                Instruction::new(Opcode::Add, OperandType::signed(4))
                    .with_destination(register(1))
                    .with_sources([register(0), register(0)]),
                ret(1),
            ],
        );
        let main = method(
            "main",
            0,
            vec![
                load(0, -21),
                Instruction::new(Opcode::Call, OperandType::signed(4))
                    .with_destination(register(1))
                    .with_sources([register(0)])
                    .with_symbol(InternedSymbol::new("double")),
                ret(1),
            ],
        );

        let module = module(vec![double, main]);
        let mut interpreter = Interpreter::new(&module, &Config::default());

        assert_eq!(interpreter.run("main", &[]).map(|value| value as i64), Ok(-42));
    }

    #[test]
    fn intrinsics_and_unsupported_operations_fault() {
        let config = Config::default();

        let aborting = module(vec![method("main", 0, vec![Instruction::new(Opcode::Abort, OperandType::VOID)])]);
        assert_eq!(Interpreter::new(&aborting, &config).run("main", &[]), Err(Fault::Aborted));

        let trapping = module(vec![method(
            "main",
            0,
            vec![Instruction::new(Opcode::DebugTrap, OperandType::VOID)],
        )]);
        assert_eq!(Interpreter::new(&trapping, &config).run("main", &[]), Err(Fault::DebugTrap));

        let indirect = module(vec![method(
            "main",
            0,
            vec![
                load(0, 0),
                Instruction::new(Opcode::JumpIndirect, OperandType::ADDRESS).with_sources([register(0)]),
            ],
        )]);
        assert!(matches!(
            Interpreter::new(&indirect, &config).run("main", &[]),
            Err(Fault::Unsupported(_))
        ));
    }

    #[test]
    fn jumping_past_the_end_of_a_method_faults() {
        let module = module(vec![method(
            "main",
            0,
            vec![Instruction::new(Opcode::Jump, OperandType::VOID).with_immediate(Immediate::Offset(7))],
        )]);

        assert_eq!(
            Interpreter::new(&module, &Config::default()).run("main", &[]),
            Err(Fault::CodeOutOfRange {
                method: InternedSymbol::new("main"),
                offset: 7
            })
        );
    }

    #[test]
    fn loads_from_code_and_null_fault() {
        let config = Config::default();

        let code_load = module(vec![
            method(
                "main",
                0,
                vec![
                    Instruction::new(Opcode::FunctionAddress, OperandType::ADDRESS)
                        .with_destination(register(0))
                        .with_symbol(InternedSymbol::new("main")),
                    Instruction::new(Opcode::Load, OperandType::signed(4))
                        .with_destination(register(1))
                        .with_sources([register(0)]),
                    ret(1),
                ],
            ),
        ]);
        assert_eq!(
            Interpreter::new(&code_load, &config).run("main", &[]),
            Err(Fault::CodeAccess { address: CODE_BASE })
        );

        let null_load = module(vec![method(
            "main",
            0,
            vec![
                load(0, 0),
                Instruction::new(Opcode::Load, OperandType::signed(4))
                    .with_destination(register(1))
                    .with_sources([register(0)]),
                ret(1),
            ],
        )]);
        assert_eq!(
            Interpreter::new(&null_load, &config).run("main", &[]),
            Err(Fault::InvalidAddress { address: 0 })
        );
    }

    #[test]
    fn runaway_loops_hit_the_step_limit() {
        let module = module(vec![method(
            "main",
            0,
            vec![Instruction::new(Opcode::Jump, OperandType::VOID).with_immediate(Immediate::Offset(0))],
        )]);
        let config = Config {
            max_steps: 100,
            ..Config::default()
        };

        assert_eq!(
            Interpreter::new(&module, &config).run("main", &[]),
            Err(Fault::StepLimitExceeded(100))
        );
    }

    #[test]
    fn argument_counts_are_checked() {
        let module = module(vec![method("main", 1, vec![ret(0)])]);

        assert_eq!(
            Interpreter::new(&module, &Config::default()).run("main", &[]),
            Err(Fault::ArgumentCount {
                method: InternedSymbol::new("main"),
                expected: 1,
                actual: 0
            })
        );
    }
}
