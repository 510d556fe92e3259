use colored::Colorize;
use itertools::Itertools;

use super::{Immediate, Instruction, XilMethod, XilModule};

pub fn pretty_print_module(module: &XilModule) -> String {
    let mut output = String::new();

    for slot in &module.statics {
        output.push_str(&format!(
            "{} {} {}\n",
            "static".magenta(),
            slot.name.value().blue(),
            format!("[{} bytes at {:#x}]", slot.size, slot.offset).white()
        ));
    }

    if !module.statics.is_empty() {
        output.push('\n');
    }

    output.push_str(&module.methods.iter().map(pretty_print_method).join("\n"));

    output
}

pub fn pretty_print_method(method: &XilMethod) -> String {
    let mut output = format!(
        "{} {}{}{}{} {}\n",
        "method".magenta(),
        method.name.value().blue(),
        "(".white(),
        method.parameters.iter().join(", "),
        ")".white(),
        format!("-> {}", method.return_type).white()
    );

    for (offset, instruction) in method.instructions.iter().enumerate() {
        for label in method
            .labels
            .iter()
            .filter(|(_, target)| **target == offset)
            .map(|(label, _)| label.value())
            .sorted()
        {
            output.push_str(&format!("{}\n", format!("{label}:").bright_red()));
        }

        output.push_str(&format!("  {}  {instruction}\n", format!("{offset:04}").white()));
    }

    output
}

impl core::fmt::Display for Immediate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Immediate::Integer(value) => write!(f, "{}", value.to_string().purple()),
            Immediate::Float(value) => write!(f, "{}", format!("{value:?}").purple()),
            Immediate::Offset(offset) => write!(f, "{}", format!("@{offset:04}").bright_red()),
        }
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(destination) = self.destination {
            write!(f, "{destination} {} ", "=".white())?;
        }

        write!(f, "{}", self.opcode.to_string().cyan())?;

        if !self.ty.is_void() {
            write!(f, ".{}", self.ty)?;
        }

        let operands = self
            .sources
            .iter()
            .map(|source| source.to_string())
            .chain(self.immediates.iter().map(|immediate| immediate.to_string()))
            .chain(self.symbol.map(|symbol| format!("{}", symbol.value().blue())))
            .join(", ");

        if !operands.is_empty() {
            write!(f, " {operands}")?;
        }

        if !self.source_types.is_empty() {
            write!(f, " {}", format!("({})", self.source_types.iter().join(", ")).white())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashMap;
    use indoc::indoc;

    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::xil::{LEAVE_LABEL, Opcode, OperandType, Register, StorageClass},
    };

    #[test]
    fn prints_labels_before_their_instruction() {
        let parameter = Register {
            index: 0,
            class: StorageClass::Parameter,
        };
        let result = Register {
            index: 1,
            class: StorageClass::Local,
        };

        let method = XilMethod {
            name: InternedSymbol::new("scale"),
            parameters: vec![OperandType::signed(4)],
            locals: vec![],
            blocks: vec![],
            instructions: vec![
                Instruction::new(Opcode::ShiftLeft, OperandType::signed(4))
                    .with_destination(result)
                    .with_sources([parameter])
                    .with_immediate(Immediate::Integer(3))
                    .with_source_type(OperandType::signed(4)),
                Instruction::new(Opcode::Return, OperandType::signed(4)).with_sources([result]),
            ],
            labels: HashMap::from_iter([(InternedSymbol::new(LEAVE_LABEL), 1)]),
            register_count: 2,
            return_type: OperandType::signed(4),
            returns_aggregate: false,
        };

        let printed = strip_ansi_escapes::strip_str(pretty_print_method(&method));

        assert_eq!(
            printed,
            indoc! {"
                method scale(i32) -> i32
                  0000  r1 = shift_left.i32 p0, 3 (i32)
                $leave:
                  0001  return.i32 r1
            "}
        );
    }
}
