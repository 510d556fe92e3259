use colored::Colorize;
use itertools::Itertools;

use crate::{
    frontend::ast::{Expression, ExpressionKind, Function, Program, Statement, StatementKind, UnaryOperatorKind},
    middle::{scope::ScopeTree, ty::TypeArena},
};

pub fn pretty_print_program(program: &Program, types: &TypeArena) -> String {
    let mut output = String::new();

    for global in program.globals() {
        let printer = TreePrinter {
            scopes: &program.scopes,
            types,
        };

        output.push_str(&printer.statement(&global.statement, 0));
    }

    for function in program.functions() {
        output.push_str(&pretty_print_function(function, &program.scopes, types));
    }

    output
}

pub fn pretty_print_function(function: &Function, scopes: &ScopeTree, types: &TypeArena) -> String {
    let printer = TreePrinter { scopes, types };

    let parameters = function
        .parameters
        .iter()
        .map(|parameter| {
            let symbol = scopes.symbol(*parameter);
            let reference = if symbol.is_reference_parameter() { "&" } else { "" };

            format!(
                "{}: {reference}{}",
                symbol.name,
                symbol.ty.map_or("?".to_owned(), |ty| types.display(ty))
            )
        })
        .join(", ");

    format!(
        "{} {}({parameters}): {} {}",
        "fn".magenta(),
        function.name.value().blue(),
        types.display(function.return_type),
        printer.statement(&function.body, 0).trim_start()
    )
}

struct TreePrinter<'a> {
    scopes: &'a ScopeTree,
    types: &'a TypeArena,
}

impl TreePrinter<'_> {
    fn statement(&self, statement: &Statement, depth: usize) -> String {
        let indent = "    ".repeat(depth);

        match &statement.kind {
            StatementKind::Expression(expression) => format!("{indent}{};\n", self.expression(expression)),
            StatementKind::Compound { statements, .. } => {
                let body: String = statements
                    .iter()
                    .map(|statement| self.statement(statement, depth + 1))
                    .collect();

                format!("{indent}{{\n{body}{indent}}}\n")
            }
            StatementKind::Sequence(statements) => statements
                .iter()
                .map(|statement| self.statement(statement, depth))
                .collect(),
            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                let mut output = format!(
                    "{indent}{} ({})\n{}",
                    "if".magenta(),
                    self.expression(condition),
                    self.statement(then, depth + 1)
                );

                if let Some(otherwise) = otherwise {
                    output.push_str(&format!(
                        "{indent}{}\n{}",
                        "else".magenta(),
                        self.statement(otherwise, depth + 1)
                    ));
                }

                output
            }
            StatementKind::While { condition, body } => format!(
                "{indent}{} ({})\n{}",
                "while".magenta(),
                self.expression(condition),
                self.statement(body, depth + 1)
            ),
            StatementKind::DoWhile { body, condition } => format!(
                "{indent}{}\n{}{indent}{} ({});\n",
                "do".magenta(),
                self.statement(body, depth + 1),
                "while".magenta(),
                self.expression(condition)
            ),
            StatementKind::For {
                initializer,
                condition,
                step,
                body,
            } => format!(
                "{indent}{} ({}; {}; {})\n{}",
                "for".magenta(),
                initializer
                    .as_ref()
                    .map(|s| self.statement(s, 0).trim_end().trim_end_matches(';').to_owned())
                    .unwrap_or_default(),
                condition.as_ref().map(|e| self.expression(e)).unwrap_or_default(),
                step.as_ref().map(|e| self.expression(e)).unwrap_or_default(),
                self.statement(body, depth + 1)
            ),
            StatementKind::Break => format!("{indent}{};\n", "break".magenta()),
            StatementKind::Continue => format!("{indent}{};\n", "continue".magenta()),
            StatementKind::Return(None) => format!("{indent}{};\n", "return".magenta()),
            StatementKind::Return(Some(value)) => {
                format!("{indent}{} {};\n", "return".magenta(), self.expression(value))
            }
            StatementKind::Goto(label) => format!("{indent}{} {};\n", "goto".magenta(), label.value().bright_red()),
            StatementKind::ComputedGoto(target) => {
                format!("{indent}{} *{};\n", "goto".magenta(), self.expression(target))
            }
            StatementKind::Label(label) => format!("{indent}{}\n", format!("{label}:").bright_red()),
            StatementKind::Switch(switch) => format!(
                "{indent}{} ({})\n{}",
                "switch".magenta(),
                self.expression(&switch.value),
                self.statement(&switch.body, depth + 1)
            ),
            StatementKind::Case(value) => format!("{indent}{} {}:\n", "case".magenta(), self.expression(value)),
            StatementKind::Default => format!("{indent}{}:\n", "default".magenta()),
            StatementKind::Assert { condition, .. } => {
                format!("{indent}{}({});\n", "assert".magenta(), self.expression(condition))
            }
            StatementKind::InlineAsm(asm) => {
                format!("{indent}{} {:?};\n", "asm".magenta(), asm.template)
            }
            StatementKind::Finally(body) => format!(
                "{indent}{}\n{}",
                "finally".magenta(),
                self.statement(body, depth + 1)
            ),
            StatementKind::Empty => format!("{indent};\n"),
        }
    }

    fn expression(&self, expression: &Expression) -> String {
        match &expression.kind {
            ExpressionKind::Literal(literal) => literal.to_string().purple().to_string(),
            ExpressionKind::Identifier { name, .. } => name.to_string(),
            ExpressionKind::Binary { operator, lhs, rhs } => {
                format!("({} {operator} {})", self.expression(lhs), self.expression(rhs))
            }
            ExpressionKind::Unary { operator, operand } => match operator {
                UnaryOperatorKind::PostIncrement | UnaryOperatorKind::PostDecrement => {
                    format!("{}{operator}", self.expression(operand))
                }
                _ => format!("{operator}{}", self.expression(operand)),
            },
            ExpressionKind::Ternary {
                condition,
                then,
                otherwise,
            } => format!(
                "({} ? {} : {})",
                self.expression(condition),
                self.expression(then),
                self.expression(otherwise)
            ),
            ExpressionKind::Member {
                object,
                member,
                through_pointer,
            } => format!(
                "{}{}{member}",
                self.expression(object),
                if *through_pointer { "->" } else { "." }
            ),
            ExpressionKind::ScopeResolution { scope, member } => format!("{scope}::{member}"),
            ExpressionKind::Call {
                callee, arguments, ..
            } => format!(
                "{}({})",
                callee.value().blue(),
                arguments.iter().map(|a| self.expression(a)).join(", ")
            ),
            ExpressionKind::Subscript { base, index } => {
                format!("{}[{}]", self.expression(base), self.expression(index))
            }
            ExpressionKind::CollectionInit(elements) => {
                format!("{{{}}}", elements.iter().map(|e| self.expression(e)).join(", "))
            }
            ExpressionKind::Cast {
                expression, target, ..
            } => format!("({}){}", self.types.display(*target).yellow(), self.expression(expression)),
            ExpressionKind::Assign { target, value } => {
                format!("{} = {}", self.expression(target), self.expression(value))
            }
            ExpressionKind::CompoundAssign {
                operator,
                target,
                value,
            } => format!("{} {operator}= {}", self.expression(target), self.expression(value)),
            ExpressionKind::VariableInit {
                symbol,
                initializer,
            } => {
                let symbol = self.scopes.symbol(*symbol);
                let ty = symbol
                    .ty
                    .map_or(String::new(), |ty| self.types.display(ty));

                match initializer {
                    Some(initializer) => {
                        format!("{}: {} = {}", symbol.name, ty.yellow(), self.expression(initializer))
                    }
                    None => format!("{}: {}", symbol.name, ty.yellow()),
                }
            }
            ExpressionKind::SizeOf(ty) => format!("{}({})", "sizeof".magenta(), self.types.display(*ty)),
        }
    }
}
