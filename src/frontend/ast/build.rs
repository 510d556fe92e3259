//! Programmatic construction of program trees.
//!
//! [`ProgramBuilder`] does the parser's bookkeeping: it allocates scopes,
//! declares symbols and user types, attaches attributes and records declared
//! labels. Expressions are built untyped and identifiers unresolved; the
//! analyzer does the rest.

use crate::{
    frontend::{
        SourceFileOrigin, SourceId, SourceMap, Token,
        ast::{
            BinaryOperatorKind, Expression, ExpressionKind, Function, Global, InlineAsm, Item,
            Literal, Program, Statement, StatementKind, Switch, UnaryOperatorKind,
            visit::{Visitor, walk_statement},
        },
        intern::InternedSymbol,
    },
    middle::{
        scope::{AttributeValue, ClassEntry, ScopeError, ScopeId, ScopeTree, Symbol, SymbolId, SymbolKind},
        ty::{ConstantValue, Member, NamedConstant, ParameterType, TypeArena, TypeId},
    },
};

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec<'a> {
    pub name: &'a str,
    pub ty: TypeId,
    pub is_reference: bool,
    pub maybe_unused: bool,
}

impl<'a> ParamSpec<'a> {
    pub fn value(name: &'a str, ty: TypeId) -> Self {
        Self {
            name,
            ty,
            is_reference: false,
            maybe_unused: false,
        }
    }

    pub fn reference(name: &'a str, ty: TypeId) -> Self {
        Self {
            is_reference: true,
            ..Self::value(name, ty)
        }
    }

    pub fn maybe_unused(mut self) -> Self {
        self.maybe_unused = true;
        self
    }
}

pub struct ProgramBuilder<'t> {
    types: &'t mut TypeArena,
    sources: SourceMap,
    scopes: ScopeTree,
    global_scope: ScopeId,
    items: Vec<Item>,
    errors: Vec<ScopeError>,
    source: SourceId,
    scope_stack: Vec<ScopeId>,
    next_offset: usize,
}

#[derive(Default)]
struct LabelCollector {
    labels: Vec<InternedSymbol>,
    finally_blocks: usize,
}

impl<'a> Visitor<'a> for LabelCollector {
    fn visit_statement(&mut self, statement: &'a Statement) {
        match &statement.kind {
            StatementKind::Label(name) => self.labels.push(*name),
            StatementKind::Finally(_) => self.finally_blocks += 1,
            _ => {}
        }

        walk_statement(self, statement)
    }
}

impl<'t> ProgramBuilder<'t> {
    pub fn new(types: &'t mut TypeArena, source_text: &str) -> Self {
        let mut sources = SourceMap::new();
        let source = sources.add(source_text, SourceFileOrigin::Memory);

        let mut scopes = ScopeTree::new();
        let global_scope = scopes.push_scope(None);

        Self {
            types,
            sources,
            scopes,
            global_scope,
            items: Vec::new(),
            errors: Vec::new(),
            source,
            scope_stack: vec![global_scope],
            next_offset: 0,
        }
    }

    pub fn types(&mut self) -> &mut TypeArena {
        &mut *self.types
    }

    pub fn finish(self) -> Program {
        Program {
            sources: self.sources,
            scopes: self.scopes,
            global_scope: self.global_scope,
            items: self.items,
            declaration_errors: self.errors,
        }
    }

    /// A fresh source position; every node gets a distinct offset
    pub fn token(&mut self) -> Token {
        let token = Token::new(self.source, self.next_offset);
        self.next_offset += 1;
        token
    }

    fn current_scope(&self) -> ScopeId {
        self.scope_stack
            .last()
            .copied()
            .unwrap_or(self.global_scope)
    }

    fn declare(&mut self, scope: ScopeId, symbol: Symbol) -> SymbolId {
        match self.scopes.declare_symbol(scope, symbol.clone()) {
            Ok(id) => id,
            Err(error) => {
                self.errors.push(error);

                // Keep the node well formed: park the rejected symbol in a
                // scope nothing looks into
                let orphan = self.scopes.push_scope(Some(scope));

                self.scopes
                    .declare_symbol(orphan, symbol)
                    .unwrap_or_else(|_| unreachable!("fresh scopes are empty"))
            }
        }
    }

    pub fn symbol_mut(&mut self, symbol: SymbolId) -> &mut Symbol {
        self.scopes.symbol_mut(symbol)
    }

    // Types

    pub fn pointer(&mut self, pointee: TypeId) -> TypeId {
        self.types.pointer_to(pointee)
    }

    pub fn array(&mut self, element: TypeId, length: u64) -> TypeId {
        self.types.array_of(element, length)
    }

    fn declare_class(&mut self, name: InternedSymbol, ty: TypeId, is_enum: bool) {
        let entry = ClassEntry {
            ty,
            token: self.token(),
            is_internal: false,
        };
        let scope = self.current_scope();

        let result = if is_enum {
            self.scopes.declare_enum(scope, name, entry)
        } else {
            self.scopes.declare_class(scope, name, entry)
        };

        if let Err(error) = result {
            self.errors.push(error);
        }
    }

    fn aggregate(&mut self, name: &str, members: &[(&str, TypeId)], is_union: bool) -> TypeId {
        let name = InternedSymbol::new(name);
        let members = members
            .iter()
            .map(|(member, ty)| Member {
                name: InternedSymbol::new(member),
                ty: *ty,
            })
            .collect();

        let scope = self.current_scope();
        let ty = self.types.declare_struct(Some(name), members, is_union, Some(scope));
        self.declare_class(name, ty, false);

        ty
    }

    pub fn struct_type(&mut self, name: &str, members: &[(&str, TypeId)]) -> TypeId {
        self.aggregate(name, members, false)
    }

    pub fn union_type(&mut self, name: &str, members: &[(&str, TypeId)]) -> TypeId {
        self.aggregate(name, members, true)
    }

    pub fn enum_type(&mut self, name: &str, underlying: TypeId, constants: &[(&str, ConstantValue)]) -> TypeId {
        let name = InternedSymbol::new(name);
        let constants = constants
            .iter()
            .map(|(constant, value)| NamedConstant {
                name: InternedSymbol::new(constant),
                value: *value,
            })
            .collect();

        let scope = self.current_scope();
        let ty = self.types.declare_enum(name, underlying, constants, Some(scope));
        self.declare_class(name, ty, true);

        ty
    }

    /// A reference to a user type that may not be declared yet
    pub fn forward(&mut self, name: &str) -> TypeId {
        let scope = self.current_scope();

        self.types
            .placeholder(InternedSymbol::new(name), self.source, scope)
    }

    // Declarations

    pub fn function(
        &mut self,
        name: &str,
        return_type: TypeId,
        parameters: &[ParamSpec<'_>],
        body: impl FnOnce(&mut Self) -> Vec<Statement>,
    ) -> SymbolId {
        let signature = parameters
            .iter()
            .map(|parameter| ParameterType {
                ty: parameter.ty,
                is_reference: parameter.is_reference,
            })
            .collect();
        let function_type = self.types.function(return_type, signature, false);

        let token = self.token();
        let name = InternedSymbol::new(name);
        let symbol = self.declare(
            self.global_scope,
            Symbol::new(name, SymbolKind::Function, Some(function_type), token),
        );

        let scope = self.scopes.push_scope(Some(self.global_scope));
        let mut parameter_symbols = Vec::with_capacity(parameters.len());

        for parameter in parameters {
            let token = self.token();
            let mut parameter_symbol = Symbol::new(
                InternedSymbol::new(parameter.name),
                SymbolKind::Parameter {
                    is_reference: parameter.is_reference,
                },
                Some(parameter.ty),
                token,
            );

            if parameter.maybe_unused {
                parameter_symbol.attributes.insert("maybe_unused", vec![]);
            }

            parameter_symbols.push(self.declare(scope, parameter_symbol));
        }

        self.scope_stack.push(scope);
        let body = self.block(body);
        self.scope_stack.pop();

        let mut collector = LabelCollector::default();
        collector.visit_statement(&body);

        self.items.push(Item::Function(Function {
            symbol,
            name,
            scope,
            parameters: parameter_symbols,
            return_type,
            body,
            labels: collector.labels,
            has_finally: collector.finally_blocks > 0,
            is_analyzed: false,
            token,
            next_label_id: 0,
        }));

        symbol
    }

    /// A function implemented outside this program
    pub fn extern_function(&mut self, name: &str, function_type: TypeId) -> SymbolId {
        let token = self.token();

        self.declare(
            self.global_scope,
            Symbol::new(InternedSymbol::new(name), SymbolKind::Function, Some(function_type), token),
        )
    }

    pub fn global(&mut self, name: &str, ty: Option<TypeId>, initializer: Option<Expression>) -> SymbolId {
        let token = self.token();
        let symbol = self.declare(
            self.global_scope,
            Symbol::new(InternedSymbol::new(name), SymbolKind::Variable, ty, token),
        );

        let statement = self.init(symbol, initializer);

        self.items.push(Item::Global(Global {
            symbol,
            statement,
            is_analyzed: false,
        }));

        symbol
    }

    /// Declares a variable in the innermost scope without building its
    /// declaration statement
    pub fn declare_local(&mut self, name: &str, ty: Option<TypeId>) -> SymbolId {
        let token = self.token();
        let scope = self.current_scope();

        self.declare(
            scope,
            Symbol::new(InternedSymbol::new(name), SymbolKind::Variable, ty, token),
        )
    }

    pub fn init(&mut self, symbol: SymbolId, initializer: Option<Expression>) -> Statement {
        let token = self.token();
        let expression = Expression::new(
            ExpressionKind::VariableInit {
                symbol,
                initializer: initializer.map(Box::new),
            },
            token,
        );

        Statement::new(StatementKind::Expression(expression), token)
    }

    /// `name: ty = initializer;`, or `name := initializer;` without a type
    pub fn local(&mut self, name: &str, ty: Option<TypeId>, initializer: Option<Expression>) -> Statement {
        let symbol = self.declare_local(name, ty);

        self.init(symbol, initializer)
    }

    pub fn mark_maybe_unused(&mut self, symbol: SymbolId) {
        self.scopes
            .symbol_mut(symbol)
            .attributes
            .insert("maybe_unused", vec![AttributeValue::Integer(1)]);
    }

    // Statements

    pub fn block(&mut self, body: impl FnOnce(&mut Self) -> Vec<Statement>) -> Statement {
        let scope = self.scopes.push_scope(Some(self.current_scope()));

        self.scope_stack.push(scope);
        let statements = body(self);
        self.scope_stack.pop();

        let token = self.token();
        Statement::new(StatementKind::Compound { scope, statements }, token)
    }

    fn statement(&mut self, kind: StatementKind) -> Statement {
        let token = self.token();
        Statement::new(kind, token)
    }

    pub fn expr(&mut self, expression: Expression) -> Statement {
        self.statement(StatementKind::Expression(expression))
    }

    pub fn if_(&mut self, condition: Expression, then: Statement, otherwise: Option<Statement>) -> Statement {
        self.statement(StatementKind::If {
            condition,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        })
    }

    pub fn while_(&mut self, condition: Expression, body: Statement) -> Statement {
        self.statement(StatementKind::While {
            condition,
            body: Box::new(body),
        })
    }

    pub fn do_while(&mut self, body: Statement, condition: Expression) -> Statement {
        self.statement(StatementKind::DoWhile {
            body: Box::new(body),
            condition,
        })
    }

    pub fn for_(
        &mut self,
        initializer: Option<Statement>,
        condition: Option<Expression>,
        step: Option<Expression>,
        body: Statement,
    ) -> Statement {
        self.statement(StatementKind::For {
            initializer: initializer.map(Box::new),
            condition,
            step,
            body: Box::new(body),
        })
    }

    pub fn break_(&mut self) -> Statement {
        self.statement(StatementKind::Break)
    }

    pub fn continue_(&mut self) -> Statement {
        self.statement(StatementKind::Continue)
    }

    pub fn ret(&mut self, value: Option<Expression>) -> Statement {
        self.statement(StatementKind::Return(value))
    }

    pub fn goto(&mut self, label: &str) -> Statement {
        self.statement(StatementKind::Goto(InternedSymbol::new(label)))
    }

    pub fn computed_goto(&mut self, target: Expression) -> Statement {
        self.statement(StatementKind::ComputedGoto(target))
    }

    pub fn label(&mut self, label: &str) -> Statement {
        self.statement(StatementKind::Label(InternedSymbol::new(label)))
    }

    pub fn switch(&mut self, value: Expression, body: Statement) -> Statement {
        self.statement(StatementKind::Switch(Box::new(Switch {
            value,
            body,
            labels: None,
        })))
    }

    pub fn case(&mut self, value: Expression) -> Statement {
        self.statement(StatementKind::Case(value))
    }

    pub fn default(&mut self) -> Statement {
        self.statement(StatementKind::Default)
    }

    pub fn assert(&mut self, condition: Expression, message: Option<&str>) -> Statement {
        self.statement(StatementKind::Assert {
            condition,
            message: message.map(InternedSymbol::new),
        })
    }

    pub fn inline_asm(&mut self, template: &str, preserve: &[&str], ignore: &[&str]) -> Statement {
        self.statement(StatementKind::InlineAsm(Box::new(InlineAsm {
            template: template.to_owned(),
            preserve: preserve.iter().map(|r| InternedSymbol::new(r)).collect(),
            ignore: ignore.iter().map(|r| InternedSymbol::new(r)).collect(),
            parts: Vec::new(),
        })))
    }

    pub fn finally(&mut self, body: Statement) -> Statement {
        self.statement(StatementKind::Finally(Box::new(body)))
    }

    // Expressions

    fn expression(&mut self, kind: ExpressionKind) -> Expression {
        let token = self.token();
        Expression::new(kind, token)
    }

    pub fn int(&mut self, value: i64) -> Expression {
        self.expression(ExpressionKind::Literal(Literal::Integer(value)))
    }

    pub fn float(&mut self, value: f64) -> Expression {
        self.expression(ExpressionKind::Literal(Literal::Float(value)))
    }

    pub fn boolean(&mut self, value: bool) -> Expression {
        self.expression(ExpressionKind::Literal(Literal::Bool(value)))
    }

    pub fn string(&mut self, value: &str) -> Expression {
        self.expression(ExpressionKind::Literal(Literal::String(InternedSymbol::new(value))))
    }

    pub fn null(&mut self) -> Expression {
        self.expression(ExpressionKind::Literal(Literal::Null))
    }

    pub fn ident(&mut self, name: &str) -> Expression {
        self.expression(ExpressionKind::Identifier {
            name: InternedSymbol::new(name),
            symbol: None,
        })
    }

    pub fn binary(&mut self, operator: BinaryOperatorKind, lhs: Expression, rhs: Expression) -> Expression {
        self.expression(ExpressionKind::Binary {
            operator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn unary(&mut self, operator: UnaryOperatorKind, operand: Expression) -> Expression {
        self.expression(ExpressionKind::Unary {
            operator,
            operand: Box::new(operand),
        })
    }

    pub fn ternary(&mut self, condition: Expression, then: Expression, otherwise: Expression) -> Expression {
        self.expression(ExpressionKind::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    pub fn member(&mut self, object: Expression, member: &str) -> Expression {
        self.expression(ExpressionKind::Member {
            object: Box::new(object),
            member: InternedSymbol::new(member),
            through_pointer: false,
        })
    }

    pub fn arrow(&mut self, object: Expression, member: &str) -> Expression {
        self.expression(ExpressionKind::Member {
            object: Box::new(object),
            member: InternedSymbol::new(member),
            through_pointer: true,
        })
    }

    pub fn scope_resolution(&mut self, scope: &str, member: &str) -> Expression {
        self.expression(ExpressionKind::ScopeResolution {
            scope: InternedSymbol::new(scope),
            member: InternedSymbol::new(member),
        })
    }

    pub fn call(&mut self, callee: &str, arguments: Vec<Expression>) -> Expression {
        self.expression(ExpressionKind::Call {
            callee: InternedSymbol::new(callee),
            symbol: None,
            arguments,
        })
    }

    pub fn subscript(&mut self, base: Expression, index: Expression) -> Expression {
        self.expression(ExpressionKind::Subscript {
            base: Box::new(base),
            index: Box::new(index),
        })
    }

    pub fn collection(&mut self, elements: Vec<Expression>) -> Expression {
        self.expression(ExpressionKind::CollectionInit(elements))
    }

    pub fn cast(&mut self, expression: Expression, target: TypeId) -> Expression {
        self.expression(ExpressionKind::Cast {
            expression: Box::new(expression),
            target,
            is_implicit: false,
        })
    }

    pub fn assign(&mut self, target: Expression, value: Expression) -> Expression {
        self.expression(ExpressionKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn compound_assign(
        &mut self,
        operator: BinaryOperatorKind,
        target: Expression,
        value: Expression,
    ) -> Expression {
        self.expression(ExpressionKind::CompoundAssign {
            operator,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn size_of(&mut self, ty: TypeId) -> Expression {
        self.expression(ExpressionKind::SizeOf(ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functions_record_labels_and_finally() {
        let mut types = TypeArena::default();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "labels");

        builder.function("f", i32, &[ParamSpec::value("x", i32)], |b| {
            let label = b.label("retry");
            let body = b.block(|_| vec![]);
            let finally = b.finally(body);
            let x = b.ident("x");
            let ret = b.ret(Some(x));

            vec![label, finally, ret]
        });

        let program = builder.finish();
        let function = program.function("f").unwrap();

        assert_eq!(function.labels, vec![InternedSymbol::new("retry")]);
        assert!(function.has_finally);
        assert_eq!(function.parameters.len(), 1);
        assert!(program.declaration_errors.is_empty());
    }

    #[test]
    fn duplicate_locals_are_recorded() {
        let mut types = TypeArena::default();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "dupes");

        builder.function("f", i32, &[], |b| {
            let first = b.local("a", Some(i32), None);
            let second = b.local("a", Some(i32), None);

            vec![first, second]
        });

        let program = builder.finish();

        assert_eq!(program.declaration_errors.len(), 1);
    }
}
