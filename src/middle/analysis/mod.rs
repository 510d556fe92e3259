//! Semantic analysis.
//!
//! Analysis runs in waves. Each wave walks every item that has not been
//! analyzed successfully yet; an item that still has errors is retried in the
//! next wave, since a later declaration (an inferred global, a resolved type)
//! may unblock it. The loop stops once a wave is clean, or fails once two
//! consecutive waves report the same number of errors.
//!
//! Expressions are analyzed bottom up. Every analysis function returns the
//! number of errors it found; a nonzero count from a child defers the parent.

use hashbrown::HashSet;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    config::Config,
    diagnostics::{Diagnostic, DiagnosticSink, report_error, report_warning},
    frontend::{
        Token,
        ast::{
            AsmPart, BinaryOperatorClass, BinaryOperatorKind, Expression, ExpressionKind, Function,
            Global, InlineAsm, Item, Literal, Program, Statement, StatementKind, UnaryOperatorKind,
        },
        intern::InternedSymbol,
    },
    middle::{
        scope::{ScopeError, ScopeId, ScopeTree, SymbolId, SymbolKind},
        ty::{TypeArena, TypeId, TypeKind, TypeResolutionError},
    },
};

use self::{
    conversion::{implicit_conversion, most_information},
    fold::{FoldError, fold_expression},
    inline_asm::{TemplateToken, parse_template},
};

pub mod conversion;
pub mod fold;
pub mod inline_asm;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error(transparent)]
    UnresolvedTypes(#[from] TypeResolutionError),
    #[error("{errors} declaration(s) were rejected")]
    InvalidDeclarations { errors: usize },
    #[error("analysis did not converge, {errors} error(s) remain")]
    NonConvergence { errors: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveOutcome {
    /// No errors left
    Converged,
    /// Errors changed since the previous wave, try again
    Continue,
    /// Same nonzero error count as the previous wave
    Stalled,
}

pub fn check_convergence(errors: usize, previous: Option<usize>) -> WaveOutcome {
    if errors == 0 {
        WaveOutcome::Converged
    } else if previous == Some(errors) {
        WaveOutcome::Stalled
    } else {
        WaveOutcome::Continue
    }
}

/// Type checks `program` in place. Returns the number of waves it took.
pub fn analyze_program(
    program: &mut Program,
    types: &mut TypeArena,
    diagnostics: &mut DiagnosticSink,
    config: &Config,
) -> Result<usize, AnalysisError> {
    let Program {
        scopes,
        global_scope,
        items,
        declaration_errors,
        ..
    } = program;

    for error in declaration_errors.iter() {
        let ScopeError::Duplicate { previous, .. } = error;
        report_error!(diagnostics, *previous, "duplicate-declaration", "{error}");
    }

    if !declaration_errors.is_empty() {
        return Err(AnalysisError::InvalidDeclarations {
            errors: declaration_errors.len(),
        });
    }

    if let Err(error) = types.resolve_user_types(scopes) {
        let TypeResolutionError::Unresolved(names) = &error;

        for name in names {
            report_error!(
                diagnostics,
                Token::SYNTHESIZED,
                "unresolved-classname",
                "unresolved classname `{name}`"
            );
        }

        return Err(error.into());
    }

    let mut analyzer = Analyzer {
        types,
        scopes,
        diagnostics,
        global_scope: *global_scope,
    };

    let mut previous = None;
    let mut last_distinct_wave = Vec::new();

    for wave in 1..=config.max_waves {
        let mut deferred = Vec::new();
        let errors = analyzer.run_wave(items, &mut deferred);

        debug!(wave, errors, "analysis wave");

        match check_convergence(errors, previous) {
            WaveOutcome::Converged => {
                if config.warn_unused {
                    analyzer.report_unused();
                }

                return Ok(wave);
            }
            WaveOutcome::Continue => {
                last_distinct_wave = deferred;
                previous = Some(errors);
            }
            WaveOutcome::Stalled => {
                analyzer.diagnostics.replay(last_distinct_wave);

                return Err(AnalysisError::NonConvergence { errors });
            }
        }
    }

    analyzer.diagnostics.replay(last_distinct_wave);

    Err(AnalysisError::NonConvergence {
        errors: previous.unwrap_or_default(),
    })
}

struct SwitchContext {
    value_type: Option<TypeId>,
    cases: Vec<i64>,
    has_default: bool,
}

struct Context {
    scopes: Vec<ScopeId>,
    return_type: TypeId,
    labels: Vec<InternedSymbol>,
    loop_depth: usize,
    breakable_depth: usize,
    switches: Vec<SwitchContext>,
    finally_blocks: usize,
}

impl Context {
    fn new(scope: ScopeId, return_type: TypeId, labels: Vec<InternedSymbol>) -> Self {
        Self {
            scopes: vec![scope],
            return_type,
            labels,
            loop_depth: 0,
            breakable_depth: 0,
            switches: Vec::new(),
            finally_blocks: 0,
        }
    }

    fn scope(&self) -> ScopeId {
        // The stack always holds at least the function or global scope
        self.scopes[self.scopes.len() - 1]
    }
}

type Typing = Result<(TypeId, bool), usize>;

struct Analyzer<'a> {
    types: &'a mut TypeArena,
    scopes: &'a mut ScopeTree,
    diagnostics: &'a mut DiagnosticSink,
    global_scope: ScopeId,
}

impl Analyzer<'_> {
    /// Analyzes every pending item. Diagnostics of items that succeed stay in
    /// the sink; those of failing items are moved into `deferred`.
    fn run_wave(&mut self, items: &mut [Item], deferred: &mut Vec<Diagnostic>) -> usize {
        let mut errors = 0;

        for item in items.iter_mut() {
            let point = self.diagnostics.restoration_point();

            let item_errors = match item {
                Item::Function(function) if !function.is_analyzed => {
                    let item_errors = self.analyze_function(function);
                    function.is_analyzed = item_errors == 0;
                    item_errors
                }
                Item::Global(global) if !global.is_analyzed => {
                    let item_errors = self.analyze_global(global);
                    global.is_analyzed = item_errors == 0;
                    item_errors
                }
                Item::Function(_) | Item::Global(_) => continue,
            };

            if item_errors > 0 {
                deferred.extend(self.diagnostics.take_since(point));
                errors += item_errors;
            }
        }

        errors
    }

    fn analyze_function(&mut self, function: &mut Function) -> usize {
        trace!(function = function.name.value(), "analyzing function");

        let mut errors = 0;
        let mut seen = HashSet::new();

        for label in &function.labels {
            if !seen.insert(*label) {
                report_error!(
                    self.diagnostics,
                    function.token,
                    "duplicate-label",
                    "label `{label}` is declared more than once in `{}`",
                    function.name
                );
                errors += 1;
            }
        }

        let mut context = Context::new(function.scope, function.return_type, function.labels.clone());

        errors + self.analyze_statement(&mut context, &mut function.body)
    }

    fn analyze_global(&mut self, global: &mut Global) -> usize {
        let void = self.types.void();
        let mut context = Context::new(self.global_scope, void, Vec::new());

        self.analyze_statement(&mut context, &mut global.statement)
    }

    fn report_unused(&mut self) {
        let mut reported = HashSet::new();

        let unused: Vec<SymbolId> = self
            .scopes
            .symbols()
            .filter(|(_, symbol)| {
                !symbol.is_referenced
                    && !symbol.attributes.is_maybe_unused()
                    && symbol.scope != self.global_scope
            })
            .map(|(id, _)| id)
            .collect();

        for id in unused {
            if !reported.insert(id) {
                continue;
            }

            let symbol = self.scopes.symbol(id);

            match symbol.kind {
                SymbolKind::Variable => report_warning!(
                    self.diagnostics,
                    symbol.token,
                    "unused-symbol",
                    "`{}` is never used",
                    symbol.name
                ),
                SymbolKind::Parameter { .. } => report_warning!(
                    self.diagnostics,
                    symbol.token,
                    "unused-parameter",
                    "parameter `{}` is never used",
                    symbol.name
                ),
                SymbolKind::Function => {}
            }
        }
    }

    fn type_of(&self, expression: &Expression) -> TypeId {
        expression.ty.unwrap_or_else(|| self.types.void())
    }

    fn display(&self, ty: TypeId) -> String {
        self.types.display(ty)
    }

    /// Converts `expression` in place to `target`, reporting a mismatch when
    /// no implicit conversion exists
    fn convert(&mut self, target: TypeId, expression: &mut Expression) -> usize {
        let source = expression.take();

        match implicit_conversion(self.types, target, source) {
            Ok(mut converted) => {
                let token = converted.token;
                let errors = match fold_expression(self.types, &mut converted) {
                    Ok(_) => 0,
                    Err(error) => {
                        report_error!(self.diagnostics, token, "division-by-zero", "{error}");
                        1
                    }
                };

                *expression = converted;
                errors
            }
            Err(original) => {
                report_error!(
                    self.diagnostics,
                    original.token,
                    "type-mismatch",
                    "expected `{}`, found `{}`",
                    self.display(target),
                    original.ty.map_or("<unknown>".to_owned(), |ty| self.display(ty))
                );
                *expression = original;
                1
            }
        }
    }

    fn expect_condition(&mut self, context: &mut Context, condition: &mut Expression) -> usize {
        let errors = self.analyze_expression(context, condition, None);

        if errors > 0 {
            return errors;
        }

        let ty = self.type_of(condition);

        if !self.types.is_integer_compatible(ty) {
            report_error!(
                self.diagnostics,
                condition.token,
                "invalid-condition",
                "condition must be an integer, boolean, enum or pointer, found `{}`",
                self.display(ty)
            );
            return 1;
        }

        0
    }

    fn analyze_statement(&mut self, context: &mut Context, statement: &mut Statement) -> usize {
        let token = statement.token;

        match &mut statement.kind {
            StatementKind::Expression(expression) => self.analyze_expression(context, expression, None),
            StatementKind::Compound { scope, statements } => {
                context.scopes.push(*scope);

                let errors = statements
                    .iter_mut()
                    .map(|statement| self.analyze_statement(context, statement))
                    .sum();

                context.scopes.pop();
                errors
            }
            StatementKind::Sequence(statements) => statements
                .iter_mut()
                .map(|statement| self.analyze_statement(context, statement))
                .sum(),
            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                let mut errors = self.expect_condition(context, condition);
                errors += self.analyze_statement(context, then);

                if let Some(otherwise) = otherwise {
                    errors += self.analyze_statement(context, otherwise);
                }

                errors
            }
            StatementKind::While { condition, body } | StatementKind::DoWhile { body, condition } => {
                let errors = self.expect_condition(context, condition);

                errors + self.analyze_loop_body(context, body)
            }
            StatementKind::For {
                initializer,
                condition,
                step,
                body,
            } => {
                let mut errors = 0;

                if let Some(initializer) = initializer {
                    errors += self.analyze_statement(context, initializer);
                }

                if let Some(condition) = condition {
                    errors += self.expect_condition(context, condition);
                }

                if let Some(step) = step {
                    errors += self.analyze_expression(context, step, None);
                }

                errors + self.analyze_loop_body(context, body)
            }
            StatementKind::Break => {
                if context.breakable_depth == 0 {
                    report_error!(self.diagnostics, token, "break-outside-loop", "`break` outside of a loop or switch");
                    return 1;
                }

                0
            }
            StatementKind::Continue => {
                if context.loop_depth == 0 {
                    report_error!(self.diagnostics, token, "continue-outside-loop", "`continue` outside of a loop");
                    return 1;
                }

                0
            }
            StatementKind::Return(value) => self.analyze_return(context, token, value),
            StatementKind::Goto(label) => {
                if !context.labels.contains(label) {
                    report_error!(self.diagnostics, token, "undeclared-label", "label `{label}` is not declared in this function");
                    return 1;
                }

                0
            }
            StatementKind::ComputedGoto(target) => {
                let errors = self.analyze_expression(context, target, None);

                if errors > 0 {
                    return errors;
                }

                let ty = self.type_of(target);

                if !self.types.is_void_pointer(ty) {
                    report_error!(
                        self.diagnostics,
                        target.token,
                        "invalid-computed-goto",
                        "computed goto needs a `*void` operand, found `{}`",
                        self.display(ty)
                    );
                    return 1;
                }

                0
            }
            StatementKind::Label(_) | StatementKind::Empty => 0,
            StatementKind::Switch(switch) => {
                let mut errors = self.analyze_expression(context, &mut switch.value, None);
                let mut value_type = None;

                if errors == 0 {
                    let ty = self.type_of(&switch.value);

                    if self.types.is_integer(ty) {
                        value_type = Some(ty);
                    } else {
                        report_error!(
                            self.diagnostics,
                            switch.value.token,
                            "invalid-switch",
                            "switch value must be an integer, found `{}`",
                            self.display(ty)
                        );
                        errors += 1;
                    }
                }

                context.switches.push(SwitchContext {
                    value_type,
                    cases: Vec::new(),
                    has_default: false,
                });
                context.breakable_depth += 1;

                errors += self.analyze_statement(context, &mut switch.body);

                context.breakable_depth -= 1;
                context.switches.pop();

                errors
            }
            StatementKind::Case(value) => self.analyze_case(context, token, value),
            StatementKind::Default => {
                let Some(switch) = context.switches.last_mut() else {
                    report_error!(self.diagnostics, token, "default-outside-switch", "`default` outside of a switch");
                    return 1;
                };

                if switch.has_default {
                    report_error!(self.diagnostics, token, "duplicate-default", "switch already has a `default` label");
                    return 1;
                }

                switch.has_default = true;
                0
            }
            StatementKind::Assert { condition, .. } => self.expect_condition(context, condition),
            StatementKind::InlineAsm(asm) => self.analyze_inline_asm(context, token, asm),
            StatementKind::Finally(body) => {
                context.finally_blocks += 1;

                let mut errors = 0;

                if context.finally_blocks > 1 {
                    report_error!(self.diagnostics, token, "duplicate-finally", "a function may declare at most one `finally` block");
                    errors += 1;
                }

                errors + self.analyze_statement(context, body)
            }
        }
    }

    fn analyze_loop_body(&mut self, context: &mut Context, body: &mut Statement) -> usize {
        context.loop_depth += 1;
        context.breakable_depth += 1;

        let errors = self.analyze_statement(context, body);

        context.loop_depth -= 1;
        context.breakable_depth -= 1;

        errors
    }

    fn analyze_return(&mut self, context: &mut Context, token: Token, value: &mut Option<Expression>) -> usize {
        let return_type = context.return_type;

        match value {
            None if self.types.is_void(return_type) => 0,
            None => {
                report_error!(
                    self.diagnostics,
                    token,
                    "missing-return-value",
                    "function returning `{}` must return a value",
                    self.display(return_type)
                );
                1
            }
            Some(value) => {
                let errors = self.analyze_expression(context, value, Some(return_type));

                if errors > 0 {
                    return errors;
                }

                if self.types.is_void(return_type) && !self.types.is_void(self.type_of(value)) {
                    report_error!(self.diagnostics, token, "return-mismatch", "`void` function returns a value");
                    return 1;
                }

                self.convert(return_type, value)
            }
        }
    }

    fn analyze_case(&mut self, context: &mut Context, token: Token, value: &mut Expression) -> usize {
        if context.switches.is_empty() {
            report_error!(self.diagnostics, token, "case-outside-switch", "`case` outside of a switch");
            return 1;
        }

        let errors = self.analyze_expression(context, value, None);

        if errors > 0 {
            return errors;
        }

        let Some(switch) = context.switches.last() else {
            return 1;
        };

        let Some(value_type) = switch.value_type else {
            // The switch value itself is broken and has been reported
            return 1;
        };

        if !value.is_literal() {
            report_error!(self.diagnostics, value.token, "non-constant-case", "case value must be a constant expression");
            return 1;
        }

        let errors = self.convert(value_type, value);

        if errors > 0 {
            return errors;
        }

        let Some(constant) = value.as_integer() else {
            report_error!(self.diagnostics, value.token, "non-constant-case", "case value must be an integer constant");
            return 1;
        };

        let Some(switch) = context.switches.last_mut() else {
            return 1;
        };

        if switch.cases.contains(&constant) {
            report_error!(self.diagnostics, value.token, "duplicate-case", "duplicate case value `{constant}`");
            return 1;
        }

        switch.cases.push(constant);
        0
    }

    fn analyze_inline_asm(&mut self, context: &mut Context, token: Token, asm: &mut InlineAsm) -> usize {
        let tokens = match parse_template(&asm.template) {
            Ok(tokens) => tokens,
            Err(error) => {
                report_error!(self.diagnostics, token, "asm-unknown-escape", "{error}");
                return 1;
            }
        };

        let mut errors = 0;
        let mut parts = Vec::with_capacity(tokens.len());

        for template_token in tokens {
            match template_token {
                TemplateToken::Text(text) => parts.push(AsmPart::Text(text)),
                TemplateToken::Identifier(name) => {
                    if let Some(symbol) = self.scopes.lookup_symbol(context.scope(), name, token.source) {
                        self.scopes.symbol_mut(symbol).is_referenced = true;
                        parts.push(AsmPart::Symbol(symbol));
                    } else if context.labels.contains(&name) {
                        parts.push(AsmPart::Label(name));
                    } else {
                        report_error!(
                            self.diagnostics,
                            token,
                            "asm-undeclared-identifier",
                            "`{name}` in inline assembly is neither a symbol nor a label"
                        );
                        errors += 1;
                    }
                }
                TemplateToken::Register(register) => {
                    if asm.preserve.contains(&register) || asm.ignore.contains(&register) {
                        parts.push(AsmPart::Register(register));
                    } else {
                        report_error!(
                            self.diagnostics,
                            token,
                            "asm-unknown-register",
                            "register `%{register}` must be listed as preserved or ignored"
                        );
                        errors += 1;
                    }
                }
            }
        }

        if errors == 0 {
            asm.parts = parts;
        }

        errors
    }

    fn analyze_expression(&mut self, context: &mut Context, expression: &mut Expression, expected: Option<TypeId>) -> usize {
        let token = expression.token;

        // Kinds that are replaced wholesale by a literal
        match expression.kind {
            ExpressionKind::SizeOf(ty) => {
                let size = self.types.size_of(ty) as i64;
                let u64 = self.types.u64();

                *expression = Expression::literal(Literal::Integer(size), token, u64);
                return 0;
            }
            ExpressionKind::ScopeResolution { scope, member } => {
                return match self.resolve_scoped_constant(context, token, scope, member) {
                    Ok(resolved) => {
                        *expression = resolved;
                        0
                    }
                    Err(errors) => errors,
                };
            }
            _ => {}
        }

        let typing: Typing = match &mut expression.kind {
            ExpressionKind::Literal(literal) => Ok((
                match expression.ty {
                    Some(ty) => ty,
                    None => self.literal_type(literal),
                },
                false,
            )),
            ExpressionKind::Identifier { name, symbol } => self.analyze_identifier(context, token, *name, symbol),
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let errors = self.analyze_expression(context, lhs, None) + self.analyze_expression(context, rhs, None);

                if errors > 0 {
                    Err(errors)
                } else {
                    self.analyze_binary(token, *operator, lhs, rhs)
                }
            }
            ExpressionKind::Unary { operator, operand } => {
                let errors = self.analyze_expression(context, operand, None);

                if errors > 0 {
                    Err(errors)
                } else {
                    self.analyze_unary(token, *operator, operand)
                }
            }
            ExpressionKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                let errors = self.expect_condition(context, condition)
                    + self.analyze_expression(context, then, expected)
                    + self.analyze_expression(context, otherwise, expected);

                if errors > 0 {
                    Err(errors)
                } else {
                    self.analyze_ternary(token, then, otherwise)
                }
            }
            ExpressionKind::Member {
                object,
                member,
                through_pointer,
            } => {
                let errors = self.analyze_expression(context, object, None);

                if errors > 0 {
                    Err(errors)
                } else {
                    self.analyze_member(token, object, *member, *through_pointer)
                }
            }
            ExpressionKind::Call {
                callee,
                symbol,
                arguments,
            } => self.analyze_call(context, token, *callee, symbol, arguments),
            ExpressionKind::Subscript { base, index } => {
                let errors = self.analyze_expression(context, base, None) + self.analyze_expression(context, index, None);

                if errors > 0 {
                    Err(errors)
                } else {
                    self.analyze_subscript(token, base, index)
                }
            }
            ExpressionKind::CollectionInit(elements) => self.analyze_collection(context, token, elements, expected),
            ExpressionKind::Cast {
                expression: inner,
                target,
                is_implicit,
            } => {
                let errors = self.analyze_expression(context, inner, None);

                if errors > 0 {
                    Err(errors)
                } else {
                    self.analyze_cast(token, inner, *target, *is_implicit)
                }
            }
            ExpressionKind::Assign { target, value } => {
                let errors = self.analyze_expression(context, target, None);
                let expected = target.ty;
                let errors = errors + self.analyze_expression(context, value, expected);

                if errors > 0 {
                    Err(errors)
                } else {
                    self.analyze_assign(token, target, value)
                }
            }
            ExpressionKind::CompoundAssign {
                operator,
                target,
                value,
            } => {
                let errors = self.analyze_expression(context, target, None) + self.analyze_expression(context, value, None);

                if errors > 0 {
                    Err(errors)
                } else {
                    self.analyze_compound_assign(token, *operator, target, value)
                }
            }
            ExpressionKind::VariableInit { symbol, initializer } => {
                self.analyze_variable_init(context, token, *symbol, initializer)
            }
            ExpressionKind::SizeOf(_) | ExpressionKind::ScopeResolution { .. } => {
                unreachable!("replaced by a literal above")
            }
        };

        let (ty, is_lvalue) = match typing {
            Ok(typing) => typing,
            Err(errors) => return errors,
        };

        expression.ty = Some(ty);
        expression.is_lvalue = is_lvalue;

        match fold_expression(self.types, expression) {
            Ok(_) => 0,
            Err(FoldError::DivisionByZero) => {
                report_error!(self.diagnostics, token, "division-by-zero", "division by constant zero");
                1
            }
        }
    }

    fn literal_type(&mut self, literal: &Literal) -> TypeId {
        match literal {
            Literal::Integer(value) if i32::try_from(*value).is_ok() => self.types.i32(),
            Literal::Integer(_) => self.types.i64(),
            Literal::Float(_) => self.types.f64(),
            Literal::Bool(_) => self.types.bool(),
            Literal::String(value) => {
                let i8 = self.types.i8();
                self.types.array_of(i8, value.value().len() as u64 + 1)
            }
            Literal::Null => {
                let void = self.types.void();
                self.types.pointer_to(void)
            }
        }
    }

    fn resolve_scoped_constant(
        &mut self,
        context: &Context,
        token: Token,
        scope: InternedSymbol,
        member: InternedSymbol,
    ) -> Result<Expression, usize> {
        let (owner, is_enum) = if let Some(ty) = self.scopes.lookup_enum(context.scope(), scope, token.source) {
            (ty, true)
        } else if let Some(ty) = self.scopes.lookup_class(context.scope(), scope, token.source) {
            (ty, false)
        } else {
            report_error!(self.diagnostics, token, "undeclared-identifier", "`{scope}` is not an enum or class");
            return Err(1);
        };

        let Some(value) = self.types.constant_value(owner, member) else {
            report_error!(self.diagnostics, token, "unknown-constant", "`{scope}` has no constant named `{member}`");
            return Err(1);
        };

        let ty = if is_enum {
            owner
        } else if i32::try_from(value).is_ok() {
            self.types.i32()
        } else {
            self.types.i64()
        };

        Ok(Expression::literal(Literal::Integer(value), token, ty))
    }

    fn analyze_identifier(
        &mut self,
        context: &Context,
        token: Token,
        name: InternedSymbol,
        resolved: &mut Option<SymbolId>,
    ) -> Typing {
        let Some(id) = self.scopes.lookup_symbol(context.scope(), name, token.source) else {
            report_error!(self.diagnostics, token, "undeclared-identifier", "`{name}` is not declared");
            return Err(1);
        };

        *resolved = Some(id);

        let symbol = self.scopes.symbol_mut(id);
        symbol.is_referenced = true;

        let (kind, ty, is_immutable) = (symbol.kind, symbol.ty, symbol.is_immutable);

        let Some(ty) = ty else {
            report_error!(self.diagnostics, token, "unknown-type", "the type of `{name}` is not known yet");
            return Err(1);
        };

        let ty = if is_immutable { self.types.immutable(ty) } else { ty };

        match kind {
            SymbolKind::Function => Ok((ty, false)),
            SymbolKind::Variable | SymbolKind::Parameter { .. } => Ok((ty, true)),
        }
    }

    fn invalid_operands(&mut self, token: Token, operator: impl core::fmt::Display, lhs: TypeId, rhs: TypeId) -> Typing {
        report_error!(
            self.diagnostics,
            token,
            "invalid-operands",
            "operator `{operator}` cannot be applied to `{}` and `{}`",
            self.display(lhs),
            self.display(rhs)
        );
        Err(1)
    }

    fn unify(&mut self, lhs: &mut Expression, rhs: &mut Expression) -> Result<TypeId, usize> {
        let (lhs_type, rhs_type) = (self.type_of(lhs), self.type_of(rhs));
        let winner = self
            .types
            .unqualified(most_information(self.types, lhs_type, rhs_type));

        let errors = self.convert(winner, lhs) + self.convert(winner, rhs);

        if errors > 0 { Err(errors) } else { Ok(winner) }
    }

    fn analyze_binary(
        &mut self,
        token: Token,
        operator: BinaryOperatorKind,
        lhs: &mut Expression,
        rhs: &mut Expression,
    ) -> Typing {
        let (lhs_type, rhs_type) = (self.type_of(lhs), self.type_of(rhs));
        let types = &*self.types;

        match operator.class() {
            BinaryOperatorClass::Arithmetic => {
                if !types.is_arithmetic(lhs_type) || !types.is_arithmetic(rhs_type) {
                    return self.invalid_operands(token, operator, lhs_type, rhs_type);
                }

                let (lhs_pointer, rhs_pointer) = (types.is_pointer(lhs_type), types.is_pointer(rhs_type));

                match (lhs_pointer, rhs_pointer, operator) {
                    (true, false, BinaryOperatorKind::Add | BinaryOperatorKind::Subtract)
                        if types.is_integer(rhs_type) =>
                    {
                        Ok((types.unqualified(lhs_type), false))
                    }
                    (false, true, BinaryOperatorKind::Add) if types.is_integer(lhs_type) => {
                        Ok((types.unqualified(rhs_type), false))
                    }
                    (true, true, BinaryOperatorKind::Subtract)
                        if types.types_equal(types.unqualified(lhs_type), types.unqualified(rhs_type)) =>
                    {
                        Ok((types.i64(), false))
                    }
                    (false, false, _) => self.unify(lhs, rhs).map(|ty| (ty, false)),
                    _ => self.invalid_operands(token, operator, lhs_type, rhs_type),
                }
            }
            BinaryOperatorClass::Shift => {
                if !types.is_integer(lhs_type) || !types.is_integer(rhs_type) {
                    return self.invalid_operands(token, operator, lhs_type, rhs_type);
                }

                Ok((types.unqualified(lhs_type), false))
            }
            BinaryOperatorClass::Bitwise => {
                if !types.is_integer(lhs_type) || !types.is_integer(rhs_type) {
                    return self.invalid_operands(token, operator, lhs_type, rhs_type);
                }

                self.unify(lhs, rhs).map(|ty| (ty, false))
            }
            BinaryOperatorClass::Comparison => {
                if !types.is_arithmetic(lhs_type) || !types.is_arithmetic(rhs_type) {
                    return self.invalid_operands(token, operator, lhs_type, rhs_type);
                }

                let bool = types.bool();

                if types.is_pointer(lhs_type) || types.is_pointer(rhs_type) {
                    if types.is_pointer(lhs_type) && types.is_pointer(rhs_type) {
                        if types.types_equal(types.unqualified(lhs_type), types.unqualified(rhs_type)) {
                            return Ok((bool, false));
                        }

                        // Comparing against `null` or another `*void`
                        if types.is_void_pointer(rhs_type) {
                            return (self.convert(lhs_type, rhs) == 0)
                                .then_some((bool, false))
                                .ok_or(1);
                        }

                        if types.is_void_pointer(lhs_type) {
                            return (self.convert(rhs_type, lhs) == 0)
                                .then_some((bool, false))
                                .ok_or(1);
                        }
                    }

                    return self.invalid_operands(token, operator, lhs_type, rhs_type);
                }

                let winner = self.unify(lhs, rhs)?;

                if self.types.is_float(winner)
                    && matches!(operator, BinaryOperatorKind::Equals | BinaryOperatorKind::NotEquals)
                {
                    report_warning!(
                        self.diagnostics,
                        token,
                        "float-equality",
                        "comparing floating point values for equality is unreliable"
                    );
                }

                Ok((bool, false))
            }
            BinaryOperatorClass::Logical => {
                let bool = types.bool();
                let errors = self.convert(bool, lhs) + self.convert(bool, rhs);

                if errors > 0 { Err(errors) } else { Ok((bool, false)) }
            }
        }
    }

    fn analyze_unary(&mut self, token: Token, operator: UnaryOperatorKind, operand: &mut Expression) -> Typing {
        let ty = self.type_of(operand);
        let unqualified = self.types.unqualified(ty);

        match operator {
            UnaryOperatorKind::Negate => {
                if self.types.is_arithmetic(ty) && !self.types.is_pointer(ty) {
                    Ok((unqualified, false))
                } else {
                    self.invalid_operand(token, operator, ty)
                }
            }
            UnaryOperatorKind::BitwiseNot => {
                if self.types.is_integer(ty) {
                    Ok((unqualified, false))
                } else {
                    self.invalid_operand(token, operator, ty)
                }
            }
            UnaryOperatorKind::LogicalNot => {
                let bool = self.types.bool();

                if self.convert(bool, operand) > 0 { Err(1) } else { Ok((bool, false)) }
            }
            UnaryOperatorKind::AddressOf => {
                if !operand.is_lvalue && !self.types.is_function(ty) {
                    report_error!(self.diagnostics, token, "not-an-lvalue", "cannot take the address of a temporary value");
                    return Err(1);
                }

                Ok((self.types.pointer_to(ty), false))
            }
            UnaryOperatorKind::Deref => match self.types.pointee(ty) {
                Some(pointee) if !self.types.is_void(pointee) => Ok((pointee, true)),
                _ => {
                    report_error!(
                        self.diagnostics,
                        token,
                        "invalid-dereference",
                        "cannot dereference a value of type `{}`",
                        self.display(ty)
                    );
                    Err(1)
                }
            },
            UnaryOperatorKind::PreIncrement
            | UnaryOperatorKind::PreDecrement
            | UnaryOperatorKind::PostIncrement
            | UnaryOperatorKind::PostDecrement => {
                if !self.types.is_arithmetic(ty) {
                    return self.invalid_operand(token, operator, ty);
                }

                self.check_assignable(token, operand)?;

                Ok((unqualified, false))
            }
        }
    }

    fn invalid_operand(&mut self, token: Token, operator: UnaryOperatorKind, ty: TypeId) -> Typing {
        report_error!(
            self.diagnostics,
            token,
            "invalid-operands",
            "operator `{operator}` cannot be applied to `{}`",
            self.display(ty)
        );
        Err(1)
    }

    fn check_assignable(&mut self, token: Token, target: &Expression) -> Result<(), usize> {
        if !target.is_lvalue {
            report_error!(self.diagnostics, token, "not-an-lvalue", "left hand side is not assignable");
            return Err(1);
        }

        if self.types.is_immutable(self.type_of(target)) {
            report_error!(self.diagnostics, token, "assign-to-immutable", "cannot modify an immutable value");
            return Err(1);
        }

        Ok(())
    }

    fn analyze_ternary(&mut self, token: Token, then: &mut Expression, otherwise: &mut Expression) -> Typing {
        let (then_type, otherwise_type) = (self.type_of(then), self.type_of(otherwise));

        if self.types.types_equal(then_type, otherwise_type) {
            return Ok((self.types.unqualified(then_type), false));
        }

        if self.types.is_numeric(then_type) && self.types.is_numeric(otherwise_type) {
            return self.unify(then, otherwise).map(|ty| (ty, false));
        }

        if self.convert(then_type, otherwise) == 0 {
            return Ok((then_type, false));
        }

        report_error!(self.diagnostics, token, "type-mismatch", "ternary branches have incompatible types");
        Err(1)
    }

    fn analyze_member(&mut self, token: Token, object: &Expression, member: InternedSymbol, through_pointer: bool) -> Typing {
        let object_type = self.type_of(object);

        let structure = if through_pointer {
            match self.types.pointee(object_type) {
                Some(pointee) if self.types.is_struct(pointee) => pointee,
                _ => {
                    report_error!(
                        self.diagnostics,
                        token,
                        "not-a-struct",
                        "`->` needs a pointer to a struct or union, found `{}`",
                        self.display(object_type)
                    );
                    return Err(1);
                }
            }
        } else if self.types.is_struct(object_type) {
            object_type
        } else {
            report_error!(
                self.diagnostics,
                token,
                "not-a-struct",
                "`.` needs a struct or union, found `{}`",
                self.display(object_type)
            );
            return Err(1);
        };

        let Some((member_type, _)) = self.types.member(structure, member) else {
            report_error!(
                self.diagnostics,
                token,
                "unknown-member",
                "`{}` has no member named `{member}`",
                self.display(structure)
            );
            return Err(1);
        };

        Ok((member_type, through_pointer || object.is_lvalue))
    }

    fn analyze_call(
        &mut self,
        context: &mut Context,
        token: Token,
        callee: InternedSymbol,
        resolved: &mut Option<SymbolId>,
        arguments: &mut [Expression],
    ) -> Typing {
        let Some(id) = self.scopes.lookup_symbol(context.scope(), callee, token.source) else {
            report_error!(self.diagnostics, token, "undeclared-identifier", "function `{callee}` is not declared");
            return Err(1);
        };

        let symbol = self.scopes.symbol_mut(id);
        symbol.is_referenced = true;

        let signature = match (symbol.kind, symbol.ty) {
            (SymbolKind::Function, Some(ty)) => match self.types.kind(ty) {
                TypeKind::Function {
                    return_type,
                    parameters,
                    is_variadic,
                } => Some((*return_type, parameters.clone(), *is_variadic)),
                _ => None,
            },
            _ => None,
        };

        let Some(signature) = signature else {
            report_error!(self.diagnostics, token, "not-a-function", "`{callee}` is not a function");
            return Err(1);
        };

        *resolved = Some(id);

        let (return_type, parameters, is_variadic) = signature;

        let errors: usize = arguments
            .iter_mut()
            .map(|argument| self.analyze_expression(context, argument, None))
            .sum();

        if errors > 0 {
            return Err(errors);
        }

        if arguments.len() < parameters.len() || (arguments.len() > parameters.len() && !is_variadic) {
            report_error!(
                self.diagnostics,
                token,
                "arity-mismatch",
                "`{callee}` takes {} argument(s) but {} were supplied",
                parameters.len(),
                arguments.len()
            );
            return Err(1);
        }

        let mut errors = 0;

        for (argument, parameter) in arguments.iter_mut().zip(parameters.iter()) {
            if parameter.is_reference {
                let argument_type = self.type_of(argument);

                if !argument.is_lvalue || !self.types.types_equal(argument_type, parameter.ty) {
                    report_error!(
                        self.diagnostics,
                        argument.token,
                        "reference-mismatch",
                        "reference parameter needs an assignable `{}`",
                        self.display(parameter.ty)
                    );
                    errors += 1;
                }
            } else {
                errors += self.convert(parameter.ty, argument);
            }
        }

        if errors > 0 { Err(errors) } else { Ok((return_type, false)) }
    }

    fn analyze_subscript(&mut self, token: Token, base: &Expression, index: &Expression) -> Typing {
        let (base_type, index_type) = (self.type_of(base), self.type_of(index));

        let Some(element) = self.types.element(base_type) else {
            report_error!(
                self.diagnostics,
                token,
                "invalid-subscript",
                "cannot index into a value of type `{}`",
                self.display(base_type)
            );
            return Err(1);
        };

        if !self.types.is_integer(index_type) {
            report_error!(
                self.diagnostics,
                index.token,
                "invalid-subscript",
                "array index must be an integer, found `{}`",
                self.display(index_type)
            );
            return Err(1);
        }

        if self.types.is_array(base_type) {
            let length = self.types.length_of(base_type);

            if let Some(constant) = index.as_integer() {
                if constant < 0 || constant as u64 >= length {
                    report_error!(
                        self.diagnostics,
                        index.token,
                        "index-out-of-range",
                        "index {constant} is out of range for an array of length {length}"
                    );
                    return Err(1);
                }
            }
        }

        Ok((element, true))
    }

    fn analyze_collection(
        &mut self,
        context: &mut Context,
        token: Token,
        elements: &mut [Expression],
        expected: Option<TypeId>,
    ) -> Typing {
        let expected = expected.filter(|ty| self.types.is_array(*ty));

        let element_expected = expected.and_then(|ty| self.types.element(ty));
        let errors: usize = elements
            .iter_mut()
            .map(|element| self.analyze_expression(context, element, element_expected))
            .sum();

        if errors > 0 {
            return Err(errors);
        }

        let array = match expected {
            Some(array) => {
                let length = self.types.length_of(array);

                if elements.len() as u64 > length {
                    report_error!(
                        self.diagnostics,
                        token,
                        "too-many-elements",
                        "{} elements do not fit into `{}`",
                        elements.len(),
                        self.display(array)
                    );
                    return Err(1);
                }

                array
            }
            None => {
                let Some(first) = elements.first() else {
                    report_error!(self.diagnostics, token, "cannot-infer", "cannot infer the type of an empty collection");
                    return Err(1);
                };

                let element = self.types.unqualified(self.type_of(first));
                self.types.array_of(element, elements.len() as u64)
            }
        };

        let element = self.types.element(array).unwrap_or_else(|| self.types.void());
        let errors: usize = elements
            .iter_mut()
            .map(|value| self.convert(element, value))
            .sum();

        if errors > 0 { Err(errors) } else { Ok((array, false)) }
    }

    fn analyze_cast(&mut self, token: Token, inner: &Expression, target: TypeId, is_implicit: bool) -> Typing {
        let source = self.type_of(inner);
        let types = &*self.types;

        let allowed = is_implicit
            || types.types_equal(types.unqualified(source), target)
            || types.is_void(target)
            || (types.is_numeric(source) && types.is_numeric(target))
            || (types.is_pointer(source) && types.is_pointer(target))
            || (types.is_pointer(source) && types.is_integer(target))
            || (types.is_integer(source) && types.is_pointer(target));

        if !allowed {
            report_error!(
                self.diagnostics,
                token,
                "invalid-cast",
                "cannot cast `{}` to `{}`",
                self.display(source),
                self.display(target)
            );
            return Err(1);
        }

        Ok((target, false))
    }

    fn analyze_assign(&mut self, token: Token, target: &Expression, value: &mut Expression) -> Typing {
        self.check_assignable(token, target)?;

        let target_type = self.types.unqualified(self.type_of(target));

        if self.convert(target_type, value) > 0 {
            return Err(1);
        }

        Ok((target_type, false))
    }

    fn analyze_compound_assign(
        &mut self,
        token: Token,
        operator: BinaryOperatorKind,
        target: &Expression,
        value: &mut Expression,
    ) -> Typing {
        self.check_assignable(token, target)?;

        let target_type = self.types.unqualified(self.type_of(target));
        let value_type = self.type_of(value);

        let valid = match operator.class() {
            BinaryOperatorClass::Arithmetic => {
                self.types.is_arithmetic(target_type) && self.types.is_arithmetic(value_type)
            }
            BinaryOperatorClass::Shift | BinaryOperatorClass::Bitwise => {
                self.types.is_integer(target_type) && self.types.is_integer(value_type)
            }
            BinaryOperatorClass::Comparison | BinaryOperatorClass::Logical => false,
        };

        if !valid {
            return self.invalid_operands(token, format!("{operator}="), target_type, value_type);
        }

        // `p += n` keeps the integer offset as is; shifts keep their amount
        let keeps_operand = self.types.is_pointer(target_type)
            || operator.class() == BinaryOperatorClass::Shift;

        if !keeps_operand && self.convert(target_type, value) > 0 {
            return Err(1);
        }

        Ok((target_type, false))
    }

    fn analyze_variable_init(
        &mut self,
        context: &mut Context,
        token: Token,
        symbol: SymbolId,
        initializer: &mut Option<Box<Expression>>,
    ) -> Typing {
        let declared = self.scopes.symbol(symbol).ty;

        match (declared, initializer) {
            (None, None) => {
                let name = self.scopes.symbol(symbol).name;
                report_error!(self.diagnostics, token, "missing-type", "`{name}` needs a type or an initializer");
                Err(1)
            }
            (Some(declared), None) => Ok((declared, false)),
            (Some(declared), Some(initializer)) => {
                let errors = self.analyze_expression(context, initializer, Some(declared));

                if errors > 0 {
                    return Err(errors);
                }

                if self.convert(declared, initializer) > 0 {
                    return Err(1);
                }

                Ok((declared, false))
            }
            (None, Some(initializer)) => {
                let errors = self.analyze_expression(context, initializer, None);

                // Inference proceeds as long as the initializer got a type
                let Some(inferred) = initializer.ty else {
                    return Err(errors.max(1));
                };

                let inferred = self.types.unqualified(inferred);
                self.scopes.symbol_mut(symbol).ty = Some(inferred);

                if errors > 0 { Err(errors) } else { Ok((inferred, false)) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::build::{ParamSpec, ProgramBuilder};

    fn analyze(program: &mut Program, types: &mut TypeArena) -> (Result<usize, AnalysisError>, DiagnosticSink) {
        let mut diagnostics = DiagnosticSink::new();
        let result = analyze_program(program, types, &mut diagnostics, &Config::default());

        (result, diagnostics)
    }

    fn body_expression(program: &Program, function: &str, index: usize) -> Expression {
        let function = program.function(function).unwrap();
        let StatementKind::Compound { statements, .. } = &function.body.kind else {
            panic!("function bodies are compound statements");
        };

        match &statements[index].kind {
            StatementKind::Expression(expression) => expression.clone(),
            StatementKind::Return(Some(expression)) => expression.clone(),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn convergence_check_is_pure() {
        assert_eq!(check_convergence(0, None), WaveOutcome::Converged);
        assert_eq!(check_convergence(0, Some(3)), WaveOutcome::Converged);
        assert_eq!(check_convergence(3, None), WaveOutcome::Continue);
        assert_eq!(check_convergence(2, Some(3)), WaveOutcome::Continue);
        assert_eq!(check_convergence(3, Some(3)), WaveOutcome::Stalled);
    }

    #[test]
    fn constant_expressions_fold_during_analysis() {
        let mut types = TypeArena::default();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "fold");

        builder.function("f", i32, &[], |b| {
            let two = b.int(2);
            let three = b.int(3);
            let sum = b.binary(BinaryOperatorKind::Add, two, three);
            let four = b.int(4);
            let product = b.binary(BinaryOperatorKind::Multiply, sum, four);

            vec![b.ret(Some(product))]
        });

        let mut program = builder.finish();
        let (result, _) = analyze(&mut program, &mut types);

        assert_eq!(result, Ok(1));

        let value = body_expression(&program, "f", 0);
        assert_eq!(value.kind, ExpressionKind::Literal(Literal::Integer(20)));
        assert_eq!(value.ty, Some(types.i32()));
    }

    #[test]
    fn implicit_casts_of_literals_are_folded() {
        let mut types = TypeArena::default();
        let f64 = types.f64();
        let mut builder = ProgramBuilder::new(&mut types, "widen");

        builder.function("f", f64, &[], |b| {
            let two = b.int(2);
            vec![b.ret(Some(two))]
        });

        let mut program = builder.finish();
        let (result, diagnostics) = analyze(&mut program, &mut types);

        assert_eq!(result, Ok(1));
        assert!(!diagnostics.has_errors());

        let value = body_expression(&program, "f", 0);
        assert!(value.is_literal());
        assert_eq!(value.ty, Some(types.f64()));
    }

    #[test]
    fn second_finally_block_is_rejected() {
        let mut types = TypeArena::default();
        let void = types.void();
        let mut builder = ProgramBuilder::new(&mut types, "finally");

        builder.function("f", void, &[], |b| {
            let first = b.block(|_| vec![]);
            let second = b.block(|_| vec![]);

            vec![b.finally(first), b.finally(second)]
        });

        let mut program = builder.finish();
        let (result, diagnostics) = analyze(&mut program, &mut types);

        assert_eq!(result, Err(AnalysisError::NonConvergence { errors: 1 }));
        assert_eq!(diagnostics.with_tag("duplicate-finally").count(), 1);
    }

    #[test]
    fn later_inferred_globals_resolve_in_the_next_wave() {
        let mut types = TypeArena::default();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "waves");

        builder.function("f", i32, &[], |b| {
            let g = b.ident("g");
            vec![b.ret(Some(g))]
        });

        let seven = builder.int(7);
        builder.global("g", None, Some(seven));

        let mut program = builder.finish();
        let (result, diagnostics) = analyze(&mut program, &mut types);

        assert_eq!(result, Ok(2));
        assert_eq!(diagnostics.error_count(), 0);
    }

    #[test]
    fn stagnant_waves_replay_the_real_errors() {
        let mut types = TypeArena::default();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "stall");

        builder.function("f", i32, &[], |b| {
            let missing = b.ident("missing");
            vec![b.ret(Some(missing))]
        });

        let mut program = builder.finish();
        let (result, diagnostics) = analyze(&mut program, &mut types);

        assert_eq!(result, Err(AnalysisError::NonConvergence { errors: 1 }));
        assert_eq!(diagnostics.with_tag("undeclared-identifier").count(), 1);
    }

    #[test]
    fn implicit_conversions_are_inserted_for_mixed_operands() {
        let mut types = TypeArena::default();
        let (f64, i32) = (types.f64(), types.i32());
        let mut builder = ProgramBuilder::new(&mut types, "mixed");

        builder.function("f", f64, &[ParamSpec::value("x", i32)], |b| {
            let x = b.ident("x");
            let half = b.float(0.5);
            let product = b.binary(BinaryOperatorKind::Multiply, x, half);

            vec![b.ret(Some(product))]
        });

        let mut program = builder.finish();
        let (result, _) = analyze(&mut program, &mut types);
        assert!(result.is_ok());

        let value = body_expression(&program, "f", 0);
        let ExpressionKind::Binary { lhs, .. } = value.kind else {
            panic!("expected a binary expression");
        };

        assert_eq!(value.ty, Some(types.f64()));
        assert!(matches!(lhs.kind, ExpressionKind::Cast { is_implicit: true, .. }));
    }

    #[test]
    fn local_errors_are_tagged() {
        let mut types = TypeArena::default();
        let (i32, void) = (types.i32(), types.void());
        let mut builder = ProgramBuilder::new(&mut types, "errors");

        builder.function("callee", void, &[ParamSpec::value("a", i32).maybe_unused()], |_| vec![]);
        builder.function("f", void, &[], |b| {
            let call = b.call("callee", vec![]);
            let call = b.expr(call);
            let five = b.int(5);
            let six = b.int(6);
            let assign = b.assign(five, six);
            let assign = b.expr(assign);
            let brk = b.break_();

            vec![call, assign, brk]
        });

        let mut program = builder.finish();
        let (result, diagnostics) = analyze(&mut program, &mut types);

        assert!(matches!(result, Err(AnalysisError::NonConvergence { .. })));
        assert_eq!(diagnostics.with_tag("arity-mismatch").count(), 1);
        assert_eq!(diagnostics.with_tag("not-an-lvalue").count(), 1);
        assert_eq!(diagnostics.with_tag("break-outside-loop").count(), 1);
    }

    #[test]
    fn unused_symbols_warn_once() {
        let mut types = TypeArena::default();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "unused");

        builder.function(
            "f",
            i32,
            &[ParamSpec::value("unused", i32), ParamSpec::value("quiet", i32).maybe_unused()],
            |b| {
                let one = b.int(1);
                let local = b.local("dead", Some(i32), Some(one));
                let zero = b.int(0);

                vec![local, b.ret(Some(zero))]
            },
        );

        let mut program = builder.finish();
        let (result, diagnostics) = analyze(&mut program, &mut types);

        assert!(result.is_ok());
        assert_eq!(diagnostics.with_tag("unused-parameter").count(), 1);
        assert_eq!(diagnostics.with_tag("unused-symbol").count(), 1);
    }

    #[test]
    fn float_equality_warns() {
        let mut types = TypeArena::default();
        let (bool, f64) = (types.bool(), types.f64());
        let mut builder = ProgramBuilder::new(&mut types, "floats");

        builder.function("f", bool, &[ParamSpec::value("x", f64)], |b| {
            let x = b.ident("x");
            let one = b.float(1.0);
            let equal = b.binary(BinaryOperatorKind::Equals, x, one);

            vec![b.ret(Some(equal))]
        });

        let mut program = builder.finish();
        let (result, diagnostics) = analyze(&mut program, &mut types);

        assert!(result.is_ok());
        assert_eq!(diagnostics.with_tag("float-equality").count(), 1);
    }

    #[test]
    fn switch_cases_must_be_unique_constants() {
        let mut types = TypeArena::default();
        let void = types.void();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "switch");

        builder.function("f", void, &[ParamSpec::value("x", i32)], |b| {
            let body = b.block(|b| {
                let one = b.int(1);
                let first = b.case(one);
                let one_again = b.int(1);
                let second = b.case(one_again);

                vec![first, second]
            });
            let x = b.ident("x");

            vec![b.switch(x, body)]
        });

        let mut program = builder.finish();
        let (_, diagnostics) = analyze(&mut program, &mut types);

        assert_eq!(diagnostics.with_tag("duplicate-case").count(), 1);
    }

    #[test]
    fn inline_asm_operands_are_checked() {
        let mut types = TypeArena::default();
        let void = types.void();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "asm");

        builder.function("f", void, &[ParamSpec::value("x", i32)], |b| {
            let good = b.inline_asm("mov %rax, $x", &["rax"], &[]);
            let bad = b.inline_asm("mov %rbx, $nothing", &[], &[]);

            vec![good, bad]
        });

        let mut program = builder.finish();
        let (_, diagnostics) = analyze(&mut program, &mut types);

        assert_eq!(diagnostics.with_tag("asm-unknown-register").count(), 1);
        assert_eq!(diagnostics.with_tag("asm-undeclared-identifier").count(), 1);
    }

    #[test]
    fn unresolved_user_types_abort_before_waves() {
        let mut types = TypeArena::default();
        let void = types.void();
        let mut builder = ProgramBuilder::new(&mut types, "classes");

        let ghost = builder.forward("Ghost");
        builder.function("f", void, &[ParamSpec::value("g", ghost).maybe_unused()], |_| vec![]);

        let mut program = builder.finish();
        let (result, diagnostics) = analyze(&mut program, &mut types);

        assert!(matches!(result, Err(AnalysisError::UnresolvedTypes(_))));
        assert_eq!(diagnostics.with_tag("unresolved-classname").count(), 1);
    }

    #[test]
    fn enum_members_resolve_to_literals() {
        let mut types = TypeArena::default();
        let i32 = types.i32();
        let mut builder = ProgramBuilder::new(&mut types, "enum");

        let color = builder.enum_type(
            "Color",
            i32,
            &[
                ("Red", crate::middle::ty::ConstantValue::Implicit),
                ("Green", crate::middle::ty::ConstantValue::Implicit),
            ],
        );

        builder.function("f", color, &[], |b| {
            let green = b.scope_resolution("Color", "Green");
            vec![b.ret(Some(green))]
        });

        let mut program = builder.finish();
        let (result, _) = analyze(&mut program, &mut types);
        assert!(result.is_ok());

        let value = body_expression(&program, "f", 0);
        assert_eq!(value.kind, ExpressionKind::Literal(Literal::Integer(1)));
        assert_eq!(value.ty, Some(color));
    }
}
