//! The program tree consumed by the middle end.
//!
//! Parents own their children through `Box`/`Vec`. Passes rewrite the tree by
//! writing a new node into the slot held by the parent, usually after taking
//! the old one out with [`Expression::take`] or [`Statement::take`].

use std::mem;

use super::{SourceMap, Token, intern::InternedSymbol};
use crate::middle::{
    scope::{ScopeError, ScopeId, ScopeTree, SymbolId},
    ty::TypeId,
};

pub mod build;
pub mod pretty_print;
pub mod visit;

#[derive(Debug)]
pub struct Program {
    pub sources: SourceMap,
    pub scopes: ScopeTree,
    pub global_scope: ScopeId,
    pub items: Vec<Item>,
    /// Declarations the parser had to reject, surfaced by the analyzer
    pub declaration_errors: Vec<ScopeError>,
}

impl Program {
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(function) => Some(function),
            Item::Global(_) => None,
        })
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.items.iter_mut().filter_map(|item| match item {
            Item::Function(function) => Some(function),
            Item::Global(_) => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions().find(|function| function.name.value() == name)
    }

    pub fn globals(&self) -> impl Iterator<Item = &Global> {
        self.items.iter().filter_map(|item| match item {
            Item::Global(global) => Some(global),
            Item::Function(_) => None,
        })
    }
}

#[derive(Debug)]
pub enum Item {
    Function(Function),
    Global(Global),
}

/// A module level variable declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub symbol: SymbolId,
    /// An expression statement wrapping a variable-init expression
    pub statement: Statement,
    pub is_analyzed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub symbol: SymbolId,
    pub name: InternedSymbol,
    /// Holds the parameters; the body's compound scope is nested inside it
    pub scope: ScopeId,
    pub parameters: Vec<SymbolId>,
    pub return_type: TypeId,
    pub body: Statement,
    pub labels: Vec<InternedSymbol>,
    pub has_finally: bool,
    pub is_analyzed: bool,
    pub token: Token,
    /// Counter for the `$N_...` labels minted by lowering
    pub next_label_id: u32,
}

impl Function {
    pub fn next_label_id(&mut self) -> u32 {
        let id = self.next_label_id;
        self.next_label_id += 1;
        id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub token: Token,
    /// `None` until analysis assigns a type
    pub ty: Option<TypeId>,
    pub is_lvalue: bool,
}

impl Expression {
    pub fn new(kind: ExpressionKind, token: Token) -> Self {
        Self {
            kind,
            token,
            ty: None,
            is_lvalue: false,
        }
    }

    pub fn typed(kind: ExpressionKind, token: Token, ty: TypeId) -> Self {
        Self {
            kind,
            token,
            ty: Some(ty),
            is_lvalue: false,
        }
    }

    pub fn literal(literal: Literal, token: Token, ty: TypeId) -> Self {
        Self::typed(ExpressionKind::Literal(literal), token, ty)
    }

    /// Moves the expression out, leaving an untyped `null` literal behind
    pub fn take(&mut self) -> Expression {
        let token = self.token;

        mem::replace(self, Expression::new(ExpressionKind::Literal(Literal::Null), token))
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            ExpressionKind::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        self.as_literal().is_some()
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.as_literal()? {
            Literal::Integer(value) => Some(*value),
            Literal::Bool(value) => Some(*value as i64),
            Literal::Float(_) | Literal::String(_) | Literal::Null => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    /// Stored sign- or zero-extended from the literal's type
    Integer(i64),
    Float(f64),
    Bool(bool),
    String(InternedSymbol),
    Null,
}

impl core::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Integer(value) => write!(f, "{value}"),
            Literal::Float(value) => write!(f, "{value:?}"),
            Literal::Bool(value) => write!(f, "{value}"),
            Literal::String(value) => write!(f, "{:?}", value.value()),
            Literal::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Literal(Literal),
    Identifier {
        name: InternedSymbol,
        symbol: Option<SymbolId>,
    },
    Binary {
        operator: BinaryOperatorKind,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: Box<Expression>,
    },
    Ternary {
        condition: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    /// `object.member`, or `object->member` when `through_pointer`
    Member {
        object: Box<Expression>,
        member: InternedSymbol,
        through_pointer: bool,
    },
    /// `Enum::Member` or `Class::CONSTANT`
    ScopeResolution {
        scope: InternedSymbol,
        member: InternedSymbol,
    },
    Call {
        callee: InternedSymbol,
        symbol: Option<SymbolId>,
        arguments: Vec<Expression>,
    },
    Subscript {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    CollectionInit(Vec<Expression>),
    Cast {
        expression: Box<Expression>,
        target: TypeId,
        is_implicit: bool,
    },
    Assign {
        target: Box<Expression>,
        value: Box<Expression>,
    },
    CompoundAssign {
        operator: BinaryOperatorKind,
        target: Box<Expression>,
        value: Box<Expression>,
    },
    /// Declaration of a local or global, with an optional initializer
    VariableInit {
        symbol: SymbolId,
        initializer: Option<Box<Expression>>,
    },
    SizeOf(TypeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Modulus,              // %
    Equals,               // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseAnd,           // &
    BitwiseOr,            // |
    BitwiseXor,           // ^
    ShiftLeft,            // <<
    ShiftRight,           // >>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorClass {
    Arithmetic,
    Shift,
    Bitwise,
    Comparison,
    Logical,
}

impl BinaryOperatorKind {
    pub fn class(self) -> BinaryOperatorClass {
        match self {
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulus => {
                BinaryOperatorClass::Arithmetic
            }
            Self::ShiftLeft | Self::ShiftRight => BinaryOperatorClass::Shift,
            Self::BitwiseAnd | Self::BitwiseOr | Self::BitwiseXor => BinaryOperatorClass::Bitwise,
            Self::Equals
            | Self::NotEquals
            | Self::LessThan
            | Self::LessThanOrEqualTo
            | Self::GreaterThan
            | Self::GreaterThanOrEqualTo => BinaryOperatorClass::Comparison,
            Self::LogicalAnd | Self::LogicalOr => BinaryOperatorClass::Logical,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.class() == BinaryOperatorClass::Comparison
    }

    /// The comparison that holds exactly when `self` does not
    pub fn negated_comparison(self) -> Option<Self> {
        match self {
            Self::Equals => Some(Self::NotEquals),
            Self::NotEquals => Some(Self::Equals),
            Self::LessThan => Some(Self::GreaterThanOrEqualTo),
            Self::GreaterThanOrEqualTo => Some(Self::LessThan),
            Self::GreaterThan => Some(Self::LessThanOrEqualTo),
            Self::LessThanOrEqualTo => Some(Self::GreaterThan),
            Self::Add
            | Self::Subtract
            | Self::Multiply
            | Self::Divide
            | Self::Modulus
            | Self::LogicalAnd
            | Self::LogicalOr
            | Self::BitwiseAnd
            | Self::BitwiseOr
            | Self::BitwiseXor
            | Self::ShiftLeft
            | Self::ShiftRight => None,
        }
    }
}

impl core::fmt::Display for BinaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        };

        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperatorKind {
    Deref,         // *
    AddressOf,     // &
    LogicalNot,    // !
    BitwiseNot,    // ~
    Negate,        // -
    PreIncrement,  // ++x
    PreDecrement,  // --x
    PostIncrement, // x++
    PostDecrement, // x--
}

impl UnaryOperatorKind {
    pub fn is_increment_or_decrement(self) -> bool {
        matches!(
            self,
            Self::PreIncrement | Self::PreDecrement | Self::PostIncrement | Self::PostDecrement
        )
    }
}

impl core::fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deref => write!(f, "*"),
            Self::AddressOf => write!(f, "&"),
            Self::LogicalNot => write!(f, "!"),
            Self::BitwiseNot => write!(f, "~"),
            Self::Negate => write!(f, "-"),
            Self::PreIncrement | Self::PostIncrement => write!(f, "++"),
            Self::PreDecrement | Self::PostDecrement => write!(f, "--"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub token: Token,
}

impl Statement {
    pub fn new(kind: StatementKind, token: Token) -> Self {
        Self { kind, token }
    }

    pub fn empty(token: Token) -> Self {
        Self::new(StatementKind::Empty, token)
    }

    /// Moves the statement out, leaving an empty statement behind
    pub fn take(&mut self) -> Statement {
        let token = self.token;

        mem::replace(self, Statement::empty(token))
    }

    pub fn is_empty(&self) -> bool {
        match &self.kind {
            StatementKind::Empty => true,
            StatementKind::Sequence(statements) => statements.iter().all(Statement::is_empty),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchLabels {
    pub head: InternedSymbol,
    pub tail: InternedSymbol,
    /// (label, case value) in source order
    pub cases: Vec<(InternedSymbol, i64)>,
    pub default: Option<InternedSymbol>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub value: Expression,
    pub body: Statement,
    /// Filled in by control flow lowering
    pub labels: Option<SwitchLabels>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsmPart {
    Text(String),
    Symbol(SymbolId),
    Label(InternedSymbol),
    Register(InternedSymbol),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineAsm {
    pub template: String,
    pub preserve: Vec<InternedSymbol>,
    pub ignore: Vec<InternedSymbol>,
    /// Parsed template, filled in by the analyzer
    pub parts: Vec<AsmPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Expression(Expression),
    Compound {
        scope: ScopeId,
        statements: Vec<Statement>,
    },
    /// Statements spliced in by lowering, without a scope of their own
    Sequence(Vec<Statement>),
    If {
        condition: Expression,
        then: Box<Statement>,
        otherwise: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    DoWhile {
        body: Box<Statement>,
        condition: Expression,
    },
    For {
        initializer: Option<Box<Statement>>,
        condition: Option<Expression>,
        step: Option<Expression>,
        body: Box<Statement>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
    Goto(InternedSymbol),
    ComputedGoto(Expression),
    Label(InternedSymbol),
    Switch(Box<Switch>),
    Case(Expression),
    Default,
    Assert {
        condition: Expression,
        message: Option<InternedSymbol>,
    },
    InlineAsm(Box<InlineAsm>),
    Finally(Box<Statement>),
    Empty,
}
