//! Lexical scope chain shared by the analyzer and the type resolver.
//!
//! Every scope holds three namespaces: symbols (variables, parameters and
//! functions), classes (struct/union names) and enums. A name may appear in
//! at most one of the three within a single scope. Lookups walk from the
//! innermost scope towards the root, skipping entries that are internal to a
//! different source file.

use hashbrown::HashMap;
use thiserror::Error;

use crate::{
    frontend::{SourceId, Token, intern::InternedSymbol},
    index::{IndexVec, simple_index},
    middle::ty::TypeId,
};

simple_index! {
    pub struct ScopeId;
}

simple_index! {
    pub struct SymbolId;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("`{name}` is already declared in this scope")]
    Duplicate {
        name: InternedSymbol,
        previous: Token,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    String(InternedSymbol),
}

/// Attribute clauses attached to a declaration, e.g. `[[maybe_unused]]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: HashMap<InternedSymbol, Vec<AttributeValue>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, arguments: Vec<AttributeValue>) {
        self.entries.insert(InternedSymbol::new(name), arguments);
    }

    pub fn get(&self, name: &str) -> Option<&[AttributeValue]> {
        self.entries
            .get(&InternedSymbol::new(name))
            .map(Vec::as_slice)
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(&InternedSymbol::new(name))
    }

    pub fn is_maybe_unused(&self) -> bool {
        self.has("maybe_unused")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Parameter { is_reference: bool },
    Function,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: InternedSymbol,
    pub kind: SymbolKind,
    /// `None` until the declaration's type is known, e.g. for `x := expr`
    pub ty: Option<TypeId>,
    pub token: Token,
    pub scope: ScopeId,
    pub is_internal: bool,
    pub is_immutable: bool,
    pub attributes: Attributes,
    pub is_referenced: bool,
}

impl Symbol {
    pub fn new(name: InternedSymbol, kind: SymbolKind, ty: Option<TypeId>, token: Token) -> Self {
        Self {
            name,
            kind,
            ty,
            token,
            // Overwritten by `ScopeTree::declare_symbol`
            scope: ScopeId(0),
            is_internal: false,
            is_immutable: false,
            attributes: Attributes::new(),
            is_referenced: false,
        }
    }

    pub fn is_reference_parameter(&self) -> bool {
        matches!(self.kind, SymbolKind::Parameter { is_reference: true })
    }
}

/// A named user type (struct, union or enum) visible in some scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassEntry {
    pub ty: TypeId,
    pub token: Token,
    pub is_internal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    Symbol(SymbolId),
    Class(ClassEntry),
    Enum(ClassEntry),
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    names: HashMap<InternedSymbol, Namespace>,
}

impl Scope {
    pub fn symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.names.values().filter_map(|entry| match entry {
            Namespace::Symbol(id) => Some(*id),
            Namespace::Class(_) | Namespace::Enum(_) => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    scopes: IndexVec<ScopeId, Scope>,
    symbols: IndexVec<SymbolId, Symbol>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(Scope {
            parent,
            names: HashMap::new(),
        })
    }

    /// The outermost scope, i.e. the first one pushed without a parent
    pub fn root(&self) -> Option<ScopeId> {
        self.scopes
            .enumerate()
            .find(|(_, scope)| scope.parent.is_none())
            .map(|(id, _)| id)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id]
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.enumerate()
    }

    fn check_unique(&self, scope: ScopeId, name: InternedSymbol) -> Result<(), ScopeError> {
        let Some(previous) = self.scopes[scope].names.get(&name) else {
            return Ok(());
        };

        let previous = match previous {
            Namespace::Symbol(id) => self.symbols[*id].token,
            Namespace::Class(class) | Namespace::Enum(class) => class.token,
        };

        Err(ScopeError::Duplicate { name, previous })
    }

    fn declare(
        &mut self,
        scope: ScopeId,
        name: InternedSymbol,
        entry: Namespace,
    ) -> Result<(), ScopeError> {
        self.check_unique(scope, name)?;
        self.scopes[scope].names.insert(name, entry);

        Ok(())
    }

    pub fn declare_symbol(&mut self, scope: ScopeId, mut symbol: Symbol) -> Result<SymbolId, ScopeError> {
        let name = symbol.name;
        self.check_unique(scope, name)?;

        symbol.scope = scope;
        let id = self.symbols.push(symbol);
        self.scopes[scope].names.insert(name, Namespace::Symbol(id));

        Ok(id)
    }

    pub fn declare_class(
        &mut self,
        scope: ScopeId,
        name: InternedSymbol,
        class: ClassEntry,
    ) -> Result<(), ScopeError> {
        self.declare(scope, name, Namespace::Class(class))
    }

    pub fn declare_enum(
        &mut self,
        scope: ScopeId,
        name: InternedSymbol,
        class: ClassEntry,
    ) -> Result<(), ScopeError> {
        self.declare(scope, name, Namespace::Enum(class))
    }

    /// Walks outward from `scope`, yielding the first entry for `name` that is
    /// visible from `from`.
    fn lookup(&self, scope: ScopeId, name: InternedSymbol, from: SourceId) -> Option<Namespace> {
        let mut current = Some(scope);

        while let Some(id) = current {
            let scope = &self.scopes[id];

            if let Some(entry) = scope.names.get(&name) {
                if self.is_visible(entry, from) {
                    return Some(*entry);
                }
            }

            current = scope.parent;
        }

        None
    }

    /// Internal entries are only visible from the file that declared them
    fn is_visible(&self, entry: &Namespace, from: SourceId) -> bool {
        let (is_internal, token) = match entry {
            Namespace::Symbol(id) => (self.symbols[*id].is_internal, self.symbols[*id].token),
            Namespace::Class(class) | Namespace::Enum(class) => (class.is_internal, class.token),
        };

        !is_internal || from == SourceId::SYNTHESIZED || token.source == from
    }

    pub fn lookup_symbol(&self, scope: ScopeId, name: InternedSymbol, from: SourceId) -> Option<SymbolId> {
        match self.lookup(scope, name, from)? {
            Namespace::Symbol(id) => Some(id),
            Namespace::Class(_) | Namespace::Enum(_) => None,
        }
    }

    pub fn lookup_class(&self, scope: ScopeId, name: InternedSymbol, from: SourceId) -> Option<TypeId> {
        match self.lookup(scope, name, from)? {
            Namespace::Class(class) => Some(class.ty),
            Namespace::Symbol(_) | Namespace::Enum(_) => None,
        }
    }

    pub fn lookup_enum(&self, scope: ScopeId, name: InternedSymbol, from: SourceId) -> Option<TypeId> {
        match self.lookup(scope, name, from)? {
            Namespace::Enum(class) => Some(class.ty),
            Namespace::Symbol(_) | Namespace::Class(_) => None,
        }
    }

    /// Class or enum lookup used by the type resolver: module level first,
    /// then outward from the declaring scope.
    pub fn resolve_type_name(&self, scope: ScopeId, name: InternedSymbol, from: SourceId) -> Option<TypeId> {
        let type_entry = |entry: Namespace| match entry {
            Namespace::Class(class) | Namespace::Enum(class) => Some(class.ty),
            Namespace::Symbol(_) => None,
        };

        if let Some(root) = self.root() {
            let root_scope = &self.scopes[root];

            if let Some(entry) = root_scope.names.get(&name) {
                if self.is_visible(entry, from) {
                    if let Some(ty) = type_entry(*entry) {
                        return Some(ty);
                    }
                }
            }
        }

        self.lookup(scope, name, from).and_then(type_entry)
    }
}
