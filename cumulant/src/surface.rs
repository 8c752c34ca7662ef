//! Surface language.
//!
//! Surface terms arrive with names already resolved: local variables are
//! referred to by [`LocalId`]s, and global definitions by [`DefId`]s.

use crate::core::{DefId, Plicity};
use crate::source::{FileRange, StringId};

pub mod elaboration;

/// A local variable, as assigned by the name resolver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LocalId(u32);

impl LocalId {
    pub const fn new(id: u32) -> LocalId {
        LocalId(id)
    }
}

/// Levels, as written in universes and level arguments.
#[derive(Debug, Clone)]
pub enum Level {
    Const(FileRange, i32),
    /// The level parameter at the given position, of the same kind as the
    /// level being written.
    Param(FileRange, u16),
    Infinity(FileRange),
    /// A level to be inferred.
    Hole(FileRange),
    Suc(FileRange, Box<Level>),
    Max(FileRange, Box<Level>, Box<Level>),
}

impl Level {
    pub fn range(&self) -> FileRange {
        match self {
            Level::Const(range, _)
            | Level::Param(range, _)
            | Level::Infinity(range)
            | Level::Hole(range)
            | Level::Suc(range, _)
            | Level::Max(range, _, _) => *range,
        }
    }
}

/// Explicit level arguments to a global definition.
#[derive(Debug, Clone, Default)]
pub struct LevelArgs {
    pub p: Vec<Level>,
    pub h: Vec<Level>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UniverseKind {
    Type,
    Set,
    Prop,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub range: FileRange,
    pub id: Option<LocalId>,
    pub name: Option<StringId>,
    pub plicity: Plicity,
    pub r#type: Option<Term>,
}

#[derive(Debug, Clone)]
pub struct Arg {
    pub plicity: Plicity,
    pub term: Term,
}

impl Arg {
    pub fn explicit(term: Term) -> Arg {
        Arg {
            plicity: Plicity::Explicit,
            term,
        }
    }

    pub fn implicit(term: Term) -> Arg {
        Arg {
            plicity: Plicity::Implicit,
            term,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LetClause {
    pub range: FileRange,
    pub id: LocalId,
    pub name: Option<StringId>,
    pub r#type: Option<Term>,
    pub expr: Term,
}

/// A variable bound by a constructor pattern.
#[derive(Debug, Clone)]
pub struct PatternVar {
    pub id: Option<LocalId>,
    pub name: Option<StringId>,
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub range: FileRange,
    pub con: DefId,
    pub vars: Vec<PatternVar>,
    pub body: Term,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImplTarget {
    /// Implement a single field.
    Field(DefId),
    /// Implement every field of an ancestor class at once.
    Class(DefId),
}

#[derive(Debug, Clone)]
pub struct Implementation {
    pub range: FileRange,
    pub target: ImplTarget,
    /// The variable that refers to the instance being built, if the
    /// implementation mentions it.
    pub this: Option<LocalId>,
    pub expr: Term,
}

/// Surface terms.
#[derive(Debug, Clone)]
pub enum Term {
    Local(FileRange, LocalId),
    Global(FileRange, DefId, Option<LevelArgs>),
    App(FileRange, Box<Term>, Vec<Arg>),
    Lam(FileRange, Vec<Param>, Box<Term>),
    Pi(FileRange, Vec<Param>, Box<Term>),
    Sigma(FileRange, Vec<Param>),
    Tuple(FileRange, Vec<Term>),
    /// Projection from a tuple. Indices start at zero.
    Proj(FileRange, Box<Term>, usize),
    FieldAccess(FileRange, Box<Term>, DefId),
    Universe(FileRange, UniverseKind, Option<Level>, Option<Level>),
    Hole(FileRange),
    Goal(FileRange, Option<StringId>),
    Ann(FileRange, Box<Term>, Box<Term>),
    Let(FileRange, Vec<LetClause>, Box<Term>),
    Case(FileRange, Box<Term>, Option<Box<Term>>, Vec<Clause>),
    /// Extend a class with implementations, producing either a more specific
    /// class, or (with `\new`) an instance.
    ClassExt(FileRange, bool, Box<Term>, Vec<Implementation>),
    /// An instance of a class that is already fully implemented.
    New(FileRange, Box<Term>),
    Array(FileRange, Vec<Term>),
    NumberLiteral(FileRange, StringId),
    StringLiteral(FileRange, StringId),
    /// A term that the parser or resolver already reported an error for.
    ReportedError(FileRange),
}

impl Term {
    pub fn range(&self) -> FileRange {
        match self {
            Term::Local(range, _)
            | Term::Global(range, _, _)
            | Term::App(range, _, _)
            | Term::Lam(range, _, _)
            | Term::Pi(range, _, _)
            | Term::Sigma(range, _)
            | Term::Tuple(range, _)
            | Term::Proj(range, _, _)
            | Term::FieldAccess(range, _, _)
            | Term::Universe(range, _, _, _)
            | Term::Hole(range)
            | Term::Goal(range, _)
            | Term::Ann(range, _, _)
            | Term::Let(range, _, _)
            | Term::Case(range, _, _, _)
            | Term::ClassExt(range, _, _, _)
            | Term::New(range, _)
            | Term::Array(range, _)
            | Term::NumberLiteral(range, _)
            | Term::StringLiteral(range, _)
            | Term::ReportedError(range) => *range,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DefinitionBody {
    /// A function, or an axiom if the body is missing.
    Function(Option<Term>),
    /// A named wrapper around a type.
    TypeWrapper(Term),
    /// An instance of a class.
    Instance(Term, Vec<Implementation>),
    /// A field of a class. The result type of the definition is the type of
    /// the field, with `this` in scope.
    Field {
        class: DefId,
        this: LocalId,
        is_parameter: bool,
        is_explicit: bool,
    },
    /// A constructor of a data type. The parameters of the data type are
    /// bound to the given local variables.
    Constructor { data: DefId, data_params: Vec<LocalId> },
}

/// A definition whose level parameters were declared with the globals.
#[derive(Debug, Clone)]
pub struct Definition {
    pub range: FileRange,
    pub params: Vec<Param>,
    pub result_type: Option<Term>,
    pub body: DefinitionBody,
}
