//! Core language.
//!
//! Terms are immutable and shared through [`Arc`]s. Variables refer to the
//! [`Binding`] that introduced them by identity, so terms can be moved between
//! scopes and substituted into without renumbering.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::source::StringId;

pub mod level;
pub mod pretty;
pub mod prim;
pub mod semantics;

pub use level::{Level, LevelArgs, LevelParams, Sort};

/// Shared core terms.
pub type ArcTerm = Arc<Term>;

/// The plicity of a parameter or argument.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Plicity {
    Explicit,
    Implicit,
}

impl Plicity {
    pub fn is_explicit(self) -> bool {
        self == Plicity::Explicit
    }
}

/// References to global definitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefId(u32);

impl DefId {
    pub(crate) fn new(index: usize) -> DefId {
        DefId(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Expression inference variables.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaVar(u32);

impl MetaVar {
    pub(crate) fn new(index: usize) -> MetaVar {
        MetaVar(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for MetaVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// A variable binding. Two bindings are the same variable only if they are
/// the same allocation.
#[derive(Clone)]
pub struct Binding(Arc<BindingData>);

struct BindingData {
    name: Option<StringId>,
    r#type: ArcTerm,
}

impl Binding {
    pub fn new(name: Option<StringId>, r#type: ArcTerm) -> Binding {
        Binding(Arc::new(BindingData { name, r#type }))
    }

    pub fn name(&self) -> Option<StringId> {
        self.0.name
    }

    pub fn r#type(&self) -> &ArcTerm {
        &self.0.r#type
    }

    /// A fresh binding with the same name but a different type.
    pub fn with_type(&self, r#type: ArcTerm) -> Binding {
        Binding::new(self.name(), r#type)
    }

    /// A variable that refers to this binding.
    pub fn to_term(&self) -> ArcTerm {
        Arc::new(Term::Var(self.clone()))
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Binding) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Binding {}

impl Hash for Binding {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({:p})", Arc::as_ptr(&self.0))
    }
}

/// A parameter of a global definition.
#[derive(Debug, Clone)]
pub struct Param {
    pub plicity: Plicity,
    pub binding: Binding,
}

impl Param {
    pub fn new(plicity: Plicity, binding: Binding) -> Param {
        Param { plicity, binding }
    }

    pub fn explicit(binding: Binding) -> Param {
        Param::new(Plicity::Explicit, binding)
    }

    pub fn implicit(binding: Binding) -> Param {
        Param::new(Plicity::Implicit, binding)
    }
}

/// Literal values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Nat(u64),
    /// A value together with the exclusive upper bound of its type.
    Fin(u64, u64),
    Int(i64),
    String(Arc<str>),
}

/// A reference to a class, with some of its fields implemented.
#[derive(Debug, Clone)]
pub struct ClassCall {
    pub class: DefId,
    pub levels: LevelArgs,
    /// The binding that implementations use to refer to other fields.
    pub this: Binding,
    /// Implementations, in the order that they were installed.
    pub impls: Vec<(DefId, ArcTerm)>,
    pub sort: Sort,
}

impl ClassCall {
    /// A `this` binding for instances of `class`, typed by the class with no
    /// fields implemented.
    pub fn this_binding(
        name: Option<StringId>,
        class: DefId,
        levels: &LevelArgs,
        sort: Sort,
    ) -> Binding {
        let placeholder = Binding::new(None, Arc::new(Term::Error(None)));
        let bare = ClassCall {
            class,
            levels: levels.clone(),
            this: placeholder,
            impls: Vec::new(),
            sort,
        };
        Binding::new(name, Arc::new(Term::ClassCall(bare)))
    }

    /// A reference to `class` with no fields implemented.
    pub fn bare(class: DefId, levels: LevelArgs, sort: Sort) -> ClassCall {
        let this = ClassCall::this_binding(None, class, &levels, sort);
        ClassCall {
            class,
            levels,
            this,
            impls: Vec::new(),
            sort,
        }
    }

    pub fn implementation(&self, field: DefId) -> Option<&ArcTerm> {
        self.impls
            .iter()
            .find_map(|(f, term)| (*f == field).then_some(term))
    }

    pub fn is_implemented(&self, field: DefId) -> bool {
        self.implementation(field).is_some()
    }
}

/// A constructor applied to the arguments of its data type and its own
/// arguments.
#[derive(Debug, Clone)]
pub struct ConCall {
    pub con: DefId,
    pub levels: LevelArgs,
    pub data_args: Vec<ArcTerm>,
    pub args: Vec<ArcTerm>,
}

#[derive(Debug, Clone)]
pub struct Branch {
    pub con: DefId,
    pub params: Vec<Binding>,
    pub body: ArcTerm,
}

#[derive(Debug, Clone)]
pub struct CaseTerm {
    pub scrutinee: ArcTerm,
    pub result_type: ArcTerm,
    pub branches: Vec<Branch>,
}

/// An array literal. `elem_line` maps each index to the type of the element
/// at that index.
#[derive(Debug, Clone)]
pub struct ArrayTerm {
    pub levels: LevelArgs,
    pub elem_line: ArcTerm,
    pub elems: Vec<ArcTerm>,
}

/// A path abstraction over the interval.
#[derive(Debug, Clone)]
pub struct PathLam {
    pub levels: LevelArgs,
    pub line: ArcTerm,
    pub binding: Binding,
    pub body: ArcTerm,
}

/// An explicit conversion between a type wrapper and the type it wraps.
#[derive(Debug, Clone)]
pub struct TypeCoerce {
    pub wrapper: DefId,
    pub levels: LevelArgs,
    pub args: Vec<ArcTerm>,
    pub arg: ArcTerm,
    /// `true` when converting from the wrapper to the wrapped type.
    pub unwrap: bool,
}

/// Core terms.
#[derive(Debug, Clone)]
pub enum Term {
    /// Bound variables.
    Var(Binding),
    /// Inference variables.
    Meta(MetaVar),
    App(ArcTerm, ArcTerm),
    Lam(Plicity, Binding, ArcTerm),
    /// Dependent function types, annotated with their sort.
    Pi(Sort, Plicity, Binding, ArcTerm),
    /// Dependent pair types, annotated with their sort.
    Sigma(Sort, Vec<Binding>),
    /// Tuples, annotated with their sigma type.
    Tuple(Vec<ArcTerm>, ArcTerm),
    Proj(ArcTerm, usize),
    Universe(Sort),
    DataCall(DefId, LevelArgs, Vec<ArcTerm>),
    ConCall(ConCall),
    FunCall(DefId, LevelArgs, Vec<ArcTerm>),
    ClassCall(ClassCall),
    /// Field access on an instance of a class.
    FieldCall(DefId, ArcTerm),
    Case(CaseTerm),
    Let(Binding, ArcTerm, ArcTerm),
    /// Instances of classes with every field implemented.
    New(ClassCall),
    Array(ArrayTerm),
    PathLam(PathLam),
    /// Path application.
    At(ArcTerm, ArcTerm),
    Lit(Literal),
    TypeCoerce(TypeCoerce),
    /// Terms that could not be elaborated, annotated with their type if it is
    /// known.
    Error(Option<ArcTerm>),
}

impl Term {
    pub fn universe(sort: Sort) -> ArcTerm {
        Arc::new(Term::Universe(sort))
    }

    pub fn error(r#type: Option<ArcTerm>) -> ArcTerm {
        Arc::new(Term::Error(r#type))
    }

    pub fn app(head: ArcTerm, arg: ArcTerm) -> ArcTerm {
        Arc::new(Term::App(head, arg))
    }

    /// A non-dependent function type.
    pub fn arrow(sort: Sort, domain: ArcTerm, codomain: ArcTerm) -> ArcTerm {
        let binding = Binding::new(None, domain);
        Arc::new(Term::Pi(sort, Plicity::Explicit, binding, codomain))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Term::Error(_))
    }
}
