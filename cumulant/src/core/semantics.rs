//! The semantics of the core language: substitution, reduction to weak head
//! normal form, and re-derivation of types.

use fxhash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use crate::core::level::{LevelInferVar, LevelVar};
use crate::core::prim;
use crate::core::{
    ArcTerm, ArrayTerm, Binding, Branch, CaseTerm, ClassCall, ConCall, DefId, Level, LevelArgs,
    Literal, MetaVar, Param, PathLam, Sort, Term, TypeCoerce,
};
use crate::globals::{FunctionKind, Globals};

/// Solutions to inference variables, as consulted during evaluation.
pub trait Solutions {
    fn meta_solution(&self, var: MetaVar) -> Option<&ArcTerm>;

    fn meta_type(&self, var: MetaVar) -> Option<&ArcTerm>;

    fn level_solution(&self, var: LevelInferVar) -> Option<Level>;
}

/// An empty set of solutions.
pub struct NoSolutions;

impl Solutions for NoSolutions {
    fn meta_solution(&self, _: MetaVar) -> Option<&ArcTerm> {
        None
    }

    fn meta_type(&self, _: MetaVar) -> Option<&ArcTerm> {
        None
    }

    fn level_solution(&self, _: LevelInferVar) -> Option<Level> {
        None
    }
}

/// A simultaneous substitution of terms for bindings, of levels for level
/// parameters, and (when zonking) of solutions for inference variables.
///
/// Binders are always renamed to fresh bindings, so substituting never
/// captures a variable.
pub struct Substitution<'a> {
    vars: FxHashMap<Binding, ArcTerm>,
    levels: Option<LevelArgs>,
    solutions: Option<&'a dyn Solutions>,
    /// Implementations to unfold in place of field accesses on an instance
    /// that is being built.
    fields: Option<(Binding, Vec<(DefId, ArcTerm)>)>,
}

impl<'a> Substitution<'a> {
    pub fn new() -> Substitution<'a> {
        Substitution {
            vars: FxHashMap::default(),
            levels: None,
            solutions: None,
            fields: None,
        }
    }

    /// A substitution that replaces level parameters with `levels`.
    pub fn with_levels(levels: LevelArgs) -> Substitution<'a> {
        Substitution {
            levels: Some(levels),
            ..Substitution::new()
        }
    }

    /// A substitution that replaces solved inference variables with their
    /// solutions.
    pub fn zonking(solutions: &'a dyn Solutions) -> Substitution<'a> {
        Substitution {
            solutions: Some(solutions),
            ..Substitution::new()
        }
    }

    /// Unfold accesses of implemented fields on `this`.
    pub fn with_field_impls(mut self, this: &Binding, impls: Vec<(DefId, ArcTerm)>) -> Substitution<'a> {
        self.fields = Some((this.clone(), impls));
        self
    }

    pub fn insert(&mut self, binding: &Binding, term: ArcTerm) {
        self.vars.insert(binding.clone(), term);
    }

    fn is_identity(&self) -> bool {
        self.vars.is_empty()
            && self.levels.is_none()
            && self.solutions.is_none()
            && self.fields.is_none()
    }

    pub fn level(&self, level: &Level) -> Level {
        let level = match &self.levels {
            Some(args) => level.subst(&|var| args.get(var)),
            None => *level,
        };
        match self.solutions {
            Some(solutions) => level.subst(&|var| match var {
                LevelVar::Infer(var) => solutions.level_solution(var),
                LevelVar::Param(..) => None,
            }),
            None => level,
        }
    }

    pub fn sort(&self, sort: &Sort) -> Sort {
        Sort::new(self.level(&sort.p), self.level(&sort.h))
    }

    pub fn level_args(&self, levels: &LevelArgs) -> LevelArgs {
        LevelArgs {
            p: levels.p.iter().map(|level| self.level(level)).collect(),
            h: levels.h.iter().map(|level| self.level(level)).collect(),
        }
    }

    /// Rename a binder, substituting into its type. Later occurrences of the
    /// old binding refer to the new one.
    pub fn binding(&mut self, binding: &Binding) -> Binding {
        let r#type = self.apply(binding.r#type());
        let renamed = binding.with_type(r#type);
        self.insert(binding, renamed.to_term());
        renamed
    }

    fn terms(&mut self, terms: &[ArcTerm]) -> Vec<ArcTerm> {
        terms.iter().map(|term| self.apply(term)).collect()
    }

    pub fn class_call(&mut self, class_call: &ClassCall) -> ClassCall {
        let this = self.binding(&class_call.this);
        ClassCall {
            class: class_call.class,
            levels: self.level_args(&class_call.levels),
            this,
            impls: (class_call.impls.iter())
                .map(|(field, term)| (*field, self.apply(term)))
                .collect(),
            sort: self.sort(&class_call.sort),
        }
    }

    pub fn apply(&mut self, term: &ArcTerm) -> ArcTerm {
        if self.is_identity() {
            return term.clone();
        }

        match term.as_ref() {
            Term::Var(binding) => self.vars.get(binding).unwrap_or(term).clone(),
            Term::Meta(var) => match self.solutions.and_then(|s| s.meta_solution(*var)) {
                Some(solution) => {
                    let solution = solution.clone();
                    self.apply(&solution)
                }
                None => term.clone(),
            },
            Term::App(head, arg) => Arc::new(Term::App(self.apply(head), self.apply(arg))),
            Term::Lam(plicity, binding, body) => {
                let binding = self.binding(binding);
                Arc::new(Term::Lam(*plicity, binding, self.apply(body)))
            }
            Term::Pi(sort, plicity, binding, body) => {
                let sort = self.sort(sort);
                let binding = self.binding(binding);
                Arc::new(Term::Pi(sort, *plicity, binding, self.apply(body)))
            }
            Term::Sigma(sort, bindings) => {
                let sort = self.sort(sort);
                let bindings = bindings.iter().map(|b| self.binding(b)).collect();
                Arc::new(Term::Sigma(sort, bindings))
            }
            Term::Tuple(fields, r#type) => {
                Arc::new(Term::Tuple(self.terms(fields), self.apply(r#type)))
            }
            Term::Proj(tuple, index) => Arc::new(Term::Proj(self.apply(tuple), *index)),
            Term::Universe(sort) => Arc::new(Term::Universe(self.sort(sort))),
            Term::DataCall(data, levels, args) => Arc::new(Term::DataCall(
                *data,
                self.level_args(levels),
                self.terms(args),
            )),
            Term::ConCall(con_call) => Arc::new(Term::ConCall(ConCall {
                con: con_call.con,
                levels: self.level_args(&con_call.levels),
                data_args: self.terms(&con_call.data_args),
                args: self.terms(&con_call.args),
            })),
            Term::FunCall(def, levels, args) => Arc::new(Term::FunCall(
                *def,
                self.level_args(levels),
                self.terms(args),
            )),
            Term::ClassCall(class_call) => Arc::new(Term::ClassCall(self.class_call(class_call))),
            Term::FieldCall(field, arg) => {
                let arg = self.apply(arg);
                match self.field_impl(*field, &arg) {
                    Some(value) => self.apply(&value),
                    None => Arc::new(Term::FieldCall(*field, arg)),
                }
            }
            Term::Case(case) => {
                let scrutinee = self.apply(&case.scrutinee);
                let result_type = self.apply(&case.result_type);
                let branches = (case.branches.iter())
                    .map(|branch| {
                        let params = branch.params.iter().map(|b| self.binding(b)).collect();
                        Branch {
                            con: branch.con,
                            params,
                            body: self.apply(&branch.body),
                        }
                    })
                    .collect();
                Arc::new(Term::Case(CaseTerm {
                    scrutinee,
                    result_type,
                    branches,
                }))
            }
            Term::Let(binding, def, body) => {
                let def = self.apply(def);
                let binding = self.binding(binding);
                Arc::new(Term::Let(binding, def, self.apply(body)))
            }
            Term::New(class_call) => Arc::new(Term::New(self.class_call(class_call))),
            Term::Array(array) => Arc::new(Term::Array(ArrayTerm {
                levels: self.level_args(&array.levels),
                elem_line: self.apply(&array.elem_line),
                elems: self.terms(&array.elems),
            })),
            Term::PathLam(path_lam) => {
                let levels = self.level_args(&path_lam.levels);
                let line = self.apply(&path_lam.line);
                let binding = self.binding(&path_lam.binding);
                Arc::new(Term::PathLam(PathLam {
                    levels,
                    line,
                    binding,
                    body: self.apply(&path_lam.body),
                }))
            }
            Term::At(path, interval) => Arc::new(Term::At(self.apply(path), self.apply(interval))),
            Term::Lit(_) => term.clone(),
            Term::TypeCoerce(coerce) => Arc::new(Term::TypeCoerce(TypeCoerce {
                wrapper: coerce.wrapper,
                levels: self.level_args(&coerce.levels),
                args: self.terms(&coerce.args),
                arg: self.apply(&coerce.arg),
                unwrap: coerce.unwrap,
            })),
            Term::Error(r#type) => Arc::new(Term::Error(r#type.as_ref().map(|t| self.apply(t)))),
        }
    }
}

impl<'a> Substitution<'a> {
    fn field_impl(&self, field: DefId, instance: &ArcTerm) -> Option<ArcTerm> {
        let (this, impls) = self.fields.as_ref()?;
        match instance.as_ref() {
            Term::Var(binding) if binding == this => {
                impls.iter().find_map(|(f, value)| (*f == field).then(|| value.clone()))
            }
            _ => None,
        }
    }
}

impl<'a> Default for Substitution<'a> {
    fn default() -> Self {
        Substitution::new()
    }
}

/// Substitute a single term for a binding.
pub fn subst1(term: &ArcTerm, binding: &Binding, arg: ArcTerm) -> ArcTerm {
    let mut subst = Substitution::new();
    subst.insert(binding, arg);
    subst.apply(term)
}

/// Instantiate a term that mentions a telescope of parameters and level
/// parameters with arguments.
pub fn instantiate(params: &[Param], levels: &LevelArgs, args: &[ArcTerm], term: &ArcTerm) -> ArcTerm {
    let mut subst = Substitution::with_levels(levels.clone());
    for (param, arg) in Iterator::zip(params.iter(), args.iter()) {
        subst.insert(&param.binding, arg.clone());
    }
    subst.apply(term)
}

/// Evaluation context.
pub struct EvalContext<'env> {
    globals: &'env Globals,
    solutions: &'env dyn Solutions,
}

impl<'env> EvalContext<'env> {
    pub fn new(globals: &'env Globals, solutions: &'env dyn Solutions) -> EvalContext<'env> {
        EvalContext { globals, solutions }
    }

    /// Replace every solved inference variable in a term with its solution.
    pub fn zonk(&self, term: &ArcTerm) -> ArcTerm {
        Substitution::zonking(self.solutions).apply(term)
    }

    /// Reduce a term to weak head normal form.
    pub fn whnf(&self, term: &ArcTerm) -> ArcTerm {
        match term.as_ref() {
            Term::Meta(var) => match self.solutions.meta_solution(*var) {
                Some(solution) => self.whnf(solution),
                None => term.clone(),
            },
            Term::App(head, arg) => {
                let head_whnf = self.whnf(head);
                match head_whnf.as_ref() {
                    Term::Lam(_, binding, body) => self.whnf(&subst1(body, binding, arg.clone())),
                    Term::FieldCall(field, instance)
                        if *field == self.globals.prelude().darray_at =>
                    {
                        match (instance.as_ref(), self.whnf(arg).as_ref()) {
                            (
                                Term::Array(array),
                                Term::Lit(Literal::Nat(index) | Literal::Fin(index, _)),
                            ) => match array.elems.get(*index as usize) {
                                Some(elem) => self.whnf(elem),
                                None => Arc::new(Term::App(head_whnf.clone(), arg.clone())),
                            },
                            _ => Arc::new(Term::App(head_whnf.clone(), arg.clone())),
                        }
                    }
                    _ if Arc::ptr_eq(&head_whnf, head) => term.clone(),
                    _ => Arc::new(Term::App(head_whnf, arg.clone())),
                }
            }
            Term::Proj(tuple, index) => {
                let tuple_whnf = self.whnf(tuple);
                match tuple_whnf.as_ref() {
                    Term::Tuple(fields, _) if *index < fields.len() => self.whnf(&fields[*index]),
                    _ => Arc::new(Term::Proj(tuple_whnf, *index)),
                }
            }
            Term::Let(binding, def, body) => self.whnf(&subst1(body, binding, def.clone())),
            Term::FunCall(def, levels, args) => match self.globals.function(*def) {
                Some(function)
                    if function.kind != FunctionKind::TypeWrapper
                        && function.params.len() == args.len() =>
                {
                    match &function.body {
                        Some(body) => self.whnf(&instantiate(&function.params, levels, args, body)),
                        None => term.clone(),
                    }
                }
                _ => term.clone(),
            },
            Term::FieldCall(field, instance) => {
                let instance = self.whnf(instance);
                match self.field_value(*field, &instance) {
                    Some(value) => self.whnf(&value),
                    None => Arc::new(Term::FieldCall(*field, instance)),
                }
            }
            Term::Case(case) => {
                let scrutinee = self.whnf(&case.scrutinee);
                match self.select_branch(&case.branches, &scrutinee) {
                    Some(body) => self.whnf(&body),
                    None => Arc::new(Term::Case(CaseTerm {
                        scrutinee,
                        result_type: case.result_type.clone(),
                        branches: case.branches.clone(),
                    })),
                }
            }
            Term::At(path, interval) => {
                let path = self.whnf(path);
                if let Term::PathLam(path_lam) = path.as_ref() {
                    return self.whnf(&subst1(&path_lam.body, &path_lam.binding, interval.clone()));
                }

                let interval = self.whnf(interval);
                let prelude = self.globals.prelude();
                let endpoint = match interval.as_ref() {
                    Term::ConCall(con_call) if con_call.con == prelude.left => Some(1),
                    Term::ConCall(con_call) if con_call.con == prelude.right => Some(2),
                    _ => None,
                };
                if let Some(index) = endpoint {
                    let path_type = self.whnf(&self.type_of(&path));
                    if let Term::DataCall(data, _, args) = path_type.as_ref() {
                        if *data == prelude.path && args.len() == 3 {
                            return self.whnf(&args[index]);
                        }
                    }
                }
                Arc::new(Term::At(path, interval))
            }
            Term::TypeCoerce(coerce) => {
                let arg = self.whnf(&coerce.arg);
                match arg.as_ref() {
                    Term::TypeCoerce(inner)
                        if inner.wrapper == coerce.wrapper && inner.unwrap != coerce.unwrap =>
                    {
                        self.whnf(&inner.arg)
                    }
                    _ => Arc::new(Term::TypeCoerce(TypeCoerce {
                        arg,
                        ..coerce.clone()
                    })),
                }
            }
            Term::Var(_)
            | Term::Lam(..)
            | Term::Pi(..)
            | Term::Sigma(..)
            | Term::Tuple(..)
            | Term::Universe(_)
            | Term::DataCall(..)
            | Term::ConCall(_)
            | Term::ClassCall(_)
            | Term::New(_)
            | Term::Array(_)
            | Term::PathLam(_)
            | Term::Lit(_)
            | Term::Error(_) => term.clone(),
        }
    }

    /// The implementation of a field in an instance, if it is known.
    fn field_value(&self, field: DefId, instance: &ArcTerm) -> Option<ArcTerm> {
        let prelude = self.globals.prelude();
        match instance.as_ref() {
            Term::New(class_call) => {
                let value = class_call.implementation(field)?;
                return Some(subst1(value, &class_call.this, instance.clone()));
            }
            Term::Array(array) if field == prelude.darray_len => {
                return Some(Arc::new(Term::Lit(Literal::Nat(array.elems.len() as u64))));
            }
            Term::Array(array) if field == prelude.darray_elem => {
                return Some(array.elem_line.clone());
            }
            Term::Error(_) => return None,
            _ => {}
        }

        match self.whnf(&self.type_of(instance)).as_ref() {
            Term::ClassCall(class_call) => {
                let value = class_call.implementation(field)?;
                Some(subst1(value, &class_call.this, instance.clone()))
            }
            _ => None,
        }
    }

    fn select_branch(&self, branches: &[Branch], scrutinee: &ArcTerm) -> Option<ArcTerm> {
        let prelude = self.globals.prelude();
        let nat = |n: u64| Arc::new(Term::Lit(Literal::Nat(n)));
        let (con, args) = match scrutinee.as_ref() {
            Term::ConCall(con_call) => (con_call.con, con_call.args.clone()),
            Term::Lit(Literal::Nat(0)) => (prelude.zero, Vec::new()),
            Term::Lit(Literal::Nat(n)) => (prelude.suc, vec![nat(n - 1)]),
            Term::Lit(Literal::Int(n)) if *n >= 0 => (prelude.pos, vec![nat(*n as u64)]),
            Term::Lit(Literal::Int(n)) => (prelude.neg, vec![nat(n.unsigned_abs())]),
            _ => return None,
        };

        let branch = branches.iter().find(|branch| branch.con == con)?;
        let mut subst = Substitution::new();
        for (binding, arg) in Iterator::zip(branch.params.iter(), args.into_iter()) {
            subst.insert(binding, arg);
        }
        Some(subst.apply(&branch.body))
    }

    /// The sort of a type, if its type reduces to a universe.
    pub fn sort_of(&self, r#type: &ArcTerm) -> Option<Sort> {
        match self.whnf(&self.type_of(r#type)).as_ref() {
            Term::Universe(sort) => Some(*sort),
            _ => None,
        }
    }

    /// Re-derive the type of a well-typed term.
    pub fn type_of(&self, term: &ArcTerm) -> ArcTerm {
        let prelude = self.globals.prelude();
        match term.as_ref() {
            Term::Var(binding) => binding.r#type().clone(),
            Term::Meta(var) => match self.solutions.meta_solution(*var) {
                Some(solution) => self.type_of(solution),
                None => match self.solutions.meta_type(*var) {
                    Some(r#type) => r#type.clone(),
                    None => Term::error(None),
                },
            },
            Term::App(head, arg) => match self.whnf(&self.type_of(head)).as_ref() {
                Term::Pi(_, _, binding, body) => subst1(body, binding, arg.clone()),
                _ => Term::error(None),
            },
            Term::Lam(plicity, binding, body) => {
                let body_type = self.type_of(body);
                let sort = match (self.sort_of(binding.r#type()), self.sort_of(&body_type)) {
                    (Some(domain), Some(codomain)) => {
                        let p = domain.p.max(&codomain.p, &|v0, v1| v0 == v1);
                        Sort::new(p.unwrap_or(Level::Infinity), codomain.h)
                    }
                    _ => Sort::OMEGA,
                };
                Arc::new(Term::Pi(sort, *plicity, binding.clone(), body_type))
            }
            Term::Pi(sort, ..) | Term::Sigma(sort, _) => Term::universe(*sort),
            Term::Tuple(_, r#type) => r#type.clone(),
            Term::Proj(tuple, index) => match self.whnf(&self.type_of(tuple)).as_ref() {
                Term::Sigma(_, bindings) if *index < bindings.len() => {
                    let mut subst = Substitution::new();
                    for (i, binding) in bindings[..*index].iter().enumerate() {
                        subst.insert(binding, Arc::new(Term::Proj(tuple.clone(), i)));
                    }
                    subst.apply(bindings[*index].r#type())
                }
                _ => Term::error(None),
            },
            Term::Universe(sort) => Term::universe(sort.succ()),
            Term::DataCall(data, levels, _) => match self.globals.data(*data) {
                Some(data) => Term::universe(data.sort.subst(&|var| levels.get(var))),
                None => Term::error(None),
            },
            Term::ConCall(con_call) => match self.globals.constructor(con_call.con) {
                Some(con) => Arc::new(Term::DataCall(
                    con.data,
                    con_call.levels.clone(),
                    con_call.data_args.clone(),
                )),
                None => Term::error(None),
            },
            Term::FunCall(def, levels, args) => match self.globals.function(*def) {
                Some(function) => instantiate(&function.params, levels, args, &function.result_type),
                None => Term::error(None),
            },
            Term::ClassCall(class_call) => Term::universe(class_call.sort),
            Term::FieldCall(field, instance) => match self.globals.field(*field) {
                Some(field) => {
                    let levels = match self.whnf(&self.type_of(instance)).as_ref() {
                        Term::ClassCall(class_call) => class_call.levels.clone(),
                        _ => LevelArgs::empty(),
                    };
                    let mut subst = Substitution::with_levels(levels);
                    subst.insert(&field.this, instance.clone());
                    subst.apply(&field.r#type)
                }
                None => Term::error(None),
            },
            Term::Case(case) => case.result_type.clone(),
            Term::Let(binding, def, body) => subst1(&self.type_of(body), binding, def.clone()),
            Term::New(class_call) => Arc::new(Term::ClassCall(class_call.clone())),
            Term::Array(array) => Arc::new(Term::ClassCall(prim::array_type(self.globals, array))),
            Term::PathLam(path_lam) => {
                let left = prim::interval_endpoint(prelude.left);
                let right = prim::interval_endpoint(prelude.right);
                Arc::new(Term::DataCall(
                    prelude.path,
                    path_lam.levels.clone(),
                    vec![
                        path_lam.line.clone(),
                        subst1(&path_lam.body, &path_lam.binding, left),
                        subst1(&path_lam.body, &path_lam.binding, right),
                    ],
                ))
            }
            Term::At(path, interval) => match self.whnf(&self.type_of(path)).as_ref() {
                Term::DataCall(data, _, args) if *data == prelude.path && args.len() == 3 => {
                    self.whnf(&Term::app(args[0].clone(), interval.clone()))
                }
                _ => Term::error(None),
            },
            Term::Lit(literal) => prim::literal_type(prelude, literal),
            Term::TypeCoerce(coerce) => match self.globals.function(coerce.wrapper) {
                Some(function) if coerce.unwrap => match &function.body {
                    Some(body) => instantiate(&function.params, &coerce.levels, &coerce.args, body),
                    None => Term::error(None),
                },
                Some(_) => Arc::new(Term::FunCall(
                    coerce.wrapper,
                    coerce.levels.clone(),
                    coerce.args.clone(),
                )),
                None => Term::error(None),
            },
            Term::Error(Some(r#type)) => r#type.clone(),
            Term::Error(None) => Term::error(None),
        }
    }
}

/// Traversal over the subterms of a term. Inference variables are not
/// followed into their solutions.
pub trait Visitor {
    fn visit_term(&mut self, term: &Term);

    fn visit_binder(&mut self, _binding: &Binding) {}
}

pub fn walk(term: &Term, visitor: &mut impl Visitor) {
    visitor.visit_term(term);

    fn binder(binding: &Binding, visitor: &mut impl Visitor) {
        walk(binding.r#type(), visitor);
        visitor.visit_binder(binding);
    }
    fn terms(terms: &[ArcTerm], visitor: &mut impl Visitor) {
        terms.iter().for_each(|term| walk(term, visitor));
    }
    fn class_call(class_call: &ClassCall, visitor: &mut impl Visitor) {
        visitor.visit_binder(&class_call.this);
        (class_call.impls.iter()).for_each(|(_, term)| walk(term, visitor));
    }

    match term {
        Term::Var(_) | Term::Meta(_) | Term::Universe(_) | Term::Lit(_) => {}
        Term::App(head, arg) | Term::At(head, arg) => {
            walk(head, visitor);
            walk(arg, visitor);
        }
        Term::Lam(_, binding, body) | Term::Pi(_, _, binding, body) => {
            binder(binding, visitor);
            walk(body, visitor);
        }
        Term::Sigma(_, bindings) => bindings.iter().for_each(|b| binder(b, visitor)),
        Term::Tuple(fields, r#type) => {
            terms(fields, visitor);
            walk(r#type, visitor);
        }
        Term::Proj(term, _) | Term::FieldCall(_, term) => walk(term, visitor),
        Term::DataCall(_, _, args) | Term::FunCall(_, _, args) => terms(args, visitor),
        Term::ConCall(con_call) => {
            terms(&con_call.data_args, visitor);
            terms(&con_call.args, visitor);
        }
        Term::ClassCall(call) | Term::New(call) => class_call(call, visitor),
        Term::Case(case) => {
            walk(&case.scrutinee, visitor);
            walk(&case.result_type, visitor);
            for branch in &case.branches {
                branch.params.iter().for_each(|b| binder(b, visitor));
                walk(&branch.body, visitor);
            }
        }
        Term::Let(binding, def, body) => {
            walk(def, visitor);
            binder(binding, visitor);
            walk(body, visitor);
        }
        Term::Array(array) => {
            walk(&array.elem_line, visitor);
            terms(&array.elems, visitor);
        }
        Term::PathLam(path_lam) => {
            walk(&path_lam.line, visitor);
            binder(&path_lam.binding, visitor);
            walk(&path_lam.body, visitor);
        }
        Term::TypeCoerce(coerce) => {
            terms(&coerce.args, visitor);
            walk(&coerce.arg, visitor);
        }
        Term::Error(r#type) => {
            if let Some(r#type) = r#type {
                walk(r#type, visitor);
            }
        }
    }
}

/// The fields of `this` that a term reads.
pub fn field_dependencies(term: &Term, this: &Binding) -> Vec<DefId> {
    struct FieldDependencies<'a> {
        this: &'a Binding,
        fields: Vec<DefId>,
    }

    impl<'a> Visitor for FieldDependencies<'a> {
        fn visit_term(&mut self, term: &Term) {
            if let Term::FieldCall(field, instance) = term {
                if matches!(instance.as_ref(), Term::Var(b) if b == self.this)
                    && !self.fields.contains(field)
                {
                    self.fields.push(*field);
                }
            }
        }
    }

    let mut visitor = FieldDependencies {
        this,
        fields: Vec::new(),
    };
    walk(term, &mut visitor);
    visitor.fields
}

/// The inference variables that occur in a term.
pub fn metas(term: &Term) -> Vec<MetaVar> {
    struct Metas(Vec<MetaVar>);

    impl Visitor for Metas {
        fn visit_term(&mut self, term: &Term) {
            if let Term::Meta(var) = term {
                if !self.0.contains(var) {
                    self.0.push(*var);
                }
            }
        }
    }

    let mut visitor = Metas(Vec::new());
    walk(term, &mut visitor);
    visitor.0
}

/// The bindings that occur free in a term.
pub fn free_bindings(term: &Term) -> Vec<Binding> {
    #[derive(Default)]
    struct FreeBindings {
        bound: FxHashSet<Binding>,
        used: Vec<Binding>,
    }

    impl Visitor for FreeBindings {
        fn visit_term(&mut self, term: &Term) {
            if let Term::Var(binding) = term {
                if !self.used.contains(binding) {
                    self.used.push(binding.clone());
                }
            }
        }

        fn visit_binder(&mut self, binding: &Binding) {
            self.bound.insert(binding.clone());
        }
    }

    let mut visitor = FreeBindings::default();
    walk(term, &mut visitor);
    let FreeBindings { bound, used } = visitor;
    used.into_iter().filter(|b| !bound.contains(b)).collect()
}

/// Returns `true` if any level mentioned by the term satisfies `predicate`.
fn any_level(term: &Term, predicate: &dyn Fn(&Level) -> bool) -> bool {
    struct AnyLevel<'a> {
        predicate: &'a dyn Fn(&Level) -> bool,
        found: bool,
    }

    impl<'a> AnyLevel<'a> {
        fn levels(&mut self, levels: &LevelArgs) {
            self.found |= levels.iter().any(|level| (self.predicate)(level));
        }

        fn sort(&mut self, sort: &Sort) {
            self.found |= (self.predicate)(&sort.p) || (self.predicate)(&sort.h);
        }
    }

    impl<'a> Visitor for AnyLevel<'a> {
        fn visit_term(&mut self, term: &Term) {
            match term {
                Term::Universe(sort) | Term::Pi(sort, ..) | Term::Sigma(sort, _) => self.sort(sort),
                Term::DataCall(_, levels, _) | Term::FunCall(_, levels, _) => self.levels(levels),
                Term::ConCall(con_call) => self.levels(&con_call.levels),
                Term::ClassCall(class_call) | Term::New(class_call) => {
                    self.levels(&class_call.levels);
                    self.sort(&class_call.sort);
                }
                Term::Array(array) => self.levels(&array.levels),
                Term::PathLam(path_lam) => self.levels(&path_lam.levels),
                Term::TypeCoerce(coerce) => self.levels(&coerce.levels),
                _ => {}
            }
        }
    }

    let mut visitor = AnyLevel {
        predicate,
        found: false,
    };
    walk(term, &mut visitor);
    visitor.found
}

/// Returns `true` if the term mentions an inference variable or a level
/// inference variable.
pub fn has_infer_vars(term: &Term) -> bool {
    !metas(term).is_empty() || any_level(term, &Level::has_infer_var)
}

/// Returns `true` if the term mentions a level parameter.
pub fn has_level_params(term: &Term) -> bool {
    any_level(term, &|level| matches!(level.level_var(), Some(LevelVar::Param(..))))
}

/// Syntactic equality of terms up to the renaming of bound variables.
pub fn alpha_eq(lhs: &ArcTerm, rhs: &ArcTerm) -> bool {
    AlphaEq { renaming: Vec::new() }.terms(lhs, rhs)
}

struct AlphaEq {
    renaming: Vec<(Binding, Binding)>,
}

impl AlphaEq {
    fn vars(&self, lhs: &Binding, rhs: &Binding) -> bool {
        match self.renaming.iter().rev().find(|(l, r)| l == lhs || r == rhs) {
            Some((l, r)) => l == lhs && r == rhs,
            None => lhs == rhs,
        }
    }

    fn binders(&mut self, lhs: &Binding, rhs: &Binding) -> bool {
        let result = self.terms(lhs.r#type(), rhs.r#type());
        self.renaming.push((lhs.clone(), rhs.clone()));
        result
    }

    fn all(&mut self, lhs: &[ArcTerm], rhs: &[ArcTerm]) -> bool {
        lhs.len() == rhs.len() && Iterator::zip(lhs.iter(), rhs.iter()).all(|(l, r)| self.terms(l, r))
    }

    fn class_calls(&mut self, lhs: &ClassCall, rhs: &ClassCall) -> bool {
        lhs.class == rhs.class
            && lhs.levels == rhs.levels
            && lhs.impls.len() == rhs.impls.len()
            && {
                self.renaming.push((lhs.this.clone(), rhs.this.clone()));
                (lhs.impls.iter()).all(|(field, l)| match rhs.implementation(*field) {
                    Some(r) => self.terms(l, r),
                    None => false,
                })
            }
    }

    fn terms(&mut self, lhs: &ArcTerm, rhs: &ArcTerm) -> bool {
        if Arc::ptr_eq(lhs, rhs) && self.renaming.is_empty() {
            return true;
        }

        let len = self.renaming.len();
        let result = match (lhs.as_ref(), rhs.as_ref()) {
            (Term::Var(l), Term::Var(r)) => self.vars(l, r),
            (Term::Meta(l), Term::Meta(r)) => l == r,
            (Term::App(f0, a0), Term::App(f1, a1)) | (Term::At(f0, a0), Term::At(f1, a1)) => {
                self.terms(f0, f1) && self.terms(a0, a1)
            }
            (Term::Lam(p0, b0, e0), Term::Lam(p1, b1, e1))
            | (Term::Pi(_, p0, b0, e0), Term::Pi(_, p1, b1, e1)) => {
                p0 == p1 && self.binders(b0, b1) && self.terms(e0, e1)
            }
            (Term::Sigma(_, bs0), Term::Sigma(_, bs1)) => {
                bs0.len() == bs1.len()
                    && Iterator::zip(bs0.iter(), bs1.iter()).all(|(b0, b1)| self.binders(b0, b1))
            }
            (Term::Tuple(fs0, _), Term::Tuple(fs1, _)) => self.all(fs0, fs1),
            (Term::Proj(t0, i0), Term::Proj(t1, i1)) => i0 == i1 && self.terms(t0, t1),
            (Term::Universe(s0), Term::Universe(s1)) => s0 == s1,
            (Term::DataCall(d0, l0, a0), Term::DataCall(d1, l1, a1))
            | (Term::FunCall(d0, l0, a0), Term::FunCall(d1, l1, a1)) => {
                d0 == d1 && l0 == l1 && self.all(a0, a1)
            }
            (Term::ConCall(c0), Term::ConCall(c1)) => {
                c0.con == c1.con
                    && c0.levels == c1.levels
                    && self.all(&c0.data_args, &c1.data_args)
                    && self.all(&c0.args, &c1.args)
            }
            (Term::ClassCall(c0), Term::ClassCall(c1)) | (Term::New(c0), Term::New(c1)) => {
                self.class_calls(c0, c1)
            }
            (Term::FieldCall(f0, t0), Term::FieldCall(f1, t1)) => f0 == f1 && self.terms(t0, t1),
            (Term::Case(c0), Term::Case(c1)) => {
                self.terms(&c0.scrutinee, &c1.scrutinee)
                    && self.terms(&c0.result_type, &c1.result_type)
                    && c0.branches.len() == c1.branches.len()
                    && Iterator::zip(c0.branches.iter(), c1.branches.iter()).all(|(b0, b1)| {
                        b0.con == b1.con
                            && b0.params.len() == b1.params.len()
                            && Iterator::zip(b0.params.iter(), b1.params.iter())
                                .all(|(p0, p1)| self.binders(p0, p1))
                            && self.terms(&b0.body, &b1.body)
                    })
            }
            (Term::Let(b0, d0, e0), Term::Let(b1, d1, e1)) => {
                self.terms(d0, d1) && self.binders(b0, b1) && self.terms(e0, e1)
            }
            (Term::Array(a0), Term::Array(a1)) => {
                a0.levels == a1.levels
                    && self.terms(&a0.elem_line, &a1.elem_line)
                    && self.all(&a0.elems, &a1.elems)
            }
            (Term::PathLam(p0), Term::PathLam(p1)) => {
                self.terms(&p0.line, &p1.line)
                    && self.binders(&p0.binding, &p1.binding)
                    && self.terms(&p0.body, &p1.body)
            }
            (Term::Lit(l0), Term::Lit(l1)) => l0 == l1,
            (Term::TypeCoerce(c0), Term::TypeCoerce(c1)) => {
                c0.wrapper == c1.wrapper
                    && c0.unwrap == c1.unwrap
                    && self.all(&c0.args, &c1.args)
                    && self.terms(&c0.arg, &c1.arg)
            }
            (Term::Error(_), Term::Error(_)) => true,
            (_, _) => false,
        };
        self.renaming.truncate(len);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::core::{Plicity, Term};
    use crate::globals::GlobalsBuilder;
    use crate::source::StringInterner;

    fn nat(globals: &Globals) -> ArcTerm {
        Arc::new(Term::DataCall(globals.prelude().nat, LevelArgs::empty(), Vec::new()))
    }

    #[test]
    fn beta_reduces_applications() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let x = Binding::new(None, nat(&globals));
        let id = Arc::new(Term::Lam(Plicity::Explicit, x.clone(), x.to_term()));
        let three = Arc::new(Term::Lit(Literal::Nat(3)));

        let context = EvalContext::new(&globals, &NoSolutions);
        let result = context.whnf(&Term::app(id, three.clone()));
        assert!(alpha_eq(&result, &three));
    }

    #[test]
    fn case_on_nat_literal_selects_successor() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let prelude = globals.prelude();
        let n = Binding::new(None, nat(&globals));
        let case = Arc::new(Term::Case(CaseTerm {
            scrutinee: Arc::new(Term::Lit(Literal::Nat(5))),
            result_type: nat(&globals),
            branches: vec![
                Branch {
                    con: prelude.zero,
                    params: Vec::new(),
                    body: Arc::new(Term::Lit(Literal::Nat(0))),
                },
                Branch {
                    con: prelude.suc,
                    params: vec![n.clone()],
                    body: n.to_term(),
                },
            ],
        }));

        let context = EvalContext::new(&globals, &NoSolutions);
        let result = context.whnf(&case);
        assert!(matches!(result.as_ref(), Term::Lit(Literal::Nat(4))));
    }

    #[test]
    fn substitution_renames_binders() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let x = Binding::new(None, nat(&globals));
        let y = Binding::new(None, nat(&globals));
        let lam = Arc::new(Term::Lam(Plicity::Explicit, y.clone(), x.to_term()));

        let result = subst1(&lam, &x, y.to_term());
        match result.as_ref() {
            Term::Lam(_, binding, body) => {
                assert_ne!(binding, &y);
                assert!(matches!(body.as_ref(), Term::Var(b) if b == &y));
            }
            _ => panic!("expected a lambda"),
        }
    }

    #[test]
    fn alpha_eq_ignores_binder_identity() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let x = Binding::new(None, nat(&globals));
        let y = Binding::new(None, nat(&globals));
        let lhs = Arc::new(Term::Lam(Plicity::Explicit, x.clone(), x.to_term()));
        let rhs = Arc::new(Term::Lam(Plicity::Explicit, y.clone(), y.to_term()));
        let other = Arc::new(Term::Lam(Plicity::Explicit, y, x.to_term()));

        assert!(alpha_eq(&lhs, &rhs));
        assert!(!alpha_eq(&lhs, &other));
    }

    #[test]
    fn free_bindings_excludes_bound() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let x = Binding::new(None, nat(&globals));
        let y = Binding::new(None, nat(&globals));
        let term = Arc::new(Term::Lam(
            Plicity::Explicit,
            y.clone(),
            Term::app(x.to_term(), y.to_term()),
        ));

        assert_eq!(free_bindings(&term), vec![x]);
    }

    #[test]
    fn field_impls_unfold_only_on_this() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let prelude = globals.prelude();
        let this = Binding::new(None, nat(&globals));
        let other = Binding::new(None, nat(&globals));
        let three = Arc::new(Term::Lit(Literal::Nat(3)));
        let mut subst = Substitution::new().with_field_impls(&this, vec![(prelude.darray_len, three)]);

        let on_this = Arc::new(Term::FieldCall(prelude.darray_len, this.to_term()));
        let result = subst.apply(&on_this);
        assert!(matches!(result.as_ref(), Term::Lit(Literal::Nat(3))));

        let on_other = Arc::new(Term::FieldCall(prelude.darray_len, other.to_term()));
        let result = subst.apply(&on_other);
        assert!(alpha_eq(&result, &on_other));
    }
}
