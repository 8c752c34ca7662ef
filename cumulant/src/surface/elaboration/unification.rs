//! Comparison of core terms up to definitional equality and cumulativity.
//!
//! Terms are compared after being reduced to weak head normal form. When one
//! side is an unsolved inference variable we attempt to solve it with the
//! other side, checking that the solution is in scope, does not refer to the
//! variable being solved, and has a type compatible with the variable.
//! Comparisons that are stuck on an inference variable in some other position
//! are deferred to the [equation store][Equations].
//!
//! Universes are compared cumulatively: `\Type p h ≤ \Type p' h'` when both
//! `p ≤ p'` and `h ≤ h'`. Level comparisons that mention level inference
//! variables become level equations, solved once the definition is
//! finalized.

use std::sync::Arc;

use crate::core::semantics::{self, EvalContext, Substitution};
use crate::core::{
    ArcTerm, Binding, ClassCall, ConCall, Level, LevelArgs, Literal, MetaVar, Sort, Term,
};
use crate::globals::Globals;
use crate::source::FileRange;
use crate::surface::elaboration::equations::{Cmp, Equation, Equations};
use crate::surface::elaboration::Inference;

/// Errors encountered during unification.
#[derive(Debug, Clone)]
pub enum Error {
    /// A known part of one term failed to match with a known part of the
    /// other term that we are comparing against.
    Mismatch(ArcTerm, ArcTerm),
    /// Two levels without inference variables were not ordered as required.
    LevelMismatch(Level, Level),
    /// The solution of an inference variable refers to a binding that is not
    /// in the scope of the variable.
    EscapingBinding(MetaVar, Binding),
    /// The solution of an inference variable refers to the variable itself.
    InfiniteSolution(MetaVar),
}

/// The inference variable that prevents a term from reducing further, if
/// any.
pub fn blocking_meta(term: &Term) -> Option<MetaVar> {
    match term {
        Term::Meta(var) => Some(*var),
        Term::App(head, _) | Term::At(head, _) => blocking_meta(head),
        Term::Proj(term, _) | Term::FieldCall(_, term) => blocking_meta(term),
        Term::Case(case) => blocking_meta(&case.scrutinee),
        Term::TypeCoerce(coerce) => blocking_meta(&coerce.arg),
        _ => None,
    }
}

/// Unification context.
pub struct Context<'a> {
    globals: &'a Globals,
    inference: &'a mut Inference,
    equations: &'a mut Equations,
    /// The source of the comparison, recorded with deferred equations.
    range: FileRange,
}

impl<'a> Context<'a> {
    pub fn new(
        globals: &'a Globals,
        inference: &'a mut Inference,
        equations: &'a mut Equations,
        range: FileRange,
    ) -> Context<'a> {
        Context {
            globals,
            inference,
            equations,
            range,
        }
    }

    fn eval(&self) -> EvalContext<'_> {
        EvalContext::new(self.globals, &*self.inference)
    }

    /// Compare two terms, solving inference variables where possible.
    pub fn compare(&mut self, lhs: &ArcTerm, rhs: &ArcTerm, cmp: Cmp) -> Result<(), Error> {
        if Arc::ptr_eq(lhs, rhs) {
            return Ok(());
        }

        let lhs = self.eval().whnf(lhs);
        let rhs = self.eval().whnf(rhs);
        let mismatch = || Error::Mismatch(lhs.clone(), rhs.clone());
        let globals = self.globals;
        let prelude = globals.prelude();

        match (lhs.as_ref(), rhs.as_ref()) {
            // Errors have already been reported, so we don't want to produce
            // unhelpful cascading errors.
            (Term::Error(_), _) | (_, Term::Error(_)) => Ok(()),

            (Term::Meta(var0), Term::Meta(var1)) if var0 == var1 => Ok(()),
            (Term::Meta(var), _) => self.solve(*var, &rhs),
            (_, Term::Meta(var)) => self.solve(*var, &lhs),
            _ if blocking_meta(&lhs).is_some() || blocking_meta(&rhs).is_some() => {
                self.defer(lhs.clone(), rhs.clone(), cmp);
                Ok(())
            }

            (Term::Var(binding0), Term::Var(binding1)) if binding0 == binding1 => Ok(()),
            (Term::Universe(sort0), Term::Universe(sort1)) => self.compare_sorts(sort0, sort1, cmp),

            (Term::Pi(_, plicity0, binding0, body0), Term::Pi(_, plicity1, binding1, body1))
                if plicity0 == plicity1 =>
            {
                self.compare(binding0.r#type(), binding1.r#type(), Cmp::Eq)?;
                let (body0, body1) = rename_bodies((binding0, body0), (binding1, body1));
                self.compare(&body0, &body1, cmp)
            }
            (Term::Sigma(_, bindings0), Term::Sigma(_, bindings1))
                if bindings0.len() == bindings1.len() =>
            {
                let mut subst = Substitution::new();
                for (binding0, binding1) in Iterator::zip(bindings0.iter(), bindings1.iter()) {
                    let type1 = subst.apply(binding1.r#type());
                    self.compare(binding0.r#type(), &type1, cmp)?;
                    subst.insert(binding1, binding0.to_term());
                }
                Ok(())
            }

            (Term::Lam(_, binding0, body0), Term::Lam(_, binding1, body1)) => {
                let (body0, body1) = rename_bodies((binding0, body0), (binding1, body1));
                self.compare(&body0, &body1, Cmp::Eq)
            }
            // Eta for functions
            (Term::Lam(_, binding, body), _) => {
                self.compare(body, &Term::app(rhs.clone(), binding.to_term()), Cmp::Eq)
            }
            (_, Term::Lam(_, binding, body)) => {
                self.compare(&Term::app(lhs.clone(), binding.to_term()), body, Cmp::Eq)
            }

            (Term::Tuple(fields0, _), Term::Tuple(fields1, _)) => {
                if fields0.len() != fields1.len() {
                    return Err(mismatch());
                }
                self.compare_all(fields0, fields1)
            }
            // Eta for tuples
            (Term::Tuple(fields, _), _) => (fields.iter().enumerate()).try_for_each(|(i, field)| {
                self.compare(field, &Arc::new(Term::Proj(rhs.clone(), i)), Cmp::Eq)
            }),
            (_, Term::Tuple(fields, _)) => (fields.iter().enumerate()).try_for_each(|(i, field)| {
                self.compare(&Arc::new(Term::Proj(lhs.clone(), i)), field, Cmp::Eq)
            }),

            (Term::PathLam(path_lam0), Term::PathLam(path_lam1)) => {
                let body1 = semantics::subst1(
                    &path_lam1.body,
                    &path_lam1.binding,
                    path_lam0.binding.to_term(),
                );
                self.compare(&path_lam0.body, &body1, Cmp::Eq)
            }
            // Eta for paths
            (Term::PathLam(path_lam), _) => {
                let at = Arc::new(Term::At(rhs.clone(), path_lam.binding.to_term()));
                self.compare(&path_lam.body, &at, Cmp::Eq)
            }
            (_, Term::PathLam(path_lam)) => {
                let at = Arc::new(Term::At(lhs.clone(), path_lam.binding.to_term()));
                self.compare(&at, &path_lam.body, Cmp::Eq)
            }

            (Term::New(class_call0), Term::New(class_call1)) => {
                self.compare_class_calls(class_call0, class_call1, Cmp::Eq, &mismatch)
            }
            // Eta for records
            (Term::New(class_call), _) => self.compare_fields(class_call, &lhs, &rhs),
            (_, Term::New(class_call)) => self.compare_fields(class_call, &rhs, &lhs),

            (Term::App(head0, arg0), Term::App(head1, arg1))
            | (Term::At(head0, arg0), Term::At(head1, arg1)) => {
                self.compare(head0, head1, Cmp::Eq)?;
                self.compare(arg0, arg1, Cmp::Eq)
            }
            (Term::Proj(tuple0, index0), Term::Proj(tuple1, index1)) if index0 == index1 => {
                self.compare(tuple0, tuple1, Cmp::Eq)
            }
            (Term::FieldCall(field0, instance0), Term::FieldCall(field1, instance1))
                if field0 == field1 =>
            {
                self.compare(instance0, instance1, Cmp::Eq)
            }

            (Term::DataCall(data0, levels0, args0), Term::DataCall(data1, levels1, args1))
                if data0 == data1 =>
            {
                self.compare_level_args(levels0, levels1, cmp)?;
                if *data0 == prelude.fin && cmp != Cmp::Eq && args0.len() == 1 && args1.len() == 1 {
                    return self.compare_fin_bounds(&args0[0], &args1[0], cmp, &mismatch);
                }
                if args0.len() != args1.len() {
                    return Err(mismatch());
                }
                self.compare_all(args0, args1)
            }
            // `Fin n` is a subtype of `Nat`
            (Term::DataCall(data0, _, _), Term::DataCall(data1, _, _))
                if (*data0 == prelude.fin && *data1 == prelude.nat && cmp == Cmp::Le)
                    || (*data0 == prelude.nat && *data1 == prelude.fin && cmp == Cmp::Ge) =>
            {
                Ok(())
            }
            (Term::FunCall(def0, levels0, args0), Term::FunCall(def1, levels1, args1))
                if def0 == def1 && args0.len() == args1.len() =>
            {
                self.compare_level_args(levels0, levels1, Cmp::Eq)?;
                self.compare_all(args0, args1)
            }
            (Term::ConCall(con_call0), Term::ConCall(con_call1)) if con_call0.con == con_call1.con => {
                if con_call0.args.len() != con_call1.args.len() {
                    return Err(mismatch());
                }
                self.compare_level_args(&con_call0.levels, &con_call1.levels, Cmp::Eq)?;
                // Data arguments may be omitted from either side
                if con_call0.data_args.len() == con_call1.data_args.len() {
                    self.compare_all(&con_call0.data_args, &con_call1.data_args)?;
                }
                self.compare_all(&con_call0.args, &con_call1.args)
            }
            (Term::ClassCall(class_call0), Term::ClassCall(class_call1)) => {
                self.compare_class_calls(class_call0, class_call1, cmp, &mismatch)
            }

            (Term::Lit(literal0), Term::Lit(literal1)) => match literal_eq(literal0, literal1) {
                true => Ok(()),
                false => Err(mismatch()),
            },
            // Literals are compared with constructor forms by unfolding one
            // constructor at a time.
            (Term::Lit(literal), Term::ConCall(_)) => match self.expand_literal(literal) {
                Some(expanded) => self.compare(&expanded, &rhs, cmp),
                None => Err(mismatch()),
            },
            (Term::ConCall(_), Term::Lit(literal)) => match self.expand_literal(literal) {
                Some(expanded) => self.compare(&lhs, &expanded, cmp),
                None => Err(mismatch()),
            },

            (Term::Array(array0), Term::Array(array1)) if array0.elems.len() == array1.elems.len() => {
                self.compare(&array0.elem_line, &array1.elem_line, Cmp::Eq)?;
                self.compare_all(&array0.elems, &array1.elems)
            }
            (Term::TypeCoerce(coerce0), Term::TypeCoerce(coerce1))
                if coerce0.wrapper == coerce1.wrapper && coerce0.unwrap == coerce1.unwrap =>
            {
                self.compare_all(&coerce0.args, &coerce1.args)?;
                self.compare(&coerce0.arg, &coerce1.arg, Cmp::Eq)
            }

            _ if semantics::alpha_eq(&lhs, &rhs) => Ok(()),
            (_, _) => Err(mismatch()),
        }
    }

    fn compare_all(&mut self, terms0: &[ArcTerm], terms1: &[ArcTerm]) -> Result<(), Error> {
        Iterator::zip(terms0.iter(), terms1.iter())
            .try_for_each(|(term0, term1)| self.compare(term0, term1, Cmp::Eq))
    }

    /// Compare every implementation of an instance with the corresponding
    /// field of another term.
    fn compare_fields(
        &mut self,
        class_call: &ClassCall,
        instance: &ArcTerm,
        other: &ArcTerm,
    ) -> Result<(), Error> {
        for (field, value) in &class_call.impls {
            let value = semantics::subst1(value, &class_call.this, instance.clone());
            let field_call = Arc::new(Term::FieldCall(*field, other.clone()));
            self.compare(&value, &field_call, Cmp::Eq)?;
        }
        Ok(())
    }

    fn compare_class_calls(
        &mut self,
        class_call0: &ClassCall,
        class_call1: &ClassCall,
        cmp: Cmp,
        mismatch: &dyn Fn() -> Error,
    ) -> Result<(), Error> {
        match cmp {
            Cmp::Ge => return self.compare_class_calls(class_call1, class_call0, Cmp::Le, mismatch),
            Cmp::Eq if class_call0.class != class_call1.class => return Err(mismatch()),
            Cmp::Eq if class_call0.impls.len() != class_call1.impls.len() => return Err(mismatch()),
            Cmp::Le if !self.globals.is_subclass(class_call0.class, class_call1.class) => {
                return Err(mismatch())
            }
            Cmp::Eq | Cmp::Le => {}
        }

        if class_call0.class == class_call1.class {
            self.compare_level_args(&class_call0.levels, &class_call1.levels, cmp)?;
        }

        // Every field implemented by the supertype must be implemented in the
        // same way by the subtype.
        for (field, value1) in &class_call1.impls {
            let value0 = match class_call0.implementation(*field) {
                Some(value0) => value0,
                None => return Err(mismatch()),
            };
            let value1 = semantics::subst1(value1, &class_call1.this, class_call0.this.to_term());
            self.compare(value0, &value1, Cmp::Eq)?;
        }
        Ok(())
    }

    fn compare_fin_bounds(
        &mut self,
        bound0: &ArcTerm,
        bound1: &ArcTerm,
        cmp: Cmp,
        mismatch: &dyn Fn() -> Error,
    ) -> Result<(), Error> {
        let bound0 = self.eval().whnf(bound0);
        let bound1 = self.eval().whnf(bound1);
        match (bound0.as_ref(), bound1.as_ref()) {
            (Term::Lit(Literal::Nat(n0)), Term::Lit(Literal::Nat(n1))) => {
                let ordered = match cmp {
                    Cmp::Le => n0 <= n1,
                    Cmp::Eq => n0 == n1,
                    Cmp::Ge => n0 >= n1,
                };
                match ordered {
                    true => Ok(()),
                    false => Err(mismatch()),
                }
            }
            (_, _) => self.compare(&bound0, &bound1, Cmp::Eq),
        }
    }

    /// Unfold a numeric literal into the constructor at its head.
    fn expand_literal(&self, literal: &Literal) -> Option<ArcTerm> {
        let globals = self.globals;
        let prelude = globals.prelude();
        let nat = |n: u64| Arc::new(Term::Lit(Literal::Nat(n)));
        let (con, args) = match *literal {
            Literal::Nat(0) | Literal::Fin(0, _) => (prelude.zero, Vec::new()),
            Literal::Nat(n) | Literal::Fin(n, _) => (prelude.suc, vec![nat(n - 1)]),
            Literal::Int(n) if n >= 0 => (prelude.pos, vec![nat(n as u64)]),
            Literal::Int(n) => (prelude.neg, vec![nat(n.unsigned_abs())]),
            Literal::String(_) => return None,
        };
        Some(Arc::new(Term::ConCall(ConCall {
            con,
            levels: LevelArgs::empty(),
            data_args: Vec::new(),
            args,
        })))
    }

    fn compare_sorts(&mut self, sort0: &Sort, sort1: &Sort, cmp: Cmp) -> Result<(), Error> {
        self.compare_levels(&sort0.p, &sort1.p, cmp)?;
        self.compare_levels(&sort0.h, &sort1.h, cmp)
    }

    fn compare_level_args(
        &mut self,
        levels0: &LevelArgs,
        levels1: &LevelArgs,
        cmp: Cmp,
    ) -> Result<(), Error> {
        let pairs = Iterator::chain(
            Iterator::zip(levels0.p.iter(), levels1.p.iter()),
            Iterator::zip(levels0.h.iter(), levels1.h.iter()),
        );
        for (level0, level1) in pairs {
            self.compare_levels(level0, level1, cmp)?;
        }
        Ok(())
    }

    fn compare_levels(&mut self, level0: &Level, level1: &Level, cmp: Cmp) -> Result<(), Error> {
        match cmp {
            Cmp::Le => self.level_le(level0, level1),
            Cmp::Ge => self.level_le(level1, level0),
            Cmp::Eq => {
                self.level_le(level0, level1)?;
                self.level_le(level1, level0)
            }
        }
    }

    fn level_le(&mut self, level0: &Level, level1: &Level) -> Result<(), Error> {
        let levels = &mut self.inference.levels;
        let level0 = levels.zonk(level0);
        let level1 = levels.zonk(level1);

        if level0.has_infer_var() || level1.has_infer_var() {
            levels.add_equation(level0, level1, self.range);
            Ok(())
        } else if levels.is_le(&level0, &level1) {
            Ok(())
        } else {
            Err(Error::LevelMismatch(level0, level1))
        }
    }

    /// Solve an inference variable with a term.
    fn solve(&mut self, var: MetaVar, term: &ArcTerm) -> Result<(), Error> {
        let solution = self.eval().zonk(term);

        if semantics::metas(&solution).contains(&var) {
            return Err(Error::InfiniteSolution(var));
        }
        let metas = &self.inference.metas;
        let escaping = (semantics::free_bindings(&solution).into_iter())
            .find(|binding| !metas.scope(var).map_or(false, |scope| scope.contains(binding)));
        if let Some(binding) = escaping {
            return Err(Error::EscapingBinding(var, binding));
        }

        let meta_type = match self.inference.metas.r#type(var) {
            Some(r#type) => r#type.clone(),
            None => Term::error(None),
        };
        self.inference.metas.solve(var, solution.clone());

        let solution_type = self.eval().type_of(&solution);
        self.compare(&solution_type, &meta_type, Cmp::Le)
    }

    fn defer(&mut self, lhs: ArcTerm, rhs: ArcTerm, cmp: Cmp) {
        self.equations.add_equation(Equation {
            lhs,
            rhs,
            cmp,
            range: self.range,
        });
    }
}

/// Rename the bound variables of two bodies to the same binding, keeping the
/// binding of a body that mentions inference variables so that their
/// solutions stay in scope.
fn rename_bodies(
    (binding0, body0): (&Binding, &ArcTerm),
    (binding1, body1): (&Binding, &ArcTerm),
) -> (ArcTerm, ArcTerm) {
    if semantics::metas(body0).is_empty() && !semantics::metas(body1).is_empty() {
        let body0 = semantics::subst1(body0, binding0, binding1.to_term());
        (body0, body1.clone())
    } else {
        let body1 = semantics::subst1(body1, binding1, binding0.to_term());
        (body0.clone(), body1)
    }
}

fn literal_eq(literal0: &Literal, literal1: &Literal) -> bool {
    match (literal0, literal1) {
        (
            Literal::Nat(n0) | Literal::Fin(n0, _),
            Literal::Nat(n1) | Literal::Fin(n1, _),
        ) => n0 == n1,
        (Literal::Int(n0), Literal::Int(n1)) => n0 == n1,
        (Literal::String(s0), Literal::String(s1)) => s0 == s1,
        (_, _) => false,
    }
}
