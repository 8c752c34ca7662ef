//! Reconciliation of synthesized types with expected types.
//!
//! When a term's type is not a subtype of the type it is expected to have,
//! a catalogue of coercions is tried in turn before reporting a mismatch.
//! Each alternative runs in its own [attempt][Context::attempt], so a failed
//! alternative leaves no trace.

use std::sync::Arc;

use crate::core::semantics;
use crate::core::{
    prim, ArcTerm, Binding, ClassCall, ConCall, DefId, LevelArgs, Literal, PathLam, Plicity, Sort,
    Term, TypeCoerce,
};
use crate::globals::DefCore;
use crate::source::FileRange;
use crate::surface::elaboration::reporting::Message;
use crate::surface::elaboration::unification::blocking_meta;
use crate::surface::elaboration::{Cmp, Context, MetaSource};

/// The definition at the head of a type.
fn head_def(term: &Term) -> Option<DefId> {
    match term {
        Term::DataCall(def, _, _) | Term::FunCall(def, _, _) => Some(*def),
        Term::ClassCall(class_call) => Some(class_call.class),
        _ => None,
    }
}

impl<'interner, 'globals> Context<'interner, 'globals> {
    /// Check that a term of type `found` can be used where a term of type
    /// `expected` is required, inserting a coercion if necessary.
    pub(crate) fn check_result(
        &mut self,
        range: FileRange,
        term: ArcTerm,
        found: &ArcTerm,
        expected: &ArcTerm,
    ) -> ArcTerm {
        let found_whnf = self.whnf(found);
        let expected_whnf = self.whnf(expected);

        match (found_whnf.as_ref(), expected_whnf.as_ref()) {
            (Term::Universe(_), Term::Universe(sort)) if sort.is_omega() => return term,
            (Term::Error(_), _) | (_, Term::Error(_)) => return term,
            (_, _) if semantics::alpha_eq(&found_whnf, &expected_whnf) => return term,
            (_, _) => {}
        }

        let blocked = blocking_meta(&found_whnf).is_some() || blocking_meta(&expected_whnf).is_some();
        if !blocked {
            self.unify_reflexivity(range, &term, &expected_whnf);

            if let Some(term) = self.coerce_literal(range, &term, &expected_whnf) {
                return term;
            }
            if let Some(term) = self.coerce(range, &term, &found_whnf, &expected_whnf) {
                return term;
            }
        }

        match self.unify(range, found, expected, Cmp::Le) {
            Ok(()) => term,
            Err(error) => {
                self.report_unification_error(range, found, expected, error);
                Term::error(Some(expected.clone()))
            }
        }
    }

    /// Use the endpoints of an expected path type to infer the implicit
    /// arguments of a reflexivity proof.
    fn unify_reflexivity(&mut self, range: FileRange, term: &ArcTerm, expected: &ArcTerm) {
        let globals = self.globals;
        let prelude = globals.prelude();
        let (r#type, value) = match term.as_ref() {
            Term::FunCall(def, _, args) if *def == prelude.idp && args.len() == 2 => (&args[0], &args[1]),
            _ => return,
        };
        let (line, start) = match expected.as_ref() {
            Term::DataCall(data, _, args) if *data == prelude.path && args.len() == 3 => (&args[0], &args[1]),
            _ => return,
        };

        let line_start = Term::app(line.clone(), prim::interval_endpoint(prelude.left));
        let line_start = self.whnf(&line_start);
        // Failures are reported by the comparison of the full types
        self.attempt(|this| {
            this.unify(range, r#type, &line_start, Cmp::Eq).ok()?;
            this.unify(range, value, start, Cmp::Eq).ok()
        });
    }

    /// Re-encode numeric literals for the type they are expected at.
    fn coerce_literal(&mut self, range: FileRange, term: &ArcTerm, expected: &ArcTerm) -> Option<ArcTerm> {
        let globals = self.globals;
        let prelude = globals.prelude();
        let value = match term.as_ref() {
            Term::Lit(Literal::Nat(value) | Literal::Fin(value, _)) => *value,
            _ => return None,
        };

        match expected.as_ref() {
            Term::DataCall(data, _, args) if *data == prelude.fin && args.len() == 1 => {
                let bound = match self.whnf(&args[0]).as_ref() {
                    Term::Lit(Literal::Nat(bound)) => *bound,
                    _ => return None,
                };
                if value < bound {
                    return Some(Arc::new(Term::Lit(Literal::Fin(value, bound))));
                }
                let expected_type = self.pretty(expected);
                self.push_message(Message::LiteralOutOfRange {
                    range,
                    value: value.to_string(),
                    expected_type,
                });
                Some(Term::error(Some(expected.clone())))
            }
            Term::DataCall(data, _, _) if *data == prelude.int => match i64::try_from(value) {
                Ok(value) => Some(Arc::new(Term::Lit(Literal::Int(value)))),
                Err(_) => {
                    let expected_type = self.pretty(expected);
                    self.push_message(Message::LiteralOutOfRange {
                        range,
                        value: value.to_string(),
                        expected_type,
                    });
                    Some(Term::error(Some(expected.clone())))
                }
            },
            _ => None,
        }
    }

    /// Try each coercion in turn, returning the first that succeeds.
    fn coerce(
        &mut self,
        range: FileRange,
        term: &ArcTerm,
        found: &ArcTerm,
        expected: &ArcTerm,
    ) -> Option<ArcTerm> {
        let globals = self.globals;
        let prelude = globals.prelude();
        let found_head = head_def(found);
        let expected_head = head_def(expected);

        if let Term::FunCall(wrapper, levels, args) = found.as_ref() {
            if globals.is_type_wrapper(*wrapper) && expected_head != Some(*wrapper) {
                let coerced = self.attempt(|this| {
                    let inner_type = this.wrapped_type(*wrapper, levels, args)?;
                    let unwrapped = Arc::new(Term::TypeCoerce(TypeCoerce {
                        wrapper: *wrapper,
                        levels: levels.clone(),
                        args: args.clone(),
                        arg: term.clone(),
                        unwrap: true,
                    }));
                    Some(this.check_result(range, unwrapped, &inner_type, expected))
                });
                if coerced.is_some() {
                    return coerced;
                }
            }
        }

        if let Term::FunCall(wrapper, levels, args) = expected.as_ref() {
            if globals.is_type_wrapper(*wrapper) && found_head != Some(*wrapper) {
                let coerced = self.attempt(|this| {
                    let inner_type = this.wrapped_type(*wrapper, levels, args)?;
                    let arg = this.check_result(range, term.clone(), found, &inner_type);
                    Some(Arc::new(Term::TypeCoerce(TypeCoerce {
                        wrapper: *wrapper,
                        levels: levels.clone(),
                        args: args.clone(),
                        arg,
                        unwrap: false,
                    })))
                });
                if coerced.is_some() {
                    return coerced;
                }
            }
        }

        match (found.as_ref(), expected.as_ref()) {
            (Term::ClassCall(found_call), Term::ClassCall(expected_call))
                if globals.is_subclass(found_call.class, expected_call.class)
                    && (expected_call.impls.iter())
                        .any(|(field, _)| !found_call.is_implemented(*field)) =>
            {
                let coerced = self.attempt(|this| this.widen_record(range, term, found_call, expected_call));
                if coerced.is_some() {
                    return coerced;
                }
            }
            (Term::Pi(_, Plicity::Explicit, binding, codomain), Term::ClassCall(expected_call))
                if expected_call.class == prelude.darray =>
            {
                let coerced = self.attempt(|this| {
                    this.function_to_array(range, term, binding, codomain, expected_call, expected)
                });
                if coerced.is_some() {
                    return coerced;
                }
            }
            (Term::DataCall(data, _, path_args), Term::Pi(_, Plicity::Explicit, binding, _))
                if *data == prelude.path && path_args.len() == 3 =>
            {
                let coerced = self.attempt(|this| this.path_to_function(range, term, path_args, binding, expected));
                if coerced.is_some() {
                    return coerced;
                }
            }
            (Term::Pi(_, Plicity::Explicit, binding, codomain), Term::DataCall(data, levels, path_args))
                if *data == prelude.path && path_args.len() == 3 =>
            {
                let coerced = self.attempt(|this| {
                    this.function_to_path(range, term, binding, codomain, levels, path_args)
                });
                if coerced.is_some() {
                    return coerced;
                }
            }
            (Term::DataCall(data, _, _), Term::DataCall(int, _, _))
                if (*data == prelude.nat || *data == prelude.fin) && *int == prelude.int =>
            {
                let coerced = self.attempt(|this| this.nat_to_int(range, term, found));
                if coerced.is_some() {
                    return coerced;
                }
            }
            (_, _) => {}
        }

        let (from, to) = (found_head?, expected_head?);
        let vias: Vec<_> = globals.coercions(from, to).collect();
        vias.into_iter()
            .find_map(|via| self.attempt(|this| this.apply_coercion(range, via, term, found, expected)))
    }

    /// Embed a natural number, or an element of a finite type, in the
    /// integers.
    fn nat_to_int(&mut self, range: FileRange, term: &ArcTerm, found: &ArcTerm) -> Option<ArcTerm> {
        let prelude = self.globals.prelude();
        let nat = prim::data_call(prelude.nat);
        self.unify(range, found, &nat, Cmp::Le).ok()?;
        Some(Arc::new(Term::ConCall(ConCall {
            con: prelude.pos,
            levels: LevelArgs::empty(),
            data_args: Vec::new(),
            args: vec![term.clone()],
        })))
    }

    /// The type wrapped by an application of a type wrapper.
    fn wrapped_type(&self, wrapper: DefId, levels: &LevelArgs, args: &[ArcTerm]) -> Option<ArcTerm> {
        let function = self.globals.function(wrapper)?;
        let body = function.body.as_ref()?;
        Some(semantics::instantiate(&function.params, levels, args, body))
    }

    /// Build an instance of the expected class from the fields of an
    /// instance of a subclass.
    fn widen_record(
        &mut self,
        range: FileRange,
        term: &ArcTerm,
        found_call: &ClassCall,
        expected_call: &ClassCall,
    ) -> Option<ArcTerm> {
        let class = self.globals.class(expected_call.class)?;
        let this = ClassCall::this_binding(None, expected_call.class, &expected_call.levels, expected_call.sort);
        let mut impls = Vec::with_capacity(class.fields.len());

        for field in &class.fields {
            let field_call = Arc::new(Term::FieldCall(*field, term.clone()));
            let value = match expected_call.implementation(*field) {
                Some(value) if !found_call.is_implemented(*field) => {
                    let value = semantics::subst1(value, &expected_call.this, term.clone());
                    self.unify(range, &field_call, &value, Cmp::Eq).ok()?;
                    value
                }
                _ => field_call,
            };
            impls.push((*field, value));
        }

        let sort = self.class_call_sort(range, expected_call.class, &expected_call.levels, |_| true, None);
        let class_call = ClassCall {
            class: expected_call.class,
            levels: expected_call.levels.clone(),
            this,
            impls,
            sort,
        };
        let found = Arc::new(Term::ClassCall(class_call.clone()));
        let expected = Arc::new(Term::ClassCall(expected_call.clone()));
        self.unify(range, &found, &expected, Cmp::Le).ok()?;
        Some(Arc::new(Term::New(class_call)))
    }

    /// Build a dependent array from a function on a finite type.
    fn function_to_array(
        &mut self,
        range: FileRange,
        term: &ArcTerm,
        binding: &Binding,
        codomain: &ArcTerm,
        expected_call: &ClassCall,
        expected: &ArcTerm,
    ) -> Option<ArcTerm> {
        let globals = self.globals;
        let prelude = globals.prelude();

        let domain = self.whnf(binding.r#type());
        let len = match domain.as_ref() {
            Term::DataCall(fin, _, args) if *fin == prelude.fin && args.len() == 1 => args[0].clone(),
            Term::Meta(_) => {
                let len = match expected_call.implementation(prelude.darray_len) {
                    Some(len) if !semantics::free_bindings(len).contains(&expected_call.this) => len.clone(),
                    _ => self.push_meta(MetaSource::ImplicitArg(range, None), prim::data_call(prelude.nat)),
                };
                let fin = Arc::new(Term::DataCall(prelude.fin, LevelArgs::empty(), vec![len.clone()]));
                self.unify(range, &domain, &fin, Cmp::Eq).ok()?;
                len
            }
            _ => return None,
        };

        let levels = expected_call.levels.clone();
        let class_sort = match globals.class(prelude.darray) {
            Some(class) => class.sort.subst(&|var| levels.get(var)),
            None => Sort::SET0,
        };
        let impls = vec![
            (prelude.darray_len, len),
            (prelude.darray_elem, Arc::new(Term::Lam(Plicity::Explicit, binding.clone(), codomain.clone()))),
            (prelude.darray_at, term.clone()),
        ];
        let sort = self.class_call_sort(
            range,
            prelude.darray,
            &levels,
            |field| impls.iter().any(|(implemented, _)| *implemented == field),
            None,
        );
        let class_call = ClassCall {
            class: prelude.darray,
            this: ClassCall::this_binding(None, prelude.darray, &levels, class_sort),
            levels,
            impls,
            sort,
        };

        let found = Arc::new(Term::ClassCall(class_call.clone()));
        self.unify(range, &found, expected, Cmp::Le).ok()?;
        Some(Arc::new(Term::New(class_call)))
    }

    /// Eta-expand a path into a function on the interval.
    fn path_to_function(
        &mut self,
        range: FileRange,
        term: &ArcTerm,
        path_args: &[ArcTerm],
        binding: &Binding,
        expected: &ArcTerm,
    ) -> Option<ArcTerm> {
        let globals = self.globals;
        let prelude = globals.prelude();
        let interval = prim::data_call(prelude.interval);
        self.unify(range, binding.r#type(), &interval, Cmp::Eq).ok()?;

        let point = Binding::new(binding.name(), interval);
        let at = Arc::new(Term::At(term.clone(), point.to_term()));
        let codomain = Term::app(path_args[0].clone(), point.to_term());
        let sort = self.sort_of_type(&codomain);
        let found = Arc::new(Term::Pi(sort, Plicity::Explicit, point.clone(), codomain));
        self.unify(range, &found, expected, Cmp::Le).ok()?;

        Some(Arc::new(Term::Lam(Plicity::Explicit, point, at)))
    }

    /// Turn a function on the interval into a path, checking its endpoints.
    fn function_to_path(
        &mut self,
        range: FileRange,
        term: &ArcTerm,
        binding: &Binding,
        codomain: &ArcTerm,
        levels: &LevelArgs,
        path_args: &[ArcTerm],
    ) -> Option<ArcTerm> {
        let globals = self.globals;
        let prelude = globals.prelude();
        let interval = prim::data_call(prelude.interval);
        self.unify(range, binding.r#type(), &interval, Cmp::Eq).ok()?;

        let point = Binding::new(binding.name(), interval);
        let codomain = semantics::subst1(codomain, binding, point.to_term());
        let line_type = Term::app(path_args[0].clone(), point.to_term());
        self.unify(range, &codomain, &line_type, Cmp::Le).ok()?;

        let endpoints = [(prelude.left, &path_args[1]), (prelude.right, &path_args[2])];
        for (endpoint, expected_value) in endpoints {
            let value = Term::app(term.clone(), prim::interval_endpoint(endpoint));
            self.unify(range, &value, expected_value, Cmp::Eq).ok()?;
        }

        Some(Arc::new(Term::PathLam(PathLam {
            levels: levels.clone(),
            line: path_args[0].clone(),
            body: Term::app(term.clone(), point.to_term()),
            binding: point,
        })))
    }

    /// Apply a registered coercion function, passing the term as its last
    /// explicit argument.
    fn apply_coercion(
        &mut self,
        range: FileRange,
        via: DefId,
        term: &ArcTerm,
        found: &ArcTerm,
        expected: &ArcTerm,
    ) -> Option<ArcTerm> {
        let globals = self.globals;
        let function = match globals.core(via)? {
            DefCore::Function(function) => function,
            _ => return None,
        };
        let last_explicit = function.params.iter().rposition(|param| param.plicity.is_explicit())?;

        let levels = self.instantiate_levels(range, via, None);
        let mut subst = semantics::Substitution::with_levels(levels.clone());
        let mut args = Vec::with_capacity(function.params.len());
        for (index, param) in function.params.iter().enumerate() {
            let r#type = subst.apply(param.binding.r#type());
            let arg = match index == last_explicit {
                true => {
                    self.unify(range, found, &r#type, Cmp::Le).ok()?;
                    term.clone()
                }
                false => self.push_meta(MetaSource::ImplicitArg(range, param.binding.name()), r#type),
            };
            subst.insert(&param.binding, arg.clone());
            args.push(arg);
        }

        let result_type = subst.apply(&function.result_type);
        self.unify(range, &result_type, expected, Cmp::Le).ok()?;
        Some(Arc::new(Term::FunCall(via, levels, args)))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::core::{Level, MetaVar};
    use crate::files::FileId;
    use crate::source::{ByteRange, StringInterner};
    use crate::GlobalsBuilder;

    fn range() -> FileRange {
        let file_id = FileId::try_from(1).unwrap();
        FileRange::new(file_id, ByteRange::new(0, 0))
    }

    fn meta_var(term: &ArcTerm) -> MetaVar {
        match term.as_ref() {
            Term::Meta(var) => *var,
            _ => panic!("expected an inference variable, found {term:?}"),
        }
    }

    #[test]
    fn failed_attempts_leave_no_trace() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let mut context = Context::new(&interner, &globals);
        let nat = prim::data_call(globals.prelude().nat);

        let kept = context.push_meta(MetaSource::ImplicitArg(range(), None), Term::universe(Sort::SET0));
        let var = meta_var(&kept);

        let result = context.attempt(|this| {
            this.push_meta(MetaSource::HoleExpr(range()), nat.clone());
            this.unify(range(), &kept, &nat, Cmp::Eq).ok()?;
            this.report_error(range(), "rejected");
            Some(())
        });
        assert!(result.is_none());
        assert!(context.inference.metas.solution(var).is_none());
        assert_eq!(context.inference.metas.unsolved().len(), 1);
        assert!(context.messages.is_empty());

        let result = context.attempt(|this| this.unify(range(), &kept, &nat, Cmp::Eq).ok());
        assert!(result.is_some());
        assert!(context.inference.metas.solution(var).is_some());
    }

    #[test]
    fn reflexivity_arguments_are_inferred_only_when_both_endpoints_match() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let prelude = globals.prelude();
        let mut context = Context::new(&interner, &globals);
        let nat = prim::data_call(prelude.nat);

        let levels = LevelArgs {
            p: vec![Level::ZERO],
            h: vec![Level::ZERO],
        };
        let line = Arc::new(Term::Lam(
            Plicity::Explicit,
            Binding::new(None, prim::data_call(prelude.interval)),
            nat.clone(),
        ));
        let expected = Arc::new(Term::DataCall(
            prelude.path,
            levels.clone(),
            vec![line, prim::nat_lit(0), prim::nat_lit(0)],
        ));
        let idp = |r#type: &ArcTerm, value: u64| {
            Arc::new(Term::FunCall(prelude.idp, levels.clone(), vec![r#type.clone(), prim::nat_lit(value)]))
        };

        let r#type = context.push_meta(MetaSource::ImplicitArg(range(), None), Term::universe(Sort::SET0));
        let var = meta_var(&r#type);

        // idp {?A} 5 : 0 = 0
        context.unify_reflexivity(range(), &idp(&r#type, 5), &expected);
        assert!(context.inference.metas.solution(var).is_none());
        assert!(context.messages.is_empty());

        // idp {?A} 0 : 0 = 0
        context.unify_reflexivity(range(), &idp(&r#type, 0), &expected);
        assert!(semantics::alpha_eq(&context.zonk(&r#type), &nat));
    }

    #[test]
    fn constructor_calls_compare_levels_and_data_arguments() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let prelude = globals.prelude();
        let mut context = Context::new(&interner, &globals);

        let suc = |p: i32, data_arg: DefId| {
            Arc::new(Term::ConCall(ConCall {
                con: prelude.suc,
                levels: LevelArgs {
                    p: vec![Level::Const(p)],
                    h: Vec::new(),
                },
                data_args: vec![prim::data_call(data_arg)],
                args: vec![prim::nat_lit(0)],
            }))
        };

        assert!(context.unify(range(), &suc(0, prelude.nat), &suc(0, prelude.nat), Cmp::Eq).is_ok());
        assert!(context.unify(range(), &suc(0, prelude.nat), &suc(1, prelude.nat), Cmp::Eq).is_err());
        assert!(context.unify(range(), &suc(0, prelude.nat), &suc(0, prelude.int), Cmp::Eq).is_err());
    }
}
