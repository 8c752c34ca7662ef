//! Array literals, elaborated to dependent arrays whose element types are
//! constant.

use std::sync::Arc;

use crate::core::semantics;
use crate::core::{
    prim, ArcTerm, ArrayTerm, Binding, ClassCall, DefId, LevelArgs, Literal, Plicity, Sort, Term,
};
use crate::source::FileRange;
use crate::surface;
use crate::surface::elaboration::reporting::Message;
use crate::surface::elaboration::{Cmp, Context, MetaSource};

impl<'interner, 'globals> Context<'interner, 'globals> {
    pub(crate) fn synth_array(&mut self, range: FileRange, elems: &[surface::Term]) -> (ArcTerm, ArcTerm) {
        let (first, rest) = match elems.split_first() {
            Some(split) => split,
            None => {
                self.push_message(Message::AmbiguousArrayLiteral { range });
                return self.synth_reported_error(range);
            }
        };
        let globals = self.globals;
        let prelude = globals.prelude();

        let (first, elem_type) = self.synth(first);
        let mut values = Vec::with_capacity(elems.len());
        values.push(first);
        for elem in rest {
            values.push(self.check(elem, &elem_type));
        }

        let levels = self.instantiate_levels(range, prelude.darray, None);
        let found_universe = Term::universe(self.sort_of_type(&elem_type));
        let expected_universe = Term::universe(elem_sort(&levels));
        if let Err(error) = self.unify(range, &found_universe, &expected_universe, Cmp::Le) {
            self.report_unification_error(range, &found_universe, &expected_universe, error);
        }

        let array = ArrayTerm {
            elem_line: self.constant_line(values.len() as u64, elem_type),
            levels,
            elems: values,
        };
        let r#type = Arc::new(Term::ClassCall(prim::array_type(globals, &array)));
        (Arc::new(Term::Array(array)), r#type)
    }

    pub(crate) fn check_array(
        &mut self,
        range: FileRange,
        elems: &[surface::Term],
        expected_type: &ArcTerm,
    ) -> ArcTerm {
        let globals = self.globals;
        let prelude = globals.prelude();
        let expected_whnf = self.whnf(expected_type);
        let class_call = match expected_whnf.as_ref() {
            Term::ClassCall(class_call) if class_call.class == prelude.darray => class_call,
            _ => {
                let (term, r#type) = self.synth_array(range, elems);
                return self.check_result(range, term, &r#type, expected_type);
            }
        };
        let len = elems.len() as u64;

        if let Some(expected_len) = closed_impl(class_call, prelude.darray_len) {
            match self.whnf(expected_len).as_ref() {
                Term::Lit(Literal::Nat(expected)) if *expected == len => {}
                Term::Lit(Literal::Nat(_)) => {
                    self.push_message(Message::MismatchedArrayLength {
                        range,
                        found_len: elems.len(),
                        expected_len: self.pretty(expected_len),
                    });
                    return Term::error(Some(expected_type.clone()));
                }
                _ => {
                    let found_len = prim::nat_lit(len);
                    if let Err(error) = self.unify(range, &found_len, expected_len, Cmp::Eq) {
                        self.report_unification_error(range, &found_len, expected_len, error);
                        return Term::error(Some(expected_type.clone()));
                    }
                }
            }
        }

        let elem_line = match closed_impl(class_call, prelude.darray_elem) {
            Some(elem_line) => elem_line.clone(),
            None => {
                let universe = Term::universe(elem_sort(&class_call.levels));
                let elem_type = self.push_meta(MetaSource::ArrayElemType(range), universe);
                self.constant_line(len, elem_type)
            }
        };

        let mut values = Vec::with_capacity(elems.len());
        for (index, elem) in elems.iter().enumerate() {
            let index = Arc::new(Term::Lit(Literal::Fin(index as u64, len)));
            let elem_type = Term::app(elem_line.clone(), index);
            values.push(self.check(elem, &elem_type));
        }

        let array = ArrayTerm {
            levels: class_call.levels.clone(),
            elem_line,
            elems: values,
        };
        let found = Arc::new(Term::ClassCall(prim::array_type(globals, &array)));
        self.check_result(range, Arc::new(Term::Array(array)), &found, expected_type)
    }

    /// A line of types over `Fin len` that does not depend on the index.
    fn constant_line(&self, len: u64, r#type: ArcTerm) -> ArcTerm {
        let prelude = self.globals.prelude();
        let fin = Arc::new(Term::DataCall(prelude.fin, LevelArgs::empty(), vec![prim::nat_lit(len)]));
        Arc::new(Term::Lam(Plicity::Explicit, Binding::new(None, fin), r#type))
    }
}

/// The implementation of a field, if it does not refer to other fields.
fn closed_impl(class_call: &ClassCall, field: DefId) -> Option<&ArcTerm> {
    let value = class_call.implementation(field)?;
    (!semantics::free_bindings(value).contains(&class_call.this)).then_some(value)
}

/// The universe that the elements of an array live in.
fn elem_sort(levels: &LevelArgs) -> Sort {
    match (levels.p.first(), levels.h.first()) {
        (Some(p), Some(h)) => Sort::new(*p, *h),
        _ => Sort::SET0,
    }
}
