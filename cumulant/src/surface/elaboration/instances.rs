//! Instance search for implicit arguments whose types are type classes.
//!
//! Instances are tried in the order they were registered. When the type of
//! an instance argument is not known well enough to pick an instance, the
//! argument becomes an inference variable and the search is retried while
//! the definition is finalized.

use std::sync::Arc;

use crate::core::semantics::{self, Substitution};
use crate::core::{ArcTerm, DefId, MetaVar, Term};
use crate::source::{FileRange, StringId};
use crate::surface::elaboration::reporting::Message;
use crate::surface::elaboration::{Cmp, Context, MetaSource};

/// How deeply the parameters of instances are themselves searched for.
const MAX_INSTANCE_DEPTH: usize = 8;

/// An instance argument that is waiting for its type to be known.
#[derive(Debug, Clone)]
pub struct PendingInstance {
    var: MetaVar,
    range: FileRange,
    class: DefId,
}

impl<'interner, 'globals> Context<'interner, 'globals> {
    /// The class of a type, if it is a type class.
    fn type_class(&self, r#type: &ArcTerm) -> Option<DefId> {
        match self.whnf(r#type).as_ref() {
            Term::ClassCall(class_call) => {
                let class = self.globals.class(class_call.class)?;
                (!class.is_record).then_some(class_call.class)
            }
            _ => None,
        }
    }

    /// Fill in an implicit argument, searching for an instance if its type
    /// is a type class.
    pub(crate) fn insert_implicit(
        &mut self,
        range: FileRange,
        name: Option<StringId>,
        r#type: &ArcTerm,
    ) -> ArcTerm {
        let class = match self.type_class(r#type) {
            Some(class) => class,
            None => return self.push_meta(MetaSource::ImplicitArg(range, name), r#type.clone()),
        };

        if let Some(instance) = self.find_instance(range, r#type, 0) {
            return instance;
        }

        let zonked = self.zonk(r#type);
        if semantics::metas(&zonked).is_empty() {
            self.push_message(Message::InstanceNotFound {
                range,
                class: self.globals.name(class),
            });
            return Term::error(Some(zonked));
        }

        let var = (self.inference.metas).push(
            MetaSource::InstanceArg(range, class),
            r#type.clone(),
            self.local_env.clone(),
        );
        self.pending_instances.push(PendingInstance { var, range, class });
        Arc::new(Term::Meta(var))
    }

    /// Search for an instance of a type class.
    fn find_instance(&mut self, range: FileRange, r#type: &ArcTerm, depth: usize) -> Option<ArcTerm> {
        if depth > MAX_INSTANCE_DEPTH {
            return None;
        }
        let globals = self.globals;
        let class = self.type_class(r#type)?;

        for instance in globals.instances(class) {
            let found = self.attempt(|this| this.try_instance(range, *instance, r#type, depth));
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn try_instance(
        &mut self,
        range: FileRange,
        instance: DefId,
        r#type: &ArcTerm,
        depth: usize,
    ) -> Option<ArcTerm> {
        let function = self.globals.function(instance)?;
        let levels = self.instantiate_levels(range, instance, None);
        let mut subst = Substitution::with_levels(levels.clone());
        let mut args = Vec::with_capacity(function.params.len());
        let mut class_args = Vec::new();

        for param in &function.params {
            let param_type = subst.apply(param.binding.r#type());
            let source = MetaSource::ImplicitArg(range, param.binding.name());
            let arg = self.push_meta(source, param_type.clone());
            if self.type_class(&param_type).is_some() {
                class_args.push((arg.clone(), param_type));
            }
            subst.insert(&param.binding, arg.clone());
            args.push(arg);
        }

        let result_type = subst.apply(&function.result_type);
        self.unify(range, &result_type, r#type, Cmp::Le).ok()?;

        for (arg, param_type) in class_args {
            let param_type = self.zonk(&param_type);
            let found = self.find_instance(range, &param_type, depth + 1)?;
            self.unify(range, &arg, &found, Cmp::Eq).ok()?;
        }

        Some(Arc::new(Term::FunCall(instance, levels, args)))
    }

    /// Retry the search for pending instance arguments.
    ///
    /// When `is_final` is set, arguments whose types are fully known but
    /// have no instance are reported.
    pub(crate) fn resolve_pending_instances(&mut self, is_final: bool) {
        for pending in std::mem::take(&mut self.pending_instances) {
            if self.inference.metas.solution(pending.var).is_some() {
                continue;
            }
            let r#type = match self.inference.metas.r#type(pending.var) {
                Some(r#type) => self.zonk(r#type),
                None => continue,
            };

            match self.find_instance(pending.range, &r#type, 0) {
                Some(instance) => {
                    let meta = Arc::new(Term::Meta(pending.var));
                    if let Err(error) = self.unify(pending.range, &meta, &instance, Cmp::Eq) {
                        self.report_unification_error(pending.range, &instance, &meta, error);
                    }
                }
                None if is_final && semantics::metas(&r#type).is_empty() => {
                    self.push_message(Message::InstanceNotFound {
                        range: pending.range,
                        class: self.globals.name(pending.class),
                    });
                    self.inference.metas.solve(pending.var, Term::error(Some(r#type)));
                }
                None => self.pending_instances.push(pending),
            }
        }
    }
}
