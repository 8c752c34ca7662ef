//! Calls of meta definitions, whose elaboration is delegated to an external
//! [`MetaResolver`].
//!
//! A resolver that needs more information than is available when it is
//! first called can ask to be retried later, either before or after the
//! universe levels of the definition are solved. In the meantime the call is
//! represented by an inference variable, which is solved once the resolver
//! produces a term, or with an error term if it gives up.

use std::sync::Arc;

use crate::core::{ArcTerm, DefId, MetaVar, Term};
use crate::globals::DefCore;
use crate::source::FileRange;
use crate::surface;
use crate::surface::elaboration::reporting::Message;
use crate::surface::elaboration::{Cmp, Context, LocalEnv, MetaSource};

/// When a deferred meta call is retried.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    BeforeLevels,
    AfterLevels,
}

/// A call of a meta definition.
#[derive(Debug, Clone)]
pub struct MetaCall {
    pub range: FileRange,
    pub def: DefId,
    pub args: Vec<surface::Arg>,
    /// The type the result is expected to have, if it is known.
    pub expected_type: Option<ArcTerm>,
}

pub enum MetaOutcome {
    /// The elaborated call.
    Done(ArcTerm),
    /// Not enough is known yet: retry the call at a later stage.
    Defer(Stage),
    /// The call could not be elaborated. If the resolver did not report an
    /// error itself, a generic one is reported.
    Failed,
}

/// The elaborator of a meta definition.
pub trait MetaResolver {
    fn invoke(&self, context: &mut Context<'_, '_>, call: &MetaCall) -> MetaOutcome;
}

/// A meta call waiting to be retried.
pub struct DeferredMeta {
    /// The variable standing in for the result of the call.
    var: MetaVar,
    call: MetaCall,
    resolver: Arc<dyn MetaResolver>,
    stage: Stage,
    /// The local environment at the call.
    local_env: LocalEnv,
}

#[derive(Default)]
pub struct DeferredQueue {
    entries: Vec<DeferredMeta>,
}

impl DeferredQueue {
    pub fn new() -> DeferredQueue {
        DeferredQueue::default()
    }

    pub fn push(&mut self, entry: DeferredMeta) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Remove the entries that are due at a stage. Every entry is due after
    /// levels are solved.
    pub fn take(&mut self, stage: Stage) -> Vec<DeferredMeta> {
        match stage {
            Stage::BeforeLevels => {
                let (due, rest) = (std::mem::take(&mut self.entries).into_iter())
                    .partition(|entry| entry.stage == Stage::BeforeLevels);
                self.entries = rest;
                due
            }
            Stage::AfterLevels => std::mem::take(&mut self.entries),
        }
    }
}

impl<'interner, 'globals> Context<'interner, 'globals> {
    /// Elaborate a call of a meta definition, deferring it if the resolver
    /// asks to.
    pub(crate) fn elab_meta_call(
        &mut self,
        range: FileRange,
        def: DefId,
        args: &[surface::Arg],
        expected_type: Option<&ArcTerm>,
    ) -> (ArcTerm, ArcTerm) {
        let resolver = match self.globals.core(def) {
            Some(DefCore::Meta(meta)) => meta.resolver.clone(),
            _ => return self.synth_reported_error(range),
        };
        let call = MetaCall {
            range,
            def,
            args: args.to_vec(),
            expected_type: expected_type.map(|r#type| self.zonk(r#type)),
        };

        let initial_messages = self.messages.len();
        match resolver.invoke(self, &call) {
            MetaOutcome::Done(term) => {
                let r#type = self.type_of(&term);
                match expected_type {
                    Some(expected_type) => {
                        let term = self.check_result(range, term, &r#type, expected_type);
                        (term, expected_type.clone())
                    }
                    None => (term, r#type),
                }
            }
            MetaOutcome::Defer(stage) => {
                let r#type = match expected_type {
                    Some(expected_type) => expected_type.clone(),
                    None => self.push_type_meta(MetaSource::MetaCallType(range, def)).0,
                };
                let source = MetaSource::MetaCall(range, def);
                let var = (self.inference.metas).push(source, r#type.clone(), self.local_env.clone());
                self.deferred.push(DeferredMeta {
                    var,
                    call,
                    resolver,
                    stage,
                    local_env: self.local_env.clone(),
                });
                (Arc::new(Term::Meta(var)), r#type)
            }
            MetaOutcome::Failed => {
                if self.messages.len() == initial_messages {
                    let name = self.globals.name(def);
                    self.push_message(Message::DeferredMetaFailed { range, name });
                }
                match expected_type {
                    Some(expected_type) => (Term::error(Some(expected_type.clone())), expected_type.clone()),
                    None => self.synth_reported_error(range),
                }
            }
        }
    }

    /// Retry the deferred meta calls that are due at a stage.
    pub(crate) fn drain_deferred(&mut self, stage: Stage) {
        for entry in self.deferred.take(stage) {
            if self.is_cancelled() {
                return;
            }
            self.retry_deferred(entry, stage);
        }
    }

    fn retry_deferred(&mut self, entry: DeferredMeta, stage: Stage) {
        let DeferredMeta {
            var,
            mut call,
            resolver,
            stage: _,
            local_env,
        } = entry;
        let range = call.range;
        let expected_type = match self.inference.metas.r#type(var) {
            Some(r#type) => self.zonk(r#type),
            None => return,
        };
        call.expected_type = Some(expected_type.clone());

        let saved_env = std::mem::replace(&mut self.local_env, local_env);
        let initial_messages = self.messages.len();
        let initial_equations = self.equations.len();

        match resolver.invoke(self, &call) {
            MetaOutcome::Done(term) => {
                let r#type = self.type_of(&term);
                let term = self.check_result(range, term, &r#type, &expected_type);
                let meta = Arc::new(Term::Meta(var));
                if let Err(error) = self.unify(range, &meta, &term, Cmp::Eq) {
                    self.report_unification_error(range, &term, &meta, error);
                    if self.inference.metas.solution(var).is_none() {
                        self.inference.metas.solve(var, Term::error(Some(expected_type)));
                    }
                }
            }
            MetaOutcome::Defer(Stage::AfterLevels) if stage == Stage::BeforeLevels => {
                let local_env = self.local_env.clone();
                self.deferred.push(DeferredMeta {
                    var,
                    call,
                    resolver,
                    stage: Stage::AfterLevels,
                    local_env,
                });
            }
            MetaOutcome::Defer(_) | MetaOutcome::Failed => {
                self.equations.truncate(initial_equations);
                if self.messages.len() == initial_messages {
                    let name = self.globals.name(call.def);
                    self.push_message(Message::DeferredMetaFailed { range, name });
                }
                if self.inference.metas.solution(var).is_none() {
                    self.inference.metas.solve(var, Term::error(Some(expected_type)));
                }
            }
        }

        self.local_env = saved_env;
    }
}
