//! Elaboration of the surface language into the core language.
//!
//! This module is where user-facing type checking happens, along with
//! translating the convenient surface language into the simpler, more
//! explicit core language: implicit arguments are inserted, coercions are
//! applied, and universe levels are inferred.
//!
//! The algorithm is structured _bidirectionally_, ie. divided into _checking_
//! and _synthesis_ modes. By supplying type annotations as early as possible
//! using the checking mode, we can improve the locality of type errors, and
//! provide enough _control_ to the algorithm to allow for elaboration even in
//! the presence of ‘fancy’ types.
//!
//! For places where bidirectional typing is not enough, _unification_ is used
//! in an attempt to infer unknown terms and types based on how they are used.
//! Comparisons that cannot be decided yet are recorded as [equations], and
//! retried when the definition being elaborated is finalized:
//!
//! 1. pending equations are solved as far as possible
//! 2. [deferred meta calls][deferred] that asked to run before level solving
//!    are retried
//! 3. [levels] are solved
//! 4. the remaining deferred meta calls are retried with their levels known
//! 5. leftover equations and inference variables are reported
//!
//! ## Resources
//!
//! - [Bidirectional Typing Rules: A Tutorial](https://davidchristiansen.dk/tutorials/bidirectional.pdf)
//! - [elaboration-zoo](https://github.com/AndrasKovacs/elaboration-zoo/)

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::level::{LevelInferVar, LevelVar};
use crate::core::semantics::{self, EvalContext, Solutions, Substitution};
use crate::core::{
    self, prim, ArcTerm, Binding, CaseTerm, ClassCall, ConCall, DefId, Level, LevelArgs,
    LevelParams, MetaVar, PathLam, Plicity, Sort, Term,
};
use crate::env::{EnvLen, SharedEnv, UniqueEnv};
use crate::globals::{
    ConstructorDef, DefCore, FieldDef, FunctionDef, FunctionKind, Globals, Status,
};
use crate::source::{FileRange, StringId, StringInterner};
use crate::surface::{self, LocalId};

mod array;
mod class_ext;
mod coercion;
mod deferred;
mod equations;
mod instances;
mod levels;
mod literal;
mod reporting;
mod unification;

pub use deferred::{MetaCall, MetaOutcome, MetaResolver, Stage};
pub use equations::Cmp;
pub use literal::LiteralPolicy;
pub use reporting::{Message, MismatchDetail};

use class_ext::ImplItem;
use deferred::DeferredQueue;
use equations::Equations;
use instances::PendingInstance;
use levels::{LevelEnv, LevelSnapshot};

#[derive(Debug, Clone)]
struct LocalEntry {
    id: Option<LocalId>,
    binding: Binding,
}

/// Local environment.
///
/// This maps the local variables assigned by the name resolver to the
/// bindings that they were elaborated to. Entries are pushed as binders are
/// entered, and truncated as they are left. The environment is persistent, so
/// that inference variables and deferred meta calls can capture the scope
/// they were created in without copying it.
#[derive(Debug, Clone, Default)]
pub struct LocalEnv {
    entries: SharedEnv<LocalEntry>,
}

impl LocalEnv {
    pub fn new() -> LocalEnv {
        LocalEnv::default()
    }

    pub fn len(&self) -> EnvLen {
        self.entries.len()
    }

    pub fn push(&mut self, id: Option<LocalId>, binding: Binding) {
        self.entries.push(LocalEntry { id, binding });
    }

    pub fn pop(&mut self) {
        self.entries.pop();
    }

    pub fn truncate(&mut self, len: EnvLen) {
        self.entries.truncate(len);
    }

    /// Lookup the innermost binding of a local variable.
    pub fn lookup(&self, id: LocalId) -> Option<&Binding> {
        (self.entries.iter().rev())
            .find(|entry| entry.id == Some(id))
            .map(|entry| &entry.binding)
    }

    pub fn contains(&self, binding: &Binding) -> bool {
        self.entries.iter().any(|entry| &entry.binding == binding)
    }
}

/// The reason why an inference variable was inserted.
#[derive(Debug, Copy, Clone)]
pub enum MetaSource {
    /// An implicit argument, named after the parameter it was inserted for.
    ImplicitArg(FileRange, Option<StringId>),
    /// The type of a parameter without an annotation.
    ParamType(FileRange),
    /// The result type of a function that was applied before its type was
    /// known.
    ResultType(FileRange),
    HoleExpr(FileRange),
    HoleType(FileRange),
    /// An instance of a class, to be found by instance search.
    InstanceArg(FileRange, DefId),
    ArrayElemType(FileRange),
    CaseResultType(FileRange),
    /// The result of a deferred meta call.
    MetaCall(FileRange, DefId),
    MetaCallType(FileRange, DefId),
    /// The type of a reported error.
    ReportedErrorType(FileRange),
}

impl MetaSource {
    pub fn range(&self) -> FileRange {
        match self {
            MetaSource::ImplicitArg(range, _)
            | MetaSource::ParamType(range)
            | MetaSource::ResultType(range)
            | MetaSource::HoleExpr(range)
            | MetaSource::HoleType(range)
            | MetaSource::InstanceArg(range, _)
            | MetaSource::ArrayElemType(range)
            | MetaSource::CaseResultType(range)
            | MetaSource::MetaCall(range, _)
            | MetaSource::MetaCallType(range, _)
            | MetaSource::ReportedErrorType(range) => *range,
        }
    }
}

/// A snapshot of the inference variables, used for backtracking.
#[derive(Debug, Copy, Clone)]
struct MetaSnapshot {
    vars: EnvLen,
    solved: usize,
}

/// Inference variable environment.
///
/// Each variable records the scope it was created in: its solution may only
/// refer to the local bindings in that scope.
pub struct MetaEnv {
    /// The source of inserted variables, used when reporting [unsolved
    /// variables][Message::UnsolvedMeta].
    sources: UniqueEnv<MetaSource>,
    types: UniqueEnv<ArcTerm>,
    scopes: UniqueEnv<LocalEnv>,
    /// Set to [`Some`] once a solution is found during [`unification`].
    solutions: UniqueEnv<Option<ArcTerm>>,
    /// Variables in the order that they were solved in.
    solve_log: Vec<MetaVar>,
}

impl MetaEnv {
    fn new() -> MetaEnv {
        MetaEnv {
            sources: UniqueEnv::new(),
            types: UniqueEnv::new(),
            scopes: UniqueEnv::new(),
            solutions: UniqueEnv::new(),
            solve_log: Vec::new(),
        }
    }

    fn push(&mut self, source: MetaSource, r#type: ArcTerm, scope: LocalEnv) -> MetaVar {
        let var = MetaVar::new(self.solutions.len().next_index());
        self.sources.push(source);
        self.types.push(r#type);
        self.scopes.push(scope);
        self.solutions.push(None);
        var
    }

    pub fn solve(&mut self, var: MetaVar, solution: ArcTerm) {
        self.solutions.set(var.index(), Some(solution));
        self.solve_log.push(var);
    }

    pub fn solution(&self, var: MetaVar) -> Option<&ArcTerm> {
        self.solutions.get(var.index())?.as_ref()
    }

    pub fn scope(&self, var: MetaVar) -> Option<&LocalEnv> {
        self.scopes.get(var.index())
    }

    pub fn r#type(&self, var: MetaVar) -> Option<&ArcTerm> {
        self.types.get(var.index())
    }

    pub fn source(&self, var: MetaVar) -> Option<MetaSource> {
        self.sources.get(var.index()).copied()
    }

    /// The number of solutions found so far, used to detect progress.
    pub fn solved_count(&self) -> usize {
        self.solve_log.len()
    }

    fn snapshot(&self) -> MetaSnapshot {
        MetaSnapshot {
            vars: self.solutions.len(),
            solved: self.solve_log.len(),
        }
    }

    fn rollback(&mut self, snapshot: MetaSnapshot) {
        for var in self.solve_log.drain(snapshot.solved..) {
            if var.index() < snapshot.vars.next_index() {
                self.solutions.set(var.index(), None);
            }
        }
        self.sources.truncate(snapshot.vars);
        self.types.truncate(snapshot.vars);
        self.scopes.truncate(snapshot.vars);
        self.solutions.truncate(snapshot.vars);
    }

    fn unsolved(&self) -> Vec<MetaVar> {
        (self.solutions.iter().enumerate())
            .filter(|(_, solution)| solution.is_none())
            .map(|(index, _)| MetaVar::new(index))
            .collect()
    }
}

/// The inference state of the definition being elaborated.
pub struct Inference {
    metas: MetaEnv,
    levels: LevelEnv,
}

impl Inference {
    fn new(params: LevelParams, config: &Config) -> Inference {
        Inference {
            metas: MetaEnv::new(),
            levels: LevelEnv::new(params, config.level_iteration_bound),
        }
    }
}

impl Solutions for Inference {
    fn meta_solution(&self, var: MetaVar) -> Option<&ArcTerm> {
        self.metas.solution(var)
    }

    fn meta_type(&self, var: MetaVar) -> Option<&ArcTerm> {
        self.metas.r#type(var)
    }

    fn level_solution(&self, var: LevelInferVar) -> Option<Level> {
        self.levels.solution(var)
    }
}

/// Per-session elaboration options.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pull in the defaults of unimplemented fields when creating instances.
    pub use_defaults: bool,
    /// Use the lowest level for omitted universe levels in definitions that
    /// are not level polymorphic.
    pub degenerate_universes: bool,
    /// Rounds of raising allowed per level variable before the level solver
    /// reports a cycle.
    pub level_iteration_bound: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            use_defaults: true,
            degenerate_universes: true,
            level_iteration_bound: 16,
        }
    }
}

/// A flag shared with the caller, polled during elaboration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Elaboration was cancelled before it completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cancelled;

/// The elaborated form of a definition.
#[derive(Debug, Clone)]
pub struct ElaboratedDefinition {
    pub core: DefCore,
    pub status: Status,
    /// `false` if the parameters or result type could not be elaborated.
    pub header_ok: bool,
}

/// A snapshot of the elaboration state, for backtracking.
struct SavedState {
    metas: MetaSnapshot,
    levels: LevelSnapshot,
    equations: usize,
    deferred: usize,
    instances: usize,
    messages: usize,
    local_env: EnvLen,
}

/// Elaboration context.
pub struct Context<'interner, 'globals> {
    /// Global string interner.
    interner: &'interner RefCell<StringInterner>,
    /// Definitions that have already been typechecked.
    globals: &'globals Globals,
    config: Config,
    literal_policy: Option<Arc<dyn LiteralPolicy>>,
    cancellation: CancellationToken,
    /// The definition being elaborated, if any.
    current_def: Option<DefId>,
    local_env: LocalEnv,
    inference: Inference,
    equations: Equations,
    deferred: DeferredQueue,
    /// Instance arguments whose types were not known well enough to search
    /// for an instance when they were inserted.
    pending_instances: Vec<PendingInstance>,
    /// Diagnostic messages encountered during elaboration.
    messages: Vec<Message>,
}

impl<'interner, 'globals> Context<'interner, 'globals> {
    pub fn new(
        interner: &'interner RefCell<StringInterner>,
        globals: &'globals Globals,
    ) -> Context<'interner, 'globals> {
        let config = Config::default();
        Context {
            interner,
            globals,
            inference: Inference::new(LevelParams::none(), &config),
            config,
            literal_policy: None,
            cancellation: CancellationToken::new(),
            current_def: None,
            local_env: LocalEnv::new(),
            equations: Equations::new(),
            deferred: DeferredQueue::new(),
            pending_instances: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn set_literal_policy(&mut self, policy: Arc<dyn LiteralPolicy>) {
        self.literal_policy = Some(policy);
    }

    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    pub fn globals(&self) -> &'globals Globals {
        self.globals
    }

    pub fn interner(&self) -> &'interner RefCell<StringInterner> {
        self.interner
    }

    /// Start elaborating a new definition, discarding the inference state
    /// of the previous one.
    pub fn reset(&mut self, def: Option<DefId>) {
        let params = match def {
            Some(def) => self.globals.levels(def).clone(),
            None => LevelParams::none(),
        };
        self.current_def = def;
        self.local_env = LocalEnv::new();
        self.inference = Inference::new(params, &self.config);
        self.equations = Equations::new();
        self.deferred = DeferredQueue::new();
        self.pending_instances.clear();
    }

    fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Report an error on behalf of a meta definition.
    pub fn report_error(&mut self, range: FileRange, message: impl Into<String>) {
        self.push_message(Message::MetaError {
            range,
            message: message.into(),
        });
    }

    pub fn drain_messages(&mut self) -> impl '_ + Iterator<Item = Message> {
        self.messages.drain(..)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    fn eval(&self) -> EvalContext<'_> {
        EvalContext::new(self.globals, &self.inference)
    }

    pub fn whnf(&self, term: &ArcTerm) -> ArcTerm {
        self.eval().whnf(term)
    }

    pub fn type_of(&self, term: &ArcTerm) -> ArcTerm {
        self.eval().type_of(term)
    }

    /// Replace the solved inference variables in a term with their solutions.
    pub fn zonk(&self, term: &ArcTerm) -> ArcTerm {
        self.eval().zonk(term)
    }

    fn pretty(&self, term: &ArcTerm) -> String {
        let term = self.zonk(term);
        let doc = core::pretty::Context::new(self.interner, self.globals).term(&term);
        doc.pretty(usize::MAX).to_string()
    }

    fn pretty_level(&self, level: &Level) -> String {
        let level = self.inference.levels.zonk(level);
        let doc = core::pretty::Context::new(self.interner, self.globals).level(&level);
        doc.pretty(usize::MAX).to_string()
    }

    fn push_meta(&mut self, source: MetaSource, r#type: ArcTerm) -> ArcTerm {
        let var = (self.inference.metas).push(source, r#type, self.local_env.clone());
        Arc::new(Term::Meta(var))
    }

    /// An inference variable standing for a type in a fresh universe.
    fn push_type_meta(&mut self, source: MetaSource) -> (ArcTerm, Sort) {
        let sort = self.fresh_sort();
        (self.push_meta(source, Term::universe(sort)), sort)
    }

    fn synth_reported_error(&mut self, range: FileRange) -> (ArcTerm, ArcTerm) {
        let r#type = self.push_meta(MetaSource::ReportedErrorType(range), Term::universe(Sort::OMEGA));
        (Term::error(Some(r#type.clone())), r#type)
    }

    /// Compare two terms, solving inference variables along the way.
    fn unify(
        &mut self,
        range: FileRange,
        lhs: &ArcTerm,
        rhs: &ArcTerm,
        cmp: Cmp,
    ) -> Result<(), unification::Error> {
        let mut context =
            unification::Context::new(self.globals, &mut self.inference, &mut self.equations, range);
        context.compare(lhs, rhs, cmp)
    }

    fn report_unification_error(
        &mut self,
        range: FileRange,
        found: &ArcTerm,
        expected: &ArcTerm,
        error: unification::Error,
    ) {
        let detail = match error {
            unification::Error::Mismatch(lhs, rhs) => MismatchDetail::Subterms {
                lhs: self.pretty(&lhs),
                rhs: self.pretty(&rhs),
            },
            unification::Error::LevelMismatch(lhs, rhs) => MismatchDetail::Levels {
                lhs: self.pretty_level(&lhs),
                rhs: self.pretty_level(&rhs),
            },
            unification::Error::EscapingBinding(_, binding) => MismatchDetail::EscapingBinding {
                name: binding.name(),
            },
            unification::Error::InfiniteSolution(_) => MismatchDetail::InfiniteSolution,
        };
        self.push_message(Message::FailedToUnify {
            range,
            expected: self.pretty(expected),
            found: self.pretty(found),
            detail: Some(detail),
        });
    }

    fn save_state(&self) -> SavedState {
        SavedState {
            metas: self.inference.metas.snapshot(),
            levels: self.inference.levels.snapshot(),
            equations: self.equations.len(),
            deferred: self.deferred.len(),
            instances: self.pending_instances.len(),
            messages: self.messages.len(),
            local_env: self.local_env.len(),
        }
    }

    fn restore_state(&mut self, state: SavedState) {
        self.inference.metas.rollback(state.metas);
        self.inference.levels.rollback(state.levels);
        self.equations.truncate(state.equations);
        self.deferred.truncate(state.deferred);
        self.pending_instances.truncate(state.instances);
        self.messages.truncate(state.messages);
        self.local_env.truncate(state.local_env);
    }

    /// Try an alternative, keeping its effects only if it succeeds without
    /// reporting any errors.
    fn attempt<T>(&mut self, alternative: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        let state = self.save_state();
        match alternative(self) {
            Some(result) if !self.messages[state.messages..].iter().any(Message::is_error) => {
                Some(result)
            }
            _ => {
                self.restore_state(state);
                None
            }
        }
    }

    /// The sort of a type, falling back to the lowest universe of sets when
    /// the type is erroneous.
    fn sort_of_type(&self, r#type: &ArcTerm) -> Sort {
        self.eval().sort_of(r#type).unwrap_or(Sort::SET0)
    }

    /// Elaborate a term that is expected to be a type.
    fn check_type(&mut self, term: &surface::Term) -> (ArcTerm, Sort) {
        let range = term.range();
        let (core_term, r#type) = self.synth(term);
        let type_whnf = self.whnf(&r#type);
        match type_whnf.as_ref() {
            Term::Universe(sort) => (core_term, *sort),
            Term::Error(_) => (core_term, Sort::SET0),
            Term::Meta(_) => {
                let sort = self.fresh_sort();
                let universe = Term::universe(sort);
                match self.unify(range, &r#type, &universe, Cmp::Le) {
                    Ok(()) => (core_term, sort),
                    Err(error) => {
                        self.report_unification_error(range, &r#type, &universe, error);
                        (Term::error(None), Sort::SET0)
                    }
                }
            }
            _ => {
                let found = self.pretty(&r#type);
                self.push_message(Message::NotAType { range, found });
                (Term::error(None), Sort::SET0)
            }
        }
    }

    /// Elaborate a telescope of parameters, pushing their bindings onto the
    /// local environment.
    fn elab_params(&mut self, params: &[surface::Param]) -> Vec<(core::Param, Sort)> {
        params.iter().map(|param| self.elab_param(param)).collect()
    }

    fn elab_param(&mut self, param: &surface::Param) -> (core::Param, Sort) {
        let (r#type, sort) = match &param.r#type {
            Some(r#type) => self.check_type(r#type),
            None => self.push_type_meta(MetaSource::ParamType(param.range)),
        };
        let binding = Binding::new(param.name, r#type);
        self.local_env.push(param.id, binding.clone());
        (core::Param::new(param.plicity, binding), sort)
    }

    /// Returns the meta definition at the head of a term, along with its
    /// arguments.
    fn meta_call_head<'term>(
        &self,
        term: &'term surface::Term,
    ) -> Option<(FileRange, DefId, &'term [surface::Arg])> {
        let (range, def, args) = match term {
            surface::Term::Global(range, def, _) => (*range, *def, &[][..]),
            surface::Term::App(range, head, args) => match head.as_ref() {
                surface::Term::Global(_, def, _) => (*range, *def, args.as_slice()),
                _ => return None,
            },
            _ => return None,
        };
        matches!(self.globals.core(def), Some(DefCore::Meta(_))).then_some((range, def, args))
    }

    /// Check that a surface term is an element of a type.
    pub fn check(&mut self, term: &surface::Term, expected_type: &ArcTerm) -> ArcTerm {
        if self.is_cancelled() {
            return Term::error(Some(expected_type.clone()));
        }

        let expected_whnf = self.whnf(expected_type);

        match (term, expected_whnf.as_ref()) {
            (_, Term::Error(_)) => self.synth(term).0,
            (surface::Term::Lam(range, params, body), _) => {
                self.check_lam(*range, params, body, expected_type)
            }
            (surface::Term::Tuple(range, fields), Term::Sigma(_, bindings)) => {
                if fields.len() != bindings.len() {
                    self.push_message(Message::MismatchedTupleLength {
                        range: *range,
                        expected_len: bindings.len(),
                        found_len: fields.len(),
                    });
                    return Term::error(Some(expected_type.clone()));
                }

                let mut subst = Substitution::new();
                let mut values = Vec::with_capacity(fields.len());
                for (field, binding) in Iterator::zip(fields.iter(), bindings.iter()) {
                    let r#type = subst.apply(binding.r#type());
                    let value = self.check(field, &r#type);
                    subst.insert(binding, value.clone());
                    values.push(value);
                }
                Arc::new(Term::Tuple(values, expected_whnf.clone()))
            }
            (surface::Term::Let(range, clauses, body), _) => {
                self.elab_let(*range, clauses, body, Some(expected_type)).0
            }
            (surface::Term::Case(range, scrutinee, return_type, clauses), _) => {
                let return_type = return_type.as_deref();
                let (term, r#type) =
                    self.elab_case(*range, scrutinee, return_type, clauses, Some(expected_type));
                match return_type {
                    Some(_) => self.check_result(*range, term, &r#type, expected_type),
                    None => term,
                }
            }
            (surface::Term::Hole(range), _) => {
                self.push_meta(MetaSource::HoleExpr(*range), expected_type.clone())
            }
            (surface::Term::Goal(range, name), _) => {
                let expected_type = self.zonk(expected_type);
                self.push_message(Message::Goal {
                    range: *range,
                    name: *name,
                    expected_type: Some(self.pretty(&expected_type)),
                });
                Term::error(Some(expected_type))
            }
            (surface::Term::ClassExt(range, is_new, base, impls), _) => {
                self.check_class_ext(*range, *is_new, base, impls, expected_type)
            }
            (surface::Term::New(range, base), _) => {
                self.check_class_ext(*range, true, base, &[], expected_type)
            }
            (surface::Term::Array(range, elems), _) => {
                self.check_array(*range, elems, expected_type)
            }
            (surface::Term::NumberLiteral(range, text), _) => {
                self.check_number_literal(*range, *text, expected_type)
            }
            (surface::Term::StringLiteral(range, text), _) => {
                self.check_string_literal(*range, *text, expected_type)
            }
            (surface::Term::ReportedError(_), _) => Term::error(Some(expected_type.clone())),
            (_, _) => {
                if let Some((range, def, args)) = self.meta_call_head(term) {
                    return self.elab_meta_call(range, def, args, Some(expected_type)).0;
                }

                let range = term.range();
                let (term, r#type) = self.synth(term);
                let (term, r#type) = self.insert_tail_implicits(range, term, r#type, expected_type);
                self.check_result(range, term, &r#type, expected_type)
            }
        }
    }

    /// Synthesize the type of a surface term.
    pub fn synth(&mut self, term: &surface::Term) -> (ArcTerm, ArcTerm) {
        if self.is_cancelled() {
            return (Term::error(None), Term::error(None));
        }

        match term {
            surface::Term::Local(range, id) => match self.local_env.lookup(*id) {
                Some(binding) => (binding.to_term(), binding.r#type().clone()),
                None => {
                    self.push_message(Message::UnboundLocal { range: *range });
                    self.synth_reported_error(*range)
                }
            },
            surface::Term::Global(range, def, levels) => {
                self.synth_global(*range, *def, levels.as_ref(), &[], None)
            }
            surface::Term::App(range, head, args) => match head.as_ref() {
                surface::Term::Global(_, def, levels) => {
                    self.synth_global(*range, *def, levels.as_ref(), args, None)
                }
                _ => {
                    let head_range = head.range();
                    let (head, head_type) = self.synth(head);
                    self.apply_args(*range, head_range, head, head_type, args)
                }
            },
            surface::Term::Lam(range, params, body) => self.synth_lam(*range, params, body),
            surface::Term::Pi(range, params, body) => {
                let initial_len = self.local_env.len();
                let params = self.elab_params(params);
                let (body, body_sort) = self.check_type(body);
                self.local_env.truncate(initial_len);

                let (mut pi, mut sort) = (body, body_sort);
                for (param, domain_sort) in params.into_iter().rev() {
                    sort = self.pi_sort(*range, &domain_sort, &sort);
                    pi = Arc::new(Term::Pi(sort, param.plicity, param.binding, pi));
                }
                (pi, Term::universe(sort))
            }
            surface::Term::Sigma(range, params) => {
                let initial_len = self.local_env.len();
                let params = self.elab_params(params);
                self.local_env.truncate(initial_len);

                let sorts: Vec<_> = params.iter().map(|(_, sort)| *sort).collect();
                let sort = self.generate_upper_bound(*range, &sorts);
                let bindings = params.into_iter().map(|(param, _)| param.binding).collect();
                (Arc::new(Term::Sigma(sort, bindings)), Term::universe(sort))
            }
            surface::Term::Tuple(range, fields) => {
                let mut values = Vec::with_capacity(fields.len());
                let mut bindings = Vec::with_capacity(fields.len());
                let mut sorts = Vec::with_capacity(fields.len());
                for field in fields {
                    let (value, r#type) = self.synth(field);
                    sorts.push(self.sort_of_type(&r#type));
                    bindings.push(Binding::new(None, r#type));
                    values.push(value);
                }
                let sort = self.generate_upper_bound(*range, &sorts);
                let r#type = Arc::new(Term::Sigma(sort, bindings));
                (Arc::new(Term::Tuple(values, r#type.clone())), r#type)
            }
            surface::Term::Proj(range, tuple, index) => {
                let (tuple, tuple_type) = self.synth(tuple);
                let type_whnf = self.whnf(&tuple_type);
                match type_whnf.as_ref() {
                    Term::Sigma(_, bindings) if *index < bindings.len() => {
                        let mut subst = Substitution::new();
                        for (i, binding) in bindings[..*index].iter().enumerate() {
                            subst.insert(binding, Arc::new(Term::Proj(tuple.clone(), i)));
                        }
                        let r#type = subst.apply(bindings[*index].r#type());
                        (Arc::new(Term::Proj(tuple, *index)), r#type)
                    }
                    Term::Sigma(_, bindings) => {
                        self.push_message(Message::ProjectionOutOfRange {
                            range: *range,
                            index: *index,
                            len: bindings.len(),
                        });
                        self.synth_reported_error(*range)
                    }
                    Term::Error(_) => self.synth_reported_error(*range),
                    _ => {
                        let found = self.pretty(&tuple_type);
                        self.push_message(Message::NotASigma {
                            range: *range,
                            found,
                        });
                        self.synth_reported_error(*range)
                    }
                }
            }
            surface::Term::FieldAccess(range, instance, field) => {
                self.synth_field_access(*range, instance, *field)
            }
            surface::Term::Universe(_, kind, p, h) => {
                let sort = self.elab_universe(*kind, p.as_ref(), h.as_ref());
                (Term::universe(sort), Term::universe(sort.succ()))
            }
            surface::Term::Hole(range) => {
                let (r#type, _) = self.push_type_meta(MetaSource::HoleType(*range));
                let term = self.push_meta(MetaSource::HoleExpr(*range), r#type.clone());
                (term, r#type)
            }
            surface::Term::Goal(range, name) => {
                self.push_message(Message::Goal {
                    range: *range,
                    name: *name,
                    expected_type: None,
                });
                self.synth_reported_error(*range)
            }
            surface::Term::Ann(_, term, r#type) => {
                let (r#type, _) = self.check_type(r#type);
                let term = self.check(term, &r#type);
                (term, r#type)
            }
            surface::Term::Let(range, clauses, body) => self.elab_let(*range, clauses, body, None),
            surface::Term::Case(range, scrutinee, return_type, clauses) => {
                self.elab_case(*range, scrutinee, return_type.as_deref(), clauses, None)
            }
            surface::Term::ClassExt(range, is_new, base, impls) => {
                match self.elab_class_base(base) {
                    Some(base) => {
                        let items = impls.iter().map(ImplItem::from_surface).collect();
                        self.typecheck_class_ext(*range, base, items, *is_new, &[], None)
                    }
                    None => self.synth_reported_error(*range),
                }
            }
            surface::Term::New(range, class) => match self.elab_class_base(class) {
                Some(base) => self.typecheck_class_ext(*range, base, Vec::new(), true, &[], None),
                None => self.synth_reported_error(*range),
            },
            surface::Term::Array(range, elems) => self.synth_array(*range, elems),
            surface::Term::NumberLiteral(range, text) => self.synth_number_literal(*range, *text),
            surface::Term::StringLiteral(range, text) => self.synth_string_literal(*range, *text),
            surface::Term::ReportedError(range) => self.synth_reported_error(*range),
        }
    }

    fn synth_lam(
        &mut self,
        range: FileRange,
        params: &[surface::Param],
        body: &surface::Term,
    ) -> (ArcTerm, ArcTerm) {
        let initial_len = self.local_env.len();
        let params = self.elab_params(params);
        let (body, body_type) = self.synth(body);
        let body_sort = self.sort_of_type(&body_type);
        self.local_env.truncate(initial_len);

        let (mut term, mut r#type, mut sort) = (body, body_type, body_sort);
        for (param, domain_sort) in params.into_iter().rev() {
            sort = self.pi_sort(range, &domain_sort, &sort);
            term = Arc::new(Term::Lam(param.plicity, param.binding.clone(), term));
            r#type = Arc::new(Term::Pi(sort, param.plicity, param.binding, r#type));
        }
        (term, r#type)
    }

    /// Check a lambda against an expected type, inserting implicit lambdas
    /// and abstracting over the interval when a path is expected.
    fn check_lam(
        &mut self,
        range: FileRange,
        params: &[surface::Param],
        body: &surface::Term,
        expected_type: &ArcTerm,
    ) -> ArcTerm {
        let (param, rest) = match params.split_first() {
            Some(split) => split,
            None => return self.check(body, expected_type),
        };
        let globals = self.globals;
        let prelude = globals.prelude();
        let expected_whnf = self.whnf(expected_type);

        match expected_whnf.as_ref() {
            Term::Pi(_, plicity, binding, codomain) if *plicity == param.plicity => {
                let r#type = match &param.r#type {
                    Some(r#type) => {
                        let (r#type, _) = self.check_type(r#type);
                        if let Err(error) = self.unify(param.range, binding.r#type(), &r#type, Cmp::Le) {
                            self.report_unification_error(param.range, &r#type, binding.r#type(), error);
                        }
                        r#type
                    }
                    None => binding.r#type().clone(),
                };
                let param_binding = Binding::new(param.name, r#type);
                let codomain = semantics::subst1(codomain, binding, param_binding.to_term());

                self.local_env.push(param.id, param_binding.clone());
                let body = self.check_lam(range, rest, body, &codomain);
                self.local_env.pop();

                Arc::new(Term::Lam(param.plicity, param_binding, body))
            }
            Term::Pi(_, Plicity::Implicit, binding, codomain) => {
                let param_binding = binding.with_type(binding.r#type().clone());
                let codomain = semantics::subst1(codomain, binding, param_binding.to_term());

                self.local_env.push(None, param_binding.clone());
                let body = self.check_lam(range, params, body, &codomain);
                self.local_env.pop();

                Arc::new(Term::Lam(Plicity::Implicit, param_binding, body))
            }
            Term::DataCall(data, levels, path_args)
                if *data == prelude.path && path_args.len() == 3 && param.plicity.is_explicit() =>
            {
                let interval = prim::data_call(prelude.interval);
                if let Some(r#type) = &param.r#type {
                    let (r#type, _) = self.check_type(r#type);
                    if let Err(error) = self.unify(param.range, &r#type, &interval, Cmp::Eq) {
                        self.report_unification_error(param.range, &r#type, &interval, error);
                    }
                }
                let param_binding = Binding::new(param.name, interval);
                let body_type = Term::app(path_args[0].clone(), param_binding.to_term());

                self.local_env.push(param.id, param_binding.clone());
                let body = self.check_lam(range, rest, body, &body_type);
                self.local_env.pop();

                let endpoints = [(prelude.left, &path_args[1]), (prelude.right, &path_args[2])];
                for (endpoint, expected_value) in endpoints {
                    let endpoint = prim::interval_endpoint(endpoint);
                    let value = semantics::subst1(&body, &param_binding, endpoint);
                    if let Err(error) = self.unify(range, &value, expected_value, Cmp::Eq) {
                        self.report_unification_error(range, &value, expected_value, error);
                    }
                }

                Arc::new(Term::PathLam(PathLam {
                    levels: levels.clone(),
                    line: path_args[0].clone(),
                    binding: param_binding,
                    body,
                }))
            }
            _ => {
                let (term, r#type) = self.synth_lam(range, params, body);
                self.check_result(range, term, &r#type, expected_type)
            }
        }
    }

    /// Elaborate a reference to a global definition, applied to some
    /// arguments.
    fn synth_global(
        &mut self,
        range: FileRange,
        def: DefId,
        levels: Option<&surface::LevelArgs>,
        args: &[surface::Arg],
        expected_type: Option<&ArcTerm>,
    ) -> (ArcTerm, ArcTerm) {
        let globals = self.globals;
        let definition = globals.get(def);
        let checked = match definition.typechecked() {
            Some(checked) if checked.header_ok => checked,
            Some(_) => {
                self.push_message(Message::ReferenceToErroneousDefinition {
                    range,
                    name: definition.name,
                });
                return self.synth_reported_error(range);
            }
            None => {
                self.push_message(Message::DefinitionNotTypechecked {
                    range,
                    name: definition.name,
                });
                return self.synth_reported_error(range);
            }
        };

        match &checked.core {
            DefCore::Meta(_) => self.elab_meta_call(range, def, args, expected_type),
            DefCore::Function(function) => {
                let levels = self.instantiate_levels(range, def, levels);
                self.synth_call(range, &function.params, &levels.clone(), args, |values, subst| {
                    let r#type = subst.apply(&function.result_type);
                    (Arc::new(Term::FunCall(def, levels, values)), r#type)
                })
            }
            DefCore::Data(data) => {
                let levels = self.instantiate_levels(range, def, levels);
                let sort = data.sort.subst(&|var| levels.get(var));
                self.synth_call(range, &data.params, &levels.clone(), args, |values, _| {
                    (Arc::new(Term::DataCall(def, levels, values)), Term::universe(sort))
                })
            }
            DefCore::Constructor(con) => {
                let data_params = match globals.data(con.data) {
                    Some(data) => data.params.as_slice(),
                    None => &[],
                };
                let data_len = data_params.len();
                let params: Vec<_> = (data_params.iter())
                    .map(|param| core::Param::implicit(param.binding.clone()))
                    .chain(con.params.iter().cloned())
                    .collect();
                let levels = self.instantiate_levels(range, def, levels);
                self.synth_call(range, &params, &levels.clone(), args, |mut values, _| {
                    let args = values.split_off(data_len);
                    let r#type = Arc::new(Term::DataCall(con.data, levels.clone(), values.clone()));
                    let con_call = ConCall {
                        con: def,
                        levels,
                        data_args: values,
                        args,
                    };
                    (Arc::new(Term::ConCall(con_call)), r#type)
                })
            }
            DefCore::Field(field) => {
                let levels = self.instantiate_levels(range, def, levels);
                let params = [core::Param::explicit(field.this.clone())];
                self.synth_call(range, &params, &levels, args, |values, subst| {
                    let instance = match values.into_iter().next() {
                        Some(instance) => instance,
                        None => Term::error(None),
                    };
                    let r#type = subst.apply(&field.r#type);
                    (Arc::new(Term::FieldCall(def, instance)), r#type)
                })
            }
            DefCore::Class(_) => {
                let levels = self.instantiate_levels(range, def, levels);
                let base = self.class_call_of(def, levels);
                let (items, rest) = self.positional_impls(&base, args);
                let (term, r#type) = self.typecheck_class_ext(range, base, items, false, &[], None);
                self.apply_args(range, range, term, r#type, rest)
            }
        }
    }

    /// Elaborate the arguments of a call against the parameters of the
    /// definition being called.
    ///
    /// Implicit parameters without a matching argument are filled in with
    /// inference variables, and missing explicit arguments are abstracted
    /// over, producing a lambda. Arguments left over after the parameters
    /// are applied to the result.
    fn synth_call(
        &mut self,
        range: FileRange,
        params: &[core::Param],
        levels: &LevelArgs,
        args: &[surface::Arg],
        build: impl FnOnce(Vec<ArcTerm>, &mut Substitution<'_>) -> (ArcTerm, ArcTerm),
    ) -> (ArcTerm, ArcTerm) {
        let initial_len = self.local_env.len();
        let mut subst = Substitution::with_levels(levels.clone());
        let mut values = Vec::with_capacity(params.len());
        let mut abstracted = Vec::new();
        let mut next_arg = 0;

        for param in params {
            let r#type = subst.apply(param.binding.r#type());

            while let Some(arg) = args.get(next_arg) {
                if !param.plicity.is_explicit() || arg.plicity.is_explicit() {
                    break;
                }
                let arg_range = arg.term.range();
                self.push_message(Message::UnexpectedImplicitArgument { arg_range });
                next_arg += 1;
            }

            let value = match args.get(next_arg) {
                Some(arg) if arg.plicity == param.plicity => {
                    next_arg += 1;
                    self.check(&arg.term, &r#type)
                }
                _ if !param.plicity.is_explicit() => {
                    self.insert_implicit(range, param.binding.name(), &r#type)
                }
                _ => {
                    let binding = param.binding.with_type(r#type);
                    self.local_env.push(None, binding.clone());
                    abstracted.push(binding.clone());
                    binding.to_term()
                }
            };
            subst.insert(&param.binding, value.clone());
            values.push(value);
        }

        let (mut term, mut r#type) = build(values, &mut subst);
        if !abstracted.is_empty() {
            let mut sort = self.sort_of_type(&r#type);
            for binding in abstracted.into_iter().rev() {
                let domain_sort = self.sort_of_type(binding.r#type());
                sort = self.pi_sort(range, &domain_sort, &sort);
                term = Arc::new(Term::Lam(Plicity::Explicit, binding.clone(), term));
                r#type = Arc::new(Term::Pi(sort, Plicity::Explicit, binding, r#type));
            }
        }
        self.local_env.truncate(initial_len);

        self.apply_args(range, range, term, r#type, &args[next_arg..])
    }

    /// Apply a term to arguments, using its type to guide elaboration.
    fn apply_args(
        &mut self,
        range: FileRange,
        head_range: FileRange,
        mut term: ArcTerm,
        mut r#type: ArcTerm,
        args: &[surface::Arg],
    ) -> (ArcTerm, ArcTerm) {
        let globals = self.globals;
        let prelude = globals.prelude();

        for arg in args {
            let arg_range = arg.term.range();
            loop {
                let type_whnf = self.whnf(&r#type);
                match type_whnf.as_ref() {
                    Term::Pi(_, Plicity::Implicit, binding, codomain) if arg.plicity.is_explicit() => {
                        let value = self.insert_implicit(arg_range, binding.name(), binding.r#type());
                        term = Term::app(term, value.clone());
                        r#type = semantics::subst1(codomain, binding, value);
                    }
                    Term::Pi(_, plicity, binding, codomain) if *plicity == arg.plicity => {
                        let value = self.check(&arg.term, binding.r#type());
                        term = Term::app(term, value.clone());
                        r#type = semantics::subst1(codomain, binding, value);
                        break;
                    }
                    Term::Pi(..) => {
                        self.push_message(Message::UnexpectedImplicitArgument { arg_range });
                        break;
                    }
                    // Paths can be applied to points of the interval
                    Term::DataCall(data, _, path_args)
                        if *data == prelude.path
                            && path_args.len() == 3
                            && arg.plicity.is_explicit() =>
                    {
                        let interval = prim::data_call(prelude.interval);
                        let point = self.check(&arg.term, &interval);
                        term = Arc::new(Term::At(term, point.clone()));
                        r#type = Term::app(path_args[0].clone(), point);
                        break;
                    }
                    Term::Meta(_) => {
                        let pi_type = self.fresh_function_type(arg_range, arg.plicity);
                        if let Err(error) = self.unify(head_range, &r#type, &pi_type, Cmp::Eq) {
                            self.report_unification_error(head_range, &r#type, &pi_type, error);
                            return self.synth_reported_error(range);
                        }
                        r#type = pi_type;
                    }
                    Term::Error(_) => {
                        self.synth(&arg.term);
                        term = Term::error(Some(r#type.clone()));
                        break;
                    }
                    _ => {
                        let head_type = self.pretty(&r#type);
                        self.push_message(Message::UnexpectedArgument {
                            head_range,
                            head_type,
                            arg_range,
                        });
                        return self.synth_reported_error(range);
                    }
                }
            }
        }

        (term, r#type)
    }

    /// A non-dependent function type with unknown domain and codomain.
    fn fresh_function_type(&mut self, range: FileRange, plicity: Plicity) -> ArcTerm {
        let (domain, domain_sort) = self.push_type_meta(MetaSource::ParamType(range));
        let (codomain, codomain_sort) = self.push_type_meta(MetaSource::ResultType(range));
        let sort = self.pi_sort(range, &domain_sort, &codomain_sort);
        Arc::new(Term::Pi(sort, plicity, Binding::new(None, domain), codomain))
    }

    /// Insert implicit arguments at the end of an application, unless an
    /// implicit function is expected.
    fn insert_tail_implicits(
        &mut self,
        range: FileRange,
        mut term: ArcTerm,
        mut r#type: ArcTerm,
        expected_type: &ArcTerm,
    ) -> (ArcTerm, ArcTerm) {
        if matches!(self.whnf(expected_type).as_ref(), Term::Pi(_, Plicity::Implicit, ..)) {
            return (term, r#type);
        }

        loop {
            let type_whnf = self.whnf(&r#type);
            match type_whnf.as_ref() {
                Term::Pi(_, Plicity::Implicit, binding, codomain) => {
                    let value = self.insert_implicit(range, binding.name(), binding.r#type());
                    term = Term::app(term, value.clone());
                    r#type = semantics::subst1(codomain, binding, value);
                }
                _ => return (term, r#type),
            }
        }
    }

    fn synth_field_access(
        &mut self,
        range: FileRange,
        instance: &surface::Term,
        field: DefId,
    ) -> (ArcTerm, ArcTerm) {
        let globals = self.globals;
        let (instance, instance_type) = self.synth(instance);
        let type_whnf = self.whnf(&instance_type);

        match type_whnf.as_ref() {
            Term::ClassCall(class_call) => {
                let has_field = (globals.class(class_call.class))
                    .map_or(false, |class| class.has_field(field));
                if !has_field {
                    let suggestion = self.suggest_field(class_call.class, field);
                    self.push_message(Message::UnknownField {
                        range,
                        field: globals.name(field),
                        class: globals.name(class_call.class),
                        suggestion,
                    });
                    return self.synth_reported_error(range);
                }
                let r#type = self.field_type(field, &class_call.levels, &instance, None);
                (Arc::new(Term::FieldCall(field, instance)), r#type)
            }
            Term::Error(_) => self.synth_reported_error(range),
            _ => {
                let found = self.pretty(&instance_type);
                self.push_message(Message::NotAClass { range, found });
                self.synth_reported_error(range)
            }
        }
    }

    fn elab_let(
        &mut self,
        _range: FileRange,
        clauses: &[surface::LetClause],
        body: &surface::Term,
        expected_type: Option<&ArcTerm>,
    ) -> (ArcTerm, ArcTerm) {
        let initial_len = self.local_env.len();
        let mut defs = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let (def, r#type) = match &clause.r#type {
                Some(r#type) => {
                    let (r#type, _) = self.check_type(r#type);
                    (self.check(&clause.expr, &r#type), r#type)
                }
                None => self.synth(&clause.expr),
            };
            let binding = Binding::new(clause.name, r#type);
            self.local_env.push(Some(clause.id), binding.clone());
            defs.push((binding, def));
        }

        let (mut term, mut r#type) = match expected_type {
            Some(expected_type) => (self.check(body, expected_type), expected_type.clone()),
            None => self.synth(body),
        };
        self.local_env.truncate(initial_len);

        for (binding, def) in defs.into_iter().rev() {
            if expected_type.is_none() {
                r#type = semantics::subst1(&r#type, &binding, def.clone());
            }
            term = Arc::new(Term::Let(binding, def, term));
        }
        (term, r#type)
    }

    fn elab_case(
        &mut self,
        range: FileRange,
        scrutinee: &surface::Term,
        return_type: Option<&surface::Term>,
        clauses: &[surface::Clause],
        expected_type: Option<&ArcTerm>,
    ) -> (ArcTerm, ArcTerm) {
        let globals = self.globals;
        let (scrutinee, scrutinee_type) = self.synth(scrutinee);
        let scrutinee_whnf = self.whnf(&scrutinee_type);

        let result_type = match (return_type, expected_type) {
            (Some(r#type), _) => self.check_type(r#type).0,
            (None, Some(expected_type)) => expected_type.clone(),
            (None, None) => self.push_type_meta(MetaSource::CaseResultType(range)).0,
        };

        let (data, levels, data_args) = match scrutinee_whnf.as_ref() {
            Term::DataCall(data, levels, args) => (*data, levels, args),
            Term::Error(_) => return (Term::error(Some(result_type.clone())), result_type),
            _ => {
                let found = self.pretty(&scrutinee_type);
                self.push_message(Message::CaseNotData { range, found });
                return (Term::error(Some(result_type.clone())), result_type);
            }
        };
        let data_def = match globals.data(data) {
            Some(data_def) => data_def,
            None => return (Term::error(Some(result_type.clone())), result_type),
        };

        let mut branches = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let con = match globals.constructor(clause.con) {
                Some(con) if con.data == data => con,
                _ => {
                    self.push_message(Message::ConstructorMismatch {
                        range: clause.range,
                        con: globals.name(clause.con),
                        data: globals.name(data),
                    });
                    continue;
                }
            };
            if branches.iter().any(|branch: &core::Branch| branch.con == clause.con) {
                self.push_message(Message::DuplicateClause {
                    range: clause.range,
                    con: globals.name(clause.con),
                });
                continue;
            }
            if clause.vars.len() != con.params.len() {
                self.push_message(Message::PatternArity {
                    range: clause.range,
                    expected: con.params.len(),
                    found: clause.vars.len(),
                });
                continue;
            }

            let initial_len = self.local_env.len();
            let mut subst = Substitution::with_levels(levels.clone());
            for (param, arg) in Iterator::zip(data_def.params.iter(), data_args.iter()) {
                subst.insert(&param.binding, arg.clone());
            }
            let mut params = Vec::with_capacity(con.params.len());
            for (param, var) in Iterator::zip(con.params.iter(), clause.vars.iter()) {
                let r#type = subst.apply(param.binding.r#type());
                let binding = Binding::new(var.name.or_else(|| param.binding.name()), r#type);
                subst.insert(&param.binding, binding.to_term());
                self.local_env.push(var.id, binding.clone());
                params.push(binding);
            }
            let body = self.check(&clause.body, &result_type);
            self.local_env.truncate(initial_len);

            branches.push(core::Branch {
                con: clause.con,
                params,
                body,
            });
        }

        let missing: Vec<_> = (data_def.constructors.iter())
            .filter(|con| !branches.iter().any(|branch| branch.con == **con))
            .map(|con| globals.name(*con))
            .collect();
        if !missing.is_empty() {
            self.push_message(Message::MissingClauses {
                range,
                constructors: missing,
            });
        }

        let case = Term::Case(CaseTerm {
            scrutinee,
            result_type: result_type.clone(),
            branches,
        });
        (Arc::new(case), result_type)
    }

    /// Solve the pending constraints of the current definition, reporting
    /// any that remain.
    ///
    /// Every inference variable is solved afterwards: those that could not
    /// be inferred are reported once and replaced by error terms.
    pub fn finalize(&mut self) {
        self.solve_equations();
        self.resolve_pending_instances(false);
        self.drain_deferred(Stage::BeforeLevels);
        self.solve_equations();
        self.solve_levels();
        self.solve_equations();
        self.drain_deferred(Stage::AfterLevels);
        self.solve_equations();
        self.solve_levels();
        self.resolve_pending_instances(true);
        self.finalize_equations();
        self.report_unsolved_metas();
    }

    fn report_unsolved_metas(&mut self) {
        for var in self.inference.metas.unsolved() {
            let source = match self.inference.metas.source(var) {
                Some(source) => source,
                None => continue,
            };
            match source {
                // Should have an unsolved hole expression
                MetaSource::HoleType(_) => {}
                // Should already have an error reported
                MetaSource::ReportedErrorType(_) => {}
                source => self.push_message(Message::UnsolvedMeta { source }),
            }

            let r#type = self.inference.metas.r#type(var).cloned();
            self.inference.metas.solve(var, Term::error(r#type));
        }
    }

    /// Elaborate a term on its own, outside of any definition.
    pub fn elab_term(
        &mut self,
        term: &surface::Term,
        expected_type: Option<&ArcTerm>,
        on_message: &mut dyn FnMut(Message),
    ) -> Result<(ArcTerm, ArcTerm), Cancelled> {
        self.reset(None);
        let (term, r#type) = match expected_type {
            Some(expected_type) => (self.check(term, expected_type), expected_type.clone()),
            None => self.synth(term),
        };
        self.finalize();

        let result = (self.zonk(&term), self.zonk(&r#type));
        self.drain_messages().for_each(|message| on_message(message));

        match self.is_cancelled() {
            true => Err(Cancelled),
            false => Ok(result),
        }
    }

    /// Elaborate a global definition.
    pub fn elab_definition(
        &mut self,
        def: DefId,
        definition: &surface::Definition,
        on_message: &mut dyn FnMut(Message),
    ) -> Result<ElaboratedDefinition, Cancelled> {
        self.reset(Some(def));
        let initial_messages = self.messages.len();
        let globals = self.globals;
        let range = definition.range;

        self.bind_definition_scope(range, &definition.body);
        let params = self.elab_params(&definition.params);
        let result_type = (definition.result_type.as_ref()).map(|r#type| self.check_type(r#type));
        let mut header_ok = !self.messages[initial_messages..].iter().any(Message::is_error);

        let body = match &definition.body {
            surface::DefinitionBody::Function(body) => match (body, result_type) {
                (Some(body), Some((result_type, _))) => {
                    let body = self.check(body, &result_type);
                    DefinitionParts::Function(FunctionKind::Function, result_type, Some(body))
                }
                (Some(body), None) => {
                    let (body, result_type) = self.synth(body);
                    DefinitionParts::Function(FunctionKind::Function, result_type, Some(body))
                }
                (None, Some((result_type, _))) => {
                    DefinitionParts::Function(FunctionKind::Function, result_type, None)
                }
                (None, None) => {
                    self.push_message(Message::ResultTypeRequired { range });
                    header_ok = false;
                    DefinitionParts::Function(FunctionKind::Function, Term::error(None), None)
                }
            },
            surface::DefinitionBody::TypeWrapper(body) => {
                let (body, result_type) = match result_type {
                    Some((result_type, _)) => (self.check(body, &result_type), result_type),
                    None => {
                        let (body, sort) = self.check_type(body);
                        (body, Term::universe(sort))
                    }
                };
                DefinitionParts::Function(FunctionKind::TypeWrapper, result_type, Some(body))
            }
            surface::DefinitionBody::Instance(base, impls) => {
                let (body, r#type) = match self.elab_class_base(base) {
                    Some(base) => {
                        let items = impls.iter().map(ImplItem::from_surface).collect();
                        let expected_type = result_type.as_ref().map(|(r#type, _)| r#type);
                        self.typecheck_class_ext(range, base, items, true, &[], expected_type)
                    }
                    None => (Term::error(None), Term::error(None)),
                };
                let class = match self.whnf(&r#type).as_ref() {
                    Term::ClassCall(class_call) => Some(class_call.class),
                    _ => None,
                };
                let (body, result_type) = match result_type {
                    Some((result_type, _)) => {
                        (self.check_result(range, body, &r#type, &result_type), result_type)
                    }
                    None => (body, r#type),
                };
                match class {
                    Some(class) => {
                        DefinitionParts::Function(FunctionKind::Instance(class), result_type, Some(body))
                    }
                    None => {
                        header_ok = false;
                        DefinitionParts::Function(FunctionKind::Function, result_type, Some(body))
                    }
                }
            }
            surface::DefinitionBody::Field {
                class,
                this,
                is_parameter,
                is_explicit,
            } => {
                let (mut r#type, mut sort) = match result_type {
                    Some(result_type) => result_type,
                    None => {
                        self.push_message(Message::ResultTypeRequired { range });
                        header_ok = false;
                        (Term::error(None), Sort::SET0)
                    }
                };
                for (param, domain_sort) in params.iter().rev() {
                    sort = self.pi_sort(range, domain_sort, &sort);
                    r#type = Arc::new(Term::Pi(sort, param.plicity, param.binding.clone(), r#type));
                }
                let this = match self.local_env.lookup(*this) {
                    Some(this) => this.clone(),
                    None => Binding::new(None, Term::error(None)),
                };
                DefinitionParts::Field(FieldDef {
                    class: *class,
                    this,
                    r#type,
                    sort,
                    is_parameter: *is_parameter,
                    is_explicit: *is_explicit,
                })
            }
            surface::DefinitionBody::Constructor { data, .. } => DefinitionParts::Constructor(*data),
        };

        self.finalize();

        let core = {
            let mut zonk = Substitution::zonking(&self.inference);
            let params: Vec<_> = (params.iter())
                .map(|(param, _)| core::Param::new(param.plicity, zonk.binding(&param.binding)))
                .collect();
            match body {
                DefinitionParts::Function(kind, result_type, body) => DefCore::Function(FunctionDef {
                    kind,
                    params,
                    result_type: zonk.apply(&result_type),
                    body: body.map(|body| zonk.apply(&body)),
                }),
                DefinitionParts::Field(field) => DefCore::Field(FieldDef {
                    r#type: zonk.apply(&field.r#type),
                    sort: zonk.sort(&field.sort),
                    ..field
                }),
                DefinitionParts::Constructor(data) => {
                    DefCore::Constructor(ConstructorDef { data, params })
                }
            }
        };

        if globals.levels(def).is_polymorphic() && !mentions_level_params(&core) {
            self.push_message(Message::NotLevelPolymorphic {
                range,
                name: globals.name(def),
            });
        }

        let status = (self.messages[initial_messages..].iter())
            .fold(Status::Ok, |status, message| status.merge(message_status(message)));
        self.drain_messages().for_each(|message| on_message(message));

        match self.is_cancelled() {
            true => Err(Cancelled),
            false => Ok(ElaboratedDefinition {
                core,
                status,
                header_ok,
            }),
        }
    }

    /// Bring the variables that a definition body refers to into scope: the
    /// parameters of the data type of a constructor, or the instance that a
    /// field belongs to.
    fn bind_definition_scope(&mut self, range: FileRange, body: &surface::DefinitionBody) {
        let globals = self.globals;
        match body {
            surface::DefinitionBody::Constructor { data, data_params } => match globals.data(*data) {
                Some(data_def) => {
                    for (id, param) in Iterator::zip(data_params.iter(), data_def.params.iter()) {
                        self.local_env.push(Some(*id), param.binding.clone());
                    }
                }
                None => self.push_message(Message::DefinitionNotTypechecked {
                    range,
                    name: globals.name(*data),
                }),
            },
            surface::DefinitionBody::Field { class, this, .. } => match globals.class(*class) {
                Some(class_def) => self.local_env.push(Some(*this), class_def.this.clone()),
                None => self.push_message(Message::DefinitionNotTypechecked {
                    range,
                    name: globals.name(*class),
                }),
            },
            surface::DefinitionBody::Function(_)
            | surface::DefinitionBody::TypeWrapper(_)
            | surface::DefinitionBody::Instance(..) => {}
        }
    }
}

/// The pieces of a definition, before they are zonked.
enum DefinitionParts {
    Function(FunctionKind, ArcTerm, Option<ArcTerm>),
    Field(FieldDef),
    Constructor(DefId),
}

fn message_status(message: &Message) -> Status {
    match message.is_error() {
        true => Status::HasErrors,
        false => Status::HasWarnings,
    }
}

fn mentions_level_params(core: &DefCore) -> bool {
    let params_mention = |params: &[core::Param]| {
        (params.iter()).any(|param| semantics::has_level_params(param.binding.r#type()))
    };
    match core {
        DefCore::Function(function) => {
            params_mention(&function.params)
                || semantics::has_level_params(&function.result_type)
                || (function.body.as_ref()).map_or(false, |body| semantics::has_level_params(body))
        }
        DefCore::Field(field) => {
            semantics::has_level_params(&field.r#type)
                || is_param_level(&field.sort.p)
                || is_param_level(&field.sort.h)
        }
        DefCore::Constructor(con) => params_mention(&con.params),
        DefCore::Data(_) | DefCore::Class(_) | DefCore::Meta(_) => true,
    }
}

fn is_param_level(level: &Level) -> bool {
    matches!(level.level_var(), Some(LevelVar::Param(..)))
}

/// Instance of a class call with its `this` binding replaced.
fn rebind_this(class_call: &ClassCall, this: &Binding) -> Vec<(DefId, ArcTerm)> {
    (class_call.impls.iter())
        .map(|(field, value)| (*field, semantics::subst1(value, &class_call.this, this.to_term())))
        .collect()
}
