//! Level inference.
//!
//! Level inference variables are introduced for omitted universe levels, for
//! the level arguments of references to level polymorphic definitions, and
//! for upper bounds that cannot be expressed syntactically. Constraints
//! between levels are collected as inequalities `lhs ≤ rhs` during
//! elaboration, and solved in one go when the definition is finalized.
//!
//! Solving computes the least assignment that satisfies the inequalities:
//! every variable starts at its lower bound and is only ever raised. A
//! variable that would need to be above two incomparable levels is set to
//! infinity and reported.

use fxhash::FxHashMap;

use crate::core::level::{LevelInferVar, LevelKind, LevelOrder, LevelVar};
use crate::core::{DefId, Level, LevelArgs, LevelParams, Sort};
use crate::env::{EnvLen, UniqueEnv};
use crate::source::FileRange;
use crate::surface;
use crate::surface::elaboration::reporting::Message;
use crate::surface::elaboration::Context;

/// A constraint `lhs ≤ rhs` between levels.
#[derive(Debug, Clone)]
pub struct LevelEquation {
    pub lhs: Level,
    pub rhs: Level,
    pub range: FileRange,
}

/// Failures found while solving level equations.
#[derive(Debug, Clone)]
pub enum LevelError {
    /// A variable needed to be above two levels with no common upper bound.
    NotOrderable(FileRange),
    /// The lower bounds of a variable kept increasing.
    Cycle(FileRange),
    /// An equation was not satisfied by the solution.
    Unsatisfied {
        range: FileRange,
        lhs: Level,
        rhs: Level,
    },
}

/// The solutions found by a single call to [`LevelEnv::solve`].
#[derive(Debug, Default)]
pub struct LevelSubstitution {
    solved: Vec<(LevelInferVar, Level)>,
}

impl LevelSubstitution {
    /// Returns `true` if no variables were solved.
    pub fn is_identity(&self) -> bool {
        self.solved.is_empty()
    }

    pub fn get(&self, var: LevelInferVar) -> Option<Level> {
        self.solved
            .iter()
            .find_map(|(v, level)| (*v == var).then_some(*level))
    }
}

/// A snapshot of the level environment, used for backtracking.
#[derive(Debug, Copy, Clone)]
pub struct LevelSnapshot {
    vars: EnvLen,
    equations: usize,
}

/// Level inference variables and the constraints between them.
pub struct LevelEnv {
    /// The level parameters of the definition being elaborated.
    params: LevelParams,
    /// The lowest value of each variable. H-levels may go down to `-1`, the
    /// level of propositions.
    minimums: UniqueEnv<i32>,
    solutions: UniqueEnv<Option<Level>>,
    equations: Vec<LevelEquation>,
    /// Rounds of raising allowed per variable before a cycle is reported.
    iteration_bound: usize,
}

impl LevelEnv {
    pub fn new(params: LevelParams, iteration_bound: usize) -> LevelEnv {
        LevelEnv {
            params,
            minimums: UniqueEnv::new(),
            solutions: UniqueEnv::new(),
            equations: Vec::new(),
            iteration_bound,
        }
    }

    pub fn params(&self) -> &LevelParams {
        &self.params
    }

    pub fn fresh(&mut self, minimum: i32) -> LevelInferVar {
        let var = LevelInferVar::new(self.solutions.len().next_index());
        self.minimums.push(minimum);
        self.solutions.push(None);
        var
    }

    pub fn solution(&self, var: LevelInferVar) -> Option<Level> {
        *self.solutions.get(var.index())?
    }

    /// Replace solved variables with their solutions.
    pub fn zonk(&self, level: &Level) -> Level {
        level.subst(&|var| match var {
            LevelVar::Infer(var) => self.solution(var),
            LevelVar::Param(..) => None,
        })
    }

    pub fn var_le(&self, var0: LevelVar, var1: LevelVar) -> bool {
        self.params.var_le(var0, var1)
    }

    /// Decide `level0 ≤ level1` for levels without inference variables.
    pub fn is_le(&self, level0: &Level, level1: &Level) -> bool {
        level0.is_le(level1, &|var0, var1| self.var_le(var0, var1))
    }

    /// The syntactic join of two levels.
    pub fn max(&self, level0: &Level, level1: &Level) -> Option<Level> {
        level0.max(level1, &|var0, var1| self.var_le(var0, var1))
    }

    pub fn add_equation(&mut self, lhs: Level, rhs: Level, range: FileRange) {
        self.equations.push(LevelEquation { lhs, rhs, range });
    }

    pub fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            vars: self.solutions.len(),
            equations: self.equations.len(),
        }
    }

    pub fn rollback(&mut self, snapshot: LevelSnapshot) {
        self.minimums.truncate(snapshot.vars);
        self.solutions.truncate(snapshot.vars);
        self.equations.truncate(snapshot.equations);
    }

    /// Solve the pending equations, returning the newly solved variables.
    ///
    /// Every variable is solved afterwards, and the pending equations are
    /// cleared. Solving again without adding new variables or equations
    /// returns an identity substitution.
    pub fn solve(&mut self) -> (LevelSubstitution, Vec<LevelError>) {
        let mut values = FxHashMap::default();
        for (index, (minimum, solution)) in
            Iterator::zip(self.minimums.iter(), self.solutions.iter()).enumerate()
        {
            if solution.is_none() {
                values.insert(LevelInferVar::new(index), Level::Const(*minimum));
            }
        }

        let mut errors = Vec::new();
        let bound = (values.len() + 1) * self.iteration_bound;
        let mut rounds = 0;
        let mut changed = !values.is_empty();

        while changed {
            changed = false;
            rounds += 1;

            if rounds > bound {
                for equation in &self.equations {
                    let lhs = self.evaluate(&equation.lhs, &values);
                    let rhs = self.evaluate(&equation.rhs, &values);
                    if let Some(var) = equation.rhs.infer_var() {
                        if values.contains_key(&var) && !self.is_le(&lhs, &rhs) {
                            values.insert(var, Level::Infinity);
                            errors.push(LevelError::Cycle(equation.range));
                        }
                    }
                }
                break;
            }

            for equation in &self.equations {
                let var = match equation.rhs.infer_var() {
                    Some(var) if values.contains_key(&var) => var,
                    _ => continue,
                };
                let lhs = self.evaluate(&equation.lhs, &values);
                let rhs = self.evaluate(&equation.rhs, &values);
                if self.is_le(&lhs, &rhs) {
                    continue;
                }

                // Raise the variable so that `var + offset` covers the
                // left-hand side.
                let offset = match equation.rhs {
                    Level::Var { offset, .. } => offset,
                    Level::Const(_) | Level::Infinity => 0,
                };
                let current = values[&var];
                let next = match self.max(&current, &lhs.sub(offset)) {
                    Some(next) => next,
                    None => {
                        errors.push(LevelError::NotOrderable(equation.range));
                        Level::Infinity
                    }
                };
                if next != current {
                    values.insert(var, next);
                    changed = true;
                }
            }
        }

        let mut solved: Vec<_> = values.into_iter().collect();
        solved.sort_by_key(|(var, _)| *var);
        for (var, level) in &solved {
            self.solutions.set(var.index(), Some(*level));
        }

        for equation in std::mem::take(&mut self.equations) {
            let lhs = self.zonk(&equation.lhs);
            let rhs = self.zonk(&equation.rhs);
            if !self.is_le(&lhs, &rhs) {
                errors.push(LevelError::Unsatisfied {
                    range: equation.range,
                    lhs,
                    rhs,
                });
            }
        }

        (LevelSubstitution { solved }, errors)
    }

    fn evaluate(&self, level: &Level, values: &FxHashMap<LevelInferVar, Level>) -> Level {
        level.subst(&|var| match var {
            LevelVar::Infer(var) => self.solution(var).or_else(|| values.get(&var).copied()),
            LevelVar::Param(..) => None,
        })
    }
}

/// How the level arguments of a reference are chosen when they are not given
/// explicitly.
enum LevelPolicy {
    /// The level parameters of the definition being elaborated, for recursive
    /// references.
    Identity,
    /// The lowest levels, for types with no constructors or parameters.
    Minimal,
    /// Fresh inference variables.
    Fresh,
}

impl<'interner, 'globals> Context<'interner, 'globals> {
    pub(crate) fn fresh_level(&mut self, minimum: i32) -> Level {
        Level::infer(self.inference.levels.fresh(minimum))
    }

    /// A sort made up of fresh level variables.
    pub(crate) fn fresh_sort(&mut self) -> Sort {
        Sort::new(self.fresh_level(0), self.fresh_level(0))
    }

    /// Elaborate a level written in the surface language.
    pub(crate) fn elab_level(&mut self, kind: LevelKind, level: &surface::Level) -> Level {
        match level {
            surface::Level::Const(_, value) => Level::Const(*value),
            surface::Level::Param(range, index) => {
                let params = self.inference.levels.params().params(kind);
                if usize::from(*index) < params.len() {
                    Level::param(kind, *index)
                } else {
                    self.push_message(Message::LevelParamOutOfRange {
                        range: *range,
                        index: *index,
                    });
                    Level::ZERO
                }
            }
            surface::Level::Infinity(_) => Level::Infinity,
            surface::Level::Hole(_) => self.fresh_level(0),
            surface::Level::Suc(_, level) => self.elab_level(kind, level).succ(),
            surface::Level::Max(range, level0, level1) => {
                let level0 = self.elab_level(kind, level0);
                let level1 = self.elab_level(kind, level1);
                self.level_upper_bound(*range, &[level0, level1], 0, None)
            }
        }
    }

    /// The smallest level above every level in `levels`. If the join cannot
    /// be written down directly, `bound` is constrained to be above every
    /// level instead, defaulting to a fresh variable.
    fn level_upper_bound(
        &mut self,
        range: FileRange,
        levels: &[Level],
        minimum: i32,
        bound: Option<Level>,
    ) -> Level {
        let syntactic = levels.iter().try_fold(Level::Const(minimum), |acc, level| {
            self.inference.levels.max(&acc, level)
        });
        if let Some(level) = syntactic {
            return level;
        }

        let bound = match bound {
            Some(bound) => bound,
            None => self.fresh_level(minimum),
        };
        for level in levels {
            self.inference.levels.add_equation(*level, bound, range);
        }
        bound
    }

    /// The smallest sort above every sort in `sorts`.
    pub(crate) fn generate_upper_bound(&mut self, range: FileRange, sorts: &[Sort]) -> Sort {
        self.upper_bound_within(range, sorts, None)
    }

    /// The smallest sort above every sort in `sorts`, falling back to
    /// `bound` rather than a fresh sort when no unique join exists.
    pub(crate) fn upper_bound_within(
        &mut self,
        range: FileRange,
        sorts: &[Sort],
        bound: Option<&Sort>,
    ) -> Sort {
        if sorts.is_empty() {
            return Sort::PROP;
        }
        let ps: Vec<_> = sorts.iter().map(|sort| sort.p).collect();
        let hs: Vec<_> = sorts.iter().map(|sort| sort.h).collect();
        let p = self.level_upper_bound(range, &ps, 0, bound.map(|bound| bound.p));
        let h = self.level_upper_bound(range, &hs, -1, bound.map(|bound| bound.h));
        Sort::new(p, h)
    }

    /// The sort of a function type. It is at least as large as its domain, and
    /// has the homotopy level of its codomain.
    pub(crate) fn pi_sort(&mut self, range: FileRange, domain: &Sort, codomain: &Sort) -> Sort {
        let p = self.level_upper_bound(range, &[domain.p, codomain.p], 0, None);
        Sort::new(p, codomain.h)
    }

    /// Elaborate the levels of a universe.
    pub(crate) fn elab_universe(
        &mut self,
        kind: surface::UniverseKind,
        p: Option<&surface::Level>,
        h: Option<&surface::Level>,
    ) -> Sort {
        match kind {
            surface::UniverseKind::Prop => Sort::PROP,
            surface::UniverseKind::Set => Sort::new(self.universe_level(LevelKind::P, p), Level::ZERO),
            surface::UniverseKind::Type => Sort::new(
                self.universe_level(LevelKind::P, p),
                self.universe_level(LevelKind::H, h),
            ),
        }
    }

    fn universe_level(&mut self, kind: LevelKind, level: Option<&surface::Level>) -> Level {
        match level {
            Some(level) => self.elab_level(kind, level),
            // Definitions without level parameters can only be instantiated
            // at a single level, so the lowest one is used.
            None if self.config.degenerate_universes
                && !self.inference.levels.params().is_polymorphic() =>
            {
                Level::ZERO
            }
            None => self.fresh_level(0),
        }
    }

    /// The level arguments of a reference to a global definition.
    ///
    /// Explicit arguments that are missing at the end of the list are chosen
    /// in the same way as omitted arguments. Adjacent arguments are
    /// constrained to follow the order of the level parameters.
    pub(crate) fn instantiate_levels(
        &mut self,
        range: FileRange,
        def: DefId,
        explicit: Option<&surface::LevelArgs>,
    ) -> LevelArgs {
        let globals = self.globals;
        let params = globals.levels(def);

        if explicit.is_none() && !params.is_polymorphic() {
            return LevelArgs::empty();
        }

        let policy = if self.current_def == Some(def) {
            LevelPolicy::Identity
        } else if (globals.data(def))
            .map_or(false, |data| data.constructors.is_empty() && data.params.is_empty())
        {
            LevelPolicy::Minimal
        } else {
            LevelPolicy::Fresh
        };

        let mut levels = LevelArgs::empty();
        for kind in [LevelKind::P, LevelKind::H] {
            let expected = params.params(kind).len();
            let found: &[surface::Level] = match explicit {
                Some(explicit) => match kind {
                    LevelKind::P => &explicit.p,
                    LevelKind::H => &explicit.h,
                },
                None => &[],
            };
            if found.len() > expected {
                self.push_message(Message::LevelArgCount {
                    range,
                    kind,
                    expected,
                    found: found.len(),
                });
            }

            let args: Vec<_> = (0..expected)
                .map(|index| match found.get(index) {
                    Some(level) => self.elab_level(kind, level),
                    None => match policy {
                        LevelPolicy::Identity => Level::param(kind, index as u16),
                        LevelPolicy::Minimal => Level::ZERO,
                        LevelPolicy::Fresh => self.fresh_level(0),
                    },
                })
                .collect();
            // Identity arguments are ordered by the parameters themselves
            if explicit.is_some() || matches!(policy, LevelPolicy::Fresh) {
                self.order_levels(range, &args, params.order(kind));
            }

            match kind {
                LevelKind::P => levels.p = args,
                LevelKind::H => levels.h = args,
            }
        }
        levels
    }

    /// Constrain the arguments of ordered level parameters to follow the
    /// ordering.
    fn order_levels(&mut self, range: FileRange, levels: &[Level], order: LevelOrder) {
        for pair in levels.windows(2) {
            let (lower, upper) = match order.is_le(0, 1) {
                true => (pair[0], pair[1]),
                false => (pair[1], pair[0]),
            };
            let lower = self.inference.levels.zonk(&lower);
            let upper = self.inference.levels.zonk(&upper);
            if lower.has_infer_var() || upper.has_infer_var() {
                self.inference.levels.add_equation(lower, upper, range);
            } else if !self.inference.levels.is_le(&lower, &upper) {
                self.push_message(Message::LevelEquationFailed {
                    range,
                    lhs: self.pretty_level(&lower),
                    rhs: self.pretty_level(&upper),
                });
            }
        }
    }

    /// Solve the pending level equations, reporting any failures.
    pub(crate) fn solve_levels(&mut self) -> LevelSubstitution {
        let (substitution, errors) = self.inference.levels.solve();
        for error in errors {
            let message = match error {
                LevelError::NotOrderable(range) => Message::LevelsNotOrderable { range },
                LevelError::Cycle(range) => Message::LevelCycle { range },
                LevelError::Unsatisfied { range, lhs, rhs } => Message::LevelEquationFailed {
                    range,
                    lhs: self.pretty_level(&lhs),
                    rhs: self.pretty_level(&rhs),
                },
            };
            self.push_message(message);
        }
        substitution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileId;
    use crate::source::{ByteRange, StringInterner};
    use crate::GlobalsBuilder;
    use std::cell::RefCell;

    fn range() -> FileRange {
        let file_id = FileId::try_from(1).unwrap();
        FileRange::new(file_id, ByteRange::new(0, 0))
    }

    #[test]
    fn solves_to_least_upper_bound() {
        let mut env = LevelEnv::new(LevelParams::none(), 16);
        let var = env.fresh(0);
        env.add_equation(Level::Const(2), Level::infer(var), range());
        env.add_equation(Level::Const(1), Level::infer(var).succ(), range());

        let (substitution, errors) = env.solve();
        assert!(errors.is_empty());
        assert_eq!(substitution.get(var), Some(Level::Const(2)));
    }

    #[test]
    fn solving_twice_is_identity() {
        let mut env = LevelEnv::new(LevelParams::none(), 16);
        let var0 = env.fresh(0);
        let var1 = env.fresh(-1);
        env.add_equation(Level::infer(var0), Level::infer(var1), range());
        env.add_equation(Level::Const(3), Level::infer(var0), range());

        let (first, errors) = env.solve();
        assert!(errors.is_empty());
        assert_eq!(first.get(var1), Some(Level::Const(3)));

        let (second, errors) = env.solve();
        assert!(errors.is_empty());
        assert!(second.is_identity());
        assert_eq!(env.solution(var1), Some(Level::Const(3)));
    }

    #[test]
    fn propositional_variables_solve_to_prop() {
        let mut env = LevelEnv::new(LevelParams::none(), 16);
        let var = env.fresh(-1);

        let (substitution, errors) = env.solve();
        assert!(errors.is_empty());
        assert_eq!(substitution.get(var), Some(Level::PROP));
        assert_eq!(env.zonk(&Level::infer(var)), Level::PROP);
        assert_eq!(env.zonk(&Level::infer(var).succ()), Level::ZERO);
    }

    #[test]
    fn increasing_cycle_is_reported() {
        let mut env = LevelEnv::new(LevelParams::none(), 4);
        let var0 = env.fresh(0);
        let var1 = env.fresh(0);
        env.add_equation(Level::infer(var0), Level::infer(var1), range());
        env.add_equation(Level::infer(var1).succ(), Level::infer(var0), range());

        let (_, errors) = env.solve();
        assert!(errors.iter().any(|error| matches!(error, LevelError::Cycle(_))));
    }

    #[test]
    fn unrelated_params_are_not_orderable() {
        let mut interner = StringInterner::new();
        let params = LevelParams {
            p: vec![interner.get_or_intern("lp0"), interner.get_or_intern("lp1")],
            ..LevelParams::none()
        };
        let mut env = LevelEnv::new(params, 16);
        let var = env.fresh(0);
        // `\lp0 + 1` and `\lp1` have no syntactic join
        env.add_equation(Level::param(LevelKind::P, 0).succ(), Level::infer(var), range());
        env.add_equation(Level::param(LevelKind::P, 1), Level::infer(var), range());

        let (substitution, errors) = env.solve();
        assert!(matches!(errors.as_slice(), [LevelError::NotOrderable(_)]));
        assert_eq!(substitution.get(var), Some(Level::Infinity));
    }

    #[test]
    fn unsatisfiable_constant_bound() {
        let mut env = LevelEnv::new(LevelParams::none(), 16);
        let var = env.fresh(0);
        env.add_equation(Level::Const(1), Level::infer(var), range());
        env.add_equation(Level::infer(var), Level::Const(0), range());

        let (_, errors) = env.solve();
        assert!(matches!(errors.as_slice(), [LevelError::Unsatisfied { .. }]));
    }

    #[test]
    fn upper_bounds_are_syntactic_when_possible() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let mut context = Context::new(&interner, &globals);
        let params = LevelParams {
            p: vec![interner.borrow_mut().get_or_intern("lp")],
            ..LevelParams::none()
        };
        context.inference.levels = LevelEnv::new(params, 16);

        let lp = Level::param(LevelKind::P, 0);
        let sorts = [Sort::new(lp, Level::ZERO), Sort::new(lp.succ(), Level::PROP)];
        let sort = context.generate_upper_bound(range(), &sorts);
        assert_eq!(sort, Sort::new(lp.succ(), Level::ZERO));
        assert_eq!(usize::from(context.inference.levels.minimums.len()), 0);
        assert!(context.inference.levels.equations.is_empty());

        // Unrelated inference variables are bounded by a new one
        let p0 = context.fresh_level(0);
        let p1 = context.fresh_level(0);
        let sorts = [Sort::new(p0, Level::ZERO), Sort::new(p1, Level::ZERO)];
        let sort = context.generate_upper_bound(range(), &sorts);
        assert_eq!(usize::from(context.inference.levels.minimums.len()), 3);
        assert_eq!(context.inference.levels.equations.len(), 2);
        assert_eq!(sort.h, Level::ZERO);
        assert!(sort.p.has_infer_var());
    }
}
