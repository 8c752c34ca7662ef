//! Universe levels and sorts.
//!
//! Every universe is indexed by a [`Sort`], made up of a predicative level
//! (the _p-level_) and a homotopy level (the _h-level_). The h-level `-1` is
//! reserved for the universe of propositions.

use std::fmt;

use crate::source::StringId;

/// The two kinds of level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LevelKind {
    /// Predicative levels.
    P,
    /// Homotopy levels.
    H,
}

/// Inference variables for levels.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LevelInferVar(u32);

impl LevelInferVar {
    pub(crate) fn new(index: usize) -> LevelInferVar {
        LevelInferVar(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for LevelInferVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?l{}", self.0)
    }
}

/// Level variables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LevelVar {
    /// The parameter at the given position in the level parameters of the
    /// definition being elaborated.
    Param(LevelKind, u16),
    /// A level inference variable.
    Infer(LevelInferVar),
}

/// Levels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Level {
    /// A constant level.
    Const(i32),
    /// `max(var + offset, max)`
    Var { var: LevelVar, offset: i32, max: i32 },
    /// The level above every other level.
    Infinity,
}

impl Level {
    pub const ZERO: Level = Level::Const(0);
    /// The h-level of propositions.
    pub const PROP: Level = Level::Const(-1);

    pub fn var(var: LevelVar) -> Level {
        Level::Var {
            var,
            offset: 0,
            max: 0,
        }
    }

    pub fn param(kind: LevelKind, index: u16) -> Level {
        Level::var(LevelVar::Param(kind, index))
    }

    /// A level inference variable. These may be solved to the h-level of
    /// propositions, so their constant lower bound is `-1` rather than `0`.
    pub fn infer(var: LevelInferVar) -> Level {
        Level::Var {
            var: LevelVar::Infer(var),
            offset: 0,
            max: -1,
        }
    }

    /// The successor of this level.
    pub fn succ(&self) -> Level {
        self.add(1)
    }

    /// Shift the level upwards by a constant amount.
    pub fn add(&self, amount: i32) -> Level {
        match *self {
            Level::Const(k) => Level::Const(k + amount),
            Level::Var { var, offset, max } => Level::Var {
                var,
                offset: offset + amount,
                max: max + amount,
            },
            Level::Infinity => Level::Infinity,
        }
    }

    /// The smallest level `l` such that `l + amount` is at least this level,
    /// assuming variables are non-negative.
    pub fn sub(&self, amount: i32) -> Level {
        match *self {
            Level::Const(k) => Level::Const(k - amount),
            Level::Var { var, offset, max } => Level::Var {
                var,
                offset: std::cmp::max(offset - amount, 0),
                max: max - amount,
            },
            Level::Infinity => Level::Infinity,
        }
    }

    /// Raise the constant lower bound of this level.
    pub fn max_const(&self, bound: i32) -> Level {
        match *self {
            Level::Const(k) => Level::Const(std::cmp::max(k, bound)),
            Level::Var { var, offset, max } => Level::Var {
                var,
                offset,
                max: std::cmp::max(max, bound),
            },
            Level::Infinity => Level::Infinity,
        }
    }

    pub fn is_infinity(&self) -> bool {
        matches!(self, Level::Infinity)
    }

    /// The level variable this level is built on, if any.
    pub fn level_var(&self) -> Option<LevelVar> {
        match self {
            Level::Var { var, .. } => Some(*var),
            Level::Const(_) | Level::Infinity => None,
        }
    }

    /// The inference variable this level is built on, if any.
    pub fn infer_var(&self) -> Option<LevelInferVar> {
        match self.level_var() {
            Some(LevelVar::Infer(var)) => Some(var),
            Some(LevelVar::Param(..)) | None => None,
        }
    }

    pub fn has_infer_var(&self) -> bool {
        self.infer_var().is_some()
    }

    /// Replace the variable of this level, keeping its offset and constant
    /// lower bound.
    pub fn subst(&self, mapping: &dyn Fn(LevelVar) -> Option<Level>) -> Level {
        match *self {
            Level::Var { var, offset, max } => match mapping(var) {
                Some(level) => level.add(offset).max_const(max),
                None => *self,
            },
            Level::Const(_) | Level::Infinity => *self,
        }
    }

    /// The syntactic join of two levels, if one can be expressed without
    /// introducing a new level variable.
    ///
    /// `var_le` decides whether one level variable is known to be below
    /// another.
    pub fn max(&self, other: &Level, var_le: &dyn Fn(LevelVar, LevelVar) -> bool) -> Option<Level> {
        match (*self, *other) {
            (Level::Infinity, _) | (_, Level::Infinity) => Some(Level::Infinity),
            (Level::Const(k0), Level::Const(k1)) => Some(Level::Const(std::cmp::max(k0, k1))),
            (Level::Const(k), level @ Level::Var { .. })
            | (level @ Level::Var { .. }, Level::Const(k)) => Some(level.max_const(k)),
            (
                Level::Var {
                    var: var0,
                    offset: offset0,
                    max: max0,
                },
                Level::Var {
                    var: var1,
                    offset: offset1,
                    max: max1,
                },
            ) => {
                let max = std::cmp::max(max0, max1);
                if var0 == var1 {
                    let offset = std::cmp::max(offset0, offset1);
                    Some(Level::Var { var: var0, offset, max })
                } else if offset0 <= offset1 && var_le(var0, var1) {
                    Some(Level::Var { var: var1, offset: offset1, max })
                } else if offset1 <= offset0 && var_le(var1, var0) {
                    Some(Level::Var { var: var0, offset: offset0, max })
                } else {
                    None
                }
            }
        }
    }

    /// Decide `self ≤ other` for levels that are free of inference variables,
    /// treating level parameters as non-negative.
    pub fn is_le(&self, other: &Level, var_le: &dyn Fn(LevelVar, LevelVar) -> bool) -> bool {
        match (*self, *other) {
            (_, Level::Infinity) => true,
            (Level::Infinity, _) => false,
            (Level::Const(k0), Level::Const(k1)) => k0 <= k1,
            (Level::Const(k), Level::Var { offset, max, .. }) => k <= std::cmp::max(offset, max),
            (Level::Var { .. }, Level::Const(_)) => false,
            (
                Level::Var {
                    var: var0,
                    offset: offset0,
                    max: max0,
                },
                Level::Var {
                    var: var1,
                    offset: offset1,
                    max: max1,
                },
            ) => {
                (var0 == var1 || var_le(var0, var1))
                    && offset0 <= offset1
                    && max0 <= std::cmp::max(offset1, max1)
            }
        }
    }
}

/// A pair of a p-level and an h-level, indexing a universe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Sort {
    pub p: Level,
    pub h: Level,
}

impl Sort {
    /// The universe of propositions.
    pub const PROP: Sort = Sort {
        p: Level::ZERO,
        h: Level::PROP,
    };
    /// The lowest universe of sets.
    pub const SET0: Sort = Sort {
        p: Level::ZERO,
        h: Level::ZERO,
    };
    /// The sort of types with no upper bound.
    pub const OMEGA: Sort = Sort {
        p: Level::Infinity,
        h: Level::Infinity,
    };

    pub const fn new(p: Level, h: Level) -> Sort {
        Sort { p, h }
    }

    pub fn is_prop(&self) -> bool {
        self.h == Level::PROP
    }

    pub fn is_omega(&self) -> bool {
        self.p.is_infinity()
    }

    /// The sort of the universe indexed by this sort.
    pub fn succ(&self) -> Sort {
        if self.is_prop() {
            Sort::new(self.p, Level::ZERO)
        } else {
            Sort::new(self.p.succ(), self.h.succ())
        }
    }

    pub fn has_infer_vars(&self) -> bool {
        self.p.has_infer_var() || self.h.has_infer_var()
    }

    pub fn subst(&self, mapping: &dyn Fn(LevelVar) -> Option<Level>) -> Sort {
        Sort::new(self.p.subst(mapping), self.h.subst(mapping))
    }

    /// The syntactic join of two sorts.
    pub fn max(&self, other: &Sort, var_le: &dyn Fn(LevelVar, LevelVar) -> bool) -> Option<Sort> {
        Some(Sort::new(
            self.p.max(&other.p, var_le)?,
            self.h.max(&other.h, var_le)?,
        ))
    }
}

/// The ordering relation between the level parameters of a definition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LevelOrder {
    /// Every parameter is below the parameters that follow it.
    Increasing,
    /// Every parameter is above the parameters that follow it.
    Decreasing,
}

impl LevelOrder {
    /// Returns `true` if the parameter at `index0` is below the parameter at
    /// `index1` under this ordering.
    pub fn is_le(self, index0: u16, index1: u16) -> bool {
        match self {
            LevelOrder::Increasing => index0 <= index1,
            LevelOrder::Decreasing => index0 >= index1,
        }
    }
}

/// The level parameters of a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelParams {
    pub p: Vec<StringId>,
    pub h: Vec<StringId>,
    pub p_order: LevelOrder,
    pub h_order: LevelOrder,
}

impl LevelParams {
    /// Level parameters for a definition that is not universe polymorphic.
    pub fn none() -> LevelParams {
        LevelParams {
            p: Vec::new(),
            h: Vec::new(),
            p_order: LevelOrder::Increasing,
            h_order: LevelOrder::Increasing,
        }
    }

    /// The standard level parameters: a single p-level and a single h-level.
    pub fn standard(lp: StringId, lh: StringId) -> LevelParams {
        LevelParams {
            p: vec![lp],
            h: vec![lh],
            p_order: LevelOrder::Increasing,
            h_order: LevelOrder::Increasing,
        }
    }

    pub fn is_polymorphic(&self) -> bool {
        !(self.p.is_empty() && self.h.is_empty())
    }

    pub fn params(&self, kind: LevelKind) -> &[StringId] {
        match kind {
            LevelKind::P => &self.p,
            LevelKind::H => &self.h,
        }
    }

    pub fn order(&self, kind: LevelKind) -> LevelOrder {
        match kind {
            LevelKind::P => self.p_order,
            LevelKind::H => self.h_order,
        }
    }

    /// The ordering between two level variables that is known from these
    /// parameters. Inference variables are only ordered with themselves.
    pub fn var_le(&self, var0: LevelVar, var1: LevelVar) -> bool {
        match (var0, var1) {
            (LevelVar::Param(kind0, index0), LevelVar::Param(kind1, index1)) => {
                kind0 == kind1 && self.order(kind0).is_le(index0, index1)
            }
            (var0, var1) => var0 == var1,
        }
    }
}

/// Level arguments supplied to a reference to a level polymorphic definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LevelArgs {
    pub p: Vec<Level>,
    pub h: Vec<Level>,
}

impl LevelArgs {
    pub fn empty() -> LevelArgs {
        LevelArgs::default()
    }

    /// Level arguments that map every parameter to itself.
    pub fn identity(params: &LevelParams) -> LevelArgs {
        LevelArgs {
            p: (0..params.p.len())
                .map(|index| Level::param(LevelKind::P, index as u16))
                .collect(),
            h: (0..params.h.len())
                .map(|index| Level::param(LevelKind::H, index as u16))
                .collect(),
        }
    }

    pub fn args(&self, kind: LevelKind) -> &[Level] {
        match kind {
            LevelKind::P => &self.p,
            LevelKind::H => &self.h,
        }
    }

    /// Lookup the argument for a level parameter.
    pub fn get(&self, var: LevelVar) -> Option<Level> {
        match var {
            LevelVar::Param(kind, index) => self.args(kind).get(usize::from(index)).copied(),
            LevelVar::Infer(_) => None,
        }
    }

    pub fn subst(&self, mapping: &dyn Fn(LevelVar) -> Option<Level>) -> LevelArgs {
        LevelArgs {
            p: self.p.iter().map(|level| level.subst(mapping)).collect(),
            h: self.h.iter().map(|level| level.subst(mapping)).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Level> {
        self.p.iter().chain(self.h.iter())
    }

    pub fn has_infer_vars(&self) -> bool {
        self.iter().any(Level::has_infer_var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_le(var0: LevelVar, var1: LevelVar) -> bool {
        match (var0, var1) {
            (LevelVar::Param(_, index0), LevelVar::Param(_, index1)) => index0 <= index1,
            (var0, var1) => var0 == var1,
        }
    }

    #[test]
    fn max_of_constants() {
        let level = Level::Const(2).max(&Level::Const(5), &params_le);
        assert_eq!(level, Some(Level::Const(5)));
    }

    #[test]
    fn max_absorbs_constant_into_variable() {
        let var = Level::param(LevelKind::P, 0).succ();
        let level = var.max(&Level::Const(3), &params_le);
        assert_eq!(
            level,
            Some(Level::Var {
                var: LevelVar::Param(LevelKind::P, 0),
                offset: 1,
                max: 3,
            })
        );
    }

    #[test]
    fn max_of_ordered_params() {
        let lower = Level::param(LevelKind::P, 0);
        let upper = Level::param(LevelKind::P, 1);
        assert_eq!(lower.max(&upper, &params_le), Some(upper));
        assert_eq!(upper.max(&lower, &params_le), Some(upper));
        // the lower parameter has the larger offset, so neither dominates
        assert_eq!(lower.succ().max(&upper, &params_le), None);
    }

    #[test]
    fn max_of_unrelated_inference_vars() {
        let var0 = Level::infer(LevelInferVar::new(0));
        let var1 = Level::infer(LevelInferVar::new(1));
        assert_eq!(var0.max(&var1, &params_le), None);
    }

    #[test]
    fn is_le_respects_offsets() {
        let var = Level::param(LevelKind::H, 0);
        assert!(var.is_le(&var.succ(), &params_le));
        assert!(!var.succ().is_le(&var, &params_le));
        assert!(Level::Const(1).is_le(&var.succ(), &params_le));
        assert!(!var.is_le(&Level::Const(10), &params_le));
        assert!(var.is_le(&Level::Infinity, &params_le));
    }

    #[test]
    fn subst_keeps_offset_and_bound() {
        let level = Level::Var {
            var: LevelVar::Param(LevelKind::P, 0),
            offset: 1,
            max: 4,
        };
        let mapping = |_| Some(Level::Const(2));
        assert_eq!(level.subst(&mapping), Level::Const(4));
        let mapping = |_| Some(Level::Const(7));
        assert_eq!(level.subst(&mapping), Level::Const(8));
    }

    #[test]
    fn inference_vars_can_be_substituted_with_prop() {
        let var = Level::infer(LevelInferVar::new(0));
        let mapping = |_| Some(Level::PROP);
        assert_eq!(var.subst(&mapping), Level::PROP);
        assert_eq!(var.succ().subst(&mapping), Level::ZERO);
    }

    #[test]
    fn universe_of_prop_is_set() {
        assert_eq!(Sort::PROP.succ(), Sort::SET0);
        assert_eq!(Sort::SET0.succ(), Sort::new(Level::Const(1), Level::Const(1)));
    }

    #[test]
    fn decreasing_order() {
        assert!(LevelOrder::Decreasing.is_le(2, 1));
        assert!(!LevelOrder::Decreasing.is_le(0, 1));
    }
}
