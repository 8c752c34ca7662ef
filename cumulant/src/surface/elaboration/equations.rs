//! The store of comparisons that were blocked on unsolved inference
//! variables.
//!
//! Equations are added by [unification] whenever a comparison cannot be
//! decided yet, and are retried by [`Context::solve_equations`] until no more
//! progress is made. Whatever remains once a definition is finalized is
//! reported.
//!
//! [unification]: super::unification

use crate::core::semantics;
use crate::core::ArcTerm;
use crate::source::FileRange;
use crate::surface::elaboration::reporting::Message;
use crate::surface::elaboration::Context;

/// The direction of a comparison.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cmp {
    /// The left-hand side is a subtype of the right-hand side.
    Le,
    Eq,
    /// The left-hand side is a supertype of the right-hand side.
    Ge,
}

impl Cmp {
    pub fn symbol(self) -> &'static str {
        match self {
            Cmp::Le => "<=",
            Cmp::Eq => "==",
            Cmp::Ge => ">=",
        }
    }
}

/// A deferred comparison.
#[derive(Debug, Clone)]
pub struct Equation {
    pub lhs: ArcTerm,
    pub rhs: ArcTerm,
    pub cmp: Cmp,
    pub range: FileRange,
}

#[derive(Debug, Default)]
pub struct Equations {
    pending: Vec<Equation>,
}

impl Equations {
    pub fn new() -> Equations {
        Equations::default()
    }

    pub fn add_equation(&mut self, equation: Equation) {
        self.pending.push(equation);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn truncate(&mut self, len: usize) {
        self.pending.truncate(len);
    }

    /// Remove every pending equation, to be retried.
    pub fn take_all(&mut self) -> Vec<Equation> {
        std::mem::take(&mut self.pending)
    }
}

impl<'interner, 'globals> Context<'interner, 'globals> {
    /// Retry pending equations until they stop making progress.
    pub(crate) fn solve_equations(&mut self) {
        loop {
            let pending = self.equations.take_all();
            if pending.is_empty() {
                return;
            }

            let pending_len = pending.len();
            let solved_before = self.inference.metas.solved_count();
            for equation in pending {
                self.retry_equation(equation);
            }

            let stuck = self.equations.len() >= pending_len
                && self.inference.metas.solved_count() == solved_before;
            if stuck {
                return;
            }
        }
    }

    fn retry_equation(&mut self, equation: Equation) {
        let Equation {
            lhs,
            rhs,
            cmp,
            range,
        } = equation;
        if let Err(error) = self.unify(range, &lhs, &rhs, cmp) {
            self.report_unification_error(range, &lhs, &rhs, error);
        }
    }

    /// Make a last attempt at the pending equations, reporting those that
    /// remain blocked.
    ///
    /// Equations that mention an unsolved inference variable are not
    /// reported, as the variable itself will be.
    pub(crate) fn finalize_equations(&mut self) {
        self.solve_equations();

        for equation in self.equations.take_all() {
            let zonked_lhs = self.zonk(&equation.lhs);
            let zonked_rhs = self.zonk(&equation.rhs);
            let blocked_on_meta = !semantics::metas(&zonked_lhs).is_empty()
                || !semantics::metas(&zonked_rhs).is_empty();
            if blocked_on_meta {
                continue;
            }

            let lhs = self.pretty(&zonked_lhs);
            let rhs = self.pretty(&zonked_rhs);
            self.push_message(Message::UnsolvedEquation {
                range: equation.range,
                lhs,
                rhs,
                cmp: equation.cmp,
            });
        }
    }
}
