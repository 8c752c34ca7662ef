//! Numeric and string literals.
//!
//! A [`LiteralPolicy`] can take over the elaboration of literals. Without
//! one, numbers are encoded as natural numbers, as elements of a finite type
//! when one is expected, or as integers when they are negative or an integer
//! is expected.

use std::sync::Arc;

use crate::core::{prim, ArcTerm, Literal, Term};
use crate::source::{FileRange, StringId};
use crate::surface::elaboration::reporting::Message;
use crate::surface::elaboration::Context;

/// Custom elaboration of literals.
pub trait LiteralPolicy {
    fn number(
        &self,
        context: &mut Context<'_, '_>,
        range: FileRange,
        value: i128,
        expected_type: Option<&ArcTerm>,
    ) -> Option<ArcTerm> {
        let _ = (context, range, value, expected_type);
        None
    }

    fn string(
        &self,
        context: &mut Context<'_, '_>,
        range: FileRange,
        value: &str,
        expected_type: Option<&ArcTerm>,
    ) -> Option<ArcTerm> {
        let _ = (context, range, value, expected_type);
        None
    }
}

impl<'interner, 'globals> Context<'interner, 'globals> {
    pub(crate) fn check_number_literal(
        &mut self,
        range: FileRange,
        text: StringId,
        expected_type: &ArcTerm,
    ) -> ArcTerm {
        self.elab_number_literal(range, text, Some(expected_type)).0
    }

    pub(crate) fn synth_number_literal(&mut self, range: FileRange, text: StringId) -> (ArcTerm, ArcTerm) {
        self.elab_number_literal(range, text, None)
    }

    pub(crate) fn check_string_literal(
        &mut self,
        range: FileRange,
        text: StringId,
        expected_type: &ArcTerm,
    ) -> ArcTerm {
        self.elab_string_literal(range, text, Some(expected_type)).0
    }

    pub(crate) fn synth_string_literal(&mut self, range: FileRange, text: StringId) -> (ArcTerm, ArcTerm) {
        self.elab_string_literal(range, text, None)
    }

    fn elab_number_literal(
        &mut self,
        range: FileRange,
        text: StringId,
        expected_type: Option<&ArcTerm>,
    ) -> (ArcTerm, ArcTerm) {
        let parsed = {
            let interner = self.interner.borrow();
            let text = interner.resolve(&text);
            text.replace('_', "").parse::<i128>()
        };
        let value = match parsed {
            Ok(value) => value,
            Err(error) => {
                self.push_message(Message::InvalidNumericLiteral {
                    range,
                    message: error.to_string(),
                });
                return self.literal_error(range, expected_type);
            }
        };

        if let Some(policy) = self.literal_policy.clone() {
            if let Some(term) = policy.number(self, range, value, expected_type) {
                let r#type = self.type_of(&term);
                return self.finish_literal(range, term, r#type, expected_type);
            }
        }

        let globals = self.globals;
        let prelude = globals.prelude();
        let expected_whnf = expected_type.map(|r#type| self.whnf(r#type));
        let literal = match expected_whnf.as_deref() {
            Some(Term::DataCall(fin, _, args)) if *fin == prelude.fin && args.len() == 1 => {
                match self.whnf(&args[0]).as_ref() {
                    Term::Lit(Literal::Nat(bound)) => match u64::try_from(value) {
                        Ok(value) if value < *bound => Some(Literal::Fin(value, *bound)),
                        _ => None,
                    },
                    _ => u64::try_from(value).ok().map(Literal::Nat),
                }
            }
            Some(Term::DataCall(int, _, _)) if *int == prelude.int => {
                i64::try_from(value).ok().map(Literal::Int)
            }
            _ if value < 0 => i64::try_from(value).ok().map(Literal::Int),
            _ => u64::try_from(value).ok().map(Literal::Nat),
        };

        match literal {
            Some(literal) => {
                let r#type = prim::literal_type(prelude, &literal);
                let term = Arc::new(Term::Lit(literal));
                self.finish_literal(range, term, r#type, expected_type)
            }
            None => {
                let expected_type_name = match expected_type {
                    Some(expected_type) => self.pretty(expected_type),
                    None if value < 0 => self.pretty(&prim::data_call(prelude.int)),
                    None => self.pretty(&prim::data_call(prelude.nat)),
                };
                self.push_message(Message::LiteralOutOfRange {
                    range,
                    value: value.to_string(),
                    expected_type: expected_type_name,
                });
                self.literal_error(range, expected_type)
            }
        }
    }

    fn elab_string_literal(
        &mut self,
        range: FileRange,
        text: StringId,
        expected_type: Option<&ArcTerm>,
    ) -> (ArcTerm, ArcTerm) {
        let value: Arc<str> = Arc::from(self.interner.borrow().resolve(&text));

        if let Some(policy) = self.literal_policy.clone() {
            if let Some(term) = policy.string(self, range, &value, expected_type) {
                let r#type = self.type_of(&term);
                return self.finish_literal(range, term, r#type, expected_type);
            }
        }

        let literal = Literal::String(value);
        let r#type = prim::literal_type(self.globals.prelude(), &literal);
        self.finish_literal(range, Arc::new(Term::Lit(literal)), r#type, expected_type)
    }

    fn finish_literal(
        &mut self,
        range: FileRange,
        term: ArcTerm,
        r#type: ArcTerm,
        expected_type: Option<&ArcTerm>,
    ) -> (ArcTerm, ArcTerm) {
        match expected_type {
            Some(expected_type) => {
                let term = self.check_result(range, term, &r#type, expected_type);
                (term, expected_type.clone())
            }
            None => (term, r#type),
        }
    }

    fn literal_error(&mut self, range: FileRange, expected_type: Option<&ArcTerm>) -> (ArcTerm, ArcTerm) {
        match expected_type {
            Some(expected_type) => (Term::error(Some(expected_type.clone())), expected_type.clone()),
            None => self.synth_reported_error(range),
        }
    }
}
