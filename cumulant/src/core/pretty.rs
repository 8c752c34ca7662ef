//! A pretty printer for the core language.
//!
//! This is used for rendering types in diagnostics, and for debugging.

use pretty::RcDoc;
use std::cell::RefCell;

use crate::core::level::{LevelKind, LevelVar};
use crate::core::{
    ArcTerm, Binding, ClassCall, DefId, Level, LevelArgs, Literal, Plicity, Sort, Term,
};
use crate::globals::Globals;
use crate::source::{StringId, StringInterner};

/// Term precedences
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Top = 0,
    Let,
    Arrow,
    App,
    Proj,
    Atomic,
}

const INDENT: isize = 4;

pub struct Context<'env> {
    interner: &'env RefCell<StringInterner>,
    globals: &'env Globals,
}

impl<'env> Context<'env> {
    pub fn new(interner: &'env RefCell<StringInterner>, globals: &'env Globals) -> Context<'env> {
        Context { interner, globals }
    }

    fn string_id(&self, name: StringId) -> RcDoc<'static> {
        RcDoc::text(self.interner.borrow().resolve(&name).to_owned())
    }

    fn def_name(&self, def: DefId) -> RcDoc<'static> {
        self.string_id(self.globals.name(def))
    }

    fn binding_name(&self, binding: &Binding) -> RcDoc<'static> {
        match binding.name() {
            Some(name) => self.string_id(name),
            None => RcDoc::text("_"),
        }
    }

    fn binder(&self, plicity: Plicity, binding: &Binding) -> RcDoc<'static> {
        let doc = RcDoc::concat([
            self.binding_name(binding),
            RcDoc::space(),
            RcDoc::text(":"),
            RcDoc::softline(),
            self.term_prec(Prec::Top, binding.r#type()),
        ]);
        match plicity {
            Plicity::Explicit => RcDoc::concat([RcDoc::text("("), doc, RcDoc::text(")")]),
            Plicity::Implicit => RcDoc::concat([RcDoc::text("{"), doc, RcDoc::text("}")]),
        }
    }

    pub fn level(&self, level: &Level) -> RcDoc<'static> {
        let var = |var: &LevelVar| match var {
            LevelVar::Param(LevelKind::P, 0) => RcDoc::text("\\lp"),
            LevelVar::Param(LevelKind::H, 0) => RcDoc::text("\\lh"),
            LevelVar::Param(LevelKind::P, index) => RcDoc::text(format!("\\lp{index}")),
            LevelVar::Param(LevelKind::H, index) => RcDoc::text(format!("\\lh{index}")),
            LevelVar::Infer(var) => RcDoc::text(format!("{var:?}")),
        };

        match level {
            Level::Const(value) => RcDoc::text(value.to_string()),
            Level::Infinity => RcDoc::text("\\oo"),
            Level::Var { var: v, offset, max } => {
                let doc = match offset {
                    0 => var(v),
                    offset => RcDoc::concat([var(v), RcDoc::text(format!(" + {offset}"))]),
                };
                if *max > *offset {
                    RcDoc::concat([
                        RcDoc::text("\\max("),
                        doc,
                        RcDoc::text(format!(", {max})")),
                    ])
                } else {
                    doc
                }
            }
        }
    }

    fn level_atom(&self, level: &Level) -> RcDoc<'static> {
        match level {
            Level::Var { offset, max, .. } if *offset != 0 && *max <= *offset => {
                self.paren(true, self.level(level))
            }
            _ => self.level(level),
        }
    }

    pub fn sort(&self, sort: &Sort) -> RcDoc<'static> {
        match sort.h {
            Level::Const(-1) => RcDoc::text("\\Prop"),
            Level::Const(0) => RcDoc::concat([
                RcDoc::text("\\Set"),
                RcDoc::space(),
                self.level_atom(&sort.p),
            ]),
            _ => RcDoc::concat([
                RcDoc::text("\\Type"),
                RcDoc::space(),
                self.level_atom(&sort.p),
                RcDoc::space(),
                self.level_atom(&sort.h),
            ]),
        }
    }

    fn level_args(&self, levels: &LevelArgs) -> RcDoc<'static> {
        if levels.p.is_empty() && levels.h.is_empty() {
            return RcDoc::nil();
        }
        RcDoc::concat([
            RcDoc::text(" \\levels"),
            RcDoc::concat(levels.iter().map(|l| RcDoc::space().append(self.level_atom(l)))),
        ])
    }

    pub fn term(&self, term: &ArcTerm) -> RcDoc<'static> {
        self.term_prec(Prec::Top, term)
    }

    fn call(&self, prec: Prec, head: RcDoc<'static>, args: &[ArcTerm]) -> RcDoc<'static> {
        if args.is_empty() {
            return head;
        }
        self.paren(
            prec > Prec::App,
            RcDoc::concat([
                head,
                RcDoc::concat(
                    args.iter()
                        .map(|arg| RcDoc::line().append(self.term_prec(Prec::Proj, arg))),
                )
                .nest(INDENT),
            ])
            .group(),
        )
    }

    fn class_call(&self, class_call: &ClassCall) -> RcDoc<'static> {
        if class_call.impls.is_empty() {
            return self.def_name(class_call.class);
        }
        RcDoc::concat([
            self.def_name(class_call.class),
            RcDoc::space(),
            RcDoc::text("{"),
            RcDoc::concat(class_call.impls.iter().map(|(field, term)| {
                RcDoc::concat([
                    RcDoc::line(),
                    RcDoc::text("|"),
                    RcDoc::space(),
                    self.def_name(*field),
                    RcDoc::space(),
                    RcDoc::text("=>"),
                    RcDoc::space(),
                    self.term_prec(Prec::Top, term),
                ])
            }))
            .nest(INDENT),
            RcDoc::line(),
            RcDoc::text("}"),
        ])
        .group()
    }

    fn term_prec(&self, prec: Prec, term: &ArcTerm) -> RcDoc<'static> {
        match term.as_ref() {
            Term::Var(binding) => self.binding_name(binding),
            Term::Meta(var) => RcDoc::text(format!("{var:?}")),
            Term::App(..) => {
                let mut args = Vec::new();
                let mut head = term;
                while let Term::App(next, arg) = head.as_ref() {
                    args.push(arg.clone());
                    head = next;
                }
                args.reverse();
                self.call(prec, self.term_prec(Prec::Proj, head), &args)
            }
            Term::Lam(plicity, binding, body) => self.paren(
                prec > Prec::Let,
                RcDoc::concat([
                    RcDoc::text("\\lam"),
                    RcDoc::space(),
                    self.binder(*plicity, binding),
                    RcDoc::space(),
                    RcDoc::text("=>"),
                    RcDoc::line(),
                    self.term_prec(Prec::Let, body),
                ])
                .group(),
            ),
            Term::Pi(_, Plicity::Explicit, binding, body) if binding.name().is_none() => self
                .paren(
                    prec > Prec::Arrow,
                    RcDoc::concat([
                        self.term_prec(Prec::App, binding.r#type()),
                        RcDoc::space(),
                        RcDoc::text("->"),
                        RcDoc::softline(),
                        self.term_prec(Prec::Arrow, body),
                    ])
                    .group(),
                ),
            Term::Pi(_, plicity, binding, body) => self.paren(
                prec > Prec::Arrow,
                RcDoc::concat([
                    RcDoc::text("\\Pi"),
                    RcDoc::space(),
                    self.binder(*plicity, binding),
                    RcDoc::space(),
                    RcDoc::text("->"),
                    RcDoc::softline(),
                    self.term_prec(Prec::Arrow, body),
                ])
                .group(),
            ),
            Term::Sigma(_, bindings) => self.paren(
                prec > Prec::App,
                RcDoc::concat([
                    RcDoc::text("\\Sigma"),
                    RcDoc::concat(
                        (bindings.iter())
                            .map(|b| RcDoc::space().append(self.binder(Plicity::Explicit, b))),
                    ),
                ]),
            ),
            Term::Tuple(fields, _) => RcDoc::concat([
                RcDoc::text("("),
                RcDoc::intersperse(
                    fields.iter().map(|field| self.term_prec(Prec::Top, field)),
                    RcDoc::text(",").append(RcDoc::space()),
                ),
                RcDoc::text(")"),
            ]),
            Term::Proj(tuple, index) => RcDoc::concat([
                self.term_prec(Prec::Atomic, tuple),
                RcDoc::text(format!(".{}", index + 1)),
            ]),
            Term::Universe(sort) => self.paren(
                prec > Prec::App && !sort.is_prop(),
                self.sort(sort),
            ),
            Term::DataCall(def, levels, args) | Term::FunCall(def, levels, args) => {
                let head = self.def_name(*def).append(self.level_args(levels));
                self.call(prec, head, args)
            }
            Term::ConCall(con_call) => self.call(prec, self.def_name(con_call.con), &con_call.args),
            Term::ClassCall(class_call) => self.paren(prec > Prec::App, self.class_call(class_call)),
            Term::FieldCall(field, instance) => RcDoc::concat([
                self.term_prec(Prec::Atomic, instance),
                RcDoc::text("."),
                self.def_name(*field),
            ]),
            Term::Case(case) => self.paren(
                prec > Prec::Let,
                RcDoc::concat([
                    RcDoc::text("\\case"),
                    RcDoc::space(),
                    self.term_prec(Prec::App, &case.scrutinee),
                    RcDoc::space(),
                    RcDoc::text("\\with"),
                    RcDoc::space(),
                    RcDoc::text("{"),
                    RcDoc::concat(case.branches.iter().map(|branch| {
                        RcDoc::concat([
                            RcDoc::hardline(),
                            RcDoc::text("|"),
                            RcDoc::space(),
                            self.def_name(branch.con),
                            RcDoc::concat(
                                (branch.params.iter())
                                    .map(|b| RcDoc::space().append(self.binding_name(b))),
                            ),
                            RcDoc::space(),
                            RcDoc::text("=>"),
                            RcDoc::space(),
                            self.term_prec(Prec::Let, &branch.body),
                        ])
                    }))
                    .nest(INDENT),
                    RcDoc::hardline(),
                    RcDoc::text("}"),
                ]),
            ),
            Term::Let(binding, def, body) => self.paren(
                prec > Prec::Let,
                RcDoc::concat([
                    RcDoc::text("\\let"),
                    RcDoc::space(),
                    self.binding_name(binding),
                    RcDoc::space(),
                    RcDoc::text("=>"),
                    RcDoc::space(),
                    self.term_prec(Prec::Let, def),
                    RcDoc::line(),
                    RcDoc::text("\\in"),
                    RcDoc::space(),
                    self.term_prec(Prec::Let, body),
                ])
                .group(),
            ),
            Term::New(class_call) => self.paren(
                prec > Prec::App,
                RcDoc::concat([
                    RcDoc::text("\\new"),
                    RcDoc::space(),
                    self.class_call(class_call),
                ]),
            ),
            Term::Array(array) => RcDoc::concat([
                RcDoc::text("["),
                RcDoc::intersperse(
                    array.elems.iter().map(|elem| self.term_prec(Prec::Top, elem)),
                    RcDoc::text(",").append(RcDoc::space()),
                ),
                RcDoc::text("]"),
            ]),
            Term::PathLam(path_lam) => self.paren(
                prec > Prec::App,
                RcDoc::concat([
                    RcDoc::text("\\path"),
                    RcDoc::space(),
                    RcDoc::text("(\\lam"),
                    RcDoc::space(),
                    self.binding_name(&path_lam.binding),
                    RcDoc::space(),
                    RcDoc::text("=>"),
                    RcDoc::space(),
                    self.term_prec(Prec::Let, &path_lam.body),
                    RcDoc::text(")"),
                ]),
            ),
            Term::At(path, interval) => self.paren(
                prec > Prec::App,
                RcDoc::concat([
                    self.term_prec(Prec::Proj, path),
                    RcDoc::space(),
                    RcDoc::text("@"),
                    RcDoc::space(),
                    self.term_prec(Prec::Proj, interval),
                ]),
            ),
            Term::Lit(literal) => match literal {
                Literal::Nat(value) | Literal::Fin(value, _) => RcDoc::text(value.to_string()),
                Literal::Int(value) => self.paren(*value < 0 && prec > Prec::Top, RcDoc::text(value.to_string())),
                Literal::String(value) => RcDoc::text(format!("{value:?}")),
            },
            Term::TypeCoerce(coerce) => self.term_prec(prec, &coerce.arg),
            Term::Error(_) => RcDoc::text("#error"),
        }
    }

    fn paren(&self, wrap: bool, doc: RcDoc<'static>) -> RcDoc<'static> {
        if wrap {
            RcDoc::concat([RcDoc::text("("), doc, RcDoc::text(")")])
        } else {
            doc
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::globals::GlobalsBuilder;

    fn render(context: &Context<'_>, term: &ArcTerm) -> String {
        context.term(term).pretty(usize::MAX).to_string()
    }

    #[test]
    fn universes() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let context = Context::new(&interner, &globals);

        assert_eq!(render(&context, &Term::universe(Sort::PROP)), "\\Prop");
        assert_eq!(render(&context, &Term::universe(Sort::SET0)), "\\Set 0");
        let sort = Sort::new(Level::param(LevelKind::P, 0), Level::Const(2));
        assert_eq!(render(&context, &Term::universe(sort)), "\\Type \\lp 2");
    }

    #[test]
    fn data_call_with_literal_argument() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let context = Context::new(&interner, &globals);
        let fin = Arc::new(Term::DataCall(
            globals.prelude().fin,
            LevelArgs::empty(),
            vec![Arc::new(Term::Lit(Literal::Nat(5)))],
        ));

        assert_eq!(render(&context, &fin), "Fin 5");
    }

    #[test]
    fn non_dependent_function_type() {
        let interner = RefCell::new(StringInterner::new());
        let globals = GlobalsBuilder::new(&interner).build();
        let context = Context::new(&interner, &globals);
        let nat = crate::core::prim::data_call(globals.prelude().nat);
        let arrow = Term::arrow(Sort::SET0, nat.clone(), nat);

        assert_eq!(render(&context, &arrow), "Nat -> Nat");
    }
}
