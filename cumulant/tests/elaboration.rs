use std::cell::{Cell, RefCell};
use std::sync::Arc;

use cumulant::core::level::{LevelKind, LevelOrder};
use cumulant::core::semantics::{self, Substitution};
use cumulant::core::{
    prim, ArcTerm, Binding, ClassCall, DefId, Level, LevelArgs, LevelParams, Literal, Plicity, Sort, Term,
};
use cumulant::files::FileId;
use cumulant::globals::{ClassDef, DefCore, FieldDef, FunctionDef, FunctionKind, Globals, MetaDef};
use cumulant::source::{ByteRange, FileRange, StringInterner};
use cumulant::surface::elaboration::{
    CancellationToken, Cancelled, Config, Context, Message, MetaCall, MetaOutcome, MetaResolver, Stage,
};
use cumulant::surface::{self, ImplTarget, LocalId};
use cumulant::GlobalsBuilder;

fn range() -> FileRange {
    let file_id = FileId::try_from(1).unwrap();
    FileRange::new(file_id, ByteRange::new(0, 0))
}

fn nat(globals: &Globals) -> ArcTerm {
    prim::data_call(globals.prelude().nat)
}

fn fin(globals: &Globals, bound: u64) -> ArcTerm {
    Arc::new(Term::DataCall(globals.prelude().fin, LevelArgs::empty(), vec![prim::nat_lit(bound)]))
}

fn global(def: DefId) -> surface::Term {
    surface::Term::Global(range(), def, None)
}

fn number(interner: &RefCell<StringInterner>, text: &str) -> surface::Term {
    surface::Term::NumberLiteral(range(), interner.borrow_mut().get_or_intern(text))
}

fn elab(
    context: &mut Context<'_, '_>,
    term: &surface::Term,
    expected_type: Option<&ArcTerm>,
) -> (ArcTerm, ArcTerm, Vec<Message>) {
    let mut messages = Vec::new();
    let (term, r#type) = context
        .elab_term(term, expected_type, &mut |message| messages.push(message))
        .unwrap();
    (term, r#type, messages)
}

fn count(messages: &[Message], predicate: impl Fn(&Message) -> bool) -> usize {
    messages.iter().filter(|message| predicate(message)).count()
}

/// A class whose fields are all natural numbers.
struct TestClass {
    class: DefId,
    fields: Vec<DefId>,
    this: Binding,
}

impl TestClass {
    fn declare(builder: &mut GlobalsBuilder<'_>, name: &str, field_names: &[&str]) -> TestClass {
        let class = builder.declare(name, LevelParams::none());
        let fields: Vec<_> = (field_names.iter())
            .map(|field| builder.declare(field, LevelParams::none()))
            .collect();
        let this = ClassCall::this_binding(Some(builder.name("this")), class, &LevelArgs::empty(), Sort::SET0);
        let nat = prim::data_call(builder.prelude().nat);
        for field in &fields {
            let core = DefCore::Field(FieldDef {
                class,
                this: this.clone(),
                r#type: nat.clone(),
                sort: Sort::SET0,
                is_parameter: false,
                is_explicit: true,
            });
            builder.define(*field, core);
        }
        TestClass { class, fields, this }
    }

    fn def(&self, is_record: bool) -> ClassDef {
        ClassDef::new(is_record, self.fields.clone(), self.this.clone(), Sort::SET0)
    }

    fn field_of_this(&self, field: usize) -> ArcTerm {
        Arc::new(Term::FieldCall(self.fields[field], self.this.to_term()))
    }
}

/// Declare a function without parameters.
fn declare_constant(
    builder: &mut GlobalsBuilder<'_>,
    name: &str,
    levels: LevelParams,
    r#type: ArcTerm,
    body: Option<ArcTerm>,
) -> DefId {
    let def = builder.declare(name, levels);
    let core = DefCore::Function(FunctionDef {
        kind: FunctionKind::Function,
        params: Vec::new(),
        result_type: r#type,
        body,
    });
    builder.define(def, core);
    def
}

fn missing_fields(messages: &[Message]) -> Vec<Vec<cumulant::StringId>> {
    (messages.iter())
        .filter_map(|message| match message {
            Message::FieldsNotImplemented { fields, .. } => Some(fields.clone()),
            _ => None,
        })
        .collect()
}

fn implement(field: DefId, this: Option<LocalId>, expr: surface::Term) -> surface::Implementation {
    surface::Implementation {
        range: range(),
        target: ImplTarget::Field(field),
        this,
        expr,
    }
}

#[test]
fn number_literal_takes_expected_finite_type() {
    let interner = RefCell::new(StringInterner::new());
    let globals = GlobalsBuilder::new(&interner).build();
    let mut context = Context::new(&interner, &globals);

    let (term, _, messages) = elab(&mut context, &number(&interner, "3"), Some(&fin(&globals, 5)));
    assert!(messages.is_empty());
    assert!(matches!(term.as_ref(), Term::Lit(Literal::Fin(3, 5))));

    let (term, r#type, messages) = elab(&mut context, &number(&interner, "3"), None);
    assert!(messages.is_empty());
    assert!(matches!(term.as_ref(), Term::Lit(Literal::Nat(3))));
    assert!(semantics::alpha_eq(&r#type, &nat(&globals)));

    let (term, _, messages) = elab(&mut context, &number(&interner, "-2"), None);
    assert!(messages.is_empty());
    assert!(matches!(term.as_ref(), Term::Lit(Literal::Int(-2))));
}

#[test]
fn number_literal_out_of_range() {
    let interner = RefCell::new(StringInterner::new());
    let globals = GlobalsBuilder::new(&interner).build();
    let mut context = Context::new(&interner, &globals);

    let (term, _, messages) = elab(&mut context, &number(&interner, "5"), Some(&fin(&globals, 5)));
    assert!(term.is_error());
    assert_eq!(count(&messages, |m| matches!(m, Message::LiteralOutOfRange { .. })), 1);
}

#[test]
fn natural_numbers_coerce_to_integers() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let prelude = builder.prelude().clone();
    let g = builder.declare("g", LevelParams::none());
    builder.define(
        g,
        DefCore::Function(FunctionDef {
            kind: FunctionKind::Function,
            params: Vec::new(),
            result_type: prim::data_call(prelude.nat),
            body: None,
        }),
    );
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let int = prim::data_call(prelude.int);
    let (term, _, messages) = elab(&mut context, &global(g), Some(&int));
    assert!(messages.is_empty());
    match term.as_ref() {
        Term::ConCall(con_call) => {
            assert_eq!(con_call.con, prelude.pos);
            assert!(matches!(con_call.args[0].as_ref(), Term::FunCall(def, _, _) if *def == g));
        }
        _ => panic!("expected a coercion to `Int`, found {term:?}"),
    }
}

#[test]
fn check_and_synth_agree_on_lambdas() {
    let interner = RefCell::new(StringInterner::new());
    let globals = GlobalsBuilder::new(&interner).build();
    let prelude = globals.prelude();
    let mut context = Context::new(&interner, &globals);

    let x = LocalId::new(0);
    let lam = surface::Term::Lam(
        range(),
        vec![surface::Param {
            range: range(),
            id: Some(x),
            name: None,
            plicity: Plicity::Explicit,
            r#type: Some(global(prelude.nat)),
        }],
        Box::new(surface::Term::Local(range(), x)),
    );

    let (synth_term, synth_type, messages) = elab(&mut context, &lam, None);
    assert!(messages.is_empty());
    assert!(matches!(synth_type.as_ref(), Term::Pi(_, Plicity::Explicit, _, _)));

    let (check_term, _, messages) = elab(&mut context, &lam, Some(&synth_type));
    assert!(messages.is_empty());
    assert!(semantics::alpha_eq(&synth_term, &check_term));
}

#[test]
fn lambdas_check_against_paths() {
    let interner = RefCell::new(StringInterner::new());
    let globals = GlobalsBuilder::new(&interner).build();
    let prelude = globals.prelude();
    let mut context = Context::new(&interner, &globals);

    let levels = LevelArgs {
        p: vec![cumulant::core::Level::Const(0)],
        h: vec![cumulant::core::Level::Const(0)],
    };
    let line = Arc::new(Term::Lam(
        Plicity::Explicit,
        Binding::new(None, prim::data_call(prelude.interval)),
        nat(&globals),
    ));
    let path_type = Arc::new(Term::DataCall(
        prelude.path,
        levels,
        vec![line, prim::nat_lit(0), prim::nat_lit(0)],
    ));

    let i = LocalId::new(0);
    let lam = surface::Term::Lam(
        range(),
        vec![surface::Param {
            range: range(),
            id: Some(i),
            name: None,
            plicity: Plicity::Explicit,
            r#type: None,
        }],
        Box::new(number(&interner, "0")),
    );

    let (term, _, messages) = elab(&mut context, &lam, Some(&path_type));
    assert!(messages.is_empty(), "{messages:?}");
    assert!(matches!(term.as_ref(), Term::PathLam(_)));
}

#[test]
fn missing_fields_are_reported_together() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let class = TestClass::declare(&mut builder, "D", &["a", "b", "c"]);
    let class_def = class.def(true).with_default(class.fields[1], prim::nat_lit(0));
    builder.define(class.class, DefCore::Class(class_def));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let instance = surface::Term::ClassExt(
        range(),
        true,
        Box::new(global(class.class)),
        vec![implement(class.fields[0], None, number(&interner, "0"))],
    );
    let (_, _, messages) = elab(&mut context, &instance, None);

    assert_eq!(missing_fields(&messages), vec![vec![globals.name(class.fields[2])]]);
}

#[test]
fn default_reading_an_implementation_that_reads_it_is_a_cycle() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let class = TestClass::declare(&mut builder, "C", &["a", "b"]);
    // b => this.a
    let class_def = class.def(true).with_default(class.fields[1], class.field_of_this(0));
    builder.define(class.class, DefCore::Class(class_def));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    // \new C { | a => this.b }
    let this = LocalId::new(0);
    let read_b = surface::Term::FieldAccess(
        range(),
        Box::new(surface::Term::Local(range(), this)),
        class.fields[1],
    );
    let instance = surface::Term::ClassExt(
        range(),
        true,
        Box::new(global(class.class)),
        vec![implement(class.fields[0], Some(this), read_b)],
    );
    let (_, _, messages) = elab(&mut context, &instance, None);

    assert_eq!(count(&messages, |m| matches!(m, Message::ImplementationCycle { .. })), 1);
    assert_eq!(count(&messages, |m| matches!(m, Message::FieldsNotImplemented { .. })), 0);
}

#[test]
fn instances_are_found_for_implicit_class_arguments() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let show = TestClass::declare(&mut builder, "Show", &["show"]);
    builder.define(show.class, DefCore::Class(show.def(false)));
    let eq = TestClass::declare(&mut builder, "Eq", &["eq"]);
    builder.define(eq.class, DefCore::Class(eq.def(false)));

    let show_type = Arc::new(Term::ClassCall(ClassCall::bare(show.class, LevelArgs::empty(), Sort::SET0)));
    let eq_type = Arc::new(Term::ClassCall(ClassCall::bare(eq.class, LevelArgs::empty(), Sort::SET0)));
    let nat_type = prim::data_call(builder.prelude().nat);

    let nat_show = builder.declare("natShow", LevelParams::none());
    builder.define(
        nat_show,
        DefCore::Function(FunctionDef {
            kind: FunctionKind::Instance(show.class),
            params: Vec::new(),
            result_type: show_type.clone(),
            body: None,
        }),
    );
    builder.register_instance(show.class, nat_show);

    let mut declare_user = |name: &str, class_type: &ArcTerm| {
        let def = builder.declare(name, LevelParams::none());
        let param = cumulant::core::Param::implicit(Binding::new(None, class_type.clone()));
        let core = DefCore::Function(FunctionDef {
            kind: FunctionKind::Function,
            params: vec![param],
            result_type: nat_type.clone(),
            body: None,
        });
        builder.define(def, core);
        def
    };
    let describe = declare_user("describe", &show_type);
    let compare = declare_user("compare", &eq_type);
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let (term, _, messages) = elab(&mut context, &global(describe), None);
    assert!(messages.is_empty(), "{messages:?}");
    match term.as_ref() {
        Term::FunCall(def, _, args) => {
            assert_eq!(*def, describe);
            assert!(matches!(args[0].as_ref(), Term::FunCall(instance, _, _) if *instance == nat_show));
        }
        _ => panic!("expected a call of `describe`, found {term:?}"),
    }

    let (_, _, messages) = elab(&mut context, &global(compare), None);
    assert_eq!(count(&messages, |m| matches!(m, Message::InstanceNotFound { .. })), 1);
}

struct Answer {
    calls: Cell<usize>,
}

impl MetaResolver for Answer {
    fn invoke(&self, _: &mut Context<'_, '_>, call: &MetaCall) -> MetaOutcome {
        self.calls.set(self.calls.get() + 1);
        match (self.calls.get(), &call.expected_type) {
            (1, _) => MetaOutcome::Defer(Stage::BeforeLevels),
            (_, Some(_)) => MetaOutcome::Done(prim::nat_lit(42)),
            (_, None) => MetaOutcome::Failed,
        }
    }
}

#[test]
fn deferred_meta_calls_are_solved_when_finalizing() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let answer = Arc::new(Answer { calls: Cell::new(0) });
    let def = builder.declare("answer", LevelParams::none());
    builder.define(def, DefCore::Meta(MetaDef { resolver: answer.clone() }));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let term = context.check(&global(def), &nat(&globals));
    assert!(matches!(term.as_ref(), Term::Meta(_)));
    assert_eq!(answer.calls.get(), 1);

    context.finalize();
    let term = context.zonk(&term);
    assert!(matches!(term.as_ref(), Term::Lit(Literal::Nat(42))));
    assert_eq!(answer.calls.get(), 2);
    assert_eq!(context.drain_messages().count(), 0);
}

#[test]
fn unsolved_holes_are_reported_once() {
    let interner = RefCell::new(StringInterner::new());
    let globals = GlobalsBuilder::new(&interner).build();
    let mut context = Context::new(&interner, &globals);

    let (term, _, messages) = elab(&mut context, &surface::Term::Hole(range()), None);
    assert!(term.is_error());
    assert_eq!(count(&messages, |m| matches!(m, Message::UnsolvedMeta { .. })), 1);
}

#[test]
fn array_literals_elaborate_against_arrays() {
    let interner = RefCell::new(StringInterner::new());
    let globals = GlobalsBuilder::new(&interner).build();
    let mut context = Context::new(&interner, &globals);

    let elems = vec![number(&interner, "1"), number(&interner, "2")];
    let (term, r#type, messages) = elab(&mut context, &surface::Term::Array(range(), elems), None);
    assert!(messages.is_empty(), "{messages:?}");
    match (term.as_ref(), r#type.as_ref()) {
        (Term::Array(array), Term::ClassCall(class_call)) => {
            assert_eq!(array.elems.len(), 2);
            let len = class_call.implementation(globals.prelude().darray_len);
            assert!(matches!(len.map(|len| len.as_ref()), Some(Term::Lit(Literal::Nat(2)))));
        }
        _ => panic!("expected an array, found {term:?}"),
    }

    let (_, _, messages) = elab(&mut context, &surface::Term::Array(range(), Vec::new()), None);
    assert_eq!(count(&messages, |m| matches!(m, Message::AmbiguousArrayLiteral { .. })), 1);
}

#[test]
fn field_implementations_unfold_in_field_types() {
    let interner = RefCell::new(StringInterner::new());
    let globals = GlobalsBuilder::new(&interner).build();
    let prelude = globals.prelude();
    let this = Binding::new(None, nat(&globals));
    let len = Arc::new(Term::FieldCall(prelude.darray_len, this.to_term()));
    let r#type = Arc::new(Term::DataCall(prelude.fin, LevelArgs::empty(), vec![len]));

    let mut subst = Substitution::new().with_field_impls(&this, vec![(prelude.darray_len, prim::nat_lit(4))]);
    assert!(semantics::alpha_eq(&subst.apply(&r#type), &fin(&globals, 4)));
}

#[test]
fn new_instances_report_exactly_the_missing_fields() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let class = TestClass::declare(&mut builder, "D", &["a", "b", "c"]);
    builder.define(class.class, DefCore::Class(class.def(true)));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let instance = |count: usize| {
        let impls = (class.fields.iter().take(count))
            .map(|field| implement(*field, None, number(&interner, "0")))
            .collect();
        surface::Term::ClassExt(range(), true, Box::new(global(class.class)), impls)
    };

    let (term, _, messages) = elab(&mut context, &instance(3), None);
    assert!(messages.is_empty(), "{messages:?}");
    assert!(matches!(term.as_ref(), Term::New(class_call) if class_call.impls.len() == 3));

    let (_, _, messages) = elab(&mut context, &instance(2), None);
    assert_eq!(missing_fields(&messages), vec![vec![globals.name(class.fields[2])]]);
}

#[test]
fn fields_implemented_by_the_expected_type_are_not_missing() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let class = TestClass::declare(&mut builder, "D", &["a", "b", "c"]);
    builder.define(class.class, DefCore::Class(class.def(true)));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    // D { | b => 1 | c => 2 }
    let expected_type = Arc::new(Term::ClassCall(ClassCall {
        class: class.class,
        levels: LevelArgs::empty(),
        this: ClassCall::this_binding(None, class.class, &LevelArgs::empty(), Sort::SET0),
        impls: vec![(class.fields[1], prim::nat_lit(1)), (class.fields[2], prim::nat_lit(2))],
        sort: Sort::SET0,
    }));
    // \new D { | a => 0 }
    let instance = surface::Term::ClassExt(
        range(),
        true,
        Box::new(global(class.class)),
        vec![implement(class.fields[0], None, number(&interner, "0"))],
    );

    let (term, _, messages) = elab(&mut context, &instance, Some(&expected_type));
    assert!(messages.is_empty(), "{messages:?}");
    match term.as_ref() {
        Term::New(class_call) => {
            assert_eq!(class_call.impls.len(), 3);
            let c = class_call.implementation(class.fields[2]);
            assert!(matches!(c.map(|c| c.as_ref()), Some(Term::Lit(Literal::Nat(2)))));
        }
        _ => panic!("expected an instance, found {term:?}"),
    }
}

#[test]
fn class_extensions_take_the_sort_of_the_expected_universe() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let params = LevelParams {
        p: vec![builder.name("lp"), builder.name("lq")],
        h: Vec::new(),
        p_order: LevelOrder::Increasing,
        h_order: LevelOrder::Increasing,
    };
    let class = builder.declare("E", params.clone());
    let x = builder.declare("x", params.clone());
    let y = builder.declare("y", params.clone());
    let class_sort = Sort::new(Level::param(LevelKind::P, 1), Level::ZERO);
    let this = ClassCall::this_binding(
        Some(builder.name("this")),
        class,
        &LevelArgs::identity(&params),
        class_sort,
    );
    let nat_type = prim::data_call(builder.prelude().nat);
    for (field, index) in [(x, 0), (y, 1)] {
        let core = DefCore::Field(FieldDef {
            class,
            this: this.clone(),
            r#type: nat_type.clone(),
            sort: Sort::new(Level::param(LevelKind::P, index), Level::ZERO),
            is_parameter: false,
            is_explicit: true,
        });
        builder.define(field, core);
    }
    builder.define(class, DefCore::Class(ClassDef::new(true, vec![x, y], this, class_sort)));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    // The two fields live at unrelated levels, so only the expected
    // universe bounds the sort of the extension.
    let universe = Term::universe(Sort::new(Level::Const(5), Level::ZERO));
    let extension = surface::Term::ClassExt(range(), false, Box::new(global(class)), Vec::new());
    let (term, _, messages) = elab(&mut context, &extension, Some(&universe));
    assert!(messages.is_empty(), "{messages:?}");
    match term.as_ref() {
        Term::ClassCall(class_call) => {
            assert_eq!(class_call.sort, Sort::new(Level::Const(5), Level::ZERO));
        }
        _ => panic!("expected a class call, found {term:?}"),
    }
}

#[test]
fn explicit_level_arguments_follow_the_parameter_order() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let params = LevelParams {
        p: vec![builder.name("lp"), builder.name("lq")],
        h: Vec::new(),
        p_order: LevelOrder::Increasing,
        h_order: LevelOrder::Increasing,
    };
    let nat_type = prim::data_call(builder.prelude().nat);
    let f = declare_constant(&mut builder, "f", params, nat_type, None);
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let with_levels = |p: &[i32]| {
        let p = p.iter().map(|level| surface::Level::Const(range(), *level)).collect();
        surface::Term::Global(range(), f, Some(surface::LevelArgs { p, h: Vec::new() }))
    };

    let (_, _, messages) = elab(&mut context, &with_levels(&[3, 1]), None);
    assert_eq!(count(&messages, |m| matches!(m, Message::LevelEquationFailed { .. })), 1);

    // The missing argument is bounded below by the one before it
    let (term, _, messages) = elab(&mut context, &with_levels(&[3]), None);
    assert!(messages.is_empty(), "{messages:?}");
    match term.as_ref() {
        Term::FunCall(def, levels, _) => {
            assert_eq!(*def, f);
            assert_eq!(levels.p, vec![Level::Const(3), Level::Const(3)]);
        }
        _ => panic!("expected a call of `f`, found {term:?}"),
    }
}

/// Returns a variable that is not in scope at the call.
struct OutOfScope {
    calls: Cell<usize>,
    r#type: ArcTerm,
}

impl MetaResolver for OutOfScope {
    fn invoke(&self, _: &mut Context<'_, '_>, _: &MetaCall) -> MetaOutcome {
        self.calls.set(self.calls.get() + 1);
        match self.calls.get() {
            1 => MetaOutcome::Defer(Stage::BeforeLevels),
            _ => MetaOutcome::Done(Binding::new(None, self.r#type.clone()).to_term()),
        }
    }
}

#[test]
fn rejected_meta_results_are_reported_once() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let nat_type = prim::data_call(builder.prelude().nat);
    let resolver = Arc::new(OutOfScope {
        calls: Cell::new(0),
        r#type: nat_type.clone(),
    });
    let def = builder.declare("escape", LevelParams::none());
    builder.define(def, DefCore::Meta(MetaDef { resolver }));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let (term, _, messages) = elab(&mut context, &global(def), Some(&nat_type));
    assert!(term.is_error());
    assert_eq!(count(&messages, |m| matches!(m, Message::FailedToUnify { .. })), 1);
    assert_eq!(count(&messages, |m| matches!(m, Message::UnsolvedMeta { .. })), 0);
}

/// Waits until the levels of its expected type are known.
struct AfterLevels {
    calls: Cell<usize>,
    seen: RefCell<Option<ArcTerm>>,
    answer: ArcTerm,
}

impl MetaResolver for AfterLevels {
    fn invoke(&self, _: &mut Context<'_, '_>, call: &MetaCall) -> MetaOutcome {
        self.calls.set(self.calls.get() + 1);
        match self.calls.get() {
            1 => MetaOutcome::Defer(Stage::BeforeLevels),
            2 => MetaOutcome::Defer(Stage::AfterLevels),
            _ => {
                *self.seen.borrow_mut() = call.expected_type.clone();
                MetaOutcome::Done(self.answer.clone())
            }
        }
    }
}

#[test]
fn meta_calls_deferred_past_level_solving_see_solved_levels() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let resolver = Arc::new(AfterLevels {
        calls: Cell::new(0),
        seen: RefCell::new(None),
        answer: prim::data_call(builder.prelude().nat),
    });
    let def = builder.declare("someType", LevelParams::none());
    builder.define(def, DefCore::Meta(MetaDef { resolver: resolver.clone() }));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);
    context.set_config(Config {
        degenerate_universes: false,
        ..Config::default()
    });

    // (someType : \Type)
    let universe = surface::Term::Universe(range(), surface::UniverseKind::Type, None, None);
    let term = surface::Term::Ann(range(), Box::new(global(def)), Box::new(universe));
    let (term, _, messages) = elab(&mut context, &term, None);

    assert!(messages.is_empty(), "{messages:?}");
    assert_eq!(resolver.calls.get(), 3);
    assert!(semantics::alpha_eq(&term, &nat(&globals)));
    match resolver.seen.borrow().as_deref() {
        Some(Term::Universe(sort)) => assert!(!sort.has_infer_vars(), "{sort:?}"),
        seen => panic!("expected a universe, found {seen:?}"),
    };
}

#[test]
fn cancelled_elaboration_returns_no_result() {
    let interner = RefCell::new(StringInterner::new());
    let globals = GlobalsBuilder::new(&interner).build();
    let mut context = Context::new(&interner, &globals);
    let token = CancellationToken::new();
    context.set_cancellation_token(token.clone());

    token.cancel();
    let result = context.elab_term(&number(&interner, "1"), None, &mut |_| {});
    assert!(matches!(result, Err(Cancelled)));
}

#[test]
fn subclass_instances_widen_to_their_superclass() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let base = TestClass::declare(&mut builder, "Base", &["a"]);
    builder.define(base.class, DefCore::Class(base.def(true)));

    let sub = builder.declare("Sub", LevelParams::none());
    let b = builder.declare("b", LevelParams::none());
    let sub_this = ClassCall::this_binding(Some(builder.name("this")), sub, &LevelArgs::empty(), Sort::SET0);
    let nat_type = prim::data_call(builder.prelude().nat);
    let field = FieldDef {
        class: sub,
        this: sub_this.clone(),
        r#type: nat_type,
        sort: Sort::SET0,
        is_parameter: false,
        is_explicit: true,
    };
    builder.define(b, DefCore::Field(field));
    let mut sub_def = ClassDef::new(true, vec![base.fields[0], b], sub_this.clone(), Sort::SET0);
    sub_def.super_classes.push(base.class);
    builder.define(sub, DefCore::Class(sub_def));

    // g : Sub => \new Sub { | a => 0 | b => 1 }
    let sub_type = Arc::new(Term::ClassCall(ClassCall::bare(sub, LevelArgs::empty(), Sort::SET0)));
    let instance = Arc::new(Term::New(ClassCall {
        class: sub,
        levels: LevelArgs::empty(),
        this: sub_this,
        impls: vec![(base.fields[0], prim::nat_lit(0)), (b, prim::nat_lit(1))],
        sort: Sort::PROP,
    }));
    let g = declare_constant(&mut builder, "g", LevelParams::none(), sub_type, Some(instance));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    // Base { | a => 0 }
    let expected_type = Arc::new(Term::ClassCall(ClassCall {
        class: base.class,
        levels: LevelArgs::empty(),
        this: base.this.clone(),
        impls: vec![(base.fields[0], prim::nat_lit(0))],
        sort: Sort::SET0,
    }));
    let (term, _, messages) = elab(&mut context, &global(g), Some(&expected_type));
    assert!(messages.is_empty(), "{messages:?}");
    let widened = match term.as_ref() {
        Term::New(class_call) => class_call.clone(),
        _ => panic!("expected an instance of `Base`, found {term:?}"),
    };
    assert_eq!(widened.class, base.class);
    assert_eq!(widened.impls.len(), 1);

    // The widened instance has the type of `\new Base { | a => 0 }`
    let direct = surface::Term::ClassExt(
        range(),
        true,
        Box::new(global(base.class)),
        vec![implement(base.fields[0], None, number(&interner, "0"))],
    );
    let (_, r#type, messages) = elab(&mut context, &direct, None);
    assert!(messages.is_empty(), "{messages:?}");
    match r#type.as_ref() {
        Term::ClassCall(class_call) => assert_eq!(widened.sort, class_call.sort),
        _ => panic!("expected a class call, found {:?}", r#type),
    }
}

#[test]
fn functions_on_finite_types_become_arrays() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let prelude = builder.prelude().clone();
    let fin_two = Arc::new(Term::DataCall(prelude.fin, LevelArgs::empty(), vec![prim::nat_lit(2)]));
    let index = Binding::new(None, fin_two);
    let function_type = Arc::new(Term::Pi(Sort::SET0, Plicity::Explicit, index, prim::data_call(prelude.nat)));
    let h = declare_constant(&mut builder, "h", LevelParams::none(), function_type, None);
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let levels = LevelArgs {
        p: vec![Level::ZERO],
        h: vec![Level::ZERO],
    };
    let array_type = Arc::new(Term::ClassCall(ClassCall::bare(prelude.darray, levels, Sort::SET0)));
    let (term, _, messages) = elab(&mut context, &global(h), Some(&array_type));
    assert!(messages.is_empty(), "{messages:?}");
    match term.as_ref() {
        Term::New(class_call) => {
            assert_eq!(class_call.class, prelude.darray);
            let len = class_call.implementation(prelude.darray_len);
            assert!(matches!(len.map(|len| len.as_ref()), Some(Term::Lit(Literal::Nat(2)))));
        }
        _ => panic!("expected an array, found {term:?}"),
    }
}

#[test]
fn paths_and_functions_on_the_interval_coerce_to_each_other() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let prelude = builder.prelude().clone();
    let nat_type = prim::data_call(prelude.nat);
    let interval = prim::data_call(prelude.interval);
    let line = Arc::new(Term::Lam(
        Plicity::Explicit,
        Binding::new(None, interval.clone()),
        nat_type.clone(),
    ));
    let levels = LevelArgs {
        p: vec![Level::ZERO],
        h: vec![Level::ZERO],
    };
    let path_type = Arc::new(Term::DataCall(
        prelude.path,
        levels,
        vec![line, prim::nat_lit(0), prim::nat_lit(0)],
    ));
    let function_type = Arc::new(Term::Pi(
        Sort::SET0,
        Plicity::Explicit,
        Binding::new(None, interval.clone()),
        nat_type.clone(),
    ));

    let p = declare_constant(&mut builder, "p", LevelParams::none(), path_type.clone(), None);
    // k => \lam _ => 0
    let constant = Arc::new(Term::Lam(Plicity::Explicit, Binding::new(None, interval), prim::nat_lit(0)));
    let k = declare_constant(&mut builder, "k", LevelParams::none(), function_type.clone(), Some(constant));
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let (term, _, messages) = elab(&mut context, &global(p), Some(&function_type));
    assert!(messages.is_empty(), "{messages:?}");
    assert!(matches!(term.as_ref(), Term::Lam(Plicity::Explicit, _, body) if matches!(body.as_ref(), Term::At(..))));

    let (term, _, messages) = elab(&mut context, &global(k), Some(&path_type));
    assert!(messages.is_empty(), "{messages:?}");
    assert!(matches!(term.as_ref(), Term::PathLam(_)));
}

#[test]
fn type_wrappers_are_wrapped_and_unwrapped() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let nat_type = prim::data_call(builder.prelude().nat);
    let wrapper = builder.declare("Wrapped", LevelParams::none());
    builder.define(
        wrapper,
        DefCore::Function(FunctionDef {
            kind: FunctionKind::TypeWrapper,
            params: Vec::new(),
            result_type: Term::universe(Sort::SET0),
            body: Some(nat_type.clone()),
        }),
    );
    let wrapped_type = Arc::new(Term::FunCall(wrapper, LevelArgs::empty(), Vec::new()));
    let w = declare_constant(&mut builder, "w", LevelParams::none(), wrapped_type.clone(), None);
    let n = declare_constant(&mut builder, "n", LevelParams::none(), nat_type.clone(), None);
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let (term, _, messages) = elab(&mut context, &global(w), Some(&nat_type));
    assert!(messages.is_empty(), "{messages:?}");
    assert!(matches!(term.as_ref(), Term::TypeCoerce(coerce) if coerce.unwrap && coerce.wrapper == wrapper));

    let (term, _, messages) = elab(&mut context, &global(n), Some(&wrapped_type));
    assert!(messages.is_empty(), "{messages:?}");
    assert!(matches!(term.as_ref(), Term::TypeCoerce(coerce) if !coerce.unwrap && coerce.wrapper == wrapper));
}

#[test]
fn finite_numbers_coerce_to_integers() {
    let interner = RefCell::new(StringInterner::new());
    let mut builder = GlobalsBuilder::new(&interner);
    let prelude = builder.prelude().clone();
    let fin_three = Arc::new(Term::DataCall(prelude.fin, LevelArgs::empty(), vec![prim::nat_lit(3)]));
    let index = declare_constant(&mut builder, "index", LevelParams::none(), fin_three, None);
    let globals = builder.build();
    let mut context = Context::new(&interner, &globals);

    let int = prim::data_call(prelude.int);
    let (term, _, messages) = elab(&mut context, &global(index), Some(&int));
    assert!(messages.is_empty(), "{messages:?}");
    assert!(matches!(term.as_ref(), Term::ConCall(con_call) if con_call.con == prelude.pos));
}
