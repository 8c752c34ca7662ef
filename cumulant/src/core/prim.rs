//! Built-in definitions.

use std::sync::Arc;

use crate::core::level::LevelKind;
use crate::core::{
    ArcTerm, ArrayTerm, Binding, ClassCall, ConCall, DefId, Level, LevelArgs, LevelParams,
    Literal, Param, PathLam, Plicity, Sort, Term,
};
use crate::globals::{
    ClassDef, ConstructorDef, DataDef, DefCore, FieldDef, FunctionDef, FunctionKind, Globals,
    GlobalsBuilder,
};

/// The definitions that elaboration treats specially.
#[derive(Debug, Clone)]
pub struct Prelude {
    pub nat: DefId,
    pub zero: DefId,
    pub suc: DefId,
    pub int: DefId,
    pub pos: DefId,
    pub neg: DefId,
    pub fin: DefId,
    pub string: DefId,
    /// The interval type, `I`.
    pub interval: DefId,
    pub left: DefId,
    pub right: DefId,
    pub path: DefId,
    pub idp: DefId,
    /// Path application, `@`.
    pub at: DefId,
    pub darray: DefId,
    pub darray_len: DefId,
    /// The field holding the type of the elements, `A`.
    pub darray_elem: DefId,
    pub darray_at: DefId,
}

/// A reference to a data type with no parameters.
pub fn data_call(data: DefId) -> ArcTerm {
    Arc::new(Term::DataCall(data, LevelArgs::empty(), Vec::new()))
}

pub fn nat_lit(value: u64) -> ArcTerm {
    Arc::new(Term::Lit(Literal::Nat(value)))
}

/// The `left` or `right` endpoint of the interval.
pub fn interval_endpoint(con: DefId) -> ArcTerm {
    Arc::new(Term::ConCall(ConCall {
        con,
        levels: LevelArgs::empty(),
        data_args: Vec::new(),
        args: Vec::new(),
    }))
}

pub fn literal_type(prelude: &Prelude, literal: &Literal) -> ArcTerm {
    match literal {
        Literal::Nat(_) => data_call(prelude.nat),
        Literal::Fin(_, bound) => Arc::new(Term::DataCall(
            prelude.fin,
            LevelArgs::empty(),
            vec![nat_lit(*bound)],
        )),
        Literal::Int(_) => data_call(prelude.int),
        Literal::String(_) => data_call(prelude.string),
    }
}

/// The sort of an array class with the given levels, with the length and
/// element type implemented.
fn array_sort(globals: &Globals, levels: &LevelArgs) -> Sort {
    match globals.field(globals.prelude().darray_at) {
        Some(field) => field.sort.subst(&|var| levels.get(var)),
        None => Sort::SET0,
    }
}

/// The type of an array literal.
pub fn array_type(globals: &Globals, array: &ArrayTerm) -> ClassCall {
    let prelude = globals.prelude();
    let class_sort = match globals.class(prelude.darray) {
        Some(class) => class.sort.subst(&|var| array.levels.get(var)),
        None => Sort::SET0,
    };
    let this = ClassCall::this_binding(None, prelude.darray, &array.levels, class_sort);
    ClassCall {
        class: prelude.darray,
        levels: array.levels.clone(),
        this,
        impls: vec![
            (prelude.darray_len, nat_lit(array.elems.len() as u64)),
            (prelude.darray_elem, array.elem_line.clone()),
        ],
        sort: array_sort(globals, &array.levels),
    }
}

/// Define the built-in definitions.
pub fn define_prelude(builder: &mut GlobalsBuilder<'_>) -> Prelude {
    let std_levels = builder.standard_levels();
    let identity = LevelArgs::identity(&std_levels);
    let lp = Level::param(LevelKind::P, 0);
    let lh = Level::param(LevelKind::H, 0);
    let std_sort = Sort::new(lp, lh);
    let large_sort = Sort::new(lp.succ(), lh.succ());
    let binding = |name: Option<&str>, r#type: ArcTerm, builder: &GlobalsBuilder<'_>| {
        Binding::new(name.map(|name| builder.name(name)), r#type)
    };

    // Natural numbers and integers
    let nat = builder.declare("Nat", LevelParams::none());
    let zero = builder.declare("zero", LevelParams::none());
    let suc = builder.declare("suc", LevelParams::none());
    let int = builder.declare("Int", LevelParams::none());
    let pos = builder.declare("pos", LevelParams::none());
    let neg = builder.declare("neg", LevelParams::none());
    let nat_type = data_call(nat);

    builder.define(
        nat,
        DefCore::Data(DataDef {
            params: Vec::new(),
            sort: Sort::SET0,
            constructors: vec![zero, suc],
        }),
    );
    builder.define(
        zero,
        DefCore::Constructor(ConstructorDef {
            data: nat,
            params: Vec::new(),
        }),
    );
    for (con, data) in [(suc, nat), (pos, int), (neg, int)] {
        let n = binding(Some("n"), nat_type.clone(), builder);
        builder.define(
            con,
            DefCore::Constructor(ConstructorDef {
                data,
                params: vec![Param::explicit(n)],
            }),
        );
    }
    builder.define(
        int,
        DefCore::Data(DataDef {
            params: Vec::new(),
            sort: Sort::SET0,
            constructors: vec![pos, neg],
        }),
    );

    // Finite sets and strings
    let fin = builder.declare("Fin", LevelParams::none());
    let bound = binding(Some("n"), nat_type.clone(), builder);
    builder.define(
        fin,
        DefCore::Data(DataDef {
            params: vec![Param::explicit(bound)],
            sort: Sort::SET0,
            constructors: Vec::new(),
        }),
    );
    let fin_of = |len: ArcTerm| Arc::new(Term::DataCall(fin, LevelArgs::empty(), vec![len]));

    let string = builder.declare("String", LevelParams::none());
    builder.define(
        string,
        DefCore::Data(DataDef {
            params: Vec::new(),
            sort: Sort::SET0,
            constructors: Vec::new(),
        }),
    );

    // The interval
    let interval = builder.declare("I", LevelParams::none());
    let left = builder.declare("left", LevelParams::none());
    let right = builder.declare("right", LevelParams::none());
    builder.define(
        interval,
        DefCore::Data(DataDef {
            params: Vec::new(),
            sort: Sort::SET0,
            constructors: vec![left, right],
        }),
    );
    for con in [left, right] {
        let core = DefCore::Constructor(ConstructorDef {
            data: interval,
            params: Vec::new(),
        });
        builder.define(con, core);
    }
    let interval_type = data_call(interval);
    let line_type = |builder: &GlobalsBuilder<'_>| {
        let i = binding(Some("i"), interval_type.clone(), builder);
        Arc::new(Term::Pi(large_sort, Plicity::Explicit, i, Term::universe(std_sort)))
    };

    // Paths
    let path = builder.declare("Path", std_levels.clone());
    {
        let line = binding(Some("A"), line_type(builder), builder);
        let start_type = Term::app(line.to_term(), interval_endpoint(left));
        let end_type = Term::app(line.to_term(), interval_endpoint(right));
        let start = binding(Some("a"), start_type, builder);
        let end = binding(Some("a'"), end_type, builder);
        builder.define(
            path,
            DefCore::Data(DataDef {
                params: vec![
                    Param::explicit(line),
                    Param::explicit(start),
                    Param::explicit(end),
                ],
                sort: std_sort,
                constructors: Vec::new(),
            }),
        );
    }

    let idp = builder.declare("idp", std_levels.clone());
    {
        let r#type = binding(Some("A"), Term::universe(std_sort), builder);
        let value = binding(Some("a"), r#type.to_term(), builder);
        let constant_line = |builder: &GlobalsBuilder<'_>| {
            let i = binding(None, interval_type.clone(), builder);
            Arc::new(Term::Lam(Plicity::Explicit, i, r#type.to_term()))
        };
        let result_type = Arc::new(Term::DataCall(
            path,
            identity.clone(),
            vec![constant_line(builder), value.to_term(), value.to_term()],
        ));
        let body = Arc::new(Term::PathLam(PathLam {
            levels: identity.clone(),
            line: constant_line(builder),
            binding: binding(Some("i"), interval_type.clone(), builder),
            body: value.to_term(),
        }));
        builder.define(
            idp,
            DefCore::Function(FunctionDef {
                kind: FunctionKind::Function,
                params: vec![Param::implicit(r#type), Param::implicit(value)],
                result_type,
                body: Some(body),
            }),
        );
    }

    let at = builder.declare("@", std_levels.clone());
    {
        let line = binding(Some("A"), line_type(builder), builder);
        let start_type = Term::app(line.to_term(), interval_endpoint(left));
        let end_type = Term::app(line.to_term(), interval_endpoint(right));
        let start = binding(Some("a"), start_type, builder);
        let end = binding(Some("a'"), end_type, builder);
        let path_type = Arc::new(Term::DataCall(
            path,
            identity.clone(),
            vec![line.to_term(), start.to_term(), end.to_term()],
        ));
        let p = binding(Some("p"), path_type, builder);
        let i = binding(Some("i"), interval_type.clone(), builder);
        builder.define(
            at,
            DefCore::Function(FunctionDef {
                kind: FunctionKind::Function,
                result_type: Term::app(line.to_term(), i.to_term()),
                body: Some(Arc::new(Term::At(p.to_term(), i.to_term()))),
                params: vec![
                    Param::implicit(line),
                    Param::implicit(start),
                    Param::implicit(end),
                    Param::explicit(p),
                    Param::explicit(i),
                ],
            }),
        );
    }

    // Dependent arrays
    let darray = builder.declare("DArray", std_levels.clone());
    let darray_len = builder.declare("len", std_levels.clone());
    let darray_elem = builder.declare("A", std_levels.clone());
    let darray_at = builder.declare("at", std_levels);
    {
        let this = ClassCall::this_binding(Some(builder.name("this")), darray, &identity, large_sort);
        let len = Arc::new(Term::FieldCall(darray_len, this.to_term()));

        let j = binding(Some("j"), fin_of(len.clone()), builder);
        let elem_type = Arc::new(Term::Pi(large_sort, Plicity::Explicit, j, Term::universe(std_sort)));
        let j = binding(Some("j"), fin_of(len), builder);
        let elem = Term::app(
            Arc::new(Term::FieldCall(darray_elem, this.to_term())),
            j.to_term(),
        );
        let at_type = Arc::new(Term::Pi(std_sort, Plicity::Explicit, j, elem));

        let fields = [
            (darray_len, nat_type, Sort::SET0, true, true),
            (darray_elem, elem_type, large_sort, true, false),
            (darray_at, at_type, std_sort, false, true),
        ];
        for (field, r#type, sort, is_parameter, is_explicit) in fields {
            let core = DefCore::Field(FieldDef {
                class: darray,
                this: this.clone(),
                r#type,
                sort,
                is_parameter,
                is_explicit,
            });
            builder.define(field, core);
        }

        let class = ClassDef::new(true, vec![darray_len, darray_elem, darray_at], this, large_sort);
        builder.define(darray, DefCore::Class(class));
    }

    Prelude {
        nat,
        zero,
        suc,
        int,
        pos,
        neg,
        fin,
        string,
        interval,
        left,
        right,
        path,
        idp,
        at,
        darray,
        darray_len,
        darray_elem,
        darray_at,
    }
}
