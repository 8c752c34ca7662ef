//! Elaboration of class extensions and instances.
//!
//! A class extension implements some fields of a class, producing either a
//! more specific class or (when it is an instance) a record value. Fields are
//! implemented in the order they are written, so an implementation can refer
//! to fields that were implemented before it through `this`. Implementations
//! that end up reading themselves are rejected.

use fxhash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use crate::core::semantics::{self, Substitution};
use crate::core::{ArcTerm, Binding, ClassCall, DefId, LevelArgs, Sort, Term};
use crate::globals::ClassDef;
use crate::source::{FileRange, StringId};
use crate::surface::elaboration::reporting::Message;
use crate::surface::elaboration::{rebind_this, Cmp, Context};
use crate::surface::{self, ImplTarget, LocalId};

/// An implementation of a field, or of every field of an ancestor class.
#[derive(Debug, Copy, Clone)]
pub struct ImplItem<'a> {
    pub range: FileRange,
    pub target: ImplTarget,
    pub this: Option<LocalId>,
    pub expr: &'a surface::Term,
}

impl<'a> ImplItem<'a> {
    pub fn from_surface(implementation: &'a surface::Implementation) -> ImplItem<'a> {
        ImplItem {
            range: implementation.range,
            target: implementation.target,
            this: implementation.this,
            expr: &implementation.expr,
        }
    }
}

/// The implementations installed so far, along with the fields that each of
/// them reads through `this`.
#[derive(Default)]
struct Installed {
    impls: Vec<(DefId, ArcTerm)>,
    dependencies: FxHashMap<DefId, Vec<DefId>>,
}

impl Installed {
    fn has(&self, field: DefId) -> bool {
        self.impls.iter().any(|(f, _)| *f == field)
    }

    fn get(&self, field: DefId) -> Option<&ArcTerm> {
        self.impls.iter().find_map(|(f, value)| (*f == field).then_some(value))
    }

    fn install(&mut self, field: DefId, value: ArcTerm, this: &Binding) {
        let reads = semantics::field_dependencies(&value, this);
        self.dependencies.insert(field, reads);
        self.impls.push((field, value));
    }

    /// A chain of fields leading from `field` back to itself, if installing
    /// an implementation that reads `reads` would create one.
    fn cycle(&self, field: DefId, reads: &[DefId]) -> Option<Vec<DefId>> {
        let mut stack: Vec<_> = reads.iter().map(|read| vec![field, *read]).collect();
        let mut visited = FxHashSet::default();

        while let Some(path) = stack.pop() {
            let current = *path.last()?;
            if current == field {
                return Some(path);
            }
            if !visited.insert(current) {
                continue;
            }
            for next in self.dependencies.get(&current).into_iter().flatten() {
                let mut next_path = path.clone();
                next_path.push(*next);
                stack.push(next_path);
            }
        }
        None
    }
}

impl<'interner, 'globals> Context<'interner, 'globals> {
    /// A reference to a class with none of its fields implemented.
    pub(crate) fn class_call_of(&self, class: DefId, levels: LevelArgs) -> ClassCall {
        let sort = match self.globals.class(class) {
            Some(class_def) => class_def.sort.subst(&|var| levels.get(var)),
            None => Sort::SET0,
        };
        ClassCall::bare(class, levels, sort)
    }

    /// Elaborate the class being extended by a class extension.
    pub(crate) fn elab_class_base(&mut self, term: &surface::Term) -> Option<ClassCall> {
        if let surface::Term::Global(range, def, levels) = term {
            if self.globals.class(*def).is_some() {
                let levels = self.instantiate_levels(*range, *def, levels.as_ref());
                return Some(self.class_call_of(*def, levels));
            }
        }

        let range = term.range();
        let (r#type, _) = self.check_type(term);
        let type_whnf = self.whnf(&r#type);
        match type_whnf.as_ref() {
            Term::ClassCall(class_call) => Some(class_call.clone()),
            Term::Error(_) => None,
            _ => {
                let found = self.pretty(&r#type);
                self.push_message(Message::NotAClass { range, found });
                None
            }
        }
    }

    /// Match positional arguments with the parameter fields of a class that
    /// are not implemented yet, returning the arguments that are left over.
    pub(crate) fn positional_impls<'a>(
        &self,
        base: &ClassCall,
        args: &'a [surface::Arg],
    ) -> (Vec<ImplItem<'a>>, &'a [surface::Arg]) {
        let globals = self.globals;
        let params = match globals.class(base.class) {
            Some(class) => (class.fields.iter())
                .filter(|field| !base.is_implemented(**field) && class.implementation(**field).is_none())
                .filter_map(|field| Some((*field, globals.field(*field)?)))
                .filter(|(_, field)| field.is_parameter)
                .collect(),
            None => Vec::new(),
        };

        let mut items = Vec::new();
        let mut params = params.into_iter();
        let mut next_arg = 0;
        while let Some(arg) = args.get(next_arg) {
            let param = params.find(|(_, field)| field.is_explicit == arg.plicity.is_explicit());
            match param {
                Some((field, _)) => items.push(ImplItem {
                    range: arg.term.range(),
                    target: ImplTarget::Field(field),
                    this: None,
                    expr: &arg.term,
                }),
                None => break,
            }
            next_arg += 1;
        }

        (items, &args[next_arg..])
    }

    /// The type of a field, accessed on an instance.
    ///
    /// Accesses of the fields in `impls` on `this` are replaced by their
    /// implementations.
    pub(crate) fn field_type(
        &self,
        field: DefId,
        levels: &LevelArgs,
        instance: &ArcTerm,
        impls: Option<(&Binding, &[(DefId, ArcTerm)])>,
    ) -> ArcTerm {
        let field_def = match self.globals.field(field) {
            Some(field_def) => field_def,
            None => return Term::error(None),
        };
        let mut subst = Substitution::with_levels(levels.clone());
        if let Some((this, impls)) = impls {
            subst = subst.with_field_impls(this, impls.to_vec());
        }
        subst.insert(&field_def.this, instance.clone());
        subst.apply(&field_def.r#type)
    }

    /// The most similar field name in a class, for diagnostics.
    pub(crate) fn suggest_field(&self, class: DefId, field: DefId) -> Option<StringId> {
        let globals = self.globals;
        let class = globals.class(class)?;
        let interner = self.interner.borrow();
        let name = interner.resolve(&globals.name(field));

        (class.fields.iter())
            .map(|field| globals.name(*field))
            .map(|candidate| (levenshtein::levenshtein(name, interner.resolve(&candidate)), candidate))
            .filter(|(distance, _)| *distance <= 2)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| candidate)
    }

    /// Check a class extension against an expected type.
    ///
    /// An instance that is expected to have a class type does not need to
    /// implement the fields that the expected type already implements. Those
    /// fields are pseudo-implemented, and take their expected implementations.
    pub(crate) fn check_class_ext(
        &mut self,
        range: FileRange,
        is_new: bool,
        base: &surface::Term,
        impls: &[surface::Implementation],
        expected_type: &ArcTerm,
    ) -> ArcTerm {
        let base = match self.elab_class_base(base) {
            Some(base) => base,
            None => return Term::error(Some(expected_type.clone())),
        };
        let pseudo_implemented: Vec<_> = match self.whnf(expected_type).as_ref() {
            Term::ClassCall(expected) if is_new && expected.class == base.class => (expected.impls.iter())
                .map(|(field, _)| *field)
                .filter(|field| !base.is_implemented(*field))
                .collect(),
            _ => Vec::new(),
        };

        let items = impls.iter().map(ImplItem::from_surface).collect();
        let (term, r#type) =
            self.typecheck_class_ext(range, base, items, is_new, &pseudo_implemented, Some(expected_type));
        self.check_result(range, term, &r#type, expected_type)
    }

    /// Elaborate the implementations of a class extension.
    ///
    /// Returns a class call and its universe, or if `is_new` is set, a new
    /// instance and its class call. Fields in `pseudo_implemented` are not
    /// reported as missing. When the expected type is a call of the same
    /// class they are implemented as it implements them, and when it is a
    /// universe its sort bounds the sort of the result.
    pub(crate) fn typecheck_class_ext(
        &mut self,
        range: FileRange,
        base: ClassCall,
        items: Vec<ImplItem<'_>>,
        is_new: bool,
        pseudo_implemented: &[DefId],
        expected_type: Option<&ArcTerm>,
    ) -> (ArcTerm, ArcTerm) {
        let globals = self.globals;
        let class = match globals.class(base.class) {
            Some(class) => class,
            None => return self.synth_reported_error(range),
        };
        let expected_whnf = expected_type.map(|expected_type| self.whnf(expected_type));
        let levels = base.levels.clone();
        let class_sort = class.sort.subst(&|var| levels.get(var));
        let this = ClassCall::this_binding(None, base.class, &levels, class_sort);

        let mut installed = Installed::default();
        {
            let mut subst = Substitution::with_levels(levels.clone());
            subst.insert(&class.this, this.to_term());
            for (field, value) in &class.implemented {
                installed.install(*field, subst.apply(value), &this);
            }
        }
        for (field, value) in rebind_this(&base, &this) {
            if !installed.has(field) {
                installed.install(field, value, &this);
            }
        }

        let initial_len = self.local_env.len();
        self.local_env.push(None, this.clone());

        let mut implemented_here = Vec::new();
        for item in &items {
            self.local_env.push(item.this, this.clone());
            match item.target {
                ImplTarget::Field(field) if !class.has_field(field) => {
                    let suggestion = self.suggest_field(base.class, field);
                    self.push_message(Message::UnknownField {
                        range: item.range,
                        field: globals.name(field),
                        class: globals.name(base.class),
                        suggestion,
                    });
                }
                ImplTarget::Field(field) if implemented_here.contains(&field) => {
                    self.push_message(Message::DuplicateImplementation {
                        range: item.range,
                        field: globals.name(field),
                    });
                }
                ImplTarget::Field(field) if installed.has(field) => {
                    self.push_message(Message::FieldAlreadyImplemented {
                        range: item.range,
                        field: globals.name(field),
                    });
                }
                ImplTarget::Field(field) => {
                    implemented_here.push(field);
                    self.implement_field(item.range, field, item.expr, &levels, &this, &mut installed);
                }
                ImplTarget::Class(ancestor) => {
                    self.implement_ancestor(item, base.class, ancestor, &this, &mut installed);
                }
            }
            self.local_env.pop();
        }

        if let Some(Term::ClassCall(expected)) = expected_whnf.as_deref() {
            if expected.class == base.class {
                for (field, value) in rebind_this(expected, &this) {
                    if pseudo_implemented.contains(&field) && !installed.has(field) {
                        installed.install(field, value, &this);
                    }
                }
            }
        }

        if is_new && self.config.use_defaults {
            for field in &class.fields {
                if pseudo_implemented.contains(field) {
                    continue;
                }
                let mut visiting = Vec::new();
                self.pull_default(range, class, *field, &levels, &this, &mut installed, &mut visiting);
            }
        }

        if is_new {
            self.check_complete(range, class, &levels, &this, pseudo_implemented, &mut installed);
        }
        self.local_env.truncate(initial_len);

        let bound = match expected_whnf.as_deref() {
            Some(Term::Universe(sort)) if !is_new => Some(*sort),
            _ => None,
        };
        let sort = self.class_call_sort(
            range,
            base.class,
            &levels,
            |field| installed.has(field) || pseudo_implemented.contains(&field),
            bound.as_ref(),
        );

        let class_call = ClassCall {
            class: base.class,
            levels,
            this,
            impls: installed.impls,
            sort,
        };
        match is_new {
            true => {
                let r#type = Arc::new(Term::ClassCall(class_call.clone()));
                (Arc::new(Term::New(class_call)), r#type)
            }
            false => (Arc::new(Term::ClassCall(class_call)), Term::universe(sort)),
        }
    }

    /// The sort of a call of `class`: the join of the sorts of the fields it
    /// leaves unimplemented.
    pub(crate) fn class_call_sort(
        &mut self,
        range: FileRange,
        class: DefId,
        levels: &LevelArgs,
        is_implemented: impl Fn(DefId) -> bool,
        bound: Option<&Sort>,
    ) -> Sort {
        let globals = self.globals;
        let class = match globals.class(class) {
            Some(class) if !class.use_level_prop => class,
            _ => return Sort::PROP,
        };
        let sorts: Vec<_> = (class.fields.iter())
            .filter(|field| !is_implemented(**field))
            .filter_map(|field| globals.field(*field))
            .map(|field| field.sort.subst(&|var| levels.get(var)))
            .collect();
        self.upper_bound_within(range, &sorts, bound)
    }

    fn implement_field(
        &mut self,
        range: FileRange,
        field: DefId,
        expr: &surface::Term,
        levels: &LevelArgs,
        this: &Binding,
        installed: &mut Installed,
    ) {
        let r#type = self.field_type(field, levels, &this.to_term(), Some((this, &installed.impls)));
        let value = self.check(expr, &r#type);
        let reads = semantics::field_dependencies(&value, this);

        match installed.cycle(field, &reads) {
            Some(path) => {
                self.report_cycle(range, &path);
                installed.install(field, Term::error(Some(r#type)), this);
            }
            None => installed.install(field, value, this),
        }
    }

    /// Implement every field of an ancestor class with the fields of an
    /// instance of that class.
    fn implement_ancestor(
        &mut self,
        item: &ImplItem<'_>,
        class: DefId,
        ancestor: DefId,
        this: &Binding,
        installed: &mut Installed,
    ) {
        let globals = self.globals;
        let ancestor_def = match globals.class(ancestor) {
            Some(ancestor_def) if ancestor != class && globals.is_subclass(class, ancestor) => ancestor_def,
            _ => {
                self.push_message(Message::NotAnAncestor {
                    range: item.range,
                    class: globals.name(class),
                    ancestor: globals.name(ancestor),
                });
                return;
            }
        };

        let levels = self.instantiate_levels(item.range, ancestor, None);
        let expected = Arc::new(Term::ClassCall(self.class_call_of(ancestor, levels)));
        let value = self.check(item.expr, &expected);

        for field in &ancestor_def.fields {
            let field_call = Arc::new(Term::FieldCall(*field, value.clone()));
            match installed.get(*field).cloned() {
                Some(existing) => {
                    if self.unify(item.range, &existing, &field_call, Cmp::Eq).is_err() {
                        self.push_message(Message::IncompatibleImplementation {
                            range: item.range,
                            field: globals.name(*field),
                            existing: self.pretty(&existing),
                            found: self.pretty(&field_call),
                        });
                    }
                }
                None => installed.install(*field, field_call, this),
            }
        }
    }

    /// Install the default of a field, after the defaults of the fields that
    /// it reads.
    #[allow(clippy::too_many_arguments)]
    fn pull_default(
        &mut self,
        range: FileRange,
        class: &ClassDef,
        field: DefId,
        levels: &LevelArgs,
        this: &Binding,
        installed: &mut Installed,
        visiting: &mut Vec<DefId>,
    ) {
        if installed.has(field) {
            return;
        }
        let default = match class.default(field) {
            Some(default) => default,
            None => return,
        };
        if let Some(start) = visiting.iter().position(|f| *f == field) {
            let mut path = visiting[start..].to_vec();
            path.push(field);
            self.report_cycle(range, &path);
            let r#type = self.field_type(field, levels, &this.to_term(), None);
            installed.install(field, Term::error(Some(r#type)), this);
            return;
        }

        visiting.push(field);
        for read in class.default_dependencies(field) {
            self.pull_default(range, class, *read, levels, this, installed, visiting);
        }
        visiting.pop();
        if installed.has(field) {
            return;
        }

        let mut subst = Substitution::with_levels(levels.clone());
        subst.insert(&class.this, this.to_term());
        let value = subst.apply(default);
        let reads = semantics::field_dependencies(&value, this);
        match installed.cycle(field, &reads) {
            Some(path) => {
                self.report_cycle(range, &path);
                let r#type = self.field_type(field, levels, &this.to_term(), None);
                installed.install(field, Term::error(Some(r#type)), this);
            }
            None => installed.install(field, value, this),
        }
    }

    /// Report the fields that an instance is missing, installing errors in
    /// their place.
    fn check_complete(
        &mut self,
        range: FileRange,
        class: &ClassDef,
        levels: &LevelArgs,
        this: &Binding,
        pseudo_implemented: &[DefId],
        installed: &mut Installed,
    ) {
        let globals = self.globals;
        let mut missing = Vec::new();
        let mut missing_arguments = 0;

        for field in &class.fields {
            if installed.has(*field) || pseudo_implemented.contains(field) {
                continue;
            }
            match globals.field(*field) {
                Some(field_def) if field_def.is_parameter && field_def.is_explicit => {
                    missing_arguments += 1;
                }
                _ => missing.push(globals.name(*field)),
            }
            let r#type = self.field_type(*field, levels, &this.to_term(), None);
            installed.install(*field, Term::error(Some(r#type)), this);
        }

        if missing_arguments > 0 {
            self.push_message(Message::MissingArguments {
                range,
                count: missing_arguments,
            });
        }
        if !missing.is_empty() {
            self.push_message(Message::FieldsNotImplemented {
                range,
                fields: missing,
            });
        }
    }

    fn report_cycle(&mut self, range: FileRange, path: &[DefId]) {
        let fields = path.iter().map(|field| self.globals.name(*field)).collect();
        self.push_message(Message::ImplementationCycle { range, fields });
    }
}
