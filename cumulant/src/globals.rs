//! Global definitions.
//!
//! Definitions are declared up front, then filled in with their elaborated
//! form as elaboration proceeds. A definition is only typechecked once, after
//! which it is read-only.

use fxhash::FxHashMap;
use once_cell::unsync::OnceCell;
use std::cell::RefCell;
use std::sync::Arc;

use crate::core::prim::{self, Prelude};
use crate::core::semantics;
use crate::core::{ArcTerm, Binding, DefId, LevelParams, Param, Sort};
use crate::source::{StringId, StringInterner};
use crate::surface::elaboration::MetaResolver;

/// The outcome of elaborating a definition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Ok,
    HasWarnings,
    HasErrors,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok | Status::HasWarnings => 0,
            Status::HasErrors => 1,
        }
    }

    /// Combine two statuses, keeping the more severe.
    pub fn merge(self, other: Status) -> Status {
        std::cmp::max(self, other)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FunctionKind {
    Function,
    /// A named wrapper around the type in its body. References to a wrapper
    /// are never unfolded, and values move in and out of it by coercion.
    TypeWrapper,
    /// An instance of the given class, found by instance search.
    Instance(DefId),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub kind: FunctionKind,
    pub params: Vec<Param>,
    pub result_type: ArcTerm,
    pub body: Option<ArcTerm>,
}

#[derive(Debug, Clone)]
pub struct DataDef {
    pub params: Vec<Param>,
    pub sort: Sort,
    pub constructors: Vec<DefId>,
}

/// Constructor parameters may refer to the parameters of their data type.
#[derive(Debug, Clone)]
pub struct ConstructorDef {
    pub data: DefId,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub is_record: bool,
    pub super_classes: Vec<DefId>,
    /// Every field of the class, including inherited fields, in declaration
    /// order.
    pub fields: Vec<DefId>,
    /// The binding that implementations and defaults use to refer to other
    /// fields.
    pub this: Binding,
    pub implemented: Vec<(DefId, ArcTerm)>,
    pub defaults: Vec<(DefId, ArcTerm)>,
    /// The fields that the default of each field reads.
    pub dependencies: FxHashMap<DefId, Vec<DefId>>,
    pub sort: Sort,
    /// Instances of the class live in the universe of propositions.
    pub use_level_prop: bool,
}

impl ClassDef {
    pub fn new(is_record: bool, fields: Vec<DefId>, this: Binding, sort: Sort) -> ClassDef {
        ClassDef {
            is_record,
            super_classes: Vec::new(),
            fields,
            this,
            implemented: Vec::new(),
            defaults: Vec::new(),
            dependencies: FxHashMap::default(),
            sort,
            use_level_prop: false,
        }
    }

    pub fn with_super_class(mut self, class: DefId) -> ClassDef {
        self.super_classes.push(class);
        self
    }

    /// Add an implementation that every instance of the class shares.
    pub fn with_implementation(mut self, field: DefId, term: ArcTerm) -> ClassDef {
        self.implemented.push((field, term));
        self
    }

    /// Add a default, recording the fields that it reads.
    pub fn with_default(mut self, field: DefId, term: ArcTerm) -> ClassDef {
        let dependencies = semantics::field_dependencies(&term, &self.this);
        self.dependencies.insert(field, dependencies);
        self.defaults.push((field, term));
        self
    }

    pub fn has_field(&self, field: DefId) -> bool {
        self.fields.contains(&field)
    }

    pub fn implementation(&self, field: DefId) -> Option<&ArcTerm> {
        self.implemented
            .iter()
            .find_map(|(f, term)| (*f == field).then_some(term))
    }

    pub fn default(&self, field: DefId) -> Option<&ArcTerm> {
        self.defaults
            .iter()
            .find_map(|(f, term)| (*f == field).then_some(term))
    }

    pub fn default_dependencies(&self, field: DefId) -> &[DefId] {
        self.dependencies.get(&field).map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub class: DefId,
    /// The instance that the field type refers to.
    pub this: Binding,
    pub r#type: ArcTerm,
    pub sort: Sort,
    /// Parameter fields can be implemented by positional arguments.
    pub is_parameter: bool,
    pub is_explicit: bool,
}

/// A definition whose uses are elaborated by an external meta-program.
#[derive(Clone)]
pub struct MetaDef {
    pub resolver: Arc<dyn MetaResolver>,
}

impl std::fmt::Debug for MetaDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetaDef(..)")
    }
}

/// The elaborated form of a definition.
#[derive(Debug, Clone)]
pub enum DefCore {
    Function(FunctionDef),
    Data(DataDef),
    Constructor(ConstructorDef),
    Class(ClassDef),
    Field(FieldDef),
    Meta(MetaDef),
}

impl DefCore {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DefCore::Function(_) => "function",
            DefCore::Data(_) => "data type",
            DefCore::Constructor(_) => "constructor",
            DefCore::Class(_) => "class",
            DefCore::Field(_) => "field",
            DefCore::Meta(_) => "meta definition",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Typechecked {
    pub core: DefCore,
    pub status: Status,
    /// `false` if the parameters or result type of the definition could not
    /// be elaborated, making the definition unusable by its dependents.
    pub header_ok: bool,
}

#[derive(Debug)]
pub struct Definition {
    pub name: StringId,
    pub levels: LevelParams,
    checked: OnceCell<Typechecked>,
}

impl Definition {
    pub fn typechecked(&self) -> Option<&Typechecked> {
        self.checked.get()
    }

    pub fn core(&self) -> Option<&DefCore> {
        Some(&self.checked.get()?.core)
    }
}

/// A registered coercion from one head definition to another.
#[derive(Debug, Copy, Clone)]
pub struct CoercionRule {
    pub from: DefId,
    pub to: DefId,
    /// A function whose last explicit parameter accepts the source type.
    pub via: DefId,
}

/// The table of global definitions.
pub struct Globals {
    definitions: Vec<Definition>,
    instances: FxHashMap<DefId, Vec<DefId>>,
    coercions: Vec<CoercionRule>,
    prelude: Prelude,
}

impl Globals {
    pub fn prelude(&self) -> &Prelude {
        &self.prelude
    }

    pub fn get(&self, def: DefId) -> &Definition {
        &self.definitions[def.index()]
    }

    pub fn name(&self, def: DefId) -> StringId {
        self.get(def).name
    }

    pub fn levels(&self, def: DefId) -> &LevelParams {
        &self.get(def).levels
    }

    pub fn core(&self, def: DefId) -> Option<&DefCore> {
        self.get(def).core()
    }

    pub fn function(&self, def: DefId) -> Option<&FunctionDef> {
        match self.core(def)? {
            DefCore::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn data(&self, def: DefId) -> Option<&DataDef> {
        match self.core(def)? {
            DefCore::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn constructor(&self, def: DefId) -> Option<&ConstructorDef> {
        match self.core(def)? {
            DefCore::Constructor(con) => Some(con),
            _ => None,
        }
    }

    pub fn class(&self, def: DefId) -> Option<&ClassDef> {
        match self.core(def)? {
            DefCore::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn field(&self, def: DefId) -> Option<&FieldDef> {
        match self.core(def)? {
            DefCore::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn is_type_wrapper(&self, def: DefId) -> bool {
        matches!(
            self.function(def),
            Some(FunctionDef {
                kind: FunctionKind::TypeWrapper,
                ..
            })
        )
    }

    /// Returns `true` if `class` is `ancestor` or extends it.
    pub fn is_subclass(&self, class: DefId, ancestor: DefId) -> bool {
        class == ancestor
            || self.class(class).map_or(false, |def| {
                (def.super_classes.iter()).any(|super_class| self.is_subclass(*super_class, ancestor))
            })
    }

    pub fn instances(&self, class: DefId) -> &[DefId] {
        self.instances.get(&class).map_or(&[], Vec::as_slice)
    }

    pub fn coercions(&self, from: DefId, to: DefId) -> impl '_ + Iterator<Item = DefId> {
        (self.coercions.iter())
            .filter(move |rule| rule.from == from && rule.to == to)
            .map(|rule| rule.via)
    }

    /// Record the elaborated form of a definition.
    ///
    /// # Panics
    ///
    /// If the definition was already typechecked.
    pub fn set_typechecked(&self, def: DefId, typechecked: Typechecked) {
        if self.get(def).checked.set(typechecked).is_err() {
            panic!("definition {def:?} was typechecked twice");
        }
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (DefId, &Definition)> {
        (self.definitions.iter().enumerate()).map(|(index, def)| (DefId::new(index), def))
    }
}

/// Declares and defines global definitions, starting from the prelude.
pub struct GlobalsBuilder<'interner> {
    interner: &'interner RefCell<StringInterner>,
    definitions: Vec<Definition>,
    instances: FxHashMap<DefId, Vec<DefId>>,
    coercions: Vec<CoercionRule>,
    prelude: Option<Prelude>,
}

impl<'interner> GlobalsBuilder<'interner> {
    /// A builder with the prelude already defined.
    pub fn new(interner: &'interner RefCell<StringInterner>) -> GlobalsBuilder<'interner> {
        let mut builder = GlobalsBuilder {
            interner,
            definitions: Vec::new(),
            instances: FxHashMap::default(),
            coercions: Vec::new(),
            prelude: None,
        };
        let prelude = prim::define_prelude(&mut builder);
        builder.prelude = Some(prelude);
        builder
    }

    pub fn prelude(&self) -> &Prelude {
        match &self.prelude {
            Some(prelude) => prelude,
            None => panic!("prelude accessed while it was being defined"),
        }
    }

    pub fn name(&self, name: &str) -> StringId {
        self.interner.borrow_mut().get_or_intern(name)
    }

    /// The standard level parameters, `\lp` and `\lh`.
    pub fn standard_levels(&self) -> LevelParams {
        LevelParams::standard(self.name("\\lp"), self.name("\\lh"))
    }

    /// Declare a definition, to be defined later.
    pub fn declare(&mut self, name: &str, levels: LevelParams) -> DefId {
        let name = self.name(name);
        let def = DefId::new(self.definitions.len());
        self.definitions.push(Definition {
            name,
            levels,
            checked: OnceCell::new(),
        });
        def
    }

    /// Define a previously declared definition.
    pub fn define(&mut self, def: DefId, core: DefCore) {
        let typechecked = Typechecked {
            core,
            status: Status::Ok,
            header_ok: true,
        };
        if self.definitions[def.index()].checked.set(typechecked).is_err() {
            panic!("definition {def:?} was defined twice");
        }
    }

    pub fn level_params(&self, def: DefId) -> &LevelParams {
        &self.definitions[def.index()].levels
    }

    pub fn register_instance(&mut self, class: DefId, instance: DefId) {
        self.instances.entry(class).or_default().push(instance);
    }

    pub fn register_coercion(&mut self, from: DefId, to: DefId, via: DefId) {
        self.coercions.push(CoercionRule { from, to, via });
    }

    pub fn build(self) -> Globals {
        Globals {
            definitions: self.definitions,
            instances: self.instances,
            coercions: self.coercions,
            prelude: match self.prelude {
                Some(prelude) => prelude,
                None => panic!("globals built without a prelude"),
            },
        }
    }
}
