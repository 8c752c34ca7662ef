use codespan_reporting::diagnostic::{Diagnostic, Label, Severity};
use itertools::Itertools;
use std::cell::RefCell;

use crate::core::level::LevelKind;
use crate::files::FileId;
use crate::source::{FileRange, StringId, StringInterner};
use crate::surface::elaboration::equations::Cmp;
use crate::surface::elaboration::MetaSource;

/// Why two terms failed to unify, with the terms already rendered.
#[derive(Debug, Clone)]
pub enum MismatchDetail {
    /// The most specific pair of subterms that did not match.
    Subterms { lhs: String, rhs: String },
    /// A pair of levels that were not ordered as required.
    Levels { lhs: String, rhs: String },
    EscapingBinding { name: Option<StringId> },
    InfiniteSolution,
}

/// Elaboration diagnostic messages.
#[derive(Debug, Clone)]
pub enum Message {
    /// A local variable was referenced outside of the scope that binds it.
    UnboundLocal {
        range: FileRange,
    },
    DefinitionNotTypechecked {
        range: FileRange,
        name: StringId,
    },
    /// A definition whose header failed to elaborate was referenced.
    ReferenceToErroneousDefinition {
        range: FileRange,
        name: StringId,
    },
    FailedToUnify {
        range: FileRange,
        expected: String,
        found: String,
        detail: Option<MismatchDetail>,
    },
    NotAType {
        range: FileRange,
        found: String,
    },
    UnexpectedArgument {
        head_range: FileRange,
        head_type: String,
        arg_range: FileRange,
    },
    UnexpectedImplicitArgument {
        arg_range: FileRange,
    },
    NotASigma {
        range: FileRange,
        found: String,
    },
    ProjectionOutOfRange {
        range: FileRange,
        index: usize,
        len: usize,
    },
    MismatchedTupleLength {
        range: FileRange,
        expected_len: usize,
        found_len: usize,
    },
    NotAClass {
        range: FileRange,
        found: String,
    },
    UnknownField {
        range: FileRange,
        field: StringId,
        class: StringId,
        suggestion: Option<StringId>,
    },
    /// A field was implemented by the class being extended.
    FieldAlreadyImplemented {
        range: FileRange,
        field: StringId,
    },
    /// A field was implemented twice in the same extension.
    DuplicateImplementation {
        range: FileRange,
        field: StringId,
    },
    NotAnAncestor {
        range: FileRange,
        class: StringId,
        ancestor: StringId,
    },
    /// An ancestor implementation disagreed with an existing implementation
    /// of one of its fields.
    IncompatibleImplementation {
        range: FileRange,
        field: StringId,
        existing: String,
        found: String,
    },
    /// The fields of a cycle of implementations that read each other.
    ImplementationCycle {
        range: FileRange,
        fields: Vec<StringId>,
    },
    FieldsNotImplemented {
        range: FileRange,
        fields: Vec<StringId>,
    },
    /// Explicit parameter fields were not given.
    MissingArguments {
        range: FileRange,
        count: usize,
    },
    CaseNotData {
        range: FileRange,
        found: String,
    },
    ConstructorMismatch {
        range: FileRange,
        con: StringId,
        data: StringId,
    },
    PatternArity {
        range: FileRange,
        expected: usize,
        found: usize,
    },
    DuplicateClause {
        range: FileRange,
        con: StringId,
    },
    MissingClauses {
        range: FileRange,
        constructors: Vec<StringId>,
    },
    ResultTypeRequired {
        range: FileRange,
    },
    LevelArgCount {
        range: FileRange,
        kind: LevelKind,
        expected: usize,
        found: usize,
    },
    LevelParamOutOfRange {
        range: FileRange,
        index: u16,
    },
    LevelsNotOrderable {
        range: FileRange,
    },
    LevelEquationFailed {
        range: FileRange,
        lhs: String,
        rhs: String,
    },
    LevelCycle {
        range: FileRange,
    },
    /// A definition declares level parameters but its header does not use
    /// them.
    NotLevelPolymorphic {
        range: FileRange,
        name: StringId,
    },
    InvalidNumericLiteral {
        range: FileRange,
        message: String,
    },
    LiteralOutOfRange {
        range: FileRange,
        value: String,
        expected_type: String,
    },
    MismatchedArrayLength {
        range: FileRange,
        found_len: usize,
        expected_len: String,
    },
    AmbiguousArrayLiteral {
        range: FileRange,
    },
    InstanceNotFound {
        range: FileRange,
        class: StringId,
    },
    UnsolvedMeta {
        source: MetaSource,
    },
    UnsolvedEquation {
        range: FileRange,
        lhs: String,
        rhs: String,
        cmp: Cmp,
    },
    DeferredMetaFailed {
        range: FileRange,
        name: StringId,
    },
    /// An error reported by a meta definition.
    MetaError {
        range: FileRange,
        message: String,
    },
    Goal {
        range: FileRange,
        name: Option<StringId>,
        expected_type: Option<String>,
    },
}

impl Message {
    pub fn severity(&self) -> Severity {
        match self {
            Message::NotLevelPolymorphic { .. } | Message::Goal { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity() >= Severity::Error
    }

    pub fn to_diagnostic(&self, interner: &RefCell<StringInterner>) -> Diagnostic<FileId> {
        let primary_label = |range: &FileRange| Label::primary(range.file_id(), *range);
        let secondary_label = |range: &FileRange| Label::secondary(range.file_id(), *range);
        let resolve = |name: &StringId| interner.borrow().resolve(name).to_owned();
        let resolve_all = |names: &[StringId]| names.iter().map(|name| format!("`{}`", resolve(name))).join(", ");

        match self {
            Message::UnboundLocal { range } => Diagnostic::error()
                .with_message("local variable is not in scope")
                .with_labels(vec![primary_label(range).with_message("unbound variable")]),
            Message::DefinitionNotTypechecked { range, name } => Diagnostic::error()
                .with_message(format!("`{}` has not been typechecked yet", resolve(name)))
                .with_labels(vec![primary_label(range)]),
            Message::ReferenceToErroneousDefinition { range, name } => Diagnostic::error()
                .with_message(format!("`{}` contains errors", resolve(name)))
                .with_labels(vec![primary_label(range).with_message("erroneous definition")])
                .with_notes(vec![
                    "fix the errors in the definition before using it".to_owned()
                ]),
            Message::FailedToUnify {
                range,
                expected,
                found,
                detail,
            } => {
                let mut notes = vec![[
                    format!("expected `{expected}`"),
                    format!("   found `{found}`"),
                ]
                .join("\n")];
                match detail {
                    Some(MismatchDetail::Subterms { lhs, rhs }) => {
                        if lhs != found || rhs != expected {
                            notes.push(format!("`{lhs}` does not match `{rhs}`"));
                        }
                    }
                    Some(MismatchDetail::Levels { lhs, rhs }) => {
                        notes.push(format!("level `{lhs}` is not below `{rhs}`"));
                    }
                    Some(MismatchDetail::EscapingBinding { name: Some(name) }) => {
                        notes.push(format!("`{}` would escape its scope", resolve(name)));
                    }
                    Some(MismatchDetail::EscapingBinding { name: None }) => {
                        notes.push("a local variable would escape its scope".to_owned());
                    }
                    Some(MismatchDetail::InfiniteSolution) => {
                        notes.push("the solution would be infinite".to_owned());
                    }
                    None => {}
                }
                Diagnostic::error()
                    .with_message("mismatched types")
                    .with_labels(vec![primary_label(range).with_message(format!(
                        "type mismatch, expected `{expected}`, found `{found}`"
                    ))])
                    .with_notes(notes)
            }
            Message::NotAType { range, found } => Diagnostic::error()
                .with_message("expected a type")
                .with_labels(vec![
                    primary_label(range).with_message(format!("this has type `{found}`"))
                ]),
            Message::UnexpectedArgument {
                head_range,
                head_type,
                arg_range,
            } => Diagnostic::error()
                .with_message("expression was applied to an unexpected argument")
                .with_labels(vec![
                    primary_label(arg_range).with_message("unexpected argument"),
                    secondary_label(head_range)
                        .with_message(format!("expression of type `{head_type}`")),
                ]),
            Message::UnexpectedImplicitArgument { arg_range } => Diagnostic::error()
                .with_message("unexpected implicit argument")
                .with_labels(vec![primary_label(arg_range)])
                .with_notes(vec!["expected an explicit argument here".to_owned()]),
            Message::NotASigma { range, found } => Diagnostic::error()
                .with_message("projection from a term that is not a tuple")
                .with_labels(vec![
                    primary_label(range).with_message(format!("this has type `{found}`"))
                ]),
            Message::ProjectionOutOfRange { range, index, len } => Diagnostic::error()
                .with_message(format!("no component at index {index}"))
                .with_labels(vec![primary_label(range)])
                .with_notes(vec![format!("the tuple has {len} components")]),
            Message::MismatchedTupleLength {
                range,
                expected_len,
                found_len,
            } => Diagnostic::error()
                .with_message("mismatched tuple length")
                .with_labels(vec![primary_label(range).with_message(format!(
                    "expected {expected_len} components, found {found_len}"
                ))]),
            Message::NotAClass { range, found } => Diagnostic::error()
                .with_message("expected a class")
                .with_labels(vec![
                    primary_label(range).with_message(format!("found `{found}`"))
                ]),
            Message::UnknownField {
                range,
                field,
                class,
                suggestion,
            } => {
                let diagnostic = Diagnostic::error()
                    .with_message(format!(
                        "`{}` is not a field of `{}`",
                        resolve(field),
                        resolve(class),
                    ))
                    .with_labels(vec![primary_label(range).with_message("unknown field")]);
                match suggestion {
                    Some(suggestion) => diagnostic
                        .with_notes(vec![format!("help: did you mean `{}`?", resolve(suggestion))]),
                    None => diagnostic,
                }
            }
            Message::FieldAlreadyImplemented { range, field } => Diagnostic::error()
                .with_message(format!("field `{}` is already implemented", resolve(field)))
                .with_labels(vec![primary_label(range)]),
            Message::DuplicateImplementation { range, field } => Diagnostic::error()
                .with_message(format!("field `{}` is implemented more than once", resolve(field)))
                .with_labels(vec![primary_label(range).with_message("duplicate implementation")]),
            Message::NotAnAncestor {
                range,
                class,
                ancestor,
            } => Diagnostic::error()
                .with_message(format!(
                    "`{}` is not an ancestor of `{}`",
                    resolve(ancestor),
                    resolve(class),
                ))
                .with_labels(vec![primary_label(range)]),
            Message::IncompatibleImplementation {
                range,
                field,
                existing,
                found,
            } => Diagnostic::error()
                .with_message(format!("incompatible implementations of `{}`", resolve(field)))
                .with_labels(vec![primary_label(range)])
                .with_notes(vec![[
                    format!("already implemented as `{existing}`"),
                    format!("     but also found `{found}`"),
                ]
                .join("\n")]),
            Message::ImplementationCycle { range, fields } => Diagnostic::error()
                .with_message("cyclic implementations")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec![format!("the implementations of {} depend on each other", resolve_all(fields))]),
            Message::FieldsNotImplemented { range, fields } => Diagnostic::error()
                .with_message("fields are not implemented")
                .with_labels(vec![primary_label(range).with_message("incomplete instance")])
                .with_notes(vec![format!("missing implementations for {}", resolve_all(fields))]),
            Message::MissingArguments { range, count } => Diagnostic::error()
                .with_message(format!("missing {count} explicit argument(s)"))
                .with_labels(vec![primary_label(range)]),
            Message::CaseNotData { range, found } => Diagnostic::error()
                .with_message("cannot match on a term that is not of a data type")
                .with_labels(vec![
                    primary_label(range).with_message(format!("this has type `{found}`"))
                ]),
            Message::ConstructorMismatch { range, con, data } => Diagnostic::error()
                .with_message(format!(
                    "`{}` is not a constructor of `{}`",
                    resolve(con),
                    resolve(data),
                ))
                .with_labels(vec![primary_label(range)]),
            Message::PatternArity {
                range,
                expected,
                found,
            } => Diagnostic::error()
                .with_message("wrong number of pattern variables")
                .with_labels(vec![primary_label(range).with_message(format!(
                    "expected {expected} variables, found {found}"
                ))]),
            Message::DuplicateClause { range, con } => Diagnostic::error()
                .with_message(format!("constructor `{}` is matched more than once", resolve(con)))
                .with_labels(vec![primary_label(range).with_message("unreachable clause")]),
            Message::MissingClauses {
                range,
                constructors,
            } => Diagnostic::error()
                .with_message("non-exhaustive case expression")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec![format!("missing clauses for {}", resolve_all(constructors))]),
            Message::ResultTypeRequired { range } => Diagnostic::error()
                .with_message("a definition without a body needs a result type")
                .with_labels(vec![primary_label(range)]),
            Message::LevelArgCount {
                range,
                kind,
                expected,
                found,
            } => {
                let kind = match kind {
                    LevelKind::P => "p-level",
                    LevelKind::H => "h-level",
                };
                Diagnostic::error()
                    .with_message(format!("too many {kind} arguments"))
                    .with_labels(vec![primary_label(range).with_message(format!(
                        "expected at most {expected}, found {found}"
                    ))])
            }
            Message::LevelParamOutOfRange { range, index } => Diagnostic::error()
                .with_message(format!("no level parameter at index {index}"))
                .with_labels(vec![primary_label(range)]),
            Message::LevelsNotOrderable { range } => Diagnostic::error()
                .with_message("cannot find a common upper bound for levels")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec!["the levels are not ordered with respect to each other".to_owned()]),
            Message::LevelEquationFailed { range, lhs, rhs } => Diagnostic::error()
                .with_message("universe level mismatch")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec![format!("level `{lhs}` is not below `{rhs}`")]),
            Message::LevelCycle { range } => Diagnostic::error()
                .with_message("universe levels depend on themselves")
                .with_labels(vec![primary_label(range)]),
            Message::NotLevelPolymorphic { range, name } => Diagnostic::warning()
                .with_message(format!(
                    "`{}` does not use its level parameters",
                    resolve(name),
                ))
                .with_labels(vec![primary_label(range)])
                .with_notes(vec!["the definition can be made non-polymorphic".to_owned()]),
            Message::InvalidNumericLiteral { range, message } => Diagnostic::error()
                .with_message(format!("failed to parse numeric literal: {message}"))
                .with_labels(vec![primary_label(range)]),
            Message::LiteralOutOfRange {
                range,
                value,
                expected_type,
            } => Diagnostic::error()
                .with_message("literal out of range")
                .with_labels(vec![primary_label(range).with_message(format!(
                    "`{value}` is not a value of `{expected_type}`"
                ))]),
            Message::MismatchedArrayLength {
                range,
                found_len,
                expected_len,
            } => Diagnostic::error()
                .with_message("mismatched array length")
                .with_labels(vec![primary_label(range).with_message("array with invalid length")])
                .with_notes(vec![[
                    format!("expected length {expected_len}"),
                    format!("   found length {found_len}"),
                ]
                .join("\n")]),
            Message::AmbiguousArrayLiteral { range } => Diagnostic::error()
                .with_message("cannot infer the element type of an empty array")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec!["add a type annotation".to_owned()]),
            Message::InstanceNotFound { range, class } => Diagnostic::error()
                .with_message(format!("no instance of `{}` found", resolve(class)))
                .with_labels(vec![primary_label(range)]),
            Message::UnsolvedMeta { source } => {
                let (range, source_name) = match source {
                    MetaSource::ImplicitArg(range, _) => (range, "implicit argument"),
                    MetaSource::ParamType(range) => (range, "parameter type"),
                    MetaSource::ResultType(range) => (range, "result type"),
                    MetaSource::HoleExpr(range) => (range, "hole"),
                    MetaSource::HoleType(range) => (range, "hole type"),
                    MetaSource::InstanceArg(range, _) => (range, "instance argument"),
                    MetaSource::ArrayElemType(range) => (range, "array element type"),
                    MetaSource::CaseResultType(range) => (range, "case result type"),
                    MetaSource::MetaCall(range, _) => (range, "meta definition result"),
                    MetaSource::MetaCallType(range, _) => (range, "meta definition type"),
                    MetaSource::ReportedErrorType(range) => (range, "error type"),
                };
                let message = match source {
                    MetaSource::ImplicitArg(_, Some(name)) => {
                        format!("failed to infer implicit argument `{}`", resolve(name))
                    }
                    _ => format!("failed to infer {source_name}"),
                };
                Diagnostic::error()
                    .with_message(message)
                    .with_labels(vec![primary_label(range).with_message(format!("unsolved {source_name}"))])
            }
            Message::UnsolvedEquation {
                range,
                lhs,
                rhs,
                cmp,
            } => Diagnostic::error()
                .with_message("could not solve constraint")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec![format!("`{lhs}` {} `{rhs}`", cmp.symbol())]),
            Message::DeferredMetaFailed { range, name } => Diagnostic::error()
                .with_message(format!("meta definition `{}` failed", resolve(name)))
                .with_labels(vec![primary_label(range)]),
            Message::MetaError { range, message } => Diagnostic::error()
                .with_message(message.clone())
                .with_labels(vec![primary_label(range)]),
            Message::Goal {
                range,
                name,
                expected_type,
            } => {
                let message = match name {
                    Some(name) => format!("goal `{}`", resolve(name)),
                    None => "goal".to_owned(),
                };
                let notes = match expected_type {
                    Some(expected_type) => vec![format!("expected type: `{expected_type}`")],
                    None => vec!["the expected type is not known".to_owned()],
                };
                Diagnostic::warning()
                    .with_message(message)
                    .with_labels(vec![primary_label(range)])
                    .with_notes(notes)
            }
        }
    }
}
