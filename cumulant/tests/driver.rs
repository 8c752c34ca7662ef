use codespan_reporting::term::termcolor::NoColor;

use cumulant::core::{LevelParams, Literal, Term};
use cumulant::files::FileId;
use cumulant::source::{ByteRange, FileRange};
use cumulant::surface::{self, DefinitionBody};
use cumulant::{Driver, GlobalsBuilder, Status};

fn range() -> FileRange {
    let file_id = FileId::try_from(1).unwrap();
    FileRange::new(file_id, ByteRange::new(0, 1))
}

fn driver() -> Driver {
    let mut driver = Driver::new();
    driver.set_diagnostic_writer(NoColor::new(Vec::new()));
    driver.set_emit_writer(NoColor::new(Vec::new()));
    driver.load_source_string("test".to_owned(), "x\n".to_owned());
    driver
}

#[test]
fn definitions_are_recorded_in_order() {
    let driver = driver();
    let mut builder = GlobalsBuilder::new(driver.interner());
    let nat = builder.prelude().nat;
    let two = builder.declare("two", LevelParams::none());
    let also_two = builder.declare("alsoTwo", LevelParams::none());
    let globals = builder.build();

    let literal = driver.interner().borrow_mut().get_or_intern("2");
    let definitions = vec![
        (
            two,
            surface::Definition {
                range: range(),
                params: Vec::new(),
                result_type: Some(surface::Term::Global(range(), nat, None)),
                body: DefinitionBody::Function(Some(surface::Term::NumberLiteral(range(), literal))),
            },
        ),
        (
            also_two,
            surface::Definition {
                range: range(),
                params: Vec::new(),
                result_type: None,
                body: DefinitionBody::Function(Some(surface::Term::Global(range(), two, None))),
            },
        ),
    ];

    assert_eq!(driver.elaborate_definitions(&globals, &definitions), Status::Ok);

    let body = globals.function(two).and_then(|function| function.body.clone());
    assert!(matches!(body.as_deref(), Some(Term::Lit(Literal::Nat(2)))));
    let result_type = globals.function(also_two).map(|function| function.result_type.clone());
    assert!(matches!(result_type.as_deref(), Some(Term::DataCall(data, _, _)) if *data == nat));
}

#[test]
fn errors_are_recorded_in_the_status() {
    let driver = driver();
    let mut builder = GlobalsBuilder::new(driver.interner());
    let prelude = builder.prelude().clone();
    let bad = builder.declare("bad", LevelParams::none());
    let globals = builder.build();

    let literal = driver.interner().borrow_mut().get_or_intern("7");
    let fin = surface::Term::App(
        range(),
        Box::new(surface::Term::Global(range(), prelude.fin, None)),
        vec![surface::Arg::explicit(surface::Term::NumberLiteral(range(), literal))],
    );
    let definitions = vec![(
        bad,
        surface::Definition {
            range: range(),
            params: Vec::new(),
            result_type: Some(fin),
            body: DefinitionBody::Function(Some(surface::Term::NumberLiteral(range(), literal))),
        },
    )];

    assert_eq!(driver.elaborate_definitions(&globals, &definitions), Status::HasErrors);
    let checked = globals.get(bad).typechecked();
    assert!(matches!(checked, Some(checked) if checked.status == Status::HasErrors && checked.header_ok));
}
