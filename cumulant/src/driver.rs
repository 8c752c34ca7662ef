use codespan_reporting::diagnostic::{Diagnostic, Severity};
use codespan_reporting::term::termcolor::{BufferedStandardStream, ColorChoice, WriteColor};
use pretty::RcDoc;
use std::cell::RefCell;
use std::io::Write;
use std::sync::Arc;

use crate::core::{self, ArcTerm, DefId};
use crate::files::{FileId, Files};
use crate::globals::{Globals, Status, Typechecked};
use crate::source::StringInterner;
use crate::surface;
use crate::surface::elaboration::{self, Cancelled, CancellationToken, Config, LiteralPolicy};

pub struct Driver {
    files: Files,
    interner: RefCell<StringInterner>,

    config: Config,
    literal_policy: Option<Arc<dyn LiteralPolicy>>,
    cancellation: CancellationToken,

    allow_errors: bool,
    seen_errors: RefCell<bool>,
    codespan_config: codespan_reporting::term::Config,
    diagnostic_writer: RefCell<Box<dyn WriteColor>>,

    emit_width: usize,
    emit_writer: RefCell<Box<dyn WriteColor>>,
}

impl Driver {
    pub fn new() -> Driver {
        Driver {
            files: Files::new(),
            interner: RefCell::new(StringInterner::new()),

            config: Config::default(),
            literal_policy: None,
            cancellation: CancellationToken::new(),

            allow_errors: false,
            seen_errors: RefCell::new(false),
            codespan_config: codespan_reporting::term::Config::default(),
            diagnostic_writer: RefCell::new(Box::new(BufferedStandardStream::stderr(
                if atty::is(atty::Stream::Stderr) {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                },
            ))),

            emit_width: usize::MAX,
            emit_writer: RefCell::new(Box::new(BufferedStandardStream::stdout(
                if atty::is(atty::Stream::Stdout) {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                },
            ))),
        }
    }

    /// Setup a global panic hook
    pub fn install_panic_hook(&self) {
        // Use the currently set codespan configuration
        let term_config = self.codespan_config.clone();
        // Fetch the default hook (which prints the panic message and an optional backtrace)
        let default_hook = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            let location = info.location();
            let message = if let Some(message) = info.payload().downcast_ref::<String>() {
                message.as_str()
            } else if let Some(message) = info.payload().downcast_ref::<&str>() {
                message
            } else {
                "unknown panic type"
            };

            let diagnostic = Diagnostic::bug()
                .with_message(format!("elaborator panicked at '{message}'"))
                .with_notes(vec![match location {
                    Some(location) => format!("panicked at: {location}"),
                    None => "panicked at: unknown location".to_owned(),
                }]);

            let mut writer = BufferedStandardStream::stderr(if atty::is(atty::Stream::Stderr) {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            });
            let dummy_files = Files::new();

            default_hook(info);
            eprintln!();
            let _ = codespan_reporting::term::emit(&mut writer, &term_config, &dummy_files, &diagnostic);
        }));
    }

    /// Set to true if we should attempt to continue after encountering errors
    pub fn set_allow_errors(&mut self, allow_errors: bool) {
        self.allow_errors = allow_errors;
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Set the policy used to elaborate numeric and string literals
    pub fn set_literal_policy(&mut self, policy: Arc<dyn LiteralPolicy>) {
        self.literal_policy = Some(policy);
    }

    /// Set the token that can be used to cancel elaboration from another thread
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    pub fn set_codespan_config(&mut self, config: codespan_reporting::term::Config) {
        self.codespan_config = config;
    }

    /// Set the writer to use when rendering diagnostics
    pub fn set_diagnostic_writer(&mut self, stream: impl 'static + WriteColor) {
        self.diagnostic_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Set the width to use when emitting elaborated terms
    pub fn set_emit_width(&mut self, emit_width: usize) {
        self.emit_width = emit_width;
    }

    /// Set the writer to use when emitting elaborated terms
    pub fn set_emit_writer(&mut self, stream: impl 'static + WriteColor) {
        self.emit_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Load a source string into the file database, so that diagnostics can
    /// point into it.
    pub fn load_source_string(&mut self, name: String, source: String) -> FileId {
        self.files.add(name, source)
    }

    pub fn interner(&self) -> &RefCell<StringInterner> {
        &self.interner
    }

    fn context<'globals>(&self, globals: &'globals Globals) -> elaboration::Context<'_, 'globals> {
        let mut context = elaboration::Context::new(&self.interner, globals);
        context.set_config(self.config.clone());
        context.set_cancellation_token(self.cancellation.clone());
        if let Some(policy) = &self.literal_policy {
            context.set_literal_policy(policy.clone());
        }
        context
    }

    /// Elaborate definitions in order, recording each in the globals table
    /// before moving on to the next.
    pub fn elaborate_definitions(
        &self,
        globals: &Globals,
        definitions: &[(DefId, surface::Definition)],
    ) -> Status {
        let mut context = self.context(globals);
        let mut status = Status::Ok;

        for (def, definition) in definitions {
            let result = context.elab_definition(*def, definition, &mut |m| {
                self.emit_diagnostic(m.to_diagnostic(&self.interner));
            });
            match result {
                Ok(elaborated) => {
                    status = status.merge(elaborated.status);
                    globals.set_typechecked(
                        *def,
                        Typechecked {
                            core: elaborated.core,
                            status: elaborated.status,
                            header_ok: elaborated.header_ok,
                        },
                    );
                }
                Err(Cancelled) => {
                    self.emit_diagnostic(Diagnostic::error().with_message("elaboration was cancelled"));
                    return Status::HasErrors;
                }
            }
        }

        status
    }

    pub fn elaborate_and_emit_term(
        &self,
        globals: &Globals,
        term: &surface::Term,
        expected_type: Option<&ArcTerm>,
    ) -> Status {
        let mut context = self.context(globals);
        let result = context.elab_term(term, expected_type, &mut |m| {
            self.emit_diagnostic(m.to_diagnostic(&self.interner));
        });

        let (term, r#type) = match result {
            Ok(elaborated) => elaborated,
            Err(Cancelled) => {
                self.emit_diagnostic(Diagnostic::error().with_message("elaboration was cancelled"));
                return Status::HasErrors;
            }
        };

        // Return early if we’ve seen any errors, unless `allow_errors` is enabled
        if *self.seen_errors.borrow() && !self.allow_errors {
            return Status::HasErrors;
        }

        let context = core::pretty::Context::new(&self.interner, globals);
        let doc = RcDoc::concat([
            context.term(&term),
            RcDoc::space(),
            RcDoc::text(":"),
            RcDoc::line().append(context.term(&r#type)).nest(2),
        ])
        .group();
        self.emit_doc(doc);

        match *self.seen_errors.borrow() {
            true => Status::HasErrors,
            false => Status::Ok,
        }
    }

    fn emit_doc(&self, doc: RcDoc<'_>) {
        let mut emit_writer = self.emit_writer.borrow_mut();
        let _ = writeln!(emit_writer, "{}", doc.pretty(self.emit_width));
        let _ = emit_writer.flush();
    }

    pub fn emit_diagnostic(&self, diagnostic: Diagnostic<FileId>) {
        let mut writer = self.diagnostic_writer.borrow_mut();
        let config = &self.codespan_config;

        let _ = codespan_reporting::term::emit(&mut *writer, config, &self.files, &diagnostic);
        let _ = writer.flush();

        if diagnostic.severity >= Severity::Error {
            *self.seen_errors.borrow_mut() = true;
        }
    }
}

impl Default for Driver {
    fn default() -> Driver {
        Driver::new()
    }
}
