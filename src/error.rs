//! Errores fatales y su presentación.
//!
//! Todo error del back end es fatal: la corrección de cada fase depende
//! de invariantes de programa completo establecidas por la fase anterior,
//! por lo cual no existe recuperación local.

use crate::source::{Located, Position};
use thiserror::Error;

use std::{
    error::Error as StdError,
    fmt::{self, Display},
    io,
};

/// Resultado de una fase del compilador.
pub type Fatal<T> = Result<T, Located<CompileError>>;

/// Un error semántico, de asignación de almacenamiento o de consistencia interna.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Recursive function call: {0}")]
    Recursion(String),

    #[error("Bool arrays are not supported: `{0}`")]
    BoolArray(String),

    #[error("Unsupported storage for function symbol `{0}`")]
    UnsupportedStorage(String),

    #[error("Constants ROM too small: {used} words needed, {capacity} available")]
    ConstantsOverflow { used: u32, capacity: u32 },

    #[error("RAM too small: {used} words needed, {capacity} available")]
    RamOverflow { used: u32, capacity: u32 },

    #[error("Missing main function `{0}`")]
    MissingMain(String),

    #[error("Invalid module name: {0}")]
    UnknownModule(String),

    #[error("Undefined function: {0}")]
    UndefinedFunction(String),

    #[error("Label not found: {0}")]
    UndefinedSymbol(String),

    #[error("ISR can't make calls: {0}")]
    CallFromInterrupt(String),

    #[error("Call to ISR: {0}")]
    CallToInterrupt(String),

    #[error("Interrupt vector points to a non-ISR function: {0}")]
    NotInterrupt(String),

    #[error("Parameter count error: `{function}` expects {expected}, found {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("`break` or `continue` outside of a loop")]
    LoopControl,

    #[error("Expression can't be assigned to: `{0}`")]
    NotAssignable(String),

    #[error("Duplicate ISR level: {0}")]
    DuplicateVector(u8),

    #[error("ISR level 0 is reserved for the program entry")]
    ReservedVector,

    #[error("ISR level out of range: {0}")]
    VectorOutOfRange(u8),

    #[error("Invalid instruction {index} in `{function}`: {reason}")]
    Internal {
        function: String,
        index: usize,
        reason: String,
    },
}

impl CompileError {
    /// Asocia una posición opcional al error.
    pub fn at(self, at: Option<Position>) -> Located<Self> {
        Located::at(self, at)
    }

    /// Error sin posición conocida.
    pub fn nowhere(self) -> Located<Self> {
        Located::nowhere(self)
    }
}

/// Falla de compilación o de E/S durante emisión.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Compile(#[from] Located<CompileError>),
}

mod sealed {
    pub trait Sealed {}
}

pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn StdError;
    fn position(&self) -> Option<&Position>;
}

/// Reporte legible de uno o más errores.
pub struct Diagnostics {
    kind: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            kind: "error",
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            errors: vec![Box::new(error)],
            ..Default::default()
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { kind, errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in errors {
            writeln!(fmt, "{}: {}", kind, error.source())?;
            if let Some(position) = error.position() {
                writeln!(fmt, " --> {}", position)?;
            }

            writeln!(fmt)?;
        }

        let error_or_errors = if errors.len() == 1 { "error" } else { "errors" };
        writeln!(
            fmt,
            "Build failed with {} {}",
            errors.len(),
            error_or_errors
        )
    }
}

impl<E: StdError> sealed::Sealed for Located<E> {}

impl<E: StdError> LocatedError for Located<E> {
    fn source(&self) -> &dyn StdError {
        self.as_ref()
    }

    fn position(&self) -> Option<&Position> {
        Located::position(self)
    }
}
