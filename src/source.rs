//! Rastreo de ubicaciones originales en código fuente.
//!
//! El front end externo anota sentencias con la posición (archivo y
//! línea) de la cual provienen. El back end arrastra esas posiciones
//! por cada instrucción generada, lo cual permite reportar el punto
//! aproximado en donde se origina un error fatal.

use serde::{Deserialize, Serialize};

use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
};

/// Un objeto cualquiera con una posición original opcional asociada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Located<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    at: Option<Position>,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la ubicación, si se conoce.
    pub fn position(&self) -> Option<&Position> {
        self.at.as_ref()
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, at: Option<Position>) -> Self {
        Located { value, at }
    }

    /// Construye un valor sin ubicación conocida.
    pub fn nowhere(value: T) -> Self {
        Located { value, at: None }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

impl<T> From<T> for Located<T> {
    fn from(value: T) -> Self {
        Located::nowhere(value)
    }
}

impl<E: Display> Display for Located<E> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match &self.at {
            Some(at) => write!(formatter, "{}: {}", at, self.value),
            None => Display::fmt(&self.value, formatter),
        }
    }
}

impl<E: Error> Error for Located<E> {}

/// Una posición archivo-línea.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    file: String,
    line: u32,
}

impl Position {
    /// Construye una posición.
    pub fn new<S: Into<String>>(file: S, line: u32) -> Self {
        Position {
            file: file.into(),
            line,
        }
    }

    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.file, self.line)
    }
}

impl Debug for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}
