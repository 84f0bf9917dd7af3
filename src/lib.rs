//! Back end del compilador Miny18.
//!
//! # Entrada
//! El front end entrega un [`model::Program`] ya validado: tablas de
//! símbolos, firmas de funciones y cuerpos como árboles de sentencias.
//! Su producción queda fuera de este crate.
//!
//! # Fases
//! Todas las fases operan sobre el programa completo y en orden
//! estricto; ninguna empieza antes de que la anterior termine con
//! todas las funciones.
//!
//! 1. Generación de código intermedio en [`lower`]. Cada función se
//!    traduce a una lista plana de instrucciones descrita en [`ir`].
//! 2. Optimización en [`opt`]: resolución de marcadores, eliminación de
//!    código muerto y encadenamiento de saltos.
//! 3. Construcción de árboles de llamadas en [`calltree`], donde se
//!    rechaza la recursión.
//! 4. Asignación de almacenamiento en [`alloc`]. El procesador carece
//!    de pila, por lo cual cada temporal, local y parámetro recibe una
//!    dirección fija. Funciones que nunca están activas a la vez
//!    comparten direcciones.
//! 5. Emisión de ensamblador Proc18 en [`codegen`].
//!
//! Cualquier error aborta la compilación completa.

#[macro_use]
mod macros;

pub mod alloc;
pub mod calltree;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod lower;
pub mod model;
pub mod opt;
pub mod source;

use std::io::Write;

use calltree::Forest;
use error::{Error, Fatal};
use tracing::debug;

/// Resultado de todas las fases previas a la emisión.
#[derive(Clone, Debug)]
pub struct Compilation {
    pub program: ir::Program,
    pub forest: Forest,
    pub layout: alloc::Layout,
}

impl Compilation {
    /// Escribe el ensamblador del programa.
    pub fn emit<W: Write>(&self, model: &model::Program, output: &mut W) -> Result<(), Error> {
        codegen::emit(model, &self.program, &self.layout, output)
    }
}

/// Ejecuta todas las fases hasta la asignación de almacenamiento.
pub fn build(model: &model::Program) -> Fatal<Compilation> {
    let mut program = lower::lower(model)?;
    opt::optimize(&mut program)?;

    let forest = Forest::build(model, &program)?;
    let layout = alloc::allocate(model, &mut program, &forest)?;

    debug!(functions = layout.order.len(), "build finished");
    Ok(Compilation {
        program,
        forest,
        layout,
    })
}

/// Compila un programa completo hacia `output`.
pub fn compile<W: Write>(model: &model::Program, output: &mut W) -> Result<(), Error> {
    build(model)?.emit(model, output)
}
