//! Emisión de ensamblador.
//!
//! El archivo de salida contiene, en orden: la configuración de
//! hardware, la tabla de constantes, la tabla de vectores y una
//! sección por cada función alcanzable.

use std::io::Write;

use crate::{
    alloc::Layout,
    error::{CompileError, Error},
    ir,
    model::{self, Storage, VECTORS},
};

mod proc18;

/// Escribe el programa completo en `output`.
pub fn emit<W: Write>(
    model: &model::Program,
    program: &ir::Program,
    layout: &Layout,
    output: &mut W,
) -> Result<(), Error> {
    let config = &model.config;
    writeln!(
        output,
        "    {:<6}  {} {} {}",
        "CONFIG", config.rom_bits, config.ram_bits, config.const_bits
    )?;

    emit_constants(model, output)?;
    emit_vectors(model, output)?;

    for label in &layout.order {
        let function = program
            .functions
            .get(label)
            .ok_or_else(|| CompileError::UndefinedFunction(label.clone()).nowhere())?;

        writeln!(output, ";----------------------")?;
        writeln!(output, "; {}", label)?;
        writeln!(output, ";----------------------")?;

        proc18::emit_function(output, program, layout, function)?;
    }

    Ok(())
}

fn emit_constants<W: Write>(model: &model::Program, output: &mut W) -> Result<(), Error> {
    writeln!(output, "    {:<6}  0", "ORG")?;

    for module in model.modules.values() {
        let arrays = module
            .symbols
            .values()
            .filter(|symbol| symbol.storage == Storage::Rom && symbol.is_array());

        for symbol in arrays {
            let values: Vec<String> = symbol.values.iter().map(i32::to_string).collect();
            writeln!(output, "    {:<6}  {}", "DC", values.join(" "))?;
        }
    }

    writeln!(output)?;
    Ok(())
}

/// El vector 0 siempre salta a la entrada del programa. Los vectores
/// sin manejador también.
fn emit_vectors<W: Write>(model: &model::Program, output: &mut W) -> Result<(), Error> {
    let entry = model.entry();
    writeln!(output, "    {:<6}  0", "ORG")?;

    for level in 0..VECTORS {
        let label = model.vectors.get(level).unwrap_or(&entry);
        writeln!(output, "    {:<6}  {}", "JMP", label)?;
    }

    writeln!(output)?;
    Ok(())
}
