//! Árboles de llamadas.
//!
//! Se construye un árbol por punto de entrada: la función principal
//! y cada manejador instalado en la tabla de vectores. Cada sitio de
//! llamada produce un hijo. Un nombre nunca puede repetirse a lo largo
//! de un camino raíz-hoja, ya que el procesador carece de pila.

use std::{
    collections::{BTreeMap, VecDeque},
    io::{self, Write},
};

use tracing::{debug, trace};

use crate::{
    error::{CompileError, Fatal},
    ir::{self, Function},
    model,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallTree {
    pub name: String,
    pub calls: Vec<CallTree>,
}

impl CallTree {
    /// Construye el árbol con raíz en `entry`.
    pub fn build(program: &ir::Program, entry: &str) -> Fatal<CallTree> {
        let mut path = Vec::new();
        visit(program, entry, &mut path)
    }

    /// Nombres únicos en orden de descubrimiento por anchura.
    pub fn discovery(&self) -> Vec<&str> {
        let mut order: Vec<&str> = Vec::new();
        let mut pending = VecDeque::from([self]);

        while let Some(node) = pending.pop_front() {
            if !order.contains(&node.name.as_str()) {
                order.push(&node.name);
                pending.extend(&node.calls);
            }
        }

        order
    }

    /// Escribe el árbol, con la ventana asignada a cada función.
    pub fn dump<W: Write>(
        &self,
        functions: &BTreeMap<String, Function>,
        output: &mut W,
    ) -> io::Result<()> {
        self.dump_at(functions, 0, output)
    }

    fn dump_at<W: Write>(
        &self,
        functions: &BTreeMap<String, Function>,
        depth: usize,
        output: &mut W,
    ) -> io::Result<()> {
        write!(output, "{:1$}{2}", "", depth * 3, self.name)?;
        if let Some(function) = functions.get(&self.name) {
            write!(
                output,
                ", {} {}, {} {}",
                function.registers.base,
                function.registers.count,
                function.bits.base,
                function.bits.count
            )?;
        }

        writeln!(output)?;
        for call in &self.calls {
            call.dump_at(functions, depth + 1, output)?;
        }

        Ok(())
    }
}

fn visit<'a>(program: &'a ir::Program, label: &'a str, path: &mut Vec<&'a str>) -> Fatal<CallTree> {
    let function = program
        .functions
        .get(label)
        .ok_or_else(|| CompileError::UndefinedFunction(label.to_owned()).nowhere())?;

    if function.isr {
        if let Some((_, at)) = function.calls().next() {
            return Err(CompileError::CallFromInterrupt(label.to_owned()).at(at.cloned()));
        }
    }

    path.push(label);

    let mut calls = Vec::new();
    for (callee, at) in function.calls() {
        let interrupt = program
            .functions
            .get(callee)
            .map_or(false, |callee| callee.isr);

        if interrupt {
            return Err(CompileError::CallToInterrupt(callee.to_owned()).at(at.cloned()));
        } else if path.contains(&callee) {
            return Err(CompileError::Recursion(callee.to_owned()).at(at.cloned()));
        }

        calls.push(visit(program, callee, path)?);
    }

    path.pop();
    Ok(CallTree {
        name: label.to_owned(),
        calls,
    })
}

/// Árboles de todos los puntos de entrada.
#[derive(Clone, Debug)]
pub struct Forest {
    pub main: CallTree,

    /// Manejadores de interrupción, en orden de nivel.
    pub interrupts: Vec<(u8, CallTree)>,
}

impl Forest {
    pub fn build(model: &model::Program, program: &ir::Program) -> Fatal<Forest> {
        let entry = model.entry();
        if !model.modules.contains_key(&model.name) {
            return Err(CompileError::UnknownModule(model.name.clone()).nowhere());
        } else if !program.functions.contains_key(&entry) {
            return Err(CompileError::MissingMain(entry).nowhere());
        }

        let main = CallTree::build(program, &entry)?;
        trace!(entry = %entry, "main call tree built");

        let interrupts = model
            .vectors
            .handlers()
            .map(|(level, label)| {
                let handler = program
                    .functions
                    .get(label)
                    .ok_or_else(|| CompileError::UndefinedFunction(label.to_owned()).nowhere())?;

                if !handler.isr {
                    return Err(CompileError::NotInterrupt(label.to_owned()).nowhere());
                }

                Ok((level, CallTree::build(program, label)?))
            })
            .collect::<Fatal<Vec<_>>>()?;

        debug!(interrupts = interrupts.len(), "call trees built");
        Ok(Forest { main, interrupts })
    }

    /// Todos los árboles, empezando por el principal.
    pub fn trees(&self) -> impl Iterator<Item = &CallTree> {
        std::iter::once(&self.main).chain(self.interrupts.iter().map(|(_, tree)| tree))
    }
}
