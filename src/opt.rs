//! Optimización de código intermedio.
//!
//! Las fases operan por función y en orden fijo. Ninguna encoge la
//! lista de instrucciones: eliminar es reemplazar por
//! [`Instruction::Removed`]. Las fases se repiten hasta que la
//! función deja de cambiar, por lo cual optimizar una función ya
//! optimizada no tiene efecto alguno.

use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::{
    error::{CompileError, Fatal},
    ir::{Function, Instruction, Program, Target},
};

/// Optimiza todas las funciones del programa.
pub fn optimize(program: &mut Program) -> Fatal<()> {
    for function in program.functions.values_mut() {
        optimize_function(function)?;
    }

    debug!(functions = program.functions.len(), "IR optimized");
    Ok(())
}

/// Optimiza una función hasta alcanzar un punto fijo.
pub fn optimize_function(function: &mut Function) -> Fatal<()> {
    let mut rounds = 0;

    loop {
        let before = function.body.clone();
        rounds += 1;

        resolve_markers(function)?;
        strip_after(function, |instruction| matches!(instruction, Instruction::Return(_)));
        thread_jumps(function);
        remove_unused_markers(function);
        strip_after(function, |instruction| matches!(instruction, Instruction::Jump(_)));
        remove_noop_jumps(function);

        if function.body == before {
            break;
        }
    }

    function.liveness();
    trace!(function = %function.label, rounds, "optimized");

    Ok(())
}

/// Indexa marcadores y redirige los saltos a índices resueltos.
///
/// Cada racha de marcadores adyacentes se reduce a su primer marcador.
/// El marcador de entrada de la función no participa.
fn resolve_markers(function: &mut Function) -> Fatal<()> {
    let mut markers = HashMap::new();
    let mut representative: Option<(usize, String)> = None;

    for index in 1..function.body.len() {
        let instruction = &mut function.body[index].instruction;
        match instruction {
            Instruction::Removed => (),

            Instruction::Marker(name) => match &representative {
                Some(first) => {
                    markers.insert(name.clone(), first.clone());
                    *instruction = Instruction::Removed;
                }

                None => {
                    let first = (index, name.clone());
                    markers.insert(name.clone(), first.clone());
                    representative = Some(first);
                }
            },

            _ => representative = None,
        }
    }

    for index in 0..function.body.len() {
        let target = match function.body[index].instruction.target_mut() {
            Some(target) => target,
            None => continue,
        };

        match markers.get(&target.marker) {
            Some((resolved, name)) => {
                target.index = Some(*resolved);
                target.marker = name.clone();
            }

            None => {
                let reason = format!("jump to undefined marker `{}`", target.marker);
                let at = function.body[index].at.clone();

                return Err(CompileError::Internal {
                    function: function.label.clone(),
                    index,
                    reason,
                }
                .at(at));
            }
        }
    }

    Ok(())
}

/// Elimina lo que sigue a ciertas instrucciones hasta el próximo marcador.
///
/// Se detiene también en retornos, los cuales nunca se eliminan aquí
/// salvo que sigan a otro retorno.
fn strip_after<F>(function: &mut Function, stops: F)
where
    F: Fn(&Instruction) -> bool,
{
    let mut dead = false;

    for op in &mut function.body {
        let instruction = &op.instruction;
        if instruction.is_removed() {
            continue;
        } else if matches!(instruction, Instruction::Marker(_)) {
            dead = false;
        } else if !dead {
            dead = stops(instruction);
        } else if matches!(instruction, Instruction::Return(_)) && !stops(instruction) {
            dead = false;
        } else {
            op.instruction = Instruction::Removed;
        }
    }
}

/// Un salto hacia un salto incondicional se redirige al destino final.
fn thread_jumps(function: &mut Function) {
    for index in 0..function.body.len() {
        let mut target = match function.body[index].instruction.target() {
            Some(target) => target.clone(),
            None => continue,
        };

        let mut visited = HashSet::new();
        while let Some(next) = target.index.and_then(|marker| function.next_live(marker + 1)) {
            let next_target = match &function.body[next].instruction {
                Instruction::Jump(next_target) if visited.insert(next) => next_target,
                _ => break,
            };

            target = next_target.clone();
        }

        if let Some(current) = function.body[index].instruction.target_mut() {
            *current = target;
        }
    }
}

fn remove_unused_markers(function: &mut Function) {
    let targeted: HashSet<usize> = function
        .body
        .iter()
        .filter_map(|op| op.instruction.target())
        .filter_map(|target| target.index)
        .collect();

    for (index, op) in function.body.iter_mut().enumerate().skip(1) {
        if matches!(op.instruction, Instruction::Marker(_)) && !targeted.contains(&index) {
            op.instruction = Instruction::Removed;
        }
    }
}

/// Elimina saltos incondicionales hacia la instrucción siguiente.
fn remove_noop_jumps(function: &mut Function) {
    for index in 0..function.body.len() {
        let target = match &function.body[index].instruction {
            Instruction::Jump(Target { index: target, .. }) => *target,
            _ => continue,
        };

        if target.is_some() && function.next_live(index + 1) == target {
            function.body[index].instruction = Instruction::Removed;
        }
    }
}
