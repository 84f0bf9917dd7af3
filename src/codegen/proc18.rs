//! Proc18: procesador de 18 bits sin pila.
//!
//! Operandos de dos formas: `d, s` entre direcciones de registro o de
//! bit, `d, #v` con inmediato y `(a)` para acceso indirecto. El
//! registro 1 es el intermediario de las secuencias
//! cargar-modificar-almacenar y el bit 0 recibe las pruebas de verdad.

use std::{
    fmt::{self, Display},
    io::Write,
};

use crate::{
    alloc::Layout,
    error::{CompileError, Error},
    ir::{self, Function, Instruction, Offset, Ref, Space, Target, Var, Width},
    model::{CompareOp, MathOp},
};

/// Registro intermediario.
const SCRATCH: u32 = 1;

/// Bit de prueba de verdad.
const TRUTH: u32 = 0;

/// Operando fuente.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Operand {
    Address(u32),
    Immediate(i32),
}

impl Display for Operand {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Address(address) => write!(fmt, "{}", address),
            Operand::Immediate(value) => write!(fmt, "#{}", value),
        }
    }
}

/// Genera el cuerpo de una función.
pub fn emit_function<W: Write>(
    output: &mut W,
    program: &ir::Program,
    layout: &Layout,
    function: &Function,
) -> Result<(), Error> {
    let mut proc18 = Proc18 {
        output,
        program,
        layout,
        function,
    };

    proc18.write_asm()
}

struct Proc18<'a, W> {
    output: &'a mut W,
    program: &'a ir::Program,
    layout: &'a Layout,
    function: &'a Function,
}

impl<W: Write> Proc18<'_, W> {
    fn write_asm(&mut self) -> Result<(), Error> {
        for index in 0..self.function.body.len() {
            self.put_instruction(index)?;
        }

        Ok(())
    }

    fn put_instruction(&mut self, index: usize) -> Result<(), Error> {
        use Instruction::*;

        let function = self.function;
        let op = &function.body[index];
        match &op.instruction {
            Removed | Register(_) | Bit(_) | Ram(_) | Rom(_) | PortOut(_) => (),

            Marker(name) => writeln!(self.output, "{}", name)?,

            Int(value) => {
                if let Some(address) = op.offset.absolute() {
                    emit!(self, "MOV", "{}, #{}", address, value)?;
                }
            }

            Bool(value) => {
                if let Some(address) = op.offset.absolute() {
                    self.set(address, *value)?;
                }
            }

            PortIn(var) => {
                let port = self.port(var, index)?;
                let address = self.address(index)?;
                emit!(self, "IN", "{}, {}", address, port)?;
            }

            Jump(target) => emit!(self, "JMP", "{}", target.marker)?,

            Branch {
                when,
                condition,
                target,
            } => self.branch(*when, *condition, target)?,

            Compare { op, width, lhs, rhs } => self.compare(index, *op, *width, *lhs, *rhs)?,

            Math { op, width, lhs, rhs } => match width {
                Width::Word => self.math_word(index, *op, *lhs, *rhs)?,
                Width::Bit => self.math_bit(index, *op, *lhs, *rhs)?,
            },

            Assign {
                op,
                width,
                target,
                value,
            } => {
                self.assign(index, *op, *width, *target, *value)?;
                writeln!(self.output)?;
            }

            Element {
                space,
                array,
                index: element,
            } => {
                let address = self.address(index)?;
                self.element_address(index, *array, *element)?;

                let load = match space {
                    Space::Ram => "LDR",
                    Space::Rom => "LDC",
                };

                emit!(self, load, "{0}, ({0})", address)?;
            }

            Address {
                array,
                index: element,
            } => self.element_address(index, *array, *element)?,

            Call { function, result } => {
                emit!(self, "CALL", "{}", function)?;
                if let Some(width) = result {
                    let address = self.address(index)?;
                    let slot = self.callee_slot(function, "return", index)?;
                    self.copy(*width, address, slot)?;
                }
            }

            Parameter {
                function,
                name,
                value,
            } => {
                let slot = self.callee_slot(function, name, index)?;
                self.pass(slot, *value)?;
            }

            Return(value) => {
                if let Some(value) = value {
                    let slot = self.callee_slot(&self.function.label, "return", index)?;
                    self.pass(slot, *value)?;
                }

                let opcode = if self.function.isr { "RTI" } else { "RTS" };
                emit!(self, opcode)?;
                writeln!(self.output)?;
            }

            Timer(value) => {
                let value = self.operand(*value)?;
                emit!(self, "TIMER", "{}", value)?;
            }

            Level(level) => emit!(self, "LEVEL", "#{}", level)?,
            Halt => emit!(self, "HALT")?,
            Pause => emit!(self, "PAUSE")?,
            Reset => emit!(self, "RESET")?,
            Restart => emit!(self, "RESTART")?,
            Nop => emit!(self, "NOP")?,
        }

        Ok(())
    }

    fn branch(&mut self, when: bool, condition: Ref, target: &Target) -> Result<(), Error> {
        let fused = match self.function.body[condition.0].instruction {
            Instruction::Compare { op, .. } => Some(op),
            _ => None,
        };

        match fused {
            Some(op) => emit!(self, jump(op, when), "{}", target.marker)?,
            None => {
                let condition = self.address(condition.0)?;
                let opcode = if when { "JEQ" } else { "JNE" };

                emit!(self, "BNOT", "{}, {}", TRUTH, condition)?;
                emit!(self, opcode, "{}", target.marker)?;
            }
        }

        writeln!(self.output)?;
        Ok(())
    }

    fn compare(
        &mut self,
        index: usize,
        op: CompareOp,
        width: Width,
        lhs: Ref,
        rhs: Ref,
    ) -> Result<(), Error> {
        match width {
            Width::Word => {
                let lhs = match self.operand(lhs)? {
                    Operand::Address(address) => address,
                    immediate => {
                        emit!(self, "MOV", "{}, {}", SCRATCH, immediate)?;
                        SCRATCH
                    }
                };

                let rhs = self.operand(rhs)?;
                emit!(self, "CMP", "{}, {}", lhs, rhs)?;
            }

            Width::Bit => {
                let lhs = self.address(lhs.0)?;
                let rhs = self.address(rhs.0)?;
                emit!(self, "BCMP", "{}, {}", lhs, rhs)?;
            }
        }

        if let Some(address) = self.function.body[index].offset.absolute() {
            emit!(self, set_on(op), "{}", address)?;
        }

        Ok(())
    }

    fn math_word(
        &mut self,
        index: usize,
        op: MathOp,
        lhs: Ref,
        rhs: Option<Ref>,
    ) -> Result<(), Error> {
        let opcode = self.word_opcode(index, op)?;
        let target = self.address(index)?;
        let lhs = self.operand(lhs)?;

        if lhs != Operand::Address(target) {
            emit!(self, "MOV", "{}, {}", target, lhs)?;
        }

        match rhs {
            None => emit!(self, opcode, "{0}, {0}", target)?,
            Some(rhs) => {
                let rhs = self.operand(rhs)?;
                emit!(self, opcode, "{}, {}", target, rhs)?;
            }
        }

        Ok(())
    }

    fn math_bit(
        &mut self,
        index: usize,
        op: MathOp,
        lhs: Ref,
        rhs: Option<Ref>,
    ) -> Result<(), Error> {
        let opcode = self.bit_opcode(index, op)?;
        let target = self.address(index)?;
        let lhs = self.address(lhs.0)?;

        match rhs {
            None => emit!(self, opcode, "{}, {}", target, lhs)?,
            Some(rhs) => {
                let rhs = self.address(rhs.0)?;
                if target == lhs {
                    emit!(self, opcode, "{}, {}", target, rhs)?;
                } else if target == rhs {
                    emit!(self, opcode, "{}, {}", target, lhs)?;
                } else {
                    emit!(self, "BMOV", "{}, {}", target, lhs)?;
                    emit!(self, opcode, "{}, {}", target, rhs)?;
                }
            }
        }

        Ok(())
    }

    fn assign(
        &mut self,
        index: usize,
        op: Option<MathOp>,
        width: Width,
        target: Ref,
        value: Ref,
    ) -> Result<(), Error> {
        if width == Width::Bit {
            let target = self.address(target.0)?;
            let function = self.function;
            return match (op, &function.body[value.0].instruction) {
                (None, Instruction::Bool(value)) => self.set(target, *value),
                (None, _) => self.copy(Width::Bit, target, self.address(value.0)?),
                (Some(op), _) => {
                    let opcode = self.bit_opcode(index, op)?;
                    let value = self.address(value.0)?;
                    emit!(self, opcode, "{}, {}", target, value)?;
                    Ok(())
                }
            };
        }

        let opcode = match op {
            None => "MOV",
            Some(op) => self.word_opcode(index, op)?,
        };

        let value = self.operand(value)?;
        let function = self.function;
        let destination = &function.body[target.0];

        match &destination.instruction {
            Instruction::Register(_) => {
                let target = self.address(target.0)?;
                emit!(self, opcode, "{}, {}", target, value)?;
            }

            Instruction::Address { .. } => {
                let pointer = self.address(target.0)?;
                match (op, value) {
                    (None, Operand::Address(value)) => emit!(self, "STR", "({}), {}", pointer, value)?,
                    (None, Operand::Immediate(_)) => {
                        emit!(self, "MOV", "{}, {}", SCRATCH, value)?;
                        emit!(self, "STR", "({}), {}", pointer, SCRATCH)?;
                    }

                    (Some(_), _) => {
                        emit!(self, "LDR", "{}, ({})", SCRATCH, pointer)?;
                        emit!(self, opcode, "{}, {}", SCRATCH, value)?;
                        emit!(self, "STR", "({}), {}", pointer, SCRATCH)?;
                    }
                }
            }

            Instruction::PortOut(_) => {
                let port = self.address(target.0)?;
                match (op, value) {
                    (None, Operand::Address(value)) => emit!(self, "OUT", "{}, {}", port, value)?,
                    (None, Operand::Immediate(_)) => {
                        emit!(self, "MOV", "{}, {}", SCRATCH, value)?;
                        emit!(self, "OUT", "{}, {}", port, SCRATCH)?;
                    }

                    (Some(_), _) => {
                        emit!(self, "IN", "{}, {}", SCRATCH, port)?;
                        emit!(self, opcode, "{}, {}", SCRATCH, value)?;
                        emit!(self, "OUT", "{}, {}", port, SCRATCH)?;
                    }
                }
            }

            _ => return Err(self.internal(index, "invalid assignment target").into()),
        }

        Ok(())
    }

    /// Deja en la ranura de la instrucción la dirección de un elemento.
    fn element_address(&mut self, index: usize, array: Ref, element: Ref) -> Result<(), Error> {
        let target = self.address(index)?;
        let element = self.operand(element)?;
        emit!(self, "MOV", "{}, {}", target, element)?;

        let function = self.function;
        let array_op = &function.body[array.0];
        let base = self.address(array.0)?;

        match array_op.instruction {
            Instruction::Register(_) => emit!(self, "ADD", "{}, {}", target, base)?,
            _ => emit!(self, "ADD", "{}, #{}", target, base)?,
        }

        Ok(())
    }

    /// Escribe un valor en una ranura ajena: parámetro o retorno.
    fn pass(&mut self, slot: u32, value: Ref) -> Result<(), Error> {
        let function = self.function;
        let op = &function.body[value.0];
        match op.instruction {
            Instruction::Bool(value) if op.offset.absolute().is_none() => self.set(slot, value),
            Instruction::Int(value) if op.offset.absolute().is_none() => {
                emit!(self, "MOV", "{}, #{}", slot, value)?;
                Ok(())
            }

            Instruction::Ram(_) | Instruction::Rom(_) => {
                let base = self.address(value.0)?;
                emit!(self, "MOV", "{}, #{}", slot, base)?;
                Ok(())
            }

            _ => {
                let width = width_of(&op.instruction);
                let source = self.address(value.0)?;
                self.copy(width, slot, source)
            }
        }
    }

    fn set(&mut self, address: u32, value: bool) -> Result<(), Error> {
        let opcode = if value { "BSET" } else { "BCLR" };
        emit!(self, opcode, "{}", address)?;
        Ok(())
    }

    fn copy(&mut self, width: Width, target: u32, source: u32) -> Result<(), Error> {
        match width {
            Width::Word => emit!(self, "MOV", "{}, {}", target, source)?,
            Width::Bit if target != source => emit!(self, "BMOV", "{}, {}", target, source)?,
            Width::Bit => (),
        }

        Ok(())
    }

    /// Un arreglo como valor es su dirección base, que es un inmediato.
    fn operand(&self, value: Ref) -> Result<Operand, Error> {
        let op = &self.function.body[value.0];
        match (op.offset, &op.instruction) {
            (Offset::Absolute(base), Instruction::Ram(_) | Instruction::Rom(_)) => {
                Ok(Operand::Immediate(base as i32))
            }

            (Offset::Absolute(address), _) => Ok(Operand::Address(address)),
            (_, Instruction::Int(value)) => Ok(Operand::Immediate(*value)),
            (_, Instruction::Bool(value)) => Ok(Operand::Immediate(*value as i32)),
            _ => Err(self.internal(value.0, "operand has no address").into()),
        }
    }

    fn address(&self, index: usize) -> Result<u32, Error> {
        self.function.body[index]
            .offset
            .absolute()
            .ok_or_else(|| self.internal(index, "instruction has no address").into())
    }

    fn port(&self, var: &Var, index: usize) -> Result<u32, Error> {
        self.layout
            .addresses
            .get(&var.to_string())
            .copied()
            .ok_or_else(|| self.internal(index, "port has no address").into())
    }

    fn callee_slot(&self, function: &str, name: &str, index: usize) -> Result<u32, Error> {
        self.program
            .functions
            .get(function)
            .and_then(|callee| callee.locals.get(name))
            .and_then(|offset| offset.absolute())
            .ok_or_else(|| {
                let reason = format!("no slot for `{}` in `{}`", name, function);
                self.internal(index, &reason).into()
            })
    }

    fn word_opcode(&self, index: usize, op: MathOp) -> Result<&'static str, Error> {
        let opcode = match op {
            MathOp::Add => "ADD",
            MathOp::Sub => "SUB",
            MathOp::Mul => "MUL",
            MathOp::Div => "DIV",
            MathOp::Mod => "MOD",
            MathOp::Shr => "SHR",
            MathOp::Shl => "SHL",
            MathOp::Neg => "NEG",
            MathOp::And => "AND",
            MathOp::Or => "OR",
            MathOp::Xor => "XOR",
            MathOp::Not => "INV",
            _ => return Err(self.internal(index, "logical operation on words").into()),
        };

        Ok(opcode)
    }

    fn bit_opcode(&self, index: usize, op: MathOp) -> Result<&'static str, Error> {
        let opcode = match op {
            MathOp::LogicalAnd | MathOp::And => "BAND",
            MathOp::LogicalOr | MathOp::Or => "BOR",
            MathOp::LogicalNot | MathOp::Not => "BNOT",
            _ => return Err(self.internal(index, "arithmetic on bits").into()),
        };

        Ok(opcode)
    }

    fn internal(&self, index: usize, reason: &str) -> crate::source::Located<CompileError> {
        let at = self.function.body.get(index).and_then(|op| op.at.clone());
        CompileError::Internal {
            function: self.function.label.clone(),
            index,
            reason: reason.to_owned(),
        }
        .at(at)
    }
}

/// Ancho del valor que produce una instrucción.
fn width_of(instruction: &Instruction) -> Width {
    match instruction {
        Instruction::Bit(_) | Instruction::Bool(_) | Instruction::Compare { .. } => Width::Bit,
        Instruction::Math { width, .. } => *width,
        Instruction::Call {
            result: Some(width),
            ..
        } => *width,
        _ => Width::Word,
    }
}

/// Salto condicional fusionado con una comparación.
fn jump(op: CompareOp, when: bool) -> &'static str {
    use CompareOp::*;

    match (op, when) {
        (Eq, true) | (Ne, false) => "JEQ",
        (Ne, true) | (Eq, false) => "JNE",
        (Gt, true) | (Le, false) => "JGT",
        (Ge, true) | (Lt, false) => "JGE",
        (Lt, true) | (Ge, false) => "JLT",
        (Le, true) | (Gt, false) => "JLE",
    }
}

fn set_on(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "SEQ",
        CompareOp::Ne => "SNE",
        CompareOp::Gt => "SGT",
        CompareOp::Lt => "SLT",
        CompareOp::Ge => "SGE",
        CompareOp::Le => "SLE",
    }
}
