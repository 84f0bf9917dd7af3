//! Representación intermedia.
//!
//! Cada función se reduce a una lista plana de instrucciones. Los
//! operandos son índices a instrucciones anteriores de la misma lista
//! ([`Ref`]); el flujo de control se codifica por medio de marcadores
//! con nombre y saltos hacia ellos, nunca por anidamiento. Las fases
//! posteriores jamás encogen la lista: una instrucción eliminada se
//! convierte en [`Instruction::Removed`], por lo cual los índices son
//! estables durante toda la compilación.

use crate::{
    model::{CompareOp, MathOp, Type},
    source::Position,
};

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

/// Referencia a una instrucción anterior de la misma función.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(pub usize);

/// Ancho del valor que produce o consume una instrucción.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    /// Palabra del archivo de registros.
    Word,

    /// Elemento del archivo de bits.
    Bit,
}

/// Espacio de direcciones de un arreglo.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Space {
    Ram,
    Rom,
}

/// Símbolo ya resuelto.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Var {
    /// Parámetro o local de la función en curso.
    Local(String),

    /// Global calificado, `módulo.nombre`.
    Global(String),
}

impl Display for Var {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Local(name) | Var::Global(name) => fmt.write_str(name),
        }
    }
}

/// Destino de un salto.
///
/// El generador solo conoce el nombre del marcador. El optimizador
/// resuelve el índice del marcador representativo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub marker: String,
    pub index: Option<usize>,
}

impl Target {
    pub fn new<S: Into<String>>(marker: S) -> Self {
        Target {
            marker: marker.into(),
            index: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// Instrucción eliminada por el optimizador.
    Removed,

    Marker(String),
    Jump(Target),

    /// Salto condicional: se toma si la condición es igual a `when`.
    Branch {
        when: bool,
        condition: Ref,
        target: Target,
    },

    Compare {
        op: CompareOp,
        width: Width,
        lhs: Ref,
        rhs: Ref,
    },

    /// Operación aritmética o lógica. Las unarias no tienen `rhs`.
    Math {
        op: MathOp,
        width: Width,
        lhs: Ref,
        rhs: Option<Ref>,
    },

    Assign {
        op: Option<MathOp>,
        width: Width,
        target: Ref,
        value: Ref,
    },

    /// Llamada. `result` indica si el valor de retorno se utiliza.
    Call {
        function: String,
        result: Option<Width>,
    },

    /// Paso de un argumento al parámetro del llamado.
    Parameter {
        function: String,
        name: String,
        value: Ref,
    },

    Return(Option<Ref>),
    Timer(Ref),
    Level(i32),
    Halt,
    Pause,
    Reset,
    Restart,
    Nop,

    Register(Var),
    Bit(Var),
    Ram(Var),
    Rom(Var),
    PortIn(Var),
    PortOut(Var),

    /// Lectura de un elemento de arreglo.
    Element {
        space: Space,
        array: Ref,
        index: Ref,
    },

    /// Dirección de un elemento de arreglo en RAM, como destino de asignación.
    Address {
        array: Ref,
        index: Ref,
    },

    Bool(bool),
    Int(i32),
}

impl Instruction {
    /// Operandos, en orden.
    pub fn operands(&self) -> impl Iterator<Item = Ref> {
        use Instruction::*;

        let (first, second) = match *self {
            Branch { condition, .. } => (Some(condition), None),
            Compare { lhs, rhs, .. } => (Some(lhs), Some(rhs)),
            Math { lhs, rhs, .. } => (Some(lhs), rhs),
            Assign { target, value, .. } => (Some(target), Some(value)),
            Parameter { value, .. } => (Some(value), None),
            Return(value) => (value, None),
            Timer(value) => (Some(value), None),
            Element { array, index, .. } | Address { array, index } => (Some(array), Some(index)),
            _ => (None, None),
        };

        first.into_iter().chain(second)
    }

    /// Lectura de almacenamiento con nombre, no de un temporal.
    pub fn is_storage(&self) -> bool {
        use Instruction::*;
        matches!(
            self,
            Register(_) | Bit(_) | Ram(_) | Rom(_) | PortIn(_) | PortOut(_)
        )
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, Instruction::Removed)
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Instruction::Jump(target) | Instruction::Branch { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn target_mut(&mut self) -> Option<&mut Target> {
        match self {
            Instruction::Jump(target) | Instruction::Branch { target, .. } => Some(target),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        use Instruction::*;

        match self {
            Removed => "REMOVED",
            Marker(_) => "MARKER",
            Jump(_) => "JMP",
            Branch { when: true, .. } => "JMPT",
            Branch { when: false, .. } => "JMPF",
            Compare { width: Width::Word, .. } => "COMPI",
            Compare { width: Width::Bit, .. } => "COMPB",
            Math { width: Width::Word, .. } => "MATHI",
            Math { width: Width::Bit, .. } => "MATHB",
            Assign { width: Width::Word, .. } => "ASSIGNI",
            Assign { width: Width::Bit, .. } => "ASSIGNB",
            Call { .. } => "CALL",
            Parameter { .. } => "PARM",
            Return(_) => "RETURN",
            Timer(_) => "TIMER",
            Level(_) => "LEVEL",
            Halt => "HALT",
            Pause => "PAUSE",
            Reset => "RESET",
            Restart => "RESTART",
            Nop => "NOP",
            Register(_) => "REG",
            Bit(_) => "BIT",
            Ram(_) => "RAM",
            Rom(_) => "ROM",
            PortIn(_) => "IN",
            PortOut(_) => "OUT",
            Element { .. } => "INDEX",
            Address { .. } => "ADDRESS",
            Bool(_) => "BCON",
            Int(_) => "ICON",
        }
    }
}

/// Archivo de almacenamiento temporal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum File {
    Register,
    Bit,
}

impl From<Width> for File {
    fn from(width: Width) -> Self {
        match width {
            Width::Word => File::Register,
            Width::Bit => File::Bit,
        }
    }
}

/// Ranura relativa a la ventana privada de una función.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    pub file: File,
    pub index: u32,
}

/// Estado de resolución de una dirección.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Offset {
    Unresolved,
    Relative(Slot),
    Absolute(u32),
}

impl Offset {
    /// Dirección absoluta, si ya fue resuelta.
    pub fn absolute(self) -> Option<u32> {
        match self {
            Offset::Absolute(address) => Some(address),
            _ => None,
        }
    }
}

impl Default for Offset {
    fn default() -> Self {
        Offset::Unresolved
    }
}

impl Display for Offset {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Unresolved => fmt.write_str("-"),
            Offset::Relative(Slot {
                file: File::Register,
                index,
            }) => write!(fmt, "r{}", index),
            Offset::Relative(Slot {
                file: File::Bit,
                index,
            }) => write!(fmt, "b{}", index),
            Offset::Absolute(address) => write!(fmt, "{}", address),
        }
    }
}

/// Una instrucción junto a su estado de asignación.
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    pub instruction: Instruction,
    pub offset: Offset,

    /// Índice de la última instrucción que referencia a esta.
    pub last_use: Option<usize>,
    pub at: Option<Position>,
}

impl Op {
    pub fn new(instruction: Instruction, at: Option<Position>) -> Self {
        Op {
            instruction,
            offset: Offset::Unresolved,
            last_use: None,
            at,
        }
    }
}

/// Ventana de una función en uno de los archivos.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Window {
    pub base: u32,
    pub count: u32,
}

impl Window {
    pub fn end(&self) -> u32 {
        self.base + self.count
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.count > 0 && other.count > 0 && self.base < other.end() && other.base < self.end()
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    pub label: String,
    pub isr: bool,
    pub returns: Option<Type>,
    pub body: Vec<Op>,
    pub registers: Window,
    pub bits: Window,

    /// Parámetros, locales y ranura de retorno (`return`).
    pub locals: BTreeMap<String, Offset>,
}

impl Function {
    pub fn new<S: Into<String>>(label: S, isr: bool, returns: Option<Type>) -> Self {
        Function {
            label: label.into(),
            isr,
            returns,
            body: Vec::new(),
            registers: Window::default(),
            bits: Window::default(),
            locals: BTreeMap::new(),
        }
    }

    /// Primer índice no eliminado a partir de `from`, inclusive.
    pub fn next_live(&self, from: usize) -> Option<usize> {
        (from..self.body.len()).find(|&index| !self.body[index].instruction.is_removed())
    }

    /// Llamados, en orden de aparición.
    pub fn calls(&self) -> impl Iterator<Item = (&str, Option<&Position>)> {
        self.body.iter().filter_map(|op| match &op.instruction {
            Instruction::Call { function, .. } => Some((function.as_str(), op.at.as_ref())),
            _ => None,
        })
    }

    /// Calcula el índice de última referencia de cada instrucción.
    ///
    /// Las lecturas de almacenamiento con nombre se consideran vivas
    /// hasta el final de la función.
    pub fn liveness(&mut self) {
        for op in &mut self.body {
            op.last_use = None;
        }

        let end = self.body.len();
        for index in 0..end {
            let operands: Vec<Ref> = self.body[index].instruction.operands().collect();
            if self.body[index].instruction.is_removed() {
                continue;
            }

            for Ref(operand) in operands {
                let operand = &mut self.body[operand];
                operand.last_use = Some(if operand.instruction.is_storage() {
                    end
                } else {
                    index
                });
            }
        }
    }
}

impl Display for Function {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            "; {}, {} {}, {} {}",
            self.label,
            self.registers.base,
            self.registers.count,
            self.bits.base,
            self.bits.count
        )?;

        for (index, op) in self.body.iter().enumerate() {
            if op.instruction.is_removed() {
                continue;
            }

            write!(fmt, "{:3} {} >", index, op.instruction.kind())?;

            use Instruction::*;
            match &op.instruction {
                Marker(name) => write!(fmt, " {}", name)?,
                Jump(target) | Branch { target, .. } => write!(fmt, " {}", target.marker)?,
                Compare { op, .. } => write!(fmt, " {:?}", op)?,
                Math { op, .. } => write!(fmt, " {:?}", op)?,
                Assign { op: Some(op), .. } => write!(fmt, " {:?}", op)?,
                Call { function, .. } => write!(fmt, " {}", function)?,
                Parameter { function, name, .. } => write!(fmt, " {}.{}", function, name)?,
                Level(level) => write!(fmt, " {}", level)?,
                Register(var) | Bit(var) | Ram(var) | Rom(var) | PortIn(var) | PortOut(var) => {
                    write!(fmt, " {}", var)?
                }
                Bool(value) => write!(fmt, " {}", value)?,
                Int(value) => write!(fmt, " {}", value)?,
                _ => (),
            }

            for (position, Ref(operand)) in op.instruction.operands().enumerate() {
                write!(fmt, " p{}={}", position + 1, operand)?;
            }

            write!(fmt, " [{}]", op.offset)?;
            if let Some(last) = op.last_use {
                write!(fmt, " {{{}}}", last)?;
            }

            writeln!(fmt)?;
        }

        Ok(())
    }
}

/// Resultado del generador: una función por etiqueta.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub functions: BTreeMap<String, Function>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(instruction: Instruction) -> Op {
        Op::new(instruction, None)
    }

    #[test]
    fn liveness_tracks_last_consumer() {
        let mut function = Function::new("demo.f", false, None);
        function.body = vec![
            op(Instruction::Marker(String::from("demo.f"))),
            op(Instruction::Register(Var::Local(String::from("a")))),
            op(Instruction::Int(2)),
            op(Instruction::Math {
                op: MathOp::Add,
                width: Width::Word,
                lhs: Ref(1),
                rhs: Some(Ref(2)),
            }),
            op(Instruction::Return(Some(Ref(3)))),
        ];

        function.liveness();

        assert_eq!(function.body[1].last_use, Some(5));
        assert_eq!(function.body[2].last_use, Some(3));
        assert_eq!(function.body[3].last_use, Some(4));
        assert_eq!(function.body[4].last_use, None);
    }

    #[test]
    fn removed_consumers_do_not_extend_lives() {
        let mut function = Function::new("demo.f", false, None);
        function.body = vec![
            op(Instruction::Int(1)),
            op(Instruction::Timer(Ref(0))),
            op(Instruction::Removed),
        ];

        function.liveness();
        assert_eq!(function.body[0].last_use, Some(1));

        function.body[1].instruction = Instruction::Removed;
        function.liveness();
        assert_eq!(function.body[0].last_use, None);
    }

    #[test]
    fn windows_overlap_only_when_sharing_addresses() {
        let a = Window { base: 2, count: 3 };
        let b = Window { base: 5, count: 1 };
        let c = Window { base: 4, count: 4 };
        let empty = Window { base: 3, count: 0 };

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&empty));
    }

    #[test]
    fn listing_shows_operands_and_offsets() {
        let mut function = Function::new("demo.f", false, None);
        function.body = vec![
            op(Instruction::Marker(String::from("demo.f"))),
            op(Instruction::Int(7)),
            op(Instruction::Timer(Ref(1))),
        ];

        function.body[1].offset = Offset::Absolute(9);
        function.liveness();

        let listing = function.to_string();
        assert!(listing.contains("  0 MARKER > demo.f [-]"));
        assert!(listing.contains("  1 ICON > 7 [9] {2}"));
        assert!(listing.contains("  2 TIMER > p1=1 [-]"));
    }
}
