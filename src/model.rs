//! Modelo de programa.
//!
//! Este es el contrato de entrada del back end. El front end externo
//! (análisis léxico, sintáctico, semántico y plegado de constantes)
//! construye un [`Program`] una única vez y lo entrega ya validado:
//! tablas de símbolos por módulo, firmas de funciones y cuerpos como
//! árboles de sentencias cuyas subexpresiones constantes ya fueron
//! reducidas a literales. Todas las fases lo tratan como inmutable.
//!
//! El modelo es serializable, por lo cual el driver lo recibe como un
//! documento JSON.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use crate::{
    error::{CompileError, Fatal},
    source::Located,
};

/// Cantidad de niveles de prioridad de interrupción.
pub const VECTORS: usize = 16;

/// Programa completo.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    /// Nombre del módulo principal. La entrada es `<name>.main`.
    pub name: String,

    #[serde(default)]
    pub config: HardwareConfig,

    #[serde(default)]
    pub vectors: Vectors,

    pub modules: BTreeMap<String, Module>,
}

/// Anchos de bus de los tres espacios de direcciones del procesador.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub rom_bits: u32,
    pub ram_bits: u32,
    pub const_bits: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        HardwareConfig {
            rom_bits: 12,
            ram_bits: 12,
            const_bits: 12,
        }
    }
}

/// Tabla de vectores de interrupción.
///
/// El nivel 0 corresponde al vector por defecto, que salta a la
/// entrada del programa; no es instalable por el usuario.
///
/// Se serializa como una lista de etiquetas opcionales indexada por
/// nivel. Al deserializarla, cada entrada pasa por [`Vectors::install`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<String>>", into = "Vec<Option<String>>")]
pub struct Vectors([Option<String>; VECTORS]);

impl Vectors {
    /// Instala un manejador en un nivel de prioridad.
    pub fn install<S: Into<String>>(&mut self, level: u8, label: S) -> Fatal<()> {
        let slot = match level as usize {
            0 => return Err(CompileError::ReservedVector.nowhere()),
            index if index < VECTORS => &mut self.0[index],
            _ => return Err(CompileError::VectorOutOfRange(level).nowhere()),
        };

        if slot.is_some() {
            return Err(CompileError::DuplicateVector(level).nowhere());
        }

        *slot = Some(label.into());
        Ok(())
    }

    /// Obtiene el manejador de un nivel, si existe.
    pub fn get(&self, level: usize) -> Option<&str> {
        self.0.get(level).and_then(Option::as_deref)
    }

    /// Niveles instalables poblados, en orden de nivel.
    pub fn handlers(&self) -> impl Iterator<Item = (u8, &str)> {
        self.0
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(level, label)| label.as_deref().map(|label| (level as u8, label)))
    }
}

impl TryFrom<Vec<Option<String>>> for Vectors {
    type Error = Located<CompileError>;

    fn try_from(slots: Vec<Option<String>>) -> Fatal<Self> {
        let mut vectors = Vectors::default();
        for (level, label) in slots.into_iter().enumerate() {
            if let Some(label) = label {
                let level = u8::try_from(level).unwrap_or(u8::MAX);
                vectors.install(level, label)?;
            }
        }

        Ok(vectors)
    }
}

impl From<Vectors> for Vec<Option<String>> {
    fn from(Vectors(slots): Vectors) -> Self {
        slots.into()
    }
}

/// Un módulo: globales y funciones.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub symbols: BTreeMap<String, Symbol>,

    /// Funciones indexadas por su etiqueta calificada (`módulo.nombre`).
    #[serde(default)]
    pub functions: BTreeMap<String, Function>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Int,
    Bool,

    /// Puntero a RAM.
    Ram,

    /// Puntero a ROM de constantes.
    Rom,
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => fmt.write_str("int"),
            Type::Bool => fmt.write_str("bool"),
            Type::Ram => fmt.write_str("ram"),
            Type::Rom => fmt.write_str("rom"),
        }
    }
}

/// Clase de almacenamiento.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    Register,
    Ram,
    Rom,
    Bit,
    Port,
}

impl Display for Storage {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Register => fmt.write_str("REG"),
            Storage::Ram => fmt.write_str("RAM"),
            Storage::Rom => fmt.write_str("ROM"),
            Storage::Bit => fmt.write_str("BIT"),
            Storage::Port => fmt.write_str("PORT"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    #[serde(rename = "type")]
    pub ty: Type,
    pub storage: Storage,

    #[serde(default = "one")]
    pub count: u32,

    /// Dirección fija (bits mapeados a hardware, puertos).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,

    /// Tabla de valores para constantes en ROM.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<i32>,
}

fn one() -> u32 {
    1
}

impl Symbol {
    pub fn new(ty: Type, storage: Storage) -> Self {
        Symbol {
            ty,
            storage,
            count: 1,
            offset: None,
            values: Vec::new(),
        }
    }

    /// Variable entera en el archivo de registros.
    pub fn int() -> Self {
        Symbol::new(Type::Int, Storage::Register)
    }

    /// Variable booleana en el archivo de bits.
    pub fn bool() -> Self {
        Symbol::new(Type::Bool, Storage::Bit)
    }

    /// Bit mapeado a hardware en una dirección fija.
    pub fn bit_at(offset: u32) -> Self {
        Symbol {
            offset: Some(offset),
            ..Symbol::bool()
        }
    }

    /// Arreglo de enteros en RAM.
    pub fn ram(count: u32) -> Self {
        Symbol {
            count,
            ..Symbol::new(Type::Ram, Storage::Ram)
        }
    }

    /// Constante o tabla de constantes en ROM.
    pub fn rom(ty: Type, values: Vec<i32>) -> Self {
        Symbol {
            count: values.len() as u32,
            values,
            ..Symbol::new(ty, Storage::Rom)
        }
    }

    /// Puerto de E/S.
    pub fn port(address: u32) -> Self {
        Symbol {
            offset: Some(address),
            ..Symbol::new(Type::Int, Storage::Port)
        }
    }

    /// Un arreglo tiene más de un elemento.
    pub fn is_array(&self) -> bool {
        self.count > 1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    #[serde(rename = "type")]
    pub ty: Type,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    pub label: String,

    /// Manejador de interrupción.
    #[serde(default)]
    pub isr: bool,

    #[serde(default)]
    pub returns: Option<Type>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Símbolos locales, incluyendo parámetros.
    #[serde(default)]
    pub symbols: BTreeMap<String, Symbol>,

    #[serde(default)]
    pub body: Vec<Located<Stmt>>,
}

impl Function {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Function {
            label: label.into(),
            isr: false,
            returns: None,
            parameters: Vec::new(),
            symbols: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn returns(self, ty: Type) -> Self {
        Function {
            returns: Some(ty),
            ..self
        }
    }

    pub fn isr(self) -> Self {
        Function { isr: true, ..self }
    }

    /// Agrega un parámetro y su símbolo local.
    pub fn parameter<S: Into<String>>(mut self, name: S, ty: Type) -> Self {
        let name = name.into();
        let storage = match ty {
            Type::Bool => Storage::Bit,
            _ => Storage::Register,
        };

        self.symbols.insert(name.clone(), Symbol::new(ty, storage));
        self.parameters.push(Parameter { name, ty });
        self
    }

    pub fn local<S: Into<String>>(mut self, name: S, symbol: Symbol) -> Self {
        self.symbols.insert(name.into(), symbol);
        self
    }

    pub fn body<I>(self, body: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Located<Stmt>>,
    {
        Function {
            body: body.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Nombre del módulo al que pertenece.
    pub fn module(&self) -> &str {
        module_of(&self.label)
    }
}

/// Operación aritmética o lógica.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shr,
    Shl,
    Neg,
    And,
    Or,
    Xor,
    Not,
    LogicalAnd,
    LogicalOr,
    LogicalNot,
}

impl MathOp {
    /// La operación produce y consume booleanos.
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            MathOp::LogicalAnd | MathOp::LogicalOr | MathOp::LogicalNot
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Int(i32),
    Bool(bool),
    Var(String),
    Index {
        array: String,
        index: Box<Expr>,
    },
    Unary {
        op: MathOp,
        operand: Box<Expr>,
    },
    Binary {
        op: MathOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: String,

        #[serde(default)]
        arguments: Vec<Expr>,
    },
}

impl Expr {
    pub fn var<S: Into<String>>(name: S) -> Self {
        Expr::Var(name.into())
    }

    pub fn index<S: Into<String>>(array: S, index: Expr) -> Self {
        Expr::Index {
            array: array.into(),
            index: Box::new(index),
        }
    }

    pub fn unary(op: MathOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: MathOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn compare(op: CompareOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call<S: Into<String>>(function: S, arguments: Vec<Expr>) -> Self {
        Expr::Call {
            function: function.into(),
            arguments,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Block(Vec<Located<Stmt>>),
    If {
        condition: Expr,
        then: Box<Located<Stmt>>,

        #[serde(default)]
        otherwise: Option<Box<Located<Stmt>>>,
    },
    Loop(Box<Located<Stmt>>),
    Break,
    Continue,
    Assign {
        target: Expr,

        /// Operador compuesto (`+=`, `&=`, ...). `None` es copia simple.
        #[serde(default)]
        op: Option<MathOp>,
        value: Expr,
    },
    Call {
        function: String,

        #[serde(default)]
        arguments: Vec<Expr>,
    },
    Return(Option<Expr>),
    Timer(Expr),
    Level(i32),
    Halt,
    Pause,
    Reset,
    Restart,
    Nop,
}

impl Stmt {
    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assign {
            target,
            op: None,
            value,
        }
    }

    pub fn compound(target: Expr, op: MathOp, value: Expr) -> Self {
        Stmt::Assign {
            target,
            op: Some(op),
            value,
        }
    }

    pub fn call<S: Into<String>>(function: S, arguments: Vec<Expr>) -> Self {
        Stmt::Call {
            function: function.into(),
            arguments,
        }
    }

    pub fn if_else(condition: Expr, then: Stmt, otherwise: Option<Stmt>) -> Self {
        Stmt::If {
            condition,
            then: Box::new(then.into()),
            otherwise: otherwise.map(|stmt| Box::new(stmt.into())),
        }
    }

    pub fn looping(body: Vec<Stmt>) -> Self {
        Stmt::Loop(Box::new(Stmt::block(body).into()))
    }

    pub fn block(body: Vec<Stmt>) -> Self {
        Stmt::Block(body.into_iter().map(Into::into).collect())
    }
}

/// Referencia resuelta a un símbolo.
#[derive(Copy, Clone, Debug)]
pub enum Scope<'a> {
    /// Símbolo local a la función que lo referencia.
    Local(&'a str),

    /// Símbolo global: módulo y nombre.
    Global(&'a str, &'a str),
}

impl Program {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Program {
            name: name.into(),
            config: HardwareConfig::default(),
            vectors: Vectors::default(),
            modules: BTreeMap::new(),
        }
    }

    /// Etiqueta de la función de entrada.
    pub fn entry(&self) -> String {
        format!("{}.main", self.name)
    }

    /// Agrega un módulo.
    pub fn module<S: Into<String>>(mut self, name: S, module: Module) -> Self {
        self.modules.insert(name.into(), module);
        self
    }

    /// Busca una función por su etiqueta calificada.
    pub fn function(&self, label: &str) -> Fatal<&Function> {
        let module = module_of(label);
        self.modules
            .get(module)
            .ok_or_else(|| CompileError::UnknownModule(module.to_owned()).nowhere())?
            .functions
            .get(label)
            .ok_or_else(|| CompileError::UndefinedFunction(label.to_owned()).nowhere())
    }

    /// Resuelve una etiqueta en el contexto de una función.
    ///
    /// Las etiquetas simples se buscan primero entre los símbolos de la
    /// función y luego entre los globales de su módulo. Una etiqueta
    /// `módulo.nombre` selecciona globales de otro módulo.
    pub fn symbol<'a>(
        &'a self,
        function: &'a Function,
        label: &'a str,
    ) -> Fatal<(Scope<'a>, &'a Symbol)> {
        let undefined = || CompileError::UndefinedSymbol(label.to_owned()).nowhere();

        match label.split_once('.') {
            None => {
                if let Some(symbol) = function.symbols.get(label) {
                    return Ok((Scope::Local(label), symbol));
                }

                let module = function.module();
                self.modules
                    .get(module)
                    .and_then(|found| found.symbols.get(label))
                    .map(|symbol| (Scope::Global(module, label), symbol))
                    .ok_or_else(undefined)
            }

            Some((module, name)) => {
                let (module, found) = self
                    .modules
                    .get_key_value(module)
                    .ok_or_else(|| CompileError::UnknownModule(module.to_owned()).nowhere())?;

                found
                    .symbols
                    .get(name)
                    .map(|symbol| (Scope::Global(module, name), symbol))
                    .ok_or_else(undefined)
            }
        }
    }
}

impl Module {
    pub fn symbol<S: Into<String>>(mut self, name: S, symbol: Symbol) -> Self {
        self.symbols.insert(name.into(), symbol);
        self
    }

    pub fn function(mut self, function: Function) -> Self {
        self.functions.insert(function.label.clone(), function);
        self
    }
}

/// Nombre de módulo de una etiqueta calificada.
pub fn module_of(label: &str) -> &str {
    label.split('.').next().unwrap_or(label)
}
