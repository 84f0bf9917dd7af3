//! Asignación de almacenamiento.
//!
//! El procesador carece de pila, por lo cual toda dirección se fija en
//! tiempo de compilación. Las fases son estrictamente secuenciales:
//!
//! 1. Constantes en ROM y globales de cada módulo.
//! 2. Temporales y locales de cada función alcanzable, por separado.
//!    Cada función solo conoce aquí la cantidad de ranuras relativas
//!    que necesita en cada archivo.
//! 3. Propagación de bases sobre el árbol de llamadas. Funciones que
//!    nunca están activas a la vez comparten direcciones; los
//!    manejadores de interrupción obtienen ventanas propias por encima
//!    de todo lo alcanzable desde la entrada.
//! 4. Conversión de direcciones relativas a absolutas.

mod slots;

pub use slots::{Reuse, SlotPool};

use std::{
    collections::{BTreeMap, HashSet},
    io::{self, Write},
};

use tracing::{debug, trace};

use crate::{
    calltree::{CallTree, Forest},
    error::{CompileError, Fatal},
    ir::{self, File, Function, Instruction, Offset, Ref, Slot, Var, Width, Window},
    model::{self, Storage, Type},
    source::Located,
};

/// Registros reservados para uso interno. El registro 1 sirve de
/// intermediario en lecturas-modificaciones-escrituras.
pub const SCRATCH_REGISTERS: u32 = 2;

/// Bits reservados. El bit 0 recibe pruebas de verdad.
pub const SCRATCH_BITS: u32 = 1;

/// Ubicación final de todo el programa.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    /// Dirección de cada global calificado en su propio espacio.
    pub addresses: BTreeMap<String, u32>,

    /// Funciones alcanzables, en orden de asignación.
    pub order: Vec<String>,

    pub registers: u32,
    pub bits: u32,
    pub ram: u32,
    pub constants: u32,
}

impl Layout {
    /// Escribe la ubicación de cada símbolo global.
    pub fn dump<W: Write>(&self, model: &model::Program, output: &mut W) -> io::Result<()> {
        for (module, symbols) in &model.modules {
            for (name, symbol) in &symbols.symbols {
                let label = format!("{}.{}", module, name);
                let storage = symbol.storage.to_string();

                match self.addresses.get(&label) {
                    Some(address) => writeln!(output, "{:<24} {:<5} {}", label, storage, address)?,
                    None => writeln!(output, "{:<24} {:<5} -", label, storage)?,
                }
            }
        }

        writeln!(
            output,
            "; registers {}, bits {}, ram {}, constants {}",
            self.registers, self.bits, self.ram, self.constants
        )
    }
}

/// Asigna almacenamiento a todo el programa.
pub fn allocate(
    model: &model::Program,
    program: &mut ir::Program,
    forest: &Forest,
) -> Fatal<Layout> {
    let mut layout = Layout::default();

    place_constants(model, &mut layout)?;
    let (registers, bits) = place_globals(model, forest, &mut layout)?;

    layout.order = reachable(forest);
    for label in &layout.order {
        let source = model.function(label)?;
        let function = program
            .functions
            .get_mut(label)
            .ok_or_else(|| CompileError::UndefinedFunction(label.clone()).nowhere())?;

        Scan::new(&layout, source, function).run()?;
    }

    propagate(&forest.main, &mut program.functions, registers, bits)?;
    let main_line = high_water(&forest.main, &program.functions, (registers, bits));

    let mut high = main_line;
    let mut placed = HashSet::new();
    for (level, tree) in &forest.interrupts {
        if !placed.insert(tree.name.as_str()) {
            continue;
        }

        propagate(tree, &mut program.functions, high.0, high.1)?;
        high = high_water(tree, &program.functions, high);

        trace!(vector = level, function = %tree.name, "interrupt window placed");
    }

    check_interrupts(forest, &program.functions, main_line)?;

    for label in &layout.order {
        if let Some(function) = program.functions.get_mut(label) {
            resolve(function);
            trace!(
                function = %label,
                registers = ?function.registers,
                bits = ?function.bits,
                "window assigned"
            );
        }
    }

    layout.registers = high.0;
    layout.bits = high.1;

    debug!(
        registers = layout.registers,
        bits = layout.bits,
        ram = layout.ram,
        constants = layout.constants,
        "storage allocated"
    );

    Ok(layout)
}

/// Ubica arreglos de constantes en la ROM de constantes.
fn place_constants(model: &model::Program, layout: &mut Layout) -> Fatal<()> {
    let mut used = 0;
    for (module, symbols) in &model.modules {
        for (name, symbol) in &symbols.symbols {
            if symbol.storage == Storage::Rom && symbol.is_array() {
                layout.addresses.insert(format!("{}.{}", module, name), used);
                used += symbol.count;
            }
        }
    }

    let capacity = capacity(model.config.const_bits);
    if used > capacity {
        return Err(CompileError::ConstantsOverflow { used, capacity }.nowhere());
    }

    layout.constants = used;
    Ok(())
}

/// Ubica los globales. Retorna los cursores de registros y bits.
fn place_globals(
    model: &model::Program,
    forest: &Forest,
    layout: &mut Layout,
) -> Fatal<(u32, u32)> {
    let mut modules: Vec<&str> = Vec::new();
    let discovered = forest
        .trees()
        .flat_map(CallTree::discovery)
        .map(model::module_of)
        .chain(model.modules.keys().map(String::as_str));

    for module in discovered {
        if !modules.contains(&module) {
            modules.push(module);
        }
    }

    let mut ram = 0;
    let mut registers = SCRATCH_REGISTERS;
    let mut bits = SCRATCH_BITS;

    for module in modules {
        let symbols = match model.modules.get(module) {
            Some(found) => &found.symbols,
            None => continue,
        };

        for (name, symbol) in symbols {
            let label = format!("{}.{}", module, name);
            if symbol.ty == Type::Bool && symbol.is_array() {
                return Err(CompileError::BoolArray(label).nowhere());
            }

            let address = match (symbol.storage, symbol.offset) {
                (Storage::Rom, _) => continue,
                (Storage::Bit, Some(fixed)) | (Storage::Port, Some(fixed)) => fixed,
                (Storage::Port, None) => return Err(CompileError::UnsupportedStorage(label).nowhere()),

                (Storage::Ram, _) => {
                    ram += symbol.count;
                    ram - symbol.count
                }

                (Storage::Register, _) => {
                    registers += symbol.count;
                    registers - symbol.count
                }

                (Storage::Bit, None) => {
                    bits += 1;
                    bits - 1
                }
            };

            layout.addresses.insert(label, address);
        }
    }

    let capacity = capacity(model.config.ram_bits);
    if ram > capacity {
        return Err(CompileError::RamOverflow {
            used: ram,
            capacity,
        }
        .nowhere());
    }

    layout.ram = ram;
    Ok((registers, bits))
}

fn capacity(bits: u32) -> u32 {
    1u32.checked_shl(bits).unwrap_or(u32::MAX)
}

/// Funciones alcanzables: primero el árbol principal, luego manejadores.
fn reachable(forest: &Forest) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for label in forest.trees().flat_map(CallTree::discovery) {
        if !order.iter().any(|known| known == label) {
            order.push(label.to_owned());
        }
    }

    order
}

/// Propaga bases en profundidad. Los cursores viajan por valor, por lo
/// que se restauran solos al volver de cada subárbol.
fn propagate(
    tree: &CallTree,
    functions: &mut BTreeMap<String, Function>,
    registers: u32,
    bits: u32,
) -> Fatal<()> {
    let function = functions
        .get_mut(&tree.name)
        .ok_or_else(|| CompileError::UndefinedFunction(tree.name.clone()).nowhere())?;

    function.registers.base = function.registers.base.max(registers);
    function.bits.base = function.bits.base.max(bits);

    let registers = registers + function.registers.count;
    let bits = bits + function.bits.count;

    for call in &tree.calls {
        propagate(call, functions, registers, bits)?;
    }

    Ok(())
}

/// Primera ranura libre de cada archivo tras todo un árbol.
fn high_water(
    tree: &CallTree,
    functions: &BTreeMap<String, Function>,
    (registers, bits): (u32, u32),
) -> (u32, u32) {
    tree.discovery()
        .into_iter()
        .filter_map(|label| functions.get(label))
        .fold((registers, bits), |(registers, bits), function| {
            (
                registers.max(function.registers.end()),
                bits.max(function.bits.end()),
            )
        })
}

/// Una interrupción puede llegar en cualquier punto de la línea
/// principal, así que ninguna ventana de sus árboles puede tocar las
/// ranuras de esta, los globales o las ranuras reservadas.
fn check_interrupts(
    forest: &Forest,
    functions: &BTreeMap<String, Function>,
    (registers, bits): (u32, u32),
) -> Fatal<()> {
    let main_registers = Window {
        base: 0,
        count: registers,
    };

    let main_bits = Window { base: 0, count: bits };

    for (_, tree) in &forest.interrupts {
        for label in tree.discovery() {
            let function = match functions.get(label) {
                Some(function) => function,
                None => continue,
            };

            if function.registers.overlaps(&main_registers) || function.bits.overlaps(&main_bits) {
                return Err(CompileError::Internal {
                    function: label.to_owned(),
                    index: 0,
                    reason: String::from("interrupt window overlaps the main line"),
                }
                .nowhere());
            }
        }
    }

    Ok(())
}

/// `absoluta = base + cantidad - relativa - 1`
fn resolve(function: &mut Function) {
    let (registers, bits) = (function.registers, function.bits);
    let absolute = |offset: Offset| match offset {
        Offset::Relative(Slot { file, index }) => {
            let Window { base, count } = match file {
                File::Register => registers,
                File::Bit => bits,
            };

            Offset::Absolute(base + count - index - 1)
        }

        offset => offset,
    };

    for op in &mut function.body {
        op.offset = absolute(op.offset);
    }

    for offset in function.locals.values_mut() {
        *offset = absolute(*offset);
    }
}

/// Asignación de temporales dentro de una función.
struct Scan<'a> {
    layout: &'a Layout,
    source: &'a model::Function,
    function: &'a mut Function,
    registers: SlotPool,
    bits: SlotPool,
}

impl<'a> Scan<'a> {
    fn new(layout: &'a Layout, source: &'a model::Function, function: &'a mut Function) -> Self {
        Scan {
            layout,
            source,
            function,
            registers: SlotPool::registers(),
            bits: SlotPool::bits(),
        }
    }

    fn run(mut self) -> Fatal<()> {
        self.locals()?;

        let passthrough = self.port_passthrough()?;
        let materialized = self.materialized();

        for index in 0..self.function.body.len() {
            let op = &self.function.body[index];
            let until = op.last_use.unwrap_or(index);
            let instruction = op.instruction.clone();

            let offset = match &instruction {
                Instruction::Jump(target) | Instruction::Branch { target, .. }
                    if target.index.is_none() =>
                {
                    let reason = format!("unresolved jump to `{}`", target.marker);
                    return Err(self.internal(index, reason));
                }

                Instruction::Assign { target, .. } => {
                    match &self.function.body[target.0].instruction {
                        Instruction::Register(_)
                        | Instruction::Bit(_)
                        | Instruction::PortOut(_)
                        | Instruction::Address { .. } => None,

                        _ => return Err(self.internal(index, String::from("invalid assignment target"))),
                    }
                }

                Instruction::Register(var) | Instruction::Bit(var) => Some(self.var(var, index)?),

                Instruction::Ram(var) | Instruction::Rom(var) | Instruction::PortOut(var) => {
                    Some(Offset::Absolute(self.global(var, index)?))
                }

                Instruction::PortIn(_) if passthrough.contains(&index) => None,
                Instruction::PortIn(var) => {
                    self.global(var, index)?;
                    Some(self.claim(Width::Word, index, until))
                }

                Instruction::Int(_) if materialized.contains(&index) => {
                    Some(self.claim(Width::Word, index, until))
                }

                Instruction::Bool(_) if materialized.contains(&index) => {
                    Some(self.claim(Width::Bit, index, until))
                }

                Instruction::Compare { .. } => self.compare(index, until)?,

                Instruction::Math { width, .. } => Some(self.claim(*width, index, until)),

                Instruction::Element { .. } | Instruction::Address { .. } => {
                    Some(self.claim(Width::Word, index, until))
                }

                Instruction::Call {
                    result: Some(width),
                    ..
                } => Some(self.claim(*width, index, until)),

                _ => None,
            };

            if let Some(offset) = offset {
                self.function.body[index].offset = offset;
            }
        }

        self.function.registers.count = self.registers.count();
        self.function.bits.count = self.bits.count();

        trace!(
            function = %self.function.label,
            registers = self.function.registers.count,
            bits = self.function.bits.count,
            "temporaries allocated"
        );

        Ok(())
    }

    /// Cada local escalar recibe su propia ranura fija.
    fn locals(&mut self) -> Fatal<()> {
        let source = self.source;
        for (name, symbol) in &source.symbols {
            let file = match (symbol.storage, symbol.count) {
                (Storage::Register, 1) => File::Register,
                (Storage::Bit, 1) => File::Bit,
                (Storage::Rom, 1) => continue,
                _ => return Err(CompileError::UnsupportedStorage(name.clone()).nowhere()),
            };

            let offset = self.pin(file);
            self.function.locals.insert(name.clone(), offset);
        }

        if let Some(returns) = source.returns {
            let file = match returns {
                Type::Bool => File::Bit,
                _ => File::Register,
            };

            let offset = self.pin(file);
            self.function.locals.insert(String::from("return"), offset);
        }

        Ok(())
    }

    /// `v = puerto` lee el puerto directamente hacia `v`.
    fn port_passthrough(&mut self) -> Fatal<HashSet<usize>> {
        let mut passthrough = HashSet::new();

        for index in 0..self.function.body.len() {
            let (target, value) = match self.function.body[index].instruction {
                Instruction::Assign {
                    op: None,
                    width: Width::Word,
                    target: Ref(target),
                    value: Ref(value),
                } => (target, value),

                _ => continue,
            };

            let var = match (
                &self.function.body[target].instruction,
                &self.function.body[value].instruction,
            ) {
                (Instruction::Register(var), Instruction::PortIn(_)) => var.clone(),
                _ => continue,
            };

            let offset = self.var(&var, target)?;
            let body = &mut self.function.body;

            body[value].offset = offset;
            body[target].instruction = Instruction::Removed;
            body[index].instruction = Instruction::Removed;

            passthrough.insert(value);
        }

        Ok(passthrough)
    }

    /// Literales que deben residir en una ranura.
    fn materialized(&self) -> HashSet<usize> {
        let body = &self.function.body;
        let is_int = |Ref(index): Ref| matches!(body[index].instruction, Instruction::Int(_));
        let is_bool = |Ref(index): Ref| matches!(body[index].instruction, Instruction::Bool(_));

        let mut materialized = HashSet::new();
        for op in body {
            let literals: Vec<Ref> = match op.instruction {
                Instruction::Compare {
                    width: Width::Word,
                    lhs,
                    ..
                } => [lhs].into_iter().filter(|&lhs| is_int(lhs)).collect(),

                Instruction::Compare {
                    width: Width::Bit, ..
                }
                | Instruction::Math {
                    width: Width::Bit, ..
                }
                | Instruction::Branch { .. } => op.instruction.operands().filter(|&r| is_bool(r)).collect(),

                Instruction::Assign {
                    op: Some(_),
                    width: Width::Bit,
                    value,
                    ..
                } => [value].into_iter().filter(|&value| is_bool(value)).collect(),

                _ => continue,
            };

            materialized.extend(literals.into_iter().map(|Ref(index)| index));
        }

        materialized
    }

    /// Una comparación que alimenta un salto se fusiona con él y no
    /// necesita ranura. Si alimenta una copia a una variable booleana,
    /// escribe directamente en ella.
    fn compare(&mut self, index: usize, until: usize) -> Fatal<Option<Offset>> {
        let body = &self.function.body;
        let destination = match body.get(until).map(|op| &op.instruction) {
            Some(Instruction::Branch { .. }) if until != index => return Ok(None),

            Some(Instruction::Assign {
                op: None,
                width: Width::Bit,
                target,
                value,
            }) if *value == Ref(index) => match &body[target.0].instruction {
                Instruction::Bit(var) => Some(var.clone()),
                _ => None,
            },

            _ => None,
        };

        match destination {
            Some(var) => Ok(Some(self.var(&var, index)?)),
            None => Ok(Some(self.claim(Width::Bit, index, until))),
        }
    }

    fn pin(&mut self, file: File) -> Offset {
        let index = match file {
            File::Register => self.registers.pin(),
            File::Bit => self.bits.pin(),
        };

        Offset::Relative(Slot { file, index })
    }

    fn claim(&mut self, width: Width, at: usize, until: usize) -> Offset {
        let file = File::from(width);
        let index = match file {
            File::Register => self.registers.claim(at, until),
            File::Bit => self.bits.claim(at, until),
        };

        Offset::Relative(Slot { file, index })
    }

    fn var(&self, var: &Var, index: usize) -> Fatal<Offset> {
        match var {
            Var::Local(name) => self
                .function
                .locals
                .get(name)
                .copied()
                .ok_or_else(|| self.internal(index, format!("no storage for local `{}`", name))),

            Var::Global(_) => Ok(Offset::Absolute(self.global(var, index)?)),
        }
    }

    fn global(&self, var: &Var, index: usize) -> Fatal<u32> {
        let label = match var {
            Var::Global(label) => label,
            Var::Local(name) => {
                return Err(self.internal(index, format!("`{}` is not a global", name)))
            }
        };

        self.layout
            .addresses
            .get(label)
            .copied()
            .ok_or_else(|| self.internal(index, format!("no address for `{}`", label)))
    }

    fn internal(&self, index: usize, reason: String) -> Located<CompileError> {
        let at = self.function.body.get(index).and_then(|op| op.at.clone());
        CompileError::Internal {
            function: self.function.label.clone(),
            index,
            reason,
        }
        .at(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lower::lower,
        model::{CompareOp, Expr, MathOp, Module, Program, Stmt, Symbol},
        opt::optimize,
    };

    fn build(model: &Program) -> Fatal<(ir::Program, Layout)> {
        let mut program = lower(model)?;
        optimize(&mut program)?;

        let forest = Forest::build(model, &program)?;
        let layout = allocate(model, &mut program, &forest)?;

        Ok((program, layout))
    }

    fn single(module: Module) -> Program {
        Program::new("demo").module("demo", module)
    }

    #[test]
    fn globals_start_past_scratch_slots() {
        let module = Module::default()
            .symbol("a", Symbol::int())
            .symbol("b", Symbol::int())
            .symbol("buffer", Symbol::ram(8))
            .symbol("flag", Symbol::bool())
            .symbol("led", Symbol::bit_at(40))
            .symbol("more", Symbol::ram(2))
            .function(model::Function::new("demo.main"));

        let (_, layout) = build(&single(module)).unwrap();

        assert_eq!(layout.addresses["demo.a"], 2);
        assert_eq!(layout.addresses["demo.b"], 3);
        assert_eq!(layout.addresses["demo.flag"], 1);
        assert_eq!(layout.addresses["demo.led"], 40);
        assert_eq!(layout.addresses["demo.buffer"], 0);
        assert_eq!(layout.addresses["demo.more"], 8);
        assert_eq!(layout.ram, 10);
    }

    #[test]
    fn discovered_modules_are_placed_first() {
        let main = model::Function::new("demo.main")
            .body(vec![Stmt::call("zio.f", vec![])]);

        let program = Program::new("demo")
            .module("demo", Module::default().symbol("x", Symbol::int()).function(main))
            .module("aux", Module::default().symbol("y", Symbol::int()))
            .module(
                "zio",
                Module::default()
                    .symbol("z", Symbol::int())
                    .function(model::Function::new("zio.f")),
            );

        let (_, layout) = build(&program).unwrap();

        assert_eq!(layout.addresses["demo.x"], 2);
        assert_eq!(layout.addresses["zio.z"], 3);
        assert_eq!(layout.addresses["aux.y"], 4);
        assert_eq!(layout.order, vec!["demo.main", "zio.f"]);
    }

    #[test]
    fn bool_arrays_are_rejected() {
        let mut flags = Symbol::bool();
        flags.count = 4;

        let module = Module::default()
            .symbol("flags", flags)
            .function(model::Function::new("demo.main"));

        let error = build(&single(module)).unwrap_err();
        assert_eq!(
            error.into_inner(),
            CompileError::BoolArray(String::from("demo.flags"))
        );
    }

    #[test]
    fn constants_must_fit() {
        let module = Module::default()
            .symbol("table", Symbol::rom(Type::Rom, vec![1, 2, 3, 4, 5]))
            .function(model::Function::new("demo.main"));

        let mut program = single(module);
        program.config.const_bits = 2;

        let error = build(&program).unwrap_err();
        assert_eq!(
            error.into_inner(),
            CompileError::ConstantsOverflow {
                used: 5,
                capacity: 4
            }
        );

        program.config.const_bits = 3;
        let (_, layout) = build(&program).unwrap();
        assert_eq!(layout.addresses["demo.table"], 0);
        assert_eq!(layout.constants, 5);
    }

    #[test]
    fn locals_ascend_within_their_window() {
        let f = model::Function::new("demo.f")
            .parameter("p", Type::Int)
            .parameter("q", Type::Int)
            .returns(Type::Int)
            .body(vec![Stmt::Return(Some(Expr::var("q")))]);

        let main = model::Function::new("demo.main").body(vec![Stmt::call(
            "demo.f",
            vec![Expr::Int(1), Expr::Int(2)],
        )]);

        let (program, _) = build(&single(Module::default().function(f).function(main))).unwrap();
        let f = &program.functions["demo.f"];

        assert_eq!(f.registers, Window { base: 2, count: 3 });
        assert_eq!(f.locals["p"], Offset::Absolute(4));
        assert_eq!(f.locals["q"], Offset::Absolute(3));
        assert_eq!(f.locals["return"], Offset::Absolute(2));
    }

    #[test]
    fn siblings_share_windows_and_ancestors_do_not() {
        let leaf = |label: &str| {
            model::Function::new(label)
                .local("u", Symbol::int())
                .local("v", Symbol::int())
        };

        let main = model::Function::new("demo.main")
            .local("k", Symbol::int())
            .body(vec![Stmt::call("demo.a", vec![]), Stmt::call("demo.b", vec![])]);

        let module = Module::default()
            .symbol("g", Symbol::int())
            .function(main)
            .function(leaf("demo.a"))
            .function(leaf("demo.b"));

        let (program, layout) = build(&single(module)).unwrap();
        let (main, a, b) = (
            &program.functions["demo.main"],
            &program.functions["demo.a"],
            &program.functions["demo.b"],
        );

        assert_eq!(main.registers, Window { base: 3, count: 1 });
        assert_eq!(a.registers, Window { base: 4, count: 2 });
        assert_eq!(a.registers, b.registers);
        assert_eq!(layout.registers, 6);
    }

    #[test]
    fn interrupt_windows_follow_the_main_line() {
        let main = model::Function::new("demo.main").local("k", Symbol::int());
        let tick = model::Function::new("demo.tick")
            .isr()
            .local("t", Symbol::int())
            .local("s", Symbol::bool());

        let tock = model::Function::new("demo.tock").isr().local("t", Symbol::int());

        let mut program = single(
            Module::default()
                .function(main)
                .function(tick)
                .function(tock),
        );

        program.vectors.install(5, "demo.tock").unwrap();
        program.vectors.install(2, "demo.tick").unwrap();

        let (program, layout) = build(&program).unwrap();
        let (tick, tock) = (
            &program.functions["demo.tick"],
            &program.functions["demo.tock"],
        );

        assert_eq!(tick.registers, Window { base: 3, count: 1 });
        assert_eq!(tick.bits, Window { base: 1, count: 1 });
        assert_eq!(tock.registers, Window { base: 4, count: 1 });
        assert_eq!(layout.order, vec!["demo.main", "demo.tick", "demo.tock"]);
    }

    #[test]
    fn fused_comparisons_take_no_slot() {
        let main = model::Function::new("demo.main").body(vec![
            Stmt::if_else(
                Expr::compare(CompareOp::Lt, Expr::var("a"), Expr::Int(4)),
                Stmt::Halt,
                None,
            ),
            Stmt::assign(
                Expr::var("flag"),
                Expr::compare(CompareOp::Eq, Expr::var("a"), Expr::var("a")),
            ),
        ]);

        let module = Module::default()
            .symbol("a", Symbol::int())
            .symbol("flag", Symbol::bool())
            .function(main);

        let (program, _) = build(&single(module)).unwrap();
        let main = &program.functions["demo.main"];

        let compares: Vec<_> = main
            .body
            .iter()
            .filter(|op| matches!(op.instruction, Instruction::Compare { .. }))
            .map(|op| op.offset)
            .collect();

        assert_eq!(compares, vec![Offset::Unresolved, Offset::Absolute(1)]);
        assert_eq!(main.bits.count, 0);
    }

    #[test]
    fn port_reads_go_straight_into_variables() {
        let main = model::Function::new("demo.main")
            .local("v", Symbol::int())
            .body(vec![Stmt::assign(Expr::var("v"), Expr::var("keys"))]);

        let module = Module::default()
            .symbol("keys", Symbol::port(7))
            .function(main);

        let (program, _) = build(&single(module)).unwrap();
        let main = &program.functions["demo.main"];

        let live: Vec<_> = main
            .body
            .iter()
            .filter(|op| !op.instruction.is_removed())
            .collect();

        assert_eq!(live.len(), 3);
        assert!(matches!(live[1].instruction, Instruction::PortIn(_)));
        assert_eq!(live[1].offset, main.locals["v"]);
        assert_eq!(main.registers.count, 1);
    }

    #[test]
    fn temporaries_are_reused_after_their_last_use() {
        let main = model::Function::new("demo.main").body(vec![
            Stmt::assign(
                Expr::var("x"),
                Expr::binary(MathOp::Add, Expr::var("x"), Expr::Int(1)),
            ),
            Stmt::assign(
                Expr::var("x"),
                Expr::binary(MathOp::Mul, Expr::var("x"), Expr::Int(3)),
            ),
        ]);

        let module = Module::default().symbol("x", Symbol::int()).function(main);
        let (program, _) = build(&single(module)).unwrap();

        assert_eq!(program.functions["demo.main"].registers.count, 1);
    }

    #[test]
    fn array_locals_are_unsupported() {
        let main = model::Function::new("demo.main").local("buffer", Symbol::ram(4));
        let error = build(&single(Module::default().function(main))).unwrap_err();

        assert_eq!(
            error.into_inner(),
            CompileError::UnsupportedStorage(String::from("buffer"))
        );
    }
}
