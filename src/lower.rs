//! Generación de código intermedio.
//!
//! Cada árbol de sentencias del modelo se aplana en la lista de
//! instrucciones de su función. Las construcciones de control se
//! expresan con marcadores únicos por función (`etiqueta.N`) y una
//! pila de ciclos que conoce el marcador superior e inferior del ciclo
//! más interno, con lo cual se resuelven `break` y `continue`.

use tracing::{debug, trace};

use crate::{
    error::{CompileError, Fatal},
    ir::{self, Instruction, Op, Ref, Space, Target, Var, Width},
    model::{Expr, Function, MathOp, Program, Scope, Stmt, Storage, Symbol, Type},
    source::{Located, Position},
};

/// Genera IR para todas las funciones del programa.
pub fn lower(program: &Program) -> Fatal<ir::Program> {
    let mut output = ir::Program::default();

    for module in program.modules.values() {
        for function in module.functions.values() {
            let lowered = Lowering::new(program, function).run()?;
            trace!(function = %lowered.label, ops = lowered.body.len(), "lowered");

            output.functions.insert(function.label.clone(), lowered);
        }
    }

    debug!(functions = output.functions.len(), "IR generated");
    Ok(output)
}

struct Lowering<'a> {
    program: &'a Program,
    function: &'a Function,
    body: Vec<Op>,
    markers: u32,

    /// Marcadores superior e inferior de cada ciclo abierto.
    loops: Vec<(String, String)>,
    at: Option<Position>,
}

enum LoopControl {
    Break,
    Continue,
}

impl<'a> Lowering<'a> {
    fn new(program: &'a Program, function: &'a Function) -> Self {
        Lowering {
            program,
            function,
            body: Vec::new(),
            markers: 0,
            loops: Vec::new(),
            at: None,
        }
    }

    fn run(mut self) -> Fatal<ir::Function> {
        let function = self.function;
        let label = &function.label;
        self.push(Instruction::Marker(label.clone()));

        for stmt in &function.body {
            self.stmt(stmt)?;
        }

        let returns = self
            .body
            .iter()
            .rev()
            .find(|op| !op.instruction.is_removed())
            .map_or(false, |op| matches!(op.instruction, Instruction::Return(_)));

        if !returns {
            self.push(Instruction::Return(None));
        }

        let mut lowered = ir::Function::new(label.clone(), function.isr, function.returns);
        lowered.body = self.body;
        lowered.liveness();

        Ok(lowered)
    }

    fn push(&mut self, instruction: Instruction) -> Ref {
        self.body.push(Op::new(instruction, self.at.clone()));
        Ref(self.body.len() - 1)
    }

    fn marker(&mut self) -> String {
        self.markers += 1;
        format!("{}.{}", self.function.label, self.markers)
    }

    fn fail(&self, error: CompileError) -> Located<CompileError> {
        error.at(self.at.clone())
    }

    /// Agrega la posición actual a un error que no la tiene.
    fn locate(&self, error: Located<CompileError>) -> Located<CompileError> {
        match error.position() {
            Some(_) => error,
            None => self.fail(error.into_inner()),
        }
    }

    fn stmt(&mut self, stmt: &'a Located<Stmt>) -> Fatal<()> {
        let outer = self.at.clone();
        if let Some(at) = stmt.position() {
            self.at = Some(at.clone());
        }

        self.lower_stmt(stmt.val())?;
        self.at = outer;

        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &'a Stmt) -> Fatal<()> {
        match stmt {
            Stmt::Block(stmts) => {
                for stmt in stmts {
                    self.stmt(stmt)?;
                }
            }

            Stmt::If {
                condition,
                then,
                otherwise,
            } => self.branch(condition, then, otherwise.as_deref())?,

            Stmt::Loop(body) => {
                let top = self.marker();
                let bottom = self.marker();

                self.push(Instruction::Marker(top.clone()));
                self.loops.push((top.clone(), bottom.clone()));

                self.stmt(body)?;

                self.loops.pop();
                self.push(Instruction::Jump(Target::new(top)));
                self.push(Instruction::Marker(bottom));
            }

            Stmt::Break => {
                let target = self.loop_target(LoopControl::Break)?;
                self.push(Instruction::Jump(target));
            }

            Stmt::Continue => {
                let target = self.loop_target(LoopControl::Continue)?;
                self.push(Instruction::Jump(target));
            }

            Stmt::Assign { target, op, value } => {
                let (value, _) = self.expr(value)?;
                let (target, width) = self.place(target)?;

                self.push(Instruction::Assign {
                    op: *op,
                    width,
                    target,
                    value,
                });
            }

            Stmt::Call {
                function,
                arguments,
            } => {
                self.call(function, arguments, false)?;
            }

            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => Some(self.expr(value)?.0),
                    None => None,
                };

                self.push(Instruction::Return(value));
            }

            Stmt::Timer(value) => {
                let (value, _) = self.expr(value)?;
                self.push(Instruction::Timer(value));
            }

            Stmt::Level(level) => {
                self.push(Instruction::Level(*level));
            }

            Stmt::Halt => {
                self.push(Instruction::Halt);
            }

            Stmt::Pause => {
                self.push(Instruction::Pause);
            }

            Stmt::Reset => {
                self.push(Instruction::Reset);
            }

            Stmt::Restart => {
                self.push(Instruction::Restart);
            }

            Stmt::Nop => {
                self.push(Instruction::Nop);
            }
        }

        Ok(())
    }

    fn branch(
        &mut self,
        condition: &'a Expr,
        then: &'a Located<Stmt>,
        otherwise: Option<&'a Located<Stmt>>,
    ) -> Fatal<()> {
        // `if !c` se ramifica sobre `c` con la polaridad invertida
        let (condition, negated) = match condition {
            Expr::Unary {
                op: MathOp::LogicalNot,
                operand,
            } => (&**operand, true),

            condition => (condition, false),
        };

        let (condition, _) = self.expr(condition)?;

        if let Some(control) = loop_control(then.val()) {
            let target = self.loop_target(control)?;
            self.push(Instruction::Branch {
                when: !negated,
                condition,
                target,
            });

            if let Some(otherwise) = otherwise {
                self.stmt(otherwise)?;
            }

            return Ok(());
        }

        let skip = self.marker();
        self.push(Instruction::Branch {
            when: negated,
            condition,
            target: Target::new(skip.clone()),
        });

        self.stmt(then)?;

        match otherwise {
            None => {
                self.push(Instruction::Marker(skip));
            }

            Some(otherwise) => {
                let exit = self.marker();
                self.push(Instruction::Jump(Target::new(exit.clone())));
                self.push(Instruction::Marker(skip));
                self.stmt(otherwise)?;
                self.push(Instruction::Marker(exit));
            }
        }

        Ok(())
    }

    fn loop_target(&self, control: LoopControl) -> Fatal<Target> {
        let (top, bottom) = self
            .loops
            .last()
            .ok_or_else(|| self.fail(CompileError::LoopControl))?;

        Ok(match control {
            LoopControl::Break => Target::new(bottom.clone()),
            LoopControl::Continue => Target::new(top.clone()),
        })
    }

    fn symbol(&self, label: &'a str) -> Fatal<(Var, &'a Symbol)> {
        let (scope, symbol) = self
            .program
            .symbol(self.function, label)
            .map_err(|error| self.locate(error))?;

        let var = match scope {
            Scope::Local(name) => Var::Local(name.to_owned()),
            Scope::Global(module, name) => Var::Global(format!("{}.{}", module, name)),
        };

        Ok((var, symbol))
    }

    fn expr(&mut self, expr: &'a Expr) -> Fatal<(Ref, Width)> {
        let lowered = match expr {
            Expr::Int(value) => (self.push(Instruction::Int(*value)), Width::Word),
            Expr::Bool(value) => (self.push(Instruction::Bool(*value)), Width::Bit),

            Expr::Var(label) => {
                let (var, symbol) = self.symbol(label)?;
                let instruction = match symbol.storage {
                    Storage::Register => Instruction::Register(var),
                    Storage::Bit => Instruction::Bit(var),
                    Storage::Ram => Instruction::Ram(var),
                    Storage::Port => Instruction::PortIn(var),
                    Storage::Rom if symbol.is_array() => Instruction::Rom(var),

                    // Las constantes escalares se leen como literales
                    Storage::Rom => {
                        let value = symbol.values.first().copied().unwrap_or(0);
                        match symbol.ty {
                            Type::Bool => Instruction::Bool(value != 0),
                            _ => Instruction::Int(value),
                        }
                    }
                };

                let width = match instruction {
                    Instruction::Bit(_) | Instruction::Bool(_) => Width::Bit,
                    _ => Width::Word,
                };

                (self.push(instruction), width)
            }

            Expr::Index { array, index } => {
                let (var, symbol) = self.symbol(array)?;
                let (array, space) = match (symbol.storage, symbol.ty) {
                    (Storage::Ram, _) => (Instruction::Ram(var), Space::Ram),
                    (Storage::Rom, _) => (Instruction::Rom(var), Space::Rom),
                    (Storage::Register, Type::Ram) => (Instruction::Register(var), Space::Ram),
                    (Storage::Register, Type::Rom) => (Instruction::Register(var), Space::Rom),
                    _ => return Err(self.fail(CompileError::UnsupportedStorage(array.clone()))),
                };

                let array = self.push(array);
                let (index, _) = self.expr(index)?;

                let element = Instruction::Element {
                    space,
                    array,
                    index,
                };

                (self.push(element), Width::Word)
            }

            Expr::Unary { op, operand } => {
                let (operand, _) = self.expr(operand)?;
                let width = if op.is_logical() {
                    Width::Bit
                } else {
                    Width::Word
                };

                let math = Instruction::Math {
                    op: *op,
                    width,
                    lhs: operand,
                    rhs: None,
                };

                (self.push(math), width)
            }

            Expr::Binary { op, lhs, rhs } => {
                let (lhs, _) = self.expr(lhs)?;
                let (rhs, _) = self.expr(rhs)?;
                let width = if op.is_logical() {
                    Width::Bit
                } else {
                    Width::Word
                };

                let math = Instruction::Math {
                    op: *op,
                    width,
                    lhs,
                    rhs: Some(rhs),
                };

                (self.push(math), width)
            }

            Expr::Compare { op, lhs, rhs } => {
                let (lhs, width) = self.expr(lhs)?;
                let (rhs, _) = self.expr(rhs)?;

                let compare = Instruction::Compare {
                    op: *op,
                    width,
                    lhs,
                    rhs,
                };

                (self.push(compare), Width::Bit)
            }

            Expr::Call {
                function,
                arguments,
            } => self.call(function, arguments, true)?,
        };

        Ok(lowered)
    }

    /// Genera un destino de asignación.
    fn place(&mut self, target: &'a Expr) -> Fatal<(Ref, Width)> {
        match target {
            Expr::Var(label) => {
                let (var, symbol) = self.symbol(label)?;
                let (instruction, width) = match symbol.storage {
                    Storage::Register => (Instruction::Register(var), Width::Word),
                    Storage::Bit => (Instruction::Bit(var), Width::Bit),
                    Storage::Port => (Instruction::PortOut(var), Width::Word),
                    _ => return Err(self.fail(CompileError::NotAssignable(label.clone()))),
                };

                Ok((self.push(instruction), width))
            }

            Expr::Index { array: label, index } => {
                let (var, symbol) = self.symbol(label)?;
                let array = match (symbol.storage, symbol.ty) {
                    (Storage::Ram, _) => Instruction::Ram(var),
                    (Storage::Register, Type::Ram) => Instruction::Register(var),
                    _ => return Err(self.fail(CompileError::NotAssignable(label.clone()))),
                };

                let array = self.push(array);
                let (index, _) = self.expr(index)?;

                Ok((self.push(Instruction::Address { array, index }), Width::Word))
            }

            _ => Err(self.fail(CompileError::NotAssignable(String::from("expression")))),
        }
    }

    fn call(&mut self, label: &str, arguments: &'a [Expr], used: bool) -> Fatal<(Ref, Width)> {
        let label = if label.contains('.') {
            label.to_owned()
        } else {
            format!("{}.{}", self.function.module(), label)
        };

        let callee = self
            .program
            .function(&label)
            .map_err(|error| self.locate(error))?;

        if arguments.len() != callee.parameters.len() {
            return Err(self.fail(CompileError::ArgumentCount {
                function: label,
                expected: callee.parameters.len(),
                found: arguments.len(),
            }));
        }

        // Todo argumento se evalúa antes de escribir cualquier parámetro
        let values = arguments
            .iter()
            .map(|argument| self.expr(argument).map(|(value, _)| value))
            .collect::<Fatal<Vec<_>>>()?;

        for (parameter, value) in callee.parameters.iter().zip(values) {
            self.push(Instruction::Parameter {
                function: label.clone(),
                name: parameter.name.clone(),
                value,
            });
        }

        let width = match callee.returns {
            Some(Type::Bool) => Some(Width::Bit),
            Some(_) => Some(Width::Word),
            None => None,
        };

        let result = match (used, width) {
            (false, _) => None,
            (true, Some(width)) => Some(width),
            (true, None) => {
                return Err(self.fail(CompileError::Internal {
                    function: self.function.label.clone(),
                    index: self.body.len(),
                    reason: format!("`{}` returns no value", label),
                }))
            }
        };

        let call = self.push(Instruction::Call {
            function: label,
            result,
        });

        Ok((call, result.unwrap_or(Width::Word)))
    }
}

/// Reconoce `if c break` y `if c continue`.
fn loop_control(stmt: &Stmt) -> Option<LoopControl> {
    match stmt {
        Stmt::Break => Some(LoopControl::Break),
        Stmt::Continue => Some(LoopControl::Continue),
        Stmt::Block(stmts) if stmts.len() == 1 => loop_control(stmts[0].val()),
        _ => None,
    }
}
