/// Escribe una línea de ensamblador: opcode y operandos opcionales.
macro_rules! emit {
    ($self:expr, $opcode:expr) => {
        writeln!($self.output, "    {}", $opcode)
    };

    ($self:expr, $opcode:expr, $($format:tt)*) => {{
        write!($self.output, "    {:<6}  ", $opcode)?;
        writeln!($self.output, $($format)*)
    }};
}
