//! Bytecode disassembler
//!
//! Renders instruction streams for the `--dis` flag and for compiler tests.
//! Constant operands show a short preview of the referenced value; compiled
//! functions in the pool are listed with their own bodies.

use super::{read_u16, Bytecode, Opcode};
use crate::value::Value;
use std::fmt::Write;

/// Disassemble a whole module: the top-level stream followed by every
/// function constant's body.
pub fn disassemble(bytecode: &Bytecode) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", bytecode.origin.display());
    out.push_str(&disassemble_stream(
        &bytecode.instructions,
        &bytecode.constants,
    ));
    for (index, constant) in bytecode.constants.iter().enumerate() {
        if let Value::CompiledFunction(func) = constant {
            let name = func.name.as_deref().unwrap_or("<anonymous>");
            let _ = writeln!(
                out,
                "\n== fn {name} (constant {index}, {} locals, {} params) ==",
                func.num_locals, func.num_params
            );
            out.push_str(&disassemble_stream(&func.instructions, &bytecode.constants));
        }
    }
    out
}

/// Disassemble one instruction stream.
pub fn disassemble_stream(instructions: &[u8], constants: &[Value]) -> String {
    let mut out = String::new();
    let mut pos = 0;
    while pos < instructions.len() {
        let offset = pos;
        let Ok(op) = Opcode::try_from(instructions[pos]) else {
            let _ = writeln!(out, "{offset:04} <unknown 0x{:02X}>", instructions[pos]);
            pos += 1;
            continue;
        };
        pos += 1;

        let mut operands = Vec::new();
        for width in op.operand_widths() {
            match width {
                2 => {
                    operands.push(read_u16(instructions, pos) as usize);
                    pos += 2;
                }
                1 => {
                    operands.push(instructions[pos] as usize);
                    pos += 1;
                }
                _ => unreachable!("unsupported operand width"),
            }
        }

        let _ = write!(out, "{offset:04} {}", op.name());
        for operand in &operands {
            let _ = write!(out, " {operand}");
        }
        if op == Opcode::Constant || op == Opcode::Closure || op == Opcode::Import {
            if let Some(value) = constants.get(operands[0]) {
                let _ = write!(out, " ({})", preview(value));
            }
        }
        out.push('\n');
    }
    out
}

fn preview(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("{:?}", s.as_ref()),
        other => other.to_string(),
    }
}
