//! Assembly emitter: type-checked AST to textual Spyre assembly.
//!
//! Two passes. Pass one walks each top-level function assigning a stack
//! slot to every argument and block-scoped local (in declaration order) and
//! computes the function's frame size. Pass two emits the program:
//!
//! ```text
//! JMP __ENTRY__
//! <db strings for user types and cfuncs>
//! <one label + body per function>
//! __ENTRY__:
//! CALL main 0
//! HALT
//! ```
//!
//! Struct-typed arguments and locals are registered as GC roots with `TAGL`
//! right after the prologue and released with a single `UNTAGLS` in the
//! epilogue; reserved slots are zero-filled by `RESL`, so an untagged slot
//! always reads as the null segment.

use crate::ast::{ExprId, ExprKind, LeafSide, Module, NodeId, NodeKind};
use crate::types::{Datatype, Declaration};
use spyre_core::lexer::op;
use std::fmt::Write as _;

/// Emit assembly for a type-checked module.
pub fn generate(module: &mut Module) -> Result<String, String> {
    assign_local_indices(module);
    let mut emitter = CodeGen {
        module,
        out: String::new(),
        label_count: 0,
        ret_label: 0,
        loop_tops: Vec::new(),
    };
    emitter.generate_program()
}

// ===== pass one: local slot assignment =====

fn assign_local_indices(module: &mut Module) {
    for child in module.top_level() {
        if matches!(module.node(child).kind, NodeKind::Function { .. }) {
            assign_function(module, child);
        }
    }
}

fn assign_function(module: &mut Module, func: NodeId) {
    let mut slot = 0usize;
    let body = if let NodeKind::Function { args, body, .. } = &mut module.node_mut(func).kind {
        for arg in args.iter_mut() {
            arg.index = slot;
            slot += 1;
        }
        *body
    } else {
        return;
    };

    let high = match body {
        Some(body) => assign_block(module, body, slot),
        None => slot,
    };

    if let NodeKind::Function { stack_space, .. } = &mut module.node_mut(func).kind {
        *stack_space = high * 8;
    }
}

/// Assign slots to a block's locals starting at `start`, then to every
/// nested block in statement order. Indices stay unique across the whole
/// function; the returned count is the function's high-water slot mark.
fn assign_block(module: &mut Module, block: NodeId, start: usize) -> usize {
    let mut slot = start;
    let children = if let NodeKind::Block { locals, children } = &mut module.node_mut(block).kind {
        for local in locals.iter_mut() {
            local.index = slot;
            slot += 1;
        }
        children.clone()
    } else {
        return slot;
    };

    for child in children {
        slot = assign_statement(module, child, slot);
    }
    slot
}

fn assign_statement(module: &mut Module, node: NodeId, slot: usize) -> usize {
    match module.node(node).kind.clone() {
        NodeKind::Block { .. } => assign_block(module, node, slot),
        NodeKind::If { body, .. }
        | NodeKind::While { body, .. }
        | NodeKind::For { body, .. } => assign_statement(module, body, slot),
        _ => slot,
    }
}

// ===== pass two: emission =====

struct CodeGen<'m> {
    module: &'m Module,
    out: String,
    label_count: usize,
    /// Label of the current function's epilogue.
    ret_label: usize,
    /// Continue targets for the enclosing loops.
    loop_tops: Vec<usize>,
}

impl<'m> CodeGen<'m> {
    fn err(&self, line: usize, message: &str) -> String {
        format!(
            "codegen error: {} (line {}, file {})",
            message, line, self.module.filename
        )
    }

    fn new_label(&mut self) -> usize {
        let label = self.label_count;
        self.label_count += 1;
        label
    }

    fn emit(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn emit_label(&mut self, label: usize) {
        let _ = writeln!(self.out, "__L{}:", label);
    }

    fn generate_program(&mut self) -> Result<String, String> {
        self.emit("JMP __ENTRY__");

        // Data section: the names of every user struct type and cfunc,
        // referenced by ALLOC and CCALL operands.
        let mut names: Vec<String> = Vec::new();
        self.module.usertypes.foreach(|name, _| names.push(name.to_string()));
        self.module
            .cfunctions
            .foreach(|name, _| names.push(name.to_string()));
        for name in names {
            let _ = writeln!(self.out, "{}: db \"{}\"", name, name);
        }

        for child in self.module.top_level() {
            if matches!(self.module.node(child).kind, NodeKind::Function { .. }) {
                self.generate_function(child)?;
            }
        }

        self.emit("__ENTRY__:");
        self.emit("CALL main 0");
        self.emit("HALT");
        Ok(std::mem::take(&mut self.out))
    }

    fn generate_function(&mut self, func: NodeId) -> Result<(), String> {
        let NodeKind::Function {
            name,
            args,
            return_type,
            special_ret,
            body,
            stack_space,
        } = self.module.node(func).kind.clone()
        else {
            return Ok(());
        };

        self.ret_label = self.new_label();
        let _ = writeln!(self.out, "{}:", name);
        let _ = writeln!(self.out, "RESL {}", stack_space / 8);

        for arg in &args {
            let _ = writeln!(self.out, "ARG {}", arg.index);
            let _ = writeln!(self.out, "SVL {}", arg.index);
        }

        // Tag every struct-typed slot as a GC root for the duration of the
        // call.
        let mut roots: Vec<usize> = Vec::new();
        collect_struct_slots(self.module, &args, body, &mut roots);
        for slot in &roots {
            let _ = writeln!(self.out, "TAGL {}", slot);
        }

        if let Some(expr) = special_ret {
            self.generate_expression(expr)?;
        }
        if let Some(body) = body {
            self.generate_statement(body)?;
        }

        self.emit_label(self.ret_label);
        if !roots.is_empty() {
            let _ = writeln!(self.out, "UNTAGLS {}", roots.len());
        }
        self.emit(if return_type.is_some() { "IRET" } else { "RET" });
        Ok(())
    }

    fn generate_statement(&mut self, node: NodeId) -> Result<(), String> {
        match self.module.node(node).kind.clone() {
            NodeKind::Block { children, .. } => {
                for child in children {
                    self.generate_statement(child)?;
                }
            }
            NodeKind::If { cond, body } => {
                let _positive = self.new_label();
                let negative = self.new_label();
                self.generate_expression(cond)?;
                self.emit("ITEST");
                let _ = writeln!(self.out, "JZ __L{}", negative);
                self.generate_statement(body)?;
                self.emit_label(negative);
            }
            NodeKind::While { cond, body } => {
                let top = self.new_label();
                let bottom = self.new_label();
                self.emit_label(top);
                self.generate_expression(cond)?;
                self.emit("ITEST");
                let _ = writeln!(self.out, "JZ __L{}", bottom);
                self.loop_tops.push(top);
                self.generate_statement(body)?;
                self.loop_tops.pop();
                let _ = writeln!(self.out, "JMP __L{}", top);
                self.emit_label(bottom);
            }
            NodeKind::For {
                init,
                cond,
                incr,
                body,
            } => {
                if let Some(init) = init {
                    self.generate_expression(init)?;
                }
                let top = self.new_label();
                let continue_label = self.new_label();
                let bottom = self.new_label();
                self.emit_label(top);
                self.generate_expression(cond)?;
                self.emit("ITEST");
                let _ = writeln!(self.out, "JZ __L{}", bottom);
                self.loop_tops.push(continue_label);
                self.generate_statement(body)?;
                self.loop_tops.pop();
                self.emit_label(continue_label);
                if let Some(incr) = incr {
                    self.generate_expression(incr)?;
                }
                let _ = writeln!(self.out, "JMP __L{}", top);
                self.emit_label(bottom);
            }
            NodeKind::Expression(expr) => {
                self.generate_expression(expr)?;
            }
            NodeKind::Return(retval) => {
                if let Some(expr) = retval {
                    self.generate_expression(expr)?;
                }
                let _ = writeln!(self.out, "JMP __L{}", self.ret_label);
            }
            NodeKind::Continue => {
                let Some(top) = self.loop_tops.last() else {
                    return Err(self.err(0, "continue outside of a loop"));
                };
                let _ = writeln!(self.out, "JMP __L{}", top);
            }
            NodeKind::Function { .. } => {}
        }
        Ok(())
    }

    // ===== expressions =====

    fn generate_expression(&mut self, id: ExprId) -> Result<(), String> {
        let line = self.module.expr(id).line;
        match self.module.expr(id).kind.clone() {
            ExprKind::Int(value) => {
                let _ = writeln!(self.out, "IPUSH {}", value);
            }
            ExprKind::Float(value) => {
                // The assembler classifies the operand as a float by its
                // decimal point, so the rendering must never use exponent
                // form.
                let mut rendered = format!("{:?}", value);
                if rendered.contains('e') || rendered.contains('E') {
                    rendered = format!("{:.6}", value);
                }
                let _ = writeln!(self.out, "IPUSH {}", rendered);
            }
            ExprKind::Ident(name) => {
                self.generate_identifier(id, &name)?;
            }
            ExprKind::Unary { op, operand, .. } => match op {
                b'!' => {
                    self.generate_expression(operand)?;
                    self.emit("IPUSH 0");
                    self.emit("ICMP");
                    self.emit("FEQ");
                }
                _ => {
                    return Err(self.err(line, "operator is not supported by the emitter"));
                }
            },
            ExprKind::Binary { op, lhs, rhs, .. } => {
                self.generate_binary(id, op, lhs, rhs)?;
            }
            ExprKind::Index { .. } => {
                return Err(self.err(
                    line,
                    "array indexing is not supported by the bytecode emitter",
                ));
            }
            ExprKind::Call { callee, args } => {
                self.generate_call(id, callee, args)?;
            }
            ExprKind::New { dt, .. } => {
                let name = dt.type_name.as_deref().unwrap_or("");
                let _ = writeln!(self.out, "ALLOC {}", name);
            }
        }
        Ok(())
    }

    /// True when `id` is the left leaf of a plain assignment, i.e. the
    /// position that must produce an address instead of a value.
    fn is_assignment_target(&self, id: ExprId) -> bool {
        let node = self.module.expr(id);
        node.leaf == LeafSide::Left
            && node.parent.is_some_and(|p| {
                matches!(self.module.expr(p).kind, ExprKind::Binary { op: b'=', .. })
            })
    }

    fn generate_identifier(&mut self, id: ExprId, name: &str) -> Result<(), String> {
        let node = self.module.expr(id);
        let line = node.line;

        // The member name to the right of '.' is consumed by the parent
        // operator; it emits nothing itself.
        let is_member_name = node.leaf == LeafSide::Right
            && node.parent.is_some_and(|p| {
                matches!(self.module.expr(p).kind, ExprKind::Binary { op: b'.', .. })
            });
        if is_member_name {
            return Ok(());
        }

        let decl = self
            .module
            .resolve_name(id, name)
            .ok_or_else(|| self.err(line, &format!("unknown identifier '{}'", name)))?;

        // Function names only appear as callees; the call emits them.
        if decl.dt.is_function() {
            return Ok(());
        }

        if self.is_assignment_target(id) {
            let _ = writeln!(self.out, "IPUSH {}", decl.index);
        } else {
            let _ = writeln!(self.out, "LDL {}", decl.index);
        }
        Ok(())
    }

    /// The struct index of the member a `.` expression names.
    fn member_index(&self, dot: ExprId) -> Result<usize, String> {
        let line = self.module.expr(dot).line;
        let ExprKind::Binary { lhs, rhs, .. } = self.module.expr(dot).kind else {
            return Err(self.err(line, "expected member access"));
        };
        let struct_dt = self
            .module
            .expr(lhs)
            .resolved
            .as_ref()
            .ok_or_else(|| self.err(line, "member access missing struct type"))?;
        let struct_name = struct_dt.type_name.as_deref().unwrap_or("");
        let ExprKind::Ident(member_name) = &self.module.expr(rhs).kind else {
            return Err(self.err(line, "expected member name"));
        };
        self.module
            .usertypes
            .get(struct_name)
            .and_then(|info| info.members.get(member_name))
            .map(|m| m.index)
            .ok_or_else(|| {
                self.err(
                    line,
                    &format!("unknown member '{}' of '{}'", member_name, struct_name),
                )
            })
    }

    fn generate_binary(&mut self, id: ExprId, op: u8, lhs: ExprId, rhs: ExprId) -> Result<(), String> {
        let line = self.module.expr(id).line;
        match op {
            b'=' => {
                self.generate_expression(lhs)?;
                self.generate_expression(rhs)?;
                // Identifier targets left their slot index on the stack;
                // member targets left the segment id.
                if matches!(self.module.expr(lhs).kind, ExprKind::Binary { op: b'.', .. }) {
                    let member = self.member_index(lhs)?;
                    let _ = writeln!(self.out, "SVMBR {}", member);
                } else {
                    self.emit("SVLS");
                }
            }

            op::ADD_BY | op::SUB_BY | op::MUL_BY | op::DIV_BY => {
                self.generate_compound_assignment(id, op, lhs, rhs)?;
            }

            b'.' => {
                self.generate_expression(lhs)?;
                self.generate_expression(rhs)?;
                // On the left of '=', the segment id is the address; the
                // store consumes it without a dereference.
                if self.is_assignment_target(id) {
                    return Ok(());
                }
                let member = self.member_index(id)?;
                let _ = writeln!(self.out, "LDMBR {}", member);
            }

            b'+' | b'-' | b'*' | b'/' => {
                let float = self
                    .module
                    .expr(id)
                    .resolved
                    .as_ref()
                    .is_some_and(|dt| dt.type_name.as_deref() == Some("float"));
                if float {
                    return Err(self.err(line, "float arithmetic is not implemented"));
                }
                self.generate_expression(lhs)?;
                self.generate_expression(rhs)?;
                self.emit(match op {
                    b'+' => "IADD",
                    b'-' => "ISUB",
                    b'*' => "IMUL",
                    _ => "IDIV",
                });
            }

            op::EQ | op::GE | op::LE | b'<' | b'>' => {
                self.generate_expression(lhs)?;
                self.generate_expression(rhs)?;
                self.emit("ICMP");
                self.emit(match op {
                    op::EQ => "FEQ",
                    op::GE => "FGE",
                    op::LE => "FLE",
                    b'<' => "FLT",
                    _ => "FGT",
                });
            }

            op::NEQ => {
                // No FNEQ opcode: compute equality, then compare it with 0.
                self.generate_expression(lhs)?;
                self.generate_expression(rhs)?;
                self.emit("ICMP");
                self.emit("FEQ");
                self.emit("IPUSH 0");
                self.emit("ICMP");
                self.emit("FEQ");
            }

            op::LOG_AND => {
                // Operands are type-checked bools (0 or 1); conjunction is
                // multiplication.
                self.generate_expression(lhs)?;
                self.generate_expression(rhs)?;
                self.emit("IMUL");
            }

            op::LOG_OR => {
                self.generate_expression(lhs)?;
                self.generate_expression(rhs)?;
                self.emit("IADD");
                self.emit("IPUSH 0");
                self.emit("ICMP");
                self.emit("FGT");
            }

            b',' => {
                // Argument chains evaluate left to right.
                self.generate_expression(lhs)?;
                self.generate_expression(rhs)?;
            }

            _ => {
                return Err(self.err(line, "operator is not supported by the emitter"));
            }
        }
        Ok(())
    }

    /// `lhs op= rhs` desugars to a load, the operation, and the matching
    /// store.
    fn generate_compound_assignment(
        &mut self,
        id: ExprId,
        op: u8,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<(), String> {
        let line = self.module.expr(id).line;
        let op_ins = match op {
            op::ADD_BY => "IADD",
            op::SUB_BY => "ISUB",
            op::MUL_BY => "IMUL",
            _ => "IDIV",
        };
        match self.module.expr(lhs).kind.clone() {
            ExprKind::Ident(name) => {
                let decl = self
                    .module
                    .resolve_name(lhs, &name)
                    .ok_or_else(|| self.err(line, &format!("unknown identifier '{}'", name)))?;
                let _ = writeln!(self.out, "IPUSH {}", decl.index);
                let _ = writeln!(self.out, "LDL {}", decl.index);
                self.generate_expression(rhs)?;
                self.emit(op_ins);
                self.emit("SVLS");
            }
            ExprKind::Binary {
                op: b'.',
                lhs: segment,
                ..
            } => {
                let member = self.member_index(lhs)?;
                self.generate_expression(segment)?;
                self.emit("DUP");
                let _ = writeln!(self.out, "LDMBR {}", member);
                self.generate_expression(rhs)?;
                self.emit(op_ins);
                let _ = writeln!(self.out, "SVMBR {}", member);
            }
            _ => {
                return Err(self.err(line, "invalid compound assignment target"));
            }
        }
        Ok(())
    }

    fn generate_call(
        &mut self,
        id: ExprId,
        callee: ExprId,
        args: Option<ExprId>,
    ) -> Result<(), String> {
        let line = self.module.expr(id).line;
        let ExprKind::Ident(name) = self.module.expr(callee).kind.clone() else {
            return Err(self.err(line, "indirect calls are not supported"));
        };

        if let Some(args) = args {
            self.generate_expression(args)?;
        }

        if let Some(decl) = self.module.functions.get(&name) {
            let nargs = decl.dt.function_descriptor().map(|d| d.nargs).unwrap_or(0);
            let _ = writeln!(self.out, "CALL {} {}", name, nargs);
        } else if let Some(decl) = self.module.cfunctions.get(&name) {
            let nargs = decl.dt.function_descriptor().map(|d| d.nargs).unwrap_or(0);
            let _ = writeln!(self.out, "CCALL {} {}", name, nargs);
        } else {
            return Err(self.err(line, &format!("unknown function '{}'", name)));
        }
        Ok(())
    }
}

/// Collect the slot of every struct-typed declaration in a function
/// (arguments plus locals of every nested block).
fn collect_struct_slots(
    module: &Module,
    args: &[Declaration],
    body: Option<NodeId>,
    out: &mut Vec<usize>,
) {
    fn is_heap_ref(dt: &Datatype) -> bool {
        dt.is_struct()
    }

    for arg in args {
        if is_heap_ref(&arg.dt) {
            out.push(arg.index);
        }
    }
    let Some(body) = body else { return };
    collect_block_struct_slots(module, body, out);
}

fn collect_block_struct_slots(module: &Module, node: NodeId, out: &mut Vec<usize>) {
    match &module.node(node).kind {
        NodeKind::Block { locals, children } => {
            for local in locals {
                if local.dt.is_struct() {
                    out.push(local.index);
                }
            }
            for child in children {
                collect_block_struct_slots(module, *child, out);
            }
        }
        NodeKind::If { body, .. } | NodeKind::While { body, .. } | NodeKind::For { body, .. } => {
            collect_block_struct_slots(module, *body, out);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::typechecker::check_module;

    fn compile(src: &str) -> String {
        let mut module = parse_source(src, "test.spy").unwrap();
        check_module(&mut module).unwrap();
        generate(&mut module).unwrap()
    }

    fn lines(asm: &str) -> Vec<&str> {
        asm.lines().collect()
    }

    #[test]
    fn test_program_frame() {
        let asm = compile("func main() -> int { return 0; }");
        let all = lines(&asm);
        assert_eq!(all[0], "JMP __ENTRY__");
        assert!(all.contains(&"main:"));
        assert!(all.contains(&"__ENTRY__:"));
        assert!(all.contains(&"CALL main 0"));
        assert_eq!(*all.last().unwrap(), "HALT");
    }

    #[test]
    fn test_arithmetic_is_postorder() {
        let asm = compile("func main() -> int { return 1 + 2 * 3; }");
        let body: Vec<&str> = lines(&asm)
            .into_iter()
            .skip_while(|l| *l != "main:")
            .take_while(|l| *l != "__ENTRY__:")
            .collect();
        let want = ["IPUSH 1", "IPUSH 2", "IPUSH 3", "IMUL", "IADD"];
        let mut iter = body.iter();
        for w in want {
            assert!(iter.any(|l| *l == w), "missing {} in {:?}", w, body);
        }
    }

    #[test]
    fn test_local_slots_and_frame_size() {
        let asm = compile("func main() -> int { x: int; y: int; x = 1; y = 2; return x; }");
        assert!(asm.contains("RESL 2"));
        // x = 1 stores through SVLS with the slot pushed first.
        assert!(asm.contains("IPUSH 0\nIPUSH 1\nSVLS"));
        assert!(asm.contains("IPUSH 1\nIPUSH 2\nSVLS"));
        // return x loads the local.
        assert!(asm.contains("LDL 0"));
    }

    #[test]
    fn test_argument_prologue() {
        let asm = compile("func add(a: int, b: int) -> int = a + b; func main() -> int { return add(40, 2); }");
        assert!(asm.contains("add:\nRESL 2\nARG 0\nSVL 0\nARG 1\nSVL 1"));
        // Call pushes arguments left to right.
        assert!(asm.contains("IPUSH 40\nIPUSH 2\nCALL add 2"));
        // Value-returning functions end with IRET.
        assert!(asm.contains("IRET"));
    }

    #[test]
    fn test_if_template() {
        let asm = compile("func main() -> int { x: int; if (x > 3) return 1; return 0; }");
        assert!(asm.contains("ICMP\nFGT\nITEST\nJZ __L"));
    }

    #[test]
    fn test_while_template() {
        let asm = compile(
            "func main() -> int { i: int; while (i < 10) i = i + 1; return i; }",
        );
        // Condition at the top, backward jump at the bottom.
        let top_label = asm
            .lines()
            .find(|l| l.starts_with("__L") && l.ends_with(':'))
            .unwrap()
            .trim_end_matches(':')
            .to_string();
        assert!(asm.contains(&format!("JMP {}", top_label)));
        assert!(asm.contains("ITEST\nJZ __L"));
    }

    #[test]
    fn test_struct_db_and_member_access() {
        let asm = compile(
            "Point: struct { x: int; y: int; }\n\
             func main() -> int {\n\
               p: Point;\n\
               p = new Point;\n\
               p.x = 5;\n\
               p.y = 7;\n\
               return p.x + p.y;\n\
             }",
        );
        assert!(asm.contains("Point: db \"Point\""));
        assert!(asm.contains("ALLOC Point"));
        // Stores to members by struct index.
        assert!(asm.contains("SVMBR 0"));
        assert!(asm.contains("SVMBR 1"));
        // Loads via LDMBR.
        assert!(asm.contains("LDMBR 0"));
        assert!(asm.contains("LDMBR 1"));
        // The struct-typed local is a GC root for the frame.
        assert!(asm.contains("TAGL 0"));
        assert!(asm.contains("UNTAGLS 1"));
    }

    #[test]
    fn test_member_store_suppresses_deref() {
        let asm = compile(
            "P: struct { x: int; }\n\
             func main() -> void { p: P; p = new P; p.x = 5; }",
        );
        // p.x = 5 loads the segment (LDL 0), pushes 5, stores; it must not
        // emit an LDMBR for the left-hand side.
        assert!(asm.contains("LDL 0\nIPUSH 5\nSVMBR 0"));
    }

    #[test]
    fn test_cfunc_call_emits_ccall() {
        let asm = compile(
            "cfunc print(v: int) -> void;\n\
             func main() -> void { print(42); }",
        );
        assert!(asm.contains("print: db \"print\""));
        assert!(asm.contains("IPUSH 42\nCCALL print 1"));
        // Void functions end with a plain RET.
        assert!(asm.contains("\nRET\n"));
    }

    #[test]
    fn test_return_jumps_to_epilogue() {
        let asm = compile("func main() -> int { return 1; }");
        // The return expression is followed by a jump to the function's
        // epilogue label, which precedes IRET.
        let ret_jump = asm
            .lines()
            .find(|l| l.starts_with("JMP __L"))
            .expect("return jump");
        let label = ret_jump.trim_start_matches("JMP ").to_string();
        assert!(asm.contains(&format!("{}:\nIRET", label)));
    }

    #[test]
    fn test_short_return_function_emits_expression() {
        let asm = compile("func add(a: int, b: int) -> int = a + b;\nfunc main() -> int { return add(1, 2); }");
        assert!(asm.contains("LDL 0\nLDL 1\nIADD"));
    }

    #[test]
    fn test_nested_member_chain() {
        let asm = compile(
            "Inner: struct { v: int; }\n\
             Outer: struct { inner: Inner; }\n\
             func main() -> int {\n\
               o: Outer;\n\
               o = new Outer;\n\
               o.inner = new Inner;\n\
               o.inner.v = 3;\n\
               return o.inner.v;\n\
             }",
        );
        // The write goes through the inner segment: load o, deref inner,
        // push 3, store member 0 of Inner.
        assert!(asm.contains("LDL 0\nLDMBR 0\nIPUSH 3\nSVMBR 0"));
    }

    #[test]
    fn test_compound_assignment() {
        let asm = compile("func main() -> int { x: int; x = 1; x += 2; return x; }");
        assert!(asm.contains("IPUSH 0\nLDL 0\nIPUSH 2\nIADD\nSVLS"));
    }

    #[test]
    fn test_logical_and_or() {
        let asm = compile(
            "func main() -> int { x: int; if (x > 1 && x < 5) return 1; if (x > 8 || x < 0) return 2; return 0; }",
        );
        assert!(asm.contains("IMUL\nITEST"));
        assert!(asm.contains("IADD\nIPUSH 0\nICMP\nFGT\nITEST"));
    }

    #[test]
    fn test_float_arithmetic_rejected() {
        let mut module =
            parse_source("func main() -> void { f: float; f = 1.5 + 2.5; }", "t").unwrap();
        check_module(&mut module).unwrap();
        assert!(generate(&mut module).unwrap_err().contains("float arithmetic"));
    }

    #[test]
    fn test_slot_indices_unique_across_scopes() {
        let asm = compile(
            "func main() -> int {\n\
               { a: int; a = 1; }\n\
               { b: int; b = 2; }\n\
               return 0;\n\
             }",
        );
        // Every local gets its own slot, so the frame holds both.
        assert!(asm.contains("RESL 2"));
        assert!(asm.contains("IPUSH 0\nIPUSH 1\nSVLS"));
        assert!(asm.contains("IPUSH 1\nIPUSH 2\nSVLS"));
    }

    #[test]
    fn test_continue_jumps_to_loop_top() {
        let asm = compile(
            "func main() -> int {\n\
               i: int;\n\
               while (i < 10) { i = i + 1; continue; }\n\
               return i;\n\
             }",
        );
        let top_label = asm
            .lines()
            .find(|l| l.starts_with("__L") && l.ends_with(':'))
            .unwrap()
            .trim_end_matches(':')
            .to_string();
        // Two jumps to the top: the loop back-edge and the continue.
        let jumps = asm
            .lines()
            .filter(|l| *l == format!("JMP {}", top_label))
            .count();
        assert_eq!(jumps, 2);
    }
}
