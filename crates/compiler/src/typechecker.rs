//! Type checker for Spyre.
//!
//! A single walk over the AST that annotates every expression subtree with
//! a resolved datatype and validates operator operands, call signatures,
//! and loop/if conditions. There are no implicit conversions: every rule
//! uses strict datatype equality.
//!
//! `resolved` is deliberately left absent in three places: comma operators
//! (list builders, not values), the bare member name to the right of `.`,
//! and calls to void functions.

use crate::ast::{ExprId, ExprKind, Module, NodeId, NodeKind};
use crate::types::{Builtins, Datatype, Declaration};
use spyre_core::lexer::op;

pub struct TypeChecker<'m> {
    module: &'m mut Module,
    builtins: Builtins,
}

/// Type-check a parsed module in place.
pub fn check_module(module: &mut Module) -> Result<(), String> {
    let mut checker = TypeChecker {
        module,
        builtins: Builtins::new(),
    };
    let root = checker.module.root;
    checker.check_node(root, None)
}

impl<'m> TypeChecker<'m> {
    fn err(&self, line: usize, message: &str) -> String {
        format!(
            "type error: {} (line {}, file {})",
            message, line, self.module.filename
        )
    }

    fn expr_err(&self, id: ExprId, message: &str) -> String {
        self.err(self.module.expr(id).line, message)
    }

    /// The resolved datatype of an already-checked subexpression; absent
    /// means the expression produced no value (void call or comma chain).
    fn resolved(&self, id: ExprId) -> Result<Datatype, String> {
        self.module
            .expr(id)
            .resolved
            .clone()
            .ok_or_else(|| self.expr_err(id, "void value used in expression"))
    }

    fn set_resolved(&mut self, id: ExprId, dt: Datatype) {
        self.module.expr_mut(id).resolved = Some(dt);
    }

    // ===== statements =====

    fn check_node(&mut self, id: NodeId, func: Option<NodeId>) -> Result<(), String> {
        match self.module.node(id).kind.clone() {
            NodeKind::Block { children, .. } => {
                for child in children {
                    self.check_node(child, func)?;
                }
            }
            NodeKind::If { cond, body } => {
                self.check_condition(cond, "if-condition")?;
                self.check_node(body, func)?;
            }
            NodeKind::While { cond, body } => {
                self.check_condition(cond, "while-condition")?;
                self.check_node(body, func)?;
            }
            NodeKind::For {
                init,
                cond,
                incr,
                body,
            } => {
                if let Some(init) = init {
                    self.check_expression(init)?;
                }
                self.check_condition(cond, "for-condition")?;
                if let Some(incr) = incr {
                    self.check_expression(incr)?;
                }
                self.check_node(body, func)?;
            }
            NodeKind::Function {
                special_ret, body, ..
            } => {
                if let Some(expr) = special_ret {
                    self.check_expression(expr)?;
                    self.check_return_value(id, Some(expr))?;
                }
                if let Some(body) = body {
                    self.check_node(body, Some(id))?;
                }
            }
            NodeKind::Expression(expr) => {
                self.check_expression(expr)?;
            }
            NodeKind::Return(retval) => {
                let Some(func) = func else {
                    let line = retval.map(|e| self.module.expr(e).line).unwrap_or(0);
                    return Err(self.err(line, "return outside of a function"));
                };
                if let Some(expr) = retval {
                    self.check_expression(expr)?;
                }
                self.check_return_value(func, retval)?;
            }
            NodeKind::Continue => {}
        }
        Ok(())
    }

    /// A returned value must strictly match the enclosing function's
    /// declared return type; `return;` is only legal in void functions.
    fn check_return_value(&mut self, func: NodeId, retval: Option<ExprId>) -> Result<(), String> {
        let NodeKind::Function {
            name, return_type, ..
        } = self.module.node(func).kind.clone()
        else {
            return Ok(());
        };
        match (retval, return_type) {
            (None, None) => Ok(()),
            (None, Some(expected)) => Err(self.err(
                0,
                &format!(
                    "function '{}' must return a value of type '{}'",
                    name, expected
                ),
            )),
            (Some(expr), None) => Err(self.expr_err(
                expr,
                &format!("void function '{}' cannot return a value", name),
            )),
            (Some(expr), Some(expected)) => {
                let got = self.resolved(expr)?;
                if !got.strict_eq(&expected) {
                    return Err(self.expr_err(
                        expr,
                        &format!(
                            "return type mismatch in function '{}' (expected '{}', got '{}')",
                            name, expected, got
                        ),
                    ));
                }
                Ok(())
            }
        }
    }

    fn check_condition(&mut self, cond: ExprId, what: &str) -> Result<(), String> {
        self.check_expression(cond)?;
        let dt = self.resolved(cond)?;
        if !dt.strict_eq(&self.builtins.bool_t) {
            return Err(self.expr_err(
                cond,
                &format!("{} must evaluate to type 'bool' (got type '{}')", what, dt),
            ));
        }
        Ok(())
    }

    // ===== expressions =====

    fn check_expression(&mut self, id: ExprId) -> Result<(), String> {
        match self.module.expr(id).kind.clone() {
            ExprKind::Int(_) => {
                self.set_resolved(id, self.builtins.int_t.clone());
            }
            ExprKind::Float(_) => {
                self.set_resolved(id, self.builtins.float_t.clone());
            }
            ExprKind::Ident(name) => {
                let decl = self
                    .module
                    .resolve_name(id, &name)
                    .ok_or_else(|| self.expr_err(id, &format!("unknown identifier '{}'", name)))?;
                self.set_resolved(id, decl.dt);
            }
            ExprKind::Unary { op, text, operand } => {
                self.check_unary(id, op, &text, operand)?;
            }
            ExprKind::Binary { op, text, lhs, rhs } => {
                self.check_binary(id, op, &text, lhs, rhs)?;
            }
            ExprKind::Index { array, index } => {
                self.check_expression(array)?;
                let array_dt = self.resolved(array)?;
                if array_dt.arrdim == 0 {
                    return Err(self.expr_err(
                        id,
                        &format!("attempt to index a non-array value (type '{}')", array_dt),
                    ));
                }
                self.check_expression(index)?;
                let index_dt = self.resolved(index)?;
                if !index_dt.strict_eq(&self.builtins.int_t) {
                    return Err(self.expr_err(
                        index,
                        &format!("array index must be of type 'int' (got type '{}')", index_dt),
                    ));
                }
                let mut result = array_dt;
                result.arrdim -= 1;
                self.set_resolved(id, result);
            }
            ExprKind::Call { callee, args } => {
                self.check_call(id, callee, args)?;
            }
            ExprKind::New { dt, dims } => {
                for dim in &dims {
                    self.check_expression(*dim)?;
                    let dim_dt = self.resolved(*dim)?;
                    if !dim_dt.strict_eq(&self.builtins.int_t) {
                        return Err(self.expr_err(
                            *dim,
                            &format!(
                                "array dimension must be of type 'int' (got type '{}')",
                                dim_dt
                            ),
                        ));
                    }
                }
                let mut result = dt;
                result.arrdim = dims.len();
                self.set_resolved(id, result);
            }
        }
        Ok(())
    }

    fn check_unary(&mut self, id: ExprId, op: u8, text: &str, operand: ExprId) -> Result<(), String> {
        self.check_expression(operand)?;
        match op {
            b'!' => {
                let dt = self.resolved(operand)?;
                if !dt.strict_eq(&self.builtins.bool_t) {
                    return Err(self.expr_err(
                        id,
                        &format!(
                            "operand to operator '!' must be of type 'bool' (got type '{}')",
                            dt
                        ),
                    ));
                }
                self.set_resolved(id, self.builtins.bool_t.clone());
                Ok(())
            }
            _ => Err(self.expr_err(id, &format!("operator '{}' is not supported", text))),
        }
    }

    fn check_binary(
        &mut self,
        id: ExprId,
        op: u8,
        text: &str,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<(), String> {
        match op {
            // Struct member access.
            b'.' => {
                self.check_expression(lhs)?;
                let lhs_dt = self.resolved(lhs)?;
                if !lhs_dt.is_struct() {
                    return Err(self.expr_err(
                        id,
                        &format!(
                            "expected struct as left-operand to operator '.' (got type '{}')",
                            lhs_dt
                        ),
                    ));
                }
                let ExprKind::Ident(member_name) = self.module.expr(rhs).kind.clone() else {
                    return Err(
                        self.expr_err(id, "expected identifier as right-operand to operator '.'")
                    );
                };
                // The member name itself deliberately stays unresolved.
                let struct_name = lhs_dt.type_name.as_deref().unwrap_or("");
                let member = self.find_member(struct_name, &member_name).ok_or_else(|| {
                    self.expr_err(
                        id,
                        &format!(
                            "'{}' is not a valid member of struct '{}'",
                            member_name, struct_name
                        ),
                    )
                })?;
                self.set_resolved(id, member.dt);
                Ok(())
            }

            // Comparison operators: operands must match exactly.
            op::EQ | op::NEQ | op::GE | op::LE | b'<' | b'>' => {
                self.check_expression(lhs)?;
                self.check_expression(rhs)?;
                let left = self.resolved(lhs)?;
                let right = self.resolved(rhs)?;
                if !left.strict_eq(&right) {
                    return Err(self.expr_err(
                        id,
                        &format!(
                            "operands to comparison operator '{}' do not match (got types '{}' and '{}')",
                            text, left, right
                        ),
                    ));
                }
                self.set_resolved(id, self.builtins.bool_t.clone());
                Ok(())
            }

            // Logical operators: bool on both sides.
            op::LOG_AND | op::LOG_OR => {
                self.check_expression(lhs)?;
                self.check_expression(rhs)?;
                let left = self.resolved(lhs)?;
                let right = self.resolved(rhs)?;
                if !left.strict_eq(&self.builtins.bool_t) || !right.strict_eq(&self.builtins.bool_t)
                {
                    return Err(self.expr_err(
                        id,
                        &format!(
                            "operands to logical operator '{}' must be of type 'bool' (got types '{}' and '{}')",
                            text, left, right
                        ),
                    ));
                }
                self.set_resolved(id, self.builtins.bool_t.clone());
                Ok(())
            }

            // Comma builds argument lists; it resolves its operands but has
            // no type of its own.
            b',' => {
                self.check_expression(lhs)?;
                self.check_expression(rhs)?;
                Ok(())
            }

            // Arithmetic and assignment.
            b'+' | b'-' | b'*' | b'/' | b'=' | op::ADD_BY | op::SUB_BY | op::MUL_BY
            | op::DIV_BY => {
                let assigning = op != b'+' && op != b'-' && op != b'*' && op != b'/';
                if assigning && !self.is_assignable(lhs) {
                    return Err(self.expr_err(
                        id,
                        &format!("invalid assignment target for operator '{}'", text),
                    ));
                }
                self.check_expression(lhs)?;
                self.check_expression(rhs)?;
                let left = self.resolved(lhs)?;
                let right = self.resolved(rhs)?;
                if !left.strict_eq(&right) {
                    return Err(self.expr_err(
                        id,
                        &format!(
                            "operands to operator '{}' do not match (got types '{}' and '{}')",
                            text, left, right
                        ),
                    ));
                }
                self.set_resolved(id, left);
                Ok(())
            }

            _ => Err(self.expr_err(id, &format!("operator '{}' is not supported", text))),
        }
    }

    /// Only bare locals and struct members may be assigned to.
    fn is_assignable(&self, lhs: ExprId) -> bool {
        match &self.module.expr(lhs).kind {
            ExprKind::Ident(_) => true,
            ExprKind::Binary { op, .. } => *op == b'.',
            _ => false,
        }
    }

    fn find_member(&self, struct_name: &str, member_name: &str) -> Option<Declaration> {
        self.module
            .usertypes
            .get(struct_name)
            .and_then(|info| info.members.get(member_name).cloned())
    }

    fn check_call(
        &mut self,
        id: ExprId,
        callee: ExprId,
        args: Option<ExprId>,
    ) -> Result<(), String> {
        self.check_expression(callee)?;
        let callee_dt = self.resolved(callee)?;
        let Some(fdesc) = callee_dt.function_descriptor() else {
            return Err(self.expr_err(id, "attempt to call a non-function value"));
        };
        let fdesc = fdesc.clone();

        let callee_name = match &self.module.expr(callee).kind {
            ExprKind::Ident(name) => name.clone(),
            _ => "<function>".to_string(),
        };

        // The argument subtree is a comma chain; flatten it left-to-right
        // and pair each argument with its declared type.
        let mut flat: Vec<ExprId> = Vec::new();
        if let Some(args) = args {
            self.flatten_arguments(args, &mut flat);
        }
        if flat.len() != fdesc.nargs {
            return Err(self.expr_err(
                id,
                &format!(
                    "wrong number of arguments to '{}' (expected {}, got {})",
                    callee_name,
                    fdesc.nargs,
                    flat.len()
                ),
            ));
        }
        for (position, arg) in flat.iter().enumerate() {
            self.check_expression(*arg)?;
            let got = self.resolved(*arg)?;
            let expected = &fdesc.arguments[position].dt;
            if !got.strict_eq(expected) {
                return Err(self.expr_err(
                    *arg,
                    &format!(
                        "argument {} to '{}' has the wrong type (expected '{}', got '{}')",
                        position + 1,
                        callee_name,
                        expected,
                        got
                    ),
                ));
            }
        }

        // Void functions leave the call unresolved.
        if let Some(ret) = fdesc.return_type {
            self.set_resolved(id, ret);
        }
        Ok(())
    }

    fn flatten_arguments(&self, id: ExprId, out: &mut Vec<ExprId>) {
        if let ExprKind::Binary {
            op: b',', lhs, rhs, ..
        } = self.module.expr(id).kind
        {
            self.flatten_arguments(lhs, out);
            self.flatten_arguments(rhs, out);
        } else {
            out.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn check(src: &str) -> Result<Module, String> {
        let mut module = parse_source(src, "test.spy")?;
        check_module(&mut module)?;
        Ok(module)
    }

    fn check_err(src: &str) -> String {
        check(src).err().expect("expected a type error")
    }

    #[test]
    fn test_literals_resolve() {
        let module = check("func main() -> int { return 1 + 2; }").unwrap();
        for id in module.expr_ids() {
            let node = module.expr(id);
            assert!(node.resolved.is_some());
        }
    }

    #[test]
    fn test_every_noncomma_expression_resolves() {
        let module = check(
            "Point: struct { x: int; y: int; }\n\
             func add(a: int, b: int) -> int = a + b;\n\
             func main() -> int {\n\
               p: Point;\n\
               p = new Point;\n\
               p.x = add(1, 2);\n\
               return p.x;\n\
             }",
        )
        .unwrap();
        for id in module.expr_ids() {
            let node = module.expr(id);
            let is_comma = matches!(node.kind, ExprKind::Binary { op: b',', .. });
            let is_member_name = node.parent.is_some_and(|p| {
                matches!(module.expr(p).kind, ExprKind::Binary { op: b'.', rhs, .. } if rhs == id)
            });
            if is_comma || is_member_name {
                assert!(node.resolved.is_none());
            } else {
                assert!(node.resolved.is_some(), "unresolved: {:?}", node.kind);
            }
        }
    }

    #[test]
    fn test_binary_operand_strict_equality_holds() {
        let module = check(
            "func main() -> int { x: int; y: int; x = 1; y = 2; return x + y * 3; }",
        )
        .unwrap();
        for id in module.expr_ids() {
            if let ExprKind::Binary { op, lhs, rhs, .. } = module.expr(id).kind {
                if op == b'.' || op == b',' {
                    continue;
                }
                let l = module.expr(lhs).resolved.as_ref().unwrap();
                let r = module.expr(rhs).resolved.as_ref().unwrap();
                assert!(l.strict_eq(r));
            }
        }
    }

    #[test]
    fn test_unknown_identifier() {
        let err = check_err("func main() -> int { return nope; }");
        assert!(err.contains("unknown identifier 'nope'"));
    }

    #[test]
    fn test_operand_mismatch() {
        let err = check_err("func main() -> int { x: int; x = 1.5; return x; }");
        assert!(err.contains("do not match"));
    }

    #[test]
    fn test_condition_must_be_bool() {
        let err = check_err("func main() -> int { if (1) return 1; return 0; }");
        assert!(err.contains("must evaluate to type 'bool'"));
    }

    #[test]
    fn test_comparison_produces_bool() {
        check("func main() -> int { x: int; if (x > 3) return 1; return 0; }").unwrap();
    }

    #[test]
    fn test_comparison_mismatch() {
        let err = check_err("func main() -> int { x: int; if (x > 1.5) return 1; return 0; }");
        assert!(err.contains("comparison operator"));
    }

    #[test]
    fn test_logical_operators_require_bool() {
        check("func main() -> int { x: int; if (x > 1 && x < 10) return 1; return 0; }").unwrap();
        let err = check_err("func main() -> int { x: int; if (x && x > 1) return 1; return 0; }");
        assert!(err.contains("logical operator"));
    }

    #[test]
    fn test_member_access() {
        let module = check(
            "Point: struct { x: int; y: int; }\n\
             func main() -> int { p: Point; return p.x; }",
        )
        .unwrap();
        // The member lookup resolves to the member's type.
        let mut found_dot = false;
        for id in module.expr_ids() {
            if let ExprKind::Binary { op: b'.', .. } = module.expr(id).kind {
                let dt = module.expr(id).resolved.as_ref().unwrap();
                assert_eq!(dt.type_name.as_deref(), Some("int"));
                found_dot = true;
            }
        }
        assert!(found_dot);
    }

    #[test]
    fn test_invalid_member() {
        let err = check_err(
            "Point: struct { x: int; }\n\
             func main() -> int { p: Point; return p.z; }",
        );
        assert!(err.contains("not a valid member"));
    }

    #[test]
    fn test_dot_on_non_struct() {
        let err = check_err("func main() -> int { x: int; return x.y; }");
        assert!(err.contains("expected struct"));
    }

    #[test]
    fn test_call_arg_count() {
        let err = check_err(
            "func add(a: int, b: int) -> int = a + b;\n\
             func main() -> int { return add(1); }",
        );
        assert!(err.contains("wrong number of arguments"));
    }

    #[test]
    fn test_call_arg_type() {
        let err = check_err(
            "func add(a: int, b: int) -> int = a + b;\n\
             func main() -> int { return add(1, 2.5); }",
        );
        assert!(err.contains("wrong type"));
    }

    #[test]
    fn test_call_resolves_to_return_type() {
        check(
            "func add(a: int, b: int) -> int = a + b;\n\
             func main() -> int { return add(40, 2); }",
        )
        .unwrap();
    }

    #[test]
    fn test_cfunc_call() {
        check(
            "cfunc print(v: int) -> void;\n\
             func main() -> void { print(42); }",
        )
        .unwrap();
    }

    #[test]
    fn test_void_call_as_operand_is_error() {
        let err = check_err(
            "cfunc print(v: int) -> void;\n\
             func main() -> int { return print(1) + 2; }",
        );
        assert!(err.contains("void value"));
    }

    #[test]
    fn test_index_requires_array() {
        let err = check_err("func main() -> int { x: int; return x[0]; }");
        assert!(err.contains("non-array"));
    }

    #[test]
    fn test_index_decrements_dimension() {
        check("func main() -> int { xs: int[]; xs = new int[4]; return xs[0]; }").unwrap();
    }

    #[test]
    fn test_index_must_be_int() {
        let err = check_err("func main() -> int { xs: int[]; return xs[1.5]; }");
        assert!(err.contains("array index must be of type 'int'"));
    }

    #[test]
    fn test_new_dimension_must_be_int() {
        let err = check_err("func main() -> void { xs: int[]; xs = new int[2.5]; }");
        assert!(err.contains("array dimension"));
    }

    #[test]
    fn test_new_struct_matches_declaration() {
        check(
            "Point: struct { x: int; }\n\
             func main() -> void { p: Point; p = new Point; }",
        )
        .unwrap();
    }

    #[test]
    fn test_return_type_mismatch() {
        let err = check_err("func main() -> int { return 1.5; }");
        assert!(err.contains("return type mismatch"));
    }

    #[test]
    fn test_void_function_cannot_return_value() {
        let err = check_err("func main() -> void { return 1; }");
        assert!(err.contains("cannot return a value"));
    }

    #[test]
    fn test_unsupported_operator_rejected() {
        let err = check_err("func main() -> int { x: int; return x % 2; }");
        assert!(err.contains("not supported"));
    }

    #[test]
    fn test_assignment_target_must_be_lvalue() {
        let err = check_err("func main() -> void { 1 = 2; }");
        assert!(err.contains("invalid assignment target"));
    }

    #[test]
    fn test_self_referential_struct_member() {
        check(
            "Node: struct { next: Node; }\n\
             func main() -> void { n: Node; n = new Node; n.next = new Node; }",
        )
        .unwrap();
    }

    #[test]
    fn test_shadowing_inner_block() {
        // Inner block locals are found before outer ones.
        check(
            "func main() -> int {\n\
               x: int;\n\
               x = 1;\n\
               { y: int; y = x + 1; }\n\
               return x;\n\
             }",
        )
        .unwrap();
    }
}
