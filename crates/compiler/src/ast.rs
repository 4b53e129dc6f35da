//! Abstract syntax tree for Spyre.
//!
//! All statement and expression nodes live in arenas owned by the
//! [`Module`]; "pointers" between nodes are 32-bit handles ([`NodeId`],
//! [`ExprId`]) and parent links are `Option` handles. This keeps the tree
//! freely walkable in both directions (the type checker resolves
//! identifiers by walking up through enclosing blocks) without reference
//! cycles.

use crate::types::{Datatype, Declaration, StructInfo};
use spyre_core::SpyreMap;

/// Handle to a statement node in [`Module::nodes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub u32);

/// Handle to an expression node in [`Module::exprs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprId(pub u32);

/// Which side of a binary operator an operand sits on. Assignment code
/// generation uses this to emit the left-hand side as an address producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafSide {
    Neither,
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Ident(String),
    Unary {
        op: u8,
        text: String,
        operand: ExprId,
    },
    Binary {
        op: u8,
        text: String,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// `array[index]`
    Index { array: ExprId, index: ExprId },
    /// `callee(args)`; `args` is the comma-chained argument expression.
    Call {
        callee: ExprId,
        args: Option<ExprId>,
    },
    /// `new T[d0][d1]...`; `dt` is the base datatype, `dims` the bracketed
    /// dimension expressions.
    New { dt: Datatype, dims: Vec<ExprId> },
}

/// One expression node. `resolved` is filled in by the type checker; it
/// stays absent only on comma operators, on the bare member name to the
/// right of `.`, and on calls to void functions.
#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub line: usize,
    pub parent: Option<ExprId>,
    /// Back-pointer to the owning statement; set only on the root of each
    /// statement's expression tree.
    pub stmt: Option<NodeId>,
    pub leaf: LeafSide,
    pub resolved: Option<Datatype>,
}

impl ExprNode {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        ExprNode {
            kind,
            line,
            parent: None,
            stmt: None,
            leaf: LeafSide::Neither,
            resolved: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Block {
        children: Vec<NodeId>,
        locals: Vec<Declaration>,
    },
    If {
        cond: ExprId,
        body: NodeId,
    },
    While {
        cond: ExprId,
        body: NodeId,
    },
    For {
        init: Option<ExprId>,
        cond: ExprId,
        incr: Option<ExprId>,
        body: NodeId,
    },
    Function {
        name: String,
        args: Vec<Declaration>,
        return_type: Option<Datatype>,
        /// Body of the `func f(...) -> T = expr;` short form.
        special_ret: Option<ExprId>,
        body: Option<NodeId>,
        /// Frame bytes needed for locals; computed by the emitter's
        /// slot-assignment pass.
        stack_space: usize,
    },
    Expression(ExprId),
    Return(Option<ExprId>),
    Continue,
}

#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
}

/// A parsed compilation unit: the node arenas, the synthetic root block,
/// and the global registries (user struct types, functions, cfunctions).
#[derive(Debug)]
pub struct Module {
    pub filename: String,
    exprs: Vec<ExprNode>,
    nodes: Vec<AstNode>,
    pub root: NodeId,
    pub usertypes: SpyreMap<StructInfo>,
    pub functions: SpyreMap<Declaration>,
    pub cfunctions: SpyreMap<Declaration>,
}

impl Module {
    pub fn new(filename: &str) -> Self {
        let root_node = AstNode {
            kind: NodeKind::Block {
                children: Vec::new(),
                locals: Vec::new(),
            },
            parent: None,
        };
        Module {
            filename: filename.to_string(),
            exprs: Vec::new(),
            nodes: vec![root_node],
            root: NodeId(0),
            usertypes: SpyreMap::new(),
            functions: SpyreMap::new(),
            cfunctions: SpyreMap::new(),
        }
    }

    pub fn expr(&self, id: ExprId) -> &ExprNode {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut ExprNode {
        &mut self.exprs[id.0 as usize]
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn add_expr(&mut self, node: ExprNode) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(node);
        id
    }

    pub fn add_node(&mut self, node: AstNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn expr_ids(&self) -> impl Iterator<Item = ExprId> + use<> {
        (0..self.exprs.len() as u32).map(ExprId)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Climb parent links to the root of an expression tree.
    pub fn expr_root(&self, mut id: ExprId) -> ExprId {
        while let Some(parent) = self.expr(id).parent {
            id = parent;
        }
        id
    }

    /// The statement that owns an expression (via the root's back-pointer).
    pub fn owning_statement(&self, id: ExprId) -> Option<NodeId> {
        self.expr(self.expr_root(id)).stmt
    }

    /// Resolve a name visible from an expression: the nearest enclosing
    /// block's locals, then enclosing function arguments, then ancestor
    /// blocks, and finally the global function and cfunction registries.
    pub fn resolve_name(&self, from: ExprId, name: &str) -> Option<Declaration> {
        let mut at = self.owning_statement(from);
        while let Some(node_id) = at {
            match &self.node(node_id).kind {
                NodeKind::Block { locals, .. } => {
                    if let Some(decl) = locals.iter().find(|d| d.name == name) {
                        return Some(decl.clone());
                    }
                }
                NodeKind::Function { args, .. } => {
                    if let Some(decl) = args.iter().find(|d| d.name == name) {
                        return Some(decl.clone());
                    }
                }
                _ => {}
            }
            at = self.node(node_id).parent;
        }

        if let Some(decl) = self.functions.get(name) {
            return Some(decl.clone());
        }
        if let Some(decl) = self.cfunctions.get(name) {
            return Some(decl.clone());
        }
        None
    }

    /// The function a statement belongs to, if any.
    pub fn enclosing_function(&self, mut id: NodeId) -> Option<NodeId> {
        loop {
            if matches!(self.node(id).kind, NodeKind::Function { .. }) {
                return Some(id);
            }
            id = self.node(id).parent?;
        }
    }

    /// Ids of the root block's children (top-level statements).
    pub fn top_level(&self) -> Vec<NodeId> {
        match &self.node(self.root).kind {
            NodeKind::Block { children, .. } => children.clone(),
            _ => Vec::new(),
        }
    }

    /// Render the tree as an indented dump, one node per line. A debugging
    /// aid for compiler work; the output format is not stable.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let pad = "  ".repeat(depth);
        match &self.node(id).kind {
            NodeKind::Block { children, locals } => {
                out.push_str(&format!("{}BLOCK", pad));
                if !locals.is_empty() {
                    let names: Vec<&str> = locals.iter().map(|d| d.name.as_str()).collect();
                    out.push_str(&format!(" locals=[{}]", names.join(", ")));
                }
                out.push('\n');
                for child in children {
                    self.dump_node(*child, depth + 1, out);
                }
            }
            NodeKind::If { cond, body } => {
                out.push_str(&format!("{}IF\n", pad));
                self.dump_expr(*cond, depth + 1, out);
                self.dump_node(*body, depth + 1, out);
            }
            NodeKind::While { cond, body } => {
                out.push_str(&format!("{}WHILE\n", pad));
                self.dump_expr(*cond, depth + 1, out);
                self.dump_node(*body, depth + 1, out);
            }
            NodeKind::For {
                init,
                cond,
                incr,
                body,
            } => {
                out.push_str(&format!("{}FOR\n", pad));
                if let Some(init) = init {
                    self.dump_expr(*init, depth + 1, out);
                }
                self.dump_expr(*cond, depth + 1, out);
                if let Some(incr) = incr {
                    self.dump_expr(*incr, depth + 1, out);
                }
                self.dump_node(*body, depth + 1, out);
            }
            NodeKind::Function {
                name,
                args,
                return_type,
                special_ret,
                body,
                ..
            } => {
                let arg_names: Vec<&str> = args.iter().map(|d| d.name.as_str()).collect();
                let ret = return_type
                    .as_ref()
                    .map(|dt| dt.to_string())
                    .unwrap_or_else(|| "void".to_string());
                out.push_str(&format!(
                    "{}FUNCTION {}({}) -> {}\n",
                    pad,
                    name,
                    arg_names.join(", "),
                    ret
                ));
                if let Some(expr) = special_ret {
                    self.dump_expr(*expr, depth + 1, out);
                }
                if let Some(body) = body {
                    self.dump_node(*body, depth + 1, out);
                }
            }
            NodeKind::Expression(expr) => {
                out.push_str(&format!("{}STMT\n", pad));
                self.dump_expr(*expr, depth + 1, out);
            }
            NodeKind::Return(retval) => {
                out.push_str(&format!("{}RETURN\n", pad));
                if let Some(expr) = retval {
                    self.dump_expr(*expr, depth + 1, out);
                }
            }
            NodeKind::Continue => {
                out.push_str(&format!("{}CONTINUE\n", pad));
            }
        }
    }

    fn dump_expr(&self, id: ExprId, depth: usize, out: &mut String) {
        let pad = "  ".repeat(depth);
        match &self.expr(id).kind {
            ExprKind::Int(v) => out.push_str(&format!("{}{}\n", pad, v)),
            ExprKind::Float(v) => out.push_str(&format!("{}{:?}\n", pad, v)),
            ExprKind::Ident(name) => out.push_str(&format!("{}{}\n", pad, name)),
            ExprKind::Unary { text, operand, .. } => {
                out.push_str(&format!("{}{}\n", pad, text));
                self.dump_expr(*operand, depth + 1, out);
            }
            ExprKind::Binary { text, lhs, rhs, .. } => {
                out.push_str(&format!("{}{}\n", pad, text));
                self.dump_expr(*lhs, depth + 1, out);
                self.dump_expr(*rhs, depth + 1, out);
            }
            ExprKind::Index { array, index } => {
                out.push_str(&format!("{}IDX\n", pad));
                self.dump_expr(*array, depth + 1, out);
                self.dump_expr(*index, depth + 1, out);
            }
            ExprKind::Call { callee, args } => {
                out.push_str(&format!("{}CALL\n", pad));
                self.dump_expr(*callee, depth + 1, out);
                if let Some(args) = args {
                    self.dump_expr(*args, depth + 1, out);
                }
            }
            ExprKind::New { dt, dims } => {
                out.push_str(&format!("{}NEW {}\n", pad, dt));
                for dim in dims {
                    self.dump_expr(*dim, depth + 1, out);
                }
            }
        }
    }
}
