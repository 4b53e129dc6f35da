//! Parser for Spyre source: token stream to AST.
//!
//! Statements are parsed by recursive dispatch; expressions go through a
//! two-phase shunting-yard pass (infix to postfix, then postfix folded into
//! a tree). Subexpressions with a natural terminator (`)`, `]`, `;`) are
//! bounded by a *mark*: before parsing, the matching terminator is located
//! with a forward scan and expression parsing consumes tokens up to it.

use crate::ast::{AstNode, ExprId, ExprKind, ExprNode, LeafSide, Module, NodeId, NodeKind};
use crate::types::{Builtins, Datatype, Declaration, FunctionDescriptor, StructInfo};
use spyre_core::lexer::{self, Token, TokenKind, op};
use std::path::Path;

/// Associativity of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
}

/// Operand count of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Unary,
    Binary,
}

#[derive(Debug, Clone, Copy)]
pub struct OperatorDesc {
    pub prec: u8,
    pub assoc: Assoc,
    pub arity: Arity,
}

const fn desc(prec: u8, assoc: Assoc, arity: Arity) -> OperatorDesc {
    OperatorDesc { prec, assoc, arity }
}

/// Precedence/associativity/arity for every operator code that may appear
/// inside an expression. Codes not listed here (`(`, `)`, `[`, `]`, `;`,
/// `:`) are structural and handled separately by the expression parser.
pub fn operator_desc(code: u8) -> Option<OperatorDesc> {
    use Arity::*;
    use Assoc::*;
    match code {
        b',' => Some(desc(1, Left, Binary)),
        b'=' | op::ADD_BY | op::SUB_BY | op::MUL_BY | op::DIV_BY | op::MOD_BY | op::SHL_BY
        | op::SHR_BY | op::AND_BY | op::OR_BY | op::XOR_BY => Some(desc(2, Right, Binary)),
        op::LOG_AND | op::LOG_OR => Some(desc(3, Left, Binary)),
        op::EQ | op::NEQ => Some(desc(4, Left, Binary)),
        b'>' | b'<' | op::GE | op::LE => Some(desc(6, Left, Binary)),
        b'|' | b'&' | b'^' | op::SHL | op::SHR => Some(desc(7, Left, Binary)),
        b'+' | b'-' => Some(desc(8, Left, Binary)),
        b'*' | b'/' | b'%' => Some(desc(9, Left, Binary)),
        b'!' | b'@' | b'$' => Some(desc(10, Right, Unary)),
        op::INC | op::DEC => Some(desc(11, Left, Unary)),
        op::CALL | op::INDEX => Some(desc(11, Left, Unary)),
        b'.' => Some(desc(11, Left, Binary)),
        _ => None,
    }
}

/// Work item during shunting yard: either a finished leaf/subtree or a
/// pending operator waiting for its operands.
#[derive(Debug, Clone)]
enum PfItem {
    Leaf(ExprId),
    Unary { op: u8, text: String, line: usize },
    Binary { op: u8, text: String, line: usize },
    Index { index: ExprId, line: usize },
    Call { args: Option<ExprId>, line: usize },
    /// Open-parenthesis sentinel on the operator stack.
    Paren,
}

fn item_desc(item: &PfItem) -> Option<OperatorDesc> {
    match item {
        PfItem::Unary { op, .. } | PfItem::Binary { op, .. } => operator_desc(*op),
        PfItem::Index { .. } => operator_desc(op::INDEX),
        PfItem::Call { .. } => operator_desc(op::CALL),
        _ => None,
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Index of the token terminating the current subexpression.
    mark: usize,
    module: Module,
    builtins: Builtins,
}

/// Parse a lexed token stream into a module.
pub fn parse_tokens(tokens: Vec<Token>, filename: &str) -> Result<Module, String> {
    Parser::new(tokens, filename).run()
}

/// Lex and parse in-memory source.
pub fn parse_source(source: &str, filename: &str) -> Result<Module, String> {
    parse_tokens(lexer::lex_source(source, filename)?, filename)
}

/// Lex and parse a file.
pub fn parse_file(path: &Path) -> Result<Module, String> {
    let filename = path.display().to_string();
    parse_tokens(lexer::lex_file(path)?, &filename)
}

impl Parser {
    pub fn new(tokens: Vec<Token>, filename: &str) -> Self {
        Parser {
            tokens,
            pos: 0,
            mark: 0,
            module: Module::new(filename),
            builtins: Builtins::new(),
        }
    }

    fn err(&self, message: &str) -> String {
        let line = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| t.line)
            .unwrap_or(0);
        format!(
            "parse error: {} (line {}, file {})",
            message, line, self.module.filename
        )
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_text(&self) -> &str {
        self.current().map(|t| t.text.as_str()).unwrap_or("<eof>")
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn on(&self, text: &str) -> bool {
        self.current().is_some_and(|t| t == &text)
    }

    fn peek_is(&self, n: usize, text: &str) -> bool {
        self.tokens.get(self.pos + n).is_some_and(|t| t == &text)
    }

    fn on_identifier(&self) -> bool {
        self.current()
            .is_some_and(|t| matches!(t.kind, TokenKind::Identifier))
    }

    /// Require and consume an exact token.
    fn eat(&mut self, text: &str) -> Result<(), String> {
        if !self.on(text) {
            return Err(self.err(&format!(
                "expected token '{}', got '{}'",
                text,
                self.current_text()
            )));
        }
        self.pos += 1;
        Ok(())
    }

    /// Consume one token; it is an error to run out of input here.
    fn safe_eat(&mut self) -> Result<(), String> {
        self.pos += 1;
        if self.at_end() {
            return Err(self.err("unexpected EOF"));
        }
        Ok(())
    }

    // ===== marks =====

    /// Locate the terminator of the current subexpression: scan forward for
    /// the `end` operator, counting `inc`/`end` pairs so nested brackets are
    /// skipped. `inc` of zero disables depth tracking (used when scanning
    /// for `;`).
    fn mark_operator(&mut self, inc: u8, end: u8) -> Result<(), String> {
        let mut depth = 0usize;
        for i in self.pos..self.tokens.len() {
            let Some(code) = self.tokens[i].operator_code() else {
                continue;
            };
            if inc != op::NULL && code == inc {
                depth += 1;
            } else if code == end {
                if depth == 0 {
                    self.mark = i;
                    return Ok(());
                }
                depth -= 1;
            }
        }
        Err(self.err("unexpected EOF while parsing expression"))
    }

    // ===== expressions =====

    /// Parse the tokens up to the current mark into an expression tree.
    fn parse_expression(&mut self) -> Result<ExprId, String> {
        let mut operators: Vec<PfItem> = Vec::new();
        let mut postfix: Vec<PfItem> = Vec::new();
        let mut prev_was_identifier = false;

        // Phase one: shunting yard, infix to postfix.
        while self.pos < self.mark {
            let tok = self.tokens[self.pos].clone();
            let mut now_identifier = false;
            match &tok.kind {
                TokenKind::Integer(v) => {
                    let id = self.module.add_expr(ExprNode::new(ExprKind::Int(*v), tok.line));
                    postfix.push(PfItem::Leaf(id));
                    self.safe_eat()?;
                }
                TokenKind::CharLit(v) => {
                    // A character literal is just an integer.
                    let id = self.module.add_expr(ExprNode::new(ExprKind::Int(*v), tok.line));
                    postfix.push(PfItem::Leaf(id));
                    self.safe_eat()?;
                }
                TokenKind::Float(v) => {
                    let id = self
                        .module
                        .add_expr(ExprNode::new(ExprKind::Float(*v), tok.line));
                    postfix.push(PfItem::Leaf(id));
                    self.safe_eat()?;
                }
                TokenKind::Identifier if tok.text == "new" => {
                    self.safe_eat()?;
                    let oldmark = self.mark;
                    let id = self.parse_new_expression()?;
                    self.mark = oldmark;
                    postfix.push(PfItem::Leaf(id));
                }
                TokenKind::Identifier => {
                    let id = self
                        .module
                        .add_expr(ExprNode::new(ExprKind::Ident(tok.text.clone()), tok.line));
                    postfix.push(PfItem::Leaf(id));
                    now_identifier = true;
                    self.safe_eat()?;
                }
                TokenKind::Operator(code) => {
                    let code = *code;
                    if let Some(opinfo) = operator_desc(code) {
                        Self::shunting_pops(&mut postfix, &mut operators, &opinfo);
                        let item = match opinfo.arity {
                            Arity::Binary => PfItem::Binary {
                                op: code,
                                text: tok.text.clone(),
                                line: tok.line,
                            },
                            Arity::Unary => PfItem::Unary {
                                op: code,
                                text: tok.text.clone(),
                                line: tok.line,
                            },
                        };
                        operators.push(item);
                        self.safe_eat()?;
                    } else if code == b'(' && prev_was_identifier {
                        // A call: recursively parse the argument expression
                        // with its own mark.
                        let oldmark = self.mark;
                        self.safe_eat()?;
                        let args = if self.on(")") {
                            None
                        } else {
                            self.mark_operator(b'(', b')')?;
                            Some(self.parse_expression()?)
                        };
                        self.mark = oldmark;
                        let opinfo = operator_desc(op::CALL).unwrap();
                        Self::shunting_pops(&mut postfix, &mut operators, &opinfo);
                        operators.push(PfItem::Call {
                            args,
                            line: tok.line,
                        });
                        self.safe_eat()?;
                    } else if code == b'[' {
                        let oldmark = self.mark;
                        self.safe_eat()?;
                        self.mark_operator(b'[', b']')?;
                        let index = self.parse_expression()?;
                        self.mark = oldmark;
                        let opinfo = operator_desc(op::INDEX).unwrap();
                        Self::shunting_pops(&mut postfix, &mut operators, &opinfo);
                        operators.push(PfItem::Index {
                            index,
                            line: tok.line,
                        });
                        self.safe_eat()?;
                    } else if code == b'(' {
                        operators.push(PfItem::Paren);
                        self.safe_eat()?;
                    } else if code == b')' {
                        loop {
                            match operators.last() {
                                None => {
                                    return Err(self.err("unexpected closing parenthesis ')'"));
                                }
                                Some(PfItem::Paren) => break,
                                Some(_) => postfix.push(operators.pop().unwrap()),
                            }
                        }
                        operators.pop();
                        self.safe_eat()?;
                    } else {
                        return Err(
                            self.err(&format!("unknown operator '{}' in expression", tok.text))
                        );
                    }
                }
                _ => {
                    return Err(self.err(&format!(
                        "unexpected token '{}' when parsing expression",
                        tok.text
                    )));
                }
            }
            prev_was_identifier = now_identifier;
        }

        // Empty the remaining operator stack into postfix.
        while let Some(item) = operators.pop() {
            if matches!(item, PfItem::Paren) {
                return Err(self.err("mismatched parenthesis in expression"));
            }
            postfix.push(item);
        }

        self.fold_postfix(postfix)
    }

    /// Pop operators bound more tightly than `opinfo` from the operator
    /// stack into the postfix output, stopping at an open parenthesis.
    fn shunting_pops(postfix: &mut Vec<PfItem>, operators: &mut Vec<PfItem>, opinfo: &OperatorDesc) {
        while let Some(top) = operators.last() {
            if matches!(top, PfItem::Paren) {
                break;
            }
            let top_desc = item_desc(top).expect("operator stack holds only operators");
            let stop = match opinfo.assoc {
                Assoc::Left => opinfo.prec > top_desc.prec,
                Assoc::Right => opinfo.prec >= top_desc.prec,
            };
            if stop {
                break;
            }
            postfix.push(operators.pop().unwrap());
        }
    }

    /// Phase two: fold the postfix sequence into a single expression tree,
    /// pairing each operator with its operands and setting parent links and
    /// leaf sides.
    fn fold_postfix(&mut self, postfix: Vec<PfItem>) -> Result<ExprId, String> {
        const MALFORMED: &str = "malformed expression";
        let mut tree: Vec<ExprId> = Vec::new();

        for item in postfix {
            match item {
                PfItem::Leaf(id) => tree.push(id),
                PfItem::Unary { op, text, line } => {
                    let operand = tree.pop().ok_or_else(|| self.err(MALFORMED))?;
                    let id = self
                        .module
                        .add_expr(ExprNode::new(ExprKind::Unary { op, text, operand }, line));
                    self.module.expr_mut(operand).parent = Some(id);
                    tree.push(id);
                }
                PfItem::Binary { op, text, line } => {
                    let rhs = tree.pop().ok_or_else(|| self.err(MALFORMED))?;
                    let lhs = tree.pop().ok_or_else(|| self.err(MALFORMED))?;
                    let id = self.module.add_expr(ExprNode::new(
                        ExprKind::Binary { op, text, lhs, rhs },
                        line,
                    ));
                    let lhs_node = self.module.expr_mut(lhs);
                    lhs_node.parent = Some(id);
                    lhs_node.leaf = LeafSide::Left;
                    let rhs_node = self.module.expr_mut(rhs);
                    rhs_node.parent = Some(id);
                    rhs_node.leaf = LeafSide::Right;
                    tree.push(id);
                }
                PfItem::Index { index, line } => {
                    let array = tree.pop().ok_or_else(|| self.err(MALFORMED))?;
                    let id = self
                        .module
                        .add_expr(ExprNode::new(ExprKind::Index { array, index }, line));
                    self.module.expr_mut(array).parent = Some(id);
                    self.module.expr_mut(index).parent = Some(id);
                    tree.push(id);
                }
                PfItem::Call { args, line } => {
                    let callee = tree.pop().ok_or_else(|| self.err(MALFORMED))?;
                    let id = self
                        .module
                        .add_expr(ExprNode::new(ExprKind::Call { callee, args }, line));
                    self.module.expr_mut(callee).parent = Some(id);
                    if let Some(args) = args {
                        self.module.expr_mut(args).parent = Some(id);
                    }
                    tree.push(id);
                }
                PfItem::Paren => unreachable!("parens drained before folding"),
            }
        }

        let root = tree.pop().ok_or_else(|| self.err(MALFORMED))?;
        if !tree.is_empty() {
            return Err(self.err("an expression may only have one result"));
        }
        Ok(root)
    }

    /// `new TYPE[d0][d1]...` inside an expression. Dimension expressions
    /// get the `new` node as their parent so name resolution can climb out
    /// of them.
    fn parse_new_expression(&mut self) -> Result<ExprId, String> {
        let line = self.current().map(|t| t.line).unwrap_or(0);
        if !self.on_identifier() {
            return Err(self.err(&format!(
                "expected typename after 'new', got '{}'",
                self.current_text()
            )));
        }
        let type_name = self.current_text().to_string();
        let dt = self
            .datatype_from_name(&type_name)
            .ok_or_else(|| self.err(&format!("unknown typename '{}'", type_name)))?;
        self.safe_eat()?;

        let mut dims: Vec<ExprId> = Vec::new();
        while self.on("[") {
            self.safe_eat()?;
            if self.on("]") {
                return Err(self.err("expected array length following token '['"));
            }
            self.mark_operator(b'[', b']')?;
            dims.push(self.parse_expression()?);
            self.eat("]")?;
        }

        let id = self
            .module
            .add_expr(ExprNode::new(ExprKind::New { dt, dims: dims.clone() }, line));
        for dim in dims {
            self.module.expr_mut(dim).parent = Some(id);
        }
        Ok(id)
    }

    // ===== datatypes and declarations =====

    fn datatype_from_name(&self, name: &str) -> Option<Datatype> {
        if let Some(builtin) = self.builtins.by_name(name) {
            return Some(builtin.clone());
        }
        if self.module.usertypes.contains_key(name) {
            return Some(Datatype::struct_ref(name));
        }
        None
    }

    /// `TYPE ('[' ']')*`
    fn parse_datatype(&mut self) -> Result<Datatype, String> {
        if !self.on_identifier() {
            return Err(self.err(&format!(
                "expected typename, got '{}'",
                self.current_text()
            )));
        }
        let name = self.current_text().to_string();
        let mut dt = self
            .datatype_from_name(&name)
            .ok_or_else(|| self.err(&format!("unknown typename '{}'", name)))?;
        self.pos += 1;
        while self.on("[") {
            self.eat("[")?;
            self.eat("]")?;
            dt.arrdim += 1;
        }
        Ok(dt)
    }

    /// `name: TYPE`
    fn parse_declaration(&mut self) -> Result<Declaration, String> {
        if !self.on_identifier() {
            return Err(self.err(&format!(
                "expected identifier in declaration, got '{}'",
                self.current_text()
            )));
        }
        let name = self.current_text().to_string();
        self.safe_eat()?;
        self.eat(":")?;
        let dt = self.parse_datatype()?;
        Ok(Declaration::new(&name, dt))
    }

    // ===== statements =====

    fn run(mut self) -> Result<Module, String> {
        while !self.at_end() {
            if let Some(child) = self.parse_statement(self.module.root, false)? {
                let root = self.module.root;
                if let NodeKind::Block { children, .. } = &mut self.module.node_mut(root).kind {
                    children.push(child);
                }
            }
        }
        Ok(self.module)
    }

    /// Parse one statement. Returns `None` for constructs that only touch
    /// registries or the enclosing block (struct definitions, cfunc
    /// declarations, variable declarations, empty statements).
    fn parse_statement(&mut self, block: NodeId, in_func: bool) -> Result<Option<NodeId>, String> {
        if self.on("if") {
            return self.parse_if(block, in_func).map(Some);
        }
        if self.on("while") {
            return self.parse_while(block, in_func).map(Some);
        }
        if self.on("for") {
            return self.parse_for(block, in_func).map(Some);
        }
        if self.on("return") {
            return self.parse_return(block).map(Some);
        }
        if self.on("continue") {
            self.eat("continue")?;
            self.eat(";")?;
            return Ok(Some(self.module.add_node(AstNode {
                kind: NodeKind::Continue,
                parent: Some(block),
            })));
        }
        if self.on("func") {
            return self.parse_function(block, in_func).map(Some);
        }
        if self.on("cfunc") {
            self.parse_cfunction(in_func)?;
            return Ok(None);
        }
        if self.on("{") {
            return self.parse_block(block, in_func).map(Some);
        }
        if self.on("}") {
            return Err(self.err("unexpected '}' closing a block that doesn't exist"));
        }
        if self.on_identifier() && self.peek_is(1, ":") && self.peek_is(2, "struct") {
            self.parse_struct()?;
            return Ok(None);
        }
        if self.on_identifier() && self.peek_is(1, ":") {
            let decl = self.parse_declaration()?;
            self.eat(";")?;
            if let NodeKind::Block { locals, .. } = &mut self.module.node_mut(block).kind {
                locals.push(decl);
            } else {
                return Err(self.err("variable declarations can only exist inside of a block"));
            }
            return Ok(None);
        }
        self.parse_expression_statement(block)
    }

    /// The single statement or block attached to `if`/`while`/`for`.
    fn parse_body(&mut self, block: NodeId, in_func: bool, after: &str) -> Result<NodeId, String> {
        let child = self.parse_statement(block, in_func)?;
        let Some(child) = child else {
            return Err(self.err(&format!(
                "only a statement or block may follow {}",
                after
            )));
        };
        match self.module.node(child).kind {
            NodeKind::Block { .. }
            | NodeKind::Expression(_)
            | NodeKind::Return(_)
            | NodeKind::Continue => Ok(child),
            _ => Err(self.err(&format!(
                "only a statement or block may follow {}",
                after
            ))),
        }
    }

    fn parse_block(&mut self, parent: NodeId, in_func: bool) -> Result<NodeId, String> {
        self.eat("{")?;
        let block = self.module.add_node(AstNode {
            kind: NodeKind::Block {
                children: Vec::new(),
                locals: Vec::new(),
            },
            parent: Some(parent),
        });
        loop {
            if self.at_end() {
                return Err(self.err("unexpected EOF inside of a block"));
            }
            if self.on("}") {
                self.pos += 1;
                break;
            }
            if let Some(child) = self.parse_statement(block, in_func)? {
                if let NodeKind::Block { children, .. } = &mut self.module.node_mut(block).kind {
                    children.push(child);
                }
            }
        }
        Ok(block)
    }

    fn parse_if(&mut self, block: NodeId, in_func: bool) -> Result<NodeId, String> {
        self.eat("if")?;
        self.eat("(")?;
        self.mark_operator(b'(', b')')?;
        let cond = self.parse_expression()?;
        self.eat(")")?;
        let body = self.parse_body(block, in_func, "an if-conditional")?;
        let node = self.module.add_node(AstNode {
            kind: NodeKind::If { cond, body },
            parent: Some(block),
        });
        self.module.node_mut(body).parent = Some(node);
        self.module.expr_mut(cond).stmt = Some(node);
        Ok(node)
    }

    fn parse_while(&mut self, block: NodeId, in_func: bool) -> Result<NodeId, String> {
        self.eat("while")?;
        self.eat("(")?;
        self.mark_operator(b'(', b')')?;
        let cond = self.parse_expression()?;
        self.eat(")")?;
        let body = self.parse_body(block, in_func, "a while-loop")?;
        let node = self.module.add_node(AstNode {
            kind: NodeKind::While { cond, body },
            parent: Some(block),
        });
        self.module.node_mut(body).parent = Some(node);
        self.module.expr_mut(cond).stmt = Some(node);
        Ok(node)
    }

    fn parse_for(&mut self, block: NodeId, in_func: bool) -> Result<NodeId, String> {
        self.eat("for")?;
        self.eat("(")?;
        let init = if self.on(";") {
            None
        } else {
            self.mark_operator(op::NULL, b';')?;
            Some(self.parse_expression()?)
        };
        self.eat(";")?;
        self.mark_operator(op::NULL, b';')?;
        let cond = self.parse_expression()?;
        self.eat(";")?;
        let incr = if self.on(")") {
            None
        } else {
            self.mark_operator(b'(', b')')?;
            Some(self.parse_expression()?)
        };
        self.eat(")")?;
        let body = self.parse_body(block, in_func, "a for-loop")?;
        let node = self.module.add_node(AstNode {
            kind: NodeKind::For {
                init,
                cond,
                incr,
                body,
            },
            parent: Some(block),
        });
        self.module.node_mut(body).parent = Some(node);
        for expr in [Some(cond), init, incr].into_iter().flatten() {
            self.module.expr_mut(expr).stmt = Some(node);
        }
        Ok(node)
    }

    fn parse_return(&mut self, block: NodeId) -> Result<NodeId, String> {
        self.eat("return")?;
        let retval = if self.on(";") {
            self.pos += 1;
            None
        } else {
            self.mark_operator(op::NULL, b';')?;
            let e = self.parse_expression()?;
            self.eat(";")?;
            Some(e)
        };
        let node = self.module.add_node(AstNode {
            kind: NodeKind::Return(retval),
            parent: Some(block),
        });
        if let Some(e) = retval {
            self.module.expr_mut(e).stmt = Some(node);
        }
        Ok(node)
    }

    fn parse_expression_statement(&mut self, block: NodeId) -> Result<Option<NodeId>, String> {
        if self.on(";") {
            self.pos += 1;
            return Ok(None);
        }
        self.mark_operator(op::NULL, b';')?;
        let expr = self.parse_expression()?;
        self.eat(";")?;
        let node = self.module.add_node(AstNode {
            kind: NodeKind::Expression(expr),
            parent: Some(block),
        });
        self.module.expr_mut(expr).stmt = Some(node);
        Ok(Some(node))
    }

    /// `name(arg0: T, arg1: T, ...) -> T|void`, shared by `func` and
    /// `cfunc`.
    fn parse_function_header(&mut self) -> Result<(String, Vec<Declaration>, Datatype), String> {
        if !self.on_identifier() {
            return Err(self.err("expected function identifier"));
        }
        let name = self.current_text().to_string();
        self.safe_eat()?;
        self.eat("(")?;

        let mut args: Vec<Declaration> = Vec::new();
        while !self.on(")") {
            let arg = self.parse_declaration()?;
            if !self.on(")") && !self.on(",") {
                return Err(self.err(&format!(
                    "expected ')' or ',' to follow function argument, got '{}'",
                    self.current_text()
                )));
            }
            if self.on(",") {
                self.safe_eat()?;
            }
            args.push(arg);
        }
        self.eat(")")?;
        self.eat("->")?;

        // 'void' is only meaningful here, as a function return type.
        let return_type = if self.on("void") {
            self.pos += 1;
            None
        } else {
            Some(self.parse_datatype()?)
        };

        let nargs = args.len();
        let dt = Datatype::function(FunctionDescriptor {
            arguments: args.clone(),
            return_type,
            nargs,
        });
        Ok((name, args, dt))
    }

    /// `func name(args) -> T { ... }` or `func name(args) -> T = expr;`
    fn parse_function(&mut self, block: NodeId, in_func: bool) -> Result<NodeId, String> {
        if in_func {
            return Err(self.err("functions within functions are not permitted"));
        }
        self.eat("func")?;
        let (name, args, dt) = self.parse_function_header()?;

        if self.module.functions.contains_key(&name) || self.module.cfunctions.contains_key(&name) {
            return Err(self.err(&format!("redeclaration of function '{}'", name)));
        }

        let return_type = dt
            .function_descriptor()
            .and_then(|d| d.return_type.clone());
        let node = self.module.add_node(AstNode {
            kind: NodeKind::Function {
                name: name.clone(),
                args,
                return_type,
                special_ret: None,
                body: None,
                stack_space: 0,
            },
            parent: Some(block),
        });

        // Register before the body parses so the function can call itself.
        self.module
            .functions
            .insert(&name, Declaration::new(&name, dt));

        if self.on("=") {
            self.eat("=")?;
            self.mark_operator(op::NULL, b';')?;
            let expr = self.parse_expression()?;
            self.eat(";")?;
            self.module.expr_mut(expr).stmt = Some(node);
            if let NodeKind::Function { special_ret, .. } = &mut self.module.node_mut(node).kind {
                *special_ret = Some(expr);
            }
        } else if self.on("{") {
            let body = self.parse_block(node, true)?;
            if let NodeKind::Function { body: slot, .. } = &mut self.module.node_mut(node).kind {
                *slot = Some(body);
            }
        } else {
            return Err(self.err(&format!(
                "expected function body, got '{}'",
                self.current_text()
            )));
        }
        Ok(node)
    }

    /// `cfunc name(args) -> T;` declares the signature of a native binding.
    fn parse_cfunction(&mut self, in_func: bool) -> Result<(), String> {
        if in_func {
            return Err(self.err("c functions must be declared in the global scope"));
        }
        self.eat("cfunc")?;
        let (name, _args, dt) = self.parse_function_header()?;
        if self.module.functions.contains_key(&name) || self.module.cfunctions.contains_key(&name) {
            return Err(self.err(&format!("redeclaration of function '{}'", name)));
        }
        self.eat(";")?;
        self.module
            .cfunctions
            .insert(&name, Declaration::new(&name, dt));
        Ok(())
    }

    /// `name: struct { member: T; ... }`. The type is registered before its
    /// members parse so members may reference the struct itself.
    fn parse_struct(&mut self) -> Result<(), String> {
        let name = self.current_text().to_string();
        if self.module.usertypes.contains_key(&name) {
            return Err(self.err(&format!("redeclaration of type '{}'", name)));
        }
        self.module.usertypes.insert(&name, StructInfo::new(&name));
        self.safe_eat()?;
        self.eat(":")?;
        self.eat("struct")?;
        self.eat("{")?;

        let mut index = 0usize;
        while !self.on("}") {
            if self.at_end() {
                return Err(self.err(&format!("unexpected EOF in struct '{}'", name)));
            }
            let mut member = self.parse_declaration()?;
            self.eat(";")?;
            let duplicate = self
                .module
                .usertypes
                .get(&name)
                .is_some_and(|info| info.members.contains_key(&member.name));
            if duplicate {
                return Err(self.err(&format!(
                    "duplicate member '{}' in struct '{}'",
                    member.name, name
                )));
            }
            member.index = index;
            index += 1;
            let member_name = member.name.clone();
            let info = self.module.usertypes.get_mut(&name).unwrap();
            info.members.insert(&member_name, member);
            info.nmembers = index;
        }
        self.eat("}")?;
        Ok(())
    }
}
