use std::collections::HashSet;
use std::rc::Rc;

use super::error::SourceText;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "** or pow()",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
    Star(Expr),
    DoubleStar(Expr),
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Expr,
        conversion: Option<char>,
        spec: String,
    },
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    FString(Vec<FStringPart>),
    Bool(bool),
    NoneLit,
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOp, Expr)>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Rc<FunctionDef>),
    ListComp {
        elt: Box<Expr>,
        target: Box<Expr>,
        iter: Box<Expr>,
        conds: Vec<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize, col: usize) -> Self {
        Self { kind, line, col }
    }

    /// Short description used in "cannot assign to ..." messages.
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::NoneLit => "literal",
            ExprKind::FString(_) => "f-string expression",
            ExprKind::Call { .. } => "function call",
            ExprKind::Lambda(_) => "lambda",
            ExprKind::Compare { .. } => "comparison",
            ExprKind::IfExp { .. } => "conditional expression",
            ExprKind::Dict(_) => "dict literal",
            ExprKind::ListComp { .. } => "list comprehension",
            _ => "expression",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Normal,
    VarArgs,
    KwArgs,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ExceptHandler {
    pub typ: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    FunctionDef(Rc<FunctionDef>),
    Return(Option<Expr>),
    Raise(Option<Expr>),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Global(Vec<String>),
    Del(Vec<Expr>),
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Import(Vec<(String, Option<String>)>),
    ImportFrom {
        module: String,
        names: Vec<(String, Option<String>)>,
    },
    Break,
    Continue,
    Pass,
}

/// A `def` or `lambda`. The set of local names is fixed here, when the
/// body is parsed, and never changes at run time.
#[derive(Debug)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub line: usize,
    pub source: Rc<SourceText>,
    pub locals: HashSet<String>,
    pub globals: HashSet<String>,
}

impl FunctionDef {
    pub fn new(
        name: String,
        params: Vec<Param>,
        body: Vec<Stmt>,
        line: usize,
        source: Rc<SourceText>,
    ) -> Self {
        let mut globals = HashSet::new();
        let mut locals: HashSet<String> = params.iter().map(|p| p.name.clone()).collect();
        collect_bindings(&body, &mut locals, &mut globals);
        locals.retain(|name| !globals.contains(name));
        Self {
            name,
            params,
            body,
            line,
            source,
            locals,
            globals,
        }
    }
}

/// Names bound by a target expression, in order.
pub fn target_names(target: &Expr, out: &mut Vec<String>) {
    match &target.kind {
        ExprKind::Name(name) => out.push(name.clone()),
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                target_names(item, out);
            }
        }
        _ => {}
    }
}

fn bind_target(target: &Expr, locals: &mut HashSet<String>) {
    let mut names = Vec::new();
    target_names(target, &mut names);
    locals.extend(names);
}

fn collect_bindings(body: &[Stmt], locals: &mut HashSet<String>, globals: &mut HashSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    bind_target(target, locals);
                }
            }
            StmtKind::AugAssign { target, .. } => bind_target(target, locals),
            StmtKind::Del(targets) => {
                for target in targets {
                    bind_target(target, locals);
                }
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                bind_target(target, locals);
                collect_bindings(body, locals, globals);
                collect_bindings(orelse, locals, globals);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                collect_bindings(body, locals, globals);
                collect_bindings(orelse, locals, globals);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_bindings(body, locals, globals);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        locals.insert(name.clone());
                    }
                    collect_bindings(&handler.body, locals, globals);
                }
                collect_bindings(orelse, locals, globals);
                collect_bindings(finalbody, locals, globals);
            }
            StmtKind::FunctionDef(def) => {
                locals.insert(def.name.clone());
            }
            StmtKind::Import(names) => {
                for (module, alias) in names {
                    locals.insert(alias.clone().unwrap_or_else(|| module.clone()));
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for (name, alias) in names {
                    locals.insert(alias.clone().unwrap_or_else(|| name.clone()));
                }
            }
            StmtKind::Global(names) => globals.extend(names.iter().cloned()),
            _ => {}
        }
    }
}
