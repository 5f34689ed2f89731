use std::rc::Rc;

/// Binary operators other than the short-circuiting `and`/`or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/` (floor division on integers)
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl BinaryOp {
    /// Source spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical negation.
    Not,
}

/// Expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `nil`
    Nil,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    Str(String),
    /// List display `[a, b]`.
    List(Vec<Expr>),
    /// Variable reference.
    Name(String),
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Short-circuit `and`.
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit `or`.
    Or(Box<Expr>, Box<Expr>),
    /// Call `callee(args)`.
    Call(Box<Expr>, Vec<Expr>),
    /// Subscript `target[index]`.
    Index(Box<Expr>, Box<Expr>),
    /// Field access `target.name`.
    Field(Box<Expr>, String),
}

impl Expr {
    /// Number of levels in the expression tree; a literal or name is 1.
    pub fn height(&self) -> usize {
        let mut deepest = 0;
        let mut pending: Vec<(&Expr, usize)> = vec![(self, 1)];
        while let Some((expr, level)) = pending.pop() {
            deepest = deepest.max(level);
            let below = level + 1;
            match expr {
                Expr::Nil
                | Expr::Bool(_)
                | Expr::Int(_)
                | Expr::Float(_)
                | Expr::Str(_)
                | Expr::Name(_) => {}
                Expr::List(items) => pending.extend(items.iter().map(|item| (item, below))),
                Expr::Unary(_, operand) | Expr::Field(operand, _) => {
                    pending.push((&**operand, below))
                }
                Expr::Binary(_, lhs, rhs)
                | Expr::And(lhs, rhs)
                | Expr::Or(lhs, rhs)
                | Expr::Index(lhs, rhs) => {
                    pending.push((&**lhs, below));
                    pending.push((&**rhs, below));
                }
                Expr::Call(callee, args) => {
                    pending.push((&**callee, below));
                    pending.extend(args.iter().map(|arg| (arg, below)));
                }
            }
        }
        deepest
    }
}

/// One step of an assignment path below its root variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    /// `[expr]`
    Index(Expr),
    /// `.name`
    Field(String),
}

/// Assignment target: a variable, optionally followed by subscripts and
/// field accesses (`xs[0].name = ...`).
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Variable the path starts from.
    pub root: String,
    /// Accessors applied in order.
    pub path: Vec<Accessor>,
}

/// Function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    /// Function name.
    pub name: String,
    /// Parameter names.
    pub params: Vec<String>,
    /// Function body.
    pub body: Vec<Stmt>,
}

/// Statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Expression evaluated for its value or effect.
    Expr(Expr),
    /// Assignment.
    Assign(Target, Expr),
    /// Conditional.
    If {
        /// Condition.
        cond: Expr,
        /// Taken branch.
        then: Vec<Stmt>,
        /// Optional `else` branch; `else if` nests another `If`.
        otherwise: Option<Vec<Stmt>>,
    },
    /// Loop.
    While {
        /// Condition checked before every iteration.
        cond: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `fn name(params) { ... }`
    FnDef(Rc<FnDecl>),
    /// `return [expr]`
    Return(Option<Expr>),
    /// `break`
    Break,
    /// `continue`
    Continue,
}

/// A parsed unit of input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Top-level statements.
    pub statements: Vec<Stmt>,
}
