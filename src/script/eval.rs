use super::ast::{Accessor, BinaryOp, Expr, FnDecl, Program, Stmt, Target, UnaryOp};
use super::value::{Native, Value};
use super::{Result, ScriptError, builtins, parse_program};
use crate::interrupt::InterruptFlag;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

/// Deepest permitted chain of nested function calls.
pub const MAX_CALL_DEPTH: usize = 200;

/// Deepest permitted nesting of statements and expressions under evaluation,
/// counted across calls.
pub const MAX_EVAL_DEPTH: usize = 2000;

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// What a built-in function may touch while it runs.
pub struct NativeContext<'a> {
    out: &'a mut dyn Write,
    interrupt: &'a InterruptFlag,
    globals: &'a HashMap<String, Value>,
}

impl NativeContext<'_> {
    /// Output stream of the current evaluation.
    pub fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    /// Global namespace, read-only.
    pub fn globals(&self) -> &HashMap<String, Value> {
        self.globals
    }

    /// Raise the interruption condition if an interrupt is pending.
    pub fn check_interrupt(&self) -> Result<()> {
        check(self.interrupt)
    }

    /// Sleep in short slices, stopping early on interrupt.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            return Err(ScriptError::Value(format!(
                "sleep length {} seconds is too large",
                duration.as_secs()
            )));
        };
        loop {
            self.check_interrupt()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// The interrupt flag, for built-ins that block outside the evaluator.
    pub fn interrupt(&self) -> &InterruptFlag {
        self.interrupt
    }
}

fn check(interrupt: &InterruptFlag) -> Result<()> {
    if interrupt.take() {
        Err(ScriptError::Interrupted)
    } else {
        Ok(())
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

#[derive(Default)]
struct Frame {
    locals: Option<HashMap<String, Value>>,
}

/// Tree-walking evaluator with a persistent global namespace.
pub struct Interpreter {
    globals: HashMap<String, Value>,
    interrupt: InterruptFlag,
    depth: usize,
    nesting: usize,
}

impl Interpreter {
    /// Fresh namespace containing only the built-in functions.
    pub fn new(interrupt: InterruptFlag) -> Self {
        let mut interpreter = Self {
            globals: HashMap::new(),
            interrupt,
            depth: 0,
            nesting: 0,
        };
        builtins::install(&mut interpreter);
        interpreter
    }

    /// Bind a global.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Read a global.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Bind a built-in function.
    pub fn define_native<F>(&mut self, name: &str, help: &str, func: F)
    where
        F: Fn(&mut NativeContext<'_>, Vec<Value>) -> Result<Value> + 'static,
    {
        let native = Native {
            name: name.to_string(),
            help: help.to_string(),
            func: Box::new(func),
        };
        self.set(name, Value::Native(Rc::new(native)));
    }

    /// Names bound by user code, sorted.
    pub fn user_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .globals
            .iter()
            .filter(|(_, value)| !matches!(value, Value::Native(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The flag checked at every statement, loop iteration and call.
    pub fn interrupt_flag(&self) -> &InterruptFlag {
        &self.interrupt
    }

    /// Parse and run `source`.
    pub fn eval_source(&mut self, source: &str, out: &mut dyn Write) -> Result<()> {
        let program = parse_program(source)?;
        self.run(&program, out)
    }

    /// Run a parsed program at top level. Expression statements whose value
    /// is not nil have their representation written to `out`.
    pub fn run(&mut self, program: &Program, out: &mut dyn Write) -> Result<()> {
        self.depth = 0;
        self.nesting = 0;
        let mut frame = Frame::default();
        for stmt in &program.statements {
            if let Stmt::Expr(expr) = stmt {
                check(&self.interrupt)?;
                let value = self.eval(expr, &mut frame, out)?;
                if !value.is_nil() {
                    writeln!(out, "{}", value.repr())?;
                }
            } else {
                self.exec(stmt, &mut frame, out)?;
            }
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt], frame: &mut Frame, out: &mut dyn Write) -> Result<Flow> {
        for stmt in stmts {
            match self.exec(stmt, frame, out)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn descend(&mut self) -> Result<()> {
        if self.nesting >= MAX_EVAL_DEPTH {
            return Err(ScriptError::Nesting(MAX_EVAL_DEPTH));
        }
        self.nesting += 1;
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt, frame: &mut Frame, out: &mut dyn Write) -> Result<Flow> {
        self.descend()?;
        let flow = self.exec_stmt(stmt, frame, out);
        self.nesting -= 1;
        flow
    }

    fn exec_stmt(&mut self, stmt: &Stmt, frame: &mut Frame, out: &mut dyn Write) -> Result<Flow> {
        check(&self.interrupt)?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, frame, out)?;
            }
            Stmt::Assign(target, expr) => {
                let value = self.eval(expr, frame, out)?;
                self.assign(target, value, frame, out)?;
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond, frame, out)?.truthy() {
                    return self.exec_block(then, frame, out);
                } else if let Some(otherwise) = otherwise {
                    return self.exec_block(otherwise, frame, out);
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, frame, out)?.truthy() {
                    check(&self.interrupt)?;
                    match self.exec_block(body, frame, out)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            Stmt::FnDef(decl) => {
                store(&mut self.globals, frame, &decl.name, Value::Function(Rc::clone(decl)));
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, frame, out)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn assign(
        &mut self,
        target: &Target,
        value: Value,
        frame: &mut Frame,
        out: &mut dyn Write,
    ) -> Result<()> {
        if target.path.is_empty() {
            store(&mut self.globals, frame, &target.root, value);
            return Ok(());
        }

        let mut keys = Vec::with_capacity(target.path.len());
        for accessor in &target.path {
            keys.push(match accessor {
                Accessor::Index(expr) => Key::Index(self.eval(expr, frame, out)?),
                Accessor::Field(name) => Key::Field(name),
            });
        }

        let local = frame
            .locals
            .as_mut()
            .and_then(|locals| locals.get_mut(&target.root));
        let mut slot = match local {
            Some(slot) => slot,
            None => self
                .globals
                .get_mut(&target.root)
                .ok_or_else(|| ScriptError::Name(target.root.clone()))?,
        };

        for key in keys {
            slot = match key {
                Key::Index(index) => match slot {
                    Value::List(items) => {
                        let i = resolve_index(&index, items.len())?;
                        &mut items[i]
                    }
                    other => {
                        return Err(ScriptError::Type(format!(
                            "'{}' object does not support item assignment",
                            other.type_name()
                        )));
                    }
                },
                Key::Field(name) => match slot {
                    Value::Record(record) => {
                        let type_name = record.name.clone();
                        record
                            .get_mut(name)
                            .ok_or_else(|| no_attribute(&type_name, name))?
                    }
                    other => return Err(no_attribute(other.type_name(), name)),
                },
            };
        }
        *slot = value;
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, frame: &mut Frame, out: &mut dyn Write) -> Result<Value> {
        self.descend()?;
        let value = self.eval_expr(expr, frame, out);
        self.nesting -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr, frame: &mut Frame, out: &mut dyn Write) -> Result<Value> {
        Ok(match expr {
            Expr::Nil => Value::Nil,
            Expr::Bool(flag) => Value::Bool(*flag),
            Expr::Int(value) => Value::Int(*value),
            Expr::Float(value) => Value::Float(*value),
            Expr::Str(text) => Value::Str(text.clone()),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, frame, out)?);
                }
                Value::List(values)
            }
            Expr::Name(name) => self.lookup(name, frame)?,
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, frame, out)?;
                unary(*op, value)?
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, frame, out)?;
                let rhs = self.eval(rhs, frame, out)?;
                binary(*op, lhs, rhs)?
            }
            Expr::And(lhs, rhs) => {
                let lhs = self.eval(lhs, frame, out)?;
                if lhs.truthy() {
                    self.eval(rhs, frame, out)?
                } else {
                    lhs
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.eval(lhs, frame, out)?;
                if lhs.truthy() {
                    lhs
                } else {
                    self.eval(rhs, frame, out)?
                }
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee, frame, out)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, frame, out)?);
                }
                self.call(callee, values, out)?
            }
            Expr::Index(target, index) => {
                let target = self.eval(target, frame, out)?;
                let index = self.eval(index, frame, out)?;
                index_value(target, &index)?
            }
            Expr::Field(target, name) => match self.eval(target, frame, out)? {
                Value::Record(record) => record
                    .get(name)
                    .cloned()
                    .ok_or_else(|| no_attribute(&record.name, name))?,
                other => return Err(no_attribute(other.type_name(), name)),
            },
        })
    }

    fn lookup(&self, name: &str, frame: &Frame) -> Result<Value> {
        frame
            .locals
            .as_ref()
            .and_then(|locals| locals.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| ScriptError::Name(name.to_string()))
    }

    fn call(&mut self, callee: Value, args: Vec<Value>, out: &mut dyn Write) -> Result<Value> {
        check(&self.interrupt)?;
        match callee {
            Value::Function(decl) => self.call_function(&decl, args, out),
            Value::Native(native) => {
                let mut ctx = NativeContext {
                    out,
                    interrupt: &self.interrupt,
                    globals: &self.globals,
                };
                (native.func)(&mut ctx, args)
            }
            other => Err(ScriptError::Type(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, decl: &FnDecl, args: Vec<Value>, out: &mut dyn Write) -> Result<Value> {
        if args.len() != decl.params.len() {
            return Err(ScriptError::Type(format!(
                "{}() takes {} argument{} but {} {} given",
                decl.name,
                decl.params.len(),
                if decl.params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" },
            )));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::Recursion(MAX_CALL_DEPTH));
        }

        let locals = decl.params.iter().cloned().zip(args).collect();
        let mut frame = Frame {
            locals: Some(locals),
        };
        self.depth += 1;
        let flow = self.exec_block(&decl.body, &mut frame, out);
        self.depth -= 1;

        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Nil),
        }
    }
}

enum Key<'a> {
    Index(Value),
    Field(&'a str),
}

fn store(globals: &mut HashMap<String, Value>, frame: &mut Frame, name: &str, value: Value) {
    match frame.locals.as_mut() {
        Some(locals) => locals.insert(name.to_string(), value),
        None => globals.insert(name.to_string(), value),
    };
}

fn no_attribute(type_name: &str, field: &str) -> ScriptError {
    ScriptError::Attribute(format!("'{type_name}' object has no attribute '{field}'"))
}

fn resolve_index(index: &Value, len: usize) -> Result<usize> {
    let Value::Int(raw) = index else {
        return Err(ScriptError::Type(format!(
            "indices must be integers, not '{}'",
            index.type_name()
        )));
    };
    let len_i = i64::try_from(len).map_err(|_| ScriptError::Overflow)?;
    let resolved = if *raw < 0 { raw + len_i } else { *raw };
    if (0..len_i).contains(&resolved) {
        usize::try_from(resolved).map_err(|_| ScriptError::Overflow)
    } else {
        Err(ScriptError::Index("index out of range".to_string()))
    }
}

fn index_value(target: Value, index: &Value) -> Result<Value> {
    match target {
        Value::List(mut items) => {
            let i = resolve_index(index, items.len())?;
            Ok(items.swap_remove(i))
        }
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let i = resolve_index(index, chars.len())?;
            Ok(Value::Str(chars[i].to_string()))
        }
        other => Err(ScriptError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Int(v)) => v.checked_neg().map(Value::Int).ok_or(ScriptError::Overflow),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Neg, other) => Err(ScriptError::Type(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Ne => return Ok(Value::Bool(lhs != rhs)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            return compare(op, &lhs, &rhs);
        }
        _ => {}
    }

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, a, b),
        (Value::Int(a), Value::Float(b)) => float_arith(op, a as f64, b),
        (Value::Float(a), Value::Int(b)) => float_arith(op, a, b as f64),
        (Value::Float(a), Value::Float(b)) => float_arith(op, a, b),
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::Str(a + &b)),
        (Value::List(mut a), Value::List(b)) if op == BinaryOp::Add => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (Value::Str(text), Value::Int(n)) | (Value::Int(n), Value::Str(text)) if op == BinaryOp::Mul => {
            let count = repeat_count(n, text.len())?;
            Ok(Value::Str(text.repeat(count)))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) if op == BinaryOp::Mul => {
            let count = repeat_count(n, items.len())?;
            let mut out = Vec::with_capacity(items.len() * count);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            Ok(Value::List(out))
        }
        (lhs, rhs) => Err(unsupported(op, lhs.type_name(), rhs.type_name())),
    }
}

fn unsupported(op: BinaryOp, lhs: &str, rhs: &str) -> ScriptError {
    ScriptError::Type(format!(
        "unsupported operand types for {}: '{lhs}' and '{rhs}'",
        op.symbol()
    ))
}

const MAX_REPEAT_LEN: usize = 1 << 24;

fn repeat_count(n: i64, unit: usize) -> Result<usize> {
    let count = usize::try_from(n.max(0)).map_err(|_| ScriptError::Overflow)?;
    match count.checked_mul(unit) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(count),
        _ => Err(ScriptError::Value("repeated sequence is too large".to_string())),
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(ScriptError::ZeroDivision);
            }
            a.checked_div(b).map(|q| if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q })
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err(ScriptError::ZeroDivision);
            }
            a.checked_rem(b).map(|r| if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
        }
        _ => return Err(unsupported(op, "int", "int")),
    };
    result.map(Value::Int).ok_or(ScriptError::Overflow)
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Result<Value> {
    Ok(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(ScriptError::ZeroDivision),
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a - b * (a / b).floor(),
        _ => return Err(unsupported(op, "float", "float")),
    }))
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    use std::cmp::Ordering;
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => {
            return Err(ScriptError::Type(format!(
                "'{}' not supported between '{}' and '{}'",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            )));
        }
    };
    let result = match ordering {
        None => false,
        Some(ordering) => match op {
            BinaryOp::Lt => ordering == Ordering::Less,
            BinaryOp::Le => ordering != Ordering::Greater,
            BinaryOp::Gt => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        },
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(interp: &mut Interpreter, src: &str) -> Result<String> {
        let mut out = Vec::new();
        interp.eval_source(src, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn fresh() -> Interpreter {
        Interpreter::new(InterruptFlag::new())
    }

    #[test]
    fn echoes_expression_results() {
        let mut interp = fresh();
        assert_eq!(run(&mut interp, "1 + 2").unwrap(), "3\n");
        assert_eq!(run(&mut interp, "\"a\" + \"b\"").unwrap(), "\"ab\"\n");
        assert_eq!(run(&mut interp, "x = 4").unwrap(), "");
        assert_eq!(run(&mut interp, "nil").unwrap(), "");
        assert_eq!(run(&mut interp, "print(x, \"y\")").unwrap(), "4 y\n");
    }

    #[test]
    fn arithmetic_follows_floor_semantics() {
        let mut interp = fresh();
        assert_eq!(run(&mut interp, "-7 / 2").unwrap(), "-4\n");
        assert_eq!(run(&mut interp, "-7 % 3").unwrap(), "2\n");
        assert_eq!(run(&mut interp, "7 / 2.0").unwrap(), "3.5\n");
        assert_eq!(run(&mut interp, "[1] * 3").unwrap(), "[1, 1, 1]\n");
    }

    #[test]
    fn arithmetic_errors_do_not_panic() {
        let mut interp = fresh();
        assert_eq!(run(&mut interp, "1 / 0"), Err(ScriptError::ZeroDivision));
        assert_eq!(run(&mut interp, "1.0 % 0"), Err(ScriptError::ZeroDivision));
        assert_eq!(
            run(&mut interp, "9223372036854775807 + 1"),
            Err(ScriptError::Overflow)
        );
        assert!(matches!(run(&mut interp, "1 + \"a\""), Err(ScriptError::Type(_))));
        assert_eq!(
            run(&mut interp, "undefined_name"),
            Err(ScriptError::Name("undefined_name".into()))
        );
    }

    #[test]
    fn functions_loops_and_locals() {
        let mut interp = fresh();
        let src = "fn fib(n) {\n  if n < 2 { return n }\n  return fib(n - 1) + fib(n - 2)\n}\n\
                   total = 0\ni = 0\nwhile i < 10 {\n  i = i + 1\n  if i % 2 == 0 { continue }\n  total = total + i\n}";
        run(&mut interp, src).unwrap();
        assert_eq!(run(&mut interp, "fib(15)").unwrap(), "610\n");
        assert_eq!(interp.get("total"), Some(&Value::Int(25)));
        assert_eq!(interp.get("n"), None);
    }

    #[test]
    fn value_semantics_for_lists() {
        let mut interp = fresh();
        run(&mut interp, "a = [1, [2, 3]]\nb = a\nb[1][0] = 9").unwrap();
        assert_eq!(run(&mut interp, "a").unwrap(), "[1, [2, 3]]\n");
        assert_eq!(run(&mut interp, "b[-1]").unwrap(), "[9, 3]\n");
        assert!(matches!(run(&mut interp, "a[5]"), Err(ScriptError::Index(_))));
    }

    #[test]
    fn deep_recursion_is_an_error() {
        // Debug builds need more stack than the default test thread has.
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let mut interp = fresh();
                let result = run(&mut interp, "fn down(n) { return down(n + 1) }\ndown(0)");
                assert_eq!(result, Err(ScriptError::Recursion(MAX_CALL_DEPTH)));
                // The depth counter unwinds, so ordinary calls keep working.
                assert_eq!(run(&mut interp, "fn one() { return 1 }\none()").unwrap(), "1\n");
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn deep_expressions_inside_recursion_are_an_error() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                let mut interp = fresh();
                let body = format!("{}down(n + 1)", "-".repeat(90));
                let src = format!("fn down(n) {{ return {body} }}\ndown(0)");
                assert_eq!(
                    run(&mut interp, &src),
                    Err(ScriptError::Nesting(MAX_EVAL_DEPTH))
                );
                assert_eq!(run(&mut interp, "fn two() { return 2 }\ntwo()").unwrap(), "2\n");
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn pending_interrupt_aborts_the_next_statement() {
        let flag = InterruptFlag::new();
        let mut interp = Interpreter::new(flag.clone());
        run(&mut interp, "x = 1").unwrap();
        flag.raise();
        assert_eq!(run(&mut interp, "x = 2"), Err(ScriptError::Interrupted));
        assert!(!flag.is_raised());
        assert_eq!(run(&mut interp, "x").unwrap(), "1\n");
    }

    #[test]
    fn interrupt_stops_a_sleeping_loop() {
        let flag = InterruptFlag::new();
        let mut interp = Interpreter::new(flag.clone());
        let raiser = {
            let flag = flag.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                flag.raise();
            })
        };
        let started = Instant::now();
        let result = run(&mut interp, "while true { sleep(0.01) }");
        raiser.join().unwrap();
        assert_eq!(result, Err(ScriptError::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn records_support_field_access_and_update() {
        let mut interp = fresh();
        interp.set(
            "r",
            Value::Record(super::super::value::Record::new(
                "Point",
                vec![("x".into(), Value::Int(1))],
            )),
        );
        run(&mut interp, "r.x = r.x + 1").unwrap();
        assert_eq!(run(&mut interp, "r").unwrap(), "Point(x=2)\n");
        assert!(matches!(run(&mut interp, "r.y"), Err(ScriptError::Attribute(_))));
        assert_eq!(run(&mut interp, "type(r)").unwrap(), "\"Point\"\n");
    }
}
