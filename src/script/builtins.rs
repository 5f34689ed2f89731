use super::eval::{Interpreter, NativeContext};
use super::value::Value;
use super::{Result, ScriptError};
use std::io::Write;
use std::time::Duration;

const MAX_RANGE_LEN: i64 = 1_000_000;

/// Install the language's built-in functions into `interp`.
pub(crate) fn install(interp: &mut Interpreter) {
    interp.define_native("print", "print(values...): write values separated by spaces", print);
    interp.define_native("sleep", "sleep(seconds): pause; interruptible", sleep);
    interp.define_native("len", "len(value): length of a string, list or record", len);
    interp.define_native("str", "str(value): convert to a string", |_, args| {
        let [value] = take_args::<1>("str", args)?;
        Ok(Value::Str(value.to_string()))
    });
    interp.define_native("type", "type(value): name of the value's type", |_, args| {
        let [value] = take_args::<1>("type", args)?;
        Ok(Value::Str(value.type_name().to_string()))
    });
    interp.define_native("append", "append(list, item): new list with item added", append);
    interp.define_native("range", "range(stop) or range(start, stop): list of integers", range);
    interp.define_native("vars", "vars(): names defined in this session", |ctx, args| {
        take_args::<0>("vars", args)?;
        let mut names: Vec<&String> = ctx
            .globals()
            .iter()
            .filter(|(_, value)| !matches!(value, Value::Native(_)))
            .map(|(name, _)| name)
            .collect();
        names.sort();
        Ok(Value::List(
            names.into_iter().map(|name| Value::Str(name.clone())).collect(),
        ))
    });
    interp.define_native("help", "help(): list built-in functions", help);
}

/// Check the argument count of a fixed-arity built-in.
pub fn take_args<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N]> {
    let given = args.len();
    args.try_into().map_err(|_| {
        ScriptError::Type(format!(
            "{name}() takes {N} argument{} ({given} given)",
            if N == 1 { "" } else { "s" }
        ))
    })
}

fn print(ctx: &mut NativeContext<'_>, args: Vec<Value>) -> Result<Value> {
    let line = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let out = ctx.out();
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(Value::Nil)
}

fn sleep(ctx: &mut NativeContext<'_>, args: Vec<Value>) -> Result<Value> {
    let [seconds] = take_args::<1>("sleep", args)?;
    let seconds = match seconds {
        Value::Int(n) => n as f64,
        Value::Float(f) => f,
        other => {
            return Err(ScriptError::Type(format!(
                "sleep() expects a number, not '{}'",
                other.type_name()
            )));
        }
    };
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|_| ScriptError::Value(format!("invalid sleep length {seconds}")))?;
    ctx.sleep(duration)?;
    Ok(Value::Nil)
}

fn len(_ctx: &mut NativeContext<'_>, args: Vec<Value>) -> Result<Value> {
    let [value] = take_args::<1>("len", args)?;
    let len = match &value {
        Value::Str(text) => text.chars().count(),
        Value::List(items) => items.len(),
        Value::Record(record) => record.fields.len(),
        other => {
            return Err(ScriptError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|_| ScriptError::Overflow)
}

fn append(_ctx: &mut NativeContext<'_>, args: Vec<Value>) -> Result<Value> {
    let [list, item] = take_args::<2>("append", args)?;
    match list {
        Value::List(mut items) => {
            items.push(item);
            Ok(Value::List(items))
        }
        other => Err(ScriptError::Type(format!(
            "append() expects a list, not '{}'",
            other.type_name()
        ))),
    }
}

fn range(_ctx: &mut NativeContext<'_>, args: Vec<Value>) -> Result<Value> {
    let (start, stop) = match args.as_slice() {
        [Value::Int(stop)] => (0, *stop),
        [Value::Int(start), Value::Int(stop)] => (*start, *stop),
        _ => {
            return Err(ScriptError::Type(
                "range() expects one or two integers".to_string(),
            ));
        }
    };
    let len = stop.saturating_sub(start);
    if len > MAX_RANGE_LEN {
        return Err(ScriptError::Value(format!(
            "range() of {len} items exceeds the limit of {MAX_RANGE_LEN}"
        )));
    }
    Ok(Value::List((start..stop).map(Value::Int).collect()))
}

fn help(ctx: &mut NativeContext<'_>, args: Vec<Value>) -> Result<Value> {
    take_args::<0>("help", args)?;
    let mut entries: Vec<(String, String)> = ctx
        .globals()
        .values()
        .filter_map(|value| match value {
            Value::Native(native) => Some((native.name.clone(), native.help.clone())),
            _ => None,
        })
        .collect();
    entries.sort();

    let out = ctx.out();
    writeln!(out, "Statements: x = expr, if cond {{ }} else {{ }}, while cond {{ }},")?;
    writeln!(out, "            fn name(args) {{ return expr }}, break, continue")?;
    writeln!(out, "Built-in functions:")?;
    for (_, help) in entries {
        writeln!(out, "  {help}")?;
    }
    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use crate::interrupt::InterruptFlag;
    use crate::script::{Interpreter, ScriptError};

    fn eval(src: &str) -> Result<String, ScriptError> {
        let mut interp = Interpreter::new(InterruptFlag::new());
        let mut out = Vec::new();
        interp.eval_source(src, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn collection_helpers() {
        assert_eq!(eval("len(\"héllo\")").unwrap(), "5\n");
        assert_eq!(eval("append([1], 2)").unwrap(), "[1, 2]\n");
        assert_eq!(eval("range(3)").unwrap(), "[0, 1, 2]\n");
        assert_eq!(eval("range(2, 4)").unwrap(), "[2, 3]\n");
        assert_eq!(eval("range(5, 1)").unwrap(), "[]\n");
        assert_eq!(eval("str(1.5) + \"!\"").unwrap(), "\"1.5!\"\n");
    }

    #[test]
    fn arity_and_type_errors() {
        assert!(matches!(eval("len()"), Err(ScriptError::Type(_))));
        assert!(matches!(eval("len(1)"), Err(ScriptError::Type(_))));
        assert!(matches!(eval("sleep(-1)"), Err(ScriptError::Value(_))));
        assert!(matches!(eval("range(100000000)"), Err(ScriptError::Value(_))));
    }

    #[test]
    fn sleep_past_the_clock_range_is_a_value_error() {
        match eval("sleep(1e19)") {
            Err(ScriptError::Value(message)) => assert!(message.contains("too large"), "{message}"),
            other => panic!("expected ValueError, got {other:?}"),
        }
        assert!(matches!(eval("sleep(1e300)"), Err(ScriptError::Value(_))));
    }

    #[test]
    fn vars_lists_user_bindings_only() {
        assert_eq!(eval("b = 1; a = 2; vars()").unwrap(), "[\"a\", \"b\"]\n");
    }

    #[test]
    fn help_lists_builtins() {
        let text = eval("help()").unwrap();
        assert!(text.contains("print(values...)"));
        assert!(text.contains("sleep(seconds)"));
    }
}
