//! Host operations exposed to script code.

use crate::client::{HostApi, RpcError};
use crate::protocol::OpResult;
use crate::script::builtins::take_args;
use crate::script::{Interpreter, Record, ScriptError, Value};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Bind `quit`, `set_syntax` and `profile_memory` to `host`.
pub fn install<H: HostApi + 'static>(interp: &mut Interpreter, host: Rc<RefCell<H>>) {
    let client = Rc::clone(&host);
    interp.define_native("quit", "quit(): ask the host to close the editor", move |_, args| {
        take_args::<0>("quit", args)?;
        op_result(client.borrow_mut().quit())
    });

    let client = Rc::clone(&host);
    interp.define_native(
        "set_syntax",
        "set_syntax(language?): set the highlighting language of the current document",
        move |_, args| {
            let language = match args.as_slice() {
                [] | [Value::Nil] => None,
                [Value::Str(name)] => Some(name.clone()),
                [other] => {
                    return Err(ScriptError::Type(format!(
                        "set_syntax() expects a string, not '{}'",
                        other.type_name()
                    )));
                }
                _ => {
                    return Err(ScriptError::Type(format!(
                        "set_syntax() takes at most 1 argument ({} given)",
                        args.len()
                    )));
                }
            };
            op_result(client.borrow_mut().set_syntax(language.as_deref()))
        },
    );

    let client = host;
    interp.define_native(
        "profile_memory",
        "profile_memory(path): write a memory profile of the host to path",
        move |_, args| {
            let [path] = take_args::<1>("profile_memory", args)?;
            let Value::Str(path) = path else {
                return Err(ScriptError::Type(format!(
                    "profile_memory() expects a path string, not '{}'",
                    path.type_name()
                )));
            };
            op_result(client.borrow_mut().profile_memory(Path::new(&path)))
        },
    );
}

/// Host failures become `OpResult(ok=false, ...)`; channel failures raise.
fn op_result(outcome: Result<OpResult, RpcError>) -> crate::script::Result<Value> {
    let fields = match outcome {
        Ok(result) => vec![
            ("ok".to_string(), Value::Bool(true)),
            (
                "description".to_string(),
                result.description.map_or(Value::Nil, Value::Str),
            ),
        ],
        Err(RpcError::Operation(err)) => vec![
            ("ok".to_string(), Value::Bool(false)),
            ("kind".to_string(), Value::Str(err.kind.to_string())),
            ("message".to_string(), Value::Str(err.message)),
        ],
        Err(RpcError::Interrupted) => return Err(ScriptError::Interrupted),
        Err(err) => return Err(ScriptError::Rpc(err.to_string())),
    };
    Ok(Value::Record(Record::new("OpResult", fields)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptFlag;
    use crate::protocol::{ErrorKind, OperationError};
    use std::path::PathBuf;

    #[derive(Default)]
    struct StubHost {
        syntax_calls: Vec<Option<String>>,
        profiles: Vec<PathBuf>,
        quits: usize,
    }

    impl HostApi for StubHost {
        fn quit(&mut self) -> Result<OpResult, RpcError> {
            self.quits += 1;
            Err(RpcError::ChannelClosed("host went away".into()))
        }

        fn set_syntax(&mut self, language: Option<&str>) -> Result<OpResult, RpcError> {
            self.syntax_calls.push(language.map(str::to_string));
            match language {
                Some("not-a-real-language") => Err(RpcError::Operation(OperationError::new(
                    ErrorKind::UnknownLanguage,
                    "unknown language 'not-a-real-language'",
                ))),
                Some("slow") => Err(RpcError::Interrupted),
                _ => Ok(OpResult {
                    description: Some("Set syntax".into()),
                }),
            }
        }

        fn profile_memory(&mut self, path: &Path) -> Result<OpResult, RpcError> {
            self.profiles.push(path.to_path_buf());
            Ok(OpResult::default())
        }
    }

    fn setup() -> (Interpreter, Rc<RefCell<StubHost>>) {
        let host = Rc::new(RefCell::new(StubHost::default()));
        let mut interp = Interpreter::new(InterruptFlag::new());
        install(&mut interp, Rc::clone(&host));
        (interp, host)
    }

    fn eval(interp: &mut Interpreter, src: &str) -> Result<String, ScriptError> {
        let mut out = Vec::new();
        interp.eval_source(src, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn success_and_host_failure_results() {
        let (mut interp, host) = setup();
        assert_eq!(
            eval(&mut interp, "set_syntax(\"python\")").unwrap(),
            "OpResult(ok=true, description=\"Set syntax\")\n"
        );
        assert_eq!(
            eval(&mut interp, "r = set_syntax(\"not-a-real-language\"); r.kind; r.message").unwrap(),
            "\"UnknownLanguage\"\n\"unknown language 'not-a-real-language'\"\n"
        );
        eval(&mut interp, "set_syntax(); set_syntax(nil)").unwrap();
        assert_eq!(
            host.borrow().syntax_calls,
            vec![
                Some("python".to_string()),
                Some("not-a-real-language".to_string()),
                None,
                None
            ]
        );
    }

    #[test]
    fn profile_memory_passes_path() {
        let (mut interp, host) = setup();
        assert_eq!(
            eval(&mut interp, "profile_memory(\"/tmp/p.json\").ok").unwrap(),
            "true\n"
        );
        assert_eq!(host.borrow().profiles, vec![PathBuf::from("/tmp/p.json")]);
        assert!(matches!(
            eval(&mut interp, "profile_memory(3)"),
            Err(ScriptError::Type(_))
        ));
    }

    #[test]
    fn channel_failures_raise() {
        let (mut interp, host) = setup();
        assert!(matches!(eval(&mut interp, "quit()"), Err(ScriptError::Rpc(_))));
        assert_eq!(host.borrow().quits, 1);
        assert_eq!(
            eval(&mut interp, "set_syntax(\"slow\")"),
            Err(ScriptError::Interrupted)
        );
    }
}
