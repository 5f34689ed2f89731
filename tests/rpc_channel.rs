use edscript::client::{ClientConfig, RpcClient, RpcError};
use edscript::host::EditorState;
use edscript::interrupt::InterruptFlag;
use edscript::protocol::codec::FrameDecoder;
use edscript::protocol::{
    DEFAULT_MAX_FRAME_LEN, ErrorKind, OpResult, OperationError, Request, RequestEnvelope,
};
use edscript::service::{RpcServer, ServerConfig, TaskBroker};
use serde_json::{Value, json};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Answers every operation with a payload or error derived from its parameters.
fn scripted(request: Request) -> Result<Value, OperationError> {
    match request {
        Request::Quit => Ok(json!({ "description": "bye", "extra": [1, 2, 3] })),
        Request::SetSyntax { language } if language == "slow" => {
            thread::sleep(Duration::from_millis(400));
            Ok(json!({ "description": "slow done" }))
        }
        Request::SetSyntax { language } if language == "broken" => Err(OperationError::new(
            ErrorKind::Other("CustomFailure".into()),
            "exact message: ünïcode",
        )),
        Request::SetSyntax { language } => Ok(json!({ "language": language })),
        Request::ProfileMemory { path } => Err(OperationError::new(
            ErrorKind::PathUnwritable,
            format!("cannot write {}", path.display()),
        )),
    }
}

fn client_for(server: &RpcServer) -> RpcClient {
    RpcClient::new(Some(server.client_config()), InterruptFlag::new())
}

#[test]
fn success_payloads_arrive_unmodified() {
    let server = RpcServer::start(ServerConfig::default(), scripted).expect("server");
    let mut client = client_for(&server);

    assert_eq!(
        client.call(Request::Quit).unwrap(),
        json!({ "description": "bye", "extra": [1, 2, 3] })
    );
    assert_eq!(
        client.call(Request::set_syntax(Some("rust"))).unwrap(),
        json!({ "language": "rust" })
    );
    assert_eq!(
        client.call(Request::set_syntax(None)).unwrap(),
        json!({ "language": "undefined" })
    );
    assert_eq!(
        client.quit().unwrap(),
        OpResult {
            description: Some("bye".into())
        }
    );
}

#[test]
fn error_kind_and_message_round_trip_exactly() {
    let server = RpcServer::start(ServerConfig::default(), scripted).expect("server");
    let mut client = client_for(&server);

    match client.call(Request::set_syntax(Some("broken"))) {
        Err(RpcError::Operation(err)) => {
            assert_eq!(err.kind, ErrorKind::Other("CustomFailure".into()));
            assert_eq!(err.message, "exact message: ünïcode");
        }
        other => panic!("expected operation error, got {other:?}"),
    }

    match client.profile_memory("/no/such/dir/profile.json") {
        Err(RpcError::Operation(err)) => {
            assert_eq!(err.kind, ErrorKind::PathUnwritable);
            assert_eq!(err.message, "cannot write /no/such/dir/profile.json");
        }
        other => panic!("expected operation error, got {other:?}"),
    }

    // The channel stays usable after a host-reported failure.
    assert!(client.call(Request::Quit).is_ok());
}

#[test]
fn wrong_key_is_unauthorized() {
    let server = RpcServer::start(ServerConfig::default(), scripted).expect("server");
    let config = ClientConfig::new(server.local_addr().to_string(), "not-the-key");
    let mut client = RpcClient::new(Some(config), InterruptFlag::new());

    match client.quit() {
        Err(RpcError::Operation(err)) => assert_eq!(err.kind, ErrorKind::Unauthorized),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[test]
fn interrupted_call_does_not_confuse_the_next_one() {
    let server = RpcServer::start(ServerConfig::default(), scripted).expect("server");
    let flag = InterruptFlag::new();
    let mut client = RpcClient::new(Some(server.client_config()), flag.clone());

    let raiser = {
        let flag = flag.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            flag.raise();
        })
    };
    let started = Instant::now();
    let outcome = client.set_syntax(Some("slow"));
    raiser.join().unwrap();
    assert!(matches!(outcome, Err(RpcError::Interrupted)), "{outcome:?}");
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(!flag.is_raised());

    // The late answer to the interrupted call is discarded.
    assert_eq!(
        client.call(Request::set_syntax(Some("go"))).unwrap(),
        json!({ "language": "go" })
    );
}

#[test]
fn host_closing_the_connection_is_channel_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let host = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_LEN);
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap();
            decoder.push(&buf[..n]);
            if decoder.next_message::<RequestEnvelope>().unwrap().is_some() {
                break;
            }
        }
    });

    let mut client = RpcClient::new(Some(ClientConfig::new(addr.to_string(), "k")), InterruptFlag::new());
    let outcome = client.quit();
    host.join().unwrap();
    assert!(matches!(outcome, Err(RpcError::ChannelClosed(_))), "{outcome:?}");
    assert!(!client.is_connected());
}

#[test]
fn severed_channel_fails_the_call_in_flight() {
    let server = RpcServer::start(ServerConfig::default(), scripted).expect("server");
    let mut client = client_for(&server);

    let outcome = thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(100));
            server.disconnect_all();
        });
        client.set_syntax(Some("slow"))
    });
    assert!(matches!(outcome, Err(RpcError::ChannelClosed(_))), "{outcome:?}");

    // The next call opens a fresh connection.
    assert_eq!(
        client.call(Request::set_syntax(Some("c"))).unwrap(),
        json!({ "language": "c" })
    );
}

#[test]
fn garbage_frame_is_channel_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let host = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).unwrap();
        stream.write_all(&[0, 0, 0, 5, b'n', b'o', b'p', b'e', b'!']).unwrap();
        // Keep the socket open so only the frame itself can fail the call.
        thread::sleep(Duration::from_millis(300));
    });

    let mut client = RpcClient::new(Some(ClientConfig::new(addr.to_string(), "k")), InterruptFlag::new());
    let outcome = client.quit();
    assert!(
        matches!(&outcome, Err(RpcError::ChannelClosed(msg)) if msg.contains("malformed")),
        "{outcome:?}"
    );
    host.join().unwrap();
}

#[test]
fn unconfigured_client_fails_every_call() {
    let mut client = RpcClient::new(None, InterruptFlag::new());
    assert!(matches!(client.quit(), Err(RpcError::NotConfigured)));
    assert!(matches!(
        client.set_syntax(Some("python")),
        Err(RpcError::NotConfigured)
    ));
}

#[test]
fn set_syntax_against_the_editor() {
    let editor = Arc::new(Mutex::new(EditorState::new()));
    let handler = {
        let editor = Arc::clone(&editor);
        move |request: Request| editor.lock().unwrap().execute(&request)
    };
    let server = RpcServer::start(ServerConfig::default(), handler).expect("server");
    let mut client = client_for(&server);

    let ok = client.set_syntax(Some("python")).expect("python is known");
    assert_eq!(ok.description.as_deref(), Some("Set syntax to python"));
    assert_eq!(
        editor.lock().unwrap().syntax(),
        edscript::host::Language::Python
    );

    match client.set_syntax(Some("not-a-real-language")) {
        Err(RpcError::Operation(err)) => {
            assert_eq!(err.kind, ErrorKind::UnknownLanguage);
            assert_eq!(err.message, "unknown syntax language 'not-a-real-language'");
        }
        other => panic!("expected UnknownLanguage, got {other:?}"),
    }
}

#[test]
fn editor_loop_serves_operations_through_the_broker() {
    let (broker, tasks) = TaskBroker::channel();
    let server = RpcServer::start(ServerConfig::default(), broker).expect("server");
    let dir = TempDir::new().unwrap();
    let profile: PathBuf = dir.path().join("profile.json");

    let editor_loop = thread::spawn(move || {
        let mut editor = EditorState::new();
        editor.set_unsaved_changes(true);
        let mut served = 0;
        while let Ok(task) = tasks.recv_timeout(Duration::from_secs(5)) {
            if matches!(task.request(), Request::Quit) && served == 2 {
                editor.set_unsaved_changes(false);
            }
            task.run_with(|request| editor.execute(request));
            served += 1;
            if editor.quit_requested() {
                break;
            }
        }
        served
    });

    let mut client = client_for(&server);
    match client.quit() {
        Err(RpcError::Operation(err)) => assert_eq!(err.kind, ErrorKind::Refused),
        other => panic!("expected Refused, got {other:?}"),
    }

    let result = client.profile_memory(&profile);
    if cfg!(target_os = "linux") {
        let result = result.expect("profile written");
        assert_eq!(
            result.description,
            Some(format!("Memory profile written to {}", profile.display()))
        );
        let report: Value = serde_json::from_slice(&std::fs::read(&profile).unwrap()).unwrap();
        assert!(report["resident_kib"].as_u64().unwrap() > 0);
    } else {
        assert!(matches!(
            result,
            Err(RpcError::Operation(OperationError {
                kind: ErrorKind::ProfilingUnsupported,
                ..
            }))
        ));
    }

    assert_eq!(client.quit().unwrap(), OpResult::default());
    assert_eq!(editor_loop.join().unwrap(), 3);
}
