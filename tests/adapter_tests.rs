use async_trait::async_trait;
use jupyter_bridge::core::config::EngineConfig;
use jupyter_bridge::core::traits::{CodeExecutor, KernelIntrospection, LanguageServices};
use jupyter_bridge::core::wire::{
    Channel, FrameTransport, HmacSigner, MemoryTransport, SignatureScheme, WireCodec,
};
use jupyter_bridge::jupyter::{
    build_connector_with_transports, ChannelTransports, Header, JupyterCodec, JupyterConnector,
    JupyterMessage,
};
use jupyter_bridge::{
    CompletionItem, FormattedValue, InputProvider, InvocationContext, KernelCommand,
    KernelConnector, KernelError, KernelEvent, KernelValueInfo, LinePosition, LinePositionSpan,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const KEY: &str = "5ca1ab1e-0000-4000-8000-00000000c0de";

fn codec(key: &str) -> JupyterCodec {
    JupyterCodec::new(
        Arc::new(HmacSigner::new(key, SignatureScheme::HmacSha256).unwrap()),
        true,
    )
}

/// Kernel side of the four in-memory channels, scripted by each test
struct FakeKernel {
    codec: JupyterCodec,
    shell: MemoryTransport,
    control: MemoryTransport,
    stdin: MemoryTransport,
    iopub: MemoryTransport,
}

impl FakeKernel {
    fn transport(&mut self, channel: Channel) -> &mut MemoryTransport {
        match channel {
            Channel::Shell => &mut self.shell,
            Channel::Control => &mut self.control,
            Channel::Stdin => &mut self.stdin,
            Channel::IoPub => &mut self.iopub,
        }
    }

    async fn recv(&mut self, channel: Channel) -> JupyterMessage {
        let frames = timeout(Duration::from_secs(5), self.transport(channel).recv_frames())
            .await
            .expect("kernel waited too long for a request")
            .unwrap();
        self.codec.decode_message(channel, frames).unwrap().unwrap()
    }

    /// Nothing arrives on `channel` for a while
    async fn is_quiet(&mut self, channel: Channel) -> bool {
        timeout(Duration::from_millis(200), self.transport(channel).recv_frames())
            .await
            .is_err()
    }

    async fn send_signed(
        &mut self,
        codec: &JupyterCodec,
        channel: Channel,
        parent: &JupyterMessage,
        msg_type: &str,
        content: Value,
    ) -> JupyterMessage {
        let message = JupyterMessage::new(channel, Header::new(msg_type, "kernel", "kernel"), content)
            .with_parent(parent.header.clone());
        let frames = codec.encode_message(&message).unwrap();
        self.transport(channel).send_frames(frames).await.unwrap();
        message
    }

    async fn send(
        &mut self,
        channel: Channel,
        parent: &JupyterMessage,
        msg_type: &str,
        content: Value,
    ) -> JupyterMessage {
        let codec = codec(KEY);
        self.send_signed(&codec, channel, parent, msg_type, content)
            .await
    }

    async fn publish(&mut self, parent: &JupyterMessage, msg_type: &str, content: Value) {
        self.send(Channel::IoPub, parent, msg_type, content).await;
    }

    async fn status(&mut self, parent: &JupyterMessage, state: &str) {
        self.publish(parent, "status", json!({ "execution_state": state }))
            .await;
    }

    /// Successful end of an execution: `execute_reply` then `idle`
    async fn finish(&mut self, request: &JupyterMessage) {
        self.send(Channel::Shell, request, "execute_reply", json!({"status": "ok", "execution_count": 1}))
            .await;
        self.status(request, "idle").await;
    }
}

fn connect(config: EngineConfig) -> (JupyterConnector, FakeKernel) {
    let (shell, kernel_shell) = MemoryTransport::pair("shell");
    let (control, kernel_control) = MemoryTransport::pair("control");
    let (stdin, kernel_stdin) = MemoryTransport::pair("stdin");
    let (iopub, kernel_iopub) = MemoryTransport::pair("iopub");

    let connector = build_connector_with_transports(
        ChannelTransports {
            shell,
            control,
            stdin,
            iopub,
        },
        KEY,
        config,
    )
    .unwrap();

    let kernel = FakeKernel {
        codec: codec(KEY),
        shell: kernel_shell,
        control: kernel_control,
        stdin: kernel_stdin,
        iopub: kernel_iopub,
    };
    (connector, kernel)
}

fn test_config() -> EngineConfig {
    let mut config = EngineConfig::new()
        .interrupt_timeout(Duration::from_millis(500))
        .execute_reply_grace(Duration::from_millis(300));
    config.shutdown_timeout_ms = 500;
    config
}

fn context() -> (InvocationContext, mpsc::UnboundedReceiver<KernelEvent>) {
    InvocationContext::new(CancellationToken::new())
}

fn drain(events: &mut mpsc::UnboundedReceiver<KernelEvent>) -> Vec<KernelEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

fn kernel_info_content(debugger: bool) -> Value {
    json!({
        "status": "ok",
        "protocol_version": "5.3",
        "implementation": "ipython",
        "implementation_version": "8.20.0",
        "language_info": {"name": "python", "version": "3.12.1", "mimetype": "text/x-python"},
        "banner": "Python 3.12.1",
        "debugger": debugger
    })
}

#[tokio::test]
async fn test_execute_success_emits_outputs_then_succeeds() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        assert_eq!(request.msg_type(), "execute_request");
        assert_eq!(request.content["code"], "print('hello'); 1 + 2");
        assert_eq!(request.content["allow_stdin"], false);

        kernel.status(&request, "busy").await;
        kernel
            .publish(&request, "execute_input", json!({"code": "print('hello'); 1 + 2", "execution_count": 1}))
            .await;
        kernel
            .publish(&request, "stream", json!({"name": "stdout", "text": "hello\n"}))
            .await;
        kernel
            .publish(
                &request,
                "display_data",
                json!({"data": {"text/plain": "<figure>"}, "metadata": {}, "transient": {"display_id": "d1"}}),
            )
            .await;
        kernel
            .publish(
                &request,
                "execute_result",
                json!({"execution_count": 1, "data": {"text/plain": "3"}, "metadata": {}}),
            )
            .await;
        kernel
            .send(Channel::Shell, &request, "execute_reply", json!({"status": "ok", "execution_count": 1}))
            .await;
        kernel.status(&request, "idle").await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("print('hello'); 1 + 2", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::StandardOutputValueProduced {
                text: "hello\n".to_string()
            },
            KernelEvent::DisplayedValueProduced {
                formatted_values: vec![FormattedValue::plain_text("<figure>")],
                display_id: Some("d1".to_string()),
            },
            KernelEvent::ReturnValueProduced {
                formatted_values: vec![FormattedValue::plain_text("3")],
            },
            KernelEvent::CommandSucceeded,
        ]
    );
}

#[tokio::test]
async fn test_execute_error_message_fails_with_evalue() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel.status(&request, "busy").await;
        kernel
            .publish(
                &request,
                "error",
                json!({
                    "ename": "NameError",
                    "evalue": "name 'x' is not defined",
                    "traceback": ["Traceback (most recent call last)", "NameError: name 'x' is not defined"]
                }),
            )
            .await;
        kernel
            .send(Channel::Shell, &request, "execute_reply", json!({"status": "error", "ename": "NameError", "evalue": "name 'x' is not defined"}))
            .await;
        kernel.status(&request, "idle").await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("x", &ctx), kernel_script);
    result.unwrap();

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            KernelEvent::StandardErrorValueProduced {
                text: "Traceback (most recent call last)\nNameError: name 'x' is not defined"
                    .to_string()
            },
            KernelEvent::CommandFailed {
                message: "name 'x' is not defined".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_failed_execute_reply_then_idle_fails() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel.status(&request, "busy").await;
        kernel
            .send(Channel::Shell, &request, "execute_reply", json!({"status": "aborted"}))
            .await;
        // shell and iopub are independent; let the reply land first
        tokio::time::sleep(Duration::from_millis(50)).await;
        kernel.status(&request, "idle").await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("1", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![KernelEvent::CommandFailed {
            message: "kernel replied with status 'aborted'".to_string()
        }]
    );
}

#[tokio::test]
async fn test_failed_execute_reply_after_idle_fails() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel.status(&request, "busy").await;
        kernel.status(&request, "idle").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        kernel
            .send(Channel::Shell, &request, "execute_reply", json!({"status": "aborted"}))
            .await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("1", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![KernelEvent::CommandFailed {
            message: "kernel replied with status 'aborted'".to_string()
        }]
    );
}

#[tokio::test]
async fn test_idle_without_execute_reply_succeeds_after_grace() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel.status(&request, "idle").await;
    };

    let started = tokio::time::Instant::now();
    let (result, ()) = tokio::join!(connector.submit_code("1", &ctx), kernel_script);
    result.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(drain(&mut events), vec![KernelEvent::CommandSucceeded]);
}

#[tokio::test]
async fn test_slow_consumer_receives_every_output() {
    let mut config = test_config();
    config.channel_capacity = 4;
    let (connector, mut kernel) = connect(config);
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        for i in 0..20 {
            kernel
                .publish(&request, "stream", json!({"name": "stdout", "text": format!("line {}\n", i)}))
                .await;
        }
        kernel.finish(&request).await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("for i in range(20): print(i)", &ctx), kernel_script);
    result.unwrap();

    let events = drain(&mut events);
    let lines: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            KernelEvent::StandardOutputValueProduced { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(lines.len(), 20);
    assert_eq!(lines[19], "line 19\n");
    assert_eq!(events.last(), Some(&KernelEvent::CommandSucceeded));
    assert_eq!(connector.session().pending_requests(), 0);
}

#[tokio::test]
async fn test_unknown_stream_names_are_ignored() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .publish(&request, "stream", json!({"name": "debug", "text": "internal\n"}))
            .await;
        kernel
            .publish(&request, "stream", json!({"name": "stdout", "text": "visible\n"}))
            .await;
        kernel.finish(&request).await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("1", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::StandardOutputValueProduced {
                text: "visible\n".to_string()
            },
            KernelEvent::CommandSucceeded,
        ]
    );
}

#[tokio::test]
async fn test_stream_to_stderr_and_display_update() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .publish(&request, "stream", json!({"name": "stderr", "text": "warning\n"}))
            .await;
        kernel
            .publish(
                &request,
                "update_display_data",
                json!({"data": {"text/plain": "50%"}, "metadata": {}, "transient": {"display_id": "progress"}}),
            )
            .await;
        kernel.finish(&request).await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("work()", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::StandardErrorValueProduced {
                text: "warning\n".to_string()
            },
            KernelEvent::DisplayedValueUpdated {
                formatted_values: vec![FormattedValue::plain_text("50%")],
                display_id: Some("progress".to_string()),
            },
            KernelEvent::CommandSucceeded,
        ]
    );
}

#[tokio::test]
async fn test_forged_messages_are_dropped() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();
    let forger = codec("not-the-key");

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .send_signed(
                &forger,
                Channel::IoPub,
                &request,
                "stream",
                json!({"name": "stdout", "text": "forged"}),
            )
            .await;
        kernel
            .publish(&request, "stream", json!({"name": "stdout", "text": "real"}))
            .await;
        kernel.finish(&request).await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("1", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::StandardOutputValueProduced {
                text: "real".to_string()
            },
            KernelEvent::CommandSucceeded,
        ]
    );
    assert!(connector.session().closed_channels().is_empty());
}

#[tokio::test]
async fn test_completions_ignore_unrelated_traffic() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();
    let code = "import os\nos.pa";

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        assert_eq!(request.msg_type(), "complete_request");
        assert_eq!(request.content["cursor_pos"], 15);

        let stranger = JupyterMessage::new(
            Channel::Shell,
            Header::new("complete_request", "other", "other"),
            json!({}),
        );
        kernel.status(&request, "busy").await;
        kernel
            .publish(&stranger, "stream", json!({"name": "stdout", "text": "noise"}))
            .await;
        kernel
            .send(Channel::Shell, &stranger, "complete_reply", json!({"status": "ok", "matches": ["wrong"]}))
            .await;
        kernel
            .send(
                Channel::Shell,
                &request,
                "complete_reply",
                json!({
                    "status": "ok",
                    "matches": ["os.path", "os.pardir"],
                    "cursor_start": 10,
                    "cursor_end": 15,
                    "metadata": {
                        "_jupyter_types_experimental": [
                            {"start": 10, "end": 15, "text": "os.path", "type": "module"},
                            {"start": 10, "end": 15, "text": "os.pardir", "type": "instance"}
                        ]
                    }
                }),
            )
            .await;
        kernel.status(&request, "idle").await;
    };

    let (result, ()) = tokio::join!(
        connector.request_completions(code, LinePosition::new(1, 5), &ctx),
        kernel_script
    );
    result.unwrap();

    let item = |text: &str, kind: &str| CompletionItem {
        display_text: text.to_string(),
        kind: kind.to_string(),
        insert_text: text.to_string(),
        filter_text: text.to_string(),
        sort_text: text.to_string(),
    };
    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::CompletionsProduced {
                items: vec![item("os.path", "module"), item("os.pardir", "instance")],
                replacement_span: LinePositionSpan::new(
                    LinePosition::new(1, 0),
                    LinePosition::new(1, 5)
                ),
            },
            KernelEvent::CommandSucceeded,
        ]
    );
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    const REQUESTS: usize = 5;
    let (connector, mut kernel) = connect(test_config());
    let contexts: Vec<_> = (0..REQUESTS).map(|_| context()).collect();
    let codes: Vec<String> = (0..REQUESTS).map(|i| format!("v{}", i)).collect();

    let requests = contexts.iter().zip(&codes).map(|((ctx, _), code)| {
        connector.request_completions(code, LinePosition::new(0, code.len()), ctx)
    });

    let kernel_script = async {
        let mut received = Vec::new();
        for _ in 0..REQUESTS {
            received.push(kernel.recv(Channel::Shell).await);
        }

        // answer in reverse order
        for request in received.iter().rev() {
            let code = request.content["code"].as_str().unwrap().to_string();
            kernel
                .send(
                    Channel::Shell,
                    request,
                    "complete_reply",
                    json!({"status": "ok", "matches": [format!("{}_match", code)], "cursor_start": 0, "cursor_end": 2}),
                )
                .await;
        }
    };

    let (results, ()) = tokio::join!(futures::future::join_all(requests), kernel_script);
    assert!(results.iter().all(Result::is_ok));

    for ((_, mut events), code) in contexts.into_iter().zip(&codes) {
        let events = drain(&mut events);
        match &events[..] {
            [KernelEvent::CompletionsProduced { items, .. }, KernelEvent::CommandSucceeded] => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].insert_text, format!("{}_match", code));
            }
            other => panic!("unexpected events for {}: {:?}", code, other),
        }
    }
}

#[tokio::test]
async fn test_hover_strips_escape_sequences() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        assert_eq!(request.msg_type(), "inspect_request");
        assert_eq!(request.content["detail_level"], 0);
        kernel
            .send(
                Channel::Shell,
                &request,
                "inspect_reply",
                json!({
                    "status": "ok",
                    "found": true,
                    "data": {"text/plain": "\u{1b}[0;31mDocstring:\u{1b}[0m Prints the values."},
                    "metadata": {}
                }),
            )
            .await;
    };

    let (result, ()) = tokio::join!(
        connector.request_hover_text("print", LinePosition::new(0, 5), &ctx),
        kernel_script
    );
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::HoverTextProduced {
                content: vec![FormattedValue::plain_text("Docstring: Prints the values.")],
                span: LinePositionSpan::at(LinePosition::new(0, 5)),
            },
            KernelEvent::CommandSucceeded,
        ]
    );
}

#[tokio::test]
async fn test_signature_help_found_and_not_found() {
    let (connector, mut kernel) = connect(test_config());

    let (ctx, mut events) = context();
    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .send(
                Channel::Shell,
                &request,
                "inspect_reply",
                json!({"status": "ok", "found": true, "data": {"text/plain": "print(*args, sep=' ')"}}),
            )
            .await;
    };
    let (result, ()) = tokio::join!(
        connector.request_signature_help("print(", LinePosition::new(0, 6), &ctx),
        kernel_script
    );
    result.unwrap();

    match &drain(&mut events)[..] {
        [KernelEvent::SignatureHelpProduced {
            signatures,
            active_signature_index: 0,
            active_parameter_index: 0,
        }, KernelEvent::CommandSucceeded] => {
            assert_eq!(signatures.len(), 1);
            assert_eq!(signatures[0].documentation.value, "print(*args, sep=' ')");
            assert!(signatures[0].parameters.is_empty());
        }
        other => panic!("unexpected events {:?}", other),
    }

    let (ctx, mut events) = context();
    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .send(Channel::Shell, &request, "inspect_reply", json!({"status": "ok", "found": false, "data": {}}))
            .await;
    };
    let (result, ()) = tokio::join!(
        connector.request_signature_help("nothing", LinePosition::new(0, 3), &ctx),
        kernel_script
    );
    result.unwrap();

    assert_eq!(drain(&mut events), vec![KernelEvent::CommandSucceeded]);
}

#[tokio::test]
async fn test_query_error_reply_fails_command() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .send(
                Channel::Shell,
                &request,
                "complete_reply",
                json!({"status": "error", "ename": "KeyError", "evalue": "'completer'"}),
            )
            .await;
    };

    let (result, ()) = tokio::join!(
        connector.request_completions("x.", LinePosition::new(0, 2), &ctx),
        kernel_script
    );
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![KernelEvent::CommandFailed {
            message: "'completer'".to_string()
        }]
    );
}

#[tokio::test]
async fn test_cancel_sends_one_interrupt_and_keeps_sockets_open() {
    let (connector, mut kernel) = connect(test_config());
    let cancel = CancellationToken::new();
    let (ctx, mut events) = InvocationContext::new(cancel.clone());

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel.status(&request, "busy").await;
        cancel.cancel();

        let interrupt = kernel.recv(Channel::Control).await;
        assert_eq!(interrupt.msg_type(), "interrupt_request");
        kernel
            .send(Channel::Control, &interrupt, "interrupt_reply", json!({"status": "ok"}))
            .await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("while True: pass", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![KernelEvent::CommandFailed {
            message: "Command cancelled".to_string()
        }]
    );
    assert!(kernel.is_quiet(Channel::Control).await);
    assert!(connector.session().closed_channels().is_empty());

    // the connection still serves new commands
    let (ctx, mut events) = context();
    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .send(Channel::Shell, &request, "kernel_info_reply", kernel_info_content(false))
            .await;
    };
    let (result, ()) = tokio::join!(connector.request_kernel_info(&ctx), kernel_script);
    result.unwrap();
    assert_eq!(drain(&mut events).last(), Some(&KernelEvent::CommandSucceeded));
}

#[tokio::test]
async fn test_already_cancelled_command_sends_nothing() {
    let (connector, mut kernel) = connect(test_config());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (ctx, mut events) = InvocationContext::new(cancel);

    connector.submit_code("1", &ctx).await.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![KernelEvent::CommandFailed {
            message: "Command cancelled".to_string()
        }]
    );
    assert!(kernel.is_quiet(Channel::Shell).await);
    assert!(kernel.is_quiet(Channel::Control).await);
}

#[tokio::test]
async fn test_kernel_info_is_published_and_cached() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();
    assert!(connector.kernel_info().is_none());

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        assert_eq!(request.msg_type(), "kernel_info_request");
        kernel
            .send(Channel::Shell, &request, "kernel_info_reply", kernel_info_content(false))
            .await;
    };

    let (result, ()) = tokio::join!(connector.request_kernel_info(&ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::KernelInfoProduced {
                implementation: "ipython".to_string(),
                language_name: "python".to_string(),
                language_version: "3.12.1".to_string(),
                protocol_version: "5.3".to_string(),
                banner: "Python 3.12.1".to_string(),
            },
            KernelEvent::CommandSucceeded,
        ]
    );
    assert_eq!(connector.kernel_info().unwrap().implementation, "ipython");
}

#[tokio::test]
async fn test_value_infos_need_a_debugger() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .send(Channel::Shell, &request, "kernel_info_reply", kernel_info_content(false))
            .await;
    };

    let (result, ()) = tokio::join!(connector.request_value_infos(&ctx), kernel_script);

    assert!(matches!(result, Err(KernelError::NotImplemented(_))));
    assert!(drain(&mut events).is_empty());
    assert!(kernel.is_quiet(Channel::Control).await);
}

#[tokio::test]
async fn test_value_infos_from_debugger() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let info = kernel.recv(Channel::Shell).await;
        kernel
            .send(Channel::Shell, &info, "kernel_info_reply", kernel_info_content(true))
            .await;

        let request = kernel.recv(Channel::Control).await;
        assert_eq!(request.msg_type(), "debug_request");
        assert_eq!(request.content["command"], "inspectVariables");
        assert_eq!(request.content["type"], "request");
        kernel
            .send(
                Channel::Control,
                &request,
                "debug_reply",
                json!({
                    "seq": 2,
                    "type": "response",
                    "request_seq": request.content["seq"],
                    "success": true,
                    "command": "inspectVariables",
                    "body": {"variables": [
                        {"name": "x", "value": "42", "type": "int", "variablesReference": 0}
                    ]}
                }),
            )
            .await;
    };

    let (result, ()) = tokio::join!(connector.request_value_infos(&ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::ValueInfosProduced {
                value_infos: vec![KernelValueInfo {
                    name: "x".to_string(),
                    type_name: Some("int".to_string()),
                    preview: Some("42".to_string()),
                }],
            },
            KernelEvent::CommandSucceeded,
        ]
    );
}

#[tokio::test]
async fn test_request_value_renders_variable() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();
    let command = KernelCommand::RequestValue {
        name: "df".to_string(),
        mime_type: "text/plain".to_string(),
    };

    let kernel_script = async {
        let info = kernel.recv(Channel::Shell).await;
        kernel
            .send(Channel::Shell, &info, "kernel_info_reply", kernel_info_content(true))
            .await;

        let request = kernel.recv(Channel::Control).await;
        assert_eq!(request.msg_type(), "debug_request");
        assert_eq!(request.content["command"], "richInspectVariables");
        assert_eq!(request.content["arguments"]["variableName"], "df");
        kernel
            .send(
                Channel::Control,
                &request,
                "debug_reply",
                json!({
                    "type": "response",
                    "request_seq": request.content["seq"],
                    "success": true,
                    "command": "richInspectVariables",
                    "body": {"data": {"text/plain": "   a\n0  1"}, "metadata": {}}
                }),
            )
            .await;
    };

    let (result, ()) = tokio::join!(connector.handle(&command, &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::ValueProduced {
                name: "df".to_string(),
                formatted_value: FormattedValue::plain_text("   a\n0  1"),
            },
            KernelEvent::CommandSucceeded,
        ]
    );
}

#[tokio::test]
async fn test_request_value_for_unknown_variable_fails() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let info = kernel.recv(Channel::Shell).await;
        kernel
            .send(Channel::Shell, &info, "kernel_info_reply", kernel_info_content(true))
            .await;

        let request = kernel.recv(Channel::Control).await;
        kernel
            .send(
                Channel::Control,
                &request,
                "debug_reply",
                json!({
                    "type": "response",
                    "success": false,
                    "command": "richInspectVariables",
                    "message": "name 'missing' is not defined",
                    "body": {}
                }),
            )
            .await;
    };

    let (result, ()) = tokio::join!(connector.request_value("missing", "text/plain", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![KernelEvent::CommandFailed {
            message: "Failed to get variable missing.".to_string()
        }]
    );
}

#[tokio::test]
async fn test_request_value_needs_a_debugger() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        kernel
            .send(Channel::Shell, &request, "kernel_info_reply", kernel_info_content(false))
            .await;
    };

    let (result, ()) = tokio::join!(connector.request_value("x", "text/plain", &ctx), kernel_script);

    match result {
        Err(KernelError::NotImplemented(name)) => assert_eq!(name, "RequestValue"),
        other => panic!("expected NotImplemented, got {:?}", other),
    }
    assert!(drain(&mut events).is_empty());
    assert!(kernel.is_quiet(Channel::Control).await);
}

#[tokio::test]
async fn test_unsupported_commands_are_not_implemented() {
    let (connector, _kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let diagnostics = KernelCommand::RequestDiagnostics {
        code: "x = ".to_string(),
    };
    let send_value = KernelCommand::SendValue {
        name: "x".to_string(),
        value: FormattedValue::plain_text("1"),
    };

    for command in [diagnostics, send_value] {
        match connector.handle(&command, &ctx).await {
            Err(KernelError::NotImplemented(name)) => assert_eq!(name, command.name()),
            other => panic!("expected NotImplemented, got {:?}", other),
        }
    }
    assert!(drain(&mut events).is_empty());
}

struct Answer(&'static str);

#[async_trait]
impl InputProvider for Answer {
    async fn get_input(&self, prompt: &str, password: bool) -> Option<String> {
        assert_eq!(prompt, "Name: ");
        assert!(!password);
        Some(self.0.to_string())
    }
}

#[tokio::test]
async fn test_input_request_is_answered_by_provider() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();
    let ctx = ctx.with_input_provider(Arc::new(Answer("Ada")));

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        assert_eq!(request.content["allow_stdin"], true);

        let prompt = kernel
            .send(Channel::Stdin, &request, "input_request", json!({"prompt": "Name: ", "password": false}))
            .await;
        let reply = kernel.recv(Channel::Stdin).await;
        assert_eq!(reply.msg_type(), "input_reply");
        assert_eq!(reply.parent_id(), Some(prompt.msg_id()));

        let name = reply.content["value"].as_str().unwrap().to_string();
        kernel
            .publish(&request, "stream", json!({"name": "stdout", "text": format!("Hello {}", name)}))
            .await;
        kernel.finish(&request).await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("input('Name: ')", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            KernelEvent::StandardOutputValueProduced {
                text: "Hello Ada".to_string()
            },
            KernelEvent::CommandSucceeded,
        ]
    );
}

#[tokio::test]
async fn test_input_request_without_provider_gets_empty_answer() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let request = kernel.recv(Channel::Shell).await;
        assert_eq!(request.content["allow_stdin"], false);

        kernel
            .send(Channel::Stdin, &request, "input_request", json!({"prompt": "? "}))
            .await;
        let reply = kernel.recv(Channel::Stdin).await;
        assert_eq!(reply.content["value"], "");
        kernel.finish(&request).await;
    };

    let (result, ()) = tokio::join!(connector.submit_code("input()", &ctx), kernel_script);
    result.unwrap();

    assert_eq!(drain(&mut events), vec![KernelEvent::CommandSucceeded]);
}

#[tokio::test]
async fn test_shutdown_closes_every_channel() {
    let (connector, mut kernel) = connect(test_config());

    let kernel_script = async {
        let request = kernel.recv(Channel::Control).await;
        assert_eq!(request.msg_type(), "shutdown_request");
        assert_eq!(request.content["restart"], false);
        kernel
            .send(Channel::Control, &request, "shutdown_reply", json!({"status": "ok", "restart": false}))
            .await;
    };

    let (result, ()) = tokio::join!(connector.shutdown(), kernel_script);
    result.unwrap();

    assert!(connector.session().is_closed());
    assert_eq!(connector.session().closed_channels().len(), 4);

    let (ctx, mut events) = context();
    assert!(matches!(
        connector.submit_code("1", &ctx).await,
        Err(KernelError::ChannelClosed(_))
    ));
    assert!(drain(&mut events).is_empty());

    // a second shutdown is a no-op
    connector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connection_loss_ends_in_flight_command() {
    let (connector, mut kernel) = connect(test_config());
    let (ctx, mut events) = context();

    let kernel_script = async {
        let _request = kernel.recv(Channel::Shell).await;
        connector.session().shutdown_token().cancel();
    };

    let (result, ()) = tokio::join!(connector.submit_code("sleep(60)", &ctx), kernel_script);

    assert!(matches!(result, Err(KernelError::ChannelClosed(_))));
    assert!(drain(&mut events).is_empty());
}
