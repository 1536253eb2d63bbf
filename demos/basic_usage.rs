use jupyter_bridge::core::config::EngineConfig;
use jupyter_bridge::core::traits::{CodeExecutor, KernelIntrospection, LanguageServices};
use jupyter_bridge::core::wire::{
    Channel, FrameTransport, HmacSigner, MemoryTransport, SignatureScheme, WireCodec,
};
use jupyter_bridge::jupyter::{
    build_connector_with_transports, ChannelTransports, Header, JupyterCodec, JupyterMessage,
};
use jupyter_bridge::{InvocationContext, KernelError, KernelEvent, LinePosition};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const KEY: &str = "basic-usage-key";

/// A tiny in-process kernel that answers the three requests this example sends
struct ToyKernel {
    codec: JupyterCodec,
    shell: MemoryTransport,
    iopub: MemoryTransport,
}

impl ToyKernel {
    async fn reply(
        &mut self,
        channel: Channel,
        parent: &JupyterMessage,
        msg_type: &str,
        content: Value,
    ) -> Result<(), KernelError> {
        let message = JupyterMessage::new(channel, Header::new(msg_type, "toy", "kernel"), content)
            .with_parent(parent.header.clone());
        let frames = self.codec.encode_message(&message)?;
        match channel {
            Channel::IoPub => self.iopub.send_frames(frames).await?,
            _ => self.shell.send_frames(frames).await?,
        }
        Ok(())
    }

    async fn serve(mut self) -> Result<(), KernelError> {
        loop {
            let frames = self.shell.recv_frames().await?;
            let Some(request) = self.codec.decode_message(Channel::Shell, frames)? else {
                continue;
            };

            match request.msg_type() {
                "kernel_info_request" => {
                    let info = json!({
                        "status": "ok",
                        "protocol_version": "5.3",
                        "implementation": "toy",
                        "language_info": {"name": "toy", "version": "0.1"},
                        "banner": "Toy kernel"
                    });
                    self.reply(Channel::Shell, &request, "kernel_info_reply", info).await?;
                }
                "execute_request" => {
                    let code = request.content["code"].as_str().unwrap_or_default().to_string();
                    self.reply(Channel::IoPub, &request, "status", json!({"execution_state": "busy"}))
                        .await?;
                    self.reply(
                        Channel::IoPub,
                        &request,
                        "stream",
                        json!({"name": "stdout", "text": format!("echo: {}\n", code)}),
                    )
                    .await?;
                    self.reply(Channel::Shell, &request, "execute_reply", json!({"status": "ok"}))
                        .await?;
                    self.reply(Channel::IoPub, &request, "status", json!({"execution_state": "idle"}))
                        .await?;
                }
                "complete_request" => {
                    let cursor = request.content["cursor_pos"].as_u64().unwrap_or(0);
                    let reply = json!({
                        "status": "ok",
                        "matches": ["print", "property"],
                        "cursor_start": 0,
                        "cursor_end": cursor,
                        "metadata": {}
                    });
                    self.reply(Channel::Shell, &request, "complete_reply", reply).await?;
                }
                other => println!("toy kernel ignores {}", other),
            }
        }
    }
}

fn print_events(events: &mut tokio::sync::mpsc::UnboundedReceiver<KernelEvent>) {
    while let Ok(event) = events.try_recv() {
        println!("  {:?}", event);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Wire the client to an in-process kernel; a real kernel is launched with
    // JupyterKernelBuilder instead (see src/main.rs)
    let (shell, kernel_shell) = MemoryTransport::pair("shell");
    let (control, _kernel_control) = MemoryTransport::pair("control");
    let (stdin, _kernel_stdin) = MemoryTransport::pair("stdin");
    let (iopub, kernel_iopub) = MemoryTransport::pair("iopub");

    let kernel = ToyKernel {
        codec: JupyterCodec::new(
            Arc::new(HmacSigner::new(KEY, SignatureScheme::HmacSha256)?),
            true,
        ),
        shell: kernel_shell,
        iopub: kernel_iopub,
    };
    let kernel_task = tokio::spawn(kernel.serve());

    let connector = build_connector_with_transports(
        ChannelTransports {
            shell,
            control,
            stdin,
            iopub,
        },
        KEY,
        EngineConfig::new(),
    )?;

    // Example 1: Kernel info
    println!("=== Kernel Info ===");
    let (ctx, mut events) = InvocationContext::new(CancellationToken::new());
    match connector.request_kernel_info(&ctx).await {
        Ok(()) => print_events(&mut events),
        Err(e) => eprintln!("Failed to get kernel info: {}", e),
    }

    // Example 2: Run code
    println!("\n=== Submit Code ===");
    let (ctx, mut events) = InvocationContext::new(CancellationToken::new());
    match connector.submit_code("1 + 1", &ctx).await {
        Ok(()) => print_events(&mut events),
        Err(e) => eprintln!("Failed to run code: {}", e),
    }

    // Example 3: Completions at the end of "pr"
    println!("\n=== Completions ===");
    let (ctx, mut events) = InvocationContext::new(CancellationToken::new());
    match connector
        .request_completions("pr", LinePosition::new(0, 2), &ctx)
        .await
    {
        Ok(()) => print_events(&mut events),
        Err(e) => eprintln!("Failed to get completions: {}", e),
    }

    connector.session().close().await;
    kernel_task.abort();
    Ok(())
}
