use jupyter_bridge::core::config::EngineConfig;
use jupyter_bridge::core::connection::KernelSpec;
use jupyter_bridge::{
    InvocationContext, JupyterKernelBuilder, KernelCommand, KernelConnector, KernelEvent,
};
use std::io::Read;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_ARGV: &str = "python3 -m ipykernel_launcher -f {connection_file}";

async fn run(connector: &impl KernelConnector, command: KernelCommand) -> anyhow::Result<()> {
    let (context, mut events) = InvocationContext::new(CancellationToken::new());
    println!("> {}", command);
    connector.handle(&command, &context).await?;
    drop(context);

    while let Some(event) = events.recv().await {
        match event {
            KernelEvent::StandardOutputValueProduced { text } => print!("{}", text),
            KernelEvent::StandardErrorValueProduced { text } => eprint!("{}", text),
            KernelEvent::CommandFailed { message } => println!("failed: {}", message),
            KernelEvent::CommandSucceeded => println!("ok"),
            other => println!("{:?}", other),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    #[cfg(feature = "env-file")]
    let config = EngineConfig::from_env_file("JUPYTER_BRIDGE")?;
    #[cfg(not(feature = "env-file"))]
    let config = EngineConfig::from_env("JUPYTER_BRIDGE")?;
    let argv = std::env::var("KERNEL_ARGV").unwrap_or_else(|_| DEFAULT_ARGV.to_string());
    let spec = KernelSpec::new(argv.split_whitespace().map(String::from).collect());

    println!("Launching kernel: {}", argv);
    let connector = JupyterKernelBuilder::new(spec)
        .with_config(config)
        .launch()
        .await?;

    run(&connector, KernelCommand::RequestKernelInfo).await?;

    // Code to run comes from stdin, e.g. `echo 'print(1)' | jupyter-bridge`
    let mut code = String::new();
    std::io::stdin().read_to_string(&mut code)?;
    if !code.trim().is_empty() {
        run(&connector, KernelCommand::SubmitCode { code }).await?;
    }

    connector.shutdown().await?;
    Ok(())
}
