use std::sync::Arc;

use jsonlink::{
    CancellationTokenSource, Connection, ConnectionOptions, MethodType, Result, Trace,
    TracingTracer,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = ConnectionOptions {
        trace: Trace::Messages,
        tracer: Some(Arc::new(TracingTracer)),
        ..ConnectionOptions::default()
    };
    let (server, client) = Connection::new_channel(&options);

    server.on_request(MethodType::typed("echo", 1), |params, cx| {
        cx.success(&params.arg::<String>(0)?)
    })?;
    server.on_request("wait", |_, cx| {
        let token = cx.token().clone();
        cx.handle_async(async move {
            token.cancelled().await;
            Ok("cancelled")
        })
    })?;
    server.on_notification("log", |params, _| {
        tracing::info!("client says {}", params.arg::<String>(0)?);
        Ok(())
    })?;
    server.listen()?;
    client.listen()?;

    let s: String = client.request(MethodType::typed("echo", 1), ("hi",)).await?;
    tracing::info!("echo returned {s}");

    client.send_notification("log", ("hello",))?;

    let source = CancellationTokenSource::new();
    let f = client.send_request("wait", (), Some(&source.token()))?;
    source.cancel();
    tracing::info!("wait returned {}", f.await?);

    client.dispose();
    server.dispose();
    Ok(())
}
