//! Stream - signals in both directions with a credit window.
//!
//! This example demonstrates:
//! - A streaming method that emits progress signals before its final ack
//! - Acknowledging each signal from the client with a `push`
//! - Throttling the producer with [`FlowControl`]
//!
//! ```text
//! RUST_LOG=rpcmux=debug cargo run --example stream
//! ```

use std::time::Duration;

use rpcmux::transport::Loopback;
use rpcmux::{Context, FlowControl, MethodMeta, MethodTree, Request, Response, RpcError, Server};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

/// Progress signal emitted for every step.
#[derive(Serialize, Debug)]
struct Progress {
    step: u64,
    percent: u64,
}

async fn work(mut req: Request, res: Response, _ctx: Context) -> rpcmux::HandlerResult {
    let steps = req.arg(0).and_then(Value::as_u64).unwrap_or(10);
    let mut acks = req
        .take_signals()
        .ok_or_else(|| RpcError::handler("work needs a stream"))?;

    let flow = FlowControl::new(4);
    let acker = flow.clone();
    tokio::spawn(async move {
        while let Some(signal) = acks.recv().await {
            if let Some(n) = signal.data()["_ack"].as_u64() {
                acker.release(n as usize);
            }
        }
    });

    for step in 1..=steps {
        flow.reserve().await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        res.emit(&Progress {
            step,
            percent: step * 100 / steps,
        })?;
    }
    res.send(&json!({ "steps": steps }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = Server::builder()
        .methods(MethodTree::new().method(
            "work",
            MethodMeta::new().doc("Run a job, reporting progress").streaming(),
            work,
        ))
        .build();

    let link = Loopback::connect(&server, Context::new());
    let client = link.client();

    let (id, mut replies) = client.subscribe("work", vec![json!(8)])?;
    while let Some(reply) = replies.recv().await {
        if reply.end {
            println!("done: {}", reply.data);
            break;
        }
        println!("progress: {}", reply.data);
        client.send(id, &json!({ "_ack": 1 }))?;
    }

    link.disconnect();
    Ok(())
}
