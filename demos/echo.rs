//! Echo - simple request/response example.
//!
//! This example demonstrates:
//! - Building a server with the builder pattern
//! - Registering a typed method handler
//! - Calling it from a client over the in-process loopback transport
//!
//! ```text
//! RUST_LOG=rpcmux=debug cargo run --example echo
//! ```

use rpcmux::transport::Loopback;
use rpcmux::{Context, MethodMeta, MethodTree, Response, Server};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Input structure for the echo method.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo method.
#[derive(Serialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = Server::builder()
        .methods(MethodTree::new().typed_method(
            "echo",
            MethodMeta::new().doc("Echo a message back").public(),
            |(input,): (EchoInput,), res: Response, _ctx: Context| async move {
                res.send(&EchoOutput { echo: input.message })
            },
        ))
        .build();

    let link = Loopback::connect(&server, Context::new());

    let reply = link
        .client()
        .call("echo", vec![json!({ "message": "hello" })])
        .await?;
    println!("{reply}");

    let methods = link.client().methods().await?;
    println!("methods: {}", serde_json::Value::Object(methods));

    link.disconnect();
    Ok(())
}
