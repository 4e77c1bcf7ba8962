//! ACL - gating methods with an access-control function.
//!
//! This example demonstrates:
//! - Public and acl-protected methods in a namespace
//! - An access-control gate reading per-connection data
//! - The `methods` listing filtered per peer
//!
//! ```text
//! RUST_LOG=rpcmux=debug cargo run --example acl
//! ```

use rpcmux::transport::Loopback;
use rpcmux::{AccessDecision, Context, MethodMeta, MethodTree, Request, Response, Server};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

/// Per-connection identity.
#[derive(Debug)]
struct Session {
    roles: Vec<&'static str>,
}

async fn gate(resource: String, acl: Value, ctx: Context) -> rpcmux::Result<AccessDecision> {
    let roles = ctx.data::<Session>().map(|s| s.roles.clone()).unwrap_or_default();
    let required: Vec<&str> = acl
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    tracing::info!(resource = %resource, ?required, ?roles, "access check");
    if required.iter().all(|r| roles.contains(r)) {
        Ok(AccessDecision::allow_with(roles))
    } else {
        Ok(AccessDecision::deny())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = Server::builder()
        .namespace(
            "device",
            MethodTree::new()
                .method(
                    "status",
                    MethodMeta::new().public(),
                    |_req: Request, res: Response, _ctx: Context| async move { res.send("ok") },
                )
                .method(
                    "reboot",
                    MethodMeta::new().acl(json!(["admin"])),
                    |_req: Request, res: Response, _ctx: Context| async move { res.send("rebooting") },
                ),
        )
        .access_control(gate)
        .build();

    let guest = Loopback::connect(&server, Context::with_data(Session { roles: vec![] }));
    let admin = Loopback::connect(&server, Context::with_data(Session { roles: vec!["admin"] }));

    for (name, link) in [("guest", &guest), ("admin", &admin)] {
        let methods: Vec<String> = link.client().methods().await?.keys().cloned().collect();
        println!("{name} sees {methods:?}");

        match link.client().call("device.reboot", vec![]).await {
            Ok(reply) => println!("{name}: {reply}"),
            Err(e) => println!("{name}: {e}"),
        }
    }

    guest.disconnect();
    admin.disconnect();
    Ok(())
}
