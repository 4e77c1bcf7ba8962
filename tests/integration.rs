//! Integration tests for rpcmux.
//!
//! These tests drive a real [`Server`] through a [`Client`] over the
//! in-process loopback transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rpcmux::codec::{JsonCodec, MsgPackCodec};
use rpcmux::transport::Loopback;
use rpcmux::{
    Context, ErrorCode, MethodMeta, MethodTree, Reply, Request, RequestMessage, Response,
    ResponseMessage, RpcError, Server,
};
use serde_json::{json, Value};

fn demo_server() -> Server {
    Server::builder()
        .methods(
            MethodTree::new()
                .method(
                    "echo",
                    MethodMeta::new().doc("Echo the first argument"),
                    |req: Request, res: Response, _ctx: Context| async move {
                        res.send(&req.arg(0).cloned().unwrap_or(Value::Null))
                    },
                )
                .typed_method(
                    "count",
                    MethodMeta::new().doc("Emit 1..n, last one as ack"),
                    |(n,): (u64,), res: Response, _ctx: Context| async move {
                        for i in 1..n {
                            res.emit(&i)?;
                        }
                        res.send(&n)
                    },
                )
                .method(
                    "twice",
                    MethodMeta::new(),
                    |_req: Request, res: Response, _ctx: Context| async move {
                        res.send("first")?;
                        res.send("second")
                    },
                )
                .method(
                    "watch",
                    MethodMeta::new().streaming(),
                    |_req: Request, res: Response, _ctx: Context| async move {
                        res.emit("started")
                    },
                ),
        )
        .build()
}

type Replies = Arc<Mutex<Vec<Reply>>>;

fn collect() -> (Replies, impl FnMut(&rpcmux::CallContext, Reply) + Send + 'static) {
    let replies: Replies = Arc::new(Mutex::new(Vec::new()));
    let sink = replies.clone();
    (replies, move |_cx: &rpcmux::CallContext, reply: Reply| {
        sink.lock().push(reply)
    })
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// echo answers exactly once with `(None, "hi", true)`.
#[tokio::test]
async fn test_echo_single_terminal_reply() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());
    let (replies, cb) = collect();

    let id = link.client().request("echo", vec![json!("hi")], cb).unwrap();
    wait_for(|| !link.client().is_pending(id)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        *replies.lock(),
        vec![Reply {
            err: None,
            data: json!("hi"),
            end: true
        }]
    );
    assert_eq!(server.active_requests(link.session()), Some(0));
}

/// count(3) yields two signals and a terminal ack, in order.
#[tokio::test]
async fn test_count_signals_in_order() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());
    let (replies, cb) = collect();

    let id = link.client().request("count", vec![json!(3)], cb).unwrap();
    wait_for(|| !link.client().is_pending(id)).await;

    let got: Vec<(Option<Value>, Value, bool)> = replies
        .lock()
        .iter()
        .map(|r| (r.err.clone(), r.data.clone(), r.end))
        .collect();
    assert_eq!(
        got,
        vec![
            (None, json!(1), false),
            (None, json!(2), false),
            (None, json!(3), true),
        ]
    );
}

/// An unknown operation is answered with code 300 and runs nothing.
#[tokio::test]
async fn test_unknown_operation() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());

    let err = link.client().call("no.such.op", vec![]).await.unwrap_err();
    let data = match err {
        RpcError::Remote(data) => data,
        other => panic!("expected remote error, got {other:?}"),
    };
    assert_eq!(data, json!({ "code": 300, "msg": "No method found: no.such.op" }));
}

/// Bad typed arguments surface as a handler failure.
#[tokio::test]
async fn test_typed_argument_mismatch_is_578() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());

    let err = link.client().call("count", vec![json!("three")]).await.unwrap_err();
    let data = match err {
        RpcError::Remote(data) => data,
        other => panic!("expected remote error, got {other:?}"),
    };
    assert_eq!(data["code"], json!(ErrorCode::HandlerFailed.code()));
    assert_eq!(data["msg"], json!("rpc failed during execution of count"));
}

/// A second terminal call fails locally and sends nothing.
#[tokio::test]
async fn test_double_send_is_rejected() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());
    let (replies, cb) = collect();

    let id = link.client().request("twice", vec![], cb).unwrap();
    wait_for(|| !link.client().is_pending(id)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The handler's `?` surfaced RequestInactive; the 578 report finds the
    // request already gone, so the client only ever sees the first ack.
    assert_eq!(
        *replies.lock(),
        vec![Reply {
            err: None,
            data: json!("first"),
            end: true
        }]
    );
}

/// cancel() writes one `end`, the server answers `fin`, and the callback
/// stays silent.
#[tokio::test]
async fn test_cancel_streaming_request() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());
    let (replies, cb) = collect();

    let id = link.client().request("watch", vec![], cb).unwrap();
    wait_for(|| !replies.lock().is_empty()).await;
    assert_eq!(replies.lock()[0].data, json!("started"));

    link.client().cancel(id).unwrap();
    link.client().cancel(id).unwrap();

    wait_for(|| !link.client().is_pending(id)).await;
    assert_eq!(server.active_requests(link.session()), Some(0));
    assert_eq!(replies.lock().len(), 1);
}

/// A `call` abandoned by its caller is canceled on both sides.
#[tokio::test]
async fn test_abandoned_call_cleans_up() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());

    for _ in 0..3 {
        let outcome =
            tokio::time::timeout(Duration::from_millis(20), link.client().call("watch", vec![])).await;
        assert!(outcome.is_err());
    }

    wait_for(|| link.client().pending_count() == 0).await;
    wait_for(|| server.active_requests(link.session()) == Some(0)).await;
}

/// The built-in `methods` lists everything when no gate is set.
#[tokio::test]
async fn test_methods_listing() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());

    let methods = link.client().methods().await.unwrap();
    let mut names: Vec<&str> = methods.keys().map(String::as_str).collect();
    names.sort();
    assert_eq!(names, vec!["count", "echo", "twice", "watch"]);
    assert_eq!(methods["echo"], json!({ "doc": "Echo the first argument" }));
    assert_eq!(methods["watch"], json!({ "stream": true }));
}

/// Fire-and-forget calls run the handler and never create a request.
#[tokio::test]
async fn test_fire_and_forget() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let server = Server::builder()
        .method("log", MethodMeta::new(), move |req: Request, res: Response, _ctx: Context| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(req.id(), None);
                res.send("ignored")
            }
        })
        .build();
    let link = Loopback::connect(&server, Context::new());

    link.client().notify("log", vec![json!("line")]).unwrap();
    wait_for(|| hits.load(Ordering::SeqCst) == 1).await;

    assert_eq!(server.active_requests(link.session()), Some(0));
    assert_eq!(link.client().pending_count(), 0);
}

/// Dropping the connection terminates pending client requests.
#[tokio::test]
async fn test_disconnect_terminates_pending() {
    let server = demo_server();
    let link = Loopback::connect(&server, Context::new());
    let client = link.client().clone();
    let session = link.session();
    let (replies, cb) = collect();

    client.request("watch", vec![], cb).unwrap();
    wait_for(|| !replies.lock().is_empty()).await;

    link.disconnect();

    assert_eq!(server.active_requests(session), None);
    let last = replies.lock().last().cloned().unwrap();
    assert!(last.end);
    assert_eq!(
        last.error_payload().unwrap().msg,
        "request terminated by remote host"
    );
}

/// Records survive a byte-level hop through either codec.
#[tokio::test]
async fn test_server_over_encoded_bytes() {
    let server = demo_server();
    let session = server.open();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<bytes::Bytes>();
    let respond: rpcmux::transport::Respond = Arc::new(move |msg: ResponseMessage| {
        tx.send(MsgPackCodec::encode(&msg)?)
            .map_err(|_| RpcError::transport("closed"))
    });

    let wire = JsonCodec::encode(&RequestMessage::call("echo", vec![json!({ "k": [1, 2] })], Some(4))).unwrap();
    let msg: RequestMessage = JsonCodec::decode(&wire).unwrap();
    server.parse(session, msg, respond, Context::new()).unwrap();

    let bytes = rx.recv().await.unwrap();
    let reply: ResponseMessage = MsgPackCodec::decode(&bytes).unwrap();
    assert_eq!(reply, ResponseMessage::ack(4, json!({ "k": [1, 2] })));
}
