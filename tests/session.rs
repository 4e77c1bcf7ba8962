//! Session bookkeeping: close, offline clients, id reuse and broadcast.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rpcmux::transport::Respond;
use rpcmux::{
    Context, MethodMeta, MethodTree, Request, RequestMessage, Response, ResponseMessage, RpcError,
    Server,
};
use serde_json::json;

type Sent = Arc<Mutex<Vec<ResponseMessage>>>;

fn recording() -> (Respond, Sent) {
    let sent: Sent = Arc::new(Mutex::new(Vec::new()));
    let sink = sent.clone();
    let respond: Respond = Arc::new(move |msg: ResponseMessage| {
        sink.lock().push(msg);
        Ok::<(), RpcError>(())
    });
    (respond, sent)
}

/// A server whose `watch` handler installs an end hook counting into `ended`
/// and then keeps the request open.
fn watch_server(ended: Arc<AtomicUsize>) -> Server {
    Server::builder()
        .methods(MethodTree::new().method(
            "watch",
            MethodMeta::new(),
            move |_req: Request, res: Response, _ctx: Context| {
                let ended = ended.clone();
                async move {
                    res.on_end(move || {
                        ended.fetch_add(1, Ordering::SeqCst);
                    });
                    res.emit("subscribed")
                }
            },
        ))
        .build()
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

fn call(server: &Server, session: u64, op: &str, id: u64, respond: &Respond) {
    server
        .parse(session, RequestMessage::call(op, vec![], Some(id)), respond.clone(), Context::new())
        .unwrap();
}

/// close() runs every end hook exactly once before returning.
#[tokio::test]
async fn test_close_runs_end_hooks_once() {
    let ended = Arc::new(AtomicUsize::new(0));
    let server = watch_server(ended.clone());
    let session = server.open();
    let (respond, sent) = recording();

    for id in 1..=3 {
        call(&server, session, "watch", id, &respond);
    }
    wait_for(|| sent.lock().len() == 3).await;
    assert_eq!(server.active_requests(session), Some(3));

    assert_eq!(server.close(session), 3);
    assert_eq!(ended.load(Ordering::SeqCst), 3);
    assert_eq!(server.active_requests(session), None);

    assert_eq!(server.close(session), 0);
    assert_eq!(ended.load(Ordering::SeqCst), 3);
}

/// client_offline() terminates requests but keeps the session usable.
#[tokio::test]
async fn test_client_offline_keeps_session() {
    let ended = Arc::new(AtomicUsize::new(0));
    let server = watch_server(ended.clone());
    let session = server.open();
    let (respond, sent) = recording();

    call(&server, session, "watch", 1, &respond);
    wait_for(|| sent.lock().len() == 1).await;

    assert_eq!(server.client_offline(session), 1);
    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert_eq!(server.active_requests(session), Some(0));

    call(&server, session, "watch", 1, &respond);
    wait_for(|| sent.lock().len() == 2).await;
    assert_eq!(server.active_requests(session), Some(1));
}

/// Sessions are isolated: ending an id in one leaves the other alone.
#[tokio::test]
async fn test_sessions_do_not_share_ids() {
    let ended = Arc::new(AtomicUsize::new(0));
    let server = watch_server(ended.clone());
    let a = server.open();
    let b = server.open();
    let (respond_a, sent_a) = recording();
    let (respond_b, sent_b) = recording();

    call(&server, a, "watch", 1, &respond_a);
    call(&server, b, "watch", 1, &respond_b);
    wait_for(|| sent_a.lock().len() == 1 && sent_b.lock().len() == 1).await;

    server
        .parse(a, RequestMessage::End { end: 1 }, respond_a.clone(), Context::new())
        .unwrap();

    assert_eq!(sent_a.lock().last(), Some(&ResponseMessage::fin(1)));
    assert_eq!(sent_b.lock().len(), 1);
    assert_eq!(server.active_requests(a), Some(0));
    assert_eq!(server.active_requests(b), Some(1));
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

/// Reusing a live id terminates the old request first.
#[tokio::test]
async fn test_id_collision_terminates_old_request() {
    let ended = Arc::new(AtomicUsize::new(0));
    let server = watch_server(ended.clone());
    let session = server.open();
    let (respond, sent) = recording();

    call(&server, session, "watch", 7, &respond);
    wait_for(|| sent.lock().len() == 1).await;

    call(&server, session, "watch", 7, &respond);
    assert_eq!(ended.load(Ordering::SeqCst), 1);
    wait_for(|| sent.lock().len() == 2).await;
    assert_eq!(server.active_requests(session), Some(1));

    server
        .parse(session, RequestMessage::End { end: 7 }, respond, Context::new())
        .unwrap();
    assert_eq!(ended.load(Ordering::SeqCst), 2);
}

/// broadcast reaches only live requests of the named operation.
#[tokio::test]
async fn test_broadcast_reaches_live_subscribers() {
    let ended = Arc::new(AtomicUsize::new(0));
    let server = watch_server(ended);
    server.insert_methods(MethodTree::new().method(
        "idle",
        MethodMeta::new(),
        |_req: Request, _res: Response, _ctx: Context| async move { Ok(()) },
    ));

    let a = server.open();
    let b = server.open();
    let (respond_a, sent_a) = recording();
    let (respond_b, sent_b) = recording();

    call(&server, a, "watch", 1, &respond_a);
    call(&server, a, "watch", 2, &respond_a);
    call(&server, a, "idle", 3, &respond_a);
    call(&server, b, "watch", 1, &respond_b);
    wait_for(|| sent_a.lock().len() == 2 && sent_b.lock().len() == 1).await;

    server
        .parse(a, RequestMessage::End { end: 2 }, respond_a.clone(), Context::new())
        .unwrap();
    sent_a.lock().clear();
    sent_b.lock().clear();

    assert_eq!(server.broadcast("watch", &json!({ "temp": 21 })).unwrap(), 2);
    assert_eq!(*sent_a.lock(), vec![ResponseMessage::sig(1, json!({ "temp": 21 }))]);
    assert_eq!(*sent_b.lock(), vec![ResponseMessage::sig(1, json!({ "temp": 21 }))]);

    assert_eq!(server.broadcast("nobody", &1).unwrap(), 0);
}

/// Messages for a session that was never opened are rejected.
#[tokio::test]
async fn test_unknown_session_rejected() {
    let server = Server::new();
    let (respond, sent) = recording();

    let err = server
        .parse(42, RequestMessage::End { end: 1 }, respond, Context::new())
        .unwrap_err();
    assert!(matches!(err, RpcError::SessionNotOpen(42)));
    assert!(sent.lock().is_empty());
}
