//! Integration tests — full frame round-trips over a real TCP connection,
//! and `Deferred` chain behavior under concurrent settlement.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use workerpool_core::{
    Deferred, Frame, FrameBody, PoolError, RequestBody, ResponseBody, ResponseOutcome,
    WorkerPoolCodec,
};

async fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (server, _) = listener.accept().await.unwrap();
    let client = connect.await.unwrap();
    (server, client)
}

#[tokio::test]
async fn test_ready_handshake_over_tcp() {
    let (server, client) = loopback_pair().await;
    let mut worker_side = Framed::new(server, WorkerPoolCodec::new());
    let mut pool_side = Framed::new(client, WorkerPoolCodec::new());

    worker_side.send(Frame::ready()).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), pool_side.next())
        .await
        .expect("timeout")
        .expect("stream closed")
        .expect("decode error");

    assert!(matches!(frame.body, FrameBody::Ready));
}

#[tokio::test]
async fn test_request_response_round_trip() {
    let (server, client) = loopback_pair().await;
    let mut worker_side = Framed::new(server, WorkerPoolCodec::new());
    let mut pool_side = Framed::new(client, WorkerPoolCodec::new());

    let request = RequestBody {
        method: "add".to_string(),
        params: vec![Value::from(2), Value::from(3)],
        transferables: vec![],
    };
    pool_side.send(Frame::request(1, request)).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), worker_side.next())
        .await
        .expect("timeout")
        .expect("stream closed")
        .expect("decode error");

    let method = match received.body {
        FrameBody::Request(body) => body.method,
        _ => panic!("expected request frame"),
    };
    assert_eq!(method, "add");
    assert_eq!(received.request_id, 1);

    let response = ResponseBody {
        outcome: ResponseOutcome::Ok {
            result: Value::from(5),
            transferables: vec![],
        },
    };
    worker_side
        .send(Frame::response(1, response))
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), pool_side.next())
        .await
        .expect("timeout")
        .expect("stream closed")
        .expect("decode error");

    match reply.body {
        FrameBody::Response(body) => match body.outcome {
            ResponseOutcome::Ok { result, .. } => assert_eq!(result, Value::from(5)),
            ResponseOutcome::Err { .. } => panic!("expected ok"),
        },
        _ => panic!("expected response frame"),
    }
}

#[tokio::test]
async fn test_multiple_requests_preserve_ids() {
    let (server, client) = loopback_pair().await;
    let mut worker_side = Framed::new(server, WorkerPoolCodec::new());
    let mut pool_side = Framed::new(client, WorkerPoolCodec::new());

    for id in 1u64..=5 {
        let body = RequestBody {
            method: "ping".to_string(),
            params: vec![],
            transferables: vec![],
        };
        pool_side.send(Frame::request(id, body)).await.unwrap();
    }

    for expected_id in 1u64..=5 {
        let frame = tokio::time::timeout(Duration::from_secs(5), worker_side.next())
            .await
            .expect("timeout")
            .expect("stream closed")
            .expect("decode error");
        assert_eq!(frame.request_id, expected_id);
    }
}

#[tokio::test]
async fn test_terminate_frame_round_trip() {
    let (server, client) = loopback_pair().await;
    let mut worker_side = Framed::new(server, WorkerPoolCodec::new());
    let mut pool_side = Framed::new(client, WorkerPoolCodec::new());

    pool_side.send(Frame::terminate()).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), worker_side.next())
        .await
        .expect("timeout")
        .expect("stream closed")
        .expect("decode error");
    assert!(matches!(frame.body, FrameBody::Terminate));
}

#[tokio::test]
async fn test_error_response_round_trip() {
    let (server, client) = loopback_pair().await;
    let mut worker_side = Framed::new(server, WorkerPoolCodec::new());
    let mut pool_side = Framed::new(client, WorkerPoolCodec::new());

    let body = ResponseBody {
        outcome: ResponseOutcome::Err {
            error: workerpool_core::WireErrorPayload::from_unknown_method("frobnicate"),
        },
    };
    worker_side.send(Frame::response(9, body)).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), pool_side.next())
        .await
        .expect("timeout")
        .expect("stream closed")
        .expect("decode error");

    assert_eq!(frame.request_id, 9);
    match frame.body {
        FrameBody::Response(body) => match body.outcome {
            ResponseOutcome::Err { error } => {
                assert_eq!(error.name, "UnknownMethod");
                assert!(error.message.contains("frobnicate"));
            }
            ResponseOutcome::Ok { .. } => panic!("expected error"),
        },
        _ => panic!("expected response frame"),
    }
}

// ── Deferred chains ──────────────────────────────────────────────

#[tokio::test]
async fn test_deferred_chain_settles_in_order_across_tasks() {
    let (deferred, settler) = Deferred::<i32>::new(1);
    let step1 = deferred.then(|v| async move { v + 1 });
    let step2 = step1.then(|v| async move { v * 10 });

    settler.resolve(1);
    assert_eq!(step2.wait().await.unwrap(), 20);
}

#[tokio::test]
async fn test_deferred_cancel_from_deep_chain_rejects_everything() {
    let (deferred, _settler) = Deferred::<i32>::new(1);
    let step1 = deferred.then(|v| async move { v + 1 });
    let step2 = step1.then(|v| async move { v + 1 });
    let step3 = step2.then(|v| async move { v + 1 });

    step3.cancel();

    assert!(matches!(
        deferred.wait().await,
        Err(PoolError::Cancelled { task_id: 1 })
    ));
    assert!(matches!(
        step3.wait().await,
        Err(PoolError::Cancelled { task_id: 1 })
    ));
}
