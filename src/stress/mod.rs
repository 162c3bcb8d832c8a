//! Internal stress tests for multiplexing.
//!
//! Many tasks share one link while the server drops the connection part way
//! through; every caller must still get the reply to its own command.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::builder::ClientBuilder;
use crate::core::command;
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Echo server whose first connection dies after answering `cut` requests.
async fn flaky_echo_server(cut: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(s) => s,
                Err(_) => break,
            };
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;

            tokio::spawn(async move {
                let mut decoder = Decoder::new();
                let mut encoder = Encoder::new();
                let mut buf = [0u8; 4096];
                let mut answered = 0;

                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    decoder.append(&buf[..n]);

                    while let Ok(Some(frame)) = decoder.decode() {
                        if first && answered == cut {
                            return;
                        }
                        let response = match frame.into_array() {
                            Some(mut args) if args.len() == 2 => args.pop().unwrap(),
                            Some(_) => Frame::SimpleString(b"PONG".to_vec()),
                            None => Frame::error("ERR format"),
                        };
                        encoder.encode(&response);
                        let data = encoder.take();
                        if socket.write_all(&data).await.is_err() {
                            return;
                        }
                        answered += 1;
                    }
                }
            });
        }
    });

    (format!("redis://{addr}"), accepted)
}

#[tokio::test]
async fn test_multiplexing_stress() {
    let (uri, _) = flaky_echo_server(usize::MAX).await;
    let client = ClientBuilder::new()
        .address(uri)
        .queue_size(10000)
        .build()
        .await
        .expect("Failed to connect");

    let mut handles = Vec::new();
    for i in 0..1000 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let payload = format!("payload-{i}");
            let res = client.echo(&payload).await;
            assert_eq!(res.unwrap(), payload.as_bytes());
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_replay_under_load_keeps_replies_matched() {
    crate::testing::init_tracing();
    let (uri, accepted) = flaky_echo_server(300).await;
    let client = ClientBuilder::new()
        .address(uri)
        .queue_size(10000)
        .build()
        .await
        .expect("Failed to connect");

    let mut handles = Vec::new();
    for i in 0..1000 {
        let link = client.link().clone();
        handles.push(tokio::spawn(async move {
            let payload = format!("payload-{i}");
            let reply = link.execute(command::echo(payload.clone())).await;
            assert_eq!(reply.unwrap(), Frame::bulk(payload));
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(accepted.load(Ordering::SeqCst) >= 2);
}
