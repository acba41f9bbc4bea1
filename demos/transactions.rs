use stomp_session::{CallbackKind, Session};

fn hdr(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // This example expects a STOMP broker on localhost:61613 (e.g. RabbitMQ
    // with the stomp plugin enabled).

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut session = Session::new(());

    session.callback_set(
        CallbackKind::Connected,
        Box::new(|session, _| {
            // Two messages committed atomically
            let tx = "tx-example-1";
            session.begin(vec![hdr("transaction", tx)]).unwrap();
            session
                .send(
                    vec![hdr("destination", "/queue/test"), hdr("transaction", tx)],
                    b"message 1 in transaction".to_vec(),
                )
                .unwrap();
            session
                .send(
                    vec![hdr("destination", "/queue/test"), hdr("transaction", tx)],
                    b"message 2 in transaction".to_vec(),
                )
                .unwrap();
            session.commit(vec![hdr("transaction", tx)]).unwrap();
            println!("transaction {} committed", tx);

            // And one that never reaches the queue
            let tx = "tx-example-2";
            session.begin(vec![hdr("transaction", tx)]).unwrap();
            session
                .send(
                    vec![hdr("destination", "/queue/test"), hdr("transaction", tx)],
                    b"this message will be aborted".to_vec(),
                )
                .unwrap();
            session.abort(vec![hdr("transaction", tx)]).unwrap();
            println!("transaction {} aborted", tx);

            session.disconnect(Vec::new()).unwrap();
        }),
    );

    session.callback_set(
        CallbackKind::Error,
        Box::new(|_, frame| match frame {
            Some(frame) => eprintln!("broker error:\n{}", frame),
            None => eprintln!("connection failed"),
        }),
    );

    session
        .connect(
            "127.0.0.1",
            "61613",
            vec![
                ("login".into(), "guest".into()),
                ("passcode".into(), "guest".into()),
            ],
        )
        .await?;

    session.run().await?;
    Ok(())
}
