use stomp_session::{CallbackKind, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // This example expects a STOMP broker on localhost:61613 (e.g. RabbitMQ
    // with the stomp plugin enabled).

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut session = Session::new(0u32);

    session.callback_set(
        CallbackKind::Connected,
        Box::new(|session, frame| {
            println!("connected (version {}):\n{}", session.version(), frame.unwrap());
            session
                .subscribe(vec![("destination".into(), "/queue/test".into())])
                .unwrap();
        }),
    );

    session.callback_set(
        CallbackKind::Message,
        Box::new(|session, frame| {
            let frame = frame.unwrap();
            println!("message: {}", String::from_utf8_lossy(&frame.body));
            *session.context_mut() += 1;
            // hang up after a handful of messages
            if *session.context() >= 5 {
                session.disconnect(Vec::new()).unwrap();
            }
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
                ("heart-beat".into(), "10000,10000".into()),
            ],
        )
        .await?;

    session.run().await?;
    println!("done after {} messages", session.context());

    Ok(())
}
