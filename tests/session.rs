use std::time::Duration;

use scpi_link::{Error, ErrorKind, LinkConfig, Session, SessionState, mock::MockConnector};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    time::Instant,
};

fn config() -> LinkConfig {
    LinkConfig::tcp("192.0.2.1", 8802)
}

async fn open(mock: &MockConnector) -> Session<MockConnector> {
    let mut session = Session::with_connector(mock.clone());
    session.open(config()).await.unwrap();
    session
}

#[tokio::test]
async fn idn_split_across_reads() {
    let mock = MockConnector::new();
    let mut session = open(&mock).await;
    mock.push_reply(b"ACME,MODEL1,SN1");
    mock.push_reply(b"234\n");

    let resp = session
        .query_with_timeout("*IDN?", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(resp, "ACME,MODEL1,SN1234");
}

#[tokio::test]
async fn response_independent_of_fragmentation() {
    let reply = b"+1.00000E+00,+2.50000E-03\r\n";

    for split in 1..reply.len() {
        let mock = MockConnector::new();
        let mut session = open(&mock).await;
        for chunk in reply.chunks(split) {
            mock.push_reply(chunk);
        }

        let resp = session.query(":FETCh?").await.unwrap();
        assert_eq!(resp, "+1.00000E+00,+2.50000E-03", "chunk size {split}");
    }
}

#[tokio::test(start_paused = true)]
async fn silent_instrument_times_out() {
    let mock = MockConnector::new();
    let mut session = open(&mock).await;

    let start = Instant::now();
    let err = session
        .query_with_timeout("*IDN?", Duration::from_millis(200))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, Error::Timeout(_)));
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "{elapsed:?}");
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn send_while_disconnected() {
    let mock = MockConnector::new();
    let mut session = Session::with_connector(mock.clone());

    let err = session.send("*RST").await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(mock.written().is_empty());
    assert_eq!(mock.connects(), 0);
}

#[tokio::test]
async fn second_open_is_rejected() {
    let mock = MockConnector::new();
    let mut session = open(&mock).await;

    let err = session
        .open(LinkConfig::serial("/dev/ttyUSB0", 9600))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen));
    assert_eq!(mock.connects(), 1);
    assert_eq!(session.config(), Some(&config()));

    /* Original link still works */
    mock.push_reply(b"1\n");
    assert_eq!(session.query("*OPC?").await.unwrap(), "1");
}

#[tokio::test]
async fn close_is_idempotent() {
    let mock = MockConnector::new();
    let mut session = Session::with_connector(mock.clone());
    session.close().await.unwrap();

    session.open(config()).await.unwrap();
    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(mock.closes(), 1);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn send_writes_command_and_terminator_once() {
    let mock = MockConnector::new();
    let mut session = open(&mock).await;

    session.send(":MEASure:VOLTage?").await.unwrap();
    session.send("*RST").await.unwrap();
    assert_eq!(
        mock.written(),
        vec![b":MEASure:VOLTage?\r\n".to_vec(), b"*RST\r\n".to_vec()]
    );
}

#[tokio::test]
async fn link_errors_leave_session_connected() {
    let mock = MockConnector::new();
    let mut session = open(&mock).await;

    mock.push_failure();
    let err = session.query("*IDN?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Read);
    assert_eq!(err.sentinel(), "Error");
    assert!(session.is_connected());

    mock.fail_next_write();
    let err = session.send("*RST").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Write);
    assert!(session.is_connected());

    mock.push_reply(b"HIOKI,LR8450,0,V1.00\n");
    assert_eq!(
        session.query("*IDN?").await.unwrap(),
        "HIOKI,LR8450,0,V1.00"
    );
}

#[tokio::test]
async fn block_terminator_in_separate_read() {
    let mock = MockConnector::new();
    let mut session = open(&mock).await;
    mock.push_reply(b"#15abcde");
    mock.push_reply(b"\n");

    let payload = session
        .query_block(":WAVeform:DATA?", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(payload, b"abcde");
    assert_eq!(mock.pending(), 0);

    mock.push_reply(b"1\n");
    assert_eq!(session.query("*OPC?").await.unwrap(), "1");
}

#[tokio::test]
async fn query_over_tcp_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let instrument = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (rd, mut wr) = stream.into_split();
        let mut lines = BufReader::new(rd).lines();

        let cmd = lines.next_line().await.unwrap().unwrap();
        assert_eq!(cmd, "*IDN?");
        wr.write_all(b"HIOKI,LR8450,").await.unwrap();
        wr.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        wr.write_all(b"220123456,V1.00\r\n").await.unwrap();
        wr.flush().await.unwrap();

        /* Wait for the client to hang up */
        assert!(lines.next_line().await.unwrap().is_none());
    });

    let config: LinkConfig = format!("tcp://127.0.0.1:{port}?timeout=2")
        .parse()
        .unwrap();
    assert_eq!(config.receive_timeout, Duration::from_secs(2));

    let mut session = Session::new();
    session.open(config).await.unwrap();
    let model = session.identify().await.unwrap();
    assert_eq!(model.model, "LR8450");
    assert_eq!(model.serial.as_deref(), Some("220123456"));
    session.close().await.unwrap();

    instrument.await.unwrap();
}
