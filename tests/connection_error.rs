use std::{
    future::Future,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use jsonlink::{
    ChannelMessageWriter, Connection, ConnectionErrorKind, ConnectionOptions, ConnectionStatus,
    Error, ErrorCode, ErrorEvent, MessageWrite, RawMessage, TransportError, message_channel,
};
use tokio::{sync::mpsc, task::spawn_blocking, test, time::timeout};

async fn within<T>(f: impl Future<Output = T>) -> Result<T> {
    Ok(timeout(Duration::from_secs(5), f).await?)
}

fn kind<T>(r: jsonlink::Result<T>) -> Option<ConnectionErrorKind> {
    r.err().and_then(|e| e.connection_error_kind())
}

#[test]
async fn send_before_listen() -> Result<()> {
    let (client, _server) = Connection::new_channel(&ConnectionOptions::default());
    let e = client.send_request("a", (), None).err().context("expected error")?;
    assert_eq!(e.connection_error_kind(), Some(ConnectionErrorKind::NotListening));
    assert_eq!(e.to_string(), "Call listen() first.");
    assert_eq!(client.status(), ConnectionStatus::New);
    Ok(())
}

#[test]
async fn listen_twice() -> Result<()> {
    let (client, _server) = Connection::new_channel(&ConnectionOptions::default());
    client.listen()?;
    assert_eq!(client.status(), ConnectionStatus::Listening);
    assert_eq!(kind(client.listen()), Some(ConnectionErrorKind::AlreadyListening));
    Ok(())
}

#[test]
async fn close_when_peer_goes_away() -> Result<()> {
    let (to_client, reader) = message_channel();
    let (writer, _from_client) = message_channel();
    let client = Connection::new(reader, writer, &ConnectionOptions::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _d = client.on_close(move |_| {
        let _ = tx.send(());
    });
    client.listen()?;
    drop(to_client);

    within(rx.recv()).await?.context("no close event")?;
    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert_eq!(
        kind(client.send_request("a", (), None)),
        Some(ConnectionErrorKind::Closed)
    );
    assert_eq!(kind(client.listen()), Some(ConnectionErrorKind::Closed));
    assert_eq!(
        kind(client.on_request("a", |_, cx| cx.success(&()))),
        Some(ConnectionErrorKind::Closed)
    );

    client.dispose();
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[test]
async fn dispose_rejects_pending() -> Result<()> {
    let (client, _server) = Connection::new_channel(&ConnectionOptions::default());
    let disposed = Arc::new(AtomicUsize::new(0));
    let d = disposed.clone();
    let _d = client.on_dispose(move |_| {
        d.fetch_add(1, Ordering::SeqCst);
    });
    client.listen()?;
    let f0 = client.send_request("a", (), None)?;
    let f1 = client.send_request("b", (), None)?;

    client.dispose();
    client.dispose();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert_eq!(client.status(), ConnectionStatus::Disposed);

    for f in [f0, f1] {
        let e = within(f).await?.unwrap_err();
        assert_eq!(e.connection_error_kind(), Some(ConnectionErrorKind::Disposed));
        assert_eq!(e.to_string(), "Connection got disposed.");
    }
    assert_eq!(
        kind(client.send_request("c", (), None)),
        Some(ConnectionErrorKind::Disposed)
    );
    assert_eq!(
        kind(client.send_notification("n", ())),
        Some(ConnectionErrorKind::Disposed)
    );
    Ok(())
}

#[test]
async fn drop_disposes() -> Result<()> {
    let (client, _server) = Connection::new_channel(&ConnectionOptions::default());
    client.listen()?;
    let context = client.context();
    let f = client.send_request("a", (), None)?;
    drop(client);
    let e = within(f).await?.unwrap_err();
    assert_eq!(e.connection_error_kind(), Some(ConnectionErrorKind::Disposed));
    assert_eq!(
        kind(context.send_notification("n", ())),
        Some(ConnectionErrorKind::Disposed)
    );
    Ok(())
}

#[test]
async fn handlers_owning_response_futures_are_released() -> Result<()> {
    let (client, _server) = Connection::new_channel(&ConnectionOptions::default());
    client.listen()?;
    let f0 = client.send_request("never", (), None)?;
    let f1 = client.send_request("never", (), None)?;
    let status = within(spawn_blocking(move || -> jsonlink::Result<_> {
        client.on_request("holder", move |_, cx| {
            let _ = &f0;
            cx.success(&())
        })?;
        client.on_request("holder", move |_, cx| {
            let _ = &f1;
            cx.success(&())
        })?;
        client.dispose();
        Ok(client.status())
    }))
    .await???;
    assert_eq!(status, ConnectionStatus::Disposed);
    Ok(())
}

#[test]
async fn late_response_after_future_dropped() -> Result<()> {
    let (server, client) = Connection::new_channel(&ConnectionOptions::default());
    server.on_request("a", |_, cx| {
        cx.handle_async(async {
            tokio::task::yield_now().await;
            Ok(1)
        })
    })?;
    server.listen()?;
    client.listen()?;
    drop(client.send_request("a", (), None)?);
    let v: i32 = within(client.request("a", ())).await??;
    assert_eq!(v, 1);
    Ok(())
}

struct FailingWriter {
    error: fn() -> TransportError,
}

impl MessageWrite for FailingWriter {
    fn write(&mut self, _message: &RawMessage) -> std::result::Result<(), TransportError> {
        Err((self.error)())
    }
}

type Events = Arc<Mutex<Vec<ErrorEvent>>>;

fn failing_connection(
    error: fn() -> TransportError,
) -> (Connection, ChannelMessageWriter, Events) {
    let (to_client, reader) = message_channel();
    let client = Connection::new(reader, FailingWriter { error }, &ConnectionOptions::default());
    let events = Events::default();
    let e = events.clone();
    let _d = client.on_error(move |event| e.lock().unwrap().push(event.clone()));
    (client, to_client, events)
}

#[test]
async fn write_failure_rejects_request() -> Result<()> {
    let (client, _to_client, events) = failing_connection(|| io::Error::other("broken").into());
    client.listen()?;

    let e = within(client.send_request("a", (), None)?).await?.unwrap_err();
    let e = e.response_error().context("expected response error")?;
    assert_eq!(e.code, ErrorCode::MESSAGE_WRITE_ERROR);

    client.send_notification("n", ())?;
    assert_eq!(client.status(), ConnectionStatus::Listening);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].count, Some(1));
    assert_eq!(
        events[0].message.as_ref().and_then(|m| m.method.as_deref()),
        Some("a")
    );
    assert!(matches!(events[0].error, Error::Transport(TransportError::Io(_))));
    assert_eq!(events[1].count, Some(2));
    Ok(())
}

#[test]
async fn write_to_closed_transport_closes() -> Result<()> {
    let (client, _to_client, events) = failing_connection(|| TransportError::Closed);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _d = client.on_close(move |_| {
        let _ = tx.send(());
    });
    client.listen()?;
    client.send_notification("n", ())?;
    within(rx.recv()).await?.context("no close event")?;
    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert_eq!(events.lock().unwrap().len(), 1);
    Ok(())
}
