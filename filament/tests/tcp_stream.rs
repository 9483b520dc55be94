use filament::net::{TcpListener, TcpStream};
use filament::time::{sleep, timeout};
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

#[filament::test(worker_threads = 2)]
async fn test_tcp_stream_read_write() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let server = filament::spawn(async move {
        let (stream, _) = listener.accept().await.expect("Failed to accept connection");
        let mut buffer = [0; 5];
        stream
            .read_exact(&mut buffer)
            .await
            .expect("Failed to read from stream");
        assert_eq!(&buffer, b"hello");
        stream
            .write_all(b"world")
            .await
            .expect("Failed to write to stream");
    });

    let stream = TcpStream::connect(&addr.to_string())
        .await
        .expect("Failed to connect to listener");
    stream
        .write_all(b"hello")
        .await
        .expect("Failed to write to stream");

    let mut buffer = [0; 5];
    stream
        .read_exact(&mut buffer)
        .await
        .expect("Failed to read from stream");
    assert_eq!(&buffer, b"world");

    server.await;
}

#[filament::test]
async fn test_tcp_stream_multiple_messages() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    let handle = thread::spawn(move || {
        let mut stream = std::net::TcpStream::connect(addr).expect("Failed to connect");
        for _ in 0..3 {
            stream
                .write_all(b"ping")
                .expect("Failed to write to stream");
            let mut buffer = [0; 4];
            stream
                .read_exact(&mut buffer)
                .expect("Failed to read from stream");
            assert_eq!(&buffer, b"pong");
        }
    });

    let (stream, peer) = listener.accept().await.expect("Failed to accept connection");
    assert_eq!(peer, stream.peer_addr().unwrap());

    for _ in 0..3 {
        let mut buffer = [0; 4];
        stream
            .read_exact(&mut buffer)
            .await
            .expect("Failed to read from stream");
        assert_eq!(&buffer, b"ping");
        stream
            .write_all(b"pong")
            .await
            .expect("Failed to write to stream");
    }

    handle.join().expect("Thread panicked");
}

#[filament::test]
async fn test_read_returns_zero_at_end_of_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream.write_all(b"bye").unwrap();
    });

    let (stream, _) = listener.accept().await.unwrap();
    client.join().unwrap();

    let mut buffer = [0; 16];
    let n = stream.read(&mut buffer).await.unwrap();
    assert_eq!(&buffer[..n], b"bye");
    assert_eq!(stream.read(&mut buffer).await.unwrap(), 0);
}

#[filament::test(worker_threads = 2)]
async fn test_split_halves_in_separate_fibers() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let echo = thread::spawn(move || {
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        let mut buffer = [0; 64];
        loop {
            let n = stream.read(&mut buffer).unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buffer[..n]).unwrap();
        }
    });

    let (stream, _) = listener.accept().await.unwrap();
    let (reader, writer) = stream.split();

    let receiving = filament::spawn(async move {
        let mut received = Vec::new();
        let mut buffer = [0; 64];
        while received.len() < 12 {
            let n = reader.read(&mut buffer).await.unwrap();
            received.extend_from_slice(&buffer[..n]);
        }
        received
    });

    for chunk in [&b"abcd"[..], b"efgh", b"ijkl"] {
        writer.write_all(chunk).await.unwrap();
        sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(receiving.await, b"abcdefghijkl");
    stream.shutdown(std::net::Shutdown::Write).unwrap();
    drop(stream);
    echo.join().unwrap();
}

#[filament::test]
async fn test_accept_can_time_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();

    let result = timeout(Duration::from_millis(20), listener.accept()).await;
    assert!(result.is_err());

    // The listener keeps working after an abandoned accept.
    let addr = listener.local_addr().unwrap();
    let client = thread::spawn(move || std::net::TcpStream::connect(addr).map(drop));
    assert!(listener.accept().await.is_ok());
    client.join().unwrap().unwrap();
}

#[filament::test]
async fn test_connect_to_closed_port_fails() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let result = TcpStream::connect(&format!("127.0.0.1:{port}")).await;
    assert!(result.is_err());
}

#[test]
fn test_bind_rejects_bad_address() {
    assert!(TcpListener::bind("not an address").is_err());
}
