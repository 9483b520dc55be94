use filament::time::sleep;
use std::os::fd::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

fn pair() -> (i32, i32) {
    let (a, b) = UnixStream::pair().expect("Failed to create socket pair");
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a.into_raw_fd(), b.into_raw_fd())
}

#[filament::test(worker_threads = 2)]
async fn test_read_suspends_until_data_arrives() {
    let (left, right) = pair();

    let reader = filament::spawn(async move {
        let mut buffer = [0; 8];
        let n = filament::io::read(left, &mut buffer).await.unwrap();
        buffer[..n].to_vec()
    });

    sleep(Duration::from_millis(20)).await;
    assert!(!reader.is_finished());

    let written = filament::io::write(right, b"fiber").await.unwrap();
    assert_eq!(written, 5);
    assert_eq!(reader.await, b"fiber");

    filament::io::close(left);
    filament::io::close(right);
}

#[filament::test]
async fn test_ping_pong_over_raw_descriptors() {
    let (left, right) = pair();

    let echo = filament::spawn(async move {
        let mut buffer = [0; 4];
        for _ in 0..10 {
            let n = filament::io::read(right, &mut buffer).await.unwrap();
            filament::io::write(right, &buffer[..n]).await.unwrap();
        }
    });

    let mut buffer = [0; 4];
    for i in 0..10u8 {
        filament::io::write(left, &[i]).await.unwrap();
        let n = filament::io::read(left, &mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], &[i]);
    }

    echo.await;
    filament::io::close(left);
    filament::io::close(right);
}

#[filament::test]
async fn test_write_suspends_when_buffer_is_full() {
    let (left, right) = pair();
    let chunk = vec![7u8; 64 * 1024];

    let writer = filament::spawn(async move {
        let mut total = 0;
        while total < 1024 * 1024 {
            total += filament::io::write(left, &chunk).await.unwrap();
        }
        total
    });

    let mut received = 0;
    let mut buffer = vec![0u8; 64 * 1024];
    while received < 1024 * 1024 {
        received += filament::io::read(right, &mut buffer).await.unwrap();
    }

    let sent = writer.await;
    assert!(sent >= 1024 * 1024);
    assert!(received >= 1024 * 1024);

    filament::io::close(left);
    filament::io::close(right);
}
