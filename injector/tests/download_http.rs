//! End-to-end transfers through `UreqTransport` against a local server.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use injector::{DownloadConfig, Downloader, Error, Method};

/// Canned response for one request path.
struct Route {
    path: &'static str,
    status: &'static str,
    headers: Vec<String>,
    body: Vec<u8>,
}

/// Serves `connections` requests, one per connection, and returns the
/// request lines it saw.
fn serve(routes: Vec<Route>, connections: usize) -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for stream in listener.incoming().take(connections) {
            let mut stream = stream.unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_len = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_len = v.trim().parse().unwrap();
                }
            }
            let mut body = vec![0; content_len];
            std::io::Read::read_exact(&mut reader, &mut body).unwrap();
            seen.push(format!("{} {}", request_line.trim_end(), String::from_utf8_lossy(&body)));

            let path = request_line.split_whitespace().nth(1).unwrap_or("/");
            let route = routes.iter().find(|r| r.path == path).unwrap();
            let mut head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                route.status,
                route.body.len()
            );
            for h in &route.headers {
                head.push_str(h);
                head.push_str("\r\n");
            }
            head.push_str("\r\n");
            stream.write_all(head.as_bytes()).unwrap();
            let _ = stream.write_all(&route.body);
        }
        seen
    });
    (addr, handle)
}

fn ok(path: &'static str, body: Vec<u8>) -> Route {
    Route {
        path,
        status: "200 OK",
        headers: Vec::new(),
        body,
    }
}

#[test]
fn streams_body_into_file() {
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let (addr, server) = serve(vec![ok("/fw.bin", body.clone())], 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fw.bin");
    let config = DownloadConfig::new(format!("http://{addr}/fw.bin")).timeout_secs(10);
    let mut dl = Downloader::open(config, &path).unwrap();
    dl.request().unwrap();

    assert_eq!(dl.position(), body.len());
    assert!(!dl.is_sink_open());
    assert_eq!(std::fs::read(&path).unwrap(), body);
    server.join().unwrap();
}

#[test]
fn follows_redirects() {
    let redirect = Route {
        path: "/latest",
        status: "302 Found",
        headers: vec!["Location: /v2.bin".into()],
        body: Vec::new(),
    };
    let (addr, server) = serve(vec![redirect, ok("/v2.bin", b"v2".to_vec())], 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fw.bin");
    let config = DownloadConfig::new(format!("http://{addr}/latest")).timeout_secs(10);
    let mut dl = Downloader::open(config, &path).unwrap();
    dl.request().unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"v2");
    let seen = server.join().unwrap();
    assert!(seen[1].starts_with("GET /v2.bin"));
}

#[test]
fn oversized_body_fails_closed() {
    let (addr, server) = serve(vec![ok("/big", vec![0x42; 20_000])], 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big");
    let config = DownloadConfig::new(format!("http://{addr}/big"))
        .max_len(5000)
        .timeout_secs(10);
    let mut dl = Downloader::open(config, &path).unwrap();

    let err = dl.request().unwrap_err();
    assert!(matches!(err, Error::ResourceExhausted(_)), "{err}");
    assert!(!dl.is_sink_open());
    assert!(std::fs::read(&path).unwrap().len() <= 5000);
    server.join().unwrap();
}

#[test]
fn error_status_is_a_transport_error() {
    let missing = Route {
        path: "/gone",
        status: "404 Not Found",
        headers: Vec::new(),
        body: Vec::new(),
    };
    let (addr, server) = serve(vec![missing], 1);

    let dir = tempfile::tempdir().unwrap();
    let config = DownloadConfig::new(format!("http://{addr}/gone"));
    let mut dl = Downloader::open(config, dir.path().join("gone")).unwrap();

    let err = dl.request_timeout(Duration::from_secs(10)).unwrap_err();
    assert!(matches!(err, Error::Http(_)), "{err}");
    assert_eq!(dl.flags() & injector::download::ERROR, injector::download::ERROR);
    server.join().unwrap();
}

#[test]
fn posts_body_with_headers() {
    let (addr, server) = serve(vec![ok("/chunk", b"ok".to_vec())], 1);

    let dir = tempfile::tempdir().unwrap();
    let config = DownloadConfig::new(format!("http://{addr}/chunk")).timeout_secs(10);
    let mut dl = Downloader::open(config, dir.path().join("chunk")).unwrap();
    dl.set_method(Method::Post);
    dl.set_header("X-Offset", "4096");
    dl.set_post_field(b"len=2".to_vec());
    dl.request().unwrap();

    let seen = server.join().unwrap();
    assert_eq!(seen, ["POST /chunk HTTP/1.1 len=2"]);
}
