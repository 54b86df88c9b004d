// crates/cplane-transfer/tests/transfer_client.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cplane_core::{DirEntry, ExecOutput, FileStat, TransferBody, TransferMessage};
use cplane_protocol::builders::transfer_frame;
use cplane_protocol::{decode_transfer, FrameReader};
use cplane_transfer::{RealPath, TransferClient, TransferConfig, TransferError, WriteSource};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(3);

/// Engine end of the duplex pipe.
struct Engine {
    io: DuplexStream,
    reader: FrameReader,
}

impl Engine {
    fn new(io: DuplexStream) -> Self {
        Engine {
            io,
            reader: FrameReader::new(),
        }
    }

    async fn recv(&mut self) -> Option<TransferMessage> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(frame) = self.reader.next_frame().expect("valid frame") {
                return Some(decode_transfer(&frame).expect("decode"));
            }
            let n = self.io.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return None;
            }
            self.reader.push(&buf[..n]);
        }
    }

    async fn send(&mut self, request_id: u32, body: TransferBody) {
        let frame = transfer_frame(&TransferMessage::new(request_id, body)).expect("encode");
        let _ = self.io.write_all(&frame).await;
    }
}

#[derive(Default)]
struct Log {
    request_ids: Vec<u32>,
    write_chunks: Vec<usize>,
}

/// In-memory file system behind the file-transfer protocol.
async fn run_fs_engine(mut engine: Engine, log: Arc<Mutex<Log>>) {
    let mut files: HashMap<String, Vec<u8>> = HashMap::new();
    let mut uploads: HashMap<u32, (String, Vec<u8>)> = HashMap::new();

    engine.send(0, TransferBody::Ready).await;

    while let Some(TransferMessage { request_id, body }) = engine.recv().await {
        log.lock().unwrap().request_ids.push(request_id);

        let reply = match body {
            TransferBody::WriteBegin { path } if path.starts_with("/root") => {
                TransferBody::Error {
                    message: "EACCES: permission denied".into(),
                }
            }
            TransferBody::WriteBegin { path } => {
                uploads.insert(request_id, (path, Vec::new()));
                TransferBody::Ok
            }
            TransferBody::WriteData { data } => {
                log.lock().unwrap().write_chunks.push(data.len());
                if let Some((_, buf)) = uploads.get_mut(&request_id) {
                    buf.extend_from_slice(&data);
                }
                continue;
            }
            TransferBody::WriteEnd => match uploads.remove(&request_id) {
                Some((path, data)) => {
                    files.insert(path, data);
                    TransferBody::Ok
                }
                None => TransferBody::Error {
                    message: "no upload in progress".into(),
                },
            },
            TransferBody::ReadFile { path } => match files.get(&path) {
                Some(data) => {
                    for chunk in data.chunks(30_000) {
                        engine
                            .send(
                                request_id,
                                TransferBody::FileData {
                                    data: chunk.to_vec(),
                                    total_size: data.len() as u64,
                                },
                            )
                            .await;
                    }
                    TransferBody::FileEnd
                }
                None => TransferBody::Error {
                    message: "ENOENT: no such file".into(),
                },
            },
            TransferBody::ListDir { path } => {
                let mut entries: Vec<DirEntry> = files
                    .iter()
                    .filter_map(|(name, data)| {
                        name.strip_prefix(&format!("{}/", path)).map(|rest| DirEntry {
                            name: rest.to_string(),
                            is_dir: false,
                            is_symlink: false,
                            mtime: 1_700_000_000,
                            size: data.len() as u64,
                            mode: 0o100644,
                        })
                    })
                    .collect();
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                TransferBody::DirList { entries }
            }
            TransferBody::Stat { path } => match files.get(&path) {
                Some(data) => TransferBody::StatResult(FileStat {
                    size: data.len() as u64,
                    mode: 0o100644,
                    owner: "u".into(),
                    group: "u".into(),
                    ..FileStat::default()
                }),
                None => TransferBody::Error {
                    message: "ENOENT: no such file".into(),
                },
            },
            TransferBody::Unlink { path } => match files.remove(&path) {
                Some(_) => TransferBody::Ok,
                None => TransferBody::Error {
                    message: "ENOENT: no such file".into(),
                },
            },
            TransferBody::Rename { old_path, new_path } => match files.remove(&old_path) {
                Some(data) => {
                    files.insert(new_path, data);
                    TransferBody::Ok
                }
                None => TransferBody::Error {
                    message: "ENOENT: no such file".into(),
                },
            },
            TransferBody::Mkdir { .. } | TransferBody::Rmdir { .. } | TransferBody::Chmod { .. } => {
                TransferBody::Ok
            }
            TransferBody::Realpath { path } => TransferBody::RealpathResult {
                path: format!("/home/u/{}", path.trim_start_matches("./")),
                is_dir: path.ends_with('/'),
            },
            TransferBody::Exec { command } => TransferBody::ExecResult(ExecOutput {
                stdout: command,
                stderr: "warning".into(),
                exit_code: 3,
            }),
            TransferBody::SearchDirs {
                search_path,
                max_results,
            } => TransferBody::SearchResult {
                directories: (0..max_results)
                    .map(|i| format!("{}/d{}", search_path, i))
                    .collect(),
            },
            other => TransferBody::Error {
                message: format!("unsupported {}", other.kind()),
            },
        };

        engine.send(request_id, reply).await;
    }
}

fn connect_fs() -> (TransferClient, Arc<Mutex<Log>>) {
    let (client_io, engine_io) = tokio::io::duplex(1 << 20);
    let log = Arc::new(Mutex::new(Log::default()));
    tokio::spawn(run_fs_engine(Engine::new(engine_io), log.clone()));
    (TransferClient::new(client_io), log)
}

#[tokio::test]
async fn write_then_read_round_trips_in_32k_chunks() {
    let (client, log) = connect_fs();
    client.wait_for_ready().await.expect("ready");

    let original: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
    client
        .write_file("/tmp/a.bin", Bytes::from(original.clone()))
        .await
        .expect("write");

    assert_eq!(log.lock().unwrap().write_chunks, vec![32_768, 32_768, 4_464]);

    let handle = client.read_file("/tmp/a.bin").await.expect("read");
    let data = timeout(STEP, handle.stream.read_to_end())
        .await
        .expect("read timed out")
        .expect("read data");
    assert_eq!(data, original);
    assert_eq!(handle.total_size.await.expect("total"), 70_000);
    handle.done.await.expect("done");
}

#[tokio::test]
async fn custom_chunk_size_is_honoured() {
    let (client_io, engine_io) = tokio::io::duplex(1 << 20);
    let log = Arc::new(Mutex::new(Log::default()));
    tokio::spawn(run_fs_engine(Engine::new(engine_io), log.clone()));
    let client = TransferClient::with_config(client_io, TransferConfig { chunk_size: 1000 });

    client.write_file("/tmp/b", vec![7u8; 2500]).await.expect("write");
    assert_eq!(log.lock().unwrap().write_chunks, vec![1000, 1000, 500]);
}

#[tokio::test]
async fn write_refused_at_begin_sends_no_data() {
    let (client, log) = connect_fs();

    let result = client.write_file("/root/secret", vec![1u8; 100_000]).await;
    match result {
        Err(TransferError::Remote(msg)) => assert_eq!(msg, "EACCES: permission denied"),
        other => panic!("unexpected {:?}", other),
    }

    // Round-trip one more request so the engine has seen everything.
    client.mkdir("/tmp/x").await.expect("mkdir");
    assert!(log.lock().unwrap().write_chunks.is_empty());
}

#[tokio::test]
async fn stream_source_forwards_each_chunk() {
    let (client, log) = connect_fs();

    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"hello ")),
        Ok(Bytes::new()),
        Ok(Bytes::from_static(b"stream")),
    ];
    let source = WriteSource::Stream(Box::pin(futures::stream::iter(chunks)));
    client.write_file("/tmp/s.txt", source).await.expect("write");

    assert_eq!(log.lock().unwrap().write_chunks, vec![6, 6]);
    let handle = client.read_file("/tmp/s.txt").await.expect("read");
    assert_eq!(handle.stream.read_to_end().await.unwrap(), b"hello stream");
}

#[tokio::test]
async fn unary_operations() {
    let (client, log) = connect_fs();
    client.wait_for_ready().await.expect("ready");

    client.write_file("/srv/a.txt", b"abc".to_vec()).await.unwrap();
    client.write_file("/srv/b.txt", b"de".to_vec()).await.unwrap();

    let entries = client.list_dir("/srv").await.expect("list");
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert_eq!(entries[0].size, 3);

    let stat = client.stat("/srv/b.txt").await.expect("stat");
    assert_eq!(stat.size, 2);
    assert_eq!(stat.owner, "u");
    assert!(!stat.is_dir);

    client.rename("/srv/b.txt", "/srv/c.txt").await.expect("rename");
    client.chmod("/srv/c.txt", 0o600).await.expect("chmod");
    client.unlink("/srv/c.txt").await.expect("unlink");
    client.mkdir("/srv/d").await.expect("mkdir");
    client.rmdir("/srv/d", true).await.expect("rmdir");

    assert_eq!(
        client.realpath("./docs/").await.expect("realpath"),
        RealPath {
            path: "/home/u/docs/".into(),
            is_dir: true,
        }
    );

    let output = client.exec("ls -la").await.expect("exec");
    assert_eq!(output.stdout, "ls -la");
    assert_eq!(output.exit_code, 3);

    let dirs = client.search_dirs("/home", 2).await.expect("search");
    assert_eq!(dirs, vec!["/home/d0", "/home/d1"]);

    let ids = log.lock().unwrap().request_ids.clone();
    let mut unique = ids.clone();
    unique.dedup();
    assert!(unique.windows(2).all(|w| w[0] < w[1]), "ids {:?}", unique);
}

#[tokio::test]
async fn remote_error_rejects_with_its_message() {
    let (client, _log) = connect_fs();

    match client.stat("/missing").await {
        Err(TransferError::Remote(msg)) => assert_eq!(msg, "ENOENT: no such file"),
        other => panic!("unexpected {:?}", other),
    }
    match client.unlink("/missing").await {
        Err(TransferError::Remote(msg)) => assert!(msg.starts_with("ENOENT")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn empty_file_reports_zero_size() {
    let (client, _log) = connect_fs();
    client.write_file("/tmp/empty", Vec::new()).await.expect("write");

    let handle = client.read_file("/tmp/empty").await.expect("read");
    assert_eq!(handle.total_size.await.expect("total"), 0);
    handle.done.await.expect("done");
    assert!(handle.stream.read_to_end().await.unwrap().is_empty());
}

#[tokio::test]
async fn read_error_before_any_data_reports_zero_size() {
    let (client, _log) = connect_fs();

    let mut handle = client.read_file("/missing").await.expect("read");
    assert_eq!(handle.total_size.await.expect("total"), 0);
    match handle.stream.next().await {
        Some(Err(TransferError::Remote(msg))) => assert_eq!(msg, "ENOENT: no such file"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(handle.done.await, Err(TransferError::Remote(_))));
}

#[tokio::test]
async fn read_error_mid_stream_fails_stream_and_done() {
    let (client_io, engine_io) = tokio::io::duplex(1 << 16);
    let client = TransferClient::new(client_io);

    tokio::spawn(async move {
        let mut engine = Engine::new(engine_io);
        while let Some(msg) = engine.recv().await {
            if let TransferBody::ReadFile { .. } = msg.body {
                engine
                    .send(
                        msg.request_id,
                        TransferBody::FileData {
                            data: b"partial".to_vec(),
                            total_size: 100,
                        },
                    )
                    .await;
                // Replies for unknown ids are ignored by the client.
                engine.send(9_999, TransferBody::Ok).await;
                engine
                    .send(
                        msg.request_id,
                        TransferBody::Error {
                            message: "EIO: read failed".into(),
                        },
                    )
                    .await;
            }
        }
    });

    let mut handle = client.read_file("/var/log/big").await.expect("read");
    let first = handle.stream.next().await.expect("chunk").expect("data");
    assert_eq!(&first[..], b"partial");
    assert_eq!(handle.total_size.await.expect("total"), 100);

    match handle.stream.next().await {
        Some(Err(TransferError::Remote(msg))) => assert_eq!(msg, "EIO: read failed"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(handle.done.await, Err(TransferError::Remote(_))));
}

#[tokio::test]
async fn ready_is_rejected_when_connection_drops_first() {
    let (client_io, engine_io) = tokio::io::duplex(1024);
    let client = TransferClient::new(client_io);
    drop(engine_io);

    assert!(matches!(
        timeout(STEP, client.wait_for_ready()).await.expect("timed out"),
        Err(TransferError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn connection_loss_rejects_everything_outstanding() {
    let (client_io, engine_io) = tokio::io::duplex(1 << 16);
    let client = TransferClient::new(client_io);

    // Engine: become ready, swallow two requests, then hang up.
    let engine = tokio::spawn(async move {
        let mut engine = Engine::new(engine_io);
        engine.send(0, TransferBody::Ready).await;
        engine.send(0, TransferBody::Ready).await;
        engine.recv().await;
        engine.recv().await;
    });

    client.wait_for_ready().await.expect("ready");

    let handle = client.read_file("/a").await.expect("read");
    let (listed, _) = tokio::join!(client.list_dir("/"), engine);

    assert!(matches!(listed, Err(TransferError::ConnectionClosed)));
    assert!(matches!(handle.done.await, Err(TransferError::ConnectionClosed)));
    assert!(matches!(
        handle.total_size.await,
        Err(TransferError::ConnectionClosed)
    ));
    assert!(matches!(
        client.mkdir("/b").await,
        Err(TransferError::ConnectionClosed)
    ));
    // Still ready: readiness is not revoked once reached.
    client.wait_for_ready().await.expect("ready stays resolved");
}

#[tokio::test]
async fn close_rejects_pending_requests() {
    let (client_io, engine_io) = tokio::io::duplex(1 << 16);
    let client = Arc::new(TransferClient::new(client_io));

    // Engine that never answers.
    let _engine = tokio::spawn(async move {
        let mut engine = Engine::new(engine_io);
        while engine.recv().await.is_some() {}
    });

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.stat("/slow").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await;

    assert!(matches!(
        pending.await.expect("join"),
        Err(TransferError::ConnectionClosed)
    ));
    assert!(matches!(
        client.wait_for_ready().await,
        Err(TransferError::ConnectionClosed)
    ));
}
