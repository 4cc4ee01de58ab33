fn main() {
    println!("Run `cargo test -p end-to-end` to execute the end-to-end upload tests.");
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;

    use chunkline_client::{
        ClientConfig, MemorySource, TransferDriver, TransferEvent, UploadConnection, UploadError,
        UploadTarget, WsConnection,
    };
    use chunkline_protocol::{AppendHeader, CloseRequest, OpenRequest, checksum_bytes};
    use chunkline_server::{ServerConfig, StoreHandler, UploadServer};
    use chunkline_store::{AssemblyStore, StoreConfig};

    struct TestServer {
        server: Arc<UploadServer<StoreHandler>>,
        url: String,
        dir: TempDir,
    }

    impl TestServer {
        async fn start(overwrite_allowed: bool) -> Self {
            let dir = TempDir::new().unwrap();
            let config = StoreConfig::new(dir.path().join("files"), dir.path().join("partial"))
                .unwrap()
                .with_overwrite_allowed(overwrite_allowed);
            let store = Arc::new(AssemblyStore::new(config).await.unwrap());

            let server_config = ServerConfig {
                bind: "127.0.0.1".parse().unwrap(),
                port: 0,
            };
            let server = UploadServer::new(server_config, StoreHandler::new(store));
            let runner = Arc::clone(&server);
            tokio::spawn(async move {
                let _ = runner.run().await;
            });

            let mut port = 0;
            for _ in 0..100 {
                port = server.port().await;
                if port != 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_ne!(port, 0, "server did not bind");

            Self {
                server,
                url: format!("ws://127.0.0.1:{port}"),
                dir,
            }
        }

        fn final_path(&self, name: &str) -> std::path::PathBuf {
            self.dir.path().join("files").join(name)
        }

        fn partial_dir(&self) -> std::path::PathBuf {
            self.dir.path().join("partial")
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.server.shutdown();
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn small_chunks() -> ClientConfig {
        ClientConfig::builder()
            .chunk_min(4 * 1024)
            .chunk_step(4 * 1024)
            .chunk_max(32 * 1024)
            .retry_interval(Duration::from_millis(50))
            .build()
            .unwrap()
    }

    /// Drains events concurrently so the driver never waits on a full channel.
    fn collect_events(
        mut events: tokio::sync::mpsc::Receiver<TransferEvent>,
    ) -> tokio::task::JoinHandle<Vec<TransferEvent>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = events.recv().await {
                seen.push(event);
            }
            seen
        })
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn uploads_file_byte_for_byte() {
        let srv = TestServer::start(false).await;
        let data = payload(300 * 1024 + 17);
        let target =
            UploadTarget::new("game.bin", data.len() as u64).with_modified_time(1_700_000_000_000);

        let mut driver = TransferDriver::new(
            WsConnection::new(&srv.url),
            MemorySource::new(data.clone()),
            target,
            &small_chunks(),
        );
        let events = collect_events(driver.take_events().unwrap());
        let outcome = driver.start().await.unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.final_size, data.len() as u64);
        assert!(outcome.size_mismatch.is_none());
        assert_eq!(std::fs::read(srv.final_path("game.bin")).unwrap(), data);
        assert!(dir_is_empty(&srv.partial_dir()));

        let mtime = std::fs::metadata(srv.final_path("game.bin"))
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap();
        assert_eq!(mtime.as_secs(), 1_700_000_000);

        let events = events.await.unwrap();
        assert_eq!(
            events.last(),
            Some(&TransferEvent::Completed {
                final_size: data.len() as u64
            })
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn duplicate_append_is_idempotent_over_the_wire() {
        let srv = TestServer::start(false).await;
        let conn = WsConnection::connect(&srv.url).await.unwrap();

        let opened = conn
            .open(&OpenRequest {
                name: "dup.bin".into(),
                overwrite: false,
            })
            .await
            .unwrap();

        let chunk = b"hello chunkline".to_vec();
        let header = AppendHeader {
            id: String::new(),
            name: "dup.bin".into(),
            session_id: opened.session_id,
            offset: 0,
            checksum: checksum_bytes(&chunk),
        };
        let first = conn.append(&header, &chunk).await.unwrap();
        let second = conn.append(&header, &chunk).await.unwrap();
        assert_eq!(first.size, chunk.len() as u64);
        assert_eq!(second.size, chunk.len() as u64);

        let close = CloseRequest {
            name: "dup.bin".into(),
            session_id: opened.session_id,
            mtime: None,
            overwrite: false,
        };
        let closed = conn.close(&close).await.unwrap();
        assert_eq!(closed.size, chunk.len() as u64);
        assert_eq!(std::fs::read(srv.final_path("dup.bin")).unwrap(), chunk);

        // A repeated close is answered with the same size.
        let again = conn.close(&close).await.unwrap();
        assert_eq!(again.size, chunk.len() as u64);
    }

    #[tokio::test]
    async fn existing_file_is_protected() {
        let srv = TestServer::start(false).await;
        std::fs::create_dir_all(srv.final_path("")).unwrap();
        std::fs::write(srv.final_path("keep.bin"), b"original").unwrap();

        for overwrite in [false, true] {
            let driver = TransferDriver::new(
                WsConnection::new(&srv.url),
                MemorySource::new(b"replacement".to_vec()),
                UploadTarget::new("keep.bin", 11),
                &small_chunks(),
            )
            .with_overwrite(overwrite);

            let err = driver.start().await.unwrap_err();
            assert!(matches!(err, UploadError::AlreadyExists(_)), "{err}");
        }
        assert_eq!(std::fs::read(srv.final_path("keep.bin")).unwrap(), b"original");
    }

    #[tokio::test]
    async fn overwrite_replaces_when_allowed() {
        let srv = TestServer::start(true).await;
        std::fs::create_dir_all(srv.final_path("")).unwrap();
        std::fs::write(srv.final_path("swap.bin"), b"original").unwrap();

        let driver = TransferDriver::new(
            WsConnection::new(&srv.url),
            MemorySource::new(b"replacement".to_vec()),
            UploadTarget::new("swap.bin", 11),
            &small_chunks(),
        )
        .with_overwrite(true);

        let outcome = driver.start().await.unwrap();
        assert_eq!(outcome.final_size, 11);
        assert_eq!(std::fs::read(srv.final_path("swap.bin")).unwrap(), b"replacement");
    }

    #[tokio::test]
    async fn resumes_interrupted_session() {
        let srv = TestServer::start(false).await;
        let data = payload(96 * 1024);

        // First client: open and send the first 40 KiB, then vanish.
        let session_id = {
            let conn = WsConnection::connect(&srv.url).await.unwrap();
            let opened = conn
                .open(&OpenRequest {
                    name: "resume.bin".into(),
                    overwrite: false,
                })
                .await
                .unwrap();

            let mut offset = 0u64;
            for chunk in data[..40 * 1024].chunks(8 * 1024) {
                let header = AppendHeader {
                    id: String::new(),
                    name: "resume.bin".into(),
                    session_id: opened.session_id,
                    offset,
                    checksum: String::new(),
                };
                offset = conn.append(&header, chunk).await.unwrap().size;
            }
            assert_eq!(offset, 40 * 1024);
            conn.disconnect().await;
            opened.session_id
        };

        // Second client resumes with the same source from scratch.
        let mut driver = TransferDriver::resume_session(
            WsConnection::new(&srv.url),
            MemorySource::new(data.clone()),
            UploadTarget::new("resume.bin", data.len() as u64),
            &small_chunks(),
            session_id,
        );
        let events = collect_events(driver.take_events().unwrap());
        let outcome = driver.start().await.unwrap();

        assert_eq!(outcome.session_id, Some(session_id));
        assert_eq!(outcome.final_size, data.len() as u64);
        assert_eq!(std::fs::read(srv.final_path("resume.bin")).unwrap(), data);

        let events = events.await.unwrap();
        assert!(events.contains(&TransferEvent::Opened {
            session_id,
            resumed: true
        }));
    }

    #[tokio::test]
    async fn stop_removes_partial_upload() {
        let srv = TestServer::start(false).await;
        let data = payload(64 * 1024);

        let mut driver = TransferDriver::new(
            WsConnection::new(&srv.url),
            MemorySource::new(data.clone()),
            UploadTarget::new("abandon.bin", data.len() as u64),
            &small_chunks(),
        );
        let handle = driver.handle();
        let mut events = driver.take_events().unwrap();

        // Paused before the first append; stop once the driver is parked.
        handle.pause();
        let run = tokio::spawn(driver.start());
        while let Some(event) = events.recv().await {
            if event == TransferEvent::Paused {
                handle.stop();
            }
            if event.is_terminal() {
                assert_eq!(event, TransferEvent::Stopped);
                break;
            }
        }

        let outcome = run.await.unwrap().unwrap();
        assert!(outcome.stopped);
        assert!(!srv.final_path("abandon.bin").exists());
        assert!(dir_is_empty(&srv.partial_dir()));
    }

    #[tokio::test]
    async fn serves_concurrent_clients() {
        let srv = TestServer::start(false).await;

        let uploads = (0..4).map(|i| {
            let url = srv.url.clone();
            tokio::spawn(async move {
                let data = payload(20 * 1024 + i);
                let driver = TransferDriver::new(
                    WsConnection::new(url),
                    MemorySource::new(data.clone()),
                    UploadTarget::new(format!("file-{i}.bin"), data.len() as u64),
                    &small_chunks(),
                );
                (driver.start().await, data)
            })
        });
        let uploads: Vec<_> = uploads.collect();

        for (i, upload) in uploads.into_iter().enumerate() {
            let (result, data) = upload.await.unwrap();
            assert_eq!(result.unwrap().final_size, data.len() as u64);
            assert_eq!(
                std::fs::read(srv.final_path(&format!("file-{i}.bin"))).unwrap(),
                data
            );
        }
    }
}
