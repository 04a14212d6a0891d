#[cfg(test)]
pub mod test {
    use std::{sync::Arc, time::Duration};

    use tempfile::tempdir;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
        net::{tcp::OwnedReadHalf, TcpListener, TcpStream},
        sync::broadcast,
    };

    use crate::{
        config::Config,
        engine::StorageEngine,
        server::{Server, GREETING},
    };

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: std::net::SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            let mut client = Self {
                lines: BufReader::new(reader).lines(),
                writer,
            };
            assert_eq!(client.read_line().await.as_deref(), Some(GREETING));
            client
        }

        async fn read_line(&mut self) -> Option<String> {
            self.lines.next_line().await.unwrap()
        }

        async fn send(&mut self, command: &str) -> String {
            self.writer
                .write_all(format!("{command}\n").as_bytes())
                .await
                .unwrap();
            self.read_line().await.unwrap()
        }
    }

    #[tokio::test]
    async fn line_protocol_round_trip() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(Config::default().with_data_dir(dir.path())).unwrap();
        let server = Arc::new(Server::new(
            Arc::clone(engine.executor()),
            Duration::from_secs(2),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let serving = tokio::spawn(server.serve(listener, shutdown_rx));

        let mut client = Client::connect(addr).await;
        assert_eq!(client.send("BEGIN;").await, "OK");
        assert_eq!(client.send("INSERT INTO kv a 1;").await, "OK");
        assert_eq!(client.send("COMMIT").await, "OK");
        assert_eq!(client.send("SELECT * FROM kv WHERE key = a").await, "1");
        assert_eq!(client.send("SELECT * FROM kv WHERE key = zz").await, "NULL");
        assert_eq!(client.send("ROLLBACK").await, "OK NO_TX");
        assert_eq!(client.send("DROP TABLE kv").await, "ERR invalid sql");
        assert!(client
            .send("SELECT * FROM nope WHERE key = a")
            .await
            .starts_with("ERR "));
        // Still usable after errors
        assert_eq!(client.send("SELECT RANGE FROM kv a").await, "a=1");

        // A second connection leaves its open transaction behind on disconnect
        let mut other = Client::connect(addr).await;
        assert_eq!(other.send("BEGIN").await, "OK");
        assert_eq!(other.send("INSERT INTO kv b 2").await, "OK");
        assert_eq!(other.send("QUIT").await, "BYE");
        assert_eq!(other.read_line().await, None);

        let executor = Arc::clone(engine.executor());
        for _ in 0..100 {
            if executor.open_transactions() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(executor.open_transactions(), 0);
        assert_eq!(client.send("SELECT * FROM kv WHERE key = b").await, "NULL");

        assert_eq!(client.send("exit").await, "BYE");
        shutdown_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn blank_lines_get_no_reply() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open(Config::default().with_data_dir(dir.path())).unwrap();
        let server = Server::new(Arc::clone(engine.executor()), Duration::from_secs(2));

        assert_eq!(server.respond(1, "   ").await.as_deref(), Some(""));
        assert_eq!(server.respond(1, ";").await.as_deref(), Some(""));
        assert_eq!(server.respond(1, "QUIT").await, None);
        assert_eq!(server.respond(1, "CREATE TABLE t;").await.as_deref(), Some("OK"));
    }
}
