//! Centralized movement authority: the server that arbitrates segment
//! occupancy, its in-memory state, and the train-side client.

/// Train-side connection helper.
pub mod client;
/// Request and response encoding.
pub mod protocol;
/// Accept loop and per-connection workers.
pub mod server;
/// Believed occupancy and the grant rule.
pub mod state;

pub use client::AuthorityClient;
pub use protocol::AuthorizationRequest;
pub use server::{AuthorityEvent, AuthorityServer, AuthoritySummary};
pub use state::{AuthorityState, Decision};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::{config::AppConfig, map::TrackLayout, models::Position, segment::SegmentStore};

    fn test_config(root: &std::path::Path) -> AppConfig {
        AppConfig {
            segment_dir: root.to_path_buf(),
            socket_path: root.join("rbc.sock"),
            log_dir: root.join("log"),
            poll_interval_ms: 10,
            connect_retry_ms: 10,
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn serves_grants_denials_and_audits_each() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let config = test_config(dir.path());
        let store = SegmentStore::new(&config.segment_dir);
        for id in TrackLayout::default().segment_ids() {
            store.initialize(id)?;
        }

        let (broadcast_tx, broadcast_rx) = oneshot::channel();
        broadcast_tx
            .send("S1-MA1-MA2-S2~S3-MA1-S4".to_string())
            .map_err(|_| anyhow::anyhow!("broadcast not delivered"))?;
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let server = AuthorityServer::start(&config, store.clone(), broadcast_rx, events_tx).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(server.run(shutdown_rx));

        let client = AuthorityClient::from_config(&config);
        let hop = |train, current, next| AuthorizationRequest::new(train, current, next);

        assert!(client.authorize(&hop(1, Position::Station(1), Position::Segment(1))).await?);
        store.set_occupied(1, true)?;
        assert!(!client.authorize(&hop(2, Position::Station(3), Position::Segment(1))).await?);

        assert!(client.authorize(&hop(1, Position::Segment(1), Position::Segment(2))).await?);
        store.set_occupied(2, true)?;
        store.set_occupied(1, false)?;
        assert!(client.authorize(&hop(2, Position::Station(3), Position::Segment(1))).await?);

        assert!(client.authorize(&hop(1, Position::Segment(2), Position::Station(2))).await?);
        assert_eq!(
            events_rx.recv().await,
            Some(AuthorityEvent::StationReached { train: 1, station: 2 })
        );

        shutdown_tx
            .send(())
            .map_err(|_| anyhow::anyhow!("server already stopped"))?;
        let summary = handle.await??;
        assert_eq!(summary, AuthoritySummary { decisions: 5, granted: 4 });
        assert!(!config.socket_path.exists());

        let audit = std::fs::read_to_string(config.audit_log_path())?;
        let lines: Vec<&str> = audit.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with(
            "[TRENO authorization request: T2], [Current: S3], [Next: MA1], [Authorized: NO]"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn client_waits_for_the_server_to_appear() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let config = test_config(dir.path());
        let store = SegmentStore::new(&config.segment_dir);
        store.initialize(1)?;

        let client = AuthorityClient::new(&config.socket_path, Duration::from_millis(5));
        let pending = tokio::spawn(async move {
            client
                .authorize(&AuthorizationRequest::new(1, Position::Station(1), Position::Segment(1)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (broadcast_tx, broadcast_rx) = oneshot::channel();
        let _ = broadcast_tx.send("S1-MA1-S2".to_string());
        let (events_tx, _events_rx) = mpsc::channel(8);
        let server = AuthorityServer::start(&config, store, broadcast_rx, events_tx).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(server.run(shutdown_rx));

        assert!(pending.await??);
        let _ = shutdown_tx.send(());
        assert_eq!(handle.await??.decisions, 1);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_request_gets_no_answer() -> anyhow::Result<()> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempdir()?;
        let config = test_config(dir.path());
        let (broadcast_tx, broadcast_rx) = oneshot::channel();
        let _ = broadcast_tx.send("--".to_string());
        let (events_tx, _events_rx) = mpsc::channel(8);
        let server = AuthorityServer::start(
            &config,
            SegmentStore::new(&config.segment_dir),
            broadcast_rx,
            events_tx,
        )
        .await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(server.run(shutdown_rx));

        let mut stream = tokio::net::UnixStream::connect(&config.socket_path).await?;
        stream.write_all(b"garbage").await?;
        stream.shutdown().await?;
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        assert!(reply.is_empty());

        let _ = shutdown_tx.send(());
        assert_eq!(handle.await??.decisions, 0);
        Ok(())
    }

    #[tokio::test]
    async fn answers_without_waiting_for_half_close() -> anyhow::Result<()> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempdir()?;
        let config = test_config(dir.path());
        let store = SegmentStore::new(&config.segment_dir);
        store.initialize(1)?;

        let (broadcast_tx, broadcast_rx) = oneshot::channel();
        let _ = broadcast_tx.send("S1-MA1-S2".to_string());
        let (events_tx, _events_rx) = mpsc::channel(8);
        let server = AuthorityServer::start(&config, store, broadcast_rx, events_tx).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(server.run(shutdown_rx));

        // An idle connection must not hold up the next one.
        let idle = tokio::net::UnixStream::connect(&config.socket_path).await?;

        let mut stream = tokio::net::UnixStream::connect(&config.socket_path).await?;
        stream.write_all(b"1~S1~MA1").await?;
        let mut reply = [0u8; 1];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut reply)).await??;
        assert_eq!(reply, [1]);

        drop(idle);
        let _ = shutdown_tx.send(());
        assert_eq!(handle.await??.decisions, 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_for_one_segment_grant_once() -> anyhow::Result<()> {
        const CONTENDERS: u32 = 5;

        let dir = tempdir()?;
        let config = test_config(dir.path());
        let store = SegmentStore::new(&config.segment_dir);
        for id in TrackLayout::default().segment_ids() {
            store.initialize(id)?;
        }

        let broadcast = (1..=CONTENDERS)
            .map(|station| format!("S{station}-MA1-S{}", station + 1))
            .collect::<Vec<_>>()
            .join("~");
        let (broadcast_tx, broadcast_rx) = oneshot::channel();
        let _ = broadcast_tx.send(broadcast);
        let (events_tx, _events_rx) = mpsc::channel(8);
        let server = AuthorityServer::start(&config, store, broadcast_rx, events_tx).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(server.run(shutdown_rx));

        let start = std::sync::Arc::new(tokio::sync::Barrier::new(CONTENDERS as usize));
        let requests: Vec<_> = (1..=CONTENDERS)
            .map(|train| {
                let client = AuthorityClient::from_config(&config);
                let start = std::sync::Arc::clone(&start);
                tokio::spawn(async move {
                    start.wait().await;
                    client
                        .authorize(&AuthorizationRequest::new(
                            train,
                            Position::Station(train),
                            Position::Segment(1),
                        ))
                        .await
                })
            })
            .collect();
        let mut grants = 0;
        for request in requests {
            if request.await?? {
                grants += 1;
            }
        }
        assert_eq!(grants, 1);

        let _ = shutdown_tx.send(());
        let summary = handle.await??;
        assert_eq!(
            summary,
            AuthoritySummary {
                decisions: CONTENDERS as usize,
                granted: 1
            }
        );

        let audit = std::fs::read_to_string(config.audit_log_path())?;
        assert_eq!(audit.lines().count(), CONTENDERS as usize);
        assert_eq!(
            audit.lines().filter(|line| line.contains("[Authorized: SI]")).count(),
            1
        );
        Ok(())
    }
}
