#[cfg(test)]
mod headless_playback_tests {
    use mockito::Matcher;
    use tourplay::models::{
        BackendKind, Credential, EngineEvent, EngineState, PlaybackRequest, PlaybackSource,
        PlaybackWindow, StreamDescriptor,
    };

    use crate::common::TestContext;

    const DIRECT_URL: &str = "https://cdn.example.com/tours/7/walkthrough.mp4";

    fn stream_request(path: &str) -> PlaybackRequest {
        let source = PlaybackSource::default()
            .with_stream(StreamDescriptor::new(path).with_partition("tenant-b"));
        PlaybackRequest::new(source, PlaybackWindow::starting_at(4.0))
            .with_credential(Credential::new("integration-key"))
    }

    #[tokio::test]
    async fn test_stream_plays_through_http() {
        let mut ctx = TestContext::new().await;
        let mock = ctx
            .server
            .mock("GET", "/videos/7/stream")
            .match_header("authorization", "Bearer integration-key")
            .match_header("partition", "tenant-b")
            .with_status(200)
            .with_header("content-type", "video/mp4")
            .with_body(vec![0u8; 4096])
            .create_async()
            .await;

        ctx.handle.load(stream_request("/videos/7/stream")).await.unwrap();
        ctx.wait_for_state(EngineState::Playing(BackendKind::AuthenticatedStream))
            .await;

        mock.assert_async().await;
        assert_eq!(ctx.registry.live_count(), 1);

        ctx.handle.clear().await.unwrap();
        assert_eq!(ctx.registry.live_count(), 0);
        assert_eq!(ctx.registry.revoked_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_not_found_reports_error() {
        let mut ctx = TestContext::new().await;
        let _mock = ctx
            .server
            .mock("GET", "/videos/404/stream")
            .with_status(404)
            .create_async()
            .await;

        ctx.handle.load(stream_request("/videos/404/stream")).await.unwrap();
        let event = ctx
            .wait_for(|event| {
                matches!(
                    event,
                    EngineEvent::StateChanged {
                        state: EngineState::Error(_)
                    }
                )
            })
            .await;

        match event {
            EngineEvent::StateChanged {
                state: EngineState::Error(reason),
            } => assert!(reason.contains("404"), "unexpected reason: {}", reason),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(ctx.registry.created_count(), 0);
    }

    #[tokio::test]
    async fn test_server_error_falls_back_to_direct_file() {
        let mut ctx = TestContext::new().await;
        let _mock = ctx
            .server
            .mock("GET", Matcher::Regex(r"^/videos/\d+/stream$".to_string()))
            .with_status(500)
            .create_async()
            .await;

        let mut request = stream_request("/videos/9/stream");
        request.source = request.source.with_direct_url(DIRECT_URL);
        ctx.handle.load(request).await.unwrap();

        ctx.wait_for_state(EngineState::Playing(BackendKind::DirectFile))
            .await;
        assert!(ctx.seen.contains(&EngineEvent::FellBack {
            from: BackendKind::AuthenticatedStream,
            to: BackendKind::DirectFile,
        }));
    }

    #[tokio::test]
    async fn test_direct_file_reports_positions() {
        let mut ctx = TestContext::new().await;
        let source = PlaybackSource::default().with_direct_url(DIRECT_URL);
        ctx.handle
            .load(PlaybackRequest::new(source, PlaybackWindow::starting_at(12.0)))
            .await
            .unwrap();

        let event = ctx
            .wait_for(|event| matches!(event, EngineEvent::Position(_)))
            .await;
        let EngineEvent::Position(report) = event else {
            unreachable!()
        };
        assert!(report.current_seconds >= 12.0);
        assert!(report.current_seconds < 14.0);
    }

    #[tokio::test]
    async fn test_unavailable_embedded_api_falls_back() {
        let mut ctx = TestContext::with_config(|config| {
            config.embedded.api_ready_timeout_secs = 1;
        })
        .await;
        let source = PlaybackSource::default()
            .with_embedded_id("dQw4w9WgXcQ")
            .with_direct_url(DIRECT_URL);
        ctx.handle
            .load(PlaybackRequest::new(source, PlaybackWindow::default()))
            .await
            .unwrap();

        ctx.wait_for_state(EngineState::Playing(BackendKind::DirectFile))
            .await;
        assert!(ctx.seen.contains(&EngineEvent::FellBack {
            from: BackendKind::Embedded,
            to: BackendKind::DirectFile,
        }));
    }
}
