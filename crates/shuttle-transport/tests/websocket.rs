//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and drive it
//! with a `tokio-tungstenite` client.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;

    use shuttle_transport::{Connection, Handshake, Transport, WebSocketTransport};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    async fn connect_client(url: &str, auth: Option<&'static str>) -> ClientWs {
        let mut request = url.into_client_request().expect("valid url");
        if let Some(auth) = auth {
            request
                .headers_mut()
                .insert(AUTHORIZATION, HeaderValue::from_static(auth));
        }
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, addr) = bind().await;

        let server_handle = tokio::spawn(async move {
            transport
                .accept()
                .await
                .expect("should accept")
                .upgrade()
                .await
                .expect("should upgrade")
        });

        let mut client_ws =
            connect_client(&format!("ws://{addr}/ws"), None).await;
        let server_conn = server_handle.await.expect("task should complete");

        assert!(server_conn.id().into_inner() > 0);

        server_conn
            .send_text("hello from server")
            .await
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_text().unwrap().as_str(), "hello from server");

        client_ws
            .send(Message::Binary(b"hello from client".to_vec().into()))
            .await
            .unwrap();
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"hello from client");

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_captures_path_and_authorization() {
        let (mut transport, addr) = bind().await;

        let server_handle = tokio::spawn(async move {
            transport
                .accept()
                .await
                .expect("should accept")
                .upgrade()
                .await
                .expect("should upgrade")
        });

        let _client_ws =
            connect_client(&format!("ws://{addr}/ws/shuttle-9"), Some("Bearer abc"))
                .await;
        let server_conn = server_handle.await.unwrap();

        let request = server_conn.request();
        assert_eq!(request.path, "/ws/shuttle-9");
        assert_eq!(request.authorization.as_deref(), Some("Bearer abc"));
    }

    #[tokio::test]
    async fn test_websocket_captures_query_token() {
        let (mut transport, addr) = bind().await;

        let server_handle = tokio::spawn(async move {
            transport
                .accept()
                .await
                .expect("should accept")
                .upgrade()
                .await
                .expect("should upgrade")
        });

        let _client_ws =
            connect_client(&format!("ws://{addr}/ws?token=qtok"), None).await;
        let server_conn = server_handle.await.unwrap();

        assert_eq!(server_conn.request().path, "/ws");
        assert_eq!(server_conn.request().credential(), Some("qtok"));
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (mut transport, addr) = bind().await;

        let server_handle = tokio::spawn(async move {
            transport
                .accept()
                .await
                .expect("should accept")
                .upgrade()
                .await
                .expect("should upgrade")
        });

        let mut client_ws =
            connect_client(&format!("ws://{addr}/ws"), None).await;
        let server_conn = server_handle.await.unwrap();

        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_accept_does_not_wait_for_stalled_handshake() {
        let (mut transport, addr) = bind().await;

        // Connects at the TCP level and never sends an upgrade request.
        let _stalled = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let stalled = tokio::time::timeout(Duration::from_secs(1), transport.accept())
            .await
            .expect("accept should return before any handshake")
            .expect("should accept");

        let server_handle = tokio::spawn(async move {
            transport
                .accept()
                .await
                .expect("should accept")
                .upgrade()
                .await
                .expect("should upgrade")
        });
        let _client_ws = connect_client(&format!("ws://{addr}/ws"), None).await;
        let server_conn = tokio::time::timeout(Duration::from_secs(3), server_handle)
            .await
            .expect("second client should not wait on the stalled peer")
            .unwrap();

        assert!(server_conn.id() > stalled.id());
        assert!(
            tokio::time::timeout(Duration::from_millis(100), stalled.upgrade())
                .await
                .is_err(),
            "stalled upgrade should still be waiting"
        );
    }
}
