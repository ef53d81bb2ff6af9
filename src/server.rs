//! Development server integration.
//!
//! The pipeline only talks to a [`DevServer`]: it calls `init` once before
//! watching, `reload` after every successful watch-triggered run and
//! `teardown` when the change source closes. [`LiveServer`] is the stock
//! implementation, a static file server with WebSocket live reload.

use camino::Utf8Path;

use crate::error::ServerError;

pub trait DevServer {
    /// Starts serving `dist`. Calling it again on a running server does nothing.
    fn init(&mut self, dist: &Utf8Path) -> Result<(), ServerError>;

    /// Tells connected browsers to reload the page.
    fn reload(&self);

    /// Stops serving.
    fn teardown(&mut self);
}

/// Get the JS script which enables live reloading.
#[cfg(all(feature = "live", feature = "server"))]
fn refresh_script(port: u16) -> String {
    format!(
        r#"<script>
const socket = new WebSocket("ws://" + location.hostname + ":{port}");
socket.addEventListener("message", event => {{
    if (event.data === "reload") window.location.reload();
}});
</script>"#
    )
}

/// Inserts the live reload script right before `</body>`, or at the end of the
/// document when there is no closing body tag.
#[cfg(all(feature = "live", feature = "server"))]
fn inject_script(html: &str, port: u16) -> String {
    let script = refresh_script(port);

    match html.rfind("</body>") {
        Some(i) => format!("{}{script}{}", &html[..i], &html[i..]),
        None => format!("{html}{script}"),
    }
}

#[cfg(all(feature = "live", feature = "server"))]
pub use live::LiveServer;

#[cfg(all(feature = "live", feature = "server"))]
mod live {
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::Sender;
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
    use axum::response::{IntoResponse, Response};
    use camino::Utf8Path;
    use console::style;
    use tower_http::services::ServeDir;
    use tungstenite::WebSocket;

    use super::{DevServer, inject_script};
    use crate::error::ServerError;

    type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

    /// Browsers kept connected for live reload, older ones are closed.
    const MAX_CLIENTS: usize = 10;

    const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Serves the output tree over HTTP and reloads connected browsers over a
    /// WebSocket.
    ///
    /// The WebSocket listens on `127.0.0.1:1337`, or on a random port when
    /// that one is taken. Every HTML page served gets a small script that
    /// connects to it.
    pub struct LiveServer {
        http_port: u16,
        running: Option<Running>,
    }

    struct Running {
        ws_port: u16,
        http_port: u16,
        ws_stop: Arc<AtomicBool>,
        ws: Option<JoinHandle<()>>,
        tx_reload: Sender<()>,
        shutdown: Option<tokio::sync::oneshot::Sender<()>>,
        http: Option<JoinHandle<()>>,
    }

    impl Default for LiveServer {
        fn default() -> Self {
            Self {
                http_port: 8080,
                running: None,
            }
        }
    }

    impl LiveServer {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sets the HTTP port, `0` picks a free one.
        pub fn port(mut self, port: u16) -> Self {
            self.http_port = port;
            self
        }

        /// Port of the live reload WebSocket, once running.
        pub fn ws_port(&self) -> Option<u16> {
            self.running.as_ref().map(|r| r.ws_port)
        }

        /// Port the HTTP server is bound to, once running.
        pub fn http_port(&self) -> Option<u16> {
            self.running.as_ref().map(|r| r.http_port)
        }
    }

    impl DevServer for LiveServer {
        fn init(&mut self, dist: &Utf8Path) -> Result<(), ServerError> {
            if self.running.is_some() {
                return Ok(());
            }

            let (tcp, ws_port) = reserve_port().map_err(|source| ServerError::Bind {
                what: "live reload socket",
                source,
            })?;

            let (shutdown, http, http_port) = start_http(dist, self.http_port, ws_port)?;

            let clients: Clients = Arc::new(Mutex::new(vec![]));
            let ws_stop = Arc::new(AtomicBool::new(false));
            let ws = new_thread_ws_incoming(tcp, clients.clone(), ws_stop.clone());
            let tx_reload = new_thread_ws_reload(clients);

            let url = style(format!("http://localhost:{http_port}/")).yellow();
            tracing::info!("serving {dist} on {url}");

            self.running = Some(Running {
                ws_port,
                http_port,
                ws_stop,
                ws: Some(ws),
                tx_reload,
                shutdown: Some(shutdown),
                http: Some(http),
            });

            Ok(())
        }

        fn reload(&self) {
            match &self.running {
                Some(running) => {
                    if running.tx_reload.send(()).is_err() {
                        tracing::warn!("live reload thread is gone");
                    }
                }
                None => tracing::debug!("reload requested before the server started"),
            }
        }

        fn teardown(&mut self) {
            let Some(mut running) = self.running.take() else {
                return;
            };

            if let Some(tx) = running.shutdown.take() {
                let _ = tx.send(());
            }

            if let Some(http) = running.http.take()
                && http.join().is_err()
            {
                tracing::error!("HTTP server thread panicked");
            }

            // Wake the blocking accept so the thread sees the flag and
            // releases the port.
            running.ws_stop.store(true, Ordering::SeqCst);
            let _ = TcpStream::connect(("127.0.0.1", running.ws_port));

            if let Some(ws) = running.ws.take()
                && ws.join().is_err()
            {
                tracing::error!("live reload thread panicked");
            }
        }
    }

    impl Drop for LiveServer {
        fn drop(&mut self) {
            self.teardown();
        }
    }

    fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
        let listener = match TcpListener::bind("127.0.0.1:1337") {
            Ok(sock) => sock,
            Err(_) => TcpListener::bind("127.0.0.1:0")?,
        };

        let addr = listener.local_addr()?;
        let port = addr.port();
        Ok((listener, port))
    }

    fn new_thread_ws_incoming(
        server: TcpListener,
        clients: Clients,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            for stream in server.incoming() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::debug!("live reload connection failed: {e}");
                        continue;
                    }
                };

                // A client stuck in the handshake must not block teardown.
                if let Err(e) = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)) {
                    tracing::debug!("live reload connection failed: {e}");
                    continue;
                }

                let socket = match tungstenite::accept(stream) {
                    Ok(socket) => socket,
                    Err(e) => {
                        tracing::debug!("rejected live reload client: {e}");
                        continue;
                    }
                };

                if let Ok(mut clients) = clients.lock() {
                    clients.push(socket);
                }
            }
        })
    }

    fn new_thread_ws_reload(clients: Clients) -> Sender<()> {
        let (tx, rx) = std::sync::mpsc::channel();

        thread::spawn(move || {
            while rx.recv().is_ok() {
                let Ok(mut clients) = clients.lock() else {
                    break;
                };

                // Drop every socket that can't take the message anymore.
                clients.retain_mut(|socket| match socket.send("reload".into()) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!("dropping live reload client: {e}");
                        false
                    }
                });

                let len = clients.len();
                if len > MAX_CLIENTS {
                    for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                        socket.close(None).ok();
                    }
                }

                tracing::debug!("reloaded {} client(s)", clients.len());
            }
        });

        tx
    }

    fn start_http(
        dist: &Utf8Path,
        port: u16,
        ws_port: u16,
    ) -> Result<(tokio::sync::oneshot::Sender<()>, JoinHandle<()>, u16), ServerError> {
        let address = SocketAddr::from(([127, 0, 0, 1], port));
        let bind = |source| ServerError::Bind {
            what: "HTTP server",
            source,
        };

        // Bind up front, so a taken port fails `init` instead of a thread.
        let listener = TcpListener::bind(address).map_err(bind)?;
        listener.set_nonblocking(true).map_err(bind)?;
        let port = listener.local_addr().map_err(bind)?.port();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;

        let router = Router::new()
            .fallback_service(ServeDir::new(dist))
            .layer(axum::middleware::map_response_with_state(ws_port, inject));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let thread = thread::spawn(move || {
            let result = runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        rx.await.ok();
                    })
                    .await
            });

            if let Err(e) = result {
                tracing::error!("HTTP server stopped: {e}");
            }
        });

        Ok((tx, thread, port))
    }

    async fn inject(State(port): State<u16>, response: Response) -> Response {
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/html"));

        if !is_html {
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("couldn't read response body: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let html = match std::str::from_utf8(&bytes) {
            Ok(html) => inject_script(html, port),
            Err(_) => return Response::from_parts(parts, Body::from(bytes)),
        };

        parts.headers.remove(CONTENT_LENGTH);
        Response::from_parts(parts, Body::from(html))
    }

}
