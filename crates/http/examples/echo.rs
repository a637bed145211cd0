use ferry_http::codec::{HttpDecoder, HttpEncoder};
use ferry_http::protocol::body::BODY_BUFFER_SIZE;
use ferry_http::protocol::{HttpError, HttpRequest, HttpResponse, SendError};
use ferry_socks::{AsyncSocket, AsyncSocketPool, BufferedIterator, PoolConfig, Socket, SocketAddress, SocketError, SocketPool};
use futures::StreamExt;
use http::{StatusCode, Version, header};
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

// curl -v -d "Fish & Chips" http://127.0.0.1:8080/echo
// curl -v -H "Transfer-Encoding: chunked" -d "Fish & Chips" http://127.0.0.1:8080/echo
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = serve(8080).await {
        error!(cause = %e, "server stopped");
    }
}

async fn serve(port: u16) -> Result<(), SocketError> {
    let pool = SocketPool::make(&PoolConfig::default());
    pool.prepare().await?;
    tokio::spawn({
        let pool = pool.clone();
        async move {
            if let Err(e) = pool.run().await {
                error!(cause = %e, "socket pool failed");
            }
        }
    });

    let listener = Socket::new(libc::AF_INET, libc::SOCK_STREAM)?;
    listener.set_reuse_address()?;
    listener.bind(&SocketAddress::loopback(port))?;
    listener.listen(128)?;
    let listener = AsyncSocket::new(listener, Arc::new(pool))?;
    info!(port, "start listening");

    let mut sockets = Box::pin(listener.sockets());
    while let Some(socket) = sockets.next().await {
        let socket = match socket {
            Ok(socket) => socket,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        tokio::spawn(async move {
            match handle_connection(&socket).await {
                Ok(()) => info!("finished process, connection shutdown"),
                Err(e) => error!(cause = %e, "service has error, connection shutdown"),
            }
            if let Err(e) = socket.close() {
                warn!(cause = %e, "failed to close socket");
            }
        });
    }
    Ok(())
}

async fn handle_connection(socket: &AsyncSocket) -> Result<(), HttpError> {
    let decoder = HttpDecoder::new();
    let encoder = HttpEncoder::new();
    let bytes = socket.bytes();

    loop {
        let request = match decoder.decode_request(&bytes).await {
            Ok(request) => request,
            Err(e) if e.socket_error().is_some_and(SocketError::is_disconnected) => return Ok(()),
            Err(e) => {
                warn!(cause = %e, "bad request");
                let response = HttpResponse::new(StatusCode::BAD_REQUEST).with_body(format!("{e}\n"));
                write_response(socket, &encoder, &response).await?;
                return Ok(());
            }
        };
        info!(method = %request.method, path = %request.path, body_size = ?request.body.count(), "receiving request");

        // the response streams the request body straight back
        let mut response = HttpResponse::new(StatusCode::OK).with_body(request.body.clone());
        if let Some(content_type) = request.headers.as_map().get(header::CONTENT_TYPE) {
            response.headers.insert(header::CONTENT_TYPE, content_type.clone());
        }
        write_response(socket, &encoder, &response).await?;
        request.body.flush_if_needed().await.map_err(SendError::from)?;

        if !keep_alive(&request) {
            return Ok(());
        }
    }
}

async fn write_response(socket: &AsyncSocket, encoder: &HttpEncoder, response: &HttpResponse) -> Result<(), SendError> {
    socket.write(&encoder.encode_response_header(response)?).await?;
    let mut body = encoder.body_iter(&response.body);
    while let Some(chunk) = body.next_buffer(BODY_BUFFER_SIZE).await? {
        socket.write(&chunk).await?;
    }
    Ok(())
}

fn keep_alive(request: &HttpRequest) -> bool {
    let close = request.headers.get(header::CONNECTION).is_some_and(|value| value.eq_ignore_ascii_case("close"));
    !close && (request.version == Version::HTTP_11 || request.should_keep_alive())
}
