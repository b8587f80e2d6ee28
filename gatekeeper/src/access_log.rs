use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{error, info, warn};

/// Edge callbacks hold up a media handshake; anything slower is worth a look
const SLOW_REQUEST_MS: u128 = 500;

/// One line per request. Bodies are never logged since hook bodies carry
/// stream keys and account bodies carry passwords.
pub async fn log_request(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let res = next.run(req).await;
    let elapsed = start.elapsed().as_millis();
    let status = res.status().as_u16();

    if res.status().is_server_error() {
        error!("[{} {}] [{}] {}ms", method, path, status, elapsed);
    } else if elapsed > SLOW_REQUEST_MS {
        warn!("[{} {}] [{}] {}ms", method, path, status, elapsed);
    } else {
        info!("[{} {}] [{}] {}ms", method, path, status, elapsed);
    }

    res
}
