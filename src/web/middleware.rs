use crate::web::extractors::REQUEST_ID_HEADER;
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;

/// Request logging; also makes sure every request and response carries an
/// `X-Request-ID`
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let request_id = match req.headers().get(REQUEST_ID_HEADER) {
        Some(value) => value.clone(),
        None => {
            let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
            req.headers_mut().insert(REQUEST_ID_HEADER, generated.clone());
            generated
        }
    };

    let start_time = Instant::now();
    tracing::debug!(
        "Request started: {} {} - request_id={}",
        method,
        uri,
        request_id.to_str().unwrap_or("invalid")
    );

    let mut response = next.run(req).await;

    tracing::info!(
        "Request completed: {} {} - {} - {}ms - request_id={}",
        method,
        uri,
        response.status(),
        start_time.elapsed().as_millis(),
        request_id.to_str().unwrap_or("invalid")
    );

    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}
