use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyStream, Full};
use hyper::{body::Incoming, header::CONTENT_TYPE, Request, Response, StatusCode};
// Import the upload engine types.
use multer_upload::{FieldSpec, Limits, Multer, MultipartOptions};

// A handler for incoming requests.
async fn handle(multer: Arc<Multer>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    // Convert the body into a stream of data frames.
    let body_stream = BodyStream::new(req.into_body())
        .filter_map(|result| async move { result.map(|frame| frame.into_data().ok()).transpose() });

    // Parse the whole body; limits, filter and storage come from the engine.
    let result = match multer.parse_request(&content_type, body_stream).await {
        Ok(result) => result,
        Err(err) => {
            // Map the failure to a status, e.g. 413 for limits and 400 for bad bodies.
            let response = Response::builder()
                .status(err.status_code())
                .body(Full::from(err.to_string()))
                .unwrap_or_else(|_| Response::new(Full::from("error")));
            return Ok(response);
        }
    };

    let mut report = String::new();
    for field in result.fields() {
        report.push_str(&format!("field {} = {:?}\n", field.field_name(), field.value()));
    }
    for file in result.files() {
        report.push_str(&format!(
            "file {}: {} ({}, {} bytes) at {:?}\n",
            file.field_name(),
            file.original_file_name(),
            file.content_type(),
            file.size(),
            file.path()
        ));
    }
    for rejected in result.rejected() {
        report.push_str(&format!("rejected {:?}\n", rejected.file_name()));
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(Full::from(report))
        .unwrap_or_else(|_| Response::new(Full::from("ok"))))
}

#[tokio::main]
async fn main() {
    let options = MultipartOptions::new()
        .dest(std::env::temp_dir().join("multer-upload-demo"))
        .limits(Limits::new().max_file_size(10 * 1024 * 1024).max_field_size(64 * 1024))
        .filter(|meta| meta.content_type().type_() == mime::IMAGE || meta.content_type() == mime::TEXT_PLAIN);

    // Up to 4 photos and a single avatar; any text fields.
    let multer = Arc::new(Multer::fields(
        vec![FieldSpec::new("photos").max_count(4), FieldSpec::new("avatar").max_count(1)],
        options,
    ));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    println!("Server running at: {}", addr);

    loop {
        let (socket, _remote_addr) = listener.accept().await.unwrap();
        let socket = hyper_util::rt::TokioIo::new(socket);
        let multer = Arc::clone(&multer);
        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |req| handle(Arc::clone(&multer), req));
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(socket, service)
                .await
            {
                eprintln!("server error: {}", e);
            }
        });
    }
}
