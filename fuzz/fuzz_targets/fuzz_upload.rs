#![no_main]

use std::convert::Infallible;

use futures_util::stream;
use libfuzzer_sys::fuzz_target;
use multer_upload::bytes::Bytes;
use multer_upload::{Limits, Multer, MultipartOptions};
use tokio::runtime;

fuzz_target!(|data: &[u8]| {
    // Feed the body in small uneven chunks to move delimiters across reads.
    let chunks: Vec<Result<Bytes, Infallible>> = data
        .chunks(13)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();

    let limits = Limits::new().max_files(4).max_file_size(4096).max_field_size(1024);
    let multer = Multer::any(MultipartOptions::new().limits(limits));

    let rt = runtime::Builder::new_current_thread().build().expect("runtime");
    rt.block_on(async {
        if let Ok(result) = multer
            .parse_request("multipart/form-data; boundary=X-BOUNDARY", stream::iter(chunks))
            .await
        {
            assert!(result.files().len() <= 4);
            assert!(result.files().iter().all(|file| file.size() <= 4096));
        }
    })
});
