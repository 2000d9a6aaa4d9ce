//! `multipart/form-data` body builder for file uploads.
use crate::upload::FilePart;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) struct FormBody {
    boundary: String,
    body: Vec<u8>,
}

impl FormBody {
    /// Encode every file as a separate part under the same field name.
    pub(crate) fn from_files(field_name: &str, files: &[FilePart]) -> Self {
        let boundary = boundary_for(files);
        let mut body = Vec::with_capacity(files.iter().map(|f| f.bytes.len() + 256).sum());
        for file in files {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    quote_param(field_name),
                    quote_param(&file.file_name)
                )
                .as_bytes(),
            );
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.mime_type).as_bytes());
            body.extend_from_slice(&file.bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        Self { boundary, body }
    }

    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Pick a boundary that does not occur in any part.
fn boundary_for(files: &[FilePart]) -> String {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut attempt: u128 = 0;
    loop {
        let candidate = format!(
            "----rfpflow{:x}{:x}",
            seed.wrapping_add(attempt),
            std::process::id()
        );
        let needle = candidate.as_bytes();
        let collides = files
            .iter()
            .any(|file| file.bytes.windows(needle.len()).any(|window| window == needle));
        if !collides {
            return candidate;
        }
        attempt += 1;
    }
}

fn quote_param(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}
