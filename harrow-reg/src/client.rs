//  CLIENT.rs
//    by Lut99
//
//  Created:
//    21 Feb 2023, 13:31:47
//  Last edited:
//    19 Jun 2023, 15:49:28
//  Auto updated?
//    Yes
//
//  Description:
//!   Provides client code for the bucket registry: fetching buckets (and
//!   raw source files) from peers, with the transfer retry policy
//!   applied and the protocol status codes interpreted.
//

use log::debug;
use reqwest::{Client, StatusCode};

use harrow_shr::backoff::{self, BackoffPolicy};

use crate::errors::FetchError;
use crate::frame;


/***** LIBRARY *****/
/// Fetches the raw bytes behind the given URL.
///
/// Schema-less URLs are opened as local files; `http(s)://` URLs are fetched with the transfer
/// backoff policy. Transport errors are retried; the protocol statuses 404 and 410 are not (they
/// mean the producer must re-run, which retrying cannot fix).
///
/// # Arguments
/// - `client`: The shared HTTP client.
/// - `url`: The URL (or local path) to fetch.
///
/// # Errors
/// A [`FetchError`] describing why the bytes could not be had.
pub async fn fetch_raw(client: &Client, url: &str) -> Result<Vec<u8>, FetchError> {
    // Local paths bypass HTTP entirely
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return match tokio::fs::read(url).await {
            Ok(raw)  => Ok(raw),
            Err(err) => Err(FetchError::FileError{ path: url.into(), err }),
        };
    }

    debug!("Fetching '{}'...", url);
    let (status, body): (StatusCode, Vec<u8>) = match backoff::retry(&format!("fetch '{}'", url), BackoffPolicy::transfer(), || async move {
        let res: reqwest::Response = client.get(url).send().await?;
        let status: StatusCode = res.status();
        let body: Vec<u8> = res.bytes().await?.to_vec();
        Ok::<(StatusCode, Vec<u8>), reqwest::Error>((status, body))
    }).await {
        Ok(res)  => res,
        Err(err) => { return Err(FetchError::RequestError{ url: url.into(), err }); },
    };

    match status {
        StatusCode::OK        => Ok(body),
        StatusCode::NOT_FOUND => Err(FetchError::NotFound{ url: url.into() }),
        StatusCode::GONE      => Err(FetchError::Gone{ url: url.into() }),
        code                  => Err(FetchError::StatusError{ url: url.into(), code: code.as_u16() }),
    }
}

/// Decodes a raw source file into its text-line records: one record per line, keyed by the
/// decimal byte offset of the line's start (the conventional text input format).
pub fn text_records(raw: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut records: Vec<(Vec<u8>, Vec<u8>)> = vec![];
    let mut start: usize = 0;
    for (i, byte) in raw.iter().enumerate() {
        if *byte == b'\n' {
            records.push((start.to_string().into_bytes(), raw[start..i].to_vec()));
            start = i + 1;
        }
    }
    if start < raw.len() {
        records.push((start.to_string().into_bytes(), raw[start..].to_vec()));
    }
    records
}

/// Fetches and decodes one bucket.
///
/// # Returns
/// The bucket's records, in storage order.
///
/// # Errors
/// A [`FetchError`]; `NotFound`/`Gone` mean the consumer should report stale input.
pub async fn fetch_bucket(client: &Client, url: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, FetchError> {
    let raw: Vec<u8> = fetch_raw(client, url).await?;
    match frame::decode_records(&raw) {
        Ok(records) => Ok(records),
        Err(err)    => Err(FetchError::FrameError{ url: url.into(), err }),
    }
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn text_records_are_offset_keyed() {
        let records = text_records(b"a a b\nccc\n\ntail");
        assert_eq!(records, vec![
            (b"0".to_vec(), b"a a b".to_vec()),
            (b"6".to_vec(), b"ccc".to_vec()),
            (b"10".to_vec(), b"".to_vec()),
            (b"11".to_vec(), b"tail".to_vec()),
        ]);
        assert!(text_records(b"").is_empty());
    }

    #[tokio::test]
    async fn fetch_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&frame::encode_records(&[(b"k".to_vec(), b"v".to_vec())])).unwrap();

        let client = Client::new();
        let records = fetch_bucket(&client, file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(records, vec![(b"k".to_vec(), b"v".to_vec())]);

        let missing = fetch_raw(&client, "/definitely/not/here").await;
        assert!(matches!(missing, Err(FetchError::FileError{ .. })));
    }
}
