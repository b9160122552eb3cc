/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Read into `buf` until `delimiter` is found or `max_len` bytes have been read.
///
/// Returns whether the delimiter was found and the number of bytes read.
/// A zero length with `false` means the reader reached EOF.
pub(crate) async fn limited_read_until<R>(
    reader: &mut R,
    delimiter: u8,
    max_len: usize,
    buf: &mut Vec<u8>,
) -> io::Result<(bool, usize)>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut nr: usize = 0;
    loop {
        if nr >= max_len {
            return Ok((false, nr));
        }
        let left = max_len - nr;

        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((false, nr));
        }
        let search = if available.len() > left {
            &available[..left]
        } else {
            available
        };

        if let Some(p) = memchr::memchr(delimiter, search) {
            buf.extend_from_slice(&search[..=p]);
            reader.consume(p + 1);
            return Ok((true, nr + p + 1));
        }

        let len = search.len();
        buf.extend_from_slice(search);
        reader.consume(len);
        nr += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn read_line() {
        let stream = tokio_test::io::Builder::new()
            .read(b"abc\r\n")
            .read(b"de")
            .read(b"f\n")
            .build();
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        let (found, nr) = limited_read_until(&mut reader, b'\n', 64, &mut buf)
            .await
            .unwrap();
        assert!(found);
        assert_eq!(nr, 5);
        assert_eq!(buf.as_slice(), b"abc\r\n");

        buf.clear();
        let (found, nr) = limited_read_until(&mut reader, b'\n', 64, &mut buf)
            .await
            .unwrap();
        assert!(found);
        assert_eq!(nr, 4);
        assert_eq!(buf.as_slice(), b"def\n");

        buf.clear();
        let (found, nr) = limited_read_until(&mut reader, b'\n', 64, &mut buf)
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(nr, 0);
    }

    #[tokio::test]
    async fn read_too_long() {
        let stream = tokio_test::io::Builder::new().read(b"abcdefgh\n").build();
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        let (found, nr) = limited_read_until(&mut reader, b'\n', 4, &mut buf)
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(nr, 4);
        assert_eq!(buf.as_slice(), b"abcd");
    }
}
