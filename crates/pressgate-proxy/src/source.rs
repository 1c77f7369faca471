// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Byte-source seam between the HTTP layer, the IPP parser, and the device
// transports.  Document payloads stream through this trait so the proxy
// never buffers a whole job unless it has to transcode its compression.

use async_trait::async_trait;

/// An async, pull-based byte stream.  `read` returning 0 means end of data.
#[async_trait]
pub trait DocumentSource: Send {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// In-memory source, used for transcoded documents and in tests.
#[async_trait]
impl DocumentSource for std::io::Cursor<Vec<u8>> {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(self, buf)
    }
}

/// Fill `buf` completely or fail with `UnexpectedEof`.
pub async fn read_exact(source: &mut (impl DocumentSource + ?Sized), buf: &mut [u8]) -> std::io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended mid-message",
            ));
        }
        filled += n;
    }
    Ok(())
}

pub async fn read_u8(source: &mut (impl DocumentSource + ?Sized)) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(source, &mut buf).await?;
    Ok(buf[0])
}

pub async fn read_u16(source: &mut (impl DocumentSource + ?Sized)) -> std::io::Result<u16> {
    let mut buf = [0u8; 2];
    read_exact(source, &mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

pub async fn read_u32(source: &mut (impl DocumentSource + ?Sized)) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(source, &mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

/// Drain the remainder of a source, returning the byte count.
pub async fn drain(source: &mut (impl DocumentSource + ?Sized)) -> std::io::Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        total += n as u64;
    }
}
