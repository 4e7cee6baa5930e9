//! Position-tracking tar entry writer.
//!
//! Headers are fully determined by `(name, size)`: ustar format, mode 0644,
//! zero uid/gid/mtime, no user or group names. Rewriting a header for the
//! same pair therefore reproduces the same 512 bytes, which the concurrent
//! fill-in pass depends on.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tar block size.
pub(crate) const BLOCK_SIZE: u64 = 512;

/// Two zero blocks terminate an archive.
const FOOTER: [u8; 1024] = [0u8; 1024];

const ZERO_BLOCK: [u8; 512] = [0u8; 512];

/// Length of the ustar `name` field.
const USTAR_NAME_MAX: usize = 100;

/// Header block for a regular file entry.
pub(crate) fn header_block(name: &str, size: u64) -> io::Result<[u8; 512]> {
    let mut header = tar::Header::new_ustar();
    header.set_path(name)?;
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_cksum();

    let mut block = [0u8; 512];
    block.copy_from_slice(header.as_bytes());
    Ok(block)
}

/// Bytes of zero padding after a body of `size` bytes.
pub(crate) fn padding_len(size: u64) -> usize {
    ((BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE) as usize
}

/// Bytes occupied by one entry: header, body and padding.
pub(crate) fn entry_len(size: u64) -> u64 {
    BLOCK_SIZE + size + padding_len(size) as u64
}

/// Copy exactly `size` bytes from `reader`, failing if it runs short or long.
pub(crate) async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, size: u64) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = tokio::io::copy(&mut (&mut *reader).take(size), writer).await?;
    if copied != size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("content ended after {} of {} bytes", copied, size),
        ));
    }

    let mut extra = [0u8; 1];
    if reader.read(&mut extra).await? > 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("content is longer than the declared {} bytes", size),
        ));
    }
    Ok(())
}

/// Whether `name` fits the ustar name field without an extension header.
pub(crate) fn fits_header(name: &str) -> bool {
    name.len() <= USTAR_NAME_MAX
}

/// Sequential tar writer that knows its byte offset.
pub(crate) struct TarStream<W> {
    inner: W,
    position: u64,
}

impl<W: AsyncWrite + Unpin> TarStream<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    /// Offset of the next byte to be written.
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) async fn append_bytes(&mut self, name: &str, body: &[u8]) -> io::Result<()> {
        let size = body.len() as u64;
        self.write_header(name, size).await?;
        self.inner.write_all(body).await?;
        self.position += size;
        self.write_padding(size).await
    }

    pub(crate) async fn append_reader<R>(&mut self, name: &str, size: u64, reader: &mut R) -> io::Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.write_header(name, size).await?;
        copy_exact(reader, &mut self.inner, size).await?;
        self.position += size;
        self.write_padding(size).await
    }

    /// Reserve a correctly framed entry with an all-zero body.
    pub(crate) async fn append_placeholder(&mut self, name: &str, size: u64) -> io::Result<()> {
        self.write_header(name, size).await?;
        let mut zeros = tokio::io::repeat(0).take(size);
        tokio::io::copy(&mut zeros, &mut self.inner).await?;
        self.position += size;
        self.write_padding(size).await
    }

    /// Write the end-of-archive marker and flush.
    pub(crate) async fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(&FOOTER).await?;
        self.position += FOOTER.len() as u64;
        self.inner.flush().await?;
        Ok(self.inner)
    }

    async fn write_header(&mut self, name: &str, size: u64) -> io::Result<()> {
        let header = header_block(name, size)?;
        self.inner.write_all(&header).await?;
        self.position += BLOCK_SIZE;
        Ok(())
    }

    async fn write_padding(&mut self, size: u64) -> io::Result<()> {
        let padding = padding_len(size);
        if padding > 0 {
            self.inner.write_all(&ZERO_BLOCK[..padding]).await?;
            self.position += padding as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_header_is_deterministic() {
        let a = header_block("sha256-abc.tar.gz", 1234).unwrap();
        let b = header_block("sha256-abc.tar.gz", 1234).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, header_block("sha256-abc.tar.gz", 1235).unwrap());
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding_len(0), 0);
        assert_eq!(padding_len(1), 511);
        assert_eq!(padding_len(512), 0);
        assert_eq!(padding_len(513), 511);
        assert_eq!(entry_len(10), 1024);
        assert_eq!(entry_len(0), 512);
    }

    #[tokio::test]
    async fn test_stream_is_readable_by_tar_crate() {
        let mut stream = TarStream::new(Vec::new());
        stream.append_bytes("manifest.json", b"[]").await.unwrap();
        let mut body: &[u8] = b"layer";
        stream.append_reader("sha256-aa.tar.gz", 5, &mut body).await.unwrap();
        stream.append_placeholder("sha256-bb.tar.gz", 700).await.unwrap();
        assert_eq!(stream.position(), entry_len(2) + entry_len(5) + entry_len(700));
        let bytes = stream.finish().await.unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            seen.push((name, data));
        }

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], ("manifest.json".to_string(), b"[]".to_vec()));
        assert_eq!(seen[1].1, b"layer");
        assert_eq!(seen[2].1, vec![0u8; 700]);
    }

    #[tokio::test]
    async fn test_append_reader_rejects_short_content() {
        let mut stream = TarStream::new(Vec::new());
        let mut body: &[u8] = b"abc";
        let err = stream
            .append_reader("short.tar.gz", 10, &mut body)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_append_reader_rejects_long_content() {
        let mut stream = TarStream::new(Vec::new());
        let mut body: &[u8] = b"the-real-layer-bytes";
        let err = stream
            .append_reader("long.tar.gz", 4, &mut body)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_header_name_limit() {
        let sha256 = format!("sha256-{}.tar.gz", "a".repeat(64));
        let sha512 = format!("sha512-{}.tar.gz", "a".repeat(128));
        assert!(fits_header(&sha256));
        assert!(header_block(&sha256, 1).is_ok());
        assert!(!fits_header(&sha512));
    }
}
