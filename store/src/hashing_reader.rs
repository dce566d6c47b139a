use digest::Digest;
use pin_project_lite::pin_project;
use tokio::io::AsyncRead;

use crate::digests::HexDigest;

pin_project! {
    /// Wraps an existing AsyncRead, and allows querying for the digests of
    /// all data read "through" it.
    /// Both repository checksum algorithms are computed in a single pass.
    pub struct HashingReader<R>
    where
        R: AsyncRead,
    {
        #[pin]
        inner: R,
        md5: md5::Md5,
        sha1: sha1::Sha1,
    }
}

impl<R> HashingReader<R>
where
    R: AsyncRead,
{
    pub fn from(r: R) -> Self {
        Self {
            inner: r,
            md5: md5::Md5::new(),
            sha1: sha1::Sha1::new(),
        }
    }

    /// Return the digests as `(md5, sha1)`.
    pub fn digests(self) -> (HexDigest, HexDigest) {
        (
            HexDigest::from_bytes(&self.md5.finalize()),
            HexDigest::from_bytes(&self.sha1.finalize()),
        )
    }
}

impl<R> tokio::io::AsyncRead for HashingReader<R>
where
    R: AsyncRead,
{
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let buf_filled_len_before = buf.filled().len();

        let this = self.project();
        let ret = this.inner.poll_read(cx, buf);

        // write everything new filled into the hashers.
        this.md5.update(&buf.filled()[buf_filled_len_before..]);
        this.sha1.update(&buf.filled()[buf_filled_len_before..]);

        ret
    }
}
