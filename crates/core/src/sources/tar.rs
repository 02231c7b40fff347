//! The `tar` source kind: tarballs pinned by content digest.

use crate::plugin::{SourceContext, SourcePlugin};
use crate::source::Source;
use crate::{Error, Result, digest};
use flate2::read::GzDecoder;
use std::fs;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fetches a tarball into the project mirror and stages its contents.
///
/// The ref is the SHA-256 of the tarball bytes. URLs resolve through the
/// project aliases; plain paths and `file://` URLs are supported.
pub struct TarSource;

impl TarSource {
    fn resolve_path(&self, source: &Source, ctx: &SourceContext<'_>) -> Result<PathBuf> {
        let url = ctx.project.translate_url(&source.url);
        let path = if let Some(rest) = url.strip_prefix("file://") {
            PathBuf::from(rest)
        } else if url.contains("://") {
            return Err(Error::source(
                ctx.element,
                &source.url,
                format!("unsupported URL scheme in '{url}'"),
            ));
        } else {
            PathBuf::from(url)
        };
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(ctx.project.directory.join(path))
        }
    }

    fn mirror_path(&self, ctx: &SourceContext<'_>, reference: &str) -> PathBuf {
        ctx.mirror_dir.join(format!("{reference}.tar"))
    }
}

impl SourcePlugin for TarSource {
    fn kind(&self) -> &'static str {
        "tar"
    }

    fn track(&self, source: &Source, ctx: &SourceContext<'_>) -> Result<String> {
        let path = self.resolve_path(source, ctx)?;
        let (hash, size) = digest::sha256_file(&path).map_err(|_| {
            Error::source(
                ctx.element,
                &source.url,
                format!("cannot read tarball at '{}'", path.display()),
            )
        })?;
        debug!(element = %ctx.element, url = %source.url, size, "Tracked tarball");
        Ok(hash)
    }

    fn fetch(&self, source: &Source, ctx: &SourceContext<'_>) -> Result<()> {
        let Some(reference) = source.reference() else {
            return Err(Error::source(
                ctx.element,
                &source.url,
                "cannot fetch an untracked source",
            ));
        };
        let mirror = self.mirror_path(ctx, reference);
        if mirror.exists() {
            return Ok(());
        }

        let path = self.resolve_path(source, ctx)?;
        let (hash, _) = digest::sha256_file(&path).map_err(|_| {
            Error::source(
                ctx.element,
                &source.url,
                format!("cannot read tarball at '{}'", path.display()),
            )
        })?;
        if hash != reference {
            // A digest mismatch is fatal, not transient: the pinned ref
            // no longer matches what the URL serves
            return Err(Error::source(
                ctx.element,
                &source.url,
                format!("digest mismatch: expected {reference}, found {hash}"),
            ));
        }

        fs::create_dir_all(ctx.mirror_dir)
            .map_err(|e| Error::io(e, ctx.mirror_dir, "create_dir_all"))?;
        let staging = mirror.with_extension("part");
        fs::copy(&path, &staging).map_err(|e| Error::io(e, &staging, "copy"))?;
        fs::rename(&staging, &mirror).map_err(|e| Error::io(e, &mirror, "rename"))?;
        Ok(())
    }

    fn stage(&self, source: &Source, ctx: &SourceContext<'_>, target: &Path) -> Result<()> {
        let Some(reference) = source.reference() else {
            return Err(Error::source(
                ctx.element,
                &source.url,
                "cannot stage an untracked source",
            ));
        };
        let mirror = self.mirror_path(ctx, reference);
        let mut file = fs::File::open(&mirror).map_err(|e| Error::io(e, &mirror, "open"))?;

        // Sniff for gzip rather than trusting the file name
        let mut magic = [0u8; 2];
        let gzipped = file.read_exact(&mut magic).is_ok() && magic == [0x1f, 0x8b];
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(e, &mirror, "seek"))?;

        let unpack = |reader: Box<dyn Read>| -> std::io::Result<()> {
            let mut archive = tar::Archive::new(reader);
            archive.set_preserve_permissions(true);
            archive.unpack(target)
        };
        let reader: Box<dyn Read> = if gzipped {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        unpack(reader).map_err(|e| {
            Error::source(
                ctx.element,
                &source.url,
                format!("failed to unpack tarball: {e}"),
            )
        })
    }
}
