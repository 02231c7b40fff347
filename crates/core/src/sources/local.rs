//! The `local` source kind: files tracked within the project itself.

use crate::plugin::{SourceContext, SourcePlugin};
use crate::source::Source;
use crate::{Consistency, Error, Result, digest};
use std::path::{Path, PathBuf};

/// Stages a file tree that lives inside the project directory.
///
/// The ref is the content digest of the tree, computed eagerly at load:
/// local sources never need network access, so they are `Cached` from the
/// start.
pub struct LocalSource;

impl LocalSource {
    fn tree_root(&self, source: &Source, ctx: &SourceContext<'_>) -> Result<PathBuf> {
        let root = ctx.project.directory.join(&source.url);
        if !root.exists() {
            return Err(Error::source(
                ctx.element,
                &source.url,
                "local path does not exist in the project",
            ));
        }
        Ok(root)
    }
}

impl SourcePlugin for LocalSource {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn track(&self, source: &Source, ctx: &SourceContext<'_>) -> Result<String> {
        let root = self.tree_root(source, ctx)?;
        digest::sha256_tree(&root)
    }

    fn fetch(&self, source: &Source, ctx: &SourceContext<'_>) -> Result<()> {
        // Nothing to download; just confirm the tree is still there
        self.tree_root(source, ctx).map(|_| ())
    }

    fn stage(&self, source: &Source, ctx: &SourceContext<'_>, target: &Path) -> Result<()> {
        let root = self.tree_root(source, ctx)?;
        digest::copy_tree(&root, target)?;
        Ok(())
    }

    fn resolve_at_load(&self, source: &mut Source, ctx: &SourceContext<'_>) -> Result<()> {
        let reference = self.track(source, ctx)?;
        source.set_reference(reference);
        source.bump_consistency(Consistency::Cached);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Project) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("elements")).unwrap();
        fs::create_dir_all(dir.path().join("files")).unwrap();
        fs::write(dir.path().join("files/hello.txt"), b"hello").unwrap();
        fs::write(
            dir.path().join("project.conf"),
            "name: localtest\nelement-path: elements\n",
        )
        .unwrap();
        let project = Project::load(dir.path(), &BTreeMap::new()).unwrap();
        (dir, project)
    }

    fn source(url: &str) -> Source {
        Source::from_descriptor(
            &crate::source::SourceDescriptor {
                kind: "local".into(),
                url: url.into(),
                reference: None,
            },
            0,
        )
    }

    #[test]
    fn resolves_to_cached_at_load() {
        let (_dir, project) = fixture();
        let mirror = project.mirror_dir();
        let ctx = SourceContext {
            project: &project,
            element: "e.stack",
            mirror_dir: &mirror,
        };
        let mut s = source("files");
        LocalSource.resolve_at_load(&mut s, &ctx).unwrap();
        assert_eq!(s.consistency(), Consistency::Cached);
        assert!(s.reference().is_some());
    }

    #[test]
    fn staging_copies_the_tree() {
        let (_dir, project) = fixture();
        let mirror = project.mirror_dir();
        let ctx = SourceContext {
            project: &project,
            element: "e.stack",
            mirror_dir: &mirror,
        };
        let target = TempDir::new().unwrap();
        LocalSource.stage(&source("files"), &ctx, target.path()).unwrap();
        assert_eq!(
            fs::read(target.path().join("hello.txt")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn missing_path_is_a_source_error() {
        let (_dir, project) = fixture();
        let mirror = project.mirror_dir();
        let ctx = SourceContext {
            project: &project,
            element: "e.stack",
            mirror_dir: &mirror,
        };
        assert!(matches!(
            LocalSource.fetch(&source("absent"), &ctx),
            Err(Error::Source { .. })
        ));
    }
}
