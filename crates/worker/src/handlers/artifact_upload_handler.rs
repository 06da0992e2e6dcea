// ArtifactUploadHandler: sends files matching a glob to the controller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::execution_context::ExecutionContext;
use crate::handlers::handler::{required_parameter, Handler};
use crate::model::{Action, BuildStatus};

pub struct ArtifactUploadHandler;

impl ArtifactUploadHandler {
    pub fn new() -> Self {
        Self
    }

    /// Files matching `pattern`, relative patterns being taken from `base`.
    pub fn matching_files(base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let full = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            base.join(pattern).to_string_lossy().into_owned()
        };

        let mut files: Vec<PathBuf> = glob::glob(&full)
            .with_context(|| format!("Invalid artifact pattern '{pattern}'"))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(files)
    }
}

impl Default for ArtifactUploadHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for ArtifactUploadHandler {
    async fn run(
        &self,
        context: &ExecutionContext,
        action: &Action,
        step: &str,
    ) -> Result<BuildStatus> {
        let pattern = required_parameter(action, "path")?;
        let tag = required_parameter(action, "tag")?;

        let files = Self::matching_files(context.working_directory(), pattern)?;
        if files.is_empty() {
            context.log(step, format!("No artifact matches '{pattern}'."));
            return Ok(BuildStatus::Fail);
        }

        for file in &files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("Artifact path has no file name: {}", file.display()))?;
            let content = tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read artifact {}", file.display()))?;

            context.log(
                step,
                format!("Uploading artifact {name} ({} bytes) with tag {tag}", content.len()),
            );
            context
                .controller()
                .upload_artifact(context.build_id(), tag, &name, content)
                .await?;
        }

        Ok(BuildStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;

    fn upload(path: &str) -> Action {
        Action::builtin("Artifact Upload")
            .with_parameter("path", path)
            .with_parameter("tag", "v1.0")
    }

    #[tokio::test]
    async fn uploads_every_matching_file() {
        let t = TestContext::new();
        let out = t.dir.path().join("dist");
        std::fs::create_dir_all(out.join("nested")).unwrap();
        std::fs::write(out.join("app.tar.gz"), b"tarball").unwrap();
        std::fs::write(out.join("app.sha256"), b"sum").unwrap();
        std::fs::write(out.join("notes.txt"), b"ignored").unwrap();

        let status = ArtifactUploadHandler::new()
            .run(&t.context, &upload("dist/app.*"), "s")
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::Success);

        let (controller, _dir) = t.finish().await;
        let artifacts = controller.artifacts();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].name, "app.sha256");
        assert_eq!(artifacts[1].name, "app.tar.gz");
        assert_eq!(artifacts[1].content, b"tarball");
        assert!(artifacts.iter().all(|a| a.tag == "v1.0" && a.build_id == 42));
    }

    #[tokio::test]
    async fn no_match_fails() {
        let t = TestContext::new();
        let status = ArtifactUploadHandler::new()
            .run(&t.context, &upload("dist/*.zip"), "s")
            .await
            .unwrap();
        assert_eq!(status, BuildStatus::Fail);
        let (controller, _dir) = t.finish().await;
        assert!(controller.artifacts().is_empty());
        assert!(controller.log_values()[0].contains("No artifact matches"));
    }

    #[tokio::test]
    async fn missing_tag_is_a_dispatch_error() {
        let t = TestContext::new();
        let action = Action::builtin("Artifact Upload").with_parameter("path", "*");
        assert!(ArtifactUploadHandler::new().run(&t.context, &action, "s").await.is_err());
        t.finish().await;
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(ArtifactUploadHandler::matching_files(Path::new("/tmp"), "[").is_err());
    }
}
