use std::sync::Arc;

use async_trait::async_trait;

use pv_domain::capability::{FileStore, Transcriber};
use pv_domain::config::ErrorPolicy;
use pv_domain::error::{Error, Result};
use pv_domain::provenance::Source;

use crate::args::ArgMap;
use crate::directive::{optional, required, Directive, DirectiveOutput, ResolveContext};
use crate::injection::format_file_section;
use crate::truncation::truncate_inline;

/// `{{#file id=... bucket=... label=...}}`: inline a stored file, scoped to
/// the caller's organisation.  Audio is transcribed first.
pub struct FileDirective {
    files: Arc<dyn FileStore>,
    transcriber: Option<Arc<dyn Transcriber>>,
    default_bucket: String,
    max_inline_chars: usize,
}

impl FileDirective {
    pub fn new(
        files: Arc<dyn FileStore>,
        transcriber: Option<Arc<dyn Transcriber>>,
        default_bucket: impl Into<String>,
        max_inline_chars: usize,
    ) -> Self {
        Self {
            files,
            transcriber,
            default_bucket: default_bucket.into(),
            max_inline_chars,
        }
    }
}

#[async_trait]
impl Directive for FileDirective {
    fn name(&self) -> &str {
        "file"
    }

    fn default_policy(&self) -> ErrorPolicy {
        ErrorPolicy::DegradeToEmpty
    }

    async fn resolve(
        &self,
        _raw: &str,
        args: &ArgMap,
        ctx: &ResolveContext,
    ) -> Result<DirectiveOutput> {
        let id = required(args, "file", "id")?;
        let bucket = optional(args, "bucket").unwrap_or_else(|| self.default_bucket.clone());

        let file = self
            .files
            .fetch_file(&id, &bucket, ctx.organisation_id.as_deref())
            .await?;

        let text = if file.is_audio() {
            let transcriber = self.transcriber.as_ref().ok_or_else(|| {
                Error::Validation(format!("file {id} is audio but no transcriber is configured"))
            })?;
            transcriber.transcribe(&file).await?
        } else {
            String::from_utf8_lossy(&file.bytes).into_owned()
        };

        let label = optional(args, "label").unwrap_or_else(|| file.name.clone());
        let (content, truncated) = truncate_inline(&text, self.max_inline_chars);

        let mut source = Source::new("file", &label).with_id(&file.id);
        if let Some(url) = &file.url {
            source = source.with_url(url);
        }

        Ok(
            DirectiveOutput::content(format_file_section(&label, &content, text.len(), truncated))
                .with_sources(vec![source]),
        )
    }
}

#[cfg(test)]
mod tests {
    use pv_domain::capability::StoredFile;

    use super::*;
    use crate::args::parse_arg_body;

    struct Files;

    #[async_trait]
    impl FileStore for Files {
        async fn fetch_file(
            &self,
            id: &str,
            bucket: &str,
            organisation_id: Option<&str>,
        ) -> Result<StoredFile> {
            if organisation_id != Some("org-a") {
                return Err(Error::not_found("file", id));
            }
            let (name, mime, bytes) = match id {
                "memo" => ("memo.txt", "text/plain", format!("memo in {bucket}").into_bytes()),
                "call" => ("call.mp3", "audio/mpeg", vec![0u8; 4]),
                _ => return Err(Error::not_found("file", id)),
            };
            Ok(StoredFile {
                id: id.into(),
                name: name.into(),
                mime_type: mime.into(),
                bytes,
                url: None,
            })
        }
    }

    struct Transcripts;

    #[async_trait]
    impl Transcriber for Transcripts {
        async fn transcribe(&self, file: &StoredFile) -> Result<String> {
            Ok(format!("transcript of {}", file.name))
        }
    }

    fn ctx() -> ResolveContext {
        ResolveContext {
            organisation_id: Some("org-a".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn inlines_text_file() {
        let d = FileDirective::new(Arc::new(Files), None, "files", 1000);
        let out = d.resolve("", &parse_arg_body("id=memo"), &ctx()).await.unwrap();
        assert!(out.content.contains("=== FILE: memo.txt ==="));
        assert!(out.content.contains("memo in files"));
        assert_eq!(out.sources[0].kind, "file");
        assert_eq!(out.sources[0].id.as_deref(), Some("memo"));
    }

    #[tokio::test]
    async fn custom_bucket_and_label() {
        let d = FileDirective::new(Arc::new(Files), None, "files", 1000);
        let out = d
            .resolve("", &parse_arg_body(r#"id=memo bucket=archive label="Q3 memo""#), &ctx())
            .await
            .unwrap();
        assert!(out.content.contains("memo in archive"));
        assert_eq!(out.sources[0].label, "Q3 memo");
    }

    #[tokio::test]
    async fn audio_is_transcribed() {
        let d = FileDirective::new(Arc::new(Files), Some(Arc::new(Transcripts)), "files", 1000);
        let out = d.resolve("", &parse_arg_body("id=call"), &ctx()).await.unwrap();
        assert!(out.content.contains("transcript of call.mp3"));
    }

    #[tokio::test]
    async fn audio_without_transcriber_fails() {
        let d = FileDirective::new(Arc::new(Files), None, "files", 1000);
        assert!(d.resolve("", &parse_arg_body("id=call"), &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn other_organisation_cannot_read() {
        let d = FileDirective::new(Arc::new(Files), None, "files", 1000);
        let err = d
            .resolve("", &parse_arg_body("id=memo"), &ResolveContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "file", .. }));
    }
}
