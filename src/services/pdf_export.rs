use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::{json, Value};

use crate::db::models::{Job, Problem};
use crate::db::types::JobKind;
use crate::repositories;
use crate::services::executor::{ExecutionContext, ExecutionError, JobExecutor};

const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const TEXT_PREVIEW_CHARS: usize = 200;

/// Renders a collection as a one-problem-per-page PDF under the storage
/// root. Overwrites the same object key per collection, so repeat execution
/// of the same payload is harmless.
pub(crate) struct PdfExportExecutor;

impl PdfExportExecutor {
    pub(crate) fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobExecutor for PdfExportExecutor {
    fn kind(&self) -> JobKind {
        JobKind::PdfExport
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        job: &Job,
    ) -> Result<Value, ExecutionError> {
        let pool = ctx.state().db();

        let collection = repositories::collections::find_for_user(pool, &job.user_id, &job.target_id)
            .await
            .map_err(ExecutionError::failed)?
            .ok_or_else(|| ExecutionError::Failed("collection not found".to_string()))?;

        let problems = repositories::problems::list_by_collection_for_export(pool, &collection.id)
            .await
            .map_err(ExecutionError::failed)?;

        ctx.checkpoint().await?;

        let bytes = render_pdf(&problems).map_err(ExecutionError::failed)?;

        ctx.checkpoint().await?;

        let object_key = format!("user/{}/exports/{}.pdf", collection.user_id, collection.id);
        let pdf_url = ctx
            .state()
            .storage()
            .put_object(&object_key, &bytes)
            .await
            .map_err(ExecutionError::failed)?;

        Ok(json!({
            "pdf_url": pdf_url,
            "collection_id": collection.id,
            "problem_count": problems.len(),
        }))
    }
}

fn render_pdf(problems: &[Problem]) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(problems.len().max(1));

    if problems.is_empty() {
        let page_id = add_page(&mut doc, pages_id, &["no problems in this collection"])?;
        kids.push(page_id.into());
    }

    for problem in problems {
        let title = format!("Problem {}", problem.id);
        let preview = problem
            .ocr_text
            .as_deref()
            .map(|text| ascii_preview(text, TEXT_PREVIEW_CHARS))
            .unwrap_or_default();

        let mut lines = vec![title.as_str()];
        if !preview.is_empty() {
            lines.push(preview.as_str());
        }

        let page_id = add_page(&mut doc, pages_id, &lines)?;
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

fn add_page(
    doc: &mut Document,
    pages_id: lopdf::ObjectId,
    lines: &[&str],
) -> Result<lopdf::ObjectId, lopdf::Error> {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
    ];

    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            operations.push(Operation::new("Td", vec![0.into(), (-20).into()]));
        }
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
    }

    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    }))
}

/// Helvetica carries no CJK glyphs; keep the printable ASCII slice of the
/// OCR text for the page preview.
fn ascii_preview(text: &str, max_chars: usize) -> String {
    text.chars()
        .filter(|c| c.is_ascii() && (!c.is_ascii_control() || *c == ' '))
        .map(|c| if c == '(' || c == ')' || c == '\\' { ' ' } else { c })
        .take(max_chars)
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_preview_strips_non_ascii_and_delimiters() {
        assert_eq!(ascii_preview("ab(c)d\\e", 10), "ab c d e");
        assert_eq!(ascii_preview("решение x=2", 10), "x=2");
    }

    #[test]
    fn ascii_preview_truncates() {
        let long = "a".repeat(500);
        assert_eq!(ascii_preview(&long, 200).len(), 200);
    }

    #[test]
    fn render_pdf_handles_empty_collection() {
        let bytes = render_pdf(&[]).expect("pdf");
        assert!(bytes.starts_with(b"%PDF"));
    }
}
