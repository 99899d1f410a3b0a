use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use toolrelay_common::schema::FieldType;
use toolrelay_common::{ObjectSchema, ToolContract, ValidatedInput};

use crate::registry::{ToolDescriptor, ToolHandler, ToolHandlerContext};

pub const NAME: &str = "make_note";

/// File the note is written to, inside the context's notes directory.
pub const NOTE_FILE_NAME: &str = "make_note_tool.txt";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MakeNoteInput {
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MakeNoteOutput {
    pub input: MakeNoteInput,
    pub confirmation: bool,
}

pub fn input_schema() -> ObjectSchema {
    ObjectSchema::new().field(
        "content",
        FieldType::String {
            min_length: Some(3),
        },
        "The content of the note to be made and stored.",
    )
}

pub fn output_schema() -> ObjectSchema {
    ObjectSchema::new()
        .field("input", FieldType::Object(input_schema()), "The note that was stored")
        .field(
            "confirmation",
            FieldType::Boolean,
            "Confirmation of the successful note creation.",
        )
}

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: NAME.into(),
        title: Some("Make Note".into()),
        description: "A tool to make or take a note and store it on the desktop.".into(),
        contract: ToolContract {
            input: input_schema(),
            output: output_schema(),
        },
    }
}

pub fn handler() -> ToolHandler {
    Arc::new(|args: ValidatedInput, ctx: Arc<ToolHandlerContext>| {
        Box::pin(async move {
            let input: MakeNoteInput = args
                .deserialize()
                .map_err(|e| format!("Invalid arguments: {}", e))?;

            tokio::fs::create_dir_all(&ctx.notes_dir)
                .await
                .map_err(|e| format!("Failed to create {}: {}", ctx.notes_dir.display(), e))?;

            let path = ctx.notes_dir.join(NOTE_FILE_NAME);
            tokio::fs::write(&path, input.content.as_bytes())
                .await
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;

            tracing::info!(path = %path.display(), bytes = input.content.len(), "Note saved");

            Ok(json!({
                "input": input,
                "confirmation": true,
            }))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("toolrelay-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_note_is_written() {
        let dir = scratch_dir("note");
        let ctx = Arc::new(ToolHandlerContext::new(dir.clone()));
        let input = input_schema()
            .parse_input(&json!({"content": "buy milk"}))
            .unwrap();

        let out = handler()(input, ctx).await.unwrap();
        assert_eq!(
            out,
            json!({"input": {"content": "buy milk"}, "confirmation": true})
        );

        let written = std::fs::read_to_string(dir.join(NOTE_FILE_NAME)).unwrap();
        assert_eq!(written, "buy milk");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_short_content_rejected() {
        let err = input_schema()
            .parse_input(&json!({"content": "hi"}))
            .unwrap_err();
        assert_eq!(err.fields(), vec!["content"]);
    }
}
