use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};

use toolrelay_common::schema::FieldType;
use toolrelay_common::{ObjectSchema, ToolContract, ValidatedInput};

use crate::registry::{ToolDescriptor, ToolHandler, ToolHandlerContext};

pub const NAME: &str = "add_numbers";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddNumbersInput {
    pub a: Number,
    pub b: Number,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddNumbersOutput {
    pub input: AddNumbersInput,
    pub output: Number,
}

pub fn input_schema() -> ObjectSchema {
    ObjectSchema::new()
        .field("a", FieldType::Number, "The first number to add")
        .field("b", FieldType::Number, "The second number to add")
}

pub fn output_schema() -> ObjectSchema {
    ObjectSchema::new()
        .field("input", FieldType::Object(input_schema()), "The numbers that were added")
        .field("output", FieldType::Number, "The sum of a and b")
}

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: NAME.into(),
        title: Some("Add Numbers".into()),
        description: "A tool to add two numbers together.".into(),
        contract: ToolContract {
            input: input_schema(),
            output: output_schema(),
        },
    }
}

/// Integer sum when both operands are integers and it fits, float sum otherwise.
pub fn sum(a: &Number, b: &Number) -> Option<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(s) = x.checked_add(y) {
            return Some(Number::from(s));
        }
    }
    let (x, y) = (a.as_f64()?, b.as_f64()?);
    Number::from_f64(x + y)
}

pub fn handler() -> ToolHandler {
    Arc::new(|args: ValidatedInput, _ctx: Arc<ToolHandlerContext>| {
        Box::pin(async move {
            let input: AddNumbersInput = args
                .deserialize()
                .map_err(|e| format!("Invalid arguments: {}", e))?;

            let total = sum(&input.a, &input.b)
                .ok_or_else(|| format!("Sum of {} and {} is not finite", input.a, input.b))?;

            tracing::info!(a = %input.a, b = %input.b, sum = %total, "add_numbers executed");

            let output: Value = json!({
                "input": input,
                "output": total,
            });
            Ok(output)
        })
    })
}
