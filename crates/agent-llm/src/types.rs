/// One incremental event from a streaming chat completion.
///
/// Tool calls arrive as a start, any number of argument fragments and an end,
/// all keyed by the call id. Events for different calls may interleave.
#[derive(Debug, Clone, PartialEq)]
pub enum LLMChunk {
    Token(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments: String },
    ToolCallEnd { id: String },
    Done,
}

impl LLMChunk {
    pub fn token(text: impl Into<String>) -> Self {
        LLMChunk::Token(text.into())
    }

    /// Start, single delta and end for a complete call.
    pub fn whole_tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Vec<Self> {
        let id = id.into();
        vec![
            LLMChunk::ToolCallStart {
                id: id.clone(),
                name: name.into(),
            },
            LLMChunk::ToolCallDelta {
                id: id.clone(),
                arguments: arguments.into(),
            },
            LLMChunk::ToolCallEnd { id },
        ]
    }
}
