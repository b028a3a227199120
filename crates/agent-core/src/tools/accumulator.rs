use std::collections::HashMap;

use crate::tools::ToolCall;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PartialToolCall {
    name: String,
    arguments: String,
}

/// Assembles one streamed model response into text and finished tool calls.
///
/// Tool calls are keyed by id while in progress and move to the finished list
/// when their end event arrives, so the finished list follows end order rather
/// than start order.
#[derive(Debug, Default, Clone)]
pub struct StreamAccumulator {
    content: String,
    open: HashMap<String, PartialToolCall>,
    finished: Vec<ToolCall>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatedResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Ids of calls that were started but never ended; they are not executed.
    pub unterminated: Vec<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_content(&mut self, token: &str) {
        self.content.push_str(token);
    }

    pub fn on_tool_call_start(&mut self, id: &str, name: &str) {
        if self.open.contains_key(id) {
            log::debug!("Ignoring repeated start for tool call {}", id);
            return;
        }
        self.open.insert(
            id.to_string(),
            PartialToolCall {
                name: name.to_string(),
                arguments: String::new(),
            },
        );
    }

    pub fn on_tool_call_delta(&mut self, id: &str, fragment: &str) {
        match self.open.get_mut(id) {
            Some(partial) => partial.arguments.push_str(fragment),
            None => log::debug!("Dropping argument delta for unknown tool call {}", id),
        }
    }

    pub fn on_tool_call_end(&mut self, id: &str) {
        if let Some(partial) = self.open.remove(id) {
            self.finished
                .push(ToolCall::function(id, partial.name, partial.arguments));
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.finished
    }

    pub fn has_open_calls(&self) -> bool {
        !self.open.is_empty()
    }

    pub fn finish(self) -> AccumulatedResponse {
        let mut unterminated: Vec<String> = self.open.into_keys().collect();
        unterminated.sort();
        AccumulatedResponse {
            content: self.content,
            tool_calls: self.finished,
            unterminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_tokens_are_concatenated() {
        let mut accumulator = StreamAccumulator::new();
        accumulator.on_content("Hel");
        accumulator.on_content("lo");

        let response = accumulator.finish();

        assert_eq!(response.content, "Hello");
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn deltas_are_merged_per_id() {
        let mut accumulator = StreamAccumulator::new();

        accumulator.on_tool_call_start("call_1", "execute_command");
        accumulator.on_tool_call_delta("call_1", "{\"command\": \"");
        accumulator.on_tool_call_delta("call_1", "echo hello");
        accumulator.on_tool_call_delta("call_1", "\"}");
        accumulator.on_tool_call_end("call_1");

        let calls = accumulator.finish().tool_calls;

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "execute_command");
        assert_eq!(calls[0].function.arguments, "{\"command\": \"echo hello\"}");
    }

    #[test]
    fn interleaved_calls_finish_in_end_order() {
        let mut accumulator = StreamAccumulator::new();

        accumulator.on_tool_call_start("a", "first");
        accumulator.on_tool_call_start("b", "second");
        accumulator.on_tool_call_delta("b", "{\"x\":");
        accumulator.on_tool_call_delta("a", "{\"y\":");
        accumulator.on_tool_call_delta("b", "2}");
        accumulator.on_tool_call_end("b");
        accumulator.on_tool_call_delta("a", "1}");
        accumulator.on_tool_call_end("a");

        let calls = accumulator.finish().tool_calls;

        let ids: Vec<&str> = calls.iter().map(|call| call.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(calls[0].function.arguments, "{\"x\":2}");
        assert_eq!(calls[1].function.arguments, "{\"y\":1}");
    }

    #[test]
    fn delta_without_start_is_ignored() {
        let mut accumulator = StreamAccumulator::new();

        accumulator.on_tool_call_delta("ghost", "{}");
        accumulator.on_tool_call_end("ghost");

        let response = accumulator.finish();
        assert!(response.tool_calls.is_empty());
        assert!(response.unterminated.is_empty());
    }

    #[test]
    fn repeated_start_keeps_collected_arguments() {
        let mut accumulator = StreamAccumulator::new();

        accumulator.on_tool_call_start("call_1", "search");
        accumulator.on_tool_call_delta("call_1", "{\"q\":");
        accumulator.on_tool_call_start("call_1", "search");
        accumulator.on_tool_call_delta("call_1", "\"rust\"}");
        accumulator.on_tool_call_end("call_1");

        let calls = accumulator.finish().tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments, "{\"q\":\"rust\"}");
    }

    #[test]
    fn unterminated_calls_are_reported_not_returned() {
        let mut accumulator = StreamAccumulator::new();

        accumulator.on_tool_call_start("done", "one");
        accumulator.on_tool_call_end("done");
        accumulator.on_tool_call_start("dangling", "two");
        accumulator.on_tool_call_delta("dangling", "{");

        assert!(accumulator.has_open_calls());
        let response = accumulator.finish();

        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.unterminated, vec!["dangling".to_string()]);
    }

    #[test]
    fn call_without_deltas_has_empty_arguments() {
        let mut accumulator = StreamAccumulator::new();

        accumulator.on_tool_call_start("call_1", "list");
        accumulator.on_tool_call_end("call_1");

        assert_eq!(accumulator.tool_calls()[0].function.arguments, "");
    }
}
