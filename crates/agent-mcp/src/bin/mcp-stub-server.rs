//! Minimal stdio MCP server used by the integration tests.
//!
//! Flags:
//!   --newline        answer with newline-delimited JSON instead of framed messages
//!   --tools a,b      only advertise these tools
//!   --page-size N    tools per `tools/list` page (default 1)

use serde_json::{json, Value};
use std::io::{self, BufRead, Read, Write};
use std::time::Duration;

const ALL_TOOLS: &[(&str, &str)] = &[
    ("ping", "Replies with pong"),
    ("echo", "Echoes its arguments"),
    ("sleep", "Sleeps for `ms` milliseconds"),
    ("fail", "Always reports a tool error"),
    ("empty", "Returns no content"),
    ("probe", "Pings the client before answering"),
];

struct Options {
    newline: bool,
    tools: Vec<&'static (&'static str, &'static str)>,
    page_size: usize,
}

fn parse_options() -> Options {
    let mut options = Options {
        newline: false,
        tools: ALL_TOOLS.iter().collect(),
        page_size: 1,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--newline" => options.newline = true,
            "--tools" => {
                let wanted: Vec<String> = args
                    .next()
                    .unwrap_or_default()
                    .split(',')
                    .map(str::to_string)
                    .collect();
                options.tools = ALL_TOOLS
                    .iter()
                    .filter(|(name, _)| wanted.iter().any(|w| w == name))
                    .collect();
            }
            "--page-size" => {
                options.page_size = args
                    .next()
                    .and_then(|n| n.parse().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(1);
            }
            other => eprintln!("ignoring unknown flag {other}"),
        }
    }

    options
}

fn read_message(input: &mut impl BufRead) -> io::Result<Option<Value>> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    if line.trim_start().starts_with('{') {
        return serde_json::from_str(line.trim())
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
    }

    let mut length = 0usize;
    loop {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                length = value.trim().parse().unwrap_or(0);
            }
        }
        line.clear();
        if input.read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }
    }

    let mut body = vec![0u8; length];
    input.read_exact(&mut body)?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_message(out: &mut impl Write, newline: bool, message: &Value) -> io::Result<()> {
    let body = message.to_string();
    if newline {
        writeln!(out, "{body}")?;
    } else {
        write!(out, "Content-Length: {}\r\n\r\n{}", body.len(), body)?;
    }
    out.flush()
}

fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}

fn call_tool(
    params: &Value,
    options: &Options,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> io::Result<Value> {
    let name = params["name"].as_str().unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let result = match name {
        "ping" => text_result("pong"),
        "echo" => json!({
            "content": [{"type": "text", "text": args.to_string()}],
            "structuredContent": args,
        }),
        "sleep" => {
            let ms = args["ms"].as_u64().unwrap_or(100);
            std::thread::sleep(Duration::from_millis(ms));
            text_result(&format!("slept {ms}ms"))
        }
        "fail" => json!({
            "content": [{"type": "text", "text": "boom"}],
            "isError": true,
        }),
        "empty" => json!({"content": []}),
        "probe" => {
            write_message(
                out,
                options.newline,
                &json!({"jsonrpc": "2.0", "id": "probe-1", "method": "ping"}),
            )?;
            write_message(
                out,
                options.newline,
                &json!({"jsonrpc": "2.0", "id": "probe-2", "method": "sampling/createMessage"}),
            )?;
            let mut answers = Vec::new();
            while answers.len() < 2 {
                match read_message(input)? {
                    Some(reply) if reply["id"] == "probe-1" || reply["id"] == "probe-2" => {
                        answers.push(reply)
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
            let pinged = answers
                .iter()
                .any(|a| a["id"] == "probe-1" && a.get("result").is_some());
            let rejected = answers
                .iter()
                .any(|a| a["id"] == "probe-2" && a["error"]["code"] == -32601);
            text_result(&format!("ping answered: {pinged}, unknown rejected: {rejected}"))
        }
        other => {
            return Ok(json!({
                "content": [{"type": "text", "text": format!("unknown tool {other}")}],
                "isError": true,
            }))
        }
    };

    Ok(result)
}

fn handle(
    request: &Value,
    options: &Options,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> io::Result<Option<Value>> {
    let Some(method) = request["method"].as_str() else {
        return Ok(None);
    };
    let Some(id) = request.get("id").cloned() else {
        // notification
        return Ok(None);
    };
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "initialize" => json!({
            "protocolVersion": params["protocolVersion"],
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mcp-stub-server", "version": "0.1.0"},
        }),
        "ping" => json!({}),
        "tools/list" => {
            let start = params["cursor"]
                .as_str()
                .and_then(|c| c.parse::<usize>().ok())
                .unwrap_or(0);
            let end = (start + options.page_size).min(options.tools.len());
            let tools: Vec<Value> = options.tools[start.min(end)..end]
                .iter()
                .map(|(name, description)| {
                    json!({
                        "name": name,
                        "description": description,
                        "inputSchema": {"type": "object", "properties": {}},
                    })
                })
                .collect();
            let mut page = json!({"tools": tools});
            if end < options.tools.len() {
                page["nextCursor"] = json!(end.to_string());
            }
            page
        }
        "tools/call" => call_tool(&params, options, input, out)?,
        other => {
            return Ok(Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {other}")},
            })))
        }
    };

    Ok(Some(json!({"jsonrpc": "2.0", "id": id, "result": result})))
}

fn main() -> io::Result<()> {
    let options = parse_options();
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    while let Some(request) = read_message(&mut input)? {
        if let Some(reply) = handle(&request, &options, &mut input, &mut out)? {
            write_message(&mut out, options.newline, &reply)?;
        }
    }

    Ok(())
}
