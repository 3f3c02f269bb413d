//! Entry-point templates wrapped around user code.
//!
//! Every harness follows the same contract: read one JSON object from
//! stdin, call the user's `handler(event)`, write the JSON-encoded return
//! value to stdout. Anything the user prints is redirected to stderr so
//! stdout carries only the result.

use crate::function::RuntimeFamily;

const USER_CODE: &str = "{{USER_CODE}}";

const PYTHON_HARNESS: &str = r#"import json
import sys

_faas_stdout = sys.stdout
sys.stdout = sys.stderr

{{USER_CODE}}


def _faas_main():
    raw = sys.stdin.read()
    event = json.loads(raw) if raw.strip() else {}
    entry = globals().get("handler")
    if not callable(entry):
        sys.stderr.write("No 'handler(event)' function defined in code.\n")
        sys.exit(1)
    result = entry(event)
    try:
        encoded = json.dumps(result, ensure_ascii=False)
    except (TypeError, ValueError):
        encoded = str(result)
    _faas_stdout.write(encoded)
    _faas_stdout.flush()


if __name__ == "__main__":
    _faas_main()
"#;

const JAVASCRIPT_HARNESS: &str = r#"'use strict';
console.log = (...args) => process.stderr.write(args.map(String).join(' ') + '\n');
console.info = console.log;

{{USER_CODE}}

async function __faasMain() {
    const chunks = [];
    for await (const chunk of process.stdin) {
        chunks.push(chunk);
    }
    const raw = Buffer.concat(chunks).toString('utf8');
    const event = raw.trim() ? JSON.parse(raw) : {};
    if (typeof handler !== 'function') {
        process.stderr.write("No 'handler(event)' function defined in code.\n");
        process.exit(1);
    }
    const result = await handler(event);
    const encoded = result === undefined ? 'null' : JSON.stringify(result);
    process.stdout.write(encoded);
}

__faasMain().catch((err) => {
    process.stderr.write((err && err.stack) ? err.stack + '\n' : String(err) + '\n');
    process.exit(1);
});
"#;

/// Source of the harness for `family` with `code` spliced in.
pub fn render(family: RuntimeFamily, code: &str) -> String {
    let template = match family {
        RuntimeFamily::Python => PYTHON_HARNESS,
        RuntimeFamily::JavaScript => JAVASCRIPT_HARNESS,
    };
    template.replacen(USER_CODE, code, 1)
}

/// File name the rendered harness is written to inside the workspace.
pub fn entry_file(family: RuntimeFamily) -> String {
    format!("main{}", family.source_extension())
}
