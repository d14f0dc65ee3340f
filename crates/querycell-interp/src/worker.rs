//! Embedded interpreter worker program.

use std::path::PathBuf;

/// Source of the worker loop, passed to the interpreter on the command
/// line. Reads newline-delimited JSON requests on stdin and writes
/// newline-delimited JSON messages on stdout.
pub const WORKER_PROGRAM: &str = r#"
import contextlib
import io
import json
import sys

scope = {}
print(json.dumps({"type": "ready"}), flush=True)
for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    msg = json.loads(line)
    if msg.get("type") == "shutdown":
        break
    exec_id = msg.get("id")
    buf = io.StringIO()
    try:
        with contextlib.redirect_stdout(buf):
            code = compile(msg.get("code", ""), "<cell>", "exec")
            exec(code, scope)
        out = buf.getvalue()
        if out:
            print(json.dumps({"type": "stream", "id": exec_id, "name": "stdout", "text": out}), flush=True)
        print(json.dumps({"type": "result", "id": exec_id}), flush=True)
    except BaseException as exc:
        print(json.dumps({"type": "error", "id": exec_id, "ename": type(exc).__name__, "evalue": str(exc)}), flush=True)
"#;

/// Fixed bootstrap executed before the worker accepts user code.
pub const BOOTSTRAP: &str = "import json\nimport math\nimport statistics\n";

/// Locate the interpreter executable on PATH.
#[must_use]
pub fn resolve_interpreter() -> Option<PathBuf> {
    which::which("python3").or_else(|_| which::which("python")).ok()
}
